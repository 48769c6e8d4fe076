//! Integration scenarios exercising the Driver facade and Session
//! state machine together, matching the test matrix of the TLS engine
//! this crate implements: mutual TLS, validation rejection, SNI
//! dispatch, and protocol version mismatch.

use std::sync::{Arc, Mutex};

use ntls_core::prelude::*;
use ntls_core::certificate::{CertificateOptions, DistinguishedName, SubjectAltName};
use ntls_core::key::KeyAlgorithm;
use ntls_core::options::{HandshakeOptions, Identity};
use ntls_core::secret::Validation;

fn issue_ca() -> (Certificate, Key) {
    let driver = Driver::new();
    let key = driver
        .generate_key(KeyGenOptions::new(KeyAlgorithm::EcP256))
        .unwrap();
    let subject = DistinguishedName::new()
        .with_common_name("TEST.AUTHORITY")
        .with_organization("Bloomberg LP");
    let mut options = CertificateOptions::default();
    options.is_ca = true;
    options.serial = Some(1);
    let cert = driver
        .generate_self_signed_certificate(subject, &key, options)
        .unwrap();
    (cert, key)
}

fn issue_leaf(cn: &str, ca_cert: &Certificate, ca_key: &Key) -> (Certificate, Key) {
    let driver = Driver::new();
    let key = driver
        .generate_key(KeyGenOptions::new(KeyAlgorithm::EcP256))
        .unwrap();
    let subject = DistinguishedName::new().with_common_name(cn);
    let mut options = CertificateOptions::default();
    options.san = vec![
        SubjectAltName::Dns(cn.to_string()),
        SubjectAltName::Ip("127.0.0.1".parse().unwrap()),
    ];
    let cert = driver
        .generate_certificate(subject, &key, ca_cert, ca_key, options)
        .unwrap();
    (cert, key)
}

/// Pumps ciphertext between two sessions in lockstep, `chunk` bytes at
/// a time, until neither side has anything left to move.
fn pump(a: &mut Session, b: &mut Session, chunk: usize) {
    for _ in 0..256 {
        let mut moved = false;
        let out = a.pop_outgoing_cipher(chunk);
        if !out.is_empty() {
            let _ = b.push_incoming_cipher(&out);
            moved = true;
        }
        let out = b.pop_outgoing_cipher(chunk);
        if !out.is_empty() {
            let _ = a.push_incoming_cipher(&out);
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

#[test]
fn mutual_tls_round_trips_application_data_and_shuts_down_cleanly() {
    for &chunk in &[1usize, 2, 4, 8, 32, 1024, 4096] {
        let (ca_cert, ca_key) = issue_ca();
        let (server_cert, server_key) = issue_leaf("localhost", &ca_cert, &ca_key);
        let (client_cert, client_key) = issue_leaf("TEST.USER", &ca_cert, &ca_key);

        let driver = Driver::new();

        let mut server_opts = ServerOptions::default();
        server_opts.authentication = AuthenticationMode::VerifyPeer;
        server_opts.authorities = Arc::new(vec![ca_cert.clone()]);
        server_opts.identity = Some(Arc::new(Identity::new(server_cert, server_key)));

        let mut client_opts = ClientOptions::default();
        client_opts.authentication = AuthenticationMode::VerifyPeer;
        client_opts.authorities = Arc::new(vec![ca_cert.clone()]);
        client_opts.identity = Some(Arc::new(Identity::new(client_cert, client_key)));

        let mut server = driver
            .create_encryption_server(Arc::new(server_opts))
            .unwrap();
        let mut client = driver
            .create_encryption_client(
                &client_opts,
                &HandshakeOptions {
                    server_name: Some("localhost".into()),
                },
            )
            .unwrap();

        let client_ok = Arc::new(Mutex::new(false));
        let server_ok = Arc::new(Mutex::new(false));
        {
            let flag = client_ok.clone();
            client
                .initiate_handshake(move |r| {
                    assert!(r.error.is_none(), "client handshake: {:?}", r.detail);
                    *flag.lock().unwrap() = true;
                })
                .unwrap();
        }
        {
            let flag = server_ok.clone();
            server
                .initiate_handshake(move |r| {
                    assert!(r.error.is_none(), "server handshake: {:?}", r.detail);
                    *flag.lock().unwrap() = true;
                })
                .unwrap();
        }

        pump(&mut client, &mut server, chunk);

        assert_eq!(client.state(), SessionState::Established, "chunk={chunk}");
        assert_eq!(server.state(), SessionState::Established, "chunk={chunk}");
        assert!(*client_ok.lock().unwrap(), "chunk={chunk}");
        assert!(*server_ok.lock().unwrap(), "chunk={chunk}");

        client.push_outgoing_plain(b"Hello, server!").unwrap();
        server.push_outgoing_plain(b"Hello, client!").unwrap();
        pump(&mut client, &mut server, chunk);

        assert_eq!(server.pop_incoming_plain(4096), b"Hello, server!", "chunk={chunk}");
        assert_eq!(client.pop_incoming_plain(4096), b"Hello, client!", "chunk={chunk}");

        client.shutdown().unwrap();
        server.shutdown().unwrap();
        pump(&mut client, &mut server, chunk);

        assert!(client.is_shutdown_finished(), "chunk={chunk}");
        assert!(server.is_shutdown_finished(), "chunk={chunk}");
        assert!(!client.has_outgoing_cipher());
        assert!(!server.has_outgoing_cipher());
    }
}

#[test]
fn client_validation_callback_rejection_fails_the_session() {
    let (ca_cert, ca_key) = issue_ca();
    let (server_cert, server_key) = issue_leaf("localhost", &ca_cert, &ca_key);
    let driver = Driver::new();

    let mut server_opts = ServerOptions::default();
    server_opts.authentication = AuthenticationMode::None;
    server_opts.identity = Some(Arc::new(Identity::new(server_cert, server_key)));

    let mut client_opts = ClientOptions::default();
    client_opts.authentication = AuthenticationMode::VerifyPeer;
    client_opts.authorities = Arc::new(vec![ca_cert]);
    client_opts.validation = Some(Validation::new(
        "always reject",
        Arc::new(|_: &Certificate| false),
    ));

    let mut server = driver
        .create_encryption_server(Arc::new(server_opts))
        .unwrap();
    let mut client = driver
        .create_encryption_client(
            &client_opts,
            &HandshakeOptions {
                server_name: Some("localhost".into()),
            },
        )
        .unwrap();

    let client_error = Arc::new(Mutex::new(None));
    {
        let flag = client_error.clone();
        client
            .initiate_handshake(move |r| *flag.lock().unwrap() = Some(r.error))
            .unwrap();
    }
    server.initiate_handshake(|_| {}).unwrap();

    pump(&mut client, &mut server, 4096);

    assert_eq!(client.state(), SessionState::Failed);
    assert_eq!(client_error.lock().unwrap().unwrap(), Some(ErrorKind::Unauthorized));

    let result = client.push_incoming_cipher(&[1, 2, 3]);
    assert!(matches!(result, Err(e) if e.kind() == ErrorKind::Invalid));
}

#[test]
fn sni_override_delivers_the_matching_identity() {
    let (ca_cert, ca_key) = issue_ca();
    let (top_cert, top_key) = issue_leaf("top-level.example.test", &ca_cert, &ca_key);
    let (one_cert, one_key) = issue_leaf("one.example.test", &ca_cert, &ca_key);
    let (two_cert, two_key) = issue_leaf("two.example.test", &ca_cert, &ca_key);

    let driver = Driver::new();

    let mut one_opts = ServerOptions::default();
    one_opts.identity = Some(Arc::new(Identity::new(one_cert, one_key)));

    let mut two_opts = ServerOptions::default();
    two_opts.identity = Some(Arc::new(Identity::new(two_cert.clone(), two_key)));

    let mut top_opts = ServerOptions::default();
    top_opts.identity = Some(Arc::new(Identity::new(top_cert, top_key)));
    top_opts.add_override("one", Arc::new(one_opts));
    top_opts.add_override("two", Arc::new(two_opts));

    let mut client_opts = ClientOptions::default();
    client_opts.authentication = AuthenticationMode::VerifyPeer;
    client_opts.authorities = Arc::new(vec![ca_cert]);

    let mut server = driver
        .create_encryption_server(Arc::new(top_opts))
        .unwrap();
    let mut client = driver
        .create_encryption_client(
            &client_opts,
            &HandshakeOptions {
                server_name: Some("two".into()),
            },
        )
        .unwrap();

    let delivered = Arc::new(Mutex::new(None));
    {
        let flag = delivered.clone();
        client
            .initiate_handshake(move |r| {
                assert!(r.error.is_none());
                *flag.lock().unwrap() = r.peer_certificate;
            })
            .unwrap();
    }
    server.initiate_handshake(|_| {}).unwrap();

    pump(&mut client, &mut server, 4096);

    let peer = delivered.lock().unwrap().clone().expect("peer certificate delivered");
    assert_eq!(peer, two_cert);
}

#[test]
fn incompatible_protocol_ranges_fail_both_sides() {
    let (ca_cert, ca_key) = issue_ca();
    let (server_cert, server_key) = issue_leaf("localhost", &ca_cert, &ca_key);
    let driver = Driver::new();

    let mut server_opts = ServerOptions::default();
    server_opts.authentication = AuthenticationMode::None;
    server_opts.identity = Some(Arc::new(Identity::new(server_cert, server_key)));
    server_opts.min_version = ProtocolVersion::Tls12;
    server_opts.max_version = ProtocolVersion::Tls12;

    let mut client_opts = ClientOptions::default();
    client_opts.authentication = AuthenticationMode::VerifyPeer;
    client_opts.authorities = Arc::new(vec![ca_cert]);
    client_opts.min_version = ProtocolVersion::Tls13;
    client_opts.max_version = ProtocolVersion::Tls13;

    let mut server = driver
        .create_encryption_server(Arc::new(server_opts))
        .unwrap();
    let mut client = driver
        .create_encryption_client(
            &client_opts,
            &HandshakeOptions {
                server_name: Some("localhost".into()),
            },
        )
        .unwrap();

    let client_error = Arc::new(Mutex::new(None));
    let server_error = Arc::new(Mutex::new(None));
    {
        let flag = client_error.clone();
        client
            .initiate_handshake(move |r| *flag.lock().unwrap() = Some(r.error))
            .unwrap();
    }
    {
        let flag = server_error.clone();
        server
            .initiate_handshake(move |r| *flag.lock().unwrap() = Some(r.error))
            .unwrap();
    }

    pump(&mut client, &mut server, 4096);

    assert_eq!(client.state(), SessionState::Failed);
    assert_eq!(server.state(), SessionState::Failed);
    assert_eq!(client_error.lock().unwrap().unwrap(), Some(ErrorKind::Invalid));
    assert_eq!(server_error.lock().unwrap().unwrap(), Some(ErrorKind::Invalid));
    assert!(!client.has_incoming_plain());
    assert!(!server.has_incoming_plain());
}
