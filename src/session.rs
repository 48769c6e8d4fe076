//! The non-blocking TLS session state machine.
//!
//! A [`Session`] drives a `rustls` connection purely through four FIFO
//! byte queues — it never touches a socket. The caller is responsible
//! for moving bytes between the queues and whatever transport it is
//! using:
//!
//! ```text
//! pop_outgoing_cipher  -> transport.send
//! transport.recv       -> push_incoming_cipher
//! pop_incoming_plain   <- (after push_incoming_cipher)
//! push_outgoing_plain  -> (turns into outgoing cipher bytes)
//! ```
//!
//! Every push/pop operation drives the underlying connection as far as
//! it can go without blocking; operations that cannot currently make
//! progress (e.g. popping plaintext before the handshake has finished)
//! are no-ops rather than errors.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, ServerConfig, ServerConnection, SignatureScheme};
use tracing::{debug, trace, warn};

use crate::certificate::Certificate;
use crate::error::{Error, ErrorKind, Result};
use crate::options::{AuthenticationMode, ClientOptions, HandshakeOptions, Identity, ProtocolVersion, ServerOptions};
use crate::resource::{ContainerFormat, ResourceOptions};
use crate::secret::Validation;
use crate::sni::{self, SniCertResolver};

/// Which side of the handshake a [`Session`] plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// The session's position in its lifecycle.
///
/// `Idle -> Handshaking -> Established -> ShuttingDown -> ShutDown`,
/// with `Failed` reachable from `Handshaking` or `Established` and
/// terminal like `ShutDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Established,
    ShuttingDown,
    ShutDown,
    Failed,
}

/// Delivered once to the handshake callback passed to
/// [`Session::initiate_handshake`], whether the handshake succeeded or
/// failed.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// `None` on success; the failure's externally observable kind
    /// otherwise.
    pub error: Option<ErrorKind>,
    /// The peer's end-entity certificate, when one was presented.
    pub peer_certificate: Option<Certificate>,
    /// Human-readable detail, mainly useful in logs and test failures.
    pub detail: Option<String>,
}

impl HandshakeResult {
    fn ok(peer_certificate: Option<Certificate>) -> Self {
        Self {
            error: None,
            peer_certificate,
            detail: None,
        }
    }

    fn failed(error: &Error) -> Self {
        Self {
            error: Some(error.kind()),
            peer_certificate: None,
            detail: Some(error.to_string()),
        }
    }
}

type HandshakeCallback = Box<dyn FnOnce(HandshakeResult) + Send>;

enum Conn {
    Client(Box<ClientConnection>),
    Server(Box<ServerConnection>),
}

macro_rules! conn_dispatch {
    ($self:expr, |$c:ident| $body:expr) => {
        match &mut $self.conn {
            Conn::Client($c) => $body,
            Conn::Server($c) => $body,
        }
    };
}

/// A single buffer-driven TLS session: either a client or a server
/// connection, fed and drained through its four queues.
pub struct Session {
    role: SessionRole,
    state: SessionState,
    conn: Conn,
    incoming_cipher: VecDeque<u8>,
    outgoing_cipher: VecDeque<u8>,
    incoming_plain: VecDeque<u8>,
    outgoing_plain: VecDeque<u8>,
    validation: Option<Validation<Certificate>>,
    on_handshake: Option<HandshakeCallback>,
    /// Set once the peer's close_notify has been observed (a `reader()`
    /// read of `Ok(0)`), as distinct from "no plaintext yet"
    /// (`WouldBlock`). Gates the `ShuttingDown -> ShutDown` transition.
    peer_closed: bool,
    /// Set once [`Session::notify_transport_closed`] has been called, so
    /// repeated calls are cheap no-ops.
    transport_closed: bool,
}

impl Session {
    /// Build a client-side session. The handshake does not begin until
    /// [`Session::initiate_handshake`] is called.
    pub fn new_client(options: &ClientOptions, handshake: &HandshakeOptions) -> Result<Session> {
        crate::driver::ensure_crypto_provider_installed();
        let config = build_client_config(options)?;
        let server_name_str = handshake
            .server_name
            .clone()
            .ok_or_else(|| Error::invalid("client sessions require a server name"))?;
        let server_name = ServerName::try_from(server_name_str)
            .map_err(|e| Error::invalid(format!("invalid server name: {e}")))?;
        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| Error::invalid(format!("building client connection failed: {e}")))?;

        Ok(Session {
            role: SessionRole::Client,
            state: SessionState::Idle,
            conn: Conn::Client(Box::new(conn)),
            incoming_cipher: VecDeque::new(),
            outgoing_cipher: VecDeque::new(),
            incoming_plain: VecDeque::new(),
            outgoing_plain: VecDeque::new(),
            validation: options.validation.clone(),
            on_handshake: None,
            peer_closed: false,
            transport_closed: false,
        })
    }

    /// Build a server-side session. `top_level` supplies the default
    /// identity and authentication policy; the actual identity
    /// presented is re-resolved per-handshake from the ClientHello's
    /// SNI host name via [`crate::sni::dispatch`].
    pub fn new_server(top_level: Arc<ServerOptions>) -> Result<Session> {
        crate::driver::ensure_crypto_provider_installed();
        let config = build_server_config(&top_level)?;
        let conn = ServerConnection::new(Arc::new(config))
            .map_err(|e| Error::invalid(format!("building server connection failed: {e}")))?;

        Ok(Session {
            role: SessionRole::Server,
            state: SessionState::Idle,
            conn: Conn::Server(Box::new(conn)),
            incoming_cipher: VecDeque::new(),
            outgoing_cipher: VecDeque::new(),
            incoming_plain: VecDeque::new(),
            outgoing_plain: VecDeque::new(),
            validation: top_level.validation.clone(),
            on_handshake: None,
            peer_closed: false,
            transport_closed: false,
        })
    }

    /// The role this session was built with.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// The session's current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begin the handshake, invoking `callback` exactly once when it
    /// finishes, successfully or not. Calling this more than once, or
    /// after the handshake has already finished, is an `invalid` error.
    pub fn initiate_handshake(&mut self, callback: impl FnOnce(HandshakeResult) + Send + 'static) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::invalid("handshake already initiated for this session"));
        }
        self.state = SessionState::Handshaking;
        self.on_handshake = Some(Box::new(callback));
        self.drive()
    }

    /// Queue ciphertext bytes received from the transport. Drives the
    /// connection as far as it can go: this may complete the
    /// handshake, yield plaintext, or queue more outgoing ciphertext.
    pub fn push_incoming_cipher(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == SessionState::Failed {
            return Err(Error::invalid("session has failed and is not recoverable"));
        }
        self.incoming_cipher.extend(bytes.iter().copied());
        self.drive()
    }

    /// Remove up to `max` bytes of ciphertext queued for the
    /// transport. Returns an empty vector if there is nothing to send.
    pub fn pop_outgoing_cipher(&mut self, max: usize) -> Vec<u8> {
        drain_front(&mut self.outgoing_cipher, max)
    }

    /// Queue plaintext to be encrypted and sent. Accepted during
    /// `Handshaking` (held until the record layer is ready to encrypt
    /// it) and `Established`; a no-op in any other non-terminal state;
    /// `invalid` once the session has `Failed`.
    pub fn push_outgoing_plain(&mut self, bytes: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Failed => {
                Err(Error::invalid("session has failed and is not recoverable"))
            }
            SessionState::Handshaking | SessionState::Established => {
                self.outgoing_plain.extend(bytes.iter().copied());
                self.drive()
            }
            _ => Ok(()),
        }
    }

    /// Remove up to `max` bytes of plaintext received from the peer.
    pub fn pop_incoming_plain(&mut self, max: usize) -> Vec<u8> {
        drain_front(&mut self.incoming_plain, max)
    }

    /// True once ciphertext is queued and ready for the transport.
    pub fn has_outgoing_cipher(&self) -> bool {
        !self.outgoing_cipher.is_empty()
    }

    /// True once plaintext has been received and not yet popped.
    pub fn has_incoming_plain(&self) -> bool {
        !self.incoming_plain.is_empty()
    }

    /// True once the handshake has finished, successfully or not.
    pub fn is_handshake_finished(&self) -> bool {
        matches!(
            self.state,
            SessionState::Established | SessionState::ShuttingDown | SessionState::ShutDown | SessionState::Failed
        )
    }

    /// True once a clean shutdown has fully drained.
    pub fn is_shutdown_finished(&self) -> bool {
        self.state == SessionState::ShutDown
    }

    /// Begin a clean shutdown: queues a close_notify alert as outgoing
    /// ciphertext. A no-op outside `Established`; `invalid` once the
    /// session has `Failed`.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == SessionState::Failed {
            return Err(Error::invalid("session has failed and is not recoverable"));
        }
        if self.state != SessionState::Established {
            return Ok(());
        }
        conn_dispatch!(self, |c| c.send_close_notify());
        self.state = SessionState::ShuttingDown;
        self.drive()
    }

    /// Inform the session that the underlying transport is gone: no
    /// further bytes will ever arrive via `push_incoming_cipher`.
    ///
    /// There is no way to infer this from the queues alone — an empty
    /// `incoming_cipher` means only "nothing has arrived yet", not "the
    /// peer is gone" — so the caller must say so explicitly, the same
    /// way a canonical `rustls` adapter treats a zero-length `read_tls`
    /// from its socket as end-of-stream. A no-op if the session is
    /// already terminal or the peer's close_notify was already
    /// observed (that is a clean shutdown, not an error); otherwise
    /// fails the session with `Error::Eof`, per the "unclean peer
    /// shutdown" case in the record-layer contract.
    pub fn notify_transport_closed(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Failed | SessionState::ShutDown) {
            return Ok(());
        }
        if self.transport_closed || self.peer_closed {
            return Ok(());
        }
        self.transport_closed = true;

        conn_dispatch!(self, |c| c.read_tls(&mut io::empty())).map_err(Error::from)?;
        if let Err(e) = conn_dispatch!(self, |c| c.process_new_packets()) {
            let err = classify_rustls_error(e);
            self.fail(&err);
            return Err(err);
        }
        self.drive()
    }

    /// Drive the underlying connection: consume queued incoming
    /// ciphertext, process it, move any resulting plaintext into
    /// `incoming_plain`, encrypt any queued outgoing plaintext, and
    /// move resulting ciphertext into `outgoing_cipher`.
    fn drive(&mut self) -> Result<()> {
        loop {
            let mut progressed = false;

            // Snapshot taken before anything in this iteration can
            // change handshake status, so `advance_state` can compare
            // it against the post-iteration status to detect the
            // Handshaking -> Established edge.
            let was_handshaking = conn_dispatch!(self, |c| c.is_handshaking());

            if !self.incoming_cipher.is_empty() {
                let mut reader = QueueReader(&mut self.incoming_cipher);
                let read = conn_dispatch!(self, |c| c.read_tls(&mut reader))
                    .map_err(Error::from)?;
                if read > 0 {
                    progressed = true;
                    if let Err(e) = conn_dispatch!(self, |c| c.process_new_packets()) {
                        let err = classify_rustls_error(e);
                        self.fail(&err);
                        return Err(err);
                    }
                }
            }

            let is_handshaking_now = conn_dispatch!(self, |c| c.is_handshaking());

            if !is_handshaking_now && !self.outgoing_plain.is_empty() {
                let mut bytes = std::mem::take(&mut self.outgoing_plain);
                let mut writer = conn_dispatch!(self, |c| c.writer());
                if let Err(e) = writer.write_all(bytes.make_contiguous()) {
                    return Err(Error::from(e));
                }
                progressed = true;
            }

            let mut plaintext = [0u8; 4096];
            loop {
                let mut reader = conn_dispatch!(self, |c| c.reader());
                match reader.read(&mut plaintext) {
                    Ok(0) => {
                        // Distinct from `WouldBlock`: `rustls` only
                        // returns `Ok(0)` once the peer's close_notify
                        // has been processed.
                        self.peer_closed = true;
                        break;
                    }
                    Ok(n) => {
                        self.incoming_plain.extend(plaintext[..n].iter().copied());
                        progressed = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        // Only reachable after `notify_transport_closed`
                        // fed the connection a zero-length `read_tls`;
                        // the peer's transport closed without a
                        // close_notify. Per the record-layer contract
                        // this is `eof`, not `invalid`.
                        self.fail(&Error::Eof);
                        return Err(Error::Eof);
                    }
                    Err(e) => return Err(Error::from(e)),
                }
            }

            while conn_dispatch!(self, |c| c.wants_write()) {
                let mut writer = QueueWriter(&mut self.outgoing_cipher);
                let written = conn_dispatch!(self, |c| c.write_tls(&mut writer))
                    .map_err(Error::from)?;
                if written == 0 {
                    break;
                }
                progressed = true;
            }

            self.advance_state(was_handshaking)?;

            if !progressed {
                break;
            }
        }
        Ok(())
    }

    fn advance_state(&mut self, was_handshaking: bool) -> Result<()> {
        let is_handshaking = conn_dispatch!(self, |c| c.is_handshaking());

        if self.state == SessionState::Handshaking && was_handshaking && !is_handshaking {
            let peer_certificate = self.peer_certificate();
            self.state = SessionState::Established;
            if let Some(cb) = self.on_handshake.take() {
                cb(HandshakeResult::ok(peer_certificate));
            }
            debug!(role = ?self.role, "handshake established");
        }

        if self.state == SessionState::ShuttingDown
            && !conn_dispatch!(self, |c| c.wants_write())
            && self.incoming_plain.is_empty()
            && self.peer_closed
        {
            self.state = SessionState::ShutDown;
            trace!(role = ?self.role, "shutdown complete");
        }

        Ok(())
    }

    fn peer_certificate(&self) -> Option<Certificate> {
        let chain = conn_dispatch!(self, |c| c.peer_certificates())?;
        let end_entity = chain.first()?;
        Certificate::from_der(end_entity.as_ref()).ok()
    }

    fn fail(&mut self, error: &Error) {
        warn!(role = ?self.role, error = %error, "session failed");
        self.state = SessionState::Failed;
        if let Some(cb) = self.on_handshake.take() {
            cb(HandshakeResult::failed(error));
        }
    }
}

fn drain_front(queue: &mut VecDeque<u8>, max: usize) -> Vec<u8> {
    let n = max.min(queue.len());
    queue.drain(..n).collect()
}

struct QueueReader<'a>(&'a mut VecDeque<u8>);

impl Read for QueueReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.0.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.0.pop_front().expect("checked length above");
        }
        Ok(n)
    }
}

struct QueueWriter<'a>(&'a mut VecDeque<u8>);

impl Write for QueueWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn classify_rustls_error(e: rustls::Error) -> Error {
    match &e {
        rustls::Error::InvalidCertificate(_) => Error::unauthorized(e),
        rustls::Error::General(msg) if msg.contains("rejected by validation policy") => {
            Error::unauthorized(msg.clone())
        }
        rustls::Error::AlertReceived(_) => Error::invalid(e),
        _ => Error::from(e),
    }
}

fn protocol_versions(
    min: ProtocolVersion,
    max: ProtocolVersion,
) -> Result<Vec<&'static rustls::SupportedProtocolVersion>> {
    if min > max {
        return Err(Error::invalid("min_version must not exceed max_version"));
    }
    let mut versions = Vec::new();
    if min <= ProtocolVersion::Tls12 && max >= ProtocolVersion::Tls12 {
        versions.push(ProtocolVersion::Tls12.to_rustls());
    }
    if min <= ProtocolVersion::Tls13 && max >= ProtocolVersion::Tls13 {
        versions.push(ProtocolVersion::Tls13.to_rustls());
    }
    Ok(versions)
}

fn root_store(authorities: &[Certificate]) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in authorities {
        store
            .add(CertificateDer::from(cert.der().to_vec()))
            .map_err(|e| Error::invalid(format!("adding trust anchor failed: {e}")))?;
    }
    Ok(store)
}

fn identity_to_rustls(identity: &Identity) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut chain = vec![CertificateDer::from(identity.certificate.der().to_vec())];
    for ca in &identity.chain {
        chain.push(CertificateDer::from(ca.der().to_vec()));
    }
    let key_der = identity
        .private_key
        .encode(&ResourceOptions::format(ContainerFormat::Asn1))?;
    let key = PrivateKeyDer::try_from(key_der)
        .map_err(|e| Error::invalid(format!("private key is not usable by the TLS engine: {e}")))?;
    Ok((chain, key))
}

fn build_client_config(options: &ClientOptions) -> Result<ClientConfig> {
    let versions = protocol_versions(options.min_version, options.max_version)?;
    let builder = ClientConfig::builder_with_protocol_versions(&versions);

    let verifier: Arc<dyn ServerCertVerifier> = match options.authentication {
        AuthenticationMode::VerifyPeer => {
            let store = root_store(&options.authorities)?;
            let inner = WebPkiServerVerifier::builder(Arc::new(store))
                .build()
                .map_err(|e| Error::invalid(format!("building server certificate verifier failed: {e}")))?;
            Arc::new(ValidatingServerVerifier {
                inner,
                validation: options.validation.clone(),
            })
        }
        AuthenticationMode::None => Arc::new(AcceptAllServerCerts),
    };
    let builder = builder.dangerous().with_custom_certificate_verifier(verifier);

    let config = match &options.identity {
        Some(identity) => {
            let (chain, key) = identity_to_rustls(identity)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Error::invalid(format!("configuring client identity failed: {e}")))?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(config)
}

fn build_server_config(top_level: &Arc<ServerOptions>) -> Result<ServerConfig> {
    let versions = protocol_versions(top_level.min_version, top_level.max_version)?;
    let builder = ServerConfig::builder_with_protocol_versions(&versions);

    let verifier: Arc<dyn ClientCertVerifier> = match top_level.authentication {
        AuthenticationMode::VerifyPeer => {
            let store = root_store(&top_level.authorities)?;
            let inner = WebPkiClientVerifier::builder(Arc::new(store))
                .build()
                .map_err(|e| Error::invalid(format!("building client certificate verifier failed: {e}")))?;
            Arc::new(ValidatingClientVerifier {
                inner,
                validation: top_level.validation.clone(),
            })
        }
        AuthenticationMode::None => WebPkiClientVerifier::no_client_auth(),
    };

    if top_level.identity.is_none() && top_level.sni_overrides.is_empty() {
        return Err(sni::missing_identity_error());
    }

    let config = builder
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(Arc::new(SniCertResolver {
            top_level: top_level.clone(),
        }));
    Ok(config)
}

/// Accepts any peer certificate: backs [`AuthenticationMode::None`] on
/// the client side, where this crate's own policy (not TLS's) decides
/// whether identity matters.
#[derive(Debug)]
struct AcceptAllServerCerts;

impl ServerCertVerifier for AcceptAllServerCerts {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Runs the library's chain verification first, then this crate's
/// [`Validation`] callback against the semantically-parsed end-entity
/// certificate.
struct ValidatingServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    validation: Option<Validation<Certificate>>,
}

impl ServerCertVerifier for ValidatingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verified = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        apply_validation(&self.validation, end_entity)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

struct ValidatingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    validation: Option<Validation<Certificate>>,
}

impl ClientCertVerifier for ValidatingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;
        apply_validation(&self.validation, end_entity)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn apply_validation(
    validation: &Option<Validation<Certificate>>,
    end_entity: &CertificateDer<'_>,
) -> std::result::Result<(), rustls::Error> {
    let Some(validation) = validation else {
        return Ok(());
    };
    let cert = Certificate::from_der(end_entity.as_ref())
        .map_err(|e| rustls::Error::General(format!("re-parsing verified certificate failed: {e}")))?;
    if validation.check(&cert) {
        Ok(())
    } else {
        Err(rustls::Error::General(format!(
            "rejected by validation policy: {}",
            validation.description()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateOptions, DistinguishedName};
    use crate::key::{Key, KeyAlgorithm, KeyGenOptions};

    fn issue(cn: &str, ca_cert: &Certificate, ca_key: &Key) -> (Certificate, Key) {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new().with_common_name(cn);
        let mut options = CertificateOptions::default();
        options.san = vec![crate::certificate::SubjectAltName::Dns(cn.to_string())];
        let cert = Certificate::generate_signed_by(subject, &key, ca_cert, ca_key, options).unwrap();
        (cert, key)
    }

    fn ca() -> (Certificate, Key) {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new().with_common_name("root.example.test");
        let mut options = CertificateOptions::default();
        options.is_ca = true;
        let cert = Certificate::generate_self_signed(subject, &key, options).unwrap();
        (cert, key)
    }

    fn pump(client: &mut Session, server: &mut Session, chunk: usize) {
        for _ in 0..64 {
            let mut moved = false;
            let out = client.pop_outgoing_cipher(chunk);
            if !out.is_empty() {
                server.push_incoming_cipher(&out).unwrap();
                moved = true;
            }
            let out = server.pop_outgoing_cipher(chunk);
            if !out.is_empty() {
                client.push_incoming_cipher(&out).unwrap();
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    #[test]
    fn mutual_handshake_establishes_with_small_and_large_buffers() {
        for chunk in [1usize, 4096] {
            let (ca_cert, ca_key) = ca();
            let (server_cert, server_key) = issue("server.example.test", &ca_cert, &ca_key);

            let mut server_opts = ServerOptions::default();
            server_opts.identity = Some(Arc::new(Identity::new(server_cert, server_key)));
            server_opts.authentication = AuthenticationMode::None;

            let mut client_opts = ClientOptions::default();
            client_opts.authentication = AuthenticationMode::VerifyPeer;
            client_opts.authorities = Arc::new(vec![ca_cert.clone()]);

            let mut server = Session::new_server(Arc::new(server_opts)).unwrap();
            let mut client = Session::new_client(
                &client_opts,
                &HandshakeOptions {
                    server_name: Some("server.example.test".into()),
                },
            )
            .unwrap();

            let client_done = Arc::new(std::sync::Mutex::new(false));
            let server_done = Arc::new(std::sync::Mutex::new(false));
            {
                let flag = client_done.clone();
                client
                    .initiate_handshake(move |result| {
                        assert!(result.error.is_none());
                        *flag.lock().unwrap() = true;
                    })
                    .unwrap();
            }
            {
                let flag = server_done.clone();
                server
                    .initiate_handshake(move |result| {
                        assert!(result.error.is_none());
                        *flag.lock().unwrap() = true;
                    })
                    .unwrap();
            }

            pump(&mut client, &mut server, chunk);

            assert_eq!(client.state(), SessionState::Established, "chunk size {chunk}");
            assert_eq!(server.state(), SessionState::Established, "chunk size {chunk}");
            assert!(*client_done.lock().unwrap());
            assert!(*server_done.lock().unwrap());

            client.push_outgoing_plain(b"hello from client").unwrap();
            pump(&mut client, &mut server, chunk);
            let received = server.pop_incoming_plain(4096);
            assert_eq!(received, b"hello from client");
        }
    }

    #[test]
    fn validation_callback_rejects_peer() {
        let (ca_cert, ca_key) = ca();
        let (server_cert, server_key) = issue("server.example.test", &ca_cert, &ca_key);

        let mut server_opts = ServerOptions::default();
        server_opts.identity = Some(Arc::new(Identity::new(server_cert, server_key)));
        server_opts.authentication = AuthenticationMode::None;

        let mut client_opts = ClientOptions::default();
        client_opts.authentication = AuthenticationMode::VerifyPeer;
        client_opts.authorities = Arc::new(vec![ca_cert]);
        client_opts.validation = Some(Validation::new(
            "reject everything",
            Arc::new(|_: &Certificate| false),
        ));

        let mut server = Session::new_server(Arc::new(server_opts)).unwrap();
        let mut client = Session::new_client(
            &client_opts,
            &HandshakeOptions {
                server_name: Some("server.example.test".into()),
            },
        )
        .unwrap();

        let client_result = Arc::new(std::sync::Mutex::new(None));
        {
            let flag = client_result.clone();
            client
                .initiate_handshake(move |result| {
                    *flag.lock().unwrap() = Some(result.error);
                })
                .unwrap();
        }
        server.initiate_handshake(|_| {}).unwrap();

        pump(&mut client, &mut server, 4096);

        assert_eq!(client.state(), SessionState::Failed);
        assert_eq!(client_result.lock().unwrap().unwrap(), Some(ErrorKind::Unauthorized));
    }

    fn established_pair() -> (Session, Session) {
        let (ca_cert, ca_key) = ca();
        let (server_cert, server_key) = issue("server.example.test", &ca_cert, &ca_key);

        let mut server_opts = ServerOptions::default();
        server_opts.identity = Some(Arc::new(Identity::new(server_cert, server_key)));
        server_opts.authentication = AuthenticationMode::None;

        let mut client_opts = ClientOptions::default();
        client_opts.authentication = AuthenticationMode::VerifyPeer;
        client_opts.authorities = Arc::new(vec![ca_cert]);

        let mut server = Session::new_server(Arc::new(server_opts)).unwrap();
        let mut client = Session::new_client(
            &client_opts,
            &HandshakeOptions {
                server_name: Some("server.example.test".into()),
            },
        )
        .unwrap();

        client.initiate_handshake(|_| {}).unwrap();
        server.initiate_handshake(|_| {}).unwrap();
        pump(&mut client, &mut server, 4096);
        assert_eq!(client.state(), SessionState::Established);
        assert_eq!(server.state(), SessionState::Established);
        (client, server)
    }

    #[test]
    fn shutdown_requires_peer_close_notify_before_shut_down() {
        let (mut client, mut server) = established_pair();

        client.shutdown().unwrap();
        // Only the client's close_notify has moved; the server hasn't
        // answered with its own yet, so the client must not consider
        // itself fully shut down even though it has nothing left to send.
        let out = client.pop_outgoing_cipher(4096);
        assert!(!out.is_empty());
        server.push_incoming_cipher(&out).unwrap();
        assert_eq!(client.state(), SessionState::ShuttingDown);
        assert!(!client.is_shutdown_finished());

        pump(&mut client, &mut server, 4096);

        assert!(client.is_shutdown_finished());
        assert!(server.is_shutdown_finished());
    }

    #[test]
    fn notify_transport_closed_reports_eof_without_peer_close_notify() {
        let (mut client, mut server) = established_pair();
        drop(server);

        let result = client.notify_transport_closed();
        assert!(matches!(result, Err(Error::Eof)));
        assert_eq!(client.state(), SessionState::Failed);
    }

    #[test]
    fn notify_transport_closed_is_a_no_op_after_clean_shutdown() {
        let (mut client, mut server) = established_pair();
        client.shutdown().unwrap();
        pump(&mut client, &mut server, 4096);
        assert!(client.is_shutdown_finished());
        assert!(server.is_shutdown_finished());

        client.notify_transport_closed().unwrap();
        assert_eq!(client.state(), SessionState::ShutDown);
    }
}
