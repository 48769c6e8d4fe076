//! PKCS#12 (RFC 7292) encode/decode: a private key (as a
//! `pkcs8ShroudedKeyBag`, PBES2-encrypted), an end-entity certificate,
//! and a CA chain (as plain `certBag`s), wrapped in one unencrypted
//! `AuthenticatedSafe` `data` content and protected by an outer
//! HMAC-SHA1 `MacData`.
//!
//! Byte-identical re-encoding is not guaranteed for this format (fresh
//! salt and MAC on every encode); only semantic round-trip is.

use der::asn1::{Any, ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use cms::content_info::ContentInfo;

use crate::certificate::Certificate;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::resource::options::{ContainerFormat, ResourceOptions};
use crate::resource::Resource;
use crate::secret::Secret;

const OID_DATA: &str = "1.2.840.113549.1.7.1";
const OID_PKCS8_SHROUDED_KEY_BAG: &str = "1.2.840.113549.1.12.10.1.2";
const OID_CERT_BAG: &str = "1.2.840.113549.1.12.10.1.3";
const OID_X509_CERTIFICATE: &str = "1.2.840.113549.1.9.22.1";
const OID_SHA1: &str = "1.3.14.3.2.26";

const MAC_ITERATIONS: u32 = 2048;
const MAC_SALT_LEN: usize = 8;

#[derive(Sequence)]
struct LocalAlgorithmIdentifier {
    algorithm: ObjectIdentifier,
    #[asn1(optional = "true")]
    parameters: Option<Any>,
}

#[derive(Sequence)]
struct DigestInfo {
    digest_algorithm: LocalAlgorithmIdentifier,
    digest: OctetString,
}

#[derive(Sequence)]
struct MacData {
    mac: DigestInfo,
    mac_salt: OctetString,
    iterations: u32,
}

#[derive(Sequence)]
struct SafeBag {
    bag_id: ObjectIdentifier,
    #[asn1(context_specific = "0", explicit = "true", tag_mode = "EXPLICIT")]
    bag_value: Any,
}

#[derive(Sequence)]
struct CertBagValue {
    cert_id: ObjectIdentifier,
    #[asn1(context_specific = "0", explicit = "true", tag_mode = "EXPLICIT")]
    cert_value: OctetString,
}

#[derive(Sequence)]
struct Pfx {
    version: u8,
    auth_safe: ContentInfo,
    #[asn1(optional = "true")]
    mac_data: Option<MacData>,
}

/// Encode `resource` as a PKCS#12 container. Requires a passphrase:
/// the private key (if any) is PBES2-encrypted under it, and the
/// outer integrity MAC is keyed from it.
pub fn encode(resource: &Resource, options: &ResourceOptions) -> Result<Vec<u8>> {
    let passphrase = options
        .resolve_passphrase()
        .ok_or_else(|| Error::invalid("PKCS#12 encoding requires a passphrase"))?;

    let mut bags = Vec::new();
    if let Some(key) = &resource.key {
        bags.push(key_safe_bag(key, &passphrase)?);
    }
    if let Some(cert) = &resource.end_entity {
        bags.push(cert_safe_bag(cert)?);
    }
    for ca in &resource.chain {
        bags.push(cert_safe_bag(ca)?);
    }

    let safe_contents_der = bags
        .to_der()
        .map_err(|e| Error::invalid(format!("encoding PKCS#12 SafeContents failed: {e}")))?;

    // AuthenticatedSafe ::= SEQUENCE OF ContentInfo; one `data` entry
    // wrapping the SafeContents we just built.
    let data_content_info = wrap_as_data_content_info(&safe_contents_der)?;
    let auth_safe_der = vec![data_content_info]
        .to_der()
        .map_err(|e| Error::invalid(format!("encoding PKCS#12 AuthenticatedSafe failed: {e}")))?;

    let mac_data = compute_mac_data(&auth_safe_der, &passphrase)?;

    let pfx = Pfx {
        version: 3,
        auth_safe: wrap_as_data_content_info(&auth_safe_der)?,
        mac_data: Some(mac_data),
    };
    pfx.to_der()
        .map_err(|e| Error::invalid(format!("encoding PKCS#12 PFX failed: {e}")))
}

/// Decode a PKCS#12 container, verifying the outer MAC (when present)
/// and decrypting the shrouded key bag.
pub fn decode(der_bytes: &[u8], options: &ResourceOptions) -> Result<Resource> {
    let passphrase = options
        .resolve_passphrase()
        .ok_or_else(|| Error::unauthorized("PKCS#12 decoding requires a passphrase"))?;

    let pfx = Pfx::from_der(der_bytes)
        .map_err(|e| Error::invalid(format!("malformed PKCS#12 container: {e}")))?;

    let auth_safe_der = unwrap_data_content_info(&pfx.auth_safe)?;

    if let Some(mac_data) = &pfx.mac_data {
        verify_mac_data(&auth_safe_der, mac_data, &passphrase)?;
    }

    let auth_safe: Vec<ContentInfo> = Vec::<ContentInfo>::from_der(&auth_safe_der)
        .map_err(|e| Error::invalid(format!("malformed PKCS#12 AuthenticatedSafe: {e}")))?;

    let mut resource = Resource::new();
    for content_info in &auth_safe {
        if content_info.content_type != ObjectIdentifier::new_unwrap(OID_DATA) {
            continue; // encryptedData SafeContents are not produced by this codec
        }
        let safe_contents_der = unwrap_data_content_info(content_info)?;
        let bags: Vec<SafeBag> = Vec::<SafeBag>::from_der(&safe_contents_der)
            .map_err(|e| Error::invalid(format!("malformed PKCS#12 SafeContents: {e}")))?;

        for bag in bags {
            if bag.bag_id == ObjectIdentifier::new_unwrap(OID_PKCS8_SHROUDED_KEY_BAG) {
                let encrypted_der = bag
                    .bag_value
                    .to_der()
                    .map_err(|e| Error::invalid(format!("malformed shrouded key bag: {e}")))?;
                let key_options = ResourceOptions::encrypted_with(ContainerFormat::Pkcs8, passphrase.clone());
                resource.key = Some(Key::decode(&encrypted_der, &key_options)?);
            } else if bag.bag_id == ObjectIdentifier::new_unwrap(OID_CERT_BAG) {
                let cert_bag_der = bag
                    .bag_value
                    .to_der()
                    .map_err(|e| Error::invalid(format!("malformed cert bag: {e}")))?;
                let cert_bag = CertBagValue::from_der(&cert_bag_der)
                    .map_err(|e| Error::invalid(format!("malformed CertBag: {e}")))?;
                if cert_bag.cert_id != ObjectIdentifier::new_unwrap(OID_X509_CERTIFICATE) {
                    continue;
                }
                let cert = Certificate::from_der(cert_bag.cert_value.as_bytes())?;
                if resource.end_entity.is_none() {
                    resource.end_entity = Some(cert);
                } else {
                    resource.chain.push(cert);
                }
            }
        }
    }

    Ok(resource)
}

fn key_safe_bag(key: &Key, passphrase: &Secret) -> Result<SafeBag> {
    let encrypted_options = ResourceOptions::encrypted_with(ContainerFormat::Pkcs8, passphrase.clone());
    let encrypted_der = key.encode(&encrypted_options)?;
    let bag_value = Any::from_der(&encrypted_der)
        .map_err(|e| Error::invalid(format!("wrapping shrouded key bag failed: {e}")))?;
    Ok(SafeBag {
        bag_id: ObjectIdentifier::new_unwrap(OID_PKCS8_SHROUDED_KEY_BAG),
        bag_value,
    })
}

fn cert_safe_bag(cert: &Certificate) -> Result<SafeBag> {
    let cert_value = OctetString::new(cert.der().to_vec())
        .map_err(|e| Error::invalid(format!("encoding cert bag value failed: {e}")))?;
    let cert_bag_value = CertBagValue {
        cert_id: ObjectIdentifier::new_unwrap(OID_X509_CERTIFICATE),
        cert_value,
    };
    let cert_bag_der = cert_bag_value
        .to_der()
        .map_err(|e| Error::invalid(format!("encoding CertBag failed: {e}")))?;
    let bag_value = Any::from_der(&cert_bag_der)
        .map_err(|e| Error::invalid(format!("wrapping cert bag failed: {e}")))?;
    Ok(SafeBag {
        bag_id: ObjectIdentifier::new_unwrap(OID_CERT_BAG),
        bag_value,
    })
}

fn wrap_as_data_content_info(payload: &[u8]) -> Result<ContentInfo> {
    let octets = OctetString::new(payload.to_vec())
        .map_err(|e| Error::invalid(format!("wrapping PKCS#12 octet string failed: {e}")))?;
    let octets_der = octets
        .to_der()
        .map_err(|e| Error::invalid(format!("encoding PKCS#12 octet string failed: {e}")))?;
    let content = Any::from_der(&octets_der)
        .map_err(|e| Error::invalid(format!("wrapping PKCS#12 content failed: {e}")))?;
    Ok(ContentInfo {
        content_type: ObjectIdentifier::new_unwrap(OID_DATA),
        content,
    })
}

fn unwrap_data_content_info(content_info: &ContentInfo) -> Result<Vec<u8>> {
    let octets: OctetString = content_info
        .content
        .decode_as()
        .map_err(|e| Error::invalid(format!("malformed PKCS#12 content: {e}")))?;
    Ok(octets.as_bytes().to_vec())
}

fn compute_mac_data(auth_safe_der: &[u8], passphrase: &Secret) -> Result<MacData> {
    let mut salt = [0u8; MAC_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mac_key = pkcs12_kdf(passphrase, &salt, MAC_ITERATIONS, 3, 20)?;

    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&mac_key)
        .map_err(|e| Error::crypto(format!("building PKCS#12 MAC failed: {e}")))?;
    mac.update(auth_safe_der);
    let digest = mac.finalize().into_bytes().to_vec();

    let salt_octets = OctetString::new(salt.to_vec())
        .map_err(|e| Error::invalid(format!("encoding PKCS#12 MAC salt failed: {e}")))?;
    let digest_octets = OctetString::new(digest)
        .map_err(|e| Error::invalid(format!("encoding PKCS#12 MAC digest failed: {e}")))?;

    Ok(MacData {
        mac: DigestInfo {
            digest_algorithm: LocalAlgorithmIdentifier {
                algorithm: ObjectIdentifier::new_unwrap(OID_SHA1),
                parameters: None,
            },
            digest: digest_octets,
        },
        mac_salt: salt_octets,
        iterations: MAC_ITERATIONS,
    })
}

fn verify_mac_data(auth_safe_der: &[u8], mac_data: &MacData, passphrase: &Secret) -> Result<()> {
    let mac_key = pkcs12_kdf(
        passphrase,
        mac_data.mac_salt.as_bytes(),
        mac_data.iterations,
        3,
        20,
    )?;
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&mac_key)
        .map_err(|e| Error::crypto(format!("building PKCS#12 MAC failed: {e}")))?;
    mac.update(auth_safe_der);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(mac_data.mac.digest.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::unauthorized("PKCS#12 integrity MAC did not verify; wrong passphrase"))
    }
}

/// RFC 7292 Appendix B.2 key-derivation function over SHA-1.
///
/// `id` selects the diversifier byte: 1 = key material, 2 = IV
/// material, 3 = MAC material. This codec only ever needs `id == 3`
/// (the key bag uses PBES2/PBKDF2 via the `pkcs8` crate, not this
/// PKCS#12-native scheme).
fn pkcs12_kdf(passphrase: &Secret, salt: &[u8], iterations: u32, id: u8, n: usize) -> Result<Vec<u8>> {
    const U: usize = 20; // SHA-1 output size
    const V: usize = 64; // SHA-1 block size

    let password_str = passphrase
        .as_str()
        .map_err(|_| Error::invalid("PKCS#12 passphrase must be valid UTF-8"))?;
    let mut password_utf16be = Vec::with_capacity(password_str.len() * 2 + 2);
    for unit in password_str.encode_utf16() {
        password_utf16be.extend_from_slice(&unit.to_be_bytes());
    }
    password_utf16be.extend_from_slice(&[0, 0]);

    let diversifier = vec![id; V];
    let salt_block = fill_to_multiple(salt, V);
    let password_block = fill_to_multiple(&password_utf16be, V);

    let mut i_block = salt_block;
    i_block.extend_from_slice(&password_block);

    let mut result = Vec::with_capacity(n + U);
    while result.len() < n {
        let mut buf = diversifier.clone();
        buf.extend_from_slice(&i_block);
        let mut a = Sha1::digest(&buf).to_vec();
        for _ in 1..iterations {
            a = Sha1::digest(&a).to_vec();
        }
        result.extend_from_slice(&a);

        let mut b = Vec::with_capacity(V);
        while b.len() < V {
            b.extend_from_slice(&a);
        }
        b.truncate(V);

        let blocks = i_block.len() / V;
        for j in 0..blocks {
            let block = &mut i_block[j * V..(j + 1) * V];
            add_with_carry(block, &b);
        }
    }
    result.truncate(n);
    Ok(result)
}

fn fill_to_multiple(buf: &[u8], block: usize) -> Vec<u8> {
    if buf.is_empty() {
        return vec![0u8; block];
    }
    let len = ((buf.len() + block - 1) / block) * block;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let take = (len - out.len()).min(buf.len());
        out.extend_from_slice(&buf[..take]);
    }
    out
}

fn add_with_carry(block: &mut [u8], add: &[u8]) {
    let mut carry: u16 = 1;
    for idx in (0..block.len()).rev() {
        let sum = block[idx] as u16 + add[idx] as u16 + carry;
        block[idx] = (sum & 0xff) as u8;
        carry = sum >> 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_and_right_length() {
        let pass = Secret::from_str("hunter2");
        let salt = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let a = pkcs12_kdf(&pass, &salt, 2048, 3, 20).unwrap();
        let b = pkcs12_kdf(&pass, &salt, 2048, 3, 20).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn kdf_differs_by_diversifier() {
        let pass = Secret::from_str("hunter2");
        let salt = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mac_key = pkcs12_kdf(&pass, &salt, 2048, 3, 20).unwrap();
        let key_key = pkcs12_kdf(&pass, &salt, 2048, 1, 20).unwrap();
        assert_ne!(mac_key, key_key);
    }
}
