//! Resource codec: bundles of {0..1 private key, 0..1 end-entity
//! certificate, 0..N CA certificates} serialized into one of five
//! container formats with optional passphrase encryption.

pub mod options;
mod pkcs12;
mod pkcs7;

pub use options::{ContainerFormat, PassphraseSource, ResourceOptions};

use crate::certificate::Certificate;
use crate::error::{Error, Result};
use crate::key::Key;

/// An in-memory bundle of at most one private key, at most one
/// end-entity certificate, and an ordered CA chain (leaf to root),
/// together with the codec logic to serialize/deserialize it.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    /// The bundle's private key, if any.
    pub key: Option<Key>,
    /// The bundle's end-entity certificate, if any.
    pub end_entity: Option<Certificate>,
    /// The bundle's CA chain, leaf to root.
    pub chain: Vec<Certificate>,
}

impl Resource {
    /// An empty resource, built up with `with_*`/`add_ca` before
    /// encoding, or populated by [`Resource::decode`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a private key.
    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach an end-entity certificate.
    pub fn with_end_entity(mut self, cert: Certificate) -> Self {
        self.end_entity = Some(cert);
        self
    }

    /// Replace the CA chain.
    pub fn with_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        self
    }

    /// Append one CA certificate to the end of the chain.
    pub fn add_ca(&mut self, cert: Certificate) {
        self.chain.push(cert);
    }

    /// Encode this bundle per `options`. Fails with `invalid` if the
    /// bundle's content violates the chosen format's capability table,
    /// or if `encrypted` is set without a resolvable passphrase.
    pub fn encode(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        let format = options
            .format
            .ok_or_else(|| Error::invalid("encode requires an explicit container format"))?;

        let has_key = self.key.is_some();
        let has_cert = self.end_entity.is_some();
        let has_chain = !self.chain.is_empty();
        validate_capability(format, has_key, has_cert, has_chain)?;

        if options.encrypted {
            if !format.supports_encryption() {
                return Err(Error::invalid(format!("{:?} does not support encryption", format)));
            }
            if options.resolve_passphrase().is_none() {
                return Err(Error::invalid("encrypted encode requires a passphrase"));
            }
        }

        match format {
            ContainerFormat::Asn1 => self.encode_asn1(options),
            ContainerFormat::Asn1Pem => self.encode_asn1_pem(options),
            ContainerFormat::Pkcs7 | ContainerFormat::Pkcs7Pem => self.encode_pkcs7(format),
            ContainerFormat::Pkcs8 | ContainerFormat::Pkcs8Pem => self.encode_pkcs8(options),
            ContainerFormat::Pkcs12 => pkcs12::encode(self, options),
        }
    }

    fn encode_asn1(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        if let Some(key) = &self.key {
            key.encode(options)
        } else if let Some(cert) = &self.end_entity {
            cert.encode(options)
        } else {
            Err(Error::invalid("nothing to encode"))
        }
    }

    fn encode_asn1_pem(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(key) = &self.key {
            let key_options = if options.encrypted {
                ResourceOptions::encrypted_with(
                    ContainerFormat::Asn1Pem,
                    options
                        .resolve_passphrase()
                        .expect("checked by caller"),
                )
            } else {
                ResourceOptions::format(ContainerFormat::Asn1Pem)
            };
            out.extend_from_slice(&key.encode(&key_options)?);
        }
        if let Some(cert) = &self.end_entity {
            out.extend_from_slice(&cert.encode(&ResourceOptions::format(ContainerFormat::Asn1Pem))?);
        }
        for ca in &self.chain {
            out.extend_from_slice(&ca.encode(&ResourceOptions::format(ContainerFormat::Asn1Pem))?);
        }
        if out.is_empty() {
            return Err(Error::invalid("nothing to encode"));
        }
        Ok(out)
    }

    fn encode_pkcs7(&self, format: ContainerFormat) -> Result<Vec<u8>> {
        let der = pkcs7::encode(self.end_entity.as_ref(), &self.chain)?;
        if format.is_pem() {
            Ok(pem::encode(&pem::Pem::new("PKCS7", der)).into_bytes())
        } else {
            Ok(der)
        }
    }

    fn encode_pkcs8(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::invalid("PKCS#8 encoding requires a private key"))?;
        key.encode(options)
    }

    /// Decode a bundle from its encoded form. If `options.format` is
    /// set, the sniffed content must match or decoding fails with
    /// `invalid`. Decoding an encrypted container without a resolvable
    /// passphrase fails with `unauthorized`.
    pub fn decode(bytes: &[u8], options: &ResourceOptions) -> Result<Resource> {
        let sniffed = sniff(bytes)?;
        if let Some(declared) = options.format {
            if !formats_compatible(declared, sniffed) {
                return Err(Error::invalid(format!(
                    "declared format {:?} does not match sniffed {:?}",
                    declared, sniffed
                )));
            }
        }
        let format = options.format.unwrap_or(sniffed);

        match format {
            ContainerFormat::Asn1 => Self::decode_asn1(bytes, options),
            ContainerFormat::Asn1Pem => Self::decode_asn1_pem(bytes, options),
            ContainerFormat::Pkcs7 | ContainerFormat::Pkcs7Pem => Self::decode_pkcs7(bytes, format),
            ContainerFormat::Pkcs8 | ContainerFormat::Pkcs8Pem => Self::decode_pkcs8(bytes, options),
            ContainerFormat::Pkcs12 => pkcs12::decode(bytes, options),
        }
    }

    fn decode_asn1(bytes: &[u8], options: &ResourceOptions) -> Result<Resource> {
        if let Ok(cert) = Certificate::from_der(bytes) {
            return Ok(Resource::new().with_end_entity(cert));
        }
        let key = Key::decode(bytes, options)?;
        Ok(Resource::new().with_key(key))
    }

    fn decode_asn1_pem(bytes: &[u8], options: &ResourceOptions) -> Result<Resource> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::invalid("asn1-pem input is not valid UTF-8"))?;
        let blocks = pem::parse_many(text).map_err(Error::from)?;
        if blocks.is_empty() {
            return Err(Error::invalid("no PEM blocks found"));
        }

        let mut resource = Resource::new();
        for block in blocks {
            let block_pem = pem::encode(&block).into_bytes();
            match block.tag() {
                "CERTIFICATE" => {
                    let cert = Certificate::decode(&block_pem, &ResourceOptions::format(ContainerFormat::Asn1Pem))?;
                    if resource.end_entity.is_none() {
                        resource.end_entity = Some(cert);
                    } else {
                        resource.chain.push(cert);
                    }
                }
                "PRIVATE KEY" | "EC PRIVATE KEY" => {
                    let key = Key::decode(&block_pem, &ResourceOptions::format(ContainerFormat::Asn1Pem))?;
                    resource.key = Some(key);
                }
                "ENCRYPTED PRIVATE KEY" => {
                    let passphrase = options
                        .resolve_passphrase()
                        .ok_or_else(|| Error::unauthorized("encrypted key block requires a passphrase"))?;
                    let key_options = ResourceOptions::encrypted_with(ContainerFormat::Asn1Pem, passphrase);
                    let key = Key::decode(&block_pem, &key_options)?;
                    resource.key = Some(key);
                }
                _ => continue,
            }
        }
        Ok(resource)
    }

    fn decode_pkcs7(bytes: &[u8], format: ContainerFormat) -> Result<Resource> {
        let der = if format.is_pem() {
            pem::parse(bytes).map_err(Error::from)?.contents().to_vec()
        } else {
            bytes.to_vec()
        };
        let (end_entity, chain) = pkcs7::decode(&der)?;
        Ok(Resource {
            key: None,
            end_entity,
            chain,
        })
    }

    fn decode_pkcs8(bytes: &[u8], options: &ResourceOptions) -> Result<Resource> {
        let key = Key::decode(bytes, options)?;
        if !key.is_private() {
            return Err(Error::invalid("PKCS#8 bundle did not contain a private key"));
        }
        Ok(Resource::new().with_key(key))
    }
}

fn validate_capability(format: ContainerFormat, has_key: bool, has_cert: bool, has_chain: bool) -> Result<()> {
    if has_key && !format.supports_private_key() {
        return Err(Error::invalid(format!("{:?} cannot carry a private key", format)));
    }
    if (has_cert || has_chain) && !format.supports_certificate() {
        return Err(Error::invalid(format!("{:?} cannot carry a certificate", format)));
    }
    if has_chain && !format.supports_chain() {
        return Err(Error::invalid(format!("{:?} cannot carry a CA chain", format)));
    }
    if has_key && has_cert && !format.supports_key_and_certificate() {
        return Err(Error::invalid(format!(
            "{:?} cannot carry a private key and a certificate together",
            format
        )));
    }
    if !has_key && !has_cert && !has_chain {
        return Err(Error::invalid("nothing to encode"));
    }
    Ok(())
}

/// Sniff the likely format family from the bytes alone: PEM framing
/// first, then DER prefixes. The specific DER/PEM pairing (e.g.
/// `Pkcs7` vs `Pkcs7Pem`) is resolved by [`formats_compatible`] against
/// any format the caller declared.
fn sniff(bytes: &[u8]) -> Result<ContainerFormat> {
    let prefix = bytes.get(0..27).unwrap_or(bytes);
    if prefix.starts_with(b"-----BEGIN") {
        let text = std::str::from_utf8(bytes).unwrap_or("");
        return Ok(if text.contains("BEGIN PKCS7") {
            ContainerFormat::Pkcs7Pem
        } else if text.contains("BEGIN ENCRYPTED PRIVATE KEY") || text.contains("BEGIN PRIVATE KEY") || text.contains("BEGIN EC PRIVATE KEY") {
            ContainerFormat::Asn1Pem
        } else {
            ContainerFormat::Asn1Pem
        });
    }
    if bytes.first() == Some(&0x30) {
        if looks_like_pkcs7(bytes) {
            return Ok(ContainerFormat::Pkcs7);
        }
        if looks_like_pkcs12(bytes) {
            return Ok(ContainerFormat::Pkcs12);
        }
        if Certificate::from_der(bytes).is_ok() {
            return Ok(ContainerFormat::Asn1);
        }
        return Ok(ContainerFormat::Pkcs8);
    }
    Err(Error::invalid("unable to determine container format"))
}

fn looks_like_pkcs7(bytes: &[u8]) -> bool {
    use cms::content_info::ContentInfo;
    use der::Decode;
    match ContentInfo::from_der(bytes) {
        Ok(info) => info.content_type.to_string() == "1.2.840.113549.1.7.2",
        Err(_) => false,
    }
}

fn looks_like_pkcs12(bytes: &[u8]) -> bool {
    use der::{Decode, Sequence};

    // A PFX's first two fields are `version INTEGER` (always 3) and
    // `authSafe ContentInfo`; matching just the version field is enough
    // to disambiguate from the other DER shapes this codec produces.
    #[derive(Sequence)]
    struct PfxVersionPrefix {
        version: u8,
        auth_safe: der::asn1::Any,
    }

    matches!(PfxVersionPrefix::from_der(bytes), Ok(prefix) if prefix.version == 3)
}

fn formats_compatible(declared: ContainerFormat, sniffed: ContainerFormat) -> bool {
    if declared == sniffed {
        return true;
    }
    // DER/PEM siblings: accept either sniff result of the same family.
    matches!(
        (declared, sniffed),
        (ContainerFormat::Pkcs8, ContainerFormat::Asn1)
            | (ContainerFormat::Pkcs8Pem, ContainerFormat::Asn1Pem)
            | (ContainerFormat::Asn1, ContainerFormat::Pkcs8)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateOptions, DistinguishedName, SubjectAltName};
    use crate::key::{Key, KeyAlgorithm, KeyGenOptions};

    fn ca() -> (Certificate, Key) {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new().with_common_name("TEST.AUTHORITY");
        let mut options = CertificateOptions::default();
        options.is_ca = true;
        options.serial = Some(1);
        let cert = Certificate::generate_self_signed(subject, &key, options).unwrap();
        (cert, key)
    }

    #[test]
    fn asn1_pem_round_trips_key_cert_and_chain() {
        let (ca_cert, ca_key) = ca();
        let user_key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new().with_common_name("TEST.USER");
        let mut opts = CertificateOptions::default();
        opts.serial = Some(3);
        opts.san = vec![SubjectAltName::Dns("localhost".into())];
        let user_cert =
            Certificate::generate_signed_by(subject, &user_key, &ca_cert, &ca_key, opts).unwrap();

        let resource = Resource::new()
            .with_key(user_key.clone())
            .with_end_entity(user_cert.clone())
            .with_chain(vec![ca_cert.clone()]);

        let encode_options = ResourceOptions::format(ContainerFormat::Asn1Pem);
        let encoded = resource.encode(&encode_options).unwrap();
        let decoded = Resource::decode(&encoded, &ResourceOptions::format(ContainerFormat::Asn1Pem)).unwrap();

        assert_eq!(decoded.key.unwrap(), user_key);
        assert_eq!(decoded.end_entity.unwrap(), user_cert);
        assert_eq!(decoded.chain, vec![ca_cert]);
    }

    #[test]
    fn der_rejects_key_and_cert_together() {
        let (ca_cert, ca_key) = ca();
        let resource = Resource::new().with_key(ca_key).with_end_entity(ca_cert);
        let result = resource.encode(&ResourceOptions::format(ContainerFormat::Asn1));
        assert!(result.is_err());
    }

    #[test]
    fn pkcs8_rejects_certificate() {
        let (ca_cert, ca_key) = ca();
        let resource = Resource::new().with_key(ca_key).with_end_entity(ca_cert);
        let result = resource.encode(&ResourceOptions::format(ContainerFormat::Pkcs8));
        assert!(result.is_err());
    }

    #[test]
    fn pkcs7_bundles_chain_without_key() {
        let (ca_cert, _ca_key) = ca();
        let resource = Resource::new().with_end_entity(ca_cert.clone());
        let encoded = resource
            .encode(&ResourceOptions::format(ContainerFormat::Pkcs7))
            .unwrap();
        let decoded = Resource::decode(&encoded, &ResourceOptions::format(ContainerFormat::Pkcs7)).unwrap();
        assert_eq!(decoded.end_entity.unwrap(), ca_cert);
        assert!(decoded.key.is_none());
    }

    #[test]
    fn pkcs12_round_trips_semantically() {
        let (ca_cert, ca_key) = ca();
        let user_key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new().with_common_name("TEST.USER");
        let mut opts = CertificateOptions::default();
        opts.serial = Some(3);
        let user_cert =
            Certificate::generate_signed_by(subject, &user_key, &ca_cert, &ca_key, opts).unwrap();

        let resource = Resource::new()
            .with_key(user_key.clone())
            .with_end_entity(user_cert.clone())
            .with_chain(vec![ca_cert.clone()]);

        let passphrase = crate::secret::Secret::from_str("correcthorsebatterystaple");
        let encode_options = ResourceOptions::encrypted_with(ContainerFormat::Pkcs12, passphrase.clone());
        let encoded = resource.encode(&encode_options).unwrap();

        let decode_options = ResourceOptions::encrypted_with(ContainerFormat::Pkcs12, passphrase);
        let decoded = Resource::decode(&encoded, &decode_options).unwrap();

        assert_eq!(decoded.key.unwrap(), user_key);
        assert_eq!(decoded.end_entity.unwrap(), user_cert);
        assert_eq!(decoded.chain, vec![ca_cert]);
    }

    #[test]
    fn pkcs12_wrong_passphrase_is_unauthorized() {
        let (ca_cert, ca_key) = ca();
        let resource = Resource::new().with_key(ca_key).with_end_entity(ca_cert);
        let encode_options = ResourceOptions::encrypted_with(
            ContainerFormat::Pkcs12,
            crate::secret::Secret::from_str("correct"),
        );
        let encoded = resource.encode(&encode_options).unwrap();

        let decode_options = ResourceOptions::encrypted_with(
            ContainerFormat::Pkcs12,
            crate::secret::Secret::from_str("wrong"),
        );
        let result = Resource::decode(&encoded, &decode_options);
        assert!(matches!(
            result,
            Err(e) if e.kind() == crate::error::ErrorKind::Unauthorized
        ));
    }
}
