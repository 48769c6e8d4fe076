//! X.509 v3 certificate abstraction: generation (self-signed and
//! issuer-signed), encoding/decoding, and RFC 5280 field extraction.

use crate::error::{Error, Result};
use crate::key::Key;
use crate::resource::{ContainerFormat, ResourceOptions};

use std::net::IpAddr;

use oid_registry::{
    OID_X509_EXT_BASIC_CONSTRAINTS, OID_X509_EXT_EXTENDED_KEY_USAGE, OID_X509_EXT_KEY_USAGE,
    OID_X509_EXT_SUBJECT_ALT_NAME,
};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::{FromDer, X509Certificate as ParsedCertificate};

/// One attribute of a DistinguishedName, keyed by its OID dotted
/// string (e.g. `"2.5.4.3"` for `CN`).
pub type DnAttributeOid = String;

/// Subject or issuer DistinguishedName: an order-preserving mapping of
/// OID to the sequence of string values carried under it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    attributes: Vec<(DnAttributeOid, String)>,
}

impl DistinguishedName {
    /// An empty DistinguishedName, to be built up with `push`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute under the given OID.
    pub fn push(mut self, oid: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((oid.into(), value.into()));
        self
    }

    /// Convenience for the common `CN=` attribute (OID 2.5.4.3).
    pub fn with_common_name(self, cn: impl Into<String>) -> Self {
        self.push("2.5.4.3", cn)
    }

    /// Convenience for the common `O=` attribute (OID 2.5.4.10).
    pub fn with_organization(self, o: impl Into<String>) -> Self {
        self.push("2.5.4.10", o)
    }

    /// All (oid, value) pairs in the order they were added.
    pub fn attributes(&self) -> &[(DnAttributeOid, String)] {
        &self.attributes
    }

    /// First value stored under `oid`, if any.
    pub fn get(&self, oid: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(o, _)| o == oid)
            .map(|(_, v)| v.as_str())
    }

    fn to_rcgen(&self) -> rcgen::DistinguishedName {
        let mut dn = rcgen::DistinguishedName::new();
        for (oid, value) in &self.attributes {
            match oid.as_str() {
                "2.5.4.3" => dn.push(rcgen::DnType::CommonName, value.clone()),
                "2.5.4.10" => dn.push(rcgen::DnType::OrganizationName, value.clone()),
                "2.5.4.11" => dn.push(rcgen::DnType::OrganizationalUnitName, value.clone()),
                "2.5.4.6" => dn.push(rcgen::DnType::CountryName, value.clone()),
                "2.5.4.7" => dn.push(rcgen::DnType::LocalityName, value.clone()),
                "2.5.4.8" => dn.push(rcgen::DnType::StateOrProvinceName, value.clone()),
                other => dn.push(
                    rcgen::DnType::CustomDnType(
                        other
                            .split('.')
                            .filter_map(|p| p.parse::<u64>().ok())
                            .collect(),
                    ),
                    value.clone(),
                ),
            };
        }
        dn
    }
}

/// One Subject Alternative Name entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAltName {
    /// DNS name, e.g. `"example.com"`.
    Dns(String),
    /// IP address, v4 or v6.
    Ip(IpAddr),
    /// URI, e.g. `"spiffe://cluster/ns/default/sa/foo"`.
    Uri(String),
    /// RFC 822 email address.
    Email(String),
}

impl SubjectAltName {
    fn to_rcgen(&self) -> Result<rcgen::SanType> {
        Ok(match self {
            SubjectAltName::Dns(d) => rcgen::SanType::DnsName(
                d.clone()
                    .try_into()
                    .map_err(|_| Error::invalid(format!("invalid DNS SAN: {d}")))?,
            ),
            SubjectAltName::Ip(ip) => rcgen::SanType::IpAddress(*ip),
            SubjectAltName::Uri(u) => rcgen::SanType::URI(
                u.clone()
                    .try_into()
                    .map_err(|_| Error::invalid(format!("invalid URI SAN: {u}")))?,
            ),
            SubjectAltName::Email(e) => rcgen::SanType::Rfc822Name(
                e.clone()
                    .try_into()
                    .map_err(|_| Error::invalid(format!("invalid email SAN: {e}")))?,
            ),
        })
    }
}

/// Key-usage bit flags (a subset of RFC 5280 4.2.1.3, the ones
/// relevant to TLS).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsageFlags {
    /// Certificate may sign other data (not keyCertSign).
    pub digital_signature: bool,
    /// Certificate may be used for key agreement/encipherment.
    pub key_encipherment: bool,
    /// Certificate may sign certificates (set automatically for CAs).
    pub key_cert_sign: bool,
    /// Certificate may sign CRLs.
    pub crl_sign: bool,
}

/// Extended key usages (RFC 5280 4.2.1.12), the subset relevant here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsageFlags {
    /// id-kp-serverAuth
    pub server_auth: bool,
    /// id-kp-clientAuth
    pub client_auth: bool,
}

/// Options controlling certificate generation.
#[derive(Debug, Clone)]
pub struct CertificateOptions {
    /// Subject Alternative Names.
    pub san: Vec<SubjectAltName>,
    /// Caller-supplied serial number. Randomly generated if `None`.
    pub serial: Option<u64>,
    /// Validity window length in days from issuance. Defaults to 365.
    pub validity_days: u32,
    /// Whether this certificate is a certificate authority.
    pub is_ca: bool,
    /// CA path length constraint, meaningful only when `is_ca`.
    pub path_len_constraint: Option<u8>,
    /// Key usage bits to set. Defaults follow `is_ca` when left default.
    pub key_usage: KeyUsageFlags,
    /// Extended key usage bits to set.
    pub extended_key_usage: ExtendedKeyUsageFlags,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        Self {
            san: Vec::new(),
            serial: None,
            validity_days: 365,
            is_ca: false,
            path_len_constraint: None,
            key_usage: KeyUsageFlags::default(),
            extended_key_usage: ExtendedKeyUsageFlags::default(),
        }
    }
}

/// An X.509 v3 certificate: parsed metadata plus the raw DER needed to
/// re-serialize and re-verify it.
#[derive(Debug, Clone)]
pub struct Certificate {
    subject: DistinguishedName,
    issuer: DistinguishedName,
    serial: Vec<u8>,
    not_before: i64,
    not_after: i64,
    san: Vec<SubjectAltName>,
    public_key: Key,
    is_ca: bool,
    path_len_constraint: Option<u8>,
    key_usage: KeyUsageFlags,
    extended_key_usage: ExtendedKeyUsageFlags,
    signature_algorithm_oid: String,
    der: Vec<u8>,
}

impl Certificate {
    /// Generate a self-signed certificate: `issuer == subject`.
    pub fn generate_self_signed(
        subject: DistinguishedName,
        subject_key: &Key,
        options: CertificateOptions,
    ) -> Result<Certificate> {
        let key_pair = Self::to_rcgen_key_pair(subject_key)?;
        let params = Self::build_params(&subject, &options)?;
        let rcgen_cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::crypto(format!("self-signed certificate generation failed: {e}")))?;
        let der = rcgen_cert.der().to_vec();
        Self::from_der(&der)
    }

    /// Generate a certificate signed by `issuer_cert`/`issuer_key`.
    pub fn generate_signed_by(
        subject: DistinguishedName,
        subject_key: &Key,
        issuer_cert: &Certificate,
        issuer_key: &Key,
        options: CertificateOptions,
    ) -> Result<Certificate> {
        let subject_key_pair = Self::to_rcgen_key_pair(subject_key)?;
        let issuer_key_pair = Self::to_rcgen_key_pair(issuer_key)?;
        let params = Self::build_params(&subject, &options)?;

        let issuer_params = rcgen::CertificateParams::from_ca_cert_der(
            &rcgen::CertificateDer::from(issuer_cert.der.clone()),
        )
        .map_err(|e| Error::invalid(format!("issuer certificate is not a usable CA: {e}")))?;
        let issuer_rcgen = issuer_params
            .self_signed(&issuer_key_pair)
            .map_err(|e| Error::crypto(format!("re-deriving issuer signing context failed: {e}")))?;

        let rcgen_cert = params
            .signed_by(&subject_key_pair, &issuer_rcgen, &issuer_key_pair)
            .map_err(|e| Error::crypto(format!("issuer-signed certificate generation failed: {e}")))?;
        let der = rcgen_cert.der().to_vec();
        Self::from_der(&der)
    }

    fn to_rcgen_key_pair(key: &Key) -> Result<rcgen::KeyPair> {
        match key.algorithm() {
            crate::key::KeyAlgorithm::Dsa | crate::key::KeyAlgorithm::EcP521 => {
                return Err(Error::not_implemented(
                    "certificate generation is not supported for DSA or P-521 keys in this build",
                ))
            }
            crate::key::KeyAlgorithm::Ed448 => {
                return Err(Error::not_implemented("Ed448 is not supported in this build"))
            }
            _ => {}
        }
        let der = key.encode(&ResourceOptions::format(ContainerFormat::Asn1))?;
        rcgen::KeyPair::try_from(der.as_slice())
            .map_err(|e| Error::crypto(format!("loading key into certificate signer failed: {e}")))
    }

    fn build_params(
        subject: &DistinguishedName,
        options: &CertificateOptions,
    ) -> Result<rcgen::CertificateParams> {
        let sans: Result<Vec<rcgen::SanType>> =
            options.san.iter().map(SubjectAltName::to_rcgen).collect();
        let mut params = rcgen::CertificateParams::default();
        params.subject_alt_names = sans?;
        params.distinguished_name = subject.to_rcgen();

        params.is_ca = if options.is_ca {
            match options.path_len_constraint {
                Some(n) => rcgen::IsCa::Ca(rcgen::BasicConstraints::Constrained(n)),
                None => rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained),
            }
        } else {
            rcgen::IsCa::NoCa
        };

        let mut key_usages = Vec::new();
        if options.key_usage.digital_signature || (!options.is_ca && key_usages.is_empty()) {
            key_usages.push(rcgen::KeyUsagePurpose::DigitalSignature);
        }
        if options.key_usage.key_encipherment {
            key_usages.push(rcgen::KeyUsagePurpose::KeyEncipherment);
        }
        if options.is_ca || options.key_usage.key_cert_sign {
            key_usages.push(rcgen::KeyUsagePurpose::KeyCertSign);
        }
        if options.key_usage.crl_sign {
            key_usages.push(rcgen::KeyUsagePurpose::CrlSign);
        }
        params.key_usages = key_usages;

        let mut eku = Vec::new();
        if options.extended_key_usage.server_auth {
            eku.push(rcgen::ExtendedKeyUsagePurpose::ServerAuth);
        }
        if options.extended_key_usage.client_auth {
            eku.push(rcgen::ExtendedKeyUsagePurpose::ClientAuth);
        }
        params.extended_key_usages = eku;

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(options.validity_days as i64);

        params.serial_number = Some(rcgen::SerialNumber::from(
            options
                .serial
                .unwrap_or_else(rand_serial)
                .to_be_bytes()
                .to_vec(),
        ));

        Ok(params)
    }

    /// Decode a certificate from its DER body (stripping PEM framing
    /// first if `bytes` looks PEM-encoded).
    pub fn decode(bytes: &[u8], options: &ResourceOptions) -> Result<Certificate> {
        let looks_pem = bytes.starts_with(b"-----BEGIN");
        if let Some(format) = options.format {
            if format.is_pem() != looks_pem {
                return Err(Error::invalid("declared format does not match encoded form"));
            }
        }
        let der = if looks_pem {
            pem::parse(bytes).map_err(Error::from)?.contents().to_vec()
        } else {
            bytes.to_vec()
        };
        Self::from_der(&der)
    }

    /// Parse a certificate directly from DER bytes.
    pub fn from_der(der: &[u8]) -> Result<Certificate> {
        let (_, parsed) = ParsedCertificate::from_der(der).map_err(Error::from)?;
        Self::from_parsed(&parsed, der)
    }

    fn from_parsed(parsed: &ParsedCertificate<'_>, der: &[u8]) -> Result<Certificate> {
        let subject = dn_from_parsed(parsed.subject());
        let issuer = dn_from_parsed(parsed.issuer());
        let serial = parsed.raw_serial().to_vec();
        let not_before = parsed.validity().not_before.timestamp();
        let not_after = parsed.validity().not_after.timestamp();

        let spki_der = parsed.public_key().raw.to_vec();
        let public_key = Key::decode(&spki_der, &ResourceOptions::format(ContainerFormat::Asn1))?;

        let mut is_ca = false;
        let mut path_len_constraint = None;
        let mut key_usage = KeyUsageFlags::default();
        let mut extended_key_usage = ExtendedKeyUsageFlags::default();
        let mut san = Vec::new();

        for ext in parsed.extensions() {
            if ext.oid == OID_X509_EXT_BASIC_CONSTRAINTS {
                if let ParsedExtension::BasicConstraints(bc) = ext.parsed_extension() {
                    is_ca = bc.ca;
                    path_len_constraint = bc.path_len_constraint.map(|n| n as u8);
                }
            } else if ext.oid == OID_X509_EXT_KEY_USAGE {
                if let ParsedExtension::KeyUsage(ku) = ext.parsed_extension() {
                    key_usage = KeyUsageFlags {
                        digital_signature: ku.digital_signature(),
                        key_encipherment: ku.key_encipherment(),
                        key_cert_sign: ku.key_cert_sign(),
                        crl_sign: ku.crl_sign(),
                    };
                }
            } else if ext.oid == OID_X509_EXT_EXTENDED_KEY_USAGE {
                if let ParsedExtension::ExtendedKeyUsage(eku) = ext.parsed_extension() {
                    extended_key_usage = ExtendedKeyUsageFlags {
                        server_auth: eku.server_auth,
                        client_auth: eku.client_auth,
                    };
                }
            } else if ext.oid == OID_X509_EXT_SUBJECT_ALT_NAME {
                if let ParsedExtension::SubjectAlternativeName(sans) = ext.parsed_extension() {
                    for name in &sans.general_names {
                        san.push(match name {
                            x509_parser::extensions::GeneralName::DNSName(d) => {
                                SubjectAltName::Dns(d.to_string())
                            }
                            x509_parser::extensions::GeneralName::IPAddress(ip) => {
                                SubjectAltName::Ip(ip_from_bytes(ip)?)
                            }
                            x509_parser::extensions::GeneralName::URI(u) => {
                                SubjectAltName::Uri(u.to_string())
                            }
                            x509_parser::extensions::GeneralName::RFC822Name(e) => {
                                SubjectAltName::Email(e.to_string())
                            }
                            _ => continue,
                        });
                    }
                }
            }
        }

        Ok(Certificate {
            subject,
            issuer,
            serial,
            not_before,
            not_after,
            san,
            public_key,
            is_ca,
            path_len_constraint,
            key_usage,
            extended_key_usage,
            signature_algorithm_oid: parsed.signature_algorithm.algorithm.to_string(),
            der: der.to_vec(),
        })
    }

    /// Encode this certificate per `options` (`Asn1` or `Asn1Pem`).
    pub fn encode(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        match options.format {
            Some(ContainerFormat::Asn1) => Ok(self.der.clone()),
            Some(ContainerFormat::Asn1Pem) => {
                Ok(pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone())).into_bytes())
            }
            Some(other) => Err(Error::invalid(format!(
                "{:?} encoding of a standalone certificate is handled by the resource codec",
                other
            ))),
            None => Err(Error::invalid("encode requires an explicit container format")),
        }
    }

    /// The raw DER encoding (to-be-signed body plus signature).
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject DistinguishedName.
    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    /// Issuer DistinguishedName.
    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    /// Raw serial number bytes, big-endian, no leading sign byte
    /// stripped.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// notBefore as a Unix timestamp.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// notAfter as a Unix timestamp.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Subject Alternative Names.
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// The certificate's public key (never carries a private
    /// component).
    pub fn public_key(&self) -> &Key {
        &self.public_key
    }

    /// True when the basicConstraints CA bit is set.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// CA path length constraint, if any.
    pub fn path_len_constraint(&self) -> Option<u8> {
        self.path_len_constraint
    }

    /// Key usage bits.
    pub fn key_usage(&self) -> KeyUsageFlags {
        self.key_usage
    }

    /// Extended key usage bits.
    pub fn extended_key_usage(&self) -> ExtendedKeyUsageFlags {
        self.extended_key_usage
    }

    /// True when the certificate's issuer equals its subject — it is
    /// then expected to verify under its own public key.
    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject
    }

    /// Verify the certificate's signature against a candidate signer
    /// key's public component. For a self-signed certificate, pass
    /// `self.public_key()`.
    pub fn verify_signature(&self, signer_public_key: &Key) -> Result<bool> {
        use x509_parser::prelude::X509Certificate;
        let (_, parsed) =
            X509Certificate::from_der(&self.der).map_err(Error::from)?;
        let spki_der = signer_public_key.public_key_der()?;
        let (_, spki) = x509_parser::x509::SubjectPublicKeyInfo::from_der(&spki_der)
            .map_err(Error::from)?;
        Ok(parsed.verify_signature(Some(&spki)).is_ok())
    }

    /// Whether a hostname matches one of the DNS SAN entries
    /// (case-insensitive exact match; no wildcard expansion beyond
    /// what the certificate literally encodes).
    pub fn matches_dns_name(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.san.iter().any(|s| match s {
            SubjectAltName::Dns(d) => d.to_ascii_lowercase() == host,
            _ => false,
        })
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject
            && self.issuer == other.issuer
            && self.serial == other.serial
            && self.not_before == other.not_before
            && self.not_after == other.not_after
            && self.san == other.san
            && self.public_key == other.public_key
            && self.is_ca == other.is_ca
            && self.path_len_constraint == other.path_len_constraint
    }
}

impl Eq for Certificate {}

fn dn_from_parsed(name: &x509_parser::x509::X509Name<'_>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if let Ok(value) = attr.as_str() {
                dn = dn.push(attr.attr_type().to_string(), value.to_string());
            }
        }
    }
    dn
}

fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr> {
    match bytes.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(bytes);
            Ok(IpAddr::from(octets))
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Ok(IpAddr::from(octets))
        }
        other => Err(Error::invalid(format!("invalid IP SAN length {other}"))),
    }
}

fn rand_serial() -> u64 {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    // Force positive: RFC 5280 serials are non-negative integers.
    u64::from_be_bytes(bytes) & 0x7fff_ffff_ffff_ffff
}

/// Hex rendering of raw serial bytes, useful for logs.
pub fn serial_to_hex(serial: &[u8]) -> String {
    serial.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, KeyAlgorithm, KeyGenOptions};

    #[test]
    fn self_signed_is_self_signed_and_verifies() {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new()
            .with_common_name("TEST.AUTHORITY")
            .with_organization("Example LP");
        let mut options = CertificateOptions::default();
        options.is_ca = true;
        options.serial = Some(1);
        let cert = Certificate::generate_self_signed(subject, &key, options).unwrap();
        assert!(cert.is_self_signed());
        assert!(cert.is_ca());
        assert!(cert.verify_signature(cert.public_key()).unwrap());
    }

    #[test]
    fn issuer_signed_chain_matches() {
        let ca_key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let ca_subject = DistinguishedName::new().with_common_name("TEST.AUTHORITY");
        let mut ca_options = CertificateOptions::default();
        ca_options.is_ca = true;
        ca_options.serial = Some(1);
        let ca_cert = Certificate::generate_self_signed(ca_subject, &ca_key, ca_options).unwrap();

        let user_key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let user_subject = DistinguishedName::new().with_common_name("TEST.USER");
        let mut user_options = CertificateOptions::default();
        user_options.serial = Some(3);
        user_options.san = vec![
            SubjectAltName::Dns("localhost".into()),
            SubjectAltName::Ip("127.0.0.1".parse().unwrap()),
        ];
        let user_cert = Certificate::generate_signed_by(
            user_subject,
            &user_key,
            &ca_cert,
            &ca_key,
            user_options,
        )
        .unwrap();

        assert_eq!(user_cert.issuer(), ca_cert.subject());
        assert!(user_cert.verify_signature(ca_cert.public_key()).unwrap());
        assert!(user_cert.matches_dns_name("localhost"));
    }
}
