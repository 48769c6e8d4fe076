//! Asymmetric key abstraction: generation, encoding, decoding, and
//! fingerprinting over {RSA, DSA, P-256/P-384/P-521, Ed25519, Ed448}.

use crate::error::{Error, Result};
use crate::resource::{ContainerFormat, ResourceOptions};
use crate::secret::Secret;

use der::{Decode, Encode};
use ed25519_dalek::{Signer as _, SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Identifies one of the supported public-key algorithms, with
/// algorithm-specific generation parameters where relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA with the given modulus size in bits.
    Rsa(u32),
    /// DSA (FIPS 186-4, 2048/256 parameter set).
    Dsa,
    /// NIST P-256 (secp256r1) ECDSA.
    EcP256,
    /// NIST P-384 (secp384r1) ECDSA.
    EcP384,
    /// NIST P-521 (secp521r1) ECDSA.
    EcP521,
    /// Ed25519 (pure EdDSA).
    Ed25519,
    /// Ed448 (pure EdDSA). Not implemented: no vetted RustCrypto crate
    /// for this build; requests fail with `not_implemented`.
    Ed448,
}

impl KeyAlgorithm {
    /// RSA with a 2048-bit modulus, the default when no size is given.
    pub const RSA_DEFAULT_BITS: u32 = 2048;

    fn display_name(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa(_) => "RSA",
            KeyAlgorithm::Dsa => "DSA",
            KeyAlgorithm::EcP256 => "EC/P-256",
            KeyAlgorithm::EcP384 => "EC/P-384",
            KeyAlgorithm::EcP521 => "EC/P-521",
            KeyAlgorithm::Ed25519 => "Ed25519",
            KeyAlgorithm::Ed448 => "Ed448",
        }
    }
}

/// Parameters for [`Key::generate`].
#[derive(Debug, Clone, Copy)]
pub struct KeyGenOptions {
    /// Algorithm and algorithm-specific sizing.
    pub algorithm: KeyAlgorithm,
}

impl KeyGenOptions {
    /// Convenience constructor for a given algorithm.
    pub fn new(algorithm: KeyAlgorithm) -> Self {
        Self { algorithm }
    }
}

/// An asymmetric key: either a full private/public pair or a
/// public-only key recovered from a certificate or public-key encoding.
#[derive(Clone)]
pub enum Key {
    /// RSA key pair or public key.
    Rsa {
        /// Present iff this is a private key.
        private: Option<Box<rsa::RsaPrivateKey>>,
        /// Always present; derived from `private` when both exist.
        public: rsa::RsaPublicKey,
    },
    /// DSA key pair or public key.
    Dsa {
        private: Option<Box<dsa::SigningKey>>,
        public: dsa::VerifyingKey,
    },
    /// NIST P-256 key pair or public key.
    EcP256 {
        private: Option<Box<p256::SecretKey>>,
        public: p256::PublicKey,
    },
    /// NIST P-384 key pair or public key.
    EcP384 {
        private: Option<Box<p384::SecretKey>>,
        public: p384::PublicKey,
    },
    /// NIST P-521 key pair or public key.
    EcP521 {
        private: Option<Box<p521::SecretKey>>,
        public: p521::PublicKey,
    },
    /// Ed25519 key pair or public key.
    Ed25519 {
        private: Option<Box<Ed25519SigningKey>>,
        public: Ed25519VerifyingKey,
    },
}

impl Key {
    /// Generate a fresh key for the requested algorithm.
    pub fn generate(options: KeyGenOptions) -> Result<Key> {
        match options.algorithm {
            KeyAlgorithm::Rsa(bits) => {
                let bits = if bits == 0 {
                    KeyAlgorithm::RSA_DEFAULT_BITS as usize
                } else {
                    bits as usize
                };
                let private = rsa::RsaPrivateKey::new(&mut OsRng, bits)
                    .map_err(|e| Error::crypto(format!("RSA key generation failed: {e}")))?;
                let public = rsa::RsaPublicKey::from(&private);
                Ok(Key::Rsa {
                    private: Some(Box::new(private)),
                    public,
                })
            }
            KeyAlgorithm::Dsa => {
                let components = dsa::Components::generate(&mut OsRng, dsa::KeySize::DSA_2048_256);
                let private = dsa::SigningKey::generate(&mut OsRng, components);
                let public = private.verifying_key().clone();
                Ok(Key::Dsa {
                    private: Some(Box::new(private)),
                    public,
                })
            }
            KeyAlgorithm::EcP256 => {
                let private = p256::SecretKey::random(&mut OsRng);
                let public = private.public_key();
                Ok(Key::EcP256 {
                    private: Some(Box::new(private)),
                    public,
                })
            }
            KeyAlgorithm::EcP384 => {
                let private = p384::SecretKey::random(&mut OsRng);
                let public = private.public_key();
                Ok(Key::EcP384 {
                    private: Some(Box::new(private)),
                    public,
                })
            }
            KeyAlgorithm::EcP521 => {
                let private = p521::SecretKey::random(&mut OsRng);
                let public = private.public_key();
                Ok(Key::EcP521 {
                    private: Some(Box::new(private)),
                    public,
                })
            }
            KeyAlgorithm::Ed25519 => {
                let private = Ed25519SigningKey::generate(&mut OsRng);
                let public = private.verifying_key();
                Ok(Key::Ed25519 {
                    private: Some(Box::new(private)),
                    public,
                })
            }
            KeyAlgorithm::Ed448 => Err(Error::not_implemented(
                "Ed448 is not supported in this build",
            )),
        }
    }

    /// This key's algorithm identifier. For RSA the modulus size is
    /// read back from the public key.
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Key::Rsa { public, .. } => {
                KeyAlgorithm::Rsa(rsa::traits::PublicKeyParts::size(public) as u32 * 8)
            }
            Key::Dsa { .. } => KeyAlgorithm::Dsa,
            Key::EcP256 { .. } => KeyAlgorithm::EcP256,
            Key::EcP384 { .. } => KeyAlgorithm::EcP384,
            Key::EcP521 { .. } => KeyAlgorithm::EcP521,
            Key::Ed25519 { .. } => KeyAlgorithm::Ed25519,
        }
    }

    /// True when this key carries private material.
    pub fn is_private(&self) -> bool {
        match self {
            Key::Rsa { private, .. } => private.is_some(),
            Key::Dsa { private, .. } => private.is_some(),
            Key::EcP256 { private, .. } => private.is_some(),
            Key::EcP384 { private, .. } => private.is_some(),
            Key::EcP521 { private, .. } => private.is_some(),
            Key::Ed25519 { private, .. } => private.is_some(),
        }
    }

    /// The public projection of this key, discarding any private
    /// component.
    pub fn public_only(&self) -> Key {
        match self {
            Key::Rsa { public, .. } => Key::Rsa {
                private: None,
                public: public.clone(),
            },
            Key::Dsa { public, .. } => Key::Dsa {
                private: None,
                public: public.clone(),
            },
            Key::EcP256 { public, .. } => Key::EcP256 {
                private: None,
                public: *public,
            },
            Key::EcP384 { public, .. } => Key::EcP384 {
                private: None,
                public: *public,
            },
            Key::EcP521 { public, .. } => Key::EcP521 {
                private: None,
                public: *public,
            },
            Key::Ed25519 { public, .. } => Key::Ed25519 {
                private: None,
                public: *public,
            },
        }
    }

    /// DER encoding of the SubjectPublicKeyInfo, used for fingerprinting
    /// and for embedding the public key into a generated certificate.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let doc = match self {
            Key::Rsa { public, .. } => public
                .to_public_key_der()
                .map_err(|e| Error::crypto(format!("RSA SPKI encode failed: {e}")))?,
            Key::Dsa { public, .. } => public
                .to_public_key_der()
                .map_err(|e| Error::crypto(format!("DSA SPKI encode failed: {e}")))?,
            Key::EcP256 { public, .. } => public
                .to_public_key_der()
                .map_err(|e| Error::crypto(format!("P-256 SPKI encode failed: {e}")))?,
            Key::EcP384 { public, .. } => public
                .to_public_key_der()
                .map_err(|e| Error::crypto(format!("P-384 SPKI encode failed: {e}")))?,
            Key::EcP521 { public, .. } => public
                .to_public_key_der()
                .map_err(|e| Error::crypto(format!("P-521 SPKI encode failed: {e}")))?,
            Key::Ed25519 { public, .. } => public
                .to_public_key_der()
                .map_err(|e| Error::crypto(format!("Ed25519 SPKI encode failed: {e}")))?,
        };
        Ok(doc.as_bytes().to_vec())
    }

    /// Algorithm-specific deterministic fingerprint: SHA-256 over the
    /// DER-encoded SubjectPublicKeyInfo, hex-encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self.public_key_der()?;
        let digest = Sha256::digest(&der);
        Ok(hex::encode(digest))
    }

    /// Sign a message, if this key carries private material. Used
    /// internally when issuing certificates is not delegated to rcgen.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            Key::Ed25519 {
                private: Some(sk), ..
            } => Ok(sk.sign(message).to_bytes().to_vec()),
            _ => Err(Error::not_implemented(
                "direct signing is only wired up for Ed25519; certificate issuance uses rcgen for other algorithms",
            )),
        }
    }

    /// Encode this key per `options`. Only `Asn1`, `Asn1Pem`, `Pkcs8`,
    /// and `Pkcs8Pem` are meaningful for a standalone key; any other
    /// format fails with `invalid`.
    pub fn encode(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        let format = options
            .format
            .ok_or_else(|| Error::invalid("encode requires an explicit container format"))?;
        if !format.supports_private_key() && self.is_private() {
            return Err(Error::invalid(format!(
                "{:?} cannot carry a private key",
                format
            )));
        }

        match format {
            ContainerFormat::Asn1 | ContainerFormat::Pkcs8 => {
                if self.is_private() {
                    self.encode_private_der(options)
                } else {
                    self.public_key_der()
                }
            }
            ContainerFormat::Asn1Pem | ContainerFormat::Pkcs8Pem => {
                let (label, der) = if self.is_private() {
                    if options.encrypted {
                        let passphrase = options
                            .resolve_passphrase()
                            .ok_or_else(|| Error::invalid("encrypted encode requires a passphrase"))?;
                        return self.encode_encrypted_pem(&passphrase);
                    }
                    ("PRIVATE KEY", self.encode_private_der(options)?)
                } else {
                    ("PUBLIC KEY", self.public_key_der()?)
                };
                Ok(pem::encode(&pem::Pem::new(label, der)).into_bytes())
            }
            _ => Err(Error::invalid(format!(
                "{:?} is not a valid format for a standalone key",
                format
            ))),
        }
    }

    fn encode_private_der(&self, options: &ResourceOptions) -> Result<Vec<u8>> {
        if options.encrypted {
            let passphrase = options
                .resolve_passphrase()
                .ok_or_else(|| Error::invalid("encrypted encode requires a passphrase"))?;
            return self.encode_encrypted_der(&passphrase);
        }
        let doc = match self {
            Key::Rsa { private: Some(sk), .. } => sk
                .to_pkcs8_der()
                .map_err(|e| Error::crypto(format!("RSA PKCS#8 encode failed: {e}")))?,
            Key::Dsa { private: Some(sk), .. } => sk
                .to_pkcs8_der()
                .map_err(|e| Error::crypto(format!("DSA PKCS#8 encode failed: {e}")))?,
            Key::EcP256 { private: Some(sk), .. } => sk
                .to_pkcs8_der()
                .map_err(|e| Error::crypto(format!("P-256 PKCS#8 encode failed: {e}")))?,
            Key::EcP384 { private: Some(sk), .. } => sk
                .to_pkcs8_der()
                .map_err(|e| Error::crypto(format!("P-384 PKCS#8 encode failed: {e}")))?,
            Key::EcP521 { private: Some(sk), .. } => sk
                .to_pkcs8_der()
                .map_err(|e| Error::crypto(format!("P-521 PKCS#8 encode failed: {e}")))?,
            Key::Ed25519 { private: Some(sk), .. } => sk
                .to_pkcs8_der()
                .map_err(|e| Error::crypto(format!("Ed25519 PKCS#8 encode failed: {e}")))?,
            _ => return Err(Error::invalid("no private component to encode")),
        };
        Ok(doc.as_bytes().to_vec())
    }

    fn encode_encrypted_der(&self, passphrase: &Secret) -> Result<Vec<u8>> {
        let password = passphrase
            .as_str()
            .map_err(|_| Error::invalid("passphrase must be valid UTF-8"))?;
        let doc = match self {
            Key::Rsa { private: Some(sk), .. } => sk
                .to_pkcs8_encrypted_der(OsRng, password)
                .map_err(|e| Error::crypto(format!("RSA encrypted PKCS#8 encode failed: {e}")))?,
            Key::Dsa { private: Some(sk), .. } => sk
                .to_pkcs8_encrypted_der(OsRng, password)
                .map_err(|e| Error::crypto(format!("DSA encrypted PKCS#8 encode failed: {e}")))?,
            Key::EcP256 { private: Some(sk), .. } => sk
                .to_pkcs8_encrypted_der(OsRng, password)
                .map_err(|e| Error::crypto(format!("P-256 encrypted PKCS#8 encode failed: {e}")))?,
            Key::EcP384 { private: Some(sk), .. } => sk
                .to_pkcs8_encrypted_der(OsRng, password)
                .map_err(|e| Error::crypto(format!("P-384 encrypted PKCS#8 encode failed: {e}")))?,
            Key::EcP521 { private: Some(sk), .. } => sk
                .to_pkcs8_encrypted_der(OsRng, password)
                .map_err(|e| Error::crypto(format!("P-521 encrypted PKCS#8 encode failed: {e}")))?,
            Key::Ed25519 { private: Some(sk), .. } => sk
                .to_pkcs8_encrypted_der(OsRng, password)
                .map_err(|e| Error::crypto(format!("Ed25519 encrypted PKCS#8 encode failed: {e}")))?,
            _ => return Err(Error::invalid("no private component to encode")),
        };
        Ok(doc.as_bytes().to_vec())
    }

    fn encode_encrypted_pem(&self, passphrase: &Secret) -> Result<Vec<u8>> {
        let der = self.encode_encrypted_der(passphrase)?;
        Ok(pem::encode(&pem::Pem::new("ENCRYPTED PRIVATE KEY", der)).into_bytes())
    }

    /// Decode a key from its encoded form per `options`.
    pub fn decode(bytes: &[u8], options: &ResourceOptions) -> Result<Key> {
        let format = match options.format {
            Some(f) => f,
            None => Self::sniff(bytes)?,
        };
        if options.format.is_some() {
            let sniffed = Self::sniff(bytes)?;
            if sniffed.is_pem() != format.is_pem() {
                return Err(Error::invalid("declared format does not match encoded form"));
            }
        }

        let der = if format.is_pem() {
            let parsed = pem::parse(bytes).map_err(Error::from)?;
            parsed.contents().to_vec()
        } else {
            bytes.to_vec()
        };

        if options.encrypted {
            let passphrase = options
                .resolve_passphrase()
                .ok_or_else(|| Error::unauthorized("encrypted key requires a passphrase"))?;
            return Self::decode_encrypted(&der, &passphrase);
        }

        // Encrypted PKCS#8 is self-describing (EncryptedPrivateKeyInfo);
        // detect it even when the caller didn't set `encrypted`.
        if pkcs8::EncryptedPrivateKeyInfo::try_from(der.as_slice()).is_ok() {
            let passphrase = options
                .resolve_passphrase()
                .ok_or_else(|| Error::unauthorized("key is encrypted but no passphrase was supplied"))?;
            return Self::decode_encrypted(&der, &passphrase);
        }

        if let Ok(info) = pkcs8::PrivateKeyInfo::try_from(der.as_slice()) {
            return Self::from_pkcs8_private_key_info(&info);
        }
        Self::decode_public_der(&der)
    }

    fn decode_encrypted(der: &[u8], passphrase: &Secret) -> Result<Key> {
        let password = passphrase
            .as_str()
            .map_err(|_| Error::invalid("passphrase must be valid UTF-8"))?;
        let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der)
            .map_err(|e| Error::invalid(format!("not a PKCS#8 encrypted key: {e}")))?;
        let decrypted = encrypted
            .decrypt(password)
            .map_err(|_| Error::unauthorized("wrong passphrase"))?;
        let info = pkcs8::PrivateKeyInfo::try_from(decrypted.as_bytes())
            .map_err(|e| Error::invalid(format!("decrypted key is malformed: {e}")))?;
        Self::from_pkcs8_private_key_info(&info)
    }

    fn from_pkcs8_private_key_info(info: &pkcs8::PrivateKeyInfo<'_>) -> Result<Key> {
        const ID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
        const ID_DSA: &str = "1.2.840.10040.4.1";

        let oid_str = info.algorithm.oid.to_string();
        let der = info
            .to_der()
            .map_err(|e| Error::invalid(format!("re-encoding PKCS#8 body failed: {e}")))?;
        if oid_str == ID_RSA_ENCRYPTION {
            let private = rsa::RsaPrivateKey::from_pkcs8_der(&der)
                .map_err(|e| Error::invalid(format!("malformed RSA key: {e}")))?;
            let public = rsa::RsaPublicKey::from(&private);
            return Ok(Key::Rsa {
                private: Some(Box::new(private)),
                public,
            });
        }
        if oid_str == ID_DSA {
            let private = dsa::SigningKey::from_pkcs8_der(&der)
                .map_err(|e| Error::invalid(format!("malformed DSA key: {e}")))?;
            let public = private.verifying_key().clone();
            return Ok(Key::Dsa {
                private: Some(Box::new(private)),
                public,
            });
        }
        Self::from_pkcs8_ec_or_edwards(info, &der)
    }

    fn from_pkcs8_ec_or_edwards(info: &pkcs8::PrivateKeyInfo<'_>, der: &[u8]) -> Result<Key> {
        const ID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
        const ID_ED25519: &str = "1.3.101.112";
        const ID_ED448: &str = "1.3.101.113";
        const P256_OID: &str = "1.2.840.10045.3.1.7";
        const P384_OID: &str = "1.3.132.0.34";
        const P521_OID: &str = "1.3.132.0.35";

        let oid_str = info.algorithm.oid.to_string();
        if oid_str == ID_ED25519 {
            let private = Ed25519SigningKey::from_pkcs8_der(der)
                .map_err(|e| Error::invalid(format!("malformed Ed25519 key: {e}")))?;
            let public = private.verifying_key();
            return Ok(Key::Ed25519 {
                private: Some(Box::new(private)),
                public,
            });
        }
        if oid_str == ID_ED448 {
            return Err(Error::not_implemented("Ed448 is not supported in this build"));
        }
        if oid_str == ID_EC_PUBLIC_KEY {
            let curve_oid = info
                .algorithm
                .parameters
                .ok_or_else(|| Error::invalid("EC key is missing curve parameters"))?
                .decode_as::<der::asn1::ObjectIdentifier>()
                .map_err(|e| Error::invalid(format!("malformed EC curve parameters: {e}")))?
                .to_string();
            return match curve_oid.as_str() {
                P256_OID => {
                    let private = p256::SecretKey::from_pkcs8_der(der)
                        .map_err(|e| Error::invalid(format!("malformed P-256 key: {e}")))?;
                    let public = private.public_key();
                    Ok(Key::EcP256 {
                        private: Some(Box::new(private)),
                        public,
                    })
                }
                P384_OID => {
                    let private = p384::SecretKey::from_pkcs8_der(der)
                        .map_err(|e| Error::invalid(format!("malformed P-384 key: {e}")))?;
                    let public = private.public_key();
                    Ok(Key::EcP384 {
                        private: Some(Box::new(private)),
                        public,
                    })
                }
                P521_OID => {
                    let private = p521::SecretKey::from_pkcs8_der(der)
                        .map_err(|e| Error::invalid(format!("malformed P-521 key: {e}")))?;
                    let public = private.public_key();
                    Ok(Key::EcP521 {
                        private: Some(Box::new(private)),
                        public,
                    })
                }
                other => Err(Error::invalid(format!("unsupported EC curve OID {other}"))),
            };
        }
        Err(Error::invalid(format!(
            "unsupported key algorithm OID {oid_str}"
        )))
    }

    fn decode_public_der(der: &[u8]) -> Result<Key> {
        if let Ok(public) = rsa::RsaPublicKey::from_public_key_der(der) {
            return Ok(Key::Rsa { private: None, public });
        }
        if let Ok(public) = dsa::VerifyingKey::from_public_key_der(der) {
            return Ok(Key::Dsa { private: None, public });
        }
        if let Ok(public) = p256::PublicKey::from_public_key_der(der) {
            return Ok(Key::EcP256 { private: None, public });
        }
        if let Ok(public) = p384::PublicKey::from_public_key_der(der) {
            return Ok(Key::EcP384 { private: None, public });
        }
        if let Ok(public) = p521::PublicKey::from_public_key_der(der) {
            return Ok(Key::EcP521 { private: None, public });
        }
        if let Ok(public) = Ed25519VerifyingKey::from_public_key_der(der) {
            return Ok(Key::Ed25519 { private: None, public });
        }
        Err(Error::invalid("unrecognized public key encoding"))
    }

    fn sniff(bytes: &[u8]) -> Result<ContainerFormat> {
        let text_prefix = bytes.get(0..27).unwrap_or(bytes);
        if text_prefix.starts_with(b"-----BEGIN") {
            return Ok(ContainerFormat::Asn1Pem);
        }
        if bytes.first() == Some(&0x30) {
            return Ok(ContainerFormat::Asn1);
        }
        Err(Error::invalid("unable to determine container format"))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self.public_key_der(), other.public_key_der()) {
            (Ok(a), Ok(b)) => a == b && self.is_private() == other.is_private(),
            _ => false,
        }
    }
}

impl Eq for Key {}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("algorithm", &self.algorithm().display_name())
            .field("is_private", &self.is_private())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_round_trip_fingerprint_matches() {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::Rsa(2048))).unwrap();
        let public = key.public_only();
        assert_eq!(key.fingerprint().unwrap(), public.fingerprint().unwrap());
        assert!(key.is_private());
        assert!(!public.is_private());
    }

    #[test]
    fn ed25519_generate_and_encode_pem() {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::Ed25519)).unwrap();
        let options = ResourceOptions::format(ContainerFormat::Asn1Pem);
        let pem_bytes = key.encode(&options).unwrap();
        assert!(String::from_utf8(pem_bytes).unwrap().contains("PRIVATE KEY"));
    }

    #[test]
    fn ed448_is_not_implemented() {
        let result = Key::generate(KeyGenOptions::new(KeyAlgorithm::Ed448));
        assert!(matches!(
            result,
            Err(e) if e.kind() == crate::error::ErrorKind::NotImplemented
        ));
    }

    #[test]
    fn pkcs7_rejects_private_key_encode() {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let options = ResourceOptions::format(ContainerFormat::Pkcs7);
        let result = key.encode(&options);
        assert!(result.is_err());
    }
}
