//! Opaque byte container with defensive zeroing, and the validation
//! wrapper used by certificate and session authentication policy.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A byte buffer that is wiped on drop and compares in constant time.
///
/// Cloning is permitted (the clone owns an independent zeroizing
/// buffer); the `Debug` impl never prints the contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    /// Build a secret from an owned byte vector.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Build a secret from a string's UTF-8 bytes, e.g. a passphrase.
    pub fn from_str(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }

    /// An empty secret.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Append bytes to the end of the secret.
    pub fn append(&mut self, more: &[u8]) {
        self.bytes.extend_from_slice(more);
    }

    /// Overwrite the storage and drop it to zero length.
    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the secret holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read-only access to the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Interpret the secret as UTF-8, e.g. to recover a passphrase.
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes, ***)", self.bytes.len())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

/// A predicate over some subject `T`, used both for peer-certificate
/// authentication callbacks and for ad hoc acceptance rules (e.g.
/// "host name is a member of the certificate's SAN list").
pub type Validator<T> = std::sync::Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Wraps a user-supplied predicate together with a human-readable
/// description, so validation failures can report *why* without the
/// caller re-deriving it.
#[derive(Clone)]
pub struct Validation<T> {
    description: String,
    predicate: Validator<T>,
}

impl<T> Validation<T> {
    /// Build a validation rule from a predicate and a description used
    /// in error messages when the rule rejects.
    pub fn new(description: impl Into<String>, predicate: Validator<T>) -> Self {
        Self {
            description: description.into(),
            predicate,
        }
    }

    /// A rule that accepts everything.
    pub fn accept_all() -> Self {
        Self::new("accept-all", std::sync::Arc::new(|_| true))
    }

    /// Evaluate the rule against a subject.
    pub fn check(&self, subject: &T) -> bool {
        (self.predicate)(subject)
    }

    /// The rule's description, for error reporting.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<T> fmt::Debug for Validation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validation")
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroizes_on_clear() {
        let mut s = Secret::from_str("hunter2");
        assert_eq!(s.len(), 7);
        s.clear();
        assert!(s.is_empty());
    }

    #[test]
    fn constant_time_equality() {
        let a = Secret::from_str("same-bytes");
        let b = Secret::from_str("same-bytes");
        let c = Secret::from_str("different");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn append_grows_buffer() {
        let mut s = Secret::new(vec![1, 2, 3]);
        s.append(&[4, 5]);
        assert_eq!(s.as_bytes(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn validation_reports_description() {
        let rule: Validation<str> = Validation::new(
            "must equal localhost",
            std::sync::Arc::new(|s: &str| s == "localhost"),
        );
        assert!(rule.check("localhost"));
        assert!(!rule.check("example.com"));
        assert_eq!(rule.description(), "must equal localhost");
    }
}
