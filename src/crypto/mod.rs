//! Cryptographic support utilities that are not themselves key or
//! certificate objects.

pub mod passphrase;

pub use passphrase::{validate_passphrase, PassphraseStrength, PassphraseValidation};
