//! Recipient/identity parsing, passphrase-derived identities, and
//! streaming encrypt/decrypt, built on the `age` crate's X25519 and SSH
//! recipient types, generalized from a fixed recipient/identity scope
//! to the full recipient grammar and a deterministic passphrase-derived
//! identity.

pub mod identity;
pub mod passphrase;
pub mod recipient;
pub mod stream;

pub use identity::derive_passphrase_identities;
pub use passphrase::validate_passphrase;
pub use recipient::parse_recipient;
pub use stream::{decrypt_reader, encrypt_writer};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("passphrase rejected: {0}")]
    WeakPassphrase(String),
    #[error(transparent)]
    Age(#[from] age::EncryptError),
    #[error(transparent)]
    AgeDecrypt(#[from] age::DecryptError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
