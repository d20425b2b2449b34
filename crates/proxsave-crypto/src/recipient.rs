//! Recipient parsing: X25519 (`age1...`) and SSH
//! authorized-key recipients are accepted; secret-key material and PGP
//! blocks are rejected before they ever reach a parser.

use std::str::FromStr as _;

use crate::CryptoError;

const SECRET_KEY_PREFIXES: &[&str] = &["AGE-SECRET-KEY-1", "age-secret-key-1"];
const PGP_MARKERS: &[&str] = &["-----BEGIN PGP"];

/// Parse a single recipient line into something `age::Encryptor` can use,
/// using the same `age::x25519::Recipient::from_str` /
/// `&recipient as &dyn age::Recipient` pattern throughout this crate,
/// extended to SSH recipients.
pub fn parse_recipient(line: &str) -> Result<Box<dyn age::Recipient + Send>, CryptoError> {
    let trimmed = line.trim();
    reject_secret_material(trimmed)?;

    if trimmed.starts_with("age1") {
        let recipient = age::x25519::Recipient::from_str(trimmed)
            .map_err(|e| CryptoError::InvalidRecipient(e.to_string()))?;
        return Ok(Box::new(recipient));
    }

    if trimmed.starts_with("ssh-rsa") || trimmed.starts_with("ssh-ed25519") {
        let recipient = age::ssh::Recipient::from_str(trimmed)
            .map_err(|_| CryptoError::InvalidRecipient("unparseable ssh recipient".to_string()))?;
        return Ok(Box::new(recipient));
    }

    Err(CryptoError::InvalidRecipient(format!(
        "unrecognized recipient form: {trimmed}"
    )))
}

pub fn parse_recipients(lines: &[String]) -> Result<Vec<Box<dyn age::Recipient + Send>>, CryptoError> {
    lines.iter().map(|l| parse_recipient(l)).collect()
}

fn reject_secret_material(line: &str) -> Result<(), CryptoError> {
    for prefix in SECRET_KEY_PREFIXES {
        if line.starts_with(prefix) {
            return Err(CryptoError::InvalidRecipient(
                "refusing a secret key where a recipient was expected".to_string(),
            ));
        }
    }
    for marker in PGP_MARKERS {
        if line.contains(marker) {
            return Err(CryptoError::InvalidRecipient(
                "PGP key material is not an accepted recipient form".to_string(),
            ));
        }
    }
    Ok(())
}
