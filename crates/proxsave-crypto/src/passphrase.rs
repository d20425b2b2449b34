//! Passphrase entry validation: minimum length, character
//! class diversity, and a small weak-list rejection.

use crate::CryptoError;

const MIN_LENGTH: usize = 12;
const MIN_CLASSES: usize = 3;

/// A short built-in list of passphrases that trivially fail a brute-force
/// dictionary check even when they pass the length/class rules.
const WEAK_LIST: &[&str] = &[
    "P@ssw0rd123456!",
    "Changeme123456!",
    "Qwertyuiop123!@",
    "Admin1234567!@#",
    "Welcome12345!@#",
];

pub fn validate_passphrase(passphrase: &str) -> Result<(), CryptoError> {
    if passphrase.len() < MIN_LENGTH {
        return Err(CryptoError::WeakPassphrase(format!(
            "passphrase must be at least {MIN_LENGTH} characters"
        )));
    }

    let classes = character_classes(passphrase);
    if classes < MIN_CLASSES {
        return Err(CryptoError::WeakPassphrase(format!(
            "passphrase must use at least {MIN_CLASSES} of: lowercase, uppercase, digit, symbol"
        )));
    }

    let lower = passphrase.to_lowercase();
    if WEAK_LIST.iter().any(|weak| weak.eq_ignore_ascii_case(&lower)) {
        return Err(CryptoError::WeakPassphrase(
            "passphrase matches a known weak phrase".to_string(),
        ));
    }

    Ok(())
}

fn character_classes(passphrase: &str) -> usize {
    let has_lower = passphrase.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = passphrase.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = passphrase.chars().any(|c| c.is_ascii_digit());
    let has_symbol = passphrase
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace());

    [has_lower, has_upper, has_digit, has_symbol]
        .into_iter()
        .filter(|b| *b)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_passphrase() {
        assert!(validate_passphrase("Ab1!").is_err());
    }

    #[test]
    fn rejects_too_few_character_classes() {
        assert!(validate_passphrase("alllowercaseletters").is_err());
    }

    #[test]
    fn rejects_weak_list_entry_case_insensitively() {
        assert!(validate_passphrase("p@SSW0RD123456!").is_err());
    }

    #[test]
    fn accepts_strong_passphrase() {
        assert!(validate_passphrase("Tr0ub4dor&3xtra!").is_ok());
    }
}
