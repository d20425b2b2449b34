//! Streaming encrypt/decrypt between file descriptors, built on
//! `age::Encryptor::with_recipients(...).wrap_output(writer)` and
//! `age::Decryptor::new(reader)?.decrypt(identities)`.

use std::io::{Read, Write};

use crate::CryptoError;

/// Wrap `sink` so writes are age-encrypted to `recipients`. Callers must
/// call `.finish()` on the returned writer (age's `StreamWriter`) to
/// flush the closing MAC frame.
pub fn encrypt_writer<'a, W: Write + 'a>(
    recipients: Vec<Box<dyn age::Recipient + Send + 'a>>,
    sink: W,
) -> Result<age::stream::StreamWriter<W>, CryptoError> {
    let recipients: Vec<&dyn age::Recipient> = recipients.iter().map(|r| r.as_ref()).collect();
    let encryptor = age::Encryptor::with_recipients(recipients.into_iter())?;
    Ok(encryptor.wrap_output(sink)?)
}

/// Open `source` for age-decryption, trying each identity until one
/// unwraps the file key.
pub fn decrypt_reader<'a, R: Read + 'a>(
    identities: &'a [age::x25519::Identity],
    source: R,
) -> Result<age::stream::StreamReader<R>, CryptoError> {
    let decryptor = age::Decryptor::new(source)?;
    let refs: Vec<&dyn age::Identity> = identities
        .iter()
        .map(|id| id as &dyn age::Identity)
        .collect();
    Ok(decryptor.decrypt(refs.into_iter())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encrypt_then_decrypt_round_trips_plaintext() {
        let identity = age::x25519::Identity::generate();
        let recipient = identity.to_public();

        let mut ciphertext = Vec::new();
        {
            let mut writer =
                encrypt_writer(vec![Box::new(recipient)], &mut ciphertext).unwrap();
            writer.write_all(b"hello proxsave").unwrap();
            writer.finish().unwrap();
        }

        let identities = vec![identity];
        let mut reader = decrypt_reader(&identities, Cursor::new(ciphertext)).unwrap();
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext).unwrap();
        assert_eq!(plaintext, b"hello proxsave");
    }

    #[test]
    fn decrypt_with_wrong_identity_fails() {
        let identity = age::x25519::Identity::generate();
        let recipient = identity.to_public();
        let wrong_identity = age::x25519::Identity::generate();

        let mut ciphertext = Vec::new();
        {
            let mut writer =
                encrypt_writer(vec![Box::new(recipient)], &mut ciphertext).unwrap();
            writer.write_all(b"secret payload").unwrap();
            writer.finish().unwrap();
        }

        let identities = vec![wrong_identity];
        let result = decrypt_reader(&identities, Cursor::new(ciphertext));
        assert!(result.is_err());
    }
}
