//! Passphrase-derived deterministic X25519 identities.
//!
//! Builds on the same `age::x25519::Identity::from_str` parse step used
//! for plain generated identities, layering on a scrypt KDF to turn a
//! passphrase into a deterministic secret key.
//!
//! Salt choice is otherwise unconstrained: we fix one well-known label
//! for current archives and keep a second, older label
//! purely so archives encrypted before the label was fixed still decrypt
//! (see DESIGN.md).

use std::str::FromStr as _;

use bech32::{Bech32, Hrp};
use zeroize::Zeroize as _;

use crate::CryptoError;

const SCRYPT_LOG_N: u8 = 15; // N = 2^15
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

const CURRENT_LABEL_SALT: &[u8] = b"proxsave-passphrase-identity-v1";
const LEGACY_LABEL_SALT: &[u8] = b"proxsave-passphrase-identity-v0";

const IDENTITY_HRP: &str = "age-secret-key-";

fn clamp_x25519_scalar(k: &mut [u8; 32]) {
    k[0] &= 0xF8;
    k[31] = (k[31] & 0x7F) | 0x40;
}

fn scrypt_derive(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|e| CryptoError::InvalidIdentity(e.to_string()))?;
    let mut out = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut out)
        .map_err(|e| CryptoError::InvalidIdentity(e.to_string()))?;
    clamp_x25519_scalar(&mut out);
    Ok(out)
}

fn identity_from_clamped_bytes(mut bytes: [u8; 32]) -> Result<age::x25519::Identity, CryptoError> {
    let hrp = Hrp::parse(IDENTITY_HRP).expect("static HRP is valid");
    let encoded = bech32::encode::<Bech32>(hrp, &bytes)
        .map_err(|e| CryptoError::InvalidIdentity(e.to_string()))?;
    bytes.zeroize();

    let identity = age::x25519::Identity::from_str(&encoded.to_uppercase())
        .map_err(|e| CryptoError::InvalidIdentity(e.to_string()))?;
    Ok(identity)
}

/// The identity used when a passphrase is supplied for a *new* backup
/// (its public key becomes the recipient baked into the manifest).
pub fn identity_for_passphrase(passphrase: &str) -> Result<age::x25519::Identity, CryptoError> {
    identity_from_clamped_bytes(scrypt_derive(passphrase, CURRENT_LABEL_SALT)?)
}

/// All candidate identities to try on decrypt: current salt first, then
/// the legacy salt so archives made before the label was fixed still
/// open.
pub fn derive_passphrase_identities(
    passphrase: &str,
) -> Result<Vec<age::x25519::Identity>, CryptoError> {
    let current = identity_from_clamped_bytes(scrypt_derive(passphrase, CURRENT_LABEL_SALT)?)?;
    let legacy = identity_from_clamped_bytes(scrypt_derive(passphrase, LEGACY_LABEL_SALT)?)?;
    Ok(vec![current, legacy])
}
