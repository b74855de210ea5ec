//! Secret handling utilities.
//!
//! Re-exports secrecy types and compares presented credentials against the
//! configured shared secret.

pub use secrecy::{ExposeSecret, SecretString};

/// Compare a presented credential with the expected secret without an
/// early exit on the first differing byte.
pub fn secret_matches(expected: &SecretString, presented: &str) -> bool {
    let expected = expected.expose_secret().as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
