//! MySQL authentication
//!
//! This module implements the scrambles used on both sides of the proxy:
//! - `mysql_native_password` - SHA1-based, used to verify clients and to log in upstream
//! - `caching_sha2_password` - SHA256-based (MySQL 8.0+ default), upstream only
//!
//! References:
//! - Native: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_authentication_methods_native_password_authentication.html>
//! - Caching SHA2: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_caching_sha2_authentication_exchanges.html>

use rand::Rng;
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha2Digest, Sha256};

use super::packets::{CACHING_SHA2_PLUGIN, NATIVE_PASSWORD_PLUGIN};

/// Generate a random 20-byte scramble for authentication
pub fn generate_scramble() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let mut scramble = [0u8; 20];

    // Avoid null bytes (the scramble is null-terminated on the wire) and 0xFF
    for byte in scramble.iter_mut() {
        *byte = loop {
            let b: u8 = rng.gen();
            if b != 0 && b != 0xFF {
                break b;
            }
        };
    }

    scramble
}

/// Compute the auth response for mysql_native_password
///
/// Algorithm:
/// ```text
/// SHA1( password ) XOR SHA1( scramble + SHA1( SHA1( password ) ) )
/// ```
pub fn compute_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let mut hasher = Sha1::new();
    Sha1Digest::update(&mut hasher, password.as_bytes());
    let stage1 = hasher.finalize();

    let mut hasher = Sha1::new();
    Sha1Digest::update(&mut hasher, stage1);
    let stage2 = hasher.finalize();

    let mut hasher = Sha1::new();
    Sha1Digest::update(&mut hasher, scramble);
    Sha1Digest::update(&mut hasher, stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Check a client's mysql_native_password response against a known password.
///
/// An empty password only matches an empty response.
pub fn verify_native_password(auth_response: &[u8], scramble: &[u8], password: &str) -> bool {
    let expected = compute_auth_response(password, scramble);
    if expected.len() != auth_response.len() {
        return false;
    }
    // Fold over every byte so timing does not depend on the first mismatch
    expected
        .iter()
        .zip(auth_response.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Return the first candidate password that produced `auth_response`.
pub fn find_matching_password<'a, I>(
    auth_response: &[u8],
    scramble: &[u8],
    candidates: I,
) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    candidates
        .into_iter()
        .find(|password| verify_native_password(auth_response, scramble, password))
        .map(String::as_str)
}

/// Compute the auth response for caching_sha2_password (SHA256-based)
///
/// ```text
/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) || nonce)
/// ```
pub fn compute_caching_sha2_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let mut hasher = Sha256::new();
    Sha2Digest::update(&mut hasher, password.as_bytes());
    let stage1 = hasher.finalize();

    let mut hasher = Sha256::new();
    Sha2Digest::update(&mut hasher, stage1);
    let stage2 = hasher.finalize();

    let mut hasher = Sha256::new();
    Sha2Digest::update(&mut hasher, stage2);
    Sha2Digest::update(&mut hasher, scramble);
    let scramble_hash = hasher.finalize();

    stage1
        .iter()
        .zip(scramble_hash.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Compute auth response for the plugin the upstream server asked for
pub fn compute_auth_for_plugin(plugin_name: &str, password: &str, scramble: &[u8]) -> Vec<u8> {
    match plugin_name {
        NATIVE_PASSWORD_PLUGIN => compute_auth_response(password, scramble),
        CACHING_SHA2_PLUGIN => compute_caching_sha2_response(password, scramble),
        unknown => {
            warn!(
                "Unknown auth plugin '{}', falling back to mysql_native_password",
                unknown
            );
            compute_auth_response(password, scramble)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_scramble() {
        let scramble = generate_scramble();
        assert_eq!(scramble.len(), 20);
        assert!(!scramble.contains(&0));
        assert!(!scramble.contains(&0xFF));
    }

    #[test]
    fn test_compute_auth_response_empty_password() {
        let response = compute_auth_response("", &[0u8; 20]);
        assert!(response.is_empty());
    }

    #[test]
    fn test_verify_native_password() {
        let scramble = generate_scramble();
        let response = compute_auth_response("secret", &scramble);
        assert_eq!(response.len(), 20);

        assert!(verify_native_password(&response, &scramble, "secret"));
        assert!(!verify_native_password(&response, &scramble, "Secret"));
        assert!(!verify_native_password(&response, &generate_scramble(), "secret"));
    }

    #[test]
    fn test_verify_empty_password() {
        let scramble = generate_scramble();
        assert!(verify_native_password(&[], &scramble, ""));
        assert!(!verify_native_password(&[], &scramble, "secret"));
        let response = compute_auth_response("secret", &scramble);
        assert!(!verify_native_password(&response, &scramble, ""));
    }

    #[test]
    fn test_find_matching_password() {
        let scramble = generate_scramble();
        let candidates = vec!["alpha".to_string(), "beta".to_string()];
        let response = compute_auth_response("beta", &scramble);

        assert_eq!(
            find_matching_password(&response, &scramble, &candidates),
            Some("beta")
        );
        let response = compute_auth_response("gamma", &scramble);
        assert_eq!(find_matching_password(&response, &scramble, &candidates), None);
    }

    #[test]
    fn test_caching_sha2_response_length() {
        let response = compute_caching_sha2_response("password", &[0x42u8; 20]);
        assert_eq!(response.len(), 32);
        assert!(compute_caching_sha2_response("", &[0x42u8; 20]).is_empty());
    }

    #[test]
    fn test_dispatch_by_plugin() {
        let scramble = [0x11u8; 20];
        assert_eq!(
            compute_auth_for_plugin(NATIVE_PASSWORD_PLUGIN, "pw", &scramble),
            compute_auth_response("pw", &scramble)
        );
        assert_eq!(
            compute_auth_for_plugin(CACHING_SHA2_PLUGIN, "pw", &scramble),
            compute_caching_sha2_response("pw", &scramble)
        );
        assert_eq!(
            compute_auth_for_plugin("sha256_password", "pw", &scramble),
            compute_auth_response("pw", &scramble)
        );
    }
}
