//! Challenge-response and token authentication.
//!
//! A client asks for a nonce, then sends `user\0digest` where
//! `digest = SHA1(nonce ++ password_hash(user, password))`. The password hash is
//! what the database stores, so the password itself never crosses the wire.
//!
//! An authenticated client can also ask for a token and hand it to another
//! connection, which may redeem it exactly once in place of a password.
use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use rand::{RngCore, thread_rng};
use sha1::{Digest, Sha1};

pub const NONCE_SIZE: usize = 8;
pub const TOKEN_SIZE: usize = 16;

pub fn nonce() -> Vec<u8> {
    let mut nonce = vec![0; NONCE_SIZE];
    thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Lowercase hex SHA1 of `user ++ password`.
pub fn password_hash(user: &str, password: &str) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(user.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .into_bytes()
}

pub fn digest(nonce: &[u8], password_hash: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(password_hash);
    hasher.finalize().into()
}

/// Checks a client digest against the stored hash.
pub fn verify(nonce: &[u8], password_hash: &[u8], client_digest: &[u8]) -> bool {
    constant_time_eq(&digest(nonce, password_hash), client_digest)
}

/// Splits AUTH data of the `user\0digest` form.
pub fn split_credentials(data: &[u8]) -> Option<(&str, &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    let user = std::str::from_utf8(&data[..nul]).ok()?;
    if user.is_empty() {
        return None;
    }
    Some((user, &data[nul + 1..]))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Outstanding single-use tokens, shared by all connections.
#[derive(Debug, Default)]
pub struct TokenSet {
    tokens: Mutex<HashSet<[u8; TOKEN_SIZE]>>,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a token that is neither all zeros nor already outstanding.
    pub fn issue(&self) -> [u8; TOKEN_SIZE] {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = thread_rng();
        loop {
            let mut token = [0; TOKEN_SIZE];
            rng.fill_bytes(&mut token);
            if token != [0; TOKEN_SIZE] && tokens.insert(token) {
                return token;
            }
        }
    }

    /// Removes `token` if it is outstanding. Only one caller can succeed per token.
    pub fn redeem(&self, token: &[u8]) -> bool {
        let Ok(token) = <[u8; TOKEN_SIZE]>::try_from(token) else {
            return false;
        };
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
    }

    pub fn len(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn password_hash_is_lowercase_hex() {
        let hash = password_hash("admin", "secret");
        assert_eq!(hash.len(), 40);
        assert!(hash.iter().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)));
        assert_ne!(hash, password_hash("admin", "Secret"));
    }

    #[test]
    fn digest_round_trip() {
        let nonce = nonce();
        let hash = password_hash("admin", "secret");
        let client = digest(&nonce, &hash);

        assert!(verify(&nonce, &hash, &client));
        assert!(!verify(&nonce, &password_hash("admin", "wrong"), &client));
        assert!(!verify(&[0; NONCE_SIZE], &hash, &client));
        assert!(!verify(&nonce, &hash, &client[..19]));
    }

    #[test]
    fn credentials_split_on_first_nul() {
        let mut data = b"admin\0".to_vec();
        data.extend_from_slice(&[0, 1, 2]);
        assert_eq!(split_credentials(&data), Some(("admin", &[0_u8, 1, 2][..])));
        assert_eq!(split_credentials(b"no separator"), None);
        assert_eq!(split_credentials(b"\0digest"), None);
    }

    #[test]
    fn tokens_are_single_use() {
        let tokens = TokenSet::new();
        let token = tokens.issue();

        assert_ne!(token, [0; TOKEN_SIZE]);
        assert!(tokens.redeem(&token));
        assert!(!tokens.redeem(&token));
        assert!(!tokens.redeem(&[0; TOKEN_SIZE]));
        assert!(!tokens.redeem(&token[..8]));
    }

    #[test]
    fn concurrent_redeem_has_one_winner() {
        let tokens = Arc::new(TokenSet::new());
        let token = tokens.issue();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tokens = Arc::clone(&tokens);
                thread::spawn(move || tokens.redeem(&token))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(tokens.is_empty());
    }
}
