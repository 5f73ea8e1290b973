//! Bearer-token authentication for the practice API
//!
//! Tokens are random UUIDs handed to the clinician once; the config only keeps
//! their SHA-256 digests. A server with no accepted tokens rejects everything.

use crate::config::Config;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

pub const TOKEN_ENV: &str = "FLUENTFLOW_API_TOKEN";

/// Hex SHA-256 digest of a token
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Mint a fresh bearer token
pub fn generate_token() -> String {
    format!("ff_{}", Uuid::new_v4().simple())
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    accepted: HashSet<String>,
}

impl Authenticator {
    pub fn from_hashes<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: hashes
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Accept the hashes from config plus the token in FLUENTFLOW_API_TOKEN, if set
    pub fn from_config(config: &Config) -> Self {
        let mut auth = Self::from_hashes(config.auth.token_hashes.iter().cloned());
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                auth.accepted.insert(hash_token(token.trim()));
            }
        }
        auth
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Check an Authorization header value
    pub fn authorize(&self, header: Option<&str>) -> bool {
        header
            .and_then(bearer_token)
            .map(|token| self.accepted.contains(&hash_token(token)))
            .unwrap_or(false)
    }
}
