//! # Authentication Seam
//!
//! Credential verification is an external collaborator: the core invokes it
//! exactly once per session, during the `Connected → Authenticated`
//! transition, and otherwise knows nothing about token formats.

use std::collections::HashMap;

use crate::error::{ProtocolError, Result};

/// Verifies a client credential and resolves it to a player id.
///
/// Implementations typically wrap a JWT validator or an account service; the
/// core only needs this narrow contract.
pub trait Authenticator: Send + Sync {
    fn verify(&self, credential: &str) -> Result<u64>;
}

impl<F> Authenticator for F
where
    F: Fn(&str) -> Result<u64> + Send + Sync,
{
    fn verify(&self, credential: &str) -> Result<u64> {
        self(credential)
    }
}

/// Fixed token → player-id table.
///
/// Intended for tests and local development, not production credential
/// checking.
#[derive(Debug, Default)]
pub struct TokenTableAuthenticator {
    tokens: HashMap<String, u64>,
}

impl TokenTableAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: &str, player_id: u64) -> Self {
        self.tokens.insert(token.to_string(), player_id);
        self
    }
}

impl Authenticator for TokenTableAuthenticator {
    fn verify(&self, credential: &str) -> Result<u64> {
        self.tokens
            .get(credential)
            .copied()
            .ok_or_else(|| ProtocolError::AuthFailed("unknown token".into()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn token_table_resolves_known_tokens() {
        let auth = TokenTableAuthenticator::new()
            .with_token("tok-a", 1)
            .with_token("tok-b", 2);

        assert_eq!(auth.verify("tok-a").unwrap(), 1);
        assert_eq!(auth.verify("tok-b").unwrap(), 2);
        assert!(matches!(
            auth.verify("tok-c"),
            Err(ProtocolError::AuthFailed(_))
        ));
    }

    #[test]
    fn closures_are_authenticators() {
        let auth = |credential: &str| {
            credential
                .strip_prefix("player-")
                .and_then(|rest| rest.parse().ok())
                .ok_or_else(|| ProtocolError::AuthFailed("bad format".into()))
        };
        assert_eq!(auth.verify("player-42").unwrap(), 42);
        assert!(auth.verify("junk").is_err());
    }
}
