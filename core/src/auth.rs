//! Handshake authentication.
//!
//! The core never validates tokens itself. It asks an [`AuthGate`] for a
//! yes/no answer plus an optional identity and applies the relay's
//! `require_auth` policy to that answer.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::RelayError;

/// Credentials presented at handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token.
    pub token: Option<String>,
    /// API key.
    pub api_key: Option<String>,
}

impl Credentials {
    /// Returns true if no credential was presented.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.api_key.is_none()
    }
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Whether the credentials were accepted.
    pub authenticated: bool,
    /// Identity the credentials map to.
    pub identity: Option<String>,
}

impl AuthOutcome {
    /// Accepted credentials belonging to `identity`.
    #[must_use]
    pub fn authenticated(identity: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            identity: Some(identity.into()),
        }
    }

    /// Rejected or absent credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Decides whether handshake credentials are valid.
#[async_trait]
pub trait AuthGate: Send + Sync + std::fmt::Debug {
    /// Authenticates a set of credentials.
    async fn authenticate(&self, credentials: &Credentials) -> AuthOutcome;
}

/// Gate that accepts nobody; every connection is anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymous;

#[async_trait]
impl AuthGate for AllowAnonymous {
    async fn authenticate(&self, _credentials: &Credentials) -> AuthOutcome {
        AuthOutcome::anonymous()
    }
}

/// Gate backed by fixed token and API-key tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticTokenGate {
    tokens: HashMap<String, String>,
    api_keys: HashMap<String, String>,
}

impl StaticTokenGate {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a bearer token to an identity.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }

    /// Maps an API key to an identity.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>, identity: impl Into<String>) -> Self {
        self.api_keys.insert(key.into(), identity.into());
        self
    }

    /// Parses `token=identity` pairs separated by commas.
    ///
    /// # Errors
    ///
    /// Returns the offending entry if a pair has no `=`.
    pub fn parse_pairs(raw: &str) -> Result<HashMap<String, String>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| entry.to_string())
            })
            .collect()
    }

    /// Adds every token from a map.
    #[must_use]
    pub fn with_tokens(mut self, tokens: HashMap<String, String>) -> Self {
        self.tokens.extend(tokens);
        self
    }

    /// Adds every API key from a map.
    #[must_use]
    pub fn with_api_keys(mut self, keys: HashMap<String, String>) -> Self {
        self.api_keys.extend(keys);
        self
    }
}

#[async_trait]
impl AuthGate for StaticTokenGate {
    async fn authenticate(&self, credentials: &Credentials) -> AuthOutcome {
        let token = credentials
            .token
            .as_deref()
            .and_then(|t| self.tokens.get(t));
        let api_key = credentials
            .api_key
            .as_deref()
            .and_then(|k| self.api_keys.get(k));

        match token.or(api_key) {
            Some(identity) => AuthOutcome::authenticated(identity.clone()),
            None => AuthOutcome::anonymous(),
        }
    }
}

/// Applies the relay's auth policy to a handshake.
///
/// With `require_auth`, the handshake fails unless the gate authenticates
/// it. Without it, an authenticated identity wins over `claimed_user`, and an
/// unauthenticated connection keeps its claimed user id, if any.
///
/// # Errors
///
/// Returns [`RelayError::Authentication`] if authentication is required and
/// the gate rejects the credentials.
pub async fn admit(
    gate: &dyn AuthGate,
    credentials: &Credentials,
    claimed_user: Option<String>,
    require_auth: bool,
) -> Result<Option<String>, RelayError> {
    let outcome = if credentials.is_empty() {
        AuthOutcome::anonymous()
    } else {
        gate.authenticate(credentials).await
    };

    if outcome.authenticated {
        debug!(identity = outcome.identity.as_deref().unwrap_or("-"), "Handshake authenticated");
        return Ok(outcome.identity.or(claimed_user));
    }

    if require_auth {
        let reason = if credentials.is_empty() {
            "credentials required"
        } else {
            "invalid credentials"
        };
        return Err(RelayError::Authentication(reason.to_string()));
    }

    Ok(claimed_user)
}
