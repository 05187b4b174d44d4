//! Handshake parameters shared by both transports.

use serde::Deserialize;

use crate::auth::Credentials;

/// Query parameters accepted on a socket or stream handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HandshakeParams {
    /// Bearer token.
    pub token: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Claimed user id, honoured only when auth is not required.
    pub user_id: Option<String>,
    /// Comma-separated channels to subscribe to on connect.
    pub channels: Option<String>,
    /// Resume point for stream reconnects.
    pub last_event_id: Option<String>,
}

impl HandshakeParams {
    /// Returns the requested channels, trimmed and without empties.
    #[must_use]
    pub fn channel_list(&self) -> Vec<String> {
        self.channels
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the presented credentials.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone().filter(|t| !t.is_empty()),
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
        }
    }

    /// Sets the resume point unless one was given in the query.
    #[must_use]
    pub fn with_last_event_id(mut self, last_event_id: Option<String>) -> Self {
        if self.last_event_id.is_none() {
            self.last_event_id = last_event_id;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_list() {
        let params = HandshakeParams {
            channels: Some(" news, ,sports ,".into()),
            ..Default::default()
        };
        assert_eq!(params.channel_list(), vec!["news", "sports"]);
        assert!(HandshakeParams::default().channel_list().is_empty());
    }

    #[test]
    fn test_credentials_ignore_empty() {
        let params = HandshakeParams {
            token: Some(String::new()),
            api_key: Some("k".into()),
            ..Default::default()
        };
        let creds = params.credentials();
        assert!(creds.token.is_none());
        assert_eq!(creds.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_query_last_event_id_wins() {
        let params = HandshakeParams {
            last_event_id: Some("q".into()),
            ..Default::default()
        }
        .with_last_event_id(Some("header".into()));
        assert_eq!(params.last_event_id.as_deref(), Some("q"));

        let params = HandshakeParams::default().with_last_event_id(Some("header".into()));
        assert_eq!(params.last_event_id.as_deref(), Some("header"));
    }
}
