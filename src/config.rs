//! Configuration types for the voice chat core

use serde::{Deserialize, Serialize};

/// Main configuration for the voice chat session registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceChatConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Include loopback host candidates in ICE gathering
    ///
    /// Disabled by default; enable for in-process integration testing
    /// where both peers live on the same host.
    pub include_loopback_candidates: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for VoiceChatConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            include_loopback_candidates: false,
        }
    }
}

impl VoiceChatConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - a TURN server entry has an empty URL, username, or credential
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        for turn in &self.turn_servers {
            if turn.url.is_empty() {
                return Err(Error::InvalidConfig(
                    "TURN server URL cannot be empty".to_string(),
                ));
            }
            if turn.username.is_empty() || turn.credential.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    turn.url
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = VoiceChatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stun_servers.len(), 2);
        assert!(config.turn_servers.is_empty());
        assert!(!config.include_loopback_candidates);
    }

    #[test]
    fn test_empty_stun_servers_invalid() {
        let config = VoiceChatConfig {
            stun_servers: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_turn_server_requires_credentials() {
        let config = VoiceChatConfig {
            turn_servers: vec![TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: String::new(),
                credential: String::new(),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_turn_server() {
        let config = VoiceChatConfig {
            turn_servers: vec![TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = VoiceChatConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: VoiceChatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stun_servers, config.stun_servers);
    }
}
