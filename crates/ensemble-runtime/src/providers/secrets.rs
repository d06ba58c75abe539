//! Credential handling for provider API keys.
//!
//! Keys are wrapped in [`SecretString`] the moment they are read, so they
//! cannot reach logs through `Debug`/`Display`, and are zeroed on drop.
//! Providers call [`ApiCredential::expose`] only where the HTTP header is set.
//!
//! ## Usage
//!
//! ```ignore
//! // Config key first, environment variable as fallback
//! let cred = ApiCredential::from_config_or_env(&config, "api_key", "OPENROUTER_API_KEY", "OpenRouter API key")?;
//!
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `provider_config` in the run file
    Config,
    /// Environment variable
    Environment,
    /// Passed in by code
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A provider API key that redacts itself.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read `config[config_key]`, then `env_var`. Empty strings count as unset.
    pub fn lookup(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Option<Self> {
        if let Some(value) = config[config_key].as_str().filter(|v| !v.is_empty()) {
            return Some(Self::new(value, CredentialSource::Config, name));
        }

        std::env::var(env_var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| Self::new(v, CredentialSource::Environment, name))
    }

    /// Like [`lookup`](Self::lookup), but a missing key is an error.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::lookup(config, config_key, env_var, name).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "{} required: set '{}' in provider_config or {} environment variable",
                name, config_key, env_var
            ))
        })
    }

    /// Check availability without keeping the value around.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        Self::lookup(config, config_key, env_var, "credential").is_some()
    }

    /// The raw key. Call only at the point of use; never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {}): [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_redact() {
        let secret = "sk-or-v1-super-secret";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "OpenRouter API key");

        let debug = format!("{:?}", cred);
        let display = format!("{}", cred);
        assert!(!debug.contains(secret));
        assert!(!display.contains(secret));
        assert!(debug.contains("[REDACTED]"));
        assert!(display.contains("programmatic"));
        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_config_wins_over_env() {
        let config = serde_json::json!({"api_key": "from-config"});
        let cred =
            ApiCredential::from_config_or_env(&config, "api_key", "ENSEMBLE_TEST_UNSET_KEY_1", "key")
                .unwrap();
        assert_eq!(cred.expose(), "from-config");
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_env_fallback() {
        std::env::set_var("ENSEMBLE_TEST_KEY_2", "from-env");
        let cred = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "ENSEMBLE_TEST_KEY_2",
            "key",
        )
        .unwrap();
        assert_eq!(cred.expose(), "from-env");
        assert_eq!(cred.source(), CredentialSource::Environment);
        std::env::remove_var("ENSEMBLE_TEST_KEY_2");
    }

    #[test]
    fn test_missing_and_empty_are_not_configured() {
        let config = serde_json::json!({"api_key": ""});
        let result =
            ApiCredential::from_config_or_env(&config, "api_key", "ENSEMBLE_TEST_UNSET_KEY_3", "Test key");
        match result {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("Test key"));
                assert!(msg.contains("ENSEMBLE_TEST_UNSET_KEY_3"));
            }
            other => panic!("Expected NotConfigured, got {:?}", other),
        }
        assert!(!ApiCredential::is_available(&config, "api_key", "ENSEMBLE_TEST_UNSET_KEY_3"));
    }
}
