//! Endpoint configuration for one sync client.

use ffb_shared::{DEFAULT_GATEWAY_URL, DEFAULT_MATCHMAKER_URL};
use serde::{Deserialize, Serialize};
use url::Url;

pub const ENV_MATCHMAKER_URL: &str = "FFB_MATCHMAKER_URL";
pub const ENV_GATEWAY_URL: &str = "FFB_GATEWAY_URL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field} url {value:?}: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("{field} url {value:?} must be an http or https base url")]
    UnsupportedScheme { field: &'static str, value: String },
}

/// Capability object handed over by the desktop shell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShellCapabilities {
    #[serde(default)]
    pub api_host_matchmaker: Option<String>,
    #[serde(default)]
    pub api_host_gateway: Option<String>,
}

/// Base URLs of the two services a sync client talks to.
///
/// Values are validated on construction and stored without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    matchmaker: String,
    gateway: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            matchmaker: DEFAULT_MATCHMAKER_URL.to_string(),
            gateway: DEFAULT_GATEWAY_URL.to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn new(matchmaker: &str, gateway: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            matchmaker: parse_base("matchmaker", matchmaker)?,
            gateway: parse_base("gateway", gateway)?,
        })
    }

    pub fn matchmaker(&self) -> &str {
        &self.matchmaker
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    /// Read overrides from the environment.
    ///
    /// Environment variables:
    /// - `FFB_MATCHMAKER_URL` (default: "http://localhost:8081")
    /// - `FFB_GATEWAY_URL` (default: "http://localhost:8080")
    ///
    /// A malformed value is logged and the default kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_MATCHMAKER_URL) {
            config.matchmaker = or_default("matchmaker", &value, DEFAULT_MATCHMAKER_URL);
        }
        if let Some(value) = lookup(ENV_GATEWAY_URL) {
            config.gateway = or_default("gateway", &value, DEFAULT_GATEWAY_URL);
        }
        config
    }

    /// Build from the shell's capability object, degrading to the local
    /// defaults when it is absent or a field is unusable.
    pub fn from_shell(caps: Option<&ShellCapabilities>) -> Self {
        let Some(caps) = caps else {
            tracing::warn!("desktop shell capabilities missing, using default endpoints");
            return Self::default();
        };
        let matchmaker = caps
            .api_host_matchmaker
            .as_deref()
            .map(|v| or_default("matchmaker", v, DEFAULT_MATCHMAKER_URL))
            .unwrap_or_else(|| DEFAULT_MATCHMAKER_URL.to_string());
        let gateway = caps
            .api_host_gateway
            .as_deref()
            .map(|v| or_default("gateway", v, DEFAULT_GATEWAY_URL))
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        Self {
            matchmaker,
            gateway,
        }
    }
}

fn or_default(field: &'static str, value: &str, default: &str) -> String {
    match parse_base(field, value) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring {} url, using {}", field, default);
            default.to_string()
        }
    }
}

fn parse_base(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    let url = Url::parse(trimmed).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::UnsupportedScheme {
            field,
            value: value.to_string(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_local_services() {
        let config = EndpointConfig::default();
        assert_eq!(config.matchmaker(), "http://localhost:8081");
        assert_eq!(config.gateway(), "http://localhost:8080");
    }

    #[test]
    fn new_validates_and_trims() {
        let config = EndpointConfig::new(" http://mm.local:9001/ ", "https://gw.local").unwrap();
        assert_eq!(config.matchmaker(), "http://mm.local:9001");
        assert_eq!(config.gateway(), "https://gw.local");

        assert!(matches!(
            EndpointConfig::new("not a url", "http://gw"),
            Err(ConfigError::InvalidUrl { field: "matchmaker", .. })
        ));
        assert!(matches!(
            EndpointConfig::new("http://mm", "ftp://gw"),
            Err(ConfigError::UnsupportedScheme { field: "gateway", .. })
        ));
    }

    #[test]
    fn env_overrides_and_bad_values_keep_default() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_MATCHMAKER_URL, "http://10.0.0.5:8081"),
            (ENV_GATEWAY_URL, "::garbage::"),
        ]);
        let config = EndpointConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.matchmaker(), "http://10.0.0.5:8081");
        assert_eq!(config.gateway(), DEFAULT_GATEWAY_URL);
    }

    #[test]
    fn missing_shell_degrades_to_defaults() {
        assert_eq!(EndpointConfig::from_shell(None), EndpointConfig::default());
    }

    #[test]
    fn shell_capabilities_decode_camel_case() {
        let caps: ShellCapabilities = serde_json::from_str(
            r#"{"apiHostMatchmaker":"http://rig:8081","apiHostGateway":"http://rig:8080"}"#,
        )
        .unwrap();
        let config = EndpointConfig::from_shell(Some(&caps));
        assert_eq!(config.matchmaker(), "http://rig:8081");
        assert_eq!(config.gateway(), "http://rig:8080");
    }

    #[test]
    fn partial_shell_fills_in_defaults() {
        let caps = ShellCapabilities {
            api_host_matchmaker: Some("http://rig:8081".into()),
            api_host_gateway: None,
        };
        let config = EndpointConfig::from_shell(Some(&caps));
        assert_eq!(config.matchmaker(), "http://rig:8081");
        assert_eq!(config.gateway(), DEFAULT_GATEWAY_URL);
    }
}
