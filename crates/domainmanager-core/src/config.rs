//! Configuration types for the domain manager
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

use crate::traits::HandlerShape;
use crate::traits::event_source::{DEFAULT_GATE_LABEL, DEFAULT_GATE_VALUE, DEFAULT_HOSTNAME_LABEL};

/// Main domain manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainManagerConfig {
    /// Providers in registration order; the first responsible one wins
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl DomainManagerConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    /// Validate the configuration
    ///
    /// An empty provider list is valid: the manager then only observes.
    pub fn validate(&self) -> Result<(), crate::Error> {
        for provider in &self.providers {
            provider.validate()?;
        }
        self.engine.validate()
    }
}

/// DNS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider (single-record API)
    Cloudflare {
        /// Scoped API token (preferred)
        #[serde(default)]
        api_token: Option<String>,
        /// Account email for legacy global API key auth
        #[serde(default)]
        api_email: Option<String>,
        /// Legacy global API key
        #[serde(default)]
        api_key: Option<String>,
        /// Perform reads but only log mutations
        #[serde(default)]
        dry_run: bool,
    },

    /// AWS Route53 provider (grouped record sets)
    Route53 {
        /// Access key id of a static IAM credential
        access_key_id: String,
        /// Secret access key of that credential
        secret_access_key: String,
        /// AWS region the API client is configured for
        #[serde(default = "default_route53_region")]
        region: String,
        /// Perform reads but only log mutations
        #[serde(default)]
        dry_run: bool,
    },

    /// In-memory handler
    Memory {
        /// Handler name used in logs
        #[serde(default = "default_memory_name")]
        name: String,
        /// Update model to emulate
        #[serde(default)]
        shape: HandlerShape,
        /// Zones owned by this handler; empty means all
        #[serde(default)]
        zones: Vec<String>,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare {
                api_token,
                api_email,
                api_key,
                ..
            } => {
                let has_token = api_token.as_ref().is_some_and(|t| !t.is_empty());
                let has_key = api_email.as_ref().is_some_and(|e| !e.is_empty())
                    && api_key.as_ref().is_some_and(|k| !k.is_empty());
                if !has_token && !has_key {
                    return Err(crate::Error::config(
                        "Cloudflare requires an API token or an API email and key",
                    ));
                }
                Ok(())
            }
            ProviderConfig::Route53 {
                access_key_id,
                secret_access_key,
                region,
                ..
            } => {
                if access_key_id.is_empty() || secret_access_key.is_empty() {
                    return Err(crate::Error::config(
                        "Route53 requires an access key id and a secret access key",
                    ));
                }
                if region.is_empty() {
                    return Err(crate::Error::config("Route53 region cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Memory { name, zones, .. } => {
                if name.is_empty() {
                    return Err(crate::Error::config("Memory handler name cannot be empty"));
                }
                if let Some(zone) = zones.iter().find(|z| z.split('.').count() != 2) {
                    return Err(crate::Error::config(format!(
                        "Memory handler zone must have exactly two labels: {}",
                        zone
                    )));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Route53 { .. } => "route53",
            ProviderConfig::Memory { .. } => "memory",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Region used when a Route53 provider names none
pub const DEFAULT_ROUTE53_REGION: &str = "eu-central-1";

fn default_route53_region() -> String {
    DEFAULT_ROUTE53_REGION.to_string()
}

fn default_memory_name() -> String {
    "memory".to_string()
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the monitoring event channel
    ///
    /// When full, events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Label a node must carry to be managed
    #[serde(default = "default_gate_label")]
    pub gate_label: String,

    /// Required value of the gate label
    #[serde(default = "default_gate_value")]
    pub gate_value: String,

    /// Label holding the resolvable hostname of a node
    #[serde(default = "default_hostname_label")]
    pub hostname_label: String,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.gate_label.is_empty() || self.hostname_label.is_empty() {
            return Err(crate::Error::config("Gate and hostname labels cannot be empty"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            gate_label: default_gate_label(),
            gate_value: default_gate_value(),
            hostname_label: default_hostname_label(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_gate_label() -> String {
    DEFAULT_GATE_LABEL.to_string()
}

fn default_gate_value() -> String {
    DEFAULT_GATE_VALUE.to_string()
}

fn default_hostname_label() -> String {
    DEFAULT_HOSTNAME_LABEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid_observer() {
        let config = DomainManagerConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.gate_label, "domainmanager.deinstapel.de");
    }

    #[test]
    fn test_cloudflare_requires_credentials() {
        let missing = ProviderConfig::Cloudflare {
            api_token: None,
            api_email: Some("ops@example.com".to_string()),
            api_key: None,
            dry_run: false,
        };
        assert!(missing.validate().is_err());

        let legacy = ProviderConfig::Cloudflare {
            api_token: None,
            api_email: Some("ops@example.com".to_string()),
            api_key: Some("key".to_string()),
            dry_run: false,
        };
        assert!(legacy.validate().is_ok());
    }

    #[test]
    fn test_route53_config_defaults_and_validation() {
        let json = r#"{"type":"route53","access_key_id":"AKIAEXAMPLE","secret_access_key":"secret"}"#;
        let config: ProviderConfig = serde_json::from_str(json).unwrap();

        match &config {
            ProviderConfig::Route53 { region, dry_run, .. } => {
                assert_eq!(region, "eu-central-1");
                assert!(!dry_run);
            }
            other => panic!("unexpected provider {:?}", other),
        }
        assert_eq!(config.type_name(), "route53");
        assert!(config.validate().is_ok());

        let missing_secret = ProviderConfig::Route53 {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: String::new(),
            region: "eu-central-1".to_string(),
            dry_run: false,
        };
        assert!(missing_secret.validate().is_err());
    }

    #[test]
    fn test_provider_config_from_json() {
        let json = r#"{"providers":[{"type":"memory","shape":"grouped","zones":["example.com"]}]}"#;
        let config: DomainManagerConfig = serde_json::from_str(json).unwrap();

        match &config.providers[0] {
            ProviderConfig::Memory { name, shape, zones } => {
                assert_eq!(name, "memory");
                assert_eq!(*shape, HandlerShape::Grouped);
                assert_eq!(zones, &vec!["example.com".to_string()]);
            }
            other => panic!("unexpected provider {:?}", other),
        }
        assert_eq!(config.providers[0].type_name(), "memory");
        assert_eq!(config.engine.event_channel_capacity, 1000);
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let mut config = DomainManagerConfig::new();
        config.engine.event_channel_capacity = 0;
        tokio_test::assert_err!(config.validate());
    }
}
