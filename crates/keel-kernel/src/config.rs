use std::time::Duration;

use keel_types::validate;

pub const DOMAIN_ENV: &str = "KEEL_OPERATOR_DOMAIN";
pub const DEFAULT_PORT_ENV: &str = "KEEL_DEFAULT_PORT";
const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("KEEL_OPERATOR_DOMAIN environment variable is required")]
    MissingDomain,
    #[error("invalid domain format: {0} - domain must be a valid DNS name")]
    InvalidDomain(String),
    #[error("invalid default port: {0} - must be an integer between 1 and 65535")]
    InvalidPort(String),
}

/// Operator-wide settings handed to the engine and renderer at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Base domain under which default application hosts are generated.
    pub base_domain: String,
    pub default_port: u16,
    /// Delay before re-checking a cascade whose children are still going away.
    pub cascade_recheck: Duration,
    /// Delay before re-checking a state with no notification source, e.g. a
    /// certificate that has not reported yet.
    pub pending_recheck: Duration,
}

impl OperatorConfig {
    pub fn new(base_domain: impl Into<String>) -> Result<Self, ConfigError> {
        let base_domain = base_domain.into();
        if base_domain.is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        if !validate::is_valid_dns_name(&base_domain) {
            return Err(ConfigError::InvalidDomain(base_domain));
        }
        Ok(Self {
            base_domain,
            default_port: DEFAULT_PORT,
            cascade_recheck: Duration::from_secs(5),
            pending_recheck: Duration::from_secs(30),
        })
    }

    pub fn with_default_port(mut self, port: u16) -> Result<Self, ConfigError> {
        if !validate::is_valid_port(u32::from(port)) {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }
        self.default_port = port;
        Ok(self)
    }

    /// Load from `KEEL_OPERATOR_DOMAIN` and `KEEL_DEFAULT_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let domain = lookup(DOMAIN_ENV).unwrap_or_default();
        let config = Self::new(domain)?;
        match lookup(DEFAULT_PORT_ENV).filter(|v| !v.is_empty()) {
            None => Ok(config),
            Some(raw) => {
                let port: u32 = raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw.clone()))?;
                if !validate::is_valid_port(port) {
                    return Err(ConfigError::InvalidPort(raw));
                }
                config.with_default_port(port as u16)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn domain_is_required() {
        assert_eq!(OperatorConfig::from_lookup(lookup(&[])), Err(ConfigError::MissingDomain));
    }

    #[test]
    fn domain_must_be_dns() {
        let err = OperatorConfig::from_lookup(lookup(&[(DOMAIN_ENV, "Apps_Example")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDomain(_)));
    }

    #[test]
    fn port_defaults_and_validates() {
        let config = OperatorConfig::from_lookup(lookup(&[(DOMAIN_ENV, "apps.example.com")])).unwrap();
        assert_eq!(config.default_port, 3000);

        let config =
            OperatorConfig::from_lookup(lookup(&[(DOMAIN_ENV, "apps.example.com"), (DEFAULT_PORT_ENV, "8080")]))
                .unwrap();
        assert_eq!(config.default_port, 8080);

        for bad in ["0", "70000", "eighty"] {
            let err = OperatorConfig::from_lookup(lookup(&[(DOMAIN_ENV, "apps.example.com"), (DEFAULT_PORT_ENV, bad)]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidPort(_)), "{bad}");
        }
    }
}
