//! Orchestrator configuration.

use std::time::Duration;

use vget_models::HostPattern;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host patterns accepted at submit; empty accepts any host
    pub allowed_hosts: Vec<HostPattern>,
    /// Default attempt ceiling for new jobs
    pub max_attempts: u32,
    /// Informational completion estimate returned at submit
    pub estimated_duration: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            max_attempts: 3,
            estimated_duration: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allowed_hosts: std::env::var("ALLOWED_HOSTS")
                .map(|raw| {
                    raw.split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(HostPattern::parse)
                        .collect()
                })
                .unwrap_or(defaults.allowed_hosts),
            max_attempts: std::env::var("MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            estimated_duration: defaults.estimated_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert!(config.allowed_hosts.is_empty());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.estimated_duration, Duration::from_secs(300));
    }
}
