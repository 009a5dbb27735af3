use std::time::Duration;

use crate::util::errors::{Error, Result, StdError};

pub const DEFAULT_STORE_FAILURE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "matrixone-operator";
pub const DEFAULT_ARGS_CONFIGMAP: &str = "matrixone-operator-cm";

/// Process-wide operator settings, read from the environment once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// How long a log service store may stay failed before it is replaced, unless the cluster
    /// sets its own timeout.
    pub store_failure_timeout: Duration,
    /// Readiness gates added to every generated pod, for in-place update controllers.
    pub readiness_gates: Vec<String>,
    /// Namespace the operator runs in.
    pub namespace: String,
    pub default_args_configmap: String,
    /// Periodic resync when nothing changes.
    pub requeue_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            store_failure_timeout: DEFAULT_STORE_FAILURE_TIMEOUT,
            readiness_gates: Vec::new(),
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            default_args_configmap: DEFAULT_ARGS_CONFIGMAP.to_string(),
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup("MO_STORE_FAILURE_TIMEOUT") {
            config.store_failure_timeout = parse_duration("MO_STORE_FAILURE_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("MO_REQUEUE_INTERVAL") {
            config.requeue_interval = parse_duration("MO_REQUEUE_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("MO_READINESS_GATES") {
            config.readiness_gates = raw
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ns) = lookup("MO_OPERATOR_NAMESPACE").filter(|ns| !ns.is_empty()) {
            config.namespace = ns;
        }
        if let Some(name) = lookup("MO_DEFAULT_ARGS_CONFIGMAP").filter(|n| !n.is_empty()) {
            config.default_args_configmap = name;
        }
        Ok(config)
    }
}

pub fn parse_duration(field: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| Error::StdError(StdError::InvalidArgument(format!("{field}: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_environment() {
        let config = OperatorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let env = HashMap::from([
            ("MO_STORE_FAILURE_TIMEOUT", "2m"),
            ("MO_READINESS_GATES", "InPlaceUpdateReady, ,custom"),
            ("MO_OPERATOR_NAMESPACE", "mo-system"),
        ]);
        let config = OperatorConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.store_failure_timeout, Duration::from_secs(120));
        assert_eq!(config.readiness_gates, vec!["InPlaceUpdateReady", "custom"]);
        assert_eq!(config.namespace, "mo-system");
        assert_eq!(config.default_args_configmap, DEFAULT_ARGS_CONFIGMAP);
    }

    #[test]
    fn rejects_bad_duration() {
        let err = OperatorConfig::from_lookup(|k| (k == "MO_STORE_FAILURE_TIMEOUT").then(|| "soon".to_string()));
        assert!(err.is_err());
    }
}
