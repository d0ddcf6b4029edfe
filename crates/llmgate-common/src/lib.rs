use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults, validated once at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Stored as a hash (not plaintext).
    pub admin_key_hash: Option<String>,
    /// Catalog cache TTL in seconds.
    pub catalog_ttl_secs: u64,
    /// Per-attempt upstream timeout in seconds.
    pub upstream_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub admin_key_hash: Option<String>,
    pub catalog_ttl_secs: Option<u64>,
    pub upstream_timeout_secs: Option<u64>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.admin_key_hash.is_some() {
            self.admin_key_hash = other.admin_key_hash;
        }
        if other.catalog_ttl_secs.is_some() {
            self.catalog_ttl_secs = other.catalog_ttl_secs;
        }
        if other.upstream_timeout_secs.is_some() {
            self.upstream_timeout_secs = other.upstream_timeout_secs;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8000),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            admin_key_hash: self.admin_key_hash,
            catalog_ttl_secs: self.catalog_ttl_secs.unwrap_or(3600),
            upstream_timeout_secs: self.upstream_timeout_secs.unwrap_or(30),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            admin_key_hash: value.admin_key_hash,
            catalog_ttl_secs: Some(value.catalog_ttl_secs),
            upstream_timeout_secs: Some(value.upstream_timeout_secs),
        }
    }
}

/// Subscription tier. Determines fallback rate limits and plan quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Pro,
    Max,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Pro => "pro",
            Tier::Max => "max",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "basic" => Some(Tier::Basic),
            "pro" => Some(Tier::Pro),
            "max" => Some(Tier::Max),
            _ => None,
        }
    }
}

/// Per-user free-quota state. Users past their trial with no credits are
/// refused before any upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialState {
    pub active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub remaining_credits: f64,
}

impl TrialState {
    pub fn expired(&self, now: OffsetDateTime) -> bool {
        if !self.active {
            return true;
        }
        match self.expires_at {
            Some(at) => now >= at,
            None => false,
        }
    }
}

/// New v7 request/trace id, time-ordered for log correlation.
pub fn new_trace_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_overlay_prefers_latest() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".into()),
            dsn: Some("sqlite::memory:".into()),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9000),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.catalog_ttl_secs, 3600);
    }

    #[test]
    fn missing_dsn_is_an_error() {
        let err = GlobalConfigPatch::default().into_config().unwrap_err();
        assert!(matches!(err, GlobalConfigError::MissingField("dsn")));
    }

    #[test]
    fn trial_expiry() {
        let now = OffsetDateTime::now_utc();
        let live = TrialState { active: true, expires_at: Some(now + time::Duration::hours(1)), remaining_credits: 1.0 };
        let dead = TrialState { active: true, expires_at: Some(now - time::Duration::hours(1)), remaining_credits: 0.0 };
        assert!(!live.expired(now));
        assert!(dead.expired(now));
    }
}
