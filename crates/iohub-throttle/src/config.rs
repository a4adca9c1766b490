//! Allocation configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::DEFAULT_PERIOD;
use crate::error::Result;
use crate::gate::ThrottleGate;
use crate::registry::{Allocation, QuotaRegistry};
use crate::Identity;

/// One configured uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// The uid.
    pub uid: Identity,
    /// Bytes per period.
    pub bytes: u64,
}

/// Throttler settings as read from a config file.
///
/// Fields missing from the file keep their [`Default`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Length of one throttling period, in seconds.
    pub period_secs: u64,
    /// Bytes per period for every uid not listed in `allocations`.
    pub fallback_bytes: u64,
    /// Per-uid allocations.
    pub allocations: Vec<AllocationConfig>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_PERIOD.as_secs(),
            fallback_bytes: 5_242_880,
            allocations: vec![
                AllocationConfig {
                    uid: 1014,
                    bytes: 262_144_000,
                },
                AllocationConfig {
                    uid: 1015,
                    bytes: 5_242_880,
                },
            ],
        }
    }
}

impl ThrottleConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ThrottleConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ThrottleConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Period length.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Configured allocations followed by the fallback entry.
    pub fn to_allocations(&self) -> Vec<Allocation> {
        self.allocations
            .iter()
            .map(|a| Allocation::new(a.uid, a.bytes))
            .chain(std::iter::once(Allocation::fallback(self.fallback_bytes)))
            .collect()
    }

    /// Build the registry and a gate on the monotonic clock.
    pub fn build_gate(&self) -> Result<ThrottleGate> {
        let registry = Arc::new(QuotaRegistry::new(self.to_allocations())?);
        ThrottleGate::new(registry, self.period())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottleError;
    use crate::UNKNOWN_IDENTITY;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ThrottleConfig::default();
        assert_eq!(config.period(), Duration::from_secs(5));
        assert_eq!(config.fallback_bytes, 5242880);
        assert_eq!(config.allocations.len(), 2);
        assert_eq!(config.allocations[0].uid, 1014);
        assert_eq!(config.allocations[0].bytes, 262144000);
    }

    #[test]
    fn test_to_allocations_appends_fallback() {
        let allocs = ThrottleConfig::default().to_allocations();
        assert_eq!(allocs.len(), 3);
        let last = allocs.last().unwrap();
        assert_eq!(last.identity, UNKNOWN_IDENTITY);
        assert_eq!(last.full_quota_bytes, 5242880);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
period_secs = 2
fallback_bytes = 1000

[[allocations]]
uid = 1000
bytes = 4096

[[allocations]]
uid = 1001
bytes = 8192
            "#
        )
        .unwrap();

        let config = ThrottleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.period_secs, 2);
        assert_eq!(config.fallback_bytes, 1000);
        assert_eq!(
            config.allocations,
            vec![
                AllocationConfig {
                    uid: 1000,
                    bytes: 4096
                },
                AllocationConfig {
                    uid: 1001,
                    bytes: 8192
                },
            ]
        );
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"fallback_bytes": 64, "allocations": [{{"uid": 7, "bytes": 128}}]}}"#
        )
        .unwrap();

        let config = ThrottleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.period_secs, 5);
        assert_eq!(config.fallback_bytes, 64);
        assert_eq!(config.allocations, vec![AllocationConfig { uid: 7, bytes: 128 }]);
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "period_secs: 5").unwrap();
        assert!(ThrottleConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let path = Path::new("/nonexistent/iohub.toml");
        assert!(ThrottleConfig::from_file(path).is_err());
    }

    #[test]
    fn test_build_gate_from_default() {
        let gate = ThrottleConfig::default().build_gate().unwrap();
        assert_eq!(gate.registry().lookup(1014).full_quota_bytes, 262144000);
        assert_eq!(gate.registry().lookup(4242).full_quota_bytes, 5242880);
        assert_eq!(gate.clock().period_length(), Duration::from_secs(5));
    }

    #[test]
    fn test_build_gate_zero_period() {
        let config = ThrottleConfig {
            period_secs: 0,
            ..ThrottleConfig::default()
        };
        assert!(matches!(
            config.build_gate(),
            Err(ThrottleError::InvalidPeriod)
        ));
    }

    #[test]
    fn test_build_gate_duplicate_uid() {
        let config = ThrottleConfig {
            allocations: vec![
                AllocationConfig { uid: 1, bytes: 1 },
                AllocationConfig { uid: 1, bytes: 2 },
            ],
            ..ThrottleConfig::default()
        };
        assert!(matches!(
            config.build_gate(),
            Err(ThrottleError::DuplicateIdentity { identity: 1 })
        ));
    }

    #[test]
    fn test_explicit_unknown_uid_collides_with_fallback() {
        let config = ThrottleConfig {
            allocations: vec![AllocationConfig {
                uid: UNKNOWN_IDENTITY,
                bytes: 1,
            }],
            ..ThrottleConfig::default()
        };
        assert!(config.build_gate().is_err());
    }
}
