//! Tunable limits for publish, cascade and the version counter.

use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;

/// Writes a publish plans per item: the version move and the live record.
pub const PUBLISH_WRITES_PER_ITEM: usize = 2;
/// Writes a publish plans once: the ChangeSet and its audit entry.
pub const PUBLISH_TAIL_WRITES: usize = 2;

/// Upper bound on the writes one publish of `items` items commits.
pub fn publish_write_bound(items: usize) -> usize {
    items
        .saturating_mul(PUBLISH_WRITES_PER_ITEM)
        .saturating_add(PUBLISH_TAIL_WRITES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Most items a single ChangeSet may publish.
    pub max_publish_items: usize,
    /// Write limit of one atomic store commit. Must hold a full publish of
    /// `max_publish_items`.
    pub store_batch_limit: usize,
    /// Deletes per cascade chunk.
    pub cascade_chunk_size: usize,
    pub publish_timeout_ms: u64,
    pub cascade_timeout_ms: u64,
    /// CAS attempts on the per-entity version counter before `Conflict`.
    pub version_counter_max_retries: u32,
    pub bootstrap_max_attempts: u32,
    pub bootstrap_window_secs: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_publish_items: 450,
            store_batch_limit: 1000,
            cascade_chunk_size: 450,
            publish_timeout_ms: 30_000,
            cascade_timeout_ms: 120_000,
            version_counter_max_retries: 8,
            bootstrap_max_attempts: 3,
            bootstrap_window_secs: 900,
        }
    }
}

impl GovernanceConfig {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        let positive = [
            ("max_publish_items", self.max_publish_items),
            ("store_batch_limit", self.store_batch_limit),
            ("cascade_chunk_size", self.cascade_chunk_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(GovernanceError::InvalidArgument(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.store_batch_limit < 2 {
            return Err(GovernanceError::InvalidArgument(
                "store_batch_limit must leave room for an audit write".into(),
            ));
        }
        let publish_writes = publish_write_bound(self.max_publish_items);
        if publish_writes > self.store_batch_limit {
            return Err(GovernanceError::InvalidArgument(format!(
                "a publish of max_publish_items ({}) needs {} writes, store_batch_limit is {}",
                self.max_publish_items, publish_writes, self.store_batch_limit
            )));
        }
        if self.publish_timeout_ms == 0 || self.cascade_timeout_ms == 0 {
            return Err(GovernanceError::InvalidArgument(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.version_counter_max_retries == 0 {
            return Err(GovernanceError::InvalidArgument(
                "version_counter_max_retries must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn publish_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn cascade_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cascade_timeout_ms)
    }

    pub fn bootstrap_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.bootstrap_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = GovernanceConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_publish_items, 450);
        assert_eq!(cfg.store_batch_limit, 1000);
        assert!(publish_write_bound(cfg.max_publish_items) <= cfg.store_batch_limit);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: GovernanceConfig =
            serde_json::from_value(serde_json::json!({"max_publish_items": 10})).unwrap();
        assert_eq!(cfg.max_publish_items, 10);
        assert_eq!(cfg.cascade_chunk_size, 450);
    }

    #[test]
    fn rejects_zero_limits() {
        let cfg = GovernanceConfig {
            cascade_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(GovernanceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_publish_limit_above_store_limit() {
        let cfg = GovernanceConfig {
            max_publish_items: 600,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn store_limit_must_hold_a_full_publish() {
        // 450 items plan 902 writes.
        let tight = GovernanceConfig {
            store_batch_limit: 901,
            ..Default::default()
        };
        assert!(matches!(
            tight.validate(),
            Err(GovernanceError::InvalidArgument(_))
        ));
        let exact = GovernanceConfig {
            store_batch_limit: 902,
            ..Default::default()
        };
        assert!(exact.validate().is_ok());
    }
}
