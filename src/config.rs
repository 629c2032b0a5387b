use std::collections::HashMap;

use thiserror::Error;

/// A property value that could not be parsed into the expected type.
#[derive(Debug, Error)]
#[error("invalid value {value:?} for property {key}")]
pub struct ConfigError {
    key: String,
    value: String,
}

/// Startup parameters for the buffer pool.
///
/// The property-key names accepted by [`PoolConfig::from_properties`] mirror
/// the keys `<prefix>.LRU_K`, `<prefix>.CRT` and `<prefix>.RIT` found in
/// existing deployment files, so a pool can be configured from the same
/// properties those installations already ship.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of frames in the pool.
    pub buffer_count: usize,
    /// How many reference timestamps the replacement policy retains per block.
    pub lru_k: usize,
    /// Correlated reference period in milliseconds. References closer together
    /// than this are folded into one logical access.
    pub crt_ms: u64,
    /// Retained information period in milliseconds. History for blocks
    /// unreferenced longer than this is dropped by the out-of-band sweep.
    pub rit_ms: u64,
    /// Number of lock stripes serializing same-identity pins. Prime.
    pub anchor_stripes: usize,
}

impl PoolConfig {
    pub const DEFAULT_LRU_K: usize = 2;
    pub const DEFAULT_CRT_MS: u64 = 100_000;
    pub const DEFAULT_RIT_MS: u64 = 200_000;
    pub const DEFAULT_ANCHOR_STRIPES: usize = 1009;

    pub fn new(buffer_count: usize) -> Self {
        assert!(buffer_count > 0, "buffer pool must hold at least one frame");
        Self {
            buffer_count,
            lru_k: Self::DEFAULT_LRU_K,
            crt_ms: Self::DEFAULT_CRT_MS,
            rit_ms: Self::DEFAULT_RIT_MS,
            anchor_stripes: Self::DEFAULT_ANCHOR_STRIPES,
        }
    }

    pub fn with_lru_k(mut self, k: usize) -> Self {
        assert!(k >= 1, "LRU-K needs at least one history slot");
        self.lru_k = k;
        self
    }

    pub fn with_crt_ms(mut self, crt_ms: u64) -> Self {
        self.crt_ms = crt_ms;
        self
    }

    pub fn with_rit_ms(mut self, rit_ms: u64) -> Self {
        self.rit_ms = rit_ms;
        self
    }

    pub fn with_anchor_stripes(mut self, stripes: usize) -> Self {
        assert!(stripes > 0, "at least one anchor stripe is required");
        self.anchor_stripes = stripes;
        self
    }

    /// Build a configuration from flat `key = value` properties.
    ///
    /// Recognized keys are `<prefix>.LRU_K`, `<prefix>.CRT` and
    /// `<prefix>.RIT`; anything else in the map is ignored. Absent keys keep
    /// their defaults, unparsable values are rejected.
    pub fn from_properties(
        buffer_count: usize,
        prefix: &str,
        props: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(buffer_count);
        if let Some(k) = Self::lookup(props, prefix, "LRU_K")? {
            config.lru_k = k;
        }
        if let Some(crt) = Self::lookup(props, prefix, "CRT")? {
            config.crt_ms = crt;
        }
        if let Some(rit) = Self::lookup(props, prefix, "RIT")? {
            config.rit_ms = rit;
        }
        Ok(config)
    }

    fn lookup<T: std::str::FromStr>(
        props: &HashMap<String, String>,
        prefix: &str,
        name: &str,
    ) -> Result<Option<T>, ConfigError> {
        let key = format!("{prefix}.{name}");
        match props.get(&key) {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError {
                key,
                value: value.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::new(8);
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.lru_k, 2);
        assert_eq!(config.crt_ms, 100_000);
        assert_eq!(config.rit_ms, 200_000);
        assert_eq!(config.anchor_stripes, 1009);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PoolConfig::new(4)
            .with_lru_k(3)
            .with_crt_ms(50)
            .with_rit_ms(1_000)
            .with_anchor_stripes(13);
        assert_eq!(config.lru_k, 3);
        assert_eq!(config.crt_ms, 50);
        assert_eq!(config.rit_ms, 1_000);
        assert_eq!(config.anchor_stripes, 13);
    }

    #[test]
    fn test_from_properties_reads_deployment_keys() {
        let props: HashMap<String, String> = [
            ("buffermgr.LRU_K", "4"),
            ("buffermgr.CRT", "250"),
            ("buffermgr.RIT", "9000"),
            ("buffermgr.UNRELATED", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = PoolConfig::from_properties(16, "buffermgr", &props).unwrap();
        assert_eq!(config.buffer_count, 16);
        assert_eq!(config.lru_k, 4);
        assert_eq!(config.crt_ms, 250);
        assert_eq!(config.rit_ms, 9000);
    }

    #[test]
    fn test_from_properties_rejects_garbage() {
        let props: HashMap<String, String> =
            [("buffermgr.CRT".to_string(), "not-a-number".to_string())]
                .into_iter()
                .collect();
        let err = PoolConfig::from_properties(16, "buffermgr", &props).unwrap_err();
        assert!(err.to_string().contains("buffermgr.CRT"));
    }

    #[test]
    #[should_panic]
    fn test_zero_frames_is_rejected() {
        let _ = PoolConfig::new(0);
    }
}
