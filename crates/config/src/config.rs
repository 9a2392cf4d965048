//! Core configuration structures, loading and boundary validation

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Speed presets accepted by the x264 family of encoders.
pub const KNOWN_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A recognized option carries an out-of-range or contradictory value
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Concurrency policy selector for the encode orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Dispatch every rendition at once
    Parallel,
    /// Consecutive batches of at most `max_concurrent` renditions
    Capped,
    /// One rendition at a time
    Sequential,
}

impl Default for PolicyKind {
    fn default() -> Self {
        Self::Parallel
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::Parallel => write!(f, "parallel"),
            PolicyKind::Capped => write!(f, "capped"),
            PolicyKind::Sequential => write!(f, "sequential"),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(PolicyKind::Parallel),
            "capped" => Ok(PolicyKind::Capped),
            "sequential" => Ok(PolicyKind::Sequential),
            other => Err(format!(
                "unknown policy '{}', expected parallel, capped or sequential",
                other
            )),
        }
    }
}

/// Encoding-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingConfig {
    /// Global multiplier applied to every computed bitrate (0.1-2.0, default 1.0)
    #[serde(default = "default_bandwidth_ratio")]
    pub bandwidth_ratio: f32,
    /// User adjustment added to the computed compression quality (-5..=5, default 0)
    #[serde(default)]
    pub quality_offset: i32,
    /// Encoder speed preset (default "medium")
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Use the hardware encoder instead of libx264 (default false)
    #[serde(default)]
    pub use_gpu: bool,
}

fn default_bandwidth_ratio() -> f32 {
    1.0
}

fn default_preset() -> String {
    "medium".to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            bandwidth_ratio: default_bandwidth_ratio(),
            quality_offset: 0,
            preset: default_preset(),
            use_gpu: false,
        }
    }
}

/// Segmentation configuration
///
/// Exactly one of `duration_secs` and `size_kb` may be set; with neither set
/// the pipeline falls back to a 6-second segment duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SegmentationConfig {
    /// Target segment duration in seconds
    #[serde(default)]
    pub duration_secs: Option<f32>,
    /// Target segment size in kilobytes
    #[serde(default)]
    pub size_kb: Option<u64>,
}

/// Ladder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LadderConfig {
    /// Lowest rendition height worth producing (default 360)
    #[serde(default = "default_min_quality_height")]
    pub min_quality_height: u32,
}

fn default_min_quality_height() -> u32 {
    360
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            min_quality_height: default_min_quality_height(),
        }
    }
}

/// Concurrency configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConcurrencyConfig {
    /// Scheduling policy for encode jobs
    #[serde(default)]
    pub policy: PolicyKind,
    /// Batch size for the capped policy (0 = derive from CPU count)
    #[serde(default)]
    pub max_concurrent: u32,
}

/// Source analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalysisConfig {
    /// Skip probing and use the conservative default source descriptor
    #[serde(default)]
    pub skip_analysis: bool,
    /// Skip the ffmpeg/ffprobe availability checks. For testing only.
    #[serde(default)]
    pub skip_tool_checks: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PackagingConfig {
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl PackagingConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PackagingConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - LADDERPACK_BANDWIDTH_RATIO -> encoding.bandwidth_ratio
    /// - LADDERPACK_QUALITY_OFFSET -> encoding.quality_offset
    /// - LADDERPACK_PRESET -> encoding.preset
    /// - LADDERPACK_USE_GPU -> encoding.use_gpu
    /// - LADDERPACK_MIN_QUALITY -> ladder.min_quality_height
    /// - LADDERPACK_POLICY -> concurrency.policy
    /// - LADDERPACK_MAX_CONCURRENT -> concurrency.max_concurrent
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("LADDERPACK_BANDWIDTH_RATIO") {
            if let Ok(ratio) = val.parse::<f32>() {
                self.encoding.bandwidth_ratio = ratio;
            }
        }

        if let Ok(val) = env::var("LADDERPACK_QUALITY_OFFSET") {
            if let Ok(offset) = val.parse::<i32>() {
                self.encoding.quality_offset = offset;
            }
        }

        if let Ok(val) = env::var("LADDERPACK_PRESET") {
            if !val.is_empty() {
                self.encoding.preset = val;
            }
        }

        if let Ok(val) = env::var("LADDERPACK_USE_GPU") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.encoding.use_gpu = true,
                "false" | "0" | "no" => self.encoding.use_gpu = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("LADDERPACK_MIN_QUALITY") {
            if let Ok(height) = val.parse::<u32>() {
                self.ladder.min_quality_height = height;
            }
        }

        if let Ok(val) = env::var("LADDERPACK_POLICY") {
            if let Ok(policy) = val.parse::<PolicyKind>() {
                self.concurrency.policy = policy;
            }
        }

        if let Ok(val) = env::var("LADDERPACK_MAX_CONCURRENT") {
            if let Ok(cap) = val.parse::<u32>() {
                self.concurrency.max_concurrent = cap;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Validate every recognized option once, before any core type is built
    ///
    /// Rejects out-of-range numeric values, unknown presets, and the
    /// contradictory duration+size segmentation pair. The returned message
    /// always names the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.encoding.bandwidth_ratio;
        if !(0.1..=2.0).contains(&ratio) || !ratio.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "bandwidth_ratio must be within 0.1..=2.0, got {}",
                ratio
            )));
        }

        let offset = self.encoding.quality_offset;
        if !(-5..=5).contains(&offset) {
            return Err(ConfigError::Invalid(format!(
                "quality_offset must be within -5..=5, got {}",
                offset
            )));
        }

        if !KNOWN_PRESETS.contains(&self.encoding.preset.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "preset '{}' is not a known encoder preset",
                self.encoding.preset
            )));
        }

        if self.ladder.min_quality_height == 0 {
            return Err(ConfigError::Invalid(
                "min_quality_height must be greater than zero".to_string(),
            ));
        }

        match (self.segmentation.duration_secs, self.segmentation.size_kb) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "segment duration_secs and size_kb are mutually exclusive".to_string(),
                ));
            }
            (Some(secs), None) if !(secs.is_finite() && secs > 0.0) => {
                return Err(ConfigError::Invalid(format!(
                    "segment duration_secs must be positive, got {}",
                    secs
                )));
            }
            (None, Some(0)) => {
                return Err(ConfigError::Invalid(
                    "segment size_kb must be positive".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("LADDERPACK_BANDWIDTH_RATIO");
        env::remove_var("LADDERPACK_QUALITY_OFFSET");
        env::remove_var("LADDERPACK_PRESET");
        env::remove_var("LADDERPACK_USE_GPU");
        env::remove_var("LADDERPACK_MIN_QUALITY");
        env::remove_var("LADDERPACK_POLICY");
        env::remove_var("LADDERPACK_MAX_CONCURRENT");
    }

    // *For any* valid TOML configuration string, every section SHALL parse
    // into the matching struct with no value silently altered.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            bandwidth_ratio in 0.1f32..=2.0,
            quality_offset in -5i32..=5,
            use_gpu in proptest::bool::ANY,
            min_quality in 1u32..4320,
            max_concurrent in 0u32..16,
            policy in prop::sample::select(vec!["parallel", "capped", "sequential"]),
        ) {
            let toml_str = format!(
                r#"
[encoding]
bandwidth_ratio = {}
quality_offset = {}
use_gpu = {}

[ladder]
min_quality_height = {}

[concurrency]
policy = "{}"
max_concurrent = {}
"#,
                bandwidth_ratio, quality_offset, use_gpu, min_quality, policy, max_concurrent
            );

            let config = PackagingConfig::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert!((config.encoding.bandwidth_ratio - bandwidth_ratio).abs() < 0.0001);
            prop_assert_eq!(config.encoding.quality_offset, quality_offset);
            prop_assert_eq!(config.encoding.use_gpu, use_gpu);
            prop_assert_eq!(config.ladder.min_quality_height, min_quality);
            prop_assert_eq!(config.concurrency.policy, policy.parse::<PolicyKind>().unwrap());
            prop_assert_eq!(config.concurrency.max_concurrent, max_concurrent);
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_env_overrides_bandwidth_ratio(
            initial in 0.1f32..=2.0,
            override_ratio in 0.1f32..=2.0,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[encoding]
bandwidth_ratio = {}
"#,
                initial
            );

            let mut config = PackagingConfig::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("LADDERPACK_BANDWIDTH_RATIO", override_ratio.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert!((config.encoding.bandwidth_ratio - override_ratio).abs() < 0.0001);
        }

        #[test]
        fn prop_env_overrides_min_quality(
            initial in 1u32..2160,
            override_height in 1u32..2160,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[ladder]
min_quality_height = {}
"#,
                initial
            );

            let mut config = PackagingConfig::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("LADDERPACK_MIN_QUALITY", override_height.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.ladder.min_quality_height, override_height);
        }

        // *For any* bandwidth ratio outside 0.1..=2.0, validation SHALL reject
        // the configuration with a message naming the option.
        #[test]
        fn prop_validate_rejects_out_of_range_ratio(
            ratio in prop_oneof![-10.0f32..0.0999, 2.001f32..50.0],
        ) {
            let config = PackagingConfig {
                encoding: EncodingConfig {
                    bandwidth_ratio: ratio,
                    ..Default::default()
                },
                ..Default::default()
            };

            match config.validate() {
                Err(ConfigError::Invalid(msg)) => {
                    prop_assert!(msg.contains("bandwidth_ratio"), "message was: {}", msg);
                }
                other => prop_assert!(false, "expected Invalid, got {:?}", other.is_ok()),
            }
        }

        #[test]
        fn prop_validate_rejects_out_of_range_offset(
            offset in prop_oneof![-100i32..-6, 6i32..100],
        ) {
            let config = PackagingConfig {
                encoding: EncodingConfig {
                    quality_offset: offset,
                    ..Default::default()
                },
                ..Default::default()
            };

            match config.validate() {
                Err(ConfigError::Invalid(msg)) => {
                    prop_assert!(msg.contains("quality_offset"), "message was: {}", msg);
                }
                other => prop_assert!(false, "expected Invalid, got {:?}", other.is_ok()),
            }
        }
    }

    // Test that missing sections use defaults
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PackagingConfig::parse_toml("").expect("Empty TOML should parse");

        assert!((config.encoding.bandwidth_ratio - 1.0).abs() < 0.0001);
        assert_eq!(config.encoding.quality_offset, 0);
        assert_eq!(config.encoding.preset, "medium");
        assert!(!config.encoding.use_gpu);
        assert_eq!(config.segmentation.duration_secs, None);
        assert_eq!(config.segmentation.size_kb, None);
        assert_eq!(config.ladder.min_quality_height, 360);
        assert_eq!(config.concurrency.policy, PolicyKind::Parallel);
        assert_eq!(config.concurrency.max_concurrent, 0);
        assert!(!config.analysis.skip_analysis);
        assert!(config.validate().is_ok());
    }

    // Test partial config with some sections missing
    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[concurrency]
policy = "capped"
max_concurrent = 2
"#;
        let config = PackagingConfig::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.concurrency.policy, PolicyKind::Capped);
        assert_eq!(config.concurrency.max_concurrent, 2);
        assert!((config.encoding.bandwidth_ratio - 1.0).abs() < 0.0001); // default
        assert_eq!(config.ladder.min_quality_height, 360); // default
    }

    #[test]
    fn test_validate_rejects_duration_and_size_together() {
        let config = PackagingConfig {
            segmentation: SegmentationConfig {
                duration_secs: Some(6.0),
                size_kb: Some(2048),
            },
            ..Default::default()
        };

        match config.validate() {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("mutually exclusive"), "message was: {}", msg);
            }
            _ => panic!("Expected Invalid error"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_segment_size() {
        let config = PackagingConfig {
            segmentation: SegmentationConfig {
                duration_secs: None,
                size_kb: Some(0),
            },
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_preset() {
        let config = PackagingConfig {
            encoding: EncodingConfig {
                preset: "warp9".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        match config.validate() {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("warp9"), "message was: {}", msg);
            }
            _ => panic!("Expected Invalid error"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_min_quality() {
        let config = PackagingConfig {
            ladder: LadderConfig {
                min_quality_height: 0,
            },
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_policy_round_trip() {
        for (s, kind) in [
            ("parallel", PolicyKind::Parallel),
            ("capped", PolicyKind::Capped),
            ("sequential", PolicyKind::Sequential),
        ] {
            assert_eq!(s.parse::<PolicyKind>().unwrap(), kind);
            assert_eq!(format!("{}", kind), s);
        }
        assert!("adaptive".parse::<PolicyKind>().is_err());
    }
}
