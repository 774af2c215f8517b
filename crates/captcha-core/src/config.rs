//! Configuration management for the captcha locator engine.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Every component receives its own
//! section at construction time.

use crate::error::{ConfigError, ConfigResult};
use crate::types::ChallengeType;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main engine configuration.
///
/// This is loaded from `~/.config/captcha-locator/config.toml` (or platform
/// equivalent). If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Matcher registration and thresholds
    pub detection: DetectionConfig,
    /// Feature extraction neighbourhood settings
    pub features: FeatureConfig,
    /// Scan planning settings
    pub scan: ScanConfig,
    /// Related-element discovery settings
    pub related: RelatedConfig,
    /// Selector generation and volatility rules
    pub selector: SelectorConfig,
    /// Locator reliability policy
    pub locator: LocatorConfig,
    /// Resolution cache settings
    pub cache: CacheConfig,
    /// Collaborator timeouts and confidence floor
    pub resolution: ResolutionConfig,
    /// Manual selection settings
    pub manual: ManualSelectionConfig,
}

impl EngineConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `CAPTCHA_LOCATOR_MAX_ERROR_RATIO`: Override the unreliable-locator error ratio
    /// - `CAPTCHA_LOCATOR_CACHE_TTL_SECS`: Override the resolution cache TTL
    /// - `CAPTCHA_LOCATOR_RECOGNIZER_TIMEOUT_MS`: Override the recognizer timeout
    /// - `CAPTCHA_LOCATOR_STORE_TIMEOUT_MS`: Override the persistence timeout
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CAPTCHA_LOCATOR_MAX_ERROR_RATIO") {
            if let Ok(ratio) = val.parse() {
                self.locator.max_error_ratio = ratio;
                tracing::debug!("Override locator.max_error_ratio from env: {}", ratio);
            }
        }

        if let Ok(val) = std::env::var("CAPTCHA_LOCATOR_CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                self.cache.ttl_secs = secs;
                tracing::debug!("Override cache.ttl_secs from env: {}", secs);
            }
        }

        if let Ok(val) = std::env::var("CAPTCHA_LOCATOR_RECOGNIZER_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.resolution.recognizer_timeout_ms = ms;
                tracing::debug!("Override resolution.recognizer_timeout_ms from env: {}", ms);
            }
        }

        if let Ok(val) = std::env::var("CAPTCHA_LOCATOR_STORE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.resolution.store_timeout_ms = ms;
                tracing::debug!("Override resolution.store_timeout_ms from env: {}", ms);
            }
        }
    }

    /// Save configuration to the default location.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(Self::config_path()?)
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/captcha-locator/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "captcha-locator", "captcha-locator")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path (default home of the `SQLite` store).
    ///
    /// Uses XDG base directories: `~/.local/share/captcha-locator`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "captcha-locator", "captcha-locator")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> ConfigResult<()> {
        self.detection.validate()?;
        self.features.validate()?;
        self.scan.validate()?;
        self.related.validate()?;
        self.selector.validate()?;
        self.locator.validate()?;
        self.cache.validate()?;
        self.resolution.validate()?;
        self.manual.validate()
    }
}

fn check_unit(field: &str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be within 0..=1, got {value}")))
    }
}

fn check_positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}

fn check_non_empty(field: &str, values: &[String]) -> ConfigResult<()> {
    if values.iter().all(|v| v.trim().is_empty()) {
        Err(ConfigError::invalid(field, "must contain at least one entry"))
    } else {
        Ok(())
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Matcher registration and per-type thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Challenge types to register, in registration (tie-break) order
    pub enabled: Vec<ChallengeType>,
    /// Normalized score a character candidate must reach
    pub character_threshold: f64,
    /// Normalized score a slide candidate must reach
    pub slide_threshold: f64,
    /// Normalized score a click candidate must reach
    pub click_threshold: f64,
    /// Optional directory of TOML rule sets replacing the built-in ones
    pub rule_set_dir: Option<PathBuf>,
}

impl DetectionConfig {
    /// Threshold configured for a challenge type.
    #[must_use]
    pub fn threshold_for(&self, challenge: ChallengeType) -> f64 {
        match challenge {
            ChallengeType::Character => self.character_threshold,
            ChallengeType::Slide => self.slide_threshold,
            ChallengeType::Click => self.click_threshold,
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.enabled.is_empty() {
            return Err(ConfigError::invalid(
                "detection.enabled",
                "at least one challenge type must be enabled",
            ));
        }
        let unique: HashSet<_> = self.enabled.iter().collect();
        if unique.len() != self.enabled.len() {
            return Err(ConfigError::invalid(
                "detection.enabled",
                "challenge types must not repeat",
            ));
        }
        for challenge in ChallengeType::ALL {
            let threshold = self.threshold_for(challenge);
            if threshold <= 0.0 || threshold > 1.0 {
                return Err(ConfigError::invalid(
                    &format!("detection.{challenge}_threshold"),
                    format!("must be within (0, 1], got {threshold}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: ChallengeType::ALL.to_vec(),
            character_threshold: 0.65,
            slide_threshold: 0.6,
            click_threshold: 0.6,
            rule_set_dir: None,
        }
    }
}

/// Feature extraction neighbourhood settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Ancestor levels searched for nearby inputs and controls when no form encloses the node
    pub neighborhood_depth: usize,
    /// Maximum characters of nearby text kept in a feature record
    pub nearby_text_limit: usize,
    /// Keywords identifying refresh/reload controls
    pub refresh_keywords: Vec<String>,
}

impl FeatureConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.neighborhood_depth == 0 {
            return Err(ConfigError::invalid(
                "features.neighborhood_depth",
                "must be greater than zero",
            ));
        }
        check_non_empty("features.refresh_keywords", &self.refresh_keywords)
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            neighborhood_depth: 3,
            nearby_text_limit: 200,
            refresh_keywords: strings(&[
                "refresh",
                "reload",
                "change",
                "another",
                "new code",
                "看不清",
                "换一张",
                "刷新",
            ]),
        }
    }
}

/// Scan planning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bounded wait for an image candidate's true dimensions
    pub image_load_timeout_ms: u64,
    /// Maximum number of non-image candidates (containers such as `div`)
    /// offered in one scan; `form_tags` nodes are never limited
    pub max_candidates: usize,
    /// Keywords that mark an input (or its label) as a challenge answer field
    pub challenge_keywords: Vec<String>,
    /// Element tags scanned inside forms (first pass)
    pub form_tags: Vec<String>,
    /// Element tags scanned in keyword neighbourhoods and the document fallback
    pub candidate_tags: Vec<String>,
}

impl ScanConfig {
    /// Image load timeout as a `Duration`.
    #[must_use]
    pub fn image_load_timeout(&self) -> Duration {
        Duration::from_millis(self.image_load_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        check_positive("scan.image_load_timeout_ms", self.image_load_timeout_ms)?;
        if self.max_candidates == 0 {
            return Err(ConfigError::invalid(
                "scan.max_candidates",
                "must be greater than zero",
            ));
        }
        check_non_empty("scan.challenge_keywords", &self.challenge_keywords)?;
        check_non_empty("scan.form_tags", &self.form_tags)?;
        check_non_empty("scan.candidate_tags", &self.candidate_tags)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            image_load_timeout_ms: 2000,
            max_candidates: 400,
            challenge_keywords: strings(&[
                "captcha",
                "vcode",
                "verifycode",
                "verify",
                "verification",
                "validate",
                "checkcode",
                "authcode",
                "seccode",
                "yzm",
                "验证码",
            ]),
            form_tags: strings(&["img", "canvas", "svg"]),
            candidate_tags: strings(&["img", "canvas", "svg", "iframe", "div", "span"]),
        }
    }
}

/// Related-element discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelatedConfig {
    /// Maximum center distance (px) between the challenge and its answer input
    pub max_input_distance_px: f64,
    /// Maximum center distance (px) between the challenge and its refresh control
    pub max_refresh_distance_px: f64,
    /// Distance charged per tree hop when layout boxes are unknown
    pub hop_distance_px: f64,
}

impl RelatedConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("related.max_input_distance_px", self.max_input_distance_px),
            ("related.max_refresh_distance_px", self.max_refresh_distance_px),
            ("related.hop_distance_px", self.hop_distance_px),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be a positive number, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RelatedConfig {
    fn default() -> Self {
        Self {
            max_input_distance_px: 300.0,
            max_refresh_distance_px: 250.0,
            hop_distance_px: 40.0,
        }
    }
}

/// Volatility rules applied to ids, class tokens and attribute values.
///
/// A fragment matching any rule is treated as machine-generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityRules {
    /// Fragments longer than this are volatile
    pub max_length: usize,
    /// Digit runs of this length or longer are volatile
    pub min_digit_run: usize,
    /// Hex runs of this length or longer are volatile
    pub hex_run: usize,
    /// Whether a `--` anywhere marks a fragment as volatile
    pub reject_double_hyphen: bool,
    /// Build-tool prefixes (CSS-in-JS, framework scoping) that mark a fragment as volatile
    pub marker_prefixes: Vec<String>,
    /// Extra regular expressions; a match marks a fragment as volatile
    pub patterns: Vec<String>,
}

impl Default for VolatilityRules {
    fn default() -> Self {
        Self {
            max_length: 40,
            min_digit_run: 5,
            hex_run: 32,
            reject_double_hyphen: true,
            marker_prefixes: strings(&[
                "css-",
                "sc-",
                "jsx-",
                "svelte-",
                "emotion-",
                "makeStyles-",
                "_ngcontent",
                "ng-tns-",
                "ember",
                "__",
            ]),
            patterns: Vec::new(),
        }
    }
}

/// Selector generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Volatility heuristic table
    pub volatility: VolatilityRules,
    /// Attributes tried for equality clauses, highest priority first
    pub attribute_priority: Vec<String>,
    /// Maximum equality clauses combined in one selector (1 or 2)
    pub max_attribute_clauses: usize,
}

impl SelectorConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(1..=2).contains(&self.max_attribute_clauses) {
            return Err(ConfigError::invalid(
                "selector.max_attribute_clauses",
                format!("must be 1 or 2, got {}", self.max_attribute_clauses),
            ));
        }
        if self.volatility.max_length == 0
            || self.volatility.min_digit_run == 0
            || self.volatility.hex_run == 0
        {
            return Err(ConfigError::invalid(
                "selector.volatility",
                "length thresholds must be greater than zero",
            ));
        }
        for pattern in &self.volatility.patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::invalid("selector.volatility.patterns", e.to_string())
            })?;
        }
        check_non_empty("selector.attribute_priority", &self.attribute_priority)
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            volatility: VolatilityRules::default(),
            attribute_priority: strings(&[
                "name",
                "type",
                "data-testid",
                "data-test",
                "data-qa",
                "data-cy",
                "role",
                "placeholder",
                "alt",
                "title",
                "aria-label",
            ]),
            max_attribute_clauses: 2,
        }
    }
}

/// Locator reliability policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Error ratio above which a locator is unreliable and triggers a re-scan
    pub max_error_ratio: f64,
    /// Attempts required before the error ratio is judged
    pub min_attempts: u32,
    /// Number of recent resolution errors kept on a locator
    pub max_recent_errors: usize,
}

impl LocatorConfig {
    fn validate(&self) -> ConfigResult<()> {
        check_unit("locator.max_error_ratio", self.max_error_ratio)
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_error_ratio: 0.5,
            min_attempts: 3,
            max_recent_errors: 10,
        }
    }
}

/// Resolution cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached recognition result
    pub ttl_secs: u64,
    /// Interval between bulk sweeps of expired entries
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    /// Entry lifetime as a `Duration`.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        check_positive("cache.ttl_secs", self.ttl_secs)?;
        check_positive("cache.sweep_interval_secs", self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 600,
        }
    }
}

/// Collaborator timeouts and the recognition confidence floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Timeout for capturing the challenge bitmap
    pub capture_timeout_ms: u64,
    /// Timeout for a single recognizer call
    pub recognizer_timeout_ms: u64,
    /// Timeout for a single persistence-store call
    pub store_timeout_ms: u64,
    /// Recognitions below this confidence count as failures
    pub min_confidence: f64,
}

impl ResolutionConfig {
    /// Capture timeout as a `Duration`.
    #[must_use]
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Recognizer timeout as a `Duration`.
    #[must_use]
    pub fn recognizer_timeout(&self) -> Duration {
        Duration::from_millis(self.recognizer_timeout_ms)
    }

    /// Store timeout as a `Duration`.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        check_positive("resolution.capture_timeout_ms", self.capture_timeout_ms)?;
        check_positive("resolution.recognizer_timeout_ms", self.recognizer_timeout_ms)?;
        check_positive("resolution.store_timeout_ms", self.store_timeout_ms)?;
        check_unit("resolution.min_confidence", self.min_confidence)
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 3000,
            recognizer_timeout_ms: 10_000,
            store_timeout_ms: 2000,
            min_confidence: 0.3,
        }
    }
}

/// Manual selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualSelectionConfig {
    /// Inactivity limit after which a selection session cancels itself
    pub timeout_secs: u64,
}

impl ManualSelectionConfig {
    /// Session timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        check_positive("manual.timeout_secs", self.timeout_secs)
    }
}

impl Default for ManualSelectionConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}
