//! Cache configuration: memory budgets and allocator granularity.
//!
//! Budgets can be set programmatically, from environment variables, or from
//! a TOML file. Loading from either external source validates the result
//! before handing it to the manager.

use std::fs;
use std::io;
use std::path::Path;

/// Configuration for the texture memory manager.
///
/// Carries the two byte budgets and the allocation granularity handed to
/// the backing allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCacheConfig {
    /// Hard ceiling in bytes; admission never leaves usage above it.
    pub max_bytes: usize,
    /// Soft ceiling in bytes; the manager trims toward it opportunistically.
    pub preferred_bytes: usize,
    /// Allocation granularity in bytes, stored for the backing allocator.
    ///
    /// Reserved configuration: reported back but not applied to entry
    /// sizing.
    pub allocation_granularity: usize,
}

impl Default for TextureCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 128 * 1024 * 1024,      // 128 MB
            preferred_bytes: 64 * 1024 * 1024, // 64 MB
            allocation_granularity: 1024,
        }
    }
}

impl TextureCacheConfig {
    /// Creates a configuration from raw byte values.
    pub fn new(max_bytes: usize, preferred_bytes: usize, allocation_granularity: usize) -> Self {
        Self {
            max_bytes,
            preferred_bytes,
            allocation_granularity,
        }
    }

    /// Sets the hard budget in megabytes.
    pub fn with_max_mb(mut self, mb: usize) -> Self {
        self.max_bytes = mb * 1024 * 1024;
        self
    }

    /// Sets the preferred budget in megabytes.
    pub fn with_preferred_mb(mut self, mb: usize) -> Self {
        self.preferred_bytes = mb * 1024 * 1024;
        self
    }

    /// Sets the allocation granularity in bytes.
    pub fn with_allocation_granularity(mut self, bytes: usize) -> Self {
        self.allocation_granularity = bytes;
        self
    }

    /// Returns the hard budget in megabytes.
    pub fn max_mb(&self) -> usize {
        self.max_bytes / (1024 * 1024)
    }

    /// Returns the preferred budget in megabytes.
    pub fn preferred_mb(&self) -> usize {
        self.preferred_bytes / (1024 * 1024)
    }

    /// Checks budget consistency.
    ///
    /// The eviction algorithm assumes `preferred <= max`, so a
    /// configuration that breaks that is rejected here rather than
    /// tolerated downstream. A zero hard budget would deny every request
    /// and is rejected as well.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(ConfigError::ZeroMaxBudget);
        }
        if self.preferred_bytes > self.max_bytes {
            return Err(ConfigError::PreferredExceedsMax {
                preferred: self.preferred_bytes,
                max: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `COMPOSITOR_TEXTURE_MAX_MB`: hard budget in MB (default: 128)
    /// - `COMPOSITOR_TEXTURE_PREFERRED_MB`: preferred budget in MB (default: 64)
    /// - `COMPOSITOR_TEXTURE_GRANULARITY`: allocation granularity in bytes
    ///
    /// # Errors
    /// Returns an error if a variable contains an invalid value or the
    /// resulting budgets are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COMPOSITOR_TEXTURE_MAX_MB") {
            config.max_bytes = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("COMPOSITOR_TEXTURE_MAX_MB".to_string()))?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("COMPOSITOR_TEXTURE_PREFERRED_MB") {
            config.preferred_bytes = val
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::InvalidValue("COMPOSITOR_TEXTURE_PREFERRED_MB".to_string())
                })?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("COMPOSITOR_TEXTURE_GRANULARITY") {
            config.allocation_granularity = val.parse::<usize>().map_err(|_| {
                ConfigError::InvalidValue("COMPOSITOR_TEXTURE_GRANULARITY".to_string())
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// max_mb = 128
    /// preferred_mb = 64
    /// allocation_granularity = 1024
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or the
    /// resulting budgets are inconsistent.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "max_mb" => {
                        config.max_bytes = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?
                            * 1024
                            * 1024;
                    }
                    "preferred_mb" => {
                        config.preferred_bytes = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?
                            * 1024
                            * 1024;
                    }
                    "allocation_granularity" => {
                        config.allocation_granularity = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
                    }
                    _ => {} // Ignore unknown keys
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = self.to_toml();
        fs::write(path.as_ref(), toml)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    fn to_toml(&self) -> String {
        format!(
            "# Compositor Texture Cache Configuration\n\
             max_mb = {}\n\
             preferred_mb = {}\n\
             allocation_granularity = {}\n",
            self.max_mb(),
            self.preferred_mb(),
            self.allocation_granularity
        )
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// The hard budget was zero
    #[error("max texture memory budget must be non-zero")]
    ZeroMaxBudget,

    /// The preferred budget exceeded the hard budget
    #[error("preferred budget ({preferred} bytes) exceeds max budget ({max} bytes)")]
    PreferredExceedsMax { preferred: usize, max: usize },

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = TextureCacheConfig::default();
        assert_eq!(config.max_bytes, 128 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 64 * 1024 * 1024);
        assert_eq!(config.allocation_granularity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_config() {
        let config = TextureCacheConfig::new(8 * 1024 * 1024, 4 * 1024 * 1024, 2048);
        assert_eq!(config.max_bytes, 8 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 4 * 1024 * 1024);
        assert_eq!(config.allocation_granularity, 2048);
    }

    #[test]
    fn test_builder_methods() {
        let config = TextureCacheConfig::default()
            .with_max_mb(256)
            .with_preferred_mb(128)
            .with_allocation_granularity(4096);

        assert_eq!(config.max_bytes, 256 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 128 * 1024 * 1024);
        assert_eq!(config.allocation_granularity, 4096);
    }

    #[test]
    fn test_mb_getters() {
        let config = TextureCacheConfig::default();
        assert_eq!(config.max_mb(), 128);
        assert_eq!(config.preferred_mb(), 64);
    }

    #[test]
    fn test_validate_rejects_preferred_above_max() {
        let config = TextureCacheConfig::default()
            .with_max_mb(64)
            .with_preferred_mb(128);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PreferredExceedsMax { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_max() {
        let config = TextureCacheConfig::new(0, 0, 1024);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxBudget)));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[
            "COMPOSITOR_TEXTURE_MAX_MB",
            "COMPOSITOR_TEXTURE_PREFERRED_MB",
            "COMPOSITOR_TEXTURE_GRANULARITY",
        ]);

        env::set_var("COMPOSITOR_TEXTURE_MAX_MB", "512");
        env::set_var("COMPOSITOR_TEXTURE_PREFERRED_MB", "256");
        env::set_var("COMPOSITOR_TEXTURE_GRANULARITY", "4096");

        let config = TextureCacheConfig::from_env().unwrap();
        assert_eq!(config.max_bytes, 512 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 256 * 1024 * 1024);
        assert_eq!(config.allocation_granularity, 4096);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&[
            "COMPOSITOR_TEXTURE_MAX_MB",
            "COMPOSITOR_TEXTURE_PREFERRED_MB",
            "COMPOSITOR_TEXTURE_GRANULARITY",
        ]);

        env::set_var("COMPOSITOR_TEXTURE_MAX_MB", "256");

        let config = TextureCacheConfig::from_env().unwrap();
        assert_eq!(config.max_bytes, 256 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 64 * 1024 * 1024); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&["COMPOSITOR_TEXTURE_MAX_MB"]);

        env::set_var("COMPOSITOR_TEXTURE_MAX_MB", "not_a_number");
        assert!(TextureCacheConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_inconsistent_budgets() {
        let _guard = EnvGuard::new(&[
            "COMPOSITOR_TEXTURE_MAX_MB",
            "COMPOSITOR_TEXTURE_PREFERRED_MB",
        ]);

        env::set_var("COMPOSITOR_TEXTURE_MAX_MB", "64");
        env::set_var("COMPOSITOR_TEXTURE_PREFERRED_MB", "128");
        assert!(matches!(
            TextureCacheConfig::from_env(),
            Err(ConfigError::PreferredExceedsMax { .. })
        ));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in var_names {
                env::remove_var(name);
            }
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = TextureCacheConfig::new(8 * 1024 * 1024, 4 * 1024 * 1024, 2048);
        let toml = config.to_toml();
        let parsed = TextureCacheConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Test configuration
            max_mb = 256
            preferred_mb = 128
            allocation_granularity = 4096
        "#;

        let config = TextureCacheConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_bytes, 256 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 128 * 1024 * 1024);
        assert_eq!(config.allocation_granularity, 4096);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = "max_mb = 256";

        let config = TextureCacheConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_bytes, 256 * 1024 * 1024);
        assert_eq!(config.preferred_bytes, 64 * 1024 * 1024); // default
    }

    #[test]
    fn test_from_toml_inconsistent_budgets() {
        // Default preferred (64 MB) exceeds the lowered max.
        let toml = "max_mb = 32";
        assert!(matches!(
            TextureCacheConfig::from_toml(toml),
            Err(ConfigError::PreferredExceedsMax { .. })
        ));
    }

    #[test]
    fn test_file_save_and_load() {
        let temp_dir = std::env::temp_dir();
        let config_path = temp_dir.join("test_texture_cache_config.toml");

        let config = TextureCacheConfig::new(8 * 1024 * 1024, 4 * 1024 * 1024, 2048);
        config.save_to_file(&config_path).unwrap();

        let loaded = TextureCacheConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);

        // Cleanup
        let _ = fs::remove_file(config_path);
    }
}
