use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSetting {
    Gl,
    Naga,
}

/// Settings for the shader registry and the tools built on it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Search roots for logical shader names, tried in order.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,
    /// Unset means the compiler's default backend.
    #[serde(default)]
    pub backend: Option<BackendSetting>,
    #[serde(
        default = "default_reload_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub reload_interval: Duration,
    /// Pass `optimize`, `debug` and `STDGL` pragmas through to the driver.
    #[serde(default)]
    pub native_pragmas: bool,
    #[serde(default = "default_validate_after_link")]
    pub validate_after_link: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            roots: default_roots(),
            backend: None,
            reload_interval: default_reload_interval(),
            native_pragmas: false,
            validate_after_link: default_validate_after_link(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("shaders")]
}

fn default_reload_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_validate_after_link() -> bool {
    true
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl RegistryConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RegistryConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.roots.is_empty() {
            return Err(ConfigError::Invalid(
                "config must list at least one shader root".into(),
            ));
        }

        if let Some(root) = self
            .roots
            .iter()
            .find(|root| root.as_os_str().to_string_lossy().trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "shader root {root:?} may not be empty"
            )));
        }

        if self.reload_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "reload_interval must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1
roots = ["shaders", "/usr/share/unishade/shaders"]
backend = "naga"
reload_interval = "250ms"
native_pragmas = true
validate_after_link = false
"#;

    #[test]
    fn parses_sample_config() {
        let config = RegistryConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.backend, Some(BackendSetting::Naga));
        assert_eq!(config.reload_interval, Duration::from_millis(250));
        assert!(config.native_pragmas);
        assert!(!config.validate_after_link);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = RegistryConfig::from_toml_str("").expect("empty config is valid");
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.roots, vec![PathBuf::from("shaders")]);
        assert!(config.validate_after_link);
    }

    #[test]
    fn integer_interval_is_seconds() {
        let config = RegistryConfig::from_toml_str("reload_interval = 2").unwrap();
        assert_eq!(config.reload_interval, Duration::from_secs(2));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = RegistryConfig::from_toml_str("reload_interval = \"0s\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = RegistryConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = RegistryConfig::from_toml_str("backend = \"vulkan\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = RegistryConfig::load(&path).unwrap();
        assert_eq!(config.backend, Some(BackendSetting::Naga));

        let missing = RegistryConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
