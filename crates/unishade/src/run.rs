use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;
use shaderconfig::{BackendSetting, RegistryConfig};
use tracing_subscriber::EnvFilter;

pub const ENV_CONFIG_DIR: &str = "UNISHADE_CONFIG_DIR";
pub const CONFIG_FILE: &str = "config.toml";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Unishade";
const APPLICATION: &str = "unishade";

/// Logs go to stderr so `--json` output on stdout stays machine readable.
pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the registry configuration.
///
/// An explicit path must exist. Without one, `config.toml` in the user config
/// directory is used when present, otherwise the built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<RegistryConfig> {
    let config = match explicit {
        Some(path) => RegistryConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => match default_config_path()? {
            path if path.is_file() => {
                tracing::debug!(path = %path.display(), "using user config");
                RegistryConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
            }
            _ => RegistryConfig::default(),
        },
    };

    if config.backend == Some(BackendSetting::Gl) {
        tracing::warn!("config requests the gl backend; unishade always compiles with naga");
    }
    Ok(config)
}

fn default_config_path() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(ENV_CONFIG_DIR) {
        return Ok(PathBuf::from(dir).join(CONFIG_FILE));
    }
    let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
        .ok_or_else(|| anyhow!("failed to determine user directories"))?;
    Ok(project_dirs.config_dir().join(CONFIG_FILE))
}
