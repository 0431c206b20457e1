use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Connection profiles. Each profile is an independent cache workspace.
  pub profiles: Vec<ProfileConfig>,
  pub default_profile: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
  /// Profile name, used as the cache workspace key.
  pub name: String,
  /// Base URL of the remote content API.
  pub url: String,
  /// Environment variable holding the API token for this profile
  /// (default: CANOPY_TOKEN).
  pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Age after which a cached record is reported as stale.
  pub stale_after_minutes: i64,
  /// Override for the data directory (database, blobs, logs).
  pub data_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_minutes: 15,
      data_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Default depth bound for recursive synchronization.
  pub max_depth: usize,
  /// Default bound on concurrent in-flight fetches.
  pub concurrency: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_depth: 64,
      concurrency: 1,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./canopy.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/canopy/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/canopy/config.yaml\n\
         with at least one profile (name, url, optional token_env)."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("canopy.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("canopy").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    if config.profiles.is_empty() {
      return Err(eyre!(
        "Config file {} defines no profiles",
        path.display()
      ));
    }

    Ok(config)
  }

  /// Resolve a profile by name, falling back to `default_profile` and then
  /// to the only configured profile.
  pub fn profile(&self, name: Option<&str>) -> Result<&ProfileConfig> {
    let wanted = name.or(self.default_profile.as_deref());

    match wanted {
      Some(wanted) => self
        .profiles
        .iter()
        .find(|p| p.name == wanted)
        .ok_or_else(|| eyre!("Unknown profile {:?}", wanted)),
      None if self.profiles.len() == 1 => Ok(&self.profiles[0]),
      None => Err(eyre!(
        "Multiple profiles configured; pass --profile or set default_profile"
      )),
    }
  }
}

impl ProfileConfig {
  /// Get the API token for this profile from the environment.
  pub fn api_token(&self) -> Result<String> {
    let var = self.token_env.as_deref().unwrap_or("CANOPY_TOKEN");
    std::env::var(var)
      .map_err(|_| eyre!("API token not found. Set the {} environment variable.", var))
  }
}
