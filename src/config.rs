use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Default origin used when neither the config file nor the environment names one.
const DEFAULT_ORIGIN: &str = "http://localhost:8080/";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL the hymnal is served from; manifest paths resolve against it
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

fn default_origin() -> String {
  DEFAULT_ORIGIN.to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

/// Versioned cache settings for one deployment of the viewer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  /// Common prefix of every namespace identifier
  pub prefix: String,
  /// Version tag; bumping it retires all namespaces of the previous version
  pub version: String,
  /// Assets that must be cached in the static namespace before install succeeds
  pub static_assets: Vec<String>,
  /// Per-language hymnal documents that must be cached in the data namespace
  pub data_assets: Vec<String>,
  /// Path fragments that mark a request as a hymnal data document
  pub data_markers: Vec<String>,
  /// Ask to skip the waiting phase as soon as install completes
  pub skip_waiting_on_install: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "amec-hymnal".to_string(),
      version: "v1.0.1".to_string(),
      static_assets: [
        "./",
        "./index.html",
        "./style.css",
        "./app.js",
        "./manifest.json",
        "./icons/ame-logo.svg",
        "./icons/ame-logo.webp",
        "./icons/amec-logo-192.png",
        "./icons/amec-logo-512.png",
        "./icons/simple-logo.svg",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      data_assets: vec!["./hymnal_xh.json".to_string(), "./hymnal_en.json".to_string()],
      data_markers: vec!["hymnal_data.json".to_string()],
      skip_waiting_on_install: true,
    }
  }
}

impl CacheConfig {
  /// Identifier of this version's static namespace.
  pub fn static_namespace(&self) -> String {
    format!("{}-static-{}", self.prefix, self.version)
  }

  /// Identifier of this version's data namespace.
  pub fn data_namespace(&self) -> String {
    format!("{}-data-{}", self.prefix, self.version)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database holding every namespace (default: $XDG_DATA_HOME/hymncache/cache.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn resolve_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hymncache").join("cache.db"))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hymncache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hymncache/config.yaml
  ///
  /// Falls back to the built-in deployment defaults when no file exists.
  /// `HYMNCACHE_ORIGIN` overrides the origin in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::load_with_origin(explicit_path, std::env::var("HYMNCACHE_ORIGIN").ok())
  }

  fn load_with_origin(explicit_path: Option<&Path>, origin: Option<String>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Some(origin) = origin {
      config.origin = origin;
    }

    config.origin_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("hymncache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hymncache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Parsed origin. Always ends in `/` so relative manifest paths join under it.
  pub fn origin_url(&self) -> Result<Url> {
    let mut origin = self.origin.clone();
    if !origin.ends_with('/') {
      origin.push('/');
    }
    Url::parse(&origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_default_namespaces() {
    let cache = CacheConfig::default();
    assert_eq!(cache.static_namespace(), "amec-hymnal-static-v1.0.1");
    assert_eq!(cache.data_namespace(), "amec-hymnal-data-v1.0.1");
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: https://hymnal.example.org/app
cache:
  version: v2
  data_assets:
    - ./hymnal_en.json
    - ./hymnal_zu.json
"#,
    )
    .unwrap();

    assert_eq!(config.cache.version, "v2");
    assert_eq!(config.cache.prefix, "amec-hymnal");
    assert_eq!(config.cache.data_assets.len(), 2);
    assert_eq!(config.cache.static_assets.len(), 10);
    assert!(config.cache.skip_waiting_on_install);
    assert_eq!(
      config.origin_url().unwrap().as_str(),
      "https://hymnal.example.org/app/"
    );
  }

  #[test]
  fn test_invalid_origin_rejected() {
    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.origin_url().is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_origin_override_beats_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "origin: https://file.example/\ncache:\n  version: v7").unwrap();

    let config = Config::load_with_origin(
      Some(file.path()),
      Some("https://override.example/hymnal".to_string()),
    )
    .unwrap();
    assert_eq!(config.origin, "https://override.example/hymnal");
    assert_eq!(config.cache.version, "v7");

    let config = Config::load_with_origin(Some(file.path()), None).unwrap();
    assert_eq!(config.origin, "https://file.example/");
  }

  #[test]
  fn test_invalid_origin_override_rejected() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "cache:\n  version: v7\n").unwrap();

    assert!(Config::load_with_origin(Some(file.path()), Some("nope".to_string())).is_err());
  }

  #[test]
  fn test_storage_explicit_path() {
    let storage = StorageConfig {
      path: Some(PathBuf::from("/tmp/x.db")),
    };
    assert_eq!(storage.resolve_path().unwrap(), PathBuf::from("/tmp/x.db"));
  }
}
