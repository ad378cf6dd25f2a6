use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use providers::{AggregateSettings, ProviderKind, ProviderSettings};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_VERSION: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSourceConfig {
    pub provider: ProviderKind,
    pub enabled: bool,
    pub api_key: String,
    pub api_secret: String,
    pub user_agent: String,
}

impl Default for ProviderSourceConfig {
    fn default() -> Self {
        Self::new(ProviderKind::Itunes, true)
    }
}

impl ProviderSourceConfig {
    fn new(provider: ProviderKind, enabled: bool) -> Self {
        Self {
            provider,
            enabled,
            api_key: String::new(),
            api_secret: String::new(),
            user_agent: String::new(),
        }
    }

    /// Name of the credential this source is missing, if any.
    pub fn missing_credential(&self) -> Option<&'static str> {
        let blank = |value: &str| value.trim().is_empty();
        match self.provider {
            ProviderKind::MusicBrainz if blank(&self.user_agent) => Some("user_agent"),
            ProviderKind::LastFm | ProviderKind::Discogs if blank(&self.api_key) => {
                Some("api_key")
            }
            ProviderKind::Spotify if blank(&self.api_key) => Some("api_key"),
            ProviderKind::Spotify if blank(&self.api_secret) => Some("api_secret"),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub version: u32,
    pub library_root: String,
    pub index_path: String,
    pub delete_empty_folders: bool,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub provider_timeout_secs: u64,
    pub provider_max_results: usize,
    pub enrich_new_entities: bool,
    pub providers: Vec<ProviderSourceConfig>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_root: String::new(),
            index_path: "catalog.redb".to_string(),
            delete_empty_folders: true,
            thumbnail_width: 160,
            thumbnail_height: 160,
            provider_timeout_secs: 8,
            provider_max_results: 5,
            enrich_new_entities: true,
            providers: default_sources(),
        }
    }
}

fn default_sources() -> Vec<ProviderSourceConfig> {
    vec![
        ProviderSourceConfig::new(ProviderKind::Itunes, true),
        ProviderSourceConfig::new(ProviderKind::MusicBrainz, false),
        ProviderSourceConfig::new(ProviderKind::LastFm, false),
        ProviderSourceConfig::new(ProviderKind::Spotify, false),
        ProviderSourceConfig::new(ProviderKind::Discogs, false),
        ProviderSourceConfig::new(ProviderKind::Wikipedia, true),
    ]
}

impl ScannerConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    /// Settings for every source that is enabled and has its credentials.
    /// Later duplicates of a provider are ignored.
    pub fn provider_settings(&self) -> Vec<ProviderSettings> {
        let mut out: Vec<ProviderSettings> = Vec::new();
        for source in &self.providers {
            if !source.enabled {
                continue;
            }
            if let Some(missing) = source.missing_credential() {
                warn!("Provider {} skipped: {} is not set", source.provider, missing);
                continue;
            }
            if out.iter().any(|settings| settings.kind == source.provider) {
                warn!("Provider {} is configured twice; using the first", source.provider);
                continue;
            }
            let mut settings = ProviderSettings::new(source.provider);
            settings.api_key = non_empty(&source.api_key);
            settings.api_secret = non_empty(&source.api_secret);
            settings.user_agent = non_empty(&source.user_agent);
            settings.timeout = self.provider_timeout();
            out.push(settings);
        }
        out
    }

    pub fn aggregate_settings(&self) -> AggregateSettings {
        AggregateSettings {
            timeout: self.provider_timeout(),
            max_results: self.provider_max_results.max(1),
            thumbnail_width: self.thumbnail_width,
            thumbnail_height: self.thumbnail_height,
        }
    }

    /// Fills values an older or hand-edited file left out or zeroed.
    fn normalize(&mut self) {
        let defaults = ScannerConfig::default();
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.index_path.trim().is_empty() {
            self.index_path = defaults.index_path;
        }
        if self.thumbnail_width == 0 {
            self.thumbnail_width = defaults.thumbnail_width;
        }
        if self.thumbnail_height == 0 {
            self.thumbnail_height = defaults.thumbnail_height;
        }
        if self.provider_timeout_secs == 0 {
            self.provider_timeout_secs = defaults.provider_timeout_secs;
        }
        if self.provider_max_results == 0 {
            self.provider_max_results = defaults.provider_max_results;
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Failure to read or write the config file, with the path involved.
#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, serde_yaml::Error),
    Write(PathBuf, std::io::Error),
    Encode(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(path, err) => write!(f, "cannot read {:?}: {}", path, err),
            ConfigError::Parse(path, err) => write!(f, "invalid config in {:?}: {}", path, err),
            ConfigError::Write(path, err) => write!(f, "cannot write {:?}: {}", path, err),
            ConfigError::Encode(err) => write!(f, "cannot encode config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn config_path_from_env() -> PathBuf {
    match env::var("ROADIE_SCANNER_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Reads the config at `path`, writing a default one first when there is
/// none. The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(ScannerConfig, bool), ConfigError> {
    if path.exists() {
        let contents =
            fs::read_to_string(path).map_err(|err| ConfigError::Read(path.to_path_buf(), err))?;
        let mut config: ScannerConfig = serde_yaml::from_str(&contents)
            .map_err(|err| ConfigError::Parse(path.to_path_buf(), err))?;
        config.normalize();
        return Ok((config, false));
    }
    let config = ScannerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ScannerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| ConfigError::Write(path.to_path_buf(), err))?;
        }
    }
    let contents = serde_yaml::to_string(config).map_err(ConfigError::Encode)?;
    fs::write(path, contents).map_err(|err| ConfigError::Write(path.to_path_buf(), err))
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_library_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use providers::ProviderKind;

    use super::{
        load_or_create_config, resolve_library_root, resolve_path, save_config, ConfigError,
        ProviderSourceConfig, ScannerConfig, CONFIG_VERSION,
    };

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.version, CONFIG_VERSION);

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again.index_path, "catalog.redb");
        assert_eq!(again.providers.len(), 6);
    }

    #[test]
    fn partial_files_get_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 1\nlibrary_root: music\nthumbnail_width: 0\nproviders:\n  - provider: lastfm\n    api_key: abc\n",
        )
        .unwrap();
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.thumbnail_width, 160);
        assert_eq!(config.provider_timeout_secs, 8);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].provider, ProviderKind::LastFm);
        assert!(config.providers[0].enabled);
        assert_eq!(
            resolve_library_root(&path, &config.library_root),
            Some(dir.path().join("music"))
        );
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "providers: [unclosed\n").unwrap();
        let err = load_or_create_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref at, _) if at == &path));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn provider_settings_apply_credential_rules() {
        let mut config = ScannerConfig::default();
        let mut musicbrainz = ProviderSourceConfig {
            provider: ProviderKind::MusicBrainz,
            ..ProviderSourceConfig::default()
        };
        let spotify = ProviderSourceConfig {
            provider: ProviderKind::Spotify,
            api_key: "id".to_string(),
            ..ProviderSourceConfig::default()
        };
        let discogs = ProviderSourceConfig {
            provider: ProviderKind::Discogs,
            api_key: " token ".to_string(),
            ..ProviderSourceConfig::default()
        };
        assert_eq!(musicbrainz.missing_credential(), Some("user_agent"));
        musicbrainz.user_agent = "roadie/0.1".to_string();
        config.providers = vec![
            ProviderSourceConfig::default(),
            musicbrainz,
            spotify,
            discogs,
            ProviderSourceConfig {
                enabled: false,
                provider: ProviderKind::Wikipedia,
                ..ProviderSourceConfig::default()
            },
            ProviderSourceConfig::default(),
        ];
        let settings = config.provider_settings();
        let kinds: Vec<ProviderKind> = settings.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![ProviderKind::Itunes, ProviderKind::MusicBrainz, ProviderKind::Discogs]
        );
        assert_eq!(settings[2].api_key.as_deref(), Some("token"));
        assert_eq!(settings[1].timeout.as_secs(), 8);
    }

    #[test]
    fn saved_config_round_trips_provider_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        save_config(&path, &ScannerConfig::default()).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("provider: musicbrainz"));
        assert!(contents.contains("provider: lastfm"));
    }

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let config = Path::new("/etc/roadie/config.yaml");
        assert_eq!(
            resolve_path(config, "catalog.redb"),
            Path::new("/etc/roadie/catalog.redb")
        );
        assert_eq!(resolve_path(config, "/srv/x.redb"), Path::new("/srv/x.redb"));
        assert_eq!(
            resolve_path(Path::new("config.yaml"), "a"),
            Path::new("./a")
        );
        assert!(resolve_library_root(config, "  ").is_none());
    }
}
