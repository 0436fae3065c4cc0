use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use fieldcache_core::ports::ServiceConfigurationProvider;
use fieldcache_core::{ConfigError, Environment};

const QUALIFIER: &str = "com";
const ORG: &str = "fieldcache";
const APP: &str = "fieldcache";
const ENVIRONMENT_FILE: &str = "environment.json";

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from(QUALIFIER, ORG, APP).ok_or(ConfigError::NoConfigDir)
}

fn utf8(path: &std::path::Path) -> Result<Utf8PathBuf, ConfigError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|p| ConfigError::Invalid(format!("non UTF-8 path: {}", p.display())))
}

/// Platform data directory for cache files.
pub fn default_cache_root() -> Result<Utf8PathBuf, ConfigError> {
    Ok(utf8(project_dirs()?.data_dir())?.join("caches"))
}

/// Reads the configured services from `environment.json`, fresh on every call.
#[derive(Debug, Clone)]
pub struct JsonEnvironmentProvider {
    path: Utf8PathBuf,
}

impl JsonEnvironmentProvider {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_default_location() -> Result<Self, ConfigError> {
        let dir = utf8(project_dirs()?.config_dir())?;
        Ok(Self::new(dir.join(ENVIRONMENT_FILE)))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<Environment, ConfigError> {
        let content = match std::fs::read_to_string(self.path.as_std_path()) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(self.path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let env: Environment = serde_json::from_str(&content)?;

        // Incomplete entries are reported per service later; duplicate ids are ambiguous here.
        let mut seen = HashSet::new();
        for service in &env.services {
            if !seen.insert(service.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
        }
        Ok(env)
    }
}

impl ServiceConfigurationProvider for JsonEnvironmentProvider {
    fn current_environment(&self) -> Result<Environment, ConfigError> {
        self.load()
    }
}
