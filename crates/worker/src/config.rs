use std::path::PathBuf;
use std::time::Duration;

use geoincra_core::credentials::CredentialCipher;
use geoincra_core::job_types;
use geoincra_core::storage::{StoragePaths, DEFAULT_BACKEND_UPLOADS_BASE, DEFAULT_DATA_DIR};
use geoincra_portals::onr_sigri::CertificateConfig;

use crate::stores::ClaimScope;

const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BROWSER_TIMEOUT_SECS: u64 = 60;

/// Errors from [`WorkerConfig::from_env`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Worker volume and the backend's view of it.
    pub storage: StoragePaths,
    pub webdriver_url: String,
    /// `None` claims any type.
    pub job_types: Option<Vec<String>>,
    /// Base64 AES-256 key for sealed credential secrets.
    pub credentials_key: Option<String>,
    pub onr_certificate: CertificateConfig,
    /// Chrome profile holding the imported ONR client certificate. Only
    /// read; every ONR session starts from its own copy.
    pub onr_browser_profile: Option<PathBuf>,
    pub db_max_connections: u32,
    pub browser_timeout: Duration,
    pub run_migrations: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `DATABASE_URL`         | required                 |
    /// | `DATA_DIR`             | `/data`                  |
    /// | `BACKEND_UPLOADS_BASE` | `/app/app/uploads`       |
    /// | `WEBDRIVER_URL`        | `http://localhost:9515`  |
    /// | `WORKER_JOB_TYPES`     | unset (any type)         |
    /// | `CREDENTIALS_KEY`      | unset                    |
    /// | `ONR_PFX_PATH`         | unset                    |
    /// | `ONR_PFX_PASSWORD`     | empty                    |
    /// | `ONR_BROWSER_PROFILE`  | unset                    |
    /// | `DB_MAX_CONNECTIONS`   | `5`                      |
    /// | `BROWSER_TIMEOUT_SECS` | `60`                     |
    /// | `RUN_MIGRATIONS`       | `false`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable
    /// source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let storage = StoragePaths::new(
            get("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()),
            get("BACKEND_UPLOADS_BASE").unwrap_or_else(|| DEFAULT_BACKEND_UPLOADS_BASE.into()),
        );

        let webdriver_url = get("WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.into());

        let job_types = get("WORKER_JOB_TYPES")
            .map(|raw| parse_job_types(&raw))
            .transpose()?;

        let onr_certificate = CertificateConfig {
            pfx_path: get("ONR_PFX_PATH").map(PathBuf::from),
            password: lookup("ONR_PFX_PASSWORD").unwrap_or_default(),
        };

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(v) => parse_number::<u32>("DB_MAX_CONNECTIONS", &v)?,
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DB_MAX_CONNECTIONS",
                reason: "must be at least 1".into(),
            });
        }

        let browser_timeout_secs = match get("BROWSER_TIMEOUT_SECS") {
            Some(v) => parse_number::<u64>("BROWSER_TIMEOUT_SECS", &v)?,
            None => DEFAULT_BROWSER_TIMEOUT_SECS,
        };

        let run_migrations = match get("RUN_MIGRATIONS") {
            Some(v) => parse_bool("RUN_MIGRATIONS", &v)?,
            None => false,
        };

        Ok(Self {
            database_url,
            storage,
            webdriver_url,
            job_types,
            credentials_key: get("CREDENTIALS_KEY"),
            onr_certificate,
            onr_browser_profile: get("ONR_BROWSER_PROFILE").map(PathBuf::from),
            db_max_connections,
            browser_timeout: Duration::from_secs(browser_timeout_secs),
            run_migrations,
        })
    }

    pub fn claim_scope(&self) -> ClaimScope {
        match &self.job_types {
            Some(types) => ClaimScope::Types(types.clone()),
            None => ClaimScope::Any,
        }
    }

    /// Cipher for stored secrets; disabled when no key is configured.
    pub fn cipher(&self) -> Result<CredentialCipher, ConfigError> {
        match &self.credentials_key {
            Some(key) => CredentialCipher::from_base64_key(key).map_err(|e| ConfigError::Invalid {
                var: "CREDENTIALS_KEY",
                reason: e.to_string(),
            }),
            None => Ok(CredentialCipher::disabled()),
        }
    }

    /// Where browser sessions put their downloads before they are moved
    /// into the provider directories.
    pub fn download_root(&self) -> PathBuf {
        self.storage.data_dir.join(".downloads")
    }
}

fn parse_job_types(raw: &str) -> Result<Vec<String>, ConfigError> {
    let types: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(unknown) = types.iter().find(|t| !job_types::is_supported(t)) {
        return Err(ConfigError::Invalid {
            var: "WORKER_JOB_TYPES",
            reason: format!("unknown job type `{unknown}`"),
        });
    }
    if types.is_empty() {
        return Err(ConfigError::Invalid {
            var: "WORKER_JOB_TYPES",
            reason: "no job types listed".into(),
        });
    }
    Ok(types)
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected true/false, got `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    const DB: (&str, &str) = ("DATABASE_URL", "postgres://localhost/geoincra");

    #[test]
    fn defaults() {
        let config = load(&[DB]).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/data"));
        assert_eq!(config.storage.serving_base, PathBuf::from("/app/app/uploads"));
        assert_eq!(config.webdriver_url, "http://localhost:9515");
        assert_eq!(config.claim_scope(), ClaimScope::Any);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.browser_timeout, Duration::from_secs(60));
        assert!(!config.run_migrations);
        assert!(config.onr_certificate.pfx_path.is_none());
        assert!(!config.cipher().unwrap().is_enabled());
        assert_eq!(config.download_root(), PathBuf::from("/data/.downloads"));
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert_matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn overrides() {
        let config = load(&[
            DB,
            ("DATA_DIR", "/mnt/worker"),
            ("BACKEND_UPLOADS_BASE", "/srv/uploads"),
            ("WORKER_JOB_TYPES", "RI_DIGITAL_MATRICULA, ONR_SIGRI_CONSULTA"),
            ("ONR_PFX_PATH", "/data/certs/onr.pfx"),
            ("ONR_PFX_PASSWORD", "senha"),
            ("DB_MAX_CONNECTIONS", "2"),
            ("BROWSER_TIMEOUT_SECS", "90"),
            ("RUN_MIGRATIONS", "true"),
        ])
        .unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/mnt/worker"));
        assert_eq!(
            config.claim_scope(),
            ClaimScope::Types(vec![
                "RI_DIGITAL_MATRICULA".into(),
                "ONR_SIGRI_CONSULTA".into()
            ])
        );
        assert_eq!(
            config.onr_certificate.pfx_path,
            Some(PathBuf::from("/data/certs/onr.pfx"))
        );
        assert_eq!(config.onr_certificate.password, "senha");
        assert_eq!(config.db_max_connections, 2);
        assert_eq!(config.browser_timeout, Duration::from_secs(90));
        assert!(config.run_migrations);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert_matches!(
            load(&[DB, ("DB_MAX_CONNECTIONS", "many")]),
            Err(ConfigError::Invalid { var: "DB_MAX_CONNECTIONS", .. })
        );
        assert_matches!(
            load(&[DB, ("DB_MAX_CONNECTIONS", "0")]),
            Err(ConfigError::Invalid { var: "DB_MAX_CONNECTIONS", .. })
        );
        assert_matches!(
            load(&[DB, ("RUN_MIGRATIONS", "maybe")]),
            Err(ConfigError::Invalid { var: "RUN_MIGRATIONS", .. })
        );
        assert_matches!(
            load(&[DB, ("WORKER_JOB_TYPES", "FOO")]),
            Err(ConfigError::Invalid { var: "WORKER_JOB_TYPES", .. })
        );
        assert_matches!(
            load(&[DB, ("WORKER_JOB_TYPES", " , ")]),
            Err(ConfigError::Invalid { var: "WORKER_JOB_TYPES", .. })
        );
    }

    #[test]
    fn bad_credentials_key_is_reported() {
        let config = load(&[DB, ("CREDENTIALS_KEY", "c2hvcnQ=")]).unwrap();
        assert_matches!(
            config.cipher(),
            Err(ConfigError::Invalid { var: "CREDENTIALS_KEY", .. })
        );
    }
}
