use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError};
use serde::Deserialize;

// https://github.com/mehcode/config-rs/blob/master/examples/hierarchical-env/src/settings.rs

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub http: HttpListener,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub connection: Option<DbConnection>,
    pub plans: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DbConnection {
    pub url: String,
    pub credentials: DbCredentials,
    #[serde(default = "default_pool")]
    pub pool: u32,
}

fn default_pool() -> u32 {
    15
}

#[derive(Debug, Deserialize)]
pub struct DbCredentials {
    pub user: String,
    pub pw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpListener {
    pub listen: SocketAddress,
    pub tls_key: Option<String>,
    pub tls_cert: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SocketAddress {
    pub domain: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Firebase project id; tokens must be issued for it.
    pub project: Option<String>,
    /// JSON map of key id to PEM public key. Signatures are only checked when set.
    pub keys: Option<String>,
    /// Directory lookup bound, milliseconds.
    pub timeout: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Oracle,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub images: Option<String>,
    pub upload_limit: usize,
}

impl AuthConfig {
    /// Configured project id, treating an empty value as unset.
    pub fn project_id(&self) -> Option<String> {
        self.project.clone().filter(|p| !p.trim().is_empty())
    }
}

fn defaults() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    config
        .set_default("http.listen.domain", "127.0.0.1")?
        .set_default("http.listen.port", 8787i64)?
        .set_default("auth.timeout", 5000i64)?
        .set_default("storage.backend", "memory")?
        .set_default("storage.upload-limit", 1_048_576i64)?
        .set_default("plans.free", 50i64)?
        .set_default("plans.premium", -1i64)?;
    Ok(config)
}

pub fn load_config() -> Result<ServerConfig, ConfigError> {
    let path = Path::new("config").join("config.toml");

    let mut config = defaults()?;
    config
        // Add in `./config/config.toml` when present
        .merge(config::File::from(path).required(false))?
        // Add in settings from the environment (with a prefix of APP)
        // Eg.. `APP_AUTH_PROJECT=my-project ./target/app` would set `auth.project`
        .merge(config::Environment::with_prefix("APP").separator("_"))?;

    config.try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> ServerConfig {
        let mut config = defaults().unwrap();
        config.merge(File::from_str(toml, FileFormat::Toml)).unwrap();
        config.try_into().unwrap()
    }

    #[test]
    fn defaults_apply_without_file() {
        let config = parse("");
        assert_eq!(config.http.listen.domain, "127.0.0.1");
        assert_eq!(config.http.listen.port, 8787);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.upload_limit, 1_048_576);
        assert_eq!(config.auth.timeout, 5000);
        assert!(config.auth.project_id().is_none());
        assert!(config.connection.is_none());
        assert_eq!(config.plans.get("free"), Some(&50));
        assert_eq!(config.plans.get("premium"), Some(&-1));
    }

    #[test]
    fn file_values_override_defaults() {
        let config = parse(
            r#"
            [http.listen]
            domain = "0.0.0.0"
            port = 9000

            [auth]
            project = "proj1"
            timeout = 250

            [storage]
            backend = "oracle"
            images = "/var/lib/kobutsu/images"

            [connection]
            url = "//db:1521/KOBUTSU"
            pool = 4

            [connection.credentials]
            user = "KOBUTSU"
            pw = "secret"

            [plans]
            free = 10
            "#,
        );
        assert_eq!(config.http.listen.port, 9000);
        assert_eq!(config.auth.project_id().as_deref(), Some("proj1"));
        assert_eq!(config.auth.timeout, 250);
        assert_eq!(config.storage.backend, StorageBackend::Oracle);
        assert_eq!(config.storage.images.as_deref(), Some("/var/lib/kobutsu/images"));
        let connection = config.connection.unwrap();
        assert_eq!(connection.pool, 4);
        assert_eq!(connection.credentials.user, "KOBUTSU");
        assert_eq!(config.plans.get("free"), Some(&10));
        assert_eq!(config.plans.get("premium"), Some(&-1));
    }

    #[test]
    fn blank_project_counts_as_unset() {
        let config = parse("[auth]\nproject = \"  \"\n");
        assert!(config.auth.project_id().is_none());
    }
}
