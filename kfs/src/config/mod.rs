//! Configuration.

pub mod error;

#[cfg(test)]
mod tests;

pub use error::Error;

use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::normalize_listen;

/// Gateway configuration, immutable after startup.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address, `[host]:port`. A bare `:port` binds all interfaces.
    #[serde(default = "Config::default_listen")]
    pub listen: String,

    /// Keytab holding the service principal's long-term key.
    #[serde(default = "Config::default_keytab")]
    pub keytab: PathBuf,

    /// Path to the user file server binary spawned per user.
    #[serde(default = "Config::default_user_file_server")]
    pub user_file_server: PathBuf,

    /// Kerberos service principal name. Default: `HTTP/<hostname>`.
    pub service_name: Option<String>,

    /// Realms tried, in order, for password logins with a bare username.
    #[serde(default)]
    pub realms: Vec<String>,

    /// TLS certificate file. Required.
    pub tls_cert_file: Option<PathBuf>,

    /// TLS private key file. Required.
    pub tls_key_file: Option<PathBuf>,

    /// Maximum lifetime of a user file server, in seconds.
    /// 0 means the delegated ticket's lifetime is used as-is.
    #[serde(default)]
    pub max_lifetime: u64,

    /// URL pattern prefix to exported filesystem path. Values may
    /// contain the `{{HOME}}` and `{{USER}}` placeholders, substituted
    /// per user.
    #[serde(default = "Config::default_routes")]
    pub routes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            keytab: Self::default_keytab(),
            user_file_server: Self::default_user_file_server(),
            service_name: None,
            realms: Vec::new(),
            tls_cert_file: None,
            tls_key_file: None,
            max_lifetime: 0,
            routes: Self::default_routes(),
        }
    }
}

impl Config {
    fn default_listen() -> String {
        ":8080".into()
    }

    fn default_keytab() -> PathBuf {
        "/etc/krb5.keytab".into()
    }

    fn default_user_file_server() -> PathBuf {
        "kfs-user".into()
    }

    fn default_routes() -> BTreeMap<String, String> {
        let mut routes = BTreeMap::new();
        routes.insert("/".to_string(), "{{HOME}}".to_string());
        routes
    }

    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Config = toml::from_str(&read_to_string(path)?)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.tls_cert_file.is_none() {
            return Err(Error::MissingTlsCert);
        }

        if self.tls_key_file.is_none() {
            return Err(Error::MissingTlsKey);
        }

        for (pattern, path) in &self.routes {
            if pattern.is_empty() || path.is_empty() {
                return Err(Error::EmptyRoute(pattern.clone(), path.clone()));
            }
        }

        Ok(())
    }

    /// TLS certificate and key. Only valid after [`Self::load`].
    pub fn tls(&self) -> Result<(&Path, &Path), Error> {
        let cert = self.tls_cert_file.as_deref().ok_or(Error::MissingTlsCert)?;
        let key = self.tls_key_file.as_deref().ok_or(Error::MissingTlsKey)?;

        Ok((cert, key))
    }

    /// Listen address in a form `TcpListener::bind` accepts.
    pub fn listen_addr(&self) -> String {
        normalize_listen(&self.listen)
    }

    /// Maximum child lifetime. Zero means unbounded.
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime)
    }

    /// Service principal name, defaulting to `HTTP/<hostname>`.
    pub fn service_name(&self) -> Result<String, Error> {
        if let Some(name) = &self.service_name {
            return Ok(name.clone());
        }

        let hostname = nix::unistd::gethostname()?;
        let hostname = hostname.to_string_lossy();

        Ok(format!("HTTP/{}", hostname))
    }
}
