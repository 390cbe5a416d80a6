use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,

    #[serde(default = "default_base_uri")]
    pub base_uri: String,

    /// Where PUT bodies are spooled before they reach the tree.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Let the in-memory backend take the atomic extended-MKCOL path.
    #[serde(default)]
    pub extended_mkcol: bool,

    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,

    pub auth: Option<AuthConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_realm")]
    pub realm: String,

    /// username -> password
    pub users: HashMap<String, String>,
}

pub fn read_config(config_file: PathBuf) -> Result<Config> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

fn default_base_uri() -> String {
    "/".into()
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("davit-staging")
}

fn default_quota_bytes() -> u64 {
    // 1 GiB
    1 << 30
}

fn default_realm() -> String {
    "Davit".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(r#"bind_addr = "127.0.0.1:8080""#).unwrap();
        assert_eq!(config.base_uri, "/");
        assert!(!config.extended_mkcol);
        assert_eq!(config.quota_bytes, 1 << 30);
        assert!(config.auth.is_none());
    }

    #[test]
    fn auth_section_is_parsed() {
        let config: Config = toml::from_str(
            r#"
bind_addr = "[::]:8080"
base_uri = "/dav/"

[auth]
realm = "Files"

[auth.users]
alice = "hunter2"
"#,
        )
        .unwrap();
        let auth = config.auth.unwrap();
        assert_eq!(auth.realm, "Files");
        assert_eq!(auth.users.get("alice").map(String::as_str), Some("hunter2"));
    }
}
