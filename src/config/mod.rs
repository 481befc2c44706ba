//! Global configuration: parsed once at startup, published behind an
//! [`ArcSwap`] so every connection task reads the latest snapshot without
//! locking, via a `CONFIG: Lazy<ArcSwap<Config>>` static.

pub mod byte_size;
pub mod duration;
pub mod general;
pub mod user;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub use general::General;
pub use user::AuthMethod;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: General,
}

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Returns the currently active configuration snapshot.
pub fn get_config() -> Arc<Config> {
    CONFIG.load_full()
}

/// Replaces the active configuration. Used at startup; the core never
/// hot-reloads on its own, but nothing prevents a caller from doing so.
pub fn set_config(config: Config) {
    CONFIG.store(Arc::new(config));
}

/// Parses a TOML config file and installs it as the active configuration.
pub fn load_from_file(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    let config: Config =
        toml::from_str(&text).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
    set_config(config);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = Config::default();
        assert_eq!(config.general.listen_port, 5433);
        assert_eq!(config.general.max_connections, 100);
        assert!(config.general.stats_enabled);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            [general]
            listen_port = 6543
            auth_method = "md5"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.general.listen_port, 6543);
        assert_eq!(config.general.auth_method, AuthMethod::Md5);
        assert_eq!(config.general.listen_host, "0.0.0.0");
    }
}
