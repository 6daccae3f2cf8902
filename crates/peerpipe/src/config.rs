use std::fs::{create_dir_all, read_to_string, write};

use camino::Utf8Path;
use eyre::{Result as EyreResult, WrapErr};
use libp2p::identity::Keypair;
use peerpipe_network::identity::{self, serde_identity};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(with = "serde_identity", default = "identity::generate")]
    pub identity: Keypair,

    /// Listen port used when none is given on the command line.
    #[serde(default)]
    pub port: u16,
}

impl ConfigFile {
    #[must_use]
    pub const fn new(identity: Keypair, port: u16) -> Self {
        Self { identity, port }
    }

    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        toml::from_str(&content).wrap_err_with(|| format!("invalid configuration in {path:?}"))
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        create_dir_all(dir).wrap_err_with(|| format!("failed to create {dir:?}"))?;

        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }

    /// Loads the configuration in `dir`, creating one with a fresh identity
    /// on first use.
    pub fn load_or_init(dir: &Utf8Path) -> EyreResult<Self> {
        if Self::exists(dir) {
            return Self::load(dir);
        }

        let config = Self::new(identity::generate(), 0);
        config.save(dir)?;

        Ok(config)
    }
}
