#![forbid(unsafe_code)]

mod control;
mod error;
mod gate;
mod monitor;
mod pool;
mod quarantine;
mod scanner;

pub use control::Control;
pub use error::Error;
pub use gate::Gate;
pub use monitor::Monitor;
pub use pool::Pool;
pub use quarantine::Quarantine;
pub use scanner::Scanner;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub monitor: Monitor,
    pub pool: Pool,
    pub scanner: Scanner,
    pub quarantine: Quarantine,
    pub control: Control,
    pub gate: Gate,
}

impl Config {
    /// Load configuration from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml_edit::de::from_str(&text)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from multiple TOML files. Later files override earlier ones.
    pub fn load_multiple<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut merged = toml_edit::DocumentMut::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let layer: toml_edit::DocumentMut = text.parse()?;
            overlay_table(merged.as_table_mut(), layer.as_table());
        }
        let config: Config = toml_edit::de::from_str(&merged.to_string())?;
        Ok(config)
    }
}

/// Fold `layer` into `base`, key by key. Section tables combine
/// recursively; any other item, arrays included, is replaced wholesale,
/// so a later file can shrink a root list as well as extend it.
fn overlay_table(base: &mut toml_edit::Table, layer: &toml_edit::Table) {
    for (key, incoming) in layer.iter() {
        match (base.remove(key), incoming) {
            (Some(toml_edit::Item::Table(mut existing)), toml_edit::Item::Table(update)) => {
                overlay_table(&mut existing, update);
                base.insert(key, toml_edit::Item::Table(existing));
            }
            (_, item) => {
                base.insert(key, item.clone());
            }
        }
    }
}
