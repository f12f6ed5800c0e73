use clap::Parser;
use std::path::{Path, PathBuf};

/// Command line interface for the sentinel daemon.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to a configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to a directory containing additional TOML config files.
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Override the control socket path.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Watch this directory instead of the configured roots (repeatable).
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Resolve configuration paths in precedence order (earlier overridden by later).
    pub fn resolve_config_paths(&self) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut paths = Vec::new();

        if let Some(config) = &self.config {
            if !config.is_file() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("configuration file does not exist: {}", config.display()),
                ));
            }
            paths.push(config.clone());

            // An explicitly named drop-in directory must exist; read_dir
            // reports a missing or non-directory path on its own.
            if let Some(dir) = &self.config_dir {
                paths.extend(toml_files_in(dir)?);
            }

            return Ok(paths);
        }

        let system = system_config_path();
        if system.is_file() {
            paths.push(system);
        }

        // The stock drop-in directory is optional.
        let dropin = system_config_dir();
        if dropin.is_dir() {
            paths.extend(toml_files_in(&dropin)?);
        }

        if let Some(dir) = &self.config_dir {
            paths.extend(toml_files_in(dir)?);
        }

        Ok(paths)
    }

    /// Fold command-line overrides into a loaded configuration.
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(socket) = &self.socket {
            config.control.socket_path = socket.clone();
        }
        if !self.roots.is_empty() {
            config.monitor.roots = self.roots.clone();
        }
    }

    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// TOML fragments of a drop-in directory, sorted by name so numbered
/// prefixes (`10-site.toml`, `20-host.toml`) apply in order.
fn toml_files_in(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut fragments: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    fragments.sort();
    Ok(fragments)
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/sentinel/config.toml")
}

fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc/sentinel/config.d")
}
