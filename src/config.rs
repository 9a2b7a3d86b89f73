//! Environment configuration: `CONFIG_DIR`, `DATA_DIR`, `TZ`, `LOG_LEVEL`
//! (§6) and the CLI overrides layered on top of them (SPEC_FULL.md §D).

use std::path::PathBuf;

use clap::Parser;

/// Process-level flags. Each one overrides the matching environment
/// variable when present; operators without env var access in their
/// deployment can still configure the service.
#[derive(Debug, Parser)]
#[command(name = "epg-merged", about = "Scheduled multi-source XMLTV EPG merge service")]
pub struct Cli {
    /// Overrides CONFIG_DIR.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Overrides DATA_DIR.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Run pending Store migrations and exit without starting the
    /// scheduler or HTTP server.
    #[arg(long)]
    pub migrate_only: bool,

    /// Overrides PORT (loopback bind port for the Facade's HTTP surface).
    #[arg(long)]
    pub port: Option<u16>,
}

/// Resolved data directories (§6 "Persisted state layout").
#[derive(Debug, Clone)]
pub struct Paths {
    pub current_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub channels_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Paths {
    pub fn under(data_dir: &std::path::Path) -> Self {
        Self {
            current_dir: data_dir.join("current"),
            archive_dir: data_dir.join("archives"),
            channels_dir: data_dir.join("channels"),
            tmp_dir: data_dir.join("tmp"),
            cache_dir: data_dir.join("epg_cache"),
        }
    }

    pub fn ensure_exist(&self) -> std::io::Result<()> {
        for dir in [
            &self.current_dir,
            &self.archive_dir,
            &self.channels_dir,
            &self.tmp_dir,
            &self.cache_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub paths: Paths,
    pub db_path: PathBuf,
    pub log_level: String,
    pub port: u16,
    /// Zone `merge_time` is interpreted in before cron evaluation (§3, §6).
    /// Defaults to UTC when `TZ` is unset or not a recognised IANA name.
    pub tz: chrono_tz::Tz,
}

/// Parse an IANA timezone name, falling back to UTC on anything unrecognised
/// (an operator typo in `TZ` should not crash the process at startup).
fn parse_tz(value: &str) -> chrono_tz::Tz {
    value.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

impl Config {
    pub fn resolve(cli: &Cli) -> Self {
        let config_dir = cli
            .config_dir
            .clone()
            .or_else(|| std::env::var_os("CONFIG_DIR").map(PathBuf::from))
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("epg-merged")
            });

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var_os("DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("epg-merged")
            });

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let db_path = config_dir.join("app.db");
        let paths = Paths::under(&data_dir);

        let port = cli
            .port
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(8080);

        let tz = std::env::var("TZ").ok().as_deref().map(parse_tz).unwrap_or(chrono_tz::UTC);

        Self {
            config_dir,
            data_dir,
            paths,
            db_path,
            log_level,
            port,
            tz,
        }
    }

    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tz_accepts_iana_names() {
        assert_eq!(parse_tz("America/New_York"), chrono_tz::America::New_York);
        assert_eq!(parse_tz("UTC"), chrono_tz::UTC);
    }

    #[test]
    fn parse_tz_falls_back_to_utc_on_garbage() {
        assert_eq!(parse_tz("not-a-zone"), chrono_tz::UTC);
        assert_eq!(parse_tz(""), chrono_tz::UTC);
    }
}
