use catalog_core::EngineConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the engine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Data directory (overrides the config file)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub log_level: String,
    pub engine: EngineConfig,
    /// Restores land in `<restores_dir>/<name>`
    pub restores_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env(args: &Args) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut engine = match &args.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        engine.apply_env_overrides()?;
        if let Ok(cron) = std::env::var("DATA_AGING_CRON") {
            engine.retention.data_aging_cron = cron;
        }
        if let Some(dir) = &args.data_dir {
            engine.data_dir = dir.clone();
        }
        engine.validate()?;

        let port = match args.port {
            Some(port) => port,
            None => std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
        };
        let log_level = args
            .log_level
            .clone()
            .or_else(|| std::env::var("LOG_LEVEL").ok())
            .unwrap_or_else(|| engine.log.level.clone());

        Ok(Self {
            port,
            log_level,
            restores_dir: engine.data_dir.join("restores"),
            engine,
        })
    }

    /// Configuration rooted at `data_dir`, for tests.
    #[cfg(test)]
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        let engine = EngineConfig::with_data_dir(data_dir);
        Self {
            port: 0,
            log_level: "info".into(),
            restores_dir: data_dir.join("restores"),
            engine,
        }
    }
}
