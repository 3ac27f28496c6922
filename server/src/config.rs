use crate::rate_limit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
use anyhow::{anyhow, bail, Context};
use std::env::VarError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub max_requests: u32,
    pub window: Duration,
    pub catalog_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(read_env)
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> anyhow::Result<Option<String>>,
    {
        let host = lookup("HOST")?.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match lookup("PORT")? {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {value:?}"))?,
            None => DEFAULT_PORT,
        };
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .context("Invalid HOST/PORT combination")?;

        let max_requests = match lookup("RATE_LIMIT_MAX_REQUESTS")? {
            Some(value) => value.trim().parse::<u32>().with_context(|| {
                format!("RATE_LIMIT_MAX_REQUESTS must be a positive integer, got {value:?}")
            })?,
            None => DEFAULT_MAX_REQUESTS,
        };
        if max_requests == 0 {
            bail!("RATE_LIMIT_MAX_REQUESTS must be at least 1");
        }

        let window = match lookup("RATE_LIMIT_WINDOW_SECS")? {
            Some(value) => Duration::from_secs(value.trim().parse::<u64>().with_context(|| {
                format!("RATE_LIMIT_WINDOW_SECS must be a whole number of seconds, got {value:?}")
            })?),
            None => DEFAULT_WINDOW,
        };
        if window.is_zero() {
            bail!("RATE_LIMIT_WINDOW_SECS must be at least 1");
        }

        let catalog_path = lookup("CATALOG_PATH")?
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            addr,
            max_requests,
            window,
            catalog_path,
        })
    }
}

fn read_env(key: &str) -> anyhow::Result<Option<String>> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(err)) => Err(anyhow!("{key} contains invalid unicode: {err:?}")),
    }
}
