//! Process configuration, read from the environment (and `.env` via dotenvy).

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_TOKENS: u32 = 300;
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_BIND: &str = "0.0.0.0:3000";

/// How URL input is turned into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlMode {
    /// Hand the URL to the provider untouched.
    #[default]
    PassThrough,
    /// Download the image and normalize it like an upload.
    Fetch,
}

impl FromStr for UrlMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "pass-through" | "pass_through" => Ok(UrlMode::PassThrough),
            "fetch" => Ok(UrlMode::Fetch),
            other => Err(anyhow!(
                "unknown url mode '{other}', expected 'passthrough' or 'fetch'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` is allowed; requests then fail with a configuration error.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub api_base: String,
    pub url_mode: UrlMode,
    pub bind: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_tokens = match get("CRITIC_MAX_TOKENS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("CRITIC_MAX_TOKENS must be a number, got '{raw}'"))?,
            None => DEFAULT_MAX_TOKENS,
        };
        if max_tokens == 0 {
            bail!("CRITIC_MAX_TOKENS must be greater than zero");
        }

        let url_mode = match get("CRITIC_URL_MODE") {
            Some(raw) => raw.parse()?,
            None => UrlMode::default(),
        };

        let bind_raw = get("CRITIC_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse()
            .with_context(|| format!("CRITIC_BIND is not a socket address: '{bind_raw}'"))?;

        Ok(Config {
            api_key: get("OPENAI_API_KEY"),
            model: get("CRITIC_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens,
            api_base: get("OPENAI_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            url_mode,
            bind,
        })
    }
}
