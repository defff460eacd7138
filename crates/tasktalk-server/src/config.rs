use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "secret"];

/// Server settings, read from `TASKTALK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub token_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect(), cfg!(debug_assertions))
    }

    fn from_vars(vars: HashMap<String, String>, allow_placeholder: bool) -> Result<Self> {
        let get = |key: &str, default: &str| {
            vars.get(&format!("TASKTALK_{}", key))
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let jwt_secret = get("JWT_SECRET", "dev-secret-change-me");
        if !allow_placeholder && PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TASKTALK_JWT_SECRET is unset or a placeholder; refusing to start");
        }

        let host = get("HOST", "0.0.0.0");
        let port: u16 = get("PORT", "3000")
            .parse()
            .context("TASKTALK_PORT must be a port number")?;
        let token_ttl_days: i64 = get("TOKEN_TTL_DAYS", "30")
            .parse()
            .context("TASKTALK_TOKEN_TTL_DAYS must be a whole number of days")?;
        if token_ttl_days <= 0 {
            bail!("TASKTALK_TOKEN_TTL_DAYS must be positive");
        }

        let public_url = get("PUBLIC_URL", &format!("http://localhost:{}/files", port));

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(get("DB_PATH", "tasktalk.db")),
            host,
            port,
            storage_dir: PathBuf::from(get("STORAGE_DIR", "storage")),
            public_url: public_url.trim_end_matches('/').to_string(),
            token_ttl_days,
        })
    }
}
