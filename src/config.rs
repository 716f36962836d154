use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use ipnet::IpNet;
use std::fmt;
use std::env;
use std::str::FromStr;

use crate::services::compliance::ComplianceLimits;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

impl fmt::Display for AllowedIps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedIps::Any => f.write_str("*"),
            AllowedIps::Cidrs(networks) => {
                let rendered: Vec<String> = networks.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Falls back to the in-process store when unset.
    pub database_url: Option<String>,
    pub webhook_secret: String,
    pub allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
    pub compliance: ComplianceLimits,
    pub retry_poll_secs: u64,
    pub webhook_max_attempts: i32,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_url: None,
            webhook_secret: String::new(),
            allowed_ips: AllowedIps::Any,
            trusted_proxy_depth: 0,
            compliance: ComplianceLimits::default(),
            retry_poll_secs: 60,
            webhook_max_attempts: 5,
            log_format: LogFormat::Text,
        }
    }
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let defaults = ComplianceLimits::default();
        let compliance = ComplianceLimits {
            single_transaction_limit: decimal_var(
                "SINGLE_TRANSACTION_LIMIT",
                defaults.single_transaction_limit.clone(),
            )?,
            daily_limit: decimal_var("DAILY_LIMIT", defaults.daily_limit.clone())?,
            approval_threshold: decimal_var("APPROVAL_THRESHOLD", defaults.approval_threshold.clone())?,
            velocity_max_transactions: parsed_var(
                "VELOCITY_MAX_TRANSACTIONS",
                defaults.velocity_max_transactions,
            )?,
        };

        let webhook_secret = env::var("WEBHOOK_SECRET").unwrap_or_default();
        if webhook_secret.is_empty() {
            tracing::warn!("WEBHOOK_SECRET is not set; webhook signatures cannot be verified");
        }

        Ok(Config {
            server_port: parsed_var("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            webhook_secret,
            allowed_ips: parse_allowed_ips(&env::var("ALLOWED_IPS").unwrap_or_else(|_| "*".to_string()))?,
            trusted_proxy_depth: parsed_var("TRUSTED_PROXY_DEPTH", 0)?,
            compliance,
            retry_poll_secs: parsed_var("RETRY_POLL_SECS", 60)?,
            webhook_max_attempts: parsed_var("WEBHOOK_MAX_ATTEMPTS", 5)?,
            log_format: LogFormat::from_env(),
        })
    }
}

fn parsed_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn decimal_var(name: &str, default: BigDecimal) -> anyhow::Result<BigDecimal> {
    let value: BigDecimal = parsed_var(name, default)?;
    if value <= BigDecimal::from(0) {
        anyhow::bail!("{} must be positive", name);
    }
    Ok(value)
}

pub fn parse_allowed_ips(raw: &str) -> anyhow::Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<IpNet>)
        .collect::<Result<Vec<_>, _>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}
