//! Configuration management for Rowguard Core

use anyhow::{bail, Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upstream authentication boundary
    pub auth: AuthBoundaryConfig,
    /// Auto-provisioning behaviour
    pub provisioning: ProvisioningConfig,
    /// Logging configuration
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Settings shared with the authentication boundary that issues principal tokens.
#[derive(Debug, Clone)]
pub struct AuthBoundaryConfig {
    /// HS256 secret used to read the already-verified principal id
    pub jwt_secret: String,
    /// Expected `iss` claim, if pinned
    pub jwt_issuer: Option<String>,
    /// HMAC-SHA256 secret for the principal-created webhook
    pub webhook_secret: Option<String>,
}

/// What the provisioning hook does when a genuine (non-duplicate) failure occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningFailureMode {
    /// Log and continue; the signup flow is never failed by provisioning.
    #[default]
    Swallow,
    /// Return the error to the caller of the hook.
    Propagate,
}

impl std::str::FromStr for ProvisioningFailureMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "swallow" => Ok(ProvisioningFailureMode::Swallow),
            "propagate" => Ok(ProvisioningFailureMode::Propagate),
            other => Err(format!("Unknown provisioning failure mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Email domain whose principals receive the top role tier
    pub home_domain: String,
    pub failure_mode: ProvisioningFailureMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            auth: AuthBoundaryConfig {
                jwt_secret: env::var("AUTH_JWT_SECRET").context("AUTH_JWT_SECRET is required")?,
                jwt_issuer: env::var("AUTH_JWT_ISSUER").ok().filter(|s| !s.is_empty()),
                webhook_secret: env::var("AUTH_EVENT_WEBHOOK_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            provisioning: ProvisioningConfig {
                home_domain: parse_home_domain(
                    &env::var("HOME_DOMAIN").context("HOME_DOMAIN is required")?,
                )?,
                failure_mode: env::var("PROVISIONING_FAILURE_MODE")
                    .unwrap_or_else(|_| "swallow".to_string())
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid PROVISIONING_FAILURE_MODE")?,
            },
            telemetry: TelemetryConfig {
                log_format: env::var("LOG_FORMAT")
                    .unwrap_or_else(|_| "pretty".to_string())
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid LOG_FORMAT")?,
            },
        })
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

/// Normalise the configured home domain; a leading `@` is tolerated.
fn parse_home_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().trim_start_matches('@').to_ascii_lowercase();
    if domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        bail!("HOME_DOMAIN must be a bare domain such as example.org");
    }
    Ok(domain)
}
