use crate::services::pricing::PricingRates;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use std::env;

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub wallet: WalletConfig,
    pub activity: ActivityConfig,
    pub pricing: PricingRates,
    pub nodes: NodeConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Endpoint of the external wallet ledger service.
#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub url: String,
}

/// Endpoint of the external activity/notification service.
#[derive(Clone, Debug)]
pub struct ActivityConfig {
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Nodes whose last heartbeat is older than this are swept offline.
    pub heartbeat_threshold_minutes: i64,
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<Decimal>()
        .with_context(|| format!("{} must be a decimal number", key))
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3006".to_string())
            .parse()
            .context("BILLING_SERVICE_PORT must be a port number")?;

        let db_url = env::var("BILLING_DATABASE_URL").context("BILLING_DATABASE_URL must be set")?;
        let max_connections = env::var("BILLING_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("BILLING_DB_MAX_CONNECTIONS must be an integer")?;
        let min_connections = env::var("BILLING_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("BILLING_DB_MIN_CONNECTIONS must be an integer")?;

        let wallet_url =
            env::var("WALLET_SERVICE_URL").unwrap_or_else(|_| "http://localhost:3004".to_string());
        let activity_url =
            env::var("ACTIVITY_SERVICE_URL").unwrap_or_else(|_| "http://localhost:3005".to_string());

        let pricing = PricingRates {
            cpu_core_hour: env_decimal("PRICE_CPU_CORE_HOUR", "0.012")?,
            memory_gb_hour: env_decimal("PRICE_MEMORY_GB_HOUR", "0.005")?,
            storage_gb_hour: env_decimal("PRICE_STORAGE_GB_HOUR", "0.0002")?,
            network_gb: env_decimal("PRICE_NETWORK_GB", "0.01")?,
            build_minute: env_decimal("PRICE_BUILD_MINUTE", "0.008")?,
        };

        let heartbeat_threshold_minutes = env::var("NODE_HEARTBEAT_THRESHOLD_MINUTES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("NODE_HEARTBEAT_THRESHOLD_MINUTES must be an integer")?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            wallet: WalletConfig { url: wallet_url },
            activity: ActivityConfig { url: activity_url },
            pricing,
            nodes: NodeConfig {
                heartbeat_threshold_minutes,
            },
            service_name: "compute-billing-service".to_string(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
        })
    }
}
