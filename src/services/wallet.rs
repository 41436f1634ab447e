//! Wallet ledger collaborator.
//!
//! The prepaid wallet is an external service; this module defines the
//! contract the billing engine consumes and an HTTP client implementation.

use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-organization prepaid balance with an at-most-once debit primitive.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn get_balance(&self, organization_id: Uuid) -> Result<Decimal, AppError>;

    /// Attempt one debit. `Ok(Some(id))` carries the ledger's transaction
    /// reference; `Ok(None)` means the ledger declined the debit. Must be
    /// called at most once per billing cycle.
    async fn debit(
        &self,
        organization_id: Uuid,
        amount: Decimal,
        memo: &str,
    ) -> Result<Option<Uuid>, AppError>;
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Decimal,
}

#[derive(Debug, Serialize)]
struct DebitRequest<'a> {
    amount: Decimal,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct DebitResponse {
    success: bool,
    transaction_id: Option<Uuid>,
}

/// HTTP client for the wallet ledger service.
#[derive(Clone)]
pub struct HttpWalletClient {
    client: Client,
    base_url: String,
}

impl HttpWalletClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl WalletLedger for HttpWalletClient {
    async fn get_balance(&self, organization_id: Uuid) -> Result<Decimal, AppError> {
        let url = format!("{}/wallets/{}/balance", self.base_url, organization_id);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Wallet balance request failed: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Wallet balance request returned {}",
                response.status()
            )));
        }

        let body: BalanceResponse = response.json().await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Invalid wallet balance response: {}", e))
        })?;

        Ok(body.balance)
    }

    async fn debit(
        &self,
        organization_id: Uuid,
        amount: Decimal,
        memo: &str,
    ) -> Result<Option<Uuid>, AppError> {
        let url = format!("{}/wallets/{}/debit", self.base_url, organization_id);
        let response = self
            .client
            .post(&url)
            .json(&DebitRequest { amount, memo })
            .send()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Wallet debit request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Wallet debit request returned {}",
                response.status()
            )));
        }

        let body: DebitResponse = response.json().await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Invalid wallet debit response: {}", e))
        })?;

        if body.success {
            Ok(body.transaction_id.or_else(|| Some(Uuid::new_v4())))
        } else {
            Ok(None)
        }
    }
}
