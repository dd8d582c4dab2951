//! Contract consumed from each exchange connector, plus its request / response models.
//!
//! Connectors (REST clients, signing, wire parsing) live outside this crate. They normalise
//! venue responses into the models below; raw transaction ids are passed through untouched
//! and cleaned up during reconciliation.

use crate::status::LegStatus;
use async_trait::async_trait;
use derive_more::{Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of a configured exchange account, eg/ "binance", "kucoin".
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct ExchangeName(pub SmolStr);

impl ExchangeName {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ExchangeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Withdrawal & deposit parameters of one settlement network for an asset.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkInfo {
    pub withdraw_enabled: bool,
    pub deposit_enabled: bool,
    /// Minimum withdrawal amount
    pub withdraw_min: Decimal,
    /// Maximum withdrawal amount, if the venue imposes one
    pub withdraw_max: Option<Decimal>,
    /// Flat withdrawal fee charged by the source venue
    pub withdraw_fee: Decimal,
}

impl NetworkInfo {
    /// Determines if `amount` is within this network's withdrawal limits.
    pub fn accepts(&self, amount: Decimal) -> bool {
        amount >= self.withdraw_min && self.withdraw_max.is_none_or(|max| amount <= max)
    }
}

/// Per network metadata for an asset on one exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssetInfo {
    pub asset: SmolStr,
    /// Keyed by network identifier, eg/ "TRC20", "ERC20".
    pub networks: BTreeMap<SmolStr, NetworkInfo>,
}

impl AssetInfo {
    /// Determines if any network permits withdrawal of the asset.
    pub fn withdraw_enabled(&self) -> bool {
        self.networks.values().any(|network| network.withdraw_enabled)
    }

    /// Determines if any network permits deposit of the asset.
    pub fn deposit_enabled(&self) -> bool {
        self.networks.values().any(|network| network.deposit_enabled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DepositAddress {
    pub address: String,
    pub network: SmolStr,
    /// Memo / tag required by some networks to credit the right account
    pub memo: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WithdrawalRequest {
    pub asset: SmolStr,
    pub amount: Decimal,
    pub address: String,
    pub network: SmolStr,
    pub memo: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal_id: SmolStr,
    pub status: LegStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WithdrawalInfo {
    pub status: LegStatus,
    /// Raw on-chain transaction id, which may carry venue specific suffixes.
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub asset: SmolStr,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DepositRecord {
    pub deposit_id: Option<SmolStr>,
    /// Raw on-chain transaction id, which may carry venue specific suffixes.
    pub transaction_id: Option<String>,
    pub status: LegStatus,
    pub amount: Decimal,
}

/// Errors returned by a [`TransferClient`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("exchange rejected request: {message} (code {code:?})")]
    Api {
        code: Option<String>,
        message: String,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Exchange connector operations required to move funds between accounts.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Available (free) balance of `asset`.
    async fn get_asset_balance(&self, asset: &str) -> Result<Decimal, ClientError>;

    async fn asset_info(&self, asset: &str) -> Result<AssetInfo, ClientError>;

    async fn get_deposit_address(
        &self,
        asset: &str,
        network: &str,
    ) -> Result<DepositAddress, ClientError>;

    async fn submit_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, ClientError>;

    async fn get_withdrawal_status(&self, withdrawal_id: &str)
    -> Result<WithdrawalInfo, ClientError>;

    /// Most recent `limit` deposits of `asset`.
    async fn get_deposit_history(
        &self,
        asset: &str,
        limit: u32,
    ) -> Result<Vec<DepositRecord>, ClientError>;
}
