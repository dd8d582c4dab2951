//! [`TransferRequest`]: one fund movement, tracking its withdrawal and deposit legs
//! independently.

use crate::{
    client::{DepositRecord, ExchangeName, WithdrawalInfo, WithdrawalReceipt},
    status::LegStatus,
};
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Unique identifier of a [`TransferRequest`].
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct TransferId(pub SmolStr);

impl TransferId {
    /// Derive a [`TransferId`] of the form `"{asset}_{from}_{to}_{unix_millis}"`, using
    /// `unknown` for an undiscovered destination.
    pub fn generate(
        asset: &str,
        from: &ExchangeName,
        to: Option<&ExchangeName>,
        time: DateTime<Utc>,
    ) -> Self {
        let to = to.map(ExchangeName::as_str).unwrap_or("unknown");
        Self(format_smolstr!(
            "{}_{}_{}_{}",
            asset,
            from,
            to,
            time.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for TransferId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// Terminal business failure of a transfer. Once set it is never cleared.
#[derive(Clone, Debug, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum TransferFailure {
    #[display("withdrawal rejected by source exchange")]
    WithdrawalRejected,
    #[display("deposit rejected by destination exchange")]
    DepositRejected,
    #[display("deposit not observed: {_0}")]
    DepositNotObserved(String),
}

/// Strip venue specific suffixes from an on-chain transaction id.
///
/// Some venues append metadata after a `:` separator (eg/ `"abc123:0"`); everything from
/// the first `:` onwards is dropped. Blank ids are treated as absent.
pub fn fix_transaction_id(transaction_id: Option<&str>) -> Option<String> {
    let transaction_id = transaction_id?;
    let cleaned = transaction_id
        .split_once(':')
        .map_or(transaction_id, |(hash, _)| hash)
        .trim();

    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// One movement of funds between two exchange accounts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferRequest {
    pub transfer_id: TransferId,
    pub asset: SmolStr,
    pub from_exchange: ExchangeName,
    /// Caller supplied, or discovered by matching the transaction id against deposit history
    pub to_exchange: Option<ExchangeName>,
    pub amount: Decimal,
    pub fee: Decimal,
    pub network: Option<SmolStr>,
    pub memo: Option<String>,
    pub withdrawal_id: Option<SmolStr>,
    pub withdrawal_status: LegStatus,
    /// On-chain transaction id, stored with venue suffixes stripped
    pub transaction_id: Option<String>,
    pub deposit_id: Option<SmolStr>,
    /// `None` until a matching deposit has been observed
    pub deposit_status: Option<LegStatus>,
    pub failure: Option<TransferFailure>,
    /// Number of reconciliation polls performed
    pub polls: u32,
    /// Number of polls that scanned every other exchange for an unknown destination
    pub discovery_scans: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRequest {
    pub fn new(
        asset: impl Into<SmolStr>,
        from_exchange: ExchangeName,
        to_exchange: Option<ExchangeName>,
        amount: Decimal,
        time: DateTime<Utc>,
    ) -> Self {
        let asset = asset.into();
        Self {
            transfer_id: TransferId::generate(&asset, &from_exchange, to_exchange.as_ref(), time),
            asset,
            from_exchange,
            to_exchange,
            amount,
            fee: Decimal::ZERO,
            network: None,
            memo: None,
            withdrawal_id: None,
            withdrawal_status: LegStatus::Unknown,
            transaction_id: None,
            deposit_id: None,
            deposit_status: None,
            failure: None,
            polls: 0,
            discovery_scans: 0,
            created_at: time,
            updated_at: time,
        }
    }

    /// Overall completion: both legs completed.
    pub fn is_completed(&self) -> bool {
        self.withdrawal_status.is_completed()
            && self.deposit_status.is_some_and(|status| status.is_completed())
    }

    /// Sticky failure of either leg, or of the reconciliation budget.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn is_in_progress(&self) -> bool {
        !self.is_completed() && !self.is_failed()
    }

    /// Determines if the matching deposit has been found on the destination.
    pub fn is_deposit_observed(&self) -> bool {
        self.deposit_status.is_some()
    }

    /// Record the source exchange's response to a submitted withdrawal.
    pub fn record_submission(&mut self, receipt: WithdrawalReceipt, time: DateTime<Utc>) {
        self.withdrawal_id = Some(receipt.withdrawal_id);
        self.apply_withdrawal_status(receipt.status);
        self.updated_at = time;
    }

    /// Apply a withdrawal status refresh from the source exchange.
    pub fn record_withdrawal(&mut self, info: WithdrawalInfo, time: DateTime<Utc>) {
        if let Some(transaction_id) = fix_transaction_id(info.transaction_id.as_deref()) {
            self.transaction_id = Some(transaction_id);
        }
        self.apply_withdrawal_status(info.status);
        self.updated_at = time;
    }

    /// Apply a deposit observed on `exchange` matching this transfer's transaction id.
    pub fn record_deposit(
        &mut self,
        exchange: ExchangeName,
        record: DepositRecord,
        time: DateTime<Utc>,
    ) {
        self.to_exchange = Some(exchange);
        if record.deposit_id.is_some() {
            self.deposit_id = record.deposit_id;
        }
        self.deposit_status = Some(record.status);
        if record.status.is_failed() {
            self.fail(TransferFailure::DepositRejected);
        }
        self.updated_at = time;
    }

    /// Mark the transfer as failed. The first failure recorded is kept.
    pub fn fail(&mut self, failure: TransferFailure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    fn apply_withdrawal_status(&mut self, status: LegStatus) {
        // Unknown carries no information; never overwrite a known status with it
        if status != LegStatus::Unknown {
            self.withdrawal_status = status;
        }
        if status.is_failed() {
            self.fail(TransferFailure::WithdrawalRejected);
        }
    }
}
