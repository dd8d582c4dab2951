use crate::{
    client::{ClientError, ExchangeName},
    request::TransferId,
};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use thiserror::Error;

/// Reason a proposed transfer was rejected by validation.
///
/// Validation never fails with an exception: every problem, including exchange I/O failures
/// while fetching metadata, is reported as a negative result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transfer amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("source and destination are both {0}")]
    SameExchange(ExchangeName),

    #[error("exchange {0} is not configured")]
    UnknownExchange(ExchangeName),

    #[error("withdrawals of {asset} are disabled on {exchange}")]
    WithdrawalsDisabled {
        asset: SmolStr,
        exchange: ExchangeName,
    },

    #[error("deposits of {asset} are disabled on {exchange}")]
    DepositsDisabled {
        asset: SmolStr,
        exchange: ExchangeName,
    },

    #[error("insufficient {asset} balance on {exchange}: available {available}, required {required}")]
    InsufficientBalance {
        asset: SmolStr,
        exchange: ExchangeName,
        available: Decimal,
        required: Decimal,
    },

    #[error("no common network can carry {amount} {asset} from {from} to {to}")]
    NoCommonNetwork {
        asset: SmolStr,
        amount: Decimal,
        from: ExchangeName,
        to: ExchangeName,
    },

    #[error("failed to fetch transfer metadata from {exchange}: {source}")]
    Exchange {
        exchange: ExchangeName,
        source: ClientError,
    },
}

/// Errors raised while executing or tracking a transfer.
///
/// Polling failures are never raised; they are logged and retried on the next poll.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("exchange {0} is not configured")]
    UnknownExchange(ExchangeName),

    #[error("transfer {0} is not tracked")]
    UnknownTransfer(TransferId),

    #[error("failed to retrieve deposit address from {exchange}: {source}")]
    DepositAddress {
        exchange: ExchangeName,
        source: ClientError,
    },

    #[error("withdrawal submission to {exchange} failed: {source}")]
    Submission {
        exchange: ExchangeName,
        source: ClientError,
    },
}
