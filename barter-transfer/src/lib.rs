//! Moves assets between exchange accounts and reconciles each transfer's withdrawal and
//! deposit legs until both settle.
//!
//! # Key Components
//!
//! - [`TransferClient`]: Async contract each exchange connector implements.
//! - [`ExchangeRegistry`]: Explicitly constructed set of connectors, in configuration order.
//! - [`AssetTransferModule`]: Validates transfers, selects the cheapest common settlement
//!   network, retrieves deposit addresses just-in-time, submits withdrawals and polls both
//!   legs.
//! - [`FundsTransferTask`]: [`barter_task::TaskLogic`] executing a [`TransferOrder`] as a
//!   persistent, resumable task.
//!
//! # Example
//!
//! ```rust,ignore
//! let module = AssetTransferModule::new(
//!     ExchangeRegistry::new()
//!         .with("binance", binance_client)
//!         .with("kucoin", kucoin_client),
//!     TransferConfig::from_env(),
//! );
//!
//! let request = module
//!     .transfer("USDT", &"binance".into(), &"kucoin".into(), dec!(500), None)
//!     .await?;
//!
//! while module.update_transfer(&request.transfer_id).await?.is_in_progress() {
//!     tokio::time::sleep(module.config().poll_interval()).await;
//! }
//! ```

/// [`TransferClient`] contract and its request / response models.
pub mod client;

/// [`TransferConfig`] reconciliation settings.
pub mod config;

/// All errors generated in `barter-transfer`.
pub mod error;

/// In-process [`MockExchange`](mock::MockExchange) connector.
pub mod mock;

/// [`AssetTransferModule`] validation, execution and reconciliation.
pub mod module;

/// Settlement network selection.
pub mod network;

/// [`ExchangeRegistry`] of configured connectors.
pub mod registry;

/// [`TransferRequest`] and transaction id normalisation.
pub mod request;

/// [`LegStatus`] normalisation of venue statuses.
pub mod status;

/// [`FundsTransferTask`] persistent transfer task.
pub mod task;

pub use client::{
    AssetInfo, ClientError, DepositAddress, DepositRecord, ExchangeName, NetworkInfo,
    TransferClient, WithdrawalInfo, WithdrawalReceipt, WithdrawalRequest,
};
pub use config::TransferConfig;
pub use error::{TransferError, ValidationError};
pub use module::{AssetTransferModule, TransferPlan};
pub use network::{NetworkChoice, select_network};
pub use registry::ExchangeRegistry;
pub use request::{TransferFailure, TransferId, TransferRequest, fix_transaction_id};
pub use status::LegStatus;
pub use task::{FUNDS_TRANSFER_TASK, FundsTransferPhase, FundsTransferTask, TransferOrder};
