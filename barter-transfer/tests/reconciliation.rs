//! Integration tests for executing transfers through the `AssetTransferModule` and
//! reconciling both legs against simulated exchanges.

use async_trait::async_trait;
use barter_transfer::{
    AssetInfo, AssetTransferModule, ClientError, DepositAddress, DepositRecord, ExchangeName,
    ExchangeRegistry, LegStatus, NetworkInfo, TransferClient, TransferConfig, TransferError,
    TransferFailure, ValidationError, WithdrawalInfo, WithdrawalReceipt, WithdrawalRequest,
    mock::MockExchange,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn network(fee: Decimal) -> NetworkInfo {
    NetworkInfo {
        withdraw_enabled: true,
        deposit_enabled: true,
        withdraw_min: dec!(1),
        withdraw_max: Some(dec!(10_000)),
        withdraw_fee: fee,
    }
}

fn exchange() -> MockExchange {
    MockExchange::new()
        .with_network("USDT", "ERC20", network(dec!(4)))
        .with_network("USDT", "TRC20", network(dec!(1)))
}

fn deposit(deposit_id: &str, transaction_id: &str, status: LegStatus) -> DepositRecord {
    DepositRecord {
        deposit_id: Some(SmolStr::new(deposit_id)),
        transaction_id: Some(transaction_id.to_string()),
        status,
        amount: dec!(99),
    }
}

fn name(name: &str) -> ExchangeName {
    ExchangeName::from(name)
}

struct Venues {
    binance: Arc<MockExchange>,
    kucoin: Arc<MockExchange>,
    okx: Arc<MockExchange>,
    module: AssetTransferModule,
}

fn venues(config: TransferConfig) -> Venues {
    let binance = Arc::new(exchange().with_balance("USDT", dec!(1_000)));
    let kucoin = Arc::new(exchange());
    let okx = Arc::new(exchange());

    let module = AssetTransferModule::new(
        ExchangeRegistry::new()
            .with("binance", binance.clone())
            .with("kucoin", kucoin.clone())
            .with("okx", okx.clone()),
        config,
    );

    Venues {
        binance,
        kucoin,
        okx,
        module,
    }
}

/// Delegates to a `MockExchange` but rejects every withdrawal submission.
struct RejectingExchange(MockExchange);

#[async_trait]
impl TransferClient for RejectingExchange {
    async fn get_asset_balance(&self, asset: &str) -> Result<Decimal, ClientError> {
        self.0.get_asset_balance(asset).await
    }

    async fn asset_info(&self, asset: &str) -> Result<AssetInfo, ClientError> {
        self.0.asset_info(asset).await
    }

    async fn get_deposit_address(
        &self,
        asset: &str,
        network: &str,
    ) -> Result<DepositAddress, ClientError> {
        self.0.get_deposit_address(asset, network).await
    }

    async fn submit_withdrawal(
        &self,
        _: WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, ClientError> {
        Err(ClientError::Api {
            code: Some("-4026".to_string()),
            message: "withdrawal address not whitelisted".to_string(),
        })
    }

    async fn get_withdrawal_status(
        &self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalInfo, ClientError> {
        self.0.get_withdrawal_status(withdrawal_id).await
    }

    async fn get_deposit_history(
        &self,
        asset: &str,
        limit: u32,
    ) -> Result<Vec<DepositRecord>, ClientError> {
        self.0.get_deposit_history(asset, limit).await
    }
}

/// Delegates to a `MockExchange` but holds every withdrawal status request until released.
struct GatedExchange {
    inner: MockExchange,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TransferClient for GatedExchange {
    async fn get_asset_balance(&self, asset: &str) -> Result<Decimal, ClientError> {
        self.inner.get_asset_balance(asset).await
    }

    async fn asset_info(&self, asset: &str) -> Result<AssetInfo, ClientError> {
        self.inner.asset_info(asset).await
    }

    async fn get_deposit_address(
        &self,
        asset: &str,
        network: &str,
    ) -> Result<DepositAddress, ClientError> {
        self.inner.get_deposit_address(asset, network).await
    }

    async fn submit_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, ClientError> {
        self.inner.submit_withdrawal(request).await
    }

    async fn get_withdrawal_status(
        &self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalInfo, ClientError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.get_withdrawal_status(withdrawal_id).await
    }

    async fn get_deposit_history(
        &self,
        asset: &str,
        limit: u32,
    ) -> Result<Vec<DepositRecord>, ClientError> {
        self.inner.get_deposit_history(asset, limit).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transfer_reconciles_both_legs_to_completion() {
    let Venues {
        binance,
        kucoin,
        module,
        ..
    } = venues(TransferConfig::default());

    let request = module
        .transfer("USDT", &name("binance"), &name("kucoin"), dec!(100), None)
        .await
        .unwrap();

    assert_eq!(request.network.as_deref(), Some("TRC20"));
    assert_eq!(request.fee, dec!(1));
    assert_eq!(request.withdrawal_status, LegStatus::Pending);
    assert_eq!(request.withdrawal_id.as_deref(), Some("wd_1"));
    assert_eq!(kucoin.calls().deposit_address, 1);
    assert_eq!(binance.submitted()[0].address, "mock-usdt-trc20");
    assert_eq!(module.active_transfers(), vec![request.clone()]);

    let id = request.transfer_id.clone();

    // Withdrawal pending without a transaction id: deposit history is not consulted
    let request = module.update_transfer(&id).await.unwrap();
    assert!(request.is_in_progress());
    assert_eq!(kucoin.calls().deposit_history, 0);

    // Broadcast, with a venue specific suffix on the transaction id
    binance.settle_withdrawal("wd_1", "0xabc:0");
    let request = module.update_transfer(&id).await.unwrap();
    assert_eq!(request.withdrawal_status, LegStatus::Completed);
    assert_eq!(request.transaction_id.as_deref(), Some("0xabc"));
    assert_eq!(request.deposit_status, None);
    assert_eq!(kucoin.calls().deposit_history, 1);

    // Deposit observed but not yet credited
    kucoin.push_deposit("USDT", deposit("dep_9", "0xabc", LegStatus::Pending));
    let request = module.update_transfer(&id).await.unwrap();
    assert_eq!(request.deposit_status, Some(LegStatus::Pending));
    assert!(!request.is_completed());
    assert!(request.is_in_progress());
    assert!(!request.is_failed());

    kucoin.push_deposit("USDT", deposit("dep_9", "0xabc", LegStatus::Completed));
    let request = module.update_transfer(&id).await.unwrap();
    assert!(request.is_completed());
    assert_eq!(request.deposit_id.as_deref(), Some("dep_9"));

    // Completed transfers leave the active set
    assert!(module.get_transfer(&id).is_none());
    assert!(matches!(
        module.update_transfer(&id).await,
        Err(TransferError::UnknownTransfer(_))
    ));
}

#[tokio::test]
async fn test_validation_failure_fetches_no_address() {
    let Venues {
        binance,
        kucoin,
        module,
        ..
    } = venues(TransferConfig::default());

    let error = module
        .transfer("USDT", &name("binance"), &name("kucoin"), dec!(5_000), None)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        TransferError::Validation(ValidationError::InsufficientBalance { .. })
    ));
    assert_eq!(kucoin.calls().deposit_address, 0);
    assert!(binance.submitted().is_empty());
    assert!(module.active_transfers().is_empty());
}

#[tokio::test]
async fn test_submission_failure_is_propagated_without_retry() {
    let rejecting = Arc::new(RejectingExchange(exchange().with_balance("USDT", dec!(1_000))));
    let kucoin = Arc::new(exchange());
    let module = AssetTransferModule::new(
        ExchangeRegistry::new()
            .with("binance", rejecting.clone())
            .with("kucoin", kucoin.clone()),
        TransferConfig::default(),
    );

    let error = module
        .transfer("USDT", &name("binance"), &name("kucoin"), dec!(100), None)
        .await
        .unwrap_err();

    assert!(matches!(error, TransferError::Submission { .. }));
    assert!(error.to_string().contains("not whitelisted"));
    assert_eq!(kucoin.calls().deposit_address, 1);
    assert!(module.active_transfers().is_empty());
}

#[tokio::test]
async fn test_unknown_destination_is_discovered_in_registry_order() {
    let Venues {
        binance,
        kucoin,
        okx,
        module,
    } = venues(TransferConfig::default());

    binance.insert_withdrawal(
        "external_7",
        WithdrawalInfo {
            status: LegStatus::Processing,
            transaction_id: None,
            amount: dec!(99),
            asset: SmolStr::new("USDT"),
        },
    );

    let request = module
        .track_withdrawal("USDT", &name("binance"), "external_7", dec!(99), None)
        .unwrap();
    let id = request.transfer_id.clone();
    assert!(id.as_str().starts_with("USDT_binance_unknown_"));

    // No transaction id yet: nothing to correlate, no scan is spent
    let request = module.update_transfer(&id).await.unwrap();
    assert_eq!(request.discovery_scans, 0);
    assert_eq!(kucoin.calls().deposit_history + okx.calls().deposit_history, 0);

    binance.settle_withdrawal("external_7", "0xdef:1");
    okx.push_deposit("USDT", deposit("okx_dep_1", "0xdef", LegStatus::Completed));

    let request = module.update_transfer(&id).await.unwrap();
    assert_eq!(request.to_exchange, Some(name("okx")));
    assert_eq!(request.discovery_scans, 1);
    assert!(request.is_completed());

    assert_eq!(binance.calls().deposit_history, 0);
    assert_eq!(kucoin.calls().deposit_history, 1);
    assert_eq!(okx.calls().deposit_history, 1);
}

#[tokio::test]
async fn test_poll_errors_are_swallowed() {
    let Venues {
        binance, module, ..
    } = venues(TransferConfig::default());

    let request = module
        .transfer("USDT", &name("binance"), &name("kucoin"), dec!(100), None)
        .await
        .unwrap();
    let id = request.transfer_id.clone();

    binance.set_unavailable(true);
    let polled = module.update_transfer(&id).await.unwrap();
    assert_eq!(polled.polls, 1);
    assert_eq!(polled.withdrawal_status, LegStatus::Pending);
    assert!(polled.is_in_progress());

    binance.set_unavailable(false);
    binance.settle_withdrawal("wd_1", "0x123");
    let polled = module.update_transfer(&id).await.unwrap();
    assert_eq!(polled.withdrawal_status, LegStatus::Completed);
    assert_eq!(polled.polls, 2);
}

#[tokio::test]
async fn test_withdrawal_failure_is_sticky_and_stops_polling() {
    let Venues {
        binance,
        kucoin,
        module,
        ..
    } = venues(TransferConfig::default());

    let request = module
        .transfer("USDT", &name("binance"), &name("kucoin"), dec!(100), None)
        .await
        .unwrap();
    let id = request.transfer_id.clone();

    binance.set_withdrawal("wd_1", LegStatus::Failed, None);
    let failed = module.update_transfer(&id).await.unwrap();
    assert!(failed.is_failed());
    assert_eq!(failed.failure, Some(TransferFailure::WithdrawalRejected));

    // Venue later reports success; the failure stands and no exchange is contacted
    binance.settle_withdrawal("wd_1", "0x999");
    let binance_calls = binance.calls();
    let kucoin_calls = kucoin.calls();

    let polled = module.update_transfer(&id).await.unwrap();
    assert!(polled.is_failed());
    assert_eq!(polled, failed);
    assert_eq!(binance.calls(), binance_calls);
    assert_eq!(kucoin.calls(), kucoin_calls);

    // Failed transfers remain tracked until an operator removes them
    assert_eq!(module.active_transfers().len(), 1);
    assert!(module.remove_transfer(&id).is_some());
    assert!(module.active_transfers().is_empty());
}

#[tokio::test]
async fn test_discovery_budget_fails_transfer() {
    let Venues {
        binance, module, ..
    } = venues(TransferConfig {
        max_discovery_scans: Some(2),
        ..TransferConfig::default()
    });

    binance.insert_withdrawal(
        "external_8",
        WithdrawalInfo {
            status: LegStatus::Completed,
            transaction_id: Some("0xlost".to_string()),
            amount: dec!(10),
            asset: SmolStr::new("USDT"),
        },
    );

    let request = module
        .track_withdrawal("USDT", &name("binance"), "external_8", dec!(10), None)
        .unwrap();
    let id = request.transfer_id.clone();

    let first = module.update_transfer(&id).await.unwrap();
    assert!(first.is_in_progress());
    assert_eq!(first.discovery_scans, 1);

    let second = module.update_transfer(&id).await.unwrap();
    assert!(second.is_failed());
    assert!(matches!(
        second.failure,
        Some(TransferFailure::DepositNotObserved(_))
    ));
}

#[tokio::test]
async fn test_discovery_outage_does_not_spend_budget() {
    let Venues {
        binance,
        kucoin,
        okx,
        module,
    } = venues(TransferConfig {
        max_discovery_scans: Some(2),
        ..TransferConfig::default()
    });

    binance.insert_withdrawal(
        "external_9",
        WithdrawalInfo {
            status: LegStatus::Completed,
            transaction_id: Some("0xdark".to_string()),
            amount: dec!(10),
            asset: SmolStr::new("USDT"),
        },
    );
    let request = module
        .track_withdrawal("USDT", &name("binance"), "external_9", dec!(10), None)
        .unwrap();
    let id = request.transfer_id.clone();

    kucoin.set_unavailable(true);
    okx.set_unavailable(true);
    for _ in 0..3 {
        let polled = module.update_transfer(&id).await.unwrap();
        assert!(polled.is_in_progress());
        assert_eq!(polled.discovery_scans, 0);
    }
    assert_eq!(kucoin.calls().deposit_history, 3);
    assert_eq!(okx.calls().deposit_history, 3);

    // One exchange answering is enough for the scan to count
    okx.set_unavailable(false);
    let polled = module.update_transfer(&id).await.unwrap();
    assert!(polled.is_in_progress());
    assert_eq!(polled.discovery_scans, 1);
}

#[tokio::test]
async fn test_removed_transfer_is_not_reregistered_by_inflight_poll() {
    let gated = Arc::new(GatedExchange {
        inner: exchange(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    gated.inner.insert_withdrawal(
        "external_3",
        WithdrawalInfo {
            status: LegStatus::Pending,
            transaction_id: None,
            amount: dec!(10),
            asset: SmolStr::new("USDT"),
        },
    );

    let module = Arc::new(AssetTransferModule::new(
        ExchangeRegistry::new()
            .with("binance", gated.clone())
            .with("kucoin", Arc::new(exchange())),
        TransferConfig::default(),
    ));
    let request = module
        .track_withdrawal(
            "USDT",
            &name("binance"),
            "external_3",
            dec!(10),
            Some(name("kucoin")),
        )
        .unwrap();
    let id = request.transfer_id.clone();

    let poll = tokio::spawn({
        let module = module.clone();
        let id = id.clone();
        async move { module.update_transfer(&id).await }
    });

    gated.entered.notified().await;
    assert!(module.remove_transfer(&id).is_some());
    gated.release.notify_one();

    let polled = poll.await.unwrap().unwrap();
    assert!(polled.is_in_progress());
    assert!(module.get_transfer(&id).is_none());
    assert!(module.active_transfers().is_empty());
}

#[tokio::test]
async fn test_track_restored_request_resumes_without_resubmission() {
    let Venues {
        binance,
        kucoin,
        module,
        ..
    } = venues(TransferConfig::default());

    let request = module
        .transfer("USDT", &name("binance"), &name("kucoin"), dec!(100), None)
        .await
        .unwrap();

    // A fresh module over the same exchanges, as after a process restart
    let restarted = AssetTransferModule::new(module.registry().clone(), TransferConfig::default());
    restarted.track(request.clone()).unwrap();

    binance.settle_withdrawal("wd_1", "0xfeed");
    kucoin.push_deposit("USDT", deposit("dep_1", "0xfeed", LegStatus::Completed));

    let settled = restarted
        .update_transfer(&request.transfer_id)
        .await
        .unwrap();
    assert!(settled.is_completed());
    assert_eq!(binance.calls().submit_withdrawal, 1);
}
