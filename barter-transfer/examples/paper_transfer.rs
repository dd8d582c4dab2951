//! Example: Move USDT between two simulated exchanges with a persistent `FundsTransferTask`.
//!
//! A background "chain" settles the withdrawal and credits the deposit a few polls after
//! submission, while a `TaskRunner` drives the task until the transfer completes.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --example paper_transfer

use barter_task::{
    BaseTradingTask, InMemoryContextStore, RunOutcome, RunnerConfig, TaskConfig, TaskRunner,
};
use barter_transfer::{
    AssetTransferModule, DepositRecord, ExchangeName, ExchangeRegistry, FundsTransferTask,
    LegStatus, NetworkInfo, TransferConfig, TransferOrder, mock::MockExchange,
};
use rust_decimal_macros::dec;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let network = |fee| NetworkInfo {
        withdraw_enabled: true,
        deposit_enabled: true,
        withdraw_min: dec!(10),
        withdraw_max: Some(dec!(100_000)),
        withdraw_fee: fee,
    };

    let binance = Arc::new(
        MockExchange::new()
            .with_balance("USDT", dec!(2_500))
            .with_network("USDT", "ERC20", network(dec!(4.5)))
            .with_network("USDT", "TRC20", network(dec!(1))),
    );
    let kucoin = Arc::new(
        MockExchange::new()
            .with_network("USDT", "ERC20", network(dec!(6)))
            .with_network("USDT", "TRC20", network(dec!(1.5)))
            .with_deposit_address("USDT", "TRC20", "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE", None),
    );

    let module = Arc::new(AssetTransferModule::new(
        ExchangeRegistry::new()
            .with("binance", binance.clone())
            .with("kucoin", kucoin.clone()),
        TransferConfig {
            poll_interval_ms: 200,
            ..TransferConfig::from_env()
        },
    ));

    let order = TransferOrder::new(
        SmolStr::new("USDT"),
        ExchangeName::from("binance"),
        ExchangeName::from("kucoin"),
        dec!(1_000),
        None,
    );

    let mut task = BaseTradingTask::new(
        FundsTransferTask::new(module, order),
        None,
        TaskConfig {
            step_delay_ms: 50,
            ..TaskConfig::default()
        },
    );

    // Simulated chain: broadcast then credit the withdrawal once it has been submitted
    let chain = tokio::spawn({
        let binance = binance.clone();
        let kucoin = kucoin.clone();
        async move {
            let submitted = loop {
                if let Some(request) = binance.submitted().into_iter().next() {
                    break request;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            };

            tokio::time::sleep(Duration::from_millis(500)).await;
            binance.settle_withdrawal("wd_1", "7f3c9a0be1d2:0");
            info!(network = %submitted.network, "Withdrawal broadcast on-chain");

            tokio::time::sleep(Duration::from_millis(500)).await;
            kucoin.push_deposit(
                "USDT",
                DepositRecord {
                    deposit_id: Some(SmolStr::new("kc_dep_1")),
                    transaction_id: Some("7f3c9a0be1d2".to_string()),
                    status: LegStatus::Completed,
                    amount: submitted.amount - dec!(1),
                },
            );
            info!("Deposit credited on kucoin");
        }
    });

    let runner = TaskRunner::new(Arc::new(InMemoryContextStore::new()), RunnerConfig::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    match runner.run(&mut task, shutdown_rx).await {
        Ok(RunOutcome::Finished(state)) => info!(
            task_id = %task.task_id(),
            %state,
            metadata = ?task.context().metadata(),
            "Funds transfer task finished"
        ),
        Ok(RunOutcome::Interrupted) => {
            warn!(task_id = %task.task_id(), "Funds transfer task interrupted")
        }
        Err(error) => warn!(%error, "Funds transfer task failed"),
    }

    if let Err(error) = chain.await {
        warn!(%error, "Simulated chain failed");
    }

    info!(
        binance = %binance.balance("USDT"),
        kucoin = %kucoin.balance("USDT"),
        "Final USDT balances"
    );
}

// Initialise an INFO `Subscriber` for `Tracing` logs and install it as the global default.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(cfg!(debug_assertions))
        .init()
}
