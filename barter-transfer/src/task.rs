//! [`FundsTransferTask`]: a persistent task moving funds between two exchanges and waiting
//! for the transfer to settle.
//!
//! The order, the validated plan and the latest [`TransferRequest`] are embedded in the task
//! context metadata, so a task recovered after a restart resumes polling the same withdrawal
//! instead of submitting a new one.
//!
//! Submission is preceded by a persisted checkpoint. A task recovered in
//! [`FundsTransferPhase::Submitting`] may already have sent its withdrawal, so it moves to
//! error for an operator to reconcile (eg/ via [`AssetTransferModule::track_withdrawal`])
//! rather than submitting again.

use crate::{
    client::ExchangeName,
    error::TransferError,
    module::AssetTransferModule,
    request::{TransferId, TransferRequest},
};
use async_trait::async_trait;
use barter_task::{ContextPatch, TaskContext, TaskError, TaskLogic, TaskScope};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use chrono::Utc;
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, info, warn};

pub const FUNDS_TRANSFER_TASK: &str = "funds_transfer";

const ORDER_KEY: &str = "order";
const PLAN_KEY: &str = "plan";
const TRANSFER_KEY: &str = "transfer";
const TRANSFER_ID_KEY: &str = "transfer_id";
const SUBMISSION_STARTED_KEY: &str = "submission_started";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum FundsTransferPhase {
    #[display("validating")]
    Validating,
    #[display("transferring")]
    Transferring,
    #[display("submitting")]
    Submitting,
    #[display("awaiting_settlement")]
    AwaitingSettlement,
}

/// What to move, and where.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct TransferOrder {
    pub asset: SmolStr,
    pub from_exchange: ExchangeName,
    pub to_exchange: ExchangeName,
    pub amount: Decimal,
    pub memo: Option<String>,
}

/// [`TaskLogic`] executing one [`TransferOrder`] through an [`AssetTransferModule`].
pub struct FundsTransferTask {
    module: Arc<AssetTransferModule>,
    order: Option<TransferOrder>,
    transfer_id: Option<TransferId>,
    submission_armed: bool,
}

impl Debug for FundsTransferTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundsTransferTask")
            .field("order", &self.order)
            .field("transfer_id", &self.transfer_id)
            .field("submission_armed", &self.submission_armed)
            .finish()
    }
}

impl FundsTransferTask {
    pub fn new(module: Arc<AssetTransferModule>, order: TransferOrder) -> Self {
        Self {
            module,
            order: Some(order),
            transfer_id: None,
            submission_armed: false,
        }
    }

    /// Logic for a task about to be restored from a persisted context. The order is read
    /// back from the context in [`TaskLogic::rebuild`].
    pub fn recovered(module: Arc<AssetTransferModule>) -> Self {
        Self {
            module,
            order: None,
            transfer_id: None,
            submission_armed: false,
        }
    }

    pub fn order(&self) -> Option<&TransferOrder> {
        self.order.as_ref()
    }

    pub fn transfer_id(&self) -> Option<&TransferId> {
        self.transfer_id.as_ref()
    }

    fn require_order(&self) -> Result<&TransferOrder, TaskError> {
        self.order
            .as_ref()
            .ok_or_else(|| TaskError::handler("funds transfer task has no order"))
    }

    async fn validate(
        &mut self,
        scope: &mut TaskScope<'_, FundsTransferPhase>,
    ) -> Result<(), TaskError> {
        let order = self.require_order()?;
        let plan = self
            .module
            .validate(
                &order.asset,
                &order.from_exchange,
                &order.to_exchange,
                order.amount,
            )
            .await
            .map_err(TaskError::handler)?;

        scope.evolve(ContextPatch::new().metadata_entry(PLAN_KEY, serde_json::to_value(&plan)?));
        scope.advance(FundsTransferPhase::Transferring);
        Ok(())
    }

    /// Record that submission is about to start. The checkpoint is persisted before the
    /// withdrawal is sent.
    fn prepare_submission(&mut self, scope: &mut TaskScope<'_, FundsTransferPhase>) {
        scope.evolve(
            ContextPatch::new()
                .metadata_entry(SUBMISSION_STARTED_KEY, Utc::now().to_rfc3339()),
        );
        scope.advance(FundsTransferPhase::Submitting);
        self.submission_armed = true;
    }

    async fn submit(
        &mut self,
        scope: &mut TaskScope<'_, FundsTransferPhase>,
    ) -> Result<(), TaskError> {
        if !std::mem::take(&mut self.submission_armed) {
            warn!(
                task_id = %scope.context().task_id(),
                "Recovered funds transfer task mid submission"
            );
            return Err(TaskError::handler(
                "withdrawal may have been submitted before restart, reconcile it with \
                 track_withdrawal before clearing the error",
            ));
        }

        let order = self.require_order()?;
        let request = self
            .module
            .transfer(
                &order.asset,
                &order.from_exchange,
                &order.to_exchange,
                order.amount,
                order.memo.clone(),
            )
            .await
            .map_err(TaskError::handler)?;

        self.transfer_id = Some(request.transfer_id.clone());
        embed(scope, &request)?;
        scope.advance(FundsTransferPhase::AwaitingSettlement);
        scope.set_delay(self.module.config().poll_interval());
        Ok(())
    }

    async fn await_settlement(
        &mut self,
        scope: &mut TaskScope<'_, FundsTransferPhase>,
    ) -> Result<(), TaskError> {
        let transfer_id = match &self.transfer_id {
            Some(transfer_id) => transfer_id.clone(),
            None => scope
                .context()
                .decode_metadata::<TransferId>(TRANSFER_ID_KEY)?
                .ok_or_else(|| TaskError::handler("awaiting settlement without a transfer id"))?,
        };

        let request = match self.module.update_transfer(&transfer_id).await {
            Ok(request) => request,
            Err(TransferError::UnknownTransfer(_)) => {
                // Module lost track of the request, eg/ it was removed by an operator
                let embedded = embedded_request(scope.context())?.ok_or_else(|| {
                    TaskError::handler(format!("transfer {transfer_id} is not embedded"))
                })?;
                if embedded.is_completed() {
                    embedded
                } else {
                    self.module.track(embedded).map_err(TaskError::handler)?;
                    self.module
                        .update_transfer(&transfer_id)
                        .await
                        .map_err(TaskError::handler)?
                }
            }
            Err(error) => return Err(TaskError::handler(error)),
        };

        embed(scope, &request)?;

        if request.is_completed() {
            info!(
                task_id = %scope.context().task_id(),
                %transfer_id,
                to = ?request.to_exchange,
                "Funds transfer settled"
            );
            scope.complete();
            return Ok(());
        }

        if let Some(failure) = &request.failure {
            return Err(TaskError::handler(format!(
                "transfer {transfer_id} failed: {failure}"
            )));
        }

        debug!(
            task_id = %scope.context().task_id(),
            %transfer_id,
            withdrawal = %request.withdrawal_status,
            deposit = ?request.deposit_status,
            "Funds transfer in flight"
        );
        scope.set_delay(self.module.config().poll_interval());
        Ok(())
    }
}

#[async_trait]
impl TaskLogic for FundsTransferTask {
    type Phase = FundsTransferPhase;

    fn name(&self) -> &str {
        FUNDS_TRANSFER_TASK
    }

    async fn on_start(
        &mut self,
        scope: &mut TaskScope<'_, FundsTransferPhase>,
    ) -> Result<(), TaskError> {
        let order = serde_json::to_value(self.require_order()?)?;
        scope.evolve(ContextPatch::new().metadata_entry(ORDER_KEY, order));
        scope.advance(FundsTransferPhase::Validating);
        Ok(())
    }

    async fn on_phase(
        &mut self,
        phase: FundsTransferPhase,
        scope: &mut TaskScope<'_, FundsTransferPhase>,
    ) -> Result<(), TaskError> {
        match phase {
            FundsTransferPhase::Validating => self.validate(scope).await,
            FundsTransferPhase::Transferring => {
                self.prepare_submission(scope);
                Ok(())
            }
            FundsTransferPhase::Submitting => self.submit(scope).await,
            FundsTransferPhase::AwaitingSettlement => self.await_settlement(scope).await,
        }
    }

    fn rebuild(&mut self, context: &TaskContext<FundsTransferPhase>) -> Result<(), TaskError> {
        let order = context.decode_metadata::<TransferOrder>(ORDER_KEY)?;
        let transfer_id = context.decode_metadata::<TransferId>(TRANSFER_ID_KEY)?;

        if let Some(request) = embedded_request(context)? {
            self.module.track(request).map_err(TaskError::handler)?;
        }

        if order.is_some() {
            self.order = order;
        }
        self.transfer_id = transfer_id;
        self.submission_armed = false;
        Ok(())
    }
}

fn embedded_request(
    context: &TaskContext<FundsTransferPhase>,
) -> Result<Option<TransferRequest>, TaskError> {
    context
        .decode_metadata::<TransferRequest>(TRANSFER_KEY)
        .map_err(TaskError::from)
}

fn embed(
    scope: &mut TaskScope<'_, FundsTransferPhase>,
    request: &TransferRequest,
) -> Result<(), TaskError> {
    scope.evolve(
        ContextPatch::new()
            .metadata_entry(TRANSFER_KEY, serde_json::to_value(request)?)
            .metadata_entry(TRANSFER_ID_KEY, request.transfer_id.as_str()),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::NetworkInfo, config::TransferConfig, mock::MockExchange,
        registry::ExchangeRegistry,
    };
    use barter_task::{BaseTradingTask, TaskConfig, TaskId, TaskState};
    use rust_decimal_macros::dec;

    fn network() -> NetworkInfo {
        NetworkInfo {
            withdraw_enabled: true,
            deposit_enabled: true,
            withdraw_min: dec!(1),
            withdraw_max: None,
            withdraw_fee: dec!(1),
        }
    }

    fn order(amount: Decimal) -> TransferOrder {
        TransferOrder::new(
            SmolStr::new("USDT"),
            ExchangeName::from("binance"),
            ExchangeName::from("kucoin"),
            amount,
            None,
        )
    }

    fn module() -> Arc<AssetTransferModule> {
        Arc::new(AssetTransferModule::new(
            ExchangeRegistry::new()
                .with(
                    "binance",
                    Arc::new(
                        MockExchange::new()
                            .with_balance("USDT", dec!(50))
                            .with_network("USDT", "TRC20", network()),
                    ),
                )
                .with(
                    "kucoin",
                    Arc::new(MockExchange::new().with_network("USDT", "TRC20", network())),
                ),
            TransferConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_validation_failure_moves_task_to_error() {
        let mut task = BaseTradingTask::new(
            FundsTransferTask::new(module(), order(dec!(500))),
            Some(TaskId::new("funds_transfer_1")),
            TaskConfig::default(),
        );

        task.execute_once().await.unwrap();
        assert_eq!(
            task.state(),
            &TaskState::Active(FundsTransferPhase::Validating)
        );
        assert_eq!(
            task.context()
                .decode_metadata::<TransferOrder>(ORDER_KEY)
                .unwrap(),
            Some(order(dec!(500)))
        );

        task.execute_once().await.unwrap();
        assert_eq!(task.state(), &TaskState::Error);

        let failure = task.context().error().unwrap();
        assert!(failure.message.contains("insufficient USDT balance"));
        assert_eq!(failure.state, "validating");
    }

    #[tokio::test]
    async fn test_rebuild_restores_order() {
        let module = module();
        let mut task = BaseTradingTask::new(
            FundsTransferTask::new(module.clone(), order(dec!(10))),
            None,
            TaskConfig::default(),
        );
        task.execute_once().await.unwrap();
        let payload = task.save_context().unwrap();

        let restored = BaseTradingTask::restore_context(
            FundsTransferTask::recovered(module),
            &payload,
            TaskConfig::default(),
        )
        .unwrap();

        assert_eq!(restored.logic().order(), Some(&order(dec!(10))));
        assert_eq!(restored.logic().transfer_id(), None);
    }

    #[tokio::test]
    async fn test_failed_restore_leaves_task_unchanged() {
        let module = module();
        let mut task = BaseTradingTask::new(
            FundsTransferTask::new(module.clone(), order(dec!(10))),
            Some(TaskId::new("funds_transfer_live")),
            TaskConfig::default(),
        );
        task.execute_once().await.unwrap();
        let before = task.context().clone();

        let mut other = BaseTradingTask::new(
            FundsTransferTask::new(module, order(dec!(20))),
            Some(TaskId::new("funds_transfer_other")),
            TaskConfig::default(),
        );
        other.execute_once().await.unwrap();
        let mut payload: serde_json::Value =
            serde_json::from_str(&other.save_context().unwrap()).unwrap();
        payload["metadata"][TRANSFER_ID_KEY] = serde_json::json!(42);

        assert!(task.restore_from_json(&payload.to_string()).is_err());
        assert_eq!(task.logic().order(), Some(&order(dec!(10))));
        assert_eq!(task.logic().transfer_id(), None);
        assert_eq!(task.context(), &before);
    }
}
