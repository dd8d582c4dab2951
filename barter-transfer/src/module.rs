//! [`AssetTransferModule`]: validates, executes and reconciles transfers between the
//! exchanges of an [`ExchangeRegistry`].
//!
//! Reconciliation is pull based. Each poll refreshes the withdrawal leg on the source
//! exchange first, and only once an on-chain transaction id is known searches for the
//! matching deposit on the destination (or on every other exchange if the destination is
//! unknown). Exchange I/O errors while polling are logged and retried on the next poll.

use crate::{
    client::{ClientError, DepositRecord, ExchangeName, TransferClient, WithdrawalRequest},
    config::TransferConfig,
    error::{TransferError, ValidationError},
    network::{NetworkChoice, select_network},
    registry::ExchangeRegistry,
    request::{TransferFailure, TransferId, TransferRequest, fix_transaction_id},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a successful validation: everything required to execute the transfer except
/// the deposit address, which is only retrieved at execution time.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferPlan {
    pub asset: SmolStr,
    pub from_exchange: ExchangeName,
    pub to_exchange: ExchangeName,
    pub amount: Decimal,
    pub network: NetworkChoice,
}

#[derive(Debug)]
pub struct AssetTransferModule {
    registry: ExchangeRegistry,
    config: TransferConfig,
    active: Mutex<FnvHashMap<TransferId, TransferRequest>>,
}

impl AssetTransferModule {
    pub fn new(registry: ExchangeRegistry, config: TransferConfig) -> Self {
        info!(
            exchanges = ?registry.names().collect::<Vec<_>>(),
            ?config,
            "AssetTransferModule initialized"
        );
        Self {
            registry,
            config,
            active: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn registry(&self) -> &ExchangeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Check whether `amount` of `asset` can be moved from `from` to `to`, selecting the
    /// cheapest settlement network.
    ///
    /// Only exchange metadata and balances are consulted; no deposit address is fetched.
    /// Checks run in order: amount & exchanges, source withdrawals enabled, destination
    /// deposits enabled, source balance, common network.
    pub async fn validate(
        &self,
        asset: &str,
        from: &ExchangeName,
        to: &ExchangeName,
        amount: Decimal,
    ) -> Result<TransferPlan, ValidationError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        if from == to {
            return Err(ValidationError::SameExchange(from.clone()));
        }

        let source = self
            .registry
            .get(from)
            .ok_or_else(|| ValidationError::UnknownExchange(from.clone()))?;
        let destination = self
            .registry
            .get(to)
            .ok_or_else(|| ValidationError::UnknownExchange(to.clone()))?;

        let (source_info, balance, destination_info) = tokio::join!(
            source.asset_info(asset),
            source.get_asset_balance(asset),
            destination.asset_info(asset),
        );

        let source_info = exchange_result(from, source_info)?;
        if !source_info.withdraw_enabled() {
            return Err(ValidationError::WithdrawalsDisabled {
                asset: SmolStr::new(asset),
                exchange: from.clone(),
            });
        }

        let destination_info = exchange_result(to, destination_info)?;
        if !destination_info.deposit_enabled() {
            return Err(ValidationError::DepositsDisabled {
                asset: SmolStr::new(asset),
                exchange: to.clone(),
            });
        }

        let available = exchange_result(from, balance)?;
        if available < amount {
            return Err(ValidationError::InsufficientBalance {
                asset: SmolStr::new(asset),
                exchange: from.clone(),
                available,
                required: amount,
            });
        }

        let network = select_network(&source_info, &destination_info, amount).ok_or_else(|| {
            ValidationError::NoCommonNetwork {
                asset: SmolStr::new(asset),
                amount,
                from: from.clone(),
                to: to.clone(),
            }
        })?;

        debug!(
            %asset,
            %from,
            %to,
            %amount,
            network = %network.network,
            fee = %network.fee,
            "Transfer validated"
        );

        Ok(TransferPlan {
            asset: SmolStr::new(asset),
            from_exchange: from.clone(),
            to_exchange: to.clone(),
            amount,
            network,
        })
    }

    /// Validate and execute a transfer: retrieve the destination deposit address for the
    /// selected network, submit the withdrawal on the source and start tracking it.
    ///
    /// Address retrieval and submission failures are returned without retry.
    pub async fn transfer(
        &self,
        asset: &str,
        from: &ExchangeName,
        to: &ExchangeName,
        amount: Decimal,
        memo: Option<String>,
    ) -> Result<TransferRequest, TransferError> {
        let plan = self
            .validate(asset, from, to, amount)
            .await
            .inspect_err(|error| {
                info!(%asset, %from, %to, %amount, reason = %error, "Transfer rejected")
            })?;

        let source = self.client(from)?;
        let destination = self.client(to)?;

        let address = destination
            .get_deposit_address(asset, &plan.network.network)
            .await
            .map_err(|source| TransferError::DepositAddress {
                exchange: to.clone(),
                source,
            })?;

        let mut request =
            TransferRequest::new(asset, from.clone(), Some(to.clone()), amount, Utc::now());
        request.fee = plan.network.fee;
        request.network = Some(plan.network.network.clone());
        // A memo demanded by the destination address is required to credit the account
        request.memo = address.memo.clone().or(memo);

        let receipt = source
            .submit_withdrawal(WithdrawalRequest {
                asset: request.asset.clone(),
                amount,
                address: address.address,
                network: plan.network.network,
                memo: request.memo.clone(),
            })
            .await
            .map_err(|source| TransferError::Submission {
                exchange: from.clone(),
                source,
            })?;

        request.record_submission(receipt, Utc::now());

        info!(
            transfer_id = %request.transfer_id,
            withdrawal_id = ?request.withdrawal_id,
            network = ?request.network,
            fee = %request.fee,
            %asset,
            %from,
            %to,
            %amount,
            "Withdrawal submitted"
        );

        self.active
            .lock()
            .insert(request.transfer_id.clone(), request.clone());

        Ok(request)
    }

    /// Start reconciling a withdrawal submitted outside this module. The destination may be
    /// unknown, in which case it is discovered from deposit history.
    pub fn track_withdrawal(
        &self,
        asset: &str,
        from: &ExchangeName,
        withdrawal_id: impl Into<SmolStr>,
        amount: Decimal,
        to: Option<ExchangeName>,
    ) -> Result<TransferRequest, TransferError> {
        self.client(from)?;
        if let Some(to) = &to {
            self.client(to)?;
        }

        let mut request = TransferRequest::new(asset, from.clone(), to, amount, Utc::now());
        request.withdrawal_id = Some(withdrawal_id.into());

        info!(
            transfer_id = %request.transfer_id,
            withdrawal_id = ?request.withdrawal_id,
            to = ?request.to_exchange,
            "Tracking external withdrawal"
        );

        self.active
            .lock()
            .insert(request.transfer_id.clone(), request.clone());

        Ok(request)
    }

    /// Re-register a previously persisted request so polling resumes without resubmitting
    /// the withdrawal. Completed requests are not re-registered.
    pub fn track(&self, request: TransferRequest) -> Result<(), TransferError> {
        self.client(&request.from_exchange)?;
        if let Some(to) = &request.to_exchange {
            self.client(to)?;
        }

        if request.is_completed() {
            debug!(transfer_id = %request.transfer_id, "Ignoring track of completed transfer");
            return Ok(());
        }

        debug!(transfer_id = %request.transfer_id, "Tracking restored transfer");
        self.active
            .lock()
            .insert(request.transfer_id.clone(), request);

        Ok(())
    }

    /// Poll the exchanges for the latest state of an active transfer.
    ///
    /// Completed transfers leave the active set; failed transfers remain until removed.
    pub async fn update_transfer(
        &self,
        transfer_id: &TransferId,
    ) -> Result<TransferRequest, TransferError> {
        let mut request = self
            .get_transfer(transfer_id)
            .ok_or_else(|| TransferError::UnknownTransfer(transfer_id.clone()))?;

        self.refresh(&mut request).await;

        let mut active = self.active.lock();
        if request.is_completed() {
            active.remove(transfer_id);
        } else if let Some(stored) = active.get_mut(transfer_id) {
            *stored = request.clone();
        } else {
            debug!(%transfer_id, "Transfer removed while polling, not re-registering");
        }

        Ok(request)
    }

    /// Reconcile a caller owned request against the exchanges.
    ///
    /// Completed or failed requests are left untouched without contacting any exchange.
    pub async fn refresh(&self, request: &mut TransferRequest) {
        if !request.is_in_progress() {
            debug!(
                transfer_id = %request.transfer_id,
                completed = request.is_completed(),
                failed = request.is_failed(),
                "Skipping poll of finished transfer"
            );
            return;
        }

        request.polls += 1;
        debug!(
            transfer_id = %request.transfer_id,
            poll = request.polls,
            withdrawal = %request.withdrawal_status,
            deposit = ?request.deposit_status,
            "Polling transfer"
        );

        self.refresh_withdrawal(request).await;
        if request.is_failed() {
            warn!(transfer_id = %request.transfer_id, failure = ?request.failure, "Transfer failed");
            return;
        }

        self.refresh_deposit(request).await;
        self.enforce_deadline(request, Utc::now());

        if request.is_completed() {
            info!(
                transfer_id = %request.transfer_id,
                to = ?request.to_exchange,
                polls = request.polls,
                "Transfer settled"
            );
        } else if request.is_failed() {
            warn!(transfer_id = %request.transfer_id, failure = ?request.failure, "Transfer failed");
        }
    }

    pub fn get_transfer(&self, transfer_id: &TransferId) -> Option<TransferRequest> {
        self.active.lock().get(transfer_id).cloned()
    }

    /// Snapshot of every tracked transfer, oldest first.
    pub fn active_transfers(&self) -> Vec<TransferRequest> {
        let mut transfers = self.active.lock().values().cloned().collect::<Vec<_>>();
        transfers.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        });
        transfers
    }

    /// Stop tracking a transfer, eg/ after operator intervention on a failure.
    pub fn remove_transfer(&self, transfer_id: &TransferId) -> Option<TransferRequest> {
        self.active.lock().remove(transfer_id)
    }

    fn client(&self, exchange: &ExchangeName) -> Result<&Arc<dyn TransferClient>, TransferError> {
        self.registry
            .get(exchange)
            .ok_or_else(|| TransferError::UnknownExchange(exchange.clone()))
    }

    async fn refresh_withdrawal(&self, request: &mut TransferRequest) {
        if request.withdrawal_status.is_completed() && request.transaction_id.is_some() {
            return;
        }

        let Some(withdrawal_id) = request.withdrawal_id.clone() else {
            warn!(transfer_id = %request.transfer_id, "Transfer has no withdrawal id to poll");
            return;
        };

        let Some(source) = self.registry.get(&request.from_exchange) else {
            warn!(
                transfer_id = %request.transfer_id,
                exchange = %request.from_exchange,
                "Source exchange is not configured"
            );
            return;
        };

        match source.get_withdrawal_status(&withdrawal_id).await {
            Ok(info) => request.record_withdrawal(info, Utc::now()),
            Err(error) => warn!(
                transfer_id = %request.transfer_id,
                exchange = %request.from_exchange,
                %withdrawal_id,
                %error,
                "Failed to fetch withdrawal status"
            ),
        }
    }

    async fn refresh_deposit(&self, request: &mut TransferRequest) {
        if request.deposit_status.is_some_and(|status| status.is_final()) {
            return;
        }

        let Some(transaction_id) = request.transaction_id.clone() else {
            return;
        };

        match request.to_exchange.clone() {
            Some(to) => {
                let Some(destination) = self.registry.get(&to) else {
                    warn!(
                        transfer_id = %request.transfer_id,
                        exchange = %to,
                        "Destination exchange is not configured"
                    );
                    return;
                };

                match self
                    .find_deposit(destination.as_ref(), &request.asset, &transaction_id)
                    .await
                {
                    Ok(Some(record)) => request.record_deposit(to, record, Utc::now()),
                    Ok(None) => debug!(
                        transfer_id = %request.transfer_id,
                        %transaction_id,
                        "Deposit not yet observed"
                    ),
                    Err(error) => warn!(
                        transfer_id = %request.transfer_id,
                        exchange = %to,
                        %error,
                        "Failed to fetch deposit history"
                    ),
                }
            }
            None => {
                let from = request.from_exchange.clone();
                let mut answered = false;

                for (exchange, client) in self.registry.others(&from) {
                    match self
                        .find_deposit(client.as_ref(), &request.asset, &transaction_id)
                        .await
                    {
                        Ok(Some(record)) => {
                            info!(
                                transfer_id = %request.transfer_id,
                                %exchange,
                                %transaction_id,
                                scans = request.discovery_scans + 1,
                                "Discovered transfer destination"
                            );
                            request.record_deposit(exchange.clone(), record, Utc::now());
                            answered = true;
                            break;
                        }
                        Ok(None) => answered = true,
                        Err(error) => warn!(
                            transfer_id = %request.transfer_id,
                            %exchange,
                            %error,
                            "Failed to fetch deposit history during discovery"
                        ),
                    }
                }

                // Scans where no exchange answered carry no information
                if answered {
                    request.discovery_scans += 1;
                }
            }
        }
    }

    async fn find_deposit(
        &self,
        client: &dyn TransferClient,
        asset: &str,
        transaction_id: &str,
    ) -> Result<Option<DepositRecord>, ClientError> {
        let history = client
            .get_deposit_history(asset, self.config.deposit_history_limit)
            .await?;

        Ok(history.into_iter().find(|record| {
            fix_transaction_id(record.transaction_id.as_deref()).as_deref() == Some(transaction_id)
        }))
    }

    /// Fail a completed withdrawal whose deposit has not been observed within the configured
    /// bounds.
    fn enforce_deadline(&self, request: &mut TransferRequest, now: DateTime<Utc>) {
        if request.is_failed()
            || request.is_deposit_observed()
            || !request.withdrawal_status.is_completed()
        {
            return;
        }

        if let Some(timeout) = self.config.deposit_timeout()
            && now - request.created_at >= timeout
        {
            request.fail(TransferFailure::DepositNotObserved(format!(
                "no deposit observed within {}s of creation",
                timeout.num_seconds()
            )));
            return;
        }

        if let Some(max_scans) = self.config.max_discovery_scans
            && request.to_exchange.is_none()
            && request.discovery_scans >= max_scans
        {
            request.fail(TransferFailure::DepositNotObserved(format!(
                "destination not discovered after {} scans",
                request.discovery_scans
            )));
        }
    }
}

fn exchange_result<T>(
    exchange: &ExchangeName,
    result: Result<T, ClientError>,
) -> Result<T, ValidationError> {
    result.map_err(|source| ValidationError::Exchange {
        exchange: exchange.clone(),
        source,
    })
}
