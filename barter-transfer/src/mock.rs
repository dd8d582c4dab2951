//! In-process [`TransferClient`] simulating an exchange account, for paper trading and tests.

use crate::{
    client::{
        AssetInfo, ClientError, DepositAddress, DepositRecord, NetworkInfo, TransferClient,
        WithdrawalInfo, WithdrawalReceipt, WithdrawalRequest,
    },
    status::LegStatus,
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use smol_str::{SmolStr, format_smolstr};

/// Number of calls received by a [`MockExchange`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub balance: usize,
    pub asset_info: usize,
    pub deposit_address: usize,
    pub submit_withdrawal: usize,
    pub withdrawal_status: usize,
    pub deposit_history: usize,
}

impl MockCalls {
    pub fn total(&self) -> usize {
        self.balance
            + self.asset_info
            + self.deposit_address
            + self.submit_withdrawal
            + self.withdrawal_status
            + self.deposit_history
    }
}

#[derive(Debug, Default)]
struct MockState {
    balances: FnvHashMap<SmolStr, Decimal>,
    assets: FnvHashMap<SmolStr, AssetInfo>,
    addresses: FnvHashMap<(SmolStr, SmolStr), DepositAddress>,
    withdrawals: FnvHashMap<SmolStr, WithdrawalInfo>,
    /// Oldest first
    deposits: Vec<(SmolStr, DepositRecord)>,
    submitted: Vec<WithdrawalRequest>,
    unavailable: bool,
    calls: MockCalls,
}

/// Simulated exchange account.
///
/// Submitted withdrawals start [`LegStatus::Pending`], debit the balance and stay there until
/// the test drives them with [`MockExchange::set_withdrawal`] or
/// [`MockExchange::settle_withdrawal`]. Deposits only appear once pushed with
/// [`MockExchange::push_deposit`].
#[derive(Debug, Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, asset: &str, balance: Decimal) -> Self {
        self.state
            .lock()
            .balances
            .insert(SmolStr::new(asset), balance);
        self
    }

    /// Add a settlement network for `asset`.
    pub fn with_network(self, asset: &str, network: &str, info: NetworkInfo) -> Self {
        self.state
            .lock()
            .assets
            .entry(SmolStr::new(asset))
            .or_insert_with(|| AssetInfo {
                asset: SmolStr::new(asset),
                networks: Default::default(),
            })
            .networks
            .insert(SmolStr::new(network), info);
        self
    }

    /// Configure the deposit address returned for `asset` on `network`. Unconfigured pairs
    /// receive a generated address without memo.
    pub fn with_deposit_address(
        self,
        asset: &str,
        network: &str,
        address: &str,
        memo: Option<&str>,
    ) -> Self {
        self.state.lock().addresses.insert(
            (SmolStr::new(asset), SmolStr::new(network)),
            DepositAddress {
                address: address.to_string(),
                network: SmolStr::new(network),
                memo: memo.map(str::to_string),
            },
        );
        self
    }

    /// Simulate an outage: every subsequent call fails with [`ClientError::Connectivity`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Update a submitted withdrawal's status and raw transaction id.
    pub fn set_withdrawal(
        &self,
        withdrawal_id: &str,
        status: LegStatus,
        transaction_id: Option<&str>,
    ) -> bool {
        let mut state = self.state.lock();
        let Some(withdrawal) = state.withdrawals.get_mut(withdrawal_id) else {
            return false;
        };
        withdrawal.status = status;
        if let Some(transaction_id) = transaction_id {
            withdrawal.transaction_id = Some(transaction_id.to_string());
        }
        true
    }

    /// Mark a submitted withdrawal as broadcast and completed under `transaction_id`.
    pub fn settle_withdrawal(&self, withdrawal_id: &str, transaction_id: &str) -> bool {
        self.set_withdrawal(withdrawal_id, LegStatus::Completed, Some(transaction_id))
    }

    /// Credit an incoming deposit, making it visible in deposit history.
    pub fn push_deposit(&self, asset: &str, record: DepositRecord) {
        let mut state = self.state.lock();
        if record.status.is_completed() {
            *state.balances.entry(SmolStr::new(asset)).or_default() += record.amount;
        }
        state.deposits.push((SmolStr::new(asset), record));
    }

    /// Register a withdrawal submitted outside this process.
    pub fn insert_withdrawal(&self, withdrawal_id: &str, info: WithdrawalInfo) {
        self.state
            .lock()
            .withdrawals
            .insert(SmolStr::new(withdrawal_id), info);
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.state
            .lock()
            .balances
            .get(asset)
            .copied()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> MockCalls {
        self.state.lock().calls
    }

    /// Withdrawal requests received, in submission order.
    pub fn submitted(&self) -> Vec<WithdrawalRequest> {
        self.state.lock().submitted.clone()
    }

    fn call(
        &self,
        record: impl FnOnce(&mut MockCalls),
    ) -> Result<parking_lot::MutexGuard<'_, MockState>, ClientError> {
        let mut state = self.state.lock();
        record(&mut state.calls);
        if state.unavailable {
            return Err(ClientError::Connectivity("mock exchange unavailable".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl TransferClient for MockExchange {
    async fn get_asset_balance(&self, asset: &str) -> Result<Decimal, ClientError> {
        let state = self.call(|calls| calls.balance += 1)?;
        Ok(state.balances.get(asset).copied().unwrap_or_default())
    }

    async fn asset_info(&self, asset: &str) -> Result<AssetInfo, ClientError> {
        let state = self.call(|calls| calls.asset_info += 1)?;
        Ok(state.assets.get(asset).cloned().unwrap_or_else(|| AssetInfo {
            asset: SmolStr::new(asset),
            networks: Default::default(),
        }))
    }

    async fn get_deposit_address(
        &self,
        asset: &str,
        network: &str,
    ) -> Result<DepositAddress, ClientError> {
        let state = self.call(|calls| calls.deposit_address += 1)?;
        let address = state
            .addresses
            .get(&(SmolStr::new(asset), SmolStr::new(network)))
            .cloned()
            .unwrap_or_else(|| DepositAddress {
                address: format!("mock-{}-{}", asset.to_ascii_lowercase(), network.to_ascii_lowercase()),
                network: SmolStr::new(network),
                memo: None,
            });
        Ok(address)
    }

    async fn submit_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, ClientError> {
        let mut state = self.call(|calls| calls.submit_withdrawal += 1)?;

        let balance = state.balances.entry(request.asset.clone()).or_default();
        if *balance < request.amount {
            return Err(ClientError::Api {
                code: Some("INSUFFICIENT_BALANCE".to_string()),
                message: format!("available {balance}, requested {}", request.amount),
            });
        }
        *balance -= request.amount;

        let withdrawal_id = format_smolstr!("wd_{}", state.submitted.len() + 1);
        state.withdrawals.insert(
            withdrawal_id.clone(),
            WithdrawalInfo {
                status: LegStatus::Pending,
                transaction_id: None,
                amount: request.amount,
                asset: request.asset.clone(),
            },
        );
        state.submitted.push(request);

        Ok(WithdrawalReceipt {
            withdrawal_id,
            status: LegStatus::Pending,
        })
    }

    async fn get_withdrawal_status(
        &self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalInfo, ClientError> {
        let state = self.call(|calls| calls.withdrawal_status += 1)?;
        state
            .withdrawals
            .get(withdrawal_id)
            .cloned()
            .ok_or_else(|| ClientError::Api {
                code: Some("NOT_FOUND".to_string()),
                message: format!("unknown withdrawal {withdrawal_id}"),
            })
    }

    async fn get_deposit_history(
        &self,
        asset: &str,
        limit: u32,
    ) -> Result<Vec<DepositRecord>, ClientError> {
        let state = self.call(|calls| calls.deposit_history += 1)?;
        Ok(state
            .deposits
            .iter()
            .rev()
            .filter(|(deposit_asset, _)| deposit_asset == asset)
            .take(limit as usize)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
