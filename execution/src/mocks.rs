//! Test doubles for the chain gateway and key custody, plus engine constructors.

use growbet_types::Policy;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    ChainError, ChainGateway, ChainTransaction, Dice, Engine, KeyProvider, Memory,
    ProvisionedWallet, RetryPolicy, StoreConfig, TransferInfo, TransferRequest, TransferSource,
    TxStatus,
};

const BASE58_TAIL: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn tail(seed: u8) -> char {
    char::from(BASE58_TAIL[usize::from(seed) % BASE58_TAIL.len()])
}

/// A well-formed chain address unique per `seed` (up to 57 distinct values).
pub fn create_address(seed: u8) -> String {
    format!("{}{}", "1".repeat(31), tail(seed))
}

/// A well-formed transaction signature unique per `seed` (up to 57 distinct values).
pub fn create_signature(seed: u8) -> String {
    format!("{}{}", "1".repeat(63), tail(seed))
}

/// Scripted result of the next `submit_transfer` call.
#[derive(Debug, Clone)]
pub enum SubmitScript {
    Ok(String),
    Err(ChainError),
    /// Never completes, so the caller's timeout fires.
    Hang,
}

#[derive(Default)]
struct Inner {
    balances: HashMap<String, u64>,
    balance_error: Option<ChainError>,
    transactions: HashMap<String, ChainTransaction>,
    submits: VecDeque<SubmitScript>,
    /// `None` entries hang.
    statuses: HashMap<String, VecDeque<Option<TxStatus>>>,
    submissions: Vec<TransferRequest>,
    status_checks: usize,
    next_signature: u64,
}

/// In-memory chain. Unscripted submissions succeed with a fresh signature and move funds
/// immediately; unscripted status checks report `Confirmed`.
#[derive(Default, Clone)]
pub struct MockGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MockGateway {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_balance(&self, address: &str, amount: u64) {
        self.inner().balances.insert(address.to_string(), amount);
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.inner().balances.get(address).copied().unwrap_or(0)
    }

    pub fn fail_balance(&self, error: Option<ChainError>) {
        self.inner().balance_error = error;
    }

    pub fn add_transaction(&self, signature: &str, transaction: ChainTransaction) {
        self.inner()
            .transactions
            .insert(signature.to_string(), transaction);
    }

    /// Convenience for a successful single-transfer transaction.
    pub fn add_payment(&self, signature: &str, destination: &str, amount: u64) {
        self.add_transaction(
            signature,
            ChainTransaction {
                failed: false,
                transfers: vec![TransferInfo {
                    destination: destination.to_string(),
                    amount,
                }],
            },
        );
    }

    pub fn script_submit(&self, script: SubmitScript) {
        self.inner().submits.push_back(script);
    }

    pub fn script_status(&self, signature: &str, statuses: impl IntoIterator<Item = Option<TxStatus>>) {
        self.inner()
            .statuses
            .entry(signature.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Number of `submit_transfer` calls, successful or not.
    pub fn submissions(&self) -> usize {
        self.inner().submissions.len()
    }

    pub fn submitted(&self) -> Vec<TransferRequest> {
        self.inner().submissions.clone()
    }

    pub fn status_checks(&self) -> usize {
        self.inner().status_checks
    }

    fn next_submit(&self, request: &TransferRequest) -> SubmitScript {
        let mut inner = self.inner();
        inner.submissions.push(request.clone());
        let script = match inner.submits.pop_front() {
            Some(script) => script,
            None => {
                inner.next_signature += 1;
                SubmitScript::Ok(format!("mock-sig-{}", inner.next_signature))
            }
        };
        if let SubmitScript::Ok(_) = script {
            if let TransferSource::Custodial { address, .. } = &request.source {
                let balance = inner.balances.entry(address.clone()).or_default();
                *balance = balance.saturating_sub(request.amount);
            }
            *inner
                .balances
                .entry(request.destination.clone())
                .or_default() += request.amount;
        }
        script
    }

    fn next_status(&self, signature: &str) -> Option<TxStatus> {
        let mut inner = self.inner();
        inner.status_checks += 1;
        match inner.statuses.get_mut(signature).and_then(VecDeque::pop_front) {
            Some(status) => status,
            None => Some(TxStatus::Confirmed),
        }
    }
}

impl ChainGateway for MockGateway {
    async fn get_address_balance(&self, address: &str) -> Result<u64, ChainError> {
        let result = {
            let inner = self.inner();
            match &inner.balance_error {
                Some(err) => Err(err.clone()),
                None => Ok(inner.balances.get(address).copied().unwrap_or(0)),
            }
        };
        result
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<ChainTransaction>, ChainError> {
        let transaction = self.inner().transactions.get(signature).cloned();
        Ok(transaction)
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<String, ChainError> {
        match self.next_submit(request) {
            SubmitScript::Ok(signature) => Ok(signature),
            SubmitScript::Err(err) => Err(err),
            SubmitScript::Hang => futures::future::pending().await,
        }
    }

    async fn get_transaction_status(&self, signature: &str) -> Result<TxStatus, ChainError> {
        match self.next_status(signature) {
            Some(status) => Ok(status),
            None => futures::future::pending().await,
        }
    }
}

/// Deterministic key provider.
#[derive(Default)]
pub struct MockKeys {
    next: Mutex<u8>,
}

impl KeyProvider for MockKeys {
    async fn generate(&self) -> anyhow::Result<ProvisionedWallet> {
        let seed = {
            let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
            *next = next.wrapping_add(1);
            *next
        };
        Ok(ProvisionedWallet {
            address: create_address(100u8.wrapping_add(seed)),
            encrypted_key: format!("sealed-{seed}"),
        })
    }
}

pub type MockEngine = Engine<Memory, MockGateway, MockKeys>;

/// Retry settings small enough for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        call_timeout: std::time::Duration::from_millis(50),
        max_attempts: 3,
        status_polls: 3,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(4),
    }
}

/// Creates an in-memory engine with the given policy and dice.
pub fn create_engine(policy: Policy, dice: impl Dice + 'static) -> (Arc<MockEngine>, MockGateway) {
    let gateway = MockGateway::default();
    let engine = Engine::new(
        Memory::default(),
        StoreConfig {
            lock_timeout: std::time::Duration::from_secs(5),
        },
        gateway.clone(),
        MockKeys::default(),
        policy,
        fast_retry(),
        dice,
    );
    (Arc::new(engine), gateway)
}
