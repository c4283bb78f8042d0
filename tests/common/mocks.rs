//! Scripted [`ChainClient`] double. Submissions return sequential hashes;
//! individual submissions can be scripted to fail, and receipts/senders/logs
//! are seeded per hash.

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, Log, H256, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fx_engine::chain::ChainClient;
use fx_engine::errors::ChainError;
use fx_engine::types::ReceiptSummary;

#[derive(Debug, Default)]
pub struct MockChainClient {
    pub executor: Address,
    /// Flat answer to every `balanceOf` read, keyed by contract address.
    pub balances: DashMap<Address, U256>,
    /// 1-based submission indices that must fail, with their error text.
    pub failing_submissions: DashMap<u64, String>,
    /// 1-based submission indices whose receipt reports a revert.
    pub reverting_submissions: DashMap<u64, ()>,
    /// Seeded receipts for externally-submitted transactions.
    pub receipts: DashMap<H256, ReceiptSummary>,
    /// Seeded senders for externally-submitted transactions.
    pub senders: DashMap<H256, Address>,
    pub submissions: Mutex<Vec<(Address, Bytes)>>,
    submission_counter: AtomicU64,
}

impl MockChainClient {
    pub fn new(executor: Address) -> Self {
        Self { executor, ..Default::default() }
    }

    pub fn set_balance(&self, contract: Address, balance: U256) {
        self.balances.insert(contract, balance);
    }

    pub fn fail_submission(&self, index: u64, error: &str) {
        self.failing_submissions.insert(index, error.to_string());
    }

    pub fn seed_external_tx(&self, tx_hash: H256, sender: Address, success: bool, logs: Vec<Log>) {
        self.senders.insert(tx_hash, sender);
        self.receipts.insert(
            tx_hash,
            ReceiptSummary { tx_hash, success, block_number: Some(1), logs },
        );
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn hash_for(index: u64) -> H256 {
        H256::from_low_u64_be(index)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn read_contract_value(
        &self,
        address: Address,
        _function_signature: &str,
        _args: &[Token],
    ) -> Result<Bytes, ChainError> {
        let balance = self.balances.get(&address).map(|b| *b).unwrap_or_default();
        let mut word = [0u8; 32];
        balance.to_big_endian(&mut word);
        Ok(Bytes::from(word.to_vec()))
    }

    async fn submit_transaction(
        &self,
        to: Address,
        data: Bytes,
        _fee_asset: Option<Address>,
    ) -> Result<H256, ChainError> {
        let index = self.submission_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.failing_submissions.get(&index) {
            return Err(ChainError::Provider(error.clone()));
        }
        self.submissions.lock().unwrap().push((to, data));

        let tx_hash = Self::hash_for(index);
        let success = !self.reverting_submissions.contains_key(&index);
        self.receipts.insert(
            tx_hash,
            ReceiptSummary { tx_hash, success, block_number: Some(index), logs: vec![] },
        );
        self.senders.insert(tx_hash, self.executor);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<ReceiptSummary, ChainError> {
        self.receipts
            .get(&tx_hash)
            .map(|r| r.clone())
            .ok_or(ChainError::ReceiptTimeout(tx_hash))
    }

    async fn transaction_sender(&self, tx_hash: H256) -> Result<Address, ChainError> {
        self.senders
            .get(&tx_hash)
            .map(|s| *s)
            .ok_or(ChainError::TransactionNotFound(tx_hash))
    }

    fn executor_address(&self) -> Address {
        self.executor
    }
}
