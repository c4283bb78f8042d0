//! # Transaction Orchestrator
//!
//! Sequences dependent on-chain operations with confirmation waits between
//! them. A leg is an approval followed by the operation that spends it; the
//! next submission never starts before the previous receipt arrives, because
//! each operation depends on the previous one's effect. There is no
//! speculative pipelining and no server-side retry of a failed leg: retrying
//! a chain mutation blind risks double-submission, so retries are the
//! caller's, via a fresh idempotency key.
//!
//! Trade records are owned here. A record is created `Pending` before the
//! first submission, has its transaction hashes written as they land, and
//! always reaches a terminal state before an error propagates out, so a
//! crash-free failure path never leaves a record `Pending`.

use chrono::Utc;
use dashmap::DashMap;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chain::{decode_single_uint, encode_call, ChainClient};
use crate::errors::OrchestratorError;
use crate::metrics::{TX_CONFIRMED, TX_FAILED, TX_SUBMITTED};
use crate::types::{LegExecutionResult, SpreadOpportunity, TradeRecord, TradeStatus};

/// Stages of one orchestrated execution, in order. Terminal is reached
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Quoting,
    Thresholding,
    Submitting(usize),
    Confirming(usize),
    Terminal,
}

/// One dependent pair of operations: approve `router` for `amount_in` of
/// `token_in`, then swap through the router.
#[derive(Debug, Clone)]
pub struct TradeLeg {
    pub venue: String,
    pub router: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_amount_out: U256,
    pub expected_amount_out: U256,
}

fn erc20_approve(spender: Address, amount: U256) -> Bytes {
    encode_call("approve(address,uint256)", &[Token::Address(spender), Token::Uint(amount)])
}

fn erc20_transfer(to: Address, amount: U256) -> Bytes {
    encode_call("transfer(address,uint256)", &[Token::Address(to), Token::Uint(amount)])
}

fn router_swap(leg: &TradeLeg) -> Bytes {
    encode_call(
        "swap(address,address,uint256,uint256)",
        &[
            Token::Address(leg.token_in),
            Token::Address(leg.token_out),
            Token::Uint(leg.amount_in),
            Token::Uint(leg.min_amount_out),
        ],
    )
}

#[derive(Debug)]
pub struct TransactionOrchestrator {
    chain: Arc<dyn ChainClient>,
    trades: DashMap<Uuid, TradeRecord>,
}

impl TransactionOrchestrator {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain, trades: DashMap::new() }
    }

    pub fn get_trade(&self, id: &Uuid) -> Option<TradeRecord> {
        self.trades.get(id).map(|r| r.clone())
    }

    /// Snapshot of every trade record, for reporting views.
    pub fn list_trades(&self) -> Vec<TradeRecord> {
        self.trades.iter().map(|r| r.clone()).collect()
    }

    fn update_trade<F: FnOnce(&mut TradeRecord)>(&self, id: &Uuid, f: F) {
        if let Some(mut record) = self.trades.get_mut(id) {
            // terminal states never revert
            if record.status.is_terminal() {
                return;
            }
            f(&mut record);
        }
    }

    fn insert_pending(
        &self,
        pair: &str,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
        rate: f64,
        spread_pct: f64,
        buy_venue: Option<String>,
        sell_venue: Option<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.trades.insert(
            id,
            TradeRecord {
                id,
                pair: pair.to_string(),
                from_token,
                to_token,
                amount_in,
                amount_out: None,
                rate,
                spread_pct,
                buy_venue,
                sell_venue,
                status: TradeStatus::Pending,
                approval_tx_hash: None,
                swap_tx_hash: None,
                transfer_tx_hash: None,
                pnl_usd: None,
                error: None,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Writes the terminal `Failed` state before the error leaves the
    /// orchestrator.
    fn fail_trade(&self, id: &Uuid, error: &OrchestratorError) {
        TX_FAILED.inc();
        self.update_trade(id, |record| {
            record.status = TradeStatus::Failed;
            record.error = Some(error.to_string());
        });
    }

    async fn check_input_balance(
        &self,
        token: Address,
        required: U256,
    ) -> Result<(), OrchestratorError> {
        let raw = self
            .chain
            .read_contract_value(
                token,
                "balanceOf(address)",
                &[Token::Address(self.chain.executor_address())],
            )
            .await
            .map_err(|e| OrchestratorError::Submission(e.to_string()))?;
        let available = decode_single_uint(&raw)
            .map_err(|e| OrchestratorError::Submission(e.to_string()))?;
        if available < required {
            return Err(OrchestratorError::InsufficientBalance { required, available });
        }
        Ok(())
    }

    /// Submits one transaction and waits for its receipt. Any revert or
    /// infrastructure failure comes back as a plain message for leg-level
    /// classification.
    async fn submit_and_confirm(
        &self,
        label: &str,
        to: Address,
        data: Bytes,
    ) -> Result<H256, String> {
        TX_SUBMITTED.inc();
        let tx_hash = self
            .chain
            .submit_transaction(to, data, None)
            .await
            .map_err(|e| format!("{label} submission failed: {e}"))?;

        let receipt = self
            .chain
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|e| format!("{label} confirmation failed: {e}"))?;

        if !receipt.success {
            TX_FAILED.inc();
            return Err(format!("{label} transaction {tx_hash:?} reverted"));
        }
        TX_CONFIRMED.inc();
        Ok(tx_hash)
    }

    /// Runs one leg: approval, receipt, swap, receipt. Hashes are written to
    /// the trade record as they land so partial state survives a failure.
    async fn execute_leg(
        &self,
        trade_id: &Uuid,
        leg_index: usize,
        leg: &TradeLeg,
    ) -> Result<LegExecutionResult, String> {
        let mut stage = ExecutionStage::Submitting(leg_index);
        info!(target: "orchestrator", ?trade_id, leg_index, venue = %leg.venue, ?stage, "submitting approval");

        let approval_tx_hash = self
            .submit_and_confirm("approval", leg.token_in, erc20_approve(leg.router, leg.amount_in))
            .await?;
        self.update_trade(trade_id, |record| {
            if leg_index == 0 {
                record.approval_tx_hash = Some(approval_tx_hash);
            }
        });

        stage = ExecutionStage::Confirming(leg_index);
        info!(target: "orchestrator", ?trade_id, leg_index, ?stage, "approval confirmed, submitting swap");

        let swap_tx_hash =
            self.submit_and_confirm("swap", leg.router, router_swap(leg)).await?;
        self.update_trade(trade_id, |record| match leg_index {
            0 => record.swap_tx_hash = Some(swap_tx_hash),
            _ => record.transfer_tx_hash = Some(swap_tx_hash),
        });

        Ok(LegExecutionResult {
            leg_index,
            venue: leg.venue.clone(),
            approval_tx_hash: Some(approval_tx_hash),
            swap_tx_hash: Some(swap_tx_hash),
            amount_out: leg.expected_amount_out,
        })
    }

    /// Executes legs strictly in order. The error distinguishes a failure
    /// with no funds moved from a failure after an earlier leg settled,
    /// because the recovery actions differ.
    async fn execute_legs(
        &self,
        trade_id: &Uuid,
        legs: &[TradeLeg],
    ) -> Result<Vec<LegExecutionResult>, OrchestratorError> {
        let mut completed: Vec<LegExecutionResult> = Vec::with_capacity(legs.len());

        for (i, leg) in legs.iter().enumerate() {
            match self.execute_leg(trade_id, i, leg).await {
                Ok(result) => completed.push(result),
                Err(error) => {
                    warn!(target: "orchestrator", ?trade_id, failed_leg = i + 1, %error, "leg failed");
                    return Err(if completed.is_empty() {
                        OrchestratorError::FailedBeforeExecution { failed_leg: i + 1, error }
                    } else {
                        OrchestratorError::PartialExecution {
                            completed_legs: completed.len(),
                            failed_leg: i + 1,
                            error,
                            completed_results: completed,
                        }
                    });
                }
            }
        }

        Ok(completed)
    }

    /// Two-venue arbitrage: leg 1 buys on the wide venue, leg 2 unwinds the
    /// output on the other. Returns the terminal trade record.
    #[instrument(skip(self, opportunity), fields(pair, amount_in = %amount_in))]
    pub async fn execute_arbitrage(
        &self,
        pair: &str,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
        notional_usd: f64,
        opportunity: &SpreadOpportunity,
        buy_router: Address,
        sell_router: Address,
        min_out_bps: u32,
    ) -> Result<TradeRecord, OrchestratorError> {
        let trade_id = self.insert_pending(
            pair,
            from_token,
            to_token,
            amount_in,
            opportunity.buy_quote.rate,
            opportunity.spread_pct,
            Some(opportunity.buy_venue.clone()),
            Some(opportunity.sell_venue.clone()),
        );

        let result = self
            .run_arbitrage_legs(
                &trade_id,
                from_token,
                to_token,
                amount_in,
                opportunity,
                buy_router,
                sell_router,
                min_out_bps,
            )
            .await;

        match result {
            Ok(final_amount_out) => {
                let pnl_usd = opportunity.spread_pct / 100.0 * notional_usd;
                self.update_trade(&trade_id, |record| {
                    record.status = TradeStatus::Confirmed;
                    record.amount_out = Some(final_amount_out);
                    record.pnl_usd = Some(pnl_usd);
                });
                info!(target: "orchestrator", ?trade_id, pnl_usd, "arbitrage confirmed");
                Ok(self.get_trade(&trade_id).expect("trade record exists"))
            }
            Err(e) => {
                self.fail_trade(&trade_id, &e);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_arbitrage_legs(
        &self,
        trade_id: &Uuid,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
        opportunity: &SpreadOpportunity,
        buy_router: Address,
        sell_router: Address,
        min_out_bps: u32,
    ) -> Result<U256, OrchestratorError> {
        self.check_input_balance(from_token, amount_in).await?;

        let buy_out = opportunity.buy_quote.amount_out;
        let sell_out = opportunity.sell_quote.amount_out;
        let legs = vec![
            TradeLeg {
                venue: opportunity.buy_venue.clone(),
                router: buy_router,
                token_in: from_token,
                token_out: to_token,
                amount_in,
                min_amount_out: apply_bps(buy_out, min_out_bps),
                expected_amount_out: buy_out,
            },
            TradeLeg {
                venue: opportunity.sell_venue.clone(),
                router: sell_router,
                token_in: to_token,
                token_out: from_token,
                amount_in: buy_out,
                min_amount_out: apply_bps(sell_out, min_out_bps),
                expected_amount_out: sell_out,
            },
        ];

        let results = self.execute_legs(trade_id, &legs).await?;
        Ok(results.last().map(|r| r.amount_out).unwrap_or_default())
    }

    /// Remittance: approve + swap into the destination token, then transfer
    /// the proceeds to the recipient. The transfer depends on the swap's
    /// effect, so it is sequenced exactly like a second leg.
    #[instrument(skip(self), fields(amount_in = %amount_in, recipient = %recipient))]
    pub async fn execute_remittance(
        &self,
        pair: &str,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
        recipient: Address,
        venue: &str,
        router: Address,
        expected_amount_out: U256,
        min_out_bps: u32,
        rate: f64,
    ) -> Result<TradeRecord, OrchestratorError> {
        let trade_id = self.insert_pending(
            pair,
            from_token,
            to_token,
            amount_in,
            rate,
            0.0,
            Some(venue.to_string()),
            None,
        );

        let result = self
            .run_remittance_legs(
                &trade_id,
                from_token,
                to_token,
                amount_in,
                recipient,
                venue,
                router,
                expected_amount_out,
                min_out_bps,
            )
            .await;

        match result {
            Ok(delivered) => {
                self.update_trade(&trade_id, |record| {
                    record.status = TradeStatus::Confirmed;
                    record.amount_out = Some(delivered);
                });
                info!(target: "orchestrator", ?trade_id, "remittance confirmed");
                Ok(self.get_trade(&trade_id).expect("trade record exists"))
            }
            Err(e) => {
                self.fail_trade(&trade_id, &e);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_remittance_legs(
        &self,
        trade_id: &Uuid,
        from_token: Address,
        to_token: Address,
        amount_in: U256,
        recipient: Address,
        venue: &str,
        router: Address,
        expected_amount_out: U256,
        min_out_bps: u32,
    ) -> Result<U256, OrchestratorError> {
        self.check_input_balance(from_token, amount_in).await?;

        let swap_leg = TradeLeg {
            venue: venue.to_string(),
            router,
            token_in: from_token,
            token_out: to_token,
            amount_in,
            min_amount_out: apply_bps(expected_amount_out, min_out_bps),
            expected_amount_out,
        };
        let swap_result = self
            .execute_legs(trade_id, std::slice::from_ref(&swap_leg))
            .await?
            .pop()
            .ok_or_else(|| OrchestratorError::Submission("swap produced no result".into()))?;

        // payout transfer depends on the swap proceeds
        let delivered = swap_result.amount_out;
        match self
            .submit_and_confirm("payout", to_token, erc20_transfer(recipient, delivered))
            .await
        {
            Ok(transfer_tx_hash) => {
                self.update_trade(trade_id, |record| {
                    record.transfer_tx_hash = Some(transfer_tx_hash);
                });
                Ok(delivered)
            }
            Err(error) => Err(OrchestratorError::PartialExecution {
                completed_legs: 1,
                failed_leg: 2,
                error,
                completed_results: vec![swap_result],
            }),
        }
    }
}

fn apply_bps(amount: U256, keep_bps: u32) -> U256 {
    amount.saturating_mul(U256::from(keep_bps)) / U256::from(10_000u32)
}
