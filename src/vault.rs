//! # Vault Ledger
//!
//! Share accounting for pooled capital. The share price is never stored: it
//! is a pure function of (total deposited, cumulative realized PnL, total
//! shares) and can only move through those inputs. A deposit freezes the
//! price it entered at; redemption pays out at the price current at
//! redemption time, after a fail-fast custody balance check.

use chrono::Utc;
use dashmap::DashMap;
use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::chain::{decode_single_uint, encode_call, ChainClient};
use crate::config::VaultSettings;
use crate::errors::{ChainError, VaultError};
use crate::types::{DepositRecord, DepositStatus, VaultMetrics};

/// Share price as a pure function of the ledger totals. One share is worth
/// exactly its slice of (capital + realized PnL); an empty vault prices at
/// par so the first depositor gets 1:1.
pub fn share_price(total_deposited: Decimal, cumulative_pnl: Decimal, total_shares: Decimal) -> Decimal {
    if total_shares.is_zero() {
        Decimal::ONE
    } else {
        (total_deposited + cumulative_pnl) / total_shares
    }
}

#[derive(Debug, Clone, Default)]
struct VaultTotals {
    total_deposited: Decimal,
    total_shares: Decimal,
    cumulative_pnl: Decimal,
}

#[derive(Debug)]
pub struct VaultLedger {
    chain: Arc<dyn ChainClient>,
    settings: VaultSettings,
    deposits: DashMap<Uuid, DepositRecord>,
    /// Idempotency index for deposit proofs: one record per (depositor, tx).
    by_proof: DashMap<(Address, H256), Uuid>,
    /// Deposits with a payout in flight; at most one redemption may run per
    /// deposit.
    redeeming: DashMap<Uuid, ()>,
    totals: RwLock<VaultTotals>,
}

impl VaultLedger {
    pub fn new(chain: Arc<dyn ChainClient>, settings: VaultSettings) -> Self {
        Self {
            chain,
            settings,
            deposits: DashMap::new(),
            by_proof: DashMap::new(),
            redeeming: DashMap::new(),
            totals: RwLock::new(VaultTotals::default()),
        }
    }

    pub fn get_deposit(&self, id: &Uuid) -> Option<DepositRecord> {
        self.deposits.get(id).map(|r| r.clone())
    }

    pub async fn metrics(&self) -> VaultMetrics {
        let totals = self.totals.read().await;
        VaultMetrics {
            total_value_locked: totals.total_deposited + totals.cumulative_pnl,
            total_shares: totals.total_shares,
            share_price: share_price(
                totals.total_deposited,
                totals.cumulative_pnl,
                totals.total_shares,
            ),
            cumulative_pnl: totals.cumulative_pnl,
            active_deposits: self.deposits.iter().filter(|d| d.status == DepositStatus::Active).count(),
        }
    }

    /// Applies realized trade PnL to the ledger. This is the only way the
    /// share price moves other than deposits and redemptions.
    pub async fn record_pnl(&self, delta: Decimal) {
        let mut totals = self.totals.write().await;
        totals.cumulative_pnl += delta;
    }

    /// Issues shares for a verified deposit, freezing the entry share price
    /// into the record. Resubmission of the same (depositor, tx) proof
    /// returns the original record; the bool is `true` only on creation.
    #[instrument(skip(self), fields(depositor = %depositor, tx_hash = %tx_hash))]
    pub async fn record_deposit(
        &self,
        depositor: Address,
        amount_usd: Decimal,
        tx_hash: H256,
    ) -> Result<(DepositRecord, bool), VaultError> {
        if amount_usd <= Decimal::ZERO {
            return Err(VaultError::InvalidAmount(amount_usd.to_string()));
        }

        // atomic claim of the proof key; the loser of a race serves the
        // winner's record
        let id = Uuid::new_v4();
        {
            use dashmap::mapref::entry::Entry;
            match self.by_proof.entry((depositor, tx_hash)) {
                Entry::Occupied(existing) => {
                    let existing_id = *existing.get();
                    drop(existing);
                    if let Some(record) = self.get_deposit(&existing_id) {
                        return Ok((record, false));
                    }
                    return Err(VaultError::DepositNotFound(existing_id));
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(id);
                }
            }
        }

        let mut totals = self.totals.write().await;
        let price =
            share_price(totals.total_deposited, totals.cumulative_pnl, totals.total_shares);
        let shares = amount_usd / price;
        totals.total_deposited += amount_usd;
        totals.total_shares += shares;

        let record = DepositRecord {
            id,
            depositor,
            amount_usd,
            shares_issued: shares,
            share_price_at_entry: price,
            tx_hash,
            status: DepositStatus::Active,
            withdraw_tx_hash: None,
            created_at: Utc::now(),
        };
        self.deposits.insert(id, record.clone());
        info!(target: "vault", deposit_id = %id, %shares, %price, "shares issued");
        Ok((record, true))
    }

    /// Redeems a deposit at the current share price. The custody balance is
    /// checked before the payout transaction is submitted; an underfunded
    /// custody fails fast with no partial payout.
    #[instrument(skip(self), fields(deposit_id = %deposit_id, caller = %caller))]
    pub async fn redeem(
        &self,
        deposit_id: Uuid,
        caller: Address,
    ) -> Result<DepositRecord, VaultError> {
        let deposit = self.get_deposit(&deposit_id).ok_or(VaultError::DepositNotFound(deposit_id))?;
        if deposit.depositor != caller {
            return Err(VaultError::NotDepositOwner);
        }
        if deposit.status == DepositStatus::Withdrawn {
            return Err(VaultError::AlreadyWithdrawn(deposit_id));
        }

        // claim the redemption; a concurrent caller must not reach the
        // payout submission
        {
            use dashmap::mapref::entry::Entry;
            match self.redeeming.entry(deposit_id) {
                Entry::Occupied(_) => return Err(VaultError::RedemptionInProgress(deposit_id)),
                Entry::Vacant(vacant) => {
                    vacant.insert(());
                }
            }
        }
        let result = self.pay_out(&deposit).await;
        self.redeeming.remove(&deposit_id);
        result
    }

    async fn pay_out(&self, deposit: &DepositRecord) -> Result<DepositRecord, VaultError> {
        let deposit_id = deposit.id;
        let payout_usd = {
            let totals = self.totals.read().await;
            let price =
                share_price(totals.total_deposited, totals.cumulative_pnl, totals.total_shares);
            deposit.shares_issued * price
        };
        let payout_units = usd_to_units(payout_usd, self.settings.settlement_token_decimals)?;

        let raw = self
            .chain
            .read_contract_value(
                self.settings.settlement_token,
                "balanceOf(address)",
                &[Token::Address(self.settings.custody_address)],
            )
            .await?;
        let available = decode_single_uint(&raw)?;
        if available < payout_units {
            return Err(VaultError::InsufficientCustodyBalance {
                required: payout_units,
                available,
            });
        }

        let payout_data = encode_call(
            "transfer(address,uint256)",
            &[Token::Address(deposit.depositor), Token::Uint(payout_units)],
        );
        let tx_hash =
            self.chain.submit_transaction(self.settings.settlement_token, payout_data, None).await?;
        let receipt = self.chain.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(VaultError::Chain(ChainError::Reverted {
                tx_hash,
                reason: "payout transfer reverted".into(),
            }));
        }

        // burn the shares; the redeemer takes their PnL slice with them so
        // the price for remaining holders is unchanged
        {
            let mut totals = self.totals.write().await;
            totals.total_deposited -= deposit.amount_usd;
            totals.total_shares -= deposit.shares_issued;
            totals.cumulative_pnl -= payout_usd - deposit.amount_usd;
        }

        let mut updated = deposit.clone();
        updated.status = DepositStatus::Withdrawn;
        updated.withdraw_tx_hash = Some(tx_hash);
        self.deposits.insert(deposit_id, updated.clone());
        info!(target: "vault", deposit_id = %deposit_id, %payout_usd, "deposit redeemed");
        Ok(updated)
    }
}

/// Converts a USD ledger amount into settlement-token base units.
pub fn usd_to_units(amount: Decimal, decimals: u8) -> Result<U256, VaultError> {
    let scaled = amount * Decimal::from(10u64.pow(decimals as u32));
    let truncated =
        scaled.trunc().to_u128().ok_or_else(|| VaultError::InvalidAmount(amount.to_string()))?;
    Ok(U256::from(truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn share_price_is_pure_over_the_totals() {
        assert_eq!(share_price(dec!(100), dec!(1.2), dec!(100)), dec!(1.012));
        // empty vault prices at par
        assert_eq!(share_price(dec!(0), dec!(0), dec!(0)), Decimal::ONE);
        // losses push the price below par
        assert_eq!(share_price(dec!(100), dec!(-10), dec!(100)), dec!(0.9));
    }

    #[test]
    fn usd_to_units_uses_token_decimals() {
        assert_eq!(usd_to_units(dec!(12.5), 6).unwrap(), U256::from(12_500_000u64));
        assert_eq!(usd_to_units(dec!(0.000001), 6).unwrap(), U256::from(1u64));
    }
}
