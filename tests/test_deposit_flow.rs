//! Deposit proof verification and the vault deposit/withdraw lifecycle.

mod common;

use common::mocks::MockChainClient;
use ethers::types::{Address, Bytes, Log, H256, U256};
use ethers::utils::keccak256;
use rust_decimal_macros::dec;
use std::sync::Arc;

use fx_engine::config::VaultSettings;
use fx_engine::deposit::DepositVerifier;
use fx_engine::errors::{DepositError, VaultError};
use fx_engine::types::DepositStatus;
use fx_engine::vault::VaultLedger;

const CUSTODY: [u8; 20] = [0xc0; 20];
const SETTLEMENT_TOKEN: [u8; 20] = [0x05; 20];

fn settings() -> VaultSettings {
    VaultSettings {
        custody_address: Address::from(CUSTODY),
        settlement_token: Address::from(SETTLEMENT_TOKEN),
        settlement_token_decimals: 6,
    }
}

fn transfer_log(from: Address, to: Address, amount: U256) -> Log {
    let mut data = [0u8; 32];
    amount.to_big_endian(&mut data);
    Log {
        address: Address::from(SETTLEMENT_TOKEN),
        topics: vec![
            H256::from(keccak256("Transfer(address,address,uint256)".as_bytes())),
            H256::from(from),
            H256::from(to),
        ],
        data: Bytes::from(data.to_vec()),
        ..Default::default()
    }
}

fn harness() -> (Arc<MockChainClient>, DepositVerifier, VaultLedger) {
    let chain = Arc::new(MockChainClient::new(Address::repeat_byte(0xee)));
    let verifier = DepositVerifier::new(chain.clone(), settings());
    let vault = VaultLedger::new(chain.clone(), settings());
    (chain, verifier, vault)
}

#[tokio::test]
async fn exact_transfer_is_accepted() {
    let (chain, verifier, _vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let tx_hash = H256::repeat_byte(0x99);
    // 250 USD at 6 decimals
    let amount = U256::from(250_000_000u64);
    chain.seed_external_tx(
        tx_hash,
        depositor,
        true,
        vec![transfer_log(depositor, Address::from(CUSTODY), amount)],
    );

    let transfer = verifier.verify(depositor, amount, tx_hash).await.unwrap();
    assert_eq!(transfer.amount, amount);
    assert_eq!(transfer.to, Address::from(CUSTODY));
}

#[tokio::test]
async fn any_nonzero_amount_delta_is_rejected() {
    let (chain, verifier, _vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let tx_hash = H256::repeat_byte(0x99);
    let on_chain = U256::from(250_000_000u64);
    chain.seed_external_tx(
        tx_hash,
        depositor,
        true,
        vec![transfer_log(depositor, Address::from(CUSTODY), on_chain)],
    );

    // one base unit off, in either direction
    for claimed in [on_chain + 1, on_chain - 1] {
        let err = verifier.verify(depositor, claimed, tx_hash).await.unwrap_err();
        assert!(matches!(err, DepositError::NoMatchingTransfer { .. }));
        assert!(!err.is_transient());
    }
}

#[tokio::test]
async fn sender_mismatch_is_rejected() {
    let (chain, verifier, _vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let actual_sender = Address::repeat_byte(0x0b);
    let tx_hash = H256::repeat_byte(0x99);
    let amount = U256::from(1_000_000u64);
    chain.seed_external_tx(
        tx_hash,
        actual_sender,
        true,
        vec![transfer_log(actual_sender, Address::from(CUSTODY), amount)],
    );

    let err = verifier.verify(depositor, amount, tx_hash).await.unwrap_err();
    assert!(matches!(err, DepositError::SenderMismatch { .. }));
}

#[tokio::test]
async fn unindexed_transaction_is_retryable() {
    let (_chain, verifier, _vault) = harness();
    let err = verifier
        .verify(Address::repeat_byte(0x0a), U256::from(1u64), H256::repeat_byte(0x42))
        .await
        .unwrap_err();
    assert!(matches!(err, DepositError::NotYetConfirmed(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn reverted_deposit_transaction_is_rejected() {
    let (chain, verifier, _vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let tx_hash = H256::repeat_byte(0x99);
    chain.seed_external_tx(tx_hash, depositor, false, vec![]);

    let err = verifier.verify(depositor, U256::from(1u64), tx_hash).await.unwrap_err();
    assert!(matches!(err, DepositError::TransactionFailed(_)));
}

#[tokio::test]
async fn resubmitted_proof_returns_the_original_record() {
    let (_chain, _verifier, vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let tx_hash = H256::repeat_byte(0x99);

    let (first, created) = vault.record_deposit(depositor, dec!(250), tx_hash).await.unwrap();
    assert!(created);

    let (second, created_again) =
        vault.record_deposit(depositor, dec!(250), tx_hash).await.unwrap();
    assert!(!created_again);
    assert_eq!(second.id, first.id);
    assert_eq!(second.shares_issued, first.shares_issued);

    // no second record was minted
    assert_eq!(vault.metrics().await.active_deposits, 1);
    assert_eq!(vault.metrics().await.total_shares, first.shares_issued);
}

#[tokio::test]
async fn withdrawal_fails_fast_on_underfunded_custody() {
    let (chain, _verifier, vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let (record, _) = vault.record_deposit(depositor, dec!(100), H256::repeat_byte(0x01)).await.unwrap();

    // custody holds 1 USDC against a 100 USD payout
    chain.set_balance(Address::from(SETTLEMENT_TOKEN), U256::from(1_000_000u64));

    let err = vault.redeem(record.id, depositor).await.unwrap_err();
    assert!(matches!(err, VaultError::InsufficientCustodyBalance { .. }));
    // no payout was submitted
    assert_eq!(chain.submission_count(), 0);
    // and the deposit is still active
    assert_eq!(vault.get_deposit(&record.id).unwrap().status, DepositStatus::Active);
}

#[tokio::test]
async fn withdrawal_pays_out_and_transitions_exactly_once() {
    let (chain, _verifier, vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let (record, _) = vault.record_deposit(depositor, dec!(100), H256::repeat_byte(0x01)).await.unwrap();
    chain.set_balance(Address::from(SETTLEMENT_TOKEN), U256::from(1_000_000_000u64));

    let withdrawn = vault.redeem(record.id, depositor).await.unwrap();
    assert_eq!(withdrawn.status, DepositStatus::Withdrawn);
    assert!(withdrawn.withdraw_tx_hash.is_some());

    // active -> withdrawn happens exactly once
    let err = vault.redeem(record.id, depositor).await.unwrap_err();
    assert!(matches!(err, VaultError::AlreadyWithdrawn(_)));
}

#[tokio::test]
async fn only_the_depositor_may_redeem() {
    let (chain, _verifier, vault) = harness();
    let depositor = Address::repeat_byte(0x0a);
    let stranger = Address::repeat_byte(0x0b);
    let (record, _) = vault.record_deposit(depositor, dec!(100), H256::repeat_byte(0x01)).await.unwrap();
    chain.set_balance(Address::from(SETTLEMENT_TOKEN), U256::from(1_000_000_000u64));

    let err = vault.redeem(record.id, stranger).await.unwrap_err();
    assert!(matches!(err, VaultError::NotDepositOwner));
}
