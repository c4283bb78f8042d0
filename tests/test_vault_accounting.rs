//! Share-price invariants: price is derived only from the ledgers, entry
//! prices freeze at deposit time, and redemptions price at redemption time.

mod common;

use common::mocks::MockChainClient;
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use fx_engine::config::VaultSettings;
use fx_engine::vault::{share_price, VaultLedger};

fn vault() -> (Arc<MockChainClient>, VaultLedger) {
    let chain = Arc::new(MockChainClient::new(Address::repeat_byte(0xee)));
    let settings = VaultSettings {
        custody_address: Address::repeat_byte(0xc0),
        settlement_token: Address::repeat_byte(0x05),
        settlement_token_decimals: 6,
    };
    let vault = VaultLedger::new(chain.clone(), settings);
    (chain, vault)
}

#[tokio::test]
async fn realized_pnl_moves_the_share_price() {
    let (_chain, vault) = vault();
    // 100 deposited at par issues 100 shares
    vault.record_deposit(Address::repeat_byte(0x0a), dec!(100), H256::repeat_byte(0x01)).await.unwrap();
    assert_eq!(vault.metrics().await.share_price, Decimal::ONE);

    vault.record_pnl(dec!(1.2)).await;
    let metrics = vault.metrics().await;
    assert_eq!(metrics.share_price, dec!(1.012));
    assert_eq!(metrics.total_value_locked, dec!(101.2));
}

#[tokio::test]
async fn deposit_freezes_its_entry_price() {
    let (_chain, vault) = vault();
    vault.record_deposit(Address::repeat_byte(0x0a), dec!(100), H256::repeat_byte(0x01)).await.unwrap();
    vault.record_pnl(dec!(1.2)).await;

    // 50 at a 1.012 share price issues 50 / 1.012 = 49.407 shares
    let (record, _) = vault
        .record_deposit(Address::repeat_byte(0x0b), dec!(50), H256::repeat_byte(0x02))
        .await
        .unwrap();
    assert_eq!(record.share_price_at_entry, dec!(1.012));
    assert_eq!(record.shares_issued.round_dp(3), dec!(49.407));

    // the frozen record does not move when the price later does
    vault.record_pnl(dec!(10)).await;
    let unchanged = vault.get_deposit(&record.id).unwrap();
    assert_eq!(unchanged.share_price_at_entry, dec!(1.012));
    assert_eq!(unchanged.shares_issued, record.shares_issued);
}

#[tokio::test]
async fn redemption_prices_at_redemption_time() {
    let (chain, vault) = vault();
    let depositor = Address::repeat_byte(0x0a);
    let (record, _) =
        vault.record_deposit(depositor, dec!(100), H256::repeat_byte(0x01)).await.unwrap();

    // price rises 5% after entry
    vault.record_pnl(dec!(5)).await;
    chain.set_balance(Address::repeat_byte(0x05), U256::from(1_000_000_000u64));

    vault.redeem(record.id, depositor).await.unwrap();

    // payout was shares * 1.05: the transfer carries 105 USDC in base units
    let submissions = chain.submissions.lock().unwrap();
    let (to, data) = submissions.last().unwrap();
    assert_eq!(*to, Address::repeat_byte(0x05));
    let amount = U256::from_big_endian(&data[36..68]);
    assert_eq!(amount, U256::from(105_000_000u64));
}

#[tokio::test]
async fn redemption_leaves_remaining_holders_price_unchanged() {
    let (chain, vault) = vault();
    let alice = Address::repeat_byte(0x0a);
    let bob = Address::repeat_byte(0x0b);
    vault.record_deposit(alice, dec!(100), H256::repeat_byte(0x01)).await.unwrap();
    vault.record_deposit(bob, dec!(100), H256::repeat_byte(0x02)).await.unwrap();
    vault.record_pnl(dec!(10)).await;

    let price_before = vault.metrics().await.share_price;
    chain.set_balance(Address::repeat_byte(0x05), U256::from(10_000_000_000u64));

    // recover alice's record through her proof (idempotent resubmission)
    let (record, created) =
        vault.record_deposit(alice, dec!(100), H256::repeat_byte(0x01)).await.unwrap();
    assert!(!created);
    vault.redeem(record.id, alice).await.unwrap();

    let price_after = vault.metrics().await.share_price;
    assert_eq!(price_before, price_after);
}

#[test]
fn share_price_is_never_a_settable_field() {
    // the only way to a price: the three ledger inputs
    assert_eq!(share_price(dec!(100), dec!(1.2), dec!(100)), dec!(1.012));
    assert_eq!(share_price(dec!(200), dec!(0), dec!(200)), Decimal::ONE);
}
