//! Multi-leg orchestration: happy path, partial failure, and the
//! fail-before-any-funds-moved distinction.

mod common;

use common::mocks::MockChainClient;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;

use fx_engine::errors::OrchestratorError;
use fx_engine::orchestrator::TransactionOrchestrator;
use fx_engine::types::{SpreadOpportunity, TradeStatus, VenueQuote};

fn opportunity() -> SpreadOpportunity {
    let buy = VenueQuote {
        venue: "alpha".to_string(),
        rate: 1.02,
        amount_out: U256::from(1_020_000u64),
        gas_estimate: U256::from(150_000u64),
    };
    let sell = VenueQuote {
        venue: "beta".to_string(),
        rate: 1.0,
        amount_out: U256::from(1_000_000u64),
        gas_estimate: U256::from(150_000u64),
    };
    SpreadOpportunity {
        buy_venue: "alpha".to_string(),
        sell_venue: "beta".to_string(),
        spread_pct: 2.0,
        threshold_pct: 0.3,
        buy_quote: buy,
        sell_quote: sell,
    }
}

fn tokens() -> (Address, Address) {
    (Address::repeat_byte(0x01), Address::repeat_byte(0x02))
}

fn funded_chain() -> Arc<MockChainClient> {
    let chain = Arc::new(MockChainClient::new(Address::repeat_byte(0xee)));
    let (from_token, to_token) = tokens();
    chain.set_balance(from_token, U256::from(10_000_000u64));
    chain.set_balance(to_token, U256::from(10_000_000u64));
    chain
}

#[tokio::test]
async fn two_leg_arbitrage_confirms_with_all_hashes() {
    let chain = funded_chain();
    let orchestrator = TransactionOrchestrator::new(chain.clone());
    let (from_token, to_token) = tokens();

    let trade = orchestrator
        .execute_arbitrage(
            "EURC/USDC",
            from_token,
            to_token,
            U256::from(1_000_000u64),
            1.0,
            &opportunity(),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            9_950,
        )
        .await
        .unwrap();

    assert_eq!(trade.status, TradeStatus::Confirmed);
    assert!(trade.approval_tx_hash.is_some());
    assert!(trade.swap_tx_hash.is_some());
    assert!(trade.transfer_tx_hash.is_some());
    assert_eq!(trade.amount_out, Some(U256::from(1_000_000u64)));
    // approve + swap per leg, two legs
    assert_eq!(chain.submission_count(), 4);
}

#[tokio::test]
async fn leg_two_failure_preserves_leg_one_state() {
    let chain = funded_chain();
    // submission 4 is leg 2's swap
    chain.fail_submission(4, "execution reverted: insufficient output amount");
    let orchestrator = TransactionOrchestrator::new(chain.clone());
    let (from_token, to_token) = tokens();

    let err = orchestrator
        .execute_arbitrage(
            "EURC/USDC",
            from_token,
            to_token,
            U256::from(1_000_000u64),
            1.0,
            &opportunity(),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            9_950,
        )
        .await
        .unwrap_err();

    match &err {
        OrchestratorError::PartialExecution { completed_legs, failed_leg, completed_results, .. } => {
            assert_eq!(*completed_legs, 1);
            assert_eq!(*failed_leg, 2);
            assert_eq!(completed_results[0].venue, "alpha");
            assert!(completed_results[0].swap_tx_hash.is_some());
        }
        other => panic!("expected PartialExecution, got {other:?}"),
    }
    assert!(!err.is_transient());

    let trade = &orchestrator.list_trades()[0];
    assert_eq!(trade.status, TradeStatus::Failed);
    // leg 1 hashes survive; leg 2's swap hash is absent
    assert_eq!(trade.approval_tx_hash, Some(H256::from_low_u64_be(1)));
    assert_eq!(trade.swap_tx_hash, Some(H256::from_low_u64_be(2)));
    assert_eq!(trade.transfer_tx_hash, None);
    assert!(trade.error.as_deref().unwrap().contains("partial execution"));
}

#[tokio::test]
async fn leg_one_failure_reports_no_funds_moved() {
    let chain = funded_chain();
    // submission 2 is leg 1's swap: the approval landed but nothing moved
    chain.fail_submission(2, "connection reset by peer");
    let orchestrator = TransactionOrchestrator::new(chain.clone());
    let (from_token, to_token) = tokens();

    let err = orchestrator
        .execute_arbitrage(
            "EURC/USDC",
            from_token,
            to_token,
            U256::from(1_000_000u64),
            1.0,
            &opportunity(),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            9_950,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::FailedBeforeExecution { failed_leg: 1, .. }));
    // a transport-level cause makes this one retryable
    assert!(err.is_transient());

    let trade = &orchestrator.list_trades()[0];
    assert_eq!(trade.status, TradeStatus::Failed);
    assert!(trade.error.as_deref().unwrap().contains("before any funds moved"));
}

#[tokio::test]
async fn insufficient_input_balance_fails_before_submitting() {
    let chain = Arc::new(MockChainClient::new(Address::repeat_byte(0xee)));
    let (from_token, to_token) = tokens();
    chain.set_balance(from_token, U256::from(10u64));
    let orchestrator = TransactionOrchestrator::new(chain.clone());

    let err = orchestrator
        .execute_arbitrage(
            "EURC/USDC",
            from_token,
            to_token,
            U256::from(1_000_000u64),
            1.0,
            &opportunity(),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            9_950,
        )
        .await
        .unwrap_err();

    match err {
        OrchestratorError::InsufficientBalance { required, available } => {
            assert_eq!(required, U256::from(1_000_000u64));
            assert_eq!(available, U256::from(10u64));
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }
    assert_eq!(chain.submission_count(), 0);

    // the record still reached its terminal state
    assert_eq!(orchestrator.list_trades()[0].status, TradeStatus::Failed);
}

#[tokio::test]
async fn remittance_delivers_swap_proceeds_to_recipient() {
    let chain = funded_chain();
    let orchestrator = TransactionOrchestrator::new(chain.clone());
    let (from_token, to_token) = tokens();

    let trade = orchestrator
        .execute_remittance(
            "EURC/USDC",
            from_token,
            to_token,
            U256::from(500_000u64),
            Address::repeat_byte(0x77),
            "alpha",
            Address::repeat_byte(0xaa),
            U256::from(540_000u64),
            9_950,
            1.08,
        )
        .await
        .unwrap();

    assert_eq!(trade.status, TradeStatus::Confirmed);
    assert_eq!(trade.amount_out, Some(U256::from(540_000u64)));
    assert!(trade.transfer_tx_hash.is_some());
    // approve, swap, payout transfer
    assert_eq!(chain.submission_count(), 3);
}

#[tokio::test]
async fn remittance_payout_failure_is_partial_execution() {
    let chain = funded_chain();
    // submission 3 is the payout transfer, after the swap settled
    chain.fail_submission(3, "gateway timeout");
    let orchestrator = TransactionOrchestrator::new(chain.clone());
    let (from_token, to_token) = tokens();

    let err = orchestrator
        .execute_remittance(
            "EURC/USDC",
            from_token,
            to_token,
            U256::from(500_000u64),
            Address::repeat_byte(0x77),
            "alpha",
            Address::repeat_byte(0xaa),
            U256::from(540_000u64),
            9_950,
            1.08,
        )
        .await
        .unwrap_err();

    // funds moved in the swap; never blind-retry regardless of the cause
    assert!(matches!(err, OrchestratorError::PartialExecution { completed_legs: 1, failed_leg: 2, .. }));
    assert!(!err.is_transient());

    let trade = &orchestrator.list_trades()[0];
    assert_eq!(trade.status, TradeStatus::Failed);
    assert!(trade.swap_tx_hash.is_some());
    assert_eq!(trade.transfer_tx_hash, None);
}
