//! # Deposit Verification
//!
//! Confirms that an externally-submitted transaction actually performed the
//! claimed value transfer before anything is credited internally. The proof
//! is the transaction's own receipt: it must have succeeded, been sent by
//! the claimed depositor, and contain a token `Transfer` of exactly the
//! claimed amount from the depositor to the custody address. Exact equality,
//! no tolerance: a deposit proof is a claim, not an estimate.

use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::chain::ChainClient;
use crate::config::VaultSettings;
use crate::errors::{ChainError, DepositError};

lazy_static! {
    /// `Transfer(address,address,uint256)` topic hash.
    static ref TRANSFER_TOPIC: H256 =
        H256::from(keccak256("Transfer(address,address,uint256)".as_bytes()));
}

/// A decoded ERC-20 `Transfer` event.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// Decodes an ERC-20 `Transfer` from a raw log, or `None` when the log is
/// some other event.
pub fn decode_transfer_log(log: &Log) -> Option<TransferEvent> {
    if log.topics.len() != 3 || log.topics[0] != *TRANSFER_TOPIC || log.data.len() < 32 {
        return None;
    }
    Some(TransferEvent {
        token: log.address,
        from: Address::from(log.topics[1]),
        to: Address::from(log.topics[2]),
        amount: U256::from_big_endian(&log.data[..32]),
    })
}

#[derive(Debug)]
pub struct DepositVerifier {
    chain: Arc<dyn ChainClient>,
    settings: VaultSettings,
}

impl DepositVerifier {
    pub fn new(chain: Arc<dyn ChainClient>, settings: VaultSettings) -> Self {
        Self { chain, settings }
    }

    /// Verifies the claimed deposit against the chain. Returns the matched
    /// transfer on success. `NotYetConfirmed` is the only retryable
    /// rejection: the transaction may simply not be indexed by the read
    /// layer yet.
    #[instrument(skip(self), fields(depositor = %claimed_depositor, tx_hash = %tx_hash))]
    pub async fn verify(
        &self,
        claimed_depositor: Address,
        claimed_amount: U256,
        tx_hash: H256,
    ) -> Result<TransferEvent, DepositError> {
        let sender = match self.chain.transaction_sender(tx_hash).await {
            Ok(sender) => sender,
            Err(ChainError::TransactionNotFound(_)) => {
                return Err(DepositError::NotYetConfirmed(tx_hash))
            }
            Err(e) => return Err(DepositError::Chain(e)),
        };
        if sender != claimed_depositor {
            debug!(target: "deposit", actual = ?sender, "sender mismatch");
            return Err(DepositError::SenderMismatch {
                claimed: claimed_depositor,
                actual: sender,
            });
        }

        let receipt = match self.chain.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(ChainError::ReceiptTimeout(_)) | Err(ChainError::TransactionNotFound(_)) => {
                return Err(DepositError::NotYetConfirmed(tx_hash))
            }
            Err(e) => return Err(DepositError::Chain(e)),
        };
        if !receipt.success {
            return Err(DepositError::TransactionFailed(tx_hash));
        }

        receipt
            .logs
            .iter()
            .filter_map(decode_transfer_log)
            .find(|transfer| {
                transfer.from == claimed_depositor
                    && transfer.to == self.settings.custody_address
                    && transfer.amount == claimed_amount
            })
            .ok_or(DepositError::NoMatchingTransfer { claimed_amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn transfer_log(token: Address, from: Address, to: Address, amount: U256) -> Log {
        let mut data = [0u8; 32];
        amount.to_big_endian(&mut data);
        Log {
            address: token,
            topics: vec![
                *TRANSFER_TOPIC,
                H256::from(from),
                H256::from(to),
            ],
            data: Bytes::from(data.to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_well_formed_transfer() {
        let from = Address::repeat_byte(0x0a);
        let to = Address::repeat_byte(0x0b);
        let log = transfer_log(Address::repeat_byte(0x01), from, to, U256::from(500u64));
        let event = decode_transfer_log(&log).unwrap();
        assert_eq!(event.from, from);
        assert_eq!(event.to, to);
        assert_eq!(event.amount, U256::from(500u64));
    }

    #[test]
    fn ignores_other_events() {
        let mut log = transfer_log(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x0a),
            Address::repeat_byte(0x0b),
            U256::one(),
        );
        log.topics[0] = H256::repeat_byte(0xff);
        assert!(decode_transfer_log(&log).is_none());

        // approval-style logs carry 3 topics too but a different topic0
        log.topics = vec![H256::repeat_byte(0x01)];
        assert!(decode_transfer_log(&log).is_none());
    }
}
