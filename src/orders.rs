//! Wallet-signed limit order registry. Orders are created and cancelled
//! through signed endpoints; only the creator may cancel, and cancellation
//! is a one-way transition.

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use tracing::info;
use uuid::Uuid;

use crate::errors::OrderError;
use crate::types::{OrderRecord, OrderSide, OrderStatus};

#[derive(Debug, Default)]
pub struct OrderBook {
    orders: DashMap<Uuid, OrderRecord>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<OrderRecord> {
        self.orders.get(id).map(|r| r.clone())
    }

    pub fn create(
        &self,
        creator: Address,
        pair: &str,
        side: OrderSide,
        amount: U256,
        limit_rate: f64,
    ) -> Result<OrderRecord, OrderError> {
        if amount.is_zero() {
            return Err(OrderError::Validation("amount must be positive".into()));
        }
        if !(limit_rate.is_finite() && limit_rate > 0.0) {
            return Err(OrderError::Validation("limit rate must be positive".into()));
        }

        let record = OrderRecord {
            id: Uuid::new_v4(),
            creator,
            pair: pair.to_string(),
            side,
            amount,
            limit_rate,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        };
        self.orders.insert(record.id, record.clone());
        info!(target: "orders", order_id = %record.id, %creator, "order created");
        Ok(record)
    }

    pub fn cancel(&self, id: Uuid, caller: Address) -> Result<OrderRecord, OrderError> {
        let mut entry = self.orders.get_mut(&id).ok_or(OrderError::NotFound(id))?;
        if entry.creator != caller {
            return Err(OrderError::NotCreator);
        }
        if entry.status == OrderStatus::Cancelled {
            return Err(OrderError::AlreadyCancelled(id));
        }
        entry.status = OrderStatus::Cancelled;
        info!(target: "orders", order_id = %id, "order cancelled");
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_creator_only_and_one_way() {
        let book = OrderBook::new();
        let creator = Address::repeat_byte(0x0a);
        let stranger = Address::repeat_byte(0x0b);
        let order =
            book.create(creator, "EURC/USDC", OrderSide::Buy, U256::from(100u64), 1.08).unwrap();

        assert!(matches!(book.cancel(order.id, stranger), Err(OrderError::NotCreator)));
        assert_eq!(book.cancel(order.id, creator).unwrap().status, OrderStatus::Cancelled);
        assert!(matches!(book.cancel(order.id, creator), Err(OrderError::AlreadyCancelled(_))));
    }

    #[test]
    fn rejects_degenerate_parameters() {
        let book = OrderBook::new();
        let creator = Address::repeat_byte(0x0a);
        assert!(book.create(creator, "EURC/USDC", OrderSide::Sell, U256::zero(), 1.0).is_err());
        assert!(book
            .create(creator, "EURC/USDC", OrderSide::Sell, U256::from(1u64), f64::NAN)
            .is_err());
    }
}
