//! FIFO batch depletion
//!
//! [`DepletionCursor`] walks batches in receipt order, one page at a time,
//! and decides how much to take from each. It holds no I/O: the caller
//! fetches the next page after [`DepletionCursor::after_seq`], feeds each
//! batch to [`DepletionCursor::take`], and persists every returned
//! [`BatchTake`] before moving on.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::InboundBatch;

/// Page size used when none is configured
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Quantity drawn from a single batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTake {
    pub batch_id: Uuid,
    pub receipt_seq: i64,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub cost: Decimal,
    /// Batch balance after the take
    pub balance_after: Decimal,
}

/// Result of one depletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepletionOutcome {
    pub requested: Decimal,
    pub consumed: Decimal,
    pub cost: Decimal,
    /// Requested quantity that no batch could cover
    pub shortfall: Decimal,
    pub takes: Vec<BatchTake>,
}

impl DepletionOutcome {
    pub fn is_complete(&self) -> bool {
        self.shortfall.is_zero()
    }

    /// Weighted average price of what was consumed
    pub fn average_unit_price(&self) -> Option<Decimal> {
        if self.consumed.is_zero() {
            None
        } else {
            Some(self.cost / self.consumed)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepletionCursor {
    requested: Decimal,
    remaining: Decimal,
    cost: Decimal,
    last_seq: Option<i64>,
    takes: Vec<BatchTake>,
}

impl DepletionCursor {
    pub fn new(requested: Decimal) -> Self {
        Self {
            requested,
            remaining: requested,
            cost: Decimal::ZERO,
            last_seq: None,
            takes: Vec::new(),
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }

    pub fn remaining(&self) -> Decimal {
        self.remaining
    }

    pub fn cost(&self) -> Decimal {
        self.cost
    }

    /// Receipt sequence of the last batch seen; the next page starts after it
    pub fn after_seq(&self) -> Option<i64> {
        self.last_seq
    }

    /// Take as much as still needed from `batch`.
    ///
    /// Batches must arrive in ascending receipt order. Returns `None` when
    /// nothing was taken: the request is already covered or the batch is empty.
    pub fn take(&mut self, batch: &InboundBatch) -> Option<BatchTake> {
        debug_assert!(self.last_seq.map_or(true, |seq| batch.receipt_seq > seq));
        self.last_seq = Some(batch.receipt_seq);

        if self.is_satisfied() || batch.is_depleted() {
            return None;
        }

        let quantity = self.remaining.min(batch.balance);
        let cost = quantity * batch.unit_price;
        self.remaining -= quantity;
        self.cost += cost;

        let take = BatchTake {
            batch_id: batch.id,
            receipt_seq: batch.receipt_seq,
            unit_price: batch.unit_price,
            quantity,
            cost,
            balance_after: batch.balance - quantity,
        };
        self.takes.push(take);
        Some(take)
    }

    pub fn finish(self) -> DepletionOutcome {
        let shortfall = self.remaining.max(Decimal::ZERO);
        DepletionOutcome {
            requested: self.requested,
            consumed: self.requested - shortfall,
            cost: self.cost,
            shortfall,
            takes: self.takes,
        }
    }
}

/// Run a whole depletion over batches already sorted by receipt order,
/// without paging. Useful for previews against a snapshot.
pub fn plan_depletion(batches: &[InboundBatch], requested: Decimal) -> DepletionOutcome {
    let mut cursor = DepletionCursor::new(requested);
    for batch in batches {
        if cursor.is_satisfied() {
            break;
        }
        cursor.take(batch);
    }
    cursor.finish()
}
