//! Batch store tests
//!
//! Receipts, reversals, voids and settlement, and the stock aggregates they
//! keep in step.

mod common;

use chrono::Utc;
use common::{dec, Harness};
use ledger_backend::services::batch::ReceiveBatchInput;
use ledger_backend::LedgerError;
use rust_decimal::Decimal;
use uuid::Uuid;

// ============================================================================
// Receipt
// ============================================================================

#[cfg(test)]
mod receipt_tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_creates_batch_and_aggregate() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;

        let batch = h.receive(&flour, "5", "2").await;

        assert_eq!(batch.balance, dec("5"));
        assert_eq!(batch.received_quantity, dec("5"));
        assert!(!batch.settled);
        assert_eq!(batch.unit, "kg");
        assert_eq!(h.aggregate_total(&flour).await, dec("5"));
        assert_eq!(
            h.ledger.batches.availability(flour.id, "kg").await.unwrap(),
            dec("5")
        );
    }

    #[tokio::test]
    async fn test_receipts_at_same_price_share_an_aggregate() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;

        h.receive(&flour, "5", "2").await;
        h.receive(&flour, "3", "2").await;
        h.receive(&flour, "4", "3").await;

        let aggregates = h.aggregates(&flour).await;

        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].unit_price, dec("2"));
        assert_eq!(aggregates[0].quantity, dec("8"));
        assert_eq!(aggregates[1].quantity, dec("4"));
        h.assert_conserved(&flour).await;
    }

    #[tokio::test]
    async fn test_receipt_sequence_increases() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;

        let first = h.receive(&flour, "1", "2").await;
        let second = h.receive(&flour, "1", "2").await;

        assert!(second.receipt_seq > first.receipt_seq);
    }

    #[tokio::test]
    async fn test_receive_unknown_ingredient() {
        let h = Harness::new();

        let err = h
            .ledger
            .batches
            .receive(ReceiveBatchInput {
                ingredient_id: Uuid::new_v4(),
                unit: Some("kg".to_string()),
                unit_price: dec("2"),
                quantity: dec("5"),
                received_at: Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidReference { .. }));
        assert_eq!(err.code(), "INVALID_REFERENCE");
    }

    #[tokio::test]
    async fn test_receive_rejects_bad_quantities() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;

        for (quantity, price) in [("0", "2"), ("-1", "2"), ("5", "-0.01")] {
            let err = h
                .ledger
                .batches
                .receive(ReceiveBatchInput {
                    ingredient_id: flour.id,
                    unit: None,
                    unit_price: dec(price),
                    quantity: dec(quantity),
                    received_at: Utc::now(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidQuantity { .. }));
        }

        assert!(h.batches(&flour).await.is_empty());
    }

    #[tokio::test]
    async fn test_receive_rejects_out_of_range_amounts() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;

        let cases = [
            ("100000000000000000000", "100000000000000000000"),
            ("1000000000000", "1"),
            ("1", "1000000000000"),
            ("0.0000001", "2"),
            ("5", "0.0000001"),
        ];
        for (quantity, price) in cases {
            let err = h
                .ledger
                .batches
                .receive(ReceiveBatchInput {
                    ingredient_id: flour.id,
                    unit: None,
                    unit_price: dec(price),
                    quantity: dec(quantity),
                    received_at: Utc::now(),
                })
                .await
                .unwrap_err();
            assert!(
                matches!(err, LedgerError::InvalidQuantity { .. }),
                "{} @ {}: {:?}",
                quantity,
                price,
                err
            );
        }

        assert!(h.batches(&flour).await.is_empty());
        assert_eq!(h.aggregate_total(&flour).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_receive_largest_stored_amounts() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;

        let batch = h.receive(&flour, "999999999999", "0.000001").await;

        assert_eq!(batch.balance, dec("999999999999"));
        h.assert_conserved(&flour).await;
    }

    #[tokio::test]
    async fn test_receive_with_explicit_unit() {
        let h = Harness::new();
        let milk = h.store.add_ingredient("milk", "L").await;

        let batch = h
            .ledger
            .batches
            .receive(ReceiveBatchInput {
                ingredient_id: milk.id,
                unit: Some("mL".to_string()),
                unit_price: dec("0.002"),
                quantity: dec("500"),
                received_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(batch.unit, "mL");
        assert_eq!(
            h.ledger.batches.availability(milk.id, "mL").await.unwrap(),
            dec("500")
        );
        assert_eq!(
            h.ledger.batches.availability(milk.id, "L").await.unwrap(),
            Decimal::ZERO
        );
    }
}

// ============================================================================
// Reversal
// ============================================================================

#[cfg(test)]
mod reversal_tests {
    use super::*;

    #[tokio::test]
    async fn test_reverse_reduces_balance_and_aggregate() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "10", "2").await;

        let batch = h
            .ledger
            .batches
            .reverse(batch.id, dec("4"), Utc::now())
            .await
            .unwrap();

        assert_eq!(batch.balance, dec("6"));
        assert_eq!(h.aggregate_total(&flour).await, dec("6"));
        h.assert_conserved(&flour).await;
    }

    #[tokio::test]
    async fn test_negative_delta_restores() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "10", "2").await;

        h.ledger
            .batches
            .reverse(batch.id, dec("4"), Utc::now())
            .await
            .unwrap();
        let batch = h
            .ledger
            .batches
            .reverse(batch.id, dec("-3"), Utc::now())
            .await
            .unwrap();

        assert_eq!(batch.balance, dec("9"));
        h.assert_conserved(&flour).await;
    }

    #[tokio::test]
    async fn test_reverse_full_balance_removes_aggregate() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "10", "2").await;

        h.ledger
            .batches
            .reverse(batch.id, dec("10"), Utc::now())
            .await
            .unwrap();

        assert_eq!(h.aggregate_total(&flour).await, Decimal::ZERO);
        h.assert_conserved(&flour).await;
    }

    #[tokio::test]
    async fn test_reverse_below_zero_is_negative_balance() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "10", "2").await;

        let err = h
            .ledger
            .batches
            .reverse(batch.id, dec("11"), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NegativeBalance(_)));
        assert_eq!(h.balances(&flour).await, vec![dec("10")]);
    }

    #[tokio::test]
    async fn test_reverse_above_received_is_invalid() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "10", "2").await;

        let err = h
            .ledger
            .batches
            .reverse(batch.id, dec("-1"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity { .. }));

        let err = h
            .ledger
            .batches
            .reverse(batch.id, Decimal::ZERO, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity { .. }));
    }

    #[tokio::test]
    async fn test_reverse_out_of_range_delta_is_invalid() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "10", "2").await;

        for delta in ["100000000000000000000", "-100000000000000000000", "0.0000001"] {
            let err = h
                .ledger
                .batches
                .reverse(batch.id, dec(delta), Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidQuantity { .. }));
        }

        assert_eq!(h.balances(&flour).await, vec![dec("10")]);
    }

    #[tokio::test]
    async fn test_reverse_unknown_batch() {
        let h = Harness::new();

        let err = h
            .ledger
            .batches
            .reverse(Uuid::new_v4(), dec("1"), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidReference { .. }));
    }
}

// ============================================================================
// Void and settlement
// ============================================================================

#[cfg(test)]
mod void_and_settle_tests {
    use super::*;
    use ledger_backend::services::consumption::DepleteInput;
    use ledger_shared::OperationTag;

    #[tokio::test]
    async fn test_void_untouched_receipt() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let kept = h.receive(&flour, "3", "2").await;
        let voided = h.receive(&flour, "5", "2").await;

        h.ledger
            .batches
            .void_receipt(voided.id, Utc::now())
            .await
            .unwrap();

        let batches = h.batches(&flour).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].id, kept.id);
        assert_eq!(h.aggregate_total(&flour).await, dec("3"));
        h.assert_conserved(&flour).await;
    }

    #[tokio::test]
    async fn test_void_consumed_receipt_is_rejected() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "5", "2").await;

        h.ledger
            .consumption
            .deplete(DepleteInput {
                ingredient_id: flour.id,
                unit: "kg".to_string(),
                quantity: dec("1"),
                production_id: None,
                operation: OperationTag::ProductionConsumption,
            })
            .await
            .unwrap();

        let err = h
            .ledger
            .batches
            .void_receipt(batch.id, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidTransition(_)));
        assert_eq!(h.batches(&flour).await.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let h = Harness::new();
        let flour = h.ingredient("flour").await;
        let batch = h.receive(&flour, "5", "2").await;

        let settled = h.ledger.batches.settle(batch.id).await.unwrap();
        assert!(settled.settled);

        let again = h.ledger.batches.settle(batch.id).await.unwrap();
        assert!(again.settled);
        assert!(h.ledger.batches.get(batch.id).await.unwrap().settled);
    }

    #[tokio::test]
    async fn test_availability_of_unknown_ingredient() {
        let h = Harness::new();

        let err = h
            .ledger
            .batches
            .availability(Uuid::new_v4(), "kg")
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidReference { .. }));
    }
}
