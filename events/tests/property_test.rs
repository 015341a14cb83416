//! Property tests for the arithmetic the money and scheduling paths lean
//! on: recurrence stepping, wire-format round-trips, and refund-ledger
//! monotonicity.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use chapel_events::blueprint::Recurrence;
use chapel_events::ledger::{
    CapturedLine, LineStatus, Transaction, TransactionItem, TransactionMeta, TransactionRefund,
};
use chapel_events::projection::occurrence_date;
use chapel_events::types::{CaptureId, EventId, InstanceId, LineId, Money, OrderId, PersonId, Uid};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use serde_json::Value;

fn datetime(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

proptest! {
    #[test]
    fn daily_and_weekly_are_linear(
        secs in 0i64..4_000_000_000,
        anchor in 1u32..500,
        offset in 0u32..500,
    ) {
        let origin = datetime(secs);
        let series = anchor + offset;
        let daily = occurrence_date(origin, Recurrence::Daily, series, anchor).unwrap();
        prop_assert_eq!(daily, origin + Duration::days(i64::from(offset)));
        let weekly = occurrence_date(origin, Recurrence::Weekly, series, anchor).unwrap();
        prop_assert_eq!(weekly, origin + Duration::days(7 * i64::from(offset)));
    }

    #[test]
    fn monthly_preserves_time_and_never_overshoots_the_day(
        secs in 0i64..4_000_000_000,
        anchor in 1u32..100,
        offset in 1u32..100,
    ) {
        use chrono::Datelike;
        let origin = datetime(secs);
        let series = anchor + offset;
        let stepped = occurrence_date(origin, Recurrence::Monthly, series, anchor).unwrap();
        prop_assert_eq!(stepped.time(), origin.time());
        // Clamping only ever moves the day down.
        prop_assert!(stepped.day() <= origin.day());
        prop_assert!(stepped > origin);
    }

    #[test]
    fn yearly_preserves_month_and_time(
        secs in 0i64..4_000_000_000,
        offset in 1u32..50,
    ) {
        use chrono::Datelike;
        let origin = datetime(secs);
        let stepped = occurrence_date(origin, Recurrence::Yearly, 1 + offset, 1).unwrap();
        prop_assert_eq!(stepped.time(), origin.time());
        prop_assert_eq!(stepped.month(), origin.month());
        prop_assert_eq!(stepped.year(), origin.year() + i32::try_from(offset).unwrap());
    }

    #[test]
    fn money_wire_round_trips(cents in 0u64..1_000_000_000) {
        let money = Money::from_cents(cents);
        prop_assert_eq!(Money::parse(&money.to_wire()), Some(money));
    }

    #[test]
    fn refunded_total_tracks_accepted_refunds(
        unit_cents in 1u64..100_000,
        amounts in proptest::collection::vec(1u64..50_000, 1..12),
    ) {
        let now = datetime(1_700_000_000);
        let line = LineId::new("000-prop");
        let mut tx = Transaction::preliminary(
            OrderId::new("ORD-prop"),
            Uid::new("u1"),
            InstanceId::new("inst"),
            EventId::new("evt"),
            "USD".into(),
            vec![TransactionItem::new(
                line.clone(),
                PersonId::User,
                "Prop".into(),
                Money::from_cents(unit_cents),
            )],
            Value::Null,
            Value::Null,
            TransactionMeta::default(),
            now,
        );
        let lines: Vec<CapturedLine> =
            vec![(line.clone(), Some(CaptureId::new("CAP")), LineStatus::Captured)];
        tx.apply_capture(Value::Null, &lines, None, now);

        let mut accepted: u64 = 0;
        for (i, amount) in amounts.iter().enumerate() {
            let refund = TransactionRefund {
                refund_id: format!("R-{i}"),
                amount: Money::from_cents(*amount),
                currency: "USD".into(),
                reason: "property".into(),
                created_at: now,
                by_uid: None,
                source: "user".into(),
                raw: Value::Null,
            };
            if tx.append_refund(&line, refund, now).is_ok() {
                accepted += amount;
            }
        }

        let item = tx.item(&line).unwrap();
        prop_assert_eq!(item.refunded_total.cents(), accepted);
        prop_assert!(item.refunded_total.cents() <= unit_cents);
        let recorded: u64 = item.refunds.iter().map(|r| r.amount.cents()).sum();
        prop_assert_eq!(recorded, accepted);
    }
}
