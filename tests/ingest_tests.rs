//! Warning ingestion and notification tests
//!
//! These tests verify that:
//! - Re-ingesting an unchanged warning sends nothing
//! - A warning growing over a new asset notifies only that asset
//! - Opted-out channels never get a record
//! - Per-recipient problems are collected without stopping the batch

mod harness;

use chrono::{Duration, Utc};
use harness::*;
use serde_json::json;
use stormwatch::core::error::{QueryError, StormError};
use stormwatch::core::query::ListRequest;
use stormwatch::warning::model::{ASSET_HOLDERS, Channel, DeliveryStatus, SkipReason};
use stormwatch::warning::notifier::SendLog;

// =============================================================================
// Idempotency
// =============================================================================

mod idempotency_tests {
    use super::*;

    #[tokio::test]
    async fn test_reingesting_unchanged_warning_creates_no_records() {
        let h = Harness::new();
        h.add_holder(1, Some("ops@example.com"), Some("+4712345678")).await;
        h.add_asset(1, 1, "Pump", &point(1.0, 1.0)).await;

        let w = warning(100, square(0.0, 0.0, 2.0, 2.0));
        let first = h.ingestor.ingest(&ingest_ctx(), vec![w.clone()]).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.records.len(), 2);

        let second = h.ingestor.ingest(&ingest_ctx(), vec![w]).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.unchanged, 1);
        assert!(second.records.is_empty());
        assert_eq!(h.send_log.list().await.unwrap().len(), 2);
        assert_eq!(h.dispatcher.sent().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_shape_with_rotated_ring_is_unchanged() {
        let h = Harness::new();
        let w = warning(100, square(0.0, 0.0, 2.0, 2.0));
        h.ingestor.ingest(&ingest_ctx(), vec![w.clone()]).await.unwrap();

        let mut rotated = w.clone();
        rotated.area = stormwatch::core::geometry::Geometry::Polygon(vec![vec![
            [2.0, 0.0],
            [2.0, 2.0],
            [0.0, 2.0],
            [0.0, 0.0],
            [2.0, 0.0],
        ]]);
        let report = h.ingestor.ingest(&ingest_ctx(), vec![rotated]).await.unwrap();
        assert!(!report.changed);
    }

    #[tokio::test]
    async fn test_grown_area_notifies_only_the_newly_covered_asset() {
        let h = Harness::new();
        h.add_holder(1, Some("near@example.com"), Some("+4711111111")).await;
        h.add_holder(2, Some("far@example.com"), Some("+4722222222")).await;
        h.add_asset(1, 1, "Near", &point(1.0, 1.0)).await;
        h.add_asset(2, 2, "Far", &point(5.0, 5.0)).await;

        let small = warning(7, square(0.0, 0.0, 2.0, 2.0));
        let first = h.ingestor.ingest(&ingest_ctx(), vec![small.clone()]).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.records.iter().all(|r| r.asset_id == 1));

        let mut grown = small;
        grown.area = square(0.0, 0.0, 6.0, 6.0);
        let second = h.ingestor.ingest(&ingest_ctx(), vec![grown]).await.unwrap();
        assert!(second.changed);
        assert_eq!(second.records.len(), 2);
        assert!(second.records.iter().all(|r| r.asset_id == 2 && r.recipient_id == 2));
        let mut channels: Vec<Channel> = second.records.iter().map(|r| r.channel).collect();
        channels.sort_by_key(|c| c.as_str());
        assert_eq!(channels, vec![Channel::Email, Channel::Sms]);
        assert!(
            second
                .skipped
                .iter()
                .all(|s| s.key.asset_id == 1 && s.reason == SkipReason::AlreadyNotified)
        );
    }

    #[tokio::test]
    async fn test_one_record_per_asset_and_channel() {
        let h = Harness::new();
        h.add_holder(1, Some("ops@example.com"), Some("+4712345678")).await;
        h.add_asset(1, 1, "A", &point(1.0, 1.0)).await;
        h.add_asset(2, 1, "B", &point(1.5, 1.5)).await;

        let report = h
            .ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();
        assert_eq!(report.records.len(), 4);
        let mut keys: Vec<_> = report.records.iter().map(|r| r.key()).collect();
        keys.dedup();
        assert_eq!(keys.len(), 4);
    }
}

// =============================================================================
// Opt-out and contact handling
// =============================================================================

mod recipient_tests {
    use super::*;

    #[tokio::test]
    async fn test_email_opt_out_never_produces_email_record() {
        let h = Harness::new();
        h.put(
            ASSET_HOLDERS,
            row(json!({
                "id": 1,
                "name": "Quiet",
                "email": "quiet@example.com",
                "phone": "+4712345678",
                "notify_email": false,
                "notify_sms": true
            })),
        )
        .await;
        h.add_asset(1, 1, "Mast", &point(1.0, 1.0)).await;

        let report = h
            .ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();

        assert!(report.records.iter().all(|r| r.channel != Channel::Email));
        assert_eq!(report.records.len(), 1);
        assert!(
            report
                .skipped
                .iter()
                .any(|s| s.key.channel == Channel::Email && s.reason == SkipReason::OptedOut)
        );
        assert!(
            h.dispatcher
                .sent()
                .unwrap()
                .iter()
                .all(|m| m.address != "quiet@example.com")
        );
    }

    #[tokio::test]
    async fn test_missing_and_invalid_contacts_are_skipped() {
        let h = Harness::new();
        h.add_holder(1, None, Some("not a phone")).await;
        h.add_asset(1, 1, "Mast", &point(1.0, 1.0)).await;

        let report = h
            .ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();
        assert!(report.records.is_empty());
        let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason.clone()).collect();
        assert!(reasons.contains(&SkipReason::MissingContact));
        assert!(reasons.contains(&SkipReason::InvalidContact));
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_recorded_not_retried() {
        let h = Harness::new();
        h.add_holder(1, Some("down@example.com"), None).await;
        h.add_asset(1, 1, "Mast", &point(1.0, 1.0)).await;
        h.dispatcher.refuse("down@example.com").unwrap();

        let w = warning(1, square(0.0, 0.0, 2.0, 2.0));
        let report = h.ingestor.ingest(&ingest_ctx(), vec![w.clone()]).await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert!(matches!(report.records[0].status, DeliveryStatus::Failed { .. }));

        let mut changed = w;
        changed.headline = "Updated headline".to_string();
        let again = h.ingestor.ingest(&ingest_ctx(), vec![changed]).await.unwrap();
        assert!(again.records.is_empty());
        assert!(h.dispatcher.sent().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_holder_is_collected_and_batch_continues() {
        let h = Harness::new();
        h.add_holder(2, Some("ok@example.com"), None).await;
        h.add_asset(1, 99, "Orphan", &point(1.0, 1.0)).await;
        h.add_asset(2, 2, "Owned", &point(1.2, 1.2)).await;

        let report = h
            .ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].asset_id, 1);
        assert_eq!(report.failures[0].code, "MISSING_REFERENCE");
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].asset_id, 2);
    }

    #[tokio::test]
    async fn test_sms_uses_default_template() {
        let h = Harness::new();
        h.add_holder(1, None, Some("+4712345678")).await;
        h.add_asset(1, 1, "Mast", &point(1.0, 1.0)).await;

        let report = h
            .ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();
        let sms = &report.records[0];
        assert_eq!(sms.template_id, "default-sms");
        assert_eq!(sms.rendered_message, "MODERATE: Strong wind gusts at Mast");
        assert!(sms.subject.is_none());
    }
}

// =============================================================================
// Validation, expiry and asset moves
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_warning_rejects_whole_batch_before_storage() {
        let h = Harness::new();
        let good = warning(1, square(0.0, 0.0, 2.0, 2.0));
        let mut bad = warning(2, square(0.0, 0.0, 2.0, 2.0));
        bad.valid_to = Some(bad.valid_from - Duration::hours(1));

        let err = h.ingestor.ingest(&ingest_ctx(), vec![good, bad]).await.unwrap_err();
        assert!(matches!(err, StormError::Validation(_)));
        let warnings = h.tool.table("warnings").unwrap();
        assert_eq!(h.store.len(&warnings).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_warning_is_stored_but_not_notified() {
        let h = Harness::new();
        h.add_holder(1, Some("ops@example.com"), None).await;
        h.add_asset(1, 1, "Mast", &point(1.0, 1.0)).await;

        let mut old = warning(1, square(0.0, 0.0, 2.0, 2.0));
        old.valid_from = Utc::now() - Duration::days(3);
        old.valid_to = Some(Utc::now() - Duration::days(2));

        let report = h.ingestor.ingest(&ingest_ctx(), vec![old]).await.unwrap();
        assert!(report.changed);
        assert_eq!(report.stored, 1);
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_moving_asset_into_warning_notifies_once() {
        let h = Harness::new();
        h.add_holder(1, Some("ops@example.com"), None).await;
        h.add_asset(1, 1, "Truck", &point(9.0, 9.0)).await;
        h.ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();
        assert!(h.dispatcher.sent().unwrap().is_empty());

        let moved = h
            .ingestor
            .update_asset_location(&ingest_ctx(), 1, point(1.0, 1.0))
            .await
            .unwrap();
        assert_eq!(moved.records.len(), 1);

        let same_place = h
            .ingestor
            .update_asset_location(&ingest_ctx(), 1, point(1.0, 1.0))
            .await
            .unwrap();
        assert!(!same_place.changed);
        assert!(same_place.records.is_empty());
    }

    #[tokio::test]
    async fn test_moving_unknown_asset_is_not_found() {
        let h = Harness::new();
        let err = h
            .ingestor
            .update_asset_location(&ingest_ctx(), 42, point(1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StormError::Query(QueryError::RowNotFound { row_id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_assets_in_warning_pages_by_cursor() {
        let h = Harness::new();
        h.add_holder(1, Some("ops@example.com"), None).await;
        for id in 1..=5 {
            h.add_asset(id, 1, &format!("inside-{}", id), &point(1.0, 1.0)).await;
        }
        h.add_asset(6, 1, "outside", &point(9.0, 9.0)).await;
        h.ingestor
            .ingest(&ingest_ctx(), vec![warning(1, square(0.0, 0.0, 2.0, 2.0))])
            .await
            .unwrap();

        let request = |cursor: Option<i64>| ListRequest {
            order_list: vec!["name".into(), "desc".into()],
            limit: Some(3),
            last_row_id: cursor,
            ..ListRequest::default()
        };
        let first = h
            .ingestor
            .assets_in_warning(&read_ctx(), 1, &request(None))
            .await
            .unwrap();
        assert_eq!(ids(&first.data), vec![5, 4, 3]);
        let second = h
            .ingestor
            .assets_in_warning(&read_ctx(), 1, &request(first.page.next_cursor))
            .await
            .unwrap();
        assert_eq!(ids(&second.data), vec![2, 1]);
        assert!(!second.page.has_more);
    }

    #[tokio::test]
    async fn test_assets_in_unknown_warning_is_not_found() {
        let h = Harness::new();
        let err = h
            .ingestor
            .assets_in_warning(&read_ctx(), 5, &ListRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ROW_NOT_FOUND");
    }
}
