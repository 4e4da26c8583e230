//! Repository integration tests. Require a Postgres `DATABASE_URL`:
//! `cargo test -p geonotify-db -- --ignored`.

use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};
use geonotify_core::jobs::{JobKind, JobStatus};
use geonotify_core::notification::{
    DeliveryChannel, DeliveryStatus, FavoriteLocation, FrequencyClass, NotificationStatus,
    NotificationType,
};
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::notification::{CreateNotification, NotificationListQuery};
use geonotify_db::models::preference::UpdateNotificationPreferences;
use geonotify_db::repositories::*;
use sqlx::PgPool;
use uuid::Uuid;

fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap()
}

/// Reservations made before this are stale at [`now`].
fn lease_start() -> Timestamp {
    now() - Duration::minutes(5)
}

/// Job claims made before this are stale at [`now`].
fn job_timeout_start() -> Timestamp {
    now() - Duration::minutes(15)
}

async fn insert_user(pool: &PgPool, attributes: serde_json::Value) -> DbId {
    sqlx::query_scalar(
        "INSERT INTO users (email, attributes) VALUES ('u@example.com', $1) RETURNING id",
    )
    .bind(attributes)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn paris_alert(title: &str) -> CreateNotification {
    CreateNotification {
        notification_type: NotificationType::NearbyRental,
        title: title.to_string(),
        message: "A bike is available near you".to_string(),
        latitude: 48.8566,
        longitude: 2.3522,
        radius: 5000,
        location_name: Some("Paris Centre".to_string()),
        target_criteria: serde_json::Value::Null,
        data: serde_json::json!({"listing_id": 42}),
        is_active: None,
        expires_at: None,
        scheduled_for: None,
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn create_defaults_to_pending_and_active(pool: PgPool) {
    let n = NotificationRepo::create(&pool, &paris_alert("Bike nearby"), now())
        .await
        .unwrap();
    assert_eq!(n.status, NotificationStatus::Pending);
    assert!(n.is_active);
    assert_eq!(n.target_criteria, serde_json::json!({}));
    assert_eq!(n.created_at, now());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn list_filters_and_searches(pool: PgPool) {
    NotificationRepo::create(&pool, &paris_alert("Bike nearby"), now()).await.unwrap();
    let mut promo = paris_alert("Summer 50% off");
    promo.notification_type = NotificationType::Promotional;
    NotificationRepo::create(&pool, &promo, now()).await.unwrap();

    let all = NotificationRepo::list(&pool, &NotificationListQuery::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let promos = NotificationRepo::list(
        &pool,
        &NotificationListQuery {
            notification_type: Some(NotificationType::Promotional),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(promos.len(), 1);

    let found = NotificationRepo::list(
        &pool,
        &NotificationListQuery {
            search: Some("50%".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Summer 50% off");

    let by_place = NotificationRepo::list(
        &pool,
        &NotificationListQuery {
            search: Some("centre".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_place.len(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn due_selection_respects_schedule_and_expiry(pool: PgPool) {
    let immediate = NotificationRepo::create(&pool, &paris_alert("now"), now()).await.unwrap();
    let mut later = paris_alert("later");
    later.scheduled_for = Some(now() + Duration::hours(1));
    NotificationRepo::create(&pool, &later, now()).await.unwrap();
    let mut stale = paris_alert("stale");
    stale.expires_at = Some(now());
    NotificationRepo::create(&pool, &stale, now()).await.unwrap();

    let due = NotificationRepo::list_due(&pool, now(), 100).await.unwrap();
    assert_eq!(due.iter().map(|n| n.id).collect::<Vec<_>>(), vec![immediate.id]);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn claim_is_exclusive_until_lease_expires(pool: PgPool) {
    let n = NotificationRepo::create(&pool, &paris_alert("claim"), now()).await.unwrap();
    let lease = Duration::minutes(5);

    let first = Uuid::now_v7();
    assert!(NotificationRepo::try_claim(&pool, n.id, first, now(), lease).await.unwrap().is_some());
    assert!(NotificationRepo::try_claim(&pool, n.id, Uuid::now_v7(), now(), lease)
        .await
        .unwrap()
        .is_none());

    // A crashed holder's lease can be taken over once it lapses.
    let later = now() + Duration::minutes(6);
    assert!(NotificationRepo::try_claim(&pool, n.id, Uuid::now_v7(), later, lease)
        .await
        .unwrap()
        .is_some());
    assert!(!NotificationRepo::release_claim(&pool, n.id, first).await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn status_transition_is_compare_and_set(pool: PgPool) {
    let n = NotificationRepo::create(&pool, &paris_alert("cas"), now()).await.unwrap();
    use NotificationStatus::*;
    assert!(NotificationRepo::transition_status(&pool, n.id, Pending, Sent, now()).await.unwrap());
    assert!(!NotificationRepo::transition_status(&pool, n.id, Pending, Failed, now()).await.unwrap());
    let reloaded = NotificationRepo::find_by_id(&pool, n.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, Sent);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn expiry_and_purge(pool: PgPool) {
    let mut expiring = paris_alert("expiring");
    expiring.expires_at = Some(now() - Duration::minutes(1));
    let expiring = NotificationRepo::create(&pool, &expiring, now()).await.unwrap();
    let clicked = NotificationRepo::create(&pool, &paris_alert("clicked"), now()).await.unwrap();
    use NotificationStatus::*;
    NotificationRepo::transition_status(&pool, clicked.id, Pending, Sent, now()).await.unwrap();
    NotificationRepo::transition_status(&pool, clicked.id, Sent, Clicked, now()).await.unwrap();

    assert_eq!(NotificationRepo::expire_due(&pool, now()).await.unwrap(), 1);
    let reloaded = NotificationRepo::find_by_id(&pool, expiring.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, Expired);

    // Status changed exactly at the cutoff: kept.
    assert_eq!(NotificationRepo::purge_terminal(&pool, now()).await.unwrap(), 0);
    assert_eq!(
        NotificationRepo::purge_terminal(&pool, now() + Duration::seconds(1)).await.unwrap(),
        2
    );
}

// ---------------------------------------------------------------------------
// Preferences and locations
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn preferences_are_created_lazily_with_defaults(pool: PgPool) {
    let user = insert_user(&pool, serde_json::json!({})).await;
    let prefs = NotificationPreferenceRepo::get_or_create(&pool, user, now()).await.unwrap();
    assert!(prefs.nearby_rentals && prefs.promotional);
    assert_eq!(prefs.notification_radius, 10_000);
    assert_eq!(prefs.frequency, FrequencyClass::Realtime);
    assert!(prefs.max_per_day.is_none());
    assert!(prefs.favorite_locations.is_empty());

    let again = NotificationPreferenceRepo::get_or_create(&pool, user, now()).await.unwrap();
    assert_eq!(again.id, prefs.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn preference_upsert_only_touches_given_fields(pool: PgPool) {
    let user = insert_user(&pool, serde_json::json!({})).await;
    NotificationPreferenceRepo::upsert(
        &pool,
        user,
        &UpdateNotificationPreferences {
            promotional: Some(false),
            max_per_day: Some(3),
            ..Default::default()
        },
        now(),
    )
    .await
    .unwrap();

    let home = FavoriteLocation {
        name: "Home".into(),
        latitude: 48.85,
        longitude: 2.35,
        radius: 2000,
    };
    let prefs = NotificationPreferenceRepo::upsert(
        &pool,
        user,
        &UpdateNotificationPreferences {
            frequency: Some(FrequencyClass::Daily),
            favorite_locations: Some(vec![home.clone()]),
            ..Default::default()
        },
        now(),
    )
    .await
    .unwrap();
    assert!(!prefs.promotional);
    assert_eq!(prefs.max_per_day, Some(3));
    assert_eq!(prefs.frequency, FrequencyClass::Daily);
    assert_eq!(prefs.favorite_locations, vec![home]);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn candidates_include_band_and_favorites(pool: PgPool) {
    let near = insert_user(&pool, serde_json::json!({})).await;
    let far = insert_user(&pool, serde_json::json!({})).await;
    let fan = insert_user(&pool, serde_json::json!({})).await;
    LocationProfileRepo::upsert(&pool, near, Some((48.86, 2.34)), true, now()).await.unwrap();
    LocationProfileRepo::upsert(&pool, far, Some((40.0, 2.34)), true, now()).await.unwrap();
    NotificationPreferenceRepo::upsert(
        &pool,
        fan,
        &UpdateNotificationPreferences {
            favorite_locations: Some(vec![FavoriteLocation {
                name: "Office".into(),
                latitude: 48.87,
                longitude: 2.30,
                radius: 1000,
            }]),
            ..Default::default()
        },
        now(),
    )
    .await
    .unwrap();

    let ids = RecipientRepo::candidate_ids(&pool, 48.0, 49.0).await.unwrap();
    assert_eq!(ids, vec![near, fan]);

    let recipients = RecipientRepo::find_by_ids(&pool, &ids).await.unwrap();
    assert_eq!(recipients.len(), 2);
}

// ---------------------------------------------------------------------------
// Delivery records
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn delivery_slot_is_reserved_once(pool: PgPool) {
    let user = insert_user(&pool, serde_json::json!({})).await;
    let n = NotificationRepo::create(&pool, &paris_alert("dedup"), now()).await.unwrap();

    let first = DeliveryRecordRepo::try_insert(&pool, n.id, user, DeliveryChannel::Push, now(), lease_start())
        .await
        .unwrap();
    let second = DeliveryRecordRepo::try_insert(&pool, n.id, user, DeliveryChannel::Push, now(), lease_start())
        .await
        .unwrap();
    assert_matches!(first, Some(_));
    assert_matches!(second, None);
    let summary = DeliveryRecordRepo::summary_for_notification(&pool, n.id).await.unwrap();
    assert_eq!((summary.total, summary.queued), (1, 1));

    let id = first.unwrap();
    assert!(DeliveryRecordRepo::complete(&pool, id, DeliveryStatus::Sent, None, now()).await.unwrap());
    assert!(!DeliveryRecordRepo::complete(&pool, id, DeliveryStatus::Failed, Some("late"), now())
        .await
        .unwrap());

    let summary = DeliveryRecordRepo::summary_for_notification(&pool, n.id).await.unwrap();
    assert_eq!((summary.total, summary.delivered, summary.failed, summary.queued), (1, 1, 0, 0));
    assert_eq!(
        DeliveryRecordRepo::last_delivered_at(&pool, user).await.unwrap(),
        Some(now())
    );
    assert_eq!(
        DeliveryRecordRepo::count_delivered_notifications_since(&pool, user, now())
            .await
            .unwrap(),
        1
    );
}

/// A `queued` record older than the lease is handed to the next pass once;
/// settled records never are.
#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_reservation_is_handed_over_once(pool: PgPool) {
    let user = insert_user(&pool, serde_json::json!({})).await;
    let n = NotificationRepo::create(&pool, &paris_alert("stale"), now()).await.unwrap();
    let later = now() + Duration::minutes(6);
    let later_lease_start = later - Duration::minutes(5);

    let id = DeliveryRecordRepo::try_insert(&pool, n.id, user, DeliveryChannel::Sms, now(), lease_start())
        .await
        .unwrap()
        .unwrap();

    let taken = DeliveryRecordRepo::try_insert(&pool, n.id, user, DeliveryChannel::Sms, later, later_lease_start)
        .await
        .unwrap();
    assert_eq!(taken, Some(id));
    let again = DeliveryRecordRepo::try_insert(&pool, n.id, user, DeliveryChannel::Sms, later, later_lease_start)
        .await
        .unwrap();
    assert_matches!(again, None);

    assert!(DeliveryRecordRepo::complete(&pool, id, DeliveryStatus::Sent, None, later).await.unwrap());
    let much_later = later + Duration::hours(1);
    let settled = DeliveryRecordRepo::try_insert(
        &pool,
        n.id,
        user,
        DeliveryChannel::Sms,
        much_later,
        much_later - Duration::minutes(5),
    )
    .await
    .unwrap();
    assert_matches!(settled, None);
}

// ---------------------------------------------------------------------------
// Jobs and statistics
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn job_queue_claims_oldest_first(pool: PgPool) {
    let a = BackgroundJobRepo::enqueue(&pool, JobKind::ProcessDueNotifications, now()).await.unwrap();
    let b = BackgroundJobRepo::enqueue(&pool, JobKind::CleanupNotifications, now() + Duration::seconds(1))
        .await
        .unwrap();

    let claimed = BackgroundJobRepo::claim_next(&pool, now(), job_timeout_start()).await.unwrap().unwrap();
    assert_eq!(claimed.id, a.id);
    assert_eq!(claimed.status, JobStatus::Running);
    BackgroundJobRepo::fail(&pool, claimed.id, 3, "boom", now()).await.unwrap();

    let next = BackgroundJobRepo::claim_next(&pool, now(), job_timeout_start()).await.unwrap().unwrap();
    assert_eq!(next.id, b.id);
    BackgroundJobRepo::complete(&pool, next.id, 1, now()).await.unwrap();
    assert!(BackgroundJobRepo::claim_next(&pool, now(), job_timeout_start()).await.unwrap().is_none());

    let failed = BackgroundJobRepo::find_by_id(&pool, a.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("boom"));
}

/// A running job whose claim is older than the timeout is claimed again.
#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn abandoned_running_job_is_reclaimed(pool: PgPool) {
    let job = BackgroundJobRepo::enqueue(&pool, JobKind::CleanupNotifications, now()).await.unwrap();
    BackgroundJobRepo::claim_next(&pool, now(), job_timeout_start()).await.unwrap().unwrap();
    assert!(BackgroundJobRepo::claim_next(&pool, now(), job_timeout_start())
        .await
        .unwrap()
        .is_none());

    let later = now() + Duration::minutes(16);
    let reclaimed = BackgroundJobRepo::claim_next(&pool, later, later - Duration::minutes(15))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.status, JobStatus::Running);
    assert_eq!(reclaimed.claimed_at, Some(later));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn statistics_group_by_status_type_and_channel(pool: PgPool) {
    let user = insert_user(&pool, serde_json::json!({})).await;
    let n = NotificationRepo::create(&pool, &paris_alert("stats"), now()).await.unwrap();
    NotificationRepo::create(&pool, &paris_alert("other"), now()).await.unwrap();
    let id = DeliveryRecordRepo::try_insert(&pool, n.id, user, DeliveryChannel::Mail, now(), lease_start())
        .await
        .unwrap()
        .unwrap();
    DeliveryRecordRepo::complete(&pool, id, DeliveryStatus::Failed, Some("bounced"), now())
        .await
        .unwrap();

    let stats = StatisticsRepo::snapshot(&pool, Some(now()), None).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.status_count(NotificationStatus::Pending), 2);
    assert_eq!(stats.type_count(NotificationType::NearbyRental), 2);
    assert_eq!(stats.delivery_count(DeliveryChannel::Mail, DeliveryStatus::Failed), 1);

    let empty = StatisticsRepo::snapshot(&pool, None, Some(now())).await.unwrap();
    assert_eq!(empty.total, 0);
}
