//! Repository for the `notification_preferences` table.

use geonotify_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::preference::{NotificationPreferences, UpdateNotificationPreferences};

/// Column list for `notification_preferences` queries.
const COLUMNS: &str = "\
    id, user_id, nearby_rentals, pickup_reminders, area_alerts, promotional, \
    new_listings, price_drops, share_location, notification_radius, \
    quiet_hours_enabled, quiet_hours_start, quiet_hours_end, timezone, frequency, \
    max_per_day, push_enabled, email_enabled, sms_enabled, favorite_locations, \
    created_at, updated_at";

/// Provides access to per-user notification preferences.
pub struct NotificationPreferenceRepo;

impl NotificationPreferenceRepo {
    /// Get a user's preferences, inserting the defaults on first access.
    pub async fn get_or_create(
        pool: &PgPool,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<NotificationPreferences, sqlx::Error> {
        sqlx::query(
            "INSERT INTO notification_preferences (user_id, created_at, updated_at) \
             VALUES ($1, $2, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(pool)
        .await?;

        let query = format!("SELECT {COLUMNS} FROM notification_preferences WHERE user_id = $1");
        sqlx::query_as::<_, NotificationPreferences>(&query)
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    /// Stored preferences for a batch of users. Users without a row are absent.
    pub async fn find_by_user_ids(
        pool: &PgPool,
        user_ids: &[DbId],
    ) -> Result<Vec<NotificationPreferences>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = ANY($1) \
             ORDER BY user_id"
        );
        sqlx::query_as::<_, NotificationPreferences>(&query)
            .bind(user_ids)
            .fetch_all(pool)
            .await
    }

    /// Insert or update a user's preferences.
    ///
    /// Uses `COALESCE` to only overwrite fields that are `Some` in the input.
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        input: &UpdateNotificationPreferences,
        now: Timestamp,
    ) -> Result<NotificationPreferences, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preferences \
                (user_id, nearby_rentals, pickup_reminders, area_alerts, promotional, \
                 new_listings, price_drops, share_location, notification_radius, \
                 quiet_hours_enabled, quiet_hours_start, quiet_hours_end, timezone, frequency, \
                 max_per_day, push_enabled, email_enabled, sms_enabled, favorite_locations, \
                 created_at, updated_at) \
             VALUES ($1, COALESCE($2, true), COALESCE($3, true), COALESCE($4, true), \
                     COALESCE($5, true), COALESCE($6, true), COALESCE($7, true), \
                     COALESCE($8, true), COALESCE($9, 10000), COALESCE($10, false), \
                     $11, $12, $13, COALESCE($14, 'realtime'), $15, \
                     COALESCE($16, true), COALESCE($17, true), COALESCE($18, true), \
                     COALESCE($19, '[]'::jsonb), $20, $20) \
             ON CONFLICT (user_id) DO UPDATE SET \
                nearby_rentals = COALESCE($2, notification_preferences.nearby_rentals), \
                pickup_reminders = COALESCE($3, notification_preferences.pickup_reminders), \
                area_alerts = COALESCE($4, notification_preferences.area_alerts), \
                promotional = COALESCE($5, notification_preferences.promotional), \
                new_listings = COALESCE($6, notification_preferences.new_listings), \
                price_drops = COALESCE($7, notification_preferences.price_drops), \
                share_location = COALESCE($8, notification_preferences.share_location), \
                notification_radius = COALESCE($9, notification_preferences.notification_radius), \
                quiet_hours_enabled = COALESCE($10, notification_preferences.quiet_hours_enabled), \
                quiet_hours_start = COALESCE($11, notification_preferences.quiet_hours_start), \
                quiet_hours_end = COALESCE($12, notification_preferences.quiet_hours_end), \
                timezone = COALESCE($13, notification_preferences.timezone), \
                frequency = COALESCE($14, notification_preferences.frequency), \
                max_per_day = COALESCE($15, notification_preferences.max_per_day), \
                push_enabled = COALESCE($16, notification_preferences.push_enabled), \
                email_enabled = COALESCE($17, notification_preferences.email_enabled), \
                sms_enabled = COALESCE($18, notification_preferences.sms_enabled), \
                favorite_locations = COALESCE($19, notification_preferences.favorite_locations), \
                updated_at = $20 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationPreferences>(&query)
            .bind(user_id)
            .bind(input.nearby_rentals)
            .bind(input.pickup_reminders)
            .bind(input.area_alerts)
            .bind(input.promotional)
            .bind(input.new_listings)
            .bind(input.price_drops)
            .bind(input.share_location)
            .bind(input.notification_radius)
            .bind(input.quiet_hours_enabled)
            .bind(input.quiet_hours_start)
            .bind(input.quiet_hours_end)
            .bind(input.timezone.as_deref())
            .bind(input.frequency.map(|f| f.as_str()))
            .bind(input.max_per_day)
            .bind(input.push_enabled)
            .bind(input.email_enabled)
            .bind(input.sms_enabled)
            .bind(input.favorite_locations.as_ref().map(Json))
            .bind(now)
            .fetch_one(pool)
            .await
    }
}
