//! Repository for the `user_location_profiles` table.

use geonotify_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::location::UserLocationProfile;

/// Column list for `user_location_profiles` queries.
const COLUMNS: &str = "id, user_id, latitude, longitude, share_location, updated_at";

/// Provides access to users' last-known positions.
pub struct LocationProfileRepo;

impl LocationProfileRepo {
    /// Record a client-reported position (or its absence).
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        position: Option<(f64, f64)>,
        share_location: bool,
        now: Timestamp,
    ) -> Result<UserLocationProfile, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_location_profiles \
                (user_id, latitude, longitude, share_location, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id) DO UPDATE SET \
                latitude = EXCLUDED.latitude, \
                longitude = EXCLUDED.longitude, \
                share_location = EXCLUDED.share_location, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserLocationProfile>(&query)
            .bind(user_id)
            .bind(position.map(|(lat, _)| lat))
            .bind(position.map(|(_, lon)| lon))
            .bind(share_location)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_user_ids(
        pool: &PgPool,
        user_ids: &[DbId],
    ) -> Result<Vec<UserLocationProfile>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_location_profiles \
             WHERE user_id = ANY($1) \
             ORDER BY user_id"
        );
        sqlx::query_as::<_, UserLocationProfile>(&query)
            .bind(user_ids)
            .fetch_all(pool)
            .await
    }

    /// Delete profiles not refreshed since `cutoff`.
    pub async fn prune_stale(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM user_location_profiles WHERE updated_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
