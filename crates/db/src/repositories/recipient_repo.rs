//! Read-only access to the `users` table.

use geonotify_core::types::DbId;
use sqlx::PgPool;

use crate::models::recipient::Recipient;

/// Column list for `users` queries.
const COLUMNS: &str = "id, email, phone, push_token, attributes, is_active";

/// Resolves candidate recipients for geo matching.
pub struct RecipientRepo;

impl RecipientRepo {
    /// Active users who might match a notification: those sharing a live
    /// position inside the latitude band, plus everyone with a favorite.
    ///
    /// This is a coarse pre-filter; exact distances are computed in memory.
    pub async fn candidate_ids(
        pool: &PgPool,
        min_latitude: f64,
        max_latitude: f64,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT u.id FROM users u \
             JOIN user_location_profiles p ON p.user_id = u.id \
             WHERE u.is_active AND p.share_location \
               AND p.latitude BETWEEN $1 AND $2 \
             UNION \
             SELECT u.id FROM users u \
             JOIN notification_preferences np ON np.user_id = u.id \
             WHERE u.is_active AND jsonb_array_length(np.favorite_locations) > 0 \
             ORDER BY 1",
        )
        .bind(min_latitude)
        .bind(max_latitude)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_ids(pool: &PgPool, ids: &[DbId]) -> Result<Vec<Recipient>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, Recipient>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }
}
