//! Read-only rollups over notifications and delivery records.

use std::str::FromStr;

use geonotify_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::statistics::{CountRow, NotificationStatistics, PairCountRow};

pub struct StatisticsRepo;

impl StatisticsRepo {
    /// Counts over notifications created in `[from, to)` (either bound
    /// optional) and their delivery records.
    ///
    /// All queries run in one `REPEATABLE READ` read-only transaction, so
    /// the notification and delivery counts come from the same snapshot.
    pub async fn snapshot(
        pool: &PgPool,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<NotificationStatistics, sqlx::Error> {
        const WINDOW: &str = "($1::timestamptz IS NULL OR n.created_at >= $1) \
                              AND ($2::timestamptz IS NULL OR n.created_at < $2)";

        let mut tx = pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let by_status = sqlx::query_as::<_, CountRow>(&format!(
            "SELECT n.status AS key, COUNT(*) AS count FROM notifications n \
             WHERE {WINDOW} GROUP BY n.status"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&mut *tx)
        .await?;

        let by_type = sqlx::query_as::<_, CountRow>(&format!(
            "SELECT n.notification_type AS key, COUNT(*) AS count FROM notifications n \
             WHERE {WINDOW} GROUP BY n.notification_type"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&mut *tx)
        .await?;

        let deliveries = sqlx::query_as::<_, PairCountRow>(&format!(
            "SELECT d.channel, d.status, COUNT(*) AS count \
             FROM delivery_records d JOIN notifications n ON n.id = d.notification_id \
             WHERE {WINDOW} GROUP BY d.channel, d.status"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut stats = NotificationStatistics {
            from,
            to,
            ..Default::default()
        };
        for row in by_status {
            stats.total += row.count;
            stats.by_status.insert(decode_key(&row.key)?, row.count);
        }
        for row in by_type {
            stats.by_type.insert(decode_key(&row.key)?, row.count);
        }
        for row in deliveries {
            stats
                .deliveries
                .entry(decode_key(&row.channel)?)
                .or_default()
                .insert(decode_key(&row.status)?, row.count);
        }
        Ok(stats)
    }
}

fn decode_key<T>(raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
