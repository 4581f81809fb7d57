//! Ping results repository: raw measurements per IP address

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

/// One ping measurement
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PingResultRecord {
    pub id: Option<i64>,
    pub ip_address: String,
    pub avg_rtt: Option<String>,
    pub packets_sent: i64,
    pub packets_received: i64,
    pub packet_loss: String,
    pub probe_name: Option<String>,
    /// Unix epoch milliseconds
    pub ping_at_ms: i64,
}

/// Packet counters summed over a window
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, FromRow)]
pub struct PacketTotals {
    pub packets_sent: i64,
    pub packets_received: i64,
}

/// Repository for ping results
pub struct PingRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PingRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a batch of measurements in one transaction. Returns rows inserted.
    pub async fn save_batch(&self, pings: &[PingResultRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for ping in pings {
            sqlx::query(
                r#"INSERT INTO ping_results
                    (ip_address, avg_rtt, packets_sent, packets_received, packet_loss,
                     probe_name, ping_at_ms)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&ping.ip_address)
            .bind(&ping.avg_rtt)
            .bind(ping.packets_sent)
            .bind(ping.packets_received)
            .bind(&ping.packet_loss)
            .bind(&ping.probe_name)
            .bind(ping.ping_at_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(pings.len())
    }

    /// Measurements for one address at or after `since_ms`, oldest first.
    /// Rows with the same instant come back in insertion order.
    pub async fn get_since(&self, ip_address: &str, since_ms: i64) -> DbResult<Vec<PingResultRecord>> {
        let records = sqlx::query_as::<_, PingResultRecord>(
            r#"SELECT id, ip_address, avg_rtt, packets_sent, packets_received, packet_loss,
                      probe_name, ping_at_ms
               FROM ping_results
               WHERE ip_address = ?1 AND ping_at_ms >= ?2
               ORDER BY ping_at_ms ASC, id ASC"#,
        )
        .bind(ip_address)
        .bind(since_ms)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Sum of sent/received packets for one address since `since_ms`
    pub async fn packet_totals_since(&self, ip_address: &str, since_ms: i64) -> DbResult<PacketTotals> {
        let totals = sqlx::query_as::<_, PacketTotals>(
            r#"SELECT COALESCE(SUM(packets_sent), 0) AS packets_sent,
                      COALESCE(SUM(packets_received), 0) AS packets_received
               FROM ping_results
               WHERE ip_address = ?1 AND ping_at_ms >= ?2"#,
        )
        .bind(ip_address)
        .bind(since_ms)
        .fetch_one(self.pool)
        .await?;

        Ok(totals)
    }

    /// Delete measurements older than `cutoff_ms`. Returns rows deleted.
    pub async fn delete_older_than(&self, cutoff_ms: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM ping_results WHERE ping_at_ms < ?1")
            .bind(cutoff_ms)
            .execute(self.pool)
            .await?;

        let deleted = result.rows_affected();
        info!(deleted, cutoff_ms, "Deleted old ping results");
        Ok(deleted)
    }

    /// Reclaim disk space after large deletions
    pub async fn vacuum(&self) -> DbResult<()> {
        sqlx::query("VACUUM").execute(self.pool).await?;
        Ok(())
    }
}
