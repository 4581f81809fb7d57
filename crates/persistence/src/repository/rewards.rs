//! Rewards repository: daily node metrics and provider daily totals

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Daily reward metrics for one node (unique per node_id + day_utc)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRewardMetricRecord {
    pub node_id: String,
    pub node_provider_id: String,
    /// 'YYYY-MM-DD'
    pub day_utc: String,
    pub node_status: Option<String>,
    pub subnet_assigned: Option<String>,
    pub performance_multiplier: Option<String>,
    pub rewards_reduction: Option<String>,
    pub base_rewards_xdr_permyriad: Option<i64>,
    pub adjusted_rewards_xdr_permyriad: Option<i64>,
    pub num_blocks_proposed: Option<i64>,
    pub num_blocks_failed: Option<i64>,
    pub relative_fr: Option<String>,
}

/// Daily totals for one node provider (unique per node_provider_id + day_utc)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProviderDailySummaryRecord {
    pub node_provider_id: String,
    pub day_utc: String,
    pub total_nodes: Option<i64>,
    pub assigned_nodes: Option<i64>,
    pub unassigned_nodes: Option<i64>,
    pub expected_rewards_xdr_permyriad: Option<i64>,
    pub actual_rewards_xdr_permyriad: Option<i64>,
    pub total_reduction_xdr_permyriad: Option<i64>,
    pub total_blocks_proposed: Option<i64>,
    pub total_blocks_failed: Option<i64>,
    pub total_failure_rate: Option<String>,
}

const METRIC_COLUMNS: &str = r#"node_id, node_provider_id, day_utc, node_status, subnet_assigned,
       performance_multiplier, rewards_reduction,
       base_rewards_xdr_permyriad, adjusted_rewards_xdr_permyriad,
       num_blocks_proposed, num_blocks_failed, relative_fr"#;

const SUMMARY_COLUMNS: &str = r#"node_provider_id, day_utc, total_nodes, assigned_nodes, unassigned_nodes,
       expected_rewards_xdr_permyriad, actual_rewards_xdr_permyriad,
       total_reduction_xdr_permyriad, total_blocks_proposed, total_blocks_failed,
       total_failure_rate"#;

/// Repository for reward metrics
pub struct RewardsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RewardsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update node metrics (upsert by node_id + day_utc)
    pub async fn upsert_node_metrics(&self, records: &[NodeRewardMetricRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"INSERT INTO node_reward_metrics
                    (node_id, node_provider_id, day_utc, node_status, subnet_assigned,
                     performance_multiplier, rewards_reduction,
                     base_rewards_xdr_permyriad, adjusted_rewards_xdr_permyriad,
                     num_blocks_proposed, num_blocks_failed, relative_fr)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                   ON CONFLICT(node_id, day_utc) DO UPDATE SET
                     node_provider_id = excluded.node_provider_id,
                     node_status = excluded.node_status,
                     subnet_assigned = excluded.subnet_assigned,
                     performance_multiplier = excluded.performance_multiplier,
                     rewards_reduction = excluded.rewards_reduction,
                     base_rewards_xdr_permyriad = excluded.base_rewards_xdr_permyriad,
                     adjusted_rewards_xdr_permyriad = excluded.adjusted_rewards_xdr_permyriad,
                     num_blocks_proposed = excluded.num_blocks_proposed,
                     num_blocks_failed = excluded.num_blocks_failed,
                     relative_fr = excluded.relative_fr
                "#,
            )
            .bind(&r.node_id)
            .bind(&r.node_provider_id)
            .bind(&r.day_utc)
            .bind(&r.node_status)
            .bind(&r.subnet_assigned)
            .bind(&r.performance_multiplier)
            .bind(&r.rewards_reduction)
            .bind(r.base_rewards_xdr_permyriad)
            .bind(r.adjusted_rewards_xdr_permyriad)
            .bind(r.num_blocks_proposed)
            .bind(r.num_blocks_failed)
            .bind(&r.relative_fr)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// Metrics for one node between two days (inclusive), most recent first
    pub async fn get_node_metrics(
        &self,
        node_id: &str,
        start_day: &str,
        end_day: &str,
    ) -> DbResult<Vec<NodeRewardMetricRecord>> {
        let sql = format!(
            r#"SELECT {METRIC_COLUMNS}
               FROM node_reward_metrics
               WHERE node_id = ?1 AND day_utc BETWEEN ?2 AND ?3
               ORDER BY day_utc DESC"#
        );
        let records = sqlx::query_as::<_, NodeRewardMetricRecord>(&sql)
            .bind(node_id)
            .bind(start_day)
            .bind(end_day)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// All node metrics of a provider between two days, oldest first
    pub async fn get_provider_metrics(
        &self,
        node_provider_id: &str,
        start_day: &str,
        end_day: &str,
    ) -> DbResult<Vec<NodeRewardMetricRecord>> {
        let sql = format!(
            r#"SELECT {METRIC_COLUMNS}
               FROM node_reward_metrics
               WHERE node_provider_id = ?1 AND day_utc BETWEEN ?2 AND ?3
               ORDER BY day_utc ASC, node_id ASC"#
        );
        let records = sqlx::query_as::<_, NodeRewardMetricRecord>(&sql)
            .bind(node_provider_id)
            .bind(start_day)
            .bind(end_day)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// One page of a provider's node metrics, most recent day first.
    /// Returns the page and the total row count in the range.
    pub async fn get_provider_metrics_page(
        &self,
        node_provider_id: &str,
        start_day: &str,
        end_day: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<NodeRewardMetricRecord>, i64)> {
        if limit <= 0 || offset < 0 {
            return Err(DbError::Query(format!(
                "invalid page window: limit={limit} offset={offset}"
            )));
        }

        let (total,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM node_reward_metrics
               WHERE node_provider_id = ?1 AND day_utc BETWEEN ?2 AND ?3"#,
        )
        .bind(node_provider_id)
        .bind(start_day)
        .bind(end_day)
        .fetch_one(self.pool)
        .await?;

        let sql = format!(
            r#"SELECT {METRIC_COLUMNS}
               FROM node_reward_metrics
               WHERE node_provider_id = ?1 AND day_utc BETWEEN ?2 AND ?3
               ORDER BY day_utc DESC, node_id ASC
               LIMIT ?4 OFFSET ?5"#
        );
        let records = sqlx::query_as::<_, NodeRewardMetricRecord>(&sql)
            .bind(node_provider_id)
            .bind(start_day)
            .bind(end_day)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?;

        Ok((records, total))
    }

    /// Insert or update provider daily totals (upsert by provider + day_utc)
    pub async fn upsert_provider_summaries(
        &self,
        records: &[ProviderDailySummaryRecord],
    ) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"INSERT INTO node_provider_daily_summary
                    (node_provider_id, day_utc, total_nodes, assigned_nodes, unassigned_nodes,
                     expected_rewards_xdr_permyriad, actual_rewards_xdr_permyriad,
                     total_reduction_xdr_permyriad, total_blocks_proposed, total_blocks_failed,
                     total_failure_rate)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                   ON CONFLICT(node_provider_id, day_utc) DO UPDATE SET
                     total_nodes = excluded.total_nodes,
                     assigned_nodes = excluded.assigned_nodes,
                     unassigned_nodes = excluded.unassigned_nodes,
                     expected_rewards_xdr_permyriad = excluded.expected_rewards_xdr_permyriad,
                     actual_rewards_xdr_permyriad = excluded.actual_rewards_xdr_permyriad,
                     total_reduction_xdr_permyriad = excluded.total_reduction_xdr_permyriad,
                     total_blocks_proposed = excluded.total_blocks_proposed,
                     total_blocks_failed = excluded.total_blocks_failed,
                     total_failure_rate = excluded.total_failure_rate
                "#,
            )
            .bind(&r.node_provider_id)
            .bind(&r.day_utc)
            .bind(r.total_nodes)
            .bind(r.assigned_nodes)
            .bind(r.unassigned_nodes)
            .bind(r.expected_rewards_xdr_permyriad)
            .bind(r.actual_rewards_xdr_permyriad)
            .bind(r.total_reduction_xdr_permyriad)
            .bind(r.total_blocks_proposed)
            .bind(r.total_blocks_failed)
            .bind(&r.total_failure_rate)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// Provider daily totals from `start_day` onwards, most recent first
    pub async fn get_provider_summaries(
        &self,
        node_provider_id: &str,
        start_day: &str,
    ) -> DbResult<Vec<ProviderDailySummaryRecord>> {
        let sql = format!(
            r#"SELECT {SUMMARY_COLUMNS}
               FROM node_provider_daily_summary
               WHERE node_provider_id = ?1 AND day_utc >= ?2
               ORDER BY day_utc DESC"#
        );
        let records = sqlx::query_as::<_, ProviderDailySummaryRecord>(&sql)
            .bind(node_provider_id)
            .bind(start_day)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }
}
