//! Node registry repository: maps node ids to providers and monitored addresses

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A monitored node
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRecord {
    pub node_id: String,
    pub node_provider_id: String,
    pub ip_address: String,
    pub dc_id: Option<String>,
    pub region: Option<String>,
}

/// Packet counters of one provider's nodes over a window
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProviderPacketTotals {
    pub node_provider_id: String,
    pub total_nodes: i64,
    /// Most recent ping of any of the provider's nodes in the window
    pub latest_ping_at_ms: Option<i64>,
    pub packets_sent: i64,
    pub packets_received: i64,
}

/// Repository for the node registry
pub struct NodeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> NodeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update nodes (upsert by node_id). Returns the number written.
    pub async fn upsert(&self, nodes: &[NodeRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            sqlx::query(
                r#"INSERT INTO nodes (node_id, node_provider_id, ip_address, dc_id, region, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
                   ON CONFLICT(node_id) DO UPDATE SET
                     node_provider_id = excluded.node_provider_id,
                     ip_address = excluded.ip_address,
                     dc_id = excluded.dc_id,
                     region = excluded.region,
                     updated_at = strftime('%s', 'now')
                "#,
            )
            .bind(&node.node_id)
            .bind(&node.node_provider_id)
            .bind(&node.ip_address)
            .bind(&node.dc_id)
            .bind(&node.region)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(nodes.len())
    }

    /// Get a node by id
    pub async fn get_by_id(&self, node_id: &str) -> DbResult<Option<NodeRecord>> {
        let record = sqlx::query_as::<_, NodeRecord>(
            "SELECT node_id, node_provider_id, ip_address, dc_id, region FROM nodes WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Get a page of nodes, optionally restricted to one provider.
    /// Returns the page and the total number of matching nodes.
    pub async fn list_paginated(
        &self,
        node_provider_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<NodeRecord>, i64)> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM nodes WHERE (?1 IS NULL OR node_provider_id = ?1)",
        )
        .bind(node_provider_id)
        .fetch_one(self.pool)
        .await?;

        let records = sqlx::query_as::<_, NodeRecord>(
            r#"SELECT node_id, node_provider_id, ip_address, dc_id, region
               FROM nodes
               WHERE (?1 IS NULL OR node_provider_id = ?1)
               ORDER BY node_id
               LIMIT ?2 OFFSET ?3"#,
        )
        .bind(node_provider_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok((records, total))
    }

    /// One page of providers with their nodes' packet totals since
    /// `since_ms`. Providers with recent pings come first. Returns the page
    /// and the number of distinct providers.
    pub async fn provider_packet_totals_page(
        &self,
        since_ms: i64,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<ProviderPacketTotals>, i64)> {
        if limit <= 0 || offset < 0 {
            return Err(DbError::Query(format!(
                "invalid page window: limit={limit} offset={offset}"
            )));
        }

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT node_provider_id) FROM nodes")
            .fetch_one(self.pool)
            .await?;

        // Pings are summed per address first so each node counts its own
        // address once
        let records = sqlx::query_as::<_, ProviderPacketTotals>(
            r#"SELECT n.node_provider_id,
                      COUNT(*) AS total_nodes,
                      MAX(p.latest_ping_at_ms) AS latest_ping_at_ms,
                      COALESCE(SUM(p.packets_sent), 0) AS packets_sent,
                      COALESCE(SUM(p.packets_received), 0) AS packets_received
               FROM nodes n
               LEFT JOIN (
                   SELECT ip_address,
                          MAX(ping_at_ms) AS latest_ping_at_ms,
                          SUM(packets_sent) AS packets_sent,
                          SUM(packets_received) AS packets_received
                   FROM ping_results
                   WHERE ping_at_ms >= ?1
                   GROUP BY ip_address
               ) p ON p.ip_address = n.ip_address
               GROUP BY n.node_provider_id
               ORDER BY latest_ping_at_ms IS NULL, latest_ping_at_ms DESC, n.node_provider_id
               LIMIT ?2 OFFSET ?3"#,
        )
        .bind(since_ms)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok((records, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn node(id: &str, provider: &str) -> NodeRecord {
        NodeRecord {
            node_id: id.to_string(),
            node_provider_id: provider.to_string(),
            ip_address: format!("2001:db8::{}", id.len()),
            dc_id: Some("zh1".into()),
            region: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_node() {
        let db = Database::in_memory().await.unwrap();
        let repo = NodeRepository::new(db.pool());

        repo.upsert(&[node("n1", "p1")]).await.unwrap();
        let mut moved = node("n1", "p2");
        moved.ip_address = "10.0.0.9".into();
        repo.upsert(&[moved]).await.unwrap();

        let stored = repo.get_by_id("n1").await.unwrap().unwrap();
        assert_eq!(stored.node_provider_id, "p2");
        assert_eq!(stored.ip_address, "10.0.0.9");
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_paginated_filters_by_provider() {
        let db = Database::in_memory().await.unwrap();
        let repo = NodeRepository::new(db.pool());
        repo.upsert(&[node("a", "p1"), node("b", "p1"), node("c", "p2")])
            .await
            .unwrap();

        let (all, total) = repo.list_paginated(None, 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 2);

        let (p1, total_p1) = repo.list_paginated(Some("p1"), 10, 1).await.unwrap();
        assert_eq!(total_p1, 2);
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].node_id, "b");
    }

    #[tokio::test]
    async fn test_provider_packet_totals_page() {
        use crate::repository::{PingRepository, PingResultRecord};

        let db = Database::in_memory().await.unwrap();
        let repo = NodeRepository::new(db.pool());
        let mut b = node("b", "p1");
        b.ip_address = "10.0.0.2".into();
        let mut c = node("c", "p2");
        c.ip_address = "10.0.0.3".into();
        let mut d = node("d", "p3");
        d.ip_address = "10.0.0.4".into();
        repo.upsert(&[node("a", "p1"), b, c, d]).await.unwrap();

        let ping = |ip: &str, sent: i64, received: i64, at: i64| PingResultRecord {
            id: None,
            ip_address: ip.to_string(),
            avg_rtt: None,
            packets_sent: sent,
            packets_received: received,
            packet_loss: "0".into(),
            probe_name: None,
            ping_at_ms: at,
        };
        PingRepository::new(db.pool())
            .save_batch(&[
                ping("2001:db8::1", 4, 4, 1_000),
                ping("10.0.0.2", 4, 2, 2_000),
                ping("10.0.0.3", 4, 4, 3_000),
                // before the window
                ping("10.0.0.3", 4, 0, 10),
            ])
            .await
            .unwrap();

        let (page, total) = repo.provider_packet_totals_page(500, 10, 0).await.unwrap();
        assert_eq!(total, 3);
        let ids: Vec<&str> = page.iter().map(|p| p.node_provider_id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1", "p3"]);

        let p1 = &page[1];
        assert_eq!(p1.total_nodes, 2);
        assert_eq!(p1.packets_sent, 8);
        assert_eq!(p1.packets_received, 6);
        assert_eq!(p1.latest_ping_at_ms, Some(2_000));

        let p3 = &page[2];
        assert_eq!(p3.packets_sent, 0);
        assert_eq!(p3.latest_ping_at_ms, None);

        let (second, _) = repo.provider_packet_totals_page(500, 2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(repo.provider_packet_totals_page(500, 0, 0).await.is_err());
    }
}
