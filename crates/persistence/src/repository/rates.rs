//! Conversion rates repository: daily XDR/ICP/USD exchange rates

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One day's exchange rates
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversionRateRecord {
    pub day_utc: String,
    pub xdr_to_usd: Option<String>,
    pub icp_to_usd: Option<String>,
    pub xdr_to_icp: Option<String>,
    pub source: Option<String>,
}

/// Repository for conversion rates
pub struct ConversionRateRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ConversionRateRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update rates (upsert by day_utc)
    pub async fn upsert(&self, rates: &[ConversionRateRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for rate in rates {
            sqlx::query(
                r#"INSERT INTO xdr_icp_conversion_rates
                    (day_utc, xdr_to_usd, icp_to_usd, xdr_to_icp, source)
                   VALUES (?1, ?2, ?3, ?4, ?5)
                   ON CONFLICT(day_utc) DO UPDATE SET
                     xdr_to_usd = excluded.xdr_to_usd,
                     icp_to_usd = excluded.icp_to_usd,
                     xdr_to_icp = excluded.xdr_to_icp,
                     source = excluded.source
                "#,
            )
            .bind(&rate.day_utc)
            .bind(&rate.xdr_to_usd)
            .bind(&rate.icp_to_usd)
            .bind(&rate.xdr_to_icp)
            .bind(&rate.source)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rates.len())
    }

    /// Rates for a single day
    pub async fn get_by_day(&self, day_utc: &str) -> DbResult<Option<ConversionRateRecord>> {
        let record = sqlx::query_as::<_, ConversionRateRecord>(
            r#"SELECT day_utc, xdr_to_usd, icp_to_usd, xdr_to_icp, source
               FROM xdr_icp_conversion_rates
               WHERE day_utc = ?1"#,
        )
        .bind(day_utc)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Rates from `start_day` onwards, most recent first
    pub async fn get_since(&self, start_day: &str) -> DbResult<Vec<ConversionRateRecord>> {
        let records = sqlx::query_as::<_, ConversionRateRecord>(
            r#"SELECT day_utc, xdr_to_usd, icp_to_usd, xdr_to_icp, source
               FROM xdr_icp_conversion_rates
               WHERE day_utc >= ?1
               ORDER BY day_utc DESC"#,
        )
        .bind(start_day)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn rate(day: &str, xdr_to_icp: Option<&str>) -> ConversionRateRecord {
        ConversionRateRecord {
            day_utc: day.to_string(),
            xdr_to_usd: Some("1.33".into()),
            icp_to_usd: Some("9.10".into()),
            xdr_to_icp: xdr_to_icp.map(str::to_string),
            source: Some("coingecko".into()),
        }
    }

    #[tokio::test]
    async fn test_rates_roundtrip_through_upsert() {
        let db = Database::in_memory().await.unwrap();
        let repo = ConversionRateRepository::new(db.pool());

        repo.upsert(&[rate("2024-01-01", Some("0.14")), rate("2024-01-02", None)])
            .await
            .unwrap();
        repo.upsert(&[rate("2024-01-01", Some("0.15"))]).await.unwrap();

        let day = repo.get_by_day("2024-01-01").await.unwrap().unwrap();
        assert_eq!(day.xdr_to_icp.as_deref(), Some("0.15"));

        let since = repo.get_since("2024-01-01").await.unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].day_utc, "2024-01-02");
        assert!(since[0].xdr_to_icp.is_none());
    }
}
