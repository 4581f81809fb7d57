//! Boundary between persisted records and typed rows.
//!
//! All "missing means zero" coercion happens here, so the pipelines only
//! ever see fully populated rows:
//! - optional numeric columns that are NULL or blank become 0
//!   (a missing performance multiplier becomes 1, i.e. no penalty)
//! - rewards stored as integer permyriad become XDR with 4 decimals
//! - a value that is present but unparseable is an error, and
//!   [`convert_all`] drops that row with a warning
//!
//! Derived provider totals go back the other way, into permyriad records.

use crate::error::{EngineError, EngineResult};
use crate::types::{
    ratio, ConversionRate, NodeStatus, ProviderDayTotals, RewardMetricRow, StatusSample,
};
use chrono::{DateTime, NaiveDate, Utc};
use persistence::repository::{
    ConversionRateRecord, NodeRewardMetricRecord, PingResultRecord, ProviderDailySummaryRecord,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use tracing::warn;

/// Scale of the permyriad reward columns (value * 10_000)
const PERMYRIAD_SCALE: u32 = 4;

/// Parse a 'YYYY-MM-DD' day
pub fn parse_day(s: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| EngineError::InvalidDay(s.to_string()))
}

/// Turn Unix epoch milliseconds into an instant
pub fn parse_instant(ms: i64) -> EngineResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(EngineError::InvalidTimestamp(ms))
}

/// Parse a decimal column, accepting plain and scientific notation
pub fn parse_decimal(field: &'static str, value: &str) -> EngineResult<Decimal> {
    let trimmed = value.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| EngineError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn decimal_or(field: &'static str, value: Option<&str>, default: Decimal) -> EngineResult<Decimal> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_decimal(field, v),
        _ => Ok(default),
    }
}

fn optional_decimal(field: &'static str, value: Option<&str>) -> EngineResult<Option<Decimal>> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_decimal(field, v).map(Some),
        _ => Ok(None),
    }
}

/// XDR amount from a permyriad column; NULL is zero
pub fn xdr_from_permyriad(value: Option<i64>) -> Decimal {
    Decimal::new(value.unwrap_or(0), PERMYRIAD_SCALE)
}

/// Per-day block failure rate; 0 when nothing was proposed
pub fn block_failure_rate(proposed: i64, failed: i64) -> Decimal {
    ratio(Decimal::from(failed), Decimal::from(proposed))
}

impl TryFrom<&PingResultRecord> for StatusSample {
    type Error = EngineError;

    fn try_from(r: &PingResultRecord) -> EngineResult<Self> {
        let at = parse_instant(r.ping_at_ms)?;
        let loss = parse_decimal("packet_loss", &r.packet_loss)?;
        Ok(StatusSample::from_packet_loss(r.ip_address.clone(), at, loss))
    }
}

impl TryFrom<&NodeRewardMetricRecord> for RewardMetricRow {
    type Error = EngineError;

    fn try_from(r: &NodeRewardMetricRecord) -> EngineResult<Self> {
        let blocks_proposed = r.num_blocks_proposed.unwrap_or(0);
        let blocks_failed = r.num_blocks_failed.unwrap_or(0);

        Ok(RewardMetricRow {
            node_id: r.node_id.clone(),
            node_provider_id: r.node_provider_id.clone(),
            day_utc: parse_day(&r.day_utc)?,
            node_status: NodeStatus::parse(r.node_status.as_deref()),
            base_rewards: xdr_from_permyriad(r.base_rewards_xdr_permyriad),
            adjusted_rewards: xdr_from_permyriad(r.adjusted_rewards_xdr_permyriad),
            blocks_proposed,
            blocks_failed,
            failure_rate: block_failure_rate(blocks_proposed, blocks_failed),
            relative_fr: decimal_or("relative_fr", r.relative_fr.as_deref(), Decimal::ZERO)?,
            rewards_reduction_pct: decimal_or(
                "rewards_reduction",
                r.rewards_reduction.as_deref(),
                Decimal::ZERO,
            )?,
            performance_multiplier: decimal_or(
                "performance_multiplier",
                r.performance_multiplier.as_deref(),
                Decimal::ONE,
            )?,
            subnet_id: r.subnet_assigned.clone().filter(|s| !s.trim().is_empty()),
        })
    }
}

impl TryFrom<&ProviderDailySummaryRecord> for ProviderDayTotals {
    type Error = EngineError;

    fn try_from(r: &ProviderDailySummaryRecord) -> EngineResult<Self> {
        Ok(ProviderDayTotals {
            node_provider_id: r.node_provider_id.clone(),
            day_utc: parse_day(&r.day_utc)?,
            total_nodes: r.total_nodes.unwrap_or(0),
            assigned_nodes: r.assigned_nodes.unwrap_or(0),
            unassigned_nodes: r.unassigned_nodes.unwrap_or(0),
            expected_rewards_xdr: xdr_from_permyriad(r.expected_rewards_xdr_permyriad),
            actual_rewards_xdr: xdr_from_permyriad(r.actual_rewards_xdr_permyriad),
            reduction_xdr: xdr_from_permyriad(r.total_reduction_xdr_permyriad),
            total_blocks_proposed: r.total_blocks_proposed.unwrap_or(0),
            total_blocks_failed: r.total_blocks_failed.unwrap_or(0),
            total_failure_rate: decimal_or(
                "total_failure_rate",
                r.total_failure_rate.as_deref(),
                Decimal::ZERO,
            )?,
        })
    }
}

impl TryFrom<&ConversionRateRecord> for ConversionRate {
    type Error = EngineError;

    fn try_from(r: &ConversionRateRecord) -> EngineResult<Self> {
        Ok(ConversionRate {
            day_utc: parse_day(&r.day_utc)?,
            xdr_to_icp: optional_decimal("xdr_to_icp", r.xdr_to_icp.as_deref())?,
            xdr_to_usd: optional_decimal("xdr_to_usd", r.xdr_to_usd.as_deref())?,
            icp_to_usd: optional_decimal("icp_to_usd", r.icp_to_usd.as_deref())?,
            source: r.source.clone(),
        })
    }
}

/// Permyriad column value for an XDR amount, half away from zero
pub fn xdr_to_permyriad(field: &'static str, xdr: Decimal) -> EngineResult<i64> {
    xdr.checked_mul(Decimal::from(10_000))
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i64())
        .ok_or_else(|| EngineError::InvalidNumber {
            field,
            value: xdr.to_string(),
        })
}

impl TryFrom<&ProviderDayTotals> for ProviderDailySummaryRecord {
    type Error = EngineError;

    fn try_from(t: &ProviderDayTotals) -> EngineResult<Self> {
        Ok(ProviderDailySummaryRecord {
            node_provider_id: t.node_provider_id.clone(),
            day_utc: t.day_utc.to_string(),
            total_nodes: Some(t.total_nodes),
            assigned_nodes: Some(t.assigned_nodes),
            unassigned_nodes: Some(t.unassigned_nodes),
            expected_rewards_xdr_permyriad: Some(xdr_to_permyriad(
                "expected_rewards_xdr",
                t.expected_rewards_xdr,
            )?),
            actual_rewards_xdr_permyriad: Some(xdr_to_permyriad(
                "actual_rewards_xdr",
                t.actual_rewards_xdr,
            )?),
            total_reduction_xdr_permyriad: Some(xdr_to_permyriad("reduction_xdr", t.reduction_xdr)?),
            total_blocks_proposed: Some(t.total_blocks_proposed),
            total_blocks_failed: Some(t.total_blocks_failed),
            total_failure_rate: Some(t.total_failure_rate.normalize().to_string()),
        })
    }
}

/// Convert a batch of records, skipping (and logging) the ones that fail
pub fn convert_all<'a, R, T>(records: &'a [R]) -> Vec<T>
where
    T: TryFrom<&'a R, Error = EngineError>,
{
    let mut rows = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        match T::try_from(record) {
            Ok(row) => rows.push(row),
            Err(e) => warn!(index, error = %e, "Skipping malformed record"),
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn metric_record() -> NodeRewardMetricRecord {
        NodeRewardMetricRecord {
            node_id: "node-a".into(),
            node_provider_id: "prov-1".into(),
            day_utc: "2024-01-02".into(),
            node_status: Some("Assigned".into()),
            subnet_assigned: Some("".into()),
            performance_multiplier: None,
            rewards_reduction: Some("12.5".into()),
            base_rewards_xdr_permyriad: Some(1_234_567),
            adjusted_rewards_xdr_permyriad: None,
            num_blocks_proposed: Some(200),
            num_blocks_failed: Some(5),
            relative_fr: Some("1.5e-2".into()),
        }
    }

    #[test]
    fn test_metric_record_coercion() {
        let row = RewardMetricRow::try_from(&metric_record()).unwrap();
        assert_eq!(row.day_utc, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(row.node_status, NodeStatus::Assigned);
        assert_eq!(row.base_rewards, dec!(123.4567));
        assert_eq!(row.adjusted_rewards, Decimal::ZERO);
        assert_eq!(row.failure_rate, dec!(0.025));
        assert_eq!(row.relative_fr, dec!(0.015));
        assert_eq!(row.rewards_reduction_pct, dec!(12.5));
        assert_eq!(row.performance_multiplier, Decimal::ONE);
        assert_eq!(row.subnet_id, None);
    }

    #[test]
    fn test_no_blocks_proposed_has_zero_failure_rate() {
        let mut record = metric_record();
        record.num_blocks_proposed = None;
        record.num_blocks_failed = Some(3);
        let row = RewardMetricRow::try_from(&record).unwrap();
        assert_eq!(row.failure_rate, Decimal::ZERO);
    }

    #[test]
    fn test_convert_all_skips_malformed() {
        let mut bad_day = metric_record();
        bad_day.day_utc = "02/01/2024".into();
        let mut bad_number = metric_record();
        bad_number.rewards_reduction = Some("n/a".into());

        let rows: Vec<RewardMetricRow> = convert_all(&[metric_record(), bad_day, bad_number]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_ping_record_to_sample() {
        let record = PingResultRecord {
            id: Some(1),
            ip_address: "2001:db8::1".into(),
            avg_rtt: None,
            packets_sent: 4,
            packets_received: 3,
            packet_loss: "25.00".into(),
            probe_name: None,
            ping_at_ms: 1_700_000_000_123,
        };
        let sample = StatusSample::try_from(&record).unwrap();
        assert_eq!(sample.entity_key, "2001:db8::1");
        assert!(!sample.is_up);
        assert_eq!(sample.at.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_rate_record_without_rate() {
        let record = ConversionRateRecord {
            day_utc: "2024-03-01".into(),
            xdr_to_usd: Some("1.33".into()),
            icp_to_usd: None,
            xdr_to_icp: None,
            source: None,
        };
        let rate = ConversionRate::try_from(&record).unwrap();
        assert_eq!(rate.xdr_to_icp, None);
        assert_eq!(rate.xdr_to_usd, Some(dec!(1.33)));
    }

    #[test]
    fn test_provider_totals_back_to_record() {
        let totals = ProviderDayTotals {
            node_provider_id: "prov-1".into(),
            day_utc: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            total_nodes: 2,
            assigned_nodes: 1,
            unassigned_nodes: 1,
            expected_rewards_xdr: dec!(200.0000),
            actual_rewards_xdr: dec!(190.12345),
            reduction_xdr: dec!(9.87655),
            total_blocks_proposed: 95,
            total_blocks_failed: 5,
            total_failure_rate: dec!(5.00),
        };
        let record = ProviderDailySummaryRecord::try_from(&totals).unwrap();
        assert_eq!(record.day_utc, "2024-01-02");
        assert_eq!(record.expected_rewards_xdr_permyriad, Some(2_000_000));
        assert_eq!(record.actual_rewards_xdr_permyriad, Some(1_901_235));
        assert_eq!(record.total_failure_rate.as_deref(), Some("5"));

        let back = ProviderDayTotals::try_from(&record).unwrap();
        assert_eq!(back.expected_rewards_xdr, dec!(200));
        assert_eq!(back.unassigned_nodes, 1);
    }

    #[test]
    fn test_permyriad_out_of_range() {
        assert!(xdr_to_permyriad("x", Decimal::MAX).is_err());
    }
}
