//! Provider rewards: daily totals from node rows, and the summary of
//! latest period, daily history and window aggregates

use crate::rates::RateLookup;
use crate::types::{mean, percentage, NodeStatus, ProviderDayTotals, RewardMetricRow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// The provider's most recent day, converted with that day's rate
#[derive(Debug, Clone, Serialize)]
pub struct LatestPeriod {
    pub date: NaiveDate,
    pub conversion_rate: Option<Decimal>,
    pub icp_price_usd: Option<Decimal>,
    pub expected_rewards_xdr: Decimal,
    pub expected_rewards_icp: Decimal,
    pub last_rewards_xdr: Decimal,
    pub last_rewards_icp: Decimal,
    pub total_nodes: i64,
    pub assigned_nodes: i64,
    pub unassigned_nodes: i64,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    pub total_failure_rate: Decimal,
}

/// One day of provider history
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHistoryPoint {
    pub day_utc: NaiveDate,
    pub total_nodes: i64,
    pub assigned_nodes: i64,
    pub expected_rewards_xdr: Decimal,
    pub actual_rewards_xdr: Decimal,
    pub actual_rewards_icp: Decimal,
    pub reduction_xdr: Decimal,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    pub total_failure_rate: Decimal,
}

/// Statistics over every day present in the window
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAggregates {
    pub days_with_data: usize,
    pub avg_total_nodes: Decimal,
    pub avg_assigned_nodes: Decimal,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    /// Mean of the daily failure rates; absent days are not counted
    pub avg_failure_rate: Decimal,
    pub total_rewards_xdr: Decimal,
    pub total_rewards_icp: Decimal,
    pub total_expected_rewards_xdr: Decimal,
    pub attainment_pct: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderRewardSummary {
    pub provider_id: String,
    pub latest_period: Option<LatestPeriod>,
    /// Most recent day first
    pub historical: Vec<ProviderHistoryPoint>,
    pub aggregated: ProviderAggregates,
}

/// Summarize a provider's daily totals (any order) against daily rates.
///
/// A day appearing more than once resolves to the row seen last, and every
/// figure (latest period, history, aggregates) is computed over the
/// resulting distinct days.
pub fn summarize<R: RateLookup + ?Sized>(
    provider_id: &str,
    days: &[ProviderDayTotals],
    rates: &R,
) -> ProviderRewardSummary {
    let mut by_day: BTreeMap<NaiveDate, &ProviderDayTotals> = BTreeMap::new();
    for d in days {
        by_day.insert(d.day_utc, d);
    }
    let days: Vec<&ProviderDayTotals> = by_day.into_values().rev().collect();

    let latest_period = days.first().map(|d| LatestPeriod {
        date: d.day_utc,
        conversion_rate: rates.rate_on(d.day_utc),
        icp_price_usd: rates.icp_usd_on(d.day_utc),
        expected_rewards_xdr: d.expected_rewards_xdr,
        expected_rewards_icp: rates.to_icp(d.day_utc, d.expected_rewards_xdr),
        last_rewards_xdr: d.actual_rewards_xdr,
        last_rewards_icp: rates.to_icp(d.day_utc, d.actual_rewards_xdr),
        total_nodes: d.total_nodes,
        assigned_nodes: d.assigned_nodes,
        unassigned_nodes: d.unassigned_nodes,
        total_blocks_proposed: d.total_blocks_proposed,
        total_blocks_failed: d.total_blocks_failed,
        total_failure_rate: d.total_failure_rate,
    });

    let historical: Vec<ProviderHistoryPoint> = days
        .iter()
        .map(|d| ProviderHistoryPoint {
            day_utc: d.day_utc,
            total_nodes: d.total_nodes,
            assigned_nodes: d.assigned_nodes,
            expected_rewards_xdr: d.expected_rewards_xdr,
            actual_rewards_xdr: d.actual_rewards_xdr,
            actual_rewards_icp: rates.to_icp(d.day_utc, d.actual_rewards_xdr),
            reduction_xdr: d.reduction_xdr,
            total_blocks_proposed: d.total_blocks_proposed,
            total_blocks_failed: d.total_blocks_failed,
            total_failure_rate: d.total_failure_rate,
        })
        .collect();

    ProviderRewardSummary {
        provider_id: provider_id.to_string(),
        latest_period,
        aggregated: aggregate(&historical),
        historical,
    }
}

fn aggregate(history: &[ProviderHistoryPoint]) -> ProviderAggregates {
    let n = history.len();
    let total_rewards_xdr: Decimal = history.iter().map(|h| h.actual_rewards_xdr).sum();
    let total_expected_rewards_xdr: Decimal = history.iter().map(|h| h.expected_rewards_xdr).sum();

    ProviderAggregates {
        days_with_data: n,
        avg_total_nodes: mean(history.iter().map(|h| Decimal::from(h.total_nodes)).sum(), n),
        avg_assigned_nodes: mean(history.iter().map(|h| Decimal::from(h.assigned_nodes)).sum(), n),
        total_blocks_proposed: history.iter().map(|h| h.total_blocks_proposed).sum(),
        total_blocks_failed: history.iter().map(|h| h.total_blocks_failed).sum(),
        avg_failure_rate: mean(history.iter().map(|h| h.total_failure_rate).sum(), n),
        total_rewards_xdr,
        total_rewards_icp: history.iter().map(|h| h.actual_rewards_icp).sum(),
        total_expected_rewards_xdr,
        attainment_pct: percentage(total_rewards_xdr, total_expected_rewards_xdr),
    }
}

// ---------------------------------------------------------------------------
// Daily totals derived from node rows
// ---------------------------------------------------------------------------

/// Provider daily totals rebuilt from per-node rows, ordered by provider
/// then day.
///
/// Expected rewards are the summed base rewards, actual rewards the summed
/// adjusted rewards. `total_failure_rate` is a percentage of all blocks
/// (`failed * 100 / (proposed + failed)`), 0 when no block was produced.
pub fn daily_totals(rows: &[RewardMetricRow]) -> Vec<ProviderDayTotals> {
    let mut groups: BTreeMap<(&str, NaiveDate), ProviderDayTotals> = BTreeMap::new();

    for row in rows {
        let totals = groups
            .entry((row.node_provider_id.as_str(), row.day_utc))
            .or_insert_with(|| ProviderDayTotals {
                node_provider_id: row.node_provider_id.clone(),
                day_utc: row.day_utc,
                total_nodes: 0,
                assigned_nodes: 0,
                unassigned_nodes: 0,
                expected_rewards_xdr: Decimal::ZERO,
                actual_rewards_xdr: Decimal::ZERO,
                reduction_xdr: Decimal::ZERO,
                total_blocks_proposed: 0,
                total_blocks_failed: 0,
                total_failure_rate: Decimal::ZERO,
            });

        totals.total_nodes += 1;
        match row.node_status {
            NodeStatus::Assigned => totals.assigned_nodes += 1,
            NodeStatus::Unassigned => totals.unassigned_nodes += 1,
        }
        totals.expected_rewards_xdr += row.base_rewards;
        totals.actual_rewards_xdr += row.adjusted_rewards;
        totals.total_blocks_proposed += row.blocks_proposed;
        totals.total_blocks_failed += row.blocks_failed;
    }

    let out: Vec<ProviderDayTotals> = groups
        .into_values()
        .map(|mut t| {
            t.reduction_xdr = t.expected_rewards_xdr - t.actual_rewards_xdr;
            t.total_failure_rate = percentage(
                Decimal::from(t.total_blocks_failed),
                Decimal::from(t.total_blocks_proposed + t.total_blocks_failed),
            );
            t
        })
        .collect();

    debug!(rows = rows.len(), days = out.len(), "Derived provider daily totals");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::RateTable;
    use crate::types::ConversionRate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn totals(d: u32, expected: Decimal, actual: Decimal, fr: Decimal) -> ProviderDayTotals {
        ProviderDayTotals {
            node_provider_id: "prov-1".into(),
            day_utc: day(d),
            total_nodes: 10,
            assigned_nodes: 6 + d as i64 % 2,
            unassigned_nodes: 4 - d as i64 % 2,
            expected_rewards_xdr: expected,
            actual_rewards_xdr: actual,
            reduction_xdr: expected - actual,
            total_blocks_proposed: 1000,
            total_blocks_failed: 10,
            total_failure_rate: fr,
        }
    }

    fn rates() -> RateTable {
        RateTable::new(vec![
            ConversionRate {
                day_utc: day(1),
                xdr_to_icp: Some(dec!(0.2)),
                xdr_to_usd: None,
                icp_to_usd: Some(dec!(7)),
                source: None,
            },
            ConversionRate {
                day_utc: day(3),
                xdr_to_icp: Some(dec!(0.25)),
                xdr_to_usd: None,
                icp_to_usd: Some(dec!(6.5)),
                source: None,
            },
        ])
    }

    #[test]
    fn test_summary_latest_history_and_aggregates() {
        let days = vec![
            totals(1, dec!(1000), dec!(900), dec!(0.01)),
            totals(3, dec!(1000), dec!(800), dec!(0.03)),
            totals(2, dec!(1000), dec!(1000), dec!(0.02)),
        ];
        let summary = summarize("prov-1", &days, &rates());

        let latest = summary.latest_period.unwrap();
        assert_eq!(latest.date, day(3));
        assert_eq!(latest.conversion_rate, Some(dec!(0.25)));
        assert_eq!(latest.icp_price_usd, Some(dec!(6.5)));
        assert_eq!(latest.expected_rewards_icp, dec!(250));
        assert_eq!(latest.last_rewards_icp, dec!(200));

        let history_days: Vec<NaiveDate> = summary.historical.iter().map(|h| h.day_utc).collect();
        assert_eq!(history_days, vec![day(3), day(2), day(1)]);
        // Day 2 has no rate
        assert_eq!(summary.historical[1].actual_rewards_icp, Decimal::ZERO);

        let agg = summary.aggregated;
        assert_eq!(agg.days_with_data, 3);
        assert_eq!(agg.avg_failure_rate, dec!(0.02));
        assert_eq!(agg.total_rewards_xdr, dec!(2700));
        assert_eq!(agg.total_rewards_icp, dec!(380));
        assert_eq!(agg.total_expected_rewards_xdr, dec!(3000));
        assert_eq!(agg.attainment_pct, dec!(90));
        assert_eq!(agg.avg_total_nodes, dec!(10));
        assert_eq!(agg.total_blocks_failed, 30);
    }

    #[test]
    fn test_summary_without_rate_for_latest_day() {
        let days = vec![totals(2, dec!(50), dec!(40), dec!(0))];
        let summary = summarize("prov-1", &days, &rates());
        let latest = summary.latest_period.unwrap();
        assert_eq!(latest.conversion_rate, None);
        assert_eq!(latest.expected_rewards_icp, Decimal::ZERO);
        assert_eq!(latest.last_rewards_icp, Decimal::ZERO);
        assert_eq!(latest.last_rewards_xdr, dec!(40));
    }

    #[test]
    fn test_summary_empty_window() {
        let summary = summarize("prov-1", &[], &rates());
        assert!(summary.latest_period.is_none());
        assert!(summary.historical.is_empty());
        assert_eq!(summary.aggregated.days_with_data, 0);
        assert_eq!(summary.aggregated.avg_failure_rate, Decimal::ZERO);
        assert_eq!(summary.aggregated.avg_total_nodes, Decimal::ZERO);
        assert_eq!(summary.aggregated.attainment_pct, Decimal::ZERO);
    }

    #[test]
    fn test_duplicate_day_counts_once() {
        let days = vec![
            totals(1, dec!(1000), dec!(900), dec!(0.01)),
            totals(2, dec!(1000), dec!(700), dec!(0.05)),
            totals(2, dec!(1000), dec!(1000), dec!(0.03)),
        ];
        let summary = summarize("prov-1", &days, &rates());

        assert_eq!(summary.historical.len(), 2);
        assert_eq!(summary.latest_period.unwrap().last_rewards_xdr, dec!(1000));

        let agg = summary.aggregated;
        assert_eq!(agg.days_with_data, 2);
        assert_eq!(agg.total_rewards_xdr, dec!(1900));
        assert_eq!(agg.total_expected_rewards_xdr, dec!(2000));
        assert_eq!(agg.avg_failure_rate, dec!(0.02));
        assert_eq!(agg.avg_total_nodes, dec!(10));
    }

    fn node_row(
        node: &str,
        provider: &str,
        d: u32,
        status: NodeStatus,
        base: Decimal,
        adjusted: Decimal,
        blocks: (i64, i64),
    ) -> RewardMetricRow {
        RewardMetricRow {
            node_id: node.into(),
            node_provider_id: provider.into(),
            day_utc: day(d),
            node_status: status,
            base_rewards: base,
            adjusted_rewards: adjusted,
            blocks_proposed: blocks.0,
            blocks_failed: blocks.1,
            failure_rate: Decimal::ZERO,
            relative_fr: Decimal::ZERO,
            rewards_reduction_pct: Decimal::ZERO,
            performance_multiplier: Decimal::ONE,
            subnet_id: None,
        }
    }

    #[test]
    fn test_daily_totals_from_node_rows() {
        let rows = vec![
            node_row("a", "prov-1", 2, NodeStatus::Assigned, dec!(100), dec!(90), (95, 5)),
            node_row("b", "prov-1", 2, NodeStatus::Unassigned, dec!(100), dec!(100), (0, 0)),
            node_row("a", "prov-1", 1, NodeStatus::Assigned, dec!(100), dec!(100), (50, 0)),
            node_row("c", "prov-2", 1, NodeStatus::Assigned, dec!(80), dec!(60), (0, 0)),
        ];
        let totals = daily_totals(&rows);

        let keys: Vec<(&str, NaiveDate)> = totals
            .iter()
            .map(|t| (t.node_provider_id.as_str(), t.day_utc))
            .collect();
        assert_eq!(keys, vec![("prov-1", day(1)), ("prov-1", day(2)), ("prov-2", day(1))]);

        let p1d2 = &totals[1];
        assert_eq!(p1d2.total_nodes, 2);
        assert_eq!(p1d2.assigned_nodes, 1);
        assert_eq!(p1d2.unassigned_nodes, 1);
        assert_eq!(p1d2.expected_rewards_xdr, dec!(200));
        assert_eq!(p1d2.actual_rewards_xdr, dec!(190));
        assert_eq!(p1d2.reduction_xdr, dec!(10));
        assert_eq!(p1d2.total_blocks_proposed, 95);
        assert_eq!(p1d2.total_blocks_failed, 5);
        assert_eq!(p1d2.total_failure_rate, dec!(5));

        // No blocks at all
        assert_eq!(totals[2].total_failure_rate, Decimal::ZERO);
        assert_eq!(totals[2].reduction_xdr, dec!(20));
    }

    #[test]
    fn test_daily_totals_empty() {
        assert!(daily_totals(&[]).is_empty());
    }
}
