//! Node rewards aggregation
//!
//! Joins daily node metrics with daily XDR → ICP rates. Conversion is
//! always per day (never one end-of-range rate), and a day without a rate
//! contributes 0 ICP while its XDR amounts still count.

use crate::rates::RateLookup;
use crate::types::{mean, percentage, ratio, NodeStatus, RewardMetricRow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Flat per-day table
// ---------------------------------------------------------------------------

/// One row of the per-day rewards table
#[derive(Debug, Clone, Serialize)]
pub struct NodeRewardDay {
    pub node_id: String,
    pub node_provider_id: String,
    pub day_utc: NaiveDate,
    pub node_status: NodeStatus,
    pub subnet_id: Option<String>,
    pub base_rewards_xdr: Decimal,
    pub adjusted_rewards_xdr: Decimal,
    pub conversion_rate: Option<Decimal>,
    pub adjusted_rewards_icp: Decimal,
    pub blocks_proposed: i64,
    pub blocks_failed: i64,
    pub daily_failure_rate: Decimal,
    pub relative_fr: Decimal,
    pub rewards_reduction_pct: Decimal,
    pub performance_multiplier: Decimal,
    pub attainment_pct: Decimal,
}

/// Per-day table in input order
pub fn daily_table<R: RateLookup + ?Sized>(rows: &[RewardMetricRow], rates: &R) -> Vec<NodeRewardDay> {
    rows.iter()
        .map(|row| NodeRewardDay {
            node_id: row.node_id.clone(),
            node_provider_id: row.node_provider_id.clone(),
            day_utc: row.day_utc,
            node_status: row.node_status,
            subnet_id: row.subnet_id.clone(),
            base_rewards_xdr: row.base_rewards,
            adjusted_rewards_xdr: row.adjusted_rewards,
            conversion_rate: rates.rate_on(row.day_utc),
            adjusted_rewards_icp: rates.to_icp(row.day_utc, row.adjusted_rewards),
            blocks_proposed: row.blocks_proposed,
            blocks_failed: row.blocks_failed,
            daily_failure_rate: row.failure_rate,
            relative_fr: row.relative_fr,
            rewards_reduction_pct: row.rewards_reduction_pct,
            performance_multiplier: row.performance_multiplier,
            attainment_pct: percentage(row.adjusted_rewards, row.base_rewards),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Per-node rollup
// ---------------------------------------------------------------------------

/// A node's rewards over a date range
#[derive(Debug, Clone, Serialize)]
pub struct NodeRewardRollup {
    pub node_id: String,
    pub node_provider_id: String,
    /// Number of contributing days
    pub days: usize,
    pub base_rewards_total: Decimal,
    pub base_rewards_icp_total: Decimal,
    pub adjusted_rewards_total: Decimal,
    pub adjusted_rewards_icp_total: Decimal,
    pub blocks_proposed_total: i64,
    pub blocks_failed_total: i64,
    /// blocks_failed_total / blocks_proposed_total
    pub failure_rate: Decimal,
    /// Unweighted mean across days
    pub relative_fr_avg: Decimal,
    pub rewards_reduction_avg: Decimal,
    /// `1 - rewards_reduction_avg / 100`, for display
    pub performance_multiplier: Decimal,
    pub latest_day: NaiveDate,
    pub latest_status: NodeStatus,
    pub latest_performance_multiplier: Decimal,
    pub attainment_pct: Decimal,
    #[serde(skip)]
    relative_fr_sum: Decimal,
    #[serde(skip)]
    rewards_reduction_sum: Decimal,
}

impl NodeRewardRollup {
    fn start(row: &RewardMetricRow) -> Self {
        Self {
            node_id: row.node_id.clone(),
            node_provider_id: row.node_provider_id.clone(),
            days: 0,
            base_rewards_total: Decimal::ZERO,
            base_rewards_icp_total: Decimal::ZERO,
            adjusted_rewards_total: Decimal::ZERO,
            adjusted_rewards_icp_total: Decimal::ZERO,
            blocks_proposed_total: 0,
            blocks_failed_total: 0,
            failure_rate: Decimal::ZERO,
            relative_fr_avg: Decimal::ZERO,
            rewards_reduction_avg: Decimal::ZERO,
            performance_multiplier: Decimal::ONE,
            latest_day: row.day_utc,
            latest_status: row.node_status,
            latest_performance_multiplier: row.performance_multiplier,
            attainment_pct: Decimal::ZERO,
            relative_fr_sum: Decimal::ZERO,
            rewards_reduction_sum: Decimal::ZERO,
        }
    }

    fn add<R: RateLookup + ?Sized>(&mut self, row: &RewardMetricRow, rates: &R) {
        self.days += 1;
        self.base_rewards_total += row.base_rewards;
        self.base_rewards_icp_total += rates.to_icp(row.day_utc, row.base_rewards);
        self.adjusted_rewards_total += row.adjusted_rewards;
        self.adjusted_rewards_icp_total += rates.to_icp(row.day_utc, row.adjusted_rewards);
        self.blocks_proposed_total += row.blocks_proposed;
        self.blocks_failed_total += row.blocks_failed;
        self.relative_fr_sum += row.relative_fr;
        self.rewards_reduction_sum += row.rewards_reduction_pct;

        // Ties on the day go to the row seen last
        if row.day_utc >= self.latest_day {
            self.latest_day = row.day_utc;
            self.latest_status = row.node_status;
            self.latest_performance_multiplier = row.performance_multiplier;
        }
    }

    fn finish(&mut self) {
        self.relative_fr_avg = mean(self.relative_fr_sum, self.days);
        self.rewards_reduction_avg = mean(self.rewards_reduction_sum, self.days);
        self.performance_multiplier =
            Decimal::ONE - self.rewards_reduction_avg / Decimal::ONE_HUNDRED;
        self.failure_rate = ratio(
            Decimal::from(self.blocks_failed_total),
            Decimal::from(self.blocks_proposed_total),
        );
        self.attainment_pct = percentage(self.adjusted_rewards_total, self.base_rewards_total);
    }
}

/// Rollups keyed by node id, iterated in order of first appearance
#[derive(Debug, Clone, Default)]
pub struct NodeRollups {
    rollups: Vec<NodeRewardRollup>,
    index: HashMap<String, usize>,
}

impl NodeRollups {
    pub fn get(&self, node_id: &str) -> Option<&NodeRewardRollup> {
        self.index.get(node_id).map(|&i| &self.rollups[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRewardRollup> {
        self.rollups.iter()
    }

    pub fn len(&self) -> usize {
        self.rollups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rollups.is_empty()
    }

    pub fn into_vec(self) -> Vec<NodeRewardRollup> {
        self.rollups
    }
}

impl Serialize for NodeRollups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rollups.len()))?;
        for rollup in &self.rollups {
            map.serialize_entry(&rollup.node_id, rollup)?;
        }
        map.end()
    }
}

/// Group rows by node and aggregate each group
pub fn rollup_by_node<R: RateLookup + ?Sized>(rows: &[RewardMetricRow], rates: &R) -> NodeRollups {
    let mut out = NodeRollups::default();

    for row in rows {
        let slot = match out.index.get(&row.node_id) {
            Some(&i) => i,
            None => {
                out.index.insert(row.node_id.clone(), out.rollups.len());
                out.rollups.push(NodeRewardRollup::start(row));
                out.rollups.len() - 1
            }
        };
        out.rollups[slot].add(row, rates);
    }

    for rollup in &mut out.rollups {
        rollup.finish();
    }

    debug!(rows = rows.len(), nodes = out.len(), "Rolled up node rewards");
    out
}

// ---------------------------------------------------------------------------
// Single-node summary
// ---------------------------------------------------------------------------

/// Date span actually covered by a node's rows
#[derive(Debug, Clone, Serialize)]
pub struct RewardPeriod {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_days: usize,
}

/// Headline numbers for one node over a range
#[derive(Debug, Clone, Serialize)]
pub struct NodeRewardSummary {
    pub days_assigned: usize,
    pub days_unassigned: usize,
    pub avg_reward_multiplier: Decimal,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    /// Mean of the daily failure rates
    pub avg_failure_rate: Decimal,
    /// Largest daily base reward in the range
    pub base_monthly_rewards_xdr: Decimal,
    pub total_rewards_xdr: Decimal,
    /// total_rewards_xdr / base_monthly_rewards_xdr * 100
    pub attainment_pct: Decimal,
    pub period: RewardPeriod,
}

/// Summarize one node's rows (any order)
pub fn summarize_node(rows: &[RewardMetricRow]) -> NodeRewardSummary {
    let days_assigned = rows
        .iter()
        .filter(|r| r.node_status == NodeStatus::Assigned)
        .count();
    let multiplier_sum: Decimal = rows.iter().map(|r| r.performance_multiplier).sum();
    let failure_rate_sum: Decimal = rows.iter().map(|r| r.failure_rate).sum();
    let base_max = rows
        .iter()
        .map(|r| r.base_rewards)
        .max()
        .unwrap_or(Decimal::ZERO);
    let total_rewards_xdr: Decimal = rows.iter().map(|r| r.adjusted_rewards).sum();

    NodeRewardSummary {
        days_assigned,
        days_unassigned: rows.len() - days_assigned,
        avg_reward_multiplier: mean(multiplier_sum, rows.len()),
        total_blocks_proposed: rows.iter().map(|r| r.blocks_proposed).sum(),
        total_blocks_failed: rows.iter().map(|r| r.blocks_failed).sum(),
        avg_failure_rate: mean(failure_rate_sum, rows.len()),
        base_monthly_rewards_xdr: base_max,
        total_rewards_xdr,
        attainment_pct: percentage(total_rewards_xdr, base_max),
        period: RewardPeriod {
            start_date: rows.iter().map(|r| r.day_utc).min(),
            end_date: rows.iter().map(|r| r.day_utc).max(),
            total_days: rows.len(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{FlatRate, RateTable};
    use crate::types::ConversionRate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn row(node: &str, d: u32, base: Decimal, adjusted: Decimal) -> RewardMetricRow {
        RewardMetricRow {
            node_id: node.to_string(),
            node_provider_id: "prov-1".to_string(),
            day_utc: day(d),
            node_status: NodeStatus::Assigned,
            base_rewards: base,
            adjusted_rewards: adjusted,
            blocks_proposed: 100,
            blocks_failed: 2,
            failure_rate: dec!(0.02),
            relative_fr: Decimal::ZERO,
            rewards_reduction_pct: Decimal::ZERO,
            performance_multiplier: Decimal::ONE,
            subnet_id: Some("subnet-x".to_string()),
        }
    }

    fn rate(d: u32, r: Option<Decimal>) -> ConversionRate {
        ConversionRate {
            day_utc: day(d),
            xdr_to_icp: r,
            xdr_to_usd: None,
            icp_to_usd: None,
            source: None,
        }
    }

    #[test]
    fn test_rollup_flat_rate() {
        let rows = vec![row("A", 1, dec!(100), dec!(100)), row("A", 2, dec!(200), dec!(200))];
        let rollups = rollup_by_node(&rows, &FlatRate(dec!(2)));

        let a = rollups.get("A").unwrap();
        assert_eq!(a.days, 2);
        assert_eq!(a.adjusted_rewards_total, dec!(300));
        assert_eq!(a.adjusted_rewards_icp_total, dec!(600));
        assert_eq!(a.attainment_pct, dec!(100));
    }

    #[test]
    fn test_rollup_missing_rate_day_contributes_zero_icp() {
        let rows = vec![row("A", 1, dec!(100), dec!(100)), row("A", 2, dec!(200), dec!(200))];
        let rates = RateTable::new(vec![rate(1, Some(dec!(2)))]);
        let a = rollup_by_node(&rows, &rates).into_vec().remove(0);

        assert_eq!(a.adjusted_rewards_total, dec!(300));
        assert_eq!(a.adjusted_rewards_icp_total, dec!(200));
        assert_eq!(a.base_rewards_icp_total, dec!(200));
    }

    #[test]
    fn test_rollup_empty() {
        let rollups = rollup_by_node(&[], &FlatRate(dec!(2)));
        assert!(rollups.is_empty());
        assert_eq!(serde_json::to_string(&rollups).unwrap(), "{}");
    }

    #[test]
    fn test_rollup_zero_base_has_zero_attainment() {
        let mut r = row("A", 1, Decimal::ZERO, Decimal::ZERO);
        r.blocks_proposed = 0;
        r.blocks_failed = 0;
        let a = rollup_by_node(&[r], &FlatRate(dec!(1))).into_vec().remove(0);
        assert_eq!(a.attainment_pct, Decimal::ZERO);
        assert_eq!(a.failure_rate, Decimal::ZERO);
    }

    #[test]
    fn test_rollup_averages_and_latest() {
        let mut d1 = row("A", 1, dec!(10), dec!(9));
        d1.relative_fr = dec!(0.10);
        d1.rewards_reduction_pct = dec!(10);
        d1.performance_multiplier = dec!(0.9);

        let mut d3 = row("A", 3, dec!(10), dec!(7));
        d3.relative_fr = dec!(0.30);
        d3.rewards_reduction_pct = dec!(30);
        d3.performance_multiplier = dec!(0.7);
        d3.node_status = NodeStatus::Unassigned;

        let mut d2 = row("A", 2, dec!(10), dec!(8));
        d2.relative_fr = dec!(0.20);
        d2.rewards_reduction_pct = dec!(20);
        d2.performance_multiplier = dec!(0.8);

        // Out of order on purpose: the latest day wins, not the last row
        let a = rollup_by_node(&[d1, d3, d2], &FlatRate(Decimal::ONE))
            .into_vec()
            .remove(0);

        assert_eq!(a.relative_fr_avg, dec!(0.2));
        assert_eq!(a.rewards_reduction_avg, dec!(20));
        assert_eq!(a.performance_multiplier, dec!(0.8));
        assert_eq!(a.latest_day, day(3));
        assert_eq!(a.latest_status, NodeStatus::Unassigned);
        assert_eq!(a.latest_performance_multiplier, dec!(0.7));
    }

    #[test]
    fn test_rollup_same_day_tie_goes_to_last_row() {
        let mut first = row("A", 5, dec!(1), dec!(1));
        first.performance_multiplier = dec!(0.5);
        let mut second = row("A", 5, dec!(1), dec!(1));
        second.performance_multiplier = dec!(0.6);

        let a = rollup_by_node(&[first, second], &FlatRate(Decimal::ONE))
            .into_vec()
            .remove(0);
        assert_eq!(a.latest_performance_multiplier, dec!(0.6));
    }

    #[test]
    fn test_rollup_keeps_first_occurrence_order_and_sums() {
        let rows = vec![
            row("B", 1, dec!(10), dec!(5)),
            row("A", 1, dec!(10), dec!(6)),
            row("B", 2, dec!(10), dec!(7)),
            row("C", 2, dec!(10), dec!(8)),
        ];
        let rollups = rollup_by_node(&rows, &FlatRate(dec!(3)));
        let order: Vec<&str> = rollups.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);

        for rollup in rollups.iter() {
            let expected: Decimal = rows
                .iter()
                .filter(|r| r.node_id == rollup.node_id)
                .map(|r| r.adjusted_rewards)
                .sum();
            assert_eq!(rollup.adjusted_rewards_total, expected);
        }

        let json = serde_json::to_value(&rollups).unwrap();
        assert_eq!(json["B"]["adjusted_rewards_total"], "12");
        assert!(json["B"].get("relative_fr_sum").is_none());
    }

    #[test]
    fn test_daily_table() {
        let rows = vec![row("A", 1, dec!(100), dec!(90)), row("A", 2, dec!(0), dec!(0))];
        let rates = RateTable::new(vec![rate(1, Some(dec!(0.5)))]);
        let table = daily_table(&rows, &rates);

        assert_eq!(table[0].conversion_rate, Some(dec!(0.5)));
        assert_eq!(table[0].adjusted_rewards_icp, dec!(45));
        assert_eq!(table[0].attainment_pct, dec!(90));
        assert_eq!(table[1].conversion_rate, None);
        assert_eq!(table[1].adjusted_rewards_icp, Decimal::ZERO);
        assert_eq!(table[1].attainment_pct, Decimal::ZERO);
    }

    #[test]
    fn test_summarize_node() {
        let mut d1 = row("A", 1, dec!(100), dec!(50));
        d1.node_status = NodeStatus::Unassigned;
        d1.failure_rate = dec!(0.1);
        d1.performance_multiplier = dec!(0.5);
        let d2 = row("A", 4, dec!(120), dec!(70));

        let summary = summarize_node(&[d2, d1]);
        assert_eq!(summary.days_assigned, 1);
        assert_eq!(summary.days_unassigned, 1);
        assert_eq!(summary.avg_reward_multiplier, dec!(0.75));
        assert_eq!(summary.avg_failure_rate, dec!(0.06));
        assert_eq!(summary.base_monthly_rewards_xdr, dec!(120));
        assert_eq!(summary.total_rewards_xdr, dec!(120));
        assert_eq!(summary.attainment_pct, dec!(100));
        assert_eq!(summary.total_blocks_proposed, 200);
        assert_eq!(summary.period.start_date, Some(day(1)));
        assert_eq!(summary.period.end_date, Some(day(4)));
    }

    #[test]
    fn test_summarize_node_empty() {
        let summary = summarize_node(&[]);
        assert_eq!(summary.days_assigned, 0);
        assert_eq!(summary.avg_failure_rate, Decimal::ZERO);
        assert_eq!(summary.attainment_pct, Decimal::ZERO);
        assert_eq!(summary.period.start_date, None);
    }
}
