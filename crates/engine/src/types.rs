//! Typed rows consumed by the aggregation pipelines

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reachability of an entity at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn from_up(is_up: bool) -> Self {
        if is_up {
            Self::Up
        } else {
            Self::Down
        }
    }
}

/// One status observation for an entity (e.g. one ping of an IP address)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSample {
    pub entity_key: String,
    pub at: DateTime<Utc>,
    pub is_up: bool,
}

impl StatusSample {
    pub fn new(entity_key: impl Into<String>, at: DateTime<Utc>, is_up: bool) -> Self {
        Self {
            entity_key: entity_key.into(),
            at,
            is_up,
        }
    }

    /// A ping counts as up only when no packet was lost
    pub fn from_packet_loss(entity_key: impl Into<String>, at: DateTime<Utc>, packet_loss: Decimal) -> Self {
        Self::new(entity_key, at, packet_loss.is_zero())
    }
}

/// Registry state of a node on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Assigned,
    Unassigned,
}

impl NodeStatus {
    /// Anything other than "Assigned" (including a missing value) is Unassigned
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("assigned") => Self::Assigned,
            _ => Self::Unassigned,
        }
    }
}

/// One node's metrics for one day. Amounts are in XDR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardMetricRow {
    pub node_id: String,
    pub node_provider_id: String,
    pub day_utc: NaiveDate,
    pub node_status: NodeStatus,
    pub base_rewards: Decimal,
    pub adjusted_rewards: Decimal,
    pub blocks_proposed: i64,
    pub blocks_failed: i64,
    /// blocks_failed / blocks_proposed, 0 when nothing was proposed
    pub failure_rate: Decimal,
    pub relative_fr: Decimal,
    /// Percentage, 0..=100
    pub rewards_reduction_pct: Decimal,
    pub performance_multiplier: Decimal,
    pub subnet_id: Option<String>,
}

/// One provider's totals for one day. Amounts are in XDR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDayTotals {
    pub node_provider_id: String,
    pub day_utc: NaiveDate,
    pub total_nodes: i64,
    pub assigned_nodes: i64,
    pub unassigned_nodes: i64,
    pub expected_rewards_xdr: Decimal,
    pub actual_rewards_xdr: Decimal,
    pub reduction_xdr: Decimal,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    pub total_failure_rate: Decimal,
}

/// Exchange rates for one day. `xdr_to_icp` is `None` when no rate is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRate {
    pub day_utc: NaiveDate,
    pub xdr_to_icp: Option<Decimal>,
    pub xdr_to_usd: Option<Decimal>,
    pub icp_to_usd: Option<Decimal>,
    pub source: Option<String>,
}

/// Zero-safe division: a zero denominator yields zero
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Zero-safe percentage (`part / whole * 100`)
pub fn percentage(part: Decimal, whole: Decimal) -> Decimal {
    ratio(part, whole) * Decimal::ONE_HUNDRED
}

/// Zero-safe arithmetic mean of a sum over `count` items
pub fn mean(sum: Decimal, count: usize) -> Decimal {
    ratio(sum, Decimal::from(count))
}
