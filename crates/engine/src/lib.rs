//! Node Monitor Engine: uptime reconstruction and reward aggregation
//!
//! Pure computations over rows loaded by `persistence`.
//! Provides:
//! - Status-interval reconstruction from ping samples
//! - Per-node daily reward tables and multi-day rollups
//! - Per-provider daily totals derived from node rows
//! - Per-provider reward summaries with distinct-day aggregates
//! - Page/limit pagination helpers

pub mod error;
pub mod pagination;
pub mod provider;
pub mod rates;
pub mod records;
pub mod rewards;
pub mod types;
pub mod uptime;

// Re-exports for convenience
pub use error::{EngineError, EngineResult};
pub use pagination::{paginate, Page, PageInfo, PageRequest};
pub use provider::{
    daily_totals, summarize as summarize_provider, LatestPeriod, ProviderAggregates, ProviderHistoryPoint,
    ProviderRewardSummary,
};
pub use rates::{FlatRate, RateLookup, RateTable};
pub use records::convert_all;
pub use rewards::{
    daily_table, rollup_by_node, summarize_node, NodeRewardDay, NodeRewardRollup,
    NodeRewardSummary, NodeRollups, RewardPeriod,
};
pub use types::*;
pub use uptime::{reconstruct, uptime_summary, StatusInterval, TimeInStatus, UptimeSummary};
