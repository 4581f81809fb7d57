//! Database schema definitions

/// SQL to create all tables
/// NOTE: decimals are stored as TEXT to preserve rust_decimal::Decimal precision,
/// rewards as integer permyriad (XDR * 10_000), days as 'YYYY-MM-DD'.
pub const CREATE_TABLES: &str = r#"
-- Monitored nodes (one row per node, keyed by the registry node id)
CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    node_provider_id TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    dc_id TEXT,
    region TEXT,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Raw ping measurements
CREATE TABLE IF NOT EXISTS ping_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL,
    avg_rtt TEXT,
    packets_sent INTEGER NOT NULL DEFAULT 0,
    packets_received INTEGER NOT NULL DEFAULT 0,
    packet_loss TEXT NOT NULL DEFAULT '0',
    probe_name TEXT,
    ping_at_ms INTEGER NOT NULL
);

-- Daily per-node reward metrics
CREATE TABLE IF NOT EXISTS node_reward_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    node_provider_id TEXT NOT NULL,
    day_utc TEXT NOT NULL,
    node_status TEXT,
    subnet_assigned TEXT,
    performance_multiplier TEXT,
    rewards_reduction TEXT,
    base_rewards_xdr_permyriad INTEGER,
    adjusted_rewards_xdr_permyriad INTEGER,
    num_blocks_proposed INTEGER,
    num_blocks_failed INTEGER,
    relative_fr TEXT,
    UNIQUE(node_id, day_utc)
);

-- Daily per-provider totals
CREATE TABLE IF NOT EXISTS node_provider_daily_summary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_provider_id TEXT NOT NULL,
    day_utc TEXT NOT NULL,
    total_nodes INTEGER,
    assigned_nodes INTEGER,
    unassigned_nodes INTEGER,
    expected_rewards_xdr_permyriad INTEGER,
    actual_rewards_xdr_permyriad INTEGER,
    total_reduction_xdr_permyriad INTEGER,
    total_blocks_proposed INTEGER,
    total_blocks_failed INTEGER,
    total_failure_rate TEXT,
    UNIQUE(node_provider_id, day_utc)
);

-- Daily XDR/ICP exchange rates
CREATE TABLE IF NOT EXISTS xdr_icp_conversion_rates (
    day_utc TEXT PRIMARY KEY,
    xdr_to_usd TEXT,
    icp_to_usd TEXT,
    xdr_to_icp TEXT,
    source TEXT
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_nodes_provider ON nodes(node_provider_id);
CREATE INDEX IF NOT EXISTS idx_ping_ip_time ON ping_results(ip_address, ping_at_ms);
CREATE INDEX IF NOT EXISTS idx_ping_time ON ping_results(ping_at_ms);
CREATE INDEX IF NOT EXISTS idx_reward_node_day ON node_reward_metrics(node_id, day_utc);
CREATE INDEX IF NOT EXISTS idx_reward_provider_day ON node_reward_metrics(node_provider_id, day_utc);
CREATE INDEX IF NOT EXISTS idx_provider_summary_day ON node_provider_daily_summary(node_provider_id, day_utc)
"#;
