//! Node-Monitor, uptime and rewards aggregation service for IC nodes
//!
//! Usage:
//!   node-monitor serve --port 3001                : Launch the JSON API
//!   node-monitor import --file data.json          : Load nodes, pings, metrics and rates
//!   node-monitor report --provider <id> --days 30 : Print a provider rewards report
//!   node-monitor cleanup --retention-days 90      : Drop old ping results

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use engine::records::parse_day;
use engine::{
    convert_all, daily_table, daily_totals, paginate, reconstruct, rollup_by_node, summarize_node,
    summarize_provider, uptime_summary, ConversionRate, NodeRewardRollup, Page, PageRequest,
    ProviderDayTotals, ProviderRewardSummary, RateTable, RewardMetricRow, StatusSample,
    TimeInStatus,
};
use persistence::repository::{
    ConversionRateRecord, ConversionRateRepository, NodeRecord, NodeRepository,
    ProviderPacketTotals,
    NodeRewardMetricRecord, PingRepository, PingResultRecord, ProviderDailySummaryRecord,
    RewardsRepository,
};
use persistence::{Database, DbResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const DEFAULT_DB_PATH: &str = "data/node_monitor.db";
const DEFAULT_WINDOW_HOURS: i64 = 24;
const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 3650;
const MAX_WINDOW_HOURS: i64 = MAX_WINDOW_DAYS * 24;
const PERFORMANCE_PAGE_LIMIT: i64 = 50;

#[derive(Parser)]
#[command(name = "node-monitor")]
#[command(about = "Uptime and rewards aggregation for IC nodes", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the JSON API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Import nodes, pings, reward metrics, provider summaries and rates from a JSON file
    Import {
        /// Path to the JSON document
        #[arg(long)]
        file: String,
    },
    /// Print a provider rewards report (no web server)
    Report {
        /// Node provider principal
        #[arg(long)]
        provider: String,
        /// Number of trailing days to include
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Number of nodes to list
        #[arg(long, default_value_t = 10)]
        top_n: usize,
    },
    /// Delete ping results older than the retention window, then VACUUM
    Cleanup {
        /// Days of ping history to keep
        #[arg(long, default_value_t = 90)]
        retention_days: i64,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,node_monitor=debug")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,node_monitor=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("NODE_MONITOR_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

async fn open_database(path: &str) -> anyhow::Result<Database> {
    Database::new(path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Import { file } => {
            cmd_import(&file).await?;
        }
        Commands::Report {
            provider,
            days,
            top_n,
        } => {
            cmd_report(&provider, days, top_n).await?;
        }
        Commands::Cleanup { retention_days } => {
            cmd_cleanup(retention_days).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/nodes", get(api_nodes))
        .route("/nodes/:node_id/uptime-changes", get(api_node_uptime_changes))
        .route("/nodes/:node_id/uptime", get(api_node_uptime))
        .route("/nodes/:node_id/rewards", get(api_node_rewards))
        .route("/providers", get(api_providers))
        .route("/providers/:provider_id/rewards", get(api_provider_rewards))
        .route(
            "/providers/:provider_id/nodes-performance",
            get(api_provider_nodes_performance),
        )
        .route("/providers/:provider_id/node-rollups", get(api_provider_node_rollups))
        .route("/conversion-rates", get(api_conversion_rates))
        .route("/pings", post(api_ingest_pings))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Node-Monitor v{} starting...", APP_VERSION);

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    info!("Database initialized: {}", db_path);

    let app = build_router(AppState { db: Arc::new(db) });

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Node-Monitor v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                                   - Health check");
    println!("  GET  /api/nodes                                    - Nodes (paginated)");
    println!("  GET  /api/nodes/:id/uptime-changes                 - Up/down intervals");
    println!("  GET  /api/nodes/:id/uptime                         - Uptime percentage");
    println!("  GET  /api/nodes/:id/rewards                        - Daily rewards + summary");
    println!("  GET  /api/providers                                - Providers with uptime (paginated)");
    println!("  GET  /api/providers/:id/rewards                    - Provider rewards summary");
    println!("  GET  /api/providers/:id/nodes-performance          - Daily node table (paginated)");
    println!("  GET  /api/providers/:id/node-rollups               - Per-node rollups (paginated)");
    println!("  GET  /api/conversion-rates                         - XDR/ICP rates");
    println!("  POST /api/pings                                    - Ingest ping results");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request helpers
// ============================================================================

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(body: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
        })),
    )
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> ApiResponse {
    error!(error = %e, "{}", context);
    fail(StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, e))
}

fn param_i64(params: &HashMap<String, String>, key: &str) -> Option<i64> {
    params.get(key).and_then(|s| s.trim().parse().ok())
}

fn positive_or(value: Option<i64>, default: i64) -> i64 {
    value.filter(|v| *v > 0).unwrap_or(default)
}

/// Window length from `key`. Absent, unparseable or non-positive values
/// fall back to `default`; values above `max` are rejected.
fn window_length(
    params: &HashMap<String, String>,
    key: &str,
    default: i64,
    max: i64,
) -> Result<i64, String> {
    let value = positive_or(param_i64(params, key), default);
    if value > max {
        return Err(format!("{} must be between 1 and {}", key, max));
    }
    Ok(value)
}

fn days_before(day: NaiveDate, days: i64) -> Result<NaiveDate, String> {
    Duration::try_days(days)
        .and_then(|span| day.checked_sub_signed(span))
        .ok_or_else(|| format!("{} days before {} is out of range", days, day))
}

fn instant_before(now: DateTime<Utc>, span: Option<Duration>) -> Result<DateTime<Utc>, String> {
    span.and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| "window start is out of range".to_string())
}

fn page_request(params: &HashMap<String, String>, default_limit: i64) -> PageRequest {
    PageRequest::from_query(param_i64(params, "page"), param_i64(params, "limit"), default_limit)
}

/// Explicit `start_date`/`end_date` when both are given, otherwise the
/// trailing `days` ending today
fn resolve_range(
    params: &HashMap<String, String>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), String> {
    match (params.get("start_date"), params.get("end_date")) {
        (Some(start), Some(end)) => {
            let start = parse_day(start).map_err(|e| e.to_string())?;
            let end = parse_day(end).map_err(|e| e.to_string())?;
            if start > end {
                return Err(format!("start_date {} is after end_date {}", start, end));
            }
            Ok((start, end))
        }
        (None, None) => {
            let days = window_length(params, "days", DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS)?;
            Ok((days_before(today, days)?, today))
        }
        _ => Err("start_date and end_date must be given together".to_string()),
    }
}

async fn load_rates(db: &Database, start: NaiveDate) -> DbResult<RateTable> {
    let records = ConversionRateRepository::new(db.pool())
        .get_since(&start.to_string())
        .await?;
    let rates: Vec<ConversionRate> = convert_all(&records);
    Ok(RateTable::new(rates))
}

async fn find_node(db: &Database, node_id: &str) -> Result<NodeRecord, ApiResponse> {
    match NodeRepository::new(db.pool()).get_by_id(node_id).await {
        Ok(Some(node)) => Ok(node),
        Ok(None) => Err(fail(
            StatusCode::NOT_FOUND,
            format!("Node {} not found", node_id),
        )),
        Err(e) => Err(storage_error("Failed to load node", e)),
    }
}

// ============================================================================
// API Handlers: Health & Nodes
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "node-monitor",
        "version": APP_VERSION,
    }))
}

/// GET /api/nodes: paginated node registry, optionally for one provider
async fn api_nodes(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let request = page_request(&params, engine::pagination::DEFAULT_LIMIT);
    let provider = params.get("node_provider_id").map(|s| s.as_str());

    let repo = NodeRepository::new(state.db.pool());
    match repo
        .list_paginated(provider, request.limit, request.offset())
        .await
    {
        Ok((nodes, total)) => {
            let page = Page::from_parts(nodes, request, total);
            ok(serde_json::json!({
                "success": true,
                "data": page.data,
                "pagination": page.pagination,
            }))
        }
        Err(e) => storage_error("Failed to query nodes", e),
    }
}

/// Provider list row: packet totals plus the uptime they give
fn provider_uptime_entry(totals: ProviderPacketTotals, days: i64) -> serde_json::Value {
    let uptime = uptime_summary(totals.packets_sent, totals.packets_received);
    serde_json::json!({
        "node_provider_id": totals.node_provider_id,
        "total_nodes": totals.total_nodes,
        "latest_ping_at_ms": totals.latest_ping_at_ms,
        "packets_sent": totals.packets_sent,
        "packets_received": totals.packets_received,
        "days": days,
        "uptime_pct": uptime.uptime_pct,
    })
}

/// GET /api/providers: paginated providers with uptime over the trailing `days`
async fn api_providers(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let window = window_length(&params, "days", DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS)
        .and_then(|days| Ok((days, instant_before(Utc::now(), Duration::try_days(days))?)));
    let (days, since) = match window {
        Ok(window) => window,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };
    let request = page_request(&params, engine::pagination::DEFAULT_LIMIT);

    let repo = NodeRepository::new(state.db.pool());
    match repo
        .provider_packet_totals_page(since.timestamp_millis(), request.limit, request.offset())
        .await
    {
        Ok((rows, total)) => {
            let page = Page::from_parts(rows, request, total).map(|t| provider_uptime_entry(t, days));
            ok(serde_json::json!({
                "success": true,
                "data": page.data,
                "pagination": page.pagination,
            }))
        }
        Err(e) => storage_error("Failed to query providers", e),
    }
}

// ============================================================================
// API Handlers: Uptime
// ============================================================================

/// GET /api/nodes/:node_id/uptime-changes: up/down intervals, most recent first
async fn api_node_uptime_changes(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let node = match find_node(&state.db, &node_id).await {
        Ok(node) => node,
        Err(response) => return response,
    };

    let now = Utc::now();
    let window = window_length(&params, "hours", DEFAULT_WINDOW_HOURS, MAX_WINDOW_HOURS)
        .and_then(|hours| Ok((hours, instant_before(now, Duration::try_hours(hours))?)));
    let (hours, window_start) = match window {
        Ok(window) => window,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };

    let repo = PingRepository::new(state.db.pool());
    let records = match repo
        .get_since(&node.ip_address, window_start.timestamp_millis())
        .await
    {
        Ok(records) => records,
        Err(e) => return storage_error("Failed to query ping results", e),
    };

    let samples: Vec<StatusSample> = convert_all(&records);
    let intervals = reconstruct(&samples, window_start, now);
    let time_in_status = TimeInStatus::from_intervals(&intervals);

    ok(serde_json::json!({
        "success": true,
        "node_id": node.node_id,
        "ip_address": node.ip_address,
        "hours": hours,
        "current_status": intervals.first().map(|i| i.status),
        "changes": intervals,
        "time_in_status": time_in_status,
    }))
}

/// GET /api/nodes/:node_id/uptime: uptime percentage from packet counters
async fn api_node_uptime(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let node = match find_node(&state.db, &node_id).await {
        Ok(node) => node,
        Err(response) => return response,
    };

    let window = window_length(&params, "hours", DEFAULT_WINDOW_HOURS, MAX_WINDOW_HOURS)
        .and_then(|hours| Ok((hours, instant_before(Utc::now(), Duration::try_hours(hours))?)));
    let (hours, since_ms) = match window {
        Ok((hours, since)) => (hours, since.timestamp_millis()),
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };

    let repo = PingRepository::new(state.db.pool());
    match repo.packet_totals_since(&node.ip_address, since_ms).await {
        Ok(totals) => {
            let summary = uptime_summary(totals.packets_sent, totals.packets_received);
            ok(serde_json::json!({
                "success": true,
                "node_id": node.node_id,
                "hours": hours,
                "packets_sent": totals.packets_sent,
                "packets_received": totals.packets_received,
                "uptime_pct": summary.uptime_pct,
                "downtime_pct": summary.downtime_pct,
            }))
        }
        Err(e) => storage_error("Failed to query packet totals", e),
    }
}

// ============================================================================
// API Handlers: Rewards
// ============================================================================

/// GET /api/nodes/:node_id/rewards: per-day table and summary for one node
async fn api_node_rewards(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let (start, end) = match resolve_range(&params, Utc::now().date_naive()) {
        Ok(range) => range,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };

    let repo = RewardsRepository::new(state.db.pool());
    let (start_day, end_day) = (start.to_string(), end.to_string());
    let fetched = tokio::try_join!(
        repo.get_node_metrics(&node_id, &start_day, &end_day),
        load_rates(&state.db, start),
    );
    let (records, rates) = match fetched {
        Ok(fetched) => fetched,
        Err(e) => return storage_error("Failed to query node rewards", e),
    };

    let rows: Vec<RewardMetricRow> = convert_all(&records);
    ok(serde_json::json!({
        "success": true,
        "node_id": node_id,
        "summary": summarize_node(&rows),
        "daily": daily_table(&rows, &rates),
    }))
}

/// GET /api/providers/:provider_id/rewards: latest period, history and aggregates
async fn api_provider_rewards(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let window = window_length(&params, "days", DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS)
        .and_then(|days| Ok((days, days_before(Utc::now().date_naive(), days)?)));
    let (days, start) = match window {
        Ok(window) => window,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };
    let request = page_request(&params, engine::pagination::DEFAULT_LIMIT);

    let repo = RewardsRepository::new(state.db.pool());
    let start_day = start.to_string();
    let fetched = tokio::try_join!(
        repo.get_provider_summaries(&provider_id, &start_day),
        load_rates(&state.db, start),
    );
    let (records, rates) = match fetched {
        Ok(fetched) => fetched,
        Err(e) => return storage_error("Failed to query provider rewards", e),
    };

    let totals: Vec<ProviderDayTotals> = convert_all(&records);
    let summary = summarize_provider(&provider_id, &totals, &rates);
    let history = paginate(&summary.historical, request);

    ok(serde_json::json!({
        "success": true,
        "provider_id": summary.provider_id,
        "days": days,
        "latest_period": summary.latest_period,
        "aggregated": summary.aggregated,
        "historical": history.data,
        "pagination": history.pagination,
    }))
}

/// GET /api/providers/:provider_id/nodes-performance: paginated per-day node table
async fn api_provider_nodes_performance(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    if !(params.contains_key("start_date") && params.contains_key("end_date")) {
        return fail(
            StatusCode::BAD_REQUEST,
            "start_date and end_date are required",
        );
    }
    let (start, end) = match resolve_range(&params, Utc::now().date_naive()) {
        Ok(range) => range,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };
    let request = page_request(&params, PERFORMANCE_PAGE_LIMIT);

    let repo = RewardsRepository::new(state.db.pool());
    let (start_day, end_day) = (start.to_string(), end.to_string());
    let fetched = tokio::try_join!(
        repo.get_provider_metrics_page(
            &provider_id,
            &start_day,
            &end_day,
            request.limit,
            request.offset(),
        ),
        load_rates(&state.db, start),
    );
    let ((records, total), rates) = match fetched {
        Ok(fetched) => fetched,
        Err(e) => return storage_error("Failed to query node performance", e),
    };

    let rows: Vec<RewardMetricRow> = convert_all(&records);
    let page = Page::from_parts(daily_table(&rows, &rates), request, total);

    ok(serde_json::json!({
        "success": true,
        "provider_id": provider_id,
        "start_date": start,
        "end_date": end,
        "data": page.data,
        "pagination": page.pagination,
    }))
}

/// GET /api/providers/:provider_id/node-rollups: per-node totals over a range
async fn api_provider_node_rollups(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let (start, end) = match resolve_range(&params, Utc::now().date_naive()) {
        Ok(range) => range,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };
    let request = page_request(&params, engine::pagination::DEFAULT_LIMIT);

    let repo = RewardsRepository::new(state.db.pool());
    let (start_day, end_day) = (start.to_string(), end.to_string());
    let fetched = tokio::try_join!(
        repo.get_provider_metrics(&provider_id, &start_day, &end_day),
        load_rates(&state.db, start),
    );
    let (records, rates) = match fetched {
        Ok(fetched) => fetched,
        Err(e) => return storage_error("Failed to query node rollups", e),
    };

    let rows: Vec<RewardMetricRow> = convert_all(&records);
    let rollups = rollup_by_node(&rows, &rates).into_vec();
    let page = paginate(&rollups, request);

    ok(serde_json::json!({
        "success": true,
        "provider_id": provider_id,
        "start_date": start,
        "end_date": end,
        "data": page.data,
        "pagination": page.pagination,
    }))
}

/// GET /api/conversion-rates: one day (`date`) or the trailing `days`, most recent first
async fn api_conversion_rates(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let repo = ConversionRateRepository::new(state.db.pool());

    if let Some(date) = params.get("date") {
        let day = match parse_day(date) {
            Ok(day) => day,
            Err(e) => return fail(StatusCode::BAD_REQUEST, e.to_string()),
        };
        return match repo.get_by_day(&day.to_string()).await {
            Ok(Some(record)) => {
                let rates: Vec<ConversionRate> = convert_all(std::slice::from_ref(&record));
                match rates.into_iter().next() {
                    Some(rate) => ok(serde_json::json!({ "success": true, "data": rate })),
                    None => fail(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Stored rate for {} is malformed", day),
                    ),
                }
            }
            Ok(None) => fail(
                StatusCode::NOT_FOUND,
                format!("No conversion rate for {}", day),
            ),
            Err(e) => storage_error("Failed to query conversion rate", e),
        };
    }

    let window = window_length(&params, "days", DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS)
        .and_then(|days| days_before(Utc::now().date_naive(), days));
    let start = match window {
        Ok(start) => start,
        Err(message) => return fail(StatusCode::BAD_REQUEST, message),
    };
    match repo.get_since(&start.to_string()).await {
        Ok(records) => {
            let rates: Vec<ConversionRate> = convert_all(&records);
            ok(serde_json::json!({
                "success": true,
                "latest": rates.first(),
                "data": rates,
                "total": rates.len(),
            }))
        }
        Err(e) => storage_error("Failed to query conversion rates", e),
    }
}

// ============================================================================
// API Handlers: Ping ingestion
// ============================================================================

/// One ping measurement as posted by a monitoring agent
#[derive(Debug, Deserialize)]
struct PingPayload {
    ip_address: String,
    avg_rtt: Option<f64>,
    packets_sent: i64,
    packets_received: i64,
    packet_loss: f64,
    probe_name: Option<String>,
}

fn decimal_text(value: f64) -> String {
    Decimal::try_from(value).unwrap_or_default().normalize().to_string()
}

/// POST /api/pings: store a batch of ping results stamped with the receipt time
async fn api_ingest_pings(
    State(state): State<AppState>,
    Json(payload): Json<Vec<PingPayload>>,
) -> ApiResponse {
    let received_at_ms = Utc::now().timestamp_millis();

    let records: Vec<PingResultRecord> = payload
        .into_iter()
        .filter(|p| {
            let valid = !p.ip_address.trim().is_empty()
                && p.packets_sent >= 0
                && (0..=p.packets_sent).contains(&p.packets_received);
            if !valid {
                warn!(ip = %p.ip_address, "Dropping invalid ping payload");
            }
            valid
        })
        .map(|p| PingResultRecord {
            id: None,
            ip_address: p.ip_address.trim().to_string(),
            avg_rtt: p.avg_rtt.map(decimal_text),
            packets_sent: p.packets_sent,
            packets_received: p.packets_received,
            packet_loss: decimal_text(p.packet_loss),
            probe_name: p.probe_name,
            ping_at_ms: received_at_ms,
        })
        .collect();

    if records.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "No valid ping results in payload");
    }

    match PingRepository::new(state.db.pool()).save_batch(&records).await {
        Ok(saved) => {
            info!(saved, "Stored ping results");
            ok(serde_json::json!({
                "success": true,
                "saved": saved,
                "ping_at_ms": received_at_ms,
            }))
        }
        Err(e) => storage_error("Failed to store ping results", e),
    }
}

// ============================================================================
// Import command: load a JSON document into the database
// ============================================================================

/// Every array is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportDocument {
    nodes: Vec<NodeRecord>,
    pings: Vec<PingResultRecord>,
    node_metrics: Vec<NodeRewardMetricRecord>,
    provider_summaries: Vec<ProviderDailySummaryRecord>,
    conversion_rates: Vec<ConversionRateRecord>,
}

async fn import_document(db: &Database, doc: &ImportDocument) -> DbResult<()> {
    let nodes = NodeRepository::new(db.pool()).upsert(&doc.nodes).await?;
    let pings = PingRepository::new(db.pool()).save_batch(&doc.pings).await?;
    let rewards = RewardsRepository::new(db.pool());
    let metrics = rewards.upsert_node_metrics(&doc.node_metrics).await?;
    let summaries = rewards
        .upsert_provider_summaries(&doc.provider_summaries)
        .await?;
    let rates = ConversionRateRepository::new(db.pool())
        .upsert(&doc.conversion_rates)
        .await?;
    let derived = refresh_provider_totals(db, &doc.node_metrics).await?;

    info!(nodes, pings, metrics, summaries, derived, rates, "Import complete");
    Ok(())
}

/// Rebuild provider daily totals over every provider/day range touched by
/// `metrics`, from all node rows stored for that range. Derived totals
/// replace imported ones for the same provider and day.
async fn refresh_provider_totals(
    db: &Database,
    metrics: &[NodeRewardMetricRecord],
) -> DbResult<usize> {
    let mut ranges: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
    for m in metrics {
        let day = m.day_utc.as_str();
        let range = ranges.entry(m.node_provider_id.as_str()).or_insert((day, day));
        range.0 = range.0.min(day);
        range.1 = range.1.max(day);
    }

    let repo = RewardsRepository::new(db.pool());
    let mut written = 0;
    for (provider, (start, end)) in ranges {
        let records = repo.get_provider_metrics(provider, start, end).await?;
        let rows: Vec<RewardMetricRow> = convert_all(&records);
        let totals = daily_totals(&rows);
        let summaries: Vec<ProviderDailySummaryRecord> = convert_all(&totals);
        written += repo.upsert_provider_summaries(&summaries).await?;
    }
    Ok(written)
}

async fn cmd_import(file: &str) -> anyhow::Result<()> {
    info!("Node-Monitor import from {}", file);

    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file, e))?;
    let doc: ImportDocument = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid import document {}: {}", file, e))?;

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    info!("Database opened: {}", db_path);

    import_document(&db, &doc)
        .await
        .map_err(|e| anyhow::anyhow!("Import failed: {}", e))?;

    Ok(())
}

// ============================================================================
// Report command: provider rewards report (no web server)
// ============================================================================

async fn cmd_report(provider: &str, days: i64, top_n: usize) -> anyhow::Result<()> {
    println!("\n=== Node-Monitor v{} ===", APP_VERSION);

    let db_path = db_path();
    let db = open_database(&db_path).await?;

    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        anyhow::bail!("--days must be between 1 and {}", MAX_WINDOW_DAYS);
    }
    let today = Utc::now().date_naive();
    let start = days_before(today, days).map_err(|e| anyhow::anyhow!(e))?;
    let (start_day, end_day) = (start.to_string(), today.to_string());

    let repo = RewardsRepository::new(db.pool());
    let (summary_records, metric_records, rates) = tokio::try_join!(
        repo.get_provider_summaries(provider, &start_day),
        repo.get_provider_metrics(provider, &start_day, &end_day),
        load_rates(&db, start),
    )
    .map_err(|e| anyhow::anyhow!("Failed to load provider data: {}", e))?;

    info!(
        provider,
        days,
        summaries = summary_records.len(),
        metrics = metric_records.len(),
        rates = rates.len(),
        "Loaded report inputs"
    );

    let totals: Vec<ProviderDayTotals> = convert_all(&summary_records);
    let rows: Vec<RewardMetricRow> = convert_all(&metric_records);
    let summary = summarize_provider(provider, &totals, &rates);
    let mut rollups = rollup_by_node(&rows, &rates).into_vec();
    rollups.sort_by(|a, b| b.adjusted_rewards_total.cmp(&a.adjusted_rewards_total));

    print_report(&summary, &rollups, days, top_n);
    Ok(())
}

fn print_report(
    summary: &ProviderRewardSummary,
    rollups: &[NodeRewardRollup],
    days: i64,
    top_n: usize,
) {
    println!("Provider: {} (last {} days)", summary.provider_id, days);

    match &summary.latest_period {
        Some(latest) => {
            println!(
                "  Latest day {}: {} nodes ({} assigned), {} / {} XDR, {} ICP",
                latest.date,
                latest.total_nodes,
                latest.assigned_nodes,
                latest.last_rewards_xdr.round_dp(4),
                latest.expected_rewards_xdr.round_dp(4),
                latest.last_rewards_icp.round_dp(4),
            );
        }
        None => println!("  No provider data in range"),
    }

    let agg = &summary.aggregated;
    println!(
        "  {} days | {} XDR ({} ICP) | attainment {}% | avg failure rate {}",
        agg.days_with_data,
        agg.total_rewards_xdr.round_dp(4),
        agg.total_rewards_icp.round_dp(4),
        agg.attainment_pct.round_dp(2),
        agg.avg_failure_rate.round_dp(4),
    );

    if rollups.is_empty() {
        return;
    }
    println!("\n{:<4} {:<66} {:>6} {:>14} {:>14} {:>8}", "#", "Node", "Days", "XDR", "ICP", "Mult");
    println!("{}", "-".repeat(118));
    for (i, r) in rollups.iter().take(top_n).enumerate() {
        println!(
            "{:<4} {:<66} {:>6} {:>14} {:>14} {:>8}",
            i + 1,
            r.node_id,
            r.days,
            r.adjusted_rewards_total.round_dp(4),
            r.adjusted_rewards_icp_total.round_dp(4),
            r.performance_multiplier.round_dp(4),
        );
    }
}

// ============================================================================
// Cleanup command: drop old ping results
// ============================================================================

async fn cmd_cleanup(retention_days: i64) -> anyhow::Result<()> {
    if !(1..=MAX_WINDOW_DAYS).contains(&retention_days) {
        anyhow::bail!("--retention-days must be between 1 and {}", MAX_WINDOW_DAYS);
    }
    info!("Node-Monitor DB cleanup: keeping {} days of ping results", retention_days);

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    info!("Database opened: {}", db_path);

    let cutoff_ms = instant_before(Utc::now(), Duration::try_days(retention_days))
        .map_err(|e| anyhow::anyhow!(e))?
        .timestamp_millis();
    let repo = PingRepository::new(db.pool());
    let deleted = repo
        .delete_older_than(cutoff_ms)
        .await
        .map_err(|e| anyhow::anyhow!("Cleanup failed: {}", e))?;

    info!("Running VACUUM to reclaim disk space...");
    repo.vacuum()
        .await
        .map_err(|e| anyhow::anyhow!("VACUUM failed: {}", e))?;

    info!("Done! Deleted {} ping results.", deleted);
    Ok(())
}
