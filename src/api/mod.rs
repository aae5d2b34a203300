use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Router,
    extract::{Json, Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::{
    Assumptions, CashflowHead, CashflowKind, ColumnKind, ForecastInputs, ForecastPoint,
    Frequency, NetWorthItem, PlanInputs, ProjectionResult, Snapshot, SnapshotPoint, TimeRange,
    annual_rate_from_monthly, current_amount_for_head, forecast_net_worth,
    generate_net_worth_series, items_from_snapshot, latest_snapshot, monthly_rate_from_annual,
    months_to_reach, project_plan, snapshot_net_worth, to_series,
};
use crate::store::{
    AppData, AssumptionsPatch, ForecastRecord, LivingExpensesRecord, PlannerRecord,
    ProgressRecord, Store, TableSchemaRecord, merge_assumptions, shipped_assumptions,
};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

const MAX_AGE: u32 = 130;
const MAX_HORIZON_MONTHS: u32 = 1200;

const MILESTONE_TARGETS: [f64; 4] = [100_000_000.0, 150_000_000.0, 250_000_000.0, 500_000_000.0];
const PROJECTION_YEARS: [u32; 4] = [5, 10, 15, 20];

type SharedStore = Arc<Mutex<Store>>;

fn today() -> Date {
    jiff::Zoned::now().date()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    life_expectancy_age: Option<u32>,
    current_net_worth: Option<f64>,
    annual_income: Option<f64>,
    annual_expenses: Option<f64>,
    pre_retirement_return: Option<f64>,
    post_retirement_return: Option<f64>,
    inflation_rate: Option<f64>,
    target_retirement_spending: Option<f64>,
    spending_in_todays_dollars: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ForecastPayload {
    start_net_worth: Option<f64>,
    inflation_rate: Option<f64>,
    default_monthly_return: Option<f64>,
    default_yearly_return: Option<f64>,
    horizon_months: Option<u32>,
    heads: Option<Vec<CashflowHead>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DashboardQuery {
    range: Option<TimeRange>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    inputs: PlanInputs,
    result: ProjectionResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssumptionsResponse {
    #[serde(flatten)]
    assumptions: Assumptions,
    /// Derived from the canonical monthly rate, for display.
    default_yearly_return: f64,
}

impl From<Assumptions> for AssumptionsResponse {
    fn from(assumptions: Assumptions) -> Self {
        let default_yearly_return = annual_rate_from_monthly(assumptions.default_monthly_return);
        Self {
            assumptions,
            default_yearly_return,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForecastStateResponse {
    #[serde(flatten)]
    record: ForecastRecord,
    /// Per-head display amount as of today (`displayCashflowsAs = current`).
    current_amounts: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Milestone {
    target: f64,
    month_index: Option<u32>,
    years: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HorizonProjection {
    years: u32,
    net_worth: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForecastRunResponse {
    inputs: ForecastInputs,
    points: Vec<ForecastPoint>,
    projections: Vec<HorizonProjection>,
    milestones: Vec<Milestone>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressResponse {
    snapshots: Vec<Snapshot>,
    series: Vec<SnapshotPoint>,
    latest: Option<Snapshot>,
    net_worth: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LivingExpensesResponse {
    #[serde(flatten)]
    record: LivingExpensesRecord,
    total_monthly_expense: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardResponse {
    net_worth: Option<f64>,
    assets: Vec<NetWorthItem>,
    liabilities: Vec<NetWorthItem>,
    progress_series: Vec<SnapshotPoint>,
    projected_series: Vec<SnapshotPoint>,
    forecast_series: Vec<ForecastPoint>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn validate_money(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("{name} must be finite"));
    }
    Ok(())
}

fn validate_rate(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value <= -1.0 {
        return Err(format!("{name} must be a finite rate > -100%"));
    }
    Ok(())
}

fn validate_heads(heads: &[CashflowHead]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for head in heads {
        if head.id.trim().is_empty() {
            return Err("head id must not be empty".to_string());
        }
        if !seen.insert(head.id.as_str()) {
            return Err(format!("duplicate head id: {}", head.id));
        }
        validate_money(&format!("head {} amount", head.id), head.amount)?;
        validate_rate(
            &format!("head {} annualGrowthRate", head.id),
            head.annual_growth_rate,
        )?;
    }
    Ok(())
}

fn build_plan_inputs(
    planner: &PlannerRecord,
    assumptions: &Assumptions,
    start_net_worth: f64,
    payload: PlanPayload,
) -> Result<PlanInputs, String> {
    let inputs = PlanInputs {
        current_age: payload.current_age.unwrap_or(planner.current_age),
        retirement_age: payload.retirement_age.unwrap_or(planner.retirement_age),
        life_expectancy_age: payload
            .life_expectancy_age
            .unwrap_or(planner.life_expectancy_age),
        current_net_worth: payload.current_net_worth.unwrap_or(start_net_worth),
        annual_income: payload.annual_income.unwrap_or(planner.annual_income),
        annual_expenses: payload.annual_expenses.unwrap_or(planner.annual_expenses),
        pre_retirement_return: payload
            .pre_retirement_return
            .unwrap_or(assumptions.pre_retirement_return),
        post_retirement_return: payload
            .post_retirement_return
            .unwrap_or(assumptions.post_retirement_return),
        inflation_rate: payload.inflation_rate.unwrap_or(assumptions.inflation_rate),
        target_retirement_spending: payload
            .target_retirement_spending
            .unwrap_or(planner.target_retirement_spending),
        spending_in_todays_dollars: payload
            .spending_in_todays_dollars
            .unwrap_or(planner.spending_in_todays_dollars),
    };

    if inputs.current_age > MAX_AGE
        || inputs.retirement_age > MAX_AGE
        || inputs.life_expectancy_age > MAX_AGE
    {
        return Err(format!("ages must be <= {MAX_AGE}"));
    }
    validate_money("currentNetWorth", inputs.current_net_worth)?;
    validate_money("annualIncome", inputs.annual_income)?;
    validate_money("annualExpenses", inputs.annual_expenses)?;
    validate_money("targetRetirementSpending", inputs.target_retirement_spending)?;
    validate_rate("preRetirementReturn", inputs.pre_retirement_return)?;
    validate_rate("postRetirementReturn", inputs.post_retirement_return)?;
    validate_rate("inflationRate", inputs.inflation_rate)?;

    Ok(inputs)
}

fn build_forecast_inputs(
    record: &ForecastRecord,
    assumptions: &Assumptions,
    start_net_worth: f64,
    payload: ForecastPayload,
) -> Result<ForecastInputs, String> {
    let default_monthly_return = payload
        .default_monthly_return
        .or(payload.default_yearly_return.map(monthly_rate_from_annual))
        .unwrap_or(assumptions.default_monthly_return);

    let inputs = ForecastInputs {
        start_net_worth: payload.start_net_worth.unwrap_or(start_net_worth),
        inflation_rate: payload.inflation_rate.unwrap_or(assumptions.inflation_rate),
        default_monthly_return,
        horizon_months: payload.horizon_months.unwrap_or(record.horizon_months),
        heads: payload.heads.unwrap_or_else(|| record.heads.clone()),
    };

    if inputs.horizon_months > MAX_HORIZON_MONTHS {
        return Err(format!("horizonMonths must be <= {MAX_HORIZON_MONTHS}"));
    }
    validate_money("startNetWorth", inputs.start_net_worth)?;
    validate_rate("inflationRate", inputs.inflation_rate)?;
    validate_rate("defaultMonthlyReturn", inputs.default_monthly_return)?;
    validate_heads(&inputs.heads)?;

    Ok(inputs)
}

/// The forecast's starting net worth is derived from the latest snapshot when
/// one exists; the stored record's value is only a fallback.
fn resolve_start_net_worth(record: &ForecastRecord, snapshots: &[Snapshot]) -> f64 {
    latest_snapshot(snapshots)
        .map(snapshot_net_worth)
        .unwrap_or(record.start_net_worth)
}

fn forecast_run_response(inputs: ForecastInputs, plan_start: Date) -> ForecastRunResponse {
    let points = forecast_net_worth(&inputs, plan_start).points;

    let projections = PROJECTION_YEARS
        .iter()
        .map(|&years| {
            let index = (years as usize * 12).min(points.len().saturating_sub(1));
            let net_worth = points
                .get(index)
                .map(|p| p.net_worth)
                .unwrap_or(inputs.start_net_worth);
            HorizonProjection { years, net_worth }
        })
        .collect();

    let milestones = MILESTONE_TARGETS
        .iter()
        .map(|&target| {
            let month_index = months_to_reach(&points, target);
            Milestone {
                target,
                month_index,
                years: month_index.map(|m| m as f64 / 12.0),
            }
        })
        .collect();

    ForecastRunResponse {
        inputs,
        points,
        projections,
        milestones,
    }
}

/// Total current monthly expense across living-expense heads; yearly heads
/// count at one twelfth. A head whose amount fails to resolve is skipped.
fn total_monthly_expense(heads: &[CashflowHead], inflation: f64, as_of: Date) -> f64 {
    heads
        .iter()
        .filter(|h| h.kind == CashflowKind::Expense)
        .map(|h| {
            let current = current_amount_for_head(h, inflation, as_of);
            match h.frequency {
                Frequency::Yearly => current / 12.0,
                Frequency::Monthly => current,
            }
        })
        .filter(|amount| amount.is_finite())
        .sum()
}

fn progress_response(record: ProgressRecord) -> ProgressResponse {
    let series = to_series(&record.snapshots);
    let latest = latest_snapshot(&record.snapshots).cloned();
    let net_worth = latest.as_ref().map(snapshot_net_worth);
    ProgressResponse {
        snapshots: record.snapshots,
        series,
        latest,
        net_worth,
    }
}

pub async fn run_http_server(port: u16, data_dir: PathBuf) -> std::io::Result<()> {
    let store = Store::new(data_dir);
    store.init().map_err(std::io::Error::other)?;
    tracing::info!("data directory: {}", store.root().display());

    let state: SharedStore = Arc::new(Mutex::new(store));
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route(
            "/api/assumptions",
            get(assumptions_get_handler).put(assumptions_put_handler),
        )
        .route("/api/assumptions/reset", post(assumptions_reset_handler))
        .route(
            "/api/planner",
            get(planner_get_handler).put(planner_put_handler),
        )
        .route("/api/plan", get(plan_get_handler).post(plan_post_handler))
        .route(
            "/api/forecast",
            get(forecast_get_handler).put(forecast_put_handler),
        )
        .route(
            "/api/forecast/run",
            get(forecast_run_get_handler).post(forecast_run_post_handler),
        )
        .route(
            "/api/progress",
            get(progress_get_handler).put(progress_put_handler),
        )
        .route("/api/progress/snapshots", post(snapshot_upsert_handler))
        .route(
            "/api/progress/snapshots/:id",
            delete(snapshot_delete_handler),
        )
        .route(
            "/api/table-schema",
            get(table_schema_get_handler).put(table_schema_put_handler),
        )
        .route(
            "/api/living-expenses",
            get(living_expenses_get_handler).put(living_expenses_put_handler),
        )
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/export", get(export_handler))
        .route("/api/import", post(import_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("fireplan listening on http://{addr}");
    tracing::info!("local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn lock_store(state: &SharedStore) -> Result<MutexGuard<'_, Store>, Response> {
    state.lock().map_err(|_| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "State lock poisoned",
        )
    })
}

fn store_error(e: crate::store::StoreError) -> Response {
    tracing::error!("store failure: {e}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
}

async fn assumptions_get_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let assumptions = store.load_assumptions(today());
    json_response(StatusCode::OK, AssumptionsResponse::from(assumptions))
}

async fn assumptions_put_handler(
    State(state): State<SharedStore>,
    Json(patch): Json<AssumptionsPatch>,
) -> Response {
    if let Some(rate) = patch.inflation_rate {
        if let Err(msg) = validate_rate("inflationRate", rate) {
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    }
    for (name, rate) in [
        ("defaultMonthlyReturn", patch.default_monthly_return),
        ("defaultYearlyReturn", patch.default_yearly_return),
        ("preRetirementReturn", patch.pre_retirement_return),
        ("postRetirementReturn", patch.post_retirement_return),
    ] {
        if let Some(rate) = rate {
            if let Err(msg) = validate_rate(name, rate) {
                return error_response(StatusCode::BAD_REQUEST, &msg);
            }
        }
    }

    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let merged = merge_assumptions(&store.load_assumptions(today()), &patch);
    if let Err(e) = store.save_assumptions(&merged) {
        return store_error(e);
    }
    json_response(StatusCode::OK, AssumptionsResponse::from(merged))
}

async fn assumptions_reset_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let defaults = shipped_assumptions(today());
    if let Err(e) = store.save_assumptions(&defaults) {
        return store_error(e);
    }
    json_response(StatusCode::OK, AssumptionsResponse::from(defaults))
}

async fn planner_get_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    json_response(StatusCode::OK, store.load_planner())
}

async fn planner_put_handler(
    State(state): State<SharedStore>,
    Json(record): Json<PlannerRecord>,
) -> Response {
    if record.current_age > MAX_AGE
        || record.retirement_age > MAX_AGE
        || record.life_expectancy_age > MAX_AGE
    {
        return error_response(StatusCode::BAD_REQUEST, &format!("ages must be <= {MAX_AGE}"));
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    if let Err(e) = store.save_planner(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, record)
}

async fn plan_get_handler(
    State(state): State<SharedStore>,
    Query(payload): Query<PlanPayload>,
) -> Response {
    plan_handler_impl(state, payload)
}

async fn plan_post_handler(
    State(state): State<SharedStore>,
    Json(payload): Json<PlanPayload>,
) -> Response {
    plan_handler_impl(state, payload)
}

fn plan_handler_impl(state: SharedStore, payload: PlanPayload) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let assumptions = store.load_assumptions(today());
    let planner = store.load_planner();
    let progress = store.load_progress();
    let start_net_worth = latest_snapshot(&progress.snapshots)
        .map(snapshot_net_worth)
        .unwrap_or(0.0);

    let inputs = match build_plan_inputs(&planner, &assumptions, start_net_worth, payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let result = project_plan(&inputs);
    json_response(StatusCode::OK, PlanResponse { inputs, result })
}

async fn forecast_get_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let now = today();
    let assumptions = store.load_assumptions(now);
    let record = store.load_forecast(now);

    let current_amounts = record
        .heads
        .iter()
        .map(|h| {
            (
                h.id.clone(),
                current_amount_for_head(h, assumptions.inflation_rate, now),
            )
        })
        .collect();

    json_response(
        StatusCode::OK,
        ForecastStateResponse {
            record,
            current_amounts,
        },
    )
}

async fn forecast_put_handler(
    State(state): State<SharedStore>,
    Json(record): Json<ForecastRecord>,
) -> Response {
    if record.horizon_months > MAX_HORIZON_MONTHS {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("horizonMonths must be <= {MAX_HORIZON_MONTHS}"),
        );
    }
    if let Err(msg) = validate_heads(&record.heads) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    if let Err(e) = store.save_forecast(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, record)
}

async fn forecast_run_get_handler(
    State(state): State<SharedStore>,
    Query(payload): Query<ForecastPayload>,
) -> Response {
    forecast_run_handler_impl(state, payload)
}

async fn forecast_run_post_handler(
    State(state): State<SharedStore>,
    Json(payload): Json<ForecastPayload>,
) -> Response {
    forecast_run_handler_impl(state, payload)
}

fn forecast_run_handler_impl(state: SharedStore, payload: ForecastPayload) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let now = today();
    let assumptions = store.load_assumptions(now);
    let record = store.load_forecast(now);
    let progress = store.load_progress();
    let start_net_worth = resolve_start_net_worth(&record, &progress.snapshots);

    let inputs = match build_forecast_inputs(&record, &assumptions, start_net_worth, payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    json_response(
        StatusCode::OK,
        forecast_run_response(inputs, assumptions.plan_start_date),
    )
}

async fn progress_get_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    json_response(StatusCode::OK, progress_response(store.load_progress()))
}

async fn progress_put_handler(
    State(state): State<SharedStore>,
    Json(record): Json<ProgressRecord>,
) -> Response {
    if let Err(msg) = validate_snapshots(&record.snapshots) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    if let Err(e) = store.save_progress(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, progress_response(record))
}

fn validate_snapshots(snapshots: &[Snapshot]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for snapshot in snapshots {
        if snapshot.id.trim().is_empty() {
            return Err("snapshot id must not be empty".to_string());
        }
        if !seen.insert(snapshot.id.as_str()) {
            return Err(format!("duplicate snapshot id: {}", snapshot.id));
        }
        for (name, column) in &snapshot.custom_columns {
            validate_money(&format!("snapshot {} column {name}", snapshot.id), column.value)?;
        }
    }
    Ok(())
}

async fn snapshot_upsert_handler(
    State(state): State<SharedStore>,
    Json(snapshot): Json<Snapshot>,
) -> Response {
    if let Err(msg) = validate_snapshots(std::slice::from_ref(&snapshot)) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let mut record = store.load_progress();
    match record.snapshots.iter_mut().find(|s| s.id == snapshot.id) {
        Some(existing) => *existing = snapshot,
        None => record.snapshots.push(snapshot),
    }
    if let Err(e) = store.save_progress(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, progress_response(record))
}

async fn snapshot_delete_handler(
    State(state): State<SharedStore>,
    Path(id): Path<String>,
) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let mut record = store.load_progress();
    let before = record.snapshots.len();
    record.snapshots.retain(|s| s.id != id);
    if record.snapshots.len() == before {
        return error_response(StatusCode::NOT_FOUND, &format!("no snapshot with id {id}"));
    }
    if let Err(e) = store.save_progress(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, progress_response(record))
}

async fn table_schema_get_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    json_response(StatusCode::OK, store.load_table_schema())
}

async fn table_schema_put_handler(
    State(state): State<SharedStore>,
    Json(record): Json<TableSchemaRecord>,
) -> Response {
    let mut seen = HashSet::new();
    for column in &record.columns {
        if column.trim().is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "column names must not be empty");
        }
        if !seen.insert(column.as_str()) {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("duplicate column name: {column}"),
            );
        }
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    if let Err(e) = store.save_table_schema(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, record)
}

async fn living_expenses_get_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let now = today();
    let assumptions = store.load_assumptions(now);
    let record = store.load_living_expenses();
    let total = total_monthly_expense(&record.heads, assumptions.inflation_rate, now);
    json_response(
        StatusCode::OK,
        LivingExpensesResponse {
            record,
            total_monthly_expense: total,
        },
    )
}

async fn living_expenses_put_handler(
    State(state): State<SharedStore>,
    Json(record): Json<LivingExpensesRecord>,
) -> Response {
    if let Err(msg) = validate_heads(&record.heads) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    if let Err(e) = store.save_living_expenses(&record) {
        return store_error(e);
    }
    json_response(StatusCode::OK, record)
}

async fn dashboard_handler(
    State(state): State<SharedStore>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let now = today();
    let assumptions = store.load_assumptions(now);
    let record = store.load_forecast(now);
    let progress = store.load_progress();
    let range = query.range.unwrap_or(TimeRange::All);

    let latest = latest_snapshot(&progress.snapshots);
    let net_worth = latest.map(snapshot_net_worth);
    let assets = latest
        .map(|s| items_from_snapshot(s, ColumnKind::Asset))
        .unwrap_or_default();
    let liabilities = latest
        .map(|s| items_from_snapshot(s, ColumnKind::Liability))
        .unwrap_or_default();

    let progress_series = to_series(&progress.snapshots);
    let projected_series =
        generate_net_worth_series(&assets, &liabilities, range, assumptions.plan_start_date);

    let start_net_worth = resolve_start_net_worth(&record, &progress.snapshots);
    let forecast_series = match build_forecast_inputs(
        &record,
        &assumptions,
        start_net_worth,
        ForecastPayload::default(),
    ) {
        Ok(inputs) => forecast_net_worth(&inputs, assumptions.plan_start_date).points,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    json_response(
        StatusCode::OK,
        DashboardResponse {
            net_worth,
            assets,
            liabilities,
            progress_series,
            projected_series,
            forecast_series,
        },
    )
}

async fn export_handler(State(state): State<SharedStore>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    tracing::info!("exporting app data");
    json_response(StatusCode::OK, store.export(today()))
}

async fn import_handler(
    State(state): State<SharedStore>,
    Json(data): Json<AppData>,
) -> Response {
    if let Some(forecast) = &data.forecast {
        if let Err(msg) = validate_heads(&forecast.heads) {
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    }
    if let Some(progress) = &data.progress {
        if let Err(msg) = validate_snapshots(&progress.snapshots) {
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    }
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    if let Err(e) = store.import(&data) {
        return store_error(e);
    }
    tracing::info!("imported app data");
    json_response(StatusCode::OK, store.export(today()))
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;

    use super::*;
    use crate::store::{shipped_forecast, shipped_planner};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_assumptions() -> Assumptions {
        shipped_assumptions(date(2025, 8, 7))
    }

    fn plan_payload_from_json(json: &str) -> PlanPayload {
        serde_json::from_str(json).expect("payload should parse")
    }

    fn forecast_payload_from_json(json: &str) -> ForecastPayload {
        serde_json::from_str(json).expect("payload should parse")
    }

    #[test]
    fn plan_payload_overlays_stored_records() {
        let payload = plan_payload_from_json(
            r#"{
                "currentAge": 35,
                "targetRetirementSpending": 900000,
                "spendingInTodaysDollars": false
            }"#,
        );

        let planner = shipped_planner();
        let assumptions = sample_assumptions();
        let inputs =
            build_plan_inputs(&planner, &assumptions, 2_500_000.0, payload).expect("valid inputs");

        assert_eq!(inputs.current_age, 35);
        assert_eq!(inputs.retirement_age, planner.retirement_age);
        assert_approx(inputs.current_net_worth, 2_500_000.0);
        assert_approx(inputs.target_retirement_spending, 900_000.0);
        assert!(!inputs.spending_in_todays_dollars);
        assert_approx(inputs.inflation_rate, assumptions.inflation_rate);
        assert_approx(inputs.pre_retirement_return, assumptions.pre_retirement_return);
    }

    #[test]
    fn plan_payload_rejects_absurd_ages() {
        let payload = plan_payload_from_json(r#"{"currentAge": 400}"#);
        let err = build_plan_inputs(&shipped_planner(), &sample_assumptions(), 0.0, payload)
            .expect_err("must reject age > 130");
        assert!(err.contains("ages"));
    }

    #[test]
    fn degenerate_plan_inputs_are_accepted() {
        // life expectancy below current age is a valid degenerate plan
        let payload = plan_payload_from_json(r#"{"currentAge": 80, "lifeExpectancyAge": 60}"#);
        let inputs = build_plan_inputs(&shipped_planner(), &sample_assumptions(), 0.0, payload)
            .expect("degenerate plans are valid");
        let result = project_plan(&inputs);
        assert!(result.rows.is_empty());
        assert!(result.success);
    }

    #[test]
    fn forecast_payload_overlay_and_legacy_annual_rate() {
        let payload = forecast_payload_from_json(
            r#"{
                "horizonMonths": 120,
                "defaultYearlyReturn": 0.12
            }"#,
        );

        let record = shipped_forecast(date(2025, 8, 7));
        let inputs = build_forecast_inputs(&record, &sample_assumptions(), 1_000_000.0, payload)
            .expect("valid inputs");

        assert_eq!(inputs.horizon_months, 120);
        assert_approx(inputs.start_net_worth, 1_000_000.0);
        assert_approx(
            inputs.default_monthly_return,
            1.12_f64.powf(1.0 / 12.0) - 1.0,
        );
        assert_eq!(inputs.heads.len(), record.heads.len());
    }

    #[test]
    fn forecast_payload_monthly_rate_wins_over_annual() {
        let payload = forecast_payload_from_json(
            r#"{"defaultMonthlyReturn": 0.006, "defaultYearlyReturn": 0.5}"#,
        );
        let record = shipped_forecast(date(2025, 8, 7));
        let inputs = build_forecast_inputs(&record, &sample_assumptions(), 0.0, payload)
            .expect("valid inputs");
        assert_approx(inputs.default_monthly_return, 0.006);
    }

    #[test]
    fn forecast_rejects_horizon_over_cap() {
        let payload = forecast_payload_from_json(r#"{"horizonMonths": 2400}"#);
        let err = build_forecast_inputs(
            &shipped_forecast(date(2025, 8, 7)),
            &sample_assumptions(),
            0.0,
            payload,
        )
        .expect_err("must reject horizon over cap");
        assert!(err.contains("horizonMonths"));
    }

    #[test]
    fn forecast_rejects_duplicate_head_ids() {
        let payload = forecast_payload_from_json(
            r#"{
                "heads": [
                    {"id": "a", "kind": "income", "name": "One", "amount": 1, "frequency": "monthly"},
                    {"id": "a", "kind": "expense", "name": "Two", "amount": 2, "frequency": "monthly"}
                ]
            }"#,
        );
        let err = build_forecast_inputs(
            &shipped_forecast(date(2025, 8, 7)),
            &sample_assumptions(),
            0.0,
            payload,
        )
        .expect_err("must reject duplicate ids");
        assert!(err.contains("duplicate head id"));
    }

    #[test]
    fn start_net_worth_prefers_latest_snapshot() {
        let mut record = shipped_forecast(date(2025, 8, 7));
        record.start_net_worth = 111.0;

        assert_approx(resolve_start_net_worth(&record, &[]), 111.0);

        let progress: ProgressRecord = serde_json::from_str(
            r#"{
                "snapshots": [
                    {"id": "a", "date": "2024-01-01",
                     "customColumns": {"Cash": {"value": 100, "type": "asset"}}},
                    {"id": "b", "date": "2025-01-01",
                     "customColumns": {"Cash": {"value": 700, "type": "asset"},
                                        "Loan": {"value": 50, "type": "liability"}}}
                ]
            }"#,
        )
        .expect("progress should parse");
        assert_approx(resolve_start_net_worth(&record, &progress.snapshots), 650.0);
    }

    #[test]
    fn forecast_run_response_reports_projections_and_milestones() {
        let inputs = ForecastInputs {
            start_net_worth: 90_000_000.0,
            inflation_rate: 0.06,
            default_monthly_return: 0.01,
            horizon_months: 360,
            heads: Vec::new(),
        };

        let response = forecast_run_response(inputs, date(2025, 1, 1));
        assert_eq!(response.points.len(), 361);
        assert_eq!(response.projections.len(), PROJECTION_YEARS.len());
        assert_eq!(response.milestones.len(), MILESTONE_TARGETS.len());

        // 90M at 1%/mo crosses 100M within the first year
        let first = &response.milestones[0];
        assert_approx(first.target, 100_000_000.0);
        let month = first.month_index.expect("milestone is reachable");
        assert!(month <= 12);
        assert!(response.points[month as usize].net_worth >= first.target);

        assert_eq!(response.projections[0].years, 5);
        assert_approx(
            response.projections[0].net_worth,
            response.points[60].net_worth,
        );
    }

    #[test]
    fn total_monthly_expense_divides_yearly_heads() {
        let heads: Vec<CashflowHead> = serde_json::from_str(
            r#"[
                {"id": "rent", "kind": "expense", "name": "Rent", "amount": 30000,
                 "frequency": "monthly"},
                {"id": "insurance", "kind": "expense", "name": "Insurance", "amount": 24000,
                 "frequency": "yearly"},
                {"id": "salary", "kind": "income", "name": "Salary", "amount": 100000,
                 "frequency": "monthly"}
            ]"#,
        )
        .expect("heads should parse");

        let total = total_monthly_expense(&heads, 0.0, date(2025, 8, 7));
        assert_approx(total, 32_000.0);
    }

    #[test]
    fn plan_response_serialization_uses_camel_case() {
        let planner = shipped_planner();
        let assumptions = sample_assumptions();
        let inputs = build_plan_inputs(&planner, &assumptions, 0.0, PlanPayload::default())
            .expect("valid inputs");
        let result = project_plan(&inputs);
        let response = PlanResponse { inputs, result };

        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"rows\""));
        assert!(json.contains("\"retirementIndex\""));
        assert!(json.contains("\"retirementBalance\""));
        assert!(json.contains("\"depletionAge\""));
        assert!(json.contains("\"endBalanceReal\""));
        assert!(json.contains("\"currentNetWorth\""));
    }

    #[test]
    fn forecast_response_serialization_uses_camel_case() {
        let inputs = ForecastInputs {
            start_net_worth: 1_000.0,
            inflation_rate: 0.05,
            default_monthly_return: 0.006,
            horizon_months: 2,
            heads: Vec::new(),
        };
        let response = forecast_run_response(inputs, date(2025, 1, 1));

        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"points\""));
        assert!(json.contains("\"monthIndex\""));
        assert!(json.contains("\"netWorth\""));
        assert!(json.contains("\"milestones\""));
        assert!(json.contains("\"projections\""));
        assert!(json.contains("\"startNetWorth\""));
    }

    #[test]
    fn assumptions_response_includes_derived_annual_rate() {
        let response = AssumptionsResponse::from(sample_assumptions());
        assert_approx(response.default_yearly_return, 0.11);

        let json = serde_json::to_value(&response).expect("should serialize");
        assert!(json["inflationRate"].is_number());
        assert!(json["defaultMonthlyReturn"].is_number());
        assert!(json["defaultYearlyReturn"].is_number());
        assert_eq!(json["planStartDate"], "2025-08-01");
        assert_eq!(json["displayCashflowsAs"], "current");
    }

    #[test]
    fn time_range_parses_display_names() {
        assert_eq!(
            serde_json::from_str::<TimeRange>("\"1Y\"").expect("should parse"),
            TimeRange::OneYear
        );
        assert_eq!(
            serde_json::from_str::<TimeRange>("\"ALL\"").expect("should parse"),
            TimeRange::All
        );
        assert!(serde_json::from_str::<TimeRange>("\"2W\"").is_err());
    }
}
