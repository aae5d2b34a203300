mod engine;
mod types;

pub use engine::{
    annual_rate_from_monthly, current_amount_for_head, forecast_net_worth,
    generate_net_worth_series, items_from_snapshot, latest_snapshot, month_start,
    monthly_amount_for_head, monthly_rate_from_annual, months_for_range, months_to_reach,
    project_plan, snapshot_net_worth, to_series,
};
pub use types::{
    AllocationMode, Assumptions, CashflowHead, CashflowKind, ColumnKind, CustomColumn,
    DisplayCashflowsAs, ForecastInputs, ForecastPoint, ForecastResult, Frequency, InvestmentType,
    NetWorthItem, PlanInputs, ProjectionResult, Snapshot, SnapshotPoint, TimeRange, YearRow,
};
