use std::collections::BTreeMap;

use jiff::civil::Date;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CashflowKind {
    Income,
    Expense,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Yearly,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMode {
    #[default]
    EvenMonthly,
    AnnualLump,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashflowHead {
    pub id: String,
    pub kind: CashflowKind,
    pub name: String,
    /// Amount as of `input_date`, in currency units.
    pub amount: f64,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_date: Option<Date>,
    pub frequency: Frequency,
    // 0 = first plan month; both offsets inclusive, end absent = ongoing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_month_offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<i32>,
    #[serde(default)]
    pub annual_growth_rate: f64,
    #[serde(default)]
    pub match_inflation: bool,
    #[serde(default)]
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub allocation_mode: AllocationMode,
}

/// A malformed or missing date deserializes to `None` instead of failing the
/// whole record; callers substitute the as-of date.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastInputs {
    pub start_net_worth: f64,
    pub inflation_rate: f64,
    pub default_monthly_return: f64,
    /// Inclusive: the forecast emits `horizon_months + 1` points.
    pub horizon_months: u32,
    pub heads: Vec<CashflowHead>,
}

#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub month_index: u32,
    pub date: Date,
    pub net_worth: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    pub points: Vec<ForecastPoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInputs {
    pub current_age: u32,
    pub retirement_age: u32,
    pub life_expectancy_age: u32,
    pub current_net_worth: f64,
    pub annual_income: f64,
    pub annual_expenses: f64,
    pub pre_retirement_return: f64,
    pub post_retirement_return: f64,
    pub inflation_rate: f64,
    pub target_retirement_spending: f64,
    pub spending_in_todays_dollars: bool,
}

#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub year: u32,
    pub age: u32,
    pub start_balance: f64,
    pub contribution: f64,
    pub withdrawal: f64,
    pub investment_return: f64,
    pub end_balance: f64,
    /// End balance deflated to year-0 purchasing power.
    pub end_balance_real: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub rows: Vec<YearRow>,
    pub retirement_index: usize,
    pub retirement_balance: f64,
    pub depletion_age: Option<u32>,
    pub success: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Asset,
    Liability,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomColumn {
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_type_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentType {
    pub id: String,
    pub name: String,
    pub expected_return: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub date: Date,
    #[serde(default)]
    pub custom_columns: BTreeMap<String, CustomColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub investment_types: Vec<InvestmentType>,
}

#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPoint {
    pub date: Date,
    pub net_worth: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetWorthItem {
    pub id: String,
    pub kind: ColumnKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub current_value: f64,
    pub monthly_growth_rate: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "5Y")]
    FiveYears,
    #[serde(rename = "10Y")]
    TenYears,
    #[serde(rename = "ALL")]
    All,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayCashflowsAs {
    #[default]
    Current,
    Input,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumptions {
    pub inflation_rate: f64,
    /// Canonical stored return: monthly compounding rate.
    pub default_monthly_return: f64,
    pub pre_retirement_return: f64,
    pub post_retirement_return: f64,
    #[serde(default)]
    pub display_cashflows_as: DisplayCashflowsAs,
    /// All month offsets are relative to this date.
    pub plan_start_date: Date,
}
