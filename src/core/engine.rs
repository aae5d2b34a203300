use jiff::civil::Date;

use super::types::{
    AllocationMode, CashflowHead, CashflowKind, ColumnKind, ForecastInputs, ForecastPoint,
    ForecastResult, Frequency, NetWorthItem, PlanInputs, ProjectionResult, Snapshot, SnapshotPoint,
    TimeRange, YearRow,
};

const DEFAULT_ASSET_MONTHLY_GROWTH: f64 = 0.004;
const DEFAULT_LIABILITY_MONTHLY_GROWTH: f64 = 0.01;

pub fn project_plan(inputs: &PlanInputs) -> ProjectionResult {
    let retirement_index = inputs.retirement_age.saturating_sub(inputs.current_age) as usize;
    let years = inputs.life_expectancy_age as i64 - inputs.current_age as i64;

    let mut rows: Vec<YearRow> = Vec::new();
    let mut end_balance_prev = inputs.current_net_worth;
    let mut depletion_age = None;

    if years >= 0 {
        rows.reserve(years as usize + 1);
        for i in 0..=years as u32 {
            let age = inputs.current_age + i;
            let start_balance = end_balance_prev;
            let is_retired = i as usize >= retirement_index;
            let r = if is_retired {
                inputs.post_retirement_return
            } else {
                inputs.pre_retirement_return
            };

            let inflator = (1.0 + inputs.inflation_rate).powi(i as i32);
            let income = inputs.annual_income * inflator;
            let expenses = inputs.annual_expenses * inflator;
            let contribution = if is_retired {
                0.0
            } else {
                (income - expenses).max(0.0)
            };

            let withdrawal = if is_retired {
                let target_nominal = if inputs.spending_in_todays_dollars {
                    inputs.target_retirement_spending * inflator
                } else {
                    inputs.target_retirement_spending
                };
                target_nominal.max(0.0)
            } else {
                0.0
            };

            let mid_balance = start_balance + contribution - withdrawal;
            let end_balance = mid_balance * (1.0 + r);
            let investment_return = end_balance - mid_balance;
            let end_balance_real = end_balance / inflator;

            if depletion_age.is_none() && end_balance < 0.0 {
                depletion_age = Some(age);
            }

            rows.push(YearRow {
                year: i,
                age,
                start_balance,
                contribution,
                withdrawal,
                investment_return,
                end_balance,
                end_balance_real,
            });

            end_balance_prev = end_balance;
        }
    }

    let retirement_balance = rows
        .get(retirement_index)
        .map(|r| r.end_balance)
        .unwrap_or(inputs.current_net_worth);
    let success = rows.iter().all(|r| r.end_balance >= 0.0);

    ProjectionResult {
        rows,
        retirement_index,
        retirement_balance,
        depletion_age,
        success,
    }
}

fn value_for_years(base: f64, years: f64, growth: f64) -> f64 {
    base * (1.0 + growth).powf(years)
}

fn effective_growth(head: &CashflowHead, inflation: f64) -> f64 {
    head.annual_growth_rate + if head.match_inflation { inflation } else { 0.0 }
}

/// Amount a head contributes in forecast month `month_index`, before the
/// active-window filter (the forecaster applies that separately).
pub fn monthly_amount_for_head(head: &CashflowHead, month_index: u32, inflation: f64) -> f64 {
    let years_elapsed = (month_index / 12) as f64;
    let grown = value_for_years(head.amount, years_elapsed, effective_growth(head, inflation));
    match head.frequency {
        Frequency::Yearly => match head.allocation_mode {
            // pay once per year, in the first month of each 12-month cycle
            AllocationMode::AnnualLump => {
                if month_index % 12 == 0 {
                    grown
                } else {
                    0.0
                }
            }
            AllocationMode::EvenMonthly => grown / 12.0,
        },
        Frequency::Monthly => grown,
    }
}

/// Display amount of a head as of `as_of`, grown over the fractional years
/// since its input date. Yearly heads return the yearly amount undivided.
pub fn current_amount_for_head(head: &CashflowHead, inflation: f64, as_of: Date) -> f64 {
    let input_date = head.input_date.unwrap_or(as_of);
    let years = ((as_of.year() - input_date.year()) as f64
        + (as_of.month() - input_date.month()) as f64 / 12.0)
        .max(0.0);
    value_for_years(head.amount, years, effective_growth(head, inflation))
}

fn head_is_active(head: &CashflowHead, month_index: u32) -> bool {
    let start = head.start_month_offset.unwrap_or(0);
    let end = head.end_month_offset;
    let m = month_index as i32;

    if m < start {
        return false;
    }
    // legacy "no window" sentinel: an explicit 0..0 window means every month
    if start == 0 && end == Some(0) {
        return true;
    }
    match end {
        Some(end) => m <= end,
        None => true,
    }
}

pub fn forecast_net_worth(inputs: &ForecastInputs, plan_start: Date) -> ForecastResult {
    let mut points = Vec::with_capacity(inputs.horizon_months as usize + 1);
    let mut net_worth = inputs.start_net_worth;

    for m in 0..=inputs.horizon_months {
        let mut income = 0.0;
        let mut expense = 0.0;
        for head in &inputs.heads {
            if !head_is_active(head, m) {
                continue;
            }
            let amount = monthly_amount_for_head(head, m, inputs.inflation_rate);
            // one bad head must not poison the whole forecast
            if !amount.is_finite() {
                continue;
            }
            match head.kind {
                CashflowKind::Income => income += amount,
                CashflowKind::Expense => expense += amount,
            }
        }

        let surplus = income - expense;
        net_worth = (net_worth + surplus) * (1.0 + inputs.default_monthly_return);
        points.push(ForecastPoint {
            month_index: m,
            date: month_start(plan_start, m),
            net_worth,
        });
    }

    ForecastResult { points }
}

/// First month index at which the forecast reaches `target`, if ever.
pub fn months_to_reach(points: &[ForecastPoint], target: f64) -> Option<u32> {
    points
        .iter()
        .find(|p| p.net_worth >= target)
        .map(|p| p.month_index)
}

/// First day of the month `offset_months` after `start`'s month. Direct
/// calendar arithmetic; day-of-month never overflows since it is pinned to 1.
pub fn month_start(start: Date, offset_months: u32) -> Date {
    let total = start.year() as i32 * 12 + (start.month() as i32 - 1) + offset_months as i32;
    jiff::civil::date(total.div_euclid(12) as i16, (total.rem_euclid(12) + 1) as i8, 1)
}

pub fn monthly_rate_from_annual(annual: f64) -> f64 {
    (1.0 + annual).powf(1.0 / 12.0) - 1.0
}

pub fn annual_rate_from_monthly(monthly: f64) -> f64 {
    (1.0 + monthly).powi(12) - 1.0
}

pub fn snapshot_net_worth(snapshot: &Snapshot) -> f64 {
    snapshot
        .custom_columns
        .values()
        .map(|c| match c.kind {
            ColumnKind::Asset => c.value,
            ColumnKind::Liability => -c.value,
        })
        .sum()
}

/// Snapshot history as an ascending net-worth series. The sort is stable, so
/// snapshots sharing a date keep their input order.
pub fn to_series(snapshots: &[Snapshot]) -> Vec<SnapshotPoint> {
    let mut sorted: Vec<&Snapshot> = snapshots.iter().collect();
    sorted.sort_by_key(|s| s.date);
    sorted
        .into_iter()
        .map(|s| SnapshotPoint {
            date: s.date,
            net_worth: snapshot_net_worth(s),
        })
        .collect()
}

pub fn latest_snapshot(snapshots: &[Snapshot]) -> Option<&Snapshot> {
    snapshots
        .iter()
        .reduce(|best, s| if s.date > best.date { s } else { best })
}

pub fn items_from_snapshot(snapshot: &Snapshot, kind: ColumnKind) -> Vec<NetWorthItem> {
    snapshot
        .custom_columns
        .iter()
        .filter(|(_, c)| c.kind == kind)
        .map(|(name, c)| NetWorthItem {
            id: c.investment_type_id.clone().unwrap_or_else(|| name.clone()),
            kind,
            name: name.clone(),
            category: None,
            current_value: c.value,
            monthly_growth_rate: None,
        })
        .collect()
}

pub fn months_for_range(range: TimeRange) -> u32 {
    match range {
        TimeRange::OneMonth => 1,
        TimeRange::ThreeMonths => 3,
        TimeRange::OneYear => 12,
        TimeRange::FiveYears => 60,
        // 10Y default when no history bounds the range
        TimeRange::TenYears | TimeRange::All => 120,
    }
}

/// Project asset/liability line items forward, each compounding at its own
/// monthly growth rate, and emit the resulting net-worth series.
pub fn generate_net_worth_series(
    assets: &[NetWorthItem],
    liabilities: &[NetWorthItem],
    range: TimeRange,
    plan_start: Date,
) -> Vec<SnapshotPoint> {
    let months = months_for_range(range);
    let mut asset_values: Vec<f64> = assets.iter().map(|a| a.current_value).collect();
    let mut liability_values: Vec<f64> = liabilities.iter().map(|l| l.current_value).collect();

    let mut points = Vec::with_capacity(months as usize + 1);
    for m in 0..=months {
        let net_worth =
            asset_values.iter().sum::<f64>() - liability_values.iter().sum::<f64>();
        points.push(SnapshotPoint {
            date: month_start(plan_start, m),
            net_worth,
        });

        for (value, item) in asset_values.iter_mut().zip(assets) {
            *value *= 1.0 + item.monthly_growth_rate.unwrap_or(DEFAULT_ASSET_MONTHLY_GROWTH);
        }
        for (value, item) in liability_values.iter_mut().zip(liabilities) {
            *value *= 1.0
                + item
                    .monthly_growth_rate
                    .unwrap_or(DEFAULT_LIABILITY_MONTHLY_GROWTH);
        }
    }
    points
}
