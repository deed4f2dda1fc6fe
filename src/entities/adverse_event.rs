//! Analytical views over FAERS reports: each entry point builds a query plan,
//! runs its sub-queries concurrently, and aggregates the answers.

use futures::future::try_join_all;
use serde::Serialize;

use crate::entities::filter::{QueryFilter, TimeGranularity, ViewKind};
use crate::entities::query::{self, BackendQuery, QueryPlan, SeriousCategory};
use crate::error::FaersLensError;
use crate::sources::openfda::{BackendResponse, OpenFdaClient, ReportRecord};
use crate::transform::aggregate::{self, AnalyticalResult, RecordSummary, Series};
use crate::transform::drug_name::NormalizedName;

pub const DEFAULT_TOP_EVENTS: usize = 10;
pub const DEFAULT_SERIOUS_OUTCOMES: usize = 6;
pub const DEFAULT_REPORT_SOURCES: usize = 5;
pub const DEFAULT_RECENT_REPORTS: usize = 20;

/// A page of raw reports plus tallies over that page.
#[derive(Debug, Clone, Serialize)]
pub struct ReportDigest {
    pub drug: NormalizedName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<NormalizedName>,
    pub filters: String,
    pub total: u64,
    pub summary: RecordSummary,
    pub records: Vec<ReportRecord>,
}

fn result(filter: &QueryFilter, view: ViewKind, denominator: u64, series: Series) -> AnalyticalResult {
    AnalyticalResult {
        view,
        drug: filter.drug().clone(),
        event: filter.event().cloned(),
        filters: filter.summary(),
        denominator,
        series,
    }
}

fn plan_parts(plan: &QueryPlan) -> Result<(&BackendQuery, &BackendQuery), FaersLensError> {
    match (plan.primary(), plan.denominator.as_ref()) {
        (Some(numerator), Some(denominator)) => Ok((numerator, denominator)),
        _ => Err(FaersLensError::invalid(
            "query plan",
            format!("{} needs a numerator and a denominator", plan.view.label()),
        )),
    }
}

async fn execute_pair(
    client: &OpenFdaClient,
    plan: &QueryPlan,
) -> Result<(BackendResponse, BackendResponse), FaersLensError> {
    let (numerator, denominator) = plan_parts(plan)?;
    tokio::try_join!(client.execute(numerator), client.execute(denominator))
}

/// Most frequently reported reactions for a drug, as a share of its filtered reports.
pub async fn top_adverse_events(
    client: &OpenFdaClient,
    filter: &QueryFilter,
) -> Result<AnalyticalResult, FaersLensError> {
    let plan = query::build(filter, ViewKind::TopEvents)?;
    let (events, drug) = execute_pair(client, &plan).await?;
    let total = drug.total_or_zero();
    let rows = aggregate::top_events(&events.buckets, total, filter.limit());
    Ok(result(filter, plan.view, total, Series::Ranked(rows)))
}

/// Seriousness categories among the drug's serious reports.
pub async fn serious_outcomes(
    client: &OpenFdaClient,
    filter: &QueryFilter,
) -> Result<AnalyticalResult, FaersLensError> {
    let plan = query::build(filter, ViewKind::SeriousOutcomes)?;
    let Some(denominator) = plan.denominator.as_ref() else {
        return Err(FaersLensError::invalid(
            "query plan",
            "serious outcomes need a denominator",
        ));
    };

    let categories = try_join_all(plan.numerators.iter().map(|n| client.execute(&n.query)));
    let (category_totals, serious) = tokio::try_join!(categories, client.execute(denominator))?;

    let counts: Vec<(SeriousCategory, u64)> = SeriousCategory::ALL
        .iter()
        .copied()
        .zip(category_totals.iter().map(BackendResponse::total_or_zero))
        .collect();
    let serious_total = serious.total_or_zero();
    let rows = aggregate::serious_outcomes(&counts, serious_total, filter.limit());
    Ok(result(filter, plan.view, serious_total, Series::Ranked(rows)))
}

/// How often `event` appears among the drug's reports.
pub async fn drug_event_stats(
    client: &OpenFdaClient,
    filter: &QueryFilter,
) -> Result<AnalyticalResult, FaersLensError> {
    let plan = query::build(filter, ViewKind::EventFrequency)?;
    let (pair, drug) = execute_pair(client, &plan).await?;
    let drug_total = drug.total_or_zero();
    let Some(event) = filter.event() else {
        return Err(FaersLensError::invalid(
            "event name",
            "an adverse event term is required (e.g. 'headache')",
        ));
    };
    let rows = aggregate::event_frequency(event, pair.total_or_zero(), drug_total);
    Ok(result(filter, plan.view, drug_total, Series::Ranked(rows)))
}

/// Drug-event report counts per year or quarter of FDA receipt.
pub async fn time_series(
    client: &OpenFdaClient,
    filter: &QueryFilter,
    granularity: TimeGranularity,
) -> Result<AnalyticalResult, FaersLensError> {
    let plan = query::build(filter, ViewKind::TimeSeries)?;
    let (pair, drug) = execute_pair(client, &plan).await?;
    let periods = aggregate::time_series(&pair.buckets, &drug.buckets, granularity);
    let denominator = periods.iter().map(|p| p.count).sum();
    Ok(result(filter, plan.view, denominator, Series::Timeline(periods)))
}

/// Who filed the drug's reports, grouped by reporter qualification.
pub async fn report_sources(
    client: &OpenFdaClient,
    filter: &QueryFilter,
) -> Result<AnalyticalResult, FaersLensError> {
    let plan = query::build(filter, ViewKind::ReportSources)?;
    let (sources, drug) = execute_pair(client, &plan).await?;
    let drug_total = drug.total_or_zero();
    let rows = aggregate::report_sources(&sources.buckets, drug_total, filter.limit());
    Ok(result(filter, plan.view, drug_total, Series::Ranked(rows)))
}

/// The most recent matching reports, fetched page by page, with tallies over them.
pub async fn recent_reports(
    client: &OpenFdaClient,
    filter: &QueryFilter,
) -> Result<ReportDigest, FaersLensError> {
    let plan = query::build(filter, ViewKind::Reports)?;
    let Some(primary) = plan.primary() else {
        return Err(FaersLensError::invalid("query plan", "reports need a query"));
    };
    let resp = client.execute(primary).await?;
    let summary = aggregate::summarize_records(&resp.records, DEFAULT_TOP_EVENTS);
    Ok(ReportDigest {
        drug: filter.drug().clone(),
        event: filter.event().cloned(),
        filters: filter.summary(),
        total: resp.total.unwrap_or(resp.records.len() as u64),
        summary,
        records: resp.records,
    })
}
