use std::sync::OnceLock;

use minijinja::{Environment, context};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::entities::adverse_event::ReportDigest;
use crate::entities::filter::ViewKind;
use crate::error::FaersLensError;
use crate::render::payload::{self, DISCLAIMER, SOURCE_LINE, clean_label};
use crate::sources::openfda::ReportRecord;
use crate::transform::aggregate::{AnalyticalResult, qualification_label};

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn env() -> Result<&'static Environment<'static>, FaersLensError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("pct", |v: f64| -> String { format!("{v:.1}%") });
    env.add_filter("cell", |s: String| -> String { clean_label(&s) });
    env.add_template(
        "analysis.md.j2",
        include_str!("../../templates/analysis.md.j2"),
    )?;
    env.add_template("reports.md.j2", include_str!("../../templates/reports.md.j2"))?;

    let _ = ENV.set(env);
    Ok(ENV
        .get()
        .expect("ENV should be initialized by the time this is reached"))
}

fn retrieved_footer() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map(|ts| format!("Retrieved {ts}"))
        .unwrap_or_default()
}

fn with_footer(mut body: String, footer: &str) -> String {
    let footer = footer.trim();
    if footer.is_empty() || body.contains(footer) {
        return body;
    }
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push('\n');
    body.push_str(footer);
    body.push('\n');
    body
}

/// `Showing 1-20 of 900 reports.` style footer for a fetched page.
pub(crate) fn reports_footer(returned: usize, total: u64) -> String {
    if returned == 0 {
        return format!("Showing 0 of {total} reports.");
    }
    if returned as u64 >= total {
        return format!("Showing all {returned} reports.");
    }
    format!("Showing 1-{returned} of {total} reports. Raise --limit for more.")
}

pub fn analysis_markdown(result: &AnalyticalResult) -> Result<String, FaersLensError> {
    let payload = payload::format(result);
    let tmpl = env()?.get_template("analysis.md.j2")?;
    let body = tmpl.render(context! { p => payload })?;
    Ok(with_footer(body, &retrieved_footer()))
}

#[derive(Serialize)]
struct ReportRow {
    id: String,
    received: String,
    serious: &'static str,
    reactions: String,
    reporter: String,
}

fn display_date(raw: Option<&str>) -> String {
    match raw {
        Some(v) if v.len() == 8 && v.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{}-{}-{}", &v[0..4], &v[4..6], &v[6..8])
        }
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

fn report_row(record: &ReportRecord) -> ReportRow {
    ReportRow {
        id: clean_label(&record.report_id),
        received: display_date(record.receipt_date.as_deref()),
        serious: match record.serious {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        },
        reactions: clean_label(&record.reactions.join(", ")),
        reporter: record
            .qualification
            .as_deref()
            .map(qualification_label)
            .map(|label| clean_label(&label))
            .unwrap_or_else(|| "-".to_string()),
    }
}

pub fn reports_markdown(digest: &ReportDigest) -> Result<String, FaersLensError> {
    let subject = match &digest.event {
        Some(event) => format!("{} + {event}", digest.drug),
        None => digest.drug.to_string(),
    };
    let rows: Vec<ReportRow> = digest.records.iter().map(report_row).collect();
    let (columns, sample_label) = payload::layout(ViewKind::Reports);
    let tmpl = env()?.get_template("reports.md.j2")?;
    let body = tmpl.render(context! {
        title => ViewKind::Reports.label(),
        subject => subject,
        columns => columns,
        sample_label => sample_label,
        filters => &digest.filters,
        rows => rows,
        summary => &digest.summary,
        source => SOURCE_LINE,
        disclaimer => DISCLAIMER,
    })?;
    let body = with_footer(body, &reports_footer(digest.records.len(), digest.total));
    Ok(with_footer(body, &retrieved_footer()))
}
