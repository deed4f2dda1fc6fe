//! Chart- and table-ready presentation of an [`AnalyticalResult`].

use serde::Serialize;

use crate::entities::filter::ViewKind;
use crate::transform::aggregate::{AnalyticalResult, Series};

pub const SOURCE_LINE: &str = "Source: FDA FAERS via OpenFDA";
pub const DISCLAIMER: &str =
    "Spontaneous reports do not prove causation. Consult a healthcare professional.";
const MAX_LABEL_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadRow {
    pub label: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentationPayload {
    pub view: ViewKind,
    pub title: String,
    pub filters: String,
    pub columns: [&'static str; 3],
    pub rows: Vec<PayloadRow>,
    pub denominator_label: &'static str,
    pub denominator: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
    pub source: &'static str,
    pub disclaimer: &'static str,
}

pub(crate) fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Single-line, pipe-safe label of at most 60 characters.
pub(crate) fn clean_label(raw: &str) -> String {
    let flat = raw
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let flat = flat.trim();
    if flat.is_empty() {
        return "-".to_string();
    }

    let truncated = if flat.chars().count() > MAX_LABEL_CHARS {
        let mut out: String = flat.chars().take(MAX_LABEL_CHARS - 1).collect();
        out.truncate(out.trim_end().len());
        out.push('…');
        out
    } else {
        flat.to_string()
    };
    truncated.replace('|', "\\|")
}

fn title(result: &AnalyticalResult) -> String {
    let subject = match &result.event {
        Some(event) if result.view.requires_event() => format!("{} + {event}", result.drug),
        _ => result.drug.to_string(),
    };
    format!("{}: {subject}", result.view.label())
}

/// Column headings and denominator label per view.
pub(crate) fn layout(view: ViewKind) -> ([&'static str; 3], &'static str) {
    match view {
        ViewKind::TopEvents => (
            ["Adverse Event", "Reports", "% of Reports"],
            "Reports for drug",
        ),
        ViewKind::SeriousOutcomes => (
            ["Outcome", "Reports", "% of Serious Reports"],
            "Serious reports",
        ),
        ViewKind::EventFrequency => (
            ["Adverse Event", "Reports", "% of Drug Reports"],
            "Reports for drug",
        ),
        ViewKind::TimeSeries => (
            ["Period", "Reports", "% of Drug Reports in Period"],
            "Drug-event reports",
        ),
        ViewKind::ReportSources => (
            ["Reporter", "Reports", "% of Reports"],
            "Reports for drug",
        ),
        ViewKind::Reports => (
            ["Reaction", "Reports", "% of Sample"],
            "Reports in sample",
        ),
    }
}

fn rows(series: &Series) -> Vec<PayloadRow> {
    match series {
        Series::Ranked(entries) => entries
            .iter()
            .map(|e| PayloadRow {
                label: clean_label(&e.label),
                count: e.count,
                percentage: round_one_decimal(e.percentage),
            })
            .collect(),
        Series::Timeline(periods) => periods
            .iter()
            .map(|p| PayloadRow {
                label: clean_label(&p.period),
                count: p.count,
                percentage: round_one_decimal(p.percentage),
            })
            .collect(),
    }
}

/// Builds the presentation payload for `result`. Never fails.
pub fn format(result: &AnalyticalResult) -> PresentationPayload {
    let (columns, denominator_label) = layout(result.view);
    let note = if result.series.is_empty() {
        Some("No matching reports found for these filters.")
    } else if result.view == ViewKind::SeriousOutcomes {
        Some("Outcome categories overlap; one report can count toward several.")
    } else {
        None
    };

    PresentationPayload {
        view: result.view,
        title: title(result),
        filters: result.filters.clone(),
        columns,
        rows: rows(&result.series),
        denominator_label,
        denominator: result.denominator,
        note,
        source: SOURCE_LINE,
        disclaimer: DISCLAIMER,
    }
}
