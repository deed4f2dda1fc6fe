//! Pure aggregation of openFDA counts into ranked and time-bucketed series.
//!
//! Percentages here are unrounded; rounding happens when results are formatted.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::entities::filter::{TimeGranularity, ViewKind};
use crate::entities::query::SeriousCategory;
use crate::sources::openfda::{CountBucket, ReportRecord};
use crate::transform::drug_name::NormalizedName;
use crate::utils::date::parse_receipt_date;

pub const OTHER_SOURCES_LABEL: &str = "Other";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub label: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodCount {
    pub period: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum Series {
    Ranked(Vec<RankedEntry>),
    Timeline(Vec<PeriodCount>),
}

impl Series {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Ranked(rows) => rows.is_empty(),
            Self::Timeline(rows) => rows.is_empty(),
        }
    }
}

/// One computed view. `denominator` is the total behind the percentages, never the row sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticalResult {
    pub view: ViewKind,
    pub drug: NormalizedName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<NormalizedName>,
    pub filters: String,
    pub denominator: u64,
    pub series: Series,
}

/// `count / denominator × 100`, clamped to `[0, 100]`; `0` for an empty denominator.
pub fn percentage(count: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    ((count as f64 * 100.0) / denominator as f64).clamp(0.0, 100.0)
}

fn ranked(label: impl Into<String>, count: u64, denominator: u64) -> RankedEntry {
    RankedEntry {
        label: label.into(),
        count,
        percentage: percentage(count, denominator),
    }
}

/// Most frequent reaction terms against the filtered drug total.
pub fn top_events(buckets: &[CountBucket], total: u64, top_n: usize) -> Vec<RankedEntry> {
    if total == 0 {
        return Vec::new();
    }
    let mut rows: Vec<&CountBucket> = buckets
        .iter()
        .filter(|b| !b.term.trim().is_empty())
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows.into_iter()
        .take(top_n)
        .map(|b| ranked(b.term.trim(), b.count, total))
        .collect()
}

/// Seriousness categories against reports flagged serious. Categories overlap, so rows may sum past 100%.
pub fn serious_outcomes(
    category_counts: &[(SeriousCategory, u64)],
    serious_total: u64,
    top_n: usize,
) -> Vec<RankedEntry> {
    if serious_total == 0 {
        return Vec::new();
    }
    let mut rows: Vec<&(SeriousCategory, u64)> =
        category_counts.iter().filter(|(_, count)| *count > 0).collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows.into_iter()
        .take(top_n)
        .map(|(category, count)| ranked(category.label(), *count, serious_total))
        .collect()
}

/// Share of the drug's reports that mention `event`. Always a single row.
pub fn event_frequency(event: &NormalizedName, pair_total: u64, drug_total: u64) -> Vec<RankedEntry> {
    vec![ranked(event.as_str(), pair_total, drug_total)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PeriodKey {
    year: u32,
    /// Quarter for quarterly series, `0` for yearly.
    sub: u32,
}

impl PeriodKey {
    fn from_term(term: &str, granularity: TimeGranularity) -> Option<Self> {
        let (year, month) = parse_receipt_date(term)?;
        let sub = match granularity {
            TimeGranularity::Yearly => 0,
            TimeGranularity::Quarterly => (month - 1) / 3 + 1,
        };
        Some(Self { year, sub })
    }

    fn label(self) -> String {
        if self.sub == 0 {
            format!("{:04}", self.year)
        } else {
            format!("{:04}-Q{}", self.year, self.sub)
        }
    }
}

fn fold_periods(buckets: &[CountBucket], granularity: TimeGranularity) -> BTreeMap<PeriodKey, u64> {
    let mut periods = BTreeMap::new();
    for bucket in buckets {
        match PeriodKey::from_term(&bucket.term, granularity) {
            Some(key) => *periods.entry(key).or_insert(0) += bucket.count,
            None => tracing::debug!(term = bucket.term.as_str(), "skipping malformed date bucket"),
        }
    }
    periods
}

/// Folds daily receipt-date buckets into ascending periods.
///
/// Each period's percentage is the pair count over the drug's count in the same period.
/// Periods without pair reports are left out.
pub fn time_series(
    event_buckets: &[CountBucket],
    drug_buckets: &[CountBucket],
    granularity: TimeGranularity,
) -> Vec<PeriodCount> {
    let drug_periods = fold_periods(drug_buckets, granularity);
    fold_periods(event_buckets, granularity)
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(key, count)| PeriodCount {
            period: key.label(),
            count,
            percentage: percentage(count, drug_periods.get(&key).copied().unwrap_or(0)),
        })
        .collect()
}

/// Human label for a `primarysource.qualification` code.
pub fn qualification_label(code: &str) -> String {
    match code.trim() {
        "1" => "Physician".to_string(),
        "2" => "Pharmacist".to_string(),
        "3" => "Other Health Professional".to_string(),
        "4" => "Lawyer".to_string(),
        "5" => "Consumer or Non-Health Professional".to_string(),
        other => format!("Unknown ({other})"),
    }
}

/// Reporter types for the drug; the tail past `top_n` and unreported sources land in `Other`.
pub fn report_sources(buckets: &[CountBucket], drug_total: u64, top_n: usize) -> Vec<RankedEntry> {
    if drug_total == 0 {
        return Vec::new();
    }

    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for bucket in buckets {
        let label = qualification_label(&bucket.term);
        let slot = counts.entry(label.clone()).or_insert_with(|| {
            order.push(label);
            0
        });
        *slot += bucket.count;
    }

    let mut rows: Vec<(String, u64)> = order
        .into_iter()
        .map(|label| {
            let count = counts.get(&label).copied().unwrap_or(0);
            (label, count)
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows.truncate(top_n);

    let shown: u64 = rows.iter().map(|(_, count)| count).sum();
    let mut out: Vec<RankedEntry> = rows
        .into_iter()
        .map(|(label, count)| ranked(label, count, drug_total))
        .collect();
    let remainder = drug_total.saturating_sub(shown);
    if remainder > 0 {
        out.push(ranked(OTHER_SOURCES_LABEL, remainder, drug_total));
    }
    out
}

/// Tallies over a sample of fetched reports. Percentages are against the sample size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub sample_size: usize,
    pub reactions: Vec<RankedEntry>,
    pub seriousness: Vec<RankedEntry>,
    pub reporters: Vec<RankedEntry>,
}

fn rank_tally(tally: HashMap<String, (String, u64)>, sample: u64, top_n: usize) -> Vec<RankedEntry> {
    let mut rows: Vec<(String, u64)> = tally.into_values().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows.into_iter()
        .take(top_n)
        .map(|(label, count)| ranked(label, count, sample))
        .collect()
}

/// A reaction counts once per report; seriousness counts only explicit `true` flags.
pub fn summarize_records(records: &[ReportRecord], top_n: usize) -> RecordSummary {
    let sample = records.len() as u64;
    let mut reactions: HashMap<String, (String, u64)> = HashMap::new();
    let mut reporters: HashMap<String, (String, u64)> = HashMap::new();

    for record in records {
        let mut seen: HashSet<String> = HashSet::new();
        for reaction in &record.reactions {
            let key = reaction.trim().to_lowercase();
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            reactions
                .entry(key)
                .or_insert_with(|| (reaction.trim().to_string(), 0))
                .1 += 1;
        }
        if let Some(code) = record.qualification.as_deref() {
            let label = qualification_label(code);
            reporters.entry(label.clone()).or_insert((label, 0)).1 += 1;
        }
    }

    let mut seriousness: Vec<RankedEntry> = SeriousCategory::ALL
        .iter()
        .map(|category| {
            let count = records
                .iter()
                .filter(|r| r.seriousness.get(*category) == Some(true))
                .count() as u64;
            ranked(category.label(), count, sample)
        })
        .filter(|row| row.count > 0)
        .collect();
    seriousness.sort_by(|a, b| b.count.cmp(&a.count));

    RecordSummary {
        sample_size: records.len(),
        reactions: rank_tally(reactions, sample, top_n),
        seriousness,
        reporters: rank_tally(reporters, sample, top_n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::openfda::SeriousnessFlags;
    use crate::transform::drug_name::normalize_event;
    use proptest::prelude::*;

    fn buckets(pairs: &[(&str, u64)]) -> Vec<CountBucket> {
        pairs.iter().map(|(t, c)| CountBucket::new(*t, *c)).collect()
    }

    #[test]
    fn top_events_ranks_against_drug_total() {
        let rows = top_events(
            &buckets(&[("NAUSEA", 120), ("HEADACHE", 300), ("RASH", 120), ("DIZZINESS", 80)]),
            1000,
            3,
        );
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["HEADACHE", "NAUSEA", "RASH"]);
        assert_eq!(rows[0].percentage, 30.0);
        assert_eq!(rows[1].percentage, 12.0);
    }

    #[test]
    fn zero_total_yields_empty_series() {
        assert!(top_events(&buckets(&[("NAUSEA", 3)]), 0, 10).is_empty());
        assert!(serious_outcomes(&[(SeriousCategory::Death, 3)], 0, 6).is_empty());
        assert!(report_sources(&buckets(&[("1", 3)]), 0, 5).is_empty());
    }

    #[test]
    fn event_frequency_is_single_row_even_without_reports() {
        let event = normalize_event("headache");
        let rows = event_frequency(&event, 50, 500);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].percentage, 10.0);

        let rows = event_frequency(&event, 0, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].percentage, 0.0);
    }

    #[test]
    fn serious_outcomes_omits_empty_categories_and_keeps_ties_in_order() {
        let rows = serious_outcomes(
            &[
                (SeriousCategory::Death, 10),
                (SeriousCategory::LifeThreatening, 0),
                (SeriousCategory::Hospitalization, 40),
                (SeriousCategory::Disability, 10),
            ],
            80,
            6,
        );
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Hospitalization", "Death", "Disability"]);
        assert_eq!(rows[0].percentage, 50.0);
    }

    #[test]
    fn time_series_buckets_are_sorted_and_sparse() {
        let events = buckets(&[
            ("20210405", 2),
            ("20190102", 1),
            ("garbage", 9),
            ("20190630", 3),
            ("20210101", 1),
        ]);
        let drug = buckets(&[("20190102", 10), ("20190630", 10), ("20210101", 5), ("20210405", 5)]);

        let yearly = time_series(&events, &drug, TimeGranularity::Yearly);
        let periods: Vec<&str> = yearly.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["2019", "2021"]);
        assert_eq!(yearly[0].count, 4);
        assert_eq!(yearly[0].percentage, 20.0);
        assert_eq!(yearly[1].percentage, 30.0);

        let quarterly = time_series(&events, &drug, TimeGranularity::Quarterly);
        let periods: Vec<&str> = quarterly.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["2019-Q1", "2019-Q2", "2021-Q1", "2021-Q2"]);
    }

    #[test]
    fn report_sources_folds_tail_into_other() {
        let rows = report_sources(
            &buckets(&[("5", 400), ("1", 300), ("3", 150), ("2", 50), ("9", 20)]),
            1000,
            3,
        );
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Consumer or Non-Health Professional",
                "Physician",
                "Other Health Professional",
                "Other"
            ]
        );
        assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 1000);
        assert_eq!(rows[3].count, 150);
    }

    #[test]
    fn unknown_qualification_codes_stay_distinct() {
        assert_eq!(qualification_label("7"), "Unknown (7)");
        assert_eq!(qualification_label(" 2 "), "Pharmacist");
    }

    #[test]
    fn summarize_records_counts_each_reaction_once_per_report() {
        let records = vec![
            ReportRecord {
                report_id: "1".into(),
                reactions: vec!["Rash".into(), "rash".into(), "Fatigue".into()],
                seriousness: SeriousnessFlags {
                    death: Some(true),
                    hospitalization: Some(false),
                    ..SeriousnessFlags::default()
                },
                qualification: Some("1".into()),
                ..ReportRecord::default()
            },
            ReportRecord {
                report_id: "2".into(),
                reactions: vec!["Rash".into()],
                ..ReportRecord::default()
            },
        ];

        let summary = summarize_records(&records, 10);
        assert_eq!(summary.sample_size, 2);
        assert_eq!(summary.reactions[0].label, "Rash");
        assert_eq!(summary.reactions[0].count, 2);
        assert_eq!(summary.reactions[0].percentage, 100.0);
        assert_eq!(summary.seriousness.len(), 1);
        assert_eq!(summary.seriousness[0].label, "Death");
        assert_eq!(summary.reporters.len(), 1);
        assert_eq!(summary.reporters[0].count, 1);
    }

    fn arb_date_term() -> impl Strategy<Value = String> {
        (2004u32..2030, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| format!("{y:04}{m:02}{d:02}"))
    }

    proptest! {
        #[test]
        fn percentages_stay_within_bounds(
            counts in prop::collection::vec(0u64..10_000, 0..30),
            total in 0u64..5_000,
            top_n in 1usize..20,
        ) {
            let input: Vec<CountBucket> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| CountBucket::new(format!("TERM{i}"), *c))
                .collect();
            for row in top_events(&input, total, top_n) {
                prop_assert!((0.0..=100.0).contains(&row.percentage));
            }
            for row in report_sources(&input, total, top_n) {
                prop_assert!((0.0..=100.0).contains(&row.percentage));
            }
        }

        #[test]
        fn time_series_is_strictly_increasing(
            terms in prop::collection::vec((arb_date_term(), 1u64..50), 0..40),
            quarterly in any::<bool>(),
        ) {
            let input: Vec<CountBucket> = terms.iter().map(|(t, c)| CountBucket::new(t.clone(), *c)).collect();
            let granularity = if quarterly { TimeGranularity::Quarterly } else { TimeGranularity::Yearly };
            let series = time_series(&input, &input, granularity);
            for pair in series.windows(2) {
                prop_assert!(pair[0].period < pair[1].period);
            }
            prop_assert_eq!(
                series.iter().map(|p| p.count).sum::<u64>(),
                input.iter().map(|b| b.count).sum::<u64>()
            );
        }

        #[test]
        fn report_sources_rows_sum_to_drug_total(
            counts in prop::collection::vec(0u64..500, 0..8),
            slack in 0u64..1_000,
            top_n in 1usize..8,
        ) {
            let input: Vec<CountBucket> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| CountBucket::new((i + 1).to_string(), *c))
                .collect();
            let total = counts.iter().sum::<u64>() + slack;
            let rows = report_sources(&input, total, top_n);
            if total > 0 {
                prop_assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), total);
            }
        }
    }
}
