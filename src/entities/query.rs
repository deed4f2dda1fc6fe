//! Turns a [`QueryFilter`] into the openFDA search expressions each view needs.

use serde::Serialize;

use crate::entities::filter::{QueryFilter, ViewKind};
use crate::error::FaersLensError;
use crate::utils::date::{RangeEdge, range_boundary};
use crate::utils::query::{quote_phrase, range_clause};

pub(crate) const DRUG_FIELD: &str = "patient.drug.medicinalproduct";
pub(crate) const REACTION_FIELD: &str = "patient.reaction.reactionmeddrapt";
pub(crate) const REACTION_COUNT_FIELD: &str = "patient.reaction.reactionmeddrapt.exact";
/// First receipt date; used for date-range filtering.
pub(crate) const RECEIPT_DATE_FIELD: &str = "receivedate";
/// Latest receipt date; time series are bucketed on this.
pub(crate) const LATEST_RECEIPT_DATE_FIELD: &str = "receiptdate";
pub(crate) const QUALIFICATION_FIELD: &str = "primarysource.qualification";

/// openFDA caps `count` and `limit` at 1000 entries.
pub const MAX_RESULT_LIMIT: usize = 1000;
const QUALIFICATION_BUCKET_LIMIT: usize = 100;
/// `patient.patientonsetageunit` code for years.
const AGE_UNIT_YEARS: &str = "801";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SeriousCategory {
    Death,
    LifeThreatening,
    Hospitalization,
    Disability,
    CongenitalAnomaly,
    Other,
}

impl SeriousCategory {
    pub const ALL: [SeriousCategory; 6] = [
        Self::Death,
        Self::LifeThreatening,
        Self::Hospitalization,
        Self::Disability,
        Self::CongenitalAnomaly,
        Self::Other,
    ];

    pub fn field(self) -> &'static str {
        match self {
            Self::Death => "seriousnessdeath",
            Self::LifeThreatening => "seriousnesslifethreatening",
            Self::Hospitalization => "seriousnesshospitalization",
            Self::Disability => "seriousnessdisabling",
            Self::CongenitalAnomaly => "seriousnesscongenitalanomali",
            Self::Other => "seriousnessother",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Death => "Death",
            Self::LifeThreatening => "Life Threatening",
            Self::Hospitalization => "Hospitalization",
            Self::Disability => "Disability",
            Self::CongenitalAnomaly => "Congenital Anomaly",
            Self::Other => "Other Serious",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryDirective {
    /// Only `meta.results.total` is read.
    Total,
    /// Server-side grouping; `limit: None` lets openFDA return every bucket (date fields).
    Count {
        field: &'static str,
        limit: Option<usize>,
    },
    /// Raw report records, paginated by the client.
    Records { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendQuery {
    pub search: String,
    pub directive: QueryDirective,
}

impl BackendQuery {
    fn total(search: String) -> Self {
        Self {
            search,
            directive: QueryDirective::Total,
        }
    }

    fn count(search: String, field: &'static str, limit: Option<usize>) -> Self {
        Self {
            search,
            directive: QueryDirective::Count { field, limit },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledQuery {
    pub label: Option<&'static str>,
    pub query: BackendQuery,
}

/// Every backend query one view needs: the numerator(s) and, for percentage views, the denominator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    pub view: ViewKind,
    pub numerators: Vec<LabeledQuery>,
    pub denominator: Option<BackendQuery>,
}

impl QueryPlan {
    fn single(view: ViewKind, numerator: BackendQuery, denominator: Option<BackendQuery>) -> Self {
        Self {
            view,
            numerators: vec![LabeledQuery {
                label: None,
                query: numerator,
            }],
            denominator,
        }
    }

    pub fn primary(&self) -> Option<&BackendQuery> {
        self.numerators.first().map(|n| &n.query)
    }
}

fn join(clauses: &[String]) -> String {
    clauses.join(" AND ")
}

fn drug_clause(filter: &QueryFilter) -> Result<String, FaersLensError> {
    let drug = filter.drug();
    if drug.is_empty() {
        return Err(FaersLensError::invalid(
            "drug name",
            "a drug name is required (e.g. 'ibuprofen' or 'Advil')",
        ));
    }
    Ok(format!("{DRUG_FIELD}:{}", quote_phrase(drug.as_str())))
}

fn event_clause(filter: &QueryFilter) -> Result<String, FaersLensError> {
    let event = filter
        .event()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            FaersLensError::invalid(
                "event name",
                "an adverse event term is required (e.g. 'headache')",
            )
        })?;
    Ok(format!("{REACTION_FIELD}:{}", quote_phrase(event.as_str())))
}

/// Demographic and date constraints shared by numerator and denominator queries.
fn population_clauses(filter: &QueryFilter) -> Result<Vec<String>, FaersLensError> {
    let mut clauses = Vec::new();

    if let Some(code) = filter.sex().openfda_code() {
        clauses.push(format!("patient.patientsex:{code}"));
    }

    let ages = filter.ages();
    ages.validate()?;
    if !ages.is_unrestricted() {
        clauses.push(range_clause(
            "patient.patientonsetage",
            Some(&ages.min.to_string()),
            Some(&ages.max.to_string()),
        ));
        clauses.push(format!("patient.patientonsetageunit:{AGE_UNIT_YEARS}"));
    }

    let dates = filter.dates();
    if !dates.is_open() {
        let from = dates
            .start
            .as_deref()
            .map(|v| range_boundary(v, RangeEdge::Start))
            .transpose()?;
        let to = dates
            .end
            .as_deref()
            .map(|v| range_boundary(v, RangeEdge::End))
            .transpose()?;
        if let (Some(from), Some(to)) = (&from, &to)
            && from > to
        {
            return Err(FaersLensError::invalid(
                "date range",
                format!("start ({from}) must be on or before end ({to})"),
            ));
        }
        clauses.push(range_clause(
            RECEIPT_DATE_FIELD,
            from.as_deref(),
            to.as_deref(),
        ));
    }

    Ok(clauses)
}

fn checked_limit(filter: &QueryFilter) -> Result<usize, FaersLensError> {
    let limit = filter.limit();
    if limit == 0 || limit > MAX_RESULT_LIMIT {
        return Err(FaersLensError::invalid(
            "result limit",
            format!("{limit} is outside 1..={MAX_RESULT_LIMIT}"),
        ));
    }
    Ok(limit)
}

/// Builds the query plan for `view`. Fails before any network call when a constraint is unusable.
pub fn build(filter: &QueryFilter, view: ViewKind) -> Result<QueryPlan, FaersLensError> {
    let drug = drug_clause(filter)?;
    let population = population_clauses(filter)?;

    let mut drug_only = vec![drug];
    drug_only.extend(population);

    let with_event = |base: &[String]| -> Result<String, FaersLensError> {
        let mut clauses = base.to_vec();
        clauses.push(event_clause(filter)?);
        Ok(join(&clauses))
    };

    let plan = match view {
        ViewKind::TopEvents => {
            let limit = checked_limit(filter)?;
            let search = join(&drug_only);
            QueryPlan::single(
                view,
                BackendQuery::count(search.clone(), REACTION_COUNT_FIELD, Some(limit)),
                Some(BackendQuery::total(search)),
            )
        }
        ViewKind::SeriousOutcomes => {
            checked_limit(filter)?;
            let mut serious = drug_only.clone();
            serious.push("serious:1".to_string());
            let numerators = SeriousCategory::ALL
                .iter()
                .map(|category| {
                    let mut clauses = serious.clone();
                    clauses.push(format!("{}:1", category.field()));
                    LabeledQuery {
                        label: Some(category.label()),
                        query: BackendQuery::total(join(&clauses)),
                    }
                })
                .collect();
            QueryPlan {
                view,
                numerators,
                denominator: Some(BackendQuery::total(join(&serious))),
            }
        }
        ViewKind::EventFrequency => QueryPlan::single(
            view,
            BackendQuery::total(with_event(&drug_only)?),
            Some(BackendQuery::total(join(&drug_only))),
        ),
        ViewKind::TimeSeries => QueryPlan::single(
            view,
            BackendQuery::count(with_event(&drug_only)?, LATEST_RECEIPT_DATE_FIELD, None),
            Some(BackendQuery::count(
                join(&drug_only),
                LATEST_RECEIPT_DATE_FIELD,
                None,
            )),
        ),
        ViewKind::ReportSources => {
            checked_limit(filter)?;
            let search = join(&drug_only);
            QueryPlan::single(
                view,
                BackendQuery::count(
                    search.clone(),
                    QUALIFICATION_FIELD,
                    Some(QUALIFICATION_BUCKET_LIMIT),
                ),
                Some(BackendQuery::total(search)),
            )
        }
        ViewKind::Reports => {
            let limit = checked_limit(filter)?;
            let search = match filter.event().filter(|e| !e.is_empty()) {
                Some(_) => with_event(&drug_only)?,
                None => join(&drug_only),
            };
            QueryPlan::single(
                view,
                BackendQuery {
                    search,
                    directive: QueryDirective::Records { limit },
                },
                None,
            )
        }
    };

    tracing::debug!(view = ?plan.view, queries = plan.numerators.len(), "built query plan");
    Ok(plan)
}
