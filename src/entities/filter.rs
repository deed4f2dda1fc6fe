use serde::{Deserialize, Serialize};

use crate::error::FaersLensError;
use crate::transform::drug_name::{NormalizedName, normalize, normalize_event};

/// Onset ages above this are treated as data-entry errors rather than a filter.
pub const MAX_PLAUSIBLE_AGE: u32 = 150;
/// The default age window; a filter spanning it adds no age clause.
pub const DEFAULT_AGE_RANGE: (u32, u32) = (0, 120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[default]
    Any,
    Male,
    Female,
    Unknown,
}

impl Sex {
    pub fn from_flag(value: &str) -> Result<Self, FaersLensError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" | "any" => Ok(Self::Any),
            "m" | "male" | "1" => Ok(Self::Male),
            "f" | "female" | "2" => Ok(Self::Female),
            "u" | "unknown" | "0" => Ok(Self::Unknown),
            other => Err(FaersLensError::invalid(
                "sex",
                format!("'{other}' is not one of: all, male, female, unknown"),
            )),
        }
    }

    /// FAERS `patient.patientsex` code, or `None` when no constraint applies.
    pub(crate) fn openfda_code(self) -> Option<&'static str> {
        match self {
            Self::Any => None,
            Self::Male => Some("1"),
            Self::Female => Some("2"),
            Self::Unknown => Some("0"),
        }
    }
}

/// Inclusive onset-age window in years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl Default for AgeRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_AGE_RANGE.0,
            max: DEFAULT_AGE_RANGE.1,
        }
    }
}

impl AgeRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.min == 0 && self.max >= DEFAULT_AGE_RANGE.1
    }

    pub(crate) fn validate(&self) -> Result<(), FaersLensError> {
        if self.min > self.max {
            return Err(FaersLensError::invalid(
                "age range",
                format!("min_age ({}) must be <= max_age ({})", self.min, self.max),
            ));
        }
        if self.max > MAX_PLAUSIBLE_AGE {
            return Err(FaersLensError::invalid(
                "age range",
                format!("max_age ({}) must be <= {MAX_PLAUSIBLE_AGE}", self.max),
            ));
        }
        Ok(())
    }
}

/// Receipt-date window as entered by the user; converted to `YYYYMMDD` when a query is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateRange {
    pub fn new(start: Option<&str>, end: Option<&str>) -> Self {
        let clean = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            start: clean(start),
            end: clean(end),
        }
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewKind {
    TopEvents,
    SeriousOutcomes,
    EventFrequency,
    TimeSeries,
    ReportSources,
    Reports,
}

impl ViewKind {
    pub fn requires_event(self) -> bool {
        matches!(self, Self::EventFrequency | Self::TimeSeries)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TopEvents => "Top Adverse Events",
            Self::SeriousOutcomes => "Serious Outcomes",
            Self::EventFrequency => "Drug-Event Frequency",
            Self::TimeSeries => "Report Trend",
            Self::ReportSources => "Report Sources",
            Self::Reports => "Recent Reports",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    #[default]
    Yearly,
    Quarterly,
}

impl TimeGranularity {
    pub fn from_flag(value: &str) -> Result<Self, FaersLensError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "y" | "year" | "yearly" => Ok(Self::Yearly),
            "q" | "quarter" | "quarterly" => Ok(Self::Quarterly),
            other => Err(FaersLensError::invalid(
                "aggregation",
                format!("'{other}' is not one of: yearly, quarterly"),
            )),
        }
    }
}

/// Constraints for one request. Built once through the consuming `with_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFilter {
    drug: NormalizedName,
    event: Option<NormalizedName>,
    sex: Sex,
    ages: AgeRange,
    dates: DateRange,
    limit: usize,
}

impl QueryFilter {
    /// Normalizes `drug` through the brand table; an empty result is rejected when the query is built.
    pub fn new(drug: &str) -> Self {
        Self {
            drug: normalize(drug),
            event: None,
            sex: Sex::Any,
            ages: AgeRange::default(),
            dates: DateRange::default(),
            limit: 10,
        }
    }

    pub fn with_event(self, event: &str) -> Self {
        Self {
            event: Some(normalize_event(event)),
            ..self
        }
    }

    pub fn with_sex(self, sex: Sex) -> Self {
        Self { sex, ..self }
    }

    pub fn with_ages(self, ages: AgeRange) -> Self {
        Self { ages, ..self }
    }

    pub fn with_dates(self, dates: DateRange) -> Self {
        Self { dates, ..self }
    }

    pub fn with_limit(self, limit: usize) -> Self {
        Self { limit, ..self }
    }

    pub fn drug(&self) -> &NormalizedName {
        &self.drug
    }

    pub fn event(&self) -> Option<&NormalizedName> {
        self.event.as_ref()
    }

    pub fn sex(&self) -> Sex {
        self.sex
    }

    pub fn ages(&self) -> AgeRange {
        self.ages
    }

    pub fn dates(&self) -> &DateRange {
        &self.dates
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Short `key=value` description used in result headers.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("drug={}", self.drug)];
        if let Some(event) = &self.event {
            parts.push(format!("event={event}"));
        }
        if self.sex != Sex::Any {
            parts.push(format!("sex={:?}", self.sex).to_ascii_lowercase());
        }
        if !self.ages.is_unrestricted() {
            parts.push(format!("age={}-{}", self.ages.min, self.ages.max));
        }
        if let Some(start) = &self.dates.start {
            parts.push(format!("from={start}"));
        }
        if let Some(end) = &self.dates.end {
            parts.push(format!("to={end}"));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sex_flag_accepts_ui_spellings() {
        assert_eq!(Sex::from_flag("All").unwrap(), Sex::Any);
        assert_eq!(Sex::from_flag("Male").unwrap(), Sex::Male);
        assert_eq!(Sex::from_flag("f").unwrap(), Sex::Female);
        assert_eq!(Sex::from_flag("unknown").unwrap(), Sex::Unknown);
        let err = Sex::from_flag("x").unwrap_err();
        assert!(err.to_string().contains("Invalid sex"));
    }

    #[test]
    fn default_age_range_is_unrestricted() {
        assert!(AgeRange::default().is_unrestricted());
        assert!(AgeRange::new(0, 150).is_unrestricted());
        assert!(!AgeRange::new(18, 120).is_unrestricted());
        assert!(!AgeRange::new(0, 65).is_unrestricted());
    }

    #[test]
    fn age_range_validation_rejects_inverted_bounds() {
        let err = AgeRange::new(70, 20).validate().unwrap_err();
        assert!(matches!(err, FaersLensError::InvalidQuery { constraint: "age range", .. }));
        assert!(AgeRange::new(20, 20).validate().is_ok());
        assert!(AgeRange::new(0, 200).validate().is_err());
    }

    #[test]
    fn granularity_flag_accepts_ui_spellings() {
        assert_eq!(TimeGranularity::from_flag("Yearly").unwrap(), TimeGranularity::Yearly);
        assert_eq!(TimeGranularity::from_flag("Q").unwrap(), TimeGranularity::Quarterly);
        assert!(TimeGranularity::from_flag("monthly").is_err());
    }

    #[test]
    fn filter_normalizes_names_and_summarizes_constraints() {
        let filter = QueryFilter::new(" Advil ")
            .with_event("HEADACHE")
            .with_sex(Sex::Female)
            .with_ages(AgeRange::new(18, 65))
            .with_dates(DateRange::new(Some("2020"), Some(" ")));

        assert_eq!(filter.drug().as_str(), "ibuprofen");
        assert_eq!(filter.event().map(|e| e.as_str()), Some("headache"));
        assert!(filter.dates().end.is_none());
        assert_eq!(
            filter.summary(),
            "drug=ibuprofen, event=headache, sex=female, age=18-65, from=2020"
        );
    }
}
