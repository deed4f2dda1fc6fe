use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entities::query::{BackendQuery, QueryDirective, SeriousCategory};
use crate::error::FaersLensError;
use crate::sources::{RetryPolicy, env_base, env_parse};
use crate::utils::serde::StringOrNumber;

pub(crate) const OPENFDA_BASE: &str = "https://api.fda.gov";
pub(crate) const OPENFDA_BASE_ENV: &str = "FAERS_LENS_OPENFDA_BASE";
const OPENFDA_API: &str = "openfda";
const EVENT_PATH: &str = "drug/event.json";
const MAX_SEARCH_LEN: usize = 1024;
/// openFDA rejects `skip` values beyond this.
const MAX_SKIP: usize = 25_000;
const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
const MIN_DEADLINE_SECS: u64 = 1;

fn deadline_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_DEADLINE_SECS))
}

/// Client settings, read once from the environment when a client is built.
#[derive(Debug, Clone)]
pub struct OpenFdaConfig {
    pub base: Cow<'static, str>,
    pub api_key: Option<String>,
    pub page_size: usize,
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

impl OpenFdaConfig {
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            base: env_base(OPENFDA_BASE, OPENFDA_BASE_ENV),
            api_key: std::env::var("OPENFDA_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            page_size: env_parse("FAERS_LENS_PAGE_SIZE", DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
            deadline: deadline_from_secs(env_parse(
                "FAERS_LENS_DEADLINE_SECS",
                DEFAULT_DEADLINE.as_secs(),
            )),
            retry: RetryPolicy {
                max_retries: env_parse("FAERS_LENS_MAX_RETRIES", defaults.max_retries),
                ..defaults
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(base: String) -> Self {
        Self {
            base: Cow::Owned(base),
            api_key: None,
            page_size: DEFAULT_PAGE_SIZE,
            deadline: Duration::from_secs(10),
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        }
    }
}

/// One `(term, count)` pair from a `count=` query. Date buckets carry `YYYYMMDD` terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountBucket {
    pub term: String,
    pub count: u64,
}

impl CountBucket {
    pub fn new(term: impl Into<String>, count: u64) -> Self {
        Self {
            term: term.into(),
            count,
        }
    }
}

/// Seriousness flags of one report. `None` means the report did not say.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeriousnessFlags {
    pub death: Option<bool>,
    pub life_threatening: Option<bool>,
    pub hospitalization: Option<bool>,
    pub disability: Option<bool>,
    pub congenital_anomaly: Option<bool>,
    pub other: Option<bool>,
}

impl SeriousnessFlags {
    pub fn get(&self, category: SeriousCategory) -> Option<bool> {
        match category {
            SeriousCategory::Death => self.death,
            SeriousCategory::LifeThreatening => self.life_threatening,
            SeriousCategory::Hospitalization => self.hospitalization,
            SeriousCategory::Disability => self.disability,
            SeriousCategory::CongenitalAnomaly => self.congenital_anomaly,
            SeriousCategory::Other => self.other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    pub report_id: String,
    pub receipt_date: Option<String>,
    pub serious: Option<bool>,
    pub seriousness: SeriousnessFlags,
    pub reactions: Vec<String>,
    pub products: Vec<String>,
    pub qualification: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendResponse {
    /// `meta.results.total`; absent for `count=` responses.
    pub total: Option<u64>,
    pub buckets: Vec<CountBucket>,
    pub records: Vec<ReportRecord>,
}

impl BackendResponse {
    fn no_matches() -> Self {
        Self {
            total: Some(0),
            ..Self::default()
        }
    }

    pub fn total_or_zero(&self) -> u64 {
        self.total.unwrap_or(0)
    }
}

pub struct OpenFdaClient {
    client: reqwest_middleware::ClientWithMiddleware,
    config: OpenFdaConfig,
    cancel: CancellationToken,
}

impl OpenFdaClient {
    pub fn new() -> Result<Self, FaersLensError> {
        Self::from_config(OpenFdaConfig::from_env())
    }

    pub fn from_config(config: OpenFdaConfig) -> Result<Self, FaersLensError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            config,
            cancel: CancellationToken::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        base: String,
        api_key: Option<String>,
    ) -> Result<Self, FaersLensError> {
        Self::from_config(OpenFdaConfig {
            api_key: api_key
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            ..OpenFdaConfig::for_test(base)
        })
    }

    /// Ties every call on this client to `token`; once cancelled, calls return `Cancelled`.
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self
        }
    }

    pub fn config(&self) -> &OpenFdaConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Runs one backend query under the configured deadline.
    ///
    /// Zero matching reports is an empty response with `total = Some(0)`, not an error.
    pub async fn execute(&self, query: &BackendQuery) -> Result<BackendResponse, FaersLensError> {
        let search = query.search.trim();
        if search.is_empty() {
            return Err(FaersLensError::invalid(
                "search expression",
                "the search expression is empty",
            ));
        }
        if search.len() > MAX_SEARCH_LEN {
            return Err(FaersLensError::invalid(
                "search expression",
                format!("the search expression exceeds {MAX_SEARCH_LEN} characters"),
            ));
        }

        let attempts = AtomicU32::new(0);
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            res = tokio::time::timeout(
                self.config.deadline,
                self.run(search, &query.directive, &attempts),
            ) => Some(res),
        };

        let result = match outcome {
            None => Err(FaersLensError::Cancelled {
                api: OPENFDA_API.to_string(),
            }),
            Some(Ok(result)) => result,
            Some(Err(_elapsed)) => Err(FaersLensError::BackendUnavailable {
                api: OPENFDA_API.to_string(),
                attempts: attempts.load(Ordering::Relaxed).max(1),
                reason: format!(
                    "no answer within the {}s deadline",
                    self.config.deadline.as_secs_f32()
                ),
            }),
        };

        if let Err(FaersLensError::BackendUnavailable {
            attempts, reason, ..
        }) = &result
        {
            warn!(attempts, reason = reason.as_str(), "openFDA request failed");
        }
        result
    }

    async fn run(
        &self,
        search: &str,
        directive: &QueryDirective,
        attempts: &AtomicU32,
    ) -> Result<BackendResponse, FaersLensError> {
        match directive {
            QueryDirective::Total => {
                let params = [("search", search.to_string()), ("limit", "1".to_string())];
                let page = self
                    .get_page::<serde_json::Value>(&params, attempts)
                    .await?;
                Ok(match page {
                    Some(page) => BackendResponse {
                        total: Some(page.required_total()?),
                        ..BackendResponse::default()
                    },
                    None => BackendResponse::no_matches(),
                })
            }
            QueryDirective::Count { field, limit } => {
                let mut params = vec![
                    ("search", search.to_string()),
                    ("count", (*field).to_string()),
                ];
                if let Some(limit) = limit {
                    params.push(("limit", limit.to_string()));
                }
                let page = self
                    .get_page::<OpenFdaCountBucket>(&params, attempts)
                    .await?;
                Ok(match page {
                    Some(page) => BackendResponse {
                        total: page.total(),
                        buckets: page
                            .required_results()?
                            .into_iter()
                            .map(|b| CountBucket::new(b.term.into_string(), b.count))
                            .collect(),
                        records: Vec::new(),
                    },
                    None => BackendResponse::no_matches(),
                })
            }
            QueryDirective::Records { limit } => self.paginate(search, *limit, attempts).await,
        }
    }

    async fn paginate(
        &self,
        search: &str,
        limit: usize,
        attempts: &AtomicU32,
    ) -> Result<BackendResponse, FaersLensError> {
        let mut records: Vec<ReportRecord> = Vec::new();
        let mut total: Option<u64> = None;
        let mut skip = 0usize;

        while records.len() < limit && skip <= MAX_SKIP {
            let want = self.config.page_size.min(limit - records.len());
            let params = [
                ("search", search.to_string()),
                ("limit", want.to_string()),
                ("skip", skip.to_string()),
            ];
            let Some(page) = self.get_page::<FaersEventResult>(&params, attempts).await? else {
                total.get_or_insert(0);
                break;
            };

            let page_total = page.required_total()?;
            total = Some(page_total);
            let results = page.required_results()?;
            let got = results.len();
            records.extend(results.into_iter().map(ReportRecord::from));
            skip += got;
            debug!(skip, got, total = page_total, "fetched openFDA report page");

            if got < want || skip as u64 >= page_total {
                break;
            }
        }

        Ok(BackendResponse {
            total,
            buckets: Vec::new(),
            records,
        })
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        params: &[(&'static str, String)],
        attempts: &AtomicU32,
    ) -> Result<Option<OpenFdaResponse<T>>, FaersLensError> {
        let url = self.endpoint(EVENT_PATH);
        let resp = crate::sources::retry_send(OPENFDA_API, &self.config.retry, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            let mut req = self.client.get(&url).query(params);
            if let Some(key) = self.config.api_key.as_deref() {
                req = req.query(&[("api_key", key)]);
            }
            req.send()
        })
        .await?;

        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, OPENFDA_API).await?;

        if status == StatusCode::NOT_FOUND {
            if is_not_found_payload(&bytes) {
                return Ok(None);
            }
            return Err(protocol_error(format!(
                "HTTP {status}: {}",
                crate::sources::body_excerpt(&bytes)
            )));
        }
        if !status.is_success() {
            return Err(protocol_error(format!(
                "HTTP {status}: {}",
                crate::sources::body_excerpt(&bytes)
            )));
        }

        crate::sources::ensure_json_content_type(OPENFDA_API, content_type.as_ref(), &bytes)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| protocol_error(format!("malformed JSON: {err}")))?;

        if let Some(code) = error_code(&value) {
            if code.eq_ignore_ascii_case("NOT_FOUND") {
                return Ok(None);
            }
            return Err(protocol_error(format!(
                "error {code}: {}",
                crate::sources::body_excerpt(&bytes)
            )));
        }

        serde_json::from_value::<OpenFdaResponse<T>>(value)
            .map(Some)
            .map_err(|err| protocol_error(format!("unexpected JSON shape: {err}")))
    }
}

fn protocol_error(message: String) -> FaersLensError {
    FaersLensError::BackendProtocol {
        api: OPENFDA_API.to_string(),
        message,
    }
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")?
        .get("code")
        .and_then(serde_json::Value::as_str)
}

fn is_not_found_payload(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .as_ref()
        .and_then(error_code)
        .is_some_and(|code| code.eq_ignore_ascii_case("NOT_FOUND"))
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct OpenFdaResponse<T> {
    #[serde(default)]
    meta: Option<OpenFdaMeta>,
    #[serde(default)]
    results: Option<Vec<T>>,
}

impl<T> OpenFdaResponse<T> {
    fn total(&self) -> Option<u64> {
        self.meta.as_ref()?.results.as_ref()?.total
    }

    /// Search responses always carry `meta.results.total`; a 200 without it is not "no data".
    fn required_total(&self) -> Result<u64, FaersLensError> {
        self.total()
            .ok_or_else(|| protocol_error("response has no meta.results.total".to_string()))
    }

    fn required_results(self) -> Result<Vec<T>, FaersLensError> {
        self.results
            .ok_or_else(|| protocol_error("response has no results array".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct OpenFdaMeta {
    #[serde(default)]
    results: Option<OpenFdaMetaResults>,
}

#[derive(Debug, Deserialize)]
struct OpenFdaMetaResults {
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OpenFdaCountBucket {
    #[serde(alias = "time")]
    term: StringOrNumber,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct FaersEventResult {
    #[serde(default)]
    safetyreportid: Option<String>,
    #[serde(default)]
    receivedate: Option<String>,
    #[serde(default)]
    serious: Option<StringOrNumber>,
    #[serde(default)]
    seriousnessdeath: Option<StringOrNumber>,
    #[serde(default)]
    seriousnesslifethreatening: Option<StringOrNumber>,
    #[serde(default)]
    seriousnesshospitalization: Option<StringOrNumber>,
    #[serde(default)]
    seriousnessdisabling: Option<StringOrNumber>,
    #[serde(default)]
    seriousnesscongenitalanomali: Option<StringOrNumber>,
    #[serde(default)]
    seriousnessother: Option<StringOrNumber>,
    #[serde(default)]
    patient: Option<FaersPatient>,
    #[serde(default)]
    primarysource: Option<FaersPrimarySource>,
}

#[derive(Debug, Deserialize)]
struct FaersPatient {
    #[serde(default)]
    reaction: Vec<FaersReaction>,
    #[serde(default)]
    drug: Vec<FaersDrug>,
}

#[derive(Debug, Deserialize)]
struct FaersReaction {
    #[serde(default)]
    reactionmeddrapt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FaersDrug {
    #[serde(default)]
    medicinalproduct: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FaersPrimarySource {
    #[serde(default)]
    qualification: Option<StringOrNumber>,
    #[serde(default)]
    reportercountry: Option<String>,
}

/// FAERS encodes flags as `1` (yes) and `2` (no); anything else is unknown.
fn flag(value: Option<StringOrNumber>) -> Option<bool> {
    match value?.into_string().trim() {
        "1" => Some(true),
        "2" | "0" => Some(false),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<FaersEventResult> for ReportRecord {
    fn from(raw: FaersEventResult) -> Self {
        let (reactions, products) = match raw.patient {
            Some(patient) => (
                patient
                    .reaction
                    .into_iter()
                    .filter_map(|r| non_empty(r.reactionmeddrapt))
                    .collect(),
                patient
                    .drug
                    .into_iter()
                    .filter_map(|d| non_empty(d.medicinalproduct))
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let (qualification, country) = match raw.primarysource {
            Some(source) => (
                non_empty(source.qualification.map(StringOrNumber::into_string)),
                non_empty(source.reportercountry),
            ),
            None => (None, None),
        };

        Self {
            report_id: raw.safetyreportid.unwrap_or_default(),
            receipt_date: non_empty(raw.receivedate),
            serious: flag(raw.serious),
            seriousness: SeriousnessFlags {
                death: flag(raw.seriousnessdeath),
                life_threatening: flag(raw.seriousnesslifethreatening),
                hospitalization: flag(raw.seriousnesshospitalization),
                disability: flag(raw.seriousnessdisabling),
                congenital_anomaly: flag(raw.seriousnesscongenitalanomali),
                other: flag(raw.seriousnessother),
            },
            reactions,
            products,
            qualification,
            country,
        }
    }
}
