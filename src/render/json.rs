use serde::Serialize;

use crate::error::FaersLensError;
use crate::render::payload::{self, PresentationPayload};
use crate::transform::aggregate::AnalyticalResult;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, FaersLensError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[derive(Serialize)]
struct AnalysisJson<'a> {
    result: &'a AnalyticalResult,
    presentation: PresentationPayload,
}

/// Raw result plus its presentation payload, for chart front ends.
pub fn analysis_json(result: &AnalyticalResult) -> Result<String, FaersLensError> {
    to_pretty(&AnalysisJson {
        result,
        presentation: payload::format(result),
    })
}
