use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Where a report came from. Mock reports are canned and carry no analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ReportSource {
    Mock,
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CropSuggestion {
    pub name: String,
    pub profitability: String,
    #[serde(rename = "yield")]
    pub expected_yield: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecommendationReport {
    pub soil_type: String,
    pub suitable_crops: Vec<CropSuggestion>,
    pub recommendation: String,
    pub source: ReportSource,
}

/// Soil characteristics entered by hand instead of uploading a sample image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SoilParameters {
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub ph: f64,
    pub location: String,
}
