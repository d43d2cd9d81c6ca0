//! Crop recommendations from a soil sample.
//!
//! Analysis sits behind [`CropAdvisor`]. The bundled [`MockCropAdvisor`]
//! returns a canned report tagged [`ReportSource::Mock`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, instrument};
use utils::api::recommendation::{
    CropSuggestion, RecommendationReport, ReportSource, SoilParameters,
};

use super::{
    notifications::{Notification, Notifier},
    validation::FieldErrors,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SoilField {
    Nitrogen,
    Phosphorus,
    Potassium,
    Ph,
    Location,
}

#[derive(Debug, Error)]
pub enum RecommendationError {
    #[error("no soil image selected")]
    NoImage,
    #[error("`{0}` is not an image type")]
    InvalidFileType(String),
    #[error("invalid soil parameters: {0}")]
    InvalidParameters(FieldErrors<SoilField>),
    #[error("analysis failed: {0}")]
    Advisor(String),
}

/// A photo of the soil picked by the user.
#[derive(Debug, Clone)]
pub struct SoilImage {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub enum SoilSample {
    Image(SoilImage),
    Parameters(SoilParameters),
}

#[async_trait]
pub trait CropAdvisor: Send + Sync {
    async fn analyze(&self, sample: &SoilSample)
    -> Result<RecommendationReport, RecommendationError>;
}

/// Canned advisor. Ignores the sample.
#[derive(Debug, Clone)]
pub struct MockCropAdvisor {
    delay: Duration,
}

impl Default for MockCropAdvisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl MockCropAdvisor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn report() -> RecommendationReport {
        let crop = |name: &str, profitability: &str, expected_yield: &str| CropSuggestion {
            name: name.to_string(),
            profitability: profitability.to_string(),
            expected_yield: expected_yield.to_string(),
        };
        RecommendationReport {
            soil_type: "Clay".to_string(),
            suitable_crops: vec![
                crop("Rice", "High", "3.5 tons/acre"),
                crop("Wheat", "Medium", "2.8 tons/acre"),
                crop("Corn", "Medium-High", "4.2 tons/acre"),
            ],
            recommendation: "Based on your soil analysis, Rice would be the most profitable crop \
                             with an estimated yield of 3.5 tons/acre."
                .to_string(),
            source: ReportSource::Mock,
        }
    }
}

#[async_trait]
impl CropAdvisor for MockCropAdvisor {
    async fn analyze(
        &self,
        _sample: &SoilSample,
    ) -> Result<RecommendationReport, RecommendationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Self::report())
    }
}

pub fn validate_parameters(params: &SoilParameters) -> Result<(), FieldErrors<SoilField>> {
    let mut errors = FieldErrors::new();
    for (field, value, label) in [
        (SoilField::Nitrogen, params.nitrogen, "Nitrogen"),
        (SoilField::Phosphorus, params.phosphorus, "Phosphorus"),
        (SoilField::Potassium, params.potassium, "Potassium"),
    ] {
        if value.is_nan() || value < 0.0 {
            errors.add(field, format!("{label} must be zero or more"));
        }
    }
    if !(0.0..=14.0).contains(&params.ph) {
        errors.add(SoilField::Ph, "pH must be between 0 and 14");
    }
    if params.location.trim().is_empty() {
        errors.add(SoilField::Location, "Location is required");
    }
    errors.into_result()
}

pub struct RecommendationPage {
    advisor: Arc<dyn CropAdvisor>,
    notifier: Arc<dyn Notifier>,
    image: Option<SoilImage>,
    report: Option<RecommendationReport>,
    analyzing: bool,
}

impl RecommendationPage {
    pub fn new(advisor: Arc<dyn CropAdvisor>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            advisor,
            notifier,
            image: None,
            report: None,
            analyzing: false,
        }
    }

    pub fn image(&self) -> Option<&SoilImage> {
        self.image.as_ref()
    }

    pub fn report(&self) -> Option<&RecommendationReport> {
        self.report.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    /// Accepts any `image/*` file; the previous report is discarded.
    pub fn select_image(&mut self, image: SoilImage) -> Result<(), RecommendationError> {
        if !image.content_type.starts_with("image/") {
            self.notifier.notify(Notification::error(
                "Invalid file type",
                "Please upload an image file.",
            ));
            return Err(RecommendationError::InvalidFileType(image.content_type));
        }
        self.image = Some(image);
        self.report = None;
        Ok(())
    }

    pub async fn analyze_image(&mut self) -> Result<RecommendationReport, RecommendationError> {
        let Some(image) = self.image.clone() else {
            self.notifier.notify(Notification::error(
                "No image selected",
                "Please upload an image of your soil.",
            ));
            return Err(RecommendationError::NoImage);
        };
        self.run(SoilSample::Image(image)).await
    }

    pub async fn analyze_parameters(
        &mut self,
        params: SoilParameters,
    ) -> Result<RecommendationReport, RecommendationError> {
        validate_parameters(&params).map_err(RecommendationError::InvalidParameters)?;
        self.run(SoilSample::Parameters(params)).await
    }

    pub fn reset(&mut self) {
        self.image = None;
        self.report = None;
    }

    #[instrument(name = "recommendation.analyze", skip_all)]
    async fn run(&mut self, sample: SoilSample) -> Result<RecommendationReport, RecommendationError> {
        self.analyzing = true;
        let result = self.advisor.analyze(&sample).await;
        self.analyzing = false;

        match result {
            Ok(report) => {
                info!(source = ?report.source, soil = %report.soil_type, "soil analysed");
                self.notifier.notify(Notification::info(
                    "Analysis Complete",
                    "We've analyzed your soil sample.",
                ));
                self.report = Some(report.clone());
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, "soil analysis failed");
                self.notifier.notify(Notification::error(
                    "Analysis failed",
                    "Please try again later.",
                ));
                Err(err)
            }
        }
    }
}
