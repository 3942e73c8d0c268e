//! Rule-based CO2 emission estimation.
//!
//! One estimator serves both the `/predict` endpoint and the local fallback
//! used by the activity pipeline when the remote AI engine is unreachable.

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Activity types eligible for NFT minting (CO2 removal/avoidance).
pub const OFFSET_ACTIVITY_TYPES: [&str; 4] = [
    "tree_planting",
    "renewable_energy",
    "recycling",
    "carbon_offset",
];

/// Emission factors in kg CO2 per unit, keyed by declared activity type.
/// For offset types the figure is CO2 saved/offset per unit.
const TYPE_FACTORS: [(&str, f64); 14] = [
    ("driving", 0.2),          // per km
    ("flight", 0.5),           // per km
    ("home_energy", 0.5),      // per kWh
    ("heating", 2.0),          // per hour
    ("cooking", 0.3),          // per hour
    ("shopping", 0.5),         // per kg
    ("waste", 0.1),            // per kg
    ("transport", 0.15),       // per km
    ("electricity", 0.4),      // per kWh
    ("other", 0.3),
    ("tree_planting", 20.0),   // per tree (annual)
    ("renewable_energy", 0.5), // per kWh generated
    ("recycling", 0.5),        // per kg recycled
    ("carbon_offset", 1.0),    // per kg purchased
];

const GENERAL_FACTOR: f64 = 0.3;

/// Magnitude assumed when the description carries no numeral.
const DEFAULT_MAGNITUDE: f64 = 1.0;

pub fn is_offset_type(activity_type: &str) -> bool {
    OFFSET_ACTIVITY_TYPES.contains(&activity_type)
}

fn numeral_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid numeral pattern"))
}

/// First decimal or integer numeral in the description; 1.0 when absent.
fn extract_magnitude(description: &str) -> f64 {
    numeral_pattern()
        .find(description)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(DEFAULT_MAGNITUDE)
}

/// Per-unit factor. The declared activity type wins; an unknown type falls
/// back to a keyword scan of the description.
fn emission_factor(description: &str, activity_type: &str) -> f64 {
    let activity_type = activity_type.to_lowercase();
    if let Some((_, factor)) = TYPE_FACTORS.iter().find(|(t, _)| *t == activity_type) {
        return *factor;
    }

    let description = description.to_lowercase();
    if description.contains("drive") || description.contains("driving") {
        0.2
    } else if description.contains("flight") {
        0.5
    } else if description.contains("train") {
        0.1
    } else if description.contains("walk") || description.contains("cycle") {
        0.01
    } else {
        GENERAL_FACTOR
    }
}

/// Predicted kg CO2 for an activity description. Total over arbitrary input;
/// the result is `magnitude x factor`, rounded to two decimal places.
pub fn estimate(description: &str, activity_type: &str) -> f64 {
    let value = extract_magnitude(description);
    let factor = emission_factor(description, activity_type);
    round2(value * factor)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Invalid response from estimator: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    activity: &'a str,
    activity_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predicted_emission: Option<f64>,
}

/// HTTP client for the remote AI prediction engine.
#[derive(Clone)]
pub struct RemoteEstimator {
    client: Client,
    url: String,
}

impl RemoteEstimator {
    /// Single attempt per prediction, bounded at 10 seconds. The pipeline
    /// falls back to the local estimator on any failure.
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        RemoteEstimator { client, url }
    }

    pub async fn predict(
        &self,
        description: &str,
        activity_type: &str,
    ) -> Result<f64, EstimatorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest {
                activity: description,
                activity_type,
            })
            .send()
            .await?
            .error_for_status()?;

        let body = response.json::<PredictResponse>().await?;
        body.predicted_emission.ok_or_else(|| {
            EstimatorError::InvalidResponse("missing predicted_emission".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeral_times_type_factor() {
        // 20 km of transport at 0.15 kg/km
        assert_eq!(estimate("drove 20 km to work", "transport"), 3.0);
        // 3 trees at 20 kg each
        assert_eq!(estimate("planted 3 trees", "tree_planting"), 60.0);
        // 50 kWh at 0.4 kg/kWh
        assert_eq!(estimate("used 50 kWh this week", "electricity"), 20.0);
    }

    #[test]
    fn test_decimal_numeral() {
        assert_eq!(estimate("drove 2.5 km", "transport"), 0.38);
    }

    #[test]
    fn test_keyword_scan_when_type_unknown() {
        assert_eq!(estimate("drive 10 km", "unknown"), 2.0);
        assert_eq!(estimate("flight of 100 km", "unknown"), 50.0);
        assert_eq!(estimate("took the train 100 km", "unknown"), 10.0);
        assert_eq!(estimate("cycle 5 km", "unknown"), 0.05);
    }

    #[test]
    fn test_default_magnitude_when_no_numeral() {
        // No numeral: magnitude defaults to 1.0
        assert_eq!(estimate("went for a walk", "unknown"), 0.01);
        assert_eq!(estimate("planted trees", "tree_planting"), 20.0);
    }

    #[test]
    fn test_general_factor_for_unrecognized_everything() {
        assert_eq!(estimate("did 10 things", "unknown"), 3.0);
        assert_eq!(estimate("", ""), 0.3);
    }

    #[test]
    fn test_first_numeral_wins() {
        assert_eq!(estimate("drove 20 km in 3 hours", "transport"), 3.0);
    }

    #[test]
    fn test_never_panics_on_odd_input() {
        for input in ["", " ", "🌳🌳🌳", "no digits here", "..1..2..", "999999999"] {
            let result = estimate(input, "unknown");
            assert!(result >= 0.0, "negative estimate for {:?}", input);
        }
    }

    #[test]
    fn test_type_lookup_is_case_insensitive() {
        assert_eq!(
            estimate("planted 2 trees", "Tree_Planting"),
            estimate("planted 2 trees", "tree_planting")
        );
    }

    #[test]
    fn test_offset_type_classification() {
        assert!(is_offset_type("tree_planting"));
        assert!(is_offset_type("renewable_energy"));
        assert!(is_offset_type("recycling"));
        assert!(is_offset_type("carbon_offset"));
        assert!(!is_offset_type("transport"));
        assert!(!is_offset_type(""));
    }

    #[tokio::test]
    async fn test_remote_predict_success() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/predict")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"predicted_emission": 4.2}"#)
            .create_async()
            .await;

        let estimator = RemoteEstimator::new(format!("{}/predict", server.url()));
        let emission = estimator.predict("drove 20 km", "transport").await.unwrap();
        assert_eq!(emission, 4.2);
    }

    #[tokio::test]
    async fn test_remote_predict_non_2xx_is_error() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/predict")
            .with_status(500)
            .create_async()
            .await;

        let estimator = RemoteEstimator::new(format!("{}/predict", server.url()));
        let result = estimator.predict("drove 20 km", "transport").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remote_predict_malformed_body_is_error() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/predict")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"predicted_emission": null}"#)
            .create_async()
            .await;

        let estimator = RemoteEstimator::new(format!("{}/predict", server.url()));
        let result = estimator.predict("drove 20 km", "transport").await;
        assert!(matches!(result, Err(EstimatorError::InvalidResponse(_))));
    }
}
