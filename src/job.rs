//! Job and result definitions for the relay protocol.
//!
//! This module defines the correlation contract shared by the submitter and
//! the workers:
//!
//! - `Job`: a unit of work pushed onto the queue
//! - `Prediction`: the result published under the job's id
//!
//! Both sides only ever agree on these wire shapes and on the key naming;
//! they never communicate directly.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A queued classification request.
///
/// Jobs are serialized to JSON and pushed onto the shared work queue. The
/// payload is a reference to the input (an image identifier), not the image
/// bytes themselves.
///
/// Wire format:
///
/// ```json
/// { "id": "<uuid-string>", "image_name": "<string>" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Correlation id linking this job to its eventual result.
    pub id: Uuid,
    /// Identifier of the image to classify.
    pub image_name: String,
}

impl Job {
    /// Creates a new job with a fresh random id.
    ///
    /// UUID v4 gives 122 bits of randomness, which makes collisions
    /// negligible over the lifetime of any in-flight job.
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_name: image_name.into(),
        }
    }

    /// Store key under which this job's result is published.
    pub fn result_key(&self) -> String {
        self.id.to_string()
    }
}

/// Result of processing a job, published under the job's id.
///
/// Wire format:
///
/// ```json
/// { "prediction": "<string>", "score": <number> }
/// ```
///
/// The reference worker wrote `score` as a string, so deserialization
/// accepts either a JSON number or a numeric string. An optional `error`
/// field carries the sentinel for failed computations; it is omitted from
/// successful results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Predicted class label.
    pub prediction: String,
    /// Model confidence in `[0, 1]`.
    #[serde(deserialize_with = "score_from_number_or_string")]
    pub score: f64,
    /// Error message when the computation failed (policy: failed jobs
    /// publish a sentinel result so the submitter fails fast instead of
    /// waiting out its timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Prediction {
    /// Creates a successful prediction result.
    pub fn new(prediction: impl Into<String>, score: f64) -> Self {
        Self {
            prediction: prediction.into(),
            score,
            error: None,
        }
    }

    /// Creates a sentinel result for a failed computation.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            prediction: String::new(),
            score: 0.0,
            error: Some(error.into()),
        }
    }

    /// Returns whether this result carries a failure sentinel.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Accepts a score encoded as either a JSON number or a numeric string.
fn score_from_number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawScore {
        Number(f64),
        Text(String),
    }

    match RawScore::deserialize(deserializer)? {
        RawScore::Number(n) => Ok(n),
        RawScore::Text(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_job_wire_format() {
        let job = Job::new("f4f1.jpg");
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&job).expect("job should serialize"))
                .expect("job JSON should parse");

        assert_eq!(json["id"], job.id.to_string());
        assert_eq!(json["image_name"], "f4f1.jpg");
        assert_eq!(json.as_object().map(|o| o.len()), Some(2));
    }

    #[test]
    fn test_job_serialization_roundtrip() {
        let job = Job::new("cat.png");
        let serialized = serde_json::to_string(&job).expect("serialization should work");
        let deserialized: Job =
            serde_json::from_str(&serialized).expect("deserialization should work");

        assert_eq!(job, deserialized);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let ids: HashSet<Uuid> = (0..10_000).map(|_| Job::new("same.jpg").id).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_result_key_matches_id() {
        let job = Job::new("dog.jpg");
        assert_eq!(job.result_key(), job.id.to_string());
    }

    #[test]
    fn test_prediction_success_omits_error_field() {
        let result = Prediction::new("tabby", 0.92);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&result).expect("should serialize"))
                .expect("should parse");

        assert_eq!(json["prediction"], "tabby");
        assert!(json.get("error").is_none());
        assert!(!result.is_failure());
    }

    #[test]
    fn test_prediction_score_from_number() {
        let result: Prediction =
            serde_json::from_str(r#"{"prediction": "tabby", "score": 0.92}"#)
                .expect("numeric score should parse");
        assert!((result.score - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prediction_score_from_string() {
        // The reference worker serialized the score as a string.
        let result: Prediction =
            serde_json::from_str(r#"{"prediction": "tabby", "score": "0.92"}"#)
                .expect("string score should parse");
        assert!((result.score - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prediction_rejects_non_numeric_score() {
        let parsed = serde_json::from_str::<Prediction>(
            r#"{"prediction": "tabby", "score": "not-a-number"}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_prediction_failure_sentinel() {
        let result = Prediction::failed("model exploded");
        assert!(result.is_failure());

        let serialized = serde_json::to_string(&result).expect("should serialize");
        let parsed: Prediction = serde_json::from_str(&serialized).expect("should parse");
        assert_eq!(parsed.error.as_deref(), Some("model exploded"));
    }
}
