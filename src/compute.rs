//! The compute boundary: classification as an opaque function.
//!
//! The relay never looks inside the model. Workers are handed an
//! `Arc<dyn Classifier>` and only care about `(label, confidence)` coming
//! back or an error. Real deployments implement [`Classifier`] around their
//! inference stack and embed the worker pool in their own binary.

use async_trait::async_trait;
use thiserror::Error;

/// Error raised by a failed classification.
///
/// The worker catches this locally and publishes a sentinel result; it
/// never propagates out of the worker loop.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ComputeError(String);

impl ComputeError {
    /// Creates a compute error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The opaque prediction function: `compute(input) -> (label, confidence)`.
///
/// Implementations may take seconds per call and may be CPU- or
/// accelerator-bound; the worker loop treats the call as a black box.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies the named image, returning the predicted label and a
    /// confidence score in `[0, 1]`.
    async fn classify(&self, image_name: &str) -> Result<(String, f64), ComputeError>;
}

/// Classifier returning a fixed answer for every input.
///
/// A stand-in for smoke-testing the relay end to end without a model.
pub struct StaticClassifier {
    label: String,
    score: f64,
}

impl StaticClassifier {
    /// Creates a classifier that always answers `(label, score)`.
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(&self, _image_name: &str) -> Result<(String, f64), ComputeError> {
        Ok((self.label.clone(), self.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_classifier_answer() {
        let classifier = StaticClassifier::new("tabby", 0.92);
        let (label, score) = classifier.classify("anything.jpg").await.unwrap();

        assert_eq!(label, "tabby");
        assert!((score - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compute_error_display() {
        let err = ComputeError::new("weights missing");
        assert_eq!(err.to_string(), "weights missing");
    }
}
