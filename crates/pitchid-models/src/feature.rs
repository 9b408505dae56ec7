use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Norms below this are treated as zero vectors; comparisons against them
/// yield similarity 0.
const NORM_EPSILON: f32 = 1e-8;

/// A Re-ID appearance feature vector.
///
/// Vectors are L2-normalized on construction so that persisted galleries
/// always hold unit vectors. The engine is agnostic to the dimension as long
/// as it stays consistent within a run; vectors of mismatched dimension
/// compare as similarity 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl JsonSchema for FeatureVector {
    fn schema_name() -> String {
        "FeatureVector".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <Vec<f32>>::json_schema(gen)
    }
}

impl FeatureVector {
    /// Create a feature vector, L2-normalizing the input.
    ///
    /// Near-zero vectors are kept as-is; they compare as similarity 0.
    pub fn new(values: Vec<f32>) -> Self {
        let norm = l2_norm(&values);
        if norm < NORM_EPSILON {
            return Self(values);
        }
        Self(values.into_iter().map(|v| v / norm).collect())
    }

    /// Construct without normalizing. Intended for values that are already
    /// unit vectors (e.g. loaded from a gallery this crate wrote).
    pub fn from_normalized(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Raw components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cosine similarity: `(a . b) / (|a| |b|)`.
    ///
    /// Returns 0 when either norm is below 1e-8 or the dimensions differ.
    pub fn cosine(&self, other: &FeatureVector) -> f32 {
        if self.0.len() != other.0.len() {
            return 0.0;
        }

        let norm_a = l2_norm(&self.0);
        let norm_b = l2_norm(&other.0);
        if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
            return 0.0;
        }

        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        dot / (norm_a * norm_b)
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
