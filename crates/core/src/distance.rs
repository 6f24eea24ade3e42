//! Distance metrics for the stock `Vec<f32>` label type.
//!
//! The graph engine only ever sees a distance *function*: any
//! `Fn(&L, &L) -> f32` that is pure and total can drive the index. The
//! [`DistanceMetric`] enum provides the three kernels the index ships
//! with; all of them return a value where **lower is better**.

use std::sync::Arc;

/// A user-supplied distance function over opaque labels.
///
/// Must be deterministic and must not panic. Symmetry and the triangle
/// inequality are not required, but recall depends on them.
pub type DistanceFn<L> = Arc<dyn Fn(&L, &L) -> f32 + Send + Sync>;

/// Stock distance kernels for `Vec<f32>` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistanceMetric {
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    SqEuclidean,
    /// Unit-cosine distance: `1 - dot(a, b)` for pre-normalized inputs.
    /// Skips the norm computation of [`DistanceMetric::Cosine`].
    UnitCosine,
}

impl DistanceMetric {
    /// Compute the distance between two vectors.
    ///
    /// Mismatched lengths are compared over the shorter prefix; a zero-norm
    /// input under `Cosine` yields the maximal distance instead of NaN.
    pub fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let (dot, na, nb) = dot_and_norms(a, b);
                if na == 0.0 || nb == 0.0 {
                    return 2.0;
                }
                1.0 - dot / (na.sqrt() * nb.sqrt())
            }
            DistanceMetric::SqEuclidean => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| (x - y) * (x - y))
                .sum(),
            DistanceMetric::UnitCosine => {
                1.0 - a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum::<f32>()
            }
        }
    }

    /// Wrap this metric as a [`DistanceFn`] over `Vec<f32>` labels.
    pub fn distance_fn(self) -> DistanceFn<Vec<f32>> {
        Arc::new(move |a: &Vec<f32>, b: &Vec<f32>| self.eval(a, b))
    }
}

fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    (dot, na, nb)
}
