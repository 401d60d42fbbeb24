pub mod model;

pub use model::{ClassStats, GaussianNb};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use extract::StructuredFeatures;

/// Number of crops the chat front-end reports.
pub const TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropScore {
    pub label: String,
    pub probability: f64,
}

/// Ranks crop labels for a feature record.
pub trait Scorer: Send + Sync {
    /// Probability of every label, in the scorer's internal order.
    fn probabilities(&self, features: &StructuredFeatures) -> Result<Vec<CropScore>>;

    /// The `top_k` most probable labels, most probable first.
    ///
    /// The sort is stable, so ties keep the scorer's internal order.
    fn score(&self, features: &StructuredFeatures, top_k: usize) -> Result<Vec<CropScore>> {
        let mut scores = self.probabilities(features)?;
        scores.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        scores.truncate(top_k);
        Ok(scores)
    }
}

impl Scorer for GaussianNb {
    fn probabilities(&self, features: &StructuredFeatures) -> Result<Vec<CropScore>> {
        let probs = self.predict_proba(&features.to_vector());
        anyhow::ensure!(
            probs.iter().all(|p| p.is_finite()),
            "Classifier produced non-finite probabilities"
        );

        Ok(self
            .labels()
            .zip(probs)
            .map(|(label, probability)| CropScore {
                label: label.to_string(),
                probability,
            })
            .collect())
    }
}

/// Fixed ranking, for tests and demos.
#[derive(Debug, Clone)]
pub struct StaticScorer {
    ranking: Vec<CropScore>,
}

impl StaticScorer {
    /// Labels in internal order with probabilities descending from 1.0.
    pub fn new(labels: &[&str]) -> Self {
        let n = labels.len().max(1) as f64;
        Self {
            ranking: labels
                .iter()
                .enumerate()
                .map(|(i, label)| CropScore {
                    label: label.to_string(),
                    probability: (n - i as f64) / n,
                })
                .collect(),
        }
    }
}

impl Scorer for StaticScorer {
    fn probabilities(&self, _features: &StructuredFeatures) -> Result<Vec<CropScore>> {
        Ok(self.ranking.clone())
    }
}
