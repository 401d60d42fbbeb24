use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use extract::FEATURE_KEYS;

const BUNDLED_MODEL: &str = include_str!("../model/crop_model.json");

/// Relative variance added to every class variance, as scikit-learn does.
const VAR_SMOOTHING: f64 = 1e-9;

/// Cap on `|x - mean| / sd`; seven squared terms stay well inside `f64`.
const MAX_STD_DISTANCE: f64 = 1e150;

/// Per-class Gaussian parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub label: String,
    pub prior: f64,
    pub mean: [f64; 7],
    pub variance: [f64; 7],
}

/// Gaussian naive Bayes over the seven agronomic features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNb {
    #[serde(default = "default_feature_names")]
    pub features: Vec<String>,
    pub classes: Vec<ClassStats>,
}

fn default_feature_names() -> Vec<String> {
    FEATURE_KEYS.iter().map(|k| k.to_string()).collect()
}

impl GaussianNb {
    /// Model trained on the public crop-recommendation dataset (22 crops).
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_MODEL).context("Bundled crop model is invalid")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: GaussianNb = serde_json::from_str(json).context("Failed to parse model JSON")?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid model file {}", path.display()))
    }

    /// Fit per-class means and variances from labelled rows.
    ///
    /// Classes come out sorted by label; that order is also the tie-break
    /// order when two crops score the same.
    pub fn fit(samples: &[([f64; 7], &str)]) -> Result<Self> {
        anyhow::ensure!(!samples.is_empty(), "Cannot fit a model without samples");

        let mut grouped: BTreeMap<&str, Vec<[f64; 7]>> = BTreeMap::new();
        for (row, label) in samples {
            grouped.entry(*label).or_default().push(*row);
        }

        let total = samples.len() as f64;
        let mut classes: Vec<ClassStats> = grouped
            .into_iter()
            .map(|(label, rows)| {
                let n = rows.len() as f64;
                let mut mean = [0.0; 7];
                let mut variance = [0.0; 7];

                for row in &rows {
                    for (m, x) in mean.iter_mut().zip(row) {
                        *m += x / n;
                    }
                }
                for row in &rows {
                    for ((v, x), m) in variance.iter_mut().zip(row).zip(&mean) {
                        *v += (x - m).powi(2) / n;
                    }
                }

                ClassStats {
                    label: label.to_string(),
                    prior: n / total,
                    mean,
                    variance,
                }
            })
            .collect();

        // Smooth by a fraction of the largest feature variance so that
        // constant features don't divide by zero
        let max_variance = classes
            .iter()
            .flat_map(|c| c.variance)
            .fold(0.0_f64, f64::max);
        let epsilon = (VAR_SMOOTHING * max_variance).max(VAR_SMOOTHING);
        for class in &mut classes {
            for v in &mut class.variance {
                *v += epsilon;
            }
        }

        let model = Self {
            features: default_feature_names(),
            classes,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.classes.is_empty(), "Model has no classes");
        anyhow::ensure!(
            self.features.len() == FEATURE_KEYS.len(),
            "Model expects {} features, scorer provides {}",
            self.features.len(),
            FEATURE_KEYS.len()
        );

        for class in &self.classes {
            anyhow::ensure!(
                class.prior.is_finite() && class.prior > 0.0,
                "Class `{}` has invalid prior {}",
                class.label,
                class.prior
            );
            anyhow::ensure!(
                class.variance.iter().all(|v| v.is_finite() && *v > 0.0),
                "Class `{}` has a non-positive variance",
                class.label
            );
            anyhow::ensure!(
                class.mean.iter().all(|m| m.is_finite()),
                "Class `{}` has a non-finite mean",
                class.label
            );
        }
        Ok(())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|c| c.label.as_str())
    }

    /// Posterior probability of every class, in model order.
    ///
    /// Any finite input yields finite probabilities: standardized distances
    /// are capped so the squared terms cannot overflow, and if every class
    /// still ends up at `-inf` the priors are returned.
    pub fn predict_proba(&self, x: &[f64; 7]) -> Vec<f64> {
        let log_joint: Vec<f64> = self
            .classes
            .iter()
            .map(|class| {
                let log_likelihood: f64 = x
                    .iter()
                    .zip(class.mean.iter().zip(&class.variance))
                    .map(|(xi, (mean, var))| {
                        let z = ((xi - mean) / var.sqrt()).clamp(-MAX_STD_DISTANCE, MAX_STD_DISTANCE);
                        -0.5 * (2.0 * std::f64::consts::PI * var).ln() - 0.5 * z * z
                    })
                    .sum();
                class.prior.ln() + log_likelihood
            })
            .collect();

        // Log-sum-exp for numerical stability
        let max = log_joint.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            let total: f64 = self.classes.iter().map(|c| c.prior).sum();
            return self.classes.iter().map(|c| c.prior / total).collect();
        }

        let exp: Vec<f64> = log_joint.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exp.iter().sum();

        exp.into_iter().map(|e| e / total).collect()
    }
}
