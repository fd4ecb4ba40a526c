//! Random-forest training path.
//!
//! Fits a standard-scaler + forest-regressor pipeline on the monthly series
//! (features: ordinal index, year, month), evaluates it on a chronological
//! hold-out and persists both the pipeline and its metrics as JSON so later
//! runs can predict without retraining. All randomness is seeded.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::aggregate::MonthlyBucket;

pub const DEFAULT_SEED: u64 = 42;
pub const N_TREES: usize = 200;
/// Chronological split: the first 80% of months train, the rest evaluate.
pub const TRAIN_FRACTION: f64 = 0.8;

pub const PIPELINE_FILE: &str = "rf_pipeline.json";
pub const METRICS_FILE: &str = "metrics.json";

const MIN_SAMPLES_SPLIT: usize = 2;

/// Regression features for one monthly bucket.
pub fn bucket_features(bucket: &MonthlyBucket) -> Vec<f64> {
    vec![
        bucket.ordinal as f64,
        bucket.year as f64,
        bucket.month as f64,
    ]
}

/// Per-feature standardization to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            bail!("cannot fit a scaler on an empty feature matrix");
        };
        let n_features = first.len();
        let n = rows.len() as f64;
        let mut means = vec![0.0; n_features];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value / n;
            }
        }
        let mut stds = vec![0.0; n_features];
        for row in rows {
            for (feature, (std, value)) in stds.iter_mut().zip(row).enumerate() {
                *std += (value - means[feature]).powi(2) / n;
            }
        }
        for std in stds.iter_mut() {
            *std = std.sqrt();
            // Constant features scale by 1 instead of dividing by zero.
            if *std == 0.0 {
                *std = 1.0;
            }
        }
        Ok(Self { means, stds })
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(value, (mean, std))| (value - mean) / std)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}

/// One regression tree, grown to purity with variance-reduction splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }

    fn grow(features: &[Vec<f64>], targets: &[f64], indices: &[usize]) -> TreeNode {
        let mean =
            indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64;
        if indices.len() < MIN_SAMPLES_SPLIT {
            return TreeNode::Leaf { value: mean };
        }
        match best_split(features, targets, indices) {
            Some((feature, threshold, left_indices, right_indices)) => TreeNode::Split {
                feature,
                threshold,
                left: Box::new(TreeNode::grow(features, targets, &left_indices)),
                right: Box::new(TreeNode::grow(features, targets, &right_indices)),
            },
            None => TreeNode::Leaf { value: mean },
        }
    }
}

/// Best (feature, threshold) split by summed squared error, or `None` when
/// no feature separates the samples.
fn best_split(
    features: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
) -> Option<(usize, f64, Vec<usize>, Vec<usize>)> {
    let n_features = features[indices[0]].len();
    let mut best: Option<(f64, usize, f64)> = None;

    for feature in 0..n_features {
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| {
            features[a][feature]
                .partial_cmp(&features[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Prefix sums over the sorted targets let each candidate split be
        // scored in constant time.
        let sorted_targets: Vec<f64> = order.iter().map(|&i| targets[i]).collect();
        let total_sum: f64 = sorted_targets.iter().sum();
        let total_sq: f64 = sorted_targets.iter().map(|y| y * y).sum();

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for split in 1..order.len() {
            left_sum += sorted_targets[split - 1];
            left_sq += sorted_targets[split - 1].powi(2);

            let low = features[order[split - 1]][feature];
            let high = features[order[split]][feature];
            if low == high {
                continue;
            }

            let left_n = split as f64;
            let right_n = (order.len() - split) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);

            if best.map(|(best_sse, _, _)| sse < best_sse).unwrap_or(true) {
                best = Some((sse, feature, (low + high) / 2.0));
            }
        }
    }

    best.map(|(_, feature, threshold)| {
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| features[i][feature] <= threshold);
        (feature, threshold, left, right)
    })
}

/// Bootstrap-aggregated regression trees with a fixed seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestRegressor {
    trees: Vec<TreeNode>,
    pub n_trees: usize,
    pub seed: u64,
}

impl ForestRegressor {
    pub fn fit(features: &[Vec<f64>], targets: &[f64], n_trees: usize, seed: u64) -> Result<Self> {
        if features.is_empty() {
            bail!("cannot fit a forest on an empty feature matrix");
        }
        if features.len() != targets.len() {
            bail!(
                "feature and target lengths differ: {} vs {}",
                features.len(),
                targets.len()
            );
        }
        let n = features.len();
        let trees = (0..n_trees)
            .map(|tree| {
                // Per-tree rng keeps tree construction independent of order.
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(tree as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                TreeNode::grow(features, targets, &sample)
            })
            .collect();
        Ok(Self {
            trees,
            n_trees,
            seed,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// Scaler + forest, persisted together so predictions never see unscaled
/// features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedPipeline {
    pub scaler: StandardScaler,
    pub forest: ForestRegressor,
}

impl TrainedPipeline {
    pub fn fit(features: &[Vec<f64>], targets: &[f64], seed: u64) -> Result<Self> {
        let scaler = StandardScaler::fit(features)?;
        let scaled = scaler.transform(features);
        let forest = ForestRegressor::fit(&scaled, targets, N_TREES, seed)?;
        Ok(Self { scaler, forest })
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        self.forest.predict(&self.scaler.transform(rows))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("model artifact not found: {}", path.display());
        }
        let file = File::open(path)?;
        let pipeline = serde_json::from_reader(BufReader::new(file))?;
        Ok(pipeline)
    }
}

/// Hold-out evaluation of the trained pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
    pub n_train: usize,
    pub n_test: usize,
}

impl EvalMetrics {
    fn evaluate(actual: &[f64], predicted: &[f64], n_train: usize) -> Self {
        let n = actual.len() as f64;
        let mse = actual
            .iter()
            .zip(predicted)
            .map(|(y, p)| (y - p).powi(2))
            .sum::<f64>()
            / n;
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(y, p)| (y - p).abs())
            .sum::<f64>()
            / n;
        let mean = actual.iter().sum::<f64>() / n;
        let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
        let ss_res: f64 = actual
            .iter()
            .zip(predicted)
            .map(|(y, p)| (y - p).powi(2))
            .sum();
        // A hold-out with no variance (e.g. a single month) has no
        // well-defined r2; report 0 rather than dividing by zero.
        let r2 = if ss_tot == 0.0 {
            0.0
        } else {
            1.0 - ss_res / ss_tot
        };
        Self {
            r2,
            rmse: mse.sqrt(),
            mae,
            n_train,
            n_test: actual.len(),
        }
    }
}

/// Train on the chronological head of the monthly series, evaluate on the
/// tail and write both artifacts under `models_dir`.
pub fn train_and_save<P: AsRef<Path>>(
    monthly: &[MonthlyBucket],
    models_dir: P,
) -> Result<(TrainedPipeline, EvalMetrics)> {
    if monthly.len() < 2 {
        bail!(
            "at least 2 monthly buckets are required to train (got {})",
            monthly.len()
        );
    }
    let features: Vec<Vec<f64>> = monthly.iter().map(bucket_features).collect();
    let targets: Vec<f64> = monthly.iter().map(|bucket| bucket.total as f64).collect();
    let split = (monthly.len() as f64 * TRAIN_FRACTION) as usize;

    let pipeline = TrainedPipeline::fit(&features[..split], &targets[..split], DEFAULT_SEED)?;
    let predictions = pipeline.predict(&features[split..]);
    let metrics = EvalMetrics::evaluate(&targets[split..], &predictions, split);

    let models_dir = models_dir.as_ref();
    fs::create_dir_all(models_dir)
        .with_context(|| format!("failed to create {}", models_dir.display()))?;
    pipeline.save(models_dir.join(PIPELINE_FILE))?;
    let metrics_file = File::create(models_dir.join(METRICS_FILE))?;
    serde_json::to_writer_pretty(metrics_file, &metrics)?;
    info!(
        "model artifacts written to {} (n_train={}, n_test={})",
        models_dir.display(),
        metrics.n_train,
        metrics.n_test
    );
    Ok((pipeline, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_monthly(n: usize) -> Vec<MonthlyBucket> {
        (0..n)
            .map(|ordinal| MonthlyBucket {
                year: 2021 + (ordinal / 12) as i32,
                month: (ordinal % 12) as u32 + 1,
                // Roughly linear growth with a small wobble.
                total: (100 + 10 * ordinal + (ordinal % 3)) as u32,
                ordinal,
            })
            .collect()
    }

    #[test]
    fn test_scaler_standardizes() {
        let rows = vec![vec![0.0, 10.0], vec![2.0, 10.0], vec![4.0, 10.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        let scaled = scaler.transform(&rows);
        assert!((scaled[1][0] - 0.0).abs() < 1e-12);
        assert!(scaled[0][0] < 0.0 && scaled[2][0] > 0.0);
        // Constant feature stays untouched rather than dividing by zero.
        assert!((scaled[0][1] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_rejects_empty_input() {
        assert!(StandardScaler::fit(&[]).is_err());
    }

    #[test]
    fn test_forest_is_deterministic_for_a_seed() {
        let monthly = synthetic_monthly(12);
        let features: Vec<Vec<f64>> = monthly.iter().map(bucket_features).collect();
        let targets: Vec<f64> = monthly.iter().map(|b| b.total as f64).collect();
        let first = ForestRegressor::fit(&features, &targets, 25, DEFAULT_SEED).unwrap();
        let second = ForestRegressor::fit(&features, &targets, 25, DEFAULT_SEED).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.predict(&features), second.predict(&features));
    }

    #[test]
    fn test_forest_fits_training_data_closely() {
        let monthly = synthetic_monthly(12);
        let features: Vec<Vec<f64>> = monthly.iter().map(bucket_features).collect();
        let targets: Vec<f64> = monthly.iter().map(|b| b.total as f64).collect();
        let forest = ForestRegressor::fit(&features, &targets, 50, DEFAULT_SEED).unwrap();
        let predictions = forest.predict(&features);
        let mae = targets
            .iter()
            .zip(&predictions)
            .map(|(y, p)| (y - p).abs())
            .sum::<f64>()
            / targets.len() as f64;
        // Bootstrapped trees interpolate the training set well within one
        // month-over-month increment.
        assert!(mae < 10.0, "mae was {mae}");
    }

    #[test]
    fn test_train_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let monthly = synthetic_monthly(10);
        let (pipeline, metrics) = train_and_save(&monthly, dir.path()).unwrap();
        assert_eq!(metrics.n_train, 8);
        assert_eq!(metrics.n_test, 2);
        assert!(metrics.rmse >= 0.0);
        assert!(metrics.mae >= 0.0);
        assert!(metrics.r2 <= 1.0);

        let loaded = TrainedPipeline::load(dir.path().join(PIPELINE_FILE)).unwrap();
        let features: Vec<Vec<f64>> = monthly.iter().map(bucket_features).collect();
        assert_eq!(pipeline.predict(&features), loaded.predict(&features));

        let metrics_json: serde_json::Value = serde_json::from_reader(
            File::open(dir.path().join(METRICS_FILE)).unwrap(),
        )
        .unwrap();
        for key in ["r2", "rmse", "mae", "n_train", "n_test"] {
            assert!(metrics_json.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn test_training_needs_two_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let err = train_and_save(&synthetic_monthly(1), dir.path()).unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn test_loading_missing_artifact_is_an_error() {
        let err = TrainedPipeline::load("no/such/pipeline.json").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
