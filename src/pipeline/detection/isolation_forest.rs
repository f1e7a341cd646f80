//! Isolation Forest outlier model.
//!
//! Each tree isolates points by recursive random axis-aligned splits on a subsample of
//! `psi` rows. Anomalies isolate in fewer splits, so their mean path length E[h(x)] is short.
//! Score: `s(x) = 2^(-E[h(x)] / c(psi))`, close to 1 for anomalies and below 0.5 for inliers.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use super::features::{FeatureVector, N_FEATURES};
use crate::config::{ModelConfig, ModelThreshold};
use crate::error::{PipelineError, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One isolation tree, nodes stored in a flat arena
#[derive(Debug, Clone)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(
        data: &[FeatureVector],
        sample: Vec<usize>,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(data, sample, 0, height_limit, rng);
        tree
    }

    fn build(
        &mut self,
        data: &[FeatureVector],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        if depth >= height_limit || rows.len() <= 1 {
            self.nodes.push(Node::Leaf { size: rows.len() });
            return id;
        }

        // Only features that still vary within this node can split it
        let mut bounds = [(f64::INFINITY, f64::NEG_INFINITY); N_FEATURES];
        for &r in &rows {
            for (f, b) in bounds.iter_mut().enumerate() {
                b.0 = b.0.min(data[r][f]);
                b.1 = b.1.max(data[r][f]);
            }
        }
        let candidates: Vec<usize> = (0..N_FEATURES)
            .filter(|&f| bounds[f].0 < bounds[f].1)
            .collect();
        if candidates.is_empty() {
            self.nodes.push(Node::Leaf { size: rows.len() });
            return id;
        }

        let feature = candidates[rng.gen_range(0..candidates.len())];
        let (lo, hi) = bounds[feature];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] < threshold);

        // Reserve the slot, then fill children
        self.nodes.push(Node::Leaf { size: 0 });
        let left = self.build(data, left_rows, depth + 1, height_limit, rng);
        let right = self.build(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// h(x): edges traversed plus the c(size) adjustment at the leaf
    pub fn path_length(&self, x: &FeatureVector) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[id] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    normalizer: f64,
}

impl IsolationForest {
    /// Fit `n_trees` trees. Tree `i` draws from `StdRng::seed_from_u64(seed + i)`,
    /// so the forest is identical whatever the thread scheduling.
    #[instrument(skip_all, fields(rows = data.len(), n_trees = config.n_trees))]
    pub fn fit(data: &[FeatureVector], config: &ModelConfig) -> Result<Self> {
        if data.is_empty() {
            return Err(PipelineError::ModelFit("feature matrix is empty".to_string()));
        }
        if let Some(row) = data.iter().position(|x| x.iter().any(|v| !v.is_finite())) {
            return Err(PipelineError::ModelFit(format!(
                "non-finite feature value in row {}",
                row
            )));
        }

        let sample_size = config.sample_size.min(data.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let trees: Vec<IsolationTree> = (0..config.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let sample = index::sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::grow(data, sample, height_limit, &mut rng)
            })
            .collect();

        info!(sample_size, height_limit, "Isolation forest fitted");
        Ok(Self {
            trees,
            sample_size,
            normalizer: average_path_length(sample_size),
        })
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Anomaly score in (0, 1]
    pub fn score(&self, x: &FeatureVector) -> f64 {
        if self.normalizer == 0.0 {
            return 0.5;
        }
        let mean_path =
            self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        2f64.powf(-mean_path / self.normalizer)
    }
}

/// Mark which scores become MODEL_OUTLIER flags.
/// Percentile mode flags the ceil(n * contamination) highest scores, earlier rows winning ties.
pub fn select_outliers(scores: &[f64], threshold: ModelThreshold) -> Vec<bool> {
    match threshold {
        ModelThreshold::Score { cutoff } => scores.iter().map(|s| *s >= cutoff).collect(),
        ModelThreshold::Percentile { contamination } => {
            let k = (scores.len() as f64 * contamination).ceil() as usize;
            let mut order: Vec<usize> = (0..scores.len()).collect();
            order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
            let mut selected = vec![false; scores.len()];
            for &i in order.iter().take(k) {
                selected[i] = true;
            }
            debug!(k, "Percentile threshold applied");
            selected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier(n: usize) -> Vec<FeatureVector> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data: Vec<FeatureVector> = (0..n)
            .map(|_| {
                [
                    rng.gen_range(17.0..18.0),
                    rng.gen_range(1.0..4.0),
                    rng.gen_range(0.0f64..3.0).floor(),
                    rng.gen_range(0.0f64..5.0).floor(),
                    125.0,
                ]
            })
            .collect();
        data.push([24.0, 60.0, 2.0, 1.0, 999.0]);
        data
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.244).abs() < 0.01);
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = cluster_with_outlier(500);
        let forest = IsolationForest::fit(&data, &ModelConfig::default()).unwrap();
        let scores: Vec<f64> = data.iter().map(|x| forest.score(x)).collect();

        let outlier = *scores.last().unwrap();
        assert!(outlier > 0.6, "outlier score {}", outlier);
        assert!(scores[..500].iter().all(|s| *s < outlier));
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = cluster_with_outlier(300);
        let config = ModelConfig::default();
        let a = IsolationForest::fit(&data, &config).unwrap();
        let b = IsolationForest::fit(&data, &config).unwrap();
        for x in &data {
            assert_eq!(a.score(x), b.score(x));
        }
    }

    #[test]
    fn test_fit_rejects_bad_matrices() {
        let config = ModelConfig::default();
        assert!(matches!(
            IsolationForest::fit(&[], &config),
            Err(PipelineError::ModelFit(_))
        ));
        let data = vec![[1.0, 2.0, 3.0, f64::NAN, 5.0], [1.0; N_FEATURES]];
        assert!(matches!(
            IsolationForest::fit(&data, &config),
            Err(PipelineError::ModelFit(_))
        ));
    }

    #[test]
    fn test_identical_rows_score_neutral_depth() {
        let data = vec![[1.0; N_FEATURES]; 10];
        let forest = IsolationForest::fit(&data, &ModelConfig::default()).unwrap();
        // Every tree is a single leaf of size 10, so E[h] = c(10) = c(psi)
        assert!((forest.score(&data[0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_selection_breaks_ties_by_row() {
        let scores = [0.4, 0.7, 0.7, 0.5, 0.7];
        let selected = select_outliers(&scores, ModelThreshold::Percentile { contamination: 0.3 });
        assert_eq!(selected, vec![false, true, true, false, false]);

        let by_score = select_outliers(&scores, ModelThreshold::Score { cutoff: 0.5 });
        assert_eq!(by_score, vec![false, true, true, true, true]);
    }
}
