//! Grouping of vaccine-name strings by textual similarity.
//!
//! Names are vectorized by TF-IDF (term frequency, inverse document
//! frequency) and
//! partitioned with seeded k-means, surfacing near-duplicate spellings of
//! the same product. The fixed seed makes a single run reproducible; cluster
//! ids carry no semantic meaning and may change whenever the vocabulary
//! changes.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::clean::has_column;
use crate::COL;

pub const DEFAULT_K: usize = 3;
pub const DEFAULT_SEED: u64 = 42;

/// Terms are runs of at least two word characters, lowercased.
const TOKEN_PATTERN: &str = r"\w{2,}";

/// TF-IDF vectorizer over short name strings.
///
/// The vocabulary is index-ordered alphabetically and IDF uses the smoothed
/// form `ln((1 + n) / (1 + df)) + 1`; rows are L2-normalized.
pub struct TfidfVectorizer {
    token_re: Regex,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    pub fn fit(documents: &[String]) -> Result<Self> {
        let token_re = Regex::new(TOKEN_PATTERN).expect("valid token pattern");
        let tokenized: Vec<Vec<String>> = documents
            .iter()
            .map(|document| tokenize(&token_re, document))
            .collect();

        let mut vocabulary: BTreeMap<String, usize> = BTreeMap::new();
        for tokens in &tokenized {
            for token in tokens {
                let next_index = vocabulary.len();
                vocabulary.entry(token.clone()).or_insert(next_index);
            }
        }
        if vocabulary.is_empty() {
            bail!("no terms survived tokenization; cannot vectorize");
        }
        // Re-index alphabetically so the column order is reproducible.
        for (index, (_, slot)) in vocabulary.iter_mut().enumerate() {
            *slot = index;
        }

        let mut document_frequency = vec![0usize; vocabulary.len()];
        for tokens in &tokenized {
            let mut seen = vec![false; vocabulary.len()];
            for token in tokens {
                seen[vocabulary[token]] = true;
            }
            for (frequency, seen) in document_frequency.iter_mut().zip(seen) {
                if seen {
                    *frequency += 1;
                }
            }
        }
        let n = documents.len() as f64;
        let idf = document_frequency
            .into_iter()
            .map(|frequency| ((1.0 + n) / (1.0 + frequency as f64)).ln() + 1.0)
            .collect();

        Ok(Self {
            token_re,
            vocabulary,
            idf,
        })
    }

    pub fn transform(&self, documents: &[String]) -> Vec<Vec<f64>> {
        documents
            .iter()
            .map(|document| {
                let mut vector = vec![0.0; self.vocabulary.len()];
                for token in tokenize(&self.token_re, document) {
                    if let Some(&index) = self.vocabulary.get(&token) {
                        vector[index] += self.idf[index];
                    }
                }
                let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for value in vector.iter_mut() {
                        *value /= norm;
                    }
                }
                vector
            })
            .collect()
    }

    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.vocabulary.keys().map(String::as_str)
    }
}

fn tokenize(token_re: &Regex, text: &str) -> Vec<String> {
    token_re
        .find_iter(&text.to_lowercase())
        .map(|token| token.as_str().to_string())
        .collect()
}

/// k-means settings; defaults mirror the clustering step of the dashboard
/// (k=3, seed 42, best of 10 initializations).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansConfig {
    pub k: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            seed: DEFAULT_SEED,
            n_init: 10,
            max_iter: 300,
        }
    }
}

impl KMeansConfig {
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn sample_weighted(rng: &mut StdRng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        // All candidate points coincide with a centroid already.
        return rng.gen_range(0..weights.len());
    }
    let mut target = rng.gen::<f64>() * total;
    for (index, weight) in weights.iter().enumerate() {
        if *weight > 0.0 {
            target -= weight;
            if target <= 0.0 {
                return index;
            }
        }
    }
    weights.len() - 1
}

/// k-means++ style seeding: the first centroid is uniform, the rest are
/// sampled proportionally to squared distance from the nearest chosen one.
fn initial_centroids(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|point| {
                centroids
                    .iter()
                    .map(|centroid| squared_distance(point, centroid))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        centroids.push(points[sample_weighted(rng, &weights)].clone());
    }
    centroids
}

fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> (Vec<usize>, f64) {
    let mut labels = Vec::with_capacity(points.len());
    let mut inertia = 0.0;
    for point in points {
        let (label, distance) = centroids
            .iter()
            .enumerate()
            .map(|(index, centroid)| (index, squared_distance(point, centroid)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .expect("at least one centroid");
        labels.push(label);
        inertia += distance;
    }
    (labels, inertia)
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iter: usize) -> KMeansResult {
    let dimensions = points[0].len();
    let mut labels = vec![usize::MAX; points.len()];
    let mut inertia = f64::INFINITY;
    for _ in 0..max_iter {
        let (new_labels, new_inertia) = assign(points, &centroids);
        let converged = new_labels == labels;
        labels = new_labels;
        inertia = new_inertia;
        if converged {
            break;
        }
        let mut sums = vec![vec![0.0; dimensions]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (point, &label) in points.iter().zip(&labels) {
            counts[label] += 1;
            for (sum, value) in sums[label].iter_mut().zip(point) {
                *sum += value;
            }
        }
        for (index, (sum, count)) in sums.into_iter().zip(&counts).enumerate() {
            if *count > 0 {
                centroids[index] = sum.into_iter().map(|value| value / *count as f64).collect();
            } else {
                // An emptied cluster takes over the point furthest from its
                // centroid so k survives.
                let furthest = points
                    .iter()
                    .enumerate()
                    .max_by(|a, b| {
                        let da = squared_distance(a.1, &centroids[labels[a.0]]);
                        let db = squared_distance(b.1, &centroids[labels[b.0]]);
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(index, _)| index)
                    .expect("points are non-empty");
                centroids[index] = points[furthest].clone();
            }
        }
    }
    KMeansResult {
        labels,
        centroids,
        inertia,
    }
}

/// Partition `points` into `config.k` clusters, keeping the best of
/// `config.n_init` seeded initializations by inertia.
pub fn kmeans(points: &[Vec<f64>], config: &KMeansConfig) -> Result<KMeansResult> {
    if config.k == 0 {
        bail!("k must be at least 1");
    }
    if points.len() < config.k {
        bail!(
            "cannot form {} clusters from {} samples",
            config.k,
            points.len()
        );
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<KMeansResult> = None;
    for _ in 0..config.n_init.max(1) {
        let centroids = initial_centroids(points, config.k, &mut rng);
        let result = lloyd(points, centroids, config.max_iter);
        if best
            .as_ref()
            .map(|b| result.inertia < b.inertia)
            .unwrap_or(true)
        {
            best = Some(result);
        }
    }
    Ok(best.expect("n_init is at least 1"))
}

/// Cluster label for every record carrying a vaccine name.
#[derive(Debug, Clone, PartialEq)]
pub struct VaccineClusters {
    pub names: Vec<String>,
    pub labels: Vec<usize>,
    pub k: usize,
}

impl VaccineClusters {
    /// The `n` most frequent names per cluster, counts descending with
    /// alphabetical tie-break.
    pub fn top_names_per_cluster(&self, n: usize) -> Vec<(usize, Vec<(String, usize)>)> {
        let mut per_cluster: BTreeMap<usize, BTreeMap<&str, usize>> = BTreeMap::new();
        for (name, &label) in self.names.iter().zip(&self.labels) {
            *per_cluster
                .entry(label)
                .or_default()
                .entry(name.as_str())
                .or_insert(0) += 1;
        }
        per_cluster
            .into_iter()
            .map(|(label, counts)| {
                let mut counts: Vec<(String, usize)> = counts
                    .into_iter()
                    .map(|(name, count)| (name.to_string(), count))
                    .collect();
                counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                counts.truncate(n);
                (label, counts)
            })
            .collect()
    }
}

/// Vectorize the registry's vaccine names (nulls discarded) and assign each
/// record its name's cluster.
pub fn cluster_vaccine_names(df: &DataFrame, k: usize, seed: u64) -> Result<VaccineClusters> {
    if !has_column(df, COL::VACINA) {
        bail!("column '{}' not found in the registry", COL::VACINA);
    }
    let names: Vec<String> = df
        .column(COL::VACINA)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        bail!("no vaccine names to cluster");
    }
    let vectorizer = TfidfVectorizer::fit(&names)?;
    let vectors = vectorizer.transform(&names);
    let result = kmeans(&vectors, &KMeansConfig::default().k(k).seed(seed))?;
    Ok(VaccineClusters {
        names,
        labels: result.labels,
        k,
    })
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    #[test]
    fn test_tokenize_splits_on_whitespace_and_punctuation() {
        let token_re = Regex::new(TOKEN_PATTERN).unwrap();
        assert_eq!(tokenize(&token_re, "CORONA VAC"), vec!["corona", "vac"]);
        assert_eq!(
            tokenize(&token_re, "ASTRAZENECA/OXFORD"),
            vec!["astrazeneca", "oxford"]
        );
        // Single-character fragments are discarded.
        assert_eq!(tokenize(&token_re, "A PFIZER"), vec!["pfizer"]);
    }

    #[test]
    fn test_tfidf_separates_variant_spellings() {
        let documents: Vec<String> = ["CORONAVAC", "CORONA VAC", "PFIZER"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectorizer = TfidfVectorizer::fit(&documents).unwrap();
        let vocabulary: Vec<&str> = vectorizer.vocabulary().collect();
        assert_eq!(vocabulary, vec!["corona", "coronavac", "pfizer", "vac"]);

        let vectors = vectorizer.transform(&documents);
        // Each row is L2-normalized.
        for vector in &vectors {
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
        // The two spellings share no terms, so their vectors are orthogonal.
        let dot: f64 = vectors[0].iter().zip(&vectors[1]).map(|(a, b)| a * b).sum();
        assert!(dot.abs() < 1e-12);
    }

    #[test]
    fn test_tfidf_rejects_empty_vocabulary() {
        assert!(TfidfVectorizer::fit(&["-".to_string()]).is_err());
    }

    #[test]
    fn test_kmeans_is_reproducible_for_a_seed() {
        let points = vec![
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![0.1, 0.9],
            vec![0.5, 0.5],
        ];
        let config = KMeansConfig::default().k(2).seed(7);
        let first = kmeans(&points, &config).unwrap();
        let second = kmeans(&points, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_kmeans_needs_enough_samples() {
        let points = vec![vec![1.0], vec![2.0]];
        assert!(kmeans(&points, &KMeansConfig::default().k(3)).is_err());
    }

    #[test]
    fn test_cluster_assignment_is_deterministic() {
        let df = df!(
            COL::ID => &[1i64, 2, 3, 4],
            COL::VACINA => &[Some("CORONAVAC"), Some("CORONA VAC"), Some("PFIZER"), None],
        )
        .unwrap();
        let first = cluster_vaccine_names(&df, 3, DEFAULT_SEED).unwrap();
        let second = cluster_vaccine_names(&df, 3, DEFAULT_SEED).unwrap();
        assert_eq!(first, second);

        // The null name is discarded; the three distinct spellings land in
        // three distinct clusters.
        assert_eq!(first.names.len(), 3);
        let mut labels = first.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_identical_names_share_a_label() {
        let df = df!(
            COL::ID => &[1i64, 2, 3, 4, 5],
            COL::VACINA => &["CORONAVAC", "CORONAVAC", "PFIZER", "ASTRAZENECA", "CORONAVAC"],
        )
        .unwrap();
        let clusters = cluster_vaccine_names(&df, 3, DEFAULT_SEED).unwrap();
        assert_eq!(clusters.labels[0], clusters.labels[1]);
        assert_eq!(clusters.labels[0], clusters.labels[4]);
    }

    #[test]
    fn test_top_names_per_cluster() {
        let clusters = VaccineClusters {
            names: ["A", "A", "B", "C"].iter().map(|s| s.to_string()).collect(),
            labels: vec![0, 0, 0, 1],
            k: 2,
        };
        let top = clusters.top_names_per_cluster(1);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, 0);
        assert_eq!(top[0].1, vec![("A".to_string(), 2)]);
        assert_eq!(top[1].1, vec![("C".to_string(), 1)]);
    }
}
