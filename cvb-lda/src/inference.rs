//! Collapsed variational (CVB0) update of one document.
//!
//! With the topic-term counts `n[k,w]` and topic totals `n[k]` of a frozen
//! model, a document's mixture `θ` and observed counts `c[w]`:
//!
//! ```text
//! p(w|k)     = (n[k,w] + η) / (n[k] + η V)
//! γ[k,w]     ∝ p(w|k) (θ[k] + α)                     (normalized over k)
//! θ'[k]      ∝ Σ_w c[w] γ[k,w]                        (normalized over k)
//! perplexity = - Σ_w c[w] ln Σ_k p(w|k) (θ[k] + α) / (Σθ + K α)
//! ```
//!
//! Nothing here touches shared state, so documents can be processed in
//! any order and on any thread.

use crate::config::CvbConfig;
use crate::topic_model::TopicModel;
use matrix_util::sparse_rows::SparseRow;
use ndarray::prelude::*;

/// Fixed smoothing of the run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothing {
    /// document-topic
    pub alpha: f64,
    /// topic-term
    pub eta: f64,
}

impl From<&CvbConfig> for Smoothing {
    fn from(config: &CvbConfig) -> Self {
        Smoothing {
            alpha: config.alpha,
            eta: config.eta,
        }
    }
}

/// `c[w] γ[k,w]` for the observed terms of one document
#[derive(Debug, Clone, PartialEq)]
pub struct DocTopicContribution {
    /// observed terms, increasing
    pub terms: Vec<usize>,
    /// observed counts `c[w]` of those terms
    pub counts: Vec<f64>,
    /// `K x terms.len()`
    pub weights: Array2<f64>,
}

impl DocTopicContribution {
    pub fn empty(num_topics: usize) -> Self {
        DocTopicContribution {
            terms: vec![],
            counts: vec![],
            weights: Array2::zeros((num_topics, 0)),
        }
    }

    /// Total mass, equal to the document's total count
    pub fn total(&self) -> f64 {
        self.weights.sum()
    }
}

/// Result of inferring one document
#[derive(Debug, Clone)]
pub struct DocInference {
    /// updated mixture `θ'`, sums to one unless the document is empty
    pub doc_topics: Vec<f64>,
    /// what this document adds to the next model
    pub contribution: DocTopicContribution,
    /// negative log-likelihood of the document under the input mixture;
    /// `None` if the update was run without scoring
    pub perplexity: Option<f64>,
    /// the mixture the contribution was computed from
    pub contribution_mixture: Vec<f64>,
    /// `Σ_k p(w|k) (θ[k] + α)` per observed term of the contribution
    pub term_normalizers: Vec<f64>,
    /// sum of the observed counts
    pub total_count: f64,
}

impl DocInference {
    /// A document without any observed term
    pub fn is_degenerate(&self) -> bool {
        self.contribution.terms.is_empty()
    }
}

/// Starting mixture of a document never seen before
pub fn uniform_doc_topics(num_topics: usize) -> Vec<f64> {
    vec![1.0 / num_topics as f64; num_topics]
}

/// Scale to sum to one; an all-zero (or non-finite) vector becomes uniform
pub fn normalized_mixture(doc_topics: &[f64]) -> Vec<f64> {
    let tot: f64 = doc_topics.iter().sum();
    if tot > 0.0 && tot.is_finite() {
        doc_topics.iter().map(|x| x / tot).collect()
    } else {
        uniform_doc_topics(doc_topics.len())
    }
}

fn observed_terms(doc: &SparseRow) -> Vec<(usize, f64)> {
    doc.iter().filter(|&(_, c)| c > 0.0).collect()
}

/// `Σ_k p(w|k) (θ[k] + α)` and the per-topic terms of that sum
fn smoothed_term_weights(
    model: &TopicModel,
    term: usize,
    theta: &[f64],
    smoothing: &Smoothing,
    out: &mut [f64],
) -> f64 {
    let mut tot = 0.0;
    for (k, o) in out.iter_mut().enumerate() {
        *o = model.term_likelihood(k, term, smoothing.eta) * (theta[k] + smoothing.alpha);
        tot += *o;
    }
    tot
}

///
/// Negative log-likelihood of the document's observed counts.
///
/// * `doc` - term counts
/// * `model` - frozen topic-term model
/// * `doc_topics` - mixture, not necessarily normalized
/// * `smoothing` - `α`, `η`
///
pub fn perplexity(
    doc: &SparseRow,
    model: &TopicModel,
    doc_topics: &[f64],
    smoothing: &Smoothing,
) -> f64 {
    let kk = model.num_topics();
    let norm = doc_topics.iter().sum::<f64>() + kk as f64 * smoothing.alpha;
    let mut llik = 0.0;
    for (w, c) in observed_terms(doc) {
        let prob: f64 = (0..kk)
            .map(|k| {
                (doc_topics[k] + smoothing.alpha) / norm
                    * model.term_likelihood(k, w, smoothing.eta)
            })
            .sum();
        llik += c * prob.ln();
    }
    -llik
}

///
/// Infer one document against a frozen model.
///
/// * `doc` - term counts, non-negative
/// * `model` - frozen topic-term model
/// * `doc_topics` - current mixture (renormalized here)
/// * `smoothing` - `α`, `η`
/// * `sweeps` - number of updates of the mixture (at least one)
///
/// An empty document keeps `doc_topics` as given and contributes nothing.
///
pub fn infer_document(
    doc: &SparseRow,
    model: &TopicModel,
    doc_topics: &[f64],
    smoothing: &Smoothing,
    sweeps: usize,
) -> DocInference {
    infer(doc, model, doc_topics, smoothing, sweeps, true)
}

/// Same update as [`infer_document`] without evaluating the perplexity
/// of the input mixture
pub fn update_document(
    doc: &SparseRow,
    model: &TopicModel,
    doc_topics: &[f64],
    smoothing: &Smoothing,
    sweeps: usize,
) -> DocInference {
    infer(doc, model, doc_topics, smoothing, sweeps, false)
}

fn infer(
    doc: &SparseRow,
    model: &TopicModel,
    doc_topics: &[f64],
    smoothing: &Smoothing,
    sweeps: usize,
    score: bool,
) -> DocInference {
    let kk = model.num_topics();
    let observed = observed_terms(doc);

    if observed.is_empty() {
        return DocInference {
            doc_topics: doc_topics.to_vec(),
            contribution: DocTopicContribution::empty(kk),
            perplexity: Some(0.0),
            contribution_mixture: doc_topics.to_vec(),
            term_normalizers: vec![],
            total_count: 0.0,
        };
    }

    let mut theta = normalized_mixture(doc_topics);
    let perplexity = score.then(|| perplexity(doc, model, &theta, smoothing));

    let terms: Vec<usize> = observed.iter().map(|&(w, _)| w).collect();
    let counts: Vec<f64> = observed.iter().map(|&(_, c)| c).collect();
    let total_count: f64 = counts.iter().sum();
    let mut weights = Array2::<f64>::zeros((kk, terms.len()));
    let mut term_normalizers = vec![0.0; terms.len()];
    let mut contribution_mixture = theta.clone();
    let mut gamma = vec![0.0; kk];

    for _ in 0..sweeps.max(1) {
        contribution_mixture.clone_from(&theta);

        for (j, &(w, c)) in observed.iter().enumerate() {
            let z = smoothed_term_weights(model, w, &theta, smoothing, &mut gamma);
            term_normalizers[j] = z;
            for k in 0..kk {
                weights[(k, j)] = c * gamma[k] / z;
            }
        }

        let topic_mass = weights.sum_axis(Axis(1));
        theta = normalized_mixture(topic_mass.as_slice().unwrap_or(&[]));
    }

    DocInference {
        doc_topics: theta,
        contribution: DocTopicContribution {
            terms,
            counts,
            weights,
        },
        perplexity,
        contribution_mixture,
        term_normalizers,
        total_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn toy_model() -> TopicModel {
        TopicModel::new(array![[4.0, 3.0, 0.5, 0.0], [0.0, 0.5, 5.0, 2.0]])
    }

    const SMOOTH: Smoothing = Smoothing {
        alpha: 0.1,
        eta: 0.1,
    };

    #[test]
    fn mixture_sums_to_one() {
        let model = toy_model();
        let doc = SparseRow::from_dense(&[2.0, 0.0, 1.0, 3.0]);
        for prior in [vec![0.5, 0.5], vec![3.0, 1.0], vec![0.0, 0.0]] {
            let out = infer_document(&doc, &model, &prior, &SMOOTH, 3);
            assert_abs_diff_eq!(out.doc_topics.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            assert_abs_diff_eq!(out.contribution.total(), 6.0, epsilon = 1e-9);
            assert!(out.perplexity.is_some_and(|p| p > 0.0));
        }
    }

    #[test]
    fn empty_document_keeps_prior() {
        let model = toy_model();
        let doc = SparseRow::from_dense(&[0.0; 4]);
        let prior = vec![0.3, 0.9];
        let out = infer_document(&doc, &model, &prior, &SMOOTH, 1);
        assert_eq!(out.doc_topics, prior);
        assert_eq!(out.perplexity, Some(0.0));
        assert!(out.is_degenerate());
        assert_eq!(out.contribution.weights.len(), 0);
    }

    #[test]
    fn mixture_follows_the_words() {
        let model = toy_model();
        let doc = SparseRow::from_dense(&[5.0, 4.0, 0.0, 0.0]);
        let out = infer_document(&doc, &model, &uniform_doc_topics(2), &SMOOTH, 5);
        assert!(out.doc_topics[0] > 0.9);
    }

    #[test]
    fn contribution_matches_its_factors() {
        let model = toy_model();
        let doc = SparseRow::from_dense(&[1.0, 2.0, 0.0, 4.0]);
        let out = infer_document(&doc, &model, &[0.2, 0.8], &SMOOTH, 2);
        for (j, &w) in out.contribution.terms.iter().enumerate() {
            let c = doc.to_dense(4)[w];
            for k in 0..2 {
                let expected = c
                    * model.term_likelihood(k, w, SMOOTH.eta)
                    * (out.contribution_mixture[k] + SMOOTH.alpha)
                    / out.term_normalizers[j];
                assert_abs_diff_eq!(out.contribution.weights[(k, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn perplexity_of_a_single_word() {
        // one topic: prob = p(w|0) exactly
        let model = TopicModel::new(array![[1.0, 3.0]]);
        let doc = SparseRow::from_dense(&[0.0, 2.0]);
        let p = perplexity(&doc, &model, &[1.0], &SMOOTH);
        let pw = (3.0 + 0.1) / (4.0 + 0.2);
        assert_abs_diff_eq!(p, -2.0 * f64::ln(pw), epsilon = 1e-12);
    }

    #[test]
    fn unscored_update_is_the_same_update() {
        let model = toy_model();
        let doc = SparseRow::from_dense(&[1.0, 2.0, 0.0, 4.0]);
        let scored = infer_document(&doc, &model, &[0.2, 0.8], &SMOOTH, 3);
        let unscored = update_document(&doc, &model, &[0.2, 0.8], &SMOOTH, 3);
        assert_eq!(unscored.perplexity, None);
        assert_eq!(scored.doc_topics, unscored.doc_topics);
        assert_eq!(scored.contribution.weights, unscored.contribution.weights);
        assert_abs_diff_eq!(
            scored.perplexity.unwrap_or(f64::NAN),
            perplexity(&doc, &model, &normalized_mixture(&[0.2, 0.8]), &SMOOTH),
            epsilon = 1e-12
        );
    }
}
