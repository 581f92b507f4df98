//! One sharded training pass.
//!
//! 1. every map task infers its documents against the same frozen model
//!    and emits, per observed term, a model broadcast plus one
//!    contribution record per topic block;
//! 2. the shuffle groups records by `(term, doc)` and each partition is
//!    folded into sparse term columns;
//! 3. partition outputs are merged in partition order into the next
//!    topic-term counts, which are blended with the previous model;
//! 4. perplexity of the held-in sample is evaluated under the new model.

use crate::config::CvbConfig;
use crate::corpus::Corpus;
use crate::inference::{perplexity, uniform_doc_topics, update_document, Smoothing};
use crate::shuffle::{BatchSubstrate, KeyedRecord};
use crate::sufficient_stats::{fold_partition, SufficientStats};
use crate::topic_model::TopicModel;
use log::{debug, warn};
use ndarray::prelude::*;
use std::sync::Arc;

/// What one map task hands back besides its shuffle records
struct ShardOutput {
    records: Vec<KeyedRecord>,
    /// `(ub - lb) x K` updated mixtures of the shard's documents
    doc_topics: Array2<f64>,
    degenerate: usize,
}

/// Outcome of one pass
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub model: TopicModel,
    /// `D x K` updated document mixtures
    pub doc_topics: Array2<f64>,
    /// per-token perplexity of the sample under `model`
    pub perplexity: f64,
    /// documents without any observed term
    pub degenerate_docs: usize,
    pub num_records: usize,
}

/// `D x K` uniform mixtures, the starting point of a fresh run
pub fn initial_doc_topics(num_docs: usize, num_topics: usize) -> Array2<f64> {
    let row = uniform_doc_topics(num_topics);
    Array2::from_shape_fn((num_docs, num_topics), |(_, k)| row[k])
}

///
/// Whether a document takes part in the perplexity estimate. The choice
/// only depends on the seed and the document id, so every iteration
/// (and every resumed run) evaluates the same documents.
///
pub fn in_perplexity_sample(doc_id: usize, seed: u64, test_fraction: f64) -> bool {
    if test_fraction >= 1.0 {
        return true;
    }
    // splitmix64 finalizer
    let mut z = seed ^ (doc_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let u = (z >> 11) as f64 / (1u64 << 53) as f64;
    u < test_fraction
}

///
/// Sum of negative log-likelihoods and of token counts over the sampled
/// documents `[lb, ub)`.
///
/// * `corpus` - documents
/// * `model` - model to evaluate
/// * `doc_topics` - `D x K` mixtures
/// * `config` - smoothing, seed and sample fraction
///
pub fn sample_log_likelihood(
    corpus: &Corpus,
    model: &TopicModel,
    doc_topics: &Array2<f64>,
    config: &CvbConfig,
    (lb, ub): (usize, usize),
) -> (f64, f64) {
    let smoothing = Smoothing::from(config);
    let mut nll = 0.0;
    let mut ntok = 0.0;
    for d in lb..ub {
        if !in_perplexity_sample(d, config.random_seed, config.test_fraction) {
            continue;
        }
        let doc = corpus.doc(d);
        let theta = doc_topics.row(d).to_vec();
        nll += perplexity(doc, model, &theta, &smoothing);
        ntok += doc.norm1();
    }
    (nll, ntok)
}

/// Per-token perplexity from `(nll, tokens)` partial sums
pub fn per_token(partials: &[(f64, f64)]) -> f64 {
    let (nll, ntok) = partials
        .iter()
        .fold((0.0, 0.0), |(a, b), &(x, y)| (a + x, b + y));
    if ntok > 0.0 {
        nll / ntok
    } else {
        warn!("no tokens in the perplexity sample");
        0.0
    }
}

fn map_shard(
    corpus: &Corpus,
    model: &TopicModel,
    doc_topics: &Array2<f64>,
    config: &CvbConfig,
    (lb, ub): (usize, usize),
) -> anyhow::Result<ShardOutput> {
    let smoothing = Smoothing::from(config);
    let blocks = config.topic_blocks();
    let kk = model.num_topics();

    let mut records = vec![];
    let mut theta_out = Array2::<f64>::zeros((ub - lb, kk));
    let mut degenerate = 0;

    for d in lb..ub {
        let theta = doc_topics.row(d).to_vec();
        // the sample perplexity is evaluated after the merge
        let inf = update_document(
            corpus.doc(d),
            model,
            &theta,
            &smoothing,
            config.max_doc_iterations,
        );
        theta_out
            .row_mut(d - lb)
            .assign(&ArrayView1::from(&inf.doc_topics));

        if inf.is_degenerate() {
            degenerate += 1;
            continue;
        }

        let doc_id = i32::try_from(d)?;
        let contrib = &inf.contribution;
        for (j, (&w, &count)) in contrib.terms.iter().zip(contrib.counts.iter()).enumerate() {
            let term_id = i32::try_from(w)?;
            records.push(KeyedRecord::model_broadcast(
                term_id,
                doc_id,
                model.term_likelihoods(w, smoothing.eta),
            ));
            for &(k_lb, k_ub) in blocks.iter() {
                let mixture: Vec<f64> = inf.contribution_mixture[k_lb..k_ub]
                    .iter()
                    .map(|m| m + smoothing.alpha)
                    .collect();
                records.push(KeyedRecord::doc_contribution(
                    term_id,
                    doc_id,
                    k_lb,
                    count,
                    inf.term_normalizers[j],
                    mixture,
                ));
            }
        }
    }

    Ok(ShardOutput {
        records,
        doc_topics: theta_out,
        degenerate,
    })
}

///
/// Run one pass over the corpus.
///
/// * `substrate` - where map tasks and the shuffle run
/// * `corpus` - documents
/// * `model` - frozen snapshot every map task reads
/// * `doc_topics` - `D x K` mixtures from the previous pass
/// * `config` - run configuration
///
pub fn run_pass<S: BatchSubstrate>(
    substrate: &S,
    corpus: &Corpus,
    model: Arc<TopicModel>,
    doc_topics: &Array2<f64>,
    config: &CvbConfig,
) -> anyhow::Result<PassOutput> {
    let kk = model.num_topics();
    let vv = model.num_terms();
    if doc_topics.dim() != (corpus.num_docs(), kk) {
        return Err(crate::error::CvbError::dimension(
            "document mixtures",
            corpus.num_docs() * kk,
            doc_topics.len(),
        )
        .into());
    }

    let shards = corpus.shards(config.num_shards);

    let outputs = substrate.map_shards(&shards, |_, range| {
        map_shard(corpus, &model, doc_topics, config, range)
    })?;

    let mut next_doc_topics = Array2::<f64>::zeros((corpus.num_docs(), kk));
    let mut records = vec![];
    let mut degenerate_docs = 0;
    for (out, &(lb, ub)) in outputs.into_iter().zip(shards.iter()) {
        next_doc_topics
            .slice_mut(s![lb..ub, ..])
            .assign(&out.doc_topics);
        degenerate_docs += out.degenerate;
        records.extend(out.records);
    }
    let num_records = records.len();

    if degenerate_docs > 0 {
        debug!("{} documents without observed terms", degenerate_docs);
    }

    let partials = substrate.shuffle_reduce(records, |_, part| fold_partition(part, kk))?;

    let mut stats = SufficientStats::new(kk, vv);
    for columns in partials.iter() {
        stats.add_columns(columns);
    }

    let next = TopicModel::blend(stats.into_counts(), &model, config.model_weight)?;

    let sample = substrate.map_shards(&shards, |_, range| {
        Ok(sample_log_likelihood(
            corpus,
            &next,
            &next_doc_topics,
            config,
            range,
        ))
    })?;

    Ok(PassOutput {
        model: next,
        doc_topics: next_doc_topics,
        perplexity: per_token(&sample),
        degenerate_docs,
        num_records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shuffle::LocalSubstrate;
    use approx::assert_abs_diff_eq;
    use matrix_util::sparse_rows::SparseRows;

    fn corpus() -> Corpus {
        let rows = SparseRows::from_dense_rows(
            4,
            &[
                vec![4.0, 3.0, 0.0, 0.0],
                vec![0.0, 0.0, 5.0, 2.0],
                vec![0.0, 0.0, 0.0, 0.0],
                vec![3.0, 4.0, 1.0, 0.0],
            ],
        )
        .expect("rows");
        Corpus::new(rows).expect("corpus")
    }

    #[test]
    fn accumulated_mass_equals_token_count() -> anyhow::Result<()> {
        let corpus = corpus();
        let mut config = CvbConfig::new(3, 4);
        config.num_shards = 3;
        config.num_reduce_partitions = 2;
        config.topic_block_size = 2;

        let substrate = LocalSubstrate::new(2, config.num_reduce_partitions)?;
        let model = Arc::new(TopicModel::random(3, 4, 11));
        let theta = initial_doc_topics(4, 3);
        let out = run_pass(&substrate, &corpus, model, &theta, &config)?;

        assert_abs_diff_eq!(out.model.topic_term().sum(), corpus.total_tokens(), epsilon = 1e-9);
        assert_eq!(out.degenerate_docs, 1);
        // the empty document keeps its mixture
        assert_eq!(out.doc_topics.row(2), theta.row(2));
        assert!(out.perplexity > 0.0);
        Ok(())
    }

    #[test]
    fn sample_is_stable() {
        let picked: Vec<bool> = (0..100).map(|d| in_perplexity_sample(d, 3, 0.3)).collect();
        let again: Vec<bool> = (0..100).map(|d| in_perplexity_sample(d, 3, 0.3)).collect();
        assert_eq!(picked, again);
        let n = picked.iter().filter(|&&x| x).count();
        assert!(n > 10 && n < 50);
        assert!((0..100).all(|d| in_perplexity_sample(d, 3, 1.0)));
    }
}
