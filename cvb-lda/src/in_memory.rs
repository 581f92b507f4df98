use crate::config::CvbConfig;
use crate::corpus::Corpus;
use crate::driver::relative_change;
use crate::error::CvbError;
use crate::inference::{perplexity, uniform_doc_topics, update_document, Smoothing};
use crate::pass::{initial_doc_topics, per_token, sample_log_likelihood};
use crate::sufficient_stats::SufficientStats;
use crate::topic_model::TopicModel;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use matrix_util::utils::generate_minibatch_intervals;
use ndarray::prelude::*;
use rayon::prelude::*;

/// Documents summed together before the block sums are merged in order
const DOC_BLOCK_SIZE: usize = 64;

/// Single-process CVB0 over a corpus held entirely in memory.
///
/// Applies the same per-document update as the sharded pass and folds the
/// contributions directly, block by block, without any shuffle.
pub struct InMemoryCvb0 {
    corpus: Corpus,
    config: CvbConfig,
    model: TopicModel,
    doc_topics: Array2<f64>,
    perplexities: Vec<f64>,
    pool: rayon::ThreadPool,
}

impl InMemoryCvb0 {
    pub fn new(corpus: Corpus, config: CvbConfig) -> anyhow::Result<Self> {
        config.validate()?;
        if corpus.num_terms() != config.num_terms {
            return Err(CvbError::dimension(
                "corpus terms",
                config.num_terms,
                corpus.num_terms(),
            )
            .into());
        }
        let model = TopicModel::random(config.num_topics, config.num_terms, config.random_seed);
        let doc_topics = initial_doc_topics(corpus.num_docs(), config.num_topics);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_worker_threads_per_task)
            .build()?;
        Ok(InMemoryCvb0 {
            corpus,
            config,
            model,
            doc_topics,
            perplexities: vec![],
            pool,
        })
    }

    /// Start from a given model instead of the seeded random one
    pub fn with_model(mut self, model: TopicModel) -> anyhow::Result<Self> {
        model.check_dims(self.config.num_topics, self.config.num_terms)?;
        self.model = model;
        Ok(self)
    }

    pub fn model(&self) -> &TopicModel {
        &self.model
    }

    pub fn doc_topics(&self) -> &Array2<f64> {
        &self.doc_topics
    }

    /// Per-token perplexity after each completed iteration
    pub fn perplexities(&self) -> &[f64] {
        &self.perplexities
    }

    pub fn config(&self) -> &CvbConfig {
        &self.config
    }

    /// One inference + merge pass; returns the new perplexity
    pub fn iterate(&mut self) -> anyhow::Result<f64> {
        let kk = self.config.num_topics;
        let vv = self.config.num_terms;
        let smoothing = Smoothing::from(&self.config);
        let sweeps = self.config.max_doc_iterations;
        let blocks = generate_minibatch_intervals(self.corpus.num_docs(), DOC_BLOCK_SIZE);

        let corpus = &self.corpus;
        let model = &self.model;
        let doc_topics = &self.doc_topics;

        let partials: Vec<(SufficientStats, Array2<f64>)> = self.pool.install(|| {
            blocks
                .par_iter()
                .map(|&(lb, ub)| {
                    let mut stats = SufficientStats::new(kk, vv);
                    let mut theta = Array2::<f64>::zeros((ub - lb, kk));
                    for d in lb..ub {
                        let prior = doc_topics.row(d).to_vec();
                        let inf = update_document(corpus.doc(d), model, &prior, &smoothing, sweeps);
                        stats.add_contribution(&inf.contribution);
                        theta
                            .row_mut(d - lb)
                            .assign(&ArrayView1::from(&inf.doc_topics));
                    }
                    (stats, theta)
                })
                .collect()
        });

        let mut stats = SufficientStats::new(kk, vv);
        let mut next_doc_topics = Array2::<f64>::zeros((corpus.num_docs(), kk));
        for ((partial, theta), &(lb, ub)) in partials.iter().zip(blocks.iter()) {
            stats.merge(partial);
            next_doc_topics.slice_mut(s![lb..ub, ..]).assign(theta);
        }

        let next = TopicModel::blend(stats.into_counts(), model, self.config.model_weight)?;

        let config = &self.config;
        let sample: Vec<(f64, f64)> = self.pool.install(|| {
            blocks
                .par_iter()
                .map(|&range| sample_log_likelihood(corpus, &next, &next_doc_topics, config, range))
                .collect()
        });
        let perplexity = per_token(&sample);

        self.model = next;
        self.doc_topics = next_doc_topics;
        self.perplexities.push(perplexity);
        Ok(perplexity)
    }

    ///
    /// Iterate until perplexity settles.
    ///
    /// * `min_iterations` - never stop before this many iterations
    /// * `max_iterations` - never run more than this many
    /// * `burn_in` - iterations before convergence is checked at all
    /// * `min_relative_change` - stop once consecutive perplexities
    ///   differ relatively by less than this
    ///
    /// Returns the last perplexity.
    ///
    pub fn iterate_until_convergence(
        &mut self,
        min_iterations: usize,
        max_iterations: usize,
        burn_in: usize,
        min_relative_change: f64,
    ) -> anyhow::Result<f64> {
        if max_iterations == 0 {
            return Err(CvbError::invalid_config("maxIterations", "must be >= 1").into());
        }
        if min_iterations > max_iterations {
            return Err(CvbError::invalid_config(
                "minIterations",
                format!("{} exceeds maxIterations {}", min_iterations, max_iterations),
            )
            .into());
        }
        if !(min_relative_change.is_finite() && min_relative_change >= 0.0) {
            return Err(CvbError::invalid_config(
                "minRelativePerplexityChange",
                format!("{} must be finite and >= 0", min_relative_change),
            )
            .into());
        }

        let pb = ProgressBar::new(max_iterations as u64);
        if !log::log_enabled!(log::Level::Info) {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut prev: Option<f64> = None;
        let mut last = f64::NAN;

        for iter in 1..=max_iterations {
            let perplexity = self.iterate()?;
            pb.inc(1);

            let change = prev.map(|p| relative_change(p, perplexity));
            info!(
                "in-memory iteration {}: perplexity {:.6}{}",
                iter,
                perplexity,
                change
                    .map(|c| format!(", relative change {:.3e}", c))
                    .unwrap_or_default()
            );

            prev = Some(perplexity);
            last = perplexity;

            if iter >= min_iterations
                && iter > burn_in
                && change.is_some_and(|c| c < min_relative_change)
            {
                break;
            }
        }
        pb.finish_and_clear();
        Ok(last)
    }
}

///
/// Document mixtures of a corpus under a fixed model.
///
/// * `corpus` - documents
/// * `model` - frozen model
/// * `smoothing` - `α`, `η`
/// * `sweeps` - updates per document, starting from uniform mixtures
/// * `num_threads` - size of the worker pool
///
/// Returns the `D x K` mixtures and the per-token perplexity.
///
pub fn infer_doc_topics(
    corpus: &Corpus,
    model: &TopicModel,
    smoothing: &Smoothing,
    sweeps: usize,
    num_threads: usize,
) -> anyhow::Result<(Array2<f64>, f64)> {
    if num_threads == 0 {
        return Err(CvbError::invalid_config("numWorkerThreadsPerTask", "must be >= 1").into());
    }
    let kk = model.num_topics();
    let uniform = uniform_doc_topics(kk);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()?;

    let inferred: Vec<(Vec<f64>, f64, f64)> = pool.install(|| {
        corpus
            .docs()
            .par_iter()
            .map(|doc| {
                let inf = update_document(doc, model, &uniform, smoothing, sweeps);
                let nll = perplexity(doc, model, &inf.doc_topics, smoothing);
                (inf.doc_topics, nll, inf.total_count)
            })
            .collect()
    });

    let mut theta = Array2::<f64>::zeros((corpus.num_docs(), kk));
    let mut partials = Vec::with_capacity(inferred.len());
    for (d, (row, nll, ntok)) in inferred.into_iter().enumerate() {
        theta.row_mut(d).assign(&ArrayView1::from(&row));
        partials.push((nll, ntok));
    }
    Ok((theta, per_token(&partials)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use matrix_util::sparse_rows::SparseRows;

    fn corpus() -> Corpus {
        let rows = SparseRows::from_dense_rows(
            4,
            &[
                vec![4.0, 3.0, 0.0, 0.0],
                vec![0.0, 0.0, 5.0, 2.0],
                vec![3.0, 4.0, 1.0, 0.0],
            ],
        )
        .expect("rows");
        Corpus::new(rows).expect("corpus")
    }

    #[test]
    fn counts_are_conserved() -> anyhow::Result<()> {
        let mut lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        lda.iterate()?;
        assert_abs_diff_eq!(lda.model().topic_term().sum(), 19.0, epsilon = 1e-9);
        for row in lda.doc_topics().rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn stops_within_bounds() -> anyhow::Result<()> {
        let mut lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        lda.iterate_until_convergence(3, 7, 0, 1e9)?;
        assert_eq!(lda.perplexities().len(), 3);

        let mut lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        lda.iterate_until_convergence(1, 4, 0, 0.0)?;
        assert_eq!(lda.perplexities().len(), 4);

        let mut lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        lda.iterate_until_convergence(1, 10, 5, 1e9)?;
        assert_eq!(lda.perplexities().len(), 6);
        Ok(())
    }

    #[test]
    fn fixed_model_inference() -> anyhow::Result<()> {
        let mut lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        lda.iterate_until_convergence(5, 20, 0, 1e-4)?;
        let (theta, perplexity) = infer_doc_topics(
            &corpus(),
            lda.model(),
            &Smoothing::from(lda.config()),
            10,
            2,
        )?;
        assert_eq!(theta.dim(), (3, 2));
        assert!(perplexity.is_finite() && perplexity > 0.0);
        // documents 0 and 2 share their words, document 1 does not
        let same = (theta[(0, 0)] - theta[(2, 0)]).abs();
        let other = (theta[(0, 0)] - theta[(1, 0)]).abs();
        assert!(same < other);
        Ok(())
    }

    #[test]
    fn rejects_bad_stopping_rules() -> anyhow::Result<()> {
        let mut lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        for (min, max, thr) in [(0, 0, 1e-3), (3, 2, 1e-3), (1, 5, -1e-3), (1, 5, f64::NAN)] {
            let err = lda.iterate_until_convergence(min, max, 0, thr).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CvbError>(),
                Some(CvbError::InvalidConfiguration { .. })
            ));
        }
        assert!(lda.perplexities().is_empty());
        Ok(())
    }

    #[test]
    fn inference_does_not_depend_on_pool_size() -> anyhow::Result<()> {
        let lda = InMemoryCvb0::new(corpus(), CvbConfig::new(2, 4))?;
        let smoothing = Smoothing::from(lda.config());
        let (theta_1, p_1) = infer_doc_topics(&corpus(), lda.model(), &smoothing, 3, 1)?;
        let (theta_3, p_3) = infer_doc_topics(&corpus(), lda.model(), &smoothing, 3, 3)?;
        assert_eq!(theta_1, theta_3);
        assert_eq!(p_1, p_3);
        assert!(infer_doc_topics(&corpus(), lda.model(), &smoothing, 3, 0).is_err());
        Ok(())
    }
}
