//! Iteration controller of the sharded trainer.
//!
//! ```text
//! Init -> { Infer -> Aggregate -> Checkpoint }* -> Converged
//!                                              | MaxIterationsReached
//!                                              | WallClockExhausted
//! ```
//!
//! Iterations run strictly one after another. An iteration only becomes
//! visible once its model file is in place; a failed attempt leaves the
//! previous checkpoint as it was and is retried from it.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::CvbConfig;
use crate::corpus::Corpus;
use crate::error::CvbError;
use crate::pass::{initial_doc_topics, run_pass};
use crate::shuffle::BatchSubstrate;
use crate::topic_model::TopicModel;
use log::{info, warn};
use matrix_util::traits::IoOps;
use ndarray::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainingOutcome {
    Converged,
    MaxIterationsReached,
    WallClockExhausted,
}

/// What a finished run reports back
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub outcome: TrainingOutcome,
    pub final_iteration: usize,
    /// `None` if no iteration has completed yet
    pub final_perplexity: Option<f64>,
    pub final_model_path: String,
    /// `(iteration, perplexity)` of every checkpointed iteration
    pub perplexities: Vec<(usize, f64)>,
}

/// `|cur - prev| / prev`; a zero `prev` counts as no change only if `cur`
/// is zero too
pub fn relative_change(prev: f64, cur: f64) -> f64 {
    if prev == 0.0 {
        if cur == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        (cur - prev).abs() / prev.abs()
    }
}

/// Converged at the last entry of `history`?
fn has_converged(history: &[(usize, f64)], config: &CvbConfig) -> bool {
    match history {
        [.., (_, prev), (i, cur)] => {
            *i >= config.min_iterations
                && relative_change(*prev, *cur) < config.min_relative_perplexity_change
        }
        _ => false,
    }
}

pub struct IterationController<S: BatchSubstrate> {
    substrate: S,
    config: CvbConfig,
    store: CheckpointStore,
    topic_output: Option<String>,
    doc_topic_output: Option<String>,
}

impl<S: BatchSubstrate> IterationController<S> {
    ///
    /// * `substrate` - runs map tasks and the shuffle
    /// * `config` - validated here, before anything is scheduled
    /// * `state_dir` - checkpoint directory, created if missing
    ///
    pub fn new(substrate: S, config: CvbConfig, state_dir: &str) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(IterationController {
            substrate,
            config,
            store: CheckpointStore::new(state_dir)?,
            topic_output: None,
            doc_topic_output: None,
        })
    }

    /// Also write `p(term|topic)` rows once training stops
    pub fn with_topic_output(mut self, file: Option<String>) -> Self {
        self.topic_output = file;
        self
    }

    /// Also write the final document mixtures once training stops
    pub fn with_doc_topic_output(mut self, file: Option<String>) -> Self {
        self.doc_topic_output = file;
        self
    }

    pub fn config(&self) -> &CvbConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Check that a state directory written earlier belongs to the same
    /// problem, then record this run's configuration
    fn init_state(&self) -> anyhow::Result<()> {
        if let Some(stored) = self.store.read_config()? {
            if stored.num_topics != self.config.num_topics
                || stored.num_terms != self.config.num_terms
            {
                return Err(CvbError::invalid_config(
                    "stateDir",
                    format!(
                        "holds a {} x {} model, this run is {} x {}",
                        stored.num_topics,
                        stored.num_terms,
                        self.config.num_topics,
                        self.config.num_terms
                    ),
                )
                .into());
            }
        }
        self.store.write_config(&self.config)
    }

    /// Latest model, its iteration and the matching document mixtures
    fn load_or_initialize(
        &self,
        corpus: &Corpus,
    ) -> anyhow::Result<(usize, TopicModel, Array2<f64>)> {
        let kk = self.config.num_topics;
        let vv = self.config.num_terms;

        match self.store.latest_complete_iteration()? {
            Some(last) => {
                let model = self.store.read_model(last)?;
                model.check_dims(kk, vv)?;
                let doc_topics = match self.store.read_doc_topics(last)? {
                    Some(theta) if theta.dim() == (corpus.num_docs(), kk) => theta,
                    _ => initial_doc_topics(corpus.num_docs(), kk),
                };
                info!("resuming after iteration {}", last);
                Ok((last, model, doc_topics))
            }
            None => {
                let model = TopicModel::random(kk, vv, self.config.random_seed);
                self.store.write_checkpoint(&Checkpoint {
                    iteration: 0,
                    model: &model,
                    perplexity: None,
                    doc_topics: None,
                })?;
                info!("initialized a random {} x {} model", kk, vv);
                Ok((0, model, initial_doc_topics(corpus.num_docs(), kk)))
            }
        }
    }

    /// Infer, aggregate and checkpoint one iteration. Nothing is written
    /// unless the pass went through.
    fn attempt(
        &self,
        corpus: &Corpus,
        iteration: usize,
        model: &Arc<TopicModel>,
        doc_topics: &Array2<f64>,
    ) -> anyhow::Result<(TopicModel, Array2<f64>, f64)> {
        let out = run_pass(
            &self.substrate,
            corpus,
            Arc::clone(model),
            doc_topics,
            &self.config,
        )?;

        if !out.perplexity.is_finite() {
            anyhow::bail!("perplexity {} is not finite", out.perplexity);
        }

        self.store.write_checkpoint(&Checkpoint {
            iteration,
            model: &out.model,
            perplexity: Some(out.perplexity),
            doc_topics: self.config.persist_doc_topics.then_some(&out.doc_topics),
        })?;

        Ok((out.model, out.doc_topics, out.perplexity))
    }

    ///
    /// Train until convergence, the iteration limit or the wall-clock
    /// budget, resuming from the state directory if it holds checkpoints.
    ///
    /// * `corpus` - documents, `config.num_terms` columns
    ///
    pub fn run(&self, corpus: &Corpus) -> anyhow::Result<TrainingSummary> {
        let config = &self.config;
        if corpus.num_terms() != config.num_terms {
            return Err(
                CvbError::dimension("corpus terms", config.num_terms, corpus.num_terms()).into(),
            );
        }

        let started = Instant::now();
        let budget = config.max_wall_clock_secs.map(std::time::Duration::from_secs);

        self.init_state()?;
        let (mut last, model, mut doc_topics) = self.load_or_initialize(corpus)?;
        let mut model = Arc::new(model);
        let mut history = self.store.perplexity_history(last)?;

        let mut outcome = if has_converged(&history, config) {
            Some(TrainingOutcome::Converged)
        } else if last >= config.max_iterations {
            Some(TrainingOutcome::MaxIterationsReached)
        } else {
            None
        };

        while outcome.is_none() {
            if budget.is_some_and(|b| started.elapsed() >= b) {
                info!("wall-clock budget used up after iteration {}", last);
                outcome = Some(TrainingOutcome::WallClockExhausted);
                break;
            }

            let iteration = last + 1;
            let attempts = config.max_iteration_retries + 1;
            let mut done = None;

            // leftovers of an interrupted earlier run
            self.store.discard_incomplete(iteration)?;

            for attempt in 1..=attempts {
                match self.attempt(corpus, iteration, &model, &doc_topics) {
                    Ok(x) => {
                        done = Some(x);
                        break;
                    }
                    Err(e) => {
                        let failure = CvbError::IterationFailure {
                            iteration,
                            message: format!("{:#}", e),
                        };
                        warn!("{} (attempt {}/{})", failure, attempt, attempts);
                        self.store.discard_incomplete(iteration)?;
                    }
                }
            }

            let Some((next, theta, perplexity)) = done else {
                return Err(CvbError::RetryBudgetExhausted {
                    iteration,
                    attempts,
                    last_good: last,
                }
                .into());
            };

            let change = history
                .last()
                .map(|&(_, prev)| relative_change(prev, perplexity));

            // the previous snapshot is dropped once nothing reads it
            model = Arc::new(next);
            doc_topics = theta;
            last = iteration;
            history.push((iteration, perplexity));

            match change {
                Some(change) => info!(
                    "iteration {}: perplexity {:.6}, relative change {:.3e} [{:.1}s]",
                    iteration,
                    perplexity,
                    change,
                    started.elapsed().as_secs_f64()
                ),
                None => info!(
                    "iteration {}: perplexity {:.6} [{:.1}s]",
                    iteration,
                    perplexity,
                    started.elapsed().as_secs_f64()
                ),
            }

            if has_converged(&history, config) {
                outcome = Some(TrainingOutcome::Converged);
            } else if iteration >= config.max_iterations {
                outcome = Some(TrainingOutcome::MaxIterationsReached);
            }
        }

        let outcome = outcome.unwrap_or(TrainingOutcome::MaxIterationsReached);
        info!("{:?} at iteration {}", outcome, last);

        self.write_outputs(&model, &doc_topics)?;

        Ok(TrainingSummary {
            outcome,
            final_iteration: last,
            final_perplexity: history.last().map(|&(_, p)| p),
            final_model_path: self.store.model_path(last)?,
            perplexities: history,
        })
    }

    fn write_outputs(&self, model: &TopicModel, doc_topics: &Array2<f64>) -> anyhow::Result<()> {
        if let Some(file) = self.topic_output.as_ref() {
            model.topic_term_distribution(self.config.eta).to_tsv(file)?;
            info!("wrote topic-term distributions to {}", file);
        }
        if let Some(file) = self.doc_topic_output.as_ref() {
            doc_topics.to_tsv(file)?;
            info!("wrote document-topic mixtures to {}", file);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_is_relative_to_the_previous_value() {
        assert_eq!(relative_change(2.0, 1.5), 0.25);
        assert_eq!(relative_change(2.0, 2.5), 0.25);
        assert_eq!(relative_change(0.0, 0.0), 0.0);
        assert!(relative_change(0.0, 1.0).is_infinite());
    }

    #[test]
    fn convergence_waits_for_min_iterations() {
        let mut config = CvbConfig::new(2, 4);
        config.min_iterations = 3;
        config.min_relative_perplexity_change = 0.01;

        let flat = vec![(1, 2.0), (2, 2.0)];
        assert!(!has_converged(&flat, &config));

        let flat = vec![(1, 2.0), (2, 2.0), (3, 2.0)];
        assert!(has_converged(&flat, &config));

        let moving = vec![(2, 2.0), (3, 1.0)];
        assert!(!has_converged(&moving, &config));

        assert!(!has_converged(&[(5, 1.0)], &config));
    }
}
