//! Latent Dirichlet Allocation trained by collapsed variational Bayes
//! (zero-order, CVB0) over corpora split into shards.
//!
//! One training iteration is a map pass (per-document inference against a
//! frozen model snapshot), a keyed shuffle that joins each term's model
//! weights with the documents' contributions, a merge into a new
//! topic-term matrix, and a checkpoint. [`driver::IterationController`]
//! repeats iterations until perplexity stops improving;
//! [`in_memory::InMemoryCvb0`] runs the same update rule without the
//! shuffle for small corpora.

/// Grouping key of the shuffle and its byte codec
pub mod composite_key;

/// Configuration with validation
pub mod config;

/// Corpus of term-count vectors and its shards
pub mod corpus;

/// Typed error kinds
pub mod error;

/// Per-document CVB0 update and perplexity
pub mod inference;

/// Topic-term counts of one iteration
pub mod topic_model;

/// Streaming fold of shuffled groups into new topic-term counts
pub mod sufficient_stats;

/// Local implementation of the map / keyed-shuffle / reduce substrate
pub mod shuffle;

/// One map / shuffle / merge pass
pub mod pass;

/// Iteration-numbered model checkpoints
pub mod checkpoint;

/// Iteration controller for the sharded trainer
pub mod driver;

/// Single-process reference trainer
pub mod in_memory;

/// Synthetic corpora drawn from structured topic models
pub mod simulate;

pub use config::CvbConfig;
pub use driver::{IterationController, TrainingOutcome, TrainingSummary};
pub use error::CvbError;
pub use in_memory::InMemoryCvb0;
pub use topic_model::TopicModel;
