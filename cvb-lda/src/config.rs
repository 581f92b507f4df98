use crate::error::CvbError;
use matrix_util::common_io::{read_lines, write_lines};
use matrix_util::utils::generate_minibatch_intervals;
use serde::{Deserialize, Serialize};

/// Hyperparameters and run options, fixed for the whole run and handed
/// to every component at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CvbConfig {
    /// number of topics `K`
    pub num_topics: usize,
    /// vocabulary size `V`
    pub num_terms: usize,
    /// document-topic smoothing `α`
    pub alpha: f64,
    /// topic-term smoothing `η`
    pub eta: f64,
    /// share of the newly accumulated counts in the next model;
    /// `1` replaces the previous model entirely
    pub model_weight: f64,
    pub min_iterations: usize,
    pub max_iterations: usize,
    /// stop once `|p(t) - p(t-1)| / p(t-1)` falls below this
    pub min_relative_perplexity_change: f64,
    /// inference threads of one map task
    pub num_worker_threads_per_task: usize,
    /// seeds the initial model and the perplexity sample
    pub random_seed: u64,
    /// inference sweeps per document in one pass
    pub max_doc_iterations: usize,
    /// fraction of documents evaluated for perplexity
    pub test_fraction: f64,
    /// map tasks the corpus is split into
    pub num_shards: usize,
    /// shuffle partitions
    pub num_reduce_partitions: usize,
    /// topics per contribution record (0 = all topics in one record)
    pub topic_block_size: usize,
    /// attempts after the first failure of one iteration
    pub max_iteration_retries: usize,
    pub max_wall_clock_secs: Option<u64>,
    /// checkpoint document mixtures for warm restarts
    pub persist_doc_topics: bool,
}

impl Default for CvbConfig {
    fn default() -> Self {
        let ncpu = num_cpus::get().max(1);
        CvbConfig {
            num_topics: 10,
            num_terms: 0,
            alpha: 0.1,
            eta: 0.1,
            model_weight: 1.0,
            min_iterations: 1,
            max_iterations: 20,
            min_relative_perplexity_change: 1e-3,
            num_worker_threads_per_task: ncpu,
            random_seed: 42,
            max_doc_iterations: 1,
            test_fraction: 1.0,
            num_shards: ncpu,
            num_reduce_partitions: ncpu,
            topic_block_size: 0,
            max_iteration_retries: 2,
            max_wall_clock_secs: None,
            persist_doc_topics: true,
        }
    }
}

impl CvbConfig {
    pub fn new(num_topics: usize, num_terms: usize) -> Self {
        CvbConfig {
            num_topics,
            num_terms,
            ..Default::default()
        }
    }

    /// Reject anything that would make the run meaningless before any
    /// work gets scheduled
    pub fn validate(&self) -> Result<(), CvbError> {
        let positive = [("alpha", self.alpha), ("eta", self.eta)];
        for (name, x) in positive {
            if !(x.is_finite() && x > 0.0) {
                return Err(CvbError::invalid_config(name, format!("{} must be > 0", x)));
            }
        }

        if self.num_topics < 1 {
            return Err(CvbError::invalid_config("numTopics", "must be >= 1"));
        }

        if self.num_terms < 1 {
            return Err(CvbError::invalid_config("numTerms", "must be >= 1"));
        }

        if !(self.model_weight.is_finite() && self.model_weight > 0.0 && self.model_weight <= 1.0)
        {
            return Err(CvbError::invalid_config(
                "modelWeight",
                format!("{} is outside (0, 1]", self.model_weight),
            ));
        }

        if self.max_iterations < 1 {
            return Err(CvbError::invalid_config("maxIterations", "must be >= 1"));
        }

        if self.min_iterations > self.max_iterations {
            return Err(CvbError::invalid_config(
                "minIterations",
                format!(
                    "{} exceeds maxIterations {}",
                    self.min_iterations, self.max_iterations
                ),
            ));
        }

        let change = self.min_relative_perplexity_change;
        if !(change.is_finite() && change >= 0.0) {
            return Err(CvbError::invalid_config(
                "minRelativePerplexityChange",
                format!("{} must be >= 0", change),
            ));
        }

        let at_least_one = [
            ("numWorkerThreadsPerTask", self.num_worker_threads_per_task),
            ("maxDocIterations", self.max_doc_iterations),
            ("numShards", self.num_shards),
            ("numReducePartitions", self.num_reduce_partitions),
        ];
        for (name, n) in at_least_one {
            if n < 1 {
                return Err(CvbError::invalid_config(name, "must be >= 1"));
            }
        }

        if !(self.test_fraction > 0.0 && self.test_fraction <= 1.0) {
            return Err(CvbError::invalid_config(
                "testFraction",
                format!("{} is outside (0, 1]", self.test_fraction),
            ));
        }

        Ok(())
    }

    /// Topic intervals `[lb, ub)` carried by separate contribution records
    pub fn topic_blocks(&self) -> Vec<(usize, usize)> {
        let block = match self.topic_block_size {
            0 => self.num_topics,
            b => b,
        };
        generate_minibatch_intervals(self.num_topics, block)
    }

    pub fn read_json(file: &str) -> anyhow::Result<Self> {
        let text = read_lines(file)?.join("\n");
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write_json(&self, file: &str) -> anyhow::Result<()> {
        write_lines(&[serde_json::to_string_pretty(self)?], file)
    }
}
