//! In-process stand-in for a batch substrate: parallel map tasks over
//! corpus shards, then a keyed shuffle that hash-partitions records by
//! `(term, doc)` and sorts each partition by [`CompositeKey`].

use crate::composite_key::{AggregationBranch, CompositeKey};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressDrawTarget};
use log::debug;
use rayon::prelude::*;

/// What travels with a key
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    /// `p(w|k)` of the group's term for every topic `k`
    ModelBroadcast { likelihoods: Vec<f64> },
    /// topics `[topic_offset, topic_offset + mixture.len())` of one
    /// document's share of the group's term
    DocContribution {
        topic_offset: usize,
        /// observed count `c[w]`
        count: f64,
        /// `Σ_k p(w|k) (θ[k] + α)` over all topics
        normalizer: f64,
        /// `θ[k] + α` for the block
        mixture: Vec<f64>,
    },
}

/// One shuffled record; the key's branch always matches the payload
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord {
    pub key: CompositeKey,
    pub payload: RecordPayload,
}

impl KeyedRecord {
    pub fn model_broadcast(term_id: i32, doc_id: i32, likelihoods: Vec<f64>) -> Self {
        KeyedRecord {
            key: CompositeKey::new(term_id, doc_id, AggregationBranch::ModelBroadcast),
            payload: RecordPayload::ModelBroadcast { likelihoods },
        }
    }

    pub fn doc_contribution(
        term_id: i32,
        doc_id: i32,
        topic_offset: usize,
        count: f64,
        normalizer: f64,
        mixture: Vec<f64>,
    ) -> Self {
        KeyedRecord {
            key: CompositeKey::new(term_id, doc_id, AggregationBranch::DocContribution),
            payload: RecordPayload::DocContribution {
                topic_offset,
                count,
                normalizer,
                mixture,
            },
        }
    }
}

/// Partition of a group; fixed across runs and processes
pub fn partition_of(key: &CompositeKey, num_partitions: usize) -> usize {
    let h = (key.term_id as i64 as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(key.doc_id as i64 as u64)
        .wrapping_mul(0xBF58_476D_1CE4_E5B9);
    ((h >> 32) % num_partitions.max(1) as u64) as usize
}

/// Facilities of the batch platform the trainer runs on
pub trait BatchSubstrate: Sync {
    ///
    /// Run one task per shard; any failing task fails the whole pass.
    /// Outputs come back in shard order.
    ///
    /// * `shards` - document ranges `[lb, ub)`
    /// * `task` - `(shard index, range) -> output`
    ///
    fn map_shards<T, F>(&self, shards: &[(usize, usize)], task: F) -> anyhow::Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize, (usize, usize)) -> anyhow::Result<T> + Sync + Send;

    ///
    /// Route every record to its partition, sort each partition by key
    /// (records with equal keys keep their input order) and reduce each
    /// sorted partition.
    ///
    /// * `records` - map output in shard order
    /// * `reduce` - `(partition index, sorted records) -> output`
    ///
    fn shuffle_reduce<A, F>(&self, records: Vec<KeyedRecord>, reduce: F) -> anyhow::Result<Vec<A>>
    where
        A: Send,
        F: Fn(usize, &[KeyedRecord]) -> anyhow::Result<A> + Sync + Send;
}

/// Runs everything on a private rayon pool
pub struct LocalSubstrate {
    pool: rayon::ThreadPool,
    num_partitions: usize,
    show_progress: bool,
}

impl LocalSubstrate {
    pub fn new(num_threads: usize, num_partitions: usize) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .build()?;
        Ok(LocalSubstrate {
            pool,
            num_partitions: num_partitions.max(1),
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        let pb = ProgressBar::new(len as u64);
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb
    }
}

impl BatchSubstrate for LocalSubstrate {
    fn map_shards<T, F>(&self, shards: &[(usize, usize)], task: F) -> anyhow::Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize, (usize, usize)) -> anyhow::Result<T> + Sync + Send,
    {
        let pb = self.progress_bar(shards.len());
        let out = self.pool.install(|| {
            shards
                .par_iter()
                .enumerate()
                .progress_with(pb.clone())
                .map(|(s, &range)| task(s, range))
                .collect::<anyhow::Result<Vec<T>>>()
        });
        pb.finish_and_clear();
        out
    }

    fn shuffle_reduce<A, F>(&self, records: Vec<KeyedRecord>, reduce: F) -> anyhow::Result<Vec<A>>
    where
        A: Send,
        F: Fn(usize, &[KeyedRecord]) -> anyhow::Result<A> + Sync + Send,
    {
        let nparts = self.num_partitions;
        let mut partitions: Vec<Vec<KeyedRecord>> = vec![vec![]; nparts];
        for rec in records {
            partitions[partition_of(&rec.key, nparts)].push(rec);
        }

        debug!(
            "shuffle: {} partitions, largest {}",
            nparts,
            partitions.iter().map(|p| p.len()).max().unwrap_or(0)
        );

        self.pool.install(|| {
            partitions
                .into_par_iter()
                .enumerate()
                .map(|(p, mut part)| {
                    // stable, so equal keys keep the map order
                    part.sort_by(|a, b| a.key.cmp(&b.key));
                    reduce(p, &part)
                })
                .collect()
        })
    }
}

/// Walk a sorted partition one `(term, doc)` group at a time
pub fn groups(sorted: &[KeyedRecord]) -> impl Iterator<Item = &[KeyedRecord]> {
    sorted.chunk_by(|a, b| a.key.same_group(&b.key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_arrive_sorted_and_grouped() -> anyhow::Result<()> {
        let substrate = LocalSubstrate::new(2, 3)?;
        let mut records = vec![];
        for doc in 0..4 {
            for term in 0..5 {
                records.push(KeyedRecord::doc_contribution(term, doc, 0, 1.0, 1.0, vec![1.0]));
                records.push(KeyedRecord::model_broadcast(term, doc, vec![0.5]));
            }
        }

        let seen = substrate.shuffle_reduce(records, |_, part| {
            for w in part.windows(2) {
                assert!(w[0].key <= w[1].key);
            }
            let mut groups_seen = vec![];
            for g in groups(part) {
                assert_eq!(g.len(), 2);
                assert!(g[0].key.priority);
                assert!(!g[1].key.priority);
                groups_seen.push(g[0].key.group());
            }
            Ok(groups_seen)
        })?;

        let mut all: Vec<_> = seen.into_iter().flatten().collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
        Ok(())
    }

    #[test]
    fn map_keeps_shard_order_and_fails_as_a_whole() -> anyhow::Result<()> {
        let substrate = LocalSubstrate::new(4, 1)?;
        let shards = vec![(0, 2), (2, 5), (5, 6)];
        let out = substrate.map_shards(&shards, |s, (lb, ub)| Ok((s, ub - lb)))?;
        assert_eq!(out, vec![(0, 2), (1, 3), (2, 1)]);

        let failed = substrate.map_shards(&shards, |s, _| {
            if s == 1 {
                anyhow::bail!("worker lost")
            }
            Ok(s)
        });
        assert!(failed.is_err());
        Ok(())
    }

    #[test]
    fn partition_is_deterministic() {
        let k = CompositeKey::new(17, 3, AggregationBranch::DocContribution);
        let b = CompositeKey::new(17, 3, AggregationBranch::ModelBroadcast);
        assert_eq!(partition_of(&k, 7), partition_of(&b, 7));
        assert!(partition_of(&k, 7) < 7);
    }
}
