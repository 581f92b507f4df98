//! Topic-term counts gathered during one iteration.
//!
//! On the sharded path every shuffle group `(term, doc)` is folded in one
//! pass: its [`ModelBroadcast`](AggregationBranch::ModelBroadcast) record
//! (first, by key order) provides `p(w|k)`, and each following
//! [`DocContribution`](AggregationBranch::DocContribution) block adds
//! `c[w] p(w|k) (θ[k] + α) / Z[w]` to the term's column. Blocks of the
//! same group commute, so their arrival order does not matter.

use crate::composite_key::AggregationBranch;
use crate::error::CvbError;
use crate::inference::DocTopicContribution;
use crate::shuffle::{groups, KeyedRecord, RecordPayload};
use ndarray::prelude::*;
use std::collections::BTreeMap;

/// Sparse columns of a partial topic-term matrix: term -> `K` weights
pub type TermColumns = BTreeMap<usize, Vec<f64>>;

/// Dense `K x V` accumulator
#[derive(Debug, Clone, PartialEq)]
pub struct SufficientStats {
    counts: Array2<f64>,
}

impl SufficientStats {
    pub fn new(num_topics: usize, num_terms: usize) -> Self {
        SufficientStats {
            counts: Array2::zeros((num_topics, num_terms)),
        }
    }

    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    pub fn into_counts(self) -> Array2<f64> {
        self.counts
    }

    pub fn total(&self) -> f64 {
        self.counts.sum()
    }

    pub fn add_contribution(&mut self, contribution: &DocTopicContribution) {
        for (j, &w) in contribution.terms.iter().enumerate() {
            let mut col = self.counts.column_mut(w);
            col += &contribution.weights.column(j);
        }
    }

    pub fn add_columns(&mut self, columns: &TermColumns) {
        for (&w, weights) in columns {
            for (k, &x) in weights.iter().enumerate() {
                self.counts[(k, w)] += x;
            }
        }
    }

    pub fn merge(&mut self, other: &SufficientStats) {
        self.counts += &other.counts;
    }
}

///
/// Fold the records of one `(term, doc)` group into `column`.
///
/// * `group` - records sorted by key, all of the same group
/// * `column` - `K` weights of the group's term, added to in place
///
/// Records without a branch are sentinels and skipped.
///
pub fn fold_group(group: &[KeyedRecord], column: &mut [f64]) -> anyhow::Result<()> {
    let mut likelihoods: Option<&[f64]> = None;

    for rec in group {
        match (rec.key.branch, &rec.payload) {
            (None, _) => continue,
            (
                Some(AggregationBranch::ModelBroadcast),
                RecordPayload::ModelBroadcast { likelihoods: lik },
            ) => {
                if likelihoods.is_some() {
                    anyhow::bail!(
                        "term {} document {}: more than one model broadcast",
                        rec.key.term_id,
                        rec.key.doc_id
                    );
                }
                if lik.len() != column.len() {
                    return Err(CvbError::dimension("broadcast topics", column.len(), lik.len()).into());
                }
                likelihoods = Some(lik.as_slice());
            }
            (
                Some(AggregationBranch::DocContribution),
                RecordPayload::DocContribution {
                    topic_offset,
                    count,
                    normalizer,
                    mixture,
                },
            ) => {
                let lik = likelihoods.ok_or(CvbError::MissingModelBroadcast {
                    term_id: rec.key.term_id,
                    doc_id: rec.key.doc_id,
                })?;
                let ub = topic_offset + mixture.len();
                if ub > column.len() {
                    return Err(CvbError::dimension("contribution topics", column.len(), ub).into());
                }
                let scale = count / normalizer;
                for (i, m) in mixture.iter().enumerate() {
                    let k = topic_offset + i;
                    column[k] += scale * lik[k] * m;
                }
            }
            (Some(branch), _) => {
                anyhow::bail!(
                    "term {} document {}: {:?} key with a mismatched payload",
                    rec.key.term_id,
                    rec.key.doc_id,
                    branch
                );
            }
        }
    }
    Ok(())
}

///
/// Fold a sorted shuffle partition group by group.
///
/// * `sorted` - records of one partition in key order
/// * `num_topics` - `K`
///
pub fn fold_partition(sorted: &[KeyedRecord], num_topics: usize) -> anyhow::Result<TermColumns> {
    let mut columns = TermColumns::new();
    for group in groups(sorted) {
        let term = group[0].key.term_id;
        let term = usize::try_from(term)
            .map_err(|_| anyhow::anyhow!("negative term id {} in shuffle", term))?;
        let column = columns.entry(term).or_insert_with(|| vec![0.0; num_topics]);
        fold_group(group, column)?;
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn contributions() -> Vec<KeyedRecord> {
        vec![
            KeyedRecord::doc_contribution(2, 0, 0, 3.0, 2.0, vec![0.5, 1.5]),
            KeyedRecord::doc_contribution(2, 0, 2, 3.0, 2.0, vec![1.0]),
        ]
    }

    #[test]
    fn broadcast_then_contributions() -> anyhow::Result<()> {
        let mut group = vec![KeyedRecord::model_broadcast(2, 0, vec![0.2, 0.4, 0.6])];
        group.extend(contributions());
        let mut column = vec![0.0; 3];
        fold_group(&group, &mut column)?;
        // 3/2 * lik * mixture
        assert_abs_diff_eq!(column[0], 1.5 * 0.2 * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(column[1], 1.5 * 0.4 * 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(column[2], 1.5 * 0.6 * 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn contributions_commute() -> anyhow::Result<()> {
        let broadcast = KeyedRecord::model_broadcast(2, 0, vec![0.2, 0.4, 0.6]);
        let mut forward = vec![broadcast.clone()];
        forward.extend(contributions());
        let mut backward = vec![broadcast];
        backward.extend(contributions().into_iter().rev());

        let mut a = vec![0.0; 3];
        let mut b = vec![0.0; 3];
        fold_group(&forward, &mut a)?;
        fold_group(&backward, &mut b)?;
        for k in 0..3 {
            assert_abs_diff_eq!(a[k], b[k], epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn contribution_without_broadcast_fails() {
        let mut column = vec![0.0; 3];
        let err = fold_group(&contributions(), &mut column).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CvbError>(),
            Some(CvbError::MissingModelBroadcast {
                term_id: 2,
                doc_id: 0
            })
        ));
    }

    #[test]
    fn partition_sums_documents_per_term() -> anyhow::Result<()> {
        let mut sorted = vec![];
        for doc in [1, 0] {
            sorted.push(KeyedRecord::model_broadcast(4, doc, vec![1.0]));
            sorted.push(KeyedRecord::doc_contribution(4, doc, 0, 2.0, 1.0, vec![1.0]));
        }
        let columns = fold_partition(&sorted, 1)?;
        assert_eq!(columns.get(&4), Some(&vec![4.0]));

        let mut stats = SufficientStats::new(1, 5);
        stats.add_columns(&columns);
        assert_eq!(stats.total(), 4.0);
        Ok(())
    }
}
