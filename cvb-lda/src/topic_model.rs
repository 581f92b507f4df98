use crate::error::CvbError;
use matrix_util::dictionary::Dictionary;
use matrix_util::traits::{IoOps, SampleOps};
use ndarray::prelude::*;
use std::fmt::Write;

/// Topic-term counts `n[k,w]` (`K x V`) with their row totals `n[k]`.
///
/// A model is an immutable snapshot: an iteration reads one through an
/// `Arc` and produces the next one, never editing the one being read.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicModel {
    topic_term: Array2<f64>,
    topic_sums: Array1<f64>,
}

impl TopicModel {
    pub fn new(topic_term: Array2<f64>) -> Self {
        let topic_sums = topic_term.sum_axis(Axis(1));
        TopicModel {
            topic_term,
            topic_sums,
        }
    }

    pub fn zeros(num_topics: usize, num_terms: usize) -> Self {
        Self::new(Array2::zeros((num_topics, num_terms)))
    }

    /// `U(0,1)` counts; the same seed gives the same model everywhere
    pub fn random(num_topics: usize, num_terms: usize, seed: u64) -> Self {
        Self::new(Array2::<f64>::runif_seeded(num_topics, num_terms, seed))
    }

    pub fn num_topics(&self) -> usize {
        self.topic_term.nrows()
    }

    pub fn num_terms(&self) -> usize {
        self.topic_term.ncols()
    }

    pub fn topic_term(&self) -> &Array2<f64> {
        &self.topic_term
    }

    pub fn topic_sums(&self) -> &Array1<f64> {
        &self.topic_sums
    }

    /// Smoothed `p(w|k) = (n[k,w] + η) / (n[k] + η V)`
    #[inline]
    pub fn term_likelihood(&self, topic: usize, term: usize, eta: f64) -> f64 {
        (self.topic_term[(topic, term)] + eta)
            / (self.topic_sums[topic] + eta * self.num_terms() as f64)
    }

    /// `p(w|k)` for every topic
    pub fn term_likelihoods(&self, term: usize, eta: f64) -> Vec<f64> {
        (0..self.num_topics())
            .map(|k| self.term_likelihood(k, term, eta))
            .collect()
    }

    ///
    /// Next iteration's model: `w * accumulated + (1 - w) * previous`.
    ///
    /// * `accumulated` - counts gathered in this iteration
    /// * `previous` - the model the iteration read
    /// * `model_weight` - `w` in `(0, 1]`
    ///
    pub fn blend(
        accumulated: Array2<f64>,
        previous: &TopicModel,
        model_weight: f64,
    ) -> anyhow::Result<Self> {
        if accumulated.dim() != previous.topic_term.dim() {
            return Err(CvbError::dimension(
                "accumulated topic-term counts",
                previous.topic_term.len(),
                accumulated.len(),
            )
            .into());
        }
        if model_weight >= 1.0 {
            return Ok(Self::new(accumulated));
        }
        let mut next = accumulated * model_weight;
        next.scaled_add(1.0 - model_weight, &previous.topic_term);
        Ok(Self::new(next))
    }

    /// Rows of smoothed `p(w|k)`, each summing to one
    pub fn topic_term_distribution(&self, eta: f64) -> Array2<f64> {
        let vv = self.num_terms() as f64;
        let mut ret = self.topic_term.mapv(|x| x + eta);
        for (mut row, &tot) in ret.rows_mut().into_iter().zip(self.topic_sums.iter()) {
            row /= tot + eta * vv;
        }
        ret
    }

    /// The `n` heaviest terms of a topic, heaviest first
    pub fn top_terms(&self, topic: usize, n: usize) -> Vec<(usize, f64)> {
        let mut terms: Vec<(usize, f64)> = self
            .topic_term
            .row(topic)
            .iter()
            .copied()
            .enumerate()
            .collect();
        terms.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        terms.truncate(n);
        terms
    }

    /// One line per topic listing its top terms with their probabilities
    pub fn describe(&self, dictionary: Option<&Dictionary>, n: usize, eta: f64) -> String {
        let mut out = String::new();
        for k in 0..self.num_topics() {
            let _ = write!(out, "topic {}:", k);
            for (w, _) in self.top_terms(k, n) {
                let p = self.term_likelihood(k, w, eta);
                match dictionary.and_then(|d| d.term(w)) {
                    Some(term) => {
                        let _ = write!(out, " {}:{:.4}", term, p);
                    }
                    None => {
                        let _ = write!(out, " {}:{:.4}", w, p);
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    /// One topic per line, tab-separated term counts
    pub fn write_file(&self, file: &str) -> anyhow::Result<()> {
        self.topic_term.to_tsv(file)
    }

    pub fn read_file(file: &str) -> anyhow::Result<Self> {
        Ok(Self::new(Array2::<f64>::from_tsv(file, None)?))
    }

    /// Check the shape against what the run expects
    pub fn check_dims(&self, num_topics: usize, num_terms: usize) -> Result<(), CvbError> {
        if self.num_topics() != num_topics {
            return Err(CvbError::dimension("topics", num_topics, self.num_topics()));
        }
        if self.num_terms() != num_terms {
            return Err(CvbError::dimension("terms", num_terms, self.num_terms()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn blend_keeps_history_share() -> anyhow::Result<()> {
        let prev = TopicModel::new(array![[2.0, 0.0], [0.0, 4.0]]);
        let acc = array![[1.0, 1.0], [3.0, 1.0]];

        let replaced = TopicModel::blend(acc.clone(), &prev, 1.0)?;
        assert_eq!(replaced.topic_term(), &acc);

        let half = TopicModel::blend(acc, &prev, 0.5)?;
        assert_eq!(half.topic_term(), &array![[1.5, 0.5], [1.5, 2.5]]);
        assert_eq!(half.topic_sums(), &array![2.0, 4.0]);
        Ok(())
    }

    #[test]
    fn blend_rejects_other_shapes() {
        let prev = TopicModel::zeros(2, 3);
        assert!(TopicModel::blend(Array2::zeros((2, 2)), &prev, 0.5).is_err());
    }

    #[test]
    fn distribution_rows_sum_to_one() {
        let model = TopicModel::random(4, 9, 7);
        let dist = model.topic_term_distribution(0.01);
        for row in dist.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        for k in 0..4 {
            let lik: f64 = (0..9).map(|w| model.term_likelihood(k, w, 0.01)).sum();
            assert_abs_diff_eq!(lik, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn top_terms_in_order() {
        let model = TopicModel::new(array![[0.1, 5.0, 2.0, 5.0]]);
        assert_eq!(model.top_terms(0, 3), vec![(1, 5.0), (3, 5.0), (2, 2.0)]);
        let dict = Dictionary::numbered("w", 4);
        let text = model.describe(Some(&dict), 1, 0.0);
        assert!(text.starts_with("topic 0: w1:"));
    }
}
