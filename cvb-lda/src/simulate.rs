use log::info;
use matrix_util::dictionary::Dictionary;
use matrix_util::mtx_io::{write_mtx_triplets, Triplet};
use matrix_util::sparse_rows::SparseRows;
use matrix_util::traits::IoOps;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{weighted::WeightedIndex, Distribution};

pub struct SimArgs {
    pub num_topics: usize,
    pub num_terms: usize,
    pub num_docs: usize,
    /// tokens drawn per document
    pub num_samples: usize,
    pub topics_per_doc: usize,
    /// `p(term|topic) ∝ 1 / (distance + 1)^decay_power`
    pub decay_power: f64,
    pub rseed: u64,
}

///
/// Topics centered at evenly spaced terms on a circular vocabulary.
///
/// ```text
/// centroid(k) = (V / K) (k + 1)
/// p(w|k)     ∝ decay(circular distance between w and centroid(k))
/// ```
///
/// * `num_topics` - `K`
/// * `num_terms` - `V`
/// * `decay` - non-negative weight of a distance
///
/// Returns a `K x V` matrix with rows summing to one.
///
pub fn random_structured_model<F>(num_topics: usize, num_terms: usize, decay: F) -> Array2<f64>
where
    F: Fn(f64) -> f64,
{
    let width = num_terms / num_topics.max(1);
    let mut model = Array2::<f64>::zeros((num_topics, num_terms));

    for (k, mut row) in model.rows_mut().into_iter().enumerate() {
        let centroid = (width * (k + 1)) as i64;
        for (w, x) in row.iter_mut().enumerate() {
            let mut dist = (centroid - w as i64).unsigned_abs() as usize;
            if dist > num_terms / 2 {
                dist = num_terms - dist;
            }
            *x = decay(dist as f64);
        }
        let tot = row.sum();
        if tot > 0.0 {
            row /= tot;
        }
    }
    model
}

///
/// Draw a bag-of-words corpus from a topic model.
///
/// * `model` - `K x V`, rows are term distributions
/// * `rng` - random source
/// * `num_docs` - documents to draw
/// * `num_samples` - tokens per document
/// * `topics_per_doc` - topics mixed (uniformly) in each document
///
pub fn sampled_corpus<R: Rng>(
    model: &Array2<f64>,
    rng: &mut R,
    num_docs: usize,
    num_samples: usize,
    topics_per_doc: usize,
) -> anyhow::Result<SparseRows> {
    let (kk, vv) = model.dim();
    if kk == 0 || vv == 0 {
        anyhow::bail!("empty generating model {} x {}", kk, vv);
    }

    let term_dists = model
        .rows()
        .into_iter()
        .map(|row| WeightedIndex::new(row.iter().copied()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut triplets: Vec<Triplet> = vec![];
    for d in 0..num_docs {
        let topics: Vec<usize> = (0..topics_per_doc.max(1))
            .map(|_| rng.random_range(0..kk))
            .collect();
        for _ in 0..num_samples {
            let k = topics[rng.random_range(0..topics.len())];
            let w = term_dists[k].sample(rng);
            triplets.push((d, w, 1.0));
        }
    }

    SparseRows::from_triplets(num_docs, vv, &triplets)
}

///
/// Simulate a corpus and write it out.
///
/// * `args` - simulation parameters
/// * `mtx_file` - document x term counts (`.mtx` or `.mtx.gz`)
/// * `dict_file` - one term per line, `t0`, `t1`, ...
/// * `model_file` - the generating `K x V` model (tsv)
///
pub fn generate_structured_corpus(
    args: &SimArgs,
    mtx_file: &str,
    dict_file: &str,
    model_file: &str,
) -> anyhow::Result<()> {
    let power = args.decay_power;
    let model = random_structured_model(args.num_topics, args.num_terms, |d| {
        1.0 / (d + 1.0).powf(power)
    });

    let mut rng = StdRng::seed_from_u64(args.rseed);
    let corpus = sampled_corpus(
        &model,
        &mut rng,
        args.num_docs,
        args.num_samples,
        args.topics_per_doc,
    )?;

    write_mtx_triplets(&corpus.to_triplets(), corpus.nrows(), corpus.ncols(), mtx_file)?;
    Dictionary::numbered("t", args.num_terms).write_file(dict_file)?;
    model.to_tsv(model_file)?;

    info!(
        "simulated {} documents x {} terms from {} topics: {}, {}, {}",
        args.num_docs, args.num_terms, args.num_topics, mtx_file, dict_file, model_file
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn structured_rows_peak_at_their_centroid() {
        let model = random_structured_model(3, 12, |d| 1.0 / (d + 1.0).powi(3));
        for (k, row) in model.rows().into_iter().enumerate() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            let argmax = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(w, _)| w);
            assert_eq!(argmax, Some((4 * (k + 1)) % 12));
        }
    }

    #[test]
    fn sampled_documents_have_the_requested_length() -> anyhow::Result<()> {
        let model = random_structured_model(3, 12, |d| 1.0 / (d + 1.0).powi(2));
        let mut rng = StdRng::seed_from_u64(5);
        let corpus = sampled_corpus(&model, &mut rng, 10, 20, 1)?;
        assert_eq!(corpus.nrows(), 10);
        assert_eq!(corpus.ncols(), 12);
        for row in corpus.rows.iter() {
            assert_abs_diff_eq!(row.norm1(), 20.0, epsilon = 1e-12);
        }
        Ok(())
    }
}
