use approx::assert_abs_diff_eq;
use cvb_lda::corpus::Corpus;
use cvb_lda::pass::{initial_doc_topics, run_pass};
use cvb_lda::shuffle::LocalSubstrate;
use cvb_lda::simulate::{random_structured_model, sampled_corpus};
use cvb_lda::*;
use matrix_util::sparse_rows::SparseRows;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

fn three_docs() -> anyhow::Result<Corpus> {
    let rows = SparseRows::from_dense_rows(
        4,
        &[
            vec![4.0, 3.0, 0.0, 0.0],
            vec![0.0, 0.0, 5.0, 2.0],
            vec![3.0, 4.0, 1.0, 0.0],
        ],
    )?;
    Corpus::new(rows)
}

fn small_config() -> CvbConfig {
    let mut config = CvbConfig::new(2, 4);
    config.alpha = 0.1;
    config.eta = 0.1;
    config.model_weight = 1.0;
    config.min_iterations = 5;
    config.max_iterations = 20;
    config.min_relative_perplexity_change = 0.001;
    config.num_shards = 2;
    config.num_reduce_partitions = 3;
    config.num_worker_threads_per_task = 2;
    config
}

#[test]
fn three_documents_converge_early() -> anyhow::Result<()> {
    let corpus = three_docs()?;
    let config = small_config();
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("state");
    let state = state.to_str().unwrap();

    let substrate = LocalSubstrate::new(2, config.num_reduce_partitions)?;
    let controller = IterationController::new(substrate, config, state)?;
    let summary = controller.run(&corpus)?;

    assert_eq!(summary.outcome, TrainingOutcome::Converged);
    assert!(summary.final_iteration >= 5);
    assert!(summary.final_iteration < 20);
    assert_eq!(summary.perplexities.len(), summary.final_iteration);

    for w in summary.perplexities.windows(2) {
        let (i, prev) = w[0];
        let (_, next) = w[1];
        assert!(next <= prev * (1.0 + 1e-9), "iteration {}: {} -> {}", i + 1, prev, next);
    }

    // every reported value is readable back by iteration number
    for &(i, p) in summary.perplexities.iter() {
        assert_eq!(controller.store().read_perplexity(i)?, Some(p));
    }
    assert_eq!(
        controller.store().latest_complete_iteration()?,
        Some(summary.final_iteration)
    );
    assert_eq!(summary.final_model_path, controller.store().model_path(summary.final_iteration)?);
    Ok(())
}

#[test]
fn sharded_pass_matches_in_memory_update() -> anyhow::Result<()> {
    let mut config = small_config();
    config.topic_block_size = 1;
    config.max_doc_iterations = 2;

    let mut lda = InMemoryCvb0::new(three_docs()?, config.clone())?;
    let corpus = three_docs()?;
    let substrate = LocalSubstrate::new(3, config.num_reduce_partitions)?;

    let mut model = Arc::new(TopicModel::random(2, 4, config.random_seed));
    let mut theta = initial_doc_topics(3, 2);

    for _ in 0..3 {
        let out = run_pass(&substrate, &corpus, Arc::clone(&model), &theta, &config)?;
        let perplexity = lda.iterate()?;

        assert_abs_diff_eq!(out.perplexity, perplexity, epsilon = 1e-9);
        for (a, b) in out.model.topic_term().iter().zip(lda.model().topic_term().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        for (a, b) in out.doc_topics.iter().zip(lda.doc_topics().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        model = Arc::new(out.model);
        theta = out.doc_topics;
    }
    Ok(())
}

#[test]
fn model_weight_keeps_history() -> anyhow::Result<()> {
    let corpus = three_docs()?;
    let mut config = small_config();
    config.model_weight = 0.5;
    let substrate = LocalSubstrate::new(2, 2)?;

    let model = Arc::new(TopicModel::random(2, 4, 3));
    let out = run_pass(&substrate, &corpus, Arc::clone(&model), &initial_doc_topics(3, 2), &config)?;

    // half of the new counts (19 tokens) plus half of the old model
    let expected = 0.5 * 19.0 + 0.5 * model.topic_term().sum();
    assert_abs_diff_eq!(out.model.topic_term().sum(), expected, epsilon = 1e-9);
    Ok(())
}

#[test]
fn right_number_of_topics_fits_best() -> anyhow::Result<()> {
    let generating = random_structured_model(3, 12, |d| 1.0 / (d + 1.0).powi(3));
    let mut rng = StdRng::seed_from_u64(1234);
    let rows = sampled_corpus(&generating, &mut rng, 100, 20, 1)?;

    let mut best = vec![];
    for num_topics in [1, 3, 6] {
        let mut perplexities = vec![];
        for seed in [1, 2] {
            let mut config = CvbConfig::new(num_topics, 12);
            config.random_seed = seed;
            let mut lda = InMemoryCvb0::new(Corpus::new(rows.clone())?, config)?;
            perplexities.push(lda.iterate_until_convergence(0, 30, 0, 1e-4)?);
        }
        best.push(perplexities.into_iter().fold(f64::INFINITY, f64::min));
    }

    let (p1, p3, p6) = (best[0], best[1], best[2]);
    assert!(p3 < p1, "K=3 {} vs K=1 {}", p3, p1);
    assert!(p3 < p6, "K=3 {} vs K=6 {}", p3, p6);
    Ok(())
}

#[test]
fn empty_corpus_is_rejected() -> anyhow::Result<()> {
    let rows = SparseRows::from_dense_rows(4, &[])?;
    let err = Corpus::new(rows).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CvbError>(),
        Some(CvbError::EmptyCorpus { .. })
    ));

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("empty.mtx.gz");
    let file = file.to_str().unwrap();
    matrix_util::mtx_io::write_mtx_triplets(&[], 0, 4, file)?;
    let err = Corpus::read_file(file).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CvbError>(),
        Some(CvbError::EmptyCorpus { .. })
    ));
    Ok(())
}

#[test]
fn invalid_configuration_schedules_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("never");
    let state = state.to_str().unwrap();

    let mut config = small_config();
    config.min_iterations = 30;
    let substrate = LocalSubstrate::new(1, 1)?;
    let err = IterationController::new(substrate, config, state)
        .err()
        .ok_or(anyhow::anyhow!("accepted minIterations > maxIterations"))?;
    assert!(matches!(
        err.downcast_ref::<CvbError>(),
        Some(CvbError::InvalidConfiguration { .. })
    ));
    assert!(!std::path::Path::new(state).exists());

    let mut config = small_config();
    config.eta = -1.0;
    assert!(InMemoryCvb0::new(three_docs()?, config).is_err());
    Ok(())
}

#[test]
fn iteration_limit_and_resume() -> anyhow::Result<()> {
    let corpus = three_docs()?;
    let dir = tempfile::tempdir()?;
    let state = dir.path().to_str().unwrap();

    let mut config = small_config();
    config.min_iterations = 3;
    config.max_iterations = 3;
    config.min_relative_perplexity_change = 0.0;
    let summary = IterationController::new(LocalSubstrate::new(2, 2)?, config.clone(), state)?
        .run(&corpus)?;
    assert_eq!(summary.outcome, TrainingOutcome::MaxIterationsReached);
    assert_eq!(summary.final_iteration, 3);

    config.max_iterations = 5;
    config.min_iterations = 5;
    let resumed = IterationController::new(LocalSubstrate::new(2, 2)?, config.clone(), state)?
        .run(&corpus)?;
    assert_eq!(resumed.final_iteration, 5);
    assert_eq!(resumed.perplexities.len(), 5);
    assert_eq!(&resumed.perplexities[..3], &summary.perplexities[..]);

    // a straight run to 5 lands on the same model
    let fresh = tempfile::tempdir()?;
    let straight = IterationController::new(
        LocalSubstrate::new(2, 2)?,
        config,
        fresh.path().to_str().unwrap(),
    )?
    .run(&corpus)?;
    assert_eq!(straight.perplexities, resumed.perplexities);
    Ok(())
}

#[test]
fn wall_clock_budget_stops_the_loop() -> anyhow::Result<()> {
    let mut config = small_config();
    config.max_wall_clock_secs = Some(0);
    let dir = tempfile::tempdir()?;
    let summary = IterationController::new(
        LocalSubstrate::new(1, 1)?,
        config,
        dir.path().to_str().unwrap(),
    )?
    .run(&three_docs()?)?;
    assert_eq!(summary.outcome, TrainingOutcome::WallClockExhausted);
    assert_eq!(summary.final_iteration, 0);
    assert_eq!(summary.final_perplexity, None);
    Ok(())
}
