use crate::cli_common::*;
use clap::Args;
use cvb_lda::shuffle::LocalSubstrate;
use cvb_lda::{CvbConfig, InMemoryCvb0, IterationController};
use log::info;
use matrix_util::common_io::{mkdir, write_lines};
use matrix_util::traits::IoOps;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        required = true,
        help = "Corpus file",
        long_help = "Document x term counts.\n\
		     `.mtx`, `.mtx.gz` or sparse rows (`row col:count ...`)."
    )]
    corpus: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "State directory",
        long_help = "Directory of iteration-numbered checkpoints:\n\
		     - {dir}/model-{i}.tsv.gz\n\
		     - {dir}/perplexity-{i}.txt\n\
		     - {dir}/doc-topics-{i}.tsv.gz\n\
		     - {dir}/config.json\n\
		     Training resumes from the latest complete checkpoint."
    )]
    state_dir: Box<str>,

    #[arg(
        long,
        help = "Dictionary file",
        long_help = "One term per line (or `term id`).\n\
		     Must cover exactly the corpus columns."
    )]
    dictionary: Option<Box<str>>,

    #[arg(
        long,
        help = "Configuration JSON",
        long_help = "Configuration in JSON (camelCase keys).\n\
		     When given, it replaces the hyperparameter options below;\n\
		     a missing or zero `numTerms` is taken from the corpus."
    )]
    config: Option<Box<str>>,

    #[arg(long, short = 'k', default_value_t = 10, help = "Number of topics")]
    num_topics: usize,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Document-topic smoothing",
        long_help = "Document-topic smoothing (alpha > 0)."
    )]
    alpha: f64,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Topic-term smoothing",
        long_help = "Topic-term smoothing (eta > 0)."
    )]
    eta: f64,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Share of new counts in the next model",
        long_help = "Share of newly accumulated counts in the next model, in (0, 1].\n\
		     1 replaces the previous model; smaller values keep\n\
		     (1 - weight) of it."
    )]
    model_weight: f64,

    #[arg(long, default_value_t = 1, help = "Minimum number of iterations")]
    min_iter: usize,

    #[arg(long, default_value_t = 20, help = "Maximum number of iterations")]
    max_iter: usize,

    #[arg(
        long,
        default_value_t = 1e-3,
        help = "Convergence threshold",
        long_help = "Stop once the relative change of perplexity between\n\
		     consecutive iterations falls below this value."
    )]
    min_rel_change: f64,

    #[arg(
        long,
        help = "Number of worker threads",
        long_help = "Number of worker threads.\n\
		     Defaults to the number of CPUs."
    )]
    threads: Option<usize>,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        default_value_t = 1,
        help = "Inference sweeps per document",
        long_help = "Number of mixture updates per document in each pass."
    )]
    doc_iter: usize,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Fraction of documents for perplexity",
        long_help = "Fraction of documents on which perplexity is evaluated.\n\
		     The same documents are used in every iteration."
    )]
    test_fraction: f64,

    #[arg(long, help = "Number of map shards (default: number of CPUs)")]
    shards: Option<usize>,

    #[arg(long, help = "Number of shuffle partitions (default: number of CPUs)")]
    partitions: Option<usize>,

    #[arg(
        long,
        default_value_t = 0,
        help = "Topics per contribution record",
        long_help = "Topics carried by one contribution record.\n\
		     0 puts all topics in one record."
    )]
    topic_block: usize,

    #[arg(long, default_value_t = 2, help = "Retries of a failed iteration")]
    retries: usize,

    #[arg(long, help = "Wall-clock budget in seconds")]
    max_secs: Option<u64>,

    #[arg(
        long,
        default_value_t = false,
        help = "Do not checkpoint document mixtures",
        long_help = "Do not checkpoint document mixtures.\n\
		     Resumed runs then restart from uniform mixtures."
    )]
    no_doc_topics: bool,

    #[arg(long, help = "Output file of p(term|topic) rows")]
    topic_out: Option<Box<str>>,

    #[arg(long, help = "Output file of document-topic mixtures")]
    doc_topic_out: Option<Box<str>>,

    #[arg(long, help = "Output file of the training summary (JSON)")]
    summary_out: Option<Box<str>>,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

impl TrainArgs {
    fn to_config(&self, num_terms: usize) -> anyhow::Result<CvbConfig> {
        if let Some(file) = self.config.as_deref() {
            let mut config = CvbConfig::read_json(file)?;
            if config.num_terms == 0 {
                config.num_terms = num_terms;
            }
            return Ok(config);
        }

        let mut config = CvbConfig::new(self.num_topics, num_terms);
        config.alpha = self.alpha;
        config.eta = self.eta;
        config.model_weight = self.model_weight;
        config.min_iterations = self.min_iter;
        config.max_iterations = self.max_iter;
        config.min_relative_perplexity_change = self.min_rel_change;
        config.random_seed = self.seed;
        config.max_doc_iterations = self.doc_iter;
        config.test_fraction = self.test_fraction;
        config.topic_block_size = self.topic_block;
        config.max_iteration_retries = self.retries;
        config.max_wall_clock_secs = self.max_secs;
        config.persist_doc_topics = !self.no_doc_topics;
        if let Some(n) = self.threads {
            config.num_worker_threads_per_task = n;
        }
        if let Some(n) = self.shards {
            config.num_shards = n;
        }
        if let Some(n) = self.partitions {
            config.num_reduce_partitions = n;
        }
        Ok(config)
    }
}

pub fn train(args: &TrainArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let (corpus, _) = read_corpus_and_dictionary(&args.corpus, args.dictionary.as_deref())?;
    let config = args.to_config(corpus.num_terms())?;
    config.validate()?;

    let substrate = LocalSubstrate::new(
        config.num_worker_threads_per_task,
        config.num_reduce_partitions,
    )?
    .with_progress(args.verbose);

    let controller = IterationController::new(substrate, config, &args.state_dir)?
        .with_topic_output(args.topic_out.as_deref().map(|s| s.to_string()))
        .with_doc_topic_output(args.doc_topic_out.as_deref().map(|s| s.to_string()));

    let summary = controller.run(&corpus)?;

    info!(
        "{:?}: iteration {}, perplexity {:?}, model {}",
        summary.outcome,
        summary.final_iteration,
        summary.final_perplexity,
        summary.final_model_path
    );

    if let Some(file) = args.summary_out.as_deref() {
        mkdir(file)?;
        write_lines(&[serde_json::to_string_pretty(&summary)?], file)?;
    }

    println!("{}", summary.final_model_path);
    if let Some(p) = summary.final_perplexity {
        println!("{}", p);
    }
    Ok(())
}

#[derive(Args, Debug)]
pub struct TrainInMemoryArgs {
    #[arg(required = true, help = "Corpus file")]
    corpus: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header:\n\
		     - {out}.model.tsv.gz (topic-term counts)\n\
		     - {out}.topics.tsv.gz (p(term|topic) rows)\n\
		     - {out}.doc_topics.tsv.gz (document mixtures)\n\
		     - {out}.perplexity.txt (one value per iteration)"
    )]
    out: Box<str>,

    #[arg(long, short = 'k', default_value_t = 10, help = "Number of topics")]
    num_topics: usize,

    #[arg(long, default_value_t = 0.1, help = "Document-topic smoothing")]
    alpha: f64,

    #[arg(long, default_value_t = 0.1, help = "Topic-term smoothing")]
    eta: f64,

    #[arg(long, default_value_t = 1.0, help = "Share of new counts in the next model")]
    model_weight: f64,

    #[arg(long, default_value_t = 1, help = "Minimum number of iterations")]
    min_iter: usize,

    #[arg(long, default_value_t = 20, help = "Maximum number of iterations")]
    max_iter: usize,

    #[arg(
        long,
        default_value_t = 0,
        help = "Burn-in iterations",
        long_help = "Iterations before convergence is checked at all."
    )]
    burn_in: usize,

    #[arg(long, default_value_t = 1e-3, help = "Convergence threshold")]
    min_rel_change: f64,

    #[arg(long, default_value_t = 1, help = "Inference sweeps per document")]
    doc_iter: usize,

    #[arg(long, help = "Number of worker threads (default: number of CPUs)")]
    threads: Option<usize>,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

pub fn train_in_memory(args: &TrainInMemoryArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let (corpus, _) = read_corpus_and_dictionary(&args.corpus, None)?;

    let mut config = CvbConfig::new(args.num_topics, corpus.num_terms());
    config.alpha = args.alpha;
    config.eta = args.eta;
    config.model_weight = args.model_weight;
    config.min_iterations = args.min_iter;
    config.max_iterations = args.max_iter;
    config.min_relative_perplexity_change = args.min_rel_change;
    config.max_doc_iterations = args.doc_iter;
    config.random_seed = args.seed;
    if let Some(n) = args.threads {
        config.num_worker_threads_per_task = n;
    }

    let mut lda = InMemoryCvb0::new(corpus, config)?;
    let perplexity =
        lda.iterate_until_convergence(args.min_iter, args.max_iter, args.burn_in, args.min_rel_change)?;

    let out = &args.out;
    mkdir(out)?;
    lda.model().write_file(&format!("{}.model.tsv.gz", out))?;
    lda.model()
        .topic_term_distribution(args.eta)
        .to_tsv(&format!("{}.topics.tsv.gz", out))?;
    lda.doc_topics().to_tsv(&format!("{}.doc_topics.tsv.gz", out))?;
    write_lines(lda.perplexities(), &format!("{}.perplexity.txt", out))?;

    info!(
        "{} iterations, final perplexity {:.6}",
        lda.perplexities().len(),
        perplexity
    );
    println!("{}", perplexity);
    Ok(())
}
