use crate::cli_common::*;
use clap::Args;
use cvb_lda::in_memory::infer_doc_topics;
use cvb_lda::inference::Smoothing;
use log::info;
use matrix_util::common_io::mkdir;
use matrix_util::traits::IoOps;

#[derive(Args, Debug)]
pub struct InferArgs {
    #[arg(required = true, help = "Corpus file")]
    corpus: Box<str>,

    #[arg(
        long,
        short,
        help = "Model file",
        long_help = "Topic-term counts, one topic per line.\n\
		     Either this or --state-dir is needed."
    )]
    model: Option<Box<str>>,

    #[arg(
        long,
        help = "State directory",
        long_help = "Use the latest complete checkpoint of a training run."
    )]
    state_dir: Option<Box<str>>,

    #[arg(long, short, required = true, help = "Output file of document-topic mixtures")]
    out: Box<str>,

    #[arg(long, default_value_t = 0.1, help = "Document-topic smoothing")]
    alpha: f64,

    #[arg(long, default_value_t = 0.1, help = "Topic-term smoothing")]
    eta: f64,

    #[arg(long, default_value_t = 10, help = "Inference sweeps per document")]
    doc_iter: usize,

    #[arg(long, help = "Number of worker threads (default: number of CPUs)")]
    threads: Option<usize>,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

pub fn infer(args: &InferArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let model = read_model(args.model.as_deref(), args.state_dir.as_deref())?;
    let (corpus, _) = read_corpus_and_dictionary(&args.corpus, None)?;
    model.check_dims(model.num_topics(), corpus.num_terms())?;

    if !(args.alpha > 0.0 && args.eta > 0.0) {
        return Err(cvb_lda::CvbError::invalid_config("alpha/eta", "must be > 0").into());
    }
    let smoothing = Smoothing {
        alpha: args.alpha,
        eta: args.eta,
    };

    let num_threads = args.threads.unwrap_or_else(num_cpus::get);
    let (doc_topics, perplexity) =
        infer_doc_topics(&corpus, &model, &smoothing, args.doc_iter, num_threads)?;
    mkdir(&args.out)?;
    doc_topics.to_tsv(&args.out)?;

    info!(
        "{} documents, perplexity {:.6} -> {}",
        corpus.num_docs(),
        perplexity,
        args.out
    );
    println!("{}", perplexity);
    Ok(())
}
