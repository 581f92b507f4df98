use crate::cli_common::*;
use clap::Args;
use cvb_lda::simulate::{generate_structured_corpus, SimArgs};
use matrix_util::common_io::mkdir;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header:\n\
		     - {out}.mtx.gz (document x term counts)\n\
		     - {out}.dict.gz (term names)\n\
		     - {out}.model.tsv.gz (generating p(term|topic))"
    )]
    out: Box<str>,

    #[arg(long, short = 'k', default_value_t = 3, help = "Number of generating topics")]
    num_topics: usize,

    #[arg(long, default_value_t = 12, help = "Vocabulary size")]
    num_terms: usize,

    #[arg(long, default_value_t = 100, help = "Number of documents")]
    num_docs: usize,

    #[arg(long, default_value_t = 20, help = "Tokens per document")]
    num_samples: usize,

    #[arg(long, default_value_t = 1, help = "Topics per document")]
    topics_per_doc: usize,

    #[arg(
        long,
        default_value_t = 3.0,
        help = "Decay power",
        long_help = "p(term|topic) decays as 1/(distance + 1)^power\n\
		     away from the topic's centre term."
    )]
    decay: f64,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

pub fn simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    if args.num_topics < 1 || args.num_terms < args.num_topics {
        anyhow::bail!(
            "need 1 <= topics ({}) <= terms ({})",
            args.num_topics,
            args.num_terms
        );
    }

    let sim = SimArgs {
        num_topics: args.num_topics,
        num_terms: args.num_terms,
        num_docs: args.num_docs,
        num_samples: args.num_samples,
        topics_per_doc: args.topics_per_doc,
        decay_power: args.decay,
        rseed: args.seed,
    };

    let out = &args.out;
    mkdir(out)?;
    generate_structured_corpus(
        &sim,
        &format!("{}.mtx.gz", out),
        &format!("{}.dict.gz", out),
        &format!("{}.model.tsv.gz", out),
    )
}
