use crate::cli_common::*;
use clap::Args;
use matrix_util::common_io::write_lines;
use matrix_util::dictionary::Dictionary;

#[derive(Args, Debug)]
pub struct TopicsArgs {
    #[arg(long, short, help = "Model file")]
    model: Option<Box<str>>,

    #[arg(long, help = "State directory (latest checkpoint)")]
    state_dir: Option<Box<str>>,

    #[arg(long, short, help = "Dictionary file")]
    dictionary: Option<Box<str>>,

    #[arg(long, short = 'n', default_value_t = 10, help = "Top terms per topic")]
    top: usize,

    #[arg(long, default_value_t = 0.1, help = "Topic-term smoothing")]
    eta: f64,

    #[arg(long, short, help = "Output file (default: stdout)")]
    out: Option<Box<str>>,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

pub fn show_topics(args: &TopicsArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let model = read_model(args.model.as_deref(), args.state_dir.as_deref())?;
    let dictionary = match args.dictionary.as_deref() {
        Some(file) => Some(Dictionary::read_file(file)?),
        None => None,
    };
    if let Some(dict) = dictionary.as_ref() {
        if dict.len() != model.num_terms() {
            return Err(cvb_lda::CvbError::dimension("dictionary", model.num_terms(), dict.len()).into());
        }
    }

    let text = model.describe(dictionary.as_ref(), args.top, args.eta);
    match args.out.as_deref() {
        Some(file) => {
            let lines: Vec<&str> = text.lines().collect();
            write_lines(&lines, file)?;
        }
        None => print!("{}", text),
    }
    Ok(())
}
