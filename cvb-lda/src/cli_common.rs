use cvb_lda::checkpoint::CheckpointStore;
use cvb_lda::corpus::Corpus;
use cvb_lda::error::CvbError;
use cvb_lda::TopicModel;
use log::info;
use matrix_util::dictionary::Dictionary;

pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}

/// Corpus plus an optional dictionary covering exactly its columns
pub fn read_corpus_and_dictionary(
    corpus_file: &str,
    dictionary_file: Option<&str>,
) -> anyhow::Result<(Corpus, Option<Dictionary>)> {
    let corpus = Corpus::read_file(corpus_file)?;
    let dictionary = match dictionary_file {
        Some(file) => {
            let dict = Dictionary::read_file(file)?;
            if dict.len() != corpus.num_terms() {
                return Err(CvbError::dimension("dictionary", corpus.num_terms(), dict.len()).into());
            }
            info!("dictionary {}: {} terms", file, dict.len());
            Some(dict)
        }
        None => None,
    };
    Ok((corpus, dictionary))
}

/// A model file, or else the latest checkpoint of a state directory
pub fn read_model(model_file: Option<&str>, state_dir: Option<&str>) -> anyhow::Result<TopicModel> {
    match (model_file, state_dir) {
        (Some(file), _) => TopicModel::read_file(file),
        (None, Some(dir)) => {
            let store = CheckpointStore::new(dir)?;
            let last = store
                .latest_complete_iteration()?
                .ok_or(anyhow::anyhow!("no checkpoint in {}", dir))?;
            info!("model of iteration {} in {}", last, dir);
            store.read_model(last)
        }
        (None, None) => Err(anyhow::anyhow!("either --model or --state-dir is needed")),
    }
}
