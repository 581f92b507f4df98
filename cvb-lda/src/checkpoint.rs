//! Iteration-numbered state under one directory:
//!
//! ```text
//! <state>/config.json
//! <state>/model-<i>.tsv.gz        topic-term counts after iteration i
//! <state>/perplexity-<i>.txt      per-token perplexity (absent for i = 0)
//! <state>/doc-topics-<i>.tsv.gz   document mixtures (optional)
//! ```
//!
//! Every file is written to a temporary name and renamed into place, the
//! model last. A model file therefore marks a complete checkpoint, and the
//! other files of an iteration are only read back once its model exists.

use crate::config::CvbConfig;
use crate::topic_model::TopicModel;
use log::debug;
use matrix_util::common_io::{read_lines, remove_file, write_atomically, write_lines};
use matrix_util::traits::IoOps;
use ndarray::prelude::*;
use std::path::{Path, PathBuf};

const MODEL_PREFIX: &str = "model-";
const MODEL_SUFFIX: &str = ".tsv.gz";

pub struct CheckpointStore {
    dir: PathBuf,
}

/// Everything saved for one iteration
pub struct Checkpoint<'a> {
    pub iteration: usize,
    pub model: &'a TopicModel,
    pub perplexity: Option<f64>,
    pub doc_topics: Option<&'a Array2<f64>>,
}

fn path_str(path: &Path) -> anyhow::Result<String> {
    path.to_str()
        .map(|s| s.to_string())
        .ok_or(anyhow::anyhow!("non-utf8 path: {:?}", path))
}

impl CheckpointStore {
    /// Open (and create if needed) a state directory
    pub fn new(dir: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(CheckpointStore {
            dir: PathBuf::from(dir),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, iteration: usize) -> anyhow::Result<String> {
        path_str(&self.dir.join(format!("{}{}{}", MODEL_PREFIX, iteration, MODEL_SUFFIX)))
    }

    pub fn perplexity_path(&self, iteration: usize) -> anyhow::Result<String> {
        path_str(&self.dir.join(format!("perplexity-{}.txt", iteration)))
    }

    pub fn doc_topics_path(&self, iteration: usize) -> anyhow::Result<String> {
        path_str(&self.dir.join(format!("doc-topics-{}.tsv.gz", iteration)))
    }

    pub fn config_path(&self) -> anyhow::Result<String> {
        path_str(&self.dir.join("config.json"))
    }

    pub fn write_config(&self, config: &CvbConfig) -> anyhow::Result<()> {
        let file = self.config_path()?;
        write_atomically(&file, |tmp| config.write_json(tmp))
    }

    pub fn read_config(&self) -> anyhow::Result<Option<CvbConfig>> {
        let file = self.config_path()?;
        if !Path::new(&file).exists() {
            return Ok(None);
        }
        Ok(Some(CvbConfig::read_json(&file)?))
    }

    /// Save one iteration; the model file goes in last. If any write
    /// fails, nothing of the iteration is left behind.
    pub fn write_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let i = checkpoint.iteration;
        if let Err(e) = self.write_files(checkpoint) {
            self.discard_incomplete(i)?;
            return Err(e);
        }
        Ok(())
    }

    fn write_files(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let i = checkpoint.iteration;

        if let Some(theta) = checkpoint.doc_topics {
            write_atomically(&self.doc_topics_path(i)?, |tmp| theta.to_tsv(tmp))?;
        }

        if let Some(p) = checkpoint.perplexity {
            write_atomically(&self.perplexity_path(i)?, |tmp| {
                write_lines(&[format!("{}", p)], tmp)
            })?;
        }

        let model_file = self.model_path(i)?;
        write_atomically(&model_file, |tmp| checkpoint.model.write_file(tmp))?;
        debug!("checkpoint {} -> {}", i, model_file);
        Ok(())
    }

    /// Remove what an unfinished write of `iteration` left behind. A
    /// complete checkpoint is never touched.
    pub fn discard_incomplete(&self, iteration: usize) -> anyhow::Result<()> {
        if self.has_model(iteration)? {
            return Ok(());
        }
        remove_file(&self.perplexity_path(iteration)?)?;
        remove_file(&self.doc_topics_path(iteration)?)?;
        Ok(())
    }

    pub fn has_model(&self, iteration: usize) -> anyhow::Result<bool> {
        Ok(Path::new(&self.model_path(iteration)?).exists())
    }

    pub fn read_model(&self, iteration: usize) -> anyhow::Result<TopicModel> {
        TopicModel::read_file(&self.model_path(iteration)?)
    }

    /// `None` unless iteration `i` is complete and has a perplexity
    pub fn read_perplexity(&self, iteration: usize) -> anyhow::Result<Option<f64>> {
        let file = self.perplexity_path(iteration)?;
        if !self.has_model(iteration)? || !Path::new(&file).exists() {
            return Ok(None);
        }
        let lines = read_lines(&file)?;
        let first = lines
            .first()
            .ok_or(anyhow::anyhow!("empty perplexity file {}", file))?;
        Ok(Some(first.trim().parse::<f64>()?))
    }

    pub fn read_doc_topics(&self, iteration: usize) -> anyhow::Result<Option<Array2<f64>>> {
        let file = self.doc_topics_path(iteration)?;
        if !self.has_model(iteration)? || !Path::new(&file).exists() {
            return Ok(None);
        }
        Ok(Some(Array2::<f64>::from_tsv(&file, None)?))
    }

    /// Highest iteration with a model file, if any
    pub fn latest_complete_iteration(&self) -> anyhow::Result<Option<usize>> {
        let mut latest: Option<usize> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let iteration = name
                .strip_prefix(MODEL_PREFIX)
                .and_then(|x| x.strip_suffix(MODEL_SUFFIX))
                .and_then(|x| x.parse::<usize>().ok());
            if let Some(i) = iteration {
                latest = Some(latest.map_or(i, |l| l.max(i)));
            }
        }
        Ok(latest)
    }

    /// Perplexities recorded for iterations `1..=last`, skipping gaps
    pub fn perplexity_history(&self, last: usize) -> anyhow::Result<Vec<(usize, f64)>> {
        let mut ret = vec![];
        for i in 1..=last {
            if let Some(p) = self.read_perplexity(i)? {
                ret.push((i, p));
            }
        }
        Ok(ret)
    }
}
