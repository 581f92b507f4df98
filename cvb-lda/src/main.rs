mod cli_common;
mod run_infer;
mod run_simulate;
mod run_topics;
mod run_train;

use clap::{Parser, Subcommand};
use log::info;
use run_infer::*;
use run_simulate::*;
use run_topics::*;
use run_train::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "CVB0 topic models",
    long_about = "Latent Dirichlet Allocation by collapsed variational Bayes (CVB0).\n\
		  Corpora are `.mtx`/`.mtx.gz` files (rows = documents)\n\
		  or sparse row files (`nrow ncol` header, then `row col:count ...`)."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a topic model by sharded map/shuffle/merge passes",
        long_about = "Train a topic model iteration by iteration:\n\
		      (1) infer document mixtures shard by shard against a frozen model\n\
		      (2) shuffle and merge the contributions into a new model\n\
		      (3) checkpoint the model and its perplexity in the state directory.\n\
		      A state directory with earlier checkpoints is resumed."
    )]
    Train(TrainArgs),

    #[command(
        about = "Train a topic model in memory without the shuffle",
        long_about = "Train a topic model on a corpus that fits in memory.\n\
		      Same update rule as `train`, without sharding or checkpoints."
    )]
    TrainInMemory(TrainInMemoryArgs),

    /// Infer document-topic mixtures under a trained model
    Infer(InferArgs),

    /// Show the top terms of each topic
    Topics(TopicsArgs),

    /// Simulate a corpus from well-separated topics
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            train(args)?;
        }
        Commands::TrainInMemory(args) => {
            train_in_memory(args)?;
        }
        Commands::Infer(args) => {
            infer(args)?;
        }
        Commands::Topics(args) => {
            show_topics(args)?;
        }
        Commands::Simulate(args) => {
            simulate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
