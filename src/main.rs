
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::PathBuf;
use std::time::Instant;
use subword_cbow::{Pipeline, Result};

#[derive(Parser, Debug)]
#[command(author, version, about = "Subword tokenizer and CBOW embedding trainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    stage: Stage
}

#[derive(Subcommand, Debug)]
enum Stage {
    /// Train the BPE tokenizer on the corpus
    Tokenizer {
        /// Path to the json configuration
        config: PathBuf
    },
    /// Count tokens of one corpus text under every saved tokenizer
    Evaluate {
        /// File name pattern of the text, e.g. "pan-tadeusz*.txt"
        text_pattern: String,
        config: PathBuf
    },
    /// Train CBOW embeddings on the tokenized corpus
    Train {
        config: PathBuf
    }
}

fn main() -> Result<()> {

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let timer = Instant::now();
    match cli.stage {
        Stage::Tokenizer { config } => {
            Pipeline::from_config(&config)?.train_tokenizer()?;
        },
        Stage::Evaluate { text_pattern, config } => {
            Pipeline::from_config(&config)?.evaluate(&text_pattern)?;
        },
        Stage::Train { config } => {
            Pipeline::from_config(&config)?.train_embeddings()?;
        }
    }

    info!("done, took {} seconds", timer.elapsed().as_secs());
    Ok(())
}
