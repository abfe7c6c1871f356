
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use subword_cbow::pipeline::MODEL_FILE;
use subword_cbow::{BoundaryMarkers, Config, Error, Query, Result, Similarity, Tokenizer};

// checks on trained vectors, ran independently from the main stages:
// the k most similar tokens to a token combination (analogies)
// the k most similar tokens to a word composed from its subwords

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Selector {
    /// analogies, each input line holds a quartet "a b c d": a is to b as c is to d
    A,
    /// word similarity, each input line holds one word
    B
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Nearest neighbours and analogies over trained CBOW vectors", long_about = None)]
struct Cli {
    selector: Selector,
    /// Input file, quartets or single words depending on the selector
    input: PathBuf,
    /// The json configuration used for training
    config: PathBuf
}

fn read_lines(input: &PathBuf) -> Result<Vec<String>> {
    let f = BufReader::new(File::open(input)?);
    let mut lines = Vec::new();
    for line in f.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line.trim().to_owned());
        }
    }
    Ok(lines)
}

fn run_analogies(inputs: &[String], k: usize, similarity: &Similarity) -> Result<()> {

    // a is to b as like c is to ?, i.e high is to higher as like good is to : better
    for input in inputs {

        let quad: Vec<&str> = input.split_whitespace().collect();
        if quad.len() != 4 {
            warn!("expected 4 tokens, got '{}', skipping", input);
            continue;
        }
        let source = [quad[0], quad[1], quad[2]];
        let target = quad[3];

        let analogies = match similarity.extract_analogies(source, k) {
            Ok(analogies) => analogies,
            Err(Error::AnalogyTokenMissing(token)) => {
                warn!("'{}' has no vector, skipping {}", token, input);
                continue;
            },
            Err(e) => return Err(e)
        };

        let mut found_target = false;
        for (i, (analogy, score)) in analogies.iter().enumerate() {
            info!("{} : {} - {} + {} ? {} = {}", i, source[1], source[0], source[2], analogy, score);
            if analogy == target {
                found_target = true;
                info!("found target '{}' analogy in place {}", target, 1 + i);
            }
        }
        if !found_target {
            info!("target '{}' was not found within the first {} analogies", target, k);
        }
    }
    Ok(())
}

fn run_similarity(inputs: &[String], k: usize, similarity: &Similarity, tokenizer: &Tokenizer, markers: &BoundaryMarkers) -> Result<()> {

    for word in inputs {

        let word_vector = match similarity.word_vector(word, tokenizer, markers) {
            Ok(word_vector) => word_vector,
            Err(e @ Error::NoRepresentableVector { .. }) | Err(e @ Error::EncodingFailure { .. }) => {
                warn!("{}, skipping", e);
                continue;
            },
            Err(e) => return Err(e)
        };

        info!("searching {} most similar tokens to {} ({})", k, word, word_vector.tokens.join(" "));
        let similarities = similarity.most_similar(&Query::Vector(word_vector.vector), k)?;
        for (i, (similar_token, score)) in similarities.iter().enumerate() {
            info!("{} : {} ? {} = {}", i, word, similar_token, score);
        }
    }
    Ok(())
}

fn main() -> Result<()> {

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let params = Config::new(&cli.config)?.get_params();
    let inputs = read_lines(&cli.input)?;
    let similarity = Similarity::read(&params.output_dir.join(MODEL_FILE))?;
    info!("loaded {} vectors, {} inputs", similarity.len(), inputs.len());
    let k = params.json_inference.topn;

    match cli.selector {
        Selector::A => run_analogies(&inputs, k, &similarity),
        Selector::B => {
            let tokenizer = Tokenizer::from_file(&params.tokenizer_file)?;
            let markers = BoundaryMarkers::resolve(&tokenizer, &params.json_inference.boundary_tokens);
            run_similarity(&inputs, k, &similarity, &tokenizer, &markers)
        }
    }
}
