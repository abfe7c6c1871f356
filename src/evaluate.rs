
// compares tokenizers by the number of tokens each one needs for the same text

use crate::corpus::Corpus;
use crate::error::{Error, Result};
use crate::tokenizer::Tokenizer;

use log::{info, warn};
use std::fmt::Display;
use std::path::{Path, PathBuf};

pub struct EvaluationLine {
    pub name: String,
    pub outcome: std::result::Result<usize, String>
}

impl Display for EvaluationLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Ok(n_tokens) => write!(f, "Tokenizer: {}, tokens: {}", self.name, n_tokens),
            Err(e) => write!(f, "Tokenizer: {}, ERROR: {}", self.name, e)
        }
    }
}

pub struct Evaluation {}

impl Evaluation {

    /// Tokenizer artifacts of `dir` as (name, path without extension), sorted by name.
    pub fn discover_tokenizers(dir: &Path) -> Result<Vec<(String, PathBuf)>> {

        let files = match Corpus::discover(dir, "*.json") {
            Ok(files) => files,
            Err(Error::Io(_)) => Vec::new(),
            Err(e) => return Err(e)
        };
        let tokenizers: Vec<(String, PathBuf)> = files.into_iter().filter_map(|path| {
            let name = path.file_stem()?.to_str()?.to_owned();
            Some((name, path.with_extension("")))
        }).collect();

        // nothing to compare is fatal for this stage
        if tokenizers.is_empty() {
            return Err(Error::VocabularyFileMissing(dir.to_path_buf()));
        }
        Ok(tokenizers)
    }

    /// Encodes `text` with every tokenizer. One tokenizer failing to load or encode is
    /// recorded in its line and does not stop the others.
    pub fn run(tokenizers: &[(String, PathBuf)], text: &str) -> Result<Vec<EvaluationLine>> {

        if text.trim().is_empty() {
            return Err(Error::CorpusEmpty);
        }

        let lines = tokenizers.iter().map(|(name, path)| {
            let outcome = Tokenizer::from_file(path)
            .and_then(|tokenizer| tokenizer.encode(text))
            .map(|encoding| encoding.len());

            match outcome {
                Ok(n_tokens) => {
                    info!("tokenizer {}: {} tokens", name, n_tokens);
                    EvaluationLine { name: name.to_owned(), outcome: Ok(n_tokens) }
                },
                Err(e) => {
                    warn!("tokenizer {} skipped: {}", name, e);
                    EvaluationLine { name: name.to_owned(), outcome: Err(e.to_string()) }
                }
            }
        }).collect();

        Ok(lines)
    }

    pub fn report(text_name: &str, lines: &[EvaluationLine]) -> String {
        let body = lines.iter().map(|l| l.to_string()).collect::<Vec<String>>().join("\n");
        format!(
            "--- Tokenization results for '{}' ---\n\n{}\n\nAnalysis finished for {} tokenizers.\n",
            text_name, body, lines.len()
        )
    }

}
