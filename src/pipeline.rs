
// imports
use crate::bpe_trainer::BpeTrainer;
use crate::config::{files_handling, Config, JsonTypes};
use crate::corpus::Corpus;
use crate::error::{Error, Result};
use crate::evaluate::Evaluation;
use crate::tokenizer::Tokenizer;
use crate::train::{EmbeddingModel, Train};

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const TENSOR_FILE: &str = "embedding_tensor_cbow";
pub const MAP_FILE: &str = "embedding_token_to_index_map";
pub const MODEL_FILE: &str = "embedding_cbow_model";

pub struct Pipeline {
    params: JsonTypes
}

impl Pipeline {

    // the stages, each one reads what the previous one saved -
    // -> tokenizer: corpus -> vocabulary and merges
    // -> evaluate: token counts of one text under every saved tokenizer
    // -> train: corpus -> tokenized sentences -> cbow vectors

    pub fn new(params: JsonTypes) -> Pipeline {
        Self { params }
    }

    pub fn from_config(config_file: &Path) -> Result<Pipeline> {
        let params = Config::new(config_file)?.get_params();
        info!("{}", params);
        Ok(Pipeline::new(params))
    }

    pub fn params(&self) -> &JsonTypes {
        &self.params
    }

    // the tokenizer file is kept as a path stem, its directory holds every tokenizer artifact
    fn tokenizer_location(&self) -> (PathBuf, String) {
        let stem = &self.params.tokenizer_file;
        let dir = stem.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = stem.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "tokenizer".to_owned());
        (dir, name)
    }

    fn corpus(&self) -> Result<Vec<String>> {
        let files = Corpus::discover(&self.params.corpus_dir, &self.params.corpus_pattern)?;
        Corpus::aggregate(&files)
    }

    pub fn train_tokenizer(&self) -> Result<PathBuf> {

        let timer = Instant::now();
        let corpus = self.corpus()?;

        let model = BpeTrainer::new(self.params.json_tokenizer.clone()).train(&corpus)?;
        let (dir, name) = self.tokenizer_location();
        let out = files_handling::save_output(&dir, &name, &model)?;

        info!("saved tokenizer of {} tokens to {}, took {} seconds", model.vocab.len(), out.display(), timer.elapsed().as_secs());
        Ok(out)
    }

    pub fn evaluate(&self, text_pattern: &str) -> Result<PathBuf> {

        let text_pattern = text_pattern.trim();
        if text_pattern.is_empty() {
            return Err(Error::InvalidConfig("a text pattern is required for evaluation".into()));
        }
        let text_name = text_pattern.replace('*', "").replace(".txt", "");

        let (dir, _) = self.tokenizer_location();
        let tokenizers = Evaluation::discover_tokenizers(&dir)?;

        // the first matching file is the evaluated text
        let files = Corpus::discover(&self.params.corpus_dir, text_pattern)?;
        let source = match files.first() {
            Some(path) => path,
            None => {
                warn!("no corpus file matches {}", text_pattern);
                return Err(Error::CorpusEmpty)
            }
        };
        info!("found {} files, reading {}", files.len(), source.display());
        let text = fs::read_to_string(source)?;

        let lines = Evaluation::run(&tokenizers, &text)?;
        let report = Evaluation::report(&text_name, &lines);

        fs::create_dir_all(&self.params.output_dir)?;
        let out = self.params.output_dir.join(format!("tokenized-{}-results.txt", text_name));
        fs::write(&out, report)?;
        info!("saved results of {} tokenizers to {}", lines.len(), out.display());
        Ok(out)
    }

    fn tokenize(tokenizer: &Tokenizer, corpus: &[String]) -> Vec<Vec<String>> {

        let mut failed = 0;
        let sentences: Vec<Vec<String>> = tokenizer.encode_batch(corpus).into_iter().enumerate()
        .filter_map(|(i, encoding)| match encoding {
            Ok(encoding) => Some(encoding.tokens),
            Err(e) => {
                warn!("sentence {} skipped: {}", i, e);
                failed += 1;
                None
            }
        }).collect();

        info!("tokenized {} sentences, {} failed", sentences.len(), failed);
        sentences
    }

    pub fn train_embeddings(&self) -> Result<EmbeddingModel> {

        let timer = Instant::now();

        // no tokenizer, nothing to train on
        let tokenizer = Tokenizer::from_file(&self.params.tokenizer_file)?;
        info!("loaded tokenizer with {} tokens", tokenizer.vocab_size());

        let corpus = self.corpus()?;
        let sentences = Pipeline::tokenize(&tokenizer, &corpus);
        if sentences.is_empty() {
            return Err(Error::CorpusEmpty);
        }

        let model = Train::run(&sentences, &self.params.json_train)?;

        let out_dir = &self.params.output_dir;
        files_handling::save_output(out_dir, TENSOR_FILE, &model.vectors)?;
        files_handling::save_output(out_dir, MAP_FILE, &model.t2i)?;
        let out = files_handling::save_output(out_dir, MODEL_FILE, &model)?;

        info!("saved embeddings to {}, took {} seconds", out.display(), timer.elapsed().as_secs());
        Ok(model)
    }

}
