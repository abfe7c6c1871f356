
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {

    // stage-fatal: nothing to learn from
    #[error("corpus is empty, no symbols to train on")]
    CorpusEmpty,

    #[error("tokenizer file not found: {0}")]
    VocabularyFileMissing(PathBuf),

    #[error("embedding file not found: {0}")]
    EmbeddingFileMissing(PathBuf),

    // per-item, the caller logs and skips
    #[error("could not encode item {index}: {reason}")]
    EncodingFailure { index: usize, reason: String },

    #[error("word '{word}' has no subword with a vector (subwords: {tokens:?})")]
    NoRepresentableVector { word: String, tokens: Vec<String> },

    #[error("query token '{0}' is not in the embedding vocabulary")]
    AnalogyTokenMissing(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("could not read npy file: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("could not write npy file: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
