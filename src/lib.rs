
pub mod error;
pub mod pretokenizer;
pub mod vocab;
pub mod config;
pub mod corpus;
pub mod bpe_trainer;
pub mod tokenizer;
pub mod shared;
pub mod train;
pub mod similarity;
pub mod evaluate;
pub mod pipeline;

pub use error::{Error, Result};
pub use config::{files_handling, Config};
pub use bpe_trainer::BpeTrainer;
pub use tokenizer::{Encoding, Tokenizer};
pub use train::{EmbeddingModel, Train};
pub use similarity::{BoundaryMarkers, Query, Similarity};
pub use pipeline::Pipeline;
