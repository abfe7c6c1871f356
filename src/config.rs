
use crate::error::{Error, Result};
use serde_json::Value;
use std::{fs::File, fmt::Display, io::BufReader, path::{Path, PathBuf}};


#[derive(Clone, Debug)]
pub struct JsonTokenizer {
    pub vocab_size: usize,
    pub min_frequency: usize,
    pub special_tokens: Vec<String>,
    pub unk_token: Option<String>,
    pub progress_verbose: bool
}

impl Default for JsonTokenizer {
    fn default() -> Self {
        Self {
            vocab_size: 32000,
            min_frequency: 2,
            special_tokens: ["[UNK]", "[CLS]", "[SEP]", "[PAD]", "[MASK]"].map(|t| t.to_string()).to_vec(),
            unk_token: Some("[UNK]".to_string()),
            progress_verbose: false
        }
    }
}

impl Display for JsonTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tokenizer hyper parameters:
        vocab_size: {},
        min_frequency: {},
        special_tokens: {:?},
        unk_token: {:?}",
        self.vocab_size, self.min_frequency, self.special_tokens, self.unk_token
        )
    }
}

#[derive(Clone, Debug)]
pub struct JsonTrain {
    pub vector_size: usize,
    pub window: usize,
    pub min_count: usize,
    pub workers: usize,
    pub epochs: usize,
    pub sample: f32,
    pub negative: usize,
    pub alpha: f32,
    pub min_alpha: f32,
    pub seed: u64,
    pub progress_verbose: bool
}

impl Default for JsonTrain {
    fn default() -> Self {
        Self {
            vector_size: 40,
            window: 8,
            min_count: 2,
            workers: 10,
            epochs: 40,
            sample: 1e-2,
            negative: 5,
            alpha: 0.025,
            min_alpha: 0.0001,
            seed: 1,
            progress_verbose: false
        }
    }
}

impl Display for JsonTrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "training hyper parameters:
        vector_size: {},
        window: {},
        min_count: {},
        workers: {},
        epochs: {},
        sample: {},
        negative: {},
        alpha: {},
        min_alpha: {},
        seed: {}",
        self.vector_size, self.window, self.min_count, self.workers, self.epochs,
        self.sample, self.negative, self.alpha, self.min_alpha, self.seed
        )
    }
}

#[derive(Clone, Debug)]
pub struct JsonInference {
    pub boundary_tokens: Vec<String>,
    pub topn: usize
}

impl Default for JsonInference {
    fn default() -> Self {
        Self {
            boundary_tokens: vec!["[CLS]".to_string(), "[SEP]".to_string()],
            topn: 10
        }
    }
}

#[derive(Clone, Debug)]
pub struct JsonTypes {
    pub corpus_dir: PathBuf,
    pub corpus_pattern: String,
    pub output_dir: PathBuf,
    pub tokenizer_file: PathBuf,
    pub json_tokenizer: JsonTokenizer,
    pub json_train: JsonTrain,
    pub json_inference: JsonInference
}

impl Display for JsonTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        corpus_dir: {}
        corpus_pattern: {}
        output_dir: {}
        tokenizer_file: {}
        Using {}
        Using {}",
        self.corpus_dir.display(), self.corpus_pattern, self.output_dir.display(),
        self.tokenizer_file.display(), self.json_tokenizer, self.json_train)
    }
}

pub struct Config {
    params: JsonTypes
}

// typed lookups with a default for absent keys, a present key of the wrong type is an error
fn get_usize(json: &Value, key: &str, default: usize) -> Result<usize> {
    match json.get(key) {
        Some(v) => v.as_u64().map(|v| v as usize).ok_or_else(|| Error::InvalidConfig(format!("{} is not a non-negative integer", key))),
        None => Ok(default)
    }
}

fn get_f32(json: &Value, key: &str, default: f32) -> Result<f32> {
    match json.get(key) {
        Some(v) => v.as_f64().map(|v| v as f32).ok_or_else(|| Error::InvalidConfig(format!("{} is not numeric", key))),
        None => Ok(default)
    }
}

fn get_bool(json: &Value, key: &str, default: bool) -> Result<bool> {
    match json.get(key) {
        Some(v) => v.as_bool().ok_or_else(|| Error::InvalidConfig(format!("{} is not boolean", key))),
        None => Ok(default)
    }
}

fn get_string(json: &Value, key: &str, default: &str) -> Result<String> {
    match json.get(key) {
        Some(v) => v.as_str().map(|s| s.to_owned()).ok_or_else(|| Error::InvalidConfig(format!("{} is not a string", key))),
        None => Ok(default.to_owned())
    }
}

fn get_strings(json: &Value, key: &str, default: &[String]) -> Result<Vec<String>> {
    match json.get(key) {
        Some(Value::Array(items)) => items.iter().map(|item| {
            item.as_str().map(|s| s.to_owned()).ok_or_else(|| Error::InvalidConfig(format!("{} should only hold strings", key)))
        }).collect(),
        Some(_) => Err(Error::InvalidConfig(format!("{} is not a list", key))),
        None => Ok(default.to_vec())
    }
}

impl Config {

    pub fn get_params(&self) -> JsonTypes {
        return self.params.clone()
    }

    pub fn new(config_file: &Path) -> Result<Config> {

        // parse input json
        let f = BufReader::new(File::open(config_file)?);
        let json: Value = serde_json::from_reader(f)?;
        Config::from_value(&json)
    }

    pub fn from_value(json: &Value) -> Result<Config> {

        let corpus_dir = get_string(json, "corpus_dir", "corpora")?;
        let corpus_pattern = get_string(json, "corpus_pattern", "*.txt")?;
        let output_dir = get_string(json, "output_dir", "output")?;
        let tokenizer_file = get_string(json, "tokenizer_file", "tokenizers/all-tokenizer")?;

        // each stage reads its own section, a missing section means all defaults
        let empty = Value::Object(Default::default());
        let tok = json.get("tokenizer").unwrap_or(&empty);
        let emb = json.get("embedding").unwrap_or(&empty);
        let inf = json.get("inference").unwrap_or(&empty);

        let d_tok = JsonTokenizer::default();
        let unk_token = match tok.get("unk_token") {
            Some(Value::Null) => None,
            Some(_) => Some(get_string(tok, "unk_token", "")?),
            None => d_tok.unk_token.clone()
        };
        let json_tokenizer = JsonTokenizer {
            vocab_size: get_usize(tok, "vocab_size", d_tok.vocab_size)?,
            min_frequency: get_usize(tok, "min_frequency", d_tok.min_frequency)?,
            special_tokens: get_strings(tok, "special_tokens", &d_tok.special_tokens)?,
            unk_token: unk_token,
            progress_verbose: get_bool(tok, "progress_verbose", d_tok.progress_verbose)?
        };

        let d_train = JsonTrain::default();
        let json_train = JsonTrain {
            vector_size: get_usize(emb, "vector_size", d_train.vector_size)?,
            window: get_usize(emb, "window", d_train.window)?,
            min_count: get_usize(emb, "min_count", d_train.min_count)?,
            workers: get_usize(emb, "workers", d_train.workers)?,
            epochs: get_usize(emb, "epochs", d_train.epochs)?,
            sample: get_f32(emb, "sample", d_train.sample)?,
            negative: get_usize(emb, "negative", d_train.negative)?,
            alpha: get_f32(emb, "alpha", d_train.alpha)?,
            min_alpha: get_f32(emb, "min_alpha", d_train.min_alpha)?,
            seed: get_usize(emb, "seed", d_train.seed as usize)? as u64,
            progress_verbose: get_bool(emb, "progress_verbose", d_train.progress_verbose)?
        };

        let d_inf = JsonInference::default();
        let json_inference = JsonInference {
            boundary_tokens: get_strings(inf, "boundary_tokens", &d_inf.boundary_tokens)?,
            topn: get_usize(inf, "topn", d_inf.topn)?
        };

        let params = JsonTypes {
            corpus_dir: PathBuf::from(corpus_dir),
            corpus_pattern: corpus_pattern,
            output_dir: PathBuf::from(output_dir),
            tokenizer_file: PathBuf::from(tokenizer_file),
            json_tokenizer: json_tokenizer,
            json_train: json_train,
            json_inference: json_inference
        };

        validate(&params)?;

        Ok (
            Self {
                params: params
            }
        )
    }

}

fn validate(params: &JsonTypes) -> Result<()> {

    let tok = &params.json_tokenizer;
    let specials = tok.special_tokens.len() + match &tok.unk_token {
        Some(unk) if !tok.special_tokens.contains(unk) => 1,
        _ => 0
    };
    if tok.vocab_size <= specials {
        return Err(Error::InvalidConfig(format!("vocab_size {} leaves no room next to {} special tokens", tok.vocab_size, specials)));
    }

    let train = &params.json_train;
    if train.vector_size == 0 || train.window == 0 || train.workers == 0 || train.epochs == 0 {
        return Err(Error::InvalidConfig("vector_size, window, workers and epochs must be positive".into()));
    }
    if train.min_count == 0 {
        return Err(Error::InvalidConfig("min_count must be at least 1".into()));
    }
    if train.sample < 0.0 || train.alpha <= 0.0 || train.min_alpha < 0.0 || train.min_alpha > train.alpha {
        return Err(Error::InvalidConfig(format!("bad rates: sample {}, alpha {}, min_alpha {}", train.sample, train.alpha, train.min_alpha)));
    }
    Ok(())
}


pub mod files_handling {

    use crate::error::{Error, Result};
    use crate::train::EmbeddingModel;
    use crate::vocab::TokenizerModel;
    use ndarray::Array2;
    use ndarray_npy::{read_npy, write_npy};
    use flate2::{Compression, read::GzDecoder, write::GzEncoder};
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::{self, BufReader, BufWriter, Write};
    use std::path::{Path, PathBuf};

    // paths are handled without extension, every item type appends its own
    fn with_extension(file_path: &Path, extension: &str) -> PathBuf {
        let mut name = file_path.as_os_str().to_owned();
        name.push(extension);
        PathBuf::from(name)
    }

    pub fn read_input<R: ReadFile>(file_path: &Path) -> Result<R> {
        R::read_file(file_path)
    }

    pub fn save_output<S: SaveFile>(output_dir: &Path, file_name: &str, item: &S) -> Result<PathBuf> {

        // create output folder
        fs::create_dir_all(output_dir)?;

        let out = item.save_file(&output_dir.join(file_name))?;
        log::debug!("saved {}", out.display());
        Ok(out)
    }

    pub trait ReadFile: Sized {
        fn read_file(file_path: &Path) -> Result<Self>;
    }

    pub trait SaveFile {
        fn save_file(&self, file_path: &Path) -> Result<PathBuf>;
    }

    impl ReadFile for TokenizerModel {
        fn read_file(file_path: &Path) -> Result<Self> {
            let in_file = with_extension(file_path, ".json");
            let f = match File::open(&in_file) {
                Ok(f) => BufReader::new(f),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::VocabularyFileMissing(in_file)),
                Err(e) => return Err(e.into())
            };
            let item = serde_json::from_reader(f)?;
            Ok(item)
        }
    }

    impl SaveFile for TokenizerModel {
        fn save_file(&self, file_path: &Path) -> Result<PathBuf> {
            let out = with_extension(file_path, ".json");
            let mut f = BufWriter::new(File::create(&out)?);
            serde_json::to_writer_pretty(&mut f, self)?;
            f.flush()?;
            Ok(out)
        }
    }

    impl ReadFile for Array2<f32> {
        fn read_file(file_path: &Path) -> Result<Self> {
            let in_file = with_extension(file_path, ".npy");
            if !in_file.exists() {
                return Err(Error::EmbeddingFileMissing(in_file));
            }
            let item = read_npy(in_file)?;
            Ok(item)
        }
    }

    impl SaveFile for Array2<f32> {
        fn save_file(&self, file_path: &Path) -> Result<PathBuf> {
            let out = with_extension(file_path, ".npy");
            write_npy(&out, self)?;
            Ok(out)
        }
    }

    impl ReadFile for HashMap<String, usize> {
        fn read_file(file_path: &Path) -> Result<Self> {
            let in_file = with_extension(file_path, ".json");
            let f = match File::open(&in_file) {
                Ok(f) => BufReader::new(f),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::EmbeddingFileMissing(in_file)),
                Err(e) => return Err(e.into())
            };
            let item = serde_json::from_reader(f)?;
            Ok(item)
        }
    }

    impl SaveFile for HashMap<String, usize> {
        fn save_file(&self, file_path: &Path) -> Result<PathBuf> {
            let out = with_extension(file_path, ".json");

            // rows in ascending order make the file readable
            let mut rows: Vec<(&String, &usize)> = self.iter().collect();
            rows.sort_by_key(|(_, i)| **i);
            let ordered: serde_json::Map<String, serde_json::Value> = rows.into_iter()
            .map(|(t, i)| (t.to_owned(), serde_json::Value::from(*i)))
            .collect();

            let mut f = BufWriter::new(File::create(&out)?);
            serde_json::to_writer_pretty(&mut f, &ordered)?;
            f.flush()?;
            Ok(out)
        }
    }

    // the full model, gzip compressed bincode
    impl ReadFile for EmbeddingModel {
        fn read_file(file_path: &Path) -> Result<Self> {
            let in_file = with_extension(file_path, ".bin.gz");
            let f = match File::open(&in_file) {
                Ok(f) => BufReader::new(f),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::EmbeddingFileMissing(in_file)),
                Err(e) => return Err(e.into())
            };
            let reader = GzDecoder::new(f);
            let item: EmbeddingModel = bincode::deserialize_from(reader)?;
            item.check_shape()?;
            Ok(item)
        }
    }

    impl SaveFile for EmbeddingModel {
        fn save_file(&self, file_path: &Path) -> Result<PathBuf> {
            let out = with_extension(file_path, ".bin.gz");
            let f = BufWriter::new(File::create(&out)?);
            let mut writer = GzEncoder::new(f, Compression::default());
            bincode::serialize_into(&mut writer, self)?;
            writer.finish()?.flush()?;
            Ok(out)
        }
    }

}
