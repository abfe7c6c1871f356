
use crate::config::JsonTrain;
use crate::error::{Error, Result};
use crate::shared::SharedMatrix;

use log::{debug, info};
use ndarray::prelude::*;
use ndarray::Array;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use ndarray_stats::QuantileExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::{prelude::*, ThreadPoolBuilder};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

// sigmoid input is clipped to this range
const MAX_EXP: f32 = 6.0;

// resolution of the negative sampling table
const CUM_TABLE_DOMAIN: u64 = (1 << 31) - 1;

/// Trained vectors and the token index, everything inference needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub vectors: Array2<f32>,
    pub t2i: HashMap<String, usize>,
    pub i2t: Vec<String>,
    pub counts: Vec<u64>,
    pub vector_size: usize
}

impl EmbeddingModel {

    pub fn len(&self) -> usize {
        self.i2t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i2t.is_empty()
    }

    pub fn vector(&self, token: &str) -> Option<ArrayView1<f32>> {
        self.t2i.get(token).map(|i| self.vectors.row(*i))
    }

    pub fn check_shape(&self) -> Result<()> {
        let n = self.i2t.len();
        if self.vectors.dim() != (n, self.vector_size) || self.t2i.len() != n || self.counts.len() != n {
            return Err(Error::InvalidConfig(format!(
                "embedding model is inconsistent: vectors {:?}, {} tokens, {} indexed, {} counts",
                self.vectors.dim(), n, self.t2i.len(), self.counts.len()
            )));
        }
        Ok(())
    }
}

/// The tokens that get a row, with what sampling needs to know about them.
struct TrainVocab {
    t2i: HashMap<String, usize>,
    i2t: Vec<String>,
    counts: Vec<u64>,
    keep_prob: Vec<f32>,
    cum_table: Vec<u64>
}

impl TrainVocab {

    fn build(sentences: &[Vec<String>], min_count: usize, sample: f32) -> Result<TrainVocab> {

        // count tokens, remembering the first time each one is seen
        let mut token2count: HashMap<&str, (u64, usize)> = HashMap::new();
        for tok in sentences.iter().flatten() {
            let next = token2count.len();
            let val = token2count.entry(tok.as_str()).or_insert((0, next));
            val.0 += 1;
        }

        // most frequent first, ties in order of appearance
        let mut tup = token2count
        .into_iter()
        .filter(|(_, (count, _))| *count >= min_count as u64)
        .collect::<Vec<(&str, (u64, usize))>>();
        tup.sort_by(|(_, (ca, fa)), (_, (cb, fb))| cb.cmp(ca).then(fa.cmp(fb)));

        if tup.is_empty() {
            return Err(Error::CorpusEmpty);
        }

        let i2t: Vec<String> = tup.iter().map(|(t, _)| t.to_string()).collect();
        let counts: Vec<u64> = tup.iter().map(|(_, (c, _))| *c).collect();
        let t2i: HashMap<String, usize> = i2t.iter().enumerate().map(|(i, t)| (t.to_owned(), i)).collect();

        let keep_prob = TrainVocab::keep_probabilities(&counts, sample);
        let cum_table = TrainVocab::cum_table(&counts);

        Ok(TrainVocab { t2i, i2t, counts, keep_prob, cum_table })
    }

    // probability of keeping a token as a target, frequent tokens are skipped more often
    fn keep_probabilities(counts: &[u64], sample: f32) -> Vec<f32> {

        if sample <= 0.0 {
            return vec![1.0; counts.len()];
        }
        let retain_total: u64 = counts.iter().sum();
        let threshold_count = sample as f64 * retain_total as f64;
        counts.iter().map(|c| {
            let c = *c as f64;
            let prob = ((c / threshold_count).sqrt() + 1.0) * (threshold_count / c);
            prob.min(1.0) as f32
        }).collect()
    }

    // cumulative unigram^0.75 distribution over [0, CUM_TABLE_DOMAIN]
    fn cum_table(counts: &[u64]) -> Vec<u64> {
        let powered: Vec<f64> = counts.iter().map(|c| (*c as f64).powf(0.75)).collect();
        let total: f64 = powered.iter().sum();
        let mut cumulative = 0.0;
        powered.iter().map(|p| {
            cumulative += p;
            ((cumulative / total) * CUM_TABLE_DOMAIN as f64).round() as u64
        }).collect()
    }

    fn draw_negative<R: Rng>(&self, rng: &mut R) -> usize {
        let last = *self.cum_table.last().unwrap_or(&1);
        let r = rng.gen_range(0..last.max(1));
        self.cum_table.partition_point(|c| *c <= r).min(self.cum_table.len() - 1)
    }

    fn len(&self) -> usize {
        self.i2t.len()
    }
}

struct EpochProgress {
    loss: f64,
    n_updates: usize
}

impl EpochProgress {
    fn new() -> Self {
        Self { loss: 0.0, n_updates: 0 }
    }

    fn merge(self, other: EpochProgress) -> EpochProgress {
        EpochProgress {
            loss: self.loss + other.loss,
            n_updates: self.n_updates + other.n_updates
        }
    }

    fn mean_loss(&self) -> f64 {
        if self.n_updates == 0 { 0.0 } else { self.loss / self.n_updates as f64 }
    }
}

// per-worker scratch vectors, allocated once per batch
struct Buffers {
    hidden: Array1<f32>,
    hidden_err: Array1<f32>,
    out_row: Array1<f32>
}

fn sigmoid(x: f32) -> f32 {
    let x = x.clamp(-MAX_EXP, MAX_EXP);
    1.0 / (1.0 + (-x).exp())
}

/// CBOW training with negative sampling over a shared input and output matrix.
pub struct Train {
    w_input: SharedMatrix,
    w_output: SharedMatrix,
    vocab: TrainVocab
}

impl Train {

    fn new(vocab: TrainVocab, vector_size: usize, seed: u64) -> Train {

        let mut rng = StdRng::seed_from_u64(seed);
        let vocab_size = vocab.len();
        let w_input: Array2<f32> = Array::random_using((vocab_size, vector_size), Uniform::new(-0.5, 0.5), &mut rng) / vector_size as f32;

        Self {
            w_input: SharedMatrix::from_array(&w_input),
            w_output: SharedMatrix::zeros(vocab_size, vector_size),
            vocab: vocab
        }
    }

    // rare tokens are removed before windowing, so context reaches over them
    fn index_sentences(&self, sentences: &[Vec<String>]) -> Vec<Vec<usize>> {
        sentences.iter()
        .map(|sentence| sentence.iter().filter_map(|tok| self.vocab.t2i.get(tok).copied()).collect::<Vec<usize>>())
        .filter(|sentence| sentence.len() > 1)
        .collect()
    }

    fn do_training_sentence<R: Rng>(&self,
        sentence: &[usize],
        train_params: &JsonTrain,
        learning_rate: f32,
        rng: &mut R,
        buffers: &mut Buffers,
        progress: &mut EpochProgress
    ) {

        let window = train_params.window;
        let n = sentence.len();

        for pos in 0..n {

            // down-sampling only skips the token as a target, it stays in its neighbours' context
            let target = sentence[pos];
            let keep = self.vocab.keep_prob[target];
            if keep < 1.0 && keep < rng.gen::<f32>() {
                continue
            }

            // context clipped at the sentence boundaries
            let start = pos.saturating_sub(window);
            let end = (pos + window + 1).min(n);
            let context_size = end - start - 1;
            if context_size == 0 {
                continue
            }

            buffers.hidden.fill(0.0);
            for c in (start..end).filter(|c| *c != pos) {
                self.w_input.add_row_into(sentence[c], &mut buffers.hidden);
            }
            buffers.hidden /= context_size as f32;
            buffers.hidden_err.fill(0.0);

            // the target with label 1, then `negative` draws with label 0
            for d in 0..=train_params.negative {
                let (word, label) = if d == 0 {
                    (target, 1.0)
                } else {
                    let word = self.vocab.draw_negative(rng);
                    if word == target { continue }
                    (word, 0.0)
                };

                let f = sigmoid(self.w_output.dot_row(word, &buffers.hidden));
                let g = (label - f) * learning_rate;
                progress.loss -= if label > 0.0 { (f as f64).ln() } else { (1.0 - f as f64).ln() };
                progress.n_updates += 1;

                self.w_output.read_row(word, &mut buffers.out_row);
                buffers.hidden_err.scaled_add(g, &buffers.out_row);
                self.w_output.scaled_add_to_row(word, g, &buffers.hidden);
            }

            // the hidden layer is a mean, but every context row takes the whole error
            for c in (start..end).filter(|c| *c != pos) {
                self.w_input.scaled_add_to_row(sentence[c], 1.0, &buffers.hidden_err);
            }
        }
    }

    fn train(&mut self, sentences: Vec<Vec<usize>>, train_params: &JsonTrain) -> Result<()> {

        let workers = train_params.workers;
        let vector_size = train_params.vector_size;
        let alpha = train_params.alpha;
        let min_alpha = train_params.min_alpha;

        // the learning rate decays linearly over every position of every epoch
        let words_per_epoch: usize = sentences.iter().map(|s| s.len()).sum();
        let total_words = (words_per_epoch * train_params.epochs).max(1);
        let processed = AtomicUsize::new(0);

        // each worker owns one contiguous batch of sentences per epoch
        let batch_size = ((sentences.len() + workers - 1) / workers).max(1);
        let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;

        for epoch in 0..train_params.epochs {

            let timer = Instant::now();
            let this = &*self;
            let progress = pool.install(|| {
                sentences.par_chunks(batch_size).enumerate().map(|(worker_i, batch)| {

                    let seed = train_params.seed
                    .wrapping_mul(1_000_003)
                    .wrapping_add((epoch * workers + worker_i) as u64 + 1);
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut buffers = Buffers {
                        hidden: Array1::zeros(vector_size),
                        hidden_err: Array1::zeros(vector_size),
                        out_row: Array1::zeros(vector_size)
                    };
                    let mut progress = EpochProgress::new();

                    for (k, sentence) in batch.iter().enumerate() {
                        let done = processed.load(Ordering::Relaxed) as f32 / total_words as f32;
                        let learning_rate = (alpha - (alpha - min_alpha) * done).max(min_alpha);
                        this.do_training_sentence(sentence, train_params, learning_rate, &mut rng, &mut buffers, &mut progress);
                        processed.fetch_add(sentence.len(), Ordering::Relaxed);

                        if train_params.progress_verbose && k % 100000 == 0 && k > 0 {
                            debug!("worker {} in epoch {}: {} / {} sentences, lr {}", worker_i, epoch, k, batch.len(), learning_rate);
                        }
                    }
                    progress
                })
                .reduce(EpochProgress::new, EpochProgress::merge)
            });

            info!("finished epoch {}, loss is {}, took: {} seconds...", epoch, progress.mean_loss(), timer.elapsed().as_secs());
        }

        Ok(())
    }

    pub fn run(sentences: &[Vec<String>], train_params: &JsonTrain) -> Result<EmbeddingModel> {

        let timer = Instant::now();
        let vocab = TrainVocab::build(sentences, train_params.min_count, train_params.sample)?;
        info!("{} tokens reach min_count {}, out of {} sentences", vocab.len(), train_params.min_count, sentences.len());

        let mut trainer = Train::new(vocab, train_params.vector_size, train_params.seed);
        let indexed = trainer.index_sentences(sentences);
        trainer.train(indexed, train_params)?;

        let Train { w_input, vocab, .. } = trainer;
        let vectors = w_input.into_array();
        if let (Ok(min), Ok(max)) = (vectors.min(), vectors.max()) {
            info!("trained vectors of shape {:?} in [{}, {}], took {} seconds", vectors.dim(), min, max, timer.elapsed().as_secs());
        }

        let model = EmbeddingModel {
            vectors: vectors,
            t2i: vocab.t2i,
            i2t: vocab.i2t,
            counts: vocab.counts,
            vector_size: train_params.vector_size
        };
        model.check_shape()?;
        Ok(model)
    }

}
