
use crate::config::files_handling;
use crate::error::{Error, Result};
use crate::tokenizer::Tokenizer;
use crate::train::EmbeddingModel;

use log::warn;
use ndarray::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Ids of the tokens stripped from both ends of a word before its subword vectors are
/// averaged. Resolved once against the tokenizer vocabulary.
#[derive(Clone, Debug, Default)]
pub struct BoundaryMarkers {
    ids: HashSet<u32>
}

impl BoundaryMarkers {

    pub fn none() -> BoundaryMarkers {
        Self::default()
    }

    pub fn resolve(tokenizer: &Tokenizer, tokens: &[String]) -> BoundaryMarkers {
        let mut ids = HashSet::new();
        for token in tokens {
            match tokenizer.token_to_id(token) {
                Some(id) => { ids.insert(id); },
                None => warn!("boundary token {} is not in the tokenizer vocabulary, ignored", token)
            }
        }
        Self { ids }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }
}

pub enum Query<'a> {
    Vector(Array1<f32>),
    Tokens { positive: &'a [&'a str], negative: &'a [&'a str] }
}

/// A composed word vector and the subwords it was averaged from.
#[derive(Clone, Debug)]
pub struct WordVector {
    pub vector: Array1<f32>,
    pub tokens: Vec<String>
}

fn unit(v: &Array1<f32>) -> Array1<f32> {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 { v / norm } else { v.clone() }
}

pub struct Similarity {
    vectors: Array2<f32>,
    w: Array2<f32>,
    t2i: HashMap<String, usize>,
    i2t: Vec<String>
}

impl Similarity {

    pub fn new(model: EmbeddingModel) -> Similarity {

        // keep a copy where each row has l2 norm 1, cosine is then a dot product
        let mut w = model.vectors.clone();
        for mut row in w.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|a| a / norm);
            }
        }

        Self {
            vectors: model.vectors,
            w: w,
            t2i: model.t2i,
            i2t: model.i2t
        }
    }

    pub fn read(model_path: &Path) -> Result<Similarity> {
        let model = files_handling::read_input::<EmbeddingModel>(model_path)?;
        Ok(Similarity::new(model))
    }

    pub fn len(&self) -> usize {
        self.i2t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i2t.is_empty()
    }

    pub fn extract_vec_from_word(&self, token: &str) -> Result<Array1<f32>> {
        match self.t2i.get(token) {
            Some(i) => Ok(self.vectors.row(*i).to_owned()),
            None => Err(Error::AnalogyTokenMissing(token.to_owned()))
        }
    }

    /// Mean of the vectors of the subwords of `word` that have one, boundary markers
    /// at either end left out.
    pub fn word_vector(&self, word: &str, tokenizer: &Tokenizer, markers: &BoundaryMarkers) -> Result<WordVector> {

        let encoding = tokenizer.encode(word)?;
        let ids = &encoding.ids;
        let mut start = 0;
        let mut end = ids.len();
        while start < end && markers.contains(ids[start]) {
            start += 1;
        }
        while end > start && markers.contains(ids[end - 1]) {
            end -= 1;
        }
        let tokens: Vec<String> = encoding.tokens[start..end].to_vec();

        let rows: Vec<usize> = tokens.iter().filter_map(|t| self.t2i.get(t).copied()).collect();
        if rows.is_empty() {
            return Err(Error::NoRepresentableVector { word: word.to_owned(), tokens: tokens });
        }

        let mut vector: Array1<f32> = Array1::zeros(self.vectors.dim().1);
        for i in &rows {
            vector += &self.vectors.row(*i);
        }
        vector /= rows.len() as f32;

        Ok(WordVector { vector, tokens })
    }

    // cosine against every row, best first, ties by row
    fn rank(&self, query: &Array1<f32>, exclude: &HashSet<usize>, k: usize) -> Vec<(String, f32)> {

        let scores = self.w.dot(&unit(query));
        let mut indexed_scores: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        indexed_scores.sort_by(|(i, s), (j, t)| t.total_cmp(s).then(i.cmp(j)));

        indexed_scores.into_iter()
        .filter(|(i, _)| !exclude.contains(i))
        .take(k)
        .map(|(i, score)| (self.i2t[i].to_owned(), score))
        .collect()
    }

    pub fn find_k_most_similar(&self, vec: &Array1<f32>, k: usize) -> Vec<(String, f32)> {
        self.rank(vec, &HashSet::new(), k)
    }

    /// Top `k` rows by cosine similarity. For a token query the query is the mean of the
    /// unit vectors of `positive` minus those of `negative`, and the query tokens
    /// themselves are left out of the result.
    pub fn most_similar(&self, query: &Query, k: usize) -> Result<Vec<(String, f32)>> {

        match query {
            Query::Vector(v) => Ok(self.find_k_most_similar(v, k)),
            Query::Tokens { positive, negative } => {

                let mut exclude: HashSet<usize> = HashSet::new();
                let mut combined: Array1<f32> = Array1::zeros(self.w.dim().1);
                let weighted = positive.iter().map(|t| (t, 1.0f32)).chain(negative.iter().map(|t| (t, -1.0f32)));
                let mut n = 0;
                for (token, weight) in weighted {
                    let i = *self.t2i.get(*token).ok_or_else(|| Error::AnalogyTokenMissing(token.to_string()))?;
                    combined.scaled_add(weight, &self.w.row(i));
                    exclude.insert(i);
                    n += 1;
                }
                if n > 0 {
                    combined /= n as f32;
                }
                Ok(self.rank(&combined, &exclude, k))
            }
        }
    }

    // a is to b as c is to ?, translates to b - a + c
    pub fn extract_analogies(&self, inputs: [&str; 3], k: usize) -> Result<Vec<(String, f32)>> {
        let positive = [inputs[1], inputs[2]];
        let negative = [inputs[0]];
        self.most_similar(&Query::Tokens { positive: &positive, negative: &negative }, k)
    }

}


#[cfg(test)]
mod tests {

    use super::{BoundaryMarkers, Query, Similarity};
    use crate::bpe_trainer::BpeTrainer;
    use crate::config::{JsonTokenizer, JsonTrain};
    use crate::error::Error;
    use crate::tokenizer::Tokenizer;
    use crate::train::{EmbeddingModel, Train};
    use ndarray::{array, Array2};
    use std::collections::HashSet;

    fn model(tokens: &[&str], vectors: Array2<f32>) -> EmbeddingModel {
        EmbeddingModel {
            vector_size: vectors.dim().1,
            vectors: vectors,
            t2i: tokens.iter().enumerate().map(|(i, t)| (t.to_string(), i)).collect(),
            i2t: tokens.iter().map(|t| t.to_string()).collect(),
            counts: vec![1; tokens.len()]
        }
    }

    fn tokenizer(corpus: &[&str], vocab_size: usize) -> Tokenizer {
        let config = JsonTokenizer {
            vocab_size: vocab_size,
            min_frequency: 1,
            special_tokens: vec!["[UNK]".to_string(), "[CLS]".to_string(), "[SEP]".to_string()],
            unk_token: Some("[UNK]".to_string()),
            progress_verbose: false
        };
        Tokenizer::new(BpeTrainer::new(config).train(corpus).unwrap())
    }

    #[test]
    fn composition_identity_test() {
        // with every merge learned, "ab" is a single token
        let tok = tokenizer(&["ab ab c"], 20);
        assert_eq!(tok.encode("ab").unwrap().tokens, vec!["ab"]);

        let sim = Similarity::new(model(&["ab", "c"], array![[0.3, -1.7, 2.5], [1.0, 0.0, 0.0]]));
        let wv = sim.word_vector("ab", &tok, &BoundaryMarkers::none()).unwrap();
        assert_eq!(wv.vector, array![0.3, -1.7, 2.5]);
        assert_eq!(wv.tokens, vec!["ab"]);
    }

    #[test]
    fn mean_of_found_subwords_test() {
        // "abz" gives ab and [UNK], the unknown token has no row and is left out
        let tok = tokenizer(&["ab ab c"], 20);
        let sim = Similarity::new(model(&["ab", "c"], array![[2.0, 0.0], [0.0, 4.0]]));
        let wv = sim.word_vector("abz", &tok, &BoundaryMarkers::none()).unwrap();
        assert_eq!(wv.vector, array![2.0, 0.0]);

        let wv = sim.word_vector("cab", &tok, &BoundaryMarkers::none()).unwrap();
        assert_eq!(wv.tokens, vec!["c", "ab"]);
        assert_eq!(wv.vector, array![1.0, 2.0]);
    }

    #[test]
    fn boundary_markers_stripped_test() {
        let tok = tokenizer(&["ab ab c"], 20);
        let sim = Similarity::new(model(&["[CLS]", "ab", "[SEP]"], array![[10.0, 10.0], [1.0, 3.0], [-10.0, 5.0]]));

        let with_markers = sim.word_vector("[CLS] ab [SEP]", &tok, &BoundaryMarkers::none()).unwrap();
        assert_eq!(with_markers.tokens, vec!["[CLS]", "ab", "[SEP]"]);

        let markers = BoundaryMarkers::resolve(&tok, &["[CLS]".to_string(), "[SEP]".to_string(), "<s>".to_string()]);
        let stripped = sim.word_vector("[CLS] ab [SEP]", &tok, &markers).unwrap();
        assert_eq!(stripped.tokens, vec!["ab"]);
        assert_eq!(stripped.vector, array![1.0, 3.0]);
    }

    #[test]
    fn no_representable_vector_test() {
        let tok = tokenizer(&["ab ab c"], 20);
        let sim = Similarity::new(model(&["ab"], array![[1.0, 1.0]]));
        let res = sim.word_vector("zzz", &tok, &BoundaryMarkers::none());
        assert!(matches!(res, Err(Error::NoRepresentableVector { .. })));

        // only markers left after stripping
        let markers = BoundaryMarkers::resolve(&tok, &["[CLS]".to_string()]);
        let res = sim.word_vector("[CLS]", &tok, &markers);
        assert!(matches!(res, Err(Error::NoRepresentableVector { .. })));
    }

    #[test]
    fn similarity_ordering_test() {
        let tokens = ["a", "b", "c", "d", "e"];
        let sim = Similarity::new(model(&tokens, array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [-1.0, 0.0], [2.0, 0.0]]));

        let res = sim.find_k_most_similar(&array![1.0, 0.0], 5);
        assert_eq!(res.len(), 5);
        // a and e point the same way, the tie goes to the lower row
        assert_eq!(res[0].0, "a");
        assert_eq!(res[1].0, "e");
        assert_eq!(res[4].0, "d");
        for pair in res.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        let unique: HashSet<&String> = res.iter().map(|(t, _)| t).collect();
        assert_eq!(unique.len(), res.len());

        // token queries leave the query out
        let res = sim.most_similar(&Query::Tokens { positive: &["a"], negative: &[] }, 10).unwrap();
        assert_eq!(res.len(), 4);
        assert!(res.iter().all(|(t, _)| t != "a"));
        assert_eq!(res[0].0, "e");
        assert!((res[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn analogy_test() {
        let tokens = ["king", "man", "woman", "queen", "apple"];
        let sim = Similarity::new(model(&tokens, array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [0.1, 1.0], [1.0, -1.0]]));

        // man is to king as woman is to ?
        let res = sim.extract_analogies(["man", "king", "woman"], 2).unwrap();
        assert_eq!(res[0].0, "queen");
        assert!(res.iter().all(|(t, _)| !["man", "king", "woman"].contains(&t.as_str())));

        let missing = sim.extract_analogies(["man", "king", "pear"], 2);
        assert!(matches!(missing, Err(Error::AnalogyTokenMissing(ref t)) if t == "pear"));
    }

    #[test]
    fn trained_word_vector_test() {
        let corpus = [
            "wojsko ruszyło na wschód",
            "szlachta i wojsko stały pod miastem",
            "król zwołał wojsko i szlachta przybyła",
            "choroba dotknęła króla a wojsko czekało",
        ];
        let tok = tokenizer(&corpus, 80);
        let sentences: Vec<Vec<String>> = tok.encode_batch(&corpus)
        .into_iter()
        .map(|e| e.unwrap().tokens)
        .collect();
        let params = JsonTrain {
            vector_size: 16,
            window: 3,
            min_count: 1,
            workers: 2,
            epochs: 3,
            sample: 0.0,
            negative: 2,
            alpha: 0.025,
            min_alpha: 0.0001,
            seed: 3,
            progress_verbose: false
        };
        let sim = Similarity::new(Train::run(&sentences, &params).unwrap());

        let wv = sim.word_vector("wojsko", &tok, &BoundaryMarkers::none()).unwrap();
        assert_eq!(wv.vector.len(), 16);
        assert!(wv.vector.iter().all(|x| x.is_finite()));

        // none of these chars were seen, every subword is the unknown token
        let res = sim.word_vector("ŋŋŋ", &tok, &BoundaryMarkers::none());
        assert!(matches!(res, Err(Error::NoRepresentableVector { .. })));

        let similar = sim.find_k_most_similar(&wv.vector, 5);
        assert_eq!(similar.len(), 5);
        for pair in similar.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

}
