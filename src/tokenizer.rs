
use crate::config::files_handling;
use crate::error::{Error, Result};
use crate::pretokenizer::{PreTokenize, Whitespace};
use crate::vocab::TokenizerModel;

use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;

/// Output of encoding one string. `words[i]` is the index of the whitespace word
/// `tokens[i]` came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Encoding {
    pub tokens: Vec<String>,
    pub ids: Vec<u32>,
    pub words: Vec<usize>
}

impl Encoding {

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Token surface forms of word `word` joined back together.
    pub fn word_surface(&self, word: usize) -> String {
        self.tokens.iter()
        .zip(&self.words)
        .filter(|(_, w)| **w == word)
        .map(|(t, _)| t.as_str())
        .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Symbol {
    Known(u32),
    Unknown(char)
}

pub struct Tokenizer {
    model: TokenizerModel,
    // (left id, right id) -> (rank of the merge, id of the merged symbol)
    ranks: HashMap<(u32, u32), (usize, u32)>,
    unk_id: Option<u32>
}

impl Tokenizer {

    pub fn new(model: TokenizerModel) -> Tokenizer {

        let mut ranks: HashMap<(u32, u32), (usize, u32)> = HashMap::new();
        for (rank, rule) in model.merges.iter().enumerate() {
            let ids = (model.vocab.get(&rule.0), model.vocab.get(&rule.1), model.vocab.get(&rule.merged()));
            if let (Some(left), Some(right), Some(merged)) = ids {
                // a pair is only ever learned once, keep the first rank to be safe
                ranks.entry((left, right)).or_insert((rank, merged));
            }
        }

        let unk_id = model.unk_id();
        Self {
            model: model,
            ranks: ranks,
            unk_id: unk_id
        }
    }

    pub fn from_file(file_path: &Path) -> Result<Tokenizer> {
        let model = files_handling::read_input::<TokenizerModel>(file_path)?;
        Ok(Tokenizer::new(model))
    }

    pub fn model(&self) -> &TokenizerModel {
        &self.model
    }

    pub fn vocab_size(&self) -> usize {
        self.model.vocab.len()
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.model.vocab.get(token)
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.model.vocab.token(id)
    }

    // merging the lowest ranked pair until none is left gives the same result as
    // running through the rules in learned order, since a rule can only use symbols
    // made by earlier rules
    fn merge_word(&self, word: &str) -> Vec<Symbol> {

        let mut symbols: Vec<Symbol> = Whitespace::symbols(word)
        .iter()
        .zip(word.chars())
        .map(|(s, c)| match self.model.vocab.get(s) {
            Some(id) => Symbol::Known(id),
            None => Symbol::Unknown(c)
        })
        .collect();

        loop {
            let mut best: Option<(usize, (u32, u32), u32)> = None;
            for window in symbols.windows(2) {
                if let (Symbol::Known(l), Symbol::Known(r)) = (window[0], window[1]) {
                    if let Some((rank, merged)) = self.ranks.get(&(l, r)) {
                        if best.map_or(true, |(best_rank, _, _)| *rank < best_rank) {
                            best = Some((*rank, (l, r), *merged));
                        }
                    }
                }
            }

            let (_, (left, right), merged) = match best {
                Some(best) => best,
                None => break
            };

            let mut i = 0;
            let mut new_symbols = Vec::with_capacity(symbols.len());
            while i < symbols.len() {
                if i + 1 < symbols.len() && symbols[i] == Symbol::Known(left) && symbols[i + 1] == Symbol::Known(right) {
                    new_symbols.push(Symbol::Known(merged));
                    i += 2;
                } else {
                    new_symbols.push(symbols[i]);
                    i += 1;
                }
            }
            symbols = new_symbols;
        }
        symbols
    }

    fn encode_item(&self, index: usize, text: &str) -> Result<Encoding> {

        let mut encoding = Encoding { tokens: Vec::new(), ids: Vec::new(), words: Vec::new() };
        for (w, word) in Whitespace::words(text).into_iter().enumerate() {

            // special tokens written out in the text stay whole
            if self.model.is_special(word) {
                if let Some(id) = self.model.vocab.get(word) {
                    encoding.tokens.push(word.to_owned());
                    encoding.ids.push(id);
                    encoding.words.push(w);
                    continue
                }
            }

            for symbol in self.merge_word(word) {
                let (token, id) = match (symbol, self.unk_id, &self.model.unk_token) {
                    (Symbol::Known(id), _, _) => (self.model.vocab.token(id).unwrap_or_default().to_owned(), id),
                    (Symbol::Unknown(_), Some(unk_id), Some(unk)) => (unk.to_owned(), unk_id),
                    (Symbol::Unknown(c), _, _) => {
                        return Err(Error::EncodingFailure {
                            index: index,
                            reason: format!("symbol '{}' is not in the vocabulary and there is no unknown token", c)
                        })
                    }
                };
                encoding.tokens.push(token);
                encoding.ids.push(id);
                encoding.words.push(w);
            }
        }
        Ok(encoding)
    }

    pub fn encode(&self, text: &str) -> Result<Encoding> {
        self.encode_item(0, text)
    }

    /// Encodes every text independently and in parallel, the output keeps the input order.
    pub fn encode_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Vec<Result<Encoding>> {
        texts.par_iter()
        .enumerate()
        .map(|(i, text)| self.encode_item(i, text.as_ref()))
        .collect()
    }

}


#[cfg(test)]
mod tests {

    use super::Tokenizer;
    use crate::bpe_trainer::BpeTrainer;
    use crate::config::JsonTokenizer;
    use crate::error::Error;
    use crate::pretokenizer::{PreTokenize, Whitespace};
    use crate::vocab::TokenizerModel;

    fn train(corpus: &[&str], vocab_size: usize, unk_token: Option<&str>) -> TokenizerModel {
        let config = JsonTokenizer {
            vocab_size: vocab_size,
            min_frequency: 1,
            special_tokens: vec!["[UNK]".to_string(), "[CLS]".to_string(), "[SEP]".to_string()],
            unk_token: unk_token.map(|t| t.to_string()),
            progress_verbose: false
        };
        BpeTrainer::new(config).train(corpus).unwrap()
    }

    // applies every rule in learned order, each until it no longer matches
    fn apply_rules_in_order(model: &TokenizerModel, word: &str) -> Vec<String> {
        let mut symbols = Whitespace::symbols(word);
        for rule in &model.merges {
            let mut i = 0;
            let mut new_symbols = Vec::new();
            while i < symbols.len() {
                if i + 1 < symbols.len() && symbols[i] == rule.0 && symbols[i + 1] == rule.1 {
                    new_symbols.push(rule.merged());
                    i += 2;
                } else {
                    new_symbols.push(symbols[i].clone());
                    i += 1;
                }
            }
            symbols = new_symbols;
        }
        symbols
    }

    #[test]
    fn golden_encode_test() {
        // merges: (a,a) (aa,a) (aaa,b) (aaab,d) (aaabd,aaab), specials take ids 0..3
        let tokenizer = Tokenizer::new(train(&["aaabdaaabac"], 12, Some("[UNK]")));
        let encoding = tokenizer.encode("aaabdaaabac").unwrap();
        assert_eq!(encoding.tokens, vec!["aaabdaaab", "a", "c"]);
        assert_eq!(encoding.ids, vec![11, 3, 5]);
        assert_eq!(encoding.words, vec![0, 0, 0]);
    }

    #[test]
    fn unknown_symbols_test() {
        let tokenizer = Tokenizer::new(train(&["aaabdaaabac"], 12, Some("[UNK]")));
        let encoding = tokenizer.encode("aaz [CLS] a").unwrap();
        assert_eq!(encoding.tokens, vec!["aa", "[UNK]", "[CLS]", "a"]);
        assert_eq!(encoding.ids, vec![tokenizer.token_to_id("aa").unwrap(), 0, 1, 3]);
        assert_eq!(encoding.words, vec![0, 0, 1, 2]);

        // without an unknown token there is nothing to map z to
        let tokenizer = Tokenizer::new(train(&["aaabdaaabac"], 12, None));
        assert!(matches!(tokenizer.encode("aaz"), Err(Error::EncodingFailure { index: 0, .. })));
    }

    #[test]
    fn batch_order_independence_test() {
        let corpus = ["the cat sat on the mat", "the rat ate the cat", "a mat for the rat"];
        let tokenizer = Tokenizer::new(train(&corpus, 40, Some("[UNK]")));

        let a = "the cat ate";
        let b = "zebra on a mat";
        let single = tokenizer.encode(a).unwrap();
        let forward = tokenizer.encode_batch(&[a, b]);
        let backward = tokenizer.encode_batch(&[b, a]);
        assert_eq!(forward[0].as_ref().unwrap(), &single);
        assert_eq!(backward[1].as_ref().unwrap(), &single);
        assert_eq!(forward[1].as_ref().unwrap(), backward[0].as_ref().unwrap());
    }

    #[test]
    fn batch_failures_are_per_item_test() {
        let tokenizer = Tokenizer::new(train(&["aaabdaaabac"], 12, None));
        let results = tokenizer.encode_batch(&["aa", "zz", "ab"]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::EncodingFailure { index: 1, .. })));
        assert!(results[2].is_ok());
    }

    #[test]
    fn round_trip_test() {
        let corpus = [
            "litwo ojczyzno moja ty jesteś jak zdrowie",
            "ile cię trzeba cenić ten tylko się dowie",
        ];
        let tokenizer = Tokenizer::new(train(&corpus, 70, Some("[UNK]")));
        for sentence in corpus {
            let encoding = tokenizer.encode(sentence).unwrap();
            for (w, word) in Whitespace::words(sentence).iter().enumerate() {
                assert_eq!(&encoding.word_surface(w), word);
            }
            let normalized = Whitespace::words(sentence).join(" ");
            let rebuilt = (0..Whitespace::words(sentence).len())
            .map(|w| encoding.word_surface(w))
            .collect::<Vec<String>>()
            .join(" ");
            assert_eq!(rebuilt, normalized);
        }
    }

    #[test]
    fn learned_order_equivalence_test() {
        // learns (w,e) (l,o) (s,t) (n,e) (w,i) (wi,d) (wid,e)
        let corpus = ["low lower lowest", "new newer newest", "wide wider widest"];
        let model = train(&corpus, 20, Some("[UNK]"));
        assert_eq!(model.merges.len(), 7);
        let tokenizer = Tokenizer::new(model.clone());
        assert_eq!(tokenizer.encode("lowest").unwrap().tokens, vec!["lo", "we", "st"]);
        for word in ["lowest", "widest", "newer", "slow", "wewidewe", "stone"] {
            let encoding = tokenizer.encode(word).unwrap();
            assert_eq!(encoding.tokens, apply_rules_in_order(&model, word), "word {}", word);
        }
    }

}
