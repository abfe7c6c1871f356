
// learning of the merge rules and the vocabulary, done by repeatedly merging the most
// frequent pair of adjacent symbols over the word types of the corpus.

use crate::config::JsonTokenizer;
use crate::error::{Error, Result};
use crate::pretokenizer::{PreTokenize, Whitespace};
use crate::vocab::{MergeRule, TokenizerModel, Vocabulary};

use log::{debug, info};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::time::Instant;

// chars cut from the alphabet, they never form a pair
const DROPPED: u32 = u32::MAX;

// words handled by a single rayon task while counting pairs
const CHUNK_SIZE: usize = 1000;

type Pair = (u32, u32);
// (word index, char offset in the word) of the first time a pair is seen in the scan
type Position = (usize, usize);

/// A word type of the corpus as vocabulary ids, with its number of occurrences.
#[derive(Debug, Clone)]
struct Word {
    symbols: Vec<u32>,
    count: u64,
}

// occurrences of each adjacent pair inside one word
fn word_pairs(symbols: &[u32]) -> HashMap<Pair, u64> {
    let mut pairs: HashMap<Pair, u64> = HashMap::new();
    for window in symbols.windows(2) {
        if window[0] == DROPPED || window[1] == DROPPED {
            continue
        }
        *pairs.entry((window[0], window[1])).or_insert(0) += 1;
    }
    pairs
}

fn merge_symbols(symbols: &[u32], (left, right): Pair, new_id: u32) -> Vec<u32> {
    let mut i = 0;
    let mut merged = Vec::with_capacity(symbols.len());
    while i < symbols.len() {
        if i + 1 < symbols.len() && symbols[i] == left && symbols[i + 1] == right {
            merged.push(new_id);
            i += 2;
        } else {
            merged.push(symbols[i]);
            i += 1;
        }
    }
    merged
}

// char offsets never move when other pairs merge, unlike symbol indices
fn first_offset(symbols: &[u32], pair: Pair, lens: &[usize]) -> Option<usize> {
    let mut offset = 0;
    for window in symbols.windows(2) {
        if (window[0], window[1]) == pair {
            return Some(offset)
        }
        offset += lens.get(window[0] as usize).copied().unwrap_or(1);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PairScore {
    count: u64,
    first: Position,
    pair: Pair,
}

// highest count, ties go to the pair seen first in the scan
impl Ord for PairScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.first.cmp(&self.first))
            .then_with(|| other.pair.cmp(&self.pair))
    }
}

impl PartialOrd for PairScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pair counts kept up to date across merges. Only the words holding the merged pair
/// are rewritten, and only the pairs they gain or lose are rescored.
struct PairIndex {
    counts: HashMap<Pair, u64>,
    // word types holding each pair, ascending
    holders: HashMap<Pair, BTreeSet<usize>>,
    firsts: HashMap<Pair, Position>,
    // may hold outdated scores, they are dropped when popped
    heap: BinaryHeap<PairScore>,
}

impl PairIndex {

    fn build(words: &[Word], lens: &[usize]) -> PairIndex {

        // each chunk counts on its own, counts are summed and holders joined
        let chunk_counts: Vec<HashMap<Pair, (u64, Vec<usize>)>> = words
            .par_chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(c, chunk)| {
                let mut counts: HashMap<Pair, (u64, Vec<usize>)> = HashMap::new();
                for (w, word) in chunk.iter().enumerate() {
                    for (pair, n) in word_pairs(&word.symbols) {
                        let val = counts.entry(pair).or_insert((0, Vec::new()));
                        val.0 += n * word.count;
                        val.1.push(c * CHUNK_SIZE + w);
                    }
                }
                counts
            })
            .collect();

        let mut index = PairIndex {
            counts: HashMap::new(),
            holders: HashMap::new(),
            firsts: HashMap::new(),
            heap: BinaryHeap::new(),
        };
        for chunk in chunk_counts {
            for (pair, (count, holders)) in chunk {
                *index.counts.entry(pair).or_insert(0) += count;
                index.holders.entry(pair).or_default().extend(holders);
            }
        }

        let pairs: Vec<Pair> = index.counts.keys().copied().collect();
        for pair in pairs {
            index.rescore(pair, words, lens);
        }
        index
    }

    // recomputes where `pair` is first seen and queues its current score
    fn rescore(&mut self, pair: Pair, words: &[Word], lens: &[usize]) {

        let first = match self.counts.get(&pair) {
            Some(count) if *count > 0 => self.holders.get(&pair)
                .and_then(|holders| holders.iter().next())
                .and_then(|w| first_offset(&words[*w].symbols, pair, lens).map(|offset| (*w, offset))),
            _ => None
        };

        match first {
            Some(first) => {
                let count = self.counts.get(&pair).copied().unwrap_or(0);
                self.firsts.insert(pair, first);
                self.heap.push(PairScore { count, first, pair });
            },
            None => {
                self.counts.remove(&pair);
                self.holders.remove(&pair);
                self.firsts.remove(&pair);
            }
        }
    }

    // pops until the top score is the live one of its pair
    fn best(&mut self, banned: &HashSet<Pair>) -> Option<(Pair, u64)> {
        while let Some(score) = self.heap.pop() {
            if banned.contains(&score.pair) {
                continue
            }
            if self.counts.get(&score.pair) == Some(&score.count) && self.firsts.get(&score.pair) == Some(&score.first) {
                return Some((score.pair, score.count))
            }
        }
        None
    }

    fn merge(&mut self, words: &mut [Word], pair: Pair, new_id: u32, lens: &[usize]) {

        let holders: Vec<usize> = self.holders.get(&pair).map(|h| h.iter().copied().collect()).unwrap_or_default();

        // rewrite the holders in parallel, then fold the pairs each one lost or gained
        let view: &[Word] = words;
        let rewritten: Vec<(usize, Vec<u32>, HashMap<Pair, u64>, HashMap<Pair, u64>)> = holders
            .par_iter()
            .map(|w| {
                let symbols = merge_symbols(&view[*w].symbols, pair, new_id);
                let before = word_pairs(&view[*w].symbols);
                let after = word_pairs(&symbols);
                (*w, symbols, before, after)
            })
            .collect();

        let mut touched: HashSet<Pair> = HashSet::new();
        for (w, symbols, before, after) in rewritten {
            let count = words[w].count;
            for (p, n) in &before {
                let m = after.get(p).copied().unwrap_or(0);
                if m == *n {
                    continue
                }
                touched.insert(*p);
                if let Some(total) = self.counts.get_mut(p) {
                    *total = *total + m * count - n * count;
                }
                if m == 0 {
                    if let Some(h) = self.holders.get_mut(p) {
                        h.remove(&w);
                    }
                }
            }
            for (p, m) in &after {
                if before.contains_key(p) {
                    continue
                }
                touched.insert(*p);
                *self.counts.entry(*p).or_insert(0) += m * count;
                self.holders.entry(*p).or_default().insert(w);
            }
            words[w].symbols = symbols;
        }

        for p in touched {
            self.rescore(p, words, lens);
        }
    }
}

pub struct BpeTrainer {
    config: JsonTokenizer,
}

impl BpeTrainer {

    pub fn new(config: JsonTokenizer) -> Self {
        Self { config }
    }

    // the unknown token always sits among the specials, first if it was not listed
    fn special_tokens(&self) -> Vec<String> {
        let mut specials: Vec<String> = Vec::new();
        if let Some(unk) = &self.config.unk_token {
            if !self.config.special_tokens.contains(unk) {
                specials.push(unk.to_owned());
            }
        }
        for token in &self.config.special_tokens {
            if !specials.contains(token) {
                specials.push(token.to_owned());
            }
        }
        specials
    }

    fn word_types<S: AsRef<str>>(corpus: &[S], specials: &[String]) -> Vec<(String, u64)> {

        // word types in the order of their first occurrence, so the scan order of the
        // types is the scan order of the corpus. Special tokens written in the text are
        // kept whole by the tokenizer and are not learned from.
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut types: Vec<(String, u64)> = Vec::new();
        for text in corpus {
            for word in Whitespace::words(text.as_ref()) {
                if specials.iter().any(|s| s == word) {
                    continue
                }
                match index.get(word) {
                    Some(i) => types[*i].1 += 1,
                    None => {
                        index.insert(word.to_owned(), types.len());
                        types.push((word.to_owned(), 1));
                    }
                }
            }
        }
        types
    }

    fn alphabet(types: &[(String, u64)], room: usize) -> Vec<char> {

        let mut char2count: HashMap<char, u64> = HashMap::new();
        for (word, count) in types {
            for c in word.chars() {
                *char2count.entry(c).or_insert(0) += count;
            }
        }

        let mut chars: Vec<(char, u64)> = char2count.into_iter().collect();
        if chars.len() > room {
            // keep the most frequent chars, ties by code point
            chars.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then(a.cmp(b)));
            debug!("alphabet of {} chars truncated to {}", chars.len(), room);
            chars.truncate(room);
        }

        let mut alphabet: Vec<char> = chars.into_iter().map(|(c, _)| c).collect();
        alphabet.sort();
        alphabet
    }

    /// Learns the vocabulary and the ordered merge rules of `corpus`.
    ///
    /// Identical corpora (word order included) and configurations give identical models.
    pub fn train<S: AsRef<str>>(&self, corpus: &[S]) -> Result<TokenizerModel> {

        let timer = Instant::now();
        let vocab_size = self.config.vocab_size;
        let min_frequency = self.config.min_frequency as u64;
        let specials = self.special_tokens();
        if vocab_size <= specials.len() {
            return Err(Error::InvalidConfig(format!("vocab_size {} leaves no room next to {} special tokens", vocab_size, specials.len())));
        }

        let types = BpeTrainer::word_types(corpus, &specials);
        if types.is_empty() {
            return Err(Error::CorpusEmpty);
        }

        // specials take the lowest ids, then the alphabet
        let mut vocab = Vocabulary::new();
        for token in &specials {
            vocab.insert(token);
        }
        let alphabet = BpeTrainer::alphabet(&types, vocab_size - specials.len());
        for c in &alphabet {
            vocab.insert(&c.to_string());
        }

        let mut words: Vec<Word> = types
            .iter()
            .map(|(word, count)| Word {
                symbols: word.chars().map(|c| vocab.get(&c.to_string()).unwrap_or(DROPPED)).collect(),
                count: *count,
            })
            .collect();

        info!("training vocabulary: {} word types, {} chars in alphabet, target size {}", words.len(), alphabet.len(), vocab_size);

        // char length of every id, for the positions of pairs
        let mut lens: Vec<usize> = vocab.iter().map(|(_, token)| token.chars().count()).collect();
        let mut index = PairIndex::build(&words, &lens);

        // pairs that would spell a special token, they are never merged
        let mut banned: HashSet<Pair> = HashSet::new();

        let mut merges: Vec<MergeRule> = Vec::new();
        while vocab.len() < vocab_size {

            let ((left, right), count) = match index.best(&banned) {
                Some(best) if best.1 >= min_frequency => best,
                _ => {
                    debug!("no pair reaches min_frequency {}, stopping", min_frequency);
                    break
                }
            };

            // symbols in words are always vocabulary ids, safe to index
            let rule = MergeRule(
                vocab.token(left).unwrap_or_default().to_owned(),
                vocab.token(right).unwrap_or_default().to_owned()
            );
            let merged = rule.merged();
            if specials.contains(&merged) {
                debug!("pair ({}, {}) spells special token {}, skipped", rule.0, rule.1, merged);
                banned.insert((left, right));
                continue
            }
            let new_id = vocab.insert(&merged);
            if new_id as usize == lens.len() {
                lens.push(merged.chars().count());
            }
            index.merge(&mut words, (left, right), new_id, &lens);

            if self.config.progress_verbose && (merges.len() + 1) % 1000 == 0 {
                info!("merge {}: ({}, {}) -> {} with frequency {}", merges.len() + 1, rule.0, rule.1, new_id, count);
            }
            merges.push(rule);
        }

        info!("finished vocabulary: {} merges, {} entries, took {} seconds", merges.len(), vocab.len(), timer.elapsed().as_secs());

        Ok(TokenizerModel {
            special_tokens: specials,
            unk_token: self.config.unk_token.clone(),
            vocab: vocab,
            merges: merges
        })
    }

}


#[cfg(test)]
mod tests {

    use super::BpeTrainer;
    use crate::config::JsonTokenizer;
    use crate::error::Error;
    use crate::vocab::MergeRule;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn config(vocab_size: usize, min_frequency: usize, special_tokens: &[&str], unk_token: Option<&str>) -> JsonTokenizer {
        JsonTokenizer {
            vocab_size: vocab_size,
            min_frequency: min_frequency,
            special_tokens: special_tokens.iter().map(|t| t.to_string()).collect(),
            unk_token: unk_token.map(|t| t.to_string()),
            progress_verbose: false
        }
    }

    fn rule(left: &str, right: &str) -> MergeRule {
        MergeRule(left.to_string(), right.to_string())
    }

    // the merges below were worked out by hand:
    // a a a b d a a a b a c -> (a, a) counted 4 times
    // aa a b d aa a b a c -> (aa, a) and (a, b) both twice, (aa, a) is seen first
    // aaa b d aaa b a c -> (aaa, b)
    // aaab d aaab a c -> all pairs once, (aaab, d) is first
    // aaabd aaab a c -> (aaabd, aaab), vocabulary is full after it
    #[test]
    fn golden_merges_test() {
        let trainer = BpeTrainer::new(config(10, 1, &["[UNK]"], Some("[UNK]")));
        let model = trainer.train(&["aaabdaaabac"]).unwrap();

        assert_eq!(model.merges, vec![
            rule("a", "a"),
            rule("aa", "a"),
            rule("aaa", "b"),
            rule("aaab", "d"),
            rule("aaabd", "aaab"),
        ]);
        assert_eq!(model.vocab.len(), 10);
        assert_eq!(model.vocab.get("[UNK]"), Some(0));
        assert_eq!(model.vocab.get("a"), Some(1));
        assert_eq!(model.vocab.get("d"), Some(4));
        assert_eq!(model.vocab.get("aa"), Some(5));
        assert_eq!(model.vocab.get("aaabdaaab"), Some(9));
    }

    #[test]
    fn tie_break_by_first_occurrence_test() {
        // both pairs appear twice, (x, y) comes first in the corpus
        let trainer = BpeTrainer::new(config(6, 1, &[], None));
        let model = trainer.train(&["xy ab", "ab xy"]).unwrap();
        assert_eq!(model.merges, vec![rule("x", "y"), rule("a", "b")]);

        // swapping the corpus order swaps the merges
        let model = trainer.train(&["ab xy", "xy ab"]).unwrap();
        assert_eq!(model.merges, vec![rule("a", "b"), rule("x", "y")]);
    }

    #[test]
    fn determinism_test() {
        let corpus = [
            "litwo ojczyzno moja ty jesteś jak zdrowie",
            "ile cię trzeba cenić ten tylko się dowie",
            "kto cię stracił dziś piękność twą w całej ozdobie",
        ];
        let trainer = BpeTrainer::new(config(60, 1, &["[UNK]", "[PAD]"], Some("[UNK]")));
        let first = trainer.train(&corpus).unwrap();
        let second = trainer.train(&corpus).unwrap();
        assert_eq!(first, second);
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    }

    #[test]
    fn size_bound_test() {
        let corpus = ["the cat sat on the mat the cat ate the rat"; 3];
        for vocab_size in [3, 7, 12, 25, 1000] {
            let trainer = BpeTrainer::new(config(vocab_size, 1, &["[UNK]"], Some("[UNK]")));
            let model = trainer.train(&corpus).unwrap();
            assert!(model.vocab.len() <= vocab_size);
        }
    }

    #[test]
    fn alphabet_truncated_to_target_test() {
        // room for 2 chars, a is most frequent, b wins the tie with c by code point
        let trainer = BpeTrainer::new(config(3, 1, &["[UNK]"], Some("[UNK]")));
        let model = trainer.train(&["aab c"]).unwrap();
        assert_eq!(model.vocab.len(), 3);
        assert_eq!(model.vocab.get("a"), Some(1));
        assert_eq!(model.vocab.get("b"), Some(2));
        assert_eq!(model.vocab.get("c"), None);
        assert!(model.merges.is_empty());
    }

    #[test]
    fn empty_corpus_test() {
        let trainer = BpeTrainer::new(config(10, 1, &["[UNK]"], Some("[UNK]")));
        let empty: [&str; 0] = [];
        assert!(matches!(trainer.train(&empty), Err(Error::CorpusEmpty)));
        assert!(matches!(trainer.train(&["  ", "\n\t"]), Err(Error::CorpusEmpty)));
    }

    #[test]
    fn min_frequency_cutoff_test() {
        // (a, b) is seen twice, (c, d) once
        let trainer = BpeTrainer::new(config(300, 2, &[], None));
        let model = trainer.train(&["ab ab cd"]).unwrap();
        assert_eq!(model.merges, vec![rule("a", "b")]);

        let trainer = BpeTrainer::new(config(300, 100, &[], None));
        let model = trainer.train(&["hello world"]).unwrap();
        assert!(model.merges.is_empty());
    }

    #[test]
    fn specials_reserved_test() {
        // unk is prepended when missing from the list, specials in the text are not learned from
        let trainer = BpeTrainer::new(config(50, 1, &["[CLS]", "[SEP]"], Some("[UNK]")));
        let model = trainer.train(&["[CLS] ab ab [SEP]"]).unwrap();
        assert_eq!(model.special_tokens, vec!["[UNK]", "[CLS]", "[SEP]"]);
        assert_eq!(model.vocab.get("[UNK]"), Some(0));
        assert_eq!(model.vocab.get("[CLS]"), Some(1));
        assert_eq!(model.vocab.get("[SEP]"), Some(2));
        assert_eq!(model.vocab.get("S"), None);
        assert_eq!(model.merges, vec![rule("a", "b")]);
    }

    #[test]
    fn unknown_token_never_merged_test() {
        // ([UNK, ]) would spell the unknown token, it is skipped in favor of (], x)
        let trainer = BpeTrainer::new(config(100, 1, &["[UNK]"], Some("[UNK]")));
        let model = trainer.train(&["[UNK]x [UNK [UNK [UNK"]).unwrap();
        assert_eq!(model.merges, vec![
            rule("[", "U"),
            rule("[U", "N"),
            rule("[UN", "K"),
            rule("]", "x"),
            rule("[UNK", "]x"),
        ]);
        for merge in &model.merges {
            assert_ne!(merge.merged(), "[UNK]");
        }
        assert_eq!(model.vocab.get("[UNK]"), Some(0));
    }

    // merges learned by recounting every pair of every word at each step,
    // ranked by count then by (word, symbol) of the first occurrence
    fn recounted_merges(corpus: &[String], n_merges: usize, min_frequency: u64) -> Vec<MergeRule> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut words: Vec<(Vec<String>, u64)> = Vec::new();
        for word in corpus.iter().flat_map(|line| line.split_whitespace()) {
            match index.get(word) {
                Some(i) => words[*i].1 += 1,
                None => {
                    index.insert(word, words.len());
                    words.push((word.chars().map(|c| c.to_string()).collect(), 1));
                }
            }
        }

        let mut merges = Vec::new();
        while merges.len() < n_merges {
            let mut counts: HashMap<(String, String), (u64, (usize, usize))> = HashMap::new();
            for (w, (symbols, count)) in words.iter().enumerate() {
                for (s, pair) in symbols.windows(2).enumerate() {
                    let val = counts.entry((pair[0].clone(), pair[1].clone())).or_insert((0, (w, s)));
                    val.0 += count;
                }
            }
            let best = counts.into_iter()
                .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then_with(|| fb.cmp(fa)));
            let (left, right) = match best {
                Some((pair, (count, _))) if count >= min_frequency => pair,
                _ => break
            };
            for (symbols, _) in words.iter_mut() {
                let mut merged = Vec::new();
                let mut i = 0;
                while i < symbols.len() {
                    if i + 1 < symbols.len() && symbols[i] == left && symbols[i + 1] == right {
                        merged.push(format!("{}{}", left, right));
                        i += 2;
                    } else {
                        merged.push(symbols[i].clone());
                        i += 1;
                    }
                }
                *symbols = merged;
            }
            merges.push(MergeRule(left, right));
        }
        merges
    }

    #[test]
    fn incremental_counts_match_recount_test() {
        // a small alphabet makes many ties and overlapping pairs like (a, a)
        let alphabet: Vec<char> = "aabcłóż".chars().collect();
        let mut rng = StdRng::seed_from_u64(11);
        let corpus: Vec<String> = (0..300).map(|_| {
            (0..8).map(|_| {
                let len = rng.gen_range(1..7);
                (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect::<String>()
            }).collect::<Vec<String>>().join(" ")
        }).collect();

        let trainer = BpeTrainer::new(config(400, 2, &[], None));
        let model = trainer.train(&corpus).unwrap();
        assert!(model.merges.len() > 100);
        assert_eq!(model.merges, recounted_merges(&corpus, model.merges.len(), 2));
    }

}
