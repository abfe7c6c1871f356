
// splitting of raw text into words, and words into the atomic symbols that
// merging starts from. Nothing here is learned.

// defines the behavior needed for pre-tokenizing a corpus
pub trait PreTokenize {
    fn words(text: &str) -> Vec<&str>;
    fn symbols(word: &str) -> Vec<String>;

    fn pre_tokenize(text: &str) -> Vec<Vec<String>> {
        Self::words(text).into_iter().map(|word| Self::symbols(word)).collect()
    }
}

pub struct Whitespace {}

impl PreTokenize for Whitespace {

    // any run of unicode whitespace delimits words, leading and trailing runs are dropped
    fn words(text: &str) -> Vec<&str> {
        text.split_whitespace().collect()
    }

    // one symbol per char, merging starts from these
    fn symbols(word: &str) -> Vec<String> {
        word.chars().map(|c| c.to_string()).collect()
    }
}
