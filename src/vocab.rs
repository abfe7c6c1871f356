
use serde::{Serialize, Deserialize, Serializer, Deserializer, ser::SerializeMap, de::{self, Visitor, MapAccess}};
use std::collections::HashMap;
use std::fmt;

/// Token string to dense id mapping. Ids are handed out in insertion order,
/// so the order of the vocabulary reflects special tokens, then the alphabet,
/// then the merges in the order they were learned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vocabulary {
    t2i: HashMap<String, u32>,
    i2t: Vec<String>
}

impl Vocabulary {

    pub fn new() -> Vocabulary {
        Self::default()
    }

    /// Inserts `token` under the next free id, or returns the id it already has.
    pub fn insert(&mut self, token: &str) -> u32 {
        if let Some(id) = self.t2i.get(token) {
            return *id
        }
        let id = self.i2t.len() as u32;
        self.t2i.insert(token.to_owned(), id);
        self.i2t.push(token.to_owned());
        id
    }

    pub fn get(&self, token: &str) -> Option<u32> {
        self.t2i.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.i2t.get(id as usize).map(|t| t.as_str())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.t2i.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.i2t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i2t.is_empty()
    }

    /// (id, token) pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.i2t.iter().enumerate().map(|(i, t)| (i as u32, t.as_str()))
    }
}

// written as a json object in id order, so that two identical trainings give identical files
impl Serialize for Vocabulary {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer {

            let mut map = serializer.serialize_map(Some(self.i2t.len()))?;
            for (id, token) in self.iter() {
                map.serialize_entry(token, &id)?;
            }
            map.end()
    }
}

struct VocabularyVisitor;
impl<'de> Visitor<'de> for VocabularyVisitor {

    type Value = Vocabulary;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of token to dense ids starting at 0")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>, {

                let mut entries: Vec<(String, u32)> = Vec::new();
                while let Some((token, id)) = access.next_entry::<String, u32>()? {
                    entries.push((token, id));
                }

                // ids have to be a permutation of 0..n, any gap means a broken artifact
                entries.sort_by_key(|(_, id)| *id);
                let mut vocab = Vocabulary::new();
                for (expected, (token, id)) in entries.into_iter().enumerate() {
                    if id as usize != expected {
                        return Err(de::Error::custom(format!("vocabulary ids are not dense, expected {} found {}", expected, id)));
                    }
                    if vocab.contains(&token) {
                        return Err(de::Error::custom(format!("duplicate token '{}' in vocabulary", token)));
                    }
                    vocab.insert(&token);
                }
                Ok(vocab)
    }
}

impl<'de> Deserialize<'de> for Vocabulary {

    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de> {
            deserializer.deserialize_map(VocabularyVisitor)
    }
}

/// A learned merge: the adjacent pair (left, right) becomes `left + right`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeRule(pub String, pub String);

impl MergeRule {
    pub fn merged(&self) -> String {
        [self.0.as_str(), self.1.as_str()].concat()
    }
}

/// Everything the tokenizer needs, persisted as one human readable json record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenizerModel {
    pub special_tokens: Vec<String>,
    pub unk_token: Option<String>,
    pub vocab: Vocabulary,
    pub merges: Vec<MergeRule>
}

impl TokenizerModel {

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_token.as_ref().and_then(|unk| self.vocab.get(unk))
    }

    pub fn is_special(&self, token: &str) -> bool {
        self.special_tokens.iter().any(|s| s == token)
    }
}
