
// loading of the raw corpus: file discovery in a directory and aggregation of the
// non-empty lines of every file into sentences

use crate::error::{Error, Result};

use log::{info, warn};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

pub struct Corpus {}

impl Corpus {

    /// Shell-like match of a file name, `*` is any run of chars and `?` a single char.
    pub fn matches(pattern: &str, name: &str) -> bool {

        let p: Vec<char> = pattern.chars().collect();
        let n: Vec<char> = name.chars().collect();
        let (mut pi, mut ni) = (0, 0);
        // last star seen and the name position it was tried at
        let mut star: Option<(usize, usize)> = None;

        while ni < n.len() {
            if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
                pi += 1;
                ni += 1;
            } else if pi < p.len() && p[pi] == '*' {
                star = Some((pi, ni));
                pi += 1;
            } else if let Some((sp, sn)) = star {
                pi = sp + 1;
                ni = sn + 1;
                star = Some((sp, sn + 1));
            } else {
                return false
            }
        }
        while pi < p.len() && p[pi] == '*' {
            pi += 1;
        }
        pi == p.len()
    }

    /// Files of `dir` whose name matches `pattern`, sorted by path.
    pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let matched = path.file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| Corpus::matches(pattern, name));
            if path.is_file() && matched {
                files.push(path);
            }
        }
        files.sort();
        info!("found {} files for pattern '{}' in {}", files.len(), pattern, dir.display());
        Ok(files)
    }

    fn read_file(file_path: &Path) -> io::Result<Lines<BufReader<File>>> {
        let f = File::open(file_path)?;
        Ok(BufReader::new(f).lines())
    }

    fn load(file_path: &Path, sentences: &mut Vec<String>) -> io::Result<()> {
        for line in Corpus::read_file(file_path)? {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                sentences.push(line.to_owned());
            }
        }
        Ok(())
    }

    /// Non-empty, trimmed lines of every file in order. A file that cannot be read is
    /// skipped with a warning, nothing readable at all is `CorpusEmpty`.
    pub fn aggregate(files: &[PathBuf]) -> Result<Vec<String>> {

        let mut sentences: Vec<String> = Vec::new();
        for file_path in files {
            let before = sentences.len();
            if let Err(e) = Corpus::load(file_path, &mut sentences) {
                warn!("could not read {}, skipping: {}", file_path.display(), e);
                sentences.truncate(before);
            }
        }

        if sentences.is_empty() {
            return Err(Error::CorpusEmpty);
        }
        info!("loaded {} sentences from {} files", sentences.len(), files.len());
        Ok(sentences)
    }

}


#[cfg(test)]
mod tests {

    use super::Corpus;
    use crate::error::Error;
    use std::fs;

    #[test]
    fn matches_test() {
        assert!(Corpus::matches("*.txt", "pan-tadeusz.txt"));
        assert!(Corpus::matches("*", ""));
        assert!(Corpus::matches("pan-*.txt", "pan-tadeusz.txt"));
        assert!(Corpus::matches("?an*", "pan-tadeusz.txt"));
        assert!(Corpus::matches("*a*a*", "banana"));
        assert!(!Corpus::matches("*.txt", "notes.md"));
        assert!(!Corpus::matches("pan", "pan-tadeusz.txt"));
        assert!(!Corpus::matches("?", ""));
    }

    #[test]
    fn discover_and_aggregate_test() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "  druga linia \n\n trzecia\n").unwrap();
        fs::write(dir.path().join("a.txt"), "pierwsza\n   \n").unwrap();
        fs::write(dir.path().join("c.md"), "pominięta\n").unwrap();

        let files = Corpus::discover(dir.path(), "*.txt").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.txt"));

        let sentences = Corpus::aggregate(&files).unwrap();
        assert_eq!(sentences, vec!["pierwsza", "druga linia", "trzecia"]);
    }

    #[test]
    fn missing_files_skipped_test() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "jest\n").unwrap();
        let files = vec![dir.path().join("missing.txt"), dir.path().join("a.txt")];
        assert_eq!(Corpus::aggregate(&files).unwrap(), vec!["jest"]);

        let only_missing = vec![dir.path().join("missing.txt")];
        assert!(matches!(Corpus::aggregate(&only_missing), Err(Error::CorpusEmpty)));

        fs::write(dir.path().join("empty.txt"), "\n \n").unwrap();
        assert!(matches!(Corpus::aggregate(&[dir.path().join("empty.txt")]), Err(Error::CorpusEmpty)));
    }

}
