//! Vocabulary and merge-list model, plus their on-disk formats.
//!
//! # Vocabulary file (`vocab.json`)
//!
//! A JSON object mapping decimal ids to the token's raw bytes, keys in id
//! order:
//!
//! ```text
//! {
//!   "0": [0],
//!   "256": [60, 124, 101, ...],
//!   "257": [32, 116]
//! }
//! ```
//!
//! # Merges file (`merges.txt`)
//!
//! One JSON record per line, both sides base64-encoded (standard alphabet,
//! padded) so arbitrary bytes survive the round trip:
//!
//! ```text
//! {"a":"IA==","b":"dA=="}
//! {"a":"aA==","b":"ZQ=="}
//! ```
//!
//! The line index is the merge rank. Blank lines are skipped on load.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the vocabulary written by [`save_output`].
pub const VOCAB_FILE: &str = "vocab.json";
/// File name of the merge list written by [`save_output`].
pub const MERGES_FILE: &str = "merges.txt";

/// Number of single-byte tokens at the start of every vocabulary.
pub const BYTE_TOKENS: usize = 256;

/// Errors that can occur when reading or writing vocabulary files.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid merge record on line {line}: {reason}")]
    ParseError { line: usize, reason: String },
}

/// Ordered mapping from token id to the token's bytes.
///
/// Training produces ids `0..=255` for the raw bytes, then the special
/// tokens, then one id per merge in learned order. Loaded vocabularies may
/// use any ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocab {
    tokens: BTreeMap<u32, Vec<u8>>,
}

impl Vocab {
    /// Create an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// The starting vocabulary of a training run: all 256 single bytes
    /// followed by the special tokens in the given order.
    ///
    /// A special token is appended even when its bytes are already present.
    pub fn initial<S: AsRef<str>>(special_tokens: &[S]) -> Self {
        let mut vocab = Self::new();
        for b in 0..=u8::MAX {
            vocab.tokens.insert(b as u32, vec![b]);
        }
        for token in special_tokens {
            vocab.push(token.as_ref().as_bytes().to_vec());
        }
        vocab
    }

    /// The id the next [`push`](Self::push) will assign.
    pub fn next_id(&self) -> u32 {
        self.tokens.keys().next_back().map_or(0, |&id| id + 1)
    }

    /// Append `bytes` under the next free id and return that id.
    pub fn push(&mut self, bytes: Vec<u8>) -> u32 {
        let id = self.next_id();
        self.tokens.insert(id, bytes);
        id
    }

    /// Insert `bytes` under an explicit id, returning the previous bytes.
    pub fn insert(&mut self, id: u32, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.tokens.insert(id, bytes)
    }

    /// Bytes of token `id`.
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.tokens.get(&id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate `(id, bytes)` in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.tokens.iter().map(|(&id, bytes)| (id, bytes.as_slice()))
    }

    /// The longest token, lowest id first among equal lengths.
    pub fn longest_token(&self) -> Option<(u32, &[u8])> {
        self.iter().fold(None, |best, (id, bytes)| match best {
            Some((_, b)) if b.len() >= bytes.len() => best,
            _ => Some((id, bytes)),
        })
    }

    /// Write the vocabulary as pretty-printed JSON.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), VocabError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read a vocabulary from its JSON form.
    pub fn read_json<R: Read>(reader: R) -> Result<Self, VocabError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Save to a `vocab.json` style file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VocabError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_json(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load from a `vocab.json` style file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VocabError> {
        Self::read_json(BufReader::new(File::open(path)?))
    }
}

impl FromIterator<(u32, Vec<u8>)> for Vocab {
    fn from_iter<I: IntoIterator<Item = (u32, Vec<u8>)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// One line of the merges file.
#[derive(Serialize, Deserialize)]
struct MergeRecord {
    a: String,
    b: String,
}

/// Ordered list of merges; the index of a merge is its rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merges {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Merges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, left: Vec<u8>, right: Vec<u8>) {
        self.pairs.push((left, right));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The merge with rank `rank`.
    pub fn get(&self, rank: usize) -> Option<(&[u8], &[u8])> {
        self.pairs
            .get(rank)
            .map(|(a, b)| (a.as_slice(), b.as_slice()))
    }

    /// Iterate merges in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.pairs.iter().map(|(a, b)| (a.as_slice(), b.as_slice()))
    }

    pub fn as_slice(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.pairs
    }

    pub fn into_inner(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.pairs
    }

    /// Write one base64 JSON record per merge.
    pub fn write_lines<W: Write>(&self, mut writer: W) -> Result<(), VocabError> {
        for (a, b) in &self.pairs {
            let record = MergeRecord {
                a: STANDARD.encode(a),
                b: STANDARD.encode(b),
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Read merges written by [`write_lines`](Self::write_lines).
    pub fn read_lines<R: BufRead>(reader: R) -> Result<Self, VocabError> {
        let mut merges = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: MergeRecord =
                serde_json::from_str(&line).map_err(|e| VocabError::ParseError {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            merges.push(STANDARD.decode(record.a)?, STANDARD.decode(record.b)?);
        }
        Ok(merges)
    }

    /// Save to a `merges.txt` style file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VocabError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_lines(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load from a `merges.txt` style file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VocabError> {
        Self::read_lines(BufReader::new(File::open(path)?))
    }
}

impl From<Vec<(Vec<u8>, Vec<u8>)>> for Merges {
    fn from(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { pairs }
    }
}

impl FromIterator<(Vec<u8>, Vec<u8>)> for Merges {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Write `vocab.json` and `merges.txt` into `dir`, creating it if needed.
pub fn save_output<P: AsRef<Path>>(
    dir: P,
    vocab: &Vocab,
    merges: &Merges,
) -> Result<(), VocabError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    vocab.save(dir.join(VOCAB_FILE))?;
    merges.save(dir.join(MERGES_FILE))?;
    log::info!(
        "wrote {} tokens and {} merges to {}",
        vocab.len(),
        merges.len(),
        dir.display()
    );
    Ok(())
}

/// Load the `vocab.json` and `merges.txt` pair written by [`save_output`].
pub fn load_output<P: AsRef<Path>>(dir: P) -> Result<(Vocab, Merges), VocabError> {
    let dir = dir.as_ref();
    Ok((
        Vocab::load(dir.join(VOCAB_FILE))?,
        Merges::load(dir.join(MERGES_FILE))?,
    ))
}
