//! Byte-level BPE training.
//!
//! The corpus is pre-tokenized into a table of distinct words and their
//! counts. Each word starts as a sequence of single-byte pieces; the trainer
//! then repeatedly merges the most frequent adjacent pair of pieces.
//!
//! Pair statistics are maintained incrementally. A pair → words index lets a
//! merge touch only the words that actually contain the pair, and a max-heap
//! with lazy invalidation picks the next pair without scanning the whole pair
//! table. Ties on frequency go to the pair whose left piece is
//! lexicographically greatest by bytes, then the greatest right piece.

use std::collections::hash_map::Entry;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::bpe::{merge_pair, Pair, PieceId, PieceTable};
use super::corpus::pretokenize_file;
use super::pretokenize::{count_words, SpecialSplitter, WordCounts, WordSplitter};
use super::vocab::{Merges, Vocab, BYTE_TOKENS};

/// Default document separator used to align corpus chunks.
pub const DEFAULT_SPLIT_TOKEN: &str = "<|endoftext|>";

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid trainer configuration: {0}")]
    InvalidConfig(String),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("Regex compilation error: {0}")]
    RegexError(#[from] fancy_regex::Error),
}

/// Configuration for BPE training.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Target vocabulary size, including the 256 byte tokens and the
    /// special tokens.
    pub vocab_size: usize,
    /// Special tokens, assigned ids from 256 in this order.
    pub special_tokens: Vec<String>,
    /// Number of chunks a corpus file is cut into for parallel
    /// pre-tokenization.
    pub num_chunks: usize,
    /// Delimiter chunk boundaries are aligned to. It is only used when it is
    /// also one of `special_tokens`; otherwise the corpus is read as a
    /// single chunk.
    pub split_token: Option<String>,
    /// Log progress every N merges (0 disables).
    pub log_interval: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            special_tokens: vec![DEFAULT_SPLIT_TOKEN.to_string()],
            num_chunks: 16,
            split_token: Some(DEFAULT_SPLIT_TOKEN.to_string()),
            log_interval: 1000,
        }
    }
}

impl TrainerConfig {
    /// Configuration with the given target size and special tokens, other
    /// fields at their defaults.
    pub fn new<S: AsRef<str>>(vocab_size: usize, special_tokens: &[S]) -> Self {
        Self {
            vocab_size,
            special_tokens: special_tokens
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        let base = BYTE_TOKENS + self.special_tokens.len();
        if self.vocab_size < base {
            return Err(TrainError::InvalidConfig(format!(
                "vocab_size {} is smaller than the {} byte and special tokens",
                self.vocab_size, base
            )));
        }
        if self.num_chunks == 0 {
            return Err(TrainError::InvalidConfig(
                "num_chunks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// BPE trainer: learns a vocabulary and merge list from a corpus.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn splitter(&self) -> Result<Option<SpecialSplitter>, TrainError> {
        Ok(SpecialSplitter::new(&self.config.special_tokens)?)
    }

    /// Train on an in-memory corpus.
    pub fn train_from_text(&self, text: &str) -> Result<(Vocab, Merges), TrainError> {
        self.config.validate()?;
        let splitter = self.splitter()?;
        let words = WordSplitter::new()?;
        let counts = count_words(text, &words, splitter.as_ref());
        self.train_from_word_counts(counts)
    }

    /// Train on a corpus file.
    ///
    /// The file is cut into `num_chunks` pieces aligned to `split_token`,
    /// pre-tokenized in parallel, and the word counts of every chunk are
    /// summed before merging starts. The result never depends on
    /// `num_chunks`: when chunking could change how the text is split (see
    /// [`chunk_delimiter`](Self::chunk_delimiter)) one chunk is used.
    pub fn train_from_file<P: AsRef<Path>>(&self, path: P) -> Result<(Vocab, Merges), TrainError> {
        self.config.validate()?;
        let path = path.as_ref();
        let splitter = self.splitter()?;
        let words = WordSplitter::new()?;

        let (num_chunks, split_token) = match self.chunk_delimiter() {
            Some(token) => (self.config.num_chunks, token.as_bytes()),
            None => {
                if self.config.num_chunks > 1 {
                    log::info!(
                        "split token {:?} is not a usable special token, reading one chunk",
                        self.config.split_token
                    );
                }
                (1, &[][..])
            }
        };

        log::info!("reading corpus {}", path.display());
        let counts = pretokenize_file(path, num_chunks, split_token, &words, splitter.as_ref())?;
        self.train_from_word_counts(counts)
    }

    /// The split token, if chunk boundaries placed on it are also boundaries
    /// of a single pass over the whole corpus.
    ///
    /// That holds when it is a special token and no special token (itself
    /// included) can overlap the start of one of its occurrences. Otherwise a
    /// chunk could begin inside a special token or in the middle of a word.
    pub fn chunk_delimiter(&self) -> Option<&str> {
        let token = self.config.split_token.as_deref().filter(|t| !t.is_empty())?;
        let specials = &self.config.special_tokens;
        if !specials.iter().any(|s| s == token) {
            return None;
        }
        if specials
            .iter()
            .any(|s| overlaps_start(s.as_bytes(), token.as_bytes()))
        {
            return None;
        }
        Some(token)
    }

    /// Train on an already pre-tokenized word-frequency table.
    ///
    /// Words whose bytes equal a configured special token are kept whole and
    /// never take part in a merge.
    pub fn train_from_word_counts(&self, counts: WordCounts) -> Result<(Vocab, Merges), TrainError> {
        self.config.validate()?;

        let mut vocab = Vocab::initial(&self.config.special_tokens);
        let mut merges = Merges::new();
        let num_merges = self.config.vocab_size.saturating_sub(vocab.len());

        let specials: FxHashSet<&[u8]> = self
            .config
            .special_tokens
            .iter()
            .map(|s| s.as_bytes())
            .collect();

        let total: u64 = counts.values().sum();
        let mut ctx = TrainingContext::new(counts, &specials);
        log::info!(
            "training BPE: {} unique words ({} total), {} distinct pairs, up to {} merges",
            ctx.words.len(),
            total,
            ctx.index.freq.len(),
            num_merges
        );

        for step in 0..num_merges {
            let Some(best) = ctx.pop_best() else {
                log::info!("no pairs left after {} merges, stopping early", step);
                break;
            };
            ctx.apply_merge(best.pair);

            let mut token = Vec::with_capacity(best.left.len() + best.right.len());
            token.extend_from_slice(&best.left);
            token.extend_from_slice(&best.right);
            let id = vocab.push(token);
            merges.push(best.left.to_vec(), best.right.to_vec());

            log::debug!(
                "merge {}: {:?} + {:?} -> {} (freq={})",
                step + 1,
                String::from_utf8_lossy(&best.left),
                String::from_utf8_lossy(&best.right),
                id,
                best.freq
            );
            if self.config.log_interval > 0 && (step + 1) % self.config.log_interval == 0 {
                log::info!(
                    "merge {}/{}: freq={}, {} distinct pairs",
                    step + 1,
                    num_merges,
                    best.freq,
                    ctx.index.freq.len()
                );
            }
        }

        log::info!(
            "training finished: {} merges, vocabulary of {} tokens",
            merges.len(),
            vocab.len()
        );
        Ok((vocab, merges))
    }
}

/// Train on a corpus file with the default configuration and the given
/// target size and special tokens.
pub fn train_bpe<P: AsRef<Path>, S: AsRef<str>>(
    input_path: P,
    vocab_size: usize,
    special_tokens: &[S],
) -> Result<(Vocab, Merges), TrainError> {
    Trainer::new(TrainerConfig::new(vocab_size, special_tokens)).train_from_file(input_path)
}

/// Whether an occurrence of `special` can start before an occurrence of
/// `token` and end after that occurrence's first byte.
fn overlaps_start(special: &[u8], token: &[u8]) -> bool {
    (1..special.len()).any(|i| {
        let tail = &special[i..];
        tail.starts_with(token) || token.starts_with(tail)
    })
}

type WordId = usize;

/// A distinct word of the corpus. Slots of words that were folded into
/// another word keep a count of 0 and are never indexed again.
struct WordEntry {
    pieces: Vec<PieceId>,
    count: u64,
}

/// Pair frequency table and pair → words index, kept in step.
#[derive(Default)]
struct PairIndex {
    freq: FxHashMap<Pair, u64>,
    words: FxHashMap<Pair, FxHashSet<WordId>>,
}

impl PairIndex {
    fn add(&mut self, wid: WordId, pieces: &[PieceId], count: u64, touched: &mut FxHashSet<Pair>) {
        for w in pieces.windows(2) {
            let pair = (w[0], w[1]);
            *self.freq.entry(pair).or_insert(0) += count;
            self.words.entry(pair).or_default().insert(wid);
            touched.insert(pair);
        }
    }

    fn remove(
        &mut self,
        wid: WordId,
        pieces: &[PieceId],
        count: u64,
        touched: &mut FxHashSet<Pair>,
    ) {
        for w in pieces.windows(2) {
            let pair = (w[0], w[1]);
            if let Entry::Occupied(mut e) = self.freq.entry(pair) {
                let left = e.get().saturating_sub(count);
                if left == 0 {
                    e.remove();
                } else {
                    *e.get_mut() = left;
                }
            }
            if let Entry::Occupied(mut e) = self.words.entry(pair) {
                e.get_mut().remove(&wid);
                if e.get().is_empty() {
                    e.remove();
                }
            }
            touched.insert(pair);
        }
    }
}

/// Heap entry. Ordered by frequency, then left bytes, then right bytes, so
/// the max-heap pops the winner of the tie-break directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    freq: u64,
    left: Arc<[u8]>,
    right: Arc<[u8]>,
    pair: Pair,
}

/// All mutable state of one training run.
struct TrainingContext {
    pieces: PieceTable,
    words: Vec<WordEntry>,
    word_ids: FxHashMap<Vec<PieceId>, WordId>,
    index: PairIndex,
    heap: BinaryHeap<Candidate>,
}

impl TrainingContext {
    fn new(counts: WordCounts, specials: &FxHashSet<&[u8]>) -> Self {
        let mut ctx = Self {
            pieces: PieceTable::new(),
            words: Vec::with_capacity(counts.len()),
            word_ids: FxHashMap::default(),
            index: PairIndex::default(),
            heap: BinaryHeap::new(),
        };

        for (bytes, count) in counts {
            if count == 0 || bytes.is_empty() {
                continue;
            }
            let pieces = if specials.contains(bytes.as_slice()) {
                vec![ctx.pieces.intern(&bytes)]
            } else {
                bytes.iter().map(|&b| b as PieceId).collect()
            };
            ctx.insert_word(pieces, count);
        }

        let mut scratch = FxHashSet::default();
        for (wid, word) in ctx.words.iter().enumerate() {
            ctx.index.add(wid, &word.pieces, word.count, &mut scratch);
        }

        let pairs: Vec<(Pair, u64)> = ctx.index.freq.iter().map(|(&p, &f)| (p, f)).collect();
        for (pair, freq) in pairs {
            ctx.push_candidate(pair, freq);
        }
        ctx
    }

    /// Add a word, summing into an existing word with the same pieces.
    fn insert_word(&mut self, pieces: Vec<PieceId>, count: u64) {
        match self.word_ids.get(&pieces) {
            Some(&wid) => self.words[wid].count += count,
            None => {
                let wid = self.words.len();
                self.word_ids.insert(pieces.clone(), wid);
                self.words.push(WordEntry { pieces, count });
            }
        }
    }

    fn push_candidate(&mut self, pair: Pair, freq: u64) {
        self.heap.push(Candidate {
            freq,
            left: Arc::clone(self.pieces.get(pair.0)),
            right: Arc::clone(self.pieces.get(pair.1)),
            pair,
        });
    }

    /// Pop the best pair, discarding entries whose frequency is stale.
    fn pop_best(&mut self) -> Option<Candidate> {
        while let Some(candidate) = self.heap.pop() {
            if self.index.freq.get(&candidate.pair) == Some(&candidate.freq) {
                return Some(candidate);
            }
        }
        None
    }

    /// Merge every occurrence of `pair` in the words that contain it.
    fn apply_merge(&mut self, pair: Pair) {
        let merged = self.pieces.concat(pair.0, pair.1);

        let mut affected: Vec<WordId> = self
            .index
            .words
            .get(&pair)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        affected.sort_unstable();

        let mut touched: FxHashSet<Pair> = FxHashSet::default();
        for wid in affected {
            let count = self.words[wid].count;
            if count == 0 {
                continue;
            }

            let mut new_pieces = std::mem::take(&mut self.words[wid].pieces);
            self.index.remove(wid, &new_pieces, count, &mut touched);
            self.word_ids.remove(&new_pieces);

            merge_pair(&mut new_pieces, pair, merged);
            match self.word_ids.get(&new_pieces) {
                Some(&other) => {
                    self.words[wid].count = 0;
                    self.words[other].count += count;
                    self.index
                        .add(other, &self.words[other].pieces, count, &mut touched);
                }
                None => {
                    self.word_ids.insert(new_pieces.clone(), wid);
                    self.index.add(wid, &new_pieces, count, &mut touched);
                    self.words[wid].pieces = new_pieces;
                }
            }
        }

        self.index.freq.remove(&pair);
        self.index.words.remove(&pair);

        for p in touched {
            if let Some(&freq) = self.index.freq.get(&p) {
                self.push_candidate(p, freq);
            }
        }
    }
}
