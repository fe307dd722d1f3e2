//! Core training and tokenization engine for bytebpe.
//!
//! - [`Trainer`]: learns merges from a corpus, keeping pair statistics up to
//!   date incrementally instead of rescanning the corpus after every merge
//! - [`Tokenizer`]: applies a trained vocabulary with whole-string,
//!   streaming and batch encoding, plus lossy decoding
//! - [`Vocab`] / [`Merges`]: the trained model and its file formats
//! - [`StreamingDecoder`]: UTF-8 safe decoder for token-by-token output
//!
//! # Performance Notes
//!
//! - **Lazy max-heap**: the next merge is popped in O(log P) instead of a
//!   scan over all P pairs
//! - **Pair → words index**: a merge only rewrites the words that contain it
//! - **Rayon parallelism**: corpus chunks are pre-tokenized in parallel and
//!   batch encoding runs across texts
//! - **FxHashMap**: faster hashing for the pair and word tables
//! - **Aho-Corasick**: O(N) multi-pattern matching for special tokens
//! - **LRU Cache**: bounded cache of encoded words

mod bpe;
pub mod corpus;
pub mod pretokenize;
mod streaming;
mod tokenizer;
mod trainer;
mod vocab;

pub use corpus::{decode_ignoring_invalid, find_chunk_boundaries, pretokenize_file};
pub use pretokenize::{
    count_words, count_words_into, segments, Segment, SpecialSplitter, WordCounts, WordSplitter,
    Words, GPT2_PATTERN,
};
pub use streaming::{EncodeIter, StreamingDecoder};
pub use tokenizer::{Tokenizer, TokenizerError, DEFAULT_CACHE_SIZE};
pub use trainer::{train_bpe, TrainError, Trainer, TrainerConfig, DEFAULT_SPLIT_TOKEN};
pub use vocab::{
    load_output, save_output, Merges, Vocab, VocabError, BYTE_TOKENS, MERGES_FILE, VOCAB_FILE,
};
