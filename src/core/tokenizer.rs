use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::bpe::{byte_pair_encode, MergeRanks, PieceTable};
use super::pretokenize::{segments, Segment, SpecialSplitter, WordSplitter};
use super::streaming::EncodeIter;
use super::vocab::{Merges, Vocab, VocabError};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Vocabulary error: {0}")]
    VocabError(#[from] VocabError),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("Regex compilation error: {0}")]
    RegexError(#[from] fancy_regex::Error),
}

/// Default number of words kept in the encode cache.
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Words longer than this are encoded without touching the cache.
const MAX_CACHED_WORD_LEN: usize = 64;

/// Byte-level BPE tokenizer built from a trained vocabulary and merge list.
///
/// Text is cut on special tokens (longest match first), the rest is split
/// into pattern words, and each word is encoded independently by applying
/// merges in rank order. Everything except the small word cache is read-only
/// after construction, so a `Tokenizer` can be shared across threads.
///
/// # Caching
///
/// Encoded words up to a small length are kept in a fixed-capacity LRU
/// cache ([`DEFAULT_CACHE_SIZE`] entries by default). The cache only saves
/// work; its size never affects the produced ids. Use
/// [`with_cache_size`](Self::with_cache_size) with `0` to disable it.
pub struct Tokenizer {
    encoder: FxHashMap<Vec<u8>, u32>,
    decoder: FxHashMap<u32, Vec<u8>>,
    pieces: PieceTable,
    piece_tokens: Vec<Option<u32>>,
    ranks: MergeRanks,
    num_merges: usize,
    special_tokens: Vec<String>,
    special_ids: Vec<Option<u32>>,
    splitter: Option<SpecialSplitter>,
    words: WordSplitter,
    word_cache: Option<Mutex<LruCache<Vec<u8>, Vec<u32>>>>,
    cache_size: usize,
}

fn new_cache(cache_size: usize) -> Option<Mutex<LruCache<Vec<u8>, Vec<u32>>>> {
    NonZeroUsize::new(cache_size).map(|n| Mutex::new(LruCache::new(n)))
}

impl Tokenizer {
    /// Create a tokenizer from a vocabulary, its merges and special tokens.
    ///
    /// When several ids share the same bytes the lowest id is used for
    /// encoding; when a pair appears more than once in `merges` its first
    /// rank wins. Special tokens missing from the vocabulary are still
    /// split out of the text but produce no id.
    pub fn new<S: AsRef<str>>(
        vocab: &Vocab,
        merges: &Merges,
        special_tokens: &[S],
    ) -> Result<Self, TokenizerError> {
        let mut encoder: FxHashMap<Vec<u8>, u32> = FxHashMap::default();
        let mut decoder: FxHashMap<u32, Vec<u8>> = FxHashMap::default();
        for (id, bytes) in vocab.iter() {
            encoder.entry(bytes.to_vec()).or_insert(id);
            decoder.insert(id, bytes.to_vec());
        }

        let mut pieces = PieceTable::new();
        let mut ranks = MergeRanks::default();
        for (rank, (left, right)) in merges.iter().enumerate() {
            let left = pieces.intern(left);
            let right = pieces.intern(right);
            let merged = pieces.concat(left, right);
            ranks.entry((left, right)).or_insert((rank as u32, merged));
        }

        let piece_tokens = (0..pieces.len())
            .map(|id| encoder.get(pieces.get(id as u32).as_ref()).copied())
            .collect();

        let splitter = SpecialSplitter::new(special_tokens)?;
        let special_tokens: Vec<String> = splitter
            .as_ref()
            .map(|s| s.tokens().to_vec())
            .unwrap_or_default();
        let special_ids = special_tokens
            .iter()
            .map(|token| {
                let id = encoder.get(token.as_bytes()).copied();
                if id.is_none() {
                    log::warn!("special token {token:?} is not in the vocabulary");
                }
                id
            })
            .collect();

        Ok(Self {
            encoder,
            decoder,
            pieces,
            piece_tokens,
            ranks,
            num_merges: merges.len(),
            special_tokens,
            special_ids,
            splitter,
            words: WordSplitter::new()?,
            word_cache: new_cache(DEFAULT_CACHE_SIZE),
            cache_size: DEFAULT_CACHE_SIZE,
        })
    }

    /// Load `vocab.json` / `merges.txt` style files and build a tokenizer.
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>, S: AsRef<str>>(
        vocab_path: P,
        merges_path: Q,
        special_tokens: &[S],
    ) -> Result<Self, TokenizerError> {
        let vocab = Vocab::load(vocab_path)?;
        let merges = Merges::load(merges_path)?;
        Self::new(&vocab, &merges, special_tokens)
    }

    /// Replace the word cache with one holding `cache_size` entries
    /// (0 disables caching).
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.word_cache = new_cache(cache_size);
        self.cache_size = cache_size;
        self
    }

    /// Encode a whole string.
    ///
    /// Equivalent to collecting [`encode_iterable`](Self::encode_iterable)
    /// over a single chunk; the full output is held in memory.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.encode_iterable(std::iter::once(text)).collect()
    }

    /// Lazily encode a stream of text chunks.
    ///
    /// Chunks are pulled from `chunks` only when the ids of the previous
    /// chunk are exhausted, and each chunk is encoded one word at a time, so
    /// memory use does not depend on the length of the stream. Words and
    /// special tokens never span chunks.
    pub fn encode_iterable<I>(&self, chunks: I) -> EncodeIter<&Tokenizer, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        EncodeIter::new(self, chunks.into_iter())
    }

    /// Encode many texts in parallel, preserving order.
    pub fn encode_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Vec<Vec<u32>> {
        texts
            .par_iter()
            .map(|text| self.encode(text.as_ref()))
            .collect()
    }

    /// Encode the pattern words of `text`, which must not contain special
    /// tokens that should be recognised.
    pub fn encode_ordinary(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::with_capacity(text.len() / 3);
        for word in self.words.words(text) {
            self.encode_word_into(word.as_bytes(), &mut ids);
        }
        ids
    }

    /// Split `text` into pre-tokenized units: special tokens whole, other
    /// text as pattern words.
    pub fn pre_tokenize<'a>(&'a self, text: &'a str) -> Vec<&'a str> {
        let mut units = Vec::new();
        for segment in segments(text, self.splitter.as_ref()) {
            match segment {
                Segment::Special(token, _) => units.push(token),
                Segment::Text(chunk) => units.extend(self.words.words(chunk)),
            }
        }
        units
    }

    /// Append the ids of one pattern word to `out`.
    pub(crate) fn encode_word_into(&self, word: &[u8], out: &mut Vec<u32>) {
        let cacheable = word.len() > 1 && word.len() <= MAX_CACHED_WORD_LEN;
        if cacheable {
            if let Some(cache) = &self.word_cache {
                if let Ok(mut cache) = cache.lock() {
                    if let Some(ids) = cache.get(word) {
                        out.extend_from_slice(ids);
                        return;
                    }
                }
            }
        }

        let start = out.len();
        for piece in byte_pair_encode(word, &self.ranks) {
            match self.piece_tokens.get(piece as usize).copied().flatten() {
                Some(id) => out.push(id),
                None => log::warn!(
                    "dropping piece {:?} with no vocabulary id",
                    String::from_utf8_lossy(self.pieces.get(piece))
                ),
            }
        }

        if cacheable {
            if let Some(cache) = &self.word_cache {
                if let Ok(mut cache) = cache.lock() {
                    cache.put(word.to_vec(), out[start..].to_vec());
                }
            }
        }
    }

    pub(crate) fn splitter(&self) -> Option<&SpecialSplitter> {
        self.splitter.as_ref()
    }

    pub(crate) fn word_splitter(&self) -> &WordSplitter {
        &self.words
    }

    /// Id of the special token with index `idx` in the splitter.
    pub(crate) fn special_id(&self, idx: usize) -> Option<u32> {
        self.special_ids.get(idx).copied().flatten()
    }

    /// Decode ids to raw bytes. Unknown ids contribute nothing.
    pub fn decode_bytes(&self, ids: &[u32]) -> Vec<u8> {
        let mut result = Vec::with_capacity(ids.len() * 4);
        for id in ids {
            if let Some(bytes) = self.decoder.get(id) {
                result.extend_from_slice(bytes);
            }
        }
        result
    }

    /// Decode ids to text, replacing malformed UTF-8 with U+FFFD.
    pub fn decode(&self, ids: &[u32]) -> String {
        String::from_utf8_lossy(&self.decode_bytes(ids)).into_owned()
    }

    /// Decode many id lists in parallel.
    pub fn decode_batch(&self, id_lists: &[Vec<u32>]) -> Vec<String> {
        id_lists.par_iter().map(|ids| self.decode(ids)).collect()
    }

    /// Number of entries in the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.decoder.len()
    }

    /// Number of merges the tokenizer was built from.
    pub fn num_merges(&self) -> usize {
        self.num_merges
    }

    /// Id used when encoding `bytes` as a single token.
    pub fn token_to_id(&self, bytes: &[u8]) -> Option<u32> {
        self.encoder.get(bytes).copied()
    }

    /// Bytes of token `id`.
    pub fn id_to_token(&self, id: u32) -> Option<&[u8]> {
        self.decoder.get(&id).map(Vec::as_slice)
    }

    /// Get the encoder map (token bytes -> ID).
    pub fn encoder(&self) -> &FxHashMap<Vec<u8>, u32> {
        &self.encoder
    }

    /// Get the decoder map (token ID -> bytes).
    pub fn decoder(&self) -> &FxHashMap<u32, Vec<u8>> {
        &self.decoder
    }

    /// The special tokens recognised in input text.
    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    /// Clear the word cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.word_cache {
            if let Ok(mut cache) = cache.lock() {
                cache.clear();
            }
        }
    }

    /// Number of words currently cached.
    pub fn cache_len(&self) -> usize {
        self.word_cache
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    /// Capacity of the word cache.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
}

impl Clone for Tokenizer {
    fn clone(&self) -> Self {
        // Caches are not shared between clones.
        Self {
            encoder: self.encoder.clone(),
            decoder: self.decoder.clone(),
            pieces: self.pieces.clone(),
            piece_tokens: self.piece_tokens.clone(),
            ranks: self.ranks.clone(),
            num_merges: self.num_merges,
            special_tokens: self.special_tokens.clone(),
            special_ids: self.special_ids.clone(),
            splitter: self.splitter.clone(),
            words: self.words.clone(),
            word_cache: new_cache(self.cache_size),
            cache_size: self.cache_size,
        }
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("num_merges", &self.num_merges)
            .field("special_tokens", &self.special_tokens)
            .field("cache_size", &self.cache_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Vocabulary and merges learned from "aaabdaaabac" with 259 tokens.
    fn make_test_tokenizer(special_tokens: &[&str]) -> Tokenizer {
        let mut vocab = Vocab::initial(special_tokens);
        let merges = Merges::from(vec![
            (b"a".to_vec(), b"a".to_vec()),
            (b"aa".to_vec(), b"a".to_vec()),
            (b"aaa".to_vec(), b"b".to_vec()),
        ]);
        for (a, b) in merges.iter() {
            vocab.push([a, b].concat());
        }
        Tokenizer::new(&vocab, &merges, special_tokens).unwrap()
    }

    #[test]
    fn test_encode_applies_merges_by_rank() {
        let tokenizer = make_test_tokenizer(&[]);
        assert_eq!(tokenizer.encode("aaab"), vec![258]);
        assert_eq!(tokenizer.encode("aaaa"), vec![256, 256]);
        assert_eq!(tokenizer.encode("abac"), vec![97, 98, 97, 99]);
        assert_eq!(tokenizer.encode("aaabdaaabac"), vec![258, 100, 258, 97, 99]);
    }

    #[test]
    fn test_encode_decode() {
        let tokenizer = make_test_tokenizer(&[]);
        let text = "Hello World, aaab! 日本語\n\n  tabs\tand spaces ";
        let ids = tokenizer.encode(text);
        assert_eq!(tokenizer.decode(&ids), text);
    }

    #[test]
    fn test_words_do_not_merge_across_boundaries() {
        let tokenizer = make_test_tokenizer(&[]);
        // No merge involves the leading space, so it stays a lone byte.
        assert_eq!(tokenizer.encode(" aaa"), vec![32, 257]);
        assert_eq!(tokenizer.encode("aa,a"), vec![256, 44, 97]);
    }

    #[test]
    fn test_special_tokens() {
        let tokenizer = make_test_tokenizer(&["<|endoftext|>"]);
        // The special token occupies id 256, merges follow.
        assert_eq!(tokenizer.encode("<|endoftext|>"), vec![256]);
        assert_eq!(
            tokenizer.encode("aaab<|endoftext|>aaab"),
            vec![259, 256, 259]
        );
        let ids = tokenizer.encode("x<|endoftext|><|endoftext|>y");
        assert_eq!(ids, vec![120, 256, 256, 121]);
        assert_eq!(tokenizer.decode(&ids), "x<|endoftext|><|endoftext|>y");
    }

    #[test]
    fn test_overlapping_special_tokens_prefer_longest() {
        let specials = ["<|endoftext|>", "<|endoftext|><|endoftext|>"];
        let tokenizer = make_test_tokenizer(&specials);
        assert_eq!(tokenizer.encode("a<|endoftext|><|endoftext|>b"), vec![97, 257, 98]);
        assert_eq!(tokenizer.encode("<|endoftext|>"), vec![256]);
    }

    #[test]
    fn test_special_token_missing_from_vocab_is_dropped() {
        let vocab = Vocab::initial::<&str>(&[]);
        let tokenizer = Tokenizer::new(&vocab, &Merges::new(), &["<pad>"]).unwrap();
        assert_eq!(tokenizer.encode("a<pad>b"), vec![97, 98]);
    }

    #[test]
    fn test_unknown_pieces_are_dropped() {
        // Vocabulary without the byte 'z'.
        let vocab: Vocab = (0u8..=255)
            .filter(|&b| b != b'z')
            .map(|b| (b as u32, vec![b]))
            .collect();
        let tokenizer = Tokenizer::new(&vocab, &Merges::new(), &[] as &[&str]).unwrap();
        assert_eq!(tokenizer.encode("aza"), vec![97, 97]);
    }

    #[test]
    fn test_duplicate_vocab_bytes_use_lowest_id() {
        let mut vocab = Vocab::initial::<&str>(&[]);
        vocab.push(b"a".to_vec());
        let tokenizer = Tokenizer::new(&vocab, &Merges::new(), &[] as &[&str]).unwrap();
        assert_eq!(tokenizer.encode("a"), vec![97]);
        assert_eq!(tokenizer.decode(&[256]), "a");
    }

    #[test]
    fn test_decode_unknown_and_invalid() {
        let tokenizer = make_test_tokenizer(&[]);
        assert_eq!(tokenizer.decode(&[104, 99_999, 105]), "hi");
        // A lone continuation byte becomes U+FFFD.
        assert_eq!(tokenizer.decode(&[0x80, 97]), "\u{FFFD}a");
        assert_eq!(tokenizer.decode_bytes(&[0x80, 97]), vec![0x80, 97]);
    }

    #[test]
    fn test_batch_encode() {
        let tokenizer = make_test_tokenizer(&[]);
        let texts = vec!["aaab".to_string(), "abac".to_string(), String::new()];
        let batch = tokenizer.encode_batch(&texts);
        assert_eq!(batch, vec![vec![258], vec![97, 98, 97, 99], vec![]]);
        assert_eq!(tokenizer.decode_batch(&batch), texts);
    }

    #[test]
    fn test_cache_works() {
        let tokenizer = make_test_tokenizer(&[]);
        let first = tokenizer.encode("aaab aaab");
        assert!(tokenizer.cache_len() > 0);
        assert_eq!(tokenizer.encode("aaab aaab"), first);

        tokenizer.clear_cache();
        assert_eq!(tokenizer.cache_len(), 0);
    }

    #[test]
    fn test_cache_disabled() {
        let tokenizer = make_test_tokenizer(&[]).with_cache_size(0);
        assert_eq!(tokenizer.encode("aaab aaab"), vec![258, 32, 258]);
        assert_eq!(tokenizer.cache_len(), 0);
        assert_eq!(tokenizer.cache_size(), 0);
    }

    #[test]
    fn test_cache_is_bounded() {
        let tokenizer = make_test_tokenizer(&[]).with_cache_size(4);
        let text: String = (0..50).map(|i| format!(" w{i}")).collect();
        let cached = tokenizer.encode(&text);
        assert!(tokenizer.cache_len() <= 4);
        assert_eq!(cached, make_test_tokenizer(&[]).with_cache_size(0).encode(&text));
    }

    #[test]
    fn test_pre_tokenize() {
        let tokenizer = make_test_tokenizer(&["<|endoftext|>"]);
        assert_eq!(
            tokenizer.pre_tokenize("Hi there<|endoftext|>you're"),
            vec!["Hi", " there", "<|endoftext|>", "you", "'re"]
        );
    }

    #[test]
    fn test_encode_ordinary_ignores_specials() {
        let tokenizer = make_test_tokenizer(&["<|endoftext|>"]);
        let ids = tokenizer.encode_ordinary("<|endoftext|>");
        assert!(!ids.contains(&256));
        assert_eq!(tokenizer.decode(&ids), "<|endoftext|>");
    }

    #[test]
    fn test_clone_shares_tables() {
        let tokenizer = make_test_tokenizer(&[]);
        let cloned = tokenizer.clone();
        assert_eq!(cloned.encode("aaab"), tokenizer.encode("aaab"));
        assert_eq!(cloned.vocab_size(), 259);
        assert_eq!(cloned.num_merges(), 3);
    }

    #[test]
    fn test_tokenizer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Tokenizer>();
    }
}
