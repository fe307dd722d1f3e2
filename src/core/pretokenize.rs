//! Pre-tokenization: special-token splitting and the GPT-2 word pattern.
//!
//! Text is first cut on special tokens (longest match wins at each position),
//! then every non-special segment is split into "words" with the GPT-2
//! pattern:
//!
//! ```text
//! '(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+
//! ```
//!
//! The pattern has no lookbehind and every character matches one of its
//! alternatives, so a word search can be resumed at any word boundary with
//! [`WordSplitter::word_end`].

use aho_corasick::{AhoCorasick, MatchKind};
use fancy_regex::Regex;
use rustc_hash::FxHashMap;

/// The GPT-2 pre-tokenization pattern.
pub const GPT2_PATTERN: &str =
    r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Distinct byte sequences of pre-tokenized words and their occurrence counts.
pub type WordCounts = FxHashMap<Vec<u8>, u64>;

/// Compiled word pattern.
#[derive(Debug, Clone)]
pub struct WordSplitter {
    regex: Regex,
}

impl WordSplitter {
    /// Compile the GPT-2 pattern.
    pub fn new() -> Result<Self, fancy_regex::Error> {
        Self::with_pattern(GPT2_PATTERN)
    }

    /// Compile a custom pattern. It should not use lookbehind, since words
    /// are searched one at a time from the previous word's end.
    pub fn with_pattern(pattern: &str) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// The pattern source.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// End offset of the word that starts at byte offset `pos` of `text`.
    ///
    /// Returns `pos` only when `pos` is at the end of `text`. Text the
    /// pattern skips becomes a word of its own, and if the regex engine gives
    /// up (backtrack limit) the rest of `text` is one word, so the words
    /// always concatenate back to `text`.
    pub fn word_end(&self, text: &str, pos: usize) -> usize {
        if pos >= text.len() {
            return text.len();
        }
        match self.regex.find_from_pos(text, pos) {
            Ok(Some(m)) if m.start() > pos => m.start(),
            Ok(Some(m)) if m.end() > pos => m.end(),
            Ok(_) => text.len(),
            Err(e) => {
                log::warn!("word pattern failed at offset {}: {}", pos, e);
                text.len()
            }
        }
    }

    /// Split a segment without special tokens into pattern words.
    pub fn words<'t>(&self, text: &'t str) -> Words<'_, 't> {
        Words {
            splitter: self,
            text,
            pos: 0,
        }
    }
}

/// Iterator over the words of a segment, see [`WordSplitter::words`].
#[derive(Debug, Clone)]
pub struct Words<'w, 't> {
    splitter: &'w WordSplitter,
    text: &'t str,
    pos: usize,
}

impl<'w, 't> Iterator for Words<'w, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        if self.pos >= self.text.len() {
            return None;
        }
        let end = self.splitter.word_end(self.text, self.pos);
        let word = &self.text[self.pos..end];
        self.pos = end;
        Some(word)
    }
}

/// A piece of input text after special-token splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Ordinary text, to be scanned into words.
    Text(&'a str),
    /// An exact occurrence of the special token with the given index.
    Special(&'a str, usize),
}

/// Capturing splitter for special tokens.
///
/// Built on an Aho-Corasick automaton in leftmost-longest mode, so when one
/// special token is a prefix of another the longer one is matched.
#[derive(Debug, Clone)]
pub struct SpecialSplitter {
    matcher: AhoCorasick,
    tokens: Vec<String>,
}

impl SpecialSplitter {
    /// Build a splitter, or `None` when no non-empty special token is given.
    pub fn new<S: AsRef<str>>(
        special_tokens: &[S],
    ) -> Result<Option<Self>, aho_corasick::BuildError> {
        let mut tokens: Vec<String> = Vec::with_capacity(special_tokens.len());
        for token in special_tokens {
            let token = token.as_ref();
            if !token.is_empty() && !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_string());
            }
        }
        if tokens.is_empty() {
            return Ok(None);
        }

        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&tokens)?;
        Ok(Some(Self { matcher, tokens }))
    }

    /// The special tokens recognised by this splitter, deduplicated.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Find the next special token at or after byte offset `from`.
    ///
    /// Returns `(start, end, token_index)` with offsets into `text`.
    pub fn find_from(&self, text: &str, from: usize) -> Option<(usize, usize, usize)> {
        self.matcher
            .find(&text[from..])
            .map(|m| (from + m.start(), from + m.end(), m.pattern().as_usize()))
    }

    /// Lazily split `text` into text and special-token segments.
    pub fn split<'a>(&'a self, text: &'a str) -> Segments<'a> {
        Segments {
            splitter: Some(self),
            text,
            pos: 0,
            pending: None,
        }
    }
}

/// Iterator returned by [`segments`] and [`SpecialSplitter::split`].
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    splitter: Option<&'a SpecialSplitter>,
    text: &'a str,
    pos: usize,
    pending: Option<(usize, usize, usize)>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.pos >= self.text.len() {
            return None;
        }

        let Some(splitter) = self.splitter else {
            self.pos = self.text.len();
            return Some(Segment::Text(self.text));
        };

        if self.pending.is_none() {
            self.pending = splitter.find_from(self.text, self.pos);
        }

        match self.pending {
            Some((start, _, _)) if self.pos < start => {
                let segment = Segment::Text(&self.text[self.pos..start]);
                self.pos = start;
                Some(segment)
            }
            Some((start, end, idx)) => {
                self.pending = None;
                self.pos = end;
                Some(Segment::Special(&self.text[start..end], idx))
            }
            None => {
                let segment = Segment::Text(&self.text[self.pos..]);
                self.pos = self.text.len();
                Some(segment)
            }
        }
    }
}

/// Split `text` on special tokens when a splitter is configured; otherwise
/// yield the whole text as one segment. Empty segments are never produced.
pub fn segments<'a>(text: &'a str, splitter: Option<&'a SpecialSplitter>) -> Segments<'a> {
    Segments {
        splitter,
        text,
        pos: 0,
        pending: None,
    }
}

/// Count pre-tokenized words of `text` into `counts`.
///
/// Special-token segments are counted under their own bytes; every other
/// segment contributes one entry per pattern word.
pub fn count_words_into(
    text: &str,
    words: &WordSplitter,
    splitter: Option<&SpecialSplitter>,
    counts: &mut WordCounts,
) {
    for segment in segments(text, splitter) {
        match segment {
            Segment::Special(token, _) => {
                *counts.entry(token.as_bytes().to_vec()).or_insert(0) += 1;
            }
            Segment::Text(chunk) => {
                for word in words.words(chunk) {
                    *counts.entry(word.as_bytes().to_vec()).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Pre-tokenize `text` into a fresh word-frequency table.
pub fn count_words(
    text: &str,
    words: &WordSplitter,
    splitter: Option<&SpecialSplitter>,
) -> WordCounts {
    let mut counts = WordCounts::default();
    count_words_into(text, words, splitter, &mut counts);
    counts
}
