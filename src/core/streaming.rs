//! Streaming encode and UTF-8 safe streaming decode.
//!
//! [`EncodeIter`] turns a stream of text chunks into token ids one at a time,
//! holding only the current chunk and the ids of the current word.
//! [`StreamingDecoder`] goes the other way for token-by-token output, where a
//! token may end in the middle of a multi-byte character.

use std::borrow::Borrow;

use super::tokenizer::Tokenizer;

/// Lazy iterator returned by [`Tokenizer::encode_iterable`].
///
/// A new chunk is pulled from the source only once every id of the previous
/// chunk has been yielded, and within a chunk words are encoded one at a
/// time. Dropping the iterator stops all work.
///
/// Like [`StreamingDecoder`], the tokenizer may be borrowed or shared.
pub struct EncodeIter<T, I>
where
    T: Borrow<Tokenizer>,
    I: Iterator,
    I::Item: AsRef<str>,
{
    tokenizer: T,
    source: I,
    chunk: Option<I::Item>,
    pos: usize,
    /// Next special token in the current chunk: `None` when not searched
    /// yet, `Some(None)` when there is none left.
    next_special: Option<Option<(usize, usize, usize)>>,
    pending: Vec<u32>,
    pending_pos: usize,
}

impl<T, I> EncodeIter<T, I>
where
    T: Borrow<Tokenizer>,
    I: Iterator,
    I::Item: AsRef<str>,
{
    pub fn new(tokenizer: T, source: I) -> Self {
        Self {
            tokenizer,
            source,
            chunk: None,
            pos: 0,
            next_special: None,
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    /// The chunk source, for callers that need to inspect it after the
    /// iterator stops.
    pub fn source_mut(&mut self) -> &mut I {
        &mut self.source
    }

    /// Encode the next word or special token of the current chunk into
    /// `pending`. Returns `false` once the chunk is used up.
    fn advance(&mut self) -> bool {
        let tokenizer: &Tokenizer = self.tokenizer.borrow();
        let Some(chunk) = self.chunk.as_ref() else {
            return false;
        };
        let text = chunk.as_ref();
        if self.pos >= text.len() {
            return false;
        }

        self.pending.clear();
        self.pending_pos = 0;

        let mut limit = text.len();
        if let Some(splitter) = tokenizer.splitter() {
            let next = *self
                .next_special
                .get_or_insert_with(|| splitter.find_from(text, self.pos));
            if let Some((start, end, idx)) = next {
                if start == self.pos {
                    if let Some(id) = tokenizer.special_id(idx) {
                        self.pending.push(id);
                    }
                    self.pos = end;
                    self.next_special = None;
                    return true;
                }
                limit = start;
            }
        }

        // The pattern must not look past the next special token.
        let end = tokenizer.word_splitter().word_end(&text[..limit], self.pos);
        tokenizer.encode_word_into(text[self.pos..end].as_bytes(), &mut self.pending);
        self.pos = end;
        true
    }
}

impl<T, I> Iterator for EncodeIter<T, I>
where
    T: Borrow<Tokenizer>,
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if let Some(&id) = self.pending.get(self.pending_pos) {
                self.pending_pos += 1;
                return Some(id);
            }

            if self.chunk.is_none() {
                self.chunk = Some(self.source.next()?);
                self.pos = 0;
                self.next_special = None;
            }

            if !self.advance() {
                self.chunk = None;
            }
        }
    }
}

/// A streaming decoder that handles incomplete UTF-8 sequences across token
/// boundaries.
///
/// When decoding tokens one at a time, a token's bytes may end in the middle
/// of a multi-byte character. This decoder buffers such a tail and only
/// returns text once it is complete. Malformed bytes that can never become
/// valid are emitted as U+FFFD.
///
/// The tokenizer may be borrowed (`&Tokenizer`) or shared (`Arc<Tokenizer>`).
///
/// # Example
///
/// ```ignore
/// let mut decoder = StreamingDecoder::new(&tokenizer);
/// for id in tokenizer.encode_iterable(lines) {
///     if let Some(text) = decoder.add_token(id) {
///         print!("{}", text);
///     }
/// }
/// print!("{}", decoder.flush());
/// ```
pub struct StreamingDecoder<T: Borrow<Tokenizer>> {
    tokenizer: T,
    buffer: Vec<u8>,
}

impl<T: Borrow<Tokenizer>> StreamingDecoder<T> {
    pub fn new(tokenizer: T) -> Self {
        Self {
            tokenizer,
            buffer: Vec::with_capacity(16),
        }
    }

    /// Add a token and return any complete UTF-8 text.
    ///
    /// Unknown ids are ignored.
    pub fn add_token(&mut self, token_id: u32) -> Option<String> {
        let tokenizer: &Tokenizer = self.tokenizer.borrow();
        if let Some(bytes) = tokenizer.id_to_token(token_id) {
            self.buffer.extend_from_slice(bytes);
        }
        self.extract_complete_utf8()
    }

    /// Add multiple tokens at once and return complete UTF-8 text.
    pub fn add_tokens(&mut self, token_ids: &[u32]) -> Option<String> {
        let tokenizer: &Tokenizer = self.tokenizer.borrow();
        for &token_id in token_ids {
            if let Some(bytes) = tokenizer.id_to_token(token_id) {
                self.buffer.extend_from_slice(bytes);
            }
        }
        self.extract_complete_utf8()
    }

    /// Flush any remaining buffered bytes, replacing an incomplete trailing
    /// sequence with U+FFFD.
    pub fn flush(&mut self) -> String {
        if self.buffer.is_empty() {
            return String::new();
        }
        let result = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        result
    }

    /// Reset the decoder state, discarding any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn extract_complete_utf8(&mut self) -> Option<String> {
        let ready = self.buffer.len() - incomplete_tail_len(&self.buffer);
        if ready == 0 {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buffer[..ready]).into_owned();
        self.buffer.drain(..ready);
        Some(text)
    }
}

/// Length of a trailing sequence that is a valid but unfinished UTF-8
/// prefix, which may still be completed by later bytes.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(bad) => rest = &rest[e.valid_up_to() + bad..],
            },
        }
    }
}
