//! Corpus ingestion for training.
//!
//! A corpus file is cut into chunks whose interior boundaries sit at the
//! start of a delimiter token (normally `<|endoftext|>`), so no chunk ever
//! splits a document separator. Chunks are read, decoded and pre-tokenized
//! independently on the rayon pool; their word counts are summed, which
//! makes the result independent of the chunk count.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use aho_corasick::AhoCorasick;
use rayon::prelude::*;

use super::pretokenize::{count_words, SpecialSplitter, WordCounts, WordSplitter};

/// Size of the blocks scanned forward when looking for a delimiter.
const MINI_CHUNK_SIZE: usize = 4096;

/// Find chunk boundaries in a seekable byte stream.
///
/// Returns sorted, deduplicated offsets that start at 0 and end at the stream
/// length. Each interior offset starts at an even split of the stream and is
/// moved forward to the start of the next `split_token`, or to the end of the
/// stream when no further delimiter exists. Fewer chunks than requested may
/// come back when delimiters are sparse.
pub fn find_chunk_boundaries<R: Read + Seek>(
    reader: &mut R,
    desired_chunks: usize,
    split_token: &[u8],
) -> io::Result<Vec<u64>> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let desired_chunks = desired_chunks.max(1) as u64;
    let chunk_size = file_size / desired_chunks;

    let mut boundaries: Vec<u64> = (0..=desired_chunks).map(|i| i * chunk_size).collect();
    if let Some(last) = boundaries.last_mut() {
        *last = file_size;
    }

    if split_token.is_empty() || chunk_size == 0 {
        boundaries.dedup();
        return Ok(boundaries);
    }

    let finder = AhoCorasick::new([split_token])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let last_idx = boundaries.len() - 1;
    let mut mini_chunk = vec![0u8; MINI_CHUNK_SIZE];
    for boundary in boundaries.iter_mut().take(last_idx).skip(1) {
        *boundary = next_delimiter(
            reader,
            *boundary,
            file_size,
            &finder,
            split_token.len(),
            &mut mini_chunk,
        )?;
    }

    boundaries.sort_unstable();
    boundaries.dedup();
    Ok(boundaries)
}

/// Offset of the first delimiter matched by `finder` at or after `start`,
/// or `file_size`.
fn next_delimiter<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    file_size: u64,
    finder: &AhoCorasick,
    token_len: usize,
    mini_chunk: &mut [u8],
) -> io::Result<u64> {
    reader.seek(SeekFrom::Start(start))?;

    // `window` holds the unmatched tail of the previous block so that a
    // delimiter straddling two reads is still found.
    let mut window: Vec<u8> = Vec::with_capacity(mini_chunk.len() + token_len);
    let mut window_start = start;

    loop {
        let read = reader.read(mini_chunk)?;
        if read == 0 {
            return Ok(file_size);
        }
        window.extend_from_slice(&mini_chunk[..read]);

        if let Some(found) = finder.find(&window) {
            return Ok(window_start + found.start() as u64);
        }

        let keep = (token_len - 1).min(window.len());
        let drop = window.len() - keep;
        window.drain(..drop);
        window_start += drop as u64;
    }
}

/// Decode bytes as UTF-8, dropping every malformed sequence.
pub fn decode_ignoring_invalid(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

fn read_range(path: &Path, start: u64, end: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn merge_counts(a: WordCounts, b: WordCounts) -> WordCounts {
    let (mut into, from) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    for (word, count) in from {
        *into.entry(word).or_insert(0) += count;
    }
    into
}

/// Pre-tokenize a corpus file into word counts.
///
/// The file is cut with [`find_chunk_boundaries`] on `split_token`; each
/// chunk is read, decoded with [`decode_ignoring_invalid`] and counted in
/// parallel. Chunking only preserves the counts when `split_token` is a
/// special token recognised by `splitter`, since words are never formed
/// across a special token. An empty `split_token` reads the file as one
/// chunk.
pub fn pretokenize_file(
    path: &Path,
    num_chunks: usize,
    split_token: &[u8],
    words: &WordSplitter,
    splitter: Option<&SpecialSplitter>,
) -> io::Result<WordCounts> {
    let num_chunks = if split_token.is_empty() { 1 } else { num_chunks };
    let boundaries = {
        let mut file = File::open(path)?;
        find_chunk_boundaries(&mut file, num_chunks, split_token)?
    };

    log::debug!(
        "pre-tokenizing {} in {} chunk(s)",
        path.display(),
        boundaries.len().saturating_sub(1)
    );

    boundaries
        .par_windows(2)
        .map(|range| {
            let bytes = read_range(path, range[0], range[1])?;
            let text = decode_ignoring_invalid(&bytes);
            Ok(count_words(&text, words, splitter))
        })
        .try_reduce(WordCounts::default, |a, b| Ok(merge_counts(a, b)))
}
