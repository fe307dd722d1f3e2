//! Python bindings for the bytebpe trainer and tokenizer.
//!
//! # Thread Safety
//!
//! The tokenizer is thread-safe and can be shared across Python threads.
//! Training and batch encoding release the GIL while Rust does the work.
//!
//! # Example
//!
//! ```python
//! from bytebpe import Tokenizer, train_bpe
//!
//! vocab, merges = train_bpe("corpus.txt", 10000, ["<|endoftext|>"])
//! tokenizer = Tokenizer(vocab, merges, ["<|endoftext|>"])
//!
//! ids = tokenizer.encode("Hello, world!")
//! text = tokenizer.decode(ids)
//!
//! # Memory-bounded encoding of a large file
//! with open("corpus.txt") as f:
//!     for token_id in tokenizer.encode_iterable(f):
//!         ...
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyIterator, PyList};

use crate::core::{
    save_output, train_bpe as train_bpe_file, EncodeIter, Merges, StreamingDecoder, Tokenizer,
    TokenizerError, TrainError, Vocab, VocabError,
};

fn train_error(e: TrainError) -> PyErr {
    match e {
        TrainError::IoError(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn vocab_error(e: VocabError) -> PyErr {
    match e {
        VocabError::IoError(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn tokenizer_error(e: TokenizerError) -> PyErr {
    match e {
        TokenizerError::VocabError(e) => vocab_error(e),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn vocab_to_py<'py>(py: Python<'py>, vocab: &Vocab) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    for (id, bytes) in vocab.iter() {
        dict.set_item(id, PyBytes::new_bound(py, bytes))?;
    }
    Ok(dict)
}

fn merges_to_py<'py>(py: Python<'py>, merges: &Merges) -> Bound<'py, PyList> {
    let pairs: Vec<_> = merges
        .iter()
        .map(|(a, b)| (PyBytes::new_bound(py, a), PyBytes::new_bound(py, b)))
        .collect();
    PyList::new_bound(py, pairs)
}

/// Train a byte-level BPE vocabulary on a corpus file.
///
/// Args:
///     input_path: Path to a UTF-8 text corpus
///     vocab_size: Target vocabulary size (256 bytes + special tokens + merges)
///     special_tokens: Special tokens, assigned ids from 256 in order
///     output_dir: Optional directory to write vocab.json and merges.txt into
///
/// Returns:
///     Tuple of (vocab: dict[int, bytes], merges: list[tuple[bytes, bytes]])
#[pyfunction]
#[pyo3(signature = (input_path, vocab_size, special_tokens=None, output_dir=None))]
pub fn train_bpe<'py>(
    py: Python<'py>,
    input_path: PathBuf,
    vocab_size: usize,
    special_tokens: Option<Vec<String>>,
    output_dir: Option<PathBuf>,
) -> PyResult<(Bound<'py, PyDict>, Bound<'py, PyList>)> {
    let special_tokens = special_tokens.unwrap_or_default();
    let (vocab, merges) = py
        .allow_threads(|| train_bpe_file(&input_path, vocab_size, &special_tokens))
        .map_err(train_error)?;

    if let Some(dir) = output_dir {
        save_output(dir, &vocab, &merges).map_err(vocab_error)?;
    }

    Ok((vocab_to_py(py, &vocab)?, merges_to_py(py, &merges)))
}

/// Python wrapper for the Rust Tokenizer.
#[pyclass(name = "Tokenizer")]
pub struct PyTokenizer {
    inner: Arc<Tokenizer>,
}

#[pymethods]
impl PyTokenizer {
    /// Create a tokenizer from an in-memory vocabulary and merge list.
    ///
    /// Args:
    ///     vocab: dict mapping token id to token bytes
    ///     merges: list of (bytes, bytes) pairs in merge order
    ///     special_tokens: Optional list of special token strings
    #[new]
    #[pyo3(signature = (vocab, merges, special_tokens=None))]
    fn new(
        vocab: HashMap<u32, Vec<u8>>,
        merges: Vec<(Vec<u8>, Vec<u8>)>,
        special_tokens: Option<Vec<String>>,
    ) -> PyResult<Self> {
        let vocab: Vocab = vocab.into_iter().collect();
        let merges = Merges::from(merges);
        let special = special_tokens.unwrap_or_default();

        let inner = Tokenizer::new(&vocab, &merges, &special).map_err(tokenizer_error)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create a tokenizer from files written by training.
    ///
    /// Args:
    ///     vocab_path: Path to vocab.json
    ///     merges_path: Path to merges.txt
    ///     special_tokens: Optional list of special token strings
    ///
    /// Returns:
    ///     Tokenizer instance
    #[staticmethod]
    #[pyo3(signature = (vocab_path, merges_path, special_tokens=None))]
    fn from_files(
        vocab_path: PathBuf,
        merges_path: PathBuf,
        special_tokens: Option<Vec<String>>,
    ) -> PyResult<Self> {
        let special = special_tokens.unwrap_or_default();
        let inner =
            Tokenizer::from_files(vocab_path, merges_path, &special).map_err(tokenizer_error)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Encode text to token IDs.
    ///
    /// Args:
    ///     text: Input text to encode
    ///
    /// Returns:
    ///     List of token IDs
    fn encode(&self, text: &str) -> Vec<u32> {
        self.inner.encode(text)
    }

    /// Lazily encode an iterable of strings, such as an open file.
    ///
    /// Chunks are read from the iterable only as the returned iterator is
    /// consumed.
    ///
    /// Args:
    ///     iterable: Any iterable yielding str
    ///
    /// Returns:
    ///     Iterator of token IDs
    fn encode_iterable(&self, iterable: &Bound<'_, PyAny>) -> PyResult<PyEncodeIterator> {
        let chunks = PyChunks {
            source: iterable.iter()?.unbind(),
            error: None,
        };
        Ok(PyEncodeIterator {
            inner: EncodeIter::new(Arc::clone(&self.inner), chunks),
        })
    }

    /// Batch encode multiple texts in parallel.
    ///
    /// Args:
    ///     texts: List of texts to encode
    ///
    /// Returns:
    ///     List of token ID lists
    fn encode_batch(&self, py: Python<'_>, texts: Vec<String>) -> Vec<Vec<u32>> {
        py.allow_threads(|| self.inner.encode_batch(&texts))
    }

    /// Decode token IDs to a string, replacing invalid UTF-8.
    ///
    /// Args:
    ///     ids: List of token IDs
    ///
    /// Returns:
    ///     Decoded string
    fn decode(&self, ids: Vec<u32>) -> String {
        self.inner.decode(&ids)
    }

    /// Decode token IDs to bytes.
    ///
    /// Args:
    ///     ids: List of token IDs
    ///
    /// Returns:
    ///     Decoded bytes
    fn decode_bytes(&self, ids: Vec<u32>) -> Cow<'static, [u8]> {
        Cow::Owned(self.inner.decode_bytes(&ids))
    }

    /// Split text into pre-tokenized units.
    fn pre_tokenize(&self, text: &str) -> Vec<String> {
        self.inner
            .pre_tokenize(text)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Get the vocabulary size (including special tokens).
    #[getter]
    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    /// Get the special tokens.
    #[getter]
    fn special_tokens(&self) -> Vec<String> {
        self.inner.special_tokens().to_vec()
    }

    /// Create a streaming decoder for UTF-8 safe token-by-token decoding.
    ///
    /// Returns:
    ///     StreamingDecoder instance
    fn streaming_decoder(&self) -> PyStreamingDecoder {
        PyStreamingDecoder {
            inner: StreamingDecoder::new(Arc::clone(&self.inner)),
        }
    }

    /// Clear the word cache.
    fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    fn __repr__(&self) -> String {
        format!(
            "Tokenizer(vocab_size={}, merges={}, special_tokens={:?})",
            self.inner.vocab_size(),
            self.inner.num_merges(),
            self.inner.special_tokens()
        )
    }
}

/// Strings pulled from a Python iterator one at a time.
///
/// Iteration stops at the first error, which is kept for the caller.
struct PyChunks {
    source: Py<PyIterator>,
    error: Option<PyErr>,
}

impl Iterator for PyChunks {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.error.is_some() {
            return None;
        }
        Python::with_gil(|py| {
            let mut source = self.source.bind(py).clone();
            match source.next()?.and_then(|item| item.extract::<String>()) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    self.error = Some(e);
                    None
                }
            }
        })
    }
}

/// Iterator returned by `Tokenizer.encode_iterable`.
///
/// Holds at most one source chunk and the ids of one word at a time.
#[pyclass(name = "EncodeIterator")]
pub struct PyEncodeIterator {
    inner: EncodeIter<Arc<Tokenizer>, PyChunks>,
}

#[pymethods]
impl PyEncodeIterator {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&mut self) -> PyResult<Option<u32>> {
        if let Some(id) = self.inner.next() {
            return Ok(Some(id));
        }
        match self.inner.source_mut().error.take() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Python wrapper for the streaming decoder.
///
/// Buffers incomplete UTF-8 sequences and only emits complete characters.
#[pyclass(name = "StreamingDecoder")]
pub struct PyStreamingDecoder {
    inner: StreamingDecoder<Arc<Tokenizer>>,
}

#[pymethods]
impl PyStreamingDecoder {
    /// Add a token and return any complete UTF-8 characters.
    ///
    /// Args:
    ///     token_id: The token ID to decode
    ///
    /// Returns:
    ///     String of complete characters, or None if still buffering
    fn add_token(&mut self, token_id: u32) -> Option<String> {
        self.inner.add_token(token_id)
    }

    /// Add multiple tokens at once and return complete UTF-8 characters.
    fn add_tokens(&mut self, token_ids: Vec<u32>) -> Option<String> {
        self.inner.add_tokens(&token_ids)
    }

    /// Flush any remaining buffered bytes.
    ///
    /// Returns:
    ///     Any remaining buffered content, with U+FFFD for incomplete bytes
    fn flush(&mut self) -> String {
        self.inner.flush()
    }

    /// Reset the decoder state, discarding any buffered bytes.
    fn reset(&mut self) {
        self.inner.reset();
    }

    #[getter]
    fn has_pending(&self) -> bool {
        self.inner.has_pending()
    }

    #[getter]
    fn pending_bytes(&self) -> usize {
        self.inner.pending_bytes()
    }

    fn __repr__(&self) -> String {
        format!("StreamingDecoder(pending_bytes={})", self.inner.pending_bytes())
    }
}
