mod bindings;

use crate::core::{DEFAULT_SPLIT_TOKEN, GPT2_PATTERN};
pub use bindings::{train_bpe, PyEncodeIterator, PyStreamingDecoder, PyTokenizer};

use pyo3::prelude::*;

/// bytebpe - byte-level BPE trainer and tokenizer with Python bindings
///
/// - Incremental pair statistics with a lazy max-heap for training
/// - Rayon parallelism for corpus pre-tokenization and batch encoding
/// - Memory-bounded streaming encode over any iterable of strings
/// - Aho-Corasick for special token matching
/// - Bounded LRU cache for encoded words
/// - UTF-8 streaming decoder
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(train_bpe, m)?)?;
    m.add_class::<PyTokenizer>()?;
    m.add_class::<PyEncodeIterator>()?;
    m.add_class::<PyStreamingDecoder>()?;
    m.add("GPT2_PATTERN", GPT2_PATTERN)?;
    m.add("DEFAULT_SPLIT_TOKEN", DEFAULT_SPLIT_TOKEN)?;
    Ok(())
}
