//! Byte-level BPE: train a vocabulary from a corpus, then encode and decode
//! text with it.
//!
//! ```ignore
//! use bytebpe::{Tokenizer, Trainer, TrainerConfig};
//!
//! let trainer = Trainer::new(TrainerConfig::new(10_000, &["<|endoftext|>"]));
//! let (vocab, merges) = trainer.train_from_file("corpus.txt")?;
//! bytebpe::save_output("out", &vocab, &merges)?;
//!
//! let tokenizer = Tokenizer::new(&vocab, &merges, &["<|endoftext|>"])?;
//! let ids = tokenizer.encode("Hello, world!<|endoftext|>");
//! assert_eq!(tokenizer.decode(&ids), "Hello, world!<|endoftext|>");
//! ```

pub mod core;
#[cfg(feature = "python")]
mod python;

pub use crate::core::{
    load_output, save_output, train_bpe, EncodeIter, Merges, StreamingDecoder, Tokenizer,
    TokenizerError, TrainError, Trainer, TrainerConfig, Vocab, VocabError,
};
