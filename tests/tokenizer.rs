//! Integration tests for encoding and decoding with a trained tokenizer.
//!
//! A small vocabulary is trained once per test from an in-memory corpus, then
//! exercised through encode, streaming encode and the streaming decoder.

use std::sync::Arc;

use bytebpe::{StreamingDecoder, Tokenizer, Trainer, TrainerConfig};

const EOT: &str = "<|endoftext|>";

/// Test basic encoding and decoding roundtrip.
#[test]
fn test_encode_decode_roundtrip() {
    let tokenizer = create_tokenizer(&[EOT]);

    let test_cases = vec![
        "",
        "Hello, world!",
        "The quick brown fox jumps over the lazy dog.",
        "It's what we're doing, isn't it?",
        "1234567890",
        "Special characters: !@#$%^&*()",
        "Multi-line\ntext\nwith\nnewlines",
        "  leading and trailing spaces   ",
        "Unicode: こんにちは 世界 🦀",
        "Mixed café naïve über",
    ];

    for text in test_cases {
        let tokens = tokenizer.encode(text);
        let decoded = tokenizer.decode(&tokens);
        assert_eq!(decoded, text, "Roundtrip failed for: {:?}", text);
    }
}

/// Test that training actually compresses text it has seen.
#[test]
fn test_trained_merges_compress() {
    let tokenizer = create_tokenizer(&[EOT]);
    let text = "the quick brown fox jumps over the lazy dog";
    let tokens = tokenizer.encode(text);
    assert!(
        tokens.len() * 3 < text.len() * 2,
        "Expected well under {} tokens, got {}",
        text.len(),
        tokens.len()
    );
}

/// Test that special tokens are encoded atomically.
#[test]
fn test_special_tokens_are_atomic() {
    let tokenizer = create_tokenizer(&[EOT]);
    let eot_id = tokenizer.token_to_id(EOT.as_bytes()).unwrap();

    let tokens = tokenizer.encode("Hello<|endoftext|>World");
    assert_eq!(tokens.iter().filter(|&&t| t == eot_id).count(), 1);
    assert_eq!(tokenizer.decode(&tokens), "Hello<|endoftext|>World");

    // Text on either side of a special token is encoded independently.
    let left = tokenizer.encode("Hello");
    let right = tokenizer.encode("World");
    let mut expected = left;
    expected.push(eot_id);
    expected.extend(right);
    assert_eq!(tokens, expected);
}

/// Test that adjacent special tokens each map to their own id.
#[test]
fn test_adjacent_special_tokens() {
    let tokenizer = create_tokenizer(&[EOT]);
    let eot_id = tokenizer.token_to_id(EOT.as_bytes()).unwrap();

    let tokens = tokenizer.encode("<|endoftext|><|endoftext|>");
    assert_eq!(tokens, vec![eot_id, eot_id]);
}

/// Test that a longer overlapping special token takes precedence.
#[test]
fn test_overlapping_special_tokens() {
    let double = "<|endoftext|><|endoftext|>";
    let tokenizer = create_tokenizer(&[EOT, double]);
    let eot_id = tokenizer.token_to_id(EOT.as_bytes()).unwrap();
    let double_id = tokenizer.token_to_id(double.as_bytes()).unwrap();

    let tokens = tokenizer.encode("a<|endoftext|><|endoftext|>b<|endoftext|>");
    assert!(tokens.contains(&double_id));
    assert_eq!(tokens.last(), Some(&eot_id));
    assert_eq!(tokens.iter().filter(|&&t| t == eot_id).count(), 1);
    assert_eq!(
        tokenizer.decode(&tokens),
        "a<|endoftext|><|endoftext|>b<|endoftext|>"
    );
}

/// Test that special token text is encoded as plain text without specials.
#[test]
fn test_no_special_tokens() {
    let tokenizer = create_tokenizer(&[]);
    let tokens = tokenizer.encode("Hello<|endoftext|>World");
    assert!(tokens.len() > 1);
    assert_eq!(tokenizer.decode(&tokens), "Hello<|endoftext|>World");
}

/// Test that streaming encode over chunks matches encoding each chunk.
#[test]
fn test_encode_iterable_matches_encode() {
    let tokenizer = create_tokenizer(&[EOT]);
    let lines = vec![
        "The quick brown fox\n",
        "jumps over<|endoftext|>the lazy dog.\n",
        "",
        "  spaced   out  \n",
        "こんにちは 世界\n",
    ];

    let streamed: Vec<u32> = tokenizer.encode_iterable(lines.iter()).collect();
    let expected: Vec<u32> = lines.iter().flat_map(|l| tokenizer.encode(l)).collect();
    assert_eq!(streamed, expected);

    let text: String = lines.concat();
    assert_eq!(tokenizer.decode(&streamed), text);
}

/// Test that streaming encode accepts owned strings from a lazy source.
#[test]
fn test_encode_iterable_owned_chunks() {
    let tokenizer = create_tokenizer(&[EOT]);
    let chunks = (0..100).map(|i| format!("line {} of the corpus\n", i));

    let mut count = 0;
    let mut decoder = StreamingDecoder::new(&tokenizer);
    let mut out = String::new();
    for id in tokenizer.encode_iterable(chunks) {
        count += 1;
        if let Some(text) = decoder.add_token(id) {
            out.push_str(&text);
        }
    }
    out.push_str(&decoder.flush());

    assert!(count > 0);
    let expected: String = (0..100).map(|i| format!("line {} of the corpus\n", i)).collect();
    assert_eq!(out, expected);
}

/// Test streaming decode of multi-byte characters one token at a time.
#[test]
fn test_streaming_decoder_multibyte() {
    let tokenizer = create_tokenizer(&[EOT]);
    let text = "Emoji 🦀 and 日本語 mixed in";
    let ids = tokenizer.encode(text);

    let mut decoder = StreamingDecoder::new(&tokenizer);
    let mut out = String::new();
    for &id in &ids {
        if let Some(chunk) = decoder.add_token(id) {
            assert!(!chunk.contains('\u{FFFD}'), "Partial character emitted");
            out.push_str(&chunk);
        }
    }
    assert!(!decoder.has_pending());
    out.push_str(&decoder.flush());
    assert_eq!(out, text);
}

/// Test that a shared tokenizer can drive decoders on several threads.
#[test]
fn test_shared_tokenizer_across_threads() {
    let tokenizer = Arc::new(create_tokenizer(&[EOT]));
    let texts = ["the lazy dog", "brown fox 🦀", "hello<|endoftext|>world"];

    let handles: Vec<_> = texts
        .iter()
        .map(|&text| {
            let tokenizer = Arc::clone(&tokenizer);
            std::thread::spawn(move || {
                let ids = tokenizer.encode(text);
                let mut decoder = StreamingDecoder::new(Arc::clone(&tokenizer));
                let mut out = decoder.add_tokens(&ids).unwrap_or_default();
                out.push_str(&decoder.flush());
                (text, out)
            })
        })
        .collect();

    for handle in handles {
        let (text, out) = handle.join().unwrap();
        assert_eq!(out, text);
    }
}

/// Test that batch encode and decode agree with the single-text versions.
#[test]
fn test_batch_matches_single() {
    let tokenizer = create_tokenizer(&[EOT]);
    let texts = vec![
        "Hello, world!".to_string(),
        "the quick brown fox".to_string(),
        "<|endoftext|>".to_string(),
        String::new(),
    ];

    let batch = tokenizer.encode_batch(&texts);
    for (text, ids) in texts.iter().zip(&batch) {
        assert_eq!(ids, &tokenizer.encode(text));
    }
    assert_eq!(tokenizer.decode_batch(&batch), texts);
}

/// Test that the word cache does not change results.
#[test]
fn test_cache_does_not_change_results() {
    let cached = create_tokenizer(&[EOT]);
    let uncached = create_tokenizer(&[EOT]).with_cache_size(0);
    let text = "the the the quick quick brown fox fox fox";

    for _ in 0..3 {
        assert_eq!(cached.encode(text), uncached.encode(text));
    }
    assert!(cached.cache_len() > 0);
    assert_eq!(uncached.cache_len(), 0);
}

fn create_tokenizer(special_tokens: &[&str]) -> Tokenizer {
    let corpus = [
        "the quick brown fox jumps over the lazy dog",
        "the lazy dog sleeps while the quick fox runs",
        "hello world, hello rust, hello tokenizer",
        "it's what we're doing and what they've done",
        "line of the corpus, line of text, 0123456789",
        "café naïve über こんにちは 世界 🦀 日本語",
    ]
    .join("<|endoftext|>")
    .repeat(20);

    let config = TrainerConfig::new(400, special_tokens);
    let (vocab, merges) = Trainer::new(config).train_from_text(&corpus).unwrap();
    Tokenizer::new(&vocab, &merges, special_tokens).unwrap()
}
