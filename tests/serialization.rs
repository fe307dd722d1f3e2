//! Integration tests for the vocab.json / merges.txt file formats.
//!
//! Token bytes are not always valid UTF-8 on their own, so both files must
//! carry arbitrary bytes through a save/load cycle unchanged.

use std::fs;

use bytebpe::{load_output, save_output, train_bpe, Merges, Tokenizer, Vocab};

/// Test that merges of partial UTF-8 sequences survive the files.
#[test]
fn test_partial_utf8_merges_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = "Ā ĀĀ Ā€ €€ \u{80}\u{80} ĀĀĀ €Ā".repeat(50);
    let path = dir.path().join("corpus.txt");
    fs::write(&path, corpus).unwrap();

    let (vocab, merges) = train_bpe(&path, 300, &["<|endoftext|>"]).unwrap();
    assert!(
        merges
            .iter()
            .any(|(a, b)| a.contains(&0x80) || b.contains(&0x80)),
        "Expected a merge involving byte 0x80"
    );
    assert!(
        vocab
            .iter()
            .skip(257)
            .any(|(_, bytes)| std::str::from_utf8(bytes).is_err()),
        "Expected a merged token that is not valid UTF-8 by itself"
    );

    let out = dir.path().join("out");
    save_output(&out, &vocab, &merges).unwrap();
    let (loaded_vocab, loaded_merges) = load_output(&out).unwrap();
    assert_eq!(loaded_vocab, vocab);
    assert_eq!(loaded_merges, merges);
}

/// Test that a tokenizer loaded from files encodes like the in-memory one.
#[test]
fn test_loaded_tokenizer_matches_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = "naïve café über Ā€ 日本語 🦀 hello world ".repeat(40);
    let path = dir.path().join("corpus.txt");
    fs::write(&path, &corpus).unwrap();

    let specials = ["<|endoftext|>"];
    let (vocab, merges) = train_bpe(&path, 320, &specials).unwrap();
    save_output(dir.path(), &vocab, &merges).unwrap();

    let in_memory = Tokenizer::new(&vocab, &merges, &specials).unwrap();
    let loaded = Tokenizer::from_files(
        dir.path().join("vocab.json"),
        dir.path().join("merges.txt"),
        &specials,
    )
    .unwrap();

    let text = "café 🦀<|endoftext|>Ā€ hello 日本語 world";
    assert_eq!(loaded.encode(text), in_memory.encode(text));
    assert_eq!(loaded.decode(&loaded.encode(text)), text);
}

/// Test the on-disk layout of a hand-built vocabulary.
#[test]
fn test_file_contents() {
    let dir = tempfile::tempdir().unwrap();

    let mut vocab = Vocab::initial(&["<|endoftext|>"]);
    vocab.push(vec![0x80, 0x80]);
    let mut merges = Merges::new();
    merges.push(vec![0x80], vec![0x80]);

    save_output(dir.path(), &vocab, &merges).unwrap();

    let merges_text = fs::read_to_string(dir.path().join("merges.txt")).unwrap();
    assert_eq!(merges_text, "{\"a\":\"gA==\",\"b\":\"gA==\"}\n");

    let vocab_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("vocab.json")).unwrap()).unwrap();
    let object = vocab_json.as_object().unwrap();
    assert_eq!(object.len(), 258);
    assert_eq!(object["257"], serde_json::json!([128, 128]));
    assert_eq!(
        object["256"],
        serde_json::to_value("<|endoftext|>".as_bytes()).unwrap()
    );

    let tokenizer = Tokenizer::from_files(
        dir.path().join("vocab.json"),
        dir.path().join("merges.txt"),
        &["<|endoftext|>"],
    )
    .unwrap();
    assert_eq!(tokenizer.id_to_token(257), Some(&[0x80, 0x80][..]));
    assert_eq!(tokenizer.encode("\u{80}"), vec![0xC2, 0x80]);
}

/// Test that malformed files are reported as errors.
#[test]
fn test_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_path = dir.path().join("vocab.json");
    let merges_path = dir.path().join("merges.txt");

    fs::write(&vocab_path, "not json").unwrap();
    fs::write(&merges_path, "").unwrap();
    assert!(Tokenizer::from_files(&vocab_path, &merges_path, &[] as &[&str]).is_err());

    Vocab::initial(&[] as &[&str]).save(&vocab_path).unwrap();
    fs::write(&merges_path, "{\"a\":\"!!\",\"b\":\"IA==\"}\n").unwrap();
    assert!(Tokenizer::from_files(&vocab_path, &merges_path, &[] as &[&str]).is_err());

    assert!(Tokenizer::from_files(
        dir.path().join("missing.json"),
        &merges_path,
        &[] as &[&str]
    )
    .is_err());
}
