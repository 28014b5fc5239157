//! Integration tests for `tokenizer.json` vocabularies.

mod common;

use common::*;
use serde_json::json;
use tempfile::TempDir;
use tokenlens::{
    EncodingProfile, Input, ModelCatalog, Registry, TokenizerError, Transform, VocabularyStore,
};

const BYTE_LEVEL: &str = "test/byte-level";
const SENTENCEPIECE: &str = "test/sentencepiece";
const UNIGRAM: &str = "test/unigram";
const WHITESPACE: &str = "test/whitespace";

fn setup() -> (TempDir, Registry) {
    let dir = TempDir::new().unwrap();
    write_hub(dir.path(), BYTE_LEVEL, &byte_level_tokenizer(), None);
    write_hub(dir.path(), SENTENCEPIECE, &sentencepiece_tokenizer(), None);
    write_hub(dir.path(), UNIGRAM, &unigram_tokenizer(), None);
    write_hub(dir.path(), WHITESPACE, &whitespace_tokenizer(), None);

    let catalog = ModelCatalog::empty()
        .with_profile(EncodingProfile::hub(BYTE_LEVEL))
        .with_profile(EncodingProfile::hub(SENTENCEPIECE))
        .with_profile(EncodingProfile::hub(UNIGRAM))
        .with_profile(EncodingProfile::hub(WHITESPACE));
    let registry = Registry::new(catalog, VocabularyStore::new(dir.path(), 8));
    (dir, registry)
}

#[test]
fn test_byte_level_bpe() {
    let (_dir, registry) = setup();
    let encoder = registry.create(BYTE_LEVEL).unwrap();

    let result = encoder.tokenize("Hello world".into()).unwrap();
    assert_eq!(result.ids(), vec![259, 264]);
    let texts: Vec<_> = result.tokens().iter().map(|t| t.text().into_owned()).collect();
    assert_eq!(texts, vec!["Hello", " world"]);
    assert_eq!(encoder.decode(&result.ids()).unwrap(), "Hello world");
}

#[test]
fn test_byte_level_unicode_and_added_tokens() {
    let (_dir, registry) = setup();
    let encoder = registry.create(BYTE_LEVEL).unwrap();

    let text = "héllo 🦀<|endoftext|>";
    let result = encoder.tokenize(text.into()).unwrap();
    assert_eq!(result.ids().last(), Some(&1000));
    assert_covers(result.tokens(), text.as_bytes());
    assert_eq!(encoder.decode(&result.ids()).unwrap(), text);
}

#[test]
fn test_sentencepiece_bos_and_prefix() {
    let (_dir, registry) = setup();
    let encoder = registry.create(SENTENCEPIECE).unwrap();

    let result = encoder.tokenize("Hello world".into()).unwrap();
    assert_eq!(result.ids(), vec![1, SP_HELLO, SP_WORLD]);

    let spans: Vec<_> = result.tokens().iter().map(|t| (t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 0), (0, 5), (5, 11)]);
    assert_eq!(result.encoded(), b"Hello world");
    assert_eq!(encoder.decode(&result.ids()[1..]).unwrap(), "Hello world");
}

#[test]
fn test_sentencepiece_byte_fallback() {
    let (_dir, registry) = setup();
    let encoder = registry.create(SENTENCEPIECE).unwrap();

    let text = "Hé\n";
    let result = encoder.tokenize(text.into()).unwrap();
    assert_eq!(result.ids(), vec![1, 300, 3 + 0xC3, 3 + 0xA9, 3 + 0x0A]);
    assert_covers(result.tokens(), text.as_bytes());
    assert_eq!(result.tokens()[2].bytes, vec![0xC3]);
}

#[test]
fn test_drop_leading_token() {
    let dir = TempDir::new().unwrap();
    write_hub(dir.path(), SENTENCEPIECE, &sentencepiece_tokenizer(), None);
    let catalog = ModelCatalog::empty()
        .with_profile(EncodingProfile::hub(SENTENCEPIECE).with_transform(Transform::DropLeadingToken));
    let registry = Registry::new(catalog, VocabularyStore::new(dir.path(), 2));
    let encoder = registry.create(SENTENCEPIECE).unwrap();

    let result = encoder.tokenize("Hello".into()).unwrap();
    assert_eq!(result.ids(), vec![SP_HELLO]);
    assert_covers(result.tokens(), b"Hello");
}

#[test]
fn test_unigram_with_unknown_run() {
    let (_dir, registry) = setup();
    let encoder = registry.create(UNIGRAM).unwrap();

    assert_eq!(encoder.encode("Hello world".into()).unwrap(), vec![2, 3]);

    let result = encoder.tokenize("Hello xyz".into()).unwrap();
    assert_eq!(result.ids(), vec![2, 1, 0]);
    let spans: Vec<_> = result.tokens().iter().map(|t| (t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 5), (5, 6), (6, 9)]);
}

#[test]
fn test_whitespace_pretokenizer_absorbs_dropped_text() {
    let (_dir, registry) = setup();
    let encoder = registry.create(WHITESPACE).unwrap();

    let result = encoder.tokenize("Hello  World! ".into()).unwrap();
    assert_eq!(result.ids(), vec![101, WS_HELLO, WS_WORLD, 7, 102]);
    assert_eq!(result.encoded(), b"hello  world! ");

    let spans: Vec<_> = result.tokens().iter().map(|t| (t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 0), (0, 5), (5, 12), (12, 13), (13, 14)]);
}

#[test]
fn test_whitespace_only_text_without_boundary_tokens() {
    let dir = TempDir::new().unwrap();
    let mut tokenizer = whitespace_tokenizer();
    tokenizer["post_processor"] = serde_json::Value::Null;
    write_hub(dir.path(), WHITESPACE, &tokenizer, None);
    let catalog = ModelCatalog::empty().with_profile(EncodingProfile::hub(WHITESPACE));
    let registry = Registry::new(catalog, VocabularyStore::new(dir.path(), 2));
    let encoder = registry.create(WHITESPACE).unwrap();

    for text in ["   ", "  \n"] {
        let result = encoder.tokenize(text.into()).unwrap();
        assert_eq!(result.count(), 0, "{:?}", text);
        assert_covers(result.tokens(), result.encoded());
    }

    let result = encoder.tokenize("hello ".into()).unwrap();
    assert_eq!(result.ids(), vec![WS_HELLO]);
    let spans: Vec<_> = result.tokens().iter().map(|t| (t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 6)]);
}

#[test]
fn test_stripping_added_token_covers_whitespace() {
    let dir = TempDir::new().unwrap();
    let mut tokenizer = byte_level_tokenizer();
    tokenizer["added_tokens"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": 1001, "content": "<|end|>", "special": true, "lstrip": true, "rstrip": true}));
    write_hub(dir.path(), "test/strip", &tokenizer, None);
    let catalog = ModelCatalog::empty().with_profile(EncodingProfile::hub("test/strip"));
    let registry = Registry::new(catalog, VocabularyStore::new(dir.path(), 2));
    let encoder = registry.create("test/strip").unwrap();

    let text = "Hello <|end|> world";
    let result = encoder.tokenize(text.into()).unwrap();
    assert_eq!(result.ids(), vec![259, 1001, u32::from(b'w'), 261, 263]);
    let spans: Vec<_> = result.tokens().iter().map(|t| (t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 5), (5, 14), (14, 15), (15, 17), (17, 19)]);
    assert_covers(result.tokens(), text.as_bytes());
}

#[test]
fn test_subword_rejects_invalid_utf8() {
    let (_dir, registry) = setup();
    let encoder = registry.create(BYTE_LEVEL).unwrap();

    let err = encoder.encode(Input::Bytes(&[0x61, 0xFF])).unwrap_err();
    assert!(matches!(err, TokenizerError::InvalidInputKind(_)));
}

#[test]
fn test_corrupt_tokenizer_json() {
    let dir = TempDir::new().unwrap();
    let broken = json!({
        "model": {"type": "BPE", "vocab": {"a": 0, "b": 1}, "merges": ["a b"]}
    });
    write_hub(dir.path(), "test/broken", &broken, None);
    let catalog = ModelCatalog::empty().with_profile(EncodingProfile::hub("test/broken"));
    let registry = Registry::new(catalog, VocabularyStore::new(dir.path(), 2));

    let err = registry.create("test/broken").unwrap_err();
    assert!(matches!(err, TokenizerError::CorruptArtifact(_)));
    assert!(!err.is_retryable());
    assert_eq!(registry.store().cached_len(), 0);
}

#[test]
fn test_duplicate_added_token_id_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let mut tokenizer = whitespace_tokenizer();
    tokenizer["added_tokens"] = json!([
        {"id": 101, "content": "[CLS]", "special": true},
        {"id": 101, "content": "[SEP]", "special": true}
    ]);
    write_hub(dir.path(), WHITESPACE, &tokenizer, None);
    let catalog = ModelCatalog::empty().with_profile(EncodingProfile::hub(WHITESPACE));
    let registry = Registry::new(catalog, VocabularyStore::new(dir.path(), 2));

    let err = registry.create(WHITESPACE).unwrap_err();
    assert!(matches!(err, TokenizerError::CorruptArtifact(_)));
}
