//! Shared fixtures: tiny artifacts written into temporary artifact roots.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::fmt::Write;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokenlens::core::byte_level::byte_level_encode;

/// Merged tokens of the small rank table, ranked from 256 upwards.
pub const RANK_MERGES: &[&str] = &[
    "He", "ll", "llo", "Hello", " w", "or", " wor", "ld", " world", "he", "hello", " t", " th",
    " the",
];

pub fn rank(token: &str) -> u32 {
    256 + RANK_MERGES
        .iter()
        .position(|t| *t == token)
        .expect("token in RANK_MERGES") as u32
}

/// A tiktoken file with every single byte plus [`RANK_MERGES`].
pub fn rank_table() -> String {
    let mut body = String::new();
    for b in 0..=255u8 {
        writeln!(body, "{} {}", STANDARD.encode([b]), b).unwrap();
    }
    for (i, token) in RANK_MERGES.iter().enumerate() {
        writeln!(body, "{} {}", STANDARD.encode(token), 256 + i).unwrap();
    }
    body
}

pub fn write_tiktoken(root: &Path, file: &str, body: &str) {
    let dir = root.join("tiktoken");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.tiktoken", file)), body).unwrap();
}

pub fn write_hub(root: &Path, repo: &str, tokenizer: &Value, config: Option<&Value>) {
    let dir = root.join("hf").join(repo);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).unwrap();
    if let Some(config) = config {
        fs::write(dir.join("tokenizer_config.json"), config.to_string()).unwrap();
    }
}

/// An artifact root holding every rank table the built-in encodings use.
pub fn rank_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    let body = rank_table();
    for file in ["r50k_base", "p50k_base", "cl100k_base", "o200k_base"] {
        write_tiktoken(dir.path(), file, &body);
    }
    dir
}

fn merged_vocab(base: &mut serde_json::Map<String, Value>, merges: &[(&str, &str)], first_id: u32) {
    for (i, (a, b)) in merges.iter().enumerate() {
        base.insert(format!("{}{}", a, b), (first_id + i as u32).into());
    }
}

fn merge_strings(merges: &[(&str, &str)]) -> Vec<String> {
    merges.iter().map(|(a, b)| format!("{} {}", a, b)).collect()
}

/// GPT-2 style byte-level BPE. Byte `b` has id `b`.
pub fn byte_level_tokenizer() -> Value {
    let merges = [
        ("H", "e"),
        ("l", "l"),
        ("He", "ll"),
        ("Hell", "o"),
        ("Ġ", "w"),
        ("o", "r"),
        ("Ġw", "or"),
        ("l", "d"),
        ("Ġwor", "ld"),
    ];
    let mut vocab = serde_json::Map::new();
    for b in 0..=255u8 {
        vocab.insert(byte_level_encode(&[b]), u32::from(b).into());
    }
    merged_vocab(&mut vocab, &merges, 256);

    json!({
        "added_tokens": [{"id": 1000, "content": "<|endoftext|>", "special": true}],
        "normalizer": null,
        "pre_tokenizer": {"type": "ByteLevel", "add_prefix_space": false, "trim_offsets": true, "use_regex": true},
        "post_processor": {"type": "ByteLevel", "add_prefix_space": true, "trim_offsets": false, "use_regex": true},
        "decoder": {"type": "ByteLevel", "add_prefix_space": true, "trim_offsets": true, "use_regex": true},
        "model": {"type": "BPE", "vocab": vocab, "merges": merge_strings(&merges), "ignore_merges": false}
    })
}

/// SentencePiece style BPE: `▁` prefix, byte fallback and a BOS template.
pub fn sentencepiece_tokenizer() -> Value {
    let mut vocab = serde_json::Map::new();
    vocab.insert("<unk>".into(), 0.into());
    vocab.insert("<s>".into(), 1.into());
    vocab.insert("</s>".into(), 2.into());
    for b in 0..=255u32 {
        vocab.insert(format!("<0x{:02X}>", b), (3 + b).into());
    }
    for (i, piece) in ["▁", "H", "e", "l", "o", "w", "r", "d"].iter().enumerate() {
        vocab.insert(piece.to_string(), (259 + i as u32).into());
    }
    let merges = [
        ("▁", "H"),
        ("l", "l"),
        ("▁H", "e"),
        ("▁He", "ll"),
        ("▁Hell", "o"),
        ("▁", "w"),
        ("o", "r"),
        ("▁w", "or"),
        ("▁wor", "l"),
        ("▁worl", "d"),
    ];
    merged_vocab(&mut vocab, &merges, 300);

    json!({
        "added_tokens": [
            {"id": 0, "content": "<unk>", "special": true},
            {"id": 1, "content": "<s>", "special": true},
            {"id": 2, "content": "</s>", "special": true}
        ],
        "normalizer": {"type": "Sequence", "normalizers": [
            {"type": "Prepend", "prepend": "▁"},
            {"type": "Replace", "pattern": {"String": " "}, "content": "▁"}
        ]},
        "pre_tokenizer": null,
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [{"SpecialToken": {"id": "<s>", "type_id": 0}}, {"Sequence": {"id": "A", "type_id": 0}}],
            "pair": [],
            "special_tokens": {"<s>": {"id": "<s>", "ids": [1], "tokens": ["<s>"]}}
        },
        "decoder": {"type": "Sequence", "decoders": [
            {"type": "Replace", "pattern": {"String": "▁"}, "content": " "},
            {"type": "ByteFallback"},
            {"type": "Fuse"},
            {"type": "Strip", "content": " ", "start": 1, "stop": 0}
        ]},
        "model": {
            "type": "BPE",
            "vocab": vocab,
            "merges": merge_strings(&merges),
            "unk_token": "<unk>",
            "byte_fallback": true,
            "fuse_unk": true
        }
    })
}

pub const SP_HELLO: u32 = 304;
pub const SP_WORLD: u32 = 309;

/// Unigram over `▁`-prefixed words. Unknown characters become `<unk>` (id 0).
pub fn unigram_tokenizer() -> Value {
    json!({
        "added_tokens": [{"id": 0, "content": "<unk>", "special": true}],
        "normalizer": null,
        "pre_tokenizer": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always", "split": true},
        "post_processor": null,
        "decoder": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always", "split": true},
        "model": {
            "type": "Unigram",
            "unk_id": 0,
            "vocab": [
                ["<unk>", 0.0],
                ["▁", -2.0],
                ["▁Hello", -3.0],
                ["▁world", -3.0],
                ["▁wor", -4.0],
                ["ld", -4.0],
                ["H", -6.0],
                ["e", -6.0],
                ["l", -6.0],
                ["o", -6.0]
            ]
        }
    })
}

/// Lowercasing BPE behind a `Whitespace` pre-tokenizer and BERT markers.
pub fn whitespace_tokenizer() -> Value {
    let mut vocab = serde_json::Map::new();
    for (i, c) in ["h", "e", "l", "o", "w", "r", "d", "!"].iter().enumerate() {
        vocab.insert(c.to_string(), (i as u32).into());
    }
    let merges = [
        ("h", "e"),
        ("l", "l"),
        ("he", "ll"),
        ("hell", "o"),
        ("w", "o"),
        ("wo", "r"),
        ("wor", "l"),
        ("worl", "d"),
    ];
    merged_vocab(&mut vocab, &merges, 10);

    json!({
        "added_tokens": [
            {"id": 101, "content": "[CLS]", "special": true},
            {"id": 102, "content": "[SEP]", "special": true}
        ],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 102], "cls": ["[CLS]", 101]},
        "decoder": null,
        "model": {"type": "BPE", "vocab": vocab, "merges": merge_strings(&merges)}
    })
}

pub const WS_HELLO: u32 = 13;
pub const WS_WORLD: u32 = 17;

/// Checks that `tokens` tile `encoded` exactly.
pub fn assert_covers(tokens: &[tokenlens::Token], encoded: &[u8]) {
    let mut cursor = 0;
    for token in tokens {
        assert_eq!(token.start, cursor, "gap or overlap before token {:?}", token);
        assert!(token.end >= token.start);
        assert_eq!(token.bytes, &encoded[token.start..token.end]);
        cursor = token.end;
    }
    assert_eq!(cursor, encoded.len(), "tokens stop short of the text end");
}
