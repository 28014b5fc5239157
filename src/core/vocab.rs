//! Vocabulary artifacts.
//!
//! Two artifact families are supported:
//!
//! - **Rank tables** in tiktoken format, consumed by the [`bpe`](super::bpe) engine.
//! - **`tokenizer.json`** documents, consumed by the [`subword`](super::subword) engine.
//!
//! # Tiktoken Format
//!
//! Each line holds a base64-encoded token, a space, and its rank. The rank
//! doubles as the token id and as the merge priority (lower merges first).
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! Parsed vocabularies are immutable and shared behind an `Arc` by the
//! [`VocabularyStore`](super::store::VocabularyStore).

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use thiserror::Error;

use super::bpe::RankedVocab;
use super::pattern::PatternError;
use super::special::SpecialTokens;
use super::subword::SubwordVocab;

/// Errors that can occur when loading or validating a vocabulary artifact.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid tokenizer JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),
    #[error("Unsupported tokenizer component: {0}")]
    Unsupported(String),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error(transparent)]
    PatternError(#[from] PatternError),
}

/// Which algorithm a vocabulary drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Fixed rank table, leftmost-lowest-rank byte pair merging.
    Bpe,
    /// `tokenizer.json` pipeline: normalizers, pretokenizers, BPE or Unigram model.
    Subword,
}

/// Load a tiktoken BPE rank table from raw bytes.
///
/// Format: `base64_token rank\n` per line. Duplicate tokens or ranks are
/// rejected since either would make encoding ambiguous.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, u32>, VocabError> {
    let mut encoder = FxHashMap::default();
    let mut seen_ranks = rustc_hash::FxHashSet::default();

    for (line_no, line) in data.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let space_pos = line.iter().rposition(|&b| b == b' ').ok_or_else(|| {
            VocabError::ParseError(format!("line {}: missing space separator", line_no + 1))
        })?;

        let token = STANDARD.decode(&line[..space_pos])?;

        let rank_str = std::str::from_utf8(&line[space_pos + 1..])
            .map_err(|_| VocabError::ParseError("Invalid UTF-8 in rank".to_string()))?;
        let rank: u32 = rank_str
            .trim()
            .parse()
            .map_err(|_| VocabError::ParseError(format!("Invalid rank: {}", rank_str)))?;

        if !seen_ranks.insert(rank) {
            return Err(VocabError::InvalidVocabulary(format!(
                "rank {} assigned twice",
                rank
            )));
        }
        if encoder.insert(token, rank).is_some() {
            return Err(VocabError::InvalidVocabulary(format!(
                "token with rank {} appears twice",
                rank
            )));
        }
    }

    Ok(encoder)
}

/// Build a decoder map (token ID → bytes) from an encoder map (bytes → token ID).
pub fn build_decoder(encoder: &FxHashMap<Vec<u8>, u32>) -> FxHashMap<u32, Vec<u8>> {
    encoder.iter().map(|(k, v)| (*v, k.clone())).collect()
}

/// A validated byte-sequence → rank table.
#[derive(Debug)]
pub struct RankTable {
    encoder: FxHashMap<Vec<u8>, u32>,
    decoder: FxHashMap<u32, Vec<u8>>,
    byte_ranks: [u32; 256],
}

impl RankTable {
    /// Parse a tiktoken file and check that every single byte has a rank,
    /// which is what lets encoding fall back to single-byte tokens.
    pub fn parse(data: &[u8]) -> Result<Self, VocabError> {
        Self::from_encoder(load_tiktoken_bpe(data)?)
    }

    pub fn from_encoder(encoder: FxHashMap<Vec<u8>, u32>) -> Result<Self, VocabError> {
        let mut byte_ranks = [0u32; 256];
        for (b, slot) in byte_ranks.iter_mut().enumerate() {
            *slot = *encoder.get([b as u8].as_slice()).ok_or_else(|| {
                VocabError::InvalidVocabulary(format!("missing single-byte token 0x{:02X}", b))
            })?;
        }
        let decoder = build_decoder(&encoder);
        Ok(Self {
            encoder,
            decoder,
            byte_ranks,
        })
    }

    #[inline]
    pub fn rank(&self, bytes: &[u8]) -> Option<u32> {
        self.encoder.get(bytes).copied()
    }

    #[inline]
    pub fn byte_rank(&self, byte: u8) -> u32 {
        self.byte_ranks[byte as usize]
    }

    #[inline]
    pub fn token_bytes(&self, rank: u32) -> Option<&[u8]> {
        self.decoder.get(&rank).map(Vec::as_slice)
    }

    pub fn encoder(&self) -> &FxHashMap<Vec<u8>, u32> {
        &self.encoder
    }

    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    pub fn max_rank(&self) -> Option<u32> {
        self.decoder.keys().max().copied()
    }
}

/// A parsed, validated vocabulary for one model.
#[derive(Debug)]
pub enum Vocabulary {
    Ranked(RankedVocab),
    Subword(SubwordVocab),
}

impl Vocabulary {
    pub fn engine(&self) -> EngineKind {
        match self {
            Vocabulary::Ranked(_) => EngineKind::Bpe,
            Vocabulary::Subword(_) => EngineKind::Subword,
        }
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        match self {
            Vocabulary::Ranked(v) => v.special_tokens(),
            Vocabulary::Subword(v) => v.added_tokens(),
        }
    }

    /// True for ids that are only ever produced by explicit insertion.
    pub fn is_special(&self, id: u32) -> bool {
        match self {
            Vocabulary::Ranked(v) => v.special_tokens().contains_id(id),
            Vocabulary::Subword(v) => v.is_special(id),
        }
    }

    /// Bytes a single token contributes to the decoded text.
    pub fn token_surface(&self, id: u32) -> Option<Cow<'_, [u8]>> {
        match self {
            Vocabulary::Ranked(v) => v.token_surface(id).map(Cow::Borrowed),
            Vocabulary::Subword(v) => v.token_surface(id).map(Cow::Owned),
        }
    }

    /// Number of id slots, including special tokens.
    pub fn vocab_size(&self) -> usize {
        match self {
            Vocabulary::Ranked(v) => v.vocab_size(),
            Vocabulary::Subword(v) => v.vocab_size(),
        }
    }

    pub fn as_ranked(&self) -> Option<&RankedVocab> {
        match self {
            Vocabulary::Ranked(v) => Some(v),
            Vocabulary::Subword(_) => None,
        }
    }

    pub fn as_subword(&self) -> Option<&SubwordVocab> {
        match self {
            Vocabulary::Subword(v) => Some(v),
            Vocabulary::Ranked(_) => None,
        }
    }
}
