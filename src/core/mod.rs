//! Core tokenization engine for tokenlens.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! - [`store`]: resolves artifact files, parses them once and caches the
//!   resulting [`Vocabulary`] (single-flight, LRU bounded)
//! - [`bpe`]: rank-table byte-pair encoding for the tiktoken encodings
//! - [`subword`]: the `tokenizer.json` pipeline (normalizers,
//!   pre-tokenizers, BPE/Unigram models, post-processor, decoders)
//! - [`chat`]: renders chat transcripts into text and special-token segments
//! - [`encoder`]: the per-model facade ([`Registry`], [`Encoder`])
//! - [`spans`]: maps token ids back onto byte ranges of the encoded text
//!
//! # Performance Notes
//!
//! - **regexr with JIT** for pretokenization, PCRE2 behind the `pcre2` feature
//! - **Aho-Corasick** for special and added token matching
//! - **FxHashMap** for rank and vocabulary lookups
//! - **Rayon** across inputs in [`Encoder::tokenize_batch`]

pub mod bpe;
pub mod byte_level;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod encoder;
pub mod error;
pub mod pattern;
pub mod spans;
pub mod special;
pub mod store;
pub mod subword;
pub mod vocab;

pub use bpe::{byte_pair_encode, RankedVocab};
pub use byte_level::{byte_level_decode, byte_level_encode};
pub use catalog::{ChatTemplateRef, Encoding, EncodingProfile, ModelCatalog, Transform, VocabularySpec};
pub use chat::{ChatTemplate, ChatTurn, RenderedChat, Role, Segment};
pub use config::EngineConfig;
pub use encoder::{Encoder, Input, Registry, TokenizationResult};
pub use error::TokenizerError;
pub use pattern::{Pattern, PatternError, RegexEngine, CL100K_BASE_PATTERN, O200K_BASE_PATTERN, R50K_BASE_PATTERN};
pub use spans::Token;
pub use special::SpecialTokens;
pub use store::{ArtifactFetcher, ArtifactFile, ArtifactRef, FetchError, VocabularyStore};
pub use subword::SubwordVocab;
pub use vocab::{build_decoder, load_tiktoken_bpe, EngineKind, RankTable, VocabError, Vocabulary};
