//! tokenlens: byte-exact tokenization for closed and open language models.
//!
//! Given a model identifier, produce the token stream the model's reference
//! encoder would produce, with the byte range of every token:
//!
//! - Rank-table BPE for the tiktoken encodings (`cl100k_base`, `o200k_base`, ...)
//! - `tokenizer.json` driven BPE and Unigram for hub models
//! - Chat transcripts rendered through built-in or shipped Jinja templates
//! - Token-to-span mapping for highlighting
//!
//! ```ignore
//! use tokenlens::{ChatTurn, EngineConfig, Input, Registry};
//!
//! let registry = Registry::from_config(&EngineConfig::from_env());
//! let encoder = registry.create("gpt-4")?;
//! let turns = vec![ChatTurn::system("Be brief."), ChatTurn::user("Hi")];
//! println!("{} tokens", encoder.count(Input::Chat(&turns))?);
//! ```

pub mod core;

pub use crate::core::{
    ArtifactFetcher, ArtifactFile, ArtifactRef, ChatTemplate, ChatTemplateRef, ChatTurn,
    EngineConfig, EngineKind, Encoder, Encoding, EncodingProfile, FetchError, Input,
    ModelCatalog, Registry, RenderedChat, Role, Segment, Token, TokenizationResult,
    TokenizerError, Transform, Vocabulary, VocabularySpec, VocabularyStore,
};
