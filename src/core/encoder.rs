//! Encoder facade: one entry point per model identifier.
//!
//! [`Registry::create`] resolves a model id through the [`ModelCatalog`],
//! loads its vocabulary from the [`VocabularyStore`] and returns an
//! [`Encoder`] bound to both. The encoder picks the engine by vocabulary
//! kind, renders chat transcripts first when the profile allows it and
//! applies the profile's post-encoding transforms.
//!
//! # Example
//!
//! ```ignore
//! use tokenlens::{EngineConfig, Registry};
//!
//! let registry = Registry::from_config(&EngineConfig::from_env());
//! let encoder = registry.create("gpt-4o")?;
//! let result = encoder.tokenize("Hello, world!".into())?;
//! for token in result.tokens() {
//!     println!("{} {:?} {}..{}", token.id, token.text(), token.start, token.end);
//! }
//! ```

use rayon::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

use super::bpe;
use super::catalog::{EncodingProfile, ModelCatalog};
use super::chat::{self, ChatTurn, Segment};
use super::config::EngineConfig;
use super::error::TokenizerError;
use super::spans::{self, Token};
use super::store::VocabularyStore;
use super::subword;
use super::vocab::Vocabulary;

/// What the caller wants tokenized.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    Text(&'a str),
    /// Raw bytes. Rank-table vocabularies accept any bytes; subword
    /// vocabularies require UTF-8.
    Bytes(&'a [u8]),
    Chat(&'a [ChatTurn]),
}

impl<'a> From<&'a str> for Input<'a> {
    fn from(text: &'a str) -> Self {
        Input::Text(text)
    }
}

impl<'a> From<&'a String> for Input<'a> {
    fn from(text: &'a String) -> Self {
        Input::Text(text)
    }
}

impl<'a> From<&'a [u8]> for Input<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Input::Bytes(bytes)
    }
}

impl<'a> From<&'a [ChatTurn]> for Input<'a> {
    fn from(turns: &'a [ChatTurn]) -> Self {
        Input::Chat(turns)
    }
}

impl<'a> From<&'a Vec<ChatTurn>> for Input<'a> {
    fn from(turns: &'a Vec<ChatTurn>) -> Self {
        Input::Chat(turns)
    }
}

/// Tokens plus the exact text they were computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizationResult {
    tokens: Vec<Token>,
    encoded: Vec<u8>,
}

impl TokenizationResult {
    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.tokens.iter().map(|t| t.id).collect()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The encoded text: the input itself, the normalized input, or the
    /// rendered transcript.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn encoded_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.encoded)
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

/// Encoder for one model. Cheap to clone and safe to share across threads.
#[derive(Debug, Clone)]
pub struct Encoder {
    profile: Arc<EncodingProfile>,
    vocab: Arc<Vocabulary>,
}

impl Encoder {
    /// Bind a profile to an already loaded vocabulary.
    pub fn new(profile: Arc<EncodingProfile>, vocab: Arc<Vocabulary>) -> Result<Self, TokenizerError> {
        if profile.engine() != vocab.engine() {
            return Err(TokenizerError::corrupt(format!(
                "{} expects a {:?} vocabulary",
                profile.model_id,
                profile.engine()
            )));
        }
        Ok(Self { profile, vocab })
    }

    pub fn profile(&self) -> &EncodingProfile {
        &self.profile
    }

    pub fn model_id(&self) -> &str {
        &self.profile.model_id
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.vocab_size()
    }

    pub fn supports_chat(&self) -> bool {
        self.profile.supports_chat()
    }

    /// Token ids only, without span mapping.
    pub fn encode(&self, input: Input<'_>) -> Result<Vec<u32>, TokenizerError> {
        self.run(input).map(|(ids, _)| ids)
    }

    pub fn count(&self, input: Input<'_>) -> Result<usize, TokenizerError> {
        self.encode(input).map(|ids| ids.len())
    }

    /// Token ids with the byte range each covers in the encoded text.
    pub fn tokenize(&self, input: Input<'_>) -> Result<TokenizationResult, TokenizerError> {
        let (ids, encoded) = self.run(input)?;
        let tokens = spans::map(&self.vocab, &ids, &encoded)?;
        Ok(TokenizationResult { tokens, encoded })
    }

    /// Tokenize many texts in parallel. Fails if any input fails.
    pub fn tokenize_batch(&self, texts: &[String]) -> Result<Vec<TokenizationResult>, TokenizerError> {
        texts
            .par_iter()
            .map(|text| self.tokenize(Input::Text(text)))
            .collect()
    }

    pub fn decode_bytes(&self, ids: &[u32]) -> Result<Vec<u8>, TokenizerError> {
        match self.vocab.as_ref() {
            Vocabulary::Ranked(v) => bpe::decode(v, ids),
            Vocabulary::Subword(v) => subword::decode(v, ids),
        }
    }

    pub fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        String::from_utf8(self.decode_bytes(ids)?).map_err(|_| TokenizerError::Utf8Error)
    }

    /// Decode, replacing invalid UTF-8 with U+FFFD.
    pub fn decode_lossy(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(ids)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn run(&self, input: Input<'_>) -> Result<(Vec<u32>, Vec<u8>), TokenizerError> {
        let (mut ids, mut encoded) = match input {
            Input::Chat(turns) => self.encode_chat(turns)?,
            Input::Text(text) => self.encode_text(text.as_bytes())?,
            Input::Bytes(bytes) => self.encode_text(bytes)?,
        };

        if self.profile.drops_leading_token()
            && ids.first().is_some_and(|&id| self.vocab.is_special(id))
        {
            let dropped = ids.remove(0);
            // Boundary tokens never appear in the encoded text; matched ones do.
            let from_boundary = !matches!(input, Input::Chat(_))
                && self
                    .vocab
                    .as_subword()
                    .is_some_and(|v| !v.boundary_ids().0.is_empty());
            if !from_boundary {
                if let Some(surface) = self.vocab.token_surface(dropped) {
                    if encoded.starts_with(&surface) {
                        encoded.drain(..surface.len());
                    }
                }
            }
        }
        Ok((ids, encoded))
    }

    fn encode_text(&self, bytes: &[u8]) -> Result<(Vec<u32>, Vec<u8>), TokenizerError> {
        match self.vocab.as_ref() {
            Vocabulary::Ranked(v) => Ok((bpe::encode(v, bytes)?, bytes.to_vec())),
            Vocabulary::Subword(v) => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    TokenizerError::InvalidInputKind(format!(
                        "{} needs UTF-8 input: {}",
                        self.profile.model_id, e
                    ))
                })?;
                let (prefix, suffix) = v.boundary_ids();
                let mut ids = prefix.to_vec();
                let mut encoded = String::with_capacity(text.len());
                v.encode_segment(text, true, &mut ids, &mut encoded)?;
                ids.extend_from_slice(suffix);
                if ids.is_empty() {
                    // Everything was discarded by the pretokenizer.
                    encoded.clear();
                }
                Ok((ids, encoded.into_bytes()))
            }
        }
    }

    fn encode_chat(&self, turns: &[ChatTurn]) -> Result<(Vec<u32>, Vec<u8>), TokenizerError> {
        let rendered = chat::render(&self.profile, &self.vocab, turns)?;
        debug!(
            model = %self.profile.model_id,
            turns = turns.len(),
            specials = rendered.special_ids().len(),
            "rendered chat transcript"
        );

        let mut ids = Vec::new();
        let mut encoded = String::new();
        for (i, segment) in rendered.segments().iter().enumerate() {
            match segment {
                Segment::Special { id, surface } => {
                    ids.push(*id);
                    encoded.push_str(surface);
                }
                // Turn text goes through the same special token matching as
                // plain text input, on either engine.
                Segment::Text(text) => match self.vocab.as_ref() {
                    Vocabulary::Ranked(v) => {
                        ids.extend(bpe::encode(v, text.as_bytes())?);
                        encoded.push_str(text);
                    }
                    Vocabulary::Subword(v) => v.encode_segment(text, i == 0, &mut ids, &mut encoded)?,
                },
            }
        }
        Ok((ids, encoded.into_bytes()))
    }
}

/// Creates encoders by model id.
#[derive(Debug, Clone)]
pub struct Registry {
    catalog: Arc<ModelCatalog>,
    store: Arc<VocabularyStore>,
}

impl Registry {
    pub fn new(catalog: ModelCatalog, store: VocabularyStore) -> Self {
        Self {
            catalog: Arc::new(catalog),
            store: Arc::new(store),
        }
    }

    /// Built-in catalog over artifacts at the configured root.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(ModelCatalog::builtin(), VocabularyStore::from_config(config))
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &VocabularyStore {
        &self.store
    }

    /// Resolve `model_id` and load its vocabulary.
    ///
    /// Unknown ids are rejected before the store is consulted.
    pub fn create(&self, model_id: &str) -> Result<Encoder, TokenizerError> {
        let profile = self
            .catalog
            .get(model_id)
            .ok_or_else(|| TokenizerError::UnknownModel(model_id.to_string()))?;
        debug!(model = %model_id, engine = ?profile.engine(), "resolved encoding profile");

        let vocab = self.store.load(&profile.artifact())?;
        Encoder::new(Arc::clone(profile), vocab)
    }
}
