//! Generic subword engine driven by `tokenizer.json`.
//!
//! Pipeline per call:
//!
//! 1. Added tokens are matched as literal substrings (leftmost-longest) and
//!    emitted as single ids.
//! 2. Each remaining text segment is normalized, pretokenized into words and
//!    every word is run through the model ([`BpeModel`] merge rules or
//!    [`UnigramModel`] Viterbi).
//! 3. The post-processor's boundary tokens (BOS/EOS, CLS/SEP) are added
//!    around plain-text input by the encoder facade.
//!
//! The text reported as "encoded" for a segment is the output of the content
//! normalizers only; see [`normalize`].

mod config;
mod decode;
mod model;
mod normalize;
mod pretokenize;

pub use config::{TokenizerConfig, TokenizerJson};
pub use model::{parse_byte_token, BpeModel, BpeOptions, Model, UnigramModel};

use rustc_hash::FxHashSet;

use self::config::{ModelConfig, PostProcessorConfig, TemplatePiece};
use self::decode::Decoder;
use self::normalize::Normalizer;
use self::pretokenize::PreTokenizer;
use super::error::TokenizerError;
use super::special::{Fragment, MatchOptions, SpecialTokens};
use super::vocab::VocabError;

#[derive(Debug)]
pub struct SubwordVocab {
    model: Model,
    normalizers: Vec<Normalizer>,
    pretokenizers: Vec<PreTokenizer>,
    decoders: Vec<Decoder>,
    added: SpecialTokens,
    special_ids: FxHashSet<u32>,
    prefix_ids: Vec<u32>,
    suffix_ids: Vec<u32>,
    config: TokenizerConfig,
}

impl SubwordVocab {
    /// Parse `tokenizer.json` bytes, with the optional `tokenizer_config.json`.
    pub fn from_json(data: &[u8], config: Option<TokenizerConfig>) -> Result<Self, VocabError> {
        let json: TokenizerJson = serde_json::from_slice(data)?;
        Self::from_parts(json, config.unwrap_or_default())
    }

    pub fn from_parts(json: TokenizerJson, config: TokenizerConfig) -> Result<Self, VocabError> {
        let model = match json.model {
            ModelConfig::Bpe {
                continuing_subword_prefix: Some(prefix),
                ..
            } if !prefix.is_empty() => {
                return Err(VocabError::Unsupported(format!(
                    "BPE continuing_subword_prefix {:?}",
                    prefix
                )))
            }
            ModelConfig::Bpe {
                end_of_word_suffix: Some(suffix),
                ..
            } if !suffix.is_empty() => {
                return Err(VocabError::Unsupported(format!(
                    "BPE end_of_word_suffix {:?}",
                    suffix
                )))
            }
            ModelConfig::Bpe {
                vocab,
                merges,
                unk_token,
                fuse_unk,
                byte_fallback,
                ignore_merges,
                ..
            } => {
                let mut pairs = Vec::with_capacity(merges.len());
                for (rank, entry) in merges.into_iter().enumerate() {
                    pairs.push(entry.into_pair().ok_or_else(|| {
                        VocabError::InvalidVocabulary(format!("malformed merge {}", rank))
                    })?);
                }
                Model::Bpe(BpeModel::new(
                    vocab,
                    pairs,
                    BpeOptions {
                        unk_token,
                        fuse_unk,
                        byte_fallback,
                        ignore_merges,
                    },
                )?)
            }
            ModelConfig::Unigram {
                vocab,
                unk_id,
                byte_fallback,
            } => Model::Unigram(UnigramModel::new(vocab, unk_id, byte_fallback)?),
        };

        for token in &json.added_tokens {
            if let Some(existing) = model.id_to_token(token.id) {
                if existing != token.content {
                    return Err(VocabError::InvalidVocabulary(format!(
                        "added token {:?} reuses id {} of {:?}",
                        token.content, token.id, existing
                    )));
                }
            }
        }
        let mut normalizers = Vec::new();
        if let Some(config) = json.normalizer {
            Normalizer::build(config, &mut normalizers)?;
        }

        // Added tokens are matched on the raw text, which only agrees with
        // matching on normalized text when no normalizer rewrites content.
        if normalizers.iter().any(Normalizer::is_content) {
            if let Some(token) = json.added_tokens.iter().find(|t| t.is_normalized()) {
                return Err(VocabError::Unsupported(format!(
                    "normalized added token {:?} with a content normalizer",
                    token.content
                )));
            }
        }
        let special_ids = json
            .added_tokens
            .iter()
            .filter(|t| t.special)
            .map(|t| t.id)
            .collect();
        let added = SpecialTokens::with_options(json.added_tokens.into_iter().map(|t| {
            let options = MatchOptions {
                lstrip: t.lstrip,
                rstrip: t.rstrip,
                single_word: t.single_word,
            };
            (t.content, t.id, options)
        }))?;
        let mut pretokenizers = Vec::new();
        if let Some(config) = json.pre_tokenizer {
            PreTokenizer::build(config, &mut pretokenizers)?;
        }
        let mut decoders = Vec::new();
        if let Some(config) = json.decoder {
            Decoder::build(config, &mut decoders)?;
        }

        let mut vocab = Self {
            model,
            normalizers,
            pretokenizers,
            decoders,
            added,
            special_ids,
            prefix_ids: Vec::new(),
            suffix_ids: Vec::new(),
            config,
        };
        if let Some(post) = json.post_processor {
            vocab.build_post_processor(post)?;
        }
        Ok(vocab)
    }

    fn build_post_processor(&mut self, config: PostProcessorConfig) -> Result<(), VocabError> {
        match config {
            PostProcessorConfig::TemplateProcessing {
                single,
                special_tokens,
            } => {
                let mut seen_sequence = false;
                for piece in single {
                    match piece {
                        TemplatePiece::Sequence { .. } => seen_sequence = true,
                        TemplatePiece::SpecialToken { id } => {
                            let ids = &special_tokens
                                .get(&id)
                                .ok_or_else(|| {
                                    VocabError::InvalidVocabulary(format!(
                                        "template references undeclared token {:?}",
                                        id
                                    ))
                                })?
                                .ids;
                            self.check_ids(ids)?;
                            if seen_sequence {
                                self.suffix_ids.extend_from_slice(ids);
                            } else {
                                self.prefix_ids.extend_from_slice(ids);
                            }
                        }
                    }
                }
            }
            PostProcessorConfig::BertProcessing { sep, cls }
            | PostProcessorConfig::RobertaProcessing { sep, cls } => {
                self.check_ids(&[cls.1, sep.1])?;
                self.prefix_ids.push(cls.1);
                self.suffix_ids.push(sep.1);
            }
            PostProcessorConfig::ByteLevel {} => {}
            PostProcessorConfig::Sequence { processors } => {
                for inner in processors {
                    self.build_post_processor(inner)?;
                }
            }
        }
        Ok(())
    }

    fn check_ids(&self, ids: &[u32]) -> Result<(), VocabError> {
        match ids.iter().find(|&&id| self.token_string(id).is_none()) {
            Some(id) => Err(VocabError::InvalidVocabulary(format!(
                "post-processor emits unknown id {}",
                id
            ))),
            None => Ok(()),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn added_tokens(&self) -> &SpecialTokens {
        &self.added
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.model.unk_id()
    }

    /// Added tokens flagged `special`, plus any post-processor token.
    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id) || self.prefix_ids.contains(&id) || self.suffix_ids.contains(&id)
    }

    /// Ids placed before and after plain-text input.
    pub fn boundary_ids(&self) -> (&[u32], &[u32]) {
        (&self.prefix_ids, &self.suffix_ids)
    }

    /// Whether the pipeline may add a word-boundary marker at a segment start.
    pub fn inserts_prefix(&self) -> bool {
        self.normalizers
            .iter()
            .any(|n| matches!(n, Normalizer::Prepend(_)))
            || self.pretokenizers.iter().any(PreTokenizer::inserts_prefix)
    }

    /// Whether pretokenization may discard input characters.
    pub fn drops_text(&self) -> bool {
        self.pretokenizers.iter().any(PreTokenizer::drops_text)
    }

    fn token_string(&self, id: u32) -> Option<&str> {
        self.added.surface(id).or_else(|| self.model.id_to_token(id))
    }

    /// Bytes one token stands for in the encoded text.
    ///
    /// `None` for unknown ids and for tokens the decoders fail on.
    pub fn token_surface(&self, id: u32) -> Option<Vec<u8>> {
        if let Some(surface) = self.added.surface(id) {
            return Some(surface.as_bytes().to_vec());
        }
        let token = self.model.id_to_token(id)?;
        decode::token_surface(&self.decoders, token).ok()
    }

    pub fn vocab_size(&self) -> usize {
        let model_max = self.model.max_id().unwrap_or(0);
        let added_max = self.added.max_id().unwrap_or(0);
        model_max.max(added_max) as usize + 1
    }

    /// Encode one segment of text, appending ids and the offset-bearing text.
    ///
    /// `at_start` is true when the segment begins the whole input.
    pub fn encode_segment(
        &self,
        text: &str,
        at_start: bool,
        ids: &mut Vec<u32>,
        encoded: &mut String,
    ) -> Result<(), TokenizerError> {
        for fragment in self.added.split(text.as_bytes()) {
            match fragment {
                Fragment::Special { id, range } => {
                    ids.push(id);
                    encoded.push_str(&text[range]);
                }
                Fragment::Text(range) => {
                    let raw = &text[range.clone()];
                    encoded.push_str(&normalize::normalize_content(&self.normalizers, raw)?);
                    let normalized = normalize::normalize(&self.normalizers, raw)?;
                    let words = pretokenize::pretokenize(
                        &self.pretokenizers,
                        normalized,
                        at_start && range.start == 0,
                    )?;
                    for word in words {
                        self.model.tokenize(&word, ids);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Encode text without boundary tokens.
pub fn encode(vocab: &SubwordVocab, text: &str) -> Result<Vec<u32>, TokenizerError> {
    let mut ids = Vec::new();
    let mut encoded = String::with_capacity(text.len());
    vocab.encode_segment(text, true, &mut ids, &mut encoded)?;
    Ok(ids)
}

/// Run the artifact's decoder over the ids' token strings.
pub fn decode(vocab: &SubwordVocab, ids: &[u32]) -> Result<Vec<u8>, TokenizerError> {
    let tokens = ids
        .iter()
        .map(|&id| {
            vocab
                .token_string(id)
                .map(|t| t.as_bytes().to_vec())
                .ok_or(TokenizerError::UnknownToken(id))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(decode::decode_tokens(&vocab.decoders, tokens)?)
}
