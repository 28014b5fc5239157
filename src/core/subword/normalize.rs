//! Normalizers.
//!
//! Content normalizers (unicode forms, case folding, stripping) define the
//! text that token offsets refer to. Structural normalizers (`Prepend`,
//! `Replace`) only exist to feed the model its word-boundary markers and are
//! undone by the artifact's decoder.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::config::{NormalizerConfig, PatternConfig};
use crate::core::pattern::{Matcher, Pattern, PatternError};
use crate::core::vocab::VocabError;

#[derive(Debug)]
pub enum Normalizer {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
    Lowercase,
    Strip { left: bool, right: bool },
    StripAccents,
    Prepend(String),
    Replace { pattern: Matcher, content: String },
}

impl Normalizer {
    /// Flatten a (possibly nested) config into an ordered list.
    pub fn build(config: NormalizerConfig, out: &mut Vec<Normalizer>) -> Result<(), VocabError> {
        let normalizer = match config {
            NormalizerConfig::Nfc => Normalizer::Nfc,
            NormalizerConfig::Nfd => Normalizer::Nfd,
            NormalizerConfig::Nfkc => Normalizer::Nfkc,
            NormalizerConfig::Nfkd => Normalizer::Nfkd,
            NormalizerConfig::Lowercase => Normalizer::Lowercase,
            NormalizerConfig::Strip {
                strip_left,
                strip_right,
            } => Normalizer::Strip {
                left: strip_left,
                right: strip_right,
            },
            NormalizerConfig::StripAccents => Normalizer::StripAccents,
            NormalizerConfig::Prepend { prepend } => Normalizer::Prepend(prepend),
            NormalizerConfig::Replace { pattern, content } => Normalizer::Replace {
                pattern: build_matcher(pattern)?,
                content,
            },
            NormalizerConfig::Sequence { normalizers } => {
                for inner in normalizers {
                    Self::build(inner, out)?;
                }
                return Ok(());
            }
        };
        out.push(normalizer);
        Ok(())
    }

    /// Whether this normalizer changes the text offsets refer to.
    pub fn is_content(&self) -> bool {
        !matches!(self, Normalizer::Prepend(_) | Normalizer::Replace { .. })
    }

    pub fn apply(&self, text: String) -> Result<String, PatternError> {
        Ok(match self {
            Normalizer::Nfc => text.nfc().collect(),
            Normalizer::Nfd => text.nfd().collect(),
            Normalizer::Nfkc => text.nfkc().collect(),
            Normalizer::Nfkd => text.nfkd().collect(),
            Normalizer::Lowercase => text.to_lowercase(),
            Normalizer::Strip { left, right } => {
                let mut s = text.as_str();
                if *left {
                    s = s.trim_start();
                }
                if *right {
                    s = s.trim_end();
                }
                s.to_string()
            }
            Normalizer::StripAccents => text.chars().filter(|&c| !is_combining_mark(c)).collect(),
            Normalizer::Prepend(prefix) if !text.is_empty() => format!("{}{}", prefix, text),
            Normalizer::Prepend(_) => text,
            Normalizer::Replace { pattern, content } => pattern.replace_all(&text, content)?,
        })
    }
}

pub(crate) fn build_matcher(config: PatternConfig) -> Result<Matcher, VocabError> {
    Ok(match config {
        PatternConfig::String(literal) => Matcher::Literal(literal),
        PatternConfig::Regex(source) => Matcher::Regex(Pattern::new(&source)?),
    })
}

/// Run every normalizer in order.
pub fn normalize(normalizers: &[Normalizer], text: &str) -> Result<String, PatternError> {
    normalizers
        .iter()
        .try_fold(text.to_string(), |acc, n| n.apply(acc))
}

/// Run only the content normalizers, producing the text offsets refer to.
pub fn normalize_content(normalizers: &[Normalizer], text: &str) -> Result<String, PatternError> {
    normalizers
        .iter()
        .filter(|n| n.is_content())
        .try_fold(text.to_string(), |acc, n| n.apply(acc))
}
