//! Decoders: turn model tokens back into text bytes.
//!
//! Tokens are handled as raw bytes throughout because byte-fallback tokens
//! can carry partial UTF-8 sequences.

use super::config::{DecoderConfig, PrependScheme};
use super::model::parse_byte_token;
use super::normalize::build_matcher;
use super::pretokenize::prepend_scheme;
use crate::core::byte_level::byte_level_decode;
use crate::core::pattern::{Matcher, PatternError};
use crate::core::vocab::VocabError;

#[derive(Debug)]
pub enum Decoder {
    ByteLevel,
    Metaspace { replacement: char, strip_first: bool },
    ByteFallback,
    Fuse,
    Strip { content: char, start: usize, stop: usize },
    Replace { pattern: Matcher, content: String },
}

impl Decoder {
    pub fn build(config: DecoderConfig, out: &mut Vec<Decoder>) -> Result<(), VocabError> {
        let decoder = match config {
            DecoderConfig::ByteLevel {} => Decoder::ByteLevel,
            DecoderConfig::Metaspace {
                replacement,
                prepend_scheme: scheme,
                add_prefix_space,
            } => Decoder::Metaspace {
                replacement,
                strip_first: prepend_scheme(scheme, add_prefix_space) != PrependScheme::Never,
            },
            DecoderConfig::ByteFallback {} => Decoder::ByteFallback,
            DecoderConfig::Fuse {} => Decoder::Fuse,
            DecoderConfig::Strip {
                content,
                start,
                stop,
            } => Decoder::Strip {
                content,
                start,
                stop,
            },
            DecoderConfig::Replace { pattern, content } => Decoder::Replace {
                pattern: build_matcher(pattern)?,
                content,
            },
            DecoderConfig::Sequence { decoders } => {
                for inner in decoders {
                    Self::build(inner, out)?;
                }
                return Ok(());
            }
        };
        out.push(decoder);
        Ok(())
    }

    /// Transform one token on its own. Steps that only make sense across the
    /// whole sequence (fusing, stripping the first prefix) are skipped.
    fn decode_token(&self, token: Vec<u8>) -> Result<Vec<u8>, PatternError> {
        Ok(match self {
            Decoder::ByteLevel => match std::str::from_utf8(&token).ok().and_then(byte_level_decode) {
                Some(bytes) => bytes,
                None => token,
            },
            Decoder::Metaspace { replacement, .. } => {
                let mut buf = [0u8; 4];
                replace_bytes(&token, replacement.encode_utf8(&mut buf).as_bytes(), b" ")
            }
            Decoder::ByteFallback => match std::str::from_utf8(&token).ok().and_then(parse_byte_token) {
                Some(byte) => vec![byte],
                None => token,
            },
            Decoder::Replace { pattern, content } => match (pattern, std::str::from_utf8(&token)) {
                (Matcher::Literal(needle), _) => {
                    replace_bytes(&token, needle.as_bytes(), content.as_bytes())
                }
                (Matcher::Regex(_), Ok(text)) => pattern.replace_all(text, content)?.into_bytes(),
                (Matcher::Regex(_), Err(_)) => token,
            },
            Decoder::Fuse | Decoder::Strip { .. } => token,
        })
    }

    fn decode_chain(&self, tokens: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, PatternError> {
        match self {
            Decoder::Fuse => Ok(vec![tokens.concat()]),
            Decoder::Strip {
                content,
                start,
                stop,
            } => Ok(tokens
                .into_iter()
                .map(|token| strip_token(token, *content, *start, *stop))
                .collect()),
            Decoder::Metaspace {
                strip_first: true, ..
            } => tokens
                .into_iter()
                .enumerate()
                .map(|(i, token)| {
                    let token = self.decode_token(token)?;
                    Ok(match token.strip_prefix(b" ") {
                        Some(rest) if i == 0 => rest.to_vec(),
                        _ => token,
                    })
                })
                .collect(),
            _ => tokens.into_iter().map(|t| self.decode_token(t)).collect(),
        }
    }
}

/// Decode a full id sequence's token strings.
pub fn decode_tokens(decoders: &[Decoder], tokens: Vec<Vec<u8>>) -> Result<Vec<u8>, PatternError> {
    Ok(decoders
        .iter()
        .try_fold(tokens, |acc, d| d.decode_chain(acc))?
        .concat())
}

/// Bytes one token contributes when decoded in isolation.
pub fn token_surface(decoders: &[Decoder], token: &str) -> Result<Vec<u8>, PatternError> {
    decoders
        .iter()
        .try_fold(token.as_bytes().to_vec(), |acc, d| d.decode_token(acc))
}

fn replace_bytes(haystack: &[u8], needle: &[u8], with: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(with);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

fn strip_token(token: Vec<u8>, content: char, start: usize, stop: usize) -> Vec<u8> {
    let mut buf = [0u8; 4];
    let unit = content.encode_utf8(&mut buf).as_bytes();
    let mut slice = token.as_slice();
    for _ in 0..start {
        match slice.strip_prefix(unit) {
            Some(rest) => slice = rest,
            None => break,
        }
    }
    for _ in 0..stop {
        match slice.strip_suffix(unit) {
            Some(rest) => slice = rest,
            None => break,
        }
    }
    slice.to_vec()
}
