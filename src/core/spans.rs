//! Token-to-span mapping.
//!
//! Given the ids an engine produced and the exact text it encoded, recover
//! each token's byte range. Ranges are contiguous: together they cover the
//! encoded text with no gaps or overlaps.
//!
//! Rank-table vocabularies must match byte for byte. Subword vocabularies
//! are mapped leniently. Boundary tokens and added tokens that do not occur
//! in the text are zero-width, `<unk>` spans the characters up to the next
//! matching token, a synthetic leading space is skipped, and whitespace the
//! pretokenizer discarded is absorbed into the following token (or the last
//! one at the end of the text). Added tokens with `lstrip`/`rstrip` cover the
//! whitespace they stripped.

use std::borrow::Cow;

use super::error::TokenizerError;
use super::subword::SubwordVocab;
use super::vocab::Vocabulary;

/// One token and the bytes of the encoded text it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub bytes: Vec<u8>,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Lossy UTF-8 view; byte-fallback tokens may split a character.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Map `ids` onto `encoded`.
///
/// Fails with `CorruptArtifact` when the ids cannot be laid over the text,
/// which means the vocabulary and the engine disagree.
pub fn map(vocab: &Vocabulary, ids: &[u32], encoded: &[u8]) -> Result<Vec<Token>, TokenizerError> {
    let mut mapper = Mapper {
        text: encoded,
        cursor: 0,
        tokens: Vec::with_capacity(ids.len()),
    };
    match vocab {
        Vocabulary::Ranked(_) => {
            for &id in ids {
                let surface = surface(vocab, id)?;
                if !mapper.rest().starts_with(&surface) {
                    return Err(mismatch(id, mapper.cursor));
                }
                mapper.push(id, surface.len());
            }
        }
        Vocabulary::Subword(subword) => map_subword(vocab, subword, ids, &mut mapper)?,
    }

    if mapper.cursor != encoded.len() {
        return Err(TokenizerError::corrupt(format!(
            "tokens cover {} of {} bytes",
            mapper.cursor,
            encoded.len()
        )));
    }
    Ok(mapper.tokens)
}

struct Mapper<'a> {
    text: &'a [u8],
    cursor: usize,
    tokens: Vec<Token>,
}

impl Mapper<'_> {
    fn rest(&self) -> &[u8] {
        &self.text[self.cursor..]
    }

    fn push(&mut self, id: u32, len: usize) {
        let start = self.cursor;
        self.cursor += len;
        self.tokens.push(Token {
            id,
            bytes: self.text[start..self.cursor].to_vec(),
            start,
            end: self.cursor,
        });
    }

    /// Width of the character at `offset` (1 for stray bytes).
    fn char_width(&self, offset: usize) -> usize {
        let width = match self.text.get(offset) {
            Some(&b) if b >= 0xF0 => 4,
            Some(&b) if b >= 0xE0 => 3,
            Some(&b) if b >= 0xC0 => 2,
            Some(_) => 1,
            None => 0,
        };
        width.min(self.text.len().saturating_sub(offset))
    }
}

fn map_subword(
    vocab: &Vocabulary,
    subword: &SubwordVocab,
    ids: &[u32],
    mapper: &mut Mapper<'_>,
) -> Result<(), TokenizerError> {
    let inserts_prefix = subword.inserts_prefix();
    let drops_text = subword.drops_text();
    let unk_id = subword.unk_id();

    for (i, &id) in ids.iter().enumerate() {
        let surface = surface(vocab, id)?;

        if let Some(len) = subword.added_tokens().match_len(id, mapper.rest()) {
            mapper.push(id, len);
            continue;
        }
        if let Some(len) = match_at(mapper.rest(), &surface, inserts_prefix) {
            mapper.push(id, len);
            continue;
        }

        if Some(id) == unk_id {
            let next = match ids.get(i + 1) {
                Some(&next) => Some(self::surface(vocab, next)?),
                None => None,
            };
            let mut len = mapper.char_width(mapper.cursor);
            while mapper.cursor + len < mapper.text.len() {
                let rest = &mapper.text[mapper.cursor + len..];
                if next
                    .as_ref()
                    .is_some_and(|n| match_at(rest, n, inserts_prefix).is_some_and(|l| l > 0))
                {
                    break;
                }
                len += mapper.char_width(mapper.cursor + len);
            }
            mapper.push(id, len);
            continue;
        }

        if subword.is_special(id) {
            mapper.push(id, 0);
            continue;
        }

        if drops_text {
            let skipped = leading_whitespace(mapper.rest());
            if skipped > 0 {
                if let Some(len) = match_at(&mapper.rest()[skipped..], &surface, inserts_prefix) {
                    mapper.push(id, skipped + len);
                    continue;
                }
            }
        }

        return Err(mismatch(id, mapper.cursor));
    }

    if drops_text && mapper.cursor < mapper.text.len() {
        match mapper.tokens.last_mut() {
            Some(last) => {
                let trailing = mapper.text.len() - mapper.cursor;
                if leading_whitespace(&mapper.text[mapper.cursor..]) == trailing {
                    last.end = mapper.text.len();
                    last.bytes = mapper.text[last.start..].to_vec();
                    mapper.cursor = mapper.text.len();
                }
            }
            // The pretokenizer discarded the whole text.
            None => mapper.cursor = mapper.text.len(),
        }
    }
    Ok(())
}

/// Length of `surface` at the start of `rest`, allowing for a synthetic
/// leading space the text never contained.
fn match_at(rest: &[u8], surface: &[u8], inserts_prefix: bool) -> Option<usize> {
    if rest.starts_with(surface) {
        return Some(surface.len());
    }
    match surface.strip_prefix(b" ") {
        Some(stripped) if inserts_prefix && rest.starts_with(stripped) => Some(stripped.len()),
        _ => None,
    }
}

fn leading_whitespace(bytes: &[u8]) -> usize {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => match std::str::from_utf8(&bytes[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return 0,
        },
    };
    text.char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(i, _)| i)
}

fn surface(vocab: &Vocabulary, id: u32) -> Result<Cow<'_, [u8]>, TokenizerError> {
    vocab
        .token_surface(id)
        .ok_or_else(|| TokenizerError::corrupt(format!("engine produced unknown id {}", id)))
}

fn mismatch(id: u32, offset: usize) -> TokenizerError {
    TokenizerError::corrupt(format!("token {} does not match the text at byte {}", id, offset))
}
