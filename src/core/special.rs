//! Special (added) token matching.
//!
//! Special tokens are recognised as literal substrings before any other
//! processing and are never re-tokenized. Matching is leftmost-longest so
//! that `<|im_start|>` wins over a shorter token sharing its prefix.
//!
//! Added tokens from `tokenizer.json` may also strip the whitespace around
//! them or only match as a whole word; see [`MatchOptions`].

use aho_corasick::{AhoCorasick, MatchKind};
use rustc_hash::FxHashMap;
use std::ops::Range;

use super::vocab::VocabError;

/// A piece of input after special token splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(Range<usize>),
    Special { id: u32, range: Range<usize> },
}

/// How one added token is matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Absorb the whitespace directly before the token.
    pub lstrip: bool,
    /// Absorb the whitespace directly after the token.
    pub rstrip: bool,
    /// Only match when not glued to a word character on either side.
    pub single_word: bool,
}

#[derive(Debug, Default)]
pub struct SpecialTokens {
    by_surface: FxHashMap<String, u32>,
    by_id: FxHashMap<u32, usize>,
    surfaces: Vec<String>,
    options: Vec<MatchOptions>,
    matcher: Option<AhoCorasick>,
}

impl SpecialTokens {
    /// Build the table, rejecting duplicate ids or surfaces.
    pub fn new<I, S>(tokens: I) -> Result<Self, VocabError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self::with_options(
            tokens
                .into_iter()
                .map(|(surface, id)| (surface, id, MatchOptions::default())),
        )
    }

    /// Like [`SpecialTokens::new`], with per-token match options.
    pub fn with_options<I, S>(tokens: I) -> Result<Self, VocabError>
    where
        I: IntoIterator<Item = (S, u32, MatchOptions)>,
        S: Into<String>,
    {
        let mut by_surface = FxHashMap::default();
        let mut by_id: FxHashMap<u32, usize> = FxHashMap::default();
        let mut surfaces: Vec<String> = Vec::new();
        let mut options = Vec::new();

        for (surface, id, opts) in tokens {
            let surface = surface.into();
            if surface.is_empty() {
                return Err(VocabError::InvalidVocabulary(format!(
                    "special token {} has an empty surface",
                    id
                )));
            }
            if let Some(&existing) = by_id.get(&id) {
                return Err(VocabError::InvalidVocabulary(format!(
                    "special token id {} assigned to both {:?} and {:?}",
                    id, surfaces[existing], surface
                )));
            }
            if by_surface.insert(surface.clone(), id).is_some() {
                return Err(VocabError::InvalidVocabulary(format!(
                    "special token {:?} declared twice",
                    surface
                )));
            }
            by_id.insert(id, surfaces.len());
            surfaces.push(surface);
            options.push(opts);
        }

        let matcher = if surfaces.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&surfaces)?,
            )
        };

        Ok(Self {
            by_surface,
            by_id,
            surfaces,
            options,
            matcher,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn id(&self, surface: &str) -> Option<u32> {
        self.by_surface.get(surface).copied()
    }

    pub fn surface(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(|&i| self.surfaces[i].as_str())
    }

    pub fn options(&self, id: u32) -> MatchOptions {
        self.by_id
            .get(&id)
            .map_or_else(MatchOptions::default, |&i| self.options[i])
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn max_id(&self) -> Option<u32> {
        self.by_id.keys().max().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.surfaces
            .iter()
            .map(move |s| (s.as_str(), self.by_surface[s]))
    }

    /// Split `text` into literal text ranges and special token matches.
    ///
    /// A match's range includes any whitespace its options strip. Empty text
    /// ranges are never emitted.
    pub fn split(&self, text: &[u8]) -> Vec<Fragment> {
        let Some(ref matcher) = self.matcher else {
            return if text.is_empty() {
                Vec::new()
            } else {
                vec![Fragment::Text(0..text.len())]
            };
        };

        let mut fragments = Vec::new();
        let mut last_end = 0;
        for m in matcher.find_iter(text) {
            if m.start() < last_end {
                continue;
            }
            let index = m.pattern().as_usize();
            let opts = self.options[index];
            if opts.single_word
                && (is_word_char(char_before(&text[..m.start()]))
                    || is_word_char(char_after(&text[m.end()..])))
            {
                continue;
            }

            let mut start = m.start();
            let mut end = m.end();
            if opts.lstrip {
                start -= trailing_whitespace(&text[last_end..start]);
            }
            if opts.rstrip {
                end += leading_whitespace(&text[end..]);
            }
            if start > last_end {
                fragments.push(Fragment::Text(last_end..start));
            }
            fragments.push(Fragment::Special {
                id: self.by_surface[&self.surfaces[index]],
                range: start..end,
            });
            last_end = end;
        }
        if last_end < text.len() {
            fragments.push(Fragment::Text(last_end..text.len()));
        }
        fragments
    }

    /// Length of the match of token `id` at the start of `text`, including
    /// the whitespace its options strip.
    pub fn match_len(&self, id: u32, text: &[u8]) -> Option<usize> {
        let index = *self.by_id.get(&id)?;
        let opts = self.options[index];
        let lead = if opts.lstrip { leading_whitespace(text) } else { 0 };
        let end = lead + self.surfaces[index].len();
        if !text[lead..].starts_with(self.surfaces[index].as_bytes()) {
            return None;
        }
        let trail = if opts.rstrip { leading_whitespace(&text[end..]) } else { 0 };
        Some(end + trail)
    }
}

/// Bytes of Unicode whitespace at the start of `bytes`.
pub(crate) fn leading_whitespace(bytes: &[u8]) -> usize {
    bytes.utf8_chunks().next().map_or(0, |chunk| {
        let valid = chunk.valid();
        valid.len() - valid.trim_start().len()
    })
}

fn trailing_whitespace(bytes: &[u8]) -> usize {
    match bytes.utf8_chunks().last() {
        Some(chunk) if chunk.invalid().is_empty() => {
            let valid = chunk.valid();
            valid.len() - valid.trim_end().len()
        }
        _ => 0,
    }
}

fn char_before(bytes: &[u8]) -> Option<char> {
    match bytes.utf8_chunks().last() {
        Some(chunk) if chunk.invalid().is_empty() => chunk.valid().chars().next_back(),
        _ => None,
    }
}

fn char_after(bytes: &[u8]) -> Option<char> {
    bytes.utf8_chunks().next().and_then(|chunk| chunk.valid().chars().next())
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_alphanumeric() || c == '_')
}
