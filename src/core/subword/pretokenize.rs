//! Pretokenizers: split normalized text into the words the model merges.

use super::config::{PreTokenizerConfig, PrependScheme, SplitBehavior};
use super::normalize::build_matcher;
use crate::core::byte_level::byte_level_encode;
use crate::core::pattern::{Matcher, Pattern, PatternError, R50K_BASE_PATTERN, WHITESPACE_PATTERN};
use crate::core::vocab::VocabError;

#[derive(Debug)]
pub enum PreTokenizer {
    ByteLevel {
        add_prefix_space: bool,
        split: Option<Pattern>,
    },
    Split {
        pattern: Matcher,
        behavior: SplitBehavior,
        invert: bool,
    },
    Metaspace {
        replacement: char,
        scheme: PrependScheme,
        split: bool,
    },
    Whitespace(Pattern),
    WhitespaceSplit,
    Digits {
        individual: bool,
    },
    Punctuation {
        behavior: SplitBehavior,
    },
}

/// Prepend scheme of a legacy `add_prefix_space` flag, or of an explicit scheme.
pub(crate) fn prepend_scheme(
    scheme: Option<PrependScheme>,
    add_prefix_space: Option<bool>,
) -> PrependScheme {
    match (scheme, add_prefix_space) {
        (Some(scheme), _) => scheme,
        (None, Some(false)) => PrependScheme::Never,
        (None, _) => PrependScheme::Always,
    }
}

impl PreTokenizer {
    pub fn build(config: PreTokenizerConfig, out: &mut Vec<PreTokenizer>) -> Result<(), VocabError> {
        let pre = match config {
            PreTokenizerConfig::ByteLevel {
                add_prefix_space,
                use_regex,
            } => PreTokenizer::ByteLevel {
                add_prefix_space,
                split: if use_regex {
                    Some(Pattern::new(R50K_BASE_PATTERN)?)
                } else {
                    None
                },
            },
            PreTokenizerConfig::Split {
                pattern,
                behavior,
                invert,
            } => PreTokenizer::Split {
                pattern: build_matcher(pattern)?,
                behavior,
                invert,
            },
            PreTokenizerConfig::Metaspace {
                replacement,
                prepend_scheme: scheme,
                add_prefix_space,
                split,
            } => PreTokenizer::Metaspace {
                replacement,
                scheme: prepend_scheme(scheme, add_prefix_space),
                split,
            },
            PreTokenizerConfig::Whitespace {} => {
                PreTokenizer::Whitespace(Pattern::new(WHITESPACE_PATTERN)?)
            }
            PreTokenizerConfig::WhitespaceSplit {} => PreTokenizer::WhitespaceSplit,
            PreTokenizerConfig::Digits { individual_digits } => PreTokenizer::Digits {
                individual: individual_digits,
            },
            PreTokenizerConfig::Punctuation { behavior } => PreTokenizer::Punctuation { behavior },
            PreTokenizerConfig::Sequence { pretokenizers } => {
                for inner in pretokenizers {
                    Self::build(inner, out)?;
                }
                return Ok(());
            }
        };
        out.push(pre);
        Ok(())
    }

    /// Whether this step may insert a boundary marker the input never had.
    pub fn inserts_prefix(&self) -> bool {
        match self {
            PreTokenizer::ByteLevel {
                add_prefix_space, ..
            } => *add_prefix_space,
            PreTokenizer::Metaspace { scheme, .. } => *scheme != PrependScheme::Never,
            _ => false,
        }
    }

    /// Whether this step can drop input characters entirely.
    pub fn drops_text(&self) -> bool {
        match self {
            PreTokenizer::Whitespace(_) | PreTokenizer::WhitespaceSplit => true,
            PreTokenizer::Split { behavior, .. } | PreTokenizer::Punctuation { behavior } => {
                *behavior == SplitBehavior::Removed
            }
            _ => false,
        }
    }

    fn apply(&self, piece: String, at_start: bool, out: &mut Vec<String>) -> Result<(), PatternError> {
        match self {
            PreTokenizer::ByteLevel {
                add_prefix_space,
                split,
            } => {
                let piece = if *add_prefix_space && !piece.starts_with(' ') {
                    format!(" {}", piece)
                } else {
                    piece
                };
                match split {
                    Some(pattern) => {
                        for range in pattern.pieces(&piece)? {
                            out.push(byte_level_encode(piece[range].as_bytes()));
                        }
                    }
                    None => out.push(byte_level_encode(piece.as_bytes())),
                }
            }
            PreTokenizer::Split {
                pattern,
                behavior,
                invert,
            } => {
                let matches = pattern.find_iter(&piece)?;
                split_pieces(&piece, &matches, *behavior, *invert, out);
            }
            PreTokenizer::Metaspace {
                replacement,
                scheme,
                split,
            } => {
                let mut replaced: String = piece
                    .chars()
                    .map(|c| if c == ' ' { *replacement } else { c })
                    .collect();
                let prepend = match scheme {
                    PrependScheme::Always => true,
                    PrependScheme::First => at_start,
                    PrependScheme::Never => false,
                };
                if prepend && !replaced.starts_with(*replacement) {
                    replaced.insert(0, *replacement);
                }
                if *split {
                    let matches = char_matches(&replaced, |c| c == *replacement);
                    split_pieces(&replaced, &matches, SplitBehavior::MergedWithNext, false, out);
                } else {
                    out.push(replaced);
                }
            }
            PreTokenizer::Whitespace(pattern) => {
                let matches = pattern.find_iter(&piece)?;
                split_pieces(&piece, &matches, SplitBehavior::Removed, true, out);
            }
            PreTokenizer::WhitespaceSplit => {
                out.extend(piece.split_whitespace().map(str::to_string));
            }
            PreTokenizer::Digits { individual } => {
                let matches = char_matches(&piece, |c| c.is_ascii_digit());
                let behavior = if *individual {
                    SplitBehavior::Isolated
                } else {
                    SplitBehavior::Contiguous
                };
                split_pieces(&piece, &matches, behavior, false, out);
            }
            PreTokenizer::Punctuation { behavior } => {
                let matches = char_matches(&piece, |c| c.is_ascii_punctuation());
                split_pieces(&piece, &matches, *behavior, false, out);
            }
        }
        Ok(())
    }
}

/// Run the pretokenizers in order; `at_start` marks a segment at offset 0.
pub fn pretokenize(
    pretokenizers: &[PreTokenizer],
    text: String,
    at_start: bool,
) -> Result<Vec<String>, PatternError> {
    let mut pieces = vec![text];
    for pre in pretokenizers {
        let mut next = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.into_iter().enumerate() {
            pre.apply(piece, at_start && i == 0, &mut next)?;
        }
        pieces = next;
    }
    pieces.retain(|p| !p.is_empty());
    Ok(pieces)
}

fn char_matches(text: &str, pred: impl Fn(char) -> bool) -> Vec<(usize, usize)> {
    text.char_indices()
        .filter(|&(_, c)| pred(c))
        .map(|(i, c)| (i, i + c.len_utf8()))
        .collect()
}

/// Apply a split behavior to a list of matches, pushing non-empty pieces.
fn split_pieces(
    text: &str,
    matches: &[(usize, usize)],
    behavior: SplitBehavior,
    invert: bool,
    out: &mut Vec<String>,
) {
    let mut segments: Vec<(usize, usize, bool)> = Vec::with_capacity(matches.len() * 2 + 1);
    let mut last = 0;
    for &(start, end) in matches {
        if start > last {
            segments.push((last, start, false));
        }
        segments.push((start, end, true));
        last = end;
    }
    if last < text.len() {
        segments.push((last, text.len(), false));
    }
    if invert {
        for seg in segments.iter_mut() {
            seg.2 = !seg.2;
        }
    }

    let merged: Vec<(usize, usize)> = match behavior {
        SplitBehavior::Removed => segments
            .iter()
            .filter(|s| !s.2)
            .map(|&(start, end, _)| (start, end))
            .collect(),
        SplitBehavior::Isolated => segments.iter().map(|&(start, end, _)| (start, end)).collect(),
        SplitBehavior::MergedWithPrevious => {
            let mut acc: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for &(start, end, is_match) in &segments {
                match acc.last_mut() {
                    Some(last) if is_match && !previous_match => last.1 = end,
                    _ => acc.push((start, end)),
                }
                previous_match = is_match;
            }
            acc
        }
        SplitBehavior::MergedWithNext => {
            let mut acc: Vec<(usize, usize)> = Vec::new();
            let mut next_match = false;
            for &(start, end, is_match) in segments.iter().rev() {
                match acc.last_mut() {
                    Some(last) if is_match && !next_match => last.0 = start,
                    _ => acc.push((start, end)),
                }
                next_match = is_match;
            }
            acc.reverse();
            acc
        }
        SplitBehavior::Contiguous => {
            let mut acc: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for &(start, end, is_match) in &segments {
                match acc.last_mut() {
                    Some(last) if is_match == previous_match => last.1 = end,
                    _ => acc.push((start, end)),
                }
                previous_match = is_match;
            }
            acc
        }
    };

    out.extend(
        merged
            .into_iter()
            .filter(|&(start, end)| end > start)
            .map(|(start, end)| text[start..end].to_string()),
    );
}
