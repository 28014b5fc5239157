//! Pretokenization patterns.
//!
//! Rank-table encodings and `tokenizer.json` pipelines both split text with
//! regular expressions before merging. Patterns are compiled once at load
//! time. regexr (JIT enabled) is the default engine; building with the `pcre2`
//! feature makes PCRE2 the default instead, and either engine can be picked
//! explicitly with [`Pattern::with_engine`].

use regexr::{Regex as RegexrRegex, RegexBuilder};
use std::ops::Range;
use thiserror::Error;

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Regex compilation error (regexr): {0}")]
    RegexrError(#[from] regexr::Error),
    #[cfg(feature = "pcre2")]
    #[error("PCRE2 error: {0}")]
    Pcre2Error(#[from] pcre2::Error),
    #[error("PCRE2 feature not enabled. Compile with --features pcre2")]
    Pcre2NotEnabled,
}

/// Pattern for r50k_base / p50k_base and the GPT-2 style `ByteLevel` pretokenizer.
pub const R50K_BASE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Pattern for cl100k_base (GPT-4, GPT-3.5-turbo).
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Pattern for o200k_base (GPT-4o).
pub const O200K_BASE_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// `Whitespace` pretokenizer: word runs and punctuation runs.
pub const WHITESPACE_PATTERN: &str = r"\w+|[^\w\s]+";

/// Regex engine behind a [`Pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexEngine {
    Regexr,
    Pcre2,
}

impl Default for RegexEngine {
    fn default() -> Self {
        if cfg!(feature = "pcre2") {
            RegexEngine::Pcre2
        } else {
            RegexEngine::Regexr
        }
    }
}

enum RegexBackend {
    Regexr(Box<RegexrRegex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

impl RegexBackend {
    fn find_iter(&self, text: &str) -> Result<Vec<(usize, usize)>, PatternError> {
        match self {
            RegexBackend::Regexr(regex) => Ok(regex
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .collect()),
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => regex
                .find_iter(text.as_bytes())
                .map(|m| m.map(|m| (m.start(), m.end())).map_err(PatternError::from))
                .collect(),
        }
    }
}

/// A compiled splitting pattern.
pub struct Pattern {
    source: String,
    backend: RegexBackend,
}

impl Pattern {
    /// Compile with the default engine.
    pub fn new(source: &str) -> Result<Self, PatternError> {
        Self::with_engine(source, RegexEngine::default())
    }

    pub fn with_engine(source: &str, engine: RegexEngine) -> Result<Self, PatternError> {
        let backend = match engine {
            RegexEngine::Regexr => {
                RegexBackend::Regexr(Box::new(RegexBuilder::new(source).jit(true).build()?))
            }
            RegexEngine::Pcre2 => Self::pcre2_backend(source)?,
        };
        Ok(Self {
            source: source.to_string(),
            backend,
        })
    }

    #[cfg(feature = "pcre2")]
    fn pcre2_backend(source: &str) -> Result<RegexBackend, PatternError> {
        let mut builder = pcre2::bytes::RegexBuilder::new();
        builder.jit_if_available(true);
        builder.utf(true);
        builder.ucp(true);
        Ok(RegexBackend::Pcre2(builder.build(source)?))
    }

    #[cfg(not(feature = "pcre2"))]
    fn pcre2_backend(_source: &str) -> Result<RegexBackend, PatternError> {
        Err(PatternError::Pcre2NotEnabled)
    }

    pub fn engine(&self) -> RegexEngine {
        match self.backend {
            RegexBackend::Regexr(_) => RegexEngine::Regexr,
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(_) => RegexEngine::Pcre2,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Non-empty matches as `(start, end)` byte offsets.
    pub fn find_iter(&self, text: &str) -> Result<Vec<(usize, usize)>, PatternError> {
        let mut matches = self.backend.find_iter(text)?;
        matches.retain(|&(start, end)| end > start);
        Ok(matches)
    }

    /// Cut `text` into pieces at match boundaries.
    ///
    /// Text between matches is kept as its own piece so that the pieces
    /// always cover the input exactly.
    pub fn pieces(&self, text: &str) -> Result<Vec<Range<usize>>, PatternError> {
        let mut pieces = Vec::new();
        let mut last = 0;
        for (start, end) in self.find_iter(text)? {
            if start > last {
                pieces.push(last..start);
            }
            pieces.push(start..end);
            last = end;
        }
        if last < text.len() {
            pieces.push(last..text.len());
        }
        Ok(pieces)
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// Either a literal string or a regular expression, as used by `Replace`
/// normalizers and `Split` pretokenizers.
#[derive(Debug)]
pub enum Matcher {
    Literal(String),
    Regex(Pattern),
}

impl Matcher {
    pub fn find_iter(&self, text: &str) -> Result<Vec<(usize, usize)>, PatternError> {
        match self {
            Matcher::Literal(needle) if needle.is_empty() => Ok(Vec::new()),
            Matcher::Literal(needle) => Ok(text
                .match_indices(needle.as_str())
                .map(|(start, m)| (start, start + m.len()))
                .collect()),
            Matcher::Regex(pattern) => pattern.find_iter(text),
        }
    }

    /// Replace every match with `content`.
    pub fn replace_all(&self, text: &str, content: &str) -> Result<String, PatternError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end) in self.find_iter(text)? {
            out.push_str(&text[last..start]);
            out.push_str(content);
            last = end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}
