//! Fixed rank-table byte pair encoding.
//!
//! This is the algorithm used by the tiktoken encodings: a piece of text is
//! split into single bytes, then the adjacent pair whose concatenation has the
//! lowest rank is merged, repeatedly, until no adjacent pair forms a known
//! token. When several pairs share the lowest rank the leftmost one wins.
//!
//! Working on raw bytes is equivalent to working on the GPT-2 byte-to-unicode
//! remapped string (see [`byte_level`](super::byte_level)): the remap is a
//! bijection, so ranks keyed by raw bytes merge identically.

use std::str::Utf8Chunk;

use super::error::TokenizerError;
use super::pattern::Pattern;
use super::special::{Fragment, SpecialTokens};
use super::vocab::{RankTable, VocabError};

/// Everything the BPE engine needs for one encoding.
#[derive(Debug)]
pub struct RankedVocab {
    ranks: RankTable,
    specials: SpecialTokens,
    pattern: Pattern,
}

impl RankedVocab {
    /// Bundle a rank table with its special tokens and split pattern.
    ///
    /// Special token ids must not collide with ranks.
    pub fn new(
        ranks: RankTable,
        specials: SpecialTokens,
        pattern: Pattern,
    ) -> Result<Self, VocabError> {
        for (surface, id) in specials.iter() {
            if ranks.token_bytes(id).is_some() {
                return Err(VocabError::InvalidVocabulary(format!(
                    "special token {:?} reuses rank {}",
                    surface, id
                )));
            }
        }
        Ok(Self {
            ranks,
            specials,
            pattern,
        })
    }

    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.specials
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn token_surface(&self, id: u32) -> Option<&[u8]> {
        self.ranks
            .token_bytes(id)
            .or_else(|| self.specials.surface(id).map(str::as_bytes))
    }

    pub fn vocab_size(&self) -> usize {
        let max_rank = self.ranks.max_rank().unwrap_or(0);
        let max_special = self.specials.max_id().unwrap_or(0);
        max_rank.max(max_special) as usize + 1
    }
}

/// Merge a piece of at least two bytes, returning part boundaries.
///
/// `parts[i].0` is the start offset of part `i`; `parts[i].1` caches the rank
/// of merging part `i` with part `i + 1`. Ties resolve leftmost because the
/// scan only replaces the running minimum on a strictly lower rank.
fn byte_pair_merge(ranks: &RankTable, piece: &[u8]) -> Vec<(usize, u32)> {
    let mut parts = Vec::with_capacity(piece.len() + 1);

    let mut min_rank: (u32, usize) = (u32::MAX, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = ranks.rank(&piece[i..i + 2]).unwrap_or(u32::MAX);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    parts.push((piece.len() - 1, u32::MAX));
    parts.push((piece.len(), u32::MAX));

    let get_rank = |parts: &Vec<(usize, u32)>, i: usize| {
        if i + 3 < parts.len() {
            ranks
                .rank(&piece[parts[i].0..parts[i + 3].0])
                .unwrap_or(u32::MAX)
        } else {
            u32::MAX
        }
    };

    while min_rank.0 != u32::MAX {
        let i = min_rank.1;
        if i > 0 {
            parts[i - 1].1 = get_rank(&parts, i - 1);
        }
        parts[i].1 = get_rank(&parts, i);
        parts.remove(i + 1);

        min_rank = (u32::MAX, usize::MAX);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }
    }

    parts
}

/// Encode one pretokenized piece.
pub fn byte_pair_encode(piece: &[u8], ranks: &RankTable) -> Vec<u32> {
    if piece.is_empty() {
        return Vec::new();
    }
    if let Some(rank) = ranks.rank(piece) {
        return vec![rank];
    }
    if piece.len() == 1 {
        return vec![ranks.byte_rank(piece[0])];
    }

    let parts = byte_pair_merge(ranks, piece);
    let mut out = Vec::with_capacity(parts.len());
    for w in parts.windows(2) {
        let part = &piece[w[0].0..w[1].0];
        match ranks.rank(part) {
            Some(rank) => out.push(rank),
            // Only reachable for a single byte, which the table always ranks.
            None => out.extend(part.iter().map(|&b| ranks.byte_rank(b))),
        }
    }
    out
}

/// Encode text without recognising special tokens.
///
/// Invalid UTF-8 runs bypass the split pattern and are merged on their own,
/// which in practice yields single-byte tokens.
pub fn encode_ordinary(vocab: &RankedVocab, text: &[u8]) -> Result<Vec<u32>, TokenizerError> {
    let mut out = Vec::new();
    for chunk in text.utf8_chunks() {
        encode_chunk(vocab, chunk, &mut out)?;
    }
    Ok(out)
}

fn encode_chunk(
    vocab: &RankedVocab,
    chunk: Utf8Chunk<'_>,
    out: &mut Vec<u32>,
) -> Result<(), TokenizerError> {
    let valid = chunk.valid();
    for range in vocab.pattern.pieces(valid)? {
        out.extend(byte_pair_encode(&valid.as_bytes()[range], &vocab.ranks));
    }
    out.extend(byte_pair_encode(chunk.invalid(), &vocab.ranks));
    Ok(())
}

/// Encode text, emitting declared special tokens verbatim.
pub fn encode(vocab: &RankedVocab, text: &[u8]) -> Result<Vec<u32>, TokenizerError> {
    let mut out = Vec::new();
    for fragment in vocab.specials.split(text) {
        match fragment {
            Fragment::Text(range) => out.extend(encode_ordinary(vocab, &text[range])?),
            Fragment::Special { id, .. } => out.push(id),
        }
    }
    Ok(out)
}

/// Concatenate token surfaces.
pub fn decode(vocab: &RankedVocab, ids: &[u32]) -> Result<Vec<u8>, TokenizerError> {
    let mut out = Vec::with_capacity(ids.len() * 4);
    for &id in ids {
        let surface = vocab
            .token_surface(id)
            .ok_or(TokenizerError::UnknownToken(id))?;
        out.extend_from_slice(surface);
    }
    Ok(out)
}
