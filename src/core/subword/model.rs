//! Subword models: merge-rule BPE and Unigram (Viterbi).

use rustc_hash::FxHashMap;

use crate::core::vocab::VocabError;

/// Unknown pieces cost this much more than the rarest known piece.
const UNK_PENALTY: f64 = 10.0;

/// Ids of the `<0xXX>` tokens, when the vocabulary has all 256 of them.
fn byte_fallback_ids(lookup: impl Fn(&str) -> Option<u32>) -> Option<[u32; 256]> {
    let mut ids = [0u32; 256];
    for (b, slot) in ids.iter_mut().enumerate() {
        *slot = lookup(&format!("<0x{:02X}>", b))?;
    }
    Some(ids)
}

/// Parse a `<0xXX>` byte token.
pub fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

#[derive(Debug)]
pub enum Model {
    Bpe(BpeModel),
    Unigram(UnigramModel),
}

impl Model {
    pub fn tokenize(&self, word: &str, out: &mut Vec<u32>) {
        match self {
            Model::Bpe(model) => model.tokenize(word, out),
            Model::Unigram(model) => model.tokenize(word, out),
        }
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        match self {
            Model::Bpe(model) => model.vocab_r.get(&id).map(String::as_str),
            Model::Unigram(model) => model.vocab_r.get(id as usize).map(String::as_str),
        }
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        match self {
            Model::Bpe(model) => model.vocab.get(token).copied(),
            Model::Unigram(model) => model.pieces.get(token).map(|&(id, _)| id),
        }
    }

    pub fn unk_id(&self) -> Option<u32> {
        match self {
            Model::Bpe(model) => model.unk_id,
            Model::Unigram(model) => model.unk_id,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Model::Bpe(model) => model.vocab.len(),
            Model::Unigram(model) => model.vocab_r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_id(&self) -> Option<u32> {
        match self {
            Model::Bpe(model) => model.vocab_r.keys().max().copied(),
            Model::Unigram(model) => model.vocab_r.len().checked_sub(1).map(|n| n as u32),
        }
    }
}

#[derive(Debug)]
pub struct BpeModel {
    vocab: FxHashMap<String, u32>,
    vocab_r: FxHashMap<u32, String>,
    /// (left, right) → (priority, merged id)
    merges: FxHashMap<(u32, u32), (u32, u32)>,
    unk_id: Option<u32>,
    fuse_unk: bool,
    byte_ids: Option<[u32; 256]>,
    ignore_merges: bool,
}

pub struct BpeOptions {
    pub unk_token: Option<String>,
    pub fuse_unk: bool,
    pub byte_fallback: bool,
    pub ignore_merges: bool,
}

impl BpeModel {
    /// Build the model, checking that every merge only references known
    /// tokens and produces a known token.
    pub fn new(
        vocab: FxHashMap<String, u32>,
        merges: Vec<(String, String)>,
        options: BpeOptions,
    ) -> Result<Self, VocabError> {
        let mut vocab_r = FxHashMap::default();
        for (token, &id) in &vocab {
            if let Some(other) = vocab_r.insert(id, token.clone()) {
                return Err(VocabError::InvalidVocabulary(format!(
                    "id {} assigned to both {:?} and {:?}",
                    id, other, token
                )));
            }
        }

        let lookup = |token: &str, rank: usize| {
            vocab.get(token).copied().ok_or_else(|| {
                VocabError::InvalidVocabulary(format!(
                    "merge {} references unknown token {:?}",
                    rank, token
                ))
            })
        };

        let mut merge_map = FxHashMap::default();
        for (rank, (left, right)) in merges.into_iter().enumerate() {
            let left_id = lookup(&left, rank)?;
            let right_id = lookup(&right, rank)?;
            let merged_id = lookup(&format!("{}{}", left, right), rank)?;
            merge_map
                .entry((left_id, right_id))
                .or_insert((rank as u32, merged_id));
        }

        let unk_id = match options.unk_token {
            Some(unk) => Some(vocab.get(&unk).copied().ok_or_else(|| {
                VocabError::InvalidVocabulary(format!("unk token {:?} not in vocabulary", unk))
            })?),
            None => None,
        };

        let byte_ids = if options.byte_fallback {
            byte_fallback_ids(|t| vocab.get(t).copied())
        } else {
            None
        };

        Ok(Self {
            vocab,
            vocab_r,
            merges: merge_map,
            unk_id,
            fuse_unk: options.fuse_unk,
            byte_ids,
            ignore_merges: options.ignore_merges,
        })
    }

    pub fn tokenize(&self, word: &str, out: &mut Vec<u32>) {
        if self.ignore_merges {
            if let Some(&id) = self.vocab.get(word) {
                out.push(id);
                return;
            }
        }

        let mut symbols: Vec<u32> = Vec::with_capacity(word.len());
        let mut last_was_unk = false;
        let mut buf = [0u8; 4];
        for ch in word.chars() {
            if let Some(&id) = self.vocab.get(&*ch.encode_utf8(&mut buf)) {
                symbols.push(id);
                last_was_unk = false;
            } else if let Some(byte_ids) = &self.byte_ids {
                symbols.extend(ch.to_string().bytes().map(|b| byte_ids[b as usize]));
                last_was_unk = false;
            } else if let Some(unk) = self.unk_id {
                if !(self.fuse_unk && last_was_unk) {
                    symbols.push(unk);
                }
                last_was_unk = true;
            }
        }

        loop {
            let mut best: Option<(u32, usize, u32)> = None;
            for i in 0..symbols.len().saturating_sub(1) {
                if let Some(&(rank, merged)) = self.merges.get(&(symbols[i], symbols[i + 1])) {
                    if best.map_or(true, |(best_rank, _, _)| rank < best_rank) {
                        best = Some((rank, i, merged));
                    }
                }
            }
            match best {
                Some((_, i, merged)) => {
                    symbols[i] = merged;
                    symbols.remove(i + 1);
                }
                None => break,
            }
        }

        out.extend(symbols);
    }
}

#[derive(Debug)]
pub struct UnigramModel {
    pieces: FxHashMap<String, (u32, f64)>,
    vocab_r: Vec<String>,
    unk_id: Option<u32>,
    unk_score: f64,
    byte_ids: Option<[u32; 256]>,
    max_piece_len: usize,
}

impl UnigramModel {
    pub fn new(
        vocab: Vec<(String, f64)>,
        unk_id: Option<usize>,
        byte_fallback: bool,
    ) -> Result<Self, VocabError> {
        if let Some(unk) = unk_id {
            if unk >= vocab.len() {
                return Err(VocabError::InvalidVocabulary(format!(
                    "unk_id {} out of range for {} pieces",
                    unk,
                    vocab.len()
                )));
            }
        }

        let mut pieces = FxHashMap::default();
        let mut min_score = f64::INFINITY;
        let mut max_piece_len = 1;
        for (id, (piece, score)) in vocab.iter().enumerate() {
            if pieces.insert(piece.clone(), (id as u32, *score)).is_some() {
                return Err(VocabError::InvalidVocabulary(format!(
                    "piece {:?} declared twice",
                    piece
                )));
            }
            min_score = min_score.min(*score);
            max_piece_len = max_piece_len.max(piece.len());
        }
        let byte_ids = if byte_fallback {
            byte_fallback_ids(|t| pieces.get(t).map(|&(id, _)| id))
        } else {
            None
        };

        Ok(Self {
            pieces,
            vocab_r: vocab.into_iter().map(|(piece, _)| piece).collect(),
            unk_id: unk_id.map(|id| id as u32),
            unk_score: min_score - UNK_PENALTY,
            byte_ids,
            max_piece_len,
        })
    }

    /// Highest scoring segmentation of `word`.
    pub fn tokenize(&self, word: &str, out: &mut Vec<u32>) {
        if word.is_empty() {
            return;
        }
        let n = word.len();
        // best[end] = (score, start, piece id or None for unknown)
        let mut best: Vec<Option<(f64, usize, Option<u32>)>> = vec![None; n + 1];
        best[0] = Some((0.0, 0, None));

        for (start, ch) in word.char_indices() {
            let Some((base, _, _)) = best[start] else {
                continue;
            };
            let char_end = start + ch.len_utf8();
            let mut covered = false;
            let limit = (start + self.max_piece_len).min(n);
            for end in (char_end..=limit).filter(|&e| word.is_char_boundary(e)) {
                if let Some(&(id, score)) = self.pieces.get(&word[start..end]) {
                    relax(&mut best[end], base + score, start, Some(id));
                    covered |= end == char_end;
                }
            }
            if !covered {
                relax(&mut best[char_end], base + self.unk_score, start, None);
            }
        }

        let mut path = Vec::new();
        let mut end = n;
        while end > 0 {
            let Some((_, start, id)) = best[end] else {
                break;
            };
            path.push((start, end, id));
            end = start;
        }
        path.reverse();

        let mut last_was_unk = false;
        for (start, end, id) in path {
            match id {
                Some(id) => {
                    out.push(id);
                    last_was_unk = false;
                }
                None => {
                    if let Some(byte_ids) = &self.byte_ids {
                        out.extend(word[start..end].bytes().map(|b| byte_ids[b as usize]));
                        last_was_unk = false;
                    } else if let Some(unk) = self.unk_id {
                        if !last_was_unk {
                            out.push(unk);
                        }
                        last_was_unk = true;
                    }
                }
            }
        }
    }
}

fn relax(slot: &mut Option<(f64, usize, Option<u32>)>, score: f64, start: usize, id: Option<u32>) {
    if slot.map_or(true, |(current, _, _)| score > current) {
        *slot = Some((score, start, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpe(vocab: &[(&str, u32)], merges: &[(&str, &str)], options: BpeOptions) -> BpeModel {
        let vocab = vocab.iter().map(|&(t, id)| (t.to_string(), id)).collect();
        let merges = merges
            .iter()
            .map(|&(l, r)| (l.to_string(), r.to_string()))
            .collect();
        BpeModel::new(vocab, merges, options).unwrap()
    }

    fn plain() -> BpeOptions {
        BpeOptions {
            unk_token: None,
            fuse_unk: false,
            byte_fallback: false,
            ignore_merges: false,
        }
    }

    #[test]
    fn test_bpe_merge_priority() {
        let model = bpe(
            &[("a", 0), ("b", 1), ("c", 2), ("ab", 3), ("bc", 4)],
            &[("b", "c"), ("a", "b")],
            plain(),
        );
        let mut out = Vec::new();
        model.tokenize("abc", &mut out);
        assert_eq!(out, vec![0, 4]);
    }

    #[test]
    fn test_bpe_tie_is_leftmost() {
        let model = bpe(&[("a", 0), ("aa", 1)], &[("a", "a")], plain());
        let mut out = Vec::new();
        model.tokenize("aaa", &mut out);
        assert_eq!(out, vec![1, 0]);
    }

    #[test]
    fn test_bpe_byte_fallback() {
        let mut vocab: Vec<(String, u32)> = (0..=255u32)
            .map(|b| (format!("<0x{:02X}>", b), b))
            .collect();
        vocab.push(("h".to_string(), 300));
        let vocab_ref: Vec<(&str, u32)> = vocab.iter().map(|(t, id)| (t.as_str(), *id)).collect();
        let model = bpe(
            &vocab_ref,
            &[],
            BpeOptions {
                byte_fallback: true,
                ..plain()
            },
        );
        let mut out = Vec::new();
        model.tokenize("hé", &mut out);
        assert_eq!(out, vec![300, 0xC3, 0xA9]);
    }

    #[test]
    fn test_bpe_fused_unk() {
        let model = bpe(
            &[("<unk>", 0), ("a", 1)],
            &[],
            BpeOptions {
                unk_token: Some("<unk>".to_string()),
                fuse_unk: true,
                ..plain()
            },
        );
        let mut out = Vec::new();
        model.tokenize("a??a", &mut out);
        assert_eq!(out, vec![1, 0, 1]);
    }

    #[test]
    fn test_bpe_merge_with_unknown_token_rejected() {
        let vocab = [("a".to_string(), 0)].into_iter().collect();
        let err = BpeModel::new(vocab, vec![("a".into(), "b".into())], plain()).unwrap_err();
        assert!(err.to_string().contains("unknown token"));
    }

    #[test]
    fn test_unigram_viterbi() {
        let vocab = vec![
            ("<unk>".to_string(), 0.0),
            ("▁".to_string(), -2.0),
            ("▁he".to_string(), -3.0),
            ("llo".to_string(), -3.0),
            ("▁hello".to_string(), -5.0),
            ("h".to_string(), -4.0),
            ("e".to_string(), -4.0),
            ("l".to_string(), -4.0),
            ("o".to_string(), -4.0),
        ];
        let model = UnigramModel::new(vocab, Some(0), false).unwrap();
        let mut out = Vec::new();
        model.tokenize("▁hello", &mut out);
        assert_eq!(out, vec![4]);

        out.clear();
        model.tokenize("▁hex", &mut out);
        assert_eq!(out, vec![2, 0]);
    }

    #[test]
    fn test_parse_byte_token() {
        assert_eq!(parse_byte_token("<0x0A>"), Some(0x0A));
        assert_eq!(parse_byte_token("<0xZZ>"), None);
        assert_eq!(parse_byte_token("<0x0A"), None);
    }
}
