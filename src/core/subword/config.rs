//! Serde model of `tokenizer.json` and `tokenizer_config.json`.
//!
//! Only the components the engine can reproduce exactly are modelled. An
//! unknown `type` tag fails deserialization, which the store reports as a
//! corrupt artifact instead of tokenizing with a partial pipeline.

use rustc_hash::FxHashMap;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TokenizerJson {
    #[serde(default)]
    pub added_tokens: Vec<AddedTokenConfig>,
    #[serde(default)]
    pub normalizer: Option<NormalizerConfig>,
    #[serde(default)]
    pub pre_tokenizer: Option<PreTokenizerConfig>,
    pub model: ModelConfig,
    #[serde(default)]
    pub post_processor: Option<PostProcessorConfig>,
    #[serde(default)]
    pub decoder: Option<DecoderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddedTokenConfig {
    pub id: u32,
    pub content: String,
    #[serde(default)]
    pub special: bool,
    #[serde(default)]
    pub lstrip: bool,
    #[serde(default)]
    pub rstrip: bool,
    #[serde(default)]
    pub single_word: bool,
    /// Missing means the `tokenizers` default: normalized unless special.
    #[serde(default)]
    pub normalized: Option<bool>,
}

impl AddedTokenConfig {
    pub fn is_normalized(&self) -> bool {
        self.normalized.unwrap_or(!self.special)
    }
}

/// `{"String": "..."}` or `{"Regex": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub enum PatternConfig {
    String(String),
    Regex(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizerConfig {
    #[serde(rename = "NFC")]
    Nfc,
    #[serde(rename = "NFD")]
    Nfd,
    #[serde(rename = "NFKC")]
    Nfkc,
    #[serde(rename = "NFKD")]
    Nfkd,
    Lowercase,
    Strip {
        #[serde(default = "default_true")]
        strip_left: bool,
        #[serde(default = "default_true")]
        strip_right: bool,
    },
    StripAccents,
    Prepend {
        prepend: String,
    },
    Replace {
        pattern: PatternConfig,
        content: String,
    },
    Sequence {
        normalizers: Vec<NormalizerConfig>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SplitBehavior {
    Removed,
    Isolated,
    MergedWithPrevious,
    MergedWithNext,
    Contiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrependScheme {
    Always,
    First,
    Never,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum PreTokenizerConfig {
    ByteLevel {
        #[serde(default = "default_true")]
        add_prefix_space: bool,
        #[serde(default = "default_true")]
        use_regex: bool,
    },
    Split {
        pattern: PatternConfig,
        behavior: SplitBehavior,
        #[serde(default)]
        invert: bool,
    },
    Metaspace {
        #[serde(default = "default_replacement")]
        replacement: char,
        #[serde(default)]
        prepend_scheme: Option<PrependScheme>,
        #[serde(default)]
        add_prefix_space: Option<bool>,
        #[serde(default = "default_true")]
        split: bool,
    },
    Whitespace {},
    WhitespaceSplit {},
    Digits {
        #[serde(default)]
        individual_digits: bool,
    },
    Punctuation {
        #[serde(default = "default_isolated")]
        behavior: SplitBehavior,
    },
    Sequence {
        pretokenizers: Vec<PreTokenizerConfig>,
    },
}

/// A merge rule, written either as `"a b"` or as `["a", "b"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MergeEntry {
    Pair([String; 2]),
    SpaceSeparated(String),
}

impl MergeEntry {
    pub fn into_pair(self) -> Option<(String, String)> {
        match self {
            MergeEntry::Pair([left, right]) => Some((left, right)),
            MergeEntry::SpaceSeparated(rule) => {
                let (left, right) = rule.split_once(' ')?;
                Some((left.to_string(), right.to_string()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ModelConfig {
    #[serde(rename = "BPE")]
    Bpe {
        vocab: FxHashMap<String, u32>,
        #[serde(default)]
        merges: Vec<MergeEntry>,
        #[serde(default)]
        unk_token: Option<String>,
        #[serde(default)]
        continuing_subword_prefix: Option<String>,
        #[serde(default)]
        end_of_word_suffix: Option<String>,
        #[serde(default)]
        fuse_unk: bool,
        #[serde(default)]
        byte_fallback: bool,
        #[serde(default)]
        ignore_merges: bool,
    },
    Unigram {
        vocab: Vec<(String, f64)>,
        #[serde(default)]
        unk_id: Option<usize>,
        #[serde(default)]
        byte_fallback: bool,
    },
}

/// One entry of a `TemplateProcessing` template.
#[derive(Debug, Deserialize)]
pub enum TemplatePiece {
    SpecialToken { id: String },
    Sequence { id: String },
}

#[derive(Debug, Deserialize)]
pub struct TemplateSpecialToken {
    pub ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum PostProcessorConfig {
    TemplateProcessing {
        single: Vec<TemplatePiece>,
        #[serde(default)]
        special_tokens: FxHashMap<String, TemplateSpecialToken>,
    },
    BertProcessing {
        sep: (String, u32),
        cls: (String, u32),
    },
    RobertaProcessing {
        sep: (String, u32),
        cls: (String, u32),
    },
    ByteLevel {},
    Sequence {
        processors: Vec<PostProcessorConfig>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum DecoderConfig {
    ByteLevel {},
    Metaspace {
        #[serde(default = "default_replacement")]
        replacement: char,
        #[serde(default)]
        prepend_scheme: Option<PrependScheme>,
        #[serde(default)]
        add_prefix_space: Option<bool>,
    },
    ByteFallback {},
    Fuse {},
    Strip {
        content: char,
        #[serde(default)]
        start: usize,
        #[serde(default)]
        stop: usize,
    },
    Replace {
        pattern: PatternConfig,
        content: String,
    },
    Sequence {
        decoders: Vec<DecoderConfig>,
    },
}

/// A token reference in `tokenizer_config.json`: a bare string or an
/// `AddedToken` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenRef {
    Plain(String),
    Object { content: String },
}

impl TokenRef {
    pub fn as_str(&self) -> &str {
        match self {
            TokenRef::Plain(s) => s,
            TokenRef::Object { content } => content,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedTemplate {
    pub name: String,
    pub template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatTemplateConfig {
    Single(String),
    Named(Vec<NamedTemplate>),
}

/// The parts of `tokenizer_config.json` used for chat rendering.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub chat_template: Option<ChatTemplateConfig>,
    #[serde(default)]
    pub bos_token: Option<TokenRef>,
    #[serde(default)]
    pub eos_token: Option<TokenRef>,
}

impl TokenizerConfig {
    /// The `default` template, or the only one declared.
    pub fn chat_template(&self) -> Option<&str> {
        match self.chat_template.as_ref()? {
            ChatTemplateConfig::Single(template) => Some(template),
            ChatTemplateConfig::Named(templates) => templates
                .iter()
                .find(|t| t.name == "default")
                .or_else(|| templates.first())
                .map(|t| t.template.as_str()),
        }
    }

    pub fn bos_token(&self) -> &str {
        self.bos_token.as_ref().map(TokenRef::as_str).unwrap_or("")
    }

    pub fn eos_token(&self) -> &str {
        self.eos_token.as_ref().map(TokenRef::as_str).unwrap_or("")
    }
}

fn default_true() -> bool {
    true
}

fn default_replacement() -> char {
    '\u{2581}'
}

fn default_isolated() -> SplitBehavior {
    SplitBehavior::Isolated
}
