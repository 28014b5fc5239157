//! Model catalog: which vocabulary, chat template and corrections each model
//! identifier uses.
//!
//! The catalog is an ordinary value. [`ModelCatalog::builtin`] reproduces
//! the supported model list; tests build their own with
//! [`ModelCatalog::empty`] and [`ModelCatalog::with_profile`].

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::chat::ChatTemplate;
use super::pattern::{CL100K_BASE_PATTERN, O200K_BASE_PATTERN, R50K_BASE_PATTERN};
use super::store::ArtifactRef;
use super::vocab::EngineKind;

pub const ENDOFTEXT: &str = "<|endoftext|>";
pub const FIM_PREFIX: &str = "<|fim_prefix|>";
pub const FIM_MIDDLE: &str = "<|fim_middle|>";
pub const FIM_SUFFIX: &str = "<|fim_suffix|>";
pub const ENDOFPROMPT: &str = "<|endofprompt|>";
pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";
pub const IM_SEP: &str = "<|im_sep|>";

/// Revision used when a profile does not pin one.
pub const DEFAULT_REVISION: &str = "main";

/// Rank-table encodings.
///
/// The `*_im` variants extend a base table with the chat markup tokens used
/// by the chat completion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gpt2,
    R50kBase,
    P50kBase,
    P50kEdit,
    Cl100kBase,
    O200kBase,
    Cl100kIm,
    O200kIm,
}

impl Encoding {
    pub const ALL: [Encoding; 8] = [
        Encoding::Gpt2,
        Encoding::R50kBase,
        Encoding::P50kBase,
        Encoding::P50kEdit,
        Encoding::Cl100kBase,
        Encoding::O200kBase,
        Encoding::Cl100kIm,
        Encoding::O200kIm,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Gpt2 => "gpt2",
            Encoding::R50kBase => "r50k_base",
            Encoding::P50kBase => "p50k_base",
            Encoding::P50kEdit => "p50k_edit",
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
            Encoding::Cl100kIm => "cl100k_im",
            Encoding::O200kIm => "o200k_im",
        }
    }

    /// Stem of the `.tiktoken` file holding the ranks.
    pub fn rank_file(&self) -> &'static str {
        match self {
            Encoding::Gpt2 | Encoding::R50kBase => "r50k_base",
            Encoding::P50kBase | Encoding::P50kEdit => "p50k_base",
            Encoding::Cl100kBase | Encoding::Cl100kIm => "cl100k_base",
            Encoding::O200kBase | Encoding::O200kIm => "o200k_base",
        }
    }

    pub fn pattern(&self) -> &'static str {
        match self {
            Encoding::Gpt2 | Encoding::R50kBase | Encoding::P50kBase | Encoding::P50kEdit => {
                R50K_BASE_PATTERN
            }
            Encoding::Cl100kBase | Encoding::Cl100kIm => CL100K_BASE_PATTERN,
            Encoding::O200kBase | Encoding::O200kIm => O200K_BASE_PATTERN,
        }
    }

    pub fn special_tokens(&self) -> Vec<(&'static str, u32)> {
        match self {
            Encoding::Gpt2 | Encoding::R50kBase | Encoding::P50kBase => vec![(ENDOFTEXT, 50256)],
            Encoding::P50kEdit => vec![
                (ENDOFTEXT, 50256),
                (FIM_PREFIX, 50281),
                (FIM_MIDDLE, 50282),
                (FIM_SUFFIX, 50283),
            ],
            Encoding::Cl100kBase => vec![
                (ENDOFTEXT, 100257),
                (FIM_PREFIX, 100258),
                (FIM_MIDDLE, 100259),
                (FIM_SUFFIX, 100260),
                (ENDOFPROMPT, 100276),
            ],
            Encoding::O200kBase => vec![(ENDOFTEXT, 199999), (ENDOFPROMPT, 200018)],
            Encoding::Cl100kIm => {
                let mut tokens = Encoding::Cl100kBase.special_tokens();
                tokens.extend([(IM_START, 100264), (IM_END, 100265), (IM_SEP, 100266)]);
                tokens
            }
            Encoding::O200kIm => {
                let mut tokens = Encoding::O200kBase.special_tokens();
                tokens.extend([(IM_START, 200264), (IM_END, 200265), (IM_SEP, 200266)]);
                tokens
            }
        }
    }
}

/// Where a profile's vocabulary comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VocabularySpec {
    Encoding(Encoding),
    /// A model hub repository (`org/name`) publishing `tokenizer.json`.
    Hub { repo: String },
}

/// How chat transcripts are rendered for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplateRef {
    Builtin(ChatTemplate),
    /// The Jinja template shipped in the model's `tokenizer_config.json`.
    Artifact,
}

/// Per-model corrections applied at fixed points of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Resolve hub artifacts at this revision instead of `main`.
    PinRevision(String),
    /// Remove a leading special token the reference encoder emits spuriously.
    DropLeadingToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingProfile {
    pub model_id: String,
    pub vocabulary: VocabularySpec,
    pub chat: Option<ChatTemplateRef>,
    pub transforms: Vec<Transform>,
}

impl EncodingProfile {
    pub fn encoding(model_id: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            model_id: model_id.into(),
            vocabulary: VocabularySpec::Encoding(encoding),
            chat: None,
            transforms: Vec::new(),
        }
    }

    /// A hub model whose identifier is its repository name.
    pub fn hub(repo: impl Into<String>) -> Self {
        let repo = repo.into();
        Self {
            model_id: repo.clone(),
            vocabulary: VocabularySpec::Hub { repo },
            chat: None,
            transforms: Vec::new(),
        }
    }

    pub fn with_chat(mut self, chat: ChatTemplateRef) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn engine(&self) -> EngineKind {
        match self.vocabulary {
            VocabularySpec::Encoding(_) => EngineKind::Bpe,
            VocabularySpec::Hub { .. } => EngineKind::Subword,
        }
    }

    pub fn supports_chat(&self) -> bool {
        self.chat.is_some()
    }

    /// The last pinned revision, or `main`.
    pub fn revision(&self) -> &str {
        self.transforms
            .iter()
            .rev()
            .find_map(|t| match t {
                Transform::PinRevision(rev) => Some(rev.as_str()),
                Transform::DropLeadingToken => None,
            })
            .unwrap_or(DEFAULT_REVISION)
    }

    pub fn drops_leading_token(&self) -> bool {
        self.transforms.contains(&Transform::DropLeadingToken)
    }

    /// Artifact location with every pre-load transform applied.
    pub fn artifact(&self) -> ArtifactRef {
        match &self.vocabulary {
            VocabularySpec::Encoding(encoding) => ArtifactRef::RankTable(*encoding),
            VocabularySpec::Hub { repo } => ArtifactRef::Hub {
                repo: repo.clone(),
                revision: self.revision().to_string(),
            },
        }
    }
}

const CHAT_MODELS: &[(&str, Encoding, ChatTemplate)] = &[
    ("gpt-4o", Encoding::O200kIm, ChatTemplate::ChatMlSep),
    ("gpt-3.5-turbo", Encoding::Cl100kIm, ChatTemplate::ChatMl),
    ("gpt-4", Encoding::Cl100kIm, ChatTemplate::ChatMlSep),
    ("gpt-4-32k", Encoding::Cl100kIm, ChatTemplate::ChatMlSep),
    ("gpt-4-1106-preview", Encoding::Cl100kIm, ChatTemplate::ChatMlSep),
];

const TEXT_MODELS: &[(&str, Encoding)] = &[
    ("text-davinci-003", Encoding::P50kBase),
    ("text-davinci-002", Encoding::P50kBase),
    ("text-davinci-001", Encoding::R50kBase),
    ("text-curie-001", Encoding::R50kBase),
    ("text-babbage-001", Encoding::R50kBase),
    ("text-ada-001", Encoding::R50kBase),
    ("davinci", Encoding::R50kBase),
    ("curie", Encoding::R50kBase),
    ("babbage", Encoding::R50kBase),
    ("ada", Encoding::R50kBase),
    ("code-davinci-002", Encoding::P50kBase),
    ("code-davinci-001", Encoding::P50kBase),
    ("code-cushman-002", Encoding::P50kBase),
    ("code-cushman-001", Encoding::P50kBase),
    ("davinci-codex", Encoding::P50kBase),
    ("cushman-codex", Encoding::P50kBase),
    ("text-davinci-edit-001", Encoding::P50kEdit),
    ("code-davinci-edit-001", Encoding::P50kEdit),
    ("text-embedding-ada-002", Encoding::Cl100kBase),
    ("text-embedding-3-small", Encoding::Cl100kBase),
    ("text-embedding-3-large", Encoding::Cl100kBase),
    ("text-similarity-davinci-001", Encoding::R50kBase),
    ("text-similarity-curie-001", Encoding::R50kBase),
    ("text-similarity-babbage-001", Encoding::R50kBase),
    ("text-similarity-ada-001", Encoding::R50kBase),
    ("text-search-davinci-doc-001", Encoding::R50kBase),
    ("text-search-curie-doc-001", Encoding::R50kBase),
    ("text-search-babbage-doc-001", Encoding::R50kBase),
    ("text-search-ada-doc-001", Encoding::R50kBase),
    ("code-search-babbage-code-001", Encoding::R50kBase),
    ("code-search-ada-code-001", Encoding::R50kBase),
];

/// Hub models without a chat capability.
const HUB_BASE_MODELS: &[&str] = &[
    "meta-llama/Meta-Llama-3-8B",
    "meta-llama/Meta-Llama-3-70B",
    "codellama/CodeLlama-7b-hf",
    "codellama/CodeLlama-70b-hf",
    "codellama/CodeLlama-34b-hf",
    "deepseek-ai/DeepSeek-V2",
    "deepseek-ai/DeepSeek-Coder-V2",
    "Qwen/Qwen2.5-72B",
    "Qwen/Qwen2.5-32B",
    "Qwen/Qwen2.5-14B",
    "Qwen/Qwen2.5-7B",
    "Qwen/Qwen2.5-3B",
    "Qwen/Qwen2-72B",
    "Qwen/Qwen2-57B-A14B",
    "Qwen/Qwen2-1B",
    "Qwen/Qwen2.5-Math-72B",
    "Qwen/Qwen2.5-Coder-7B",
    "microsoft/phi-2",
    "microsoft/Phi-4",
    "mistralai/Mistral-7B-v0.1",
    "tiiuae/falcon-7b",
    "tiiuae/falcon-11b",
    "01-ai/Yi-6B",
    "01-ai/Yi-1.5-34B",
    "01-ai/Yi-1.5-9B",
    "01-ai/Yi-1.5-6B",
    "01-ai/Yi-Coder-9B",
    "meta-llama/Llama-2-7b-hf",
    "meta-llama/Llama-2-70b-hf",
    "meta-llama/Llama-2-13b-hf",
    "llava-hf/llava-1.5-7b-hf",
    "llava-hf/llava-1.5-13b-hf",
    "stabilityai/stablelm-3b-4e1t",
    "bigscience/bloom",
    "bigscience/bloom-7b1",
    "jondurbin/airoboros-l2-7b-gpt4-1.4.1",
    "wenge-research/yayi-7b",
];

/// Hub chat models rendered with a built-in template.
const HUB_BUILTIN_CHAT_MODELS: &[(&str, ChatTemplate)] = &[
    ("meta-llama/Meta-Llama-3.1-8B-Instruct", ChatTemplate::Llama3),
    ("meta-llama/Meta-Llama-3.1-70B-Instruct", ChatTemplate::Llama3),
    ("meta-llama/Meta-Llama-3.1-405B-Instruct", ChatTemplate::Llama3),
    ("deepseek-ai/DeepSeek-R1", ChatTemplate::DeepSeek),
    ("deepseek-ai/DeepSeek-R1-Distill-Llama-70B", ChatTemplate::DeepSeek),
    ("deepseek-ai/DeepSeek-R1-Distill-Qwen-7B", ChatTemplate::DeepSeek),
    ("deepseek-ai/DeepSeek-R1-Distill-Llama-8B", ChatTemplate::DeepSeek),
    ("deepseek-ai/DeepSeek-V3", ChatTemplate::DeepSeek),
    ("deepseek-ai/DeepSeek-V3-0324", ChatTemplate::DeepSeek),
    ("mistralai/Mistral-Small-Instruct-2409", ChatTemplate::Mistral),
    ("mistralai/Mistral-7B-Instruct-v0.3", ChatTemplate::Mistral),
    ("mistralai/Mixtral-8x7B-Instruct-v0.1", ChatTemplate::Mistral),
    ("mistralai/Mixtral-8x22B-Instruct-v0.1", ChatTemplate::Mistral),
    ("mistralai/Mistral-Nemo-Instruct-2407", ChatTemplate::Mistral),
    ("mistralai/Mistral-7B-Instruct-v0.2", ChatTemplate::Mistral),
    ("mistralai/Mistral-7B-Instruct-v0.1", ChatTemplate::Mistral),
    ("microsoft/Phi-3-mini-4k-instruct", ChatTemplate::Phi3),
    ("microsoft/Phi-3-medium-4k-instruct", ChatTemplate::Phi3),
    ("microsoft/Phi-3.5-mini-instruct", ChatTemplate::Phi3),
];

/// Hub chat models rendered with their own `tokenizer_config.json` template.
const HUB_ARTIFACT_CHAT_MODELS: &[&str] = &[
    "meta-llama/Llama-4-Scout-17B-16E-Instruct",
    "deepseek-ai/DeepSeek-V2.5",
    "deepseek-ai/DeepSeek-Coder-V2-Lite-Instruct",
    "Qwen/QwQ-32B",
    "Qwen/QwQ-32B-Preview",
    "Qwen/Qwen2.5-Coder-32B-Instruct",
    "Qwen/QVQ-72B-Preview",
    "NousResearch/Hermes-3-Llama-3.1-405B",
    "NousResearch/Hermes-2-Theta-Llama-3-8B",
    "NousResearch/Nous-Hermes-2-Mixtral-8x7B-DPO",
    "openchat/openchat-3.5-1210",
    "meta-llama/Llama-2-7b-chat-hf",
    "meta-llama/Llama-2-70b-chat-hf",
    "stabilityai/stablelm-zephyr-3b",
    "01-ai/Yi-6B-Chat",
    "HuggingFaceH4/zephyr-7b-beta",
    "HuggingFaceH4/zephyr-7b-alpha",
];

/// Revisions pinned away from the default branch.
const PINNED_REVISIONS: &[(&str, &str)] = &[
    ("meta-llama/Meta-Llama-3-8B", DEFAULT_REVISION),
    ("meta-llama/Meta-Llama-3-70B", DEFAULT_REVISION),
];

/// Models whose reference encoding starts with a spurious token.
const DROP_LEADING_TOKEN_MODELS: &[&str] = &[
    "meta-llama/Llama-2-7b-hf",
    "codellama/CodeLlama-7b-hf",
    "codellama/CodeLlama-70b-hf",
];

const POPULAR: &[&str] = &[
    "cl100k_base",
    "o200k_base",
    "gpt-4o",
    "gpt-4-1106-preview",
    "gpt-3.5-turbo",
    "deepseek-ai/DeepSeek-V3",
    "Qwen/Qwen2.5-72B",
    "mistralai/Mistral-Small-Instruct-2409",
    "meta-llama/Meta-Llama-3-70B",
    "codellama/CodeLlama-7b-hf",
    "microsoft/Phi-3-mini-4k-instruct",
];

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    profiles: FxHashMap<String, Arc<EncodingProfile>>,
    popular: Vec<String>,
}

impl ModelCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every supported model and encoding name.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();

        for encoding in Encoding::ALL {
            catalog.insert(EncodingProfile::encoding(encoding.name(), encoding));
        }
        for &(model, encoding, template) in CHAT_MODELS {
            catalog.insert(
                EncodingProfile::encoding(model, encoding)
                    .with_chat(ChatTemplateRef::Builtin(template)),
            );
        }
        for &(model, encoding) in TEXT_MODELS {
            catalog.insert(EncodingProfile::encoding(model, encoding));
        }

        for &repo in HUB_BASE_MODELS {
            catalog.insert(EncodingProfile::hub(repo));
        }
        for &(repo, template) in HUB_BUILTIN_CHAT_MODELS {
            catalog.insert(EncodingProfile::hub(repo).with_chat(ChatTemplateRef::Builtin(template)));
        }
        for &repo in HUB_ARTIFACT_CHAT_MODELS {
            catalog.insert(EncodingProfile::hub(repo).with_chat(ChatTemplateRef::Artifact));
        }

        for &(repo, revision) in PINNED_REVISIONS {
            catalog.add_transform(repo, Transform::PinRevision(revision.to_string()));
        }
        for &repo in DROP_LEADING_TOKEN_MODELS {
            catalog.add_transform(repo, Transform::DropLeadingToken);
        }

        catalog.popular = POPULAR.iter().map(|s| s.to_string()).collect();
        catalog
    }

    pub fn with_profile(mut self, profile: EncodingProfile) -> Self {
        self.insert(profile);
        self
    }

    pub fn insert(&mut self, profile: EncodingProfile) {
        self.profiles
            .insert(profile.model_id.clone(), Arc::new(profile));
    }

    fn add_transform(&mut self, model_id: &str, transform: Transform) {
        if let Some(profile) = self.profiles.get_mut(model_id) {
            Arc::make_mut(profile).transforms.push(transform);
        }
    }

    pub fn get(&self, model_id: &str) -> Option<&Arc<EncodingProfile>> {
        self.profiles.get(model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.profiles.contains_key(model_id)
    }

    /// All model identifiers, sorted.
    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Featured identifiers, in display order.
    pub fn popular(&self) -> impl Iterator<Item = &EncodingProfile> + '_ {
        self.popular
            .iter()
            .filter_map(|id| self.profiles.get(id).map(Arc::as_ref))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
