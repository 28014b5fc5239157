//! Chat transcript rendering.
//!
//! A chat template turns an ordered list of [`ChatTurn`]s into the token
//! stream a chat-tuned model was trained on. The result is a sequence of
//! [`Segment`]s: literal text, which the engine tokenizes normally, and
//! pre-resolved special tokens, which it emits verbatim.
//!
//! Built-in templates are declared as piece lists; models that ship their
//! own Jinja `chat_template` are rendered with minijinja.

use minijinja::{context, Environment, ErrorKind};
use serde::{Deserialize, Serialize};

use super::catalog::{ChatTemplateRef, EncodingProfile, IM_END, IM_SEP, IM_START};
use super::error::TokenizerError;
use super::vocab::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Special { id: u32, surface: String },
}

impl Segment {
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(text) => text,
            Segment::Special { surface, .. } => surface,
        }
    }
}

/// A rendered transcript, ready for tokenization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedChat {
    segments: Vec<Segment>,
}

impl RenderedChat {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The full rendered text, special token surfaces included.
    pub fn text(&self) -> String {
        self.segments.iter().map(Segment::as_str).collect()
    }

    /// Ids of the injected special tokens, in order.
    pub fn special_ids(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Special { id, .. } => Some(*id),
                Segment::Text(_) => None,
            })
            .collect()
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Text(last)) => last.push_str(text),
            _ => self.segments.push(Segment::Text(text.to_string())),
        }
    }

    fn push_special(&mut self, id: u32, surface: &str) {
        self.segments.push(Segment::Special {
            id,
            surface: surface.to_string(),
        });
    }
}

/// Built-in chat formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>\n`
    ChatMl,
    /// `<|im_start|>role<|im_sep|>content<|im_end|>`
    ChatMlSep,
    Llama3,
    Mistral,
    DeepSeek,
    Phi3,
}

#[derive(Debug, Clone, Copy)]
enum Piece {
    /// A special token the vocabulary must declare.
    Special(&'static str),
    /// A special token when declared, literal text otherwise.
    Marker(&'static str),
    Text(&'static str),
    Role,
    /// A required special token built around the role name.
    RoleSpecial(&'static str, &'static str),
    Content,
    TrimmedContent,
}

struct TemplateDef {
    prelude: &'static [Piece],
    system: Option<&'static [Piece]>,
    user: &'static [Piece],
    assistant: &'static [Piece],
    generation: &'static [Piece],
}

const CHATML_TURN: &[Piece] = &[
    Piece::Special(IM_START),
    Piece::Role,
    Piece::Text("\n"),
    Piece::Content,
    Piece::Special(IM_END),
    Piece::Text("\n"),
];

const CHATML: TemplateDef = TemplateDef {
    prelude: &[],
    system: Some(CHATML_TURN),
    user: CHATML_TURN,
    assistant: CHATML_TURN,
    generation: &[Piece::Special(IM_START), Piece::Text("assistant\n")],
};

const CHATML_SEP_TURN: &[Piece] = &[
    Piece::Special(IM_START),
    Piece::Role,
    Piece::Special(IM_SEP),
    Piece::Content,
    Piece::Special(IM_END),
];

const CHATML_SEP: TemplateDef = TemplateDef {
    prelude: &[],
    system: Some(CHATML_SEP_TURN),
    user: CHATML_SEP_TURN,
    assistant: CHATML_SEP_TURN,
    generation: &[
        Piece::Special(IM_START),
        Piece::Text("assistant"),
        Piece::Special(IM_SEP),
    ],
};

const LLAMA3_TURN: &[Piece] = &[
    Piece::Special("<|start_header_id|>"),
    Piece::Role,
    Piece::Special("<|end_header_id|>"),
    Piece::Text("\n\n"),
    Piece::TrimmedContent,
    Piece::Special("<|eot_id|>"),
];

const LLAMA3: TemplateDef = TemplateDef {
    prelude: &[Piece::Special("<|begin_of_text|>")],
    system: Some(LLAMA3_TURN),
    user: LLAMA3_TURN,
    assistant: LLAMA3_TURN,
    generation: &[
        Piece::Special("<|start_header_id|>"),
        Piece::Text("assistant"),
        Piece::Special("<|end_header_id|>"),
        Piece::Text("\n\n"),
    ],
};

const MISTRAL: TemplateDef = TemplateDef {
    prelude: &[Piece::Special("<s>")],
    system: None,
    user: &[
        Piece::Marker("[INST]"),
        Piece::Text(" "),
        Piece::Content,
        Piece::Text(" "),
        Piece::Marker("[/INST]"),
    ],
    assistant: &[Piece::Content, Piece::Special("</s>")],
    generation: &[],
};

const DEEPSEEK: TemplateDef = TemplateDef {
    prelude: &[Piece::Special("<｜begin▁of▁sentence｜>")],
    system: Some(&[Piece::Content]),
    user: &[Piece::Special("<｜User｜>"), Piece::Content],
    assistant: &[
        Piece::Special("<｜Assistant｜>"),
        Piece::Content,
        Piece::Special("<｜end▁of▁sentence｜>"),
    ],
    generation: &[Piece::Special("<｜Assistant｜>")],
};

const PHI3_TURN: &[Piece] = &[
    Piece::RoleSpecial("<|", "|>"),
    Piece::Text("\n"),
    Piece::Content,
    Piece::Special("<|end|>"),
    Piece::Text("\n"),
];

const PHI3: TemplateDef = TemplateDef {
    prelude: &[],
    system: Some(PHI3_TURN),
    user: PHI3_TURN,
    assistant: PHI3_TURN,
    generation: &[Piece::Special("<|assistant|>"), Piece::Text("\n")],
};

impl ChatTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            ChatTemplate::ChatMl => "chatml",
            ChatTemplate::ChatMlSep => "chatml_sep",
            ChatTemplate::Llama3 => "llama3",
            ChatTemplate::Mistral => "mistral",
            ChatTemplate::DeepSeek => "deepseek",
            ChatTemplate::Phi3 => "phi3",
        }
    }

    fn def(&self) -> &'static TemplateDef {
        match self {
            ChatTemplate::ChatMl => &CHATML,
            ChatTemplate::ChatMlSep => &CHATML_SEP,
            ChatTemplate::Llama3 => &LLAMA3,
            ChatTemplate::Mistral => &MISTRAL,
            ChatTemplate::DeepSeek => &DEEPSEEK,
            ChatTemplate::Phi3 => &PHI3,
        }
    }

    /// Render a transcript, resolving special tokens against `vocab`.
    pub fn render(
        &self,
        vocab: &Vocabulary,
        transcript: &[ChatTurn],
    ) -> Result<RenderedChat, TokenizerError> {
        let def = self.def();
        let mut out = RenderedChat::default();

        self.emit(def.prelude, None, vocab, &mut out)?;
        for turn in transcript {
            let pieces = match turn.role {
                Role::System => def.system.ok_or_else(|| {
                    TokenizerError::InvalidInputKind(format!(
                        "{} template does not accept system turns",
                        self.name()
                    ))
                })?,
                Role::User => def.user,
                Role::Assistant => def.assistant,
            };
            self.emit(pieces, Some(turn), vocab, &mut out)?;
        }
        self.emit(def.generation, None, vocab, &mut out)?;
        Ok(out)
    }

    fn emit(
        &self,
        pieces: &[Piece],
        turn: Option<&ChatTurn>,
        vocab: &Vocabulary,
        out: &mut RenderedChat,
    ) -> Result<(), TokenizerError> {
        let specials = vocab.special_tokens();
        let required = |surface: &str| {
            specials.id(surface).ok_or_else(|| {
                TokenizerError::corrupt(format!(
                    "{} template needs special token {:?}",
                    self.name(),
                    surface
                ))
            })
        };

        for piece in pieces {
            match *piece {
                Piece::Special(surface) => out.push_special(required(surface)?, surface),
                Piece::Marker(surface) => match specials.id(surface) {
                    Some(id) => out.push_special(id, surface),
                    None => out.push_text(surface),
                },
                Piece::Text(text) => out.push_text(text),
                Piece::Role => {
                    if let Some(turn) = turn {
                        out.push_text(turn.role.as_str());
                    }
                }
                Piece::RoleSpecial(prefix, suffix) => {
                    if let Some(turn) = turn {
                        let surface = format!("{}{}{}", prefix, turn.role.as_str(), suffix);
                        out.push_special(required(surface.as_str())?, &surface);
                    }
                }
                Piece::Content => {
                    if let Some(turn) = turn {
                        out.push_text(&turn.content);
                    }
                }
                Piece::TrimmedContent => {
                    if let Some(turn) = turn {
                        out.push_text(turn.content.trim());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Render a Jinja chat template the way `apply_chat_template` does.
pub fn render_jinja(
    source: &str,
    transcript: &[ChatTurn],
    bos_token: &str,
    eos_token: &str,
) -> Result<String, TokenizerError> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_function("raise_exception", |message: String| -> Result<String, minijinja::Error> {
        Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
    });

    let template = env
        .template_from_str(source)
        .map_err(|e| TokenizerError::corrupt(format!("invalid chat template: {}", e)))?;

    template
        .render(context! {
            messages => transcript,
            add_generation_prompt => true,
            bos_token => bos_token,
            eos_token => eos_token,
        })
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidOperation => TokenizerError::InvalidInputKind(e.to_string()),
            _ => TokenizerError::corrupt(format!("chat template failed: {}", e)),
        })
}

/// Render `transcript` for `profile`.
///
/// Profiles without a chat template reject transcripts outright.
pub fn render(
    profile: &EncodingProfile,
    vocab: &Vocabulary,
    transcript: &[ChatTurn],
) -> Result<RenderedChat, TokenizerError> {
    match profile.chat {
        None => Err(TokenizerError::InvalidInputKind(format!(
            "{} does not accept chat input",
            profile.model_id
        ))),
        Some(ChatTemplateRef::Builtin(template)) => template.render(vocab, transcript),
        Some(ChatTemplateRef::Artifact) => {
            let config = vocab
                .as_subword()
                .map(|v| v.config())
                .ok_or_else(|| TokenizerError::corrupt("rank tables carry no chat template"))?;
            let source = config.chat_template().ok_or_else(|| {
                TokenizerError::corrupt(format!(
                    "{} has no chat_template in tokenizer_config.json",
                    profile.model_id
                ))
            })?;
            let text = render_jinja(source, transcript, config.bos_token(), config.eos_token())?;
            let mut out = RenderedChat::default();
            out.push_text(&text);
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bpe::RankedVocab;
    use crate::core::catalog::Encoding;
    use crate::core::pattern::Pattern;
    use crate::core::special::SpecialTokens;
    use crate::core::vocab::RankTable;
    use rustc_hash::FxHashMap;

    fn ranked(specials: Vec<(&str, u32)>) -> Vocabulary {
        let encoder: FxHashMap<Vec<u8>, u32> = (0..=255u8).map(|b| (vec![b], b as u32)).collect();
        let ranks = RankTable::from_encoder(encoder).unwrap();
        let specials = SpecialTokens::new(specials).unwrap();
        let pattern = Pattern::new(Encoding::Cl100kBase.pattern()).unwrap();
        Vocabulary::Ranked(RankedVocab::new(ranks, specials, pattern).unwrap())
    }

    fn transcript() -> Vec<ChatTurn> {
        vec![
            ChatTurn::system("Be brief."),
            ChatTurn::user("Hi"),
            ChatTurn::assistant("Hello!"),
        ]
    }

    #[test]
    fn test_chatml_sep_sentinels_in_order() {
        let vocab = ranked(Encoding::Cl100kIm.special_tokens());
        let rendered = ChatTemplate::ChatMlSep.render(&vocab, &transcript()).unwrap();

        assert_eq!(
            rendered.text(),
            "<|im_start|>system<|im_sep|>Be brief.<|im_end|>\
             <|im_start|>user<|im_sep|>Hi<|im_end|>\
             <|im_start|>assistant<|im_sep|>Hello!<|im_end|>\
             <|im_start|>assistant<|im_sep|>"
        );
        let expected: Vec<u32> = [100264, 100266, 100265]
            .repeat(3)
            .into_iter()
            .chain([100264, 100266])
            .collect();
        assert_eq!(rendered.special_ids(), expected);
    }

    #[test]
    fn test_chatml_merges_adjacent_text() {
        let vocab = ranked(Encoding::Cl100kIm.special_tokens());
        let rendered = ChatTemplate::ChatMl
            .render(&vocab, &[ChatTurn::user("Hi")])
            .unwrap();
        assert_eq!(
            rendered.segments(),
            &[
                Segment::Special { id: 100264, surface: IM_START.into() },
                Segment::Text("user\nHi".into()),
                Segment::Special { id: 100265, surface: IM_END.into() },
                Segment::Text("\n".into()),
                Segment::Special { id: 100264, surface: IM_START.into() },
                Segment::Text("assistant\n".into()),
            ]
        );
    }

    #[test]
    fn test_missing_sentinel_is_corrupt() {
        let vocab = ranked(Encoding::Cl100kBase.special_tokens());
        let err = ChatTemplate::ChatMl.render(&vocab, &transcript()).unwrap_err();
        assert!(matches!(err, TokenizerError::CorruptArtifact(_)));
    }

    #[test]
    fn test_mistral_markers_fall_back_to_text() {
        let vocab = ranked(vec![("<s>", 1000), ("</s>", 1001)]);
        let turns = [ChatTurn::user("Hi"), ChatTurn::assistant("Yo")];
        let rendered = ChatTemplate::Mistral.render(&vocab, &turns).unwrap();
        assert_eq!(rendered.text(), "<s>[INST] Hi [/INST]Yo</s>");
        assert_eq!(rendered.special_ids(), vec![1000, 1001]);

        let err = ChatTemplate::Mistral.render(&vocab, &transcript()).unwrap_err();
        assert!(matches!(err, TokenizerError::InvalidInputKind(_)));
    }

    #[test]
    fn test_phi3_role_specials() {
        let vocab = ranked(vec![
            ("<|system|>", 1000),
            ("<|user|>", 1001),
            ("<|assistant|>", 1002),
            ("<|end|>", 1003),
        ]);
        let rendered = ChatTemplate::Phi3
            .render(&vocab, &[ChatTurn::user("Hi")])
            .unwrap();
        assert_eq!(rendered.text(), "<|user|>\nHi<|end|>\n<|assistant|>\n");
        assert_eq!(rendered.special_ids(), vec![1001, 1003, 1002]);
    }

    #[test]
    fn test_profile_without_chat_rejects() {
        let vocab = ranked(Encoding::Cl100kBase.special_tokens());
        let profile = EncodingProfile::encoding("cl100k_base", Encoding::Cl100kBase);
        let err = render(&profile, &vocab, &transcript()).unwrap_err();
        assert!(matches!(err, TokenizerError::InvalidInputKind(_)));
    }

    #[test]
    fn test_render_jinja() {
        let source = "{{ bos_token }}{% for m in messages %}\
            {% if m.role == 'system' %}{{ raise_exception('no system') }}{% endif %}\
            <{{ m.role }}>{{ m.content }}{% endfor %}\
            {% if add_generation_prompt %}<assistant>{% endif %}";

        let text = render_jinja(source, &[ChatTurn::user("Hi")], "<s>", "</s>").unwrap();
        assert_eq!(text, "<s><user>Hi<assistant>");

        let err = render_jinja(source, &transcript(), "<s>", "</s>").unwrap_err();
        assert!(matches!(err, TokenizerError::InvalidInputKind(_)));

        let err = render_jinja("{% for %}", &transcript(), "", "").unwrap_err();
        assert!(matches!(err, TokenizerError::CorruptArtifact(_)));
    }
}
