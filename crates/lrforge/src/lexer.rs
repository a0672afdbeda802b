//! Stateful tokenizer driven by the lexical rules of a `Language`.

use crate::{
    language::{Language, LexCallback, LexRule, Pattern, Token, DEFAULT_STATE},
    types::{Map, Set},
};
use regex::Regex;
use std::{fmt, sync::Arc};

/// A token recognized by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme<V> {
    pub token: Token,
    pub text: String,
    pub value: Option<V>,
    /// Byte offset of `text` in the input.
    pub offset: usize,
}

impl<V> Lexeme<V> {
    pub fn new(token: impl Into<Token>, text: impl Into<String>, offset: usize) -> Self {
        Self {
            token: token.into(),
            text: text.into(),
            value: None,
            offset,
        }
    }

    pub fn with_value(mut self, value: V) -> Self {
        self.value = Some(value);
        self
    }

    pub fn eoi(offset: usize) -> Self {
        Self::new(Token::Eoi, "", offset)
    }

    pub fn is_eoi(&self) -> bool {
        self.token == Token::Eoi
    }
}

/// What a lexical rule callback wants emitted for its match.
#[derive(Debug)]
pub enum LexOutcome<V> {
    /// Emit the declared token as matched (nothing for discarded rules).
    Emit,
    /// Emit the matched text under another label.
    Relabel(Token),
    /// Emit the matched text under a label together with a semantic value.
    Value(Token, V),
    /// Emit this lexeme in place of the match.
    Lexeme(Lexeme<V>),
    /// Emit nothing.
    Skip,
}

#[derive(Debug)]
enum Matcher {
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    fn compile(pattern: &Pattern) -> Result<Self, PatternError> {
        match pattern {
            Pattern::Literal(lit) if lit.is_empty() => Err(PatternError::EmptyLiteral),
            Pattern::Literal(lit) => Ok(Self::Literal(lit.clone())),
            Pattern::Regex(re) => Regex::new(&format!("^(?:{})", re))
                .map(Self::Regex)
                .map_err(|source| PatternError::Regex {
                    pattern: re.clone(),
                    source,
                }),
        }
    }

    /// Return the length of the match at the start of `input`, if any.
    fn match_at(&self, input: &str) -> Option<usize> {
        match self {
            Self::Literal(lit) => {
                if !input.starts_with(lit.as_str()) {
                    return None;
                }
                // Reject `if` at the start of `iffy`.
                let last = lit.chars().next_back();
                let following = input[lit.len()..].chars().next();
                match (last, following) {
                    (Some(l), Some(c)) if is_word(l) && is_word(c) => None,
                    _ => Some(lit.len()),
                }
            }
            Self::Regex(re) => re.find(input).map(|m| m.end()).filter(|&len| len > 0),
        }
    }
}

fn is_word(c: char) -> bool {
    unicode_ident::is_xid_continue(c)
}

struct CompiledRule<V> {
    token: Option<Token>,
    matcher: Matcher,
    priority: i32,
    callback: Option<LexCallback<V>>,
    states: Vec<String>,
    exclusive: bool,
}

impl<V> CompiledRule<V> {
    fn compile(rule: &LexRule<V>) -> Result<Self, PatternError> {
        if let Some(token) = rule.token.as_ref().filter(|t| t.is_sentinel()) {
            return Err(PatternError::ReservedToken {
                token: token.clone(),
            });
        }
        Ok(Self {
            token: rule.token.clone(),
            matcher: Matcher::compile(&rule.pattern)?,
            priority: rule.priority,
            callback: rule.callback.clone(),
            states: rule.states.clone(),
            exclusive: rule.exclusive,
        })
    }

    fn belongs_to(&self, state: &str) -> bool {
        if self.states.is_empty() {
            state == DEFAULT_STATE
        } else {
            self.states.iter().any(|s| s == state)
        }
    }

    /// The non-default states this rule marks as exclusive.
    fn exclusive_states(&self) -> impl Iterator<Item = &str> + '_ {
        self.states
            .iter()
            .map(String::as_str)
            .filter(move |s| self.exclusive && *s != DEFAULT_STATE)
    }
}

impl<V> fmt::Debug for CompiledRule<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("token", &self.token)
            .field("matcher", &self.matcher)
            .field("priority", &self.priority)
            .field("callback", &self.callback.is_some())
            .field("states", &self.states)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// Index-addressed rule storage; freed slots are reused by later insertions.
struct RuleArena<V> {
    slots: Vec<Option<Arc<CompiledRule<V>>>>,
    free: Vec<usize>,
    labels: Map<String, usize>,
}

impl<V> RuleArena<V> {
    fn new() -> Self {
        Self {
            slots: vec![],
            free: vec![],
            labels: Map::default(),
        }
    }

    fn insert(&mut self, rule: Arc<CompiledRule<V>>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(rule);
                slot
            }
            None => {
                self.slots.push(Some(rule));
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, slot: usize) -> Option<Arc<CompiledRule<V>>> {
        let rule = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some(rule)
    }

    fn insert_labeled(&mut self, label: String, rule: Arc<CompiledRule<V>>) {
        self.remove_labeled(&label);
        let slot = self.insert(rule);
        self.labels.insert(label, slot);
    }

    fn remove_labeled(&mut self, label: &str) -> bool {
        match self.labels.swap_remove(label) {
            Some(slot) => self.remove(slot).is_some(),
            None => false,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRule<V>>> + '_ {
        self.slots.iter().flatten()
    }
}

/// The runtime state of one tokenization, handed to rule callbacks.
pub struct LexController<V> {
    state: String,
    stack: Vec<String>,
    rules: RuleArena<V>,
    exclusive: Set<String>,
}

impl<V> fmt::Debug for LexController<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LexController")
            .field("state", &self.state)
            .field("stack", &self.stack)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

impl<V> LexController<V> {
    fn new(lexer: &Lexer<V>) -> Self {
        let mut rules = RuleArena::new();
        for rule in &lexer.rules {
            rules.insert(Arc::clone(rule));
        }
        Self {
            state: DEFAULT_STATE.to_owned(),
            stack: vec![],
            rules,
            exclusive: lexer.exclusive.clone(),
        }
    }

    /// The current lexical state.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Switch to `state` without remembering the current one.
    pub fn jump_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    /// Switch to `state`, pushing the current one.
    pub fn call_state(&mut self, state: impl Into<String>) {
        let prev = std::mem::replace(&mut self.state, state.into());
        self.stack.push(prev);
    }

    /// Pop back to the state saved by `call_state`, or to the default state
    /// when nothing is saved.
    pub fn return_state(&mut self) {
        self.state = self
            .stack
            .pop()
            .unwrap_or_else(|| DEFAULT_STATE.to_owned());
    }

    /// Register a rule under `label` for the rest of this tokenization,
    /// replacing any rule previously registered under the same label.
    pub fn add_rule(&mut self, label: impl Into<String>, rule: LexRule<V>) -> Result<(), PatternError> {
        let rule = CompiledRule::compile(&rule)?;
        self.exclusive
            .extend(rule.exclusive_states().map(str::to_owned));
        self.rules.insert_labeled(label.into(), Arc::new(rule));
        Ok(())
    }

    /// Remove the rule registered under `label`; unknown labels are ignored.
    pub fn remove_rule(&mut self, label: &str) -> bool {
        self.rules.remove_labeled(label)
    }

    fn is_visible(&self, rule: &CompiledRule<V>) -> bool {
        rule.belongs_to(&self.state)
            || (self.state != DEFAULT_STATE
                && !self.exclusive.contains(&self.state)
                && rule.belongs_to(DEFAULT_STATE))
    }

    /// Highest priority wins, then the longest match, then the earliest slot.
    fn find_match(&self, input: &str) -> Option<(Arc<CompiledRule<V>>, usize)> {
        let mut best: Option<(&Arc<CompiledRule<V>>, usize)> = None;
        for rule in self.rules.iter() {
            if !self.is_visible(rule) {
                continue;
            }
            let len = match rule.matcher.match_at(input) {
                Some(len) => len,
                None => continue,
            };
            let better = match best {
                None => true,
                Some((current, current_len)) => {
                    (rule.priority, len) > (current.priority, current_len)
                }
            };
            if better {
                best = Some((rule, len));
            }
        }
        best.map(|(rule, len)| (Arc::clone(rule), len))
    }
}

/// A compiled set of lexical rules.
///
/// The lexer itself is immutable; every call to `tokenize` runs with a
/// fresh `LexController`.
pub struct Lexer<V> {
    rules: Vec<Arc<CompiledRule<V>>>,
    exclusive: Set<String>,
}

impl<V> fmt::Debug for Lexer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lexer")
            .field("rules", &self.rules)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

impl<V> Lexer<V> {
    pub fn new(language: &Language<V>) -> Result<Self, PatternError> {
        Self::from_rules(language.lex_rules())
    }

    pub fn from_rules(rules: &[LexRule<V>]) -> Result<Self, PatternError> {
        let rules = rules
            .iter()
            .map(|rule| CompiledRule::compile(rule).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let exclusive = rules
            .iter()
            .flat_map(|rule| rule.exclusive_states())
            .map(str::to_owned)
            .collect();
        Ok(Self { rules, exclusive })
    }

    /// Split `text` into lexemes, ending with exactly one `Token::Eoi`.
    pub fn tokenize(&self, text: &str) -> Result<Vec<Lexeme<V>>, LexError> {
        let mut ctl = LexController::new(self);
        let mut lexemes = vec![];
        let mut offset = 0;

        while offset < text.len() {
            let rest = &text[offset..];
            let (rule, len) = ctl.find_match(rest).ok_or_else(|| LexError::NoMatch {
                offset,
                state: ctl.state.clone(),
            })?;
            let matched = &rest[..len];
            tracing::trace!(offset, len, token = ?rule.token, state = %ctl.state, "match");

            let outcome = match &rule.callback {
                Some(callback) => callback(matched, rule.token.as_ref(), &mut ctl)
                    .map_err(|source| LexError::Callback { offset, source })?,
                None => LexOutcome::Emit,
            };
            let lexeme = match outcome {
                LexOutcome::Emit => rule
                    .token
                    .as_ref()
                    .map(|token| Lexeme::new(token.clone(), matched, offset)),
                LexOutcome::Relabel(token) => Some(Lexeme::new(token, matched, offset)),
                LexOutcome::Value(token, value) => {
                    Some(Lexeme::new(token, matched, offset).with_value(value))
                }
                LexOutcome::Lexeme(lexeme) => Some(lexeme),
                LexOutcome::Skip => None,
            };
            if let Some(lexeme) = lexeme {
                if lexeme.token.is_sentinel() {
                    return Err(LexError::ReservedToken {
                        offset,
                        token: lexeme.token,
                    });
                }
                lexemes.push(lexeme);
            }

            offset += len;
        }

        lexemes.push(Lexeme::eoi(text.len()));
        Ok(lexemes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("empty literal pattern")]
    EmptyLiteral,

    #[error("the reserved token `{}' cannot be emitted by a lexical rule", token)]
    ReservedToken { token: Token },

    #[error("invalid regular expression `{}'", pattern)]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("no pattern matched at offset {} (state `{}')", offset, state)]
    NoMatch { offset: usize, state: String },

    #[error("lexer callback failed at offset {}", offset)]
    Callback {
        offset: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("lexer callback emitted the reserved token `{}' at offset {}", token, offset)]
    ReservedToken { offset: usize, token: Token },
}
