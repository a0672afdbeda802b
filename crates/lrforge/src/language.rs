//! Language definition: lexical rules, grammar rules and the start symbol.

use crate::{
    lexer::{LexController, LexOutcome},
    util::{display_fn, write_joined},
};
use std::{borrow::Cow, fmt, sync::Arc};

/// The identity of a grammar symbol.
///
/// Caller-chosen labels live in `Label`; the two reserved variants are never
/// produced from a label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    /// The end of input.
    Eoi,
    /// The left-hand side of the augmenting rule `$start := <start symbol>`.
    Start,
    Label(Cow<'static, str>),
}

impl Token {
    pub fn label(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Label(name.into())
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Label(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Label(..))
    }
}

impl From<&'static str> for Token {
    fn from(name: &'static str) -> Self {
        Self::Label(Cow::Borrowed(name))
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Self::Label(Cow::Owned(name))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eoi => f.write_str("$eoi"),
            Self::Start => f.write_str("$start"),
            Self::Label(name) => f.write_str(name),
        }
    }
}

/// The semantic action attached to a grammar rule.
pub type RuleAction<V> = Arc<dyn Fn(Vec<V>) -> anyhow::Result<V> + Send + Sync>;

/// The callback attached to a lexical rule.
///
/// It receives the matched text, the declared token (`None` for discarded
/// rules) and the controller of the running tokenization.
pub type LexCallback<V> = Arc<
    dyn Fn(&str, Option<&Token>, &mut LexController<V>) -> anyhow::Result<LexOutcome<V>>
        + Send
        + Sync,
>;

/// A production rule `lhs := rhs` with an optional semantic action.
pub struct GrammarRule<V> {
    lhs: Token,
    rhs: Vec<Token>,
    action: Option<RuleAction<V>>,
}

impl<V> GrammarRule<V> {
    pub fn lhs(&self) -> &Token {
        &self.lhs
    }

    pub fn rhs(&self) -> &[Token] {
        &self.rhs[..]
    }

    pub fn action(&self) -> Option<&RuleAction<V>> {
        self.action.as_ref()
    }

    // `"LHS := R1 R2 R3"`
    pub fn display(&self) -> impl fmt::Display + '_ {
        display_fn(|f| {
            write!(f, "{} := ", self.lhs)?;
            write_joined(f, " ", &self.rhs)
        })
    }
}

impl<V> Clone for GrammarRule<V> {
    fn clone(&self) -> Self {
        Self {
            lhs: self.lhs.clone(),
            rhs: self.rhs.clone(),
            action: self.action.clone(),
        }
    }
}

impl<V> fmt::Debug for GrammarRule<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrammarRule")
            .field("lhs", &self.lhs)
            .field("rhs", &self.rhs)
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// The matching part of a lexical rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches exactly this text, guarded by a word boundary.
    Literal(String),
    /// Matches this regular expression anchored at the current offset.
    Regex(String),
}

/// The name of the lexical state every tokenization starts in.
pub const DEFAULT_STATE: &str = "default";

/// A lexical rule.
pub struct LexRule<V> {
    pub(crate) token: Option<Token>,
    pub(crate) pattern: Pattern,
    pub(crate) priority: i32,
    pub(crate) callback: Option<LexCallback<V>>,
    pub(crate) states: Vec<String>,
    pub(crate) exclusive: bool,
}

impl<V> LexRule<V> {
    fn new(token: Option<Token>, pattern: Pattern) -> Self {
        Self {
            token,
            pattern,
            priority: 0,
            callback: None,
            states: vec![],
            exclusive: false,
        }
    }

    /// A rule emitting `token` for the exact text `literal`.
    pub fn literal(token: impl Into<Token>, literal: impl Into<String>) -> Self {
        Self::new(Some(token.into()), Pattern::Literal(literal.into()))
    }

    /// A rule emitting `token` for text matching `regex`.
    pub fn regex(token: impl Into<Token>, regex: impl Into<String>) -> Self {
        Self::new(Some(token.into()), Pattern::Regex(regex.into()))
    }

    /// A rule whose matches are consumed but never emitted.
    pub fn discard(pattern: Pattern) -> Self {
        Self::new(None, pattern)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&Token>, &mut LexController<V>) -> anyhow::Result<LexOutcome<V>>
            + Send
            + Sync
            + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Restrict this rule to the given lexical states.
    ///
    /// A rule without any state belongs to the default state.
    pub fn states<I>(mut self, states: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.states.extend(states.into_iter().map(Into::into));
        self
    }

    /// Mark the states of this rule as exclusive: they do not inherit the
    /// rules of the default state.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

impl<V> Clone for LexRule<V> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            pattern: self.pattern.clone(),
            priority: self.priority,
            callback: self.callback.clone(),
            states: self.states.clone(),
            exclusive: self.exclusive,
        }
    }
}

impl<V> fmt::Debug for LexRule<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LexRule")
            .field("token", &self.token)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .field("callback", &self.callback.is_some())
            .field("states", &self.states)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// The immutable bundle of lexical rules, grammar rules and start symbol.
pub struct Language<V> {
    lex_rules: Vec<LexRule<V>>,
    rules: Vec<GrammarRule<V>>,
    start: Token,
}

impl<V> fmt::Debug for Language<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("lex_rules", &self.lex_rules)
            .field("rules", &self.rules)
            .field("start", &self.start)
            .finish()
    }
}

impl<V> fmt::Display for Language<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## start: {}", self.start)?;
        writeln!(f, "## rules:")?;
        for (i, rule) in self.rules.iter().enumerate() {
            writeln!(f, "{:3}: {}", i, rule.display())?;
        }
        Ok(())
    }
}

impl<V> Language<V> {
    /// Define a language using the specified function.
    pub fn define<F>(f: F) -> Result<Self, LanguageError>
    where
        F: FnOnce(&mut LanguageDef<V>) -> Result<(), LanguageError>,
    {
        let mut def = LanguageDef {
            lex_rules: vec![],
            rules: vec![],
            start: None,
        };
        f(&mut def)?;
        def.end()
    }

    pub fn lex_rules(&self) -> &[LexRule<V>] {
        &self.lex_rules[..]
    }

    /// The grammar rules; the position of a rule is its permanent id.
    pub fn rules(&self) -> &[GrammarRule<V>] {
        &self.rules[..]
    }

    pub fn start_symbol(&self) -> &Token {
        &self.start
    }
}

/// The contextural values for building a `Language`.
#[derive(Debug)]
pub struct LanguageDef<V> {
    lex_rules: Vec<LexRule<V>>,
    rules: Vec<GrammarRule<V>>,
    start: Option<Token>,
}

impl<V> LanguageDef<V> {
    /// Append a lexical rule. Rules declared earlier win ties.
    ///
    /// The emitted token is checked when the definition ends.
    pub fn lex(&mut self, rule: LexRule<V>) -> &mut Self {
        self.lex_rules.push(rule);
        self
    }

    /// Specify a production rule into this grammar.
    pub fn rule<I>(&mut self, lhs: impl Into<Token>, rhs: I) -> Result<(), LanguageError>
    where
        I: IntoIterator,
        I::Item: Into<Token>,
    {
        self.push_rule(lhs.into(), rhs.into_iter().map(Into::into).collect(), None)
    }

    /// Specify a production rule with a semantic action.
    pub fn rule_with<I, F>(
        &mut self,
        lhs: impl Into<Token>,
        rhs: I,
        action: F,
    ) -> Result<(), LanguageError>
    where
        I: IntoIterator,
        I::Item: Into<Token>,
        F: Fn(Vec<V>) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        self.push_rule(
            lhs.into(),
            rhs.into_iter().map(Into::into).collect(),
            Some(Arc::new(action)),
        )
    }

    /// Specify a production rule with an empty right-hand side.
    pub fn empty_rule(&mut self, lhs: impl Into<Token>) -> Result<(), LanguageError> {
        self.push_rule(lhs.into(), vec![], None)
    }

    /// Specify the start symbol for this language.
    pub fn start_symbol(&mut self, symbol: impl Into<Token>) -> Result<(), LanguageError> {
        let symbol = symbol.into();
        verify_label(&symbol)?;
        self.start.replace(symbol);
        Ok(())
    }

    fn push_rule(
        &mut self,
        lhs: Token,
        rhs: Vec<Token>,
        action: Option<RuleAction<V>>,
    ) -> Result<(), LanguageError> {
        verify_label(&lhs)?;
        for symbol in &rhs {
            verify_label(symbol)?;
        }
        if self.rules.iter().any(|r| r.lhs == lhs && r.rhs == rhs) {
            return Err(LanguageError::DuplicateRule {
                rule: GrammarRule::<V> {
                    lhs,
                    rhs,
                    action: None,
                }
                .display()
                .to_string(),
            });
        }
        self.rules.push(GrammarRule { lhs, rhs, action });
        Ok(())
    }

    fn end(self) -> Result<Language<V>, LanguageError> {
        for token in self.lex_rules.iter().filter_map(LexRule::token) {
            verify_label(token)?;
        }
        // The start symbol defaults to the left-hand side of the first rule.
        let start = match self.start {
            Some(start) => start,
            None => self
                .rules
                .first()
                .map(|rule| rule.lhs.clone())
                .ok_or(LanguageError::MissingStartSymbol)?,
        };
        Ok(Language {
            lex_rules: self.lex_rules,
            rules: self.rules,
            start,
        })
    }
}

fn verify_label(token: &Token) -> Result<(), LanguageError> {
    match token {
        Token::Label(name) if name.is_empty() => Err(LanguageError::EmptyLabel),
        Token::Label(..) => Ok(()),
        other => Err(LanguageError::ReservedToken {
            token: other.clone(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LanguageError {
    #[error("the start symbol is not specified and there are no rules")]
    MissingStartSymbol,

    #[error("the reserved token `{}' cannot be used in a rule", token)]
    ReservedToken { token: Token },

    #[error("empty token label")]
    EmptyLabel,

    #[error("duplicate production rule detected: {}", rule)]
    DuplicateRule { rule: String },
}
