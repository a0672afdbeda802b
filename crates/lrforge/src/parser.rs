//! Shift-reduce execution of a parse table.

use crate::{
    dfa::NodeID,
    grammar::RuleID,
    language::{GrammarRule, Language, Token},
    lexer::{LexError, Lexeme, Lexer, PatternError},
    table::{Action, ParseTable},
    util::display_fn,
};
use std::fmt;

/// The strategy that turns shifted lexemes and reduced rules into values.
pub trait Callbacks<V> {
    fn on_terminal(&self, lexeme: Lexeme<V>) -> anyhow::Result<V>;

    /// `children` holds the values of the right-hand side, in order.
    fn on_nonterminal(&self, rule: &GrammarRule<V>, children: Vec<V>) -> anyhow::Result<V>;
}

/// A generic syntax tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTree {
    pub kind: Token,
    /// The matched text of a leaf; `None` for internal nodes.
    pub text: Option<String>,
    pub children: Vec<ParseTree>,
}

impl ParseTree {
    pub fn leaf(kind: impl Into<Token>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: Some(text.into()),
            children: vec![],
        }
    }

    pub fn node(kind: impl Into<Token>, children: Vec<ParseTree>) -> Self {
        Self {
            kind: kind.into(),
            text: None,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.text.is_some()
    }

    /// Render the tree one node per line, children indented below parents.
    pub fn display(&self) -> impl fmt::Display + '_ {
        display_fn(move |f| self.fmt_indented(f, 0))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.kind, indent = depth * 2)?;
        if let Some(text) = &self.text {
            write!(f, " {:?}", text)?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Builds a `ParseTree` mirroring every shift and reduction.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeBuilder;

impl Callbacks<ParseTree> for TreeBuilder {
    fn on_terminal(&self, lexeme: Lexeme<ParseTree>) -> anyhow::Result<ParseTree> {
        Ok(ParseTree::leaf(lexeme.token, lexeme.text))
    }

    fn on_nonterminal(
        &self,
        rule: &GrammarRule<ParseTree>,
        children: Vec<ParseTree>,
    ) -> anyhow::Result<ParseTree> {
        Ok(ParseTree::node(rule.lhs().clone(), children))
    }
}

/// Builds a compact `ParseTree`: rule actions run when present, and
/// single-child reductions collapse into their child.
#[derive(Debug, Default, Clone, Copy)]
pub struct AstBuilder;

impl Callbacks<ParseTree> for AstBuilder {
    fn on_terminal(&self, lexeme: Lexeme<ParseTree>) -> anyhow::Result<ParseTree> {
        match lexeme.value {
            Some(value) => Ok(value),
            None => Ok(ParseTree::leaf(lexeme.token, lexeme.text)),
        }
    }

    fn on_nonterminal(
        &self,
        rule: &GrammarRule<ParseTree>,
        mut children: Vec<ParseTree>,
    ) -> anyhow::Result<ParseTree> {
        if let Some(action) = rule.action() {
            return action(children);
        }
        if children.len() == 1 {
            if let Some(child) = children.pop() {
                return Ok(child);
            }
        }
        Ok(ParseTree::node(rule.lhs().clone(), children))
    }
}

type TerminalFn<V> = Box<dyn Fn(&Token, &str) -> anyhow::Result<V> + Send + Sync>;
type EmptyFn<V> = Box<dyn Fn() -> anyhow::Result<V> + Send + Sync>;

/// Evaluates the semantic actions attached to the grammar rules.
///
/// A terminal evaluates to the value its lexer rule attached, or else to the
/// result of the terminal function applied to its label and text. A rule
/// without an action passes its only child through. An empty rule without an
/// action needs the fallback set by `with_empty`.
pub struct RuleActions<V> {
    terminal: TerminalFn<V>,
    empty: Option<EmptyFn<V>>,
}

impl<V> fmt::Debug for RuleActions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleActions").finish_non_exhaustive()
    }
}

impl<V> RuleActions<V>
where
    V: From<String>,
{
    pub fn new() -> Self {
        Self::with_terminal(|_, text| Ok(V::from(text.to_owned())))
    }
}

impl<V> Default for RuleActions<V>
where
    V: From<String>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RuleActions<V> {
    pub fn with_terminal<F>(f: F) -> Self
    where
        F: Fn(&Token, &str) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        Self {
            terminal: Box::new(f),
            empty: None,
        }
    }

    /// The value of empty reductions whose rule has no action.
    pub fn with_empty<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<V> + Send + Sync + 'static,
    {
        self.empty = Some(Box::new(f));
        self
    }
}

impl<V> Callbacks<V> for RuleActions<V> {
    fn on_terminal(&self, lexeme: Lexeme<V>) -> anyhow::Result<V> {
        match lexeme.value {
            Some(value) => Ok(value),
            None => (self.terminal)(&lexeme.token, &lexeme.text),
        }
    }

    fn on_nonterminal(&self, rule: &GrammarRule<V>, mut children: Vec<V>) -> anyhow::Result<V> {
        if let Some(action) = rule.action() {
            return action(children);
        }
        match (children.pop(), children.is_empty(), &self.empty) {
            (Some(child), true, _) => Ok(child),
            (None, _, Some(empty)) => empty(),
            _ => anyhow::bail!("no action for rule `{}'", rule.display()),
        }
    }
}

/// Feeds lexemes to the engine, synthesizing the end of input when the
/// underlying stream runs out.
struct TokenStream<I> {
    inner: I,
    end: usize,
}

impl<V, I> TokenStream<I>
where
    I: Iterator<Item = Lexeme<V>>,
{
    fn next(&mut self) -> Lexeme<V> {
        match self.inner.next() {
            Some(lexeme) => {
                self.end = lexeme.offset + lexeme.text.len();
                lexeme
            }
            None => Lexeme::eoi(self.end),
        }
    }
}

/// A parser for one language, driven by a shared parse table.
pub struct Parser<'l, V> {
    language: &'l Language<V>,
    table: &'l ParseTable,
    lexer: Lexer<V>,
    callbacks: Box<dyn Callbacks<V> + 'l>,
}

impl<V> fmt::Debug for Parser<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("language", &self.language)
            .field("table", &self.table.kind())
            .field("lexer", &self.lexer)
            .finish_non_exhaustive()
    }
}

impl<'l> Parser<'l, ParseTree> {
    /// Create a parser building plain `ParseTree`s.
    pub fn new(language: &'l Language<ParseTree>, table: &'l ParseTable) -> Result<Self, PatternError> {
        Self::with_callbacks(language, table, TreeBuilder)
    }
}

impl<'l, V> Parser<'l, V> {
    pub fn with_callbacks<C>(
        language: &'l Language<V>,
        table: &'l ParseTable,
        callbacks: C,
    ) -> Result<Self, PatternError>
    where
        C: Callbacks<V> + 'l,
    {
        Ok(Self {
            language,
            table,
            lexer: Lexer::new(language)?,
            callbacks: Box::new(callbacks),
        })
    }

    /// Replace the callbacks used by `parse` and `parse_tokens`.
    pub fn set_callbacks<C>(&mut self, callbacks: C)
    where
        C: Callbacks<V> + 'l,
    {
        self.callbacks = Box::new(callbacks);
    }

    pub fn table(&self) -> &ParseTable {
        self.table
    }

    pub fn lexer(&self) -> &Lexer<V> {
        &self.lexer
    }

    /// Tokenize `text` and parse it.
    pub fn parse(&self, text: &str) -> Result<V, ParseError> {
        self.parse_with(text, &*self.callbacks)
    }

    /// Tokenize `text` and parse it with `callbacks` for this call only.
    pub fn parse_with(&self, text: &str, callbacks: &dyn Callbacks<V>) -> Result<V, ParseError> {
        let lexemes = self.lexer.tokenize(text)?;
        self.parse_tokens_with(lexemes, callbacks)
    }

    /// Parse a pre-tokenized stream; a missing trailing `Token::Eoi` is
    /// implied.
    pub fn parse_tokens<I>(&self, tokens: I) -> Result<V, ParseError>
    where
        I: IntoIterator<Item = Lexeme<V>>,
    {
        self.parse_tokens_with(tokens, &*self.callbacks)
    }

    pub fn parse_tokens_with<I>(
        &self,
        tokens: I,
        callbacks: &dyn Callbacks<V>,
    ) -> Result<V, ParseError>
    where
        I: IntoIterator<Item = Lexeme<V>>,
    {
        let span = tracing::trace_span!("parse");
        let _entered = span.enter();

        let table = self.table;
        let mut tokens = TokenStream {
            inner: tokens.into_iter(),
            end: 0,
        };
        let mut states: Vec<NodeID> = vec![NodeID::START];
        let mut values: Vec<V> = vec![];
        let mut lookahead = tokens.next();

        loop {
            let current = *states.last().ok_or(ParseError::EmptyStateStack)?;
            let symbol = table.token_id(&lookahead.token).ok_or_else(|| {
                ParseError::UnknownToken {
                    token: lookahead.token.clone(),
                    position: lookahead.offset,
                }
            })?;

            match table.action(current, symbol) {
                Some(Action::Shift(next)) => {
                    tracing::trace!("shift {} in state {} -> {}", lookahead.token, current, next);
                    states.push(*next);
                    let value = callbacks
                        .on_terminal(lookahead)
                        .map_err(ParseError::Callback)?;
                    values.push(value);
                    lookahead = tokens.next();
                }

                Some(Action::Reduce(rule_id)) => {
                    let (rule, lhs, len) = match (
                        rule_id.index().and_then(|i| self.language.rules().get(i)),
                        table.reduction(*rule_id),
                    ) {
                        (Some(rule), Some(reduction)) => (rule, reduction.lhs, reduction.len),
                        _ => return Err(ParseError::UnknownRule { rule: *rule_id }),
                    };
                    tracing::trace!("reduce {} in state {}", rule.display(), current);

                    if values.len() < len {
                        return Err(ParseError::EmptyValueStack);
                    }
                    if states.len() <= len {
                        return Err(ParseError::EmptyStateStack);
                    }
                    let children = values.split_off(values.len() - len);
                    states.truncate(states.len() - len);

                    let top = *states.last().ok_or(ParseError::EmptyStateStack)?;
                    let value = callbacks
                        .on_nonterminal(rule, children)
                        .map_err(ParseError::Callback)?;
                    match table.action(top, lhs) {
                        Some(Action::Goto(next)) => states.push(*next),
                        _ => {
                            return Err(ParseError::MissingGoto {
                                state: top,
                                symbol: rule.lhs().clone(),
                            })
                        }
                    }
                    values.push(value);
                }

                Some(Action::Accept) => {
                    // Nothing may follow the end of input.
                    let rest = tokens.next();
                    if !rest.is_eoi() {
                        return Err(ParseError::UnexpectedToken {
                            state: current,
                            token: rest.token,
                            position: rest.offset,
                        });
                    }
                    tracing::trace!("accepted");
                    return values.pop().ok_or(ParseError::EmptyValueStack);
                }

                Some(Action::Conflict { .. }) => {
                    return Err(ParseError::Conflict {
                        state: current,
                        token: lookahead.token,
                        position: lookahead.offset,
                    });
                }

                Some(Action::Goto(..)) | None => {
                    return Err(ParseError::UnexpectedToken {
                        state: current,
                        token: lookahead.token,
                        position: lookahead.offset,
                    });
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("from lexer: {}", _0)]
    Lex(
        #[from]
        #[source]
        LexError,
    ),

    #[error("unexpected token `{}' at offset {} (state {})", token, position, state)]
    UnexpectedToken {
        state: NodeID,
        token: Token,
        position: usize,
    },

    #[error("conflicting actions for `{}' at offset {} (state {})", token, position, state)]
    Conflict {
        state: NodeID,
        token: Token,
        position: usize,
    },

    #[error("no goto for `{}' from state {}", symbol, state)]
    MissingGoto { state: NodeID, symbol: Token },

    #[error("the token `{}' at offset {} is not a symbol of the grammar", token, position)]
    UnknownToken { token: Token, position: usize },

    #[error("the table refers to rule {} missing from the language", rule)]
    UnknownRule { rule: RuleID },

    #[error("callback failed")]
    Callback(#[source] anyhow::Error),

    #[error("empty state stack")]
    EmptyStateStack,

    #[error("empty value stack")]
    EmptyValueStack,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::GrammarDB,
        language::{LanguageDef, LanguageError, LexRule, Pattern},
        lexer::LexOutcome,
        table::TableKind,
    };

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn arithmetic_lex<V>(def: &mut LanguageDef<V>) {
        def.lex(LexRule::regex("DIGITS", "[0-9]+"))
            .lex(LexRule::literal("PLUS", "+"))
            .lex(LexRule::literal("ASTERISK", "*"))
            .lex(LexRule::literal("LPAREN", "("))
            .lex(LexRule::literal("RPAREN", ")"))
            .lex(LexRule::discard(Pattern::Regex(r"\s+".into())));
    }

    fn arithmetic_rules<V>(def: &mut LanguageDef<V>) -> Result<(), LanguageError> {
        def.rule("EXP", ["EXP", "PLUS", "TERM"])?;
        def.rule("EXP", ["TERM"])?;
        def.rule("TERM", ["TERM", "ASTERISK", "ATOM"])?;
        def.rule("TERM", ["ATOM"])?;
        def.rule("ATOM", ["DIGITS"])?;
        def.rule("ATOM", ["LPAREN", "EXP", "RPAREN"])?;
        Ok(())
    }

    fn evaluator() -> Language<i64> {
        Language::define(|def| {
            def.lex(
                LexRule::regex("NUM", "[0-9]+").callback(|text, _, _| {
                    Ok(LexOutcome::Value("DIGITS".into(), text.parse()?))
                }),
            )
            .lex(LexRule::literal("PLUS", "+"))
            .lex(LexRule::literal("ASTERISK", "*"))
            .lex(LexRule::literal("LPAREN", "("))
            .lex(LexRule::literal("RPAREN", ")"))
            .lex(LexRule::discard(Pattern::Regex(r"\s+".into())));

            def.rule_with("EXP", ["EXP", "PLUS", "TERM"], |v| Ok(v[0] + v[2]))?;
            def.rule("EXP", ["TERM"])?;
            def.rule_with("TERM", ["TERM", "ASTERISK", "ATOM"], |v| Ok(v[0] * v[2]))?;
            def.rule("TERM", ["ATOM"])?;
            def.rule("ATOM", ["DIGITS"])?;
            def.rule_with("ATOM", ["LPAREN", "EXP", "RPAREN"], |v| Ok(v[1]))?;
            Ok(())
        })
        .unwrap()
    }

    fn operators_are_zero() -> RuleActions<i64> {
        RuleActions::with_terminal(|_, _| Ok(0))
    }

    #[test]
    fn evaluates_arithmetic() {
        init_tracing();
        let lang = evaluator();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        assert_eq!(table.kind(), TableKind::LALR1);

        let parser = Parser::with_callbacks(&lang, &table, operators_are_zero()).unwrap();
        assert_eq!(parser.parse("1+1").unwrap(), 2);
        assert_eq!(
            parser
                .parse("( 1+1 )*3 + ( (1+1) * (1+2*3+4) )\n")
                .unwrap(),
            28
        );
    }

    #[test]
    fn builds_parse_tree() {
        init_tracing();
        let lang = Language::<ParseTree>::define(|def| {
            arithmetic_lex(def);
            arithmetic_rules(def)
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        let parser = Parser::new(&lang, &table).unwrap();

        let tree = parser.parse("1+2").unwrap();
        eprintln!("{}", tree.display());
        assert_eq!(tree.kind, Token::from("EXP"));
        assert_eq!(tree.text, None);
        assert_eq!(tree.children.len(), 3);
        assert_eq!(tree.children[1], ParseTree::leaf("PLUS", "+"));
        assert_eq!(
            tree.children[2],
            ParseTree::node(
                "TERM",
                vec![ParseTree::node("ATOM", vec![ParseTree::leaf("DIGITS", "2")])]
            )
        );

        let ast = parser.parse_with("1+2", &AstBuilder).unwrap();
        assert_eq!(
            ast,
            ParseTree::node(
                "EXP",
                vec![
                    ParseTree::leaf("DIGITS", "1"),
                    ParseTree::leaf("PLUS", "+"),
                    ParseTree::leaf("DIGITS", "2"),
                ]
            )
        );
    }

    #[test]
    fn syntax_errors() {
        let lang = evaluator();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        let parser = Parser::with_callbacks(&lang, &table, operators_are_zero()).unwrap();

        match parser.parse("1+").unwrap_err() {
            ParseError::UnexpectedToken {
                token, position, ..
            } => {
                assert_eq!(token, Token::Eoi);
                assert_eq!(position, 2);
            }
            err => panic!("unexpected error: {}", err),
        }
        match parser.parse("1 2").unwrap_err() {
            ParseError::UnexpectedToken {
                token, position, ..
            } => {
                assert_eq!(token, Token::from("DIGITS"));
                assert_eq!(position, 2);
            }
            err => panic!("unexpected error: {}", err),
        }
        assert!(matches!(
            parser.parse("1 ? 2").unwrap_err(),
            ParseError::Lex(LexError::NoMatch { offset: 2, .. })
        ));
    }

    #[test]
    fn token_stream_input() {
        let lang = evaluator();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        let parser = Parser::with_callbacks(&lang, &table, operators_are_zero()).unwrap();

        let tokens = vec![
            Lexeme::new("DIGITS", "3", 0).with_value(3),
            Lexeme::new("ASTERISK", "*", 1),
            Lexeme::new("DIGITS", "4", 2).with_value(4),
        ];
        assert_eq!(parser.parse_tokens(tokens).unwrap(), 12);

        let err = parser
            .parse_tokens(vec![Lexeme::new("NOPE", "?", 0)])
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownToken { position: 0, .. }));
    }

    #[test]
    fn input_after_end_of_input_is_rejected() {
        let lang = evaluator();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        let parser = Parser::with_callbacks(&lang, &table, operators_are_zero()).unwrap();

        let tokens = vec![
            Lexeme::new("DIGITS", "1", 0).with_value(1),
            Lexeme::eoi(1),
            Lexeme::new("PLUS", "+", 1),
            Lexeme::new("DIGITS", "9", 2).with_value(9),
        ];
        match parser.parse_tokens(tokens).unwrap_err() {
            ParseError::UnexpectedToken {
                token, position, ..
            } => {
                assert_eq!(token, Token::from("PLUS"));
                assert_eq!(position, 1);
            }
            err => panic!("unexpected error: {}", err),
        }

        let tokens = vec![
            Lexeme::new("DIGITS", "1", 0).with_value(1),
            Lexeme::eoi(1),
            Lexeme::eoi(1),
        ];
        assert_eq!(parser.parse_tokens(tokens).unwrap(), 1);
    }

    #[test]
    fn empty_reductions_use_the_fallback() {
        init_tracing();
        let lang = Language::<i64>::define(|def| {
            arithmetic_lex(def);
            def.rule_with("LIST", ["LIST", "DIGITS"], |v| Ok(v[0] + v[1]))?;
            def.empty_rule("LIST")?;
            Ok(())
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();

        let digits = || RuleActions::<i64>::with_terminal(|_, text| Ok(text.parse::<i64>()?));
        let parser = Parser::with_callbacks(&lang, &table, digits().with_empty(|| Ok(0))).unwrap();
        assert_eq!(parser.parse("1 2 3").unwrap(), 6);
        assert_eq!(parser.parse("").unwrap(), 0);

        let parser = Parser::with_callbacks(&lang, &table, digits()).unwrap();
        assert!(matches!(
            parser.parse("1 2").unwrap_err(),
            ParseError::Callback(..)
        ));
    }

    #[test]
    fn callbacks_can_be_overridden() {
        struct CountTerminals;
        impl Callbacks<i64> for CountTerminals {
            fn on_terminal(&self, _: Lexeme<i64>) -> anyhow::Result<i64> {
                Ok(1)
            }
            fn on_nonterminal(&self, _: &GrammarRule<i64>, children: Vec<i64>) -> anyhow::Result<i64> {
                Ok(children.iter().sum())
            }
        }

        let lang = evaluator();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        let mut parser = Parser::with_callbacks(&lang, &table, operators_are_zero()).unwrap();

        assert_eq!(parser.parse_with("1+2*3", &CountTerminals).unwrap(), 5);
        assert_eq!(parser.parse("1+2*3").unwrap(), 7);

        parser.set_callbacks(CountTerminals);
        assert_eq!(parser.parse("(1)").unwrap(), 3);
    }

    #[test]
    fn callback_errors_stop_parsing() {
        let lang = Language::<i64>::define(|def| {
            arithmetic_lex(def);
            arithmetic_rules(def)
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        let parser = Parser::with_callbacks(
            &lang,
            &table,
            RuleActions::with_terminal(|token, text| match token.as_label() {
                Some("DIGITS") => Ok(text.parse()?),
                _ => Ok(0),
            }),
        )
        .unwrap();

        assert_eq!(parser.parse("42").unwrap(), 42);
        // `EXP := EXP PLUS TERM` has no action and three children.
        assert!(matches!(
            parser.parse("1+2").unwrap_err(),
            ParseError::Callback(..)
        ));
    }

    #[test]
    fn conflicted_table_reports_at_runtime() {
        let lang = Language::<ParseTree>::define(|def| {
            arithmetic_lex(def);
            def.rule("EXP", ["EXP", "PLUS", "EXP"])?;
            def.rule("EXP", ["DIGITS"])?;
            Ok(())
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();
        let table = ParseTable::generate(&db).unwrap();
        assert_eq!(table.kind(), TableKind::Conflicted);

        let parser = Parser::new(&lang, &table).unwrap();
        assert!(parser.parse("1+1").is_ok());
        match parser.parse("1+1+1").unwrap_err() {
            ParseError::Conflict {
                token, position, ..
            } => {
                assert_eq!(token, Token::from("PLUS"));
                assert_eq!(position, 3);
            }
            err => panic!("unexpected error: {}", err),
        }
    }
}
