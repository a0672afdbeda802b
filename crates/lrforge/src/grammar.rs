//! Symbol classification and the canonical rule/token registry.

use crate::{
    first_sets::{FirstSetError, FirstSets},
    language::{GrammarRule, Language, Token},
    types::{Map, Set},
    util::display_fn,
};
use std::{cmp::Ordering, fmt, hash::Hash};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TokenID {
    raw: u16,
}

impl TokenID {
    /// Reserved id of `Token::Eoi`.
    pub const EOI: Self = Self::from_raw(0);

    /// Reserved id of `Token::Start`.
    pub const START: Self = Self::from_raw(1);

    const OFFSET: u16 = 2;

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn into_raw(self) -> u16 {
        self.raw
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.raw as usize
    }
}

impl fmt::Display for TokenID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RuleID {
    raw: u16,
}

impl RuleID {
    /// The implicit rule `$start := <start symbol>`.
    pub const ACCEPT: Self = Self::from_raw(0);

    const OFFSET: u16 = 1;

    #[inline]
    const fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// The id of the rule at `index` in `Language::rules`.
    pub fn from_index(index: usize) -> Self {
        Self::from_raw(index as u16 + Self::OFFSET)
    }

    /// The position in `Language::rules`, or `None` for the augmenting rule.
    pub fn index(self) -> Option<usize> {
        (self != Self::ACCEPT).then(|| (self.raw - Self::OFFSET) as usize)
    }
}

impl fmt::Display for RuleID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(i) => write!(f, "{}", i),
            None => f.write_str("-1"),
        }
    }
}

/// A set of token ids, iterated in ascending id order.
#[derive(Debug, Default, Clone)]
pub struct TokenSet {
    inner: bit_set::BitSet,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: TokenID) -> bool {
        self.inner.contains(id.index())
    }

    pub fn insert(&mut self, id: TokenID) -> bool {
        self.inner.insert(id.index())
    }

    /// Add all elements of `other`, returning whether this set has grown.
    pub fn union_with(&mut self, other: &Self) -> bool {
        let before = self.inner.len();
        self.inner.union_with(&other.inner);
        self.inner.len() != before
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.inner.is_subset(&other.inner)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = TokenID> + '_ {
        self.inner.iter().map(|raw| TokenID::from_raw(raw as u16))
    }
}

// Equality, hashing and ordering only look at the members so that two sets
// built in different orders (and with different capacities) are identical.
impl PartialEq for TokenSet {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for TokenSet {}

impl Hash for TokenSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for id in self.iter() {
            id.hash(state);
        }
    }
}

impl PartialOrd for TokenSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TokenSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl FromIterator<TokenID> for TokenSet {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = TokenID>,
    {
        Self {
            inner: iter.into_iter().map(TokenID::index).collect(),
        }
    }
}

impl Extend<TokenID> for TokenSet {
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = TokenID>,
    {
        for id in iter {
            self.insert(id);
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Terminal,
    Nonterminal,
}

/// Classifies symbols as terminal or nonterminal from a rule set.
///
/// Nonterminals are the symbols appearing as some left-hand side; terminals
/// are the remaining symbols appearing on right-hand sides.
#[derive(Debug)]
pub struct SymbolDiscriminator {
    nonterminals: Set<Token>,
    terminals: Set<Token>,
}

impl SymbolDiscriminator {
    pub fn new<V>(rules: &[GrammarRule<V>]) -> Self {
        let nonterminals: Set<Token> = rules.iter().map(|rule| rule.lhs().clone()).collect();
        let terminals = rules
            .iter()
            .flat_map(|rule| rule.rhs())
            .filter(|symbol| !nonterminals.contains(*symbol))
            .cloned()
            .collect();
        Self {
            nonterminals,
            terminals,
        }
    }

    /// Return the kind of `symbol`, or `None` if it does not occur in any rule.
    pub fn kind(&self, symbol: &Token) -> Option<SymbolKind> {
        if self.nonterminals.contains(symbol) {
            Some(SymbolKind::Nonterminal)
        } else if self.terminals.contains(symbol) {
            Some(SymbolKind::Terminal)
        } else {
            None
        }
    }

    pub fn is_terminal(&self, symbol: &Token) -> bool {
        self.terminals.contains(symbol)
    }

    pub fn is_nonterminal(&self, symbol: &Token) -> bool {
        self.nonterminals.contains(symbol)
    }

    pub fn terminals(&self) -> impl Iterator<Item = &Token> + '_ {
        self.terminals.iter()
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = &Token> + '_ {
        self.nonterminals.iter()
    }
}

/// A production rule expressed in token ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    lhs: TokenID,
    rhs: Vec<TokenID>,
}

impl Rule {
    pub fn lhs(&self) -> TokenID {
        self.lhs
    }

    pub fn rhs(&self) -> &[TokenID] {
        &self.rhs[..]
    }

    pub fn display<'g>(&'g self, db: &'g GrammarDB) -> impl fmt::Display + 'g {
        display_fn(move |f| {
            write!(f, "{} :=", db.token(self.lhs))?;
            for symbol in &self.rhs {
                write!(f, " {}", db.token(*symbol))?;
            }
            Ok(())
        })
    }
}

/// The canonical registry of the tokens and rules of a language.
///
/// Token ids are assigned in order of first appearance, after the two
/// reserved ids. Rule ids follow the order of `Language::rules`.
#[derive(Debug)]
pub struct GrammarDB {
    symbols: Set<Token>,
    kinds: Vec<SymbolKind>,
    rules: Vec<Rule>,
    accept: Rule,
    rules_by_lhs: Map<TokenID, Vec<RuleID>>,
    first_sets: FirstSets,
}

impl GrammarDB {
    pub fn new<V>(language: &Language<V>) -> Result<Self, GrammarError> {
        let discriminator = SymbolDiscriminator::new(language.rules());

        let start = language.start_symbol();
        if !discriminator.is_nonterminal(start) {
            return Err(GrammarError::StartNotNonterminal {
                symbol: start.clone(),
            });
        }

        let mut symbols: Set<Token> = Set::default();
        let mut kinds = vec![];
        symbols.insert(Token::Eoi);
        kinds.push(SymbolKind::Terminal);
        symbols.insert(Token::Start);
        kinds.push(SymbolKind::Nonterminal);
        debug_assert_eq!(symbols.len(), TokenID::OFFSET as usize);

        let mut intern = |token: &Token| -> Result<TokenID, GrammarError> {
            let (index, inserted) = symbols.insert_full(token.clone());
            if inserted {
                let kind = match discriminator.kind(token) {
                    Some(kind) => kind,
                    None => unreachable!("every interned symbol occurs in some rule"),
                };
                kinds.push(kind);
            }
            u16::try_from(index)
                .map(TokenID::from_raw)
                .map_err(|_| GrammarError::TooManySymbols)
        };

        let mut rules = Vec::with_capacity(language.rules().len());
        for rule in language.rules() {
            let lhs = intern(rule.lhs())?;
            let rhs = rule
                .rhs()
                .iter()
                .map(&mut intern)
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(Rule { lhs, rhs });
        }
        if rules.len() >= (u16::MAX - RuleID::OFFSET) as usize {
            return Err(GrammarError::TooManyRules);
        }
        let accept = Rule {
            lhs: TokenID::START,
            rhs: vec![intern(start)?],
        };

        let mut rules_by_lhs: Map<TokenID, Vec<RuleID>> = Map::default();
        rules_by_lhs
            .entry(TokenID::START)
            .or_default()
            .push(RuleID::ACCEPT);
        for (i, rule) in rules.iter().enumerate() {
            rules_by_lhs
                .entry(rule.lhs)
                .or_default()
                .push(RuleID::from_index(i));
        }

        let first_sets = FirstSets::new(&kinds, accept_and(&accept, &rules));

        tracing::debug!(
            symbols = symbols.len(),
            rules = rules.len(),
            "grammar registered"
        );

        Ok(Self {
            symbols,
            kinds,
            rules,
            accept,
            rules_by_lhs,
            first_sets,
        })
    }

    /// The number of rules, excluding the augmenting one.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Look up a rule, including `RuleID::ACCEPT`.
    pub fn rule(&self, id: RuleID) -> Option<&Rule> {
        match id.index() {
            None => Some(&self.accept),
            Some(i) => self.rules.get(i),
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = (RuleID, &Rule)> + '_ {
        Some((RuleID::ACCEPT, &self.accept)).into_iter().chain(
            self.rules
                .iter()
                .enumerate()
                .map(|(i, rule)| (RuleID::from_index(i), rule)),
        )
    }

    /// The rules whose left-hand side is `lhs`, in declaration order.
    pub fn rules_for(&self, lhs: TokenID) -> &[RuleID] {
        self.rules_by_lhs.get(&lhs).map_or(&[][..], |rules| &rules[..])
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn token_id(&self, token: &Token) -> Option<TokenID> {
        self.symbols
            .get_index_of(token)
            .map(|i| TokenID::from_raw(i as u16))
    }

    /// Return the token registered as `id`.
    ///
    /// # Panics
    /// Panics if `id` was not issued by this registry.
    pub fn token(&self, id: TokenID) -> &Token {
        &self.symbols[id.index()]
    }

    pub fn tokens(&self) -> impl Iterator<Item = (TokenID, &Token)> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, token)| (TokenID::from_raw(i as u16), token))
    }

    pub fn kind(&self, id: TokenID) -> SymbolKind {
        self.kinds[id.index()]
    }

    pub fn is_terminal(&self, id: TokenID) -> bool {
        self.kind(id) == SymbolKind::Terminal
    }

    pub fn is_nonterminal(&self, id: TokenID) -> bool {
        self.kind(id) == SymbolKind::Nonterminal
    }

    pub fn terminals(&self) -> impl Iterator<Item = TokenID> + '_ {
        self.tokens()
            .map(|(id, _)| id)
            .filter(|id| self.is_terminal(*id))
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = TokenID> + '_ {
        self.tokens()
            .map(|(id, _)| id)
            .filter(|id| self.is_nonterminal(*id))
    }

    /// The user-declared start symbol.
    pub fn start_symbol(&self) -> TokenID {
        self.accept.rhs[0]
    }

    pub fn is_nullable(&self, id: TokenID) -> bool {
        self.first_sets.is_nullable(id)
    }

    /// `First(X)` of a registered symbol.
    pub fn first(&self, id: TokenID) -> &TokenSet {
        self.first_sets.first(id)
    }

    pub(crate) fn first_sets(&self) -> &FirstSets {
        &self.first_sets
    }

    /// `First(sequence)` of arbitrary tokens.
    ///
    /// Fails on a token that does not occur in the grammar rather than
    /// silently treating it as contributing nothing.
    pub fn first_of(&self, sequence: &[Token]) -> Result<TokenSet, FirstSetError> {
        let ids = sequence
            .iter()
            .map(|token| {
                self.token_id(token)
                    .ok_or_else(|| FirstSetError::UnknownSymbol {
                        symbol: token.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.first_sets.of_sequence(&ids, &TokenSet::new()))
    }

    pub fn display(&self) -> impl fmt::Display + '_ {
        display_fn(|f| {
            writeln!(f, "## terminals:")?;
            for id in self.terminals() {
                writeln!(f, "{}", self.token(id))?;
            }
            writeln!(f, "\n## nonterminals:")?;
            for id in self.nonterminals() {
                write!(f, "{}", self.token(id))?;
                if self.is_nullable(id) {
                    f.write_str(" (nullable)")?;
                }
                writeln!(f)?;
            }
            writeln!(f, "\n## rules:")?;
            for (id, rule) in self.rules() {
                writeln!(f, "{}: {}", id, rule.display(self))?;
            }
            Ok(())
        })
    }
}

fn accept_and<'r>(accept: &'r Rule, rules: &'r [Rule]) -> impl Iterator<Item = &'r Rule> + Clone {
    Some(accept).into_iter().chain(rules)
}

#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("the start symbol `{}' is not defined by any rule", symbol)]
    StartNotNonterminal { symbol: Token },

    #[error("too many symbols")]
    TooManySymbols,

    #[error("too many rules")]
    TooManyRules,
}
