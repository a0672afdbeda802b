//! LR(1) items and their closures.

use crate::{
    grammar::{GrammarDB, RuleID, TokenID, TokenSet},
    types::Map,
    util::display_fn,
};
use rustc_hash::FxHasher;
use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// A dotted rule with its lookahead symbols.
///
/// Two items are LR0-equal when their rule and dot position match, and
/// LR1-equal when their lookaheads match as well.
#[derive(Debug, Clone)]
pub struct ClosureItem {
    rule: RuleID,
    dot: usize,
    lookaheads: TokenSet,
    lr0_hash: u64,
    lr1_hash: u64,
}

impl ClosureItem {
    pub fn new(
        db: &GrammarDB,
        rule: RuleID,
        dot: usize,
        lookaheads: TokenSet,
    ) -> Result<Self, ClosureError> {
        let r = db.rule(rule).ok_or(ClosureError::RuleOutOfRange { rule })?;
        if dot > r.rhs().len() {
            return Err(ClosureError::DotOutOfRange {
                rule,
                dot,
                len: r.rhs().len(),
            });
        }
        if lookaheads.is_empty() {
            return Err(ClosureError::EmptyLookaheads { rule, dot });
        }
        Ok(Self::new_unchecked(rule, dot, lookaheads))
    }

    pub(crate) fn new_unchecked(rule: RuleID, dot: usize, lookaheads: TokenSet) -> Self {
        let lr0_hash = {
            let mut hasher = FxHasher::default();
            rule.hash(&mut hasher);
            dot.hash(&mut hasher);
            hasher.finish()
        };
        let lr1_hash = {
            let mut hasher = FxHasher::default();
            lr0_hash.hash(&mut hasher);
            lookaheads.hash(&mut hasher);
            hasher.finish()
        };
        Self {
            rule,
            dot,
            lookaheads,
            lr0_hash,
            lr1_hash,
        }
    }

    pub fn rule(&self) -> RuleID {
        self.rule
    }

    pub fn dot(&self) -> usize {
        self.dot
    }

    pub fn lookaheads(&self) -> &TokenSet {
        &self.lookaheads
    }

    pub fn lr0_hash(&self) -> u64 {
        self.lr0_hash
    }

    pub fn lr1_hash(&self) -> u64 {
        self.lr1_hash
    }

    pub fn lr0_eq(&self, other: &Self) -> bool {
        self.lr0_hash == other.lr0_hash && self.rule == other.rule && self.dot == other.dot
    }

    pub fn lr1_eq(&self, other: &Self) -> bool {
        self.lr1_hash == other.lr1_hash
            && self.lr0_eq(other)
            && self.lookaheads == other.lookaheads
    }

    /// Union the lookaheads of two LR0-equal items into a new item.
    pub fn merge(&self, other: &Self) -> Result<Self, ClosureError> {
        if !self.lr0_eq(other) {
            return Err(ClosureError::CoreMismatch);
        }
        let mut lookaheads = self.lookaheads.clone();
        lookaheads.union_with(&other.lookaheads);
        Ok(Self::new_unchecked(self.rule, self.dot, lookaheads))
    }

    /// The symbol right after the dot, if any.
    pub fn next_symbol(&self, db: &GrammarDB) -> Option<TokenID> {
        db.rule(self.rule)
            .and_then(|rule| rule.rhs().get(self.dot).copied())
    }

    pub fn is_complete(&self, db: &GrammarDB) -> bool {
        db.rule(self.rule)
            .map_or(false, |rule| self.dot >= rule.rhs().len())
    }

    fn advance(&self) -> Self {
        Self::new_unchecked(self.rule, self.dot + 1, self.lookaheads.clone())
    }

    fn core(&self) -> (RuleID, usize) {
        (self.rule, self.dot)
    }

    // `"(A := B . c) [$eoi PLUS]"`
    pub fn display<'g>(&'g self, db: &'g GrammarDB) -> impl fmt::Display + 'g {
        display_fn(move |f| {
            let rule = match db.rule(self.rule) {
                Some(rule) => rule,
                None => return write!(f, "(<unknown rule {}>)", self.rule),
            };
            write!(f, "({} :=", db.token(rule.lhs()))?;
            for (i, symbol) in rule.rhs().iter().enumerate() {
                if i == self.dot {
                    f.write_str(" .")?;
                }
                write!(f, " {}", db.token(*symbol))?;
            }
            if self.dot == rule.rhs().len() {
                f.write_str(" .")?;
            }
            f.write_str(") [")?;
            for (i, lookahead) in self.lookaheads.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}", db.token(lookahead))?;
            }
            f.write_str("]")
        })
    }
}

impl PartialEq for ClosureItem {
    fn eq(&self, other: &Self) -> bool {
        self.lr1_eq(other)
    }
}

impl Eq for ClosureItem {}

impl Hash for ClosureItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.lr1_hash);
    }
}

/// A canonically sorted set of items closed under closure expansion; one
/// state of the automaton.
#[derive(Debug, Clone)]
pub struct ClosureSet {
    items: Vec<ClosureItem>,
    lr0_hash: u64,
    lr1_hash: u64,
}

impl ClosureSet {
    /// Expand `kernel` into its closure.
    ///
    /// Items sharing an LR(0) core are coalesced into one item carrying the
    /// union of their lookaheads.
    pub fn closure<I>(db: &GrammarDB, kernel: I) -> Self
    where
        I: IntoIterator<Item = ClosureItem>,
    {
        let mut items: Map<(RuleID, usize), TokenSet> = Map::default();
        for item in kernel {
            items
                .entry(item.core())
                .or_default()
                .union_with(&item.lookaheads);
        }

        let first_sets = db.first_sets();
        let mut changed = true;
        while changed {
            changed = false;

            // Collect the candidates first.
            let mut added: Map<(RuleID, usize), TokenSet> = Map::default();
            for (&(rule, dot), lookaheads) in &items {
                let rhs = match db.rule(rule) {
                    Some(r) => r.rhs(),
                    None => continue,
                };

                // [X := ... . Y beta]
                //  Y: one nonterminal symbol
                let (y_symbol, beta) = match &rhs[dot.min(rhs.len())..] {
                    [y, beta @ ..] if db.is_nonterminal(*y) => (*y, beta),
                    _ => continue,
                };

                // With lookaheads {x1,...,xk}, every terminal in
                //   First(beta x1) ∪ ... ∪ First(beta xk)
                // becomes a lookahead of the induced items.
                let induced = first_sets.of_sequence(beta, lookaheads);
                for &induced_rule in db.rules_for(y_symbol) {
                    added
                        .entry((induced_rule, 0))
                        .or_default()
                        .union_with(&induced);
                }
            }

            for (core, lookaheads) in added {
                let slot = items.entry(core).or_insert_with(|| {
                    changed = true;
                    TokenSet::new()
                });
                changed |= slot.union_with(&lookaheads);
            }
        }

        Self::from_items(
            items
                .into_iter()
                .map(|((rule, dot), lookaheads)| ClosureItem::new_unchecked(rule, dot, lookaheads))
                .collect(),
        )
    }

    fn from_items(mut items: Vec<ClosureItem>) -> Self {
        items.sort_by_key(ClosureItem::core);
        let mut lr0 = FxHasher::default();
        let mut lr1 = FxHasher::default();
        for item in &items {
            lr0.write_u64(item.lr0_hash);
            lr1.write_u64(item.lr1_hash);
        }
        Self {
            items,
            lr0_hash: lr0.finish(),
            lr1_hash: lr1.finish(),
        }
    }

    pub fn items(&self) -> &[ClosureItem] {
        &self.items[..]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn lr0_hash(&self) -> u64 {
        self.lr0_hash
    }

    pub fn lr1_hash(&self) -> u64 {
        self.lr1_hash
    }

    pub fn lr0_eq(&self, other: &Self) -> bool {
        self.lr0_hash == other.lr0_hash
            && self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(l, r)| l.lr0_eq(r))
    }

    pub fn lr1_eq(&self, other: &Self) -> bool {
        self.lr1_hash == other.lr1_hash
            && self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(l, r)| l.lr1_eq(r))
    }

    /// Whether both sets share the LR(0) core and every lookahead set of
    /// `self` is contained in the corresponding one of `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.lr0_eq(other)
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(l, r)| l.lookaheads.is_subset(&r.lookaheads))
    }

    /// Union the lookaheads of two sets with the same LR(0) core.
    pub fn merge(&self, other: &Self) -> Result<Self, ClosureError> {
        if !self.lr0_eq(other) {
            return Err(ClosureError::CoreMismatch);
        }
        let items = self
            .items
            .iter()
            .zip(&other.items)
            .map(|(l, r)| l.merge(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_items(items))
    }

    /// The distinct symbols following a dot, in item order.
    pub fn next_symbols(&self, db: &GrammarDB) -> Vec<TokenID> {
        let mut symbols = vec![];
        for item in &self.items {
            if let Some(symbol) = item.next_symbol(db) {
                if !symbols.contains(&symbol) {
                    symbols.push(symbol);
                }
            }
        }
        symbols
    }

    /// The kernel reached by moving the dot over `symbol` (not yet closed).
    pub fn advance(&self, db: &GrammarDB, symbol: TokenID) -> Vec<ClosureItem> {
        self.items
            .iter()
            .filter(|item| item.next_symbol(db) == Some(symbol))
            .map(ClosureItem::advance)
            .collect()
    }

    pub fn display<'g>(&'g self, db: &'g GrammarDB) -> impl fmt::Display + 'g {
        display_fn(move |f| {
            for item in &self.items {
                writeln!(f, "- {}", item.display(db))?;
            }
            Ok(())
        })
    }
}

impl PartialEq for ClosureSet {
    fn eq(&self, other: &Self) -> bool {
        self.lr1_eq(other)
    }
}

impl Eq for ClosureSet {}

impl Hash for ClosureSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.lr1_hash);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClosureError {
    #[error("rule id {} is out of range", rule)]
    RuleOutOfRange { rule: RuleID },

    #[error("dot index {} is past the end of rule {} (length {})", dot, rule, len)]
    DotOutOfRange { rule: RuleID, dot: usize, len: usize },

    #[error("item ({}, {}) has no lookahead symbols", rule, dot)]
    EmptyLookaheads { rule: RuleID, dot: usize },

    #[error("cannot merge items with different LR(0) cores")]
    CoreMismatch,
}
