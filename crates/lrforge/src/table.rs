//! Parse table generation.

use crate::{
    dfa::{DFAError, NodeID, DFA},
    grammar::{GrammarDB, RuleID, TokenID},
    language::Token,
    types::{Map, Set},
    util::{display_fn, write_joined},
};
use indexmap::map::Entry;
use std::{fmt, mem};

/// The action that the automaton in a state performs on a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Read the lookahead terminal and transition to the specified state.
    Shift(NodeID),

    /// Reduce with the specified production rule.
    Reduce(RuleID),

    /// Transition after reducing to the nonterminal.
    Goto(NodeID),

    Accept,

    /// There are multiple competing actions for the symbol.
    Conflict {
        shifts: Vec<NodeID>,
        reduces: Vec<RuleID>,
    },
}

impl Action {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn into_parts(self) -> (Vec<NodeID>, Vec<RuleID>) {
        match self {
            Self::Shift(n) | Self::Goto(n) => (vec![n], vec![]),
            Self::Reduce(r) => (vec![], vec![r]),
            Self::Accept => (vec![], vec![RuleID::ACCEPT]),
            Self::Conflict { shifts, reduces } => (shifts, reduces),
        }
    }

    /// Combine two actions competing for the same slot, accumulating every
    /// distinct shift target and reduce rule.
    fn conflict_with(self, other: Self) -> Self {
        let (mut shifts, mut reduces) = self.into_parts();
        let (other_shifts, other_reduces) = other.into_parts();
        for n in other_shifts {
            if !shifts.contains(&n) {
                shifts.push(n);
            }
        }
        for r in other_reduces {
            if !reduces.contains(&r) {
                reduces.push(r);
            }
        }
        Self::Conflict { shifts, reduces }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shift(n) => write!(f, "shift({})", n),
            Self::Reduce(r) => write!(f, "reduce({})", r),
            Self::Goto(n) => write!(f, "goto({})", n),
            Self::Accept => f.write_str("accept"),
            Self::Conflict { shifts, reduces } => {
                f.write_str("conflict(shift=[")?;
                write_joined(f, " ", shifts)?;
                f.write_str("], reduce=[")?;
                write_joined(f, " ", reduces)?;
                f.write_str("])")
            }
        }
    }
}

/// The construction method that produced a table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TableKind {
    /// Conflict-free over the LALR(1) automaton.
    LALR1,
    /// Conflict-free over the canonical LR(1) automaton.
    LR1,
    /// The canonical LR(1) table, with conflicts left in place.
    Conflicted,
}

/// The shape of a rule needed to reduce it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub lhs: TokenID,
    pub len: usize,
}

/// A parse table: one row of actions per automaton state.
///
/// The table is self-contained: it carries the token registry and the
/// rule shapes, so it can be shared by any number of parsers.
#[derive(Debug, Clone)]
pub struct ParseTable {
    kind: TableKind,
    rows: Vec<Map<TokenID, Action>>,
    symbols: Set<Token>,
    reductions: Vec<Reduction>,
    num_conflicts: usize,
}

impl ParseTable {
    /// Build the table of `db` with the default configuration.
    pub fn generate(db: &GrammarDB) -> Result<Self, DFAError> {
        ParserGenerator::new(db).generate()
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn is_conflicted(&self) -> bool {
        self.num_conflicts > 0
    }

    /// The number of `(state, symbol)` slots holding a conflict.
    pub fn num_conflicts(&self) -> usize {
        self.num_conflicts
    }

    pub fn num_states(&self) -> usize {
        self.rows.len()
    }

    pub fn action(&self, state: NodeID, symbol: TokenID) -> Option<&Action> {
        self.rows.get(state.index())?.get(&symbol)
    }

    pub fn row(&self, state: NodeID) -> impl Iterator<Item = (TokenID, &Action)> + '_ {
        self.rows
            .get(state.index())
            .into_iter()
            .flat_map(|row| row.iter().map(|(symbol, action)| (*symbol, action)))
    }

    pub fn conflicts(&self) -> impl Iterator<Item = (NodeID, TokenID, &Action)> + '_ {
        self.rows.iter().enumerate().flat_map(|(i, row)| {
            row.iter()
                .filter(|(_, action)| action.is_conflict())
                .map(move |(symbol, action)| (NodeID::from_raw(i as u32), *symbol, action))
        })
    }

    pub fn token_id(&self, token: &Token) -> Option<TokenID> {
        self.symbols
            .get_index_of(token)
            .map(|i| TokenID::from_raw(i as u16))
    }

    pub fn token(&self, id: TokenID) -> Option<&Token> {
        self.symbols.get_index(id.index())
    }

    /// The shape of a user rule; `None` for `RuleID::ACCEPT`.
    pub fn reduction(&self, rule: RuleID) -> Option<Reduction> {
        rule.index().and_then(|i| self.reductions.get(i).copied())
    }

    pub fn display(&self) -> impl fmt::Display + '_ {
        display_fn(move |f| {
            writeln!(f, "## kind: {:?}", self.kind)?;
            for (i, row) in self.rows.iter().enumerate() {
                writeln!(f, "#### State {:02}", i)?;
                for (symbol, action) in row {
                    match self.token(*symbol) {
                        Some(token) => writeln!(f, "- {} => {}", token, action)?,
                        None => writeln!(f, "- {} => {}", symbol, action)?,
                    }
                }
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    lalr_first: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self { lalr_first: true }
    }

    /// Try the LALR(1) automaton first and fall back to canonical LR(1).
    ///
    /// This is the default.
    pub fn use_lalr_first(&mut self) -> &mut Self {
        self.lalr_first = true;
        self
    }

    /// Always build the table over the canonical LR(1) automaton.
    pub fn use_canonical(&mut self) -> &mut Self {
        self.lalr_first = false;
        self
    }

    pub fn generate(&self, db: &GrammarDB) -> Result<ParseTable, DFAError> {
        ParserGenerator::with_config(db, self.clone()).generate()
    }
}

/// Converts automata into a parse table.
#[derive(Debug)]
pub struct ParserGenerator<'g> {
    db: &'g GrammarDB,
    config: Config,
}

impl<'g> ParserGenerator<'g> {
    pub fn new(db: &'g GrammarDB) -> Self {
        Self::with_config(db, Config::new())
    }

    pub fn with_config(db: &'g GrammarDB, config: Config) -> Self {
        Self { db, config }
    }

    /// Build over LALR(1); if that has conflicts, build over LR(1); if that
    /// has conflicts too, keep the LR(1) table marked `Conflicted`.
    pub fn generate(&self) -> Result<ParseTable, DFAError> {
        let lr1 = DFA::generate(self.db);

        if self.config.lalr_first {
            let lalr1 = lr1.to_lalr1()?;
            let table = self.build(&lalr1, TableKind::LALR1);
            if !table.is_conflicted() {
                tracing::debug!(states = table.num_states(), "using LALR(1) table");
                return Ok(table);
            }
            tracing::debug!(
                conflicts = table.num_conflicts(),
                "LALR(1) table has conflicts, falling back to LR(1)"
            );
        }

        let table = self.build(&lr1, TableKind::LR1);
        if table.is_conflicted() {
            tracing::debug!(
                conflicts = table.num_conflicts(),
                "LR(1) table has conflicts"
            );
        } else {
            tracing::debug!(states = table.num_states(), "using LR(1) table");
        }
        Ok(table)
    }

    fn build(&self, dfa: &DFA, kind: TableKind) -> ParseTable {
        let db = self.db;
        let mut rows = Vec::with_capacity(dfa.len());

        for (_, node) in dfa.nodes() {
            let mut row: Map<TokenID, Action> = Map::default();

            // shift, goto
            for (symbol, target) in node.edges() {
                let action = if db.is_terminal(symbol) {
                    Action::Shift(target)
                } else {
                    Action::Goto(target)
                };
                insert_action(&mut row, symbol, action);
            }

            // reduce, accept
            for item in node.closure().items() {
                if !item.is_complete(db) {
                    continue;
                }
                if item.rule() == RuleID::ACCEPT {
                    insert_action(&mut row, TokenID::EOI, Action::Accept);
                    continue;
                }
                for lookahead in item.lookaheads().iter() {
                    insert_action(&mut row, lookahead, Action::Reduce(item.rule()));
                }
            }

            rows.push(row);
        }

        let num_conflicts = rows
            .iter()
            .flat_map(|row| row.values())
            .filter(|action| action.is_conflict())
            .count();

        let reductions = db
            .rules()
            .filter(|(id, _)| *id != RuleID::ACCEPT)
            .map(|(_, rule)| Reduction {
                lhs: rule.lhs(),
                len: rule.rhs().len(),
            })
            .collect();

        ParseTable {
            kind: if num_conflicts > 0 {
                TableKind::Conflicted
            } else {
                kind
            },
            rows,
            symbols: db.tokens().map(|(_, token)| token.clone()).collect(),
            reductions,
            num_conflicts,
        }
    }
}

fn insert_action(row: &mut Map<TokenID, Action>, symbol: TokenID, action: Action) {
    match row.entry(symbol) {
        Entry::Vacant(entry) => {
            entry.insert(action);
        }
        Entry::Occupied(mut entry) => {
            let existing = mem::replace(entry.get_mut(), Action::Accept);
            *entry.get_mut() = existing.conflict_with(action);
        }
    }
}
