//! LR(1) and LALR(1) automaton generation.

use crate::{
    closure::{ClosureError, ClosureItem, ClosureSet},
    grammar::{GrammarDB, RuleID, TokenID},
    types::Map,
    util::display_fn,
};
use std::{collections::VecDeque, fmt};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeID {
    raw: u32,
}

impl NodeID {
    pub const START: Self = Self::from_raw(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    fn from_index(index: usize) -> Self {
        Self::from_raw(index as u32)
    }

    pub const fn index(self) -> usize {
        self.raw as usize
    }
}

impl fmt::Display for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct DFANode {
    closure: ClosureSet,
    edges: Map<TokenID, NodeID>,
}

impl DFANode {
    pub fn closure(&self) -> &ClosureSet {
        &self.closure
    }

    pub fn edges(&self) -> impl Iterator<Item = (TokenID, NodeID)> + '_ {
        self.edges.iter().map(|(symbol, target)| (*symbol, *target))
    }

    pub fn edge(&self, symbol: TokenID) -> Option<NodeID> {
        self.edges.get(&symbol).copied()
    }
}

#[derive(Debug, Clone)]
pub struct DFA {
    nodes: Vec<DFANode>,
}

impl DFA {
    /// Build the canonical LR(1) automaton.
    pub fn generate(db: &GrammarDB) -> Self {
        DFAGenerator::new(db).generate()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeID, &DFANode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeID::from_index(i), node))
    }

    pub fn node(&self, id: NodeID) -> Option<&DFANode> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Derive the LALR(1) automaton by merging the states sharing an LR(0)
    /// core, with the union of their lookaheads.
    ///
    /// State numbering follows the first occurrence of each core, so the
    /// start node stays at `NodeID::START`.
    pub fn to_lalr1(&self) -> Result<Self, DFAError> {
        let mut groups: Vec<ClosureSet> = vec![];
        let mut by_core: Map<u64, Vec<usize>> = Map::default();
        let mut group_of = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let found = by_core.get(&node.closure.lr0_hash()).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|&g| groups[g].lr0_eq(&node.closure))
            });
            match found {
                Some(g) => {
                    groups[g] = groups[g].merge(&node.closure)?;
                    group_of.push(g);
                }
                None => {
                    let g = groups.len();
                    groups.push(node.closure.clone());
                    by_core.entry(node.closure.lr0_hash()).or_default().push(g);
                    group_of.push(g);
                }
            }
        }

        let mut edges: Vec<Map<TokenID, NodeID>> = vec![Map::default(); groups.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            let slot = &mut edges[group_of[i]];
            for (symbol, target) in node.edges() {
                slot.insert(symbol, NodeID::from_index(group_of[target.index()]));
            }
        }

        tracing::debug!(
            lr1_states = self.nodes.len(),
            lalr1_states = groups.len(),
            "merged LR(0) cores"
        );

        Ok(Self {
            nodes: groups
                .into_iter()
                .zip(edges)
                .map(|(closure, edges)| DFANode { closure, edges })
                .collect(),
        })
    }

    pub fn display<'g>(&'g self, db: &'g GrammarDB) -> impl fmt::Display + 'g {
        display_fn(move |f| {
            for (i, (id, node)) in self.nodes().enumerate() {
                if i > 0 {
                    writeln!(f)?;
                }
                writeln!(f, "#### State {}", id)?;
                writeln!(f, "## items")?;
                write!(f, "{}", node.closure.display(db))?;
                writeln!(f, "## edges")?;
                for (symbol, target) in node.edges() {
                    writeln!(f, "- {} => {}", db.token(symbol), target)?;
                }
            }
            Ok(())
        })
    }
}

// === DFAGenerator ===

/// Worklist construction of the canonical LR(1) automaton.
#[derive(Debug)]
pub struct DFAGenerator<'g> {
    db: &'g GrammarDB,
    nodes: Vec<DFANode>,
    // lr1 hash -> nodes with that hash
    index: Map<u64, Vec<NodeID>>,
    pending: VecDeque<NodeID>,
}

impl<'g> DFAGenerator<'g> {
    pub fn new(db: &'g GrammarDB) -> Self {
        let mut gen = Self {
            db,
            nodes: vec![],
            index: Map::default(),
            pending: VecDeque::new(),
        };

        // [$start := . S] {$eoi}
        let initial = ClosureItem::new_unchecked(
            RuleID::ACCEPT,
            0,
            Some(TokenID::EOI).into_iter().collect(),
        );
        let start = gen.find_or_insert(ClosureSet::closure(db, Some(initial)));
        debug_assert_eq!(start, NodeID::START);

        gen
    }

    pub fn generate(mut self) -> DFA {
        self.populate_nodes();
        tracing::debug!(states = self.nodes.len(), "generated LR(1) automaton");
        DFA { nodes: self.nodes }
    }

    fn populate_nodes(&mut self) {
        // Repeat until no new node is generated.
        while let Some(id) = self.pending.pop_front() {
            let symbols = self.nodes[id.index()].closure.next_symbols(self.db);
            for symbol in symbols {
                let kernel = self.nodes[id.index()].closure.advance(self.db, symbol);
                let closure = ClosureSet::closure(self.db, kernel);
                let target = self.find_or_insert(closure);
                self.nodes[id.index()].edges.insert(symbol, target);
            }
        }
    }

    /// Reuse an LR1-equal node if one exists, otherwise append a new one.
    fn find_or_insert(&mut self, closure: ClosureSet) -> NodeID {
        if let Some(candidates) = self.index.get(&closure.lr1_hash()) {
            for &id in candidates {
                if self.nodes[id.index()].closure.lr1_eq(&closure) {
                    return id;
                }
            }
        }

        let id = NodeID::from_index(self.nodes.len());
        self.index.entry(closure.lr1_hash()).or_default().push(id);
        self.nodes.push(DFANode {
            closure,
            edges: Map::default(),
        });
        self.pending.push_back(id);
        id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DFAError {
    #[error("failed to merge states")]
    Merge(
        #[from]
        #[source]
        ClosureError,
    ),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{Language, LanguageDef, LanguageError};

    fn db(f: impl FnOnce(&mut LanguageDef<()>) -> Result<(), LanguageError>) -> GrammarDB {
        GrammarDB::new(&Language::define(f).unwrap()).unwrap()
    }

    #[test]
    fn smoketest() {
        let db = db(|def| {
            def.rule("A", ["E", "EQUAL", "E"])?;
            def.rule("A", ["ID"])?;
            def.rule("E", ["E", "PLUS", "T"])?;
            def.rule("E", ["T"])?;
            def.rule("T", ["NUM"])?;
            def.rule("T", ["ID"])?;
            Ok(())
        });
        let dfa = DFA::generate(&db);
        eprintln!("DFA Nodes:\n---\n{}", dfa.display(&db));

        let start = dfa.node(NodeID::START).unwrap();
        assert_eq!(start.closure().items()[0].rule(), RuleID::ACCEPT);
        for (_, node) in dfa.nodes() {
            for (_, target) in node.edges() {
                assert!(target.index() < dfa.len());
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let build = || {
            db(|def| {
                def.rule("S", ["C", "C"])?;
                def.rule("C", ["c", "C"])?;
                def.rule("C", ["d"])?;
                Ok(())
            })
        };
        let (db1, db2) = (build(), build());
        let (a, b) = (DFA::generate(&db1), DFA::generate(&db2));
        assert_eq!(a.len(), b.len());
        for ((_, x), (_, y)) in a.nodes().zip(b.nodes()) {
            assert!(x.closure().lr1_eq(y.closure()));
        }
    }

    #[test]
    fn lalr_merges_same_cores() {
        // The textbook grammar with 10 canonical LR(1) states and 7 LALR(1) states.
        let db = db(|def| {
            def.rule("S", ["C", "C"])?;
            def.rule("C", ["c", "C"])?;
            def.rule("C", ["d"])?;
            Ok(())
        });
        let lr1 = DFA::generate(&db);
        let lalr1 = lr1.to_lalr1().unwrap();
        assert_eq!(lr1.len(), 10);
        assert_eq!(lalr1.len(), 7);

        for (i, (_, x)) in lalr1.nodes().enumerate() {
            for (_, y) in lalr1.nodes().skip(i + 1) {
                assert!(!x.closure().lr0_eq(y.closure()));
            }
        }
        // every canonical state is covered by its merged counterpart.
        for (_, node) in lr1.nodes() {
            assert!(lalr1
                .nodes()
                .any(|(_, merged)| node.closure().is_subset_of(merged.closure())));
        }
    }
}
