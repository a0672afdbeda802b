//! Calculation of nullable symbols and first sets.

use crate::{
    grammar::{Rule, SymbolKind, TokenID, TokenSet},
    language::Token,
};

/// The nonterminals deriving the empty sequence.
#[derive(Debug, Clone, Default)]
pub struct NullableSet {
    inner: TokenSet,
}

impl NullableSet {
    pub fn new<'r, I>(rules: I) -> Self
    where
        I: IntoIterator<Item = &'r Rule> + Clone,
    {
        // Rules with an empty right-hand side are nullable by themselves.
        let mut nulls: TokenSet = rules
            .clone()
            .into_iter()
            .filter_map(|rule| rule.rhs().is_empty().then(|| rule.lhs()))
            .collect();

        // Repeat until no more changes occur.
        let mut changed = true;
        while changed {
            changed = false;
            for rule in rules.clone() {
                if nulls.contains(rule.lhs()) {
                    continue;
                }
                // Terminals are never in `nulls`, so this only holds for
                // right-hand sides made up of nullable nonterminals.
                if rule.rhs().iter().all(|symbol| nulls.contains(*symbol)) {
                    changed = true;
                    nulls.insert(rule.lhs());
                }
            }
        }

        Self { inner: nulls }
    }

    pub fn contains(&self, id: TokenID) -> bool {
        self.inner.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = TokenID> + '_ {
        self.inner.iter()
    }
}

#[derive(Debug)]
pub struct FirstSets {
    nulls: NullableSet,
    map: Vec<TokenSet>,
}

impl FirstSets {
    /// `kinds` is indexed by token id and covers every symbol of `rules`.
    pub fn new<'r, I>(kinds: &[SymbolKind], rules: I) -> Self
    where
        I: IntoIterator<Item = &'r Rule> + Clone,
    {
        let nulls = NullableSet::new(rules.clone());

        // First(T) = {T} for terminals, First(N) = {} for nonterminals.
        let mut map: Vec<TokenSet> = kinds
            .iter()
            .enumerate()
            .map(|(raw, kind)| match kind {
                SymbolKind::Terminal => Some(TokenID::from_raw(raw as u16)).into_iter().collect(),
                SymbolKind::Nonterminal => TokenSet::new(),
            })
            .collect();

        // For each rule `X := Y1 Y2 ... Yn`, find the first non-nullable Yk
        // and require First(X) ⊇ First(Yi) for i = 1..=k.
        struct Constraint {
            sup: TokenID,
            sub: TokenID,
        }
        let mut constraints = vec![];
        for rule in rules {
            for symbol in rule.rhs() {
                if *symbol != rule.lhs() {
                    constraints.push(Constraint {
                        sup: rule.lhs(),
                        sub: *symbol,
                    });
                }
                if !nulls.contains(*symbol) {
                    break;
                }
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for Constraint { sup, sub } in &constraints {
                let subset = map[sub.index()].clone();
                changed |= map[sup.index()].union_with(&subset);
            }
        }

        Self { nulls, map }
    }

    pub fn is_nullable(&self, id: TokenID) -> bool {
        self.nulls.contains(id)
    }

    pub fn nulls(&self) -> &NullableSet {
        &self.nulls
    }

    pub fn first(&self, id: TokenID) -> &TokenSet {
        &self.map[id.index()]
    }

    /// `First(prefix lookaheads)`: the first sets along `prefix` up to and
    /// including its first non-nullable symbol, plus `lookaheads` when the
    /// whole prefix is nullable.
    pub fn of_sequence(&self, prefix: &[TokenID], lookaheads: &TokenSet) -> TokenSet {
        let mut res = TokenSet::new();
        for symbol in prefix {
            res.union_with(self.first(*symbol));
            if !self.nulls.contains(*symbol) {
                return res;
            }
        }
        res.union_with(lookaheads);
        res
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FirstSetError {
    #[error("the symbol `{}' does not occur in the grammar", symbol)]
    UnknownSymbol { symbol: Token },
}

#[cfg(test)]
mod tests {
    use crate::{
        grammar::{GrammarDB, TokenID, TokenSet},
        language::{Language, Token},
    };

    fn id(db: &GrammarDB, name: &'static str) -> TokenID {
        db.token_id(&Token::from(name)).unwrap()
    }

    fn set(db: &GrammarDB, names: &[&'static str]) -> TokenSet {
        names.iter().map(|name| id(db, name)).collect()
    }

    #[test]
    fn chained_nullability() {
        let lang = Language::<()>::define(|def| {
            def.rule("A", ["B", "x"])?;
            def.rule("A", ["B"])?;
            def.rule("B", ["C"])?;
            def.rule("B", ["C", "C"])?;
            def.rule("C", ["y"])?;
            def.empty_rule("C")?;
            def.rule("D", ["y"])?;
            def.rule("D", ["C", "z"])?;
            Ok(())
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();

        assert!(db.is_nullable(id(&db, "C")));
        assert!(db.is_nullable(id(&db, "B")));
        assert!(db.is_nullable(id(&db, "A")));
        assert!(!db.is_nullable(id(&db, "D")));
        assert!(!db.is_nullable(id(&db, "x")));
    }

    #[test]
    fn first_sets_skip_nullable_prefixes() {
        let lang = Language::<()>::define(|def| {
            def.rule("S", ["A", "B", "c"])?;
            def.rule("A", ["a"])?;
            def.empty_rule("A")?;
            def.rule("B", ["b"])?;
            def.empty_rule("B")?;
            Ok(())
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();

        assert_eq!(*db.first(id(&db, "A")), set(&db, &["a"]));
        assert_eq!(*db.first(id(&db, "S")), set(&db, &["a", "b", "c"]));
        assert_eq!(*db.first(id(&db, "c")), set(&db, &["c"]));

        let lookaheads: TokenSet = Some(TokenID::EOI).into_iter().collect();
        let mut expected = set(&db, &["a", "b"]);
        expected.insert(TokenID::EOI);
        assert_eq!(
            db.first_sets()
                .of_sequence(&[id(&db, "A"), id(&db, "B")], &lookaheads),
            expected
        );
    }

    #[test]
    fn first_sets_contain_only_terminals_and_cover_rules() {
        let lang = Language::<()>::define(|def| {
            def.rule("EXP", ["EXP", "PLUS", "TERM"])?;
            def.rule("EXP", ["TERM"])?;
            def.rule("TERM", ["TERM", "ASTERISK", "ATOM"])?;
            def.rule("TERM", ["ATOM"])?;
            def.rule("ATOM", ["DIGITS"])?;
            def.rule("ATOM", ["LPAREN", "EXP", "RPAREN"])?;
            Ok(())
        })
        .unwrap();
        let db = GrammarDB::new(&lang).unwrap();

        for nonterminal in db.nonterminals() {
            for t in db.first(nonterminal).iter() {
                assert!(db.is_terminal(t), "{} is not a terminal", db.token(t));
            }
        }
        for (_, rule) in db.rules() {
            let rhs = db.first_sets().of_sequence(rule.rhs(), &TokenSet::new());
            assert!(rhs.is_subset(db.first(rule.lhs())));
        }
        assert_eq!(*db.first(id(&db, "EXP")), set(&db, &["DIGITS", "LPAREN"]));
    }
}
