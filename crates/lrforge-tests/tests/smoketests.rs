use lrforge::{
    dfa::DFA,
    grammar::TokenSet,
    language::{LanguageDef, LanguageError, Pattern, DEFAULT_STATE},
    lexer::{LexError, LexOutcome},
    parser::{AstBuilder, ParseError, RuleActions},
    table::{Action, Config},
    GrammarDB, Language, LexRule, Lexeme, Lexer, ParseTable, ParseTree, Parser, TableKind, Token,
};
use lrforge_tests::grammars;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn smoketest_grammar(f: impl FnOnce(&mut LanguageDef<()>) -> Result<(), LanguageError>) -> ParseTable {
    init_tracing();
    let lang = Language::define(f).unwrap();
    eprintln!("language:\n{}", lang);
    let db = GrammarDB::new(&lang).unwrap();
    eprintln!("grammar:\n{}", db.display());
    let dfa = DFA::generate(&db);
    eprintln!("DFA nodes:\n---\n{}", dfa.display(&db));
    let table = ParseTable::generate(&db).unwrap();
    eprintln!("table:\n---\n{}", table.display());
    table
}

#[test]
fn smoketest_g_simple1() {
    assert_eq!(smoketest_grammar(grammars::g_simple1).kind(), TableKind::LALR1);
}

#[test]
fn smoketest_g_simple2() {
    assert_eq!(smoketest_grammar(grammars::g_simple2).kind(), TableKind::LALR1);
}

#[test]
fn smoketest_g1() {
    assert_eq!(smoketest_grammar(grammars::g1).kind(), TableKind::LALR1);
}

#[test]
fn smoketest_g2() {
    smoketest_grammar(grammars::g2);
}

#[test]
fn smoketest_g4() {
    assert_eq!(smoketest_grammar(grammars::g4).kind(), TableKind::LALR1);
}

#[test]
fn smoketest_statements() {
    assert_eq!(smoketest_grammar(grammars::statements).kind(), TableKind::LALR1);
}

#[test]
fn lr1_fallback() {
    let table = smoketest_grammar(grammars::lr1_only);
    assert_eq!(table.kind(), TableKind::LR1);
    assert_eq!(table.conflicts().count(), 0);
}

#[test]
fn conflict_table() {
    let table = smoketest_grammar(grammars::ambiguous);
    assert_eq!(table.kind(), TableKind::Conflicted);
    assert!(table.conflicts().count() > 0);
    for (_, token, action) in table.conflicts() {
        assert_eq!(table.token(token), Some(&Token::from("PLUS")));
        assert!(matches!(action, Action::Conflict { .. }));
    }
}

#[test]
fn canonical_tables_agree_on_kind() {
    let lang = Language::<()>::define(grammars::g_simple2).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = Config::new().use_canonical().generate(&db).unwrap();
    assert_eq!(table.kind(), TableKind::LR1);
}

#[test]
fn nullable_and_first_sets() {
    let lang = Language::<()>::define(grammars::statements).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let id = |name: &'static str| db.token_id(&Token::from(name)).unwrap();

    assert!(db.is_nullable(id("ARGS")));
    assert!(db.is_nullable(id("END")));
    assert!(!db.is_nullable(id("STMT")));

    let first = db.first_of(&["ARGS".into(), "END".into(), "SEPARATE".into()]).unwrap();
    let expected: TokenSet = [id("WORD"), id("SEMICOLON"), id("SEPARATE")]
        .into_iter()
        .collect();
    assert_eq!(first, expected);
}

#[test]
fn dfa_is_deterministic() {
    let build = || GrammarDB::new(&Language::<()>::define(grammars::g_simple2).unwrap()).unwrap();
    let (db1, db2) = (build(), build());
    let (a, b) = (DFA::generate(&db1), DFA::generate(&db2));
    assert_eq!(a.len(), b.len());
    for ((_, x), (_, y)) in a.nodes().zip(b.nodes()) {
        assert!(x.closure().lr1_eq(y.closure()));
        assert_eq!(x.edges().collect::<Vec<_>>(), y.edges().collect::<Vec<_>>());
    }
}

#[test]
fn arithmetic_round_trip() {
    init_tracing();
    let lang = Language::define(grammars::arithmetic_eval).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = ParseTable::generate(&db).unwrap();
    let parser = Parser::with_callbacks(&lang, &table, RuleActions::with_terminal(|_, _| Ok(0)))
        .unwrap();

    assert_eq!(parser.parse("1+1").unwrap(), 2);
    assert_eq!(
        parser
            .parse("( 1+1 )*3 + ( (1+1) * (1+2*3+4) )\n")
            .unwrap(),
        28
    );
}

#[test]
fn parse_tree_of_statements() {
    let lang = Language::<ParseTree>::define(grammars::statements).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = ParseTable::generate(&db).unwrap();
    let parser = Parser::new(&lang, &table).unwrap();

    // `print a b; exit`
    let tokens = vec![
        Lexeme::new("WORD", "print", 0),
        Lexeme::new("WORD", "a", 6),
        Lexeme::new("WORD", "b", 8),
        Lexeme::new("SEMICOLON", ";", 9),
        Lexeme::new("SEPARATE", "\n", 10),
        Lexeme::new("WORD", "exit", 11),
        Lexeme::eoi(15),
    ];
    let tree = parser.parse_tokens(tokens).unwrap();
    eprintln!("{}", tree.display());

    assert_eq!(tree.kind, Token::from("STMTS"));
    let exit = &tree.children[2];
    assert_eq!(exit.kind, Token::from("STMT"));
    // WORD, empty ARGS, empty END
    assert_eq!(exit.children.len(), 3);
    assert!(exit.children[1].children.is_empty());
    assert!(exit.children[2].children.is_empty());
    assert_eq!(exit.children[2].text, None);
}

#[test]
fn ast_builder_collapses_chains() {
    let lang = Language::<ParseTree>::define(grammars::arithmetic).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = ParseTable::generate(&db).unwrap();
    let mut parser = Parser::new(&lang, &table).unwrap();
    parser.set_callbacks(AstBuilder);

    assert_eq!(parser.parse("7").unwrap(), ParseTree::leaf("DIGITS", "7"));
    let tree = parser.parse("(7)*2").unwrap();
    assert_eq!(tree.kind, Token::from("TERM"));
    assert_eq!(tree.children[0].kind, Token::from("ATOM"));
    assert_eq!(tree.children[2], ParseTree::leaf("DIGITS", "2"));
}

#[test]
fn table_is_shared_across_parsers() {
    let lang = Language::define(grammars::arithmetic_eval).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = ParseTable::generate(&db).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = ["1+2", "3*4", "(5+6)*7"]
            .into_iter()
            .map(|input| {
                let (lang, table) = (&lang, &table);
                s.spawn(move || {
                    let parser =
                        Parser::with_callbacks(lang, table, RuleActions::with_terminal(|_, _| Ok(0)))
                            .unwrap();
                    parser.parse(input).unwrap()
                })
            })
            .collect();
        let results: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, [3, 12, 77]);
    });
}

#[test]
fn runtime_errors_are_reported() {
    let lang = Language::define(grammars::arithmetic_eval).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = ParseTable::generate(&db).unwrap();
    let parser =
        Parser::with_callbacks(&lang, &table, RuleActions::with_terminal(|_, _| Ok(0))).unwrap();

    assert!(matches!(
        parser.parse("(1+2"),
        Err(ParseError::UnexpectedToken { token: Token::Eoi, .. })
    ));
    assert!(matches!(
        parser.parse("1 - 2"),
        Err(ParseError::Lex(LexError::NoMatch { offset: 2, .. }))
    ));
    // An earlier failure leaves later calls unaffected.
    assert_eq!(parser.parse("2*3").unwrap(), 6);
}

#[test]
fn conflicts_stop_parsing() {
    let lang = Language::<ParseTree>::define(grammars::ambiguous).unwrap();
    let db = GrammarDB::new(&lang).unwrap();
    let table = ParseTable::generate(&db).unwrap();
    let parser = Parser::new(&lang, &table).unwrap();
    assert!(matches!(
        parser.parse("1 + 2 + 3"),
        Err(ParseError::Conflict { .. })
    ));
}

// === lexer ===

fn token_names<V>(lexemes: &[Lexeme<V>]) -> Vec<String> {
    lexemes.iter().map(|l| l.token.to_string()).collect()
}

#[test]
fn lexer_longest_match() {
    let lexer = Lexer::<()>::from_rules(&[
        LexRule::literal("PM", "+-"),
        LexRule::literal("PMS", "+-*"),
        LexRule::literal("STAR", "*"),
    ])
    .unwrap();
    let lexemes = lexer.tokenize("+-+-*").unwrap();
    assert_eq!(token_names(&lexemes), ["PM", "PMS", "$eoi"]);
    assert_eq!(
        lexemes.iter().map(|l| l.text.as_str()).collect::<Vec<_>>(),
        ["+-", "+-*", ""]
    );
}

#[test]
fn lexer_priority() {
    let lexer = Lexer::<()>::from_rules(&[
        LexRule::regex("IDENT", "[a-z]+"),
        LexRule::regex("LETTER", "[a-z]").priority(10),
    ])
    .unwrap();
    let lexemes = lexer.tokenize("ab").unwrap();
    assert_eq!(token_names(&lexemes), ["LETTER", "LETTER", "$eoi"]);
}

#[test]
fn lexer_states() {
    let lexer = Lexer::<()>::from_rules(&[
        LexRule::regex("WORD", "[a-z]+"),
        LexRule::discard(Pattern::Regex(" +".into())),
        LexRule::literal("OPEN", "/*").callback(|_, _, ctl| {
            ctl.call_state("comment");
            Ok(LexOutcome::Skip)
        }),
        LexRule::literal("CLOSE", "*/")
            .states(["comment"])
            .exclusive()
            .callback(|_, _, ctl| {
                ctl.return_state();
                Ok(LexOutcome::Skip)
            }),
        LexRule::regex("TEXT", r"[^*]+|\*")
            .states(["comment"])
            .exclusive()
            .callback(|_, _, _| Ok(LexOutcome::Skip)),
        LexRule::literal("BANG", "!").states(["loud"]),
        LexRule::literal("SHOUT", "^").callback(|_, _, ctl| {
            ctl.jump_state("loud");
            Ok(LexOutcome::Emit)
        }),
        LexRule::literal("HUSH", "~").states(["loud"]).callback(|_, _, ctl| {
            ctl.return_state();
            assert_eq!(ctl.state(), DEFAULT_STATE);
            Ok(LexOutcome::Emit)
        }),
    ])
    .unwrap();

    // Comments are exclusive: `ab cd` inside is not tokenized as words.
    let lexemes = lexer.tokenize("x /* ab * cd */ y").unwrap();
    assert_eq!(token_names(&lexemes), ["WORD", "WORD", "$eoi"]);

    // `loud` is inclusive: words are still recognized there.
    let lexemes = lexer.tokenize("^ab!~cd").unwrap();
    assert_eq!(token_names(&lexemes), ["SHOUT", "WORD", "BANG", "HUSH", "WORD", "$eoi"]);

    // `!` is not visible in the default state.
    assert!(matches!(
        lexer.tokenize("ab!"),
        Err(LexError::NoMatch { offset: 2, .. })
    ));
}

#[test]
fn lexer_for_language() {
    let lang = Language::<()>::define(grammars::arithmetic).unwrap();
    let lexer = Lexer::new(&lang).unwrap();
    let lexemes = lexer.tokenize(" 12 * (3) ").unwrap();
    assert_eq!(
        token_names(&lexemes),
        ["DIGITS", "ASTERISK", "LPAREN", "DIGITS", "RPAREN", "$eoi"]
    );
    assert_eq!(lexemes.last().map(|l| l.offset), Some(10));
}
