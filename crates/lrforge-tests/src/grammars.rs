//! Language definitions for integration tests.

use lrforge::{
    language::{LanguageDef, LanguageError, LexRule, Pattern},
    lexer::LexOutcome,
};

pub type DefResult = Result<(), LanguageError>;

pub fn g_simple1<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("A", ["E", "EQUAL", "E"])?;
    g.rule("A", ["ID"])?;
    g.rule("E", ["E", "PLUS", "T"])?;
    g.rule("E", ["T"])?;
    g.rule("T", ["NUM"])?;
    g.rule("T", ["ID"])?;
    Ok(())
}

pub fn g_simple2<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("EXPR", ["EXPR", "PLUS", "FACTOR"])?; // expr '+' factor
    g.rule("EXPR", ["EXPR", "MINUS", "FACTOR"])?; // expr '-' factor
    g.rule("EXPR", ["FACTOR"])?;
    g.rule("FACTOR", ["FACTOR", "STAR", "TERM"])?; // factor '*' term
    g.rule("FACTOR", ["FACTOR", "SLASH", "TERM"])?; // factor '/' term
    g.rule("FACTOR", ["TERM"])?;
    g.rule("TERM", ["NUM"])?;
    g.rule("TERM", ["LPAREN", "EXPR", "RPAREN"])?;
    Ok(())
}

pub fn g1<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("E", ["E", "PLUS", "T"])?;
    g.rule("E", ["T"])?;
    g.rule("T", ["T", "STAR", "A"])?;
    g.rule("T", ["A"])?;
    Ok(())
}

pub fn g2<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("DEF", ["PARAM_SPEC", "RETURN_SPEC", "COMMA"])?;
    g.rule("PARAM_SPEC", ["TYPE"])?;
    g.rule("PARAM_SPEC", ["NAME_LIST", "COLON", "TYPE"])?;
    g.rule("RETURN_SPEC", ["TYPE"])?;
    g.rule("RETURN_SPEC", ["NAME", "COLON", "TYPE"])?;
    g.rule("TYPE", ["ID"])?;
    g.rule("NAME", ["ID"])?;
    g.rule("NAME_LIST", ["NAME"])?;
    g.rule("NAME_LIST", ["NAME", "COMMA", "NAME_LIST"])?;
    Ok(())
}

// E → E + T | T
// T → ( E ) | n
pub fn g4<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("E", ["E", "PLUS", "T"])?;
    g.rule("E", ["T"])?;
    g.rule("T", ["LPAREN", "E", "RPAREN"])?;
    g.rule("T", ["NUM"])?;
    Ok(())
}

/// Statements separated by `SEPARATE`, with optional trailing semicolons
/// and possibly empty argument lists.
pub fn statements<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("STMTS", ["STMTS", "SEPARATE", "STMT"])?;
    g.rule("STMTS", ["STMT"])?;
    g.rule("STMT", ["WORD", "ARGS", "END"])?;
    g.rule("ARGS", ["ARGS", "WORD"])?;
    g.empty_rule("ARGS")?;
    g.rule("END", ["SEMICOLON"])?;
    g.empty_rule("END")?;
    Ok(())
}

/// LR(1), but merging LR(0) cores introduces a reduce/reduce conflict.
pub fn lr1_only<V>(g: &mut LanguageDef<V>) -> DefResult {
    g.rule("S", ["a", "E", "c"])?;
    g.rule("S", ["a", "F", "d"])?;
    g.rule("S", ["b", "F", "c"])?;
    g.rule("S", ["b", "E", "d"])?;
    g.rule("E", ["e"])?;
    g.rule("F", ["e"])?;
    Ok(())
}

/// `EXP := EXP PLUS EXP` without any precedence.
pub fn ambiguous<V>(g: &mut LanguageDef<V>) -> DefResult {
    arithmetic_lex(g);
    g.rule("EXP", ["EXP", "PLUS", "EXP"])?;
    g.rule("EXP", ["DIGITS"])?;
    Ok(())
}

pub fn arithmetic_lex<V>(g: &mut LanguageDef<V>) {
    g.lex(LexRule::regex("DIGITS", "[0-9]+"))
        .lex(LexRule::literal("PLUS", "+"))
        .lex(LexRule::literal("ASTERISK", "*"))
        .lex(LexRule::literal("LPAREN", "("))
        .lex(LexRule::literal("RPAREN", ")"))
        .lex(LexRule::discard(Pattern::Regex(r"\s+".into())));
}

pub fn arithmetic<V>(g: &mut LanguageDef<V>) -> DefResult {
    arithmetic_lex(g);
    g.rule("EXP", ["EXP", "PLUS", "TERM"])?;
    g.rule("EXP", ["TERM"])?;
    g.rule("TERM", ["TERM", "ASTERISK", "ATOM"])?;
    g.rule("TERM", ["ATOM"])?;
    g.rule("ATOM", ["DIGITS"])?;
    g.rule("ATOM", ["LPAREN", "EXP", "RPAREN"])?;
    Ok(())
}

/// `arithmetic` with integer folding.
pub fn arithmetic_eval(g: &mut LanguageDef<i64>) -> DefResult {
    g.lex(
        LexRule::regex("DIGITS", "[0-9]+").callback(|text, token, _| {
            let token = token.cloned().unwrap_or_else(|| "DIGITS".into());
            Ok(LexOutcome::Value(token, text.parse()?))
        }),
    )
    .lex(LexRule::literal("PLUS", "+"))
    .lex(LexRule::literal("ASTERISK", "*"))
    .lex(LexRule::literal("LPAREN", "("))
    .lex(LexRule::literal("RPAREN", ")"))
    .lex(LexRule::discard(Pattern::Regex(r"\s+".into())));

    g.rule_with("EXP", ["EXP", "PLUS", "TERM"], |args| Ok(args[0] + args[2]))?;
    g.rule("EXP", ["TERM"])?;
    g.rule_with("TERM", ["TERM", "ASTERISK", "ATOM"], |args| {
        Ok(args[0] * args[2])
    })?;
    g.rule("TERM", ["ATOM"])?;
    g.rule("ATOM", ["DIGITS"])?;
    g.rule_with("ATOM", ["LPAREN", "EXP", "RPAREN"], |args| Ok(args[1]))?;
    Ok(())
}
