//! Lexer and recursive-descent parser for LVS source text.
//!
//! Grammar:
//!
//! ```text
//! file      = { definition }
//! definition = RULE_ID ":" def_expr
//! def_expr  = name [ "&" cons_cnf ] [ "<=" sign_list ]
//! name      = [ "/" ] comp { "/" comp }
//! comp      = STR | TAG_ID | RULE_ID
//! sign_list = RULE_ID { "|" RULE_ID }
//! cons_cnf  = cons_set { "|" cons_set }
//! cons_set  = "{" cons_term { "," cons_term } "}"
//! cons_term = TAG_ID ":" cons_disj
//! cons_disj = cons_opt { "|" cons_opt }
//! cons_opt  = STR | TAG_ID | FN_ID "(" fn_args ")"
//! ```
//!
//! `//` comments run to end of line. Quoted strings are component URIs
//! and are converted through [`Component::from_uri`], so `"ndn"` and
//! `"32=metadata"` are both valid literals.

use std::fmt;

use crate::ast::{ConsOption, FnArg, FnCall, NameComp, NamePattern, Rule, Schema, TagConstraint};
use crate::name::Component;

/// Syntax error with its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl SyntaxError {
    fn new(line: u32, col: u32, message: impl Into<String>) -> Self {
        Self { line, col, message: message.into() }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at {}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Slash,
    Colon,
    Comma,
    Amp,
    Pipe,
    SignedBy,
    LBrace,
    RBrace,
    LParen,
    RParen,
    /// Quoted string, already converted to a component.
    Str(Component),
    /// `#name`, sigil stripped.
    RuleId(String),
    /// `$name`, sigil stripped.
    FnId(String),
    /// Bare identifier.
    TagId(String),
    Eof,
}

impl Tok {
    fn describe(&self) -> &'static str {
        match self {
            Tok::Slash => "'/'",
            Tok::Colon => "':'",
            Tok::Comma => "','",
            Tok::Amp => "'&'",
            Tok::Pipe => "'|'",
            Tok::SignedBy => "'<='",
            Tok::LBrace => "'{'",
            Tok::RBrace => "'}'",
            Tok::LParen => "'('",
            Tok::RParen => "')'",
            Tok::Str(_) => "string",
            Tok::RuleId(_) => "rule identifier",
            Tok::FnId(_) => "function identifier",
            Tok::TagId(_) => "identifier",
            Tok::Eof => "end of input",
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    line: u32,
    col: u32,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0, line: 1, col: 1 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(ch) = self.peek() {
                        if ch == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn err(&self, line: u32, col: u32, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(line, col, message)
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == b'_' || ch.is_ascii_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn next_token(&mut self) -> Result<Spanned, SyntaxError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let spanned = |tok| Spanned { tok, line, col };
        let Some(ch) = self.peek() else {
            return Ok(spanned(Tok::Eof));
        };
        match ch {
            b'/' => {
                self.bump();
                Ok(spanned(Tok::Slash))
            }
            b':' => {
                self.bump();
                Ok(spanned(Tok::Colon))
            }
            b',' => {
                self.bump();
                Ok(spanned(Tok::Comma))
            }
            b'&' => {
                self.bump();
                Ok(spanned(Tok::Amp))
            }
            b'|' => {
                self.bump();
                Ok(spanned(Tok::Pipe))
            }
            b'{' => {
                self.bump();
                Ok(spanned(Tok::LBrace))
            }
            b'}' => {
                self.bump();
                Ok(spanned(Tok::RBrace))
            }
            b'(' => {
                self.bump();
                Ok(spanned(Tok::LParen))
            }
            b')' => {
                self.bump();
                Ok(spanned(Tok::RParen))
            }
            b'<' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(spanned(Tok::SignedBy))
                } else {
                    Err(self.err(line, col, "expected '<='"))
                }
            }
            b'"' => {
                self.bump();
                let start = self.pos;
                loop {
                    match self.peek() {
                        None => return Err(self.err(line, col, "unterminated string")),
                        Some(b'"') => break,
                        Some(_) => {
                            self.bump();
                        }
                    }
                }
                let content = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                self.bump();
                let comp = Component::from_uri(&content)
                    .map_err(|e| self.err(line, col, e.to_string()))?;
                Ok(spanned(Tok::Str(comp)))
            }
            b'#' => {
                self.bump();
                let id = self.ident();
                if id.is_empty() {
                    return Err(self.err(line, col, "expected an identifier after '#'"));
                }
                Ok(spanned(Tok::RuleId(id)))
            }
            b'$' => {
                self.bump();
                let id = self.ident();
                if id.is_empty() {
                    return Err(self.err(line, col, "expected an identifier after '$'"));
                }
                Ok(spanned(Tok::FnId(id)))
            }
            ch if ch == b'_' || ch.is_ascii_alphabetic() => {
                let id = self.ident();
                Ok(spanned(Tok::TagId(id)))
            }
            ch => Err(self.err(line, col, format!("unexpected character {:?}", ch as char))),
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Spanned,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, SyntaxError> {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn peek(&self) -> &Tok {
        &self.lookahead.tok
    }

    fn advance(&mut self) -> Result<Spanned, SyntaxError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn eat(&mut self, tok: &Tok) -> Result<bool, SyntaxError> {
        if self.peek() == tok {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<Spanned, SyntaxError> {
        if self.peek() == &tok {
            self.advance()
        } else {
            Err(self.unexpected(tok.describe()))
        }
    }

    fn unexpected(&self, wanted: &str) -> SyntaxError {
        SyntaxError::new(
            self.lookahead.line,
            self.lookahead.col,
            format!("expected {wanted}, found {}", self.lookahead.tok.describe()),
        )
    }

    fn schema(&mut self) -> Result<Schema, SyntaxError> {
        let mut rules = Vec::new();
        while self.peek() != &Tok::Eof {
            rules.push(self.definition()?);
        }
        Ok(Schema { rules })
    }

    fn definition(&mut self) -> Result<Rule, SyntaxError> {
        let id = match self.advance()? {
            Spanned { tok: Tok::RuleId(id), .. } => id,
            other => {
                return Err(SyntaxError::new(
                    other.line,
                    other.col,
                    format!("expected rule identifier, found {}", other.tok.describe()),
                ))
            }
        };
        self.expect(Tok::Colon)?;
        let name = self.name_pattern()?;
        let cons_sets = if self.eat(&Tok::Amp)? { self.cons_cnf()? } else { Vec::new() };
        let sign_refs = if self.eat(&Tok::SignedBy)? { self.sign_list()? } else { Vec::new() };
        Ok(Rule { id, name, cons_sets, sign_refs })
    }

    fn name_pattern(&mut self) -> Result<NamePattern, SyntaxError> {
        self.eat(&Tok::Slash)?;
        let mut comps = vec![self.name_comp()?];
        while self.eat(&Tok::Slash)? {
            comps.push(self.name_comp()?);
        }
        Ok(NamePattern { comps })
    }

    fn name_comp(&mut self) -> Result<NameComp, SyntaxError> {
        match self.peek() {
            Tok::Str(_) | Tok::TagId(_) | Tok::RuleId(_) => match self.advance()?.tok {
                Tok::Str(comp) => Ok(NameComp::Value(comp)),
                Tok::TagId(id) => Ok(NameComp::Pattern(id)),
                Tok::RuleId(id) => Ok(NameComp::RuleRef(id)),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("a name component")),
        }
    }

    fn sign_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut refs = vec![self.rule_id()?];
        while self.eat(&Tok::Pipe)? {
            refs.push(self.rule_id()?);
        }
        Ok(refs)
    }

    fn rule_id(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Tok::RuleId(_) => match self.advance()?.tok {
                Tok::RuleId(id) => Ok(id),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("rule identifier")),
        }
    }

    fn cons_cnf(&mut self) -> Result<Vec<Vec<TagConstraint>>, SyntaxError> {
        let mut sets = vec![self.cons_set()?];
        while self.eat(&Tok::Pipe)? {
            sets.push(self.cons_set()?);
        }
        Ok(sets)
    }

    fn cons_set(&mut self) -> Result<Vec<TagConstraint>, SyntaxError> {
        self.expect(Tok::LBrace)?;
        let mut terms = vec![self.cons_term()?];
        while self.eat(&Tok::Comma)? {
            terms.push(self.cons_term()?);
        }
        self.expect(Tok::RBrace)?;
        Ok(terms)
    }

    fn cons_term(&mut self) -> Result<TagConstraint, SyntaxError> {
        let tag = match self.peek() {
            Tok::TagId(_) => match self.advance()?.tok {
                Tok::TagId(id) => id,
                _ => unreachable!(),
            },
            _ => return Err(self.unexpected("pattern identifier")),
        };
        self.expect(Tok::Colon)?;
        let mut options = vec![self.cons_opt()?];
        while self.eat(&Tok::Pipe)? {
            options.push(self.cons_opt()?);
        }
        Ok(TagConstraint { tag, options })
    }

    fn cons_opt(&mut self) -> Result<ConsOption, SyntaxError> {
        match self.peek() {
            Tok::Str(_) | Tok::TagId(_) => match self.advance()?.tok {
                Tok::Str(comp) => Ok(ConsOption::Value(comp)),
                Tok::TagId(id) => Ok(ConsOption::Pattern(id)),
                _ => unreachable!(),
            },
            Tok::FnId(_) => {
                let fn_id = match self.advance()?.tok {
                    Tok::FnId(id) => id,
                    _ => unreachable!(),
                };
                self.expect(Tok::LParen)?;
                let mut args = Vec::new();
                if self.peek() != &Tok::RParen {
                    args.push(self.fn_arg()?);
                    while self.eat(&Tok::Comma)? {
                        args.push(self.fn_arg()?);
                    }
                }
                self.expect(Tok::RParen)?;
                Ok(ConsOption::Call(FnCall { fn_id, args }))
            }
            _ => Err(self.unexpected("a constraint option")),
        }
    }

    fn fn_arg(&mut self) -> Result<FnArg, SyntaxError> {
        match self.peek() {
            Tok::Str(_) | Tok::TagId(_) => match self.advance()?.tok {
                Tok::Str(comp) => Ok(FnArg::Value(comp)),
                Tok::TagId(id) => Ok(FnArg::Pattern(id)),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("a function argument")),
        }
    }
}

/// Parses LVS source text into a schema.
pub fn parse(src: &str) -> Result<Schema, SyntaxError> {
    Parser::new(src)?.schema()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_rule() {
        let schema = parse(r#"#site: "a"/"blog""#).unwrap();
        assert_eq!(schema.rules.len(), 1);
        let rule = &schema.rules[0];
        assert_eq!(rule.id, "site");
        assert_eq!(
            rule.name.comps,
            vec![
                NameComp::Value(Component::generic(b"a".to_vec())),
                NameComp::Value(Component::generic(b"blog".to_vec())),
            ]
        );
        assert!(rule.cons_sets.is_empty());
        assert!(rule.sign_refs.is_empty());
    }

    #[test]
    fn full_definition() {
        let schema = parse(
            r#"
            // author certificates
            #author: #site/_role/ID/#KEY & {_role: "author", ID: $isValidID()} <= #admin | #root
            "#,
        )
        .unwrap();
        let rule = &schema.rules[0];
        assert_eq!(rule.id, "author");
        assert_eq!(
            rule.name.comps,
            vec![
                NameComp::RuleRef("site".into()),
                NameComp::Pattern("_role".into()),
                NameComp::Pattern("ID".into()),
                NameComp::RuleRef("KEY".into()),
            ]
        );
        assert_eq!(rule.cons_sets.len(), 1);
        let set = &rule.cons_sets[0];
        assert_eq!(set[0].tag, "_role");
        assert_eq!(set[0].options, vec![ConsOption::Value(Component::generic(b"author".to_vec()))]);
        assert_eq!(set[1].tag, "ID");
        assert_eq!(
            set[1].options,
            vec![ConsOption::Call(FnCall { fn_id: "isValidID".into(), args: vec![] })]
        );
        assert_eq!(rule.sign_refs, vec!["admin".to_owned(), "root".to_owned()]);
    }

    #[test]
    fn disjunctive_sets_and_options() {
        let schema = parse(r#"#user: /a/role & {role: "reader"|"author"} | {role: x, x: $f("v", y)}"#)
            .unwrap();
        let rule = &schema.rules[0];
        assert_eq!(rule.cons_sets.len(), 2);
        assert_eq!(rule.cons_sets[0][0].options.len(), 2);
        let second = &rule.cons_sets[1];
        assert_eq!(second[0].options, vec![ConsOption::Pattern("x".into())]);
        assert_eq!(
            second[1].options,
            vec![ConsOption::Call(FnCall {
                fn_id: "f".into(),
                args: vec![
                    FnArg::Value(Component::generic(b"v".to_vec())),
                    FnArg::Pattern("y".into()),
                ],
            })]
        );
    }

    #[test]
    fn leading_slash_is_optional() {
        let with = parse(r#"#a: /"x"/"y""#).unwrap();
        let without = parse(r#"#a: "x"/"y""#).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn comments_and_whitespace() {
        let schema = parse(
            "// header\n#a: \"x\" // trailing\n\n#b: #a/\"y\"\n",
        )
        .unwrap();
        assert_eq!(schema.rules.len(), 2);
        assert_eq!(schema.rules[1].name.comps[0], NameComp::RuleRef("a".into()));
    }

    #[test]
    fn error_positions() {
        let err = parse("#a: \"x\"\n#b = \"y\"").unwrap_err();
        assert_eq!((err.line, err.col), (2, 4));

        let err = parse("#a: \"unterminated").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated"));

        let err = parse("#a: \"x\" < #b").unwrap_err();
        assert!(err.message.contains("<="));
    }

    #[test]
    fn rejects_bad_component_literal() {
        let err = parse(r#"#a: "sp ace""#).unwrap_err();
        assert!(err.message.contains("not a legal name component"));
    }

    #[test]
    fn signing_without_constraints() {
        let schema = parse(r#"#admin: #site/"admin"/admin/#KEY <= #root"#).unwrap();
        let rule = &schema.rules[0];
        assert!(rule.cons_sets.is_empty());
        assert_eq!(rule.sign_refs, vec!["root".to_owned()]);
    }
}
