//! Abstract syntax tree of a grammar, and the parser producing it.

use peg::parser;

parser! {
/// Parsing is a one-off cost per grammar, so this parser favors
/// readable rules over speed.
pub grammar source() for str {
    pub rule items() -> Vec<Item>
        = _ l:(item() ** _) _ { l }

    rule item() -> Item
        = r:definition() { Item::Rule(r) }
        / e:choice() { Item::Expr(e) }

    rule definition() -> Rule
        = pos:position!() n:name() _ "=" _ body:choice() _ ";" { Rule { name: n, body, pos } }

    rule choice() -> Expr
        = pos:position!() first:first_alternative() rest:(_ a:next_alternative() { a })+ {
            let mut alternatives = vec![first];
            alternatives.extend(rest);
            Expr::Choice(alternatives, pos)
        }
        / sequence()
        // a lone alternative may still carry a probability tag
        / pos:position!() p:probability() _ body:sequence() {
            Expr::Choice(vec![Alternative { probability: p, body }], pos)
        }

    rule first_alternative() -> Alternative
        = next_alternative()
        / p:probability()? _ body:sequence() {
            Alternative { probability: p.unwrap_or(Probability::Auto), body }
        }

    rule next_alternative() -> Alternative
        = ("/" / "|") _ p:probability()? _ body:sequence() {
            Alternative { probability: p.unwrap_or(Probability::Auto), body }
        }

    rule probability() -> Probability
        = "[" _ x:ufloat() _ percent:"%"? _ "]" {
            Probability::Explicit(if percent.is_some() { x / 100.0 } else { x })
        }

    #[cache]
    rule sequence() -> Expr
        = l:(repeat() ++ _) {
            let mut l = l;
            if l.len() == 1 {
                l.remove(0)
            } else {
                Expr::Sequence(l.into_iter().flat_map(Expr::into_sequence).collect())
            }
        }

    rule repeat() -> Expr
        = e:primary() s:(_ s:suffix() { s })* {
            s.into_iter().fold(e, |sub, suffix| suffix.apply(sub))
        }

    rule suffix() -> Suffix
        = pos:position!() "*" _ "[" _ min:uint() _ max:("..." _ m:times() { m })? _ "]" {
            Suffix::Repeat(min, max.unwrap_or(Some(min)), pos)
        }
        / pos:position!() "*" { Suffix::Repeat(0, None, pos) }
        / pos:position!() "+" { Suffix::Repeat(1, None, pos) }
        / pos:position!() "?" { Suffix::Repeat(0, Some(1), pos) }
        / "{" _ "capture" bang:"!"? __ n:name() _ "}" { Suffix::Capture(n, bang.is_some()) }

    rule primary() -> Expr
        = s:string() { Expr::Literal(s) }
        / "{=" c:code() "}" { Expr::Generate(c) }
        / "{?" c:code() "}" { Expr::Check(c) }
        / "{" c:code() "}" { Expr::Action(c) }
        / pos:position!() n:name() !(_ "=") { Expr::Reference(n, pos) }
        / pos:position!() lo:number() hi:(_ "..." _ n:number() { n })? {
            Expr::Range(lo, hi.unwrap_or(lo), pos)
        }
        / "(" _ e:choice() _ ")" { e }

    rule code() -> String
        = s:$(code_part()) { s.to_string() }

    rule code_part()
        = ("\\" [_] / [^ '{' | '}' | '\\']+ / "{" code_part() "}")*

    rule name() -> String
        = "`" s:$([^ '`']*) "`" { s.to_string() }
        / s:bare_name() { s.to_string() }

    rule bare_name() -> &'input str
        = quiet!{ $(['a'..='z' | 'A'..='Z' | '_' | ':'] ['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | ':' | '-']*) }
        / expected!("rule name")

    rule string() -> String
        = "\"" s:(escape() / [^ '"'])* "\"" { s.into_iter().collect() }
        / "'" s:(escape() / [^ '\''])* "'" { s.into_iter().collect() }
        / "U+" h:$(['0'..='9' | 'a'..='f' | 'A'..='F']+) {?
            u32::from_str_radix(h, 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .ok_or("valid unicode code point")
        }

    rule escape() -> char
        = "\\n" { '\n' }
        / "\\t" { '\t' }
        / "\\e" { '\u{1b}' }
        / "\\" c:[_] { c }

    rule number() -> Number
        = s:$(['-' | '+']? ['0'..='9']+ ("." ['0'..='9']+)? (['e' | 'E'] ['-' | '+']? ['0'..='9']+)?) {?
            if s.contains(['.', 'e', 'E']) {
                s.parse().map(Number::Float).or(Err("number"))
            } else {
                s.parse().map(Number::Int).or(Err("64-bit integer"))
            }
        }

    rule ufloat() -> f64
        = n:number() {?
            match n {
                Number::Int(i) if i >= 0 => Ok(i as f64),
                Number::Float(f) if f >= 0.0 => Ok(f),
                _ => Err("non-negative number"),
            }
        }

    rule uint() -> u32
        = n:$(['0'..='9']+) {? n.parse().or(Err("repetition count")) }

    rule times() -> Option<u32>
        = n:uint() { Some(n) }
        / "inf" { None }

    rule _ = quiet!{ (whitespace() / comment())* }
    rule __ = quiet!{ (whitespace() / comment())+ }

    rule whitespace() = [' ' | '\n' | '\t' | '\r']+

    rule comment()
        = ("//" / "--") [^ '\n']*
        / "/*" (!"*/" [_])* "*/"
}}

/// A top-level element of a grammar source.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Rule(Rule),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub body: Expr,
    /// Byte offset of the rule name.
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Probability {
    Auto,
    Explicit(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub probability: Probability,
    pub body: Expr,
}

/// Grammar expressions. Variants that can fail to compile carry the byte
/// offset where they start.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    Range(Number, Number, usize),
    Reference(String, usize),
    /// `max == None` is unbounded.
    Repetition {
        sub: Box<Expr>,
        min: u32,
        max: Option<u32>,
        pos: usize,
    },
    Sequence(Vec<Expr>),
    Choice(Vec<Alternative>, usize),
    Generate(String),
    Check(String),
    Action(String),
    Capture {
        sub: Box<Expr>,
        name: String,
        discard: bool,
    },
}

impl Expr {
    /// Flattens nested sequences, e.g. from parenthesized groups.
    fn into_sequence(self) -> Vec<Expr> {
        match self {
            Self::Sequence(items) => items,
            e => vec![e],
        }
    }
}

pub enum Suffix {
    Repeat(u32, Option<u32>, usize),
    Capture(String, bool),
}

impl Suffix {
    fn apply(self, sub: Expr) -> Expr {
        match self {
            Self::Repeat(min, max, pos) => Expr::Repetition {
                sub: Box::new(sub),
                min,
                max,
                pos,
            },
            Self::Capture(name, discard) => Expr::Capture {
                sub: Box::new(sub),
                name,
                discard,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(s: &str) -> Expr {
        match source::items(s).unwrap().remove(0) {
            Item::Rule(r) => r.body,
            Item::Expr(e) => e,
        }
    }

    #[test]
    fn sequences_flatten() {
        assert_eq!(
            parse_one(r#"r = "a" ("b" "c") ;"#),
            Expr::Sequence(vec![
                Expr::Literal("a".into()),
                Expr::Literal("b".into()),
                Expr::Literal("c".into()),
            ])
        );
    }

    #[test]
    fn literals() {
        assert_eq!(parse_one(r#"r = "a\"\n\x" ;"#), Expr::Literal("a\"\nx".into()));
        assert_eq!(parse_one(r#"r = 'it\'s' ;"#), Expr::Literal("it's".into()));
        assert_eq!(parse_one("r = U+1F600 ;"), Expr::Literal("\u{1F600}".into()));
        assert_eq!(parse_one(r#"r = "\e" ;"#), Expr::Literal("\u{1b}".into()));
    }

    #[test]
    fn weighted_choice() {
        let Expr::Choice(alts, _) = parse_one(r#"r = [60%] "a" / "b" | [0.1] "c" ;"#) else {
            panic!("expected a choice");
        };
        let probs: Vec<_> = alts.iter().map(|a| a.probability).collect();
        assert_eq!(
            probs,
            vec![
                Probability::Explicit(0.6),
                Probability::Auto,
                Probability::Explicit(0.1)
            ]
        );

        // leading separator on the first alternative
        let Expr::Choice(alts, _) = parse_one(r#"r = | "a" | "b" ;"#) else {
            panic!("expected a choice");
        };
        assert_eq!(alts.len(), 2);
    }

    #[test]
    fn lone_weighted_alternative() {
        match parse_one(r#"r = [100%] "a" ;"#) {
            Expr::Choice(alternatives, _) => assert_eq!(
                alternatives,
                vec![Alternative {
                    probability: Probability::Explicit(1.0),
                    body: Expr::Literal("a".into()),
                }]
            ),
            e => panic!("not a choice: {:?}", e),
        }
    }

    #[test]
    fn repetition_suffixes() {
        let rep = |s: &str| match parse_one(s) {
            Expr::Repetition { min, max, .. } => (min, max),
            e => panic!("not a repetition: {:?}", e),
        };
        assert_eq!(rep(r#"r = "x"* ;"#), (0, None));
        assert_eq!(rep(r#"r = "x"+ ;"#), (1, None));
        assert_eq!(rep(r#"r = "x"? ;"#), (0, Some(1)));
        assert_eq!(rep(r#"r = "x"*[3] ;"#), (3, Some(3)));
        assert_eq!(rep(r#"r = "x"*[2...4] ;"#), (2, Some(4)));
        assert_eq!(rep(r#"r = "x"*[ 2 ... inf ] ;"#), (2, None));
        assert!(source::items(r#"r = "x"*[inf] ;"#).is_err());
    }

    #[test]
    fn embedded_blocks_and_capture() {
        assert_eq!(
            parse_one(r#"r = {= a + {b}} ;"#),
            Expr::Generate(" a + {b}".into())
        );
        assert_eq!(parse_one(r#"r = {? x == "\}"} ;"#), Expr::Check(r#" x == "\}""#.into()));
        assert_eq!(parse_one("r = { n = 1 } ;"), Expr::Action(" n = 1 ".into()));
        assert_eq!(
            parse_one(r#"w = "foo"{capture w} ;"#),
            Expr::Capture {
                sub: Box::new(Expr::Literal("foo".into())),
                name: "w".into(),
                discard: false
            }
        );
        assert!(matches!(
            parse_one(r#"w = "foo" {capture! w} ;"#),
            Expr::Capture { discard: true, .. }
        ));
        // not a capture: an action that happens to start with the word
        assert_eq!(
            parse_one("r = {capture_x = 1} ;"),
            Expr::Action("capture_x = 1".into())
        );
    }

    #[test]
    fn numbers_and_names() {
        assert!(matches!(
            parse_one("r = 1...6 ;"),
            Expr::Range(Number::Int(1), Number::Int(6), _)
        ));
        assert!(matches!(
            parse_one("r = -0.5...2.5e1 ;"),
            Expr::Range(Number::Float(_), Number::Float(_), _)
        ));
        assert!(matches!(parse_one("r = `odd name` ;"), Expr::Reference(n, _) if n == "odd name"));
        assert!(matches!(parse_one("r = a:b-c ;"), Expr::Reference(n, _) if n == "a:b-c"));
    }

    #[test]
    fn comments_and_top_level() {
        let items = source::items(
            r#"
            // line comment
            "<" body ">"  -- another
            /* block
               comment */
            body = "b" ;
            "#,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Item::Expr(Expr::Sequence(_))));
        assert!(matches!(&items[1], Item::Rule(r) if r.name == "body"));
    }

    #[test]
    fn syntax_errors() {
        for s in [
            r#"r = "a" "#,
            r#"r = "unterminated ;"#,
            r#"r = { x ;"#,
            r#"r = [50%] ;"#,
            r#"r = "a" | ;"#,
            r#"r = "a" /* open"#,
        ] {
            assert!(source::items(s).is_err(), "{}", s);
        }
    }
}
