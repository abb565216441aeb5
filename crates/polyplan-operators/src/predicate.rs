//! Filter predicates.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | "(" or ")" | test
//! test    := column OP literal
//!          | column ["not"] "like" 'pattern'
//!          | column ["not"] "in" @broadcast
//! ```
//!
//! OP is one of `==, !=, <, <=, >, >=`. Keywords are case-insensitive.
//! Literals are a bare token (`42`, `-1.5`, `true`, `abc`) or text quoted
//! with `'` or `"`; quoted text is opaque, so operators and keywords inside
//! it are literal characters. `like` patterns use `%` for any run of
//! characters and `_` for exactly one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use polyplan_core::types::{Record, Scalar};

use crate::error::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        ("<=", CompareOp::Le),
        (">=", CompareOp::Ge),
        ("<", CompareOp::Lt),
        (">", CompareOp::Gt),
    ];

    fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        CompareOp::TOKENS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        literal: String,
    },
    Like {
        column: String,
        pattern: String,
    },
    InBroadcast {
        column: String,
        broadcast: String,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn parse(expr: &str) -> Result<Predicate> {
        let invalid = || OpError::Predicate(expr.trim().to_string());
        let tokens = tokenize(expr).ok_or_else(invalid)?;
        let mut parser = Parser { tokens, pos: 0 };
        match parser.or() {
            Some(p) if parser.pos == parser.tokens.len() => Ok(p),
            _ => Err(invalid()),
        }
    }

    /// Every `(column, broadcast)` pair tested with `in @broadcast`.
    pub fn memberships(&self) -> BTreeSet<(&str, &str)> {
        let mut out = BTreeSet::new();
        self.visit(&mut |p| {
            if let Predicate::InBroadcast { column, broadcast } = p {
                out.insert((column.as_str(), broadcast.as_str()));
            }
        });
        out
    }

    /// Names of the broadcast inputs the predicate reads.
    pub fn broadcasts(&self) -> BTreeSet<&str> {
        self.memberships().into_iter().map(|(_, b)| b).collect()
    }

    fn visit<'a, F: FnMut(&'a Predicate)>(&'a self, f: &mut F) {
        match self {
            Predicate::Not(p) => p.visit(f),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            test => f(test),
        }
    }

    /// Evaluate against one record. A test on a missing field or a `Null`
    /// is false; `not` inverts that like any other outcome.
    pub fn eval(&self, record: &Record, members: &Memberships) -> bool {
        match self {
            Predicate::Compare { column, op, literal } => {
                record.get(column).map_or(false, |v| compare(v, *op, literal))
            }
            Predicate::Like { column, pattern } => match record.get(column) {
                None | Some(Scalar::Null) => false,
                Some(v) => like(&v.render(), pattern),
            },
            Predicate::InBroadcast { column, broadcast } => match record.get(column) {
                None | Some(Scalar::Null) => false,
                Some(v) => members.contains(broadcast, column, &v.render()),
            },
            Predicate::Not(p) => !p.eval(record, members),
            Predicate::And(a, b) => a.eval(record, members) && b.eval(record, members),
            Predicate::Or(a, b) => a.eval(record, members) || b.eval(record, members),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, literal } => {
                write!(f, "{column} {} {}", op.symbol(), Literal(literal))
            }
            Predicate::Like { column, pattern } => {
                write!(f, "{column} like {}", Literal(pattern))
            }
            Predicate::InBroadcast { column, broadcast } => write!(f, "{column} in @{broadcast}"),
            Predicate::Not(p) => match **p {
                Predicate::And(..) | Predicate::Or(..) => write!(f, "not ({p})"),
                _ => write!(f, "not {p}"),
            },
            Predicate::And(a, b) => {
                for (i, side) in [a, b].into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    match **side {
                        Predicate::Or(..) => write!(f, "({side})")?,
                        _ => write!(f, "{side}")?,
                    }
                }
                Ok(())
            }
            Predicate::Or(a, b) => write!(f, "{a} or {b}"),
        }
    }
}

/// Renders a literal so that it parses back to the same text.
struct Literal<'a>(&'a str);

impl fmt::Display for Literal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        let bare = !s.is_empty()
            && !keyword(s)
            && !s.chars().any(|c| c.is_whitespace() || SPECIAL.contains(c));
        if bare {
            f.write_str(s)
        } else if s.contains('\'') {
            write!(f, "\"{s}\"")
        } else {
            write!(f, "'{s}'")
        }
    }
}

/// Broadcast values, by broadcast name and then by the column tested.
#[derive(Debug, Clone, Default)]
pub struct Memberships(BTreeMap<String, BTreeMap<String, BTreeSet<String>>>);

impl Memberships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, broadcast: &str, column: &str, values: BTreeSet<String>) {
        self.0
            .entry(broadcast.to_string())
            .or_default()
            .insert(column.to_string(), values);
    }

    fn contains(&self, broadcast: &str, column: &str, value: &str) -> bool {
        self.0
            .get(broadcast)
            .and_then(|by_column| by_column.get(column))
            .map_or(false, |values| values.contains(value))
    }
}

/// Values a broadcast channel contributes to an `in @name` test: the
/// field named like the filtered column, or else each record's first field.
pub fn broadcast_members<'a>(column: &str, records: impl IntoIterator<Item = &'a Record>) -> BTreeSet<String> {
    records
        .into_iter()
        .filter_map(|r| r.get(column).or_else(|| r.fields.first().map(|(_, v)| v)))
        .filter(|v| !matches!(v, Scalar::Null))
        .map(Scalar::render)
        .collect()
}

/// Characters that end a bare token.
const SPECIAL: &str = "()@'\"=!<>";

const KEYWORDS: [&str; 5] = ["and", "or", "not", "like", "in"];

fn keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !keyword(word)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Op(CompareOp),
    At,
    Open,
    Close,
}

/// `None` on an unterminated quote or a lone `=` or `!`.
fn tokenize(expr: &str) -> Option<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = expr.trim_start();
    while let Some(c) = rest.chars().next() {
        let (token, len) = match c {
            '(' => (Token::Open, 1),
            ')' => (Token::Close, 1),
            '@' => (Token::At, 1),
            '\'' | '"' => {
                let end = rest[1..].find(c)?;
                (Token::Quoted(&rest[1..1 + end]), end + 2)
            }
            '=' | '!' | '<' | '>' => {
                let (symbol, op) = CompareOp::TOKENS.iter().find(|(s, _)| rest.starts_with(s))?;
                (Token::Op(*op), symbol.len())
            }
            _ => {
                let len = rest
                    .find(|ch: char| ch.is_whitespace() || SPECIAL.contains(ch))
                    .unwrap_or(rest.len());
                (Token::Word(&rest[..len]), len)
            }
        };
        tokens.push(token);
        rest = rest[len..].trim_start();
    }
    Some(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: Token<'a>) -> bool {
        let hit = self.tokens.get(self.pos) == Some(&expected);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn keyword(&mut self, kw: &str) -> bool {
        let hit = matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw));
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn or(&mut self) -> Option<Predicate> {
        let mut lhs = self.and()?;
        while self.keyword("or") {
            lhs = Predicate::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Some(lhs)
    }

    fn and(&mut self) -> Option<Predicate> {
        let mut lhs = self.unary()?;
        while self.keyword("and") {
            lhs = Predicate::And(Box::new(lhs), Box::new(self.unary()?));
        }
        Some(lhs)
    }

    fn unary(&mut self) -> Option<Predicate> {
        if self.keyword("not") {
            return Some(Predicate::Not(Box::new(self.unary()?)));
        }
        if self.eat(Token::Open) {
            let inner = self.or()?;
            return self.eat(Token::Close).then_some(inner);
        }
        self.test()
    }

    fn test(&mut self) -> Option<Predicate> {
        let column = match self.next()? {
            Token::Word(w) if identifier(w) => w.to_string(),
            _ => return None,
        };
        let negated = self.keyword("not");
        let test = if self.keyword("like") {
            match self.next()? {
                Token::Quoted(pattern) => Predicate::Like {
                    column,
                    pattern: pattern.to_string(),
                },
                _ => return None,
            }
        } else if self.keyword("in") {
            if !self.eat(Token::At) {
                return None;
            }
            match self.next()? {
                Token::Word(name) if identifier(name) => Predicate::InBroadcast {
                    column,
                    broadcast: name.to_string(),
                },
                _ => return None,
            }
        } else if negated {
            return None;
        } else {
            let Token::Op(op) = self.next()? else {
                return None;
            };
            let literal = match self.next()? {
                Token::Quoted(s) => s,
                Token::Word(w) if !keyword(w) => w,
                _ => return None,
            };
            Predicate::Compare {
                column,
                op,
                literal: literal.to_string(),
            }
        };
        Some(if negated {
            Predicate::Not(Box::new(test))
        } else {
            test
        })
    }
}

/// SQL `LIKE` over characters.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    // Last `%` seen and the text position it currently absorbs up to.
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '_' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p.min(pattern.len())..].iter().all(|c| *c == '%')
}

/// Literals that do not parse as the value's type never match.
fn compare(value: &Scalar, op: CompareOp, literal: &str) -> bool {
    let ord = match value {
        Scalar::Null => return false,
        Scalar::Bool(b) => match literal.parse::<bool>() {
            Ok(lit) if matches!(op, CompareOp::Eq | CompareOp::Ne) => b.cmp(&lit),
            _ => return false,
        },
        Scalar::I64(i) => match literal.parse::<i64>() {
            Ok(lit) => i.cmp(&lit),
            Err(_) => match literal.parse::<f64>() {
                Ok(lit) => match (*i as f64).partial_cmp(&lit) {
                    Some(o) => o,
                    None => return false,
                },
                Err(_) => return false,
            },
        },
        Scalar::F64(f) => match literal.parse::<f64>().ok().and_then(|lit| f.partial_cmp(&lit)) {
            Some(o) => o,
            None => return false,
        },
        Scalar::Str(s) => s.as_str().cmp(literal),
    };
    op.holds(ord)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, v: Scalar) -> Record {
        Record::new().with(name, v)
    }

    fn cmp(column: &str, op: CompareOp, literal: &str) -> Predicate {
        Predicate::Compare {
            column: column.into(),
            op,
            literal: literal.into(),
        }
    }

    fn holds(expr: &str, record: &Record) -> bool {
        Predicate::parse(expr).unwrap().eval(record, &Memberships::new())
    }

    #[test]
    fn parses_two_char_operators_before_one_char() {
        let p = Predicate::parse("age <= 30").unwrap();
        assert_eq!(p, cmp("age", CompareOp::Le, "30"));
        assert_eq!(p.to_string(), "age <= 30");
        assert_eq!(Predicate::parse("age>=30").unwrap(), cmp("age", CompareOp::Ge, "30"));
    }

    #[test]
    fn parses_broadcast_membership() {
        let p = Predicate::parse("user IN @allowed").unwrap();
        assert_eq!(p.broadcasts().into_iter().collect::<Vec<_>>(), vec!["allowed"]);
        assert_eq!(p.memberships().into_iter().collect::<Vec<_>>(), vec![("user", "allowed")]);
        assert!(Predicate::parse("user in allowed").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(Predicate::parse("just words"), Err(OpError::Predicate(_))));
        assert!(Predicate::parse("== 3").is_err());
        assert!(Predicate::parse("a = 3").is_err());
        assert!(Predicate::parse("a == 'open").is_err());
        assert!(Predicate::parse("(a == 1").is_err());
        assert!(Predicate::parse("a == 1 and").is_err());
        assert!(Predicate::parse("a == 1 b == 2").is_err());
        assert!(Predicate::parse("a like abc").is_err());
        assert!(Predicate::parse("a not == 1").is_err());
        assert!(Predicate::parse("").is_err());
    }

    #[test]
    fn quoted_literals_hide_operators_and_keywords() {
        assert_eq!(
            Predicate::parse("title != 'a==b'").unwrap(),
            cmp("title", CompareOp::Ne, "a==b")
        );
        assert_eq!(
            Predicate::parse("city == 'Stoke in Trent'").unwrap(),
            cmp("city", CompareOp::Eq, "Stoke in Trent")
        );
        assert_eq!(
            Predicate::parse(r#"note == "x and y or not z <= @w""#).unwrap(),
            cmp("note", CompareOp::Eq, "x and y or not z <= @w")
        );
        assert_eq!(Predicate::parse("line != ''").unwrap(), cmp("line", CompareOp::Ne, ""));

        let city = rec("city", Scalar::Str("Stoke in Trent".into()));
        assert!(holds("city == 'Stoke in Trent'", &city));
        assert!(!holds("city == 'Stoke'", &city));
        let title = rec("title", Scalar::Str("a==b".into()));
        assert!(!holds("title != 'a==b'", &title));
        assert!(holds("title == \"a==b\"", &title));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let p = Predicate::parse("a == 1 or b == 2 and c == 3").unwrap();
        assert_eq!(
            p,
            Predicate::Or(
                Box::new(cmp("a", CompareOp::Eq, "1")),
                Box::new(Predicate::And(
                    Box::new(cmp("b", CompareOp::Eq, "2")),
                    Box::new(cmp("c", CompareOp::Eq, "3")),
                )),
            )
        );
        let grouped = Predicate::parse("(a == 1 OR b == 2) AND c == 3").unwrap();
        assert!(matches!(grouped, Predicate::And(..)));
        assert_eq!(grouped.to_string(), "(a == 1 or b == 2) and c == 3");
        assert_eq!(Predicate::parse(&grouped.to_string()).unwrap(), grouped);

        let r = Record::new()
            .with("a", Scalar::I64(1))
            .with("b", Scalar::I64(0))
            .with("c", Scalar::I64(0));
        assert!(holds("a == 1 or b == 2 and c == 3", &r));
        assert!(!holds("(a == 1 or b == 2) and c == 3", &r));
    }

    #[test]
    fn not_negates_the_following_test() {
        let r = rec("n", Scalar::I64(5));
        assert!(holds("not n > 10", &r));
        assert!(!holds("NOT (n > 1 and n < 10)", &r));
        assert!(holds("not not n == 5", &r));
        let p = Predicate::parse("not (n > 1 or n < -1)").unwrap();
        assert_eq!(p.to_string(), "not (n > 1 or n < -1)");
        assert!(holds("n > -10", &r));
    }

    #[test]
    fn like_matches_sql_wildcards() {
        let r = rec("name", Scalar::Str("Alice".into()));
        assert!(holds("name like 'A%'", &r));
        assert!(holds("name LIKE '%ic%'", &r));
        assert!(holds("name like '_lice'", &r));
        assert!(holds("name like '%'", &r));
        assert!(!holds("name like 'a%'", &r));
        assert!(!holds("name like '_ice'", &r));
        assert!(holds("name not like 'B%'", &r));
        // Non-text values match against their rendering.
        assert!(holds("n like '4_'", &rec("n", Scalar::I64(42))));
        assert!(!holds("n like '%'", &rec("n", Scalar::Null)));

        assert!(like("", ""));
        assert!(like("", "%%"));
        assert!(!like("", "_"));
        assert!(like("mississippi", "m%iss%pi"));
        assert!(!like("mississippi", "m%iss%px"));
    }

    #[test]
    fn numeric_and_string_comparisons() {
        let gt = Predicate::parse("n > 2").unwrap();
        let none = Memberships::new();
        assert!(gt.eval(&rec("n", Scalar::I64(3)), &none));
        assert!(!gt.eval(&rec("n", Scalar::I64(2)), &none));
        assert!(gt.eval(&rec("n", Scalar::F64(2.5)), &none));
        assert!(!gt.eval(&rec("n", Scalar::Null), &none));
        assert!(!gt.eval(&rec("m", Scalar::I64(9)), &none));

        let eq = Predicate::parse("name == 'Alice'").unwrap();
        assert!(eq.eval(&rec("name", Scalar::Str("Alice".into())), &none));
        assert!(!eq.eval(&rec("name", Scalar::Str("Bob".into())), &none));
    }

    #[test]
    fn mismatched_literal_types_never_match() {
        let int = rec("v", Scalar::I64(7));
        assert!(holds("v > 6.5", &int));
        assert!(!holds("v == 'seven'", &int));
        assert!(!holds("v != 'seven'", &int));
        assert!(holds("v == '7'", &int));

        let float = rec("v", Scalar::F64(1.5));
        assert!(!holds("v < abc", &float));
        assert!(holds("v >= 1", &float));

        let flag = rec("v", Scalar::Bool(true));
        assert!(holds("v == true", &flag));
        assert!(!holds("v == 1", &flag));
        assert!(!holds("v > false", &flag));

        // Text compares as text, whatever the literal looks like.
        let text = rec("v", Scalar::Str("10".into()));
        assert!(holds("v == 10", &text));
        assert!(holds("v < 9", &text));
    }

    #[test]
    fn membership_uses_rendered_values() {
        let p = Predicate::parse("id in @ids").unwrap();
        let allow = [rec("id", Scalar::I64(1)), rec("other", Scalar::I64(3))];
        let mut members = Memberships::new();
        members.insert("ids", "id", broadcast_members("id", allow.iter()));
        assert!(p.eval(&rec("id", Scalar::I64(1)), &members));
        assert!(p.eval(&rec("id", Scalar::I64(3)), &members));
        assert!(!p.eval(&rec("id", Scalar::I64(2)), &members));
        assert!(!p.eval(&rec("id", Scalar::I64(1)), &Memberships::new()));
    }

    #[test]
    fn membership_only_follows_the_column() {
        // ` in ` inside a literal is text, and `in @` needs a column before it.
        assert!(Predicate::parse("'a' in @b").is_err());
        assert!(Predicate::parse("x == 'y in @z'").unwrap().broadcasts().is_empty());

        let p = Predicate::parse("a in @left or b not in @right").unwrap();
        assert_eq!(
            p.memberships().into_iter().collect::<Vec<_>>(),
            vec![("a", "left"), ("b", "right")]
        );
        assert_eq!(p.to_string(), "a in @left or not b in @right");
    }
}
