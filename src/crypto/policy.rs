//! Access policies over attribute sets.
//!
//! Grammar, with `and` binding tighter than `or`:
//!
//! ```text
//! policy := conj ("or" conj)*
//! conj   := term ("and" term)*
//! term   := "(" policy ")" | k "of" "(" policy ("," policy)* ")" | attribute
//! ```

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use super::CryptoError;

/// Deepest nesting of parenthesised or threshold groups a policy may use.
pub const MAX_POLICY_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    Attribute(String),
    All(Vec<Policy>),
    Any(Vec<Policy>),
    Threshold { k: usize, of: Vec<Policy> },
}

impl Policy {
    pub fn is_satisfied_by(&self, attributes: &BTreeSet<String>) -> bool {
        match self {
            Policy::Attribute(name) => attributes.contains(name),
            Policy::All(terms) => terms.iter().all(|t| t.is_satisfied_by(attributes)),
            Policy::Any(terms) => terms.iter().any(|t| t.is_satisfied_by(attributes)),
            Policy::Threshold { k, of } => {
                of.iter().filter(|t| t.is_satisfied_by(attributes)).count() >= *k
            }
        }
    }
}

impl FromStr for Policy {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut parser = PolicyParser {
            source: s,
            tokens,
            pos: 0,
            depth: 0,
        };
        let policy = parser.policy()?;
        if let Some(token) = parser.peek() {
            return Err(parser.err(format!("unexpected {token}")));
        }
        Ok(policy)
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn join(f: &mut Formatter<'_>, terms: &[Policy], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, "{sep}")?;
                }
                write!(f, "{term}")?;
            }
            write!(f, ")")
        }

        match self {
            Policy::Attribute(name) => write!(f, "{name}"),
            Policy::All(terms) => join(f, terms, " and "),
            Policy::Any(terms) => join(f, terms, " or "),
            Policy::Threshold { k, of } => {
                write!(f, "{k} of ")?;
                join(f, of, ", ")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Comma,
    Word(String),
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => write!(f, "`(`"),
            Token::Close => write!(f, "`)`"),
            Token::Comma => write!(f, "`,`"),
            Token::Word(w) => write!(f, "`{w}`"),
        }
    }
}

fn tokenize(s: &str) -> Result<Vec<Token>, CryptoError> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            c if c.is_whitespace() => {}
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
                continue;
            }
            c => {
                return Err(CryptoError::InvalidPolicy {
                    policy: s.to_string(),
                    reason: format!("unexpected character {c:?}"),
                })
            }
        }
        chars.next();
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '=' | '#')
}

fn is_keyword(word: &str, keyword: &str) -> bool {
    word.eq_ignore_ascii_case(keyword)
}

struct PolicyParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl PolicyParser<'_> {
    fn policy(&mut self) -> Result<Policy, CryptoError> {
        self.depth += 1;
        if self.depth > MAX_POLICY_DEPTH {
            return Err(self.err(format!("nested deeper than {MAX_POLICY_DEPTH} levels")));
        }
        let policy = self.disjunction();
        self.depth -= 1;
        policy
    }

    fn disjunction(&mut self) -> Result<Policy, CryptoError> {
        let mut terms = vec![self.conjunction()?];
        while self.eat_keyword("or") {
            terms.push(self.conjunction()?);
        }
        Ok(collapse(terms, Policy::Any))
    }

    fn conjunction(&mut self) -> Result<Policy, CryptoError> {
        let mut terms = vec![self.term()?];
        while self.eat_keyword("and") {
            terms.push(self.term()?);
        }
        Ok(collapse(terms, Policy::All))
    }

    fn term(&mut self) -> Result<Policy, CryptoError> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.policy()?;
                self.expect(Token::Close)?;
                Ok(inner)
            }
            Some(Token::Word(word)) if self.peek_keyword("of") => {
                let k: usize = word
                    .parse()
                    .map_err(|_| self.err(format!("threshold `{word}` is not a number")))?;
                self.pos += 1;
                self.expect(Token::Open)?;
                let mut of = vec![self.policy()?];
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    of.push(self.policy()?);
                }
                self.expect(Token::Close)?;
                if k == 0 || k > of.len() {
                    return Err(self.err(format!("threshold {k} of {} terms", of.len())));
                }
                Ok(Policy::Threshold { k, of })
            }
            Some(Token::Word(word)) if is_keyword(&word, "and") || is_keyword(&word, "or") => {
                Err(self.err(format!("expected attribute, found `{word}`")))
            }
            Some(Token::Word(word)) => Ok(Policy::Attribute(word)),
            Some(token) => Err(self.err(format!("expected attribute, found {token}"))),
            None => Err(self.err("unexpected end of policy".to_string())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if is_keyword(w, keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect(&mut self, expected: Token) -> Result<(), CryptoError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(self.err(format!("expected {expected}, found {token}"))),
            None => Err(self.err(format!("expected {expected}, found end of policy"))),
        }
    }

    fn err(&self, reason: String) -> CryptoError {
        CryptoError::InvalidPolicy {
            policy: self.source.to_string(),
            reason,
        }
    }
}

fn collapse(mut terms: Vec<Policy>, combine: fn(Vec<Policy>) -> Policy) -> Policy {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        combine(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let policy: Policy = "a or b and c".parse().unwrap();
        assert_eq!(
            policy,
            Policy::Any(vec![
                Policy::Attribute("a".into()),
                Policy::All(vec![Policy::Attribute("b".into()), Policy::Attribute("c".into())]),
            ])
        );
        assert!(policy.is_satisfied_by(&attrs(&["a"])));
        assert!(policy.is_satisfied_by(&attrs(&["b", "c"])));
        assert!(!policy.is_satisfied_by(&attrs(&["b"])));
    }

    #[test]
    fn parentheses_and_thresholds() {
        let policy: Policy = "(admin or staff) and 2 of (x, y, z)".parse().unwrap();
        assert!(policy.is_satisfied_by(&attrs(&["staff", "x", "z"])));
        assert!(!policy.is_satisfied_by(&attrs(&["staff", "x"])));
        assert!(!policy.is_satisfied_by(&attrs(&["x", "y", "z"])));
        assert_eq!(policy.to_string(), "((admin or staff) and 2 of (x, y, z))");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let policy: Policy = "a AND b".parse().unwrap();
        assert!(policy.is_satisfied_by(&attrs(&["a", "b"])));
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |depth: usize| format!("{}a{}", "(".repeat(depth), ")".repeat(depth));
        assert!(nested(MAX_POLICY_DEPTH - 1).parse::<Policy>().is_ok());
        assert!(matches!(
            nested(MAX_POLICY_DEPTH).parse::<Policy>(),
            Err(CryptoError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            nested(200_000).parse::<Policy>(),
            Err(CryptoError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn invalid_policies() {
        for policy in ["", "a and", "(a or b", "a b", "3 of (a, b)", "0 of (a)", "a & b", "or"] {
            assert!(
                matches!(policy.parse::<Policy>(), Err(CryptoError::InvalidPolicy { .. })),
                "{policy:?} should be rejected"
            );
        }
    }
}
