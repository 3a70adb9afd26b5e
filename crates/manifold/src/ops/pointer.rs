//! Paths into a YAML document.
//!
//! Tokens follow JSON pointer escaping (`~0` is `~`, `~1` is `/`) with these
//! extensions:
//!
//! - `key?` marks the key, and everything after it, optional
//! - `-` addresses the position after the last array element
//! - `field=value` selects the first array element whose `field` equals
//!   `value`; `field=value?` makes the selection optional

use std::fmt;

use super::error::PatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Key { name: String, optional: bool },
    Index(usize),
    Append,
    Matcher {
        field: String,
        value: String,
        optional: bool,
    },
}

impl Token {
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Token::Key { optional: true, .. } | Token::Matcher { optional: true, .. }
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |optional: bool| if optional { "?" } else { "" };
        match self {
            Token::Key { name, optional } => write!(f, "{}{}", escape(name), mark(*optional)),
            Token::Index(index) => write!(f, "{}", index),
            Token::Append => f.write_str("-"),
            Token::Matcher {
                field,
                value,
                optional,
            } => write!(f, "{}={}{}", escape(field), escape(value), mark(*optional)),
        }
    }
}

/// A parsed pointer. The empty token list addresses the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    tokens: Vec<Token>,
}

impl Pointer {
    pub fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    pub fn parse(raw: &str) -> Result<Self, PatchError> {
        let invalid = |reason: &str| PatchError::InvalidPointer {
            pointer: raw.to_string(),
            reason: reason.to_string(),
        };

        let Some(rest) = raw.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut tokens = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(invalid("empty token"));
            }
            tokens.push(parse_token(segment).map_err(|reason| invalid(&reason))?);
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens.is_empty() {
            return f.write_str("/");
        }
        for token in &self.tokens {
            write!(f, "/{}", token)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Pointer {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_token(segment: &str) -> Result<Token, String> {
    if segment == "-" {
        return Ok(Token::Append);
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return segment
            .parse::<usize>()
            .map(Token::Index)
            .map_err(|e| format!("bad index '{}': {}", segment, e));
    }

    let (body, optional) = match segment.strip_suffix('?') {
        Some(body) => (body, true),
        None => (segment, false),
    };
    if body.is_empty() {
        return Err("empty token".to_string());
    }

    if let Some((field, value)) = body.split_once('=') {
        if field.is_empty() {
            return Err(format!("matcher '{}' has no field", segment));
        }
        return Ok(Token::Matcher {
            field: unescape(field)?,
            value: unescape(value)?,
            optional,
        });
    }

    Ok(Token::Key {
        name: unescape(body)?,
        optional,
    })
}

fn unescape(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(format!("bad escape in '{}'", s)),
        }
    }
    Ok(out)
}

fn escape(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}
