//! Directive templates for schema sources
//!
//! A schema source is JSON text with embedded actions:
//!
//! - `{{ ID }}` expands to the schema's canonical ID for the target environment
//! - `{{ JSM "acme_user_1_0_0" }}` (or with a `` `raw` `` string) expands to a
//!   dependency's canonical ID
//!
//! Parsing happens once per schema; execution takes a directive evaluator so
//! the caller decides what each directive resolves to. A parsed [`Template`] is
//! immutable and cheap to clone, so concurrent renders share one parse.

use std::fmt;
use std::sync::Arc;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A directive found inside `{{ ... }}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `{{ ID }}`
    Id,
    /// `{{ JSM "<key>" }}`
    Jsm(String),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Id => f.write_str("ID"),
            Directive::Jsm(arg) => write!(f, "JSM {arg:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Action(Directive),
}

/// Syntax error found while parsing a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Byte offset of the offending action
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// A parsed schema template
#[derive(Debug, Clone)]
pub struct Template {
    segments: Arc<[Segment]>,
}

impl Template {
    /// Parse template source text
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let action_offset = offset + start;
            let body = &rest[start + OPEN.len()..];
            let (directive, consumed) = parse_action(body, action_offset)?;
            segments.push(Segment::Action(directive));

            let advance = start + OPEN.len() + consumed;
            rest = &rest[advance..];
            offset += advance;
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            segments: segments.into(),
        })
    }

    /// Render the template, resolving every directive through `eval`.
    ///
    /// Stops at the first directive that fails and returns its error.
    pub fn execute<E>(
        &self,
        mut eval: impl FnMut(&Directive) -> Result<String, E>,
    ) -> Result<String, E> {
        let mut out = String::new();
        for segment in self.segments.iter() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(directive) => out.push_str(&eval(directive)?),
            }
        }
        Ok(out)
    }

    /// Arguments of every `JSM` directive, in source order
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Action(Directive::Jsm(arg)) => Some(arg.as_str()),
            _ => None,
        })
    }
}

/// Parse one action body (text after `{{`); returns the directive and the
/// number of bytes consumed including the closing `}}`.
fn parse_action(body: &str, offset: usize) -> Result<(Directive, usize), SyntaxError> {
    let err = |message: String| SyntaxError { offset, message };
    let mut lexer = Lexer { src: body, pos: 0 };

    let name = match lexer.next_token().map_err(&err)? {
        Token::Ident(name) => name,
        Token::Close => return Err(err("missing value for command".to_string())),
        Token::Str(_) => return Err(err("unexpected string at start of action".to_string())),
    };

    let mut args = Vec::new();
    loop {
        match lexer.next_token().map_err(&err)? {
            Token::Close => break,
            Token::Str(s) => args.push(s),
            Token::Ident(word) => {
                return Err(err(format!("unexpected identifier {word:?} in {name} arguments")))
            }
        }
    }

    let directive = match (name.as_str(), args.len()) {
        ("ID", 0) => Directive::Id,
        ("JSM", 1) => Directive::Jsm(args.remove(0)),
        ("ID", n) => return Err(err(format!("wrong number of args for ID: want 0 got {n}"))),
        ("JSM", n) => return Err(err(format!("wrong number of args for JSM: want 1 got {n}"))),
        (other, _) => return Err(err(format!("function {other:?} not defined"))),
    };
    Ok((directive, lexer.pos))
}

enum Token {
    Ident(String),
    Str(String),
    Close,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl Lexer<'_> {
    fn next_token(&mut self) -> Result<Token, String> {
        let rest = &self.src[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();

        if trimmed.starts_with(CLOSE) {
            self.pos += CLOSE.len();
            return Ok(Token::Close);
        }

        let mut chars = trimmed.char_indices();
        match chars.next() {
            None => Err("unclosed action".to_string()),
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {
                let end = trimmed
                    .char_indices()
                    .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
                    .map_or(trimmed.len(), |(i, _)| i);
                self.pos += end;
                Ok(Token::Ident(trimmed[..end].to_string()))
            }
            Some((_, '`')) => {
                let end = trimmed[1..]
                    .find('`')
                    .ok_or_else(|| "unterminated raw string".to_string())?;
                self.pos += end + 2;
                Ok(Token::Str(trimmed[1..1 + end].to_string()))
            }
            Some((_, '"')) => {
                let mut value = String::new();
                let mut escaped = false;
                for (i, c) in chars {
                    if escaped {
                        value.push(match c {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        self.pos += i + 1;
                        return Ok(Token::Str(value));
                    } else if c == '\n' {
                        break;
                    } else {
                        value.push(c);
                    }
                }
                Err("unterminated quoted string".to_string())
            }
            Some((_, c)) => Err(format!("unexpected {c:?} in action")),
        }
    }
}
