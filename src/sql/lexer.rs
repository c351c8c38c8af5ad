//! # SQL Lexer
//!
//! Hand-rolled tokenizer for the supported dialect. Keywords resolve through
//! a compile-time perfect hash map (`phf`), so keyword lookup is O(1) with
//! no allocation for the common all-lowercase and all-uppercase spellings.
//!
//! Tokens borrow from the input string; string literals with embedded
//! quote escapes (`''`) are the one case that allocates, into the statement
//! arena.

use crate::error::DbError;
use bumpalo::Bump;
use eyre::Result;
use phf::phf_map;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Abort,
    And,
    As,
    Asc,
    Begin,
    By,
    Commit,
    Create,
    Delete,
    Desc,
    Explain,
    False,
    From,
    Group,
    Having,
    Index,
    Inner,
    Insert,
    Into,
    Join,
    Key,
    Left,
    Limit,
    Not,
    Null,
    On,
    Or,
    Order,
    Outer,
    Primary,
    Rollback,
    Select,
    Serializable,
    Set,
    Show,
    Table,
    True,
    Update,
    Using,
    Values,
    Where,
    With,
}

static KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "abort" => Keyword::Abort,
    "and" => Keyword::And,
    "as" => Keyword::As,
    "asc" => Keyword::Asc,
    "begin" => Keyword::Begin,
    "by" => Keyword::By,
    "commit" => Keyword::Commit,
    "create" => Keyword::Create,
    "delete" => Keyword::Delete,
    "desc" => Keyword::Desc,
    "explain" => Keyword::Explain,
    "false" => Keyword::False,
    "from" => Keyword::From,
    "group" => Keyword::Group,
    "having" => Keyword::Having,
    "index" => Keyword::Index,
    "inner" => Keyword::Inner,
    "insert" => Keyword::Insert,
    "into" => Keyword::Into,
    "join" => Keyword::Join,
    "key" => Keyword::Key,
    "left" => Keyword::Left,
    "limit" => Keyword::Limit,
    "not" => Keyword::Not,
    "null" => Keyword::Null,
    "on" => Keyword::On,
    "or" => Keyword::Or,
    "order" => Keyword::Order,
    "outer" => Keyword::Outer,
    "primary" => Keyword::Primary,
    "rollback" => Keyword::Rollback,
    "select" => Keyword::Select,
    "serializable" => Keyword::Serializable,
    "set" => Keyword::Set,
    "show" => Keyword::Show,
    "table" => Keyword::Table,
    "true" => Keyword::True,
    "update" => Keyword::Update,
    "using" => Keyword::Using,
    "values" => Keyword::Values,
    "where" => Keyword::Where,
    "with" => Keyword::With,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'a> {
    Keyword(Keyword),
    Ident(&'a str),
    IntLit(i64),
    FloatLit(f64),
    StringLit(&'a str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// `<->`
    L2Dist,
    /// `<#>`
    IpDist,
    /// `<=>`
    CosineDist,
    Eof,
}

fn invalid(msg: impl Into<String>) -> eyre::Report {
    DbError::InvalidInput(msg.into()).into()
}

/// Resolves a word to a keyword, trying the bare spelling, then lowercase.
fn keyword(word: &str) -> Option<Keyword> {
    KEYWORDS
        .get(word)
        .or_else(|| KEYWORDS.get(word.to_ascii_lowercase().as_str()))
        .copied()
}

pub fn tokenize<'a>(sql: &'a str, arena: &'a Bump) -> Result<Vec<Token<'a>>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut at = 0usize;

    while at < bytes.len() {
        let b = bytes[at];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => at += 1,
            b'-' if bytes.get(at + 1) == Some(&b'-') => {
                // Line comment.
                while at < bytes.len() && bytes[at] != b'\n' {
                    at += 1;
                }
            }
            b'(' => {
                tokens.push(Token::LParen);
                at += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                at += 1;
            }
            b'[' => {
                tokens.push(Token::LBracket);
                at += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                at += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                at += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                at += 1;
            }
            b';' => {
                tokens.push(Token::Semicolon);
                at += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                at += 1;
            }
            b'+' => {
                tokens.push(Token::Plus);
                at += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                at += 1;
            }
            b'/' => {
                tokens.push(Token::Slash);
                at += 1;
            }
            b'%' => {
                tokens.push(Token::Percent);
                at += 1;
            }
            b'=' => {
                tokens.push(Token::Eq);
                at += 1;
            }
            b'!' if bytes.get(at + 1) == Some(&b'=') => {
                tokens.push(Token::NotEq);
                at += 2;
            }
            b'>' => {
                if bytes.get(at + 1) == Some(&b'=') {
                    tokens.push(Token::GtEq);
                    at += 2;
                } else {
                    tokens.push(Token::Gt);
                    at += 1;
                }
            }
            b'<' => match (bytes.get(at + 1), bytes.get(at + 2)) {
                (Some(b'-'), Some(b'>')) => {
                    tokens.push(Token::L2Dist);
                    at += 3;
                }
                (Some(b'#'), Some(b'>')) => {
                    tokens.push(Token::IpDist);
                    at += 3;
                }
                (Some(b'='), Some(b'>')) => {
                    tokens.push(Token::CosineDist);
                    at += 3;
                }
                (Some(b'='), _) => {
                    tokens.push(Token::LtEq);
                    at += 2;
                }
                (Some(b'>'), _) => {
                    tokens.push(Token::NotEq);
                    at += 2;
                }
                _ => {
                    tokens.push(Token::Lt);
                    at += 1;
                }
            },
            b'\'' => {
                let (token, next) = lex_string(sql, at, arena)?;
                tokens.push(token);
                at = next;
            }
            b'0'..=b'9' => {
                let (token, next) = lex_number(sql, at)?;
                tokens.push(token);
                at = next;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = at;
                at += 1;
                while at < bytes.len()
                    && (bytes[at].is_ascii_alphanumeric() || bytes[at] == b'_')
                {
                    at += 1;
                }
                let word = &sql[start..at];
                match keyword(word) {
                    Some(kw) => tokens.push(Token::Keyword(kw)),
                    None => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(invalid(format!("unexpected character '{}'", other as char))),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

fn lex_string<'a>(sql: &'a str, start: usize, arena: &'a Bump) -> Result<(Token<'a>, usize)> {
    let bytes = sql.as_bytes();
    let mut at = start + 1;
    let mut escaped = false;
    while at < bytes.len() {
        if bytes[at] == b'\'' {
            if bytes.get(at + 1) == Some(&b'\'') {
                escaped = true;
                at += 2;
                continue;
            }
            let body = &sql[start + 1..at];
            let token = if escaped {
                Token::StringLit(arena.alloc_str(&body.replace("''", "'")))
            } else {
                Token::StringLit(body)
            };
            return Ok((token, at + 1));
        }
        at += 1;
    }
    Err(invalid("unterminated string literal"))
}

fn lex_number(sql: &str, start: usize) -> Result<(Token<'_>, usize)> {
    let bytes = sql.as_bytes();
    let mut at = start;
    let mut is_float = false;
    while at < bytes.len() {
        match bytes[at] {
            b'0'..=b'9' => at += 1,
            b'.' if !is_float && bytes.get(at + 1).is_some_and(u8::is_ascii_digit) => {
                is_float = true;
                at += 1;
            }
            _ => break,
        }
    }
    let text = &sql[start..at];
    let token = if is_float {
        Token::FloatLit(
            text.parse::<f64>()
                .map_err(|_| invalid(format!("bad numeric literal '{text}'")))?,
        )
    } else {
        Token::IntLit(
            text.parse::<i64>()
                .map_err(|_| invalid(format!("bad integer literal '{text}'")))?,
        )
    };
    Ok((token, at))
}
