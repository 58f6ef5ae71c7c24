// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression lexer.
//!
//! Identifiers are `[A-Za-z_$][A-Za-z0-9_]*`. A `:` after an identifier (or
//! a leading `::`) starts an MQTT fetch, which is consumed as one token:
//! colon-separated segments, each an identifier or a nullary call, the last
//! optionally carrying a `.key.key` path. A bare `.` outside numbers and
//! fetches is a lex error — `test.test` is a typo'd fetch, not a name.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),
    #[error("malformed number {0:?}")]
    BadNumber(String),
    #[error("malformed MQTT fetch {0:?}: {1}")]
    BadFetch(String, &'static str),
}

/// One fetch segment as lexed: a literal name or a nullary function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSegment {
    Name(String),
    Call(String),
    /// The empty leading segment of `::job:setting`.
    CurrentUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    /// Nullary function call: `random()`, `unit()`, …
    Call(String),
    /// `UNIT:JOB:SETTING[.path…]`
    Fetch {
        segments: Vec<RawSegment>,
        path: Vec<String>,
    },
    And,
    Or,
    Not,
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    LParen,
    RParen,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let bytes: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if bytes.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Power);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(LexError::UnexpectedChar('=', i));
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            ':' => {
                // A fetch starting with `::` (current-unit form).
                if bytes.get(i + 1) == Some(&':') {
                    let (token, consumed) = lex_fetch(&bytes, i, RawSegment::CurrentUnit, i + 2)?;
                    tokens.push(token);
                    i = consumed;
                } else {
                    return Err(LexError::UnexpectedChar(':', i));
                }
            }
            '0'..='9' | '.' => {
                let (value, consumed) = lex_number(&bytes, i)?;
                tokens.push(Token::Number(value));
                i = consumed;
            }
            c if is_ident_start(c) => {
                let (word, after_word) = lex_ident(&bytes, i);
                // A nullary call?
                let (segment, after_segment) = if bytes.get(after_word) == Some(&'(')
                    && bytes.get(after_word + 1) == Some(&')')
                {
                    (RawSegment::Call(word.clone()), after_word + 2)
                } else {
                    (RawSegment::Name(word.clone()), after_word)
                };

                if bytes.get(after_segment) == Some(&':') && bytes.get(after_segment + 1) != Some(&':')
                {
                    // identifier followed by a single `:` — an MQTT fetch
                    let (token, consumed) = lex_fetch(&bytes, i, segment, after_segment + 1)?;
                    tokens.push(token);
                    i = consumed;
                } else {
                    match segment {
                        RawSegment::Call(name) => tokens.push(Token::Call(name)),
                        RawSegment::Name(_) => tokens.push(keyword_or_ident(&word)),
                        RawSegment::CurrentUnit => {}
                    }
                    i = after_segment;
                }
            }
            other => return Err(LexError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn keyword_or_ident(word: &str) -> Token {
    match word {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "True" | "true" => Token::True,
        "False" | "false" => Token::False,
        _ => Token::Ident(word.to_string()),
    }
}

fn lex_ident(bytes: &[char], start: usize) -> (String, usize) {
    let mut end = start + 1;
    while end < bytes.len() && is_ident_continue(bytes[end]) {
        end += 1;
    }
    (bytes[start..end].iter().collect(), end)
}

fn lex_number(bytes: &[char], start: usize) -> Result<(f64, usize), LexError> {
    let mut end = start;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            '0'..='9' => end += 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    let raw: String = bytes[start..end].iter().collect();
    raw.parse()
        .map(|value| (value, end))
        .map_err(|_| LexError::BadNumber(raw))
}

/// Consume the remainder of a fetch token. `first` is the already-lexed
/// leading segment and `from` points just past its `:` separator.
fn lex_fetch(
    bytes: &[char],
    token_start: usize,
    first: RawSegment,
    mut from: usize,
) -> Result<(Token, usize), LexError> {
    let mut segments = vec![first];
    let mut path: Vec<String> = Vec::new();

    loop {
        let Some(&c) = bytes.get(from) else {
            return Err(fetch_error(bytes, token_start, from, "ends mid-segment"));
        };
        if !is_ident_start(c) {
            return Err(fetch_error(bytes, token_start, from, "segment expected"));
        }
        let (word, after_word) = lex_ident(bytes, from);
        let (segment, mut after) = if bytes.get(after_word) == Some(&'(')
            && bytes.get(after_word + 1) == Some(&')')
        {
            (RawSegment::Call(word), after_word + 2)
        } else {
            (RawSegment::Name(word), after_word)
        };
        segments.push(segment);

        if bytes.get(after) == Some(&':') {
            from = after + 1;
            continue;
        }

        // Optional .key.key path on the final segment.
        while bytes.get(after) == Some(&'.') {
            let key_start = after + 1;
            let Some(&k) = bytes.get(key_start) else {
                return Err(fetch_error(bytes, token_start, after, "trailing dot"));
            };
            if !is_ident_start(k) {
                return Err(fetch_error(bytes, token_start, after, "bad path key"));
            }
            let (key, key_end) = lex_ident(bytes, key_start);
            path.push(key);
            after = key_end;
        }

        if segments.len() < 3 {
            return Err(fetch_error(
                bytes,
                token_start,
                after,
                "needs unit:job:setting",
            ));
        }
        return Ok((Token::Fetch { segments, path }, after));
    }
}

fn fetch_error(bytes: &[char], start: usize, end: usize, message: &'static str) -> LexError {
    let upto = end.min(bytes.len());
    LexError::BadFetch(bytes[start..upto].iter().collect(), message)
}

#[cfg(test)]
#[path = "lexer_tests.rs"]
mod tests;
