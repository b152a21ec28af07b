//! Minimal JSON tokenizer for RPC envelopes
//!
//! Handles objects with string keys, string and bare primitive values and
//! arrays of scalars. Tokens record byte ranges into the owned source text and
//! the index of their enclosing container, so lookups never copy until a value
//! is extracted. Unquoted tokens are accepted anywhere a value may appear,
//! which is what lets envelopes carry bare arguments like `[foo.bar, 0.5]`.

use crate::error::ParseError;

/// Kind of a token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// `{ ... }`
    Object,
    /// `[ ... ]`
    Array,
    /// Quoted string; the range excludes the quotes
    String,
    /// Unquoted scalar (number, literal or bare word)
    Primitive,
}

impl TokenKind {
    fn name(self) -> &'static str {
        match self {
            TokenKind::Object => "object",
            TokenKind::Array => "array",
            TokenKind::String => "string",
            TokenKind::Primitive => "primitive",
        }
    }
}

/// One token of the source text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// Token kind
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// Number of direct child tokens (containers only)
    pub size: usize,
    /// Index of the enclosing container
    pub parent: Option<usize>,
    /// Whether this string is an object key
    pub is_key: bool,
}

/// Reference to a token within a [`Tokens`] set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenRef(pub usize);

/// Tokenized document that owns its source text
#[derive(Clone, Debug)]
pub struct Tokens {
    text: String,
    tokens: Vec<Token>,
}

/// Characters stripped from array elements
const STRIPPED: &[char] = &['"', '\\', '[', ']', '\n', '{', '}'];

/// Tokenize `text`
pub fn tokenize(text: &str) -> Result<Tokens, ParseError> {
    let bytes = text.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'{' | b'[' => {
                let kind = if bytes[pos] == b'{' {
                    TokenKind::Object
                } else {
                    TokenKind::Array
                };
                let parent = open.last().copied();
                push(&mut tokens, kind, pos, pos, parent);
                open.push(tokens.len() - 1);
                pos += 1;
            }
            b'}' | b']' => {
                let expected = if bytes[pos] == b'}' {
                    TokenKind::Object
                } else {
                    TokenKind::Array
                };
                let Some(idx) = open.pop() else {
                    return Err(ParseError::Malformed(format!(
                        "unexpected '{}' at offset {pos}",
                        bytes[pos] as char
                    )));
                };
                if tokens[idx].kind != expected {
                    return Err(ParseError::Malformed(format!(
                        "mismatched '{}' at offset {pos}",
                        bytes[pos] as char
                    )));
                }
                tokens[idx].end = pos + 1;
                pos += 1;
            }
            b'"' => {
                let start = pos + 1;
                let end = scan_string(bytes, start).ok_or_else(|| {
                    ParseError::Malformed(format!("unterminated string at offset {pos}"))
                })?;
                push(&mut tokens, TokenKind::String, start, end, open.last().copied());
                pos = end + 1;
            }
            b':' => {
                let in_object = open
                    .last()
                    .is_some_and(|&idx| tokens[idx].kind == TokenKind::Object);
                match tokens.last_mut() {
                    Some(last) if in_object && last.kind == TokenKind::String && !last.is_key => {
                        last.is_key = true;
                    }
                    _ => {
                        return Err(ParseError::Malformed(format!(
                            "unexpected ':' at offset {pos}"
                        )));
                    }
                }
                pos += 1;
            }
            b',' | b' ' | b'\t' | b'\r' | b'\n' => pos += 1,
            _ => {
                let start = pos;
                while pos < bytes.len() && !is_delimiter(bytes[pos]) {
                    pos += 1;
                }
                push(&mut tokens, TokenKind::Primitive, start, pos, open.last().copied());
            }
        }
    }

    if let Some(&idx) = open.last() {
        return Err(ParseError::Malformed(format!(
            "unclosed {} opened at offset {}",
            tokens[idx].kind.name(),
            tokens[idx].start
        )));
    }

    Ok(Tokens {
        text: text.to_string(),
        tokens,
    })
}

fn push(tokens: &mut Vec<Token>, kind: TokenKind, start: usize, end: usize, parent: Option<usize>) {
    if let Some(p) = parent {
        tokens[p].size += 1;
    }
    tokens.push(Token {
        kind,
        start,
        end,
        size: 0,
        parent,
        is_key: false,
    });
}

/// Returns the offset of the closing quote
fn scan_string(bytes: &[u8], mut pos: usize) -> Option<usize> {
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return Some(pos),
            _ => pos += 1,
        }
    }
    None
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b',' | b':' | b']' | b'}' | b'[' | b'{' | b'"' | b' ' | b'\t' | b'\r' | b'\n'
    )
}

impl Tokens {
    /// All tokens in document order
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the document produced no tokens
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token behind a reference
    pub fn get(&self, token: TokenRef) -> Option<&Token> {
        self.tokens.get(token.0)
    }

    /// Raw source text of a token
    pub fn text(&self, token: TokenRef) -> &str {
        self.tokens
            .get(token.0)
            .and_then(|t| self.text.get(t.start..t.end))
            .unwrap_or("")
    }

    /// Value token immediately following the key `key`
    ///
    /// Matching is exact and case-sensitive.
    pub fn find_value(&self, key: &str) -> Option<TokenRef> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_key)
            .find(|(idx, _)| self.text(TokenRef(*idx)) == key)
            .map(|(idx, _)| TokenRef(idx + 1))
            .filter(|value| value.0 < self.tokens.len())
    }

    /// Elements of an array token as strings with structural characters stripped
    pub fn array_as_strings(&self, array: TokenRef) -> Result<Vec<String>, ParseError> {
        let token = self
            .get(array)
            .ok_or_else(|| ParseError::Malformed(format!("no token at index {}", array.0)))?;
        if token.kind != TokenKind::Array {
            return Err(ParseError::UnexpectedKind {
                expected: TokenKind::Array.name(),
                found: token.kind.name(),
            });
        }

        let elements = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.parent == Some(array.0))
            .map(|(idx, _)| {
                self.text(TokenRef(idx))
                    .chars()
                    .filter(|c| !STRIPPED.contains(c))
                    .collect()
            })
            .collect();
        Ok(elements)
    }
}
