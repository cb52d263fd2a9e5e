//! Delimited text encoding: `token<sep>token<sep>...token<block sep>` per record.
//!
//! Lists are preceded by their element count token. With `collapse_white_spaces`, tokens are
//! trimmed and whitespace runs following a separator are skipped, so `"1,  2 \n"` and `"1,2\n"`
//! decode the same way.

use std::io::BufRead;

use crate::{
    codec::{AtomReader, AtomWriter},
    component::{Component, DataPath},
    encoding::TextEncoding,
    error::Error,
    types::{DataType, Value},
};

/// Longest token the decoder buffers.
pub const MAX_TOKEN_LEN: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenEnd {
    Token,
    Block,
    Eof,
}

pub(crate) struct TextDecoder<'a> {
    input: &'a mut dyn BufRead,
    encoding: &'a TextEncoding,
    token: Vec<u8>,
    /// How the last token of the current record ended, `None` before the first one.
    last_end: Option<TokenEnd>,
    /// The last token ran past [`MAX_TOKEN_LEN`] and only its tail was kept.
    oversized: bool,
}

impl<'a> TextDecoder<'a> {
    pub fn new(input: &'a mut dyn BufRead, encoding: &'a TextEncoding) -> Self {
        TextDecoder {
            input,
            encoding,
            token: Vec::with_capacity(32),
            last_end: None,
            oversized: false,
        }
    }

    fn peek_byte(&mut self) -> Result<Option<u8>, Error> {
        Ok(self.input.fill_buf()?.first().copied())
    }

    fn next_byte(&mut self) -> Result<Option<u8>, Error> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.input.consume(1);
        }
        Ok(byte)
    }

    /// True when only whitespace (in collapse mode) or nothing is left.
    pub fn at_end(&mut self) -> Result<bool, Error> {
        if self.encoding.collapse_white_spaces {
            while let Some(b) = self.peek_byte()? {
                if !b.is_ascii_whitespace() {
                    return Ok(false);
                }
                self.input.consume(1);
            }
            return Ok(true);
        }
        Ok(self.peek_byte()?.is_none())
    }

    fn next_token(&mut self) -> Result<TokenEnd, Error> {
        let encoding = self.encoding;
        let token_sep = encoding.token_separator.as_bytes();
        let block_sep = encoding.block_separator.as_bytes();
        let tail = token_sep.len().max(block_sep.len());
        self.token.clear();
        self.oversized = false;
        let mut end = TokenEnd::Eof;
        while let Some(byte) = self.next_byte()? {
            if self.token.len() >= MAX_TOKEN_LEN {
                self.oversized = true;
                self.token.drain(..self.token.len() - tail);
            }
            self.token.push(byte);
            if self.token.ends_with(block_sep) {
                self.token.truncate(self.token.len() - block_sep.len());
                end = TokenEnd::Block;
                break;
            }
            if self.token.ends_with(token_sep) {
                self.token.truncate(self.token.len() - token_sep.len());
                end = TokenEnd::Token;
                break;
            }
        }
        if encoding.collapse_white_spaces {
            let trimmed = self.token.trim_ascii();
            if trimmed.len() != self.token.len() {
                self.token = trimmed.to_vec();
            }
            if end == TokenEnd::Token {
                end = self.skip_white_spaces(block_sep)?;
            }
        }
        self.last_end = Some(end);
        Ok(end)
    }

    /// Skips whitespace after a token separator, stopping right after a block separator made
    /// of whitespace.
    fn skip_white_spaces(&mut self, block_sep: &[u8]) -> Result<TokenEnd, Error> {
        let mut skipped = vec![];
        while let Some(b) = self.peek_byte()? {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.input.consume(1);
            skipped.push(b);
            if skipped.ends_with(block_sep) {
                return Ok(TokenEnd::Block);
            }
        }
        Ok(TokenEnd::Token)
    }

    fn token_str(&self, path: &DataPath) -> Result<&str, Error> {
        std::str::from_utf8(&self.token).map_err(|_| Error::TokenFormat {
            path: path.to_string(),
            token: String::from_utf8_lossy(&self.token).into_owned(),
            expected: "utf-8 text".to_string(),
        })
    }

    fn read_token(&mut self, path: &DataPath) -> Result<&str, Error> {
        match self.last_end {
            Some(TokenEnd::Block) => {
                return Err(Error::TokenFormat {
                    path: path.to_string(),
                    token: String::new(),
                    expected: "more tokens before the block separator".to_string(),
                });
            }
            Some(TokenEnd::Eof) => {
                return Err(Error::TokenFormat {
                    path: path.to_string(),
                    token: String::new(),
                    expected: "more tokens before the end of the stream".to_string(),
                });
            }
            _ => {}
        }
        let end = self.next_token()?;
        if self.oversized {
            return Err(Error::TokenFormat {
                path: path.to_string(),
                token: String::new(),
                expected: format!("a token of at most {MAX_TOKEN_LEN} bytes"),
            });
        }
        if end == TokenEnd::Eof && self.token.is_empty() {
            return Err(Error::TokenFormat {
                path: path.to_string(),
                token: String::new(),
                expected: "a token before the end of the stream".to_string(),
            });
        }
        self.token_str(path)
    }

    /// Checks that the record ended with its last token.
    pub fn finish_record(&mut self, root: &str) -> Result<(), Error> {
        match self.last_end {
            Some(TokenEnd::Block | TokenEnd::Eof) => Ok(()),
            Some(TokenEnd::Token) => {
                let path = DataPath::root();
                self.next_token()?;
                let token = self.token_str(&path)?.to_string();
                Err(Error::TokenFormat {
                    path: root.to_string(),
                    token,
                    expected: "block separator".to_string(),
                })
            }
            None => {
                let end = self.next_token()?;
                if self.token.is_empty() && end != TokenEnd::Token {
                    Ok(())
                } else {
                    Err(Error::TokenFormat {
                        path: root.to_string(),
                        token: String::from_utf8_lossy(&self.token).into_owned(),
                        expected: "block separator".to_string(),
                    })
                }
            }
        }
    }

    /// Skips the rest of a failed record, up to and including its block separator.
    pub fn recover(&mut self) -> Result<(), Error> {
        while !matches!(self.last_end, Some(TokenEnd::Block | TokenEnd::Eof)) {
            self.next_token()?;
        }
        Ok(())
    }
}

impl AtomReader for TextDecoder<'_> {
    fn read_atom(
        &mut self,
        _comp: &Component,
        ty: DataType,
        path: &DataPath,
    ) -> Result<Value, Error> {
        let decimal = self.encoding.decimal_separator;
        let token = self.read_token(path)?;
        Value::parse_token(ty, token, decimal).ok_or_else(|| Error::TokenFormat {
            path: path.to_string(),
            token: token.to_string(),
            expected: ty.as_str().to_string(),
        })
    }

    fn read_len(&mut self, _list: &Component, path: &DataPath) -> Result<usize, Error> {
        let token = self.read_token(path)?;
        token.parse().map_err(|_| Error::TokenFormat {
            path: path.to_string(),
            token: token.to_string(),
            expected: "element count".to_string(),
        })
    }
}

/// Encodes one record into a string.
pub(crate) struct TextEncoder<'a> {
    encoding: &'a TextEncoding,
    out: String,
}

impl<'a> TextEncoder<'a> {
    pub fn new(encoding: &'a TextEncoding) -> Self {
        TextEncoder {
            encoding,
            out: String::with_capacity(64),
        }
    }

    /// Swaps the trailing token separator for the block separator.
    pub fn finish(mut self) -> String {
        if self.out.ends_with(&self.encoding.token_separator) {
            self.out
                .truncate(self.out.len() - self.encoding.token_separator.len());
        }
        self.out.push_str(&self.encoding.block_separator);
        self.out
    }

    fn push_token(&mut self, start: usize, path: &DataPath) -> Result<(), Error> {
        let token = &self.out[start..];
        let encoding = self.encoding;
        if ends_early(encoding, token, &encoding.token_separator)
            || ends_early(encoding, token, &encoding.block_separator)
        {
            return Err(Error::TokenFormat {
                path: path.to_string(),
                token: token.to_string(),
                expected: "a value without separators".to_string(),
            });
        }
        self.out.push_str(&self.encoding.token_separator);
        Ok(())
    }
}

/// True when a decoder reading `token` then `sep` would find a separator before the end of
/// `sep`, including one straddling the boundary.
fn ends_early(encoding: &TextEncoding, token: &str, sep: &str) -> bool {
    let token_sep = encoding.token_separator.as_bytes();
    let block_sep = encoding.block_separator.as_bytes();
    let mut bytes = Vec::with_capacity(token.len() + sep.len());
    bytes.extend_from_slice(token.as_bytes());
    bytes.extend_from_slice(sep.as_bytes());
    (1..bytes.len()).any(|p| bytes[..p].ends_with(token_sep) || bytes[..p].ends_with(block_sep))
}

impl AtomWriter for TextEncoder<'_> {
    fn write_atom(
        &mut self,
        _comp: &Component,
        value: &Value,
        path: &DataPath,
    ) -> Result<(), Error> {
        let start = self.out.len();
        value.format_token(self.encoding.decimal_separator, &mut self.out);
        self.push_token(start, path)
    }

    fn write_len(&mut self, _list: &Component, len: usize, path: &DataPath) -> Result<(), Error> {
        let start = self.out.len();
        self.out.push_str(&len.to_string());
        self.push_token(start, path)
    }
}
