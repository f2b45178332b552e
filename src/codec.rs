//! TCL command grammar and reply parsing
//!
//! Formats the textual commands the OpenOCD TCL server understands and
//! parses its replies into typed values. Pure string handling, no I/O.

use std::fmt;

use crate::error::{Result, RpcError};

/// Byte width of one addressable unit in a block transfer.
///
/// OpenOCD's `mem2array`/`array2mem` accept 1, 2 or 4; any other width is
/// rejected at conversion time, before a command is formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordLen {
    Byte,
    Half,
    Word,
}

impl WordLen {
    pub fn bytes(self) -> u8 {
        match self {
            WordLen::Byte => 1,
            WordLen::Half => 2,
            WordLen::Word => 4,
        }
    }
}

impl TryFrom<u8> for WordLen {
    type Error = RpcError;

    fn try_from(width: u8) -> std::result::Result<Self, RpcError> {
        match width {
            1 => Ok(WordLen::Byte),
            2 => Ok(WordLen::Half),
            4 => Ok(WordLen::Word),
            other => Err(RpcError::InvalidWordLen(other)),
        }
    }
}

impl fmt::Display for WordLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// A scalar word value; absent when the server returned an incomplete reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexWord(Option<u32>);

impl HexWord {
    pub const ABSENT: HexWord = HexWord(None);

    pub fn new(value: u32) -> Self {
        HexWord(Some(value))
    }

    pub fn value(self) -> Option<u32> {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0.is_none()
    }
}

impl From<u32> for HexWord {
    fn from(value: u32) -> Self {
        HexWord::new(value)
    }
}

impl fmt::Display for HexWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hexify(self.0))
    }
}

/// Render a scalar for display: zero-padded 8-digit hex, or the absent marker.
pub fn hexify(value: Option<u32>) -> String {
    match value {
        Some(v) => format!("0x{:08x}", v),
        None => "<None>".to_string(),
    }
}

pub fn scalar_read_command(address: u32) -> String {
    format!("ocd_mdw 0x{:x}", address)
}

pub fn scalar_write_command(address: u32, value: u32) -> String {
    format!("mww 0x{:x} 0x{:x}", address, value)
}

pub fn array_unset_command(name: &str) -> String {
    format!("array unset {}", name)
}

pub fn mem_to_array_command(name: &str, word_len: WordLen, address: u32, count: usize) -> String {
    format!("mem2array {} {} 0x{:x} {}", name, word_len, address, count)
}

pub fn array_echo_command(name: &str) -> String {
    format!("ocd_echo ${}", name)
}

pub fn array_set_command(name: &str, data: &[u32]) -> String {
    let pairs: Vec<String> = data
        .iter()
        .enumerate()
        .map(|(index, value)| format!("{} 0x{:x}", index, value))
        .collect();
    format!("array set {} {{ {} }}", name, pairs.join(" "))
}

pub fn array_to_mem_command(name: &str, word_len: WordLen, address: u32, count: usize) -> String {
    format!("array2mem {} {} 0x{:x} {}", name, word_len, address, count)
}

/// Parse one hex token with explicit base 16. An optional `0x`/`0X` prefix
/// and surrounding whitespace are tolerated; the radix is never autodetected.
pub fn parse_hex_word(token: &str) -> Result<u32> {
    let token = token.trim();
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16)
        .map_err(|e| RpcError::Protocol(format!("invalid hex value '{}': {}", token, e)))
}

/// Parse a sequence of hex tokens, each with explicit base 16, in order.
pub fn parse_hex_words<'a, I>(tokens: I) -> Result<Vec<u32>>
where
    I: IntoIterator<Item = &'a str>,
{
    tokens.into_iter().map(parse_hex_word).collect()
}

/// Parse a scalar reply of the shape `<label>: 0xNNNNNNNN`.
///
/// The value is the text after the first colon-space separator; a reply with
/// fewer than two such fields means the server returned no data.
pub fn parse_scalar_reply(reply: &str) -> Result<HexWord> {
    match reply.split(": ").nth(1) {
        Some(value) => parse_hex_word(value).map(HexWord::new),
        None => Ok(HexWord::ABSENT),
    }
}

/// Parse an array echo reply: flat whitespace-separated `index value` pairs,
/// values in decimal, in ascending index order.
pub fn parse_array_echo(reply: &str) -> Result<Vec<u32>> {
    let tokens: Vec<&str> = reply.split_whitespace().collect();
    if tokens.len() % 2 != 0 {
        return Err(RpcError::Protocol(format!(
            "array echo has an odd token count ({})",
            tokens.len()
        )));
    }
    tokens
        .chunks(2)
        .map(|pair| {
            pair[1]
                .parse::<u32>()
                .map_err(|e| RpcError::Protocol(format!("invalid array value '{}': {}", pair[1], e)))
        })
        .collect()
}
