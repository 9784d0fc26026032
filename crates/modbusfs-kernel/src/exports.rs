//! Control-file and register-file write grammar.
//!
//! ```text
//! /exports             <address 1-254> <octal mode>
//! /<address>/exports   <index 0-65535> <octal mode>
//! /<address>/<index>   <hex value 0-ffff>
//! ```
//!
//! Payloads are trimmed of surrounding whitespace so `echo` works as a client.
//! Parsing is all-or-nothing: an `Err` means nothing was declared or written.

use crate::error::{FsError, FsResult};
use crate::registry::{REGISTER_MODE_MASK, SLAVE_MODE_MASK};

/// Lowest declarable slave address.
pub const MIN_SLAVE_ADDRESS: u32 = 1;

/// Highest declarable slave address.
pub const MAX_SLAVE_ADDRESS: u32 = 254;

/// A parsed `/exports` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveDecl {
    pub address: u8,
    pub mode: u32,
}

/// A parsed `/<address>/exports` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDecl {
    pub index: u16,
    pub mode: u32,
}

pub fn parse_slave_decl(buf: &[u8]) -> FsResult<SlaveDecl> {
    let (address, mode) = parse_pair(buf)?;
    validate_slave(address, mode)
}

pub fn parse_register_decl(buf: &[u8]) -> FsResult<RegisterDecl> {
    let (index, mode) = parse_pair(buf)?;
    validate_register(index, mode)
}

/// Range and mask checks shared by control-file writes and preloaded exports.
pub fn validate_slave(address: u32, mode: u32) -> FsResult<SlaveDecl> {
    if !(MIN_SLAVE_ADDRESS..=MAX_SLAVE_ADDRESS).contains(&address) {
        return Err(FsError::invalid_argument(format!(
            "slave address {address} outside {MIN_SLAVE_ADDRESS}-{MAX_SLAVE_ADDRESS}"
        )));
    }
    if mode & SLAVE_MODE_MASK != mode {
        return Err(FsError::invalid_argument(format!("slave mode {mode:o}")));
    }
    Ok(SlaveDecl {
        address: address as u8,
        mode,
    })
}

pub fn validate_register(index: u32, mode: u32) -> FsResult<RegisterDecl> {
    let index = u16::try_from(index)
        .map_err(|_| FsError::invalid_argument(format!("register index {index}")))?;
    if mode & REGISTER_MODE_MASK != mode {
        return Err(FsError::invalid_argument(format!("register mode {mode:o}")));
    }
    Ok(RegisterDecl { index, mode })
}

/// Parse an octal permission string such as `0644` or `600`.
pub fn parse_mode(text: &str) -> FsResult<u32> {
    if text.is_empty() || !text.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(FsError::invalid_argument(format!("mode {text:?}")));
    }
    u32::from_str_radix(text, 8).map_err(|_| FsError::invalid_argument(format!("mode {text:?}")))
}

/// Parse a register value written as hexadecimal text.
pub fn parse_register_value(buf: &[u8]) -> FsResult<u16> {
    let text = payload(buf)?;
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FsError::invalid_argument(format!("register value {text:?}")));
    }
    // Parse wide so overlong values report as out of range, not as junk
    let value = u64::from_str_radix(digits, 16)
        .map_err(|_| FsError::invalid_argument(format!("register value {text:?}")))?;
    u16::try_from(value)
        .map_err(|_| FsError::invalid_argument(format!("register value {value:#x} exceeds 0xffff")))
}

/// Render a register value the way reads return it.
pub fn render_register_value(value: u16) -> String {
    format!("{value:x}")
}

fn payload(buf: &[u8]) -> FsResult<&str> {
    std::str::from_utf8(buf)
        .map(str::trim)
        .map_err(|_| FsError::invalid_argument("payload is not UTF-8"))
}

fn parse_pair(buf: &[u8]) -> FsResult<(u32, u32)> {
    let text = payload(buf)?;
    let mut tokens = text.split_whitespace();
    let (Some(number), Some(mode), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(FsError::invalid_argument(format!(
            "expected \"<number> <mode>\", got {text:?}"
        )));
    };
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FsError::invalid_argument(format!("number {number:?}")));
    }
    let number = number
        .parse()
        .map_err(|_| FsError::invalid_argument(format!("number {number:?}")))?;
    Ok((number, parse_mode(mode)?))
}
