use thiserror::Error;

/// Errors produced while decoding bencode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected byte {0:#04x}")]
    UnexpectedByte(u8),

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidLength,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("trailing data after value")]
    TrailingData,
}
