//! Codec failures and the radio's own error codes.

use thiserror::Error;

use crate::constants::{
    ERR_CODE_BAD_STATE, ERR_CODE_FILE_IO_ERROR, ERR_CODE_ILLEGAL_ARG, ERR_CODE_NOT_FOUND,
    ERR_CODE_TABLE_FULL, ERR_CODE_UNSUPPORTED_CMD,
};

/// A frame could not be split off the byte stream or decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Ran out of bytes while reading a field.
    #[error("truncated frame: need {expected} bytes, have {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// Length prefix beyond what the codec buffers.
    #[error("oversized frame: {actual} bytes announced, limit is {max}")]
    FrameTooLong { max: usize, actual: usize },

    /// Leading byte is neither a reply nor a push code we know.
    #[error("unrecognised frame code 0x{0:02x}")]
    UnknownCode(u8),
}

/// Reason carried by an `ERR` reply.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareErrorCode {
    #[error("command not supported by firmware")]
    UnsupportedCommand,
    #[error("no such item")]
    NotFound,
    #[error("storage table full")]
    TableFull,
    #[error("not allowed in current state")]
    BadState,
    #[error("flash storage failure")]
    Storage,
    #[error("illegal argument")]
    IllegalArg,
    #[error("error code {0}")]
    Unknown(u8),
}

impl FirmwareErrorCode {
    /// Wire value of this code.
    pub fn code(self) -> u8 {
        match self {
            FirmwareErrorCode::UnsupportedCommand => ERR_CODE_UNSUPPORTED_CMD,
            FirmwareErrorCode::NotFound => ERR_CODE_NOT_FOUND,
            FirmwareErrorCode::TableFull => ERR_CODE_TABLE_FULL,
            FirmwareErrorCode::BadState => ERR_CODE_BAD_STATE,
            FirmwareErrorCode::Storage => ERR_CODE_FILE_IO_ERROR,
            FirmwareErrorCode::IllegalArg => ERR_CODE_ILLEGAL_ARG,
            FirmwareErrorCode::Unknown(code) => code,
        }
    }
}

impl From<u8> for FirmwareErrorCode {
    fn from(code: u8) -> Self {
        [
            FirmwareErrorCode::UnsupportedCommand,
            FirmwareErrorCode::NotFound,
            FirmwareErrorCode::TableFull,
            FirmwareErrorCode::BadState,
            FirmwareErrorCode::Storage,
            FirmwareErrorCode::IllegalArg,
        ]
        .into_iter()
        .find(|known| known.code() == code)
        .unwrap_or(FirmwareErrorCode::Unknown(code))
    }
}
