// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the simulator's subsystems.

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Per-connection I/O error for both the LAS and LIS sides.
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Frame/record-level decode errors for the LAS and LIS wire formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Frame shorter than the minimum valid LAS frame length.
    FrameTooShort,
    /// `msg_len` header field did not match the actual frame length.
    LengthMismatch { declared: usize, actual: usize },
    /// Recomputed checksum did not match the frame's trailing checksum bytes.
    ChecksumMismatch,
    /// Frame was missing its STX/ETX delimiters.
    MissingDelimiter,
    /// Body too short for the message type being parsed.
    BodyTooShort,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameTooShort => write!(f, "frame shorter than minimum length"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared length {} != actual length {}", declared, actual)
            }
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::MissingDelimiter => write!(f, "missing STX/ETX delimiter"),
            Self::BodyTooShort => write!(f, "message body too short"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Top-level server lifecycle errors.
#[derive(Debug)]
pub enum ServerError {
    Config(ConfigError),
    Bind(std::io::Error),
    AlreadyRunning,
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::Bind(e) => write!(f, "failed to bind listener: {}", e),
            Self::AlreadyRunning => write!(f, "server is already running"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
