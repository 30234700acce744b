//! Core error types

use thiserror::Error;

/// Errors raised by the core audio types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
