//! myna speech recognition server
//!
//! Serves streaming speech recognition over WebSocket: binary frames carry
//! 16-bit PCM, text frames carry the JSON control protocol, and results are
//! pushed back as `partial_result` / `final_result` messages.

pub mod http;
pub mod session;
pub mod state;

pub use http::create_router;
pub use session::SessionHandler;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
