//! Error module for the ifnet library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum SimError {
    /// Error for invalid parameters, e.g., malformed or size-mismatched matrices, self-edges or negative delays.
    InvalidParameters(String),
    /// Error for a cascade that did not settle within the allowed number of resolving passes.
    CascadeOverflow {
        time: f64,
        iterations: usize,
    },
    /// Error while parsing a delimited-text or JSON file.
    ParseError(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::InvalidParameters(e) => write!(f, "Invalid parameters: {}", e),
            SimError::CascadeOverflow { time, iterations } => write!(
                f,
                "Spike cascade starting at t = {} did not settle after {} resolving passes",
                time, iterations
            ),
            SimError::ParseError(e) => write!(f, "Parse error: {}", e),
            SimError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SimError {}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::ParseError(e.to_string())
    }
}
