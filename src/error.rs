//! Errors raised while collecting a snapshot.
//!
//! Every kind stays distinguishable so the caller can decide, for instance,
//! whether an empty metrics window is a soft warning or a hard failure.

use std::error;
use std::fmt;

/// Collection error.
#[derive(Debug)]
pub enum Error {
    /// Network or authentication failure reaching the metrics API or the
    /// database.
    Transport(String),
    /// The metrics API answered but the window held no usable datapoints.
    NoData,
    /// The database rejected or failed to execute the statistics query.
    Query(String),
    /// A statistics row could not be coerced to the expected numeric shape.
    Decode(String),
}

impl Error {
    /// True when the error is the soft "no datapoints" condition.
    pub fn is_no_data(&self) -> bool {
        match *self {
            Error::NoData => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Transport(ref msg) => write!(f, "transport error: {}", msg),
            Error::NoData => write!(f, "fetched no datapoints"),
            Error::Query(ref msg) => write!(f, "query error: {}", msg),
            Error::Decode(ref msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_message() {
        assert_eq!("fetched no datapoints", format!("{}", Error::NoData));
        assert!(Error::NoData.is_no_data());
        assert!(!Error::Transport("reset".to_string()).is_no_data());
    }
}
