//! Errors for the [`region`](crate::region) copy engine.
//!
//! Grounded on `asterinas-asterinas/kernel/libs/cpio-decoder/src/error.rs`:
//! a plain enum with a manual `Display`/`std::error::Error` impl. Nothing
//! in the retrieval pack this close to the domain pulls in `thiserror` or
//! `anyhow`, so a hand-rolled enum is the idiom actually in evidence.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The requested offset (and length) fall outside the region.
    OutOfBounds { offset: usize, len: usize, region_len: usize },
    /// The copy could only be partially completed: the source had fewer
    /// bytes remaining than the destination requested.
    ShortCopy { requested: usize, copied: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBounds { offset, len, region_len } => write!(
                f,
                "range [{offset}, {}) is out of bounds for a region of length {region_len}",
                offset + len
            ),
            Error::ShortCopy { requested, copied } => {
                write!(f, "short copy: requested {requested} bytes, only {copied} available")
            }
        }
    }
}

impl std::error::Error for Error {}
