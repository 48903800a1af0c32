//! Error taxonomy for patch setup and local assembly.
//!
//! All fallible routines in this crate return [`eyre::Result`]. Errors raised by the crate itself
//! are [`PatchError`]s wrapped in an [`eyre::Report`], so callers that need to distinguish
//! the categories can use [`eyre::Report::downcast_ref`].
use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The setup is inconsistent: unsupported integral kind, mismatched spaces, missing or
    /// malformed options and so on.
    Configuration(String),
    /// The requested configuration is well-formed, but not supported.
    Unimplemented(String),
    /// An internal invariant does not hold for the data that was provided.
    InvariantViolation(String),
}

impl PatchError {
    pub fn configuration(message: impl Into<String>) -> eyre::Report {
        eyre::Report::new(PatchError::Configuration(message.into()))
    }

    pub fn unimplemented(message: impl Into<String>) -> eyre::Report {
        eyre::Report::new(PatchError::Unimplemented(message.into()))
    }

    pub fn invariant(message: impl Into<String>) -> eyre::Report {
        eyre::Report::new(PatchError::InvariantViolation(message.into()))
    }

    /// Returns the [`PatchError`] carried by a report, if any.
    pub fn classify(report: &eyre::Report) -> Option<&PatchError> {
        report.downcast_ref::<PatchError>()
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PatchError::Configuration(_))
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, PatchError::Unimplemented(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, PatchError::InvariantViolation(_))
    }
}

impl Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            PatchError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            PatchError::Unimplemented(msg) => write!(f, "Not implemented: {}", msg),
            PatchError::InvariantViolation(msg) => write!(f, "Invariant violated: {}", msg),
        }
    }
}

impl Error for PatchError {}
