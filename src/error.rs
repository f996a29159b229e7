//! Custom error types for the protocol layer.
//!
//! This module defines the primary error type, `IndiError`, shared by the property
//! model, the wire codec and the driver transport. Using the `thiserror` crate, it
//! provides a centralized way to report everything from a malformed wire element to
//! a failed `sendmsg` on the hub socket.
//!
//! ## Error Hierarchy
//!
//! Errors fall into two groups:
//!
//! 1. **Recoverable** - `NotFound`, `UnknownMember`, `Format`, `KindMismatch`,
//!    `Malformed`, `Xml`, `Base64`, ...
//!    - Returned to the caller, who decides whether to reject the whole update,
//!      flip the property to Alert, or ignore the message.
//!    - Never leave a vector half-updated.
//!
//! 2. **Fatal** - `BufferGrowth`, `ShortWrite`, `TooManyAttachments`, `Transmit`
//!    - The hub connection is assumed reliable and a partially written protocol
//!      message cannot be resumed.
//!    - `DriverIo` logs these and terminates the process; lower layers return them
//!      so tests can observe them. See [`IndiError::is_fatal`].
//!
//! By using `#[from]`, `IndiError` can be created from the underlying error types,
//! simplifying error handling throughout the crate with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, IndiError>;

/// Primary error type for property, wire and transport operations.
#[derive(Error, Debug)]
pub enum IndiError {
    /// An `update()` named a member the vector does not have.
    #[error("Member '{member}' not found in property '{property}'")]
    NotFound {
        /// Vector name.
        property: String,
        /// Offending member name.
        member: String,
    },

    /// A wire message named a member the local vector does not have.
    #[error("Unknown member '{member}' in wire message for '{device}.{property}'")]
    UnknownMember {
        /// Device of the vector the message matched.
        device: String,
        /// Vector name.
        property: String,
        /// Offending member name.
        member: String,
    },

    /// Numeric or sexagesimal text could not be parsed.
    #[error("Format error: cannot parse '{0}' as a number")]
    Format(String),

    /// A value of one kind was supplied to a vector of another kind.
    #[error("Kind mismatch: expected {expected} value, got {actual}")]
    KindMismatch {
        /// Kind of the vector.
        expected: &'static str,
        /// Kind of the offending value.
        actual: &'static str,
    },

    /// Two members of one vector share a name.
    #[error("Duplicate member '{member}' in property '{property}'")]
    DuplicateMember {
        /// Vector name.
        property: String,
        /// Repeated member name.
        member: String,
    },

    /// A bounded identifier field is longer than the protocol allows.
    #[error("Field '{field}' is {len} bytes long (max {max})")]
    FieldTooLong {
        /// Which field (device, name, label, ...).
        field: &'static str,
        /// Actual length in bytes.
        len: usize,
        /// Maximum length in bytes.
        max: usize,
    },

    /// An update to an `AtMostOne` switch vector would leave several members On.
    #[error("Update would turn on more than one switch in '{property}'")]
    RuleViolation {
        /// Vector name.
        property: String,
    },

    /// The vector was deleted and can no longer be mutated or published.
    #[error("Property '{device}.{property}' has been deleted")]
    Deleted {
        /// Device of the vector.
        device: String,
        /// Vector name.
        property: String,
    },

    /// A wire element is structurally invalid (missing attribute, bad state, ...).
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The wire text is not well-formed markup.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Inline BLOB content is not valid base64.
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Creating or mapping a shared-memory BLOB buffer failed.
    #[error("Shared memory error: {0}")]
    SharedMemory(std::io::Error),

    /// The transport cannot carry out-of-band attachments.
    #[error("Transport does not support payload attachments")]
    AttachmentsUnsupported,

    /// Growing the outgoing message buffer failed.
    #[error("Failed to grow output buffer to {requested} bytes")]
    BufferGrowth {
        /// Capacity that could not be reserved.
        requested: usize,
    },

    /// The kernel accepted fewer bytes than the message holds.
    #[error("Short write: sent {sent} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually transmitted.
        sent: usize,
        /// Bytes in the message.
        expected: usize,
    },

    /// More attachments than one message may carry.
    #[error("Too many attachments in one message (max {max})")]
    TooManyAttachments {
        /// Per-message descriptor limit.
        max: usize,
    },

    /// Writing to the outbound channel failed.
    #[error("Transmission error: {0}")]
    Transmit(std::io::Error),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndiError {
    /// Whether this error must end the driver process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndiError::BufferGrowth { .. }
                | IndiError::ShortWrite { .. }
                | IndiError::TooManyAttachments { .. }
                | IndiError::Transmit(_)
        )
    }
}

impl From<figment::Error> for IndiError {
    fn from(value: figment::Error) -> Self {
        IndiError::Config(value.to_string())
    }
}
