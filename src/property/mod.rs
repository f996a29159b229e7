//! Typed property vectors and their members.
//!
//! A [`PropertyVector`] is owned by one device, uniquely named within it, and holds
//! an ordered, fixed-size sequence of members of a single kind. Members share a
//! `{name, label}` header ([`Member<T>`]) and carry a kind-specific payload:
//!
//! - Number: [`NumberValue`] (format, min, max, step, value)
//! - Text: `Option<String>`
//! - Switch: [`SwitchState`], with a vector-level [`SwitchRule`]
//! - Light: [`PropertyState`]
//! - BLOB: [`BlobValue`] (format, size, payload)
//!
//! Nothing in this module performs wire I/O; mutations only change memory. The
//! driver publishes a vector explicitly through [`crate::driver::DriverIo`].

mod blob;
mod member;
mod vector;

pub use blob::{BlobData, SharedBlob};
pub use member::{
    BlobMember, BlobValue, LightMember, Member, MemberValue, NumberMember, NumberValue,
    SwitchMember, TextMember, MAX_NAME_LEN,
};
pub use vector::{Lifecycle, Members, PropertyVector, PropertyVectorBuilder};

use std::fmt;
use std::str::FromStr;

use crate::error::IndiError;

/// State of a vector, or of a Light member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropertyState {
    /// Nothing happening.
    #[default]
    Idle,
    /// Last operation succeeded.
    Ok,
    /// Operation in progress.
    Busy,
    /// Last operation failed.
    Alert,
}

impl PropertyState {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl FromStr for PropertyState {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            other => Err(IndiError::Malformed(format!("invalid state '{other}'"))),
        }
    }
}

/// Client access to a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Permission {
    /// Clients may only read.
    #[default]
    ReadOnly,
    /// Clients may only write.
    WriteOnly,
    /// Clients may read and write.
    ReadWrite,
}

impl Permission {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        }
    }
}

impl FromStr for Permission {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ro" => Ok(Permission::ReadOnly),
            "wo" => Ok(Permission::WriteOnly),
            "rw" => Ok(Permission::ReadWrite),
            other => Err(IndiError::Malformed(format!("invalid permission '{other}'"))),
        }
    }
}

/// State of a Switch member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwitchState {
    /// Released.
    #[default]
    Off,
    /// Pressed.
    On,
}

impl SwitchState {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchState::Off => "Off",
            SwitchState::On => "On",
        }
    }
}

impl FromStr for SwitchState {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "On" => Ok(SwitchState::On),
            "Off" => Ok(SwitchState::Off),
            other => Err(IndiError::Malformed(format!("invalid switch state '{other}'"))),
        }
    }
}

/// Intended cardinality of On members in a Switch vector.
///
/// `OneOfMany` is caller discipline: [`PropertyVector::update`] does not turn other
/// members Off. `AtMostOne` is checked: an update that would leave two members On
/// is rejected as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwitchRule {
    /// Exactly one member On.
    #[default]
    OneOfMany,
    /// Zero or one member On.
    AtMostOne,
    /// Unconstrained.
    AnyOfMany,
}

impl SwitchRule {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }
}

impl FromStr for SwitchRule {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OneOfMany" => Ok(SwitchRule::OneOfMany),
            "AtMostOne" => Ok(SwitchRule::AtMostOne),
            "AnyOfMany" => Ok(SwitchRule::AnyOfMany),
            other => Err(IndiError::Malformed(format!("invalid switch rule '{other}'"))),
        }
    }
}

/// Whether a recipient wants BLOB payloads (`enableBLOB` content).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlobHandling {
    /// No BLOBs, only other traffic.
    #[default]
    Never,
    /// BLOBs as well as other traffic.
    Also,
    /// Only BLOBs.
    Only,
}

impl BlobHandling {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            BlobHandling::Never => "Never",
            BlobHandling::Also => "Also",
            BlobHandling::Only => "Only",
        }
    }
}

impl FromStr for BlobHandling {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Never" => Ok(BlobHandling::Never),
            "Also" => Ok(BlobHandling::Also),
            "Only" => Ok(BlobHandling::Only),
            other => Err(IndiError::Malformed(format!("invalid BLOB mode '{other}'"))),
        }
    }
}

/// Kind tag of a vector and its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    /// Numbers.
    Number,
    /// Text.
    Text,
    /// Switches.
    Switch,
    /// Lights.
    Light,
    /// Binary large objects.
    Blob,
}

impl VectorKind {
    /// Element-name stem used on the wire (`defNumberVector`, `oneNumber`, ...).
    pub fn stem(self) -> &'static str {
        match self {
            VectorKind::Number => "Number",
            VectorKind::Text => "Text",
            VectorKind::Switch => "Switch",
            VectorKind::Light => "Light",
            VectorKind::Blob => "BLOB",
        }
    }

    /// Recognise a vector element stem.
    pub fn from_stem(stem: &str) -> Option<Self> {
        match stem {
            "Number" => Some(VectorKind::Number),
            "Text" => Some(VectorKind::Text),
            "Switch" => Some(VectorKind::Switch),
            "Light" => Some(VectorKind::Light),
            "BLOB" => Some(VectorKind::Blob),
            _ => None,
        }
    }

    /// Lower-case name for diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            VectorKind::Number => "number",
            VectorKind::Text => "text",
            VectorKind::Switch => "switch",
            VectorKind::Light => "light",
            VectorKind::Blob => "blob",
        }
    }
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}
