use crate::error::{AppResult, IndiError};
use crate::number_format::number_format;

use super::{BlobData, PropertyState, SwitchState, VectorKind};

/// Maximum length in bytes of names, labels, groups and BLOB formats.
pub const MAX_NAME_LEN: usize = 64;

pub(crate) fn check_len(field: &'static str, value: &str) -> AppResult<()> {
    if value.len() > MAX_NAME_LEN {
        return Err(IndiError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// One element of a property vector: a `{name, label}` header plus a payload.
///
/// Members are created standalone and handed to
/// [`PropertyVectorBuilder::build`](super::PropertyVectorBuilder::build), which
/// takes ownership. There is no link back to the owning vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Member<T> {
    name: String,
    label: String,
    value: T,
}

impl<T> Member<T> {
    /// Create a member with an arbitrary payload. An empty label defaults to the name.
    pub fn with_value(name: impl Into<String>, label: impl Into<String>, value: T) -> AppResult<Self> {
        let name = name.into();
        let mut label = label.into();
        check_len("member name", &name)?;
        check_len("member label", &label)?;
        if name.is_empty() {
            return Err(IndiError::Malformed("member name is empty".into()));
        }
        if label.is_empty() {
            label.clone_from(&name);
        }
        Ok(Self { name, label, value })
    }

    /// Member name, unique within its vector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current payload.
    pub fn value(&self) -> &T {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Payload of a Number member.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberValue {
    /// printf-style or `%w.fm` sexagesimal display format.
    pub format: String,
    /// Lower bound (advisory, never enforced here).
    pub min: f64,
    /// Upper bound (advisory, never enforced here).
    pub max: f64,
    /// Step hint for clients. Zero means none.
    pub step: f64,
    /// Current value.
    pub value: f64,
}

/// A Number member.
pub type NumberMember = Member<NumberValue>;
/// A Text member. `None` is rendered as empty text.
pub type TextMember = Member<Option<String>>;
/// A Switch member.
pub type SwitchMember = Member<SwitchState>;
/// A Light member.
pub type LightMember = Member<PropertyState>;
/// A BLOB member.
pub type BlobMember = Member<BlobValue>;

impl Member<NumberValue> {
    /// Create a Number member.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        format: impl Into<String>,
        min: f64,
        max: f64,
        step: f64,
        value: f64,
    ) -> AppResult<Self> {
        let format = format.into();
        check_len("number format", &format)?;
        Self::with_value(
            name,
            label,
            NumberValue {
                format,
                min,
                max,
                step,
                value,
            },
        )
    }

    /// The value rendered with the member's display format.
    pub fn formatted(&self) -> String {
        number_format(self.value.value, &self.value.format)
    }
}

impl Member<Option<String>> {
    /// Create a Text member.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        text: Option<impl Into<String>>,
    ) -> AppResult<Self> {
        Self::with_value(name, label, text.map(Into::into))
    }

    /// Text content, empty when unset.
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

impl Member<SwitchState> {
    /// Create a Switch member.
    pub fn new(name: impl Into<String>, label: impl Into<String>, state: SwitchState) -> AppResult<Self> {
        Self::with_value(name, label, state)
    }

    /// Whether the switch is On.
    pub fn is_on(&self) -> bool {
        self.value == SwitchState::On
    }
}

impl Member<PropertyState> {
    /// Create a Light member.
    pub fn new(name: impl Into<String>, label: impl Into<String>, state: PropertyState) -> AppResult<Self> {
        Self::with_value(name, label, state)
    }
}

/// Payload of a BLOB member.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobValue {
    /// Free-form format tag such as `.fits` or `.fits.z`.
    pub format: String,
    /// Uncompressed byte count.
    pub size: usize,
    /// Payload bytes. `None` (or an empty payload) signals a state change only.
    pub data: Option<BlobData>,
}

impl BlobValue {
    /// A payload with the given format. `size` is taken from the data.
    pub fn new(format: impl Into<String>, data: BlobData) -> AppResult<Self> {
        let format = format.into();
        check_len("blob format", &format)?;
        Ok(Self {
            format,
            size: data.len(),
            data: Some(data),
        })
    }

    /// Bytes actually carried.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, BlobData::len)
    }

    /// Whether there is nothing to transfer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Member<BlobValue> {
    /// Create an empty BLOB member.
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> AppResult<Self> {
        Self::with_value(name, label, BlobValue::default())
    }
}

/// A new value for one member, as passed to [`PropertyVector::update`](super::PropertyVector::update).
#[derive(Debug, Clone, PartialEq)]
pub enum MemberValue {
    /// Number value.
    Number(f64),
    /// Text content.
    Text(Option<String>),
    /// Switch state.
    Switch(SwitchState),
    /// Light state.
    Light(PropertyState),
    /// BLOB payload.
    Blob(BlobValue),
}

impl MemberValue {
    /// Kind of vector this value belongs to.
    pub fn kind(&self) -> VectorKind {
        match self {
            MemberValue::Number(_) => VectorKind::Number,
            MemberValue::Text(_) => VectorKind::Text,
            MemberValue::Switch(_) => VectorKind::Switch,
            MemberValue::Light(_) => VectorKind::Light,
            MemberValue::Blob(_) => VectorKind::Blob,
        }
    }
}
