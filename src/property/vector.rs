use crate::error::{AppResult, IndiError};

use super::member::check_len;
use super::{
    BlobMember, LightMember, MemberValue, NumberMember, Permission, PropertyState, SwitchMember,
    SwitchRule, SwitchState, TextMember, VectorKind,
};

/// Ordered members of a vector, all of one kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Members {
    /// Number members.
    Number(Vec<NumberMember>),
    /// Text members.
    Text(Vec<TextMember>),
    /// Switch members and the cardinality rule they follow.
    Switch {
        /// Intended number of On members.
        rule: SwitchRule,
        /// Switch members.
        members: Vec<SwitchMember>,
    },
    /// Light members.
    Light(Vec<LightMember>),
    /// BLOB members.
    Blob(Vec<BlobMember>),
}

impl Members {
    /// Kind of every member.
    pub fn kind(&self) -> VectorKind {
        match self {
            Members::Number(_) => VectorKind::Number,
            Members::Text(_) => VectorKind::Text,
            Members::Switch { .. } => VectorKind::Switch,
            Members::Light(_) => VectorKind::Light,
            Members::Blob(_) => VectorKind::Blob,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        match self {
            Members::Number(m) => m.len(),
            Members::Text(m) => m.len(),
            Members::Switch { members, .. } => members.len(),
            Members::Light(m) => m.len(),
            Members::Blob(m) => m.len(),
        }
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member names in order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Members::Number(m) => m.iter().map(|m| m.name()).collect(),
            Members::Text(m) => m.iter().map(|m| m.name()).collect(),
            Members::Switch { members, .. } => members.iter().map(|m| m.name()).collect(),
            Members::Light(m) => m.iter().map(|m| m.name()).collect(),
            Members::Blob(m) => m.iter().map(|m| m.name()).collect(),
        }
    }

    /// Member labels in order.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Members::Number(m) => m.iter().map(|m| m.label()).collect(),
            Members::Text(m) => m.iter().map(|m| m.label()).collect(),
            Members::Switch { members, .. } => members.iter().map(|m| m.label()).collect(),
            Members::Light(m) => m.iter().map(|m| m.label()).collect(),
            Members::Blob(m) => m.iter().map(|m| m.label()).collect(),
        }
    }

    /// Index of the member called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| *n == name)
    }
}

/// Where a vector is in its define/update/delete lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Built but never published.
    #[default]
    Created,
    /// A definition message has been emitted.
    Defined,
    /// Torn down. No further mutation or publication.
    Deleted,
}

/// Builder for [`PropertyVector`].
///
/// ```
/// use rust_indi::property::{Members, NumberMember, Permission, PropertyVector};
///
/// let pos = NumberMember::new("POS", "Position", "%.0f", 0.0, 100000.0, 1.0, 0.0).unwrap();
/// let axis = PropertyVector::builder("Foo", "AXIS1")
///     .with_label("Axis 1")
///     .with_group("Motion")
///     .with_perm(Permission::ReadWrite)
///     .build(Members::Number(vec![pos]))
///     .unwrap();
/// assert_eq!(axis.member_names(), vec!["POS"]);
/// ```
#[derive(Debug, Clone)]
pub struct PropertyVectorBuilder {
    device: String,
    name: String,
    label: String,
    group: String,
    perm: Permission,
    state: PropertyState,
    timeout: f64,
    timestamp: Option<String>,
}

impl PropertyVectorBuilder {
    /// Display label. Defaults to the vector name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Display group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Client permission. Ignored for Light vectors, which are always read-only.
    pub fn with_perm(mut self, perm: Permission) -> Self {
        self.perm = perm;
        self
    }

    /// Initial state.
    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }

    /// Seconds a client should expect a change to take.
    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fixed timestamp instead of the time of each emission.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Bind `members` into a vector.
    pub fn build(self, members: Members) -> AppResult<PropertyVector> {
        check_len("device", &self.device)?;
        check_len("property name", &self.name)?;
        check_len("property label", &self.label)?;
        check_len("group", &self.group)?;
        if self.device.is_empty() || self.name.is_empty() {
            return Err(IndiError::Malformed(
                "vector needs a device and a name".into(),
            ));
        }

        let names = members.names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(IndiError::DuplicateMember {
                    property: self.name.clone(),
                    member: (*name).to_string(),
                });
            }
        }

        let perm = match members.kind() {
            VectorKind::Light => Permission::ReadOnly,
            _ => self.perm,
        };
        let label = if self.label.is_empty() {
            self.name.clone()
        } else {
            self.label
        };

        Ok(PropertyVector {
            device: self.device,
            name: self.name,
            label,
            group: self.group,
            perm,
            state: self.state,
            timeout: self.timeout,
            timestamp: self.timestamp,
            members,
            lifecycle: Lifecycle::Created,
        })
    }
}

/// A named, typed group of members belonging to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyVector {
    device: String,
    name: String,
    label: String,
    group: String,
    perm: Permission,
    state: PropertyState,
    timeout: f64,
    timestamp: Option<String>,
    members: Members,
    lifecycle: Lifecycle,
}

impl PropertyVector {
    /// Start building a vector for `device` called `name`.
    pub fn builder(device: impl Into<String>, name: impl Into<String>) -> PropertyVectorBuilder {
        PropertyVectorBuilder {
            device: device.into(),
            name: name.into(),
            label: String::new(),
            group: String::new(),
            perm: Permission::ReadOnly,
            state: PropertyState::Idle,
            timeout: 0.0,
            timestamp: None,
        }
    }

    /// Owning device.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Vector name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Display group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Client permission.
    pub fn perm(&self) -> Permission {
        self.perm
    }

    /// Current state.
    pub fn state(&self) -> PropertyState {
        self.state
    }

    /// Timeout hint in seconds.
    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Explicit timestamp, if one was set.
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Member kind.
    pub fn kind(&self) -> VectorKind {
        self.members.kind()
    }

    /// All members.
    pub fn members(&self) -> &Members {
        &self.members
    }

    /// Switch rule, for Switch vectors.
    pub fn switch_rule(&self) -> Option<SwitchRule> {
        match &self.members {
            Members::Switch { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    /// Lifecycle position.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether the vector has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.lifecycle == Lifecycle::Deleted
    }

    /// Member names in order.
    pub fn member_names(&self) -> Vec<&str> {
        self.members.names()
    }

    /// Index of the member called `name`.
    pub fn find_member(&self, name: &str) -> Option<usize> {
        self.members.position(name)
    }

    /// Number members, for Number vectors.
    pub fn numbers(&self) -> Option<&[NumberMember]> {
        match &self.members {
            Members::Number(m) => Some(m),
            _ => None,
        }
    }

    /// Text members, for Text vectors.
    pub fn texts(&self) -> Option<&[TextMember]> {
        match &self.members {
            Members::Text(m) => Some(m),
            _ => None,
        }
    }

    /// Switch members, for Switch vectors.
    pub fn switches(&self) -> Option<&[SwitchMember]> {
        match &self.members {
            Members::Switch { members, .. } => Some(members),
            _ => None,
        }
    }

    /// Light members, for Light vectors.
    pub fn lights(&self) -> Option<&[LightMember]> {
        match &self.members {
            Members::Light(m) => Some(m),
            _ => None,
        }
    }

    /// BLOB members, for BLOB vectors.
    pub fn blobs(&self) -> Option<&[BlobMember]> {
        match &self.members {
            Members::Blob(m) => Some(m),
            _ => None,
        }
    }

    /// Number member by name.
    pub fn number(&self, name: &str) -> Option<&NumberMember> {
        self.numbers()?.iter().find(|m| m.name() == name)
    }

    /// Text member by name.
    pub fn text(&self, name: &str) -> Option<&TextMember> {
        self.texts()?.iter().find(|m| m.name() == name)
    }

    /// Switch member by name.
    pub fn switch(&self, name: &str) -> Option<&SwitchMember> {
        self.switches()?.iter().find(|m| m.name() == name)
    }

    /// Light member by name.
    pub fn light(&self, name: &str) -> Option<&LightMember> {
        self.lights()?.iter().find(|m| m.name() == name)
    }

    /// BLOB member by name.
    pub fn blob(&self, name: &str) -> Option<&BlobMember> {
        self.blobs()?.iter().find(|m| m.name() == name)
    }

    /// First switch that is On.
    ///
    /// Under `AnyOfMany` several may be On and this only returns the first.
    pub fn find_on_switch(&self) -> Option<&SwitchMember> {
        self.switches()?.iter().find(|m| m.is_on())
    }

    /// Index of the first switch that is On.
    pub fn find_on_switch_index(&self) -> Option<usize> {
        self.switches()?.iter().position(|m| m.is_on())
    }

    /// Set the vector state.
    pub fn set_state(&mut self, state: PropertyState) -> AppResult<()> {
        self.ensure_live()?;
        self.state = state;
        Ok(())
    }

    /// Set the timeout hint.
    pub fn set_timeout(&mut self, timeout: f64) -> AppResult<()> {
        self.ensure_live()?;
        self.timeout = timeout;
        Ok(())
    }

    /// Set or clear the explicit timestamp.
    pub fn set_timestamp(&mut self, timestamp: Option<String>) -> AppResult<()> {
        self.ensure_live()?;
        self.timestamp = timestamp;
        Ok(())
    }

    /// Turn every switch Off. This is how a driver enforces `OneOfMany` before
    /// applying a client's request.
    pub fn reset_switches(&mut self) -> AppResult<()> {
        self.ensure_live()?;
        match &mut self.members {
            Members::Switch { members, .. } => {
                for m in members.iter_mut() {
                    *m.value_mut() = SwitchState::Off;
                }
                Ok(())
            }
            other => Err(IndiError::KindMismatch {
                expected: other.kind().label(),
                actual: VectorKind::Switch.label(),
            }),
        }
    }

    /// Apply new values to the named members.
    ///
    /// Every name must exist and every value must match the vector kind, or
    /// nothing changes. Numbers are stored as given, without clamping to
    /// `min`/`max`. Members not named keep their values. For `AtMostOne`
    /// switch vectors the update is rejected if it would leave more than one
    /// member On; `OneOfMany` is not enforced.
    pub fn update(&mut self, names: &[&str], values: &[MemberValue]) -> AppResult<()> {
        if names.len() != values.len() {
            return Err(IndiError::Malformed(format!(
                "{} names for {} values",
                names.len(),
                values.len()
            )));
        }
        let mut resolved = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            let index = self.find_member(name).ok_or_else(|| IndiError::NotFound {
                property: self.name.clone(),
                member: (*name).to_string(),
            })?;
            resolved.push((index, value.clone()));
        }
        self.apply(resolved)
    }

    /// [`update`](Self::update) for Number vectors.
    pub fn update_numbers(&mut self, values: &[(&str, f64)]) -> AppResult<()> {
        let (names, values): (Vec<&str>, Vec<MemberValue>) = values
            .iter()
            .map(|(n, v)| (*n, MemberValue::Number(*v)))
            .unzip();
        self.update(&names, &values)
    }

    /// [`update`](Self::update) for Text vectors.
    pub fn update_texts(&mut self, values: &[(&str, &str)]) -> AppResult<()> {
        let (names, values): (Vec<&str>, Vec<MemberValue>) = values
            .iter()
            .map(|(n, v)| (*n, MemberValue::Text(Some((*v).to_string()))))
            .unzip();
        self.update(&names, &values)
    }

    /// [`update`](Self::update) for Switch vectors.
    pub fn update_switches(&mut self, values: &[(&str, SwitchState)]) -> AppResult<()> {
        let (names, values): (Vec<&str>, Vec<MemberValue>) = values
            .iter()
            .map(|(n, v)| (*n, MemberValue::Switch(*v)))
            .unzip();
        self.update(&names, &values)
    }

    /// [`update`](Self::update) for Light vectors.
    pub fn update_lights(&mut self, values: &[(&str, PropertyState)]) -> AppResult<()> {
        let (names, values): (Vec<&str>, Vec<MemberValue>) = values
            .iter()
            .map(|(n, v)| (*n, MemberValue::Light(*v)))
            .unzip();
        self.update(&names, &values)
    }

    /// Apply values addressed by member index, all or nothing.
    pub(crate) fn apply(&mut self, updates: Vec<(usize, MemberValue)>) -> AppResult<()> {
        self.ensure_live()?;
        let kind = self.kind();
        let len = self.members.len();
        for (index, value) in &updates {
            if value.kind() != kind {
                return Err(IndiError::KindMismatch {
                    expected: kind.label(),
                    actual: value.kind().label(),
                });
            }
            if *index >= len {
                return Err(IndiError::Malformed(format!("member index {index} out of range")));
            }
        }

        if let Members::Switch {
            rule: SwitchRule::AtMostOne,
            members,
        } = &self.members
        {
            let mut states: Vec<SwitchState> = members.iter().map(|m| *m.value()).collect();
            for (index, value) in &updates {
                if let MemberValue::Switch(state) = value {
                    states[*index] = *state;
                }
            }
            if states.iter().filter(|s| **s == SwitchState::On).count() > 1 {
                return Err(IndiError::RuleViolation {
                    property: self.name.clone(),
                });
            }
        }

        for (index, value) in updates {
            match (&mut self.members, value) {
                (Members::Number(m), MemberValue::Number(v)) => m[index].value_mut().value = v,
                (Members::Text(m), MemberValue::Text(v)) => *m[index].value_mut() = v,
                (Members::Switch { members, .. }, MemberValue::Switch(v)) => {
                    *members[index].value_mut() = v
                }
                (Members::Light(m), MemberValue::Light(v)) => *m[index].value_mut() = v,
                (Members::Blob(m), MemberValue::Blob(v)) => *m[index].value_mut() = v,
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn set_state_unchecked(&mut self, state: PropertyState) {
        self.state = state;
    }

    pub(crate) fn set_timeout_unchecked(&mut self, timeout: f64) {
        self.timeout = timeout;
    }

    pub(crate) fn set_timestamp_unchecked(&mut self, timestamp: Option<String>) {
        self.timestamp = timestamp;
    }

    /// Record that a definition message went out.
    pub fn mark_defined(&mut self) -> AppResult<()> {
        self.ensure_live()?;
        self.lifecycle = Lifecycle::Defined;
        Ok(())
    }

    /// Record that a deletion message went out.
    pub fn mark_deleted(&mut self) {
        self.lifecycle = Lifecycle::Deleted;
    }

    /// A snooped vector was defined again after its deletion.
    pub(crate) fn revive(&mut self) {
        self.lifecycle = Lifecycle::Defined;
    }

    pub(crate) fn ensure_live(&self) -> AppResult<()> {
        if self.is_deleted() {
            return Err(IndiError::Deleted {
                device: self.device.clone(),
                property: self.name.clone(),
            });
        }
        Ok(())
    }
}
