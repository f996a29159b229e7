use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::error::{AppResult, IndiError};
use crate::property::{BlobData, BlobValue, MemberValue, PropertyState, PropertyVector, VectorKind};
use crate::sexagesimal::parse_sexagesimal;

use super::Element;

/// Result of offering a message to a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoopOutcome {
    /// The message concerns some other vector.
    NoMatch,
    /// The vector now holds the message's values.
    Updated,
}

/// Split `defNumberVector` / `setTextVector` / ... into prefix and kind.
pub(crate) fn vector_element(name: &str) -> Option<(&str, VectorKind)> {
    let stem = name.strip_suffix("Vector")?;
    let (prefix, kind) = stem.split_at(stem.len().min(3));
    Some((prefix, VectorKind::from_stem(kind)?))
}

/// Apply a received `def*Vector` or `set*Vector` to `vector`.
///
/// Returns [`SnoopOutcome::NoMatch`] when the element is not a definition or
/// update, or names another device or vector. Members the message omits keep
/// their values. A member the vector lacks, or an unparsable value, rejects the
/// whole message and leaves the vector untouched.
pub fn apply_snoop(root: &Element, vector: &mut PropertyVector) -> AppResult<SnoopOutcome> {
    let Some((prefix, kind)) = vector_element(&root.name) else {
        return Ok(SnoopOutcome::NoMatch);
    };
    let child_name = match prefix {
        "def" => format!("def{}", kind.stem()),
        "set" => format!("one{}", kind.stem()),
        _ => return Ok(SnoopOutcome::NoMatch),
    };
    if root.attr("device") != Some(vector.device()) || root.attr("name") != Some(vector.name()) {
        return Ok(SnoopOutcome::NoMatch);
    }
    if kind != vector.kind() {
        return Err(IndiError::KindMismatch {
            expected: vector.kind().label(),
            actual: kind.label(),
        });
    }

    let state = root.attr("state").map(str::parse::<PropertyState>).transpose()?;
    let timeout = root
        .attr("timeout")
        .map(|t| t.trim().parse::<f64>().map_err(|_| IndiError::Format(t.to_string())))
        .transpose()?;

    let mut updates = Vec::new();
    for child in root.children_named(&child_name) {
        let member = child.require("name")?;
        let index = vector.find_member(member).ok_or_else(|| IndiError::UnknownMember {
            device: vector.device().to_string(),
            property: vector.name().to_string(),
            member: member.to_string(),
        })?;
        updates.push((index, parse_value(kind, child)?));
    }

    vector.apply(updates)?;
    if let Some(state) = state {
        vector.set_state_unchecked(state);
    }
    if let Some(timeout) = timeout {
        vector.set_timeout_unchecked(timeout);
    }
    if let Some(timestamp) = root.attr("timestamp") {
        vector.set_timestamp_unchecked(Some(timestamp.to_string()));
    }
    Ok(SnoopOutcome::Updated)
}

/// Value carried by one member element.
pub(crate) fn parse_value(kind: VectorKind, child: &Element) -> AppResult<MemberValue> {
    Ok(match kind {
        VectorKind::Number => MemberValue::Number(parse_sexagesimal(child.trimmed_text())?),
        VectorKind::Text => MemberValue::Text(Some(child.text.clone())),
        VectorKind::Switch => MemberValue::Switch(child.trimmed_text().parse()?),
        VectorKind::Light => MemberValue::Light(child.trimmed_text().parse()?),
        VectorKind::Blob => MemberValue::Blob(parse_blob(child)?),
    })
}

fn parse_blob(child: &Element) -> AppResult<BlobValue> {
    let format = child.attr("format").unwrap_or_default().to_string();
    let size = match child.attr("size") {
        Some(s) => s
            .trim()
            .parse::<usize>()
            .map_err(|_| IndiError::Format(s.to_string()))?,
        None => 0,
    };

    let data = if let Some(attached) = &child.attachment {
        Some(attached.clone())
    } else {
        let compact: Vec<u8> = child
            .text
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if compact.is_empty() {
            None
        } else {
            Some(BlobData::Inline(Bytes::from(STANDARD.decode(compact)?)))
        }
    };

    Ok(BlobValue { format, size, data })
}
