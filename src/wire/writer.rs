//! Rendering of vectors and control messages.
//!
//! All functions write one complete message through a [`Transport`]. Every
//! user-supplied string is escaped; structural markup never is. Numbers are
//! written with Rust's shortest round-trip formatting so a parsed message
//! reproduces the exact values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::AppResult;
use crate::property::{BlobHandling, BlobValue, Members, PropertyVector, VectorKind};
use crate::transport::Transport;

use super::{escape, timestamp_now, BASE64_LINE_WIDTH, PROTOCOL_VERSION};

macro_rules! emit {
    ($t:expr, $($arg:tt)*) => {
        $t.write_formatted(format_args!($($arg)*))?
    };
}

fn timestamp_of(vector: &PropertyVector) -> String {
    vector
        .timestamp()
        .map(str::to_string)
        .unwrap_or_else(timestamp_now)
}

fn write_message_attr(t: &mut dyn Transport, message: Option<&str>) -> AppResult<()> {
    if let Some(message) = message {
        emit!(t, " message='{}'", escape(message));
    }
    Ok(())
}

/// `def<Kind>Vector`: full description, sent when a vector is first published.
pub fn write_definition(t: &mut dyn Transport, vector: &PropertyVector, message: Option<&str>) -> AppResult<()> {
    let stem = vector.kind().stem();
    emit!(
        t,
        "<def{}Vector device='{}' name='{}' label='{}' group='{}' state='{}'",
        stem,
        escape(vector.device()),
        escape(vector.name()),
        escape(vector.label()),
        escape(vector.group()),
        vector.state().as_str()
    );
    if vector.kind() != VectorKind::Light {
        emit!(t, " perm='{}'", vector.perm().as_str());
    }
    if let Some(rule) = vector.switch_rule() {
        emit!(t, " rule='{}'", rule.as_str());
    }
    emit!(t, " timeout='{}' timestamp='{}'", vector.timeout(), escape(&timestamp_of(vector)));
    write_message_attr(t, message)?;
    t.write_bytes(b">\n")?;

    match vector.members() {
        Members::Number(members) => {
            for m in members {
                let v = m.value();
                emit!(
                    t,
                    "  <defNumber name='{}' label='{}' format='{}' min='{}' max='{}' step='{}'>\n      {}\n  </defNumber>\n",
                    escape(m.name()),
                    escape(m.label()),
                    escape(&v.format),
                    v.min,
                    v.max,
                    v.step,
                    v.value
                );
            }
        }
        Members::Text(members) => {
            for m in members {
                emit!(
                    t,
                    "  <defText name='{}' label='{}'>{}</defText>\n",
                    escape(m.name()),
                    escape(m.label()),
                    escape(m.text())
                );
            }
        }
        Members::Switch { members, .. } => {
            for m in members {
                emit!(
                    t,
                    "  <defSwitch name='{}' label='{}'>\n      {}\n  </defSwitch>\n",
                    escape(m.name()),
                    escape(m.label()),
                    m.value().as_str()
                );
            }
        }
        Members::Light(members) => {
            for m in members {
                emit!(
                    t,
                    "  <defLight name='{}' label='{}'>\n      {}\n  </defLight>\n",
                    escape(m.name()),
                    escape(m.label()),
                    m.value().as_str()
                );
            }
        }
        Members::Blob(members) => {
            for m in members {
                emit!(
                    t,
                    "  <defBLOB name='{}' label='{}'/>\n",
                    escape(m.name()),
                    escape(m.label())
                );
            }
        }
    }

    emit!(t, "</def{}Vector>\n", stem);
    Ok(())
}

/// `set<Kind>Vector`: current values, sent after each change.
pub fn write_update(t: &mut dyn Transport, vector: &PropertyVector, message: Option<&str>) -> AppResult<()> {
    let stem = vector.kind().stem();
    emit!(
        t,
        "<set{}Vector device='{}' name='{}' state='{}' timeout='{}' timestamp='{}'",
        stem,
        escape(vector.device()),
        escape(vector.name()),
        vector.state().as_str(),
        vector.timeout(),
        escape(&timestamp_of(vector))
    );
    write_message_attr(t, message)?;
    t.write_bytes(b">\n")?;
    write_one_members(t, vector)?;
    emit!(t, "</set{}Vector>\n", stem);
    Ok(())
}

/// `new<Kind>Vector`: values requested of another driver.
pub fn write_new(t: &mut dyn Transport, vector: &PropertyVector) -> AppResult<()> {
    let stem = vector.kind().stem();
    emit!(
        t,
        "<new{}Vector device='{}' name='{}' timestamp='{}'>\n",
        stem,
        escape(vector.device()),
        escape(vector.name()),
        escape(&timestamp_of(vector))
    );
    write_one_members(t, vector)?;
    emit!(t, "</new{}Vector>\n", stem);
    Ok(())
}

fn write_one_members(t: &mut dyn Transport, vector: &PropertyVector) -> AppResult<()> {
    match vector.members() {
        Members::Number(members) => {
            for m in members {
                emit!(
                    t,
                    "  <oneNumber name='{}'>\n      {}\n  </oneNumber>\n",
                    escape(m.name()),
                    m.value().value
                );
            }
        }
        Members::Text(members) => {
            for m in members {
                emit!(
                    t,
                    "  <oneText name='{}'>{}</oneText>\n",
                    escape(m.name()),
                    escape(m.text())
                );
            }
        }
        Members::Switch { members, .. } => {
            for m in members {
                emit!(
                    t,
                    "  <oneSwitch name='{}'>\n      {}\n  </oneSwitch>\n",
                    escape(m.name()),
                    m.value().as_str()
                );
            }
        }
        Members::Light(members) => {
            for m in members {
                emit!(
                    t,
                    "  <oneLight name='{}'>\n      {}\n  </oneLight>\n",
                    escape(m.name()),
                    m.value().as_str()
                );
            }
        }
        Members::Blob(members) => {
            for m in members {
                write_one_blob(t, m.name(), m.value())?;
            }
        }
    }
    Ok(())
}

/// One `oneBLOB` element.
///
/// Empty payloads only announce a state change. Otherwise the payload is
/// attached out of band when the transport can, and inlined as wrapped base64
/// when it cannot.
fn write_one_blob(t: &mut dyn Transport, name: &str, blob: &BlobValue) -> AppResult<()> {
    let data = match &blob.data {
        Some(data) if !data.is_empty() => data,
        _ => {
            emit!(t, "  <oneBLOB name='{}' size='0' enclen='0' format=''/>\n", escape(name));
            return Ok(());
        }
    };

    if t.supports_attachments() {
        let tag = format!(
            "  <oneBLOB name='{}' size='{}' len='{}' format='{}' attached='true'/>\n",
            escape(name),
            blob.size,
            data.len(),
            escape(&blob.format)
        );
        return t.attach_payload(&tag, data, data.len());
    }

    let encoded = STANDARD.encode(data.as_slice());
    emit!(
        t,
        "  <oneBLOB name='{}' size='{}' enclen='{}' format='{}'>\n",
        escape(name),
        blob.size,
        encoded.len(),
        escape(&blob.format)
    );
    for line in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
        t.write_bytes(line)?;
        t.write_bytes(b"\n")?;
    }
    t.write_bytes(b"  </oneBLOB>\n")?;
    Ok(())
}

/// `delProperty`: remove one vector, or the whole device when `name` is `None`.
pub fn write_delete(
    t: &mut dyn Transport,
    device: &str,
    name: Option<&str>,
    message: Option<&str>,
) -> AppResult<()> {
    emit!(t, "<delProperty device='{}'", escape(device));
    if let Some(name) = name {
        emit!(t, " name='{}'", escape(name));
    }
    emit!(t, " timestamp='{}'", timestamp_now());
    write_message_attr(t, message)?;
    t.write_bytes(b"/>\n")?;
    Ok(())
}

/// `getProperties`, optionally scoped to a device or one of its vectors.
pub fn write_get_properties(t: &mut dyn Transport, device: Option<&str>, name: Option<&str>) -> AppResult<()> {
    emit!(t, "<getProperties version='{}'", PROTOCOL_VERSION);
    if let Some(device) = device {
        emit!(t, " device='{}'", escape(device));
        if let Some(name) = name {
            emit!(t, " name='{}'", escape(name));
        }
    }
    t.write_bytes(b"/>\n")?;
    Ok(())
}

/// `enableBLOB` for a device or one of its vectors.
pub fn write_enable_blob(
    t: &mut dyn Transport,
    device: &str,
    name: Option<&str>,
    mode: BlobHandling,
) -> AppResult<()> {
    emit!(t, "<enableBLOB device='{}'", escape(device));
    if let Some(name) = name {
        emit!(t, " name='{}'", escape(name));
    }
    emit!(t, ">{}</enableBLOB>\n", mode.as_str());
    Ok(())
}

/// Free-text `message`, optionally attributed to a device.
pub fn write_message(t: &mut dyn Transport, device: Option<&str>, text: &str) -> AppResult<()> {
    t.write_bytes(b"<message")?;
    if let Some(device) = device {
        emit!(t, " device='{}'", escape(device));
    }
    emit!(t, " timestamp='{}' message='{}'/>\n", timestamp_now(), escape(text));
    Ok(())
}

/// `pingRequest` carrying `uid`.
pub fn write_ping_request(t: &mut dyn Transport, uid: &str) -> AppResult<()> {
    emit!(t, "<pingRequest uid='{}'/>\n", escape(uid));
    Ok(())
}

/// `pingReply` echoing `uid`.
pub fn write_ping_reply(t: &mut dyn Transport, uid: &str) -> AppResult<()> {
    emit!(t, "<pingReply uid='{}'/>\n", escape(uid));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{
        BlobData, BlobMember, LightMember, NumberMember, Permission, PropertyState, SwitchMember,
        SwitchRule, SwitchState, TextMember,
    };

    fn render(f: impl FnOnce(&mut dyn Transport) -> AppResult<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn axis() -> PropertyVector {
        let pos = NumberMember::new("POS", "Position", "%.0f", 0.0, 100000.0, 1.0, 0.0).unwrap();
        PropertyVector::builder("Foo", "AXIS1")
            .with_group("Motion")
            .with_perm(Permission::ReadWrite)
            .with_timestamp("2024-01-02T03:04:05")
            .build(Members::Number(vec![pos]))
            .unwrap()
    }

    #[test]
    fn number_definition() {
        let text = render(|t| write_definition(t, &axis(), None));
        assert_eq!(
            text,
            "<defNumberVector device='Foo' name='AXIS1' label='AXIS1' group='Motion' state='Idle' perm='rw' timeout='0' timestamp='2024-01-02T03:04:05'>\n\
             \x20 <defNumber name='POS' label='Position' format='%.0f' min='0' max='100000' step='1'>\n\
             \x20     0\n\
             \x20 </defNumber>\n\
             </defNumberVector>\n"
        );
    }

    #[test]
    fn number_update_with_message() {
        let mut v = axis();
        v.update_numbers(&[("POS", 500.0)]).unwrap();
        v.set_state(PropertyState::Busy).unwrap();
        let text = render(|t| write_update(t, &v, Some("moving <fast>")));
        assert!(text.starts_with(
            "<setNumberVector device='Foo' name='AXIS1' state='Busy' timeout='0' timestamp='2024-01-02T03:04:05' message='moving &lt;fast&gt;'>\n"
        ));
        assert!(text.contains("<oneNumber name='POS'>\n      500\n  </oneNumber>"));
        assert!(text.ends_with("</setNumberVector>\n"));
    }

    #[test]
    fn switch_definition_carries_rule() {
        let members = vec![
            SwitchMember::new("CONNECT", "Connect", SwitchState::Off).unwrap(),
            SwitchMember::new("DISCONNECT", "Disconnect", SwitchState::On).unwrap(),
        ];
        let v = PropertyVector::builder("Foo", "CONNECTION")
            .with_perm(Permission::ReadWrite)
            .build(Members::Switch {
                rule: SwitchRule::OneOfMany,
                members,
            })
            .unwrap();
        let text = render(|t| write_definition(t, &v, None));
        assert!(text.contains(" perm='rw' rule='OneOfMany' timeout='0'"));
        assert!(text.contains("<defSwitch name='DISCONNECT' label='Disconnect'>\n      On\n  </defSwitch>"));
    }

    #[test]
    fn light_definition_has_no_perm() {
        let v = PropertyVector::builder("Foo", "STATUS")
            .build(Members::Light(vec![LightMember::new("OK", "", PropertyState::Alert).unwrap()]))
            .unwrap();
        let text = render(|t| write_definition(t, &v, None));
        assert!(!text.contains("perm="));
        assert!(text.contains("<defLight name='OK' label='OK'>\n      Alert\n  </defLight>"));
    }

    #[test]
    fn text_is_escaped_in_content() {
        let v = PropertyVector::builder("Foo", "INFO")
            .build(Members::Text(vec![TextMember::new("NOTE", "", Some("a<b & 'c'")).unwrap()]))
            .unwrap();
        let text = render(|t| write_update(t, &v, None));
        assert!(text.contains("<oneText name='NOTE'>a&lt;b &amp; &apos;c&apos;</oneText>"));
    }

    fn blob_vector(payload: Option<Vec<u8>>) -> PropertyVector {
        let mut v = PropertyVector::builder("Cam", "CCD1")
            .build(Members::Blob(vec![BlobMember::new("IMG", "Image").unwrap()]))
            .unwrap();
        if let Some(bytes) = payload {
            let value = BlobValue::new(".fits", BlobData::from(bytes)).unwrap();
            v.update(&["IMG"], &[crate::property::MemberValue::Blob(value)]).unwrap();
        }
        v
    }

    #[test]
    fn empty_blob_announces_state_only() {
        let text = render(|t| write_update(t, &blob_vector(None), None));
        assert!(text.contains("<oneBLOB name='IMG' size='0' enclen='0' format=''/>"));
        let text = render(|t| write_update(t, &blob_vector(Some(Vec::new())), None));
        assert!(text.contains("size='0' enclen='0'"));
    }

    #[test]
    fn inline_blob_is_wrapped_base64() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let text = render(|t| write_update(t, &blob_vector(Some(payload.clone())), None));
        let encoded = STANDARD.encode(&payload);
        assert!(text.contains(&format!(
            "<oneBLOB name='IMG' size='256' enclen='{}' format='.fits'>\n",
            encoded.len()
        )));
        let body: Vec<&str> = text
            .lines()
            .skip_while(|l| !l.contains("<oneBLOB"))
            .skip(1)
            .take_while(|l| !l.contains("</oneBLOB>"))
            .collect();
        assert!(body.iter().all(|l| l.len() <= BASE64_LINE_WIDTH));
        assert_eq!(body[0].len(), BASE64_LINE_WIDTH);
        assert_eq!(body.concat(), encoded);
    }

    #[test]
    fn blob_definition_has_no_payload() {
        let text = render(|t| write_definition(t, &blob_vector(Some(vec![1, 2, 3])), None));
        assert!(text.contains("<defBLOB name='IMG' label='Image'/>"));
        assert!(!text.contains("enclen"));
    }

    #[test]
    fn control_messages() {
        assert_eq!(
            render(|t| write_get_properties(t, None, None)),
            "<getProperties version='1.7'/>\n"
        );
        assert_eq!(
            render(|t| write_get_properties(t, Some("Foo"), Some("AXIS1"))),
            "<getProperties version='1.7' device='Foo' name='AXIS1'/>\n"
        );
        assert_eq!(
            render(|t| write_enable_blob(t, "Cam", Some("CCD1"), BlobHandling::Also)),
            "<enableBLOB device='Cam' name='CCD1'>Also</enableBLOB>\n"
        );
        assert_eq!(
            render(|t| write_ping_request(t, "7")),
            "<pingRequest uid='7'/>\n"
        );
        assert_eq!(render(|t| write_ping_reply(t, "7")), "<pingReply uid='7'/>\n");
    }

    #[test]
    fn delete_and_message() {
        let text = render(|t| write_delete(t, "Foo", Some("AXIS1"), None));
        assert!(text.starts_with("<delProperty device='Foo' name='AXIS1' timestamp='"));
        assert!(text.ends_with("'/>\n"));

        let text = render(|t| write_delete(t, "Foo", None, Some("bye")));
        assert!(!text.contains("name="));
        assert!(text.contains(" message='bye'/>"));

        let text = render(|t| write_message(t, Some("Foo"), "Homing & parking"));
        assert!(text.starts_with("<message device='Foo' timestamp='"));
        assert!(text.contains("message='Homing &amp; parking'"));
    }

    #[test]
    fn new_vector_uses_one_children() {
        let text = render(|t| write_new(t, &axis()));
        assert!(text.starts_with("<newNumberVector device='Foo' name='AXIS1' timestamp='2024-01-02T03:04:05'>\n"));
        assert!(text.contains("<oneNumber name='POS'>"));
        assert!(text.ends_with("</newNumberVector>\n"));
    }
}
