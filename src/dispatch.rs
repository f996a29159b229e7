//! Routing of inbound messages to a driver.
//!
//! The hub sends a driver client requests (`getProperties`, `new*Vector`),
//! traffic from devices it snoops (`def*Vector`, `set*Vector`, `delProperty`)
//! and pings. [`Dispatcher::dispatch`] takes one decoded element and calls the
//! matching [`DeviceHandler`] method; pings are answered directly.

use tracing::{debug, warn};

use crate::driver::DriverIo;
use crate::error::{AppResult, IndiError};
use crate::property::{BlobValue, MemberValue, PropertyVector, SwitchState, VectorKind};
use crate::snoop::SnoopRegistry;
use crate::wire::snoop::{parse_value, vector_element};
use crate::wire::Element;

/// Callbacks a driver implements to serve its clients.
///
/// Value lists hold `(member name, value)` in message order; the driver
/// decides how to apply them (for example resetting a `OneOfMany` vector
/// first) and publishes the outcome itself.
pub trait DeviceHandler {
    /// A client wants definitions, of all devices (`None`) or one device.
    fn get_properties(&mut self, io: &DriverIo, device: Option<&str>) -> AppResult<()>;

    /// A client asks to set numbers.
    fn new_number(&mut self, _io: &DriverIo, _device: &str, _name: &str, _values: &[(String, f64)]) -> AppResult<()> {
        Ok(())
    }

    /// A client asks to set text.
    fn new_text(&mut self, _io: &DriverIo, _device: &str, _name: &str, _values: &[(String, String)]) -> AppResult<()> {
        Ok(())
    }

    /// A client asks to flip switches.
    fn new_switch(
        &mut self,
        _io: &DriverIo,
        _device: &str,
        _name: &str,
        _values: &[(String, SwitchState)],
    ) -> AppResult<()> {
        Ok(())
    }

    /// A client uploads BLOBs.
    fn new_blob(&mut self, _io: &DriverIo, _device: &str, _name: &str, _values: &[(String, BlobValue)]) -> AppResult<()> {
        Ok(())
    }

    /// A snooped vector was defined or updated.
    fn snooped(&mut self, _io: &DriverIo, _vector: &PropertyVector) -> AppResult<()> {
        Ok(())
    }

    /// A snooped vector (or, with `name` `None`, a whole device) went away.
    fn snoop_deleted(&mut self, _io: &DriverIo, _device: &str, _name: Option<&str>) -> AppResult<()> {
        Ok(())
    }
}

/// Routes decoded elements to a [`DeviceHandler`].
#[derive(Debug)]
pub struct Dispatcher {
    io: DriverIo,
    snoops: SnoopRegistry,
}

impl Dispatcher {
    /// Dispatch with `io` for replies and an empty snoop registry.
    pub fn new(io: DriverIo) -> Self {
        Self {
            io,
            snoops: SnoopRegistry::new(),
        }
    }

    /// Publishing handle passed to handlers.
    pub fn io(&self) -> &DriverIo {
        &self.io
    }

    /// Snoop registry consulted for `def*` / `set*` / `delProperty`.
    pub fn snoops(&self) -> &SnoopRegistry {
        &self.snoops
    }

    /// Register snoop targets.
    pub fn snoops_mut(&mut self) -> &mut SnoopRegistry {
        &mut self.snoops
    }

    /// Route one element.
    pub fn dispatch<H: DeviceHandler + ?Sized>(&mut self, root: &Element, handler: &mut H) -> AppResult<()> {
        match root.name.as_str() {
            "getProperties" => handler.get_properties(&self.io, root.attr("device")),
            "delProperty" => {
                if self.snoops.handle_delete(root) > 0 {
                    handler.snoop_deleted(&self.io, root.require("device")?, root.attr("name"))?;
                }
                Ok(())
            }
            "pingRequest" => self.io.ping_reply(root.require("uid")?),
            "pingReply" | "enableBLOB" => {
                debug!(element = %root.name, "ignored");
                Ok(())
            }
            name => match vector_element(name) {
                Some(("new", kind)) => self.client_request(root, kind, handler),
                Some(("def" | "set", _)) => {
                    if let Some(vector) = self.snoops.dispatch(root)? {
                        handler.snooped(&self.io, vector)?;
                    }
                    Ok(())
                }
                _ => {
                    warn!(element = %root.name, "unexpected message ignored");
                    Ok(())
                }
            },
        }
    }

    fn client_request<H: DeviceHandler + ?Sized>(
        &mut self,
        root: &Element,
        kind: VectorKind,
        handler: &mut H,
    ) -> AppResult<()> {
        let device = root.require("device")?;
        let name = root.require("name")?;
        let child_name = format!("one{}", kind.stem());

        let mut values = Vec::new();
        for child in root.children_named(&child_name) {
            values.push((child.require("name")?.to_string(), parse_value(kind, child)?));
        }
        debug!(device, name, kind = kind.label(), count = values.len(), "client request");

        let io = &self.io;
        match kind {
            VectorKind::Number => handler.new_number(io, device, name, &collect(values, |v| match v {
                MemberValue::Number(n) => Some(n),
                _ => None,
            })),
            VectorKind::Text => handler.new_text(io, device, name, &collect(values, |v| match v {
                MemberValue::Text(t) => Some(t.unwrap_or_default()),
                _ => None,
            })),
            VectorKind::Switch => handler.new_switch(io, device, name, &collect(values, |v| match v {
                MemberValue::Switch(s) => Some(s),
                _ => None,
            })),
            VectorKind::Blob => handler.new_blob(io, device, name, &collect(values, |v| match v {
                MemberValue::Blob(b) => Some(b),
                _ => None,
            })),
            VectorKind::Light => Err(IndiError::Malformed(format!(
                "clients cannot set lights ({device}.{name})"
            ))),
        }
    }
}

fn collect<T>(values: Vec<(String, MemberValue)>, pick: impl Fn(MemberValue) -> Option<T>) -> Vec<(String, T)> {
    values
        .into_iter()
        .filter_map(|(name, value)| pick(value).map(|v| (name, v)))
        .collect()
}
