//! A small simulated device.
//!
//! It exposes a connection switch, one motorised axis that moves toward a
//! requested target on every poll, a read-only info text and a motion light.
//! The binary's `simulate` command runs it over stdin/stdout; tests drive it
//! directly.

use tracing::{debug, info};

use crate::dispatch::DeviceHandler;
use crate::driver::DriverIo;
use crate::error::{AppResult, IndiError};
use crate::property::{
    LightMember, Members, NumberMember, Permission, PropertyState, PropertyVector, SwitchMember, SwitchRule,
    SwitchState, TextMember,
};

/// Axis travel per poll.
pub const DEFAULT_SPEED: f64 = 100.0;

const CONNECTION: &str = "CONNECTION";
const AXIS: &str = "AXIS1";
const INFO: &str = "DRIVER_INFO";
const STATUS: &str = "MOTION_STATUS";

/// Simulated single-axis device.
#[derive(Debug)]
pub struct Simulator {
    device: String,
    connection: PropertyVector,
    axis: PropertyVector,
    info: PropertyVector,
    status: PropertyVector,
    target: f64,
    speed: f64,
}

impl Simulator {
    /// Build the device's vectors. Nothing is sent until a client asks.
    pub fn new(device: &str) -> AppResult<Self> {
        let connection = PropertyVector::builder(device, CONNECTION)
            .with_label("Connection")
            .with_group("Main Control")
            .with_perm(Permission::ReadWrite)
            .build(Members::Switch {
                rule: SwitchRule::OneOfMany,
                members: vec![
                    SwitchMember::new("CONNECT", "Connect", SwitchState::Off)?,
                    SwitchMember::new("DISCONNECT", "Disconnect", SwitchState::On)?,
                ],
            })?;

        let axis = PropertyVector::builder(device, AXIS)
            .with_label("Axis")
            .with_group("Motion")
            .with_perm(Permission::ReadWrite)
            .with_timeout(60.0)
            .build(Members::Number(vec![NumberMember::new(
                "POS", "Position", "%.0f", 0.0, 100_000.0, 1.0, 0.0,
            )?]))?;

        let info = PropertyVector::builder(device, INFO)
            .with_label("Driver Info")
            .with_group("General Info")
            .with_perm(Permission::ReadOnly)
            .build(Members::Text(vec![
                TextMember::new("DRIVER_NAME", "Name", Some("Simulator"))?,
                TextMember::new("DRIVER_VERSION", "Version", Some(env!("CARGO_PKG_VERSION")))?,
            ]))?;

        let status = PropertyVector::builder(device, STATUS)
            .with_label("Motion")
            .with_group("Motion")
            .build(Members::Light(vec![LightMember::new("MOVING", "Moving", PropertyState::Idle)?]))?;

        Ok(Self {
            device: device.to_string(),
            connection,
            axis,
            info,
            status,
            target: 0.0,
            speed: DEFAULT_SPEED,
        })
    }

    /// Change the travel per poll.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.abs();
        self
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Whether CONNECT is On.
    pub fn is_connected(&self) -> bool {
        self.connection
            .find_on_switch()
            .is_some_and(|m| m.name() == "CONNECT")
    }

    /// Current axis position.
    pub fn position(&self) -> f64 {
        self.axis.number("POS").map_or(0.0, |m| m.value().value)
    }

    /// Target the axis is moving toward.
    pub fn target(&self) -> f64 {
        self.target
    }

    /// The axis vector.
    pub fn axis(&self) -> &PropertyVector {
        &self.axis
    }

    /// Send every definition.
    pub fn define_all(&mut self, io: &DriverIo) -> AppResult<()> {
        io.define(&mut self.connection, None)?;
        io.define(&mut self.info, None)?;
        io.define(&mut self.axis, None)?;
        io.define(&mut self.status, None)
    }

    /// Advance the axis one step and publish it while moving.
    pub fn poll(&mut self, io: &DriverIo) -> AppResult<()> {
        if !self.is_connected() || self.axis.state() != PropertyState::Busy {
            return Ok(());
        }
        let pos = self.position();
        let delta = self.target - pos;
        let arrived = delta.abs() <= self.speed;
        let next = if arrived {
            self.target
        } else {
            pos + self.speed.copysign(delta)
        };
        self.axis.update_numbers(&[("POS", next)])?;

        if arrived {
            self.axis.set_state(PropertyState::Ok)?;
            self.status.update_lights(&[("MOVING", PropertyState::Ok)])?;
            self.status.set_state(PropertyState::Ok)?;
            io.publish(&self.status, None)?;
            debug!(position = next, "axis arrived");
        }
        io.publish(&self.axis, None)
    }

    /// Announce removal of the whole device.
    pub fn shutdown(&mut self, io: &DriverIo) -> AppResult<()> {
        io.delete_device(&self.device, Some("driver exiting"))?;
        for v in [&mut self.connection, &mut self.axis, &mut self.info, &mut self.status] {
            v.mark_deleted();
        }
        Ok(())
    }

    fn set_connected(&mut self, io: &DriverIo, values: &[(String, SwitchState)]) -> AppResult<()> {
        let requested: Vec<(&str, SwitchState)> = values.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        let mut candidate = self.connection.clone();
        candidate.reset_switches()?;
        if let Err(e) = candidate.update_switches(&requested) {
            return io.alert(&mut self.connection, Some(&e.to_string()));
        }
        if candidate.find_on_switch().is_none() {
            // OneOfMany: an all-Off request leaves the current choice alone.
            return io.publish(&self.connection, None);
        }
        self.connection = candidate;
        self.connection.set_state(PropertyState::Ok)?;

        let connected = self.is_connected();
        info!(device = %self.device, connected, "connection changed");
        io.publish(
            &self.connection,
            Some(if connected { "Simulator connected" } else { "Simulator disconnected" }),
        )
    }

    fn move_axis(&mut self, io: &DriverIo, values: &[(String, f64)]) -> AppResult<()> {
        if !self.is_connected() {
            return io.alert(&mut self.axis, Some("Device is not connected"));
        }
        let Some((_, target)) = values.iter().find(|(n, _)| n == "POS") else {
            return io.alert(&mut self.axis, Some("Request names no known member"));
        };
        let (min, max) = self
            .axis
            .number("POS")
            .map_or((0.0, 0.0), |m| (m.value().min, m.value().max));
        if !(min..=max).contains(target) {
            return io.alert(&mut self.axis, Some(&format!("Target {target} outside [{min}, {max}]")));
        }

        self.target = *target;
        self.axis.set_state(PropertyState::Busy)?;
        self.status.update_lights(&[("MOVING", PropertyState::Busy)])?;
        self.status.set_state(PropertyState::Busy)?;
        io.publish(&self.status, None)?;
        io.publish(&self.axis, Some(&format!("Moving to {target}")))
    }

    fn owns(&self, device: &str) -> bool {
        device == self.device
    }
}

impl DeviceHandler for Simulator {
    fn get_properties(&mut self, io: &DriverIo, device: Option<&str>) -> AppResult<()> {
        match device {
            Some(d) if !self.owns(d) => Ok(()),
            _ => self.define_all(io),
        }
    }

    fn new_number(&mut self, io: &DriverIo, device: &str, name: &str, values: &[(String, f64)]) -> AppResult<()> {
        if !self.owns(device) {
            return Ok(());
        }
        match name {
            AXIS => self.move_axis(io, values),
            other => Err(IndiError::Malformed(format!("no number vector '{other}' on {device}"))),
        }
    }

    fn new_text(&mut self, io: &DriverIo, device: &str, name: &str, _values: &[(String, String)]) -> AppResult<()> {
        if !self.owns(device) {
            return Ok(());
        }
        if name == INFO {
            return io.alert(&mut self.info, Some("Driver info is read-only"));
        }
        Err(IndiError::Malformed(format!("no text vector '{name}' on {device}")))
    }

    fn new_switch(
        &mut self,
        io: &DriverIo,
        device: &str,
        name: &str,
        values: &[(String, SwitchState)],
    ) -> AppResult<()> {
        if !self.owns(device) {
            return Ok(());
        }
        match name {
            CONNECTION => self.set_connected(io, values),
            other => Err(IndiError::Malformed(format!("no switch vector '{other}' on {device}"))),
        }
    }
}
