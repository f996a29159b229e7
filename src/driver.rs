//! Driver-facing publishing API.
//!
//! [`DriverIo`] is what a device driver holds: it renders vectors and control
//! messages through the process [`Connection`], one locked message at a time,
//! and keeps each vector's lifecycle in step with what went on the wire.
//!
//! Transport failures are fatal. By default `DriverIo` logs them and ends the
//! process; [`DriverIo::with_fatal_exit`] turns that off so tests can observe
//! the error instead.

use tracing::{debug, error};

use crate::error::AppResult;
use crate::property::{BlobHandling, PropertyState, PropertyVector};
use crate::transport::{Connection, Transport};
use crate::wire::writer;

/// Publishing handle for one or more drivers sharing a connection.
#[derive(Debug, Clone)]
pub struct DriverIo {
    conn: Connection,
    exit_on_fatal: bool,
}

impl DriverIo {
    /// Publish through `conn`, exiting the process on fatal transport errors.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            exit_on_fatal: true,
        }
    }

    /// Choose whether fatal errors end the process.
    pub fn with_fatal_exit(mut self, exit: bool) -> Self {
        self.exit_on_fatal = exit;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn emit<F>(&self, what: &'static str, render: F) -> AppResult<()>
    where
        F: FnOnce(&mut dyn Transport) -> AppResult<()>,
    {
        let mut msg = self.conn.begin();
        let result = render(&mut msg).and_then(|()| msg.finish());
        match result {
            Ok(()) => {
                debug!(what, "sent");
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(what, error = %e, "fatal error on outbound channel");
                if self.exit_on_fatal {
                    std::process::exit(1);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Send the vector's definition and mark it defined.
    pub fn define(&self, vector: &mut PropertyVector, message: Option<&str>) -> AppResult<()> {
        vector.ensure_live()?;
        self.emit("define", |t| writer::write_definition(t, vector, message))?;
        vector.mark_defined()
    }

    /// Send the vector's current values.
    pub fn publish(&self, vector: &PropertyVector, message: Option<&str>) -> AppResult<()> {
        vector.ensure_live()?;
        self.emit("publish", |t| writer::write_update(t, vector, message))
    }

    /// Set the vector to Alert and publish it, optionally with a reason.
    pub fn alert(&self, vector: &mut PropertyVector, message: Option<&str>) -> AppResult<()> {
        vector.set_state(PropertyState::Alert)?;
        self.publish(vector, message)
    }

    /// Announce the vector's removal. It can no longer be changed or sent.
    pub fn delete(&self, vector: &mut PropertyVector, message: Option<&str>) -> AppResult<()> {
        vector.ensure_live()?;
        self.emit("delete", |t| {
            writer::write_delete(t, vector.device(), Some(vector.name()), message)
        })?;
        vector.mark_deleted();
        Ok(())
    }

    /// Announce the removal of every vector of `device`.
    ///
    /// Vectors the caller still holds should be dropped or marked deleted.
    pub fn delete_device(&self, device: &str, message: Option<&str>) -> AppResult<()> {
        self.emit("delete_device", |t| writer::write_delete(t, device, None, message))
    }

    /// Send a free-text message, optionally attributed to a device.
    pub fn message(&self, device: Option<&str>, text: &str) -> AppResult<()> {
        self.emit("message", |t| writer::write_message(t, device, text))
    }

    /// Ask the hub for definitions, optionally of one device or vector.
    pub fn get_properties(&self, device: Option<&str>, name: Option<&str>) -> AppResult<()> {
        self.emit("get_properties", |t| writer::write_get_properties(t, device, name))
    }

    /// Tell the hub whether this driver wants BLOBs from `device`.
    pub fn enable_blob(&self, device: &str, name: Option<&str>, mode: BlobHandling) -> AppResult<()> {
        self.emit("enable_blob", |t| writer::write_enable_blob(t, device, name, mode))
    }

    /// [`enable_blob`](Self::enable_blob) for a snooped device.
    pub fn snoop_blobs(&self, device: &str, name: Option<&str>, mode: BlobHandling) -> AppResult<()> {
        debug!(device, ?name, mode = mode.as_str(), "snoop BLOB handling");
        self.enable_blob(device, name, mode)
    }

    /// Send a command to another driver's vector.
    pub fn send_new(&self, vector: &PropertyVector) -> AppResult<()> {
        self.emit("send_new", |t| writer::write_new(t, vector))
    }

    /// Send `pingRequest`.
    pub fn ping_request(&self, uid: &str) -> AppResult<()> {
        self.emit("ping_request", |t| writer::write_ping_request(t, uid))
    }

    /// Answer a `pingRequest`.
    pub fn ping_reply(&self, uid: &str) -> AppResult<()> {
        self.emit("ping_reply", |t| writer::write_ping_reply(t, uid))
    }
}
