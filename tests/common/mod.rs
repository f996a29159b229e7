//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_indi::config::{ChannelMode, IoConfig};
use rust_indi::transport::Connection;
use rust_indi::DriverIo;

/// In-memory stand-in for the hub end of a stream channel.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Everything written so far, clearing the buffer.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Small buffers so tests cross chunk and flush boundaries quickly.
pub fn small_io() -> IoConfig {
    IoConfig {
        chunk_size: 64,
        flush_threshold: 256,
        channel: ChannelMode::Auto,
        max_attachments: 16,
    }
}

/// A `DriverIo` writing to a [`SharedBuffer`], returning errors instead of exiting.
pub fn stream_driver() -> (DriverIo, SharedBuffer) {
    let out = SharedBuffer::default();
    let io = DriverIo::new(Connection::from_writer(out.clone(), &IoConfig::default())).with_fatal_exit(false);
    (io, out)
}
