//! Outbound channel to the hub.
//!
//! The wire writer renders through the [`Transport`] trait, so it never knows
//! whether bytes go straight to a pipe or are batched for a socket. A
//! [`Connection`] owns the single outbound channel of the process and hands out
//! [`Message`] guards; a guard holds the channel lock from the first byte of a
//! message until [`Message::finish`] flushes it, so messages from several
//! drivers sharing one process never interleave.
//!
//! ## Channels
//!
//! - **Stream**: bytes are written immediately; attachments are unsupported and
//!   BLOBs are inlined as base64 by the writer.
//! - **Socket**: bytes accumulate in an [`OutputBuffer`]; attachments are queued
//!   and flushed as descriptors with the text in one `sendmsg`. A message larger
//!   than the flush threshold is sent early in several parts.

pub mod buffer;
pub mod unix;

pub use buffer::{Attachment, OutputBuffer};
pub use unix::{detect_channel, recv_with_fds, send_with_fds, ChannelKind};

use std::fmt;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::{ChannelMode, IoConfig};
use crate::error::{AppResult, IndiError};
use crate::property::{BlobData, SharedBlob};

/// Sink for one rendered message.
pub trait Transport {
    /// Append raw bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Append formatted text.
    fn write_formatted(&mut self, args: fmt::Arguments<'_>) -> AppResult<()> {
        match args.as_str() {
            Some(s) => self.write_bytes(s.as_bytes()),
            None => self.write_bytes(args.to_string().as_bytes()),
        }
    }

    /// Whether [`attach_payload`](Self::attach_payload) is available.
    fn supports_attachments(&self) -> bool {
        false
    }

    /// Append `tag` (a complete `oneBLOB` element) and send `len` bytes of
    /// `data` out of band with this message.
    fn attach_payload(&mut self, tag: &str, data: &BlobData, len: usize) -> AppResult<()> {
        let _ = (tag, data, len);
        Err(IndiError::AttachmentsUnsupported)
    }
}

impl Transport for Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

enum Sink {
    Stream(Box<dyn Write + Send>),
    Socket(UnixStream),
}

struct Channel {
    sink: Sink,
    buffer: OutputBuffer,
    flush_threshold: usize,
    max_attachments: usize,
}

impl Channel {
    fn kind(&self) -> ChannelKind {
        match self.sink {
            Sink::Stream(_) => ChannelKind::Stream,
            Sink::Socket(_) => ChannelKind::Socket,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        if let Sink::Stream(w) = &mut self.sink {
            return w.write_all(bytes).map_err(IndiError::Transmit);
        }
        self.buffer.push(bytes)?;
        if self.buffer.len() > self.flush_threshold {
            debug!(bytes = self.buffer.len(), "high-water mark reached, flushing early");
            self.flush()?;
        }
        Ok(())
    }

    fn attach(&mut self, tag: &str, data: &BlobData, len: usize) -> AppResult<()> {
        match self.sink {
            Sink::Stream(_) => Err(IndiError::AttachmentsUnsupported),
            Sink::Socket(_) => {
                self.buffer.push(tag.as_bytes())?;
                self.buffer.attach(data.clone(), len)
            }
        }
    }

    fn flush(&mut self) -> AppResult<()> {
        match &mut self.sink {
            Sink::Stream(w) => w.flush().map_err(IndiError::Transmit),
            Sink::Socket(sock) => {
                if self.buffer.is_empty() {
                    return Ok(());
                }
                // Inline payloads need a descriptor; copy them once into shared memory.
                let mut temporaries = Vec::new();
                let mut fds = Vec::with_capacity(self.buffer.attachments().len());
                for attachment in self.buffer.attachments() {
                    match attachment.data.raw_fd() {
                        Some(fd) => fds.push(fd),
                        None => {
                            let end = attachment.len.min(attachment.data.len());
                            let copy = SharedBlob::from_bytes(&attachment.data.as_slice()[..end])?;
                            fds.push(copy.as_raw_fd());
                            temporaries.push(copy);
                        }
                    }
                }

                let expected = self.buffer.len();
                let sent = send_with_fds(sock, self.buffer.bytes(), &fds).map_err(IndiError::Transmit)?;
                if sent != expected {
                    return Err(IndiError::ShortWrite { sent, expected });
                }
                debug!(
                    bytes = sent,
                    attachments = fds.len(),
                    copied = temporaries.len(),
                    "flushed message"
                );
                drop(temporaries);
                self.buffer.clear();
                Ok(())
            }
        }
    }
}

/// The process's outbound channel.
///
/// Cloning shares the channel; all clones serialize through one lock.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<Channel>>,
}

impl Connection {
    fn new(sink: Sink, config: &IoConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Channel {
                sink,
                buffer: OutputBuffer::new(config.chunk_size, config.max_attachments),
                flush_threshold: config.flush_threshold,
                max_attachments: config.max_attachments,
            })),
        }
    }

    /// The process's connection on fd 1.
    ///
    /// The first call probes the descriptor and opens the channel; later calls
    /// return clones sharing its lock, so every driver in the process writes
    /// through one message guard. A later call with a different `config` is
    /// an error.
    pub fn stdout(config: &IoConfig) -> AppResult<Self> {
        static STDOUT: Mutex<Option<(IoConfig, Connection)>> = parking_lot::const_mutex(None);

        let mut slot = STDOUT.lock();
        if let Some((opened_with, conn)) = slot.as_ref() {
            if opened_with != config {
                return Err(IndiError::Config(
                    "stdout connection already open with a different [io] configuration".into(),
                ));
            }
            return Ok(conn.clone());
        }

        let conn = Self::open_stdout(config)?;
        *slot = Some((config.clone(), conn.clone()));
        Ok(conn)
    }

    fn open_stdout(config: &IoConfig) -> AppResult<Self> {
        let stdout = io::stdout();
        let detected = detect_channel(stdout.as_fd());
        let kind = match (config.channel, detected) {
            (ChannelMode::Stream, _) => ChannelKind::Stream,
            (ChannelMode::Socket, ChannelKind::Stream) => {
                return Err(IndiError::Config(
                    "io.channel = \"socket\" but stdout is not a local socket".into(),
                ))
            }
            (_, kind) => kind,
        };
        debug!(?detected, ?kind, "outbound channel selected");

        Ok(match kind {
            ChannelKind::Stream => Self::from_writer(stdout, config),
            ChannelKind::Socket => {
                let fd = stdout.as_fd().try_clone_to_owned()?;
                Self::from_socket(UnixStream::from(fd), config)
            }
        })
    }

    /// Whether `self` and `other` share one channel.
    pub fn same_channel(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write to any byte stream.
    pub fn from_writer(writer: impl Write + Send + 'static, config: &IoConfig) -> Self {
        Self::new(Sink::Stream(Box::new(writer)), config)
    }

    /// Batch messages onto a local socket.
    pub fn from_socket(socket: UnixStream, config: &IoConfig) -> Self {
        Self::new(Sink::Socket(socket), config)
    }

    /// Which channel this connection uses.
    pub fn kind(&self) -> ChannelKind {
        self.inner.lock().kind()
    }

    /// Start a message, blocking until no other message is in progress.
    pub fn begin(&self) -> Message<'_> {
        Message {
            channel: self.inner.lock(),
            finished: false,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channel = self.inner.lock();
        f.debug_struct("Connection")
            .field("kind", &channel.kind())
            .field("pending", &channel.buffer.len())
            .field("max_attachments", &channel.max_attachments)
            .finish()
    }
}

/// Exclusive access to the channel for one message.
///
/// Dropping a guard without calling [`finish`](Self::finish) discards whatever
/// was buffered for the socket channel.
pub struct Message<'a> {
    channel: MutexGuard<'a, Channel>,
    finished: bool,
}

impl Message<'_> {
    /// Flush the message and release the channel.
    pub fn finish(mut self) -> AppResult<()> {
        self.finished = true;
        self.channel.flush()
    }
}

impl Transport for Message<'_> {
    fn write_bytes(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.channel.write(bytes)
    }

    fn supports_attachments(&self) -> bool {
        self.channel.kind() == ChannelKind::Socket
    }

    fn attach_payload(&mut self, tag: &str, data: &BlobData, len: usize) -> AppResult<()> {
        self.channel.attach(tag, data, len)
    }
}

impl Drop for Message<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.channel.buffer.is_empty() {
            debug!(bytes = self.channel.buffer.len(), "discarding unfinished message");
            self.channel.buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn small_io() -> IoConfig {
        IoConfig {
            chunk_size: 64,
            flush_threshold: 256,
            channel: ChannelMode::Auto,
            max_attachments: 4,
        }
    }

    #[test]
    fn stdout_is_one_channel_per_process() {
        let config = IoConfig {
            channel: ChannelMode::Stream,
            ..small_io()
        };
        let a = Connection::stdout(&config).unwrap();
        let b = Connection::stdout(&config).unwrap();
        assert!(a.same_channel(&b));

        // b waits while a holds the message guard.
        let guard = a.begin();
        assert!(b.inner.try_lock().is_none());
        drop(guard);
        assert!(b.inner.try_lock().is_some());

        let other = IoConfig {
            max_attachments: 8,
            ..config
        };
        assert!(matches!(Connection::stdout(&other), Err(IndiError::Config(_))));
    }

    #[test]
    fn stream_writes_immediately() {
        let out = Shared::default();
        let conn = Connection::from_writer(out.clone(), &small_io());
        assert_eq!(conn.kind(), ChannelKind::Stream);

        let mut msg = conn.begin();
        assert!(!msg.supports_attachments());
        msg.write_formatted(format_args!("<a n='{}'/>", 1)).unwrap();
        assert_eq!(&out.0.lock()[..], b"<a n='1'/>");
        let err = msg
            .attach_payload("<oneBLOB/>", &BlobData::from(vec![1u8]), 1)
            .unwrap_err();
        assert!(matches!(err, IndiError::AttachmentsUnsupported));
        msg.finish().unwrap();
    }

    #[test]
    fn socket_sends_on_finish_only() {
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let conn = Connection::from_socket(a, &small_io());

        let mut msg = conn.begin();
        msg.write_bytes(b"<hello/>\n").unwrap();
        let mut buf = [0u8; 64];
        assert!(recv_with_fds(&b, &mut buf, 4).is_err());
        msg.finish().unwrap();

        let (n, fds) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert_eq!(&buf[..n], b"<hello/>\n");
        assert!(fds.is_empty());
    }

    #[test]
    fn dropped_message_is_discarded() {
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let conn = Connection::from_socket(a, &small_io());
        {
            let mut msg = conn.begin();
            msg.write_bytes(b"<partial").unwrap();
        }
        let mut msg = conn.begin();
        msg.write_bytes(b"<whole/>").unwrap();
        msg.finish().unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert_eq!(&buf[..n], b"<whole/>");
    }

    #[test]
    fn high_water_mark_flushes_early() {
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let conn = Connection::from_socket(a, &small_io());

        let mut msg = conn.begin();
        msg.write_bytes(&[b'x'; 300]).unwrap();
        let mut buf = [0u8; 1024];
        let (n, _) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert_eq!(n, 300);
        msg.write_bytes(b"tail").unwrap();
        msg.finish().unwrap();
        let (n, _) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert_eq!(&buf[..n], b"tail");
    }

    #[test]
    fn inline_attachment_is_copied_to_shared_memory() {
        let (a, b) = UnixStream::pair().unwrap();
        let conn = Connection::from_socket(a, &small_io());

        let mut msg = conn.begin();
        assert!(msg.supports_attachments());
        msg.attach_payload("<oneBLOB name='X' len='5' attached='true'/>", &BlobData::from(b"12345".to_vec()), 5)
            .unwrap();
        msg.finish().unwrap();

        let mut buf = [0u8; 128];
        let (n, mut fds) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert!(std::str::from_utf8(&buf[..n]).unwrap().contains("attached='true'"));
        assert_eq!(fds.len(), 1);
        let blob = SharedBlob::from_fd(fds.remove(0), 5).unwrap();
        assert_eq!(blob.as_slice(), b"12345");
    }

    #[test]
    fn too_many_attachments_is_fatal() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_socket(a, &small_io());
        let data = BlobData::from(vec![0u8; 4]);

        let mut msg = conn.begin();
        for _ in 0..4 {
            msg.attach_payload("<oneBLOB/>", &data, 4).unwrap();
        }
        let err = msg.attach_payload("<oneBLOB/>", &data, 4).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn send_to_closed_peer_is_fatal() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let conn = Connection::from_socket(a, &small_io());
        let mut msg = conn.begin();
        msg.write_bytes(b"<gone/>").unwrap();
        let err = msg.finish().unwrap_err();
        assert!(matches!(err, IndiError::Transmit(_)));
        assert!(err.is_fatal());
    }
}
