//! Accumulator for one outgoing message.
//!
//! Bytes are appended into a `Vec` whose capacity grows in whole multiples of a
//! fixed chunk size. Attached payloads are not copied; the buffer records the
//! handle and the announced length in order, up to a fixed per-message limit.

use crate::error::{AppResult, IndiError};
use crate::property::BlobData;

/// A payload queued for descriptor attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Payload handle.
    pub data: BlobData,
    /// Bytes announced on the wire.
    pub len: usize,
}

/// Growable byte buffer plus ordered attachments.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    attachments: Vec<Attachment>,
    chunk_size: usize,
    max_attachments: usize,
}

impl OutputBuffer {
    /// Empty buffer growing by `chunk_size` and holding at most `max_attachments`.
    pub fn new(chunk_size: usize, max_attachments: usize) -> Self {
        Self {
            data: Vec::new(),
            attachments: Vec::new(),
            chunk_size: chunk_size.max(1),
            max_attachments,
        }
    }

    /// Append bytes, growing capacity to the next chunk multiple when needed.
    pub fn push(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Queue a payload. Exceeding the attachment limit is fatal.
    pub fn attach(&mut self, data: BlobData, len: usize) -> AppResult<()> {
        if self.attachments.len() >= self.max_attachments {
            return Err(IndiError::TooManyAttachments {
                max: self.max_attachments,
            });
        }
        self.attachments.push(Attachment { data, len });
        Ok(())
    }

    fn reserve(&mut self, additional: usize) -> AppResult<()> {
        let required = self
            .data
            .len()
            .checked_add(additional)
            .ok_or(IndiError::BufferGrowth { requested: usize::MAX })?;
        if required <= self.data.capacity() {
            return Ok(());
        }
        let target = required
            .checked_next_multiple_of(self.chunk_size)
            .ok_or(IndiError::BufferGrowth { requested: required })?;
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| IndiError::BufferGrowth { requested: target })
    }

    /// Accumulated bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Queued attachments in order.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Number of accumulated bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.attachments.is_empty()
    }

    /// Current byte capacity.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Drop pending bytes and attachments, keeping capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.attachments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_in_chunks_without_losing_bytes() {
        let mut buf = OutputBuffer::new(16, 4);
        let mut expected = Vec::new();
        for i in 0..500u32 {
            let piece = format!("<{}>", i);
            buf.push(piece.as_bytes()).unwrap();
            expected.extend_from_slice(piece.as_bytes());
            assert!(buf.capacity() >= buf.len());
        }
        assert_eq!(buf.bytes(), &expected[..]);
    }

    #[test]
    fn first_growth_rounds_to_chunk() {
        let mut buf = OutputBuffer::new(64, 4);
        buf.push(b"abc").unwrap();
        assert!(buf.capacity() >= 64);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn attachment_limit_is_enforced() {
        let mut buf = OutputBuffer::new(64, 2);
        let data = BlobData::from(vec![1u8, 2, 3]);
        buf.attach(data.clone(), 3).unwrap();
        buf.attach(data.clone(), 3).unwrap();
        let err = buf.attach(data, 3).unwrap_err();
        assert!(matches!(err, IndiError::TooManyAttachments { max: 2 }));
        assert!(err.is_fatal());
        assert_eq!(buf.attachments().len(), 2);
    }

    #[test]
    fn clear_resets_contents() {
        let mut buf = OutputBuffer::new(8, 2);
        buf.push(b"0123456789").unwrap();
        buf.attach(BlobData::from(vec![0u8]), 1).unwrap();
        assert!(!buf.is_empty());
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn impossible_growth_is_fatal() {
        let mut buf = OutputBuffer::new(usize::MAX / 2 + 1, 2);
        let err = buf.push(b"x").unwrap_err();
        assert!(matches!(err, IndiError::BufferGrowth { .. }));
        assert!(err.is_fatal());
    }
}
