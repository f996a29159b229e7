//! Incremental splitter for the inbound byte stream.
//!
//! Bytes arrive in arbitrary pieces; the decoder buffers them, tracks tag depth
//! (respecting quoted attribute values, comments, CDATA and declarations) and
//! yields each complete top-level element. Descriptors received alongside the
//! bytes are queued and handed, in order, to `oneBLOB` children marked
//! `attached='true'`.

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use tracing::trace;

use crate::error::{AppResult, IndiError};
use crate::property::{BlobData, SharedBlob};

use super::Element;

/// Default cap on a single buffered message.
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024 * 1024;

/// Streaming message decoder.
#[derive(Debug)]
pub struct MessageDecoder {
    buf: Vec<u8>,
    pos: usize,
    depth: usize,
    start: Option<usize>,
    fds: VecDeque<OwnedFd>,
    max_message: usize,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum Tag {
    Open,
    Close,
    SelfClosing,
    Skip,
}

impl MessageDecoder {
    /// Create a decoder with the default message size cap.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE)
    }

    /// Create a decoder that rejects messages longer than `max_message` bytes.
    pub fn with_max_message(max_message: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            depth: 0,
            start: None,
            fds: VecDeque::new(),
            max_message,
        }
    }

    /// Buffer received bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Queue descriptors received with the bytes.
    pub fn push_fds(&mut self, fds: impl IntoIterator<Item = OwnedFd>) {
        self.fds.extend(fds);
    }

    /// Bytes buffered but not yet returned.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete message, or `None` if more input is needed.
    ///
    /// A malformed message is consumed and reported; the following call
    /// continues with the next one.
    pub fn next_message(&mut self) -> AppResult<Option<Element>> {
        loop {
            let Some(offset) = self.buf[self.pos..].iter().position(|b| *b == b'<') else {
                if self.start.is_none() {
                    // text between messages
                    self.buf.clear();
                    self.pos = 0;
                } else {
                    self.pos = self.buf.len();
                }
                return self.check_size();
            };
            let mut lt = self.pos + offset;

            if self.start.is_none() && lt > 0 {
                self.buf.drain(..lt);
                lt = 0;
            }

            let Some((end, tag)) = self.scan_tag(lt) else {
                self.pos = lt;
                return self.check_size();
            };
            self.pos = end + 1;

            let complete = match tag {
                Tag::Skip => None,
                Tag::SelfClosing if self.depth == 0 => Some(lt),
                Tag::SelfClosing => None,
                Tag::Open => {
                    if self.depth == 0 {
                        self.start = Some(lt);
                    }
                    self.depth += 1;
                    None
                }
                Tag::Close => {
                    if self.depth == 0 {
                        self.buf.drain(..=end);
                        self.pos = 0;
                        return Err(IndiError::Malformed("end tag without start".into()));
                    }
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.start.take()
                    } else {
                        None
                    }
                }
            };

            if let Some(begin) = complete {
                let raw: Vec<u8> = self.buf.drain(..=end).skip(begin).collect();
                self.pos = 0;
                return self.finish(raw).map(Some);
            }
        }
    }

    fn check_size(&mut self) -> AppResult<Option<Element>> {
        if self.buf.len() > self.max_message {
            let len = self.buf.len();
            self.buf.clear();
            self.pos = 0;
            self.depth = 0;
            self.start = None;
            return Err(IndiError::Malformed(format!("message exceeds {} bytes ({len})", self.max_message)));
        }
        Ok(None)
    }

    /// Find the `>` closing the tag that opens at `lt`.
    fn scan_tag(&self, lt: usize) -> Option<(usize, Tag)> {
        let rest = &self.buf[lt..];
        let find = |needle: &[u8]| {
            rest.windows(needle.len())
                .position(|w| w == needle)
                .map(|p| lt + p + needle.len() - 1)
        };

        if rest.starts_with(b"<!--") {
            return find(b"-->").map(|end| (end, Tag::Skip));
        }
        if rest.starts_with(b"<![CDATA[") {
            return find(b"]]>").map(|end| (end, Tag::Skip));
        }
        if rest.starts_with(b"<?") {
            return find(b"?>").map(|end| (end, Tag::Skip));
        }
        if rest.len() < 2 {
            return None;
        }

        let mut quote: Option<u8> = None;
        for (i, &b) in rest.iter().enumerate().skip(1) {
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'\'' || b == b'"' => quote = Some(b),
                None if b == b'>' => {
                    let tag = if rest[1] == b'/' {
                        Tag::Close
                    } else if rest[1] == b'!' {
                        Tag::Skip
                    } else if rest[i - 1] == b'/' {
                        Tag::SelfClosing
                    } else {
                        Tag::Open
                    };
                    return Some((lt + i, tag));
                }
                None => {}
            }
        }
        None
    }

    fn finish(&mut self, raw: Vec<u8>) -> AppResult<Element> {
        // Claim this message's descriptors before anything can fail, so a
        // rejected message never leaves them for the next one.
        let claimed = attached_count(&raw).min(self.fds.len());
        let mut fds: VecDeque<OwnedFd> = self.fds.drain(..claimed).collect();

        let text = String::from_utf8(raw).map_err(|e| IndiError::Malformed(e.to_string()))?;
        let mut root = Element::parse(&text)?;
        trace!(element = %root.name, bytes = text.len(), "decoded message");

        for child in root.children.iter_mut() {
            if child.name != "oneBLOB" || child.attr("attached") != Some("true") {
                continue;
            }
            let len: usize = child
                .require("len")?
                .trim()
                .parse()
                .map_err(|_| IndiError::Malformed(format!("bad len on attached BLOB in <{}>", root.name)))?;
            let fd = fds
                .pop_front()
                .ok_or_else(|| IndiError::Malformed("attached BLOB without a descriptor".into()))?;
            child.attachment = Some(BlobData::Shared(Arc::new(SharedBlob::from_fd(fd, len)?)));
        }
        if !fds.is_empty() {
            trace!(unused = fds.len(), "closing descriptors without an attached BLOB");
        }
        Ok(root)
    }
}

/// Number of `attached='true'` markers in a raw message.
fn attached_count(raw: &[u8]) -> usize {
    [&b"attached='true'"[..], &b"attached=\"true\""[..]]
        .iter()
        .map(|needle| raw.windows(needle.len()).filter(|w| w == needle).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    fn drain(decoder: &mut MessageDecoder) -> Vec<Element> {
        let mut out = Vec::new();
        while let Some(el) = decoder.next_message().unwrap() {
            out.push(el);
        }
        out
    }

    #[test]
    fn splits_back_to_back_messages() {
        let mut d = MessageDecoder::new();
        d.push_bytes(b"<pingRequest uid='1'/>\n<getProperties version='1.7'/>\n");
        let msgs = drain(&mut d);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].name, "pingRequest");
        assert_eq!(msgs[1].name, "getProperties");
    }

    #[test]
    fn waits_for_partial_input() {
        let text = b"<newNumberVector device='Foo' name='AXIS1'>\n  <oneNumber name='POS'>\n 5\n </oneNumber>\n</newNumberVector>\n";
        let mut d = MessageDecoder::new();
        let mut got = Vec::new();
        for chunk in text.chunks(7) {
            d.push_bytes(chunk);
            got.extend(drain(&mut d));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].children[0].trimmed_text(), "5");
    }

    #[test]
    fn quoted_angle_brackets_do_not_split() {
        let mut d = MessageDecoder::new();
        d.push_bytes(b"<message device='Foo' message='a > b'/>");
        let msgs = drain(&mut d);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].attr("message"), Some("a > b"));
    }

    #[test]
    fn skips_declarations_and_comments() {
        let mut d = MessageDecoder::new();
        d.push_bytes(b"<?xml version='1.0'?>\n<!-- <not a tag> -->\n<pingReply uid='x'/>");
        let msgs = drain(&mut d);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].name, "pingReply");
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn malformed_message_is_reported_and_skipped() {
        let mut d = MessageDecoder::new();
        d.push_bytes(b"<a><b></c></a><pingRequest uid='2'/>");
        assert!(d.next_message().is_err());
        let next = d.next_message().unwrap().unwrap();
        assert_eq!(next.attr("uid"), Some("2"));
    }

    #[test]
    fn stray_end_tag_is_an_error() {
        let mut d = MessageDecoder::new();
        d.push_bytes(b"</oops><pingRequest uid='3'/>");
        assert!(d.next_message().is_err());
        assert_eq!(d.next_message().unwrap().unwrap().attr("uid"), Some("3"));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut d = MessageDecoder::with_max_message(32);
        d.push_bytes(b"<setTextVector device='Foo' name='X'><oneText name='T'>");
        d.push_bytes(&[b'z'; 64]);
        assert!(d.next_message().is_err());
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn attaches_descriptors_in_order() {
        let a = SharedBlob::from_bytes(b"alpha").unwrap();
        let b = SharedBlob::from_bytes(b"bravo!").unwrap();

        let mut d = MessageDecoder::new();
        d.push_fds([
            a.as_fd().try_clone_to_owned().unwrap(),
            b.as_fd().try_clone_to_owned().unwrap(),
        ]);
        d.push_bytes(
            b"<setBLOBVector device='Cam' name='CCD1'>\n\
              <oneBLOB name='A' size='5' len='5' format='.raw' attached='true'/>\n\
              <oneBLOB name='B' size='6' len='6' format='.raw' attached='true'/>\n\
              </setBLOBVector>\n",
        );
        let msg = d.next_message().unwrap().unwrap();
        let first = msg.children[0].attachment.as_ref().unwrap();
        let second = msg.children[1].attachment.as_ref().unwrap();
        assert_eq!(first.as_slice(), b"alpha");
        assert_eq!(second.as_slice(), b"bravo!");
    }

    #[test]
    fn rejected_message_consumes_its_descriptors() {
        let stale = SharedBlob::from_bytes(b"STALE").unwrap();
        let fresh = SharedBlob::from_bytes(b"FRESH").unwrap();

        let mut d = MessageDecoder::new();
        d.push_fds([stale.as_fd().try_clone_to_owned().unwrap()]);
        d.push_bytes(
            b"<setBLOBVector device='Cam' name='CCD1'>\
              <oneBLOB name='A' size='5' len='5' format='.raw' attached='true'/>\
              </setBLOBVectorX>\n",
        );
        assert!(d.next_message().is_err());

        d.push_fds([fresh.as_fd().try_clone_to_owned().unwrap()]);
        d.push_bytes(
            b"<setBLOBVector device='Cam' name='CCD1'>\
              <oneBLOB name='A' size='5' len='5' format='.raw' attached='true'/>\
              </setBLOBVector>\n",
        );
        let msg = d.next_message().unwrap().unwrap();
        assert_eq!(msg.children[0].attachment.as_ref().unwrap().as_slice(), b"FRESH");
    }

    #[test]
    fn bad_len_consumes_every_descriptor_of_the_message() {
        let blobs: Vec<SharedBlob> = [&b"one"[..], b"two", b"new"]
            .iter()
            .map(|b| SharedBlob::from_bytes(b).unwrap())
            .collect();

        let mut d = MessageDecoder::new();
        d.push_fds(blobs[..2].iter().map(|b| b.as_fd().try_clone_to_owned().unwrap()));
        d.push_bytes(
            b"<setBLOBVector device='Cam' name='CCD1'>\
              <oneBLOB name='A' size='3' len='x' format='' attached='true'/>\
              <oneBLOB name='B' size='3' len='3' format='' attached='true'/>\
              </setBLOBVector>\n",
        );
        assert!(matches!(d.next_message(), Err(IndiError::Malformed(_))));

        d.push_fds([blobs[2].as_fd().try_clone_to_owned().unwrap()]);
        d.push_bytes(b"<setBLOBVector device='Cam' name='CCD1'><oneBLOB name='A' size='3' len='3' format='' attached='true'/></setBLOBVector>");
        let msg = d.next_message().unwrap().unwrap();
        assert_eq!(msg.children[0].attachment.as_ref().unwrap().as_slice(), b"new");
    }

    #[test]
    fn attached_blob_without_descriptor_fails() {
        let mut d = MessageDecoder::new();
        d.push_bytes(b"<setBLOBVector device='Cam' name='CCD1'><oneBLOB name='A' size='1' len='1' format='' attached='true'/></setBLOBVector>");
        assert!(matches!(d.next_message(), Err(IndiError::Malformed(_))));
    }
}
