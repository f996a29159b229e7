//! Local-socket plumbing: channel detection and descriptor passing.
//!
//! Payload descriptors travel as `SCM_RIGHTS` ancillary data attached to the
//! message bytes in a single `sendmsg` call, so the hub sees the text and the
//! descriptors together.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// What fd 1 (or any outbound descriptor) is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// A pipe, file or terminal. BLOBs must be inlined.
    Stream,
    /// A local-domain socket. BLOBs can be attached as descriptors.
    Socket,
}

/// Probe whether `fd` is a local-domain socket.
pub fn detect_channel(fd: BorrowedFd<'_>) -> ChannelKind {
    let raw = fd.as_raw_fd();

    // SAFETY: `stat` is plain data; fstat fills it for a valid descriptor.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    if unsafe { libc::fstat(raw, &mut st) } != 0 {
        return ChannelKind::Stream;
    }
    if st.st_mode & libc::S_IFMT != libc::S_IFSOCK {
        return ChannelKind::Stream;
    }

    // SAFETY: sockaddr_storage is large enough for any address family.
    let mut addr: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe { libc::getsockname(raw, (&mut addr as *mut libc::sockaddr_storage).cast(), &mut len) };
    if rc == 0 && i32::from(addr.ss_family) == libc::AF_UNIX {
        ChannelKind::Socket
    } else {
        ChannelKind::Stream
    }
}

fn cmsg_space(fds: usize) -> usize {
    let bytes = (fds * mem::size_of::<libc::c_int>()) as u32;
    // SAFETY: CMSG_SPACE is a pure size computation.
    unsafe { libc::CMSG_SPACE(bytes) as usize }
}

/// Send `data` with `fds` attached, in one `sendmsg`.
///
/// Returns the number of bytes the kernel accepted; the caller decides whether a
/// short count is acceptable. Interrupted calls are retried.
pub fn send_with_fds(stream: &UnixStream, data: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let mut cmsg_buf = vec![0u8; if fds.is_empty() { 0 } else { cmsg_space(fds.len()) }];

    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };

    // SAFETY: msghdr is plain data; every field we rely on is set below.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_buf.len() as _;

        // SAFETY: the control buffer is CMSG_SPACE(n) bytes, so the first header
        // and n descriptors fit.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * mem::size_of::<libc::c_int>()) as u32) as _;
            let data_ptr = libc::CMSG_DATA(cmsg) as *mut libc::c_int;
            for (i, fd) in fds.iter().enumerate() {
                std::ptr::write_unaligned(data_ptr.add(i), *fd);
            }
        }
    }

    #[cfg(target_os = "linux")]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(target_os = "linux"))]
    let flags = 0;

    loop {
        // SAFETY: msg points at live buffers for the duration of the call.
        let n = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, flags) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Receive one message and any descriptors sent with it.
///
/// This is the hub side of [`send_with_fds`]; the driver uses it only to accept
/// attached payloads on its inbound channel and in tests.
pub fn recv_with_fds(stream: &UnixStream, buf: &mut [u8], max_fds: usize) -> io::Result<(usize, Vec<OwnedFd>)> {
    let mut cmsg_buf = vec![0u8; cmsg_space(max_fds.max(1))];

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    // SAFETY: msghdr is plain data; every field we rely on is set below.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_buf.len() as _;

    #[cfg(target_os = "linux")]
    let flags = libc::MSG_CMSG_CLOEXEC;
    #[cfg(not(target_os = "linux"))]
    let flags = 0;

    let n = loop {
        // SAFETY: msg points at live buffers for the duration of the call.
        let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &mut msg, flags) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    let mut fds = Vec::new();
    // SAFETY: the kernel filled msg_control with well-formed headers; CMSG_NXTHDR
    // stays within msg_controllen.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let count =
                    ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize) / mem::size_of::<libc::c_int>();
                for i in 0..count {
                    let fd: libc::c_int =
                        std::ptr::read_unaligned(data.add(i * mem::size_of::<libc::c_int>()) as *const libc::c_int);
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((n, fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::SharedBlob;
    use std::os::fd::AsFd;

    #[test]
    fn detects_socketpair_as_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert_eq!(detect_channel(a.as_fd()), ChannelKind::Socket);
    }

    #[test]
    fn detects_file_as_stream() {
        let file = tempfile::tempfile().unwrap();
        assert_eq!(detect_channel(file.as_fd()), ChannelKind::Stream);
    }

    #[test]
    fn plain_send_and_receive() {
        let (a, b) = UnixStream::pair().unwrap();
        let sent = send_with_fds(&a, b"<pingRequest uid='1'/>\n", &[]).unwrap();
        assert_eq!(sent, 23);

        let mut buf = [0u8; 64];
        let (n, fds) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert_eq!(&buf[..n], b"<pingRequest uid='1'/>\n");
        assert!(fds.is_empty());
    }

    #[test]
    fn descriptors_arrive_in_order() {
        let (a, b) = UnixStream::pair().unwrap();
        let first = SharedBlob::from_bytes(b"first").unwrap();
        let second = SharedBlob::from_bytes(b"second payload").unwrap();

        send_with_fds(&a, b"two", &[first.as_raw_fd(), second.as_raw_fd()]).unwrap();

        let mut buf = [0u8; 16];
        let (n, mut fds) = recv_with_fds(&b, &mut buf, 4).unwrap();
        assert_eq!(&buf[..n], b"two");
        assert_eq!(fds.len(), 2);

        let second_fd = fds.pop().unwrap();
        let first_fd = fds.pop().unwrap();
        let got_first = SharedBlob::from_fd(first_fd, 5).unwrap();
        let got_second = SharedBlob::from_fd(second_fd, 14).unwrap();
        assert_eq!(got_first.as_slice(), b"first");
        assert_eq!(got_second.as_slice(), b"second payload");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn send_to_closed_peer_fails_without_signal() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let err = send_with_fds(&a, b"lost", &[]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
