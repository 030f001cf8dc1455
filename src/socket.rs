// ABOUTME: Raw Unix-domain socket transport with SCM_RIGHTS fd passing
// ABOUTME: Non-blocking send/recv primitives; no buffering or framing here

//! The lowest transport layer: a non-blocking `AF_UNIX` `SOCK_STREAM` socket
//! that can carry file descriptors alongside bytes via ancillary data. This
//! module knows nothing about message framing or object ids; it only moves
//! bytes and fds in and out of the kernel. [`crate::connection`] builds the
//! buffered, frame-aware layer on top of it.

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};
use nix::sys::uio::IoSlice;
use std::io::IoSliceMut;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

/// A single `sendmsg`/`recvmsg` call should not move more than this many
/// bytes or file descriptors, matching the de-facto Wayland wire limits.
pub const MAX_BYTES_PER_DATAGRAM: usize = 4096;
pub const MAX_FDS_PER_DATAGRAM: usize = 28;

/// A non-blocking Unix domain socket wrapper around raw `sendmsg`/`recvmsg`.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    /// Wrap an already-connected, already-non-blocking fd. Callers are
    /// expected to have set `O_NONBLOCK` themselves (e.g. via
    /// `UnixStream::set_nonblocking`) before constructing a `Socket`.
    pub fn new(fd: OwnedFd) -> Socket {
        Socket { fd }
    }

    /// Send `bytes` plus `fds` as one datagram-ish message. `fds` must not
    /// exceed [`MAX_FDS_PER_DATAGRAM`] or the kernel may silently drop the
    /// excess. Returns the number of bytes actually written; a short write
    /// (fewer bytes than given) is possible and must be retried by the
    /// caller with the remaining bytes and no fds resent.
    pub fn send(&self, bytes: &[u8], fds: &[RawFd]) -> nix::Result<usize> {
        let flags = MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL;
        let iov = [IoSlice::new(bytes)];
        if fds.is_empty() {
            socket::sendmsg::<()>(self.fd.as_raw_fd(), &iov, &[], flags, None)
        } else {
            let cmsgs = [ControlMessage::ScmRights(fds)];
            socket::sendmsg::<()>(self.fd.as_raw_fd(), &iov, &cmsgs, flags, None)
        }
    }

    /// Receive into `buffer`, collecting any passed fds into `fds_out`
    /// (appended, in the order the kernel delivered them). Returns the
    /// number of bytes read; `0` means the peer performed an orderly
    /// shutdown. `Err(EWOULDBLOCK)` means no data is currently available.
    pub fn recv(&self, buffer: &mut [u8], fds_out: &mut Vec<OwnedFd>) -> nix::Result<usize> {
        let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_FDS_PER_DATAGRAM]);
        let mut iov = [IoSliceMut::new(buffer)];
        let msg = socket::recvmsg::<()>(
            self.fd.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_space),
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_CMSG_CLOEXEC | MsgFlags::MSG_NOSIGNAL,
        )?;

        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                for raw in raw_fds {
                    // SAFETY: the kernel transferred ownership of this fd to us
                    // via SCM_RIGHTS; CLOEXEC was requested above.
                    fds_out.push(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }
        Ok(msg.bytes)
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
    use std::io::Write;
    use std::os::fd::AsRawFd as _;

    fn pair() -> (Socket, Socket) {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        (Socket::new(a), Socket::new(b))
    }

    #[test]
    fn send_and_recv_round_trip_bytes() {
        let (a, b) = pair();
        let n = a.send(b"hello", &[]).unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 16];
        let mut fds = Vec::new();
        let n = b.recv(&mut buf, &mut fds).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(fds.is_empty());
    }

    #[test]
    fn recv_without_data_would_block() {
        let (_a, b) = pair();
        let mut buf = [0u8; 16];
        let mut fds = Vec::new();
        let err = b.recv(&mut buf, &mut fds).unwrap_err();
        assert_eq!(err, nix::errno::Errno::EWOULDBLOCK);
    }

    #[test]
    fn send_and_recv_round_trip_fds() {
        let (a, b) = pair();
        let mut tmp = tempfile_like();
        tmp.write_all(b"payload").unwrap();
        let raw = tmp.as_raw_fd();
        a.send(b"x", &[raw]).unwrap();

        let mut buf = [0u8; 16];
        let mut fds = Vec::new();
        let n = b.recv(&mut buf, &mut fds).unwrap();
        assert_eq!(&buf[..n], b"x");
        assert_eq!(fds.len(), 1);
    }

    fn tempfile_like() -> std::fs::File {
        use nix::sys::memfd::{memfd_create, MFdFlags};
        let fd = memfd_create("waycore-socket-test", MFdFlags::empty()).unwrap();
        std::fs::File::from(fd)
    }
}
