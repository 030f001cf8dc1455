// ABOUTME: Buffered, non-blocking frame transport built on top of the raw socket
// ABOUTME: Owns the inbound/outbound byte and fd queues; drives flush/recv/drain

//! A **Connection** is the buffered layer above [`crate::socket::Socket`]: it
//! owns the outbound frame queue, the inbound byte buffer, and the inbound
//! fd queue, and exposes the cooperative `flush` / `recv_once` / `drain_frames`
//! operations that [`crate::dispatch::Dispatcher::pump`] drives.
//!
//! Nothing here knows about object ids or interfaces; `drain_frames` hands
//! each complete frame to a caller-supplied closure as a
//! `(target_id, opcode, payload, &mut VecDeque<OwnedFd>)` tuple and lets the
//! dispatcher decode it against the right signature.

use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::io::Cursor;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use tracing::{trace, warn};

use crate::error::ConnectionError;
use crate::socket::{Socket, MAX_BYTES_PER_DATAGRAM};
use crate::wire::{MessageHeader, WireError};

/// One frame waiting to be written: its already-encoded bytes and the fds
/// that must ride alongside them in the same `sendmsg` call.
struct Outbound {
    bytes: BytesMut,
    fds: Vec<OwnedFd>,
}

/// The buffered, frame-aware transport for one peer.
pub struct Connection {
    socket: Socket,
    inbound: BytesMut,
    inbound_fds: VecDeque<OwnedFd>,
    outbound: VecDeque<Outbound>,
    closed: bool,
}

impl Connection {
    pub fn new(socket: Socket) -> Connection {
        Connection {
            socket,
            inbound: BytesMut::with_capacity(2 * MAX_BYTES_PER_DATAGRAM),
            inbound_fds: VecDeque::new(),
            outbound: VecDeque::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue an already-encoded frame (header + args) plus the fds that
    /// belong to it, for the next `flush()`.
    pub fn enqueue(&mut self, bytes: BytesMut, fds: Vec<OwnedFd>) {
        self.outbound.push_back(Outbound { bytes, fds });
    }

    /// Encode `args` as one message from `sender` at `opcode` and queue it.
    /// Fd-typed arguments are split out and travel as ancillary data on the
    /// same queued frame.
    pub fn send(
        &mut self,
        sender: u32,
        opcode: u16,
        args: Vec<crate::wire::ArgValue>,
    ) -> Result<(), WireError> {
        let (values, fds) = crate::wire::take_fds(args);
        let bytes = crate::wire::encode_message(sender, opcode, &values)?;
        self.enqueue(bytes, fds);
        Ok(())
    }

    /// Drain the outbound queue via `sendmsg`. On `EAGAIN` the front frame is
    /// left (partially consumed if a short write occurred) for the next
    /// call. FDs are only ever sent once, with the first chunk of their
    /// frame's bytes; if that chunk was short, the retry carries no fds.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        while let Some(front) = self.outbound.front_mut() {
            let raw_fds: Vec<RawFd> = front
                .fds
                .iter()
                .map(std::os::fd::AsRawFd::as_raw_fd)
                .collect();
            match self.socket.send(&front.bytes, &raw_fds) {
                Ok(n) => {
                    // fds are transferred to the kernel atomically with the
                    // first successful write; drop our copies now.
                    front.fds.clear();
                    if n >= front.bytes.len() {
                        self.outbound.pop_front();
                    } else {
                        front.bytes.advance(n);
                    }
                }
                Err(nix::errno::Errno::EWOULDBLOCK) => return Ok(()),
                Err(nix::errno::Errno::EPIPE) | Err(nix::errno::Errno::ECONNRESET) => {
                    self.closed = true;
                    return Err(ConnectionError::PeerClosed);
                }
                Err(e) => return Err(ConnectionError::Io(e.into())),
            }
        }
        Ok(())
    }

    /// Perform one `recvmsg`, appending bytes and fds to the inbound queues.
    /// Returns `true` if data was read, `false` on `EAGAIN`.
    pub fn recv_once(&mut self) -> Result<bool, ConnectionError> {
        let mut chunk = [0u8; MAX_BYTES_PER_DATAGRAM];
        let mut new_fds = Vec::new();
        match self.socket.recv(&mut chunk, &mut new_fds) {
            Ok(0) => {
                self.closed = true;
                Err(ConnectionError::PeerClosed)
            }
            Ok(n) => {
                self.inbound.extend_from_slice(&chunk[..n]);
                self.inbound_fds.extend(new_fds);
                Ok(true)
            }
            Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
            Err(nix::errno::Errno::EPIPE) | Err(nix::errno::Errno::ECONNRESET) => {
                self.closed = true;
                Err(ConnectionError::PeerClosed)
            }
            Err(e) => Err(ConnectionError::Io(e.into())),
        }
    }

    /// Peel every complete frame currently buffered into a plain list of
    /// `(target_id, opcode, payload_bytes)`. Leftover partial bytes remain
    /// buffered for the next recv. Fds are deliberately NOT consumed here:
    /// a frame's `fd` arguments are only popped off [`Connection::fds_mut`]
    /// once the caller knows the frame's signature and decodes it, since the
    /// inbound fd queue is shared FIFO state across frames.
    pub fn drain_frames(&mut self) -> Result<Vec<(u32, u16, bytes::Bytes)>, ConnectionError> {
        let mut frames = Vec::new();
        loop {
            let header = {
                let cursor = Cursor::new(&self.inbound[..]);
                match MessageHeader::peek(&cursor) {
                    Ok(header) => header,
                    Err(WireError::Incomplete) => return Ok(frames),
                    Err(e) => return Err(ConnectionError::Wire(e)),
                }
            };
            let size = header.size as usize;
            if self.inbound.len() < size {
                return Ok(frames);
            }

            let frame_bytes = self.inbound.split_to(size).freeze();
            let payload = frame_bytes.slice(MessageHeader::SIZE..);
            trace!(target = header.sender, opcode = header.opcode, size, "framed");
            frames.push((header.sender, header.opcode, payload));
        }
    }

    /// The inbound fd queue, FIFO across frames as they are decoded in the
    /// order `drain_frames` returned them.
    pub fn fds_mut(&mut self) -> &mut VecDeque<OwnedFd> {
        &mut self.inbound_fds
    }

    /// Close the underlying socket, dropping (and thus closing) any still
    /// queued outbound fds and any unconsumed inbound fds.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.outbound.clear();
        self.inbound_fds.clear();
        warn!("connection closed");
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{encode_message, ArgValue};
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    fn pair() -> (Connection, Connection) {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        (Connection::new(Socket::new(a)), Connection::new(Socket::new(b)))
    }

    #[test]
    fn single_frame_round_trips_through_pump_style_calls() {
        let (mut sender, mut receiver) = pair();
        let bytes = encode_message(1, 0, &[ArgValue::Uint(7)]).unwrap();
        sender.enqueue(bytes, Vec::new());
        sender.flush().unwrap();

        receiver.recv_once().unwrap();
        let frames = receiver.drain_frames().unwrap();
        let seen: Vec<(u32, u16)> = frames.iter().map(|(t, o, _)| (*t, *o)).collect();
        assert_eq!(seen, vec![(1, 0)]);
    }

    #[test]
    fn partial_read_across_three_recvs_yields_two_frames() {
        let (mut sender, mut receiver) = pair();
        let frame_a = encode_message(1, 0, &[ArgValue::Uint(1)]).unwrap();
        let frame_b = encode_message(1, 0, &[ArgValue::Uint(2)]).unwrap();
        sender.enqueue(frame_a, Vec::new());
        sender.enqueue(frame_b, Vec::new());
        sender.flush().unwrap();

        // Give the kernel a moment to make both writes visible as one
        // readable chunk; recv_once may need a couple of calls depending on
        // scheduling, mirroring the non-blocking retry loop `pump` performs.
        for _ in 0..8 {
            match receiver.recv_once() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => break,
            }
        }
        let frames = receiver.drain_frames().unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn peer_shutdown_is_reported_as_peer_closed() {
        let (sender, mut receiver) = pair();
        drop(sender);
        // A closed peer surfaces as EOF (0 bytes) on the next recv.
        for _ in 0..8 {
            match receiver.recv_once() {
                Err(ConnectionError::PeerClosed) => {
                    assert!(receiver.is_closed());
                    return;
                }
                Ok(false) => continue,
                other => {
                    other.ok();
                }
            }
        }
        panic!("expected PeerClosed within retry budget");
    }
}
