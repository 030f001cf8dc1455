// ABOUTME: Routes decoded frames from a Connection to per-object handler trait objects
// ABOUTME: Drives the flush/recv/drain_frames cooperative pump described for the core

//! The **Dispatcher** ties [`crate::connection::Connection`] (bytes in/out),
//! [`crate::object::ObjectTable`] (id → interface resolution), and a
//! per-object [`Handler`] trait object together into the single cooperative
//! `pump()` call a host application drives on its event-loop tick.
//!
//! Both client and server use the same `Dispatcher`; the only difference is
//! which half of the wire messages a given interface's `Handler`
//! implementation treats as "incoming" (events on the client, requests on
//! the server) versus "outgoing".

use std::collections::HashMap;
use std::io::Cursor;
use std::os::fd::{AsFd, BorrowedFd};
use tracing::{instrument, warn};

use crate::connection::Connection;
use crate::error::{ConnectionError, DispatchError, ProtocolError};
use crate::interface::Interface;
use crate::object::{ObjectError, ObjectTable, Side, DISPLAY_ID};
use crate::wire::{decode_args, ArgValue, RawObjectId};

/// A live object's behavior: how to resolve an incoming opcode's argument
/// signature and what to do once it's decoded. Generated proxy/resource
/// types implement this; the built-in Display/Registry/Callback types do
/// too (see [`crate::protocol`]).
pub trait Handler {
    /// The interface this object was bound as, used to resolve the argument
    /// signature of `opcode` and to report it in protocol errors.
    fn interface(&self) -> &'static Interface;

    /// `true` if `opcode` indexes `interface().requests` (server-side
    /// handlers dispatching client requests), `false` if it indexes
    /// `interface().events` (client-side handlers dispatching server
    /// events).
    fn incoming_is_request(&self) -> bool;

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError>;

    /// Receive a notification a sibling handler addressed to this object via
    /// [`HandlerContext::notify`] (e.g. a buffer telling its owning pool it
    /// has been destroyed). Most handlers have no such relationships and
    /// keep the default no-op.
    fn notify(&mut self, _event: &dyn std::any::Any) {}
}

/// The narrow surface a [`Handler`] needs while running: enqueueing replies
/// and creating/destroying objects. Borrowed fresh for each `handle` call so
/// handlers never see the whole `Dispatcher` (in particular, never the
/// handler map they are themselves stored in).
pub struct HandlerContext<'a> {
    pub connection: &'a mut Connection,
    pub objects: &'a mut ObjectTable,
    pub new_handlers: Vec<(RawObjectId, Box<dyn Handler>)>,
    pub released: Vec<RawObjectId>,
    pub notifications: Vec<(RawObjectId, Box<dyn std::any::Any + Send>)>,
}

impl<'a> HandlerContext<'a> {
    /// Queue a freshly created object's handler for registration once
    /// `handle` returns (the dispatcher owns the handler map, which is not
    /// reachable from here to avoid aliasing `&mut self` on it twice).
    pub fn spawn(&mut self, id: RawObjectId, handler: Box<dyn Handler>) {
        self.new_handlers.push((id, handler));
    }

    pub fn release(&mut self, id: RawObjectId) {
        self.released.push(id);
    }

    /// Address an out-of-band notification at another live object's handler,
    /// delivered via [`Handler::notify`] once the current `handle` call
    /// returns. Used for relationships the wire protocol itself doesn't
    /// carry, such as a buffer telling its owning pool it was destroyed.
    pub fn notify(&mut self, target: RawObjectId, event: Box<dyn std::any::Any + Send>) {
        self.notifications.push((target, event));
    }
}

/// Owns the connection, the object table, and every live object's handler.
pub struct Dispatcher {
    connection: Connection,
    objects: ObjectTable,
    handlers: HashMap<RawObjectId, Box<dyn Handler>>,
}

impl Dispatcher {
    pub fn new(connection: Connection, side: Side) -> Dispatcher {
        Dispatcher {
            connection,
            objects: ObjectTable::new(side),
            handlers: HashMap::new(),
        }
    }

    pub fn connection(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn objects(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    /// Register `id` as live with the given handler. The caller is
    /// responsible for having already reserved `id` in the object table
    /// (via `ObjectTable::allocate`/`insert`, or by accepting a peer-chosen
    /// id carried in a `new_id` argument).
    pub fn register(&mut self, id: RawObjectId, handler: Box<dyn Handler>) {
        self.handlers.insert(id, handler);
    }

    pub fn release(&mut self, id: RawObjectId) -> Result<(), ObjectError> {
        self.handlers.remove(&id);
        self.objects.remove(id).map(|_| ())
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// The underlying socket's fd, for a host application's own poll/select
    /// loop across many connections (see `crate::server::Display`).
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.connection.as_fd()
    }

    /// One cooperative tick: flush outbound, drain whatever is currently
    /// readable, dispatch every complete frame to its handler. Never blocks.
    #[instrument(skip(self))]
    pub fn pump(&mut self) -> Result<(), ConnectionError> {
        self.connection.flush()?;
        loop {
            match self.connection.recv_once() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(ConnectionError::PeerClosed) => {
                    self.teardown();
                    return Err(ConnectionError::PeerClosed);
                }
                Err(e) => return Err(e),
            }
        }

        let frames = self.connection.drain_frames()?;
        for (target, opcode, payload) in frames {
            if let Err(e) = self.dispatch_one(target, opcode, &payload) {
                if let ConnectionError::Protocol(protocol_err) = &e {
                    self.report_protocol_error(target, protocol_err);
                }
                self.teardown();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Encode and flush a `Display.error` event for a fatal protocol
    /// violation before `teardown()` clears the outbound queue. Best-effort:
    /// if the peer is already gone the send/flush errors are swallowed,
    /// since there is nothing left to report to.
    fn report_protocol_error(&mut self, offending_object: RawObjectId, err: &ProtocolError) {
        if let Some((object, code, message)) = err.as_display_error(offending_object) {
            let _ = self.connection.send(
                DISPLAY_ID,
                0,
                vec![
                    ArgValue::Object(object),
                    ArgValue::Uint(code.into()),
                    ArgValue::String(message),
                ],
            );
            let _ = self.connection.flush();
        }
    }

    fn dispatch_one(
        &mut self,
        target: RawObjectId,
        opcode: u16,
        payload: &bytes::Bytes,
    ) -> Result<(), ConnectionError> {
        if !self.objects.contains(target) {
            return Err(ConnectionError::Protocol(ProtocolError::from(
                DispatchError::Object(ObjectError::Unknown(target)),
            )));
        }
        let Some(handler) = self.handlers.get(&target) else {
            return Err(ConnectionError::Protocol(ProtocolError::from(
                DispatchError::Object(ObjectError::Unknown(target)),
            )));
        };

        let interface = handler.interface();
        let descriptor = if handler.incoming_is_request() {
            interface.request(opcode)
        } else {
            interface.event(opcode)
        };
        let Some(descriptor) = descriptor else {
            return Err(ConnectionError::Protocol(ProtocolError::from(
                DispatchError::InvalidMethod(target, opcode),
            )));
        };

        let mut cursor = Cursor::new(&payload[..]);
        let args = decode_args(&mut cursor, descriptor.signature, self.connection.fds_mut())
            .map_err(|e| ConnectionError::Protocol(ProtocolError::from(DispatchError::from(e))))?;

        let mut ctx = HandlerContext {
            connection: &mut self.connection,
            objects: &mut self.objects,
            new_handlers: Vec::new(),
            released: Vec::new(),
            notifications: Vec::new(),
        };

        // The handler is temporarily removed from the map so `handle` can
        // be called without holding a borrow of `self.handlers` across the
        // call (a handler may itself want to register/release objects,
        // which would otherwise require re-entering `self.handlers`).
        let mut handler = self.handlers.remove(&target).expect("checked above");
        let result = handler.handle(&mut ctx, opcode, args);
        let (new_handlers, released, notifications) =
            (ctx.new_handlers, ctx.released, ctx.notifications);
        self.handlers.insert(target, handler);

        for (id, h) in new_handlers {
            self.handlers.insert(id, h);
        }
        for (id, event) in notifications {
            if let Some(h) = self.handlers.get_mut(&id) {
                h.notify(event.as_ref());
            }
        }
        for id in released {
            self.handlers.remove(&id);
            let _ = self.objects.remove(id);
        }

        result.map_err(|e| match e {
            ProtocolError::TransportLost(reason) => {
                warn!(%reason, "handler reported transport loss");
                ConnectionError::PeerClosed
            }
            other => {
                warn!(object = target, error = %other, "handler returned a protocol error");
                ConnectionError::Protocol(other)
            }
        })
    }

    fn teardown(&mut self) {
        self.connection.close();
        self.handlers.clear();
    }
}
