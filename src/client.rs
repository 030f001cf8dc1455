// ABOUTME: Client-side connection bootstrap: resolves the socket path and drives the roundtrip
// ABOUTME: A thin synchronous wrapper around Dispatcher for a single server connection

//! Mirrors what the reference implementation's `Connection`/`Display` client
//! classes do: resolve `XDG_RUNTIME_DIR`/`WAYLAND_DISPLAY`, open a
//! non-blocking socket, and drive the bootstrap sequence from §6 —
//! `get_registry` then `sync` — so the caller can attach `on_global`
//! callbacks and know exactly when binding has completed.

use std::env;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use crate::connection::Connection as Transport;
use crate::dispatch::Dispatcher;
use crate::object::{RawObjectId, Side, DISPLAY_ID};
use crate::protocol::callback::Callback;
use crate::protocol::display;
use crate::protocol::registry::Registry;
use crate::socket::Socket;
use crate::wire::ArgValue;
use crate::{Error, Result};

/// Resolve the Unix socket path a client should connect to: `XDG_RUNTIME_DIR`
/// is required, `WAYLAND_DISPLAY` defaults to `wayland-0` (§6).
pub fn socket_path() -> Result<PathBuf> {
    let runtime_dir =
        env::var("XDG_RUNTIME_DIR").map_err(|_| -> Error { "XDG_RUNTIME_DIR is not set".into() })?;
    let display = env::var("WAYLAND_DISPLAY").unwrap_or_else(|_| "wayland-0".to_string());
    Ok(PathBuf::from(runtime_dir).join(display))
}

/// One client connection. Object id 1 (`Display`) always exists once
/// connected; [`Display::get_registry`] and [`Display::sync`]/`roundtrip`
/// drive the rest of the bootstrap sequence.
pub struct Display {
    dispatcher: Dispatcher,
}

impl Display {
    /// Connect to the socket named by [`socket_path`].
    pub fn connect() -> Result<Display> {
        let path = socket_path()?;
        Self::connect_to(&path)
    }

    /// Connect to an explicit socket path, bypassing environment resolution
    /// (used by tests and by hosts that already know where the server is).
    pub fn connect_to(path: &std::path::Path) -> Result<Display> {
        let stream = UnixStream::connect(path)?;
        stream.set_nonblocking(true)?;
        let fd: OwnedFd = stream.into();
        let mut dispatcher = Dispatcher::new(Transport::new(Socket::new(fd)), Side::Client);
        dispatcher.objects().insert(DISPLAY_ID, "wl_display", 1)?;
        dispatcher.register(DISPLAY_ID, Box::new(display::Display::new()));
        Ok(Display { dispatcher })
    }

    pub fn dispatcher(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// One non-blocking dispatch tick; forwards to [`Dispatcher::pump`].
    pub fn pump(&mut self) -> Result<()> {
        self.dispatcher.pump()?;
        Ok(())
    }

    /// Send `Display.get_registry`, allocating and registering the
    /// `Registry` object. Attach `on_global`/`on_global_remove` to the
    /// returned id's handler before the next `pump()` to observe the
    /// server's globals.
    pub fn get_registry(&mut self) -> Result<RawObjectId> {
        let id = self.dispatcher.objects().allocate()?;
        self.dispatcher.objects().insert(id, "wl_registry", 1)?;
        self.dispatcher.register(id, Box::new(Registry::new(id)));
        self.dispatcher
            .connection()
            .send(DISPLAY_ID, 1, vec![ArgValue::NewId(id)])?;
        Ok(id)
    }

    /// Send `Display.sync`, allocating and registering a one-shot
    /// `Callback`. Returns the callback's id so the caller can poll
    /// `objects().contains(id)` (the callback releases its own id once
    /// `done` fires) or simply use [`Display::roundtrip`].
    pub fn sync(&mut self) -> Result<RawObjectId> {
        let id = self.dispatcher.objects().allocate()?;
        self.dispatcher.objects().insert(id, "wl_callback", 1)?;
        self.dispatcher.register(id, Box::new(Callback::new(id)));
        self.dispatcher
            .connection()
            .send(DISPLAY_ID, 0, vec![ArgValue::NewId(id)])?;
        Ok(id)
    }

    /// Block the calling thread (by repeatedly pumping a non-blocking
    /// socket) until a `sync` callback fires. Implements the barrier law in
    /// §8: every request enqueued before this call has been processed by
    /// the server once it returns.
    pub fn roundtrip(&mut self) -> Result<()> {
        let callback_id = self.sync()?;
        while self.dispatcher.objects().contains(callback_id) {
            self.dispatcher.pump()?;
        }
        Ok(())
    }
}
