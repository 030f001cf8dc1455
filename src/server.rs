// ABOUTME: Server-side global registry and select-loop bootstrap
// ABOUTME: Binds the listening socket, accepts clients, and multiplexes their dispatch via poll

//! Mirrors what the reference implementation's `Display`/`Client` server
//! classes do: bind `$XDG_RUNTIME_DIR/wayland-N` at the lowest free `N`, set
//! `WAYLAND_DISPLAY`, accept connections, and drive every connected client's
//! [`Dispatcher`] from one non-blocking poll loop (§5's "simple
//! select-based loop" description, implemented with `nix`'s poll instead of
//! Python's `select` module since that is the idiomatic systems-language
//! analogue).

use std::fs;
use std::os::fd::AsFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{info, instrument, warn};

use crate::connection::Connection as Transport;
use crate::dispatch::{Dispatcher, Handler, HandlerContext};
use crate::error::ProtocolError;
use crate::interface::Interface;
use crate::object::{RawObjectId, Side, DISPLAY_ID};
use crate::protocol::{display, registry};
use crate::socket::Socket;
use crate::wire::ArgValue;
use crate::{Error, Result};

/// One advertised global, as the server-side `Registry` resource reports it
/// in a `global` event. `factory` builds the `Handler` a `bind` request
/// spawns at the client-chosen id — the same role `ShmPool`'s `create_buffer`
/// and `Shm`'s `create_pool` fill for objects created deeper in the tree.
#[derive(Clone)]
pub struct Global {
    pub name: u32,
    pub interface: &'static str,
    pub version: u32,
    pub factory: std::sync::Arc<dyn Fn(RawObjectId) -> Box<dyn Handler> + Send + Sync>,
}

/// The server-side listening endpoint: owns the socket, the set of
/// advertised globals, and every connected client's [`Dispatcher`].
pub struct Display {
    listener: UnixListener,
    socket_name: String,
    globals: Vec<Global>,
    next_global_name: u32,
    clients: Vec<Dispatcher>,
}

impl Display {
    /// Bind the listening socket at the lowest-numbered free
    /// `$XDG_RUNTIME_DIR/wayland-N`, set its permissions to `0666`, and
    /// export `WAYLAND_DISPLAY` for child processes (§6).
    pub fn bind() -> Result<Display> {
        let runtime_dir =
            std::env::var("XDG_RUNTIME_DIR").map_err(|_| -> Error { "XDG_RUNTIME_DIR is not set".into() })?;
        let runtime_dir = PathBuf::from(runtime_dir);

        let mut n = 0u32;
        loop {
            let socket_name = format!("wayland-{n}");
            let path = runtime_dir.join(&socket_name);
            match UnixListener::bind(&path) {
                Ok(listener) => {
                    listener.set_nonblocking(true)?;
                    fs::set_permissions(&path, fs::Permissions::from_mode(0o666))?;
                    // SAFETY: this process has not yet spawned any threads
                    // that read environment variables concurrently with this
                    // startup-time write.
                    unsafe {
                        std::env::set_var("WAYLAND_DISPLAY", &socket_name);
                    }
                    info!(socket = %socket_name, "server listening");
                    return Ok(Display {
                        listener,
                        socket_name,
                        globals: Vec::new(),
                        next_global_name: 1,
                        clients: Vec::new(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    n += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    /// Advertise a new global of the given interface and version, returning
    /// the `name` future `Registry.bind` requests will reference it by.
    /// `factory` builds the bound object's `Handler`, given the id the
    /// client chose for it; `ServerRegistry::handle`'s `bind` arm spawns it.
    /// Globals already bound by connected clients are unaffected by later
    /// additions (§5).
    pub fn add_global<F>(&mut self, interface: &'static str, version: u32, factory: F) -> u32
    where
        F: Fn(RawObjectId) -> Box<dyn Handler> + Send + Sync + 'static,
    {
        let name = self.next_global_name;
        self.next_global_name += 1;
        self.globals.push(Global {
            name,
            interface,
            version,
            factory: std::sync::Arc::new(factory),
        });
        name
    }

    /// Accept every currently-pending connection (non-blocking), registering
    /// a fresh `Dispatcher` with the `Display` singleton at object id 1 for
    /// each.
    #[instrument(skip(self))]
    pub fn accept_new_clients(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.adopt(stream)?,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn adopt(&mut self, stream: UnixStream) -> Result<()> {
        stream.set_nonblocking(true)?;
        let fd = std::os::fd::OwnedFd::from(stream);
        let transport = Transport::new(Socket::new(fd));
        let mut dispatcher = Dispatcher::new(transport, Side::Server);
        dispatcher
            .objects()
            .insert(DISPLAY_ID, "wl_display", 1)?;
        dispatcher.register(
            DISPLAY_ID,
            Box::new(ServerDisplay {
                globals: self.globals.clone(),
            }),
        );
        info!("client connected");
        self.clients.push(dispatcher);
        Ok(())
    }

    /// Build the poll set (listener plus every connected client) and wait up
    /// to `timeout_ms` for any of them to become readable, then accept new
    /// clients and pump every client that has data. Closed clients are
    /// dropped from the pool.
    pub fn run_once(&mut self, timeout_ms: u16) -> Result<()> {
        let mut pollfds: Vec<PollFd> = Vec::with_capacity(1 + self.clients.len());
        pollfds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for client in &self.clients {
            pollfds.push(PollFd::new(client.as_fd(), PollFlags::POLLIN));
        }

        poll(&mut pollfds, PollTimeout::from(timeout_ms))
            .map_err(|e| -> Error { format!("poll failed: {e}").into() })?;

        if pollfds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN))
        {
            self.accept_new_clients()?;
        }

        let mut closed = Vec::new();
        for (i, client) in self.clients.iter_mut().enumerate() {
            match client.pump() {
                Ok(()) => {}
                Err(crate::error::ConnectionError::PeerClosed) => closed.push(i),
                Err(e) => {
                    warn!(error = %e, "client connection failed");
                    closed.push(i);
                }
            }
        }
        for i in closed.into_iter().rev() {
            self.clients.remove(i);
        }
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Server-side handler for object id 1. Answers `sync` with an immediately
/// fired `done` event (the server has no queued work to defer behind, so
/// there is nothing a `Callback` resource would add) and `get_registry` with
/// a `Registry` resource that replays the global list captured when the
/// client connected.
struct ServerDisplay {
    globals: Vec<Global>,
}

impl Handler for ServerDisplay {
    fn interface(&self) -> &'static Interface {
        &display::INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        true
    }

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            // sync(callback_id): fires immediately, since the server has no
            // outstanding work queued behind a request it has already
            // dispatched by the time this handler runs.
            0 => {
                let callback_id = args[0].as_uint().unwrap_or(0);
                ctx.connection
                    .send(callback_id, 0, vec![ArgValue::Uint(0)])
                    .map_err(ProtocolError::MalformedFrame)?;
                Ok(())
            }
            // get_registry(registry_id)
            1 => {
                let registry_id = args[0].as_uint().unwrap_or(0);
                ctx.objects
                    .insert(registry_id, "wl_registry", registry::INTERFACE.version)
                    .map_err(|e| ProtocolError::ResourceExhausted(e.to_string()))?;
                for global in &self.globals {
                    ctx.connection
                        .send(
                            registry_id,
                            0,
                            vec![
                                ArgValue::Uint(global.name),
                                ArgValue::String(global.interface.to_string()),
                                ArgValue::Uint(global.version),
                            ],
                        )
                        .map_err(ProtocolError::MalformedFrame)?;
                }
                ctx.spawn(
                    registry_id,
                    Box::new(ServerRegistry {
                        globals: self.globals.clone(),
                    }),
                );
                Ok(())
            }
            _ => unreachable!("dispatcher validated opcode against INTERFACE.requests"),
        }
    }
}

/// Server-side resource for a bound `Registry`. `bind` validates the
/// requested global still exists and registers the bound id's interface in
/// the object table; the core has no interface-specific resource factory
/// beyond that, so the concrete `Handler` for the bound object is the host
/// application's responsibility to register before the next `pump()`.
struct ServerRegistry {
    globals: Vec<Global>,
}

impl Handler for ServerRegistry {
    fn interface(&self) -> &'static Interface {
        &registry::INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        true
    }

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            // bind(name, any_new_id)
            0 => {
                let name = args[0].as_uint().unwrap_or(0);
                let Some(global) = self.globals.iter().find(|g| g.name == name) else {
                    return Err(ProtocolError::InvalidMethod {
                        object: name,
                        opcode,
                    });
                };
                if let ArgValue::AnyNewId { id, .. } = &args[1] {
                    ctx.objects
                        .insert(*id, global.interface, global.version)
                        .map_err(|e| ProtocolError::ResourceExhausted(e.to_string()))?;
                    ctx.spawn(*id, (global.factory)(*id));
                }
                Ok(())
            }
            _ => unreachable!("dispatcher validated opcode against INTERFACE.requests"),
        }
    }
}
