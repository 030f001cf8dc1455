// ABOUTME: Crate root for the wire-protocol core: wire codec, object table, dispatcher, transport
// ABOUTME: Re-exports the pieces a client or server binary needs without reaching into submodules

//! A minimal, synchronous, single-threaded core for a Wayland-shaped display
//! server protocol: framing, object id bookkeeping, cooperative dispatch, and
//! the handful of interfaces (`wl_display`, `wl_registry`, `wl_callback`)
//! every connection starts with. Interface-specific proxies/resources beyond
//! those three are generated at build time by [`scanner`] from protocol XML
//! and included via [`generated`].
//!
//! The pieces compose roughly like this:
//!
//! ```text
//! Socket (raw fd, SCM_RIGHTS)
//!   -> Connection (buffering, framing)
//!     -> Dispatcher (object table, handler routing)
//!       -> Handler impls (Display, Registry, Callback, generated proxies/resources)
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod generated;
pub mod interface;
pub mod object;
pub mod protocol;
pub mod scanner;
pub mod shm;
pub mod socket;
pub mod wire;

pub mod client;
pub mod server;

#[cfg(test)]
mod tests;

pub use dispatch::{Dispatcher, Handler, HandlerContext};
pub use error::{ConnectionError, DispatchError, ProtocolError};
pub use object::{ObjectTable, RawObjectId, Side};
pub use wire::{ArgType, ArgValue, Fixed};

/// Error returned by most functions in this crate's client/server helpers.
///
/// Lower layers (`wire`, `object`, `connection`, `dispatch`) use precise
/// `thiserror` enums; this boxed alias is for the bootstrap glue in
/// [`client`] and [`server`] where the caller only needs `?` to work and a
/// readable message, not to match on a specific variant.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for the bootstrap helpers in [`client`] and
/// [`server`].
pub type Result<T> = std::result::Result<T, Error>;
