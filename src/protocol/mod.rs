// ABOUTME: Hand-written core interfaces the dispatcher depends on directly
// ABOUTME: Written in the shape the scanner emits, so they double as its reference fixture

//! `wl_display`, `wl_registry`, and `wl_callback` are core protocol
//! machinery: the bootstrap sequence in §6 of the design doc sends
//! `Display.get_registry`/`Display.sync` before any scanner-generated
//! interface exists to bind against. They are hand-written rather than
//! generated from XML, but in the same shape [`crate::scanner`] emits for
//! everything else, so a test can compare the two (see `scanner::tests`).

pub mod callback;
pub mod display;
pub mod registry;

pub use callback::Callback;
pub use display::Display;
pub use registry::Registry;
