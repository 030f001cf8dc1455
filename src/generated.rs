// ABOUTME: Build-time generated interface modules, produced by `scanner::generate` from protocol/*.xml
// ABOUTME: See build.rs for the generation step; each included file becomes a submodule here

//! Every protocol XML file under `protocol/` becomes one `include!` below,
//! contributing the `pub mod <name> { ... }` items the scanner wrote for its
//! interfaces. `protocol/core.xml` supplies the surface/seat/shell/shm family
//! described in the design notes; [`crate::shm`] layers real mmap lifecycle
//! behavior on top of the `ShmPool`/`Buffer` descriptors generated here.

include!(concat!(env!("OUT_DIR"), "/core.rs"));
