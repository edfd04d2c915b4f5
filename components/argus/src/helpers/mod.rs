//! Small cross-cutting helpers shared by the runtime wiring: a shutdown
//! broadcaster. Configuration lives in [`crate::config`]'s environment-driven
//! `Config::load` instead of a file-based loader here.

pub mod shutdown;

pub use shutdown::Shutdown;
