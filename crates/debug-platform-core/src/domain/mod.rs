//! Domain value types for the broker configuration.
//!
//! These types carry no I/O.  The server crate resolves a [`ListenEndpoint`]
//! into socket addresses, and reads [`ProcessModel`] and [`Verbosity`] to
//! decide how to run, but none of that logic lives here.

pub mod config;

pub use config::{EndpointError, ListenEndpoint, ProcessModel, Verbosity};
