//! Infrastructure layer of the broker.
//!
//! Contains OS-facing adapters: the TCP listener, the `fork`-based worker
//! spawner, process-wide signal dispositions and the config file loader.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `debug_platform_core`, but MUST NOT be imported by the `application`
//! layer.

pub mod listener;
pub mod signals;
pub mod spawner;
pub mod storage;
