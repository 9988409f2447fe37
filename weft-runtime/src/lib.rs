//! # Weft Runtime Library
//!
//! The user-space process runtime for compiled Weft programs. The runtime
//! owns the lifecycle of many small in-process procs (lightweight
//! cooperative tasks, each on its own heap-allocated stack) and mediates
//! every transition between Weft execution and the host C context.
//!
//! - **Scheduler**: single-threaded, cooperative, uniformly random over
//!   the runnable pool
//! - **Upcalls**: service requests from generated code, dispatched by a
//!   small integer code
//! - **Ports and channels**: CSP-style synchronous rendezvous between one
//!   reader and queued writers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        WEFT RUNTIME                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────────────┐  │
//! │  │  Main loop │──▶│ switch glue  │──▶│  proc (own stack) │  │
//! │  │ runtime.rs │◀──│  switch.rs   │◀──│  proc.rs          │  │
//! │  └────────────┘   └──────────────┘   └───────────────────┘  │
//! │        │                                      │             │
//! │        ▼                                      ▼             │
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────────────┐  │
//! │  │ dispatcher │──▶│  rendezvous  │──▶│  ports/channels   │  │
//! │  │ upcall.rs  │   │rendezvous.rs │   │  port.rs          │  │
//! │  └────────────┘   └──────────────┘   └───────────────────┘  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The embedder calls [`runtime::start`] (or the C-ABI [`runtime::weft_start`])
//! with a program descriptor and a pointer to the compiled switch glue.
//! The loop picks a runnable proc, switches into it, and acts on the state
//! the proc yields with: redispatch, service an upcall, free it, or abort
//! on a protocol violation.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod abi;
pub mod config;
pub mod log;
pub mod memory;
pub mod port;
pub mod proc;
pub mod ptr_vec;
pub mod rendezvous;
pub mod runtime;
pub mod stack;
pub mod switch;
pub mod upcall;

// Re-exports
pub use abi::{Prog, ProgFn};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use log::LogLevel;
pub use port::{Chan, Port};
pub use proc::{Proc, ProcState};
pub use ptr_vec::PtrVec;
pub use runtime::{start, Runtime};
pub use switch::CToProcGlue;
pub use upcall::UpcallCode;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_reexports_resolve() {
        let _ = RuntimeConfig::default();
        let _ = ProcState::Running;
        let _ = UpcallCode::Send;
    }
}
