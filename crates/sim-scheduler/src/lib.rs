//! The engine, worker and host/event subsystems (§4.1-§4.4): the parallel discrete-event
//! scheduler, its conservative time-barrier protocol, and the per-host event queues and mailboxes
//! that make cross-host message passing safe without a global lock.
//!
//! This crate deliberately knows nothing about how a topology file is parsed (§1 Non-goals);
//! [`bootstrap::BootstrapAction`] is the one seam through which a loader (XML, a test fixture, or
//! anything else) hands the engine a concrete, ordered list of actions to replay.

pub mod bootstrap;
pub mod cpu;
pub mod engine;
pub mod event;
pub mod host;
pub mod host_services;
pub mod worker;

pub use bootstrap::BootstrapAction;
pub use engine::{Engine, EngineConfig, EngineError, SharedContext, EXIT_CONFIG_ERROR, EXIT_RUNTIME_ERROR, EXIT_SUCCESS};
pub use event::{Event, EventPayload, EventQueue};
pub use host::{Host, HostTable};
