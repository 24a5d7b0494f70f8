//! Hand controller dispatcher
//!
//! A per-frame, priority ordered arbiter deciding which input-handling module
//! owns each hand controller, plus a small simulated host to run it in.
//!
//! ```text
//! InputSource ──► SnapshotBuilder ──► ControllerDispatcher ──► modules ──► World
//!                        ▲                                                  │
//!                        └──────────────────────────────────────────────────┘
//! ```

pub mod controller;
pub mod dispatcher;
pub mod host;
pub mod modules;
pub mod persistence;
pub mod world;
