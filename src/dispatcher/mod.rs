//! # Dispatcher Module
//!
//! Per-frame arbitration of the hand controllers between input-handling
//! modules.
//!
//! Every module declares a priority and the exclusion groups it may claim
//! (`"leftHand"`, `"rightHand"`, `"head"`, `"leftHandEquip"`, ...). Each frame
//! the dispatcher:
//!
//! 1. probes every enabled, inactive module with `is_ready`
//! 2. ranks incumbents and ready modules by (priority, depth, registration)
//! 3. grants each candidate all of its groups or none of them
//! 4. stops incumbents that lost their groups
//! 5. runs every winner once
//!
//! ```text
//! ControllerData ──► is_ready ──► arbitrate ──► stop losers ──► run winners
//!                                    │
//!                               ClaimTable
//! ```
//!
//! Module errors are contained: they are logged, counted per module and
//! reported in the [`FrameReport`], never returned from `update`.

pub mod arbitration;
#[allow(clippy::module_inception)]
pub mod dispatcher;
pub mod error;
pub mod module;
pub mod registry;

pub use arbitration::{arbitrate, Arbitration, Candidate, ClaimTable};
pub use dispatcher::{ControllerDispatcher, FrameReport, ModuleFailure};
pub use error::DispatchError;
pub use module::{DispatcherModule, LaserLock, ModuleParameters, RunningState};
pub use registry::{DispatcherControl, ModuleRegistry, RegisteredModule, RegistryCommand};
