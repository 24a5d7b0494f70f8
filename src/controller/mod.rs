//! Controller input pipeline
//!
//! Turns raw device state into the read-only snapshot every dispatcher module
//! sees during a frame:
//!
//! 1. [`input_source`] - Raw per-frame device input (scripted for the demo)
//! 2. [`snapshot_builder`] - Thresholds, nearby queries and ray picks
//! 3. [`controller_data`] - The resulting [`ControllerData`]
//!
//! ```text
//! InputSource ──► SnapshotBuilder ──► ControllerData ──► Dispatcher
//!                    ▲
//!                  World
//! ```

pub mod controller_data;
pub mod input_source;
pub mod snapshot_builder;

pub use controller_data::{capability, ControllerData, Hand, Pose, RayPick, HEAD_GROUP};
pub use input_source::{InputSource, ScriptedInput};
pub use snapshot_builder::{RawControllerInput, SnapshotBuilder};
