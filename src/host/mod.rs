//! Simulated host: the frame loop that drives the dispatcher and the scripted
//! demo scene used by the binary.

pub mod demo;
pub mod frame_loop;

pub use frame_loop::{FrameLoop, FrameLoopHandle, HostError, LoopStats};
