//! The module contract: declared parameters, the state a callback reports
//! back, and the [`DispatcherModule`] trait itself.

use super::DispatchError;
use crate::controller::{ControllerData, Hand};
use crate::world::EntityId;
use glam::Vec3;
use std::collections::BTreeSet;
use std::time::Duration;

/// Parameters a module declares at registration
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleParameters {
    /// Lower runs first
    pub priority: i32,
    /// Groups the module may claim
    pub exclusion_groups: BTreeSet<String>,
    /// Snapshot capabilities that must be present before the module is probed
    pub required_capabilities: BTreeSet<String>,
    /// Tie-break between equal priorities, lower wins
    pub depth: i32,
    /// Minimum time between readiness probes, zero probes every frame
    pub probe_interval: Duration,
}

impl ModuleParameters {
    pub fn new<I, S>(priority: i32, exclusion_groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            priority,
            exclusion_groups: exclusion_groups.into_iter().map(Into::into).collect(),
            required_capabilities: BTreeSet::new(),
            depth: 0,
            probe_interval: Duration::ZERO,
        }
    }

    pub fn with_required_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn declares(&self, group: &str) -> bool {
        self.exclusion_groups.contains(group)
    }
}

/// Keeps a far-grab laser pinned to a point on its target
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaserLock {
    pub hand: Hand,
    pub target: EntityId,
    /// Lock point relative to the target's position
    pub offset: Vec3,
}

/// What a module reports from `is_ready` and `run`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunningState {
    pub running: bool,
    /// Groups the module wants. Empty means all declared groups.
    pub claims: BTreeSet<String>,
    /// Entities the module is acting on
    pub targets: Vec<EntityId>,
    pub laser_lock: Option<LaserLock>,
}

impl RunningState {
    /// Not ready, or finished
    pub fn stopped() -> Self {
        Self::default()
    }

    /// Running with all declared groups
    pub fn running() -> Self {
        Self {
            running: true,
            ..Default::default()
        }
    }

    /// Running with an explicit subset of the declared groups
    pub fn claiming<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            running: true,
            claims: groups.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_targets(mut self, targets: Vec<EntityId>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_laser_lock(mut self, lock: LaserLock) -> Self {
        self.laser_lock = Some(lock);
        self
    }

    /// Resolves the groups this state claims against the module's declared
    /// groups.
    pub fn resolve_claims(
        &self,
        module: &str,
        parameters: &ModuleParameters,
    ) -> Result<BTreeSet<String>, DispatchError> {
        if self.claims.is_empty() {
            return Ok(parameters.exclusion_groups.clone());
        }
        if let Some(group) = self.claims.iter().find(|g| !parameters.declares(g)) {
            return Err(DispatchError::UndeclaredGroup {
                module: module.to_string(),
                group: group.clone(),
            });
        }
        Ok(self.claims.clone())
    }
}

/// An input-handling behavior the dispatcher arbitrates.
///
/// Per frame an inactive module is asked `is_ready`; if it is granted its
/// groups, `run` is called. While active, `run` is called every frame until
/// it reports `running = false`, fails, or loses its groups to a higher ranked
/// module, in which case `stop` is called before the winner runs.
pub trait DispatcherModule: Send {
    fn parameters(&self) -> &ModuleParameters;

    fn is_ready(
        &mut self,
        data: &ControllerData,
        delta_time: f32,
    ) -> Result<RunningState, DispatchError>;

    fn run(&mut self, data: &ControllerData, delta_time: f32)
        -> Result<RunningState, DispatchError>;

    /// Release everything the module holds. Called when the module loses its
    /// groups, after a failed `run`, or when it is disabled while active.
    fn stop(&mut self) -> Result<(), DispatchError>;

    /// Called exactly once when the module is disabled
    fn cleanup(&mut self) {}
}
