use super::arbitration::{arbitrate, Candidate};
use super::registry::{DispatcherControl, ModuleRegistry, RegistryCommand};
use super::{DispatchError, DispatcherModule, ModuleParameters, RunningState};
use crate::controller::ControllerData;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// An error a module produced during a frame
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleFailure {
    pub module: String,
    pub error: DispatchError,
}

/// Observable outcome of one [`ControllerDispatcher::update`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// Inactive modules whose probe reported ready
    pub ready: Vec<String>,
    /// Candidates that did not get all of their groups
    pub rejected: Vec<String>,
    /// Incumbents stopped because they lost their groups
    pub stopped: Vec<String>,
    /// Modules whose `run` was invoked, in rank order
    pub ran: Vec<String>,
    /// Modules that reported `running = false` from `run`
    pub finished: Vec<String>,
    pub failures: Vec<ModuleFailure>,
    /// Group to owner after the frame
    pub claims: BTreeMap<String, String>,
}

impl FrameReport {
    pub fn failed(&self, module: &str) -> bool {
        self.failures.iter().any(|failure| failure.module == module)
    }

    pub fn owner(&self, group: &str) -> Option<&str> {
        self.claims.get(group).map(String::as_str)
    }
}

/// Owns the module registry and arbitrates the exclusion groups every frame.
///
/// Single threaded: [`update`](Self::update) drives every module callback to
/// completion before it returns.
pub struct ControllerDispatcher {
    registry: ModuleRegistry,
    control: DispatcherControl,
    commands: UnboundedReceiver<RegistryCommand>,
    clock: Duration,
    frames: u64,
}

impl Default for ControllerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerDispatcher {
    pub fn new() -> Self {
        let (control, commands) = DispatcherControl::channel();
        Self {
            registry: ModuleRegistry::new(),
            control,
            commands,
            clock: Duration::ZERO,
            frames: 0,
        }
    }

    /// Handle for queueing registry changes from modules or the host
    pub fn control(&self) -> DispatcherControl {
        self.control.clone()
    }

    /// Registers a module with the parameters it declares
    pub fn enable_module(
        &mut self,
        name: &str,
        module: Box<dyn DispatcherModule>,
    ) -> Result<(), DispatchError> {
        let parameters = module.parameters().clone();
        self.enable_module_with_parameters(name, module, parameters)
    }

    /// Registers a module with explicit parameters; these are the ones
    /// arbitration uses from then on
    pub fn enable_module_with_parameters(
        &mut self,
        name: &str,
        module: Box<dyn DispatcherModule>,
        parameters: ModuleParameters,
    ) -> Result<(), DispatchError> {
        let sequence = self.registry.insert(name, module, parameters)?;
        info!("Enabled module {} (registration #{})", name, sequence);
        Ok(())
    }

    /// Removes a module. An active module is stopped first, then `cleanup`
    /// runs once. Returns false if no module has this name.
    pub fn disable_module(&mut self, name: &str) -> bool {
        let Some(mut entry) = self.registry.remove(name) else {
            debug!("Disable of unknown module {} ignored", name);
            return false;
        };

        if entry.is_active() {
            if let Err(e) = entry.module.stop() {
                error!("Module {} failed to stop while disabling: {}", name, e);
            }
        }
        entry.module.cleanup();
        info!("Disabled module {}", name);
        true
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.registry.get(name).is_some_and(|entry| entry.is_active())
    }

    pub fn module_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn active_modules(&self) -> Vec<String> {
        self.registry
            .iter()
            .filter(|entry| entry.is_active())
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Parameters arbitration uses for `name`
    pub fn parameters(&self, name: &str) -> Option<&ModuleParameters> {
        self.registry.get(name).map(|entry| &entry.parameters)
    }

    /// Replaces the parameters arbitration uses for `name`. An active module
    /// holding a group it no longer declares is stopped.
    pub fn set_parameters(
        &mut self,
        name: &str,
        parameters: ModuleParameters,
    ) -> Result<(), DispatchError> {
        let entry = self
            .registry
            .get_mut(name)
            .ok_or_else(|| DispatchError::UnknownModule {
                module: name.to_string(),
            })?;

        let orphaned = entry
            .active_claims
            .as_ref()
            .is_some_and(|groups| groups.iter().any(|g| !parameters.declares(g)));
        entry.parameters = parameters;
        info!("Updated parameters of module {}", name);

        if orphaned {
            info!("Module {} lost a held group, stopping", name);
            entry.deactivate();
            if let Err(e) = entry.module.stop() {
                error!("Module {} failed to stop after parameter update: {}", name, e);
                return Err(match e {
                    DispatchError::StopFailed(_) => e,
                    other => DispatchError::StopFailed(format!("{}: {}", name, other)),
                });
            }
        }
        Ok(())
    }

    /// Last state reported by an active module
    pub fn running_state(&self, name: &str) -> Option<&RunningState> {
        self.registry.get(name).and_then(|entry| entry.last_state.as_ref())
    }

    pub fn consecutive_failures(&self, name: &str) -> u32 {
        self.registry
            .get(name)
            .map_or(0, |entry| entry.consecutive_failures)
    }

    /// Modules whose last `threshold` invoked frames all failed. Frames in
    /// which a module was not called leave its count untouched.
    pub fn failing_modules(&self, threshold: u32) -> Vec<String> {
        if threshold == 0 {
            return Vec::new();
        }
        self.registry
            .iter()
            .filter(|entry| entry.consecutive_failures >= threshold)
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Runs one frame: probe inactive modules, arbitrate the groups, stop the
    /// incumbents that lost, then run the winners.
    pub fn update(&mut self, data: &ControllerData, delta_time: f32) -> FrameReport {
        self.frames += 1;
        self.clock += Duration::try_from_secs_f32(delta_time).unwrap_or_default();

        let mut report = FrameReport {
            frame: data.frame,
            ..Default::default()
        };
        let mut failed: BTreeSet<String> = BTreeSet::new();
        // Modules with a callback this frame; only these may reset their failure count
        let mut invoked: BTreeSet<String> = BTreeSet::new();

        self.apply_commands();

        let candidates =
            self.collect_candidates(data, delta_time, &mut report, &mut failed, &mut invoked);

        self.apply_commands();
        let candidates = candidates
            .into_iter()
            .filter(|candidate| self.is_same_registration(candidate))
            .collect();

        let arbitration = arbitrate(candidates);
        for candidate in &arbitration.rejected {
            if !candidate.incumbent {
                debug!(
                    "Module {} rejected, groups {:?} not free",
                    candidate.name, candidate.groups
                );
                report.rejected.push(candidate.name.clone());
            }
        }

        // Every loser is stopped before any winner runs
        for candidate in arbitration.preempted() {
            let Some(entry) = self.registry.get_mut(&candidate.name) else {
                continue;
            };
            info!("Module {} preempted, stopping", candidate.name);
            entry.deactivate();
            report.stopped.push(candidate.name.clone());
            invoked.insert(candidate.name.clone());
            if let Err(e) = entry.module.stop() {
                error!("Module {} failed to stop: {}", candidate.name, e);
                Self::record_failure(&mut report, &mut failed, &candidate.name, e);
            }
        }

        for winner in arbitration.winners {
            self.apply_commands();
            if !self.is_same_registration(&winner) {
                continue;
            }
            let Some(entry) = self.registry.get_mut(&winner.name) else {
                continue;
            };
            if !winner.incumbent {
                info!("Module {} activated with {:?}", winner.name, winner.groups);
            }

            report.ran.push(winner.name.clone());
            invoked.insert(winner.name.clone());
            let result = entry.module.run(data, delta_time).and_then(|state| {
                if state.running {
                    state.resolve_claims(&winner.name, &entry.parameters)?;
                }
                Ok(state)
            });

            match result {
                Ok(state) if state.running => {
                    entry.active_claims = Some(winner.groups);
                    entry.last_state = Some(state);
                }
                Ok(_) => {
                    debug!("Module {} finished", winner.name);
                    entry.deactivate();
                    report.finished.push(winner.name.clone());
                }
                Err(e) => {
                    error!("Module {} failed to run: {}", winner.name, e);
                    entry.deactivate();
                    if let Err(stop_error) = entry.module.stop() {
                        warn!(
                            "Module {} also failed to stop after run error: {}",
                            winner.name, stop_error
                        );
                    }
                    Self::record_failure(&mut report, &mut failed, &winner.name, e);
                }
            }
        }

        for entry in self.registry.iter_mut() {
            if failed.contains(&entry.name) {
                entry.consecutive_failures += 1;
            } else if invoked.contains(&entry.name) {
                entry.consecutive_failures = 0;
            }
            if let Some(groups) = &entry.active_claims {
                for group in groups {
                    report.claims.insert(group.clone(), entry.name.clone());
                }
            }
        }

        report
    }

    /// Disables every module, newest first
    pub fn shutdown(&mut self) {
        self.apply_commands();
        let mut names = self.registry.names();
        names.reverse();
        for name in names {
            self.disable_module(&name);
        }
        info!("Dispatcher shut down after {} frame(s)", self.frames);
    }

    fn collect_candidates(
        &mut self,
        data: &ControllerData,
        delta_time: f32,
        report: &mut FrameReport,
        failed: &mut BTreeSet<String>,
        invoked: &mut BTreeSet<String>,
    ) -> Vec<Candidate> {
        let clock = self.clock;
        let mut candidates = Vec::new();

        for entry in self.registry.iter_mut() {
            if let Some(groups) = &entry.active_claims {
                candidates.push(Candidate {
                    name: entry.name.clone(),
                    priority: entry.parameters.priority,
                    depth: entry.parameters.depth,
                    sequence: entry.sequence,
                    groups: groups.clone(),
                    incumbent: true,
                });
                continue;
            }

            if !data.has_capabilities(&entry.parameters.required_capabilities) {
                continue;
            }
            if !entry.probe_due(clock) {
                continue;
            }
            entry.last_probe = Some(clock);
            invoked.insert(entry.name.clone());

            let groups = entry
                .module
                .is_ready(data, delta_time)
                .and_then(|state| {
                    if state.running {
                        state.resolve_claims(&entry.name, &entry.parameters).map(Some)
                    } else {
                        Ok(None)
                    }
                });

            match groups {
                Ok(Some(groups)) => {
                    report.ready.push(entry.name.clone());
                    candidates.push(Candidate {
                        name: entry.name.clone(),
                        priority: entry.parameters.priority,
                        depth: entry.parameters.depth,
                        sequence: entry.sequence,
                        groups,
                        incumbent: false,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Readiness probe of {} failed: {}", entry.name, e);
                    Self::record_failure(report, failed, &entry.name, e);
                }
            }
        }

        candidates
    }

    /// False once the candidate's module was disabled, or replaced under
    /// the same name, by a queued command
    fn is_same_registration(&self, candidate: &Candidate) -> bool {
        self.registry
            .get(&candidate.name)
            .is_some_and(|entry| entry.sequence == candidate.sequence)
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RegistryCommand::Enable {
                    name,
                    module,
                    parameters,
                } => {
                    let parameters = parameters.unwrap_or_else(|| module.parameters().clone());
                    // Duplicate names are already logged by the registry
                    let _ = self.enable_module_with_parameters(&name, module, parameters);
                }
                RegistryCommand::Disable { name } => {
                    self.disable_module(&name);
                }
            }
        }
    }

    fn record_failure(
        report: &mut FrameReport,
        failed: &mut BTreeSet<String>,
        module: &str,
        error: DispatchError,
    ) {
        failed.insert(module.to_string());
        report.failures.push(ModuleFailure {
            module: module.to_string(),
            error,
        });
    }
}
