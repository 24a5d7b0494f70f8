//! Name keyed module registry and the command channel used to enable or
//! disable modules from outside a dispatcher callback.

use super::{DispatchError, DispatcherModule, ModuleParameters, RunningState};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

/// A registered module together with its dispatcher side bookkeeping
pub struct RegisteredModule {
    pub name: String,
    pub module: Box<dyn DispatcherModule>,
    /// Parameters as registered, possibly overridden by configuration
    pub parameters: ModuleParameters,
    /// Registration order, last tie-break in arbitration
    pub sequence: u64,
    /// Groups held since the last frame, `None` while inactive
    pub active_claims: Option<BTreeSet<String>>,
    /// State returned by the last successful callback
    pub last_state: Option<RunningState>,
    /// Dispatcher clock at the last readiness probe
    pub last_probe: Option<Duration>,
    pub consecutive_failures: u32,
}

impl RegisteredModule {
    pub fn is_active(&self) -> bool {
        self.active_claims.is_some()
    }

    pub fn probe_due(&self, clock: Duration) -> bool {
        match self.last_probe {
            Some(last) => clock.saturating_sub(last) >= self.parameters.probe_interval,
            None => true,
        }
    }

    pub fn deactivate(&mut self) {
        self.active_claims = None;
        self.last_state = None;
    }
}

impl fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("sequence", &self.sequence)
            .field("active_claims", &self.active_claims)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

/// Enabled modules in registration order
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<RegisteredModule>,
    next_sequence: u64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a module. The first registration of a name wins.
    pub fn insert(
        &mut self,
        name: &str,
        module: Box<dyn DispatcherModule>,
        parameters: ModuleParameters,
    ) -> Result<u64, DispatchError> {
        if self.contains(name) {
            error!("Module {} is already registered, keeping the first one", name);
            return Err(DispatchError::AlreadyRegistered {
                module: name.to_string(),
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.modules.push(RegisteredModule {
            name: name.to_string(),
            module,
            parameters,
            sequence,
            active_claims: None,
            last_state: None,
            last_probe: None,
            consecutive_failures: 0,
        });
        Ok(sequence)
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisteredModule> {
        let index = self.modules.iter().position(|entry| entry.name == name)?;
        Some(self.modules.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModule> {
        self.modules.iter().find(|entry| entry.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RegisteredModule> {
        self.modules.iter_mut().find(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredModule> {
        self.modules.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisteredModule> {
        self.modules.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Registry change queued through a [`DispatcherControl`]
pub enum RegistryCommand {
    Enable {
        name: String,
        module: Box<dyn DispatcherModule>,
        parameters: Option<ModuleParameters>,
    },
    Disable {
        name: String,
    },
}

impl fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryCommand::Enable { name, .. } => write!(f, "Enable({})", name),
            RegistryCommand::Disable { name } => write!(f, "Disable({})", name),
        }
    }
}

/// Cloneable handle for enabling and disabling modules while the dispatcher
/// is running. Commands are applied between module callbacks.
#[derive(Clone, Debug)]
pub struct DispatcherControl {
    sender: UnboundedSender<RegistryCommand>,
}

impl DispatcherControl {
    pub(crate) fn channel() -> (Self, UnboundedReceiver<RegistryCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enable(
        &self,
        name: impl Into<String>,
        module: Box<dyn DispatcherModule>,
    ) -> Result<(), DispatchError> {
        self.send(RegistryCommand::Enable {
            name: name.into(),
            module,
            parameters: None,
        })
    }

    pub fn enable_with_parameters(
        &self,
        name: impl Into<String>,
        module: Box<dyn DispatcherModule>,
        parameters: ModuleParameters,
    ) -> Result<(), DispatchError> {
        self.send(RegistryCommand::Enable {
            name: name.into(),
            module,
            parameters: Some(parameters),
        })
    }

    pub fn disable(&self, name: impl Into<String>) -> Result<(), DispatchError> {
        self.send(RegistryCommand::Disable { name: name.into() })
    }

    fn send(&self, command: RegistryCommand) -> Result<(), DispatchError> {
        debug!("Queueing registry command {:?}", command);
        self.sender
            .send(command)
            .map_err(|e| DispatchError::DispatcherClosed(format!("{:?}", e.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerData;

    struct Idle(ModuleParameters);

    impl DispatcherModule for Idle {
        fn parameters(&self) -> &ModuleParameters {
            &self.0
        }

        fn is_ready(&mut self, _: &ControllerData, _: f32) -> Result<RunningState, DispatchError> {
            Ok(RunningState::stopped())
        }

        fn run(&mut self, _: &ControllerData, _: f32) -> Result<RunningState, DispatchError> {
            Ok(RunningState::stopped())
        }

        fn stop(&mut self) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn idle() -> Box<dyn DispatcherModule> {
        Box::new(Idle(ModuleParameters::new(100, ["leftHand"])))
    }

    #[test]
    fn sequence_numbers_increase_and_survive_removal() {
        let mut registry = ModuleRegistry::new();
        let params = ModuleParameters::new(100, ["leftHand"]);
        assert_eq!(registry.insert("a", idle(), params.clone()), Ok(0));
        assert_eq!(registry.insert("b", idle(), params.clone()), Ok(1));
        assert!(registry.remove("a").is_some());
        assert_eq!(registry.insert("a", idle(), params), Ok(2));
        assert_eq!(registry.names(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn duplicate_name_keeps_first() {
        let mut registry = ModuleRegistry::new();
        registry
            .insert("a", idle(), ModuleParameters::new(100, ["leftHand"]))
            .expect("first insert");
        let result = registry.insert("a", idle(), ModuleParameters::new(1, ["rightHand"]));

        assert!(matches!(result, Err(DispatchError::AlreadyRegistered { .. })));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").map(|m| m.parameters.priority), Some(100));
    }

    #[test]
    fn probe_interval_gates_probes() {
        let mut registry = ModuleRegistry::new();
        let params = ModuleParameters::new(100, ["leftHand"]).with_probe_interval(Duration::from_millis(50));
        registry.insert("a", idle(), params).expect("insert");
        let entry = registry.get_mut("a").expect("entry");

        assert!(entry.probe_due(Duration::ZERO));
        entry.last_probe = Some(Duration::from_millis(10));
        assert!(!entry.probe_due(Duration::from_millis(40)));
        assert!(entry.probe_due(Duration::from_millis(60)));
    }

    #[test]
    fn control_fails_once_dispatcher_is_gone() {
        let (control, receiver) = DispatcherControl::channel();
        drop(receiver);
        assert!(matches!(
            control.disable("a"),
            Err(DispatchError::DispatcherClosed(_))
        ));
    }
}
