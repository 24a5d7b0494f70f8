//! Concrete controller modules
//!
//! | Module                 | Priority | Groups              |
//! |------------------------|----------|---------------------|
//! | `<Hand>Teleport`       | 80       | hand, head          |
//! | `<Hand>EquipEntity`    | 300      | hand, handEquip     |
//! | `<Hand>NearGrabEntity` | 500      | hand                |
//! | `<Hand>FarGrabEntity`  | 540      | hand                |
//! | `ScaleAvatar`          | 600      | leftHand, rightHand |

pub mod common;
pub mod equip;
pub mod far_grab;
pub mod near_grab;
pub mod scale_avatar;
pub mod teleport;

pub use common::Thresholds;
pub use equip::{equip, unequip, EquipEntity, EquipOutcome};
pub use far_grab::FarGrabEntity;
pub use near_grab::NearGrabEntity;
pub use scale_avatar::{ScaleAvatar, SCALE_AVATAR_NAME};
pub use teleport::Teleport;

use crate::controller::Hand;
use crate::dispatcher::{ControllerDispatcher, DispatchError, DispatcherModule};
use crate::persistence::DispatcherConfig;
use crate::world::SharedWorld;
use tracing::info;

/// Every built-in module with its registered name, in registration order
pub fn default_modules(world: &SharedWorld, config: &DispatcherConfig) -> Vec<(String, Box<dyn DispatcherModule>)> {
    let thresholds = Thresholds::from(&config.input);
    let mut modules: Vec<(String, Box<dyn DispatcherModule>)> = Vec::new();

    for hand in Hand::BOTH {
        modules.push((
            Teleport::name_for(hand),
            Box::new(Teleport::new(hand, world.clone(), thresholds)),
        ));
        modules.push((
            EquipEntity::name_for(hand),
            Box::new(EquipEntity::new(hand, world.clone(), thresholds)),
        ));
        modules.push((
            NearGrabEntity::name_for(hand),
            Box::new(NearGrabEntity::new(hand, world.clone(), thresholds)),
        ));
        modules.push((
            FarGrabEntity::name_for(hand),
            Box::new(FarGrabEntity::new(hand, world.clone(), thresholds)),
        ));
    }
    modules.push((
        SCALE_AVATAR_NAME.to_string(),
        Box::new(ScaleAvatar::new(world.clone(), thresholds)),
    ));

    modules
}

/// Registers the built-in modules, applying the configured overrides and
/// skipping disabled ones. Returns the names that were enabled.
pub fn register_default_modules(
    dispatcher: &mut ControllerDispatcher,
    world: &SharedWorld,
    config: &DispatcherConfig,
) -> Result<Vec<String>, DispatchError> {
    let mut enabled = Vec::new();

    for (name, module) in default_modules(world, config) {
        if !config.is_module_enabled(&name) {
            info!("Module {} disabled by configuration", name);
            continue;
        }
        let parameters = config.parameters_for(&name, module.parameters().clone());
        dispatcher.enable_module_with_parameters(&name, module, parameters)?;
        enabled.push(name);
    }

    Ok(enabled)
}
