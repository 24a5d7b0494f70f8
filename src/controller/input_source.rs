//! Sources of raw controller input for the frame loop.

use super::snapshot_builder::RawControllerInput;
use std::collections::BTreeMap;

/// Produces the raw device state for each frame
pub trait InputSource: Send {
    fn poll(&mut self, frame: u64, delta_time: f32) -> RawControllerInput;
}

/// Replays a keyframed input script. Each keyframe holds until the next one,
/// frames before the first keyframe see idle input.
#[derive(Clone, Debug, Default)]
pub struct ScriptedInput {
    keyframes: BTreeMap<u64, RawControllerInput>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: u64, input: RawControllerInput) -> &mut Self {
        self.keyframes.insert(frame, input);
        self
    }

    pub fn with_keyframe(mut self, frame: u64, input: RawControllerInput) -> Self {
        self.keyframes.insert(frame, input);
        self
    }

    /// Last frame that changes the input
    pub fn last_keyframe(&self) -> Option<u64> {
        self.keyframes.keys().next_back().copied()
    }

    pub fn input_at(&self, frame: u64) -> RawControllerInput {
        self.keyframes
            .range(..=frame)
            .next_back()
            .map(|(_, input)| *input)
            .unwrap_or_default()
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self, frame: u64, _delta_time: f32) -> RawControllerInput {
        self.input_at(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::controller_data::Hand;

    #[test]
    fn keyframes_hold_until_replaced() {
        let mut script = ScriptedInput::new();
        script
            .push(3, RawControllerInput::default().with_trigger(Hand::Left, 1.0))
            .push(6, RawControllerInput::default());

        assert_eq!(script.poll(1, 0.0).trigger_values[0], 0.0);
        assert_eq!(script.poll(3, 0.0).trigger_values[0], 1.0);
        assert_eq!(script.poll(5, 0.0).trigger_values[0], 1.0);
        assert_eq!(script.poll(9, 0.0).trigger_values[0], 0.0);
        assert_eq!(script.last_keyframe(), Some(6));
    }
}
