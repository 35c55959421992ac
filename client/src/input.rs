//! Input event model.
//!
//! Controllers consume [`InputEvent`]s rather than raw device state, so a
//! scripted source can stand in for a human during tests and bot runs.

use shared::Vec2;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Movement intent: x turns (left negative), y drives (forward positive).
    Move(Vec2),
    /// World-space point the turret should track.
    Aim(Vec2),
    /// Trigger held or released.
    Fire(bool),
}

pub trait InputSource {
    /// Events produced since the last poll, given the elapsed time.
    fn poll(&mut self, dt: f32) -> Vec<InputEvent>;
}

/// Replays a fixed timeline of events, releasing each once its time has
/// passed. Used by the bot binary and by controller tests.
pub struct ScriptedInput {
    timeline: VecDeque<(f32, InputEvent)>,
    clock: f32,
}

impl ScriptedInput {
    pub fn new(mut events: Vec<(f32, InputEvent)>) -> Self {
        events.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            timeline: events.into(),
            clock: 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.timeline.is_empty()
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self, dt: f32) -> Vec<InputEvent> {
        self.clock += dt;
        let mut due = Vec::new();
        while let Some((at, _)) = self.timeline.front() {
            if *at > self.clock {
                break;
            }
            if let Some((_, event)) = self.timeline.pop_front() {
                due.push(event);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_events_release_in_order() {
        let mut input = ScriptedInput::new(vec![
            (0.5, InputEvent::Fire(true)),
            (0.1, InputEvent::Move(Vec2::new(0.0, 1.0))),
        ]);

        assert_eq!(
            input.poll(0.2),
            vec![InputEvent::Move(Vec2::new(0.0, 1.0))]
        );
        assert!(input.poll(0.2).is_empty());
        assert_eq!(input.poll(0.2), vec![InputEvent::Fire(true)]);
        assert!(input.is_finished());
    }
}
