//! Input handling.
//!
//! A terminal client has no wheel or pedals, so input is driven by console
//! commands that set the held throttle and steering. The controller is
//! sampled once per tick; the vehicle turns the sample into a move.

use vehicle_shared::moves::InputState;

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCommand {
    Throttle(f32),
    Steer(f32),
    Stop,
    Status,
    Quit,
}

impl InputCommand {
    /// Parses one console line. Returns `None` for unknown or malformed input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let cmd = tokens.next()?;
        let value = tokens.next().and_then(|v| v.parse::<f32>().ok());
        match cmd {
            "throttle" | "t" => value.map(InputCommand::Throttle),
            "steer" | "s" => value.map(InputCommand::Steer),
            "stop" => Some(InputCommand::Stop),
            "status" => Some(InputCommand::Status),
            "quit" | "exit" => Some(InputCommand::Quit),
            _ => None,
        }
    }
}

/// Held control state.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputController {
    held: InputState,
}

impl InputController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a control command; non-control commands are ignored.
    pub fn apply(&mut self, cmd: InputCommand) {
        match cmd {
            InputCommand::Throttle(v) => self.held.throttle = v,
            InputCommand::Steer(v) => self.held.steering = v,
            InputCommand::Stop => self.held = InputState::default(),
            InputCommand::Status | InputCommand::Quit => {}
        }
        self.held = self.held.clamped();
    }

    /// Input for the current tick.
    pub fn sample(&self) -> InputState {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_commands() {
        assert_eq!(
            InputCommand::parse("throttle 0.5"),
            Some(InputCommand::Throttle(0.5))
        );
        assert_eq!(
            InputCommand::parse("  steer -1 "),
            Some(InputCommand::Steer(-1.0))
        );
        assert_eq!(InputCommand::parse("stop"), Some(InputCommand::Stop));
        assert_eq!(InputCommand::parse("throttle"), None);
        assert_eq!(InputCommand::parse("throttle fast"), None);
        assert_eq!(InputCommand::parse("honk"), None);
        assert_eq!(InputCommand::parse(""), None);
    }

    #[test]
    fn controller_clamps_and_stops() {
        let mut input = InputController::new();
        input.apply(InputCommand::Throttle(3.0));
        input.apply(InputCommand::Steer(-0.25));
        assert_eq!(input.sample(), InputState::new(-0.25, 1.0));

        input.apply(InputCommand::Stop);
        assert_eq!(input.sample(), InputState::default());
    }
}
