//! Machine state and position types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine state as tracked by the streaming controller.
///
/// Mirrors the GRBL 1.1 state names. `Home` reports are folded into `Run`
/// because the machine is executing motion either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MachineState {
    /// No session open
    #[default]
    Disconnected,
    /// Connected and ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Jogging
    Jog,
    /// Alarm lock, requires reset and unlock
    Alarm,
    /// Safety door open
    Door,
    /// G-code check mode
    Check,
    /// Sleep mode
    Sleep,
}

impl MachineState {
    /// Map a GRBL status-report state name (e.g. `Hold:0`, `Door:1`) to a state.
    pub fn from_grbl_name(name: &str) -> Option<Self> {
        let base = name.split(':').next().unwrap_or(name).trim();
        let state = match base.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" | "home" => Self::Run,
            "hold" => Self::Hold,
            "jog" => Self::Jog,
            "alarm" => Self::Alarm,
            "door" => Self::Door,
            "check" => Self::Check,
            "sleep" => Self::Sleep,
            _ => return None,
        };
        Some(state)
    }

    /// Check if this state implies an open session
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Check if the machine is moving or about to move
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Run | Self::Jog | Self::Hold)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Sleep => "Sleep",
        };
        write!(f, "{}", name)
    }
}

/// Machine coordinates in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl std::ops::Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{:.3} Y:{:.3} Z:{:.3}", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grbl_state_names() {
        assert_eq!(MachineState::from_grbl_name("Idle"), Some(MachineState::Idle));
        assert_eq!(MachineState::from_grbl_name("Hold:0"), Some(MachineState::Hold));
        assert_eq!(MachineState::from_grbl_name("Door:1"), Some(MachineState::Door));
        assert_eq!(MachineState::from_grbl_name("Home"), Some(MachineState::Run));
        assert_eq!(MachineState::from_grbl_name("ALARM"), Some(MachineState::Alarm));
        assert_eq!(MachineState::from_grbl_name("Bogus"), None);
    }

    #[test]
    fn test_position_arithmetic() {
        let mpos = Position::new(10.0, 5.0, 0.0);
        let wco = Position::new(2.0, 1.0, 0.0);
        assert_eq!(mpos - wco, Position::new(8.0, 4.0, 0.0));
        assert_eq!((mpos - wco) + wco, mpos);
    }
}
