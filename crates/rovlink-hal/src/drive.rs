//! Differential-drive command encoder.
//!
//! Converts a signed forward `speed` and a `turn` ratio into the left/right
//! wheel values carried by a `drive` command:
//!
//! ```text
//! left  = speed − turn · speed · 2
//! right = speed + turn · speed · 2
//! ```
//!
//! Each wheel value is scaled by 100 and truncated toward zero, giving integer
//! wheel percentages.  Nothing is clamped: keeping `speed` within
//! [`MAX_SPEED`] and `turn` within [`MAX_TURN`] is the caller's job.
//!
//! # Example
//!
//! ```rust
//! use rovlink_hal::drive::{DifferentialDrive, DriveCommand};
//!
//! let mut drive = DifferentialDrive::new();
//! drive.set_speed(0.1);
//! let cmd = drive.set_turn(0.5);
//! assert_eq!(cmd, DriveCommand { left: 0, right: 20 });
//! ```

/// Top speed of the robot in link units.
pub const MAX_SPEED: f64 = 0.1142 * 2.0;
/// Largest meaningful turn magnitude.
pub const MAX_TURN: f64 = 1.0;

pub const TURN_LEFT: f64 = 1.0;
pub const TURN_HALF_LEFT: f64 = 0.5;
pub const TURN_CENTER: f64 = 0.0;
pub const TURN_HALF_RIGHT: f64 = -0.5;
pub const TURN_RIGHT: f64 = -1.0;

/// Left/right wheel percentages for one `drive` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveCommand {
    pub left: i32,
    pub right: i32,
}

impl DriveCommand {
    pub const STOP: DriveCommand = DriveCommand { left: 0, right: 0 };

    /// Encode `(speed, turn)` into wheel percentages.
    pub fn differential(speed: f64, turn: f64) -> Self {
        let (left, right) = wheel_velocities(speed, turn);
        Self {
            left: to_percent(left),
            right: to_percent(right),
        }
    }
}

/// Unscaled left/right wheel velocities for `(speed, turn)`.
pub fn wheel_velocities(speed: f64, turn: f64) -> (f64, f64) {
    let delta = turn * speed * 2.0;
    (speed - delta, speed + delta)
}

/// `as` truncates toward zero and saturates at the `i32` bounds (NaN → 0).
fn to_percent(velocity: f64) -> i32 {
    (100.0 * velocity) as i32
}

/// Retains the last commanded speed and turn so either can be changed
/// independently.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DifferentialDrive {
    speed: f64,
    turn: f64,
}

impl DifferentialDrive {
    /// Start stationary and straight.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn turn(&self) -> f64 {
        self.turn
    }

    /// Change the speed and return the command for the new pair.
    pub fn set_speed(&mut self, speed: f64) -> DriveCommand {
        self.speed = speed;
        self.command()
    }

    /// Change the turn ratio and return the command for the new pair.
    pub fn set_turn(&mut self, turn: f64) -> DriveCommand {
        self.turn = turn;
        self.command()
    }

    /// Zero the speed; the turn ratio is kept.
    pub fn stop(&mut self) -> DriveCommand {
        self.set_speed(0.0)
    }

    /// Command for the currently retained pair.
    pub fn command(&self) -> DriveCommand {
        DriveCommand::differential(self.speed, self.turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_left_turn_stalls_left_wheel() {
        assert_eq!(
            DriveCommand::differential(0.1, 0.5),
            DriveCommand { left: 0, right: 20 }
        );
    }

    #[test]
    fn straight_drive_uses_equal_wheels() {
        assert_eq!(
            DriveCommand::differential(-0.5, TURN_CENTER),
            DriveCommand {
                left: -50,
                right: -50,
            }
        );
    }

    #[test]
    fn full_right_spins_wheels_apart() {
        assert_eq!(
            DriveCommand::differential(0.5, TURN_RIGHT),
            DriveCommand {
                left: 150,
                right: -50,
            }
        );
        assert_eq!(
            DriveCommand::differential(0.5, 0.25),
            DriveCommand {
                left: 25,
                right: 75,
            }
        );
    }

    #[test]
    fn scaling_truncates_toward_zero() {
        // 22.84 and -25.7 both lose their fractional part.
        assert_eq!(DriveCommand::differential(MAX_SPEED, 0.0).left, 22);
        assert_eq!(DriveCommand::differential(-0.257, 0.0).right, -25);
    }

    #[test]
    fn mirrored_turn_swaps_wheels() {
        for speed in [-0.2, -0.05, 0.0, 0.07, 0.15, MAX_SPEED] {
            for turn in [0.0, 0.1, 0.33, 0.5, 0.9, 1.0] {
                let a = DriveCommand::differential(speed, turn);
                let b = DriveCommand::differential(speed, -turn);
                assert_eq!(a.left, b.right, "speed={speed} turn={turn}");
                assert_eq!(a.right, b.left, "speed={speed} turn={turn}");
            }
        }
    }

    #[test]
    fn out_of_range_input_is_not_rejected() {
        let cmd = DriveCommand::differential(2.0, 3.0);
        assert_eq!(
            cmd,
            DriveCommand {
                left: -1000,
                right: 1400,
            }
        );
        let nan = DriveCommand::differential(f64::NAN, 0.0);
        assert_eq!(nan, DriveCommand::STOP);
    }

    #[test]
    fn retained_turn_applies_to_new_speed() {
        let mut drive = DifferentialDrive::new();
        assert_eq!(drive.set_turn(TURN_HALF_LEFT), DriveCommand::STOP);
        assert_eq!(
            drive.set_speed(0.5),
            DriveCommand {
                left: 0,
                right: 100,
            }
        );
        assert_eq!(drive.turn(), TURN_HALF_LEFT);
        assert_eq!(drive.stop(), DriveCommand::STOP);
        assert_eq!(drive.turn(), TURN_HALF_LEFT);
    }
}
