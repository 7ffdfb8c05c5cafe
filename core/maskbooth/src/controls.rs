use log::debug;

use crate::calibration::CalibrationEntry;
use crate::error::Result;
use crate::session::OverlaySession;

/// Pixels moved by one nudge.
pub const NUDGE_STEP: f64 = 2.0;
/// Pixels moved by one nudge with shift held.
pub const NUDGE_STEP_LARGE: f64 = 10.0;
/// Calibration scale change per step.
pub const SCALE_STEP: f64 = 0.05;
/// Smallest calibration scale reachable from the controls.
pub const MIN_SCALE: f64 = 0.8;
/// Largest calibration scale reachable from the controls.
pub const MAX_SCALE: f64 = 2.0;

/// A manual adjustment request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdjustCommand {
    /// Shift the overlay by the given surface pixels.
    Nudge {
        /// Horizontal shift.
        dx: f64,
        /// Vertical shift.
        dy: f64,
    },
    /// Grow the overlay one step.
    ScaleUp,
    /// Shrink the overlay one step.
    ScaleDown,
    /// Discard unsaved adjustments and return to identity.
    Reset,
    /// Delete every saved calibration for the overlay. Has no key binding.
    ResetSaved,
    /// Persist the current adjustment.
    Save,
    /// Switch face tracking on or off.
    ToggleAutoPosition,
    /// Select the overlay at this catalog position (0 is "no overlay").
    Select(usize),
}

/// Map a keyboard key (DOM `KeyboardEvent.key` naming) to a command.
pub fn command_for_key(key: &str, shift: bool) -> Option<AdjustCommand> {
    let step = if shift { NUDGE_STEP_LARGE } else { NUDGE_STEP };
    let command = match key {
        "ArrowUp" => AdjustCommand::Nudge { dx: 0.0, dy: -step },
        "ArrowDown" => AdjustCommand::Nudge { dx: 0.0, dy: step },
        "ArrowLeft" => AdjustCommand::Nudge { dx: -step, dy: 0.0 },
        "ArrowRight" => AdjustCommand::Nudge { dx: step, dy: 0.0 },
        "+" | "=" => AdjustCommand::ScaleUp,
        "-" | "_" => AdjustCommand::ScaleDown,
        "r" | "R" => AdjustCommand::Reset,
        "s" | "S" => AdjustCommand::Save,
        "m" | "M" => AdjustCommand::ToggleAutoPosition,
        digit => match digit.parse::<usize>() {
            Ok(n) if digit.len() == 1 => AdjustCommand::Select(n),
            _ => return None,
        },
    };
    Some(command)
}

/// Apply `command` to `session`.
///
/// Returns a short notification for the user, or `None` when the command
/// had nothing to act on (e.g. adjusting with no overlay selected).
pub fn apply(session: &mut OverlaySession, command: AdjustCommand) -> Result<Option<String>> {
    if let AdjustCommand::Select(index) = command {
        let name = session.select_index(index)?.display_name.clone();
        return Ok(Some(format!("Overlay: {name}")));
    }
    if let AdjustCommand::ToggleAutoPosition = command {
        let on = session.toggle_auto_position();
        return Ok(Some(format!(
            "Auto-positioning {}",
            if on { "enabled" } else { "disabled" }
        )));
    }
    if session.active_overlay().is_none() {
        return Ok(None);
    }

    let current = session.calibration().clone();
    let message = match command {
        AdjustCommand::Nudge { dx, dy } => {
            session.set_calibration(CalibrationEntry {
                offset_x: current.offset_x + dx,
                offset_y: current.offset_y + dy,
                ..current
            })?;
            describe(session.calibration())
        }
        AdjustCommand::ScaleUp | AdjustCommand::ScaleDown => {
            let delta = if command == AdjustCommand::ScaleUp {
                SCALE_STEP
            } else {
                -SCALE_STEP
            };
            session.set_calibration(CalibrationEntry {
                scale: (current.scale + delta).clamp(MIN_SCALE, MAX_SCALE),
                ..current
            })?;
            describe(session.calibration())
        }
        AdjustCommand::Reset => {
            session.set_calibration(CalibrationEntry::identity(&current.overlay_id))?;
            "Overlay position reset".to_string()
        }
        AdjustCommand::ResetSaved => {
            session.reset_calibration()?;
            "Saved calibration cleared".to_string()
        }
        AdjustCommand::Save => {
            session.save_calibration()?;
            "Calibration saved".to_string()
        }
        AdjustCommand::ToggleAutoPosition | AdjustCommand::Select(_) => return Ok(None),
    };
    debug!("{message}");
    Ok(Some(message))
}

fn describe(entry: &CalibrationEntry) -> String {
    format!(
        "Overlay adjusted: offset ({:.0}, {:.0}) scale {:.2}",
        entry.offset_x, entry.offset_y, entry.scale
    )
}
