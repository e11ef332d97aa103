//! Authoritative target state for one climate component.
//!
//! Every setter compares old and new values and only marks the state dirty
//! on an actual change; [`ClimateState::take_command`] yields an outbound
//! command only while dirty. Threshold edits additionally feed the paired
//! edit inference: the accessory platform fires both threshold
//! characteristics in quick succession for a single range-slider gesture,
//! and the device protocol distinguishes single- from dual-setpoint
//! semantics only through the mode field.

use std::time::Duration;

use tokio::time::Instant;

use crate::esphome::client::ClimateCommand;
use crate::esphome::component::ClimateFanMode;
use crate::esphome::component::ClimateMode;
use crate::esphome::component::ClimateSwingMode;
use crate::esphome::component::ClimateUpdate;

/// Window in which an edit of the other threshold counts as one combined
/// "set to AUTO range" gesture.
pub(crate) const THRESHOLD_PAIR_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdBound {
    Low,
    High,
}

pub struct ClimateState {
    key: u32,
    active: bool,
    mode: ClimateMode,
    /// Last non-off mode reported by the device, restored when the unit is
    /// switched back on.
    previous_mode: ClimateMode,
    fan_mode: Option<ClimateFanMode>,
    swing_mode: Option<ClimateSwingMode>,
    target_temperature: f64,
    target_temperature_low: f64,
    target_temperature_high: f64,
    current_temperature: Option<f64>,
    changes_made: bool,
    last_threshold_edit: Option<(ThresholdBound, Instant)>,
}

impl ClimateState {
    pub fn new(key: u32) -> Self {
        Self {
            key,
            active: false,
            mode: ClimateMode::Off,
            previous_mode: ClimateMode::Off,
            fan_mode: None,
            swing_mode: None,
            target_temperature: 0.0,
            target_temperature_low: 0.0,
            target_temperature_high: 0.0,
            current_temperature: None,
            changes_made: false,
            last_threshold_edit: None,
        }
    }

    pub fn mode(&self) -> ClimateMode {
        self.mode
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.current_temperature
    }

    /// Turning on restores the last known mode, or defaults to auto when
    /// none is known; turning off forces the mode off.
    pub fn set_active(&mut self, value: bool) {
        let mode = if value {
            if self.mode != ClimateMode::Off {
                self.mode
            } else if self.previous_mode != ClimateMode::Off {
                self.previous_mode
            } else {
                ClimateMode::Auto
            }
        } else {
            ClimateMode::Off
        };

        self.mode = mode;
        if self.active != value {
            self.changes_made = true;
        }
        self.active = value;
    }

    pub fn set_mode(&mut self, value: ClimateMode) {
        if self.mode != value {
            self.changes_made = true;
        }
        self.mode = value;
    }

    pub fn set_fan_mode(&mut self, value: ClimateFanMode) {
        if self.fan_mode != Some(value) {
            self.changes_made = true;
        }
        self.fan_mode = Some(value);
    }

    pub fn set_swing_mode(&mut self, value: ClimateSwingMode) {
        if self.swing_mode != Some(value) {
            self.changes_made = true;
        }
        self.swing_mode = Some(value);
    }

    pub fn set_target_temperature(&mut self, value: f64) {
        if self.target_temperature != value {
            self.changes_made = true;
        }
        self.target_temperature = value;
    }

    /// Cooling threshold edit. Unpaired, this is a direct switch to cooling
    /// with a single setpoint.
    pub fn set_target_temperature_low(&mut self, value: f64) {
        if self.target_temperature_low != value {
            self.changes_made = true;
        }
        self.mode = self.threshold_mode(ThresholdBound::Low, ClimateMode::Cool);
        if self.mode != ClimateMode::Auto {
            self.target_temperature = value;
        }
        self.target_temperature_low = value;
    }

    /// Heating threshold edit. Unpaired, this is a direct switch to heating
    /// with a single setpoint.
    pub fn set_target_temperature_high(&mut self, value: f64) {
        if self.target_temperature_high != value {
            self.changes_made = true;
        }
        self.mode = self.threshold_mode(ThresholdBound::High, ClimateMode::Heat);
        if self.mode != ClimateMode::Auto {
            self.target_temperature = value;
        }
        self.target_temperature_high = value;
    }

    /// Two edits of opposite bounds within the window are one combined
    /// range gesture; anything else is the single-setpoint mode.
    fn threshold_mode(&mut self, bound: ThresholdBound, single: ClimateMode) -> ClimateMode {
        let now = Instant::now();
        let paired = matches!(
            self.last_threshold_edit,
            Some((last_bound, at))
                if last_bound != bound && now.duration_since(at) < THRESHOLD_PAIR_WINDOW
        );
        self.last_threshold_edit = Some((bound, now));
        if paired { ClimateMode::Auto } else { single }
    }

    /// Overwrite the local mirror with a device report.
    ///
    /// Reports do not touch the dirty flag: a user edit that raced the
    /// report still flushes.
    pub fn apply_report(&mut self, update: &ClimateUpdate) {
        self.mode = update.mode;
        if update.mode != ClimateMode::Off {
            self.previous_mode = update.mode;
        }
        self.active = update.mode != ClimateMode::Off;
        self.target_temperature = update.target_temperature;
        self.target_temperature_low = update.target_temperature_low;
        self.target_temperature_high = update.target_temperature_high;
        self.current_temperature = update.current_temperature;
        self.fan_mode = update.fan_mode;
        self.swing_mode = update.swing_mode;
    }

    /// Build the outbound command if anything changed since the last flush.
    ///
    /// In auto mode the command carries the threshold pair; in every other
    /// mode both setpoint fields carry the single target.
    pub fn take_command(&mut self) -> Option<ClimateCommand> {
        if !self.changes_made {
            return None;
        }
        self.changes_made = false;

        let (low, high) = if self.mode == ClimateMode::Auto {
            (self.target_temperature_low, self.target_temperature_high)
        } else {
            (self.target_temperature, self.target_temperature)
        };

        Some(ClimateCommand {
            key: self.key,
            mode: self.mode,
            target_temperature: self.target_temperature,
            target_temperature_low: low,
            target_temperature_high: high,
            fan_mode: self.fan_mode,
            swing_mode: self.swing_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_paired_threshold_edits_infer_auto_range() {
        let mut state = ClimateState::new(1);
        state.set_target_temperature_low(18.0);
        advance(Duration::from_millis(10)).await;
        state.set_target_temperature_high(24.0);

        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Auto);
        assert_eq!(command.target_temperature_low, 18.0);
        assert_eq!(command.target_temperature_high, 24.0);

        // Nothing further changed; the flush is a no-op.
        assert!(state.take_command().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpaired_cooling_threshold_is_direct_cool() {
        let mut state = ClimateState::new(1);
        state.set_target_temperature_low(18.0);

        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Cool);
        assert_eq!(command.target_temperature, 18.0);
        assert_eq!(command.target_temperature_low, 18.0);
        assert_eq!(command.target_temperature_high, 18.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_second_edit_is_direct_heat() {
        let mut state = ClimateState::new(1);
        state.set_target_temperature_low(18.0);
        advance(Duration::from_millis(60)).await;
        state.set_target_temperature_high(24.0);

        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Heat);
        assert_eq!(command.target_temperature, 24.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_bound_does_not_pair() {
        let mut state = ClimateState::new(1);
        state.set_target_temperature_low(18.0);
        advance(Duration::from_millis(10)).await;
        state.set_target_temperature_low(19.0);

        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Cool);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_setter_value_does_not_dirty() {
        let mut state = ClimateState::new(1);
        state.set_target_temperature(21.0);
        assert!(state.take_command().is_some());

        state.set_target_temperature(21.0);
        assert!(state.take_command().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_off_forces_mode_off() {
        let mut state = ClimateState::new(1);
        state.set_mode(ClimateMode::Heat);
        state.set_active(true);
        assert!(state.take_command().is_some());

        state.set_active(false);
        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_on_without_known_mode_defaults_to_auto() {
        let mut state = ClimateState::new(1);
        state.set_active(true);
        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Auto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_on_restores_reported_mode() {
        let mut state = ClimateState::new(1);
        state.apply_report(&ClimateUpdate {
            mode: ClimateMode::Heat,
            target_temperature: 21.0,
            ..ClimateUpdate::default()
        });
        state.set_active(false);
        assert!(state.take_command().is_some());

        state.set_active(true);
        let command = state.take_command().unwrap();
        assert_eq!(command.mode, ClimateMode::Heat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_echo_suppresses_redundant_flush() {
        let mut state = ClimateState::new(1);
        state.apply_report(&ClimateUpdate {
            mode: ClimateMode::Cool,
            target_temperature: 19.0,
            ..ClimateUpdate::default()
        });

        // The platform echoing the reported value back is not a change.
        state.set_target_temperature(19.0);
        assert!(state.take_command().is_none());
    }
}
