//! Axis identity and per-axis configuration.
//!
//! Coordinates of linear axes are lengths in millimeters, rotation axes
//! carry angles in degrees. Limits are given per unit of the axis.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    #[default]
    Linear,
    Rotation,
}

/// Identity of an axis. Cheap to clone, ordered by name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AxisId {
    name: Arc<str>,
    kind: AxisKind,
}

impl AxisId {
    pub fn new(name: &str, kind: AxisKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn linear(name: &str) -> Self {
        Self::new(name, AxisKind::Linear)
    }

    pub fn rotation(name: &str) -> Self {
        Self::new(name, AxisKind::Rotation)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    pub fn is_rotation(&self) -> bool {
        self.kind == AxisKind::Rotation
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklashCompensation {
    #[default]
    None,
    /// Always approach the target from the same side, overshooting by the offset.
    OneSidedPositioning,
    /// Like [`BacklashCompensation::OneSidedPositioning`], but only when moving
    /// in the direction of the offset.
    OneSidedOptimizedPositioning,
    /// Add the offset whenever the axis travels in the direction of the offset.
    DirectionalCompensation,
}

/// Configuration of one controller axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub name: String,

    #[serde(default)]
    pub kind: AxisKind,

    /// Smallest distinguishable coordinate difference.
    #[serde(default = "default_resolution")]
    pub resolution: f64,

    #[serde(default)]
    pub soft_limit_low: Option<f64>,

    #[serde(default)]
    pub soft_limit_high: Option<f64>,

    #[serde(default)]
    pub safe_zone_low: Option<f64>,

    #[serde(default)]
    pub safe_zone_high: Option<f64>,

    #[serde(default = "default_velocity_max")]
    pub velocity_max: f64,

    #[serde(default = "default_acceleration_max")]
    pub acceleration_max: f64,

    /// Zero selects constant acceleration control.
    #[serde(default = "default_jerk_max")]
    pub jerk_max: f64,

    #[serde(default)]
    pub home_coordinate: f64,

    /// Rotate the shortest way around to the target angle.
    #[serde(default)]
    pub wrap_around_rotation: bool,

    /// Keep the angle within +/-180 degrees.
    #[serde(default)]
    pub limit_rotation: bool,

    #[serde(default)]
    pub backlash_offset: f64,

    #[serde(default)]
    pub backlash_compensation: BacklashCompensation,

    #[serde(default = "default_backlash_speed_factor")]
    pub backlash_speed_factor: f64,
}

fn default_resolution() -> f64 {
    0.0001
}

fn default_velocity_max() -> f64 {
    500.0
}

fn default_acceleration_max() -> f64 {
    2000.0
}

fn default_jerk_max() -> f64 {
    15000.0
}

fn default_backlash_speed_factor() -> f64 {
    1.0
}

impl AxisConfig {
    pub fn new(name: &str, kind: AxisKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            resolution: default_resolution(),
            soft_limit_low: None,
            soft_limit_high: None,
            safe_zone_low: None,
            safe_zone_high: None,
            velocity_max: default_velocity_max(),
            acceleration_max: default_acceleration_max(),
            jerk_max: default_jerk_max(),
            home_coordinate: 0.0,
            wrap_around_rotation: false,
            limit_rotation: false,
            backlash_offset: 0.0,
            backlash_compensation: BacklashCompensation::None,
            backlash_speed_factor: default_backlash_speed_factor(),
        }
    }

    pub fn linear(name: &str) -> Self {
        Self::new(name, AxisKind::Linear)
    }

    pub fn rotation(name: &str) -> Self {
        Self::new(name, AxisKind::Rotation)
    }

    pub fn with_limits(mut self, velocity_max: f64, acceleration_max: f64, jerk_max: f64) -> Self {
        self.velocity_max = velocity_max;
        self.acceleration_max = acceleration_max;
        self.jerk_max = jerk_max;
        self
    }

    pub fn with_soft_limits(mut self, low: Option<f64>, high: Option<f64>) -> Self {
        self.soft_limit_low = low;
        self.soft_limit_high = high;
        self
    }

    pub fn with_backlash(
        mut self,
        method: BacklashCompensation,
        offset: f64,
        speed_factor: f64,
    ) -> Self {
        self.backlash_compensation = method;
        self.backlash_offset = offset;
        self.backlash_speed_factor = speed_factor;
        self
    }

    pub fn id(&self) -> AxisId {
        AxisId::new(&self.name, self.kind)
    }

    pub fn is_rotation(&self) -> bool {
        self.kind == AxisKind::Rotation
    }

    /// Motion limit of the given derivative order (1 = velocity, 2 = acceleration, 3 = jerk).
    pub fn motion_limit(&self, order: usize) -> f64 {
        match order {
            1 => self.velocity_max,
            2 => self.acceleration_max,
            3 => self.jerk_max,
            _ => 0.0,
        }
    }

    pub fn resolution_ticks(&self, coordinate: f64) -> i64 {
        (coordinate / self.resolution).round() as i64
    }

    /// True if both coordinates fall on the same resolution tick. Rotation
    /// axes also match across full turns.
    pub fn coordinates_match(&self, a: f64, b: f64) -> bool {
        let a = self.resolution_ticks(a);
        let b = self.resolution_ticks(b);
        if self.is_rotation() {
            let turn = self.resolution_ticks(360.0);
            turn != 0 && (a - b).abs() % turn == 0
        } else {
            a == b
        }
    }

    /// Lower and upper location bounds used while profiling a move.
    pub fn location_bounds(&self, safe_zone: bool) -> (f64, f64) {
        if self.is_rotation() {
            return (f64::NEG_INFINITY, f64::INFINITY);
        }
        let mut low = self.soft_limit_low.unwrap_or(f64::NEG_INFINITY);
        let mut high = self.soft_limit_high.unwrap_or(f64::INFINITY);
        if safe_zone {
            if let Some(zone) = self.safe_zone_low {
                low = zone;
            }
            if let Some(zone) = self.safe_zone_high {
                high = zone;
            }
        }
        (low, high)
    }
}

/// Normalize an angle into the range (-180, 180].
pub fn normalize_angle_180(angle: f64) -> f64 {
    let mut angle = angle % 360.0;
    if angle > 180.0 {
        angle -= 360.0;
    } else if angle <= -180.0 {
        angle += 360.0;
    }
    angle
}

/// Registry of the configured axes.
#[derive(Clone, Debug, Default)]
pub struct Axes {
    axes: BTreeMap<AxisId, AxisConfig>,
}

impl Axes {
    pub fn new(configs: impl IntoIterator<Item = AxisConfig>) -> Self {
        let axes = configs.into_iter().map(|c| (c.id(), c)).collect();
        Self { axes }
    }

    pub fn get(&self, axis: &AxisId) -> Result<&AxisConfig> {
        self.axes
            .get(axis)
            .ok_or_else(|| Error::UnknownAxis(axis.clone()))
    }

    pub fn by_name(&self, name: &str) -> Option<&AxisConfig> {
        self.axes.values().find(|c| c.name == name)
    }

    pub fn contains(&self, axis: &AxisId) -> bool {
        self.axes.contains_key(axis)
    }

    pub fn ids(&self) -> impl Iterator<Item = &AxisId> {
        self.axes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AxisId, &AxisConfig)> {
        self.axes.iter()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Resolution of the axis, or `f64::EPSILON` for unknown axes.
    pub fn resolution(&self, axis: &AxisId) -> f64 {
        self.axes
            .get(axis)
            .map(|c| c.resolution)
            .unwrap_or(f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_angles() {
        assert_eq!(normalize_angle_180(0.0), 0.0);
        assert_eq!(normalize_angle_180(190.0), -170.0);
        assert_eq!(normalize_angle_180(-190.0), 170.0);
        assert_eq!(normalize_angle_180(540.0), 180.0);
        assert_eq!(normalize_angle_180(-180.0), 180.0);
        assert_eq!(normalize_angle_180(720.5), 0.5);
    }

    #[test]
    fn linear_coordinates_match_at_resolution() {
        let axis = AxisConfig::linear("X");
        assert!(axis.coordinates_match(10.0, 10.00004));
        assert!(!axis.coordinates_match(10.0, 10.0002));
    }

    #[test]
    fn rotation_coordinates_match_across_turns() {
        let axis = AxisConfig::rotation("C");
        assert!(axis.coordinates_match(90.0, 450.0));
        assert!(axis.coordinates_match(-270.0, 90.0));
        assert!(!axis.coordinates_match(90.0, 91.0));
    }

    #[test]
    fn safe_zone_narrows_bounds() {
        let mut axis = AxisConfig::linear("Z").with_soft_limits(Some(-30.0), Some(5.0));
        axis.safe_zone_low = Some(-5.0);
        assert_eq!(axis.location_bounds(false), (-30.0, 5.0));
        assert_eq!(axis.location_bounds(true), (-5.0, 5.0));
        assert_eq!(
            AxisConfig::rotation("C").location_bounds(false),
            (f64::NEG_INFINITY, f64::INFINITY)
        );
    }

    #[test]
    fn unknown_axis_is_reported() {
        let axes = Axes::new([AxisConfig::linear("X")]);
        assert!(axes.get(&AxisId::linear("X")).is_ok());
        assert!(matches!(axes.get(&AxisId::linear("Y")), Err(Error::UnknownAxis(_))));
    }
}
