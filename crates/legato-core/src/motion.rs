//! A single planned move across all participating axes.

use crate::{
    axes::{Axes, AxisId},
    coordinated::{coordinate_profiles, synchronize_profiles},
    error::{Error, Result},
    location::AxesLocation,
    profile::{Boundary, MotionProfile, ProfileLimits, ProfileOptions, SEGMENTS},
};
use std::{collections::BTreeMap, fmt};

/// Lowest speed factor applied to motion limits.
pub const MIN_SPEED: f64 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Derivative {
    Location = 0,
    Velocity = 1,
    Acceleration = 2,
    Jerk = 3,
}

impl Derivative {
    pub const ALL: [Derivative; 4] = [
        Derivative::Location,
        Derivative::Velocity,
        Derivative::Acceleration,
        Derivative::Jerk,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MotionOptions(u16);

impl MotionOptions {
    const SPEED_OVER_PRECISION: u16 = 1 << 0;
    const UNCOORDINATED_MOTION: u16 = 1 << 1;
    const LIMIT_TO_SAFE_ZONE: u16 = 1 << 2;
    const JOG_MOTION: u16 = 1 << 3;
    const STILLSTAND: u16 = 1 << 4;
    const FIXED_WAYPOINT: u16 = 1 << 5;
    const COORDINATED_WAYPOINT: u16 = 1 << 6;
    const BLEND: u16 = 1 << 7;

    pub const fn new() -> Self {
        Self(0)
    }

    /// Skip backlash compensation.
    pub const fn with_speed_over_precision(mut self) -> Self {
        self.0 |= Self::SPEED_OVER_PRECISION;
        self
    }

    /// Let every axis move at its own limits, only sharing the duration.
    pub const fn with_uncoordinated_motion(mut self) -> Self {
        self.0 |= Self::UNCOORDINATED_MOTION;
        self
    }

    pub const fn with_limit_to_safe_zone(mut self) -> Self {
        self.0 |= Self::LIMIT_TO_SAFE_ZONE;
        self
    }

    /// Leave the end location at cruise speed. Only the last pending move
    /// keeps this, the controller stops the jog.
    pub const fn with_jog_motion(mut self) -> Self {
        self.0 |= Self::JOG_MOTION;
        self
    }

    pub const fn with_stillstand(mut self) -> Self {
        self.0 |= Self::STILLSTAND;
        self
    }

    pub const fn with_fixed_waypoint(mut self) -> Self {
        self.0 |= Self::FIXED_WAYPOINT;
        self
    }

    /// Stay on the straight line when blending through the end location.
    pub const fn with_coordinated_waypoint(mut self) -> Self {
        self.0 |= Self::COORDINATED_WAYPOINT;
        self
    }

    /// Allow the planner to pass through the end location without stopping.
    pub const fn with_blend(mut self) -> Self {
        self.0 |= Self::BLEND;
        self
    }

    pub const fn is_speed_over_precision(&self) -> bool {
        self.0 & Self::SPEED_OVER_PRECISION != 0
    }

    pub const fn is_uncoordinated_motion(&self) -> bool {
        self.0 & Self::UNCOORDINATED_MOTION != 0
    }

    pub const fn is_limit_to_safe_zone(&self) -> bool {
        self.0 & Self::LIMIT_TO_SAFE_ZONE != 0
    }

    pub const fn is_jog_motion(&self) -> bool {
        self.0 & Self::JOG_MOTION != 0
    }

    pub const fn is_stillstand(&self) -> bool {
        self.0 & Self::STILLSTAND != 0
    }

    pub const fn is_fixed_waypoint(&self) -> bool {
        self.0 & Self::FIXED_WAYPOINT != 0
    }

    pub const fn is_coordinated_waypoint(&self) -> bool {
        self.0 & Self::COORDINATED_WAYPOINT != 0
    }

    pub const fn is_blend(&self) -> bool {
        self.0 & Self::BLEND != 0
    }

    pub const fn without_blend(mut self) -> Self {
        self.0 &= !Self::BLEND;
        self
    }

    pub const fn without_jog_motion(mut self) -> Self {
        self.0 &= !Self::JOG_MOTION;
        self
    }

    const fn without_fixed_waypoint(mut self) -> Self {
        self.0 &= !Self::FIXED_WAYPOINT;
        self
    }
}

/// Per-axis limits accumulated over the moving axes, indexed by order.
/// Index 0 collects the squared distances until it is rooted.
#[derive(Clone, Copy)]
struct OrderLimits([f64; 4]);

impl OrderLimits {
    fn new() -> Self {
        Self([0.0, f64::INFINITY, f64::INFINITY, f64::INFINITY])
    }

    fn add(&mut self, distance: f64, limit: impl Fn(usize) -> f64) {
        self.0[0] += distance * distance;
        for order in 1..=3 {
            let limit = limit(order);
            if limit > 0.0 {
                self.0[order] = self.0[order].min(limit / distance);
            }
        }
    }

    /// Turn the per-unit limits into limits along the Euclidean distance.
    fn finish(&mut self) {
        self.0[0] = self.0[0].sqrt();
        if self.0[0] > 0.0 {
            for order in 1..=3 {
                self.0[order] *= self.0[0];
            }
        }
    }

    fn time(&self) -> f64 {
        if self.0[0] > 0.0 {
            self.0[0] / self.0[1]
        } else {
            0.0
        }
    }
}

#[derive(Clone, Debug)]
pub struct Motion {
    time: f64,
    vectors: [AxesLocation; 4],
    location0: AxesLocation,
    nominal_speed: f64,
    effective_speed: f64,
    euclidean_distance: f64,
    options: MotionOptions,
    profiles: BTreeMap<AxisId, MotionProfile>,
    planned_time1: Option<f64>,
}

impl Motion {
    /// Plan a still-stand to still-stand move from `location0` to
    /// `location1`, solving the profiles of all axes in `location1`.
    pub fn new(
        axes: &Axes,
        location0: &AxesLocation,
        location1: &AxesLocation,
        nominal_speed: f64,
        options: MotionOptions,
    ) -> Result<Self> {
        let entries: Vec<_> = location1
            .iter()
            .map(|(axis, s1)| {
                let s0 = location0.coordinate(axis);
                (axis.clone(), Boundary::at(s0), Boundary::at(s1))
            })
            .collect();
        Self::between(axes, location0, &entries, nominal_speed, options)
    }

    /// Plan a move with arbitrary boundary states per axis.
    pub fn between(
        axes: &Axes,
        location0: &AxesLocation,
        boundaries: &[(AxisId, Boundary, Boundary)],
        nominal_speed: f64,
        options: MotionOptions,
    ) -> Result<Self> {
        let location1: AxesLocation = boundaries
            .iter()
            .map(|(axis, _, exit)| (axis.clone(), exit.location))
            .collect();
        let start: AxesLocation = boundaries
            .iter()
            .map(|(axis, entry, _)| (axis.clone(), entry.location))
            .collect();
        let distance = start.motion_segment_to(&location1, axes);

        let speed = nominal_speed.max(MIN_SPEED);
        let coordinated = !options.is_uncoordinated_motion() && !distance.is_empty();
        let mut profile_options = ProfileOptions::new();
        if coordinated {
            profile_options = profile_options.with_coordinated();
        }
        if options.is_jog_motion() {
            profile_options = profile_options.with_jog();
        }

        let mut overall = OrderLimits::new();
        let mut effective_speed = speed;
        if coordinated {
            let mut linear = OrderLimits::new();
            let mut rotational = OrderLimits::new();
            for (axis, d) in distance.iter() {
                let config = axes.get(axis)?;
                let d = d.abs();
                let limit = |order| config.motion_limit(order);
                overall.add(d, limit);
                if axis.is_rotation() {
                    rotational.add(d, limit);
                } else {
                    linear.add(d, limit);
                }
            }
            linear.finish();
            rotational.finish();
            overall.finish();
            // The feed rate relates to the linear axes, rotation axes only
            // count when they are slower.
            let time = linear.time().max(rotational.time());
            let euclidean_time = overall.time();
            let ratio = if time > 0.0 { euclidean_time / time } else { 1.0 };
            effective_speed = ratio * speed;
        }

        let euclidean_distance = if coordinated { overall.0[0] } else { 0.0 };
        let mut ids = Vec::with_capacity(boundaries.len());
        let mut profiles = Vec::with_capacity(boundaries.len());
        for (axis, entry, exit) in boundaries {
            let config = axes.get(axis)?;
            let fraction = if coordinated {
                distance.coordinate(axis).abs() / euclidean_distance
            } else {
                0.0
            };
            let limits = if fraction > 0.0 {
                ProfileLimits::new(
                    effective_speed * overall.0[1] * fraction,
                    speed.powi(2) * overall.0[2] * fraction,
                    speed.powi(3) * overall.0[3] * fraction,
                )
            } else {
                ProfileLimits::new(
                    speed * config.velocity_max,
                    speed.powi(2) * config.acceleration_max,
                    speed.powi(3) * config.jerk_max,
                )
            };
            // Targets are accepted at resolution, so are the bounds.
            let (low, high) = config.location_bounds(options.is_limit_to_safe_zone());
            let (low, high) = (low - config.resolution, high + config.resolution);
            ids.push(axis.clone());
            profiles.push(MotionProfile::new(
                *entry,
                *exit,
                limits.with_location_bounds(low, high),
                profile_options,
            ));
        }

        if coordinated {
            coordinate_profiles(&mut profiles);
        } else {
            synchronize_profiles(&mut profiles);
        }

        let mut options = options;
        if !options.is_blend() {
            options = options.with_fixed_waypoint();
        }
        let profiles = ids.into_iter().zip(profiles).collect();
        let mut motion =
            Self::from_profiles(location0.put(&start), profiles, nominal_speed, options);
        motion.effective_speed = effective_speed;
        motion.euclidean_distance = euclidean_distance;
        tracing::debug!(
            from = %motion.location0,
            to = %motion.location(),
            time = motion.time,
            effective_speed,
            "planned motion"
        );
        Ok(motion)
    }

    /// Resting in `location` for no time.
    pub fn stillstand(location: &AxesLocation) -> Self {
        let limits = ProfileLimits::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let profiles = location
            .iter()
            .map(|(axis, c)| (axis.clone(), MotionProfile::still(c, 0.0, limits)))
            .collect();
        Self::from_profiles(
            location.clone(),
            profiles,
            1.0,
            MotionOptions::new().with_stillstand().with_fixed_waypoint(),
        )
    }

    /// Assemble a motion from already solved profiles.
    pub fn from_profiles(
        location0: AxesLocation,
        profiles: BTreeMap<AxisId, MotionProfile>,
        nominal_speed: f64,
        options: MotionOptions,
    ) -> Self {
        let time = profiles.values().fold(0.0_f64, |t, p| t.max(p.time()));
        let vector = |f: fn(&MotionProfile) -> f64| -> AxesLocation {
            profiles
                .iter()
                .map(|(axis, p)| (axis.clone(), f(p)))
                .collect()
        };
        let vectors = [
            vector(|p| p.location(SEGMENTS)),
            vector(|p| p.velocity(SEGMENTS)),
            vector(|p| p.acceleration(SEGMENTS)),
            vector(|_| 0.0),
        ];
        let mut options = options;
        if vectors[1].iter().any(|(_, v)| v != 0.0) {
            options = options.without_fixed_waypoint();
        }
        Self {
            time,
            vectors,
            location0,
            nominal_speed,
            effective_speed: nominal_speed,
            euclidean_distance: 0.0,
            options,
            profiles,
            planned_time1: None,
        }
    }

    /// Duration of the move.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// State at the end of the move.
    pub fn vector(&self, derivative: Derivative) -> &AxesLocation {
        &self.vectors[derivative as usize]
    }

    pub fn location(&self) -> &AxesLocation {
        self.vector(Derivative::Location)
    }

    pub fn start_location(&self) -> &AxesLocation {
        &self.location0
    }

    pub fn nominal_speed(&self) -> f64 {
        self.nominal_speed
    }

    pub fn effective_speed(&self) -> f64 {
        self.effective_speed
    }

    pub fn euclidean_distance(&self) -> f64 {
        self.euclidean_distance
    }

    pub fn options(&self) -> MotionOptions {
        self.options
    }

    pub fn profiles(&self) -> &BTreeMap<AxisId, MotionProfile> {
        &self.profiles
    }

    pub fn profile(&self, axis: &AxisId) -> Option<&MotionProfile> {
        self.profiles.get(axis)
    }

    /// Absolute time at which the move ends, once committed to a plan.
    pub fn planned_time1(&self) -> Option<f64> {
        self.planned_time1
    }

    pub fn with_planned_time1(mut self, time: f64) -> Self {
        self.planned_time1 = Some(time);
        self
    }

    /// True if no axis moves.
    pub fn is_empty(&self) -> bool {
        self.profiles
            .values()
            .all(|p| p.displacement() == 0.0 && p.velocity(0) == 0.0)
    }

    fn momentary(&self, time: f64, f: impl Fn(&MotionProfile, f64) -> f64) -> AxesLocation {
        self.profiles
            .iter()
            .map(|(axis, profile)| (axis.clone(), f(profile, time)))
            .collect()
    }

    /// Location at `time`, measured from the start of the move.
    pub fn momentary_location(&self, time: f64) -> AxesLocation {
        self.momentary(time, MotionProfile::momentary_location)
    }

    pub fn momentary_velocity(&self, time: f64) -> AxesLocation {
        self.momentary(time, MotionProfile::momentary_velocity)
    }

    pub fn momentary_acceleration(&self, time: f64) -> AxesLocation {
        self.momentary(time, MotionProfile::momentary_acceleration)
    }

    pub fn momentary_jerk(&self, time: f64) -> AxesLocation {
        self.momentary(time, MotionProfile::momentary_jerk)
    }

    /// End location of the axes driven by `axes`.
    pub fn driven_target(&self, axes: &[AxisId]) -> AxesLocation {
        self.location().driven_by(axes)
    }

    /// Verify every profile, reporting the first invalid one.
    pub fn check_validity(&self) -> Result<()> {
        for (axis, profile) in &self.profiles {
            if let Some(state) = profile.check_validity() {
                tracing::error!(%axis, %state, %profile, "invalid motion profile");
                return Err(Error::ProfileConstraintViolation {
                    axis: axis.clone(),
                    state,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} in {:.4}s at speed {:.3}",
            self.location0,
            self.location(),
            self.time,
            self.effective_speed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisConfig;

    fn axes() -> Axes {
        Axes::new([
            AxisConfig::linear("X").with_limits(1000.0, 700.0, 2000.0),
            AxisConfig::linear("Y").with_limits(500.0, 2000.0, 15000.0),
            AxisConfig::rotation("C").with_limits(3600.0, 20000.0, 0.0),
        ])
    }

    fn x() -> AxisId {
        AxisId::linear("X")
    }

    fn y() -> AxisId {
        AxisId::linear("Y")
    }

    fn c() -> AxisId {
        AxisId::rotation("C")
    }

    fn at(x0: f64, y0: f64, c0: f64) -> AxesLocation {
        [(x(), x0), (y(), y0), (c(), c0)].into_iter().collect()
    }

    fn move_from_origin(
        axes: &Axes,
        to: AxesLocation,
        speed: f64,
        options: MotionOptions,
    ) -> Motion {
        Motion::new(axes, &at(0.0, 0.0, 0.0), &to, speed, options).unwrap()
    }

    #[test]
    fn single_axis_matches_its_profile() {
        let axes = axes();
        let motion = move_from_origin(&axes, at(600.0, 0.0, 0.0), 1.0, MotionOptions::new());
        motion.check_validity().unwrap();
        let profile = motion.profile(&x()).unwrap();
        assert!(profile.profile_velocity() <= 1000.0 + 1e-6);
        assert!(motion.time() > 0.6);
        assert_eq!(motion.location().get(&x()).unwrap(), 600.0);
        let end = motion.momentary_location(motion.time());
        assert_eq!(end.get(&x()).unwrap(), 600.0);
        assert!((motion.effective_speed() - 1.0).abs() < 1e-12);
        assert!(motion.options().is_fixed_waypoint());
    }

    #[test]
    fn coordinated_move_is_a_straight_line() {
        let axes = axes();
        let motion = move_from_origin(&axes, at(300.0, 400.0, 0.0), 1.0, MotionOptions::new());
        motion.check_validity().unwrap();
        assert!((motion.euclidean_distance() - 500.0).abs() < 1e-9);
        for i in 1..10 {
            let t = motion.time() * i as f64 / 10.0;
            let location = motion.momentary_location(t);
            let (px, py) = (location.get(&x()).unwrap(), location.get(&y()).unwrap());
            assert!((px * 4.0 - py * 3.0).abs() < 1e-6, "{px} {py}");
            assert_eq!(location.get(&c()).unwrap(), 0.0);
        }
    }

    #[test]
    fn uncoordinated_axes_finish_together() {
        let axes = axes();
        let options = MotionOptions::new().with_uncoordinated_motion();
        let motion = move_from_origin(&axes, at(10.0, 200.0, 90.0), 0.5, options);
        motion.check_validity().unwrap();
        let times: Vec<_> = motion.profiles().values().map(|p| p.time()).collect();
        for t in &times {
            assert!((t - motion.time()).abs() < 1e-6, "{times:?}");
        }
        // Speed scales the limits by order.
        let y = motion.profile(&y()).unwrap();
        assert!(y.limits().velocity_max == 250.0);
        assert!(y.limits().entry_acceleration_max == 500.0);
    }

    #[test]
    fn still_stand_has_no_duration() {
        let motion = Motion::stillstand(&at(1.0, 2.0, 3.0));
        assert_eq!(motion.time(), 0.0);
        assert!(motion.is_empty());
        assert!(motion.options().is_stillstand());
        assert_eq!(motion.momentary_location(5.0), at(1.0, 2.0, 3.0));
        assert_eq!(motion.vector(Derivative::Velocity).get(&x()).unwrap(), 0.0);
    }

    #[test]
    fn soft_limits_become_location_bounds() {
        let x_axis = AxisConfig::linear("X").with_soft_limits(Some(-5.0), Some(50.0));
        let axes = Axes::new([x_axis]);
        let motion = Motion::new(
            &axes,
            &AxesLocation::single(x(), 0.0),
            &AxesLocation::single(x(), 40.0),
            1.0,
            MotionOptions::new(),
        )
        .unwrap();
        let limits = motion.profile(&x()).unwrap().limits();
        assert!((limits.location_min + 5.0001).abs() < 1e-9, "{limits:?}");
        assert!((limits.location_max - 50.0001).abs() < 1e-9, "{limits:?}");
    }

    #[test]
    fn unknown_axes_are_rejected() {
        let axes = Axes::new([AxisConfig::linear("X")]);
        let result = Motion::new(
            &axes,
            &AxesLocation::new(),
            &AxesLocation::single(y(), 1.0),
            1.0,
            MotionOptions::new(),
        );
        assert!(matches!(result, Err(Error::UnknownAxis(_))));
    }
}
