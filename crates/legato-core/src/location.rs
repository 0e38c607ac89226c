//! Immutable axis coordinate vectors.

use crate::{
    axes::{Axes, AxisId, AxisKind},
    error::{Error, Result},
};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Mapping of axes to coordinates. All mutators return a new location; the
/// underlying map is shared until it is modified.
#[derive(Clone, Default, PartialEq)]
pub struct AxesLocation {
    coordinates: Arc<BTreeMap<AxisId, f64>>,
}

impl AxesLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(axis: AxisId, coordinate: f64) -> Self {
        Self::from_iter([(axis, coordinate)])
    }

    /// Location with every configured axis set by `f`.
    pub fn from_axes(axes: &Axes, mut f: impl FnMut(&AxisId) -> f64) -> Self {
        axes.ids().map(|id| (id.clone(), f(id))).collect()
    }

    pub fn get(&self, axis: &AxisId) -> Result<f64> {
        self.coordinates
            .get(axis)
            .copied()
            .ok_or_else(|| Error::MissingAxis(axis.clone()))
    }

    /// Coordinate of the axis or 0.0 when absent.
    pub fn coordinate(&self, axis: &AxisId) -> f64 {
        self.coordinates.get(axis).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, axis: &AxisId) -> bool {
        self.coordinates.contains_key(axis)
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn axes(&self) -> impl Iterator<Item = &AxisId> {
        self.coordinates.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AxisId, f64)> {
        self.coordinates.iter().map(|(axis, c)| (axis, *c))
    }

    /// Merge `other` into this location, `other` wins on conflicts.
    pub fn put(&self, other: &AxesLocation) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut coordinates = (*self.coordinates).clone();
        for (axis, c) in other.iter() {
            coordinates.insert(axis.clone(), c);
        }
        Self {
            coordinates: Arc::new(coordinates),
        }
    }

    pub fn with(&self, axis: &AxisId, coordinate: f64) -> Self {
        let mut coordinates = (*self.coordinates).clone();
        coordinates.insert(axis.clone(), coordinate);
        Self {
            coordinates: Arc::new(coordinates),
        }
    }

    pub fn filter(&self, mut predicate: impl FnMut(&AxisId, f64) -> bool) -> Self {
        self.iter()
            .filter(|(axis, c)| predicate(axis, *c))
            .map(|(axis, c)| (axis.clone(), c))
            .collect()
    }

    pub fn by_kind(&self, kind: AxisKind) -> Self {
        self.filter(|axis, _| axis.kind() == kind)
    }

    /// Subset of the axes contained in `axes`.
    pub fn driven_by(&self, axes: &[AxisId]) -> Self {
        self.filter(|axis, _| axes.contains(axis))
    }

    fn combine(&self, other: &AxesLocation, f: impl Fn(f64, f64) -> f64) -> Self {
        let mut coordinates = (*self.coordinates).clone();
        for (axis, c) in other.iter() {
            coordinates
                .entry(axis.clone())
                .and_modify(|a| *a = f(*a, c))
                .or_insert_with(|| f(0.0, c));
        }
        Self {
            coordinates: Arc::new(coordinates),
        }
    }

    pub fn add(&self, other: &AxesLocation) -> Self {
        self.combine(other, |a, b| a + b)
    }

    pub fn subtract(&self, other: &AxesLocation) -> Self {
        self.combine(other, |a, b| a - b)
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.iter()
            .map(|(axis, c)| (axis.clone(), c * factor))
            .collect()
    }

    /// True if every axis of `self` matches `other` at the axis resolution.
    /// Axes missing from `other` are compared against 0.0.
    pub fn matches(&self, other: &AxesLocation, axes: &Axes) -> bool {
        self.iter().all(|(axis, c)| match axes.get(axis) {
            Ok(config) => config.coordinates_match(c, other.coordinate(axis)),
            Err(_) => (c - other.coordinate(axis)).abs() <= f64::EPSILON,
        })
    }

    /// Signed displacement of the axes that are contained in both locations
    /// and do not coincide at resolution.
    pub fn motion_segment_to(&self, target: &AxesLocation, axes: &Axes) -> Self {
        self.iter()
            .filter_map(|(axis, c0)| {
                let c1 = target.coordinates.get(axis).copied()?;
                let moves = match axes.get(axis) {
                    Ok(config) => config.resolution_ticks(c0) != config.resolution_ticks(c1),
                    Err(_) => c0 != c1,
                };
                moves.then(|| (axis.clone(), c1 - c0))
            })
            .collect()
    }

    pub fn euclidean_metric(&self) -> f64 {
        self.iter().map(|(_, c)| c * c).sum::<f64>().sqrt()
    }
}

impl FromIterator<(AxisId, f64)> for AxesLocation {
    fn from_iter<T: IntoIterator<Item = (AxisId, f64)>>(iter: T) -> Self {
        Self {
            coordinates: Arc::new(iter.into_iter().collect()),
        }
    }
}

impl fmt::Debug for AxesLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(axis, c)| (axis.name().to_string(), c)))
            .finish()
    }
}

impl fmt::Display for AxesLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (axis, c)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{axis}:{c:.4}")?;
        }
        f.write_str(")")
    }
}
