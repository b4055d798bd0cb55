//! The eight spectral axes and the fixed-width vectors defined over them.
//!
//! Every archetype is positioned on eight bipolar axes, each scaled to
//! [0, 1] between its two poles. The axes are grouped informally into
//! three clusters:
//!
//! - **Cosmic** (the shape of the world): order–chaos, creation–destruction,
//!   light–shadow
//! - **Agentic** (how a figure acts): active–receptive,
//!   individual–collective, voluntary–fated
//! - **Narrative** (where a figure is heading): ascent–descent,
//!   stasis–transformation
//!
//! The axis order is part of the data model: `CoordinateVector`,
//! `AxisWeights` and `AxisSubset` all index axes by `SpectralAxis::index`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of spectral axes.
pub const AXIS_COUNT: usize = 8;

// =============================================================================
// Axis definitions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralAxis {
    OrderChaos,
    CreationDestruction,
    LightShadow,
    ActiveReceptive,
    IndividualCollective,
    AscentDescent,
    StasisTransformation,
    VoluntaryFated,
}

impl SpectralAxis {
    pub const ALL: [SpectralAxis; AXIS_COUNT] = [
        SpectralAxis::OrderChaos,
        SpectralAxis::CreationDestruction,
        SpectralAxis::LightShadow,
        SpectralAxis::ActiveReceptive,
        SpectralAxis::IndividualCollective,
        SpectralAxis::AscentDescent,
        SpectralAxis::StasisTransformation,
        SpectralAxis::VoluntaryFated,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical snake_case identifier used in catalogs and reports.
    pub fn id(self) -> &'static str {
        match self {
            SpectralAxis::OrderChaos => "order_chaos",
            SpectralAxis::CreationDestruction => "creation_destruction",
            SpectralAxis::LightShadow => "light_shadow",
            SpectralAxis::ActiveReceptive => "active_receptive",
            SpectralAxis::IndividualCollective => "individual_collective",
            SpectralAxis::AscentDescent => "ascent_descent",
            SpectralAxis::StasisTransformation => "stasis_transformation",
            SpectralAxis::VoluntaryFated => "voluntary_fated",
        }
    }

    /// Resolve a catalog key to an axis.
    ///
    /// Accepts snake_case (`order_chaos`), kebab-case (`order-chaos`) and
    /// camelCase (`orderChaos`) spellings.
    pub fn from_key(key: &str) -> Option<Self> {
        let normalized = normalize_axis_key(key);
        Self::ALL.iter().copied().find(|axis| axis.id() == normalized)
    }
}

impl fmt::Display for SpectralAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

fn normalize_axis_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (idx, ch) in key.trim().chars().enumerate() {
        match ch {
            '-' | ' ' => out.push('_'),
            c if c.is_ascii_uppercase() => {
                if idx > 0 && !out.ends_with('_') {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Coordinate vectors
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("axis {axis} value {value} is outside [0, 1]")]
    OutOfRange { axis: SpectralAxis, value: f64 },
    #[error("axis {axis} weight {value} is negative or not finite")]
    InvalidWeight { axis: SpectralAxis, value: f64 },
}

/// Position of an archetype in the 8-dimensional spectral space.
///
/// Construction validates every component; there is no mutable access.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinateVector([f64; AXIS_COUNT]);

impl CoordinateVector {
    pub fn new(values: [f64; AXIS_COUNT]) -> Result<Self, CoordinateError> {
        for (axis, &value) in SpectralAxis::ALL.iter().zip(values.iter()) {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CoordinateError::OutOfRange { axis: *axis, value });
            }
        }
        Ok(Self(values))
    }

    /// Same value on every axis.
    pub fn splat(value: f64) -> Result<Self, CoordinateError> {
        Self::new([value; AXIS_COUNT])
    }

    pub fn values(&self) -> &[f64; AXIS_COUNT] {
        &self.0
    }

    pub fn get(&self, axis: SpectralAxis) -> f64 {
        self.0[axis.index()]
    }
}

// =============================================================================
// Axis weights
// =============================================================================

/// Per-axis contribution to the weighted distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; AXIS_COUNT]", into = "[f64; AXIS_COUNT]")]
pub struct AxisWeights([f64; AXIS_COUNT]);

impl AxisWeights {
    pub fn new(values: [f64; AXIS_COUNT]) -> Result<Self, CoordinateError> {
        for (axis, &value) in SpectralAxis::ALL.iter().zip(values.iter()) {
            if !value.is_finite() || value < 0.0 {
                return Err(CoordinateError::InvalidWeight { axis: *axis, value });
            }
        }
        Ok(Self(values))
    }

    /// All weights 1.0.
    pub fn uniform() -> Self {
        Self([1.0; AXIS_COUNT])
    }

    /// Unit weight on the subset's axes, zero elsewhere.
    pub fn from_subset(subset: AxisSubset) -> Self {
        let mut values = [0.0; AXIS_COUNT];
        for axis in subset.axes() {
            values[axis.index()] = 1.0;
        }
        Self(values)
    }

    pub fn values(&self) -> &[f64; AXIS_COUNT] {
        &self.0
    }

    pub fn get(&self, axis: SpectralAxis) -> f64 {
        self.0[axis.index()]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Copy with one axis set to zero.
    pub fn without(&self, axis: SpectralAxis) -> Self {
        let mut values = self.0;
        values[axis.index()] = 0.0;
        Self(values)
    }

    /// Axes carrying a non-zero weight.
    pub fn active_axes(&self) -> Vec<SpectralAxis> {
        SpectralAxis::ALL
            .iter()
            .copied()
            .filter(|axis| self.get(*axis) > 0.0)
            .collect()
    }
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

impl TryFrom<[f64; AXIS_COUNT]> for AxisWeights {
    type Error = CoordinateError;

    fn try_from(values: [f64; AXIS_COUNT]) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<AxisWeights> for [f64; AXIS_COUNT] {
    fn from(weights: AxisWeights) -> Self {
        weights.0
    }
}

// =============================================================================
// Axis subsets
// =============================================================================

/// A set of axes packed into a bitmask (bit `i` = `SpectralAxis::ALL[i]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisSubset(u8);

impl AxisSubset {
    pub fn from_axes(axes: &[SpectralAxis]) -> Self {
        Self(axes.iter().fold(0u8, |mask, axis| mask | (1 << axis.index())))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, axis: SpectralAxis) -> bool {
        self.0 & (1 << axis.index()) != 0
    }

    pub fn is_subset_of(self, other: AxisSubset) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn axes(self) -> Vec<SpectralAxis> {
        SpectralAxis::ALL
            .iter()
            .copied()
            .filter(|axis| self.contains(*axis))
            .collect()
    }

    /// Every subset of `candidates` with at least `min_size` axes, ordered by
    /// size and then bitmask.
    pub fn enumerate(candidates: &[SpectralAxis], min_size: usize) -> Vec<AxisSubset> {
        let universe = AxisSubset::from_axes(candidates);
        let mut subsets: Vec<AxisSubset> = (1u16..=u8::MAX as u16)
            .map(|bits| AxisSubset(bits as u8))
            .filter(|subset| subset.is_subset_of(universe) && subset.len() >= min_size.max(1))
            .collect();
        subsets.sort_by_key(|subset| (subset.len(), subset.0));
        subsets
    }
}

impl fmt::Display for AxisSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.axes().into_iter().map(SpectralAxis::id).collect();
        write!(f, "{{{}}}", ids.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_keys_accept_common_spellings() {
        assert_eq!(SpectralAxis::from_key("order_chaos"), Some(SpectralAxis::OrderChaos));
        assert_eq!(SpectralAxis::from_key("light-shadow"), Some(SpectralAxis::LightShadow));
        assert_eq!(
            SpectralAxis::from_key("voluntaryFated"),
            Some(SpectralAxis::VoluntaryFated)
        );
        assert_eq!(SpectralAxis::from_key("mystery"), None);
    }

    #[test]
    fn coordinates_reject_values_outside_unit_interval() {
        let mut values = [0.5; AXIS_COUNT];
        values[3] = 1.2;
        let err = CoordinateVector::new(values).unwrap_err();
        assert_eq!(
            err,
            CoordinateError::OutOfRange {
                axis: SpectralAxis::ActiveReceptive,
                value: 1.2
            }
        );
        assert!(CoordinateVector::new([f64::NAN; AXIS_COUNT]).is_err());
        assert!(CoordinateVector::splat(1.0).is_ok());
    }

    #[test]
    fn weights_reject_negative_values() {
        let mut values = [1.0; AXIS_COUNT];
        values[0] = -0.1;
        assert!(AxisWeights::new(values).is_err());
        assert_eq!(AxisWeights::uniform().sum(), AXIS_COUNT as f64);
    }

    #[test]
    fn full_enumeration_counts_subsets_of_size_three_or_more() {
        // 2^8 - 1 (empty) - 8 (singletons) - 28 (pairs)
        assert_eq!(AxisSubset::enumerate(&SpectralAxis::ALL, 3).len(), 219);
        assert_eq!(AxisSubset::enumerate(&SpectralAxis::ALL[..4], 1).len(), 15);
    }

    #[test]
    fn subset_weights_only_cover_member_axes() {
        let subset = AxisSubset::from_axes(&[SpectralAxis::OrderChaos, SpectralAxis::LightShadow]);
        let weights = AxisWeights::from_subset(subset);
        assert_eq!(weights.active_axes(), subset.axes());
        assert_eq!(subset.to_string(), "{order_chaos, light_shadow}");
    }
}
