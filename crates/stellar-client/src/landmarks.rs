//! Hand-landmark frames as delivered by the hand-tracking model.
//!
//! Each tracked hand is 21 points in normalised image coordinates
//! (`x`, `y` in `[0, 1]`, `y` growing downward). Index conventions follow
//! the `MediaPipe` hand model; only the points the classifier reads are
//! named here.

use serde::{Deserialize, Serialize};

/// Points per tracked hand.
pub const LANDMARK_COUNT: usize = 21;

/// Wrist.
pub const WRIST: usize = 0;
/// Thumb tip.
pub const THUMB_TIP: usize = 4;
/// Index finger proximal joint.
pub const INDEX_PIP: usize = 6;
/// Index finger tip.
pub const INDEX_TIP: usize = 8;
/// Middle finger proximal joint.
pub const MIDDLE_PIP: usize = 10;
/// Middle finger tip.
pub const MIDDLE_TIP: usize = 12;
/// Ring finger proximal joint.
pub const RING_PIP: usize = 14;
/// Ring finger tip.
pub const RING_TIP: usize = 16;
/// Pinky proximal joint.
pub const PINKY_PIP: usize = 18;
/// Pinky tip.
pub const PINKY_TIP: usize = 20;

/// `(tip, pip)` pairs for the four non-thumb fingers.
pub const FINGER_TIP_PIP: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_PIP),
    (MIDDLE_TIP, MIDDLE_PIP),
    (RING_TIP, RING_PIP),
    (PINKY_TIP, PINKY_PIP),
];

/// Errors for landmark data that cannot describe a hand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LandmarkError {
    /// A hand did not have exactly [`LANDMARK_COUNT`] points.
    #[error("expected 21 landmarks per hand, got {actual}")]
    WrongPointCount {
        /// Number of points supplied.
        actual: usize,
    },

    /// A coordinate was NaN or infinite.
    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite {
        /// Index of the offending point.
        index: usize,
    },
}

/// One 3-D landmark point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal image coordinate.
    pub x: f64,
    /// Vertical image coordinate (down is positive).
    pub y: f64,
    /// Relative depth; unused by the classifier.
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    /// Construct a point.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance to `other` in the image plane, ignoring depth.
    pub fn planar_distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A single tracked hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct Hand {
    points: [Landmark; LANDMARK_COUNT],
}

impl Hand {
    /// Wrap 21 points.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError::NonFinite`] if any coordinate is NaN or
    /// infinite.
    pub fn new(points: [Landmark; LANDMARK_COUNT]) -> Result<Self, LandmarkError> {
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(LandmarkError::NonFinite { index });
        }
        Ok(Self { points })
    }

    /// The point at `index`, or the origin for an out-of-range index.
    pub fn landmark(&self, index: usize) -> Landmark {
        self.points.get(index).copied().unwrap_or_default()
    }

    /// The wrist point.
    pub fn wrist(&self) -> Landmark {
        self.landmark(WRIST)
    }

    /// Planar distance between thumb tip and index tip.
    pub fn pinch_distance(&self) -> f64 {
        self.landmark(THUMB_TIP).planar_distance(self.landmark(INDEX_TIP))
    }

    /// Whether every non-thumb fingertip is below (numerically greater
    /// `y` than) its proximal joint.
    pub fn is_fist(&self) -> bool {
        FINGER_TIP_PIP
            .iter()
            .all(|&(tip, pip)| self.landmark(tip).y > self.landmark(pip).y)
    }

    /// All 21 points.
    pub const fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.points
    }
}

impl TryFrom<Vec<Landmark>> for Hand {
    type Error = LandmarkError;

    fn try_from(points: Vec<Landmark>) -> Result<Self, Self::Error> {
        let actual = points.len();
        let points: [Landmark; LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_rejected: Vec<Landmark>| LandmarkError::WrongPointCount { actual })?;
        Self::new(points)
    }
}

impl From<Hand> for Vec<Landmark> {
    fn from(hand: Hand) -> Self {
        hand.points.to_vec()
    }
}

/// One sampled instant of tracking output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Device-local capture time in milliseconds.
    pub timestamp_ms: u64,
    /// Zero or more tracked hands.
    #[serde(default)]
    pub hands: Vec<Hand>,
}

impl LandmarkFrame {
    /// A frame with the given hands.
    pub const fn new(timestamp_ms: u64, hands: Vec<Hand>) -> Self {
        Self { timestamp_ms, hands }
    }

    /// A frame in which tracking found no hands.
    pub const fn empty(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            hands: Vec::new(),
        }
    }

    /// Number of tracked hands.
    pub fn hand_count(&self) -> usize {
        self.hands.len()
    }

    /// Parse a frame from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the JSON error, which wraps any [`LandmarkError`].
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
