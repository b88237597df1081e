use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point3, Unit, Vector3, Vector4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented for homogeneous projective 3d coordinates.
pub trait Projective: From<Vector4<f64>> + Clone + Copy {
    /// Retrieve the homogeneous vector.
    ///
    /// No constraints are put on this vector. It is not normalized and `w` may be anything,
    /// including zero for a point at infinity.
    fn homogeneous(self) -> Vector4<f64>;

    /// Wraps a homogeneous vector.
    fn from_homogeneous(point: Vector4<f64>) -> Self {
        point.into()
    }

    /// Retrieve the euclidean 3d point by dividing out `w`.
    ///
    /// This fails for points at (or numerically near) infinity.
    fn point(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.homogeneous())
    }

    /// Convert the euclidean 3d point into homogeneous coordinates.
    fn from_point(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }

    /// Scale the homogeneous vector so that `w` is `1.0`.
    ///
    /// Returns `None` when `w` is zero or the result is not finite.
    fn normalized(self) -> Option<Self> {
        let h = self.homogeneous();
        Some(h / h.w)
            .filter(|h| h.iter().all(|n| n.is_finite()))
            .map(Self::from_homogeneous)
    }

    /// Retrieve the normalized bearing of the coordinate.
    fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Retrieve the unnormalized bearing of the coordinate.
    fn bearing_unnormalized(self) -> Vector3<f64> {
        self.homogeneous().xyz()
    }
}

/// A 3d point relative to the optical center and orientation of a camera.
///
/// Positive `z` is in front of the camera. The unit of distance is whatever the current map uses.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraPoint(pub Vector4<f64>);

impl CameraPoint {
    /// The depth along the optical axis, `z / w`.
    ///
    /// This is not finite for points at infinity.
    pub fn depth(&self) -> f64 {
        self.0.z / self.0.w
    }

    /// Checks that the point lies strictly in front of the camera.
    ///
    /// Unlike [`CameraPoint::depth`] this works on the homogeneous vector directly, so the sign of
    /// `w` is respected even when it is tiny.
    pub fn is_in_front(&self) -> bool {
        self.0.z * self.0.w > 0.0
    }
}

impl Projective for CameraPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}

/// A point in world coordinates.
///
/// A monocular camera cannot observe scale, so the unit of distance is fixed arbitrarily by the
/// first relative pose of a session. Every later pose is chained from it, so the scale drifts as
/// the session goes on. Do not read metric distances out of a map without an external reference.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldPoint(pub Vector4<f64>);

impl Projective for WorldPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}
