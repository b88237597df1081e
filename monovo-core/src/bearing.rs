use nalgebra::{Unit, Vector3};

/// A direction out of the optical center of a camera towards a feature.
///
/// Anything that describes where light came from in camera space can be a bearing:
/// normalized image coordinates, a unit vector, or a projective point.
pub trait Bearing {
    /// Returns a unit vector of the direction that the feature came from.
    fn bearing(&self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Returns the unnormalized direction that the feature came from.
    ///
    /// Use this when the length is irrelevant, since it skips a square root.
    fn bearing_unnormalized(&self) -> Vector3<f64>;

    /// Generates the bearing from a vector pointing in its direction.
    fn from_bearing_vector(bearing: Vector3<f64>) -> Self;
}

impl Bearing for Unit<Vector3<f64>> {
    fn bearing(&self) -> Unit<Vector3<f64>> {
        *self
    }

    fn bearing_unnormalized(&self) -> Vector3<f64> {
        self.into_inner()
    }

    fn from_bearing_vector(bearing: Vector3<f64>) -> Self {
        Unit::new_normalize(bearing)
    }
}
