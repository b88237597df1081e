//! Pinhole camera model and two-view epipolar geometry for monovo.
//!
//! [`CameraIntrinsics`] converts pixel [`KeyPoint`]s into [`NormalizedKeyPoint`]s and back, and
//! [`FundamentalMatrix`] holds the epipolar constraint between two sets of normalized keypoints,
//! including its decomposition into a relative [`CameraToCamera`](monovo_core::CameraToCamera) pose.

mod fundamental;

pub use fundamental::*;

use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use monovo_core::nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use monovo_core::{
    Bearing, CameraModel, CameraPoint, ImagePoint, KeyPoint, Pose, Projective, WorldPoint,
    WorldToCamera,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates.
///
/// The keypoint has been normalized with the camera intrinsic matrix, so it lies on the virtual
/// image plane at `z = 1` in front of the optical center, with the focal length as the unit.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// Tries to convert the [`CameraPoint`] into a [`NormalizedKeyPoint`] by dividing by its
    /// depth.
    ///
    /// This fails (returns `None`) if the point is at or behind the optical center, since a
    /// pinhole camera cannot see it.
    pub fn from_camera_point(point: CameraPoint) -> Option<Self> {
        if !point.is_in_front() {
            return None;
        }
        Point2::from_homogeneous(point.bearing_unnormalized())
            .filter(|p| p.coords.iter().all(|n| n.is_finite()))
            .map(Self)
    }

    /// Appends a `1.0` component to get the point on the virtual image plane, then scales it
    /// by `depth`.
    pub fn with_depth(self, depth: f64) -> CameraPoint {
        (self.coords * depth).push(depth).to_homogeneous().into()
    }

    /// Get the virtual image point as a [`Point3`].
    pub fn virtual_image_point(self) -> Point3<f64> {
        self.coords.push(1.0).into()
    }
}

impl Bearing for NormalizedKeyPoint {
    fn bearing_unnormalized(&self) -> Vector3<f64> {
        self.0.coords.push(1.0)
    }

    fn from_bearing_vector(bearing: Vector3<f64>) -> Self {
        Self((bearing.xy() / bearing.z).into())
    }
}

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// They are fixed for a whole session.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Projects a world point into a camera posed at `pose`, giving its pixel location.
    ///
    /// Returns `None` when the point is not strictly in front of the camera.
    ///
    /// ```
    /// use monovo_core::{Pose, Projective, WorldPoint, WorldToCamera};
    /// use monovo_core::nalgebra::{Point2, Point3};
    /// use monovo_pinhole::CameraIntrinsics;
    /// let intrinsics = CameraIntrinsics::identity()
    ///     .focal(500.0)
    ///     .principal_point(Point2::new(320.0, 240.0));
    /// let point = WorldPoint::from_point(Point3::new(0.2, -0.1, 2.0));
    /// let pixel = intrinsics.project(WorldToCamera::identity(), point).unwrap();
    /// assert!((pixel.0 - Point2::new(370.0, 215.0)).norm() < 1e-9);
    /// ```
    pub fn project(&self, pose: WorldToCamera, point: WorldPoint) -> Option<KeyPoint> {
        NormalizedKeyPoint::from_camera_point(pose.transform(point)).map(|p| self.uncalibrate(p))
    }
}

impl CameraModel for CameraIntrinsics {
    type Projection = NormalizedKeyPoint;

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to a [`NormalizedKeyPoint`].
    ///
    /// ```
    /// use monovo_core::{KeyPoint, CameraModel};
    /// use monovo_pinhole::{NormalizedKeyPoint, CameraIntrinsics};
    /// use monovo_core::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let calibration_matrix = intrinsics.matrix();
    /// let distance = (kp.to_homogeneous() - calibration_matrix * nkp.to_homogeneous()).norm();
    /// assert!(distance < 0.1);
    /// ```
    fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let centered = point.image_point() - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(Point2::new(x, y))
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates.
    ///
    /// ```
    /// use monovo_core::{KeyPoint, CameraModel};
    /// use monovo_pinhole::{NormalizedKeyPoint, CameraIntrinsics};
    /// use monovo_core::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let ukp = intrinsics.uncalibrate(nkp);
    /// assert!((kp.0 - ukp.0).norm() < 1e-6);
    /// ```
    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let y = projection.y * self.focals.y;
        let x = projection.x * self.focals.x + self.skew * projection.y;
        let centered = Point2::new(x, y);
        KeyPoint(centered + self.principal_point.coords)
    }
}
