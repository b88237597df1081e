use crate::{ImagePoint, KeyPoint};

/// Converts between pixel locations and the calibrated projection of a camera.
pub trait CameraModel {
    type Projection;

    /// Extracts the calibrated projection from a pixel location in an image.
    ///
    /// The projection's X axis points right, Y axis points down, and Z axis points forwards.
    /// The image point uses the same coordinate frame.
    fn calibrate<P>(&self, point: P) -> Self::Projection
    where
        P: ImagePoint;

    /// Converts a calibrated projection back into a pixel location.
    fn uncalibrate(&self, projection: Self::Projection) -> KeyPoint;
}
