use crate::NormalizedKeyPoint;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use monovo_core::{
    nalgebra::{Matrix3, Rotation3, Vector3, SVD},
    sample_consensus::Model,
    CameraToCamera, FeatureMatch, Pose,
};

/// `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
#[rustfmt::skip]
fn w() -> Matrix3<f64> {
    Matrix3::new(
        0.0, -1.0, 0.0,
        1.0,  0.0, 0.0,
        0.0,  0.0, 1.0,
    )
}

/// The epipolar constraint between two views, satisfying
///
/// ```text
/// transpose(b) * F * a = 0
/// ```
///
/// for every correspondence `(a, b)`, where `a` is a homogeneous normalized image coordinate in
/// the reference view and `b` the matching coordinate in the current view.
///
/// Because the keypoints are already normalized by the intrinsics, a perfect estimate of this
/// matrix is an essential matrix. Estimates from noisy data are only guaranteed to be rank 2
/// (see [`FundamentalMatrix::enforce_rank_two`]). Use [`FundamentalMatrix::recondition`] to
/// project them onto the essential manifold.
///
/// `F · a` is the epipolar line of `a` in the current view. Every candidate match for `a` must
/// lie on it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct FundamentalMatrix(pub Matrix3<f64>);

impl FundamentalMatrix {
    /// The first-order geometric (Sampson) distance of a correspondence to the epipolar
    /// constraint:
    ///
    /// ```text
    /// |bᵀFa| / sqrt((Fa)₀² + (Fa)₁² + (Fᵀb)₀² + (Fᵀb)₁²)
    /// ```
    ///
    /// Degenerate configurations where the denominator vanishes give `f64::INFINITY`.
    pub fn sampson_distance(&self, a: NormalizedKeyPoint, b: NormalizedKeyPoint) -> f64 {
        let Self(mat) = *self;
        let a = a.virtual_image_point().coords;
        let b = b.virtual_image_point().coords;
        let fa = mat * a;
        let ftb = mat.transpose() * b;
        let denominator = (fa.x * fa.x + fa.y * fa.y + ftb.x * ftb.x + ftb.y * ftb.y).sqrt();
        let distance = b.dot(&fa).abs() / denominator;
        if distance.is_finite() {
            distance
        } else {
            f64::INFINITY
        }
    }

    /// Forces the smallest singular value to zero, which is the closest rank 2 matrix in
    /// frobenius norm. Every fundamental matrix has rank 2.
    pub fn enforce_rank_two(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        svd.recompose().ok().map(Self)
    }

    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This finds the closest essential matrix in frobenius form. This just means
    /// that the two singular values are averaged and the null singular value is
    /// forced to zero.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        let new_singular = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = new_singular;
        svd.singular_values[1] = new_singular;
        svd.recompose().ok().map(Self)
    }

    /// Performs an ordered SVD and returns `U` and `Vᵗ`, both with a determinant of `+1`.
    ///
    /// An improper factor is negated as a whole. Negating both factors leaves the matrix
    /// unchanged, and negating only one merely scales it by `-1`, which describes the same
    /// epipolar geometry. The rotations `U W Vᵗ` and `U Wᵗ Vᵗ` keep their roles either way.
    fn proper_singular_frames(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Matrix3<f64>, Matrix3<f64>)> {
        let SVD { u, v_t, .. } = SVD::try_new(self.0, true, true, epsilon, max_iterations)?;
        let (mut u, mut v_t) = (u?, v_t?);
        if u.determinant() < 0.0 {
            u *= -1.0;
        }
        if v_t.determinant() < 0.0 {
            v_t *= -1.0;
        }
        Some((u, v_t))
    }

    /// Returns the two possible rotations for the matrix along with a translation bearing of
    /// unknown sign and length.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition is considered
    /// complete. `max_iterations` caps the execution time of the decomposition.
    ///
    /// ```
    /// use monovo_core::CameraToCamera;
    /// use monovo_core::nalgebra::{IsometryMatrix3, Rotation3, Vector3};
    /// use monovo_pinhole::FundamentalMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// let (rot_a, rot_b, t) = FundamentalMatrix::from(pose)
    ///     .possible_rotations_unscaled_translation(1e-12, 1000)
    ///     .unwrap();
    /// let a_close = rot_a.rotation_to(&pose.0.rotation).angle() < 1e-6;
    /// let b_close = rot_b.rotation_to(&pose.0.rotation).angle() < 1e-6;
    /// assert!(a_close || b_close);
    /// let t_res = 1.0 - t.normalize().dot(&pose.0.translation.vector.normalize()).abs();
    /// assert!(t_res < 1e-6);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        let (u, v_t) = self.proper_singular_frames(epsilon, max_iterations)?;
        let w = w();
        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * w.transpose() * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// All four relative poses consistent with the matrix: both rotations paired with both
    /// translation signs. Exactly one of them places the scene in front of both cameras.
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }

    /// Decomposes the matrix into a single relative pose using the trace heuristic.
    ///
    /// `R = U W Vᵗ` is used unless its trace is negative, in which case `R = U Wᵗ Vᵗ` is used.
    /// The translation is the third column of `U`, so it has unit length and an undetermined
    /// sign. The rotation always has a determinant of `+1`.
    ///
    /// Frame to frame motion of a video camera rotates far less than 90 degrees. The wrong
    /// rotation differs from the right one by a half turn, which makes its trace negative.
    ///
    /// ```
    /// use monovo_core::{CameraToCamera, Pose};
    /// use monovo_core::nalgebra::{Rotation3, Vector3};
    /// use monovo_pinhole::FundamentalMatrix;
    /// let pose = CameraToCamera::from_parts(
    ///     Vector3::new(0.3, -0.1, 0.05),
    ///     Rotation3::from_euler_angles(0.05, -0.1, 0.02),
    /// );
    /// let fundamental = FundamentalMatrix::from(pose);
    /// let decomposed = fundamental.decompose_trace_heuristic(1e-12, 1000).unwrap();
    /// assert!(decomposed.0.rotation.rotation_to(&pose.0.rotation).angle() < 1e-6);
    /// ```
    pub fn decompose_trace_heuristic(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<CameraToCamera> {
        let (rot_a, rot_b, t) =
            self.possible_rotations_unscaled_translation(epsilon, max_iterations)?;
        let rotation = if rot_a.matrix().trace() < 0.0 {
            rot_b
        } else {
            rot_a
        };
        Some(CameraToCamera::from_parts(t, rotation))
    }
}

/// Generates the matrix corresponding to this relative camera pose: `[t]× R`.
///
/// If a camera point `a` is transformed using [`Pose::transform`] into a point `b`, then the
/// normalized projections of `a` and `b` have a residual of approximately `0.0`.
impl From<CameraToCamera> for FundamentalMatrix {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.0.translation.vector.cross_matrix() * *pose.0.rotation.matrix())
    }
}

impl Model<FeatureMatch<NormalizedKeyPoint>> for FundamentalMatrix {
    fn residual(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        self.sampson_distance(a, b)
    }
}
