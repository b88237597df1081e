use monovo_core::{
    nalgebra::{zero, Matrix3x4, Matrix4},
    Bearing, Projective, Triangulator, WorldPoint, WorldToCamera,
};

/// This is a very quick triangulator to execute, but it is not particularly suitable for optimization.
/// It is suitable for quickly generating 3d point outputs from frame to frame matches.
///
/// Referred to as the Linear-Eigen method by Hartley and Sturm in the paper
/// ["Triangulation"](https://users.cecs.anu.edu.au/~hartley/Papers/triangulation/triangulation.pdf).
///
/// Each observation contributes the rows `P - b bᵀ P`, where `P` is the 3x4 pose and `b` the
/// unit bearing. The point is the null vector of the stacked system, found as the eigenvector of
/// the smallest eigenvalue of the 4x4 normal matrix. The returned homogeneous vector has unit
/// length, so `|w|` measures how far from infinity the point is: a point far away relative to
/// the baseline has a `w` close to zero.
///
/// No cheirality test is applied. The sign of the returned vector is arbitrary.
///
/// ```
/// use monovo_core::nalgebra::{Vector3, Point3, Rotation3};
/// use monovo_core::{Bearing, Pose, Projective, Triangulator, WorldPoint, WorldToCamera};
/// use monovo_geom::LinearEigenTriangulator;
///
/// let point = WorldPoint::from_point(Point3::new(0.3, 0.1, 2.0));
/// let pose_b = WorldToCamera::from_parts(Vector3::new(0.1, 0.1, 0.1), Rotation3::new(Vector3::new(0.1, 0.1, 0.1)));
/// let bearing_a = WorldToCamera::identity().transform(point).bearing();
/// let bearing_b = pose_b.transform(point).bearing();
/// let triangulated = LinearEigenTriangulator::new()
///     .triangulate(WorldToCamera::identity(), &bearing_a, pose_b, &bearing_b)
///     .unwrap();
/// let distance = (point.point().unwrap() - triangulated.point().unwrap()).norm();
/// assert!(distance < 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct LinearEigenTriangulator {
    epsilon: f64,
    max_iterations: usize,
}

impl LinearEigenTriangulator {
    /// Creates a `LinearEigenTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the epsilon used in the symmetric eigen solver.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the symmetric eigen solver.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    fn design_term(pose: WorldToCamera, bearing: &impl Bearing) -> Matrix4<f64> {
        let bearing = bearing.bearing().into_inner();
        let rot = pose.0.rotation.matrix();
        let trans = pose.0.translation.vector;
        let pose = Matrix3x4::<f64>::from_columns(&[
            rot.column(0),
            rot.column(1),
            rot.column(2),
            trans.column(0),
        ]);
        let term = pose - bearing * bearing.transpose() * pose;
        term.transpose() * term
    }
}

impl Default for LinearEigenTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

impl Triangulator for LinearEigenTriangulator {
    fn triangulate<A: Bearing, B: Bearing>(
        &self,
        pose_a: WorldToCamera,
        a: &A,
        pose_b: WorldToCamera,
        b: &B,
    ) -> Option<WorldPoint> {
        let mut design: Matrix4<f64> = zero();
        design += Self::design_term(pose_a, a);
        design += Self::design_term(pose_b, b);

        let se = design.try_symmetric_eigen(self.epsilon, self.max_iterations)?;

        // The null space of the design matrix is the homogeneous point.
        se.eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| se.eigenvectors.column(ix).into_owned())
            .map(WorldPoint::from_homogeneous)
            .filter(|point| point.homogeneous().iter().all(|n| n.is_finite()))
    }
}
