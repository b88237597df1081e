use monovo_core::{
    nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector2},
    sample_consensus::Estimator,
    FeatureMatch,
};
use monovo_pinhole::{FundamentalMatrix, NormalizedKeyPoint};

/// Computes the similarity transform that moves the centroid of `points` to the origin and
/// scales them to a mean distance of `sqrt(2)` from it.
fn hartley_normalization(
    points: impl Iterator<Item = Point2<f64>> + Clone,
) -> Option<Matrix3<f64>> {
    let count = points.clone().count() as f64;
    let centroid = points.clone().fold(Vector2::zeros(), |sum, p| sum + p.coords) / count;
    let mean_distance = points.map(|p| (p.coords - centroid).norm()).sum::<f64>() / count;
    let scale = std::f64::consts::SQRT_2 / mean_distance;
    if !scale.is_finite() || !centroid.iter().all(|n| n.is_finite()) {
        return None;
    }
    #[rustfmt::skip]
    let transform = Matrix3::new(
        scale,  0.0,    -scale * centroid.x,
        0.0,    scale,  -scale * centroid.y,
        0.0,    0.0,    1.0,
    );
    Some(transform)
}

/// Builds `AᵀA` for the epipolar equations `bᵀFa = 0`, with `F` flattened row-major.
fn encode_epipolar_equation(
    matches: impl Iterator<Item = FeatureMatch<NormalizedKeyPoint>>,
    transform_a: &Matrix3<f64>,
    transform_b: &Matrix3<f64>,
) -> SMatrix<f64, 9, 9> {
    let mut normal = SMatrix::<f64, 9, 9>::zeros();
    for FeatureMatch(a, b) in matches {
        let a = transform_a * a.virtual_image_point().coords;
        let b = transform_b * b.virtual_image_point().coords;
        let row = SVector::<f64, 9>::from_fn(|ix, _| b[ix / 3] * a[ix % 3]);
        normal += row * row.transpose();
    }
    normal
}

/// Performs the normalized
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman.
///
/// Keypoints of each view are first translated and scaled so that their centroid is at the
/// origin with a mean distance of `sqrt(2)`. The linear solution is then made rank 2 and
/// transformed back. The result is scaled to unit frobenius norm.
///
/// Eight or more matches are accepted, so the same estimator refits a model on all of its inliers.
///
/// To turn the estimate into a proper essential matrix, see
/// [`monovo_pinhole::FundamentalMatrix::recondition`].
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<FundamentalMatrix>
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        let minimum = <Self as Estimator<FeatureMatch<NormalizedKeyPoint>>>::MIN_SAMPLES;
        if data.clone().count() < minimum {
            return None;
        }
        let transform_a = hartley_normalization(data.clone().map(|FeatureMatch(a, _)| a.0))?;
        let transform_b = hartley_normalization(data.clone().map(|FeatureMatch(_, b)| b.0))?;

        let normal = encode_epipolar_equation(data, &transform_a, &transform_b);
        let eigens = normal.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let eigenvector = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let normalized = FundamentalMatrix(Matrix3::from_row_slice(eigenvector.as_slice()))
            .enforce_rank_two(self.epsilon, self.iterations)?;

        let mat = transform_b.transpose() * normalized.0 * transform_a;
        let norm = mat.norm();
        Some(mat / norm)
            .filter(|mat| mat.iter().all(|n| n.is_finite()))
            .map(FundamentalMatrix)
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch<NormalizedKeyPoint>> for EightPoint {
    type Model = FundamentalMatrix;
    type ModelIter = Option<FundamentalMatrix>;
    const MIN_SAMPLES: usize = 8;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        self.from_matches(data)
    }
}
