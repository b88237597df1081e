use crate::{PoseDisambiguation, Ransac, TrackingError, VoSettings};
use log::*;
use monovo_core::sample_consensus::{Consensus, Estimator};
use monovo_core::{CameraToCamera, FeatureMatch, Pose, Triangulator, WorldToCamera};
use monovo_eight_point::EightPoint;
use monovo_geom::LinearEigenTriangulator;
use monovo_pinhole::{FundamentalMatrix, NormalizedKeyPoint};
use rand_pcg::Pcg64;

const MINIMUM_INLIERS: usize =
    <EightPoint as Estimator<FeatureMatch<NormalizedKeyPoint>>>::MIN_SAMPLES;

/// The motion between two frames as recovered from their correspondences.
#[derive(Clone, Debug)]
pub struct RelativePose {
    /// Transforms points from the reference camera into the current camera. The translation has
    /// unit length.
    pub pose: CameraToCamera,
    /// The epipolar constraint `bᵀFa = 0` that the pose was decomposed from.
    pub fundamental: FundamentalMatrix,
    /// Whether each input correspondence agreed with the fundamental matrix.
    pub inliers: Vec<bool>,
}

impl RelativePose {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }
}

/// Estimates the relative pose between two frames from their normalized correspondences.
///
/// The consensus `C` repeatedly fits the eight-point algorithm to random minimal samples. The
/// winning matrix is then decomposed, and one of its four candidate poses is picked according to
/// [`PoseDisambiguation`]. The triangulator `T` is only used for the cheirality test.
pub struct RelativePoseEstimator<C, T> {
    consensus: C,
    estimator: EightPoint,
    triangulator: T,
    disambiguation: PoseDisambiguation,
    recondition: bool,
    epsilon: f64,
    max_iterations: usize,
}

impl<C, T> RelativePoseEstimator<C, T>
where
    C: Consensus<EightPoint, FeatureMatch<NormalizedKeyPoint>>,
    C::Inliers: IntoIterator<Item = usize>,
    T: Triangulator,
{
    pub fn new(consensus: C, triangulator: T, settings: &VoSettings) -> Self {
        Self {
            consensus,
            estimator: EightPoint {
                epsilon: settings.svd_epsilon,
                iterations: settings.svd_max_iterations,
            },
            triangulator,
            disambiguation: settings.pose_disambiguation,
            recondition: settings.recondition_essential,
            epsilon: settings.svd_epsilon,
            max_iterations: settings.svd_max_iterations,
        }
    }

    /// Estimates the pose of camera `b` relative to camera `a` from matches `FeatureMatch(a, b)`.
    ///
    /// Fails with [`TrackingError::DegenerateGeometry`] if there are too few matches, if no
    /// model is found, or if the model has too few inliers. The caller must not triangulate
    /// anything in that case.
    pub fn estimate(
        &mut self,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Result<RelativePose, TrackingError> {
        let degenerate = TrackingError::DegenerateGeometry {
            matches: matches.len(),
        };
        if matches.len() < MINIMUM_INLIERS {
            debug!("only {} matches given to the pose estimator", matches.len());
            return Err(degenerate);
        }

        let (fundamental, inlier_indices) = self
            .consensus
            .model_inliers(&self.estimator, matches.iter().copied())
            .ok_or_else(|| {
                debug!("consensus found no model");
                degenerate.clone()
            })?;
        let mut inliers = vec![false; matches.len()];
        for ix in inlier_indices {
            if let Some(inlier) = inliers.get_mut(ix) {
                *inlier = true;
            }
        }
        let inlier_count = inliers.iter().filter(|&&inlier| inlier).count();
        if inlier_count < MINIMUM_INLIERS {
            debug!(
                "consensus model has {} inliers, but {} are required",
                inlier_count, MINIMUM_INLIERS
            );
            return Err(degenerate);
        }

        let fundamental = if self.recondition {
            fundamental
                .recondition(self.epsilon, self.max_iterations)
                .ok_or_else(|| degenerate.clone())?
        } else {
            fundamental
        };

        let pose = match self.disambiguation {
            PoseDisambiguation::TraceHeuristic => {
                fundamental.decompose_trace_heuristic(self.epsilon, self.max_iterations)
            }
            PoseDisambiguation::Cheirality => self.cheirality(&fundamental, matches, &inliers),
        }
        .ok_or(degenerate)?;

        debug!(
            "relative pose from {} inliers out of {} matches: translation {:?}, rotation angle {}",
            inlier_count,
            matches.len(),
            pose.0.translation.vector.as_slice(),
            pose.0.rotation.angle()
        );

        Ok(RelativePose {
            pose,
            fundamental,
            inliers,
        })
    }

    /// Picks the candidate pose that places the most inliers in front of both cameras.
    fn cheirality(
        &self,
        fundamental: &FundamentalMatrix,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
        inliers: &[bool],
    ) -> Option<CameraToCamera> {
        let poses = fundamental.possible_unscaled_poses(self.epsilon, self.max_iterations)?;
        let inlier_matches = || {
            matches
                .iter()
                .zip(inliers)
                .filter(|&(_, &inlier)| inlier)
                .map(|(&m, _)| m)
        };
        let (pose, passed) = poses
            .iter()
            .map(|&pose| (pose, self.cheirality_pass_count(pose, inlier_matches())))
            .fold(None, |best: Option<(CameraToCamera, usize)>, (pose, passed)| match best {
                Some((_, best_passed)) if best_passed >= passed => best,
                _ => Some((pose, passed)),
            })?;
        trace!(
            "cheirality test passed {} of {} inliers",
            passed,
            inlier_matches().count()
        );
        Some(pose)
    }

    /// Counts the matches whose triangulated point is in front of both cameras.
    fn cheirality_pass_count(
        &self,
        pose: CameraToCamera,
        matches: impl Iterator<Item = FeatureMatch<NormalizedKeyPoint>>,
    ) -> usize {
        let pose_a = WorldToCamera::identity();
        let pose_b = WorldToCamera(pose.isometry());
        matches
            .filter(|FeatureMatch(a, b)| {
                self.triangulator
                    .triangulate(pose_a, a, pose_b, b)
                    .map_or(false, |point| {
                        pose_a.transform(point).is_in_front()
                            && pose_b.transform(point).is_in_front()
                    })
            })
            .count()
    }
}

impl RelativePoseEstimator<Ransac<Pcg64>, LinearEigenTriangulator> {
    /// Creates the estimator with seeded RANSAC and the linear eigen triangulator.
    pub fn from_settings(settings: &VoSettings) -> Self {
        Self::new(
            Ransac::from_settings(settings),
            LinearEigenTriangulator::new()
                .epsilon(settings.svd_epsilon)
                .max_iterations(settings.svd_max_iterations),
            settings,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use monovo_core::nalgebra::{Point3, Rotation3, Vector3};
    use monovo_core::{CameraPoint, Projective};
    use rand::{Rng, SeedableRng};

    fn true_pose() -> CameraToCamera {
        CameraToCamera::from_parts(
            Vector3::new(-0.3, 0.05, -0.1),
            Rotation3::from_euler_angles(0.02, -0.05, 0.01),
        )
    }

    fn scene(count: usize, seed: u64) -> Vec<FeatureMatch<NormalizedKeyPoint>> {
        let mut rng = Pcg64::seed_from_u64(seed);
        let pose = true_pose();
        std::iter::repeat_with(|| {
            let point = CameraPoint::from_point(Point3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(2.0..5.0),
            ));
            let a = NormalizedKeyPoint::from_camera_point(point)?;
            let b = NormalizedKeyPoint::from_camera_point(pose.transform(point))?;
            Some(FeatureMatch(a, b))
        })
        .flatten()
        .take(count)
        .collect()
    }

    fn settings(pose_disambiguation: PoseDisambiguation) -> VoSettings {
        VoSettings {
            pose_disambiguation,
            ..VoSettings::default()
        }
    }

    fn translation_cosine(estimated: CameraToCamera) -> f64 {
        estimated
            .0
            .translation
            .vector
            .normalize()
            .dot(&true_pose().0.translation.vector.normalize())
    }

    #[test]
    fn cheirality_recovers_translation_sign() {
        let matches = scene(64, 0);
        let mut estimator =
            RelativePoseEstimator::from_settings(&settings(PoseDisambiguation::Cheirality));
        let relative = estimator.estimate(&matches).unwrap();
        assert_eq!(relative.inlier_count(), matches.len());
        let true_rotation = true_pose().0.rotation;
        assert!(relative.pose.0.rotation.rotation_to(&true_rotation).angle() < 1e-6);
        assert!(translation_cosine(relative.pose) > 1.0 - 1e-6);
    }

    #[test]
    fn trace_heuristic_recovers_rotation() {
        let matches = scene(64, 1);
        let mut estimator =
            RelativePoseEstimator::from_settings(&settings(PoseDisambiguation::TraceHeuristic));
        let relative = estimator.estimate(&matches).unwrap();
        let true_rotation = true_pose().0.rotation;
        assert!(relative.pose.0.rotation.rotation_to(&true_rotation).angle() < 1e-6);
        // The trace heuristic leaves the sign of the translation undetermined.
        assert!(translation_cosine(relative.pose).abs() > 1.0 - 1e-6);
        approx::assert_relative_eq!(
            relative.pose.0.rotation.matrix().determinant(),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn reconditioned_matrix_still_decomposes() {
        let matches = scene(32, 2);
        let mut estimator = RelativePoseEstimator::from_settings(&VoSettings {
            recondition_essential: true,
            ..VoSettings::default()
        });
        let relative = estimator.estimate(&matches).unwrap();
        assert!(translation_cosine(relative.pose) > 1.0 - 1e-6);
    }

    #[test]
    fn outliers_are_masked() {
        let mut matches = scene(40, 3);
        // Swapping the current keypoints of two matches breaks both.
        let (b0, b1) = (matches[0].1, matches[1].1);
        matches[0].1 = b1;
        matches[1].1 = b0;
        let mut estimator = RelativePoseEstimator::from_settings(&VoSettings::default());
        let relative = estimator.estimate(&matches).unwrap();
        assert!(!relative.inliers[0]);
        assert!(!relative.inliers[1]);
        assert_eq!(relative.inlier_count(), matches.len() - 2);
    }

    #[test]
    fn too_few_matches_are_degenerate() {
        let matches = scene(7, 4);
        let mut estimator = RelativePoseEstimator::from_settings(&VoSettings::default());
        assert_eq!(
            estimator.estimate(&matches).err(),
            Some(TrackingError::DegenerateGeometry { matches: 7 })
        );
    }

    #[test]
    fn coincident_matches_are_degenerate() {
        let matches = vec![scene(1, 5)[0]; 12];
        let mut estimator = RelativePoseEstimator::from_settings(&VoSettings::default());
        assert_eq!(
            estimator.estimate(&matches).err(),
            Some(TrackingError::DegenerateGeometry { matches: 12 })
        );
    }
}
