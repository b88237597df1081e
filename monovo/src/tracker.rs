use crate::{
    Camera, CullingPolicy, Feature, FrameId, LandmarkKey, MapError, Matcher, Observation, Ransac,
    RelativePoseEstimator, SnapshotSender, TrackingError, TriangulationRejection, VoSettings,
    WorldMap,
};
use log::*;
use monovo_core::sample_consensus::Consensus;
use monovo_core::{FeatureMatch, Pose, Projective, Triangulator, WorldPoint, WorldToCamera};
use monovo_eight_point::EightPoint;
use monovo_geom::LinearEigenTriangulator;
use monovo_pinhole::NormalizedKeyPoint;
use rand_pcg::Pcg64;
use space::Metric;

/// What happened to a frame given to [`Tracker::process_frame`].
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// The first frame, which defines the world origin.
    Initialized(FrameId),
    /// The frame could not be tracked. It stays in the map without a pose, landmarks or
    /// observations, and the next frame is tracked against the previous reference instead.
    Skipped(FrameId, TrackingError),
    /// The frame was posed and the map was extended with it.
    Tracked(TrackingSummary),
}

/// The counts of one successfully tracked frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrackingSummary {
    pub frame: FrameId,
    /// The frame that the pose was chained from
    pub reference: FrameId,
    pub matches: usize,
    pub inliers: usize,
    /// Existing landmarks that gained an observation on this frame
    pub extended: usize,
    /// Landmarks created by triangulation
    pub created: usize,
    /// Triangulated candidates that were dropped
    pub rejected: usize,
    /// Landmarks removed by culling after this frame
    pub culled: usize,
}

/// Decides whether a triangulated point may become a landmark observed by `slot`.
///
/// The point must not be near infinity (`|w|` of the unit homogeneous vector above
/// `minimum_scale`), it must be in front of at least one of the cameras, and the slot must not
/// observe a landmark yet. The accepted point is returned with `w = 1`.
pub fn accept_candidate(
    point: Option<WorldPoint>,
    pose_a: WorldToCamera,
    pose_b: WorldToCamera,
    slot: Option<LandmarkKey>,
    minimum_scale: f64,
) -> Result<WorldPoint, TriangulationRejection> {
    let point = point.ok_or(TriangulationRejection::Failed)?;
    let homogeneous = point.homogeneous();
    if !(homogeneous.w.abs() / homogeneous.norm() > minimum_scale) {
        return Err(TriangulationRejection::Degenerate);
    }
    if !pose_a.transform(point).is_in_front() && !pose_b.transform(point).is_in_front() {
        return Err(TriangulationRejection::BehindCameras);
    }
    if slot.is_some() {
        return Err(TriangulationRejection::AlreadyObserved);
    }
    point.normalized().ok_or(TriangulationRejection::Degenerate)
}

/// Runs the whole front end on a stream of frames.
///
/// Every frame is matched against the last tracked frame, its pose is estimated relative to it
/// and chained, existing landmarks are extended to it, and new landmarks are triangulated from
/// the remaining inlier matches. Culling runs every `culling_interval` tracked frames.
pub struct Tracker<D, M, C, T> {
    settings: VoSettings,
    map: WorldMap<D>,
    matcher: Matcher<M>,
    estimator: RelativePoseEstimator<C, T>,
    triangulator: T,
    culling: CullingPolicy,
    tracked_since_culling: usize,
    snapshots: Option<SnapshotSender>,
}

impl<D, M> Tracker<D, M, Ransac<Pcg64>, LinearEigenTriangulator>
where
    M: Metric<D>,
    M::Unit: Into<f64>,
{
    /// Creates a tracker using seeded RANSAC and the linear eigen triangulator.
    pub fn from_settings(camera: Camera, metric: M, settings: VoSettings) -> Self {
        Self::new(
            camera,
            metric,
            Ransac::from_settings(&settings),
            LinearEigenTriangulator::new()
                .epsilon(settings.svd_epsilon)
                .max_iterations(settings.svd_max_iterations),
            settings,
        )
    }
}

impl<D, M, C, T> Tracker<D, M, C, T>
where
    M: Metric<D>,
    M::Unit: Into<f64>,
    C: Consensus<EightPoint, FeatureMatch<NormalizedKeyPoint>>,
    C::Inliers: IntoIterator<Item = usize>,
    T: Triangulator + Clone,
{
    pub fn new(
        camera: Camera,
        metric: M,
        consensus: C,
        triangulator: T,
        settings: VoSettings,
    ) -> Self {
        Self {
            matcher: Matcher::new(metric, &settings, camera.diagonal()),
            estimator: RelativePoseEstimator::new(consensus, triangulator.clone(), &settings),
            triangulator,
            culling: CullingPolicy::from_settings(&settings),
            map: WorldMap::new(camera),
            tracked_since_culling: 0,
            snapshots: None,
            settings,
        }
    }

    /// Publishes a snapshot of the map to `sender` after every frame that changes the map.
    pub fn attach_snapshots(&mut self, sender: SnapshotSender) {
        self.snapshots = Some(sender);
    }

    pub fn snapshots(&self) -> Option<&SnapshotSender> {
        self.snapshots.as_ref()
    }

    pub fn map(&self) -> &WorldMap<D> {
        &self.map
    }

    pub fn into_map(self) -> WorldMap<D> {
        self.map
    }

    pub fn settings(&self) -> &VoSettings {
        &self.settings
    }

    /// Adds a frame to the map and tracks it.
    ///
    /// A frame that cannot be tracked is reported as [`FrameOutcome::Skipped`]. Only a broken
    /// map is an error, after which the tracker must not be used any further.
    pub fn process_frame(
        &mut self,
        features: Vec<Feature>,
        descriptors: Vec<D>,
    ) -> Result<FrameOutcome, MapError> {
        let reference = self.map.last_tracked_frame();
        let frame = self.map.register_frame(features, descriptors)?;
        let reference = match reference {
            Some(reference) => reference,
            None => {
                info!(
                    "frame {} initializes the map with {} features",
                    frame.0,
                    self.map.frame(frame)?.len()
                );
                self.publish();
                return Ok(FrameOutcome::Initialized(frame));
            }
        };

        // Current features look up their nearest reference features, and the pairs are then
        // turned around into `FeatureMatch(reference, current)`.
        let matches: Vec<FeatureMatch<usize>> = {
            let reference_frame = self.map.frame(reference)?;
            let current_frame = self.map.frame(frame)?;
            match self.matcher.match_frames(current_frame, reference_frame) {
                Ok(matches) => matches
                    .into_iter()
                    .map(|FeatureMatch(b, a)| FeatureMatch(a, b))
                    .collect(),
                Err(e) => return Ok(skip(frame, e)),
            }
        };
        let normalized = self.normalized_matches(reference, frame, &matches)?;
        let relative = match self.estimator.estimate(&normalized) {
            Ok(relative) => relative,
            Err(e) => return Ok(skip(frame, e)),
        };

        let pose = self.map.chain_pose(frame, relative.pose, reference)?;
        let reference_pose = self.map.frame(reference)?.pose();

        // Inliers that already observe a landmark in the reference extend it, the rest are
        // triangulated.
        let mut extended = 0;
        let mut candidates = vec![];
        for (&FeatureMatch(a, b), &keypoints) in matches
            .iter()
            .zip(&normalized)
            .zip(&relative.inliers)
            .filter(|&(_, &inlier)| inlier)
            .map(|(m, _)| m)
        {
            let existing = self.map.frame(reference)?.landmark(a);
            match existing {
                Some(landmark) => {
                    self.map.attach_observation(landmark, frame, b)?;
                    extended += 1;
                }
                None => candidates.push((FeatureMatch(a, b), keypoints)),
            }
        }

        let points = self.triangulator.triangulate_matches(
            reference_pose,
            pose,
            candidates.iter().map(|&(_, keypoints)| keypoints),
        );
        let mut created = 0;
        let mut rejected = 0;
        for ((FeatureMatch(a, b), _), point) in candidates.into_iter().zip(points) {
            let current_frame = self.map.frame(frame)?;
            let accepted = accept_candidate(
                point,
                reference_pose,
                pose,
                current_frame.landmark(b),
                self.settings.triangulation_minimum_scale,
            );
            match accepted {
                Ok(position) => {
                    let color = current_frame.color(b);
                    self.map.add_landmark(
                        position,
                        color,
                        [Observation::new(reference, a), Observation::new(frame, b)],
                    )?;
                    created += 1;
                }
                Err(rejection) => {
                    trace!(
                        "dropped triangulation of keypoint {} on frame {}: {}",
                        b, frame.0, rejection
                    );
                    rejected += 1;
                }
            }
        }

        let culled = self.maybe_cull()?;
        self.publish();

        let summary = TrackingSummary {
            frame,
            reference,
            matches: matches.len(),
            inliers: relative.inlier_count(),
            extended,
            created,
            rejected,
            culled,
        };
        info!(
            "tracked frame {} against {}: {} matches, {} inliers, {} extended, {} created, {} rejected, {} culled, {} landmarks",
            frame.0,
            reference.0,
            summary.matches,
            summary.inliers,
            extended,
            created,
            rejected,
            culled,
            self.map.landmark_count()
        );
        Ok(FrameOutcome::Tracked(summary))
    }

    fn normalized_matches(
        &self,
        reference: FrameId,
        frame: FrameId,
        matches: &[FeatureMatch<usize>],
    ) -> Result<Vec<FeatureMatch<NormalizedKeyPoint>>, MapError> {
        let reference = self.map.frame(reference)?;
        let frame = self.map.frame(frame)?;
        Ok(matches
            .iter()
            .map(|&FeatureMatch(a, b)| {
                FeatureMatch(
                    reference.normalized_keypoint(a),
                    frame.normalized_keypoint(b),
                )
            })
            .collect())
    }

    fn maybe_cull(&mut self) -> Result<usize, MapError> {
        if self.settings.culling_interval == 0 {
            return Ok(0);
        }
        self.tracked_since_culling += 1;
        if self.tracked_since_culling < self.settings.culling_interval {
            return Ok(0);
        }
        self.tracked_since_culling = 0;
        self.culling.cull(&mut self.map)
    }

    fn publish(&self) {
        if let Some(snapshots) = &self.snapshots {
            if snapshots.is_connected() && !snapshots.publish(self.map.snapshot()) {
                debug!("snapshot receiver is gone");
            }
        }
    }
}

fn skip(frame: FrameId, error: TrackingError) -> FrameOutcome {
    warn!("skipping frame {}: {}", frame.0, error);
    FrameOutcome::Skipped(frame, error)
}
