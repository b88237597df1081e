use crate::{FrameId, Landmark, LandmarkKey, MapError, VoSettings, WorldMap};
use log::*;

/// Decides which landmarks are no longer worth keeping in the map.
///
/// A landmark is culled when it is stale or when it is inaccurate:
///
/// * stale: it has at most `maximum_observations` observations and has not been seen for more
///   than `maximum_frame_age` frames
/// * inaccurate: its mean reprojection error over all observations is strictly greater than
///   `reprojection_threshold` pixels
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CullingPolicy {
    pub maximum_observations: usize,
    pub maximum_frame_age: usize,
    pub reprojection_threshold: f64,
}

impl CullingPolicy {
    pub fn from_settings(settings: &VoSettings) -> Self {
        Self {
            maximum_observations: settings.culling_maximum_observations,
            maximum_frame_age: settings.culling_maximum_frame_age,
            reprojection_threshold: settings.culling_reprojection_threshold,
        }
    }

    /// A landmark with few observations which was last seen long before `newest`.
    pub fn is_stale(&self, landmark: &Landmark, newest: FrameId) -> bool {
        let aged = |last: FrameId| last.0.saturating_add(self.maximum_frame_age) < newest.0;
        landmark.observations().len() <= self.maximum_observations
            && landmark.last_seen().map_or(true, aged)
    }

    /// The mean pixel distance between the landmark projected into each observing frame and the
    /// keypoint observed there.
    pub fn mean_reprojection_error<D>(
        &self,
        map: &WorldMap<D>,
        landmark: &Landmark,
    ) -> Result<f64, MapError> {
        let observations = landmark.observations();
        let total = observations
            .iter()
            .map(|&obs| map.reprojection_error(landmark.position, obs))
            .sum::<Result<f64, MapError>>()?;
        Ok(total / observations.len() as f64)
    }

    pub fn is_inaccurate<D>(
        &self,
        map: &WorldMap<D>,
        landmark: &Landmark,
    ) -> Result<bool, MapError> {
        // A landmark without observations has a mean error of NaN, which is never kept.
        Ok(!(self.mean_reprojection_error(map, landmark)? <= self.reprojection_threshold))
    }

    /// Lists the landmarks that should be culled without changing the map.
    pub fn candidates<D>(&self, map: &WorldMap<D>) -> Result<Vec<LandmarkKey>, MapError> {
        let newest = match map.newest_frame() {
            Some(newest) => newest,
            None => return Ok(vec![]),
        };
        let mut candidates = vec![];
        for (key, landmark) in map.landmarks() {
            if self.is_stale(landmark, newest) {
                trace!("landmark {:?} is stale", key);
                candidates.push(key);
            } else if self.is_inaccurate(map, landmark)? {
                trace!("landmark {:?} is inaccurate", key);
                candidates.push(key);
            }
        }
        Ok(candidates)
    }

    /// Removes all landmarks that should be culled, returning how many were removed.
    pub fn cull<D>(&self, map: &mut WorldMap<D>) -> Result<usize, MapError> {
        let candidates = self.candidates(map)?;
        for &key in &candidates {
            map.remove_landmark(key)?;
        }
        debug!(
            "culled {} landmarks, {} remain",
            candidates.len(),
            map.landmark_count()
        );
        Ok(candidates.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Camera, Feature, Observation};
    use monovo_core::nalgebra::{Point2, Point3};
    use monovo_core::{KeyPoint, Projective, WorldPoint};
    use monovo_pinhole::CameraIntrinsics;

    /// A map of `frames` identity posed frames with a single keypoint each at `keypoint`.
    fn map_of(frames: usize, keypoint: Point2<f64>) -> WorldMap<()> {
        let mut map = WorldMap::new(Camera {
            intrinsics: CameraIntrinsics::identity().focal(100.0),
            width: 640,
            height: 480,
        });
        for _ in 0..frames {
            map.register_frame(vec![Feature::from(KeyPoint(keypoint))], vec![()])
                .unwrap();
        }
        map
    }

    fn ahead() -> WorldPoint {
        WorldPoint::from_point(Point3::new(0.0, 0.0, 1.0))
    }

    fn observed_on(map: &mut WorldMap<()>, frames: &[usize]) -> LandmarkKey {
        let observations = frames.iter().map(|&f| Observation::new(FrameId(f), 0));
        map.add_landmark(ahead(), None, observations).unwrap()
    }

    #[test]
    fn staleness_boundary() {
        let policy = CullingPolicy::from_settings(&VoSettings::default());
        let mut map = map_of(21, Point2::origin());
        let stale = observed_on(&mut map, &[5, 12]);
        let fresh = observed_on(&mut map, &[6, 13]);
        let popular = observed_on(&mut map, &[0, 1, 2, 3, 4]);
        let newest = FrameId(20);
        assert!(policy.is_stale(map.landmark(stale).unwrap(), newest));
        assert!(!policy.is_stale(map.landmark(fresh).unwrap(), newest));
        assert!(!policy.is_stale(map.landmark(popular).unwrap(), newest));
        assert_eq!(policy.candidates(&map).unwrap(), vec![stale]);
    }

    #[test]
    fn huge_frame_age_never_goes_stale() {
        let policy = CullingPolicy {
            maximum_frame_age: usize::MAX,
            ..CullingPolicy::from_settings(&VoSettings::default())
        };
        let mut map = map_of(21, Point2::origin());
        let landmark = observed_on(&mut map, &[5, 12]);
        assert!(!policy.is_stale(map.landmark(landmark).unwrap(), FrameId(20)));
    }

    #[test]
    fn reprojection_error_exactly_at_threshold_is_kept() {
        let policy = CullingPolicy::from_settings(&VoSettings::default());
        // The landmark projects onto the origin, 10 pixels away from the keypoint.
        let mut map = map_of(2, Point2::new(10.0, 0.0));
        let landmark = observed_on(&mut map, &[0, 1]);
        let error = policy
            .mean_reprojection_error(&map, map.landmark(landmark).unwrap())
            .unwrap();
        assert_eq!(error, 10.0);
        assert!(!policy
            .is_inaccurate(&map, map.landmark(landmark).unwrap())
            .unwrap());
        assert_eq!(policy.cull(&mut map).unwrap(), 0);

        let mut map = map_of(2, Point2::new(10.5, 0.0));
        let landmark = observed_on(&mut map, &[0, 1]);
        let landmark = map.landmark(landmark).unwrap();
        assert!(policy.is_inaccurate(&map, landmark).unwrap());
        assert_eq!(policy.cull(&mut map).unwrap(), 1);
        assert_eq!(map.landmark_count(), 0);
        assert!(map.frames().all(|(_, frame)| frame.landmark(0).is_none()));
    }

    #[test]
    fn behind_the_camera_is_inaccurate() {
        let policy = CullingPolicy::from_settings(&VoSettings::default());
        let mut map = map_of(2, Point2::origin());
        let landmark = map
            .add_landmark(
                WorldPoint::from_point(Point3::new(0.0, 0.0, -1.0)),
                None,
                [Observation::new(FrameId(1), 0)],
            )
            .unwrap();
        let landmark = map.landmark(landmark).unwrap();
        assert!(policy.is_inaccurate(&map, landmark).unwrap());
    }

    #[test]
    fn candidates_are_idempotent() {
        let policy = CullingPolicy::from_settings(&VoSettings::default());
        let mut map = map_of(30, Point2::new(4.0, 3.0));
        for frame in 0..30 {
            observed_on(&mut map, &[frame]);
        }
        let first = policy.candidates(&map).unwrap();
        let second = policy.candidates(&map).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 22);
        assert_eq!(policy.cull(&mut map).unwrap(), first.len());
        assert!(policy.candidates(&map).unwrap().is_empty());
        map.sanity_check().unwrap();
    }
}
