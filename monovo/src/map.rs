use crate::MapError;
use log::*;
use monovo_core::{CameraModel, CameraToCamera, KeyPoint, Pose, WorldPoint, WorldToCamera};
use monovo_pinhole::{CameraIntrinsics, NormalizedKeyPoint};
use slotmap::{new_key_type, DenseSlotMap};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

new_key_type! {
    pub struct LandmarkKey;
}

/// The position of a frame in the map. Frames are never removed, so this never changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FrameId(pub usize);

/// A detected feature as it comes from the feature extractor.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Feature {
    pub keypoint: KeyPoint,
    pub color: Option<[u8; 3]>,
}

impl From<KeyPoint> for Feature {
    fn from(keypoint: KeyPoint) -> Self {
        Self {
            keypoint,
            color: None,
        }
    }
}

/// The camera shared by all frames of a session.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl Camera {
    /// The length of the image diagonal in pixels.
    pub fn diagonal(&self) -> f64 {
        f64::from(self.width).hypot(f64::from(self.height))
    }
}

/// A single camera image after feature extraction.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Frame<D> {
    /// Keypoints in pixel coordinates
    keypoints: Vec<KeyPoint>,
    /// The same keypoints calibrated with the session intrinsics
    normalized: Vec<NormalizedKeyPoint>,
    colors: Vec<Option<[u8; 3]>>,
    descriptors: Vec<D>,
    pose: WorldToCamera,
    /// The landmark each keypoint observes, if any
    landmarks: Vec<Option<LandmarkKey>>,
    tracked: bool,
}

impl<D> Frame<D> {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.keypoints
    }

    pub fn keypoint(&self, ix: usize) -> KeyPoint {
        self.keypoints[ix]
    }

    pub fn normalized_keypoints(&self) -> &[NormalizedKeyPoint] {
        &self.normalized
    }

    pub fn normalized_keypoint(&self, ix: usize) -> NormalizedKeyPoint {
        self.normalized[ix]
    }

    pub fn descriptors(&self) -> &[D] {
        &self.descriptors
    }

    pub fn color(&self, ix: usize) -> Option<[u8; 3]> {
        self.colors[ix]
    }

    pub fn pose(&self) -> WorldToCamera {
        self.pose
    }

    /// The landmark slots, one per keypoint.
    pub fn landmarks(&self) -> &[Option<LandmarkKey>] {
        &self.landmarks
    }

    pub fn landmark(&self, ix: usize) -> Option<LandmarkKey> {
        self.landmarks[ix]
    }

    /// Whether this frame has a pose in the map, either by being first or by being chained.
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }
}

/// One keypoint of one frame that sees a landmark.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Observation {
    pub frame: FrameId,
    pub keypoint: usize,
}

impl Observation {
    pub fn new(frame: FrameId, keypoint: usize) -> Self {
        Self { frame, keypoint }
    }
}

/// A 3d point in the world that has been observed on one or more frames.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Landmark {
    pub position: WorldPoint,
    pub color: Option<[u8; 3]>,
    observations: Vec<Observation>,
}

impl Landmark {
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// The newest frame this landmark was observed on.
    pub fn last_seen(&self) -> Option<FrameId> {
        self.observations.iter().map(|obs| obs.frame).max()
    }
}

/// Owns every frame and landmark of a session and keeps the observations between them
/// consistent in both directions.
///
/// Frames are append-only. Landmarks are stored in a slot map, so a [`LandmarkKey`] stays valid
/// until its landmark is removed and is never handed out again afterwards.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldMap<D> {
    camera: Camera,
    frames: Vec<Frame<D>>,
    landmarks: DenseSlotMap<LandmarkKey, Landmark>,
}

impl<D> WorldMap<D> {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            frames: vec![],
            landmarks: DenseSlotMap::with_key(),
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn frame(&self, frame: FrameId) -> Result<&Frame<D>, MapError> {
        self.frames
            .get(frame.0)
            .ok_or(MapError::UnknownFrame(frame))
    }

    fn frame_mut(&mut self, frame: FrameId) -> Result<&mut Frame<D>, MapError> {
        self.frames
            .get_mut(frame.0)
            .ok_or(MapError::UnknownFrame(frame))
    }

    pub fn frames(&self) -> impl Iterator<Item = (FrameId, &Frame<D>)> + '_ {
        self.frames
            .iter()
            .enumerate()
            .map(|(ix, frame)| (FrameId(ix), frame))
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn landmark(&self, landmark: LandmarkKey) -> Result<&Landmark, MapError> {
        self.landmarks
            .get(landmark)
            .ok_or(MapError::UnknownLandmark(landmark))
    }

    pub fn landmarks(&self) -> impl Iterator<Item = (LandmarkKey, &Landmark)> + '_ {
        self.landmarks.iter()
    }

    /// Collects the keys of all landmarks, so they can be visited while landmarks are removed.
    pub fn landmark_keys(&self) -> Vec<LandmarkKey> {
        self.landmarks.keys().collect()
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    /// The most recently registered frame.
    pub fn newest_frame(&self) -> Option<FrameId> {
        self.frames.len().checked_sub(1).map(FrameId)
    }

    /// The most recent frame with a known pose, which new frames are matched and chained against.
    pub fn last_tracked_frame(&self) -> Option<FrameId> {
        self.frames
            .iter()
            .rposition(|frame| frame.tracked)
            .map(FrameId)
    }

    /// Adds a frame with an identity pose and no observations.
    ///
    /// The first frame of a map is tracked by definition, since it defines the world origin.
    pub fn register_frame(
        &mut self,
        features: Vec<Feature>,
        descriptors: Vec<D>,
    ) -> Result<FrameId, MapError> {
        if features.len() != descriptors.len() {
            return Err(MapError::FeatureCountMismatch {
                keypoints: features.len(),
                descriptors: descriptors.len(),
            });
        }
        let id = FrameId(self.frames.len());
        let keypoints: Vec<KeyPoint> = features.iter().map(|feature| feature.keypoint).collect();
        let normalized = keypoints
            .iter()
            .map(|&keypoint| self.camera.intrinsics.calibrate(keypoint))
            .collect();
        let colors = features.iter().map(|feature| feature.color).collect();
        self.frames.push(Frame {
            landmarks: vec![None; keypoints.len()],
            keypoints,
            normalized,
            colors,
            descriptors,
            pose: WorldToCamera::identity(),
            tracked: id.0 == 0,
        });
        debug!(
            "registered frame {} with {} features",
            id.0,
            self.frames[id.0].len()
        );
        Ok(id)
    }

    /// Sets the pose of `frame` to `relative · pose(reference)` and marks it tracked.
    pub fn chain_pose(
        &mut self,
        frame: FrameId,
        relative: CameraToCamera,
        reference: FrameId,
    ) -> Result<WorldToCamera, MapError> {
        let pose = relative.chain(self.frame(reference)?.pose);
        let frame = self.frame_mut(frame)?;
        frame.pose = pose;
        frame.tracked = true;
        Ok(pose)
    }

    /// Creates a landmark without any observations.
    ///
    /// A landmark must be observed before the map is consistent again, so prefer
    /// [`WorldMap::add_landmark`].
    pub fn create_landmark(&mut self, position: WorldPoint, color: Option<[u8; 3]>) -> LandmarkKey {
        self.landmarks.insert(Landmark {
            position,
            color,
            observations: vec![],
        })
    }

    /// Creates a landmark and attaches all of its observations.
    ///
    /// Either every observation is attached or the landmark is not created at all.
    pub fn add_landmark(
        &mut self,
        position: WorldPoint,
        color: Option<[u8; 3]>,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Result<LandmarkKey, MapError> {
        let landmark = self.create_landmark(position, color);
        for Observation { frame, keypoint } in observations {
            if let Err(e) = self.attach_observation(landmark, frame, keypoint) {
                // Only slots that point at the new landmark were written.
                let attached = self.landmarks[landmark].observations.clone();
                for obs in attached {
                    self.frames[obs.frame.0].landmarks[obs.keypoint] = None;
                }
                self.landmarks.remove(landmark);
                return Err(e);
            }
        }
        if self.landmarks[landmark].observations.is_empty() {
            self.landmarks.remove(landmark);
            return Err(MapError::Unobserved(landmark));
        }
        Ok(landmark)
    }

    /// Records that keypoint `keypoint` of `frame` sees `landmark`, on both sides.
    ///
    /// Attaching a landmark to the slot that already holds it does nothing.
    pub fn attach_observation(
        &mut self,
        landmark: LandmarkKey,
        frame: FrameId,
        keypoint: usize,
    ) -> Result<(), MapError> {
        if !self.landmarks.contains_key(landmark) {
            return Err(MapError::UnknownLandmark(landmark));
        }
        let frame_data = self.frame_mut(frame)?;
        let keypoints = frame_data.landmarks.len();
        let slot = frame_data
            .landmarks
            .get_mut(keypoint)
            .ok_or(MapError::KeypointOutOfRange {
                frame,
                keypoint,
                keypoints,
            })?;
        match *slot {
            Some(existing) if existing == landmark => return Ok(()),
            Some(existing) => {
                return Err(MapError::SlotOccupied {
                    frame,
                    keypoint,
                    existing,
                })
            }
            None => *slot = Some(landmark),
        }
        self.landmarks[landmark]
            .observations
            .push(Observation::new(frame, keypoint));
        Ok(())
    }

    /// Removes a landmark and clears every slot that observes it.
    ///
    /// All slots are verified before anything is changed, so an inconsistent map is reported
    /// rather than made worse.
    pub fn remove_landmark(&mut self, landmark: LandmarkKey) -> Result<Landmark, MapError> {
        let observations = &self.landmark(landmark)?.observations;
        for &Observation { frame, keypoint } in observations {
            let found = self
                .frame(frame)?
                .landmarks
                .get(keypoint)
                .copied()
                .flatten();
            if found != Some(landmark) {
                error!(
                    "landmark {:?} observed by keypoint {} of frame {} which holds {:?}",
                    landmark, keypoint, frame.0, found
                );
                return Err(MapError::DanglingReference {
                    landmark,
                    frame,
                    keypoint,
                    found,
                });
            }
        }
        let removed = self
            .landmarks
            .remove(landmark)
            .ok_or(MapError::UnknownLandmark(landmark))?;
        for &Observation { frame, keypoint } in &removed.observations {
            self.frames[frame.0].landmarks[keypoint] = None;
        }
        Ok(removed)
    }

    /// The pixel distance between where `position` projects into the frame of `observation` and
    /// the keypoint observed there. A landmark at or behind the camera is infinitely far off.
    pub fn reprojection_error(
        &self,
        position: WorldPoint,
        observation: Observation,
    ) -> Result<f64, MapError> {
        let frame = self.frame(observation.frame)?;
        let observed = frame.keypoints.get(observation.keypoint).copied();
        let observed = observed.ok_or(MapError::KeypointOutOfRange {
            frame: observation.frame,
            keypoint: observation.keypoint,
            keypoints: frame.len(),
        })?;
        let projected = self.camera.intrinsics.project(frame.pose, position);
        Ok(projected.map_or(f64::INFINITY, |p| p.distance(&observed)))
    }

    /// Checks that every slot and every observation agree with each other.
    pub fn sanity_check(&self) -> Result<(), MapError> {
        for (landmark, data) in self.landmarks.iter() {
            if data.observations.is_empty() {
                error!("landmark {:?} has no observations", landmark);
                return Err(MapError::Unobserved(landmark));
            }
            for &Observation { frame, keypoint } in &data.observations {
                let frame_data = self.frame(frame)?;
                let found = frame_data.landmarks.get(keypoint).copied().flatten();
                if found != Some(landmark) {
                    error!(
                        "landmark {:?} observed by keypoint {} of frame {} which holds {:?}",
                        landmark, keypoint, frame.0, found
                    );
                    return Err(MapError::DanglingReference {
                        landmark,
                        frame,
                        keypoint,
                        found,
                    });
                }
            }
        }
        for (frame, frame_data) in self.frames() {
            if frame_data.landmarks.len() != frame_data.keypoints.len() {
                return Err(MapError::FeatureCountMismatch {
                    keypoints: frame_data.keypoints.len(),
                    descriptors: frame_data.landmarks.len(),
                });
            }
            for (keypoint, &slot) in frame_data.landmarks.iter().enumerate() {
                if let Some(landmark) = slot {
                    let observed = self
                        .landmark(landmark)?
                        .observations
                        .contains(&Observation::new(frame, keypoint));
                    if !observed {
                        error!(
                            "keypoint {} of frame {} holds {:?} which does not observe it",
                            keypoint, frame.0, landmark
                        );
                        return Err(MapError::DanglingReference {
                            landmark,
                            frame,
                            keypoint,
                            found: Some(landmark),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use monovo_core::nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Vector3};
    use monovo_core::Projective;

    fn camera() -> Camera {
        Camera {
            intrinsics: CameraIntrinsics::identity()
                .focal(100.0)
                .principal_point(Point2::new(50.0, 50.0)),
            width: 100,
            height: 100,
        }
    }

    fn features(count: usize) -> (Vec<Feature>, Vec<u8>) {
        let features = (0..count)
            .map(|ix| Feature {
                keypoint: KeyPoint(Point2::new(ix as f64, 0.0)),
                color: Some([ix as u8, 0, 0]),
            })
            .collect();
        (features, (0..count as u8).collect())
    }

    fn map_with_frames(sizes: &[usize]) -> WorldMap<u8> {
        let mut map = WorldMap::new(camera());
        for &size in sizes {
            let (features, descriptors) = features(size);
            map.register_frame(features, descriptors).unwrap();
        }
        map
    }

    fn point(x: f64, y: f64, z: f64) -> WorldPoint {
        WorldPoint::from_point(Point3::new(x, y, z))
    }

    #[test]
    fn registration() {
        let mut map = map_with_frames(&[3, 5]);
        assert_eq!(map.frame_count(), 2);
        assert_eq!(map.newest_frame(), Some(FrameId(1)));
        let frame = map.frame(FrameId(1)).unwrap();
        assert_eq!(frame.landmarks().len(), 5);
        assert!(frame.landmarks().iter().all(Option::is_none));
        assert_eq!(frame.pose(), WorldToCamera::identity());
        assert_eq!(frame.color(2), Some([2, 0, 0]));
        // Pixel (50, 50) is the principal point.
        assert_eq!(frame.normalized_keypoint(0).0, Point2::new(-0.5, -0.5));
        assert!(map.frame(FrameId(0)).unwrap().is_tracked());
        assert!(!frame.is_tracked());
        assert_eq!(map.last_tracked_frame(), Some(FrameId(0)));

        let (features, _) = features(2);
        assert_eq!(
            map.register_frame(features, vec![0]),
            Err(MapError::FeatureCountMismatch {
                keypoints: 2,
                descriptors: 1,
            })
        );
        assert_eq!(map.frame_count(), 2);
        assert_eq!(
            map.frame(FrameId(2)).err(),
            Some(MapError::UnknownFrame(FrameId(2)))
        );
    }

    #[test]
    fn attach() {
        let mut map = map_with_frames(&[3, 3]);
        let a = map.create_landmark(point(0.0, 0.0, 1.0), None);
        let b = map.create_landmark(point(0.0, 0.0, 2.0), None);
        map.attach_observation(a, FrameId(0), 1).unwrap();
        map.attach_observation(a, FrameId(1), 2).unwrap();
        // Attaching again to the same slot changes nothing.
        map.attach_observation(a, FrameId(1), 2).unwrap();
        assert_eq!(map.landmark(a).unwrap().observations().len(), 2);
        assert_eq!(
            map.attach_observation(b, FrameId(1), 2),
            Err(MapError::SlotOccupied {
                frame: FrameId(1),
                keypoint: 2,
                existing: a,
            })
        );
        assert_eq!(
            map.attach_observation(b, FrameId(1), 3),
            Err(MapError::KeypointOutOfRange {
                frame: FrameId(1),
                keypoint: 3,
                keypoints: 3,
            })
        );
        assert_eq!(
            map.attach_observation(b, FrameId(7), 0),
            Err(MapError::UnknownFrame(FrameId(7)))
        );
        assert!(map.landmark(b).unwrap().observations().is_empty());
        assert_eq!(map.landmark(a).unwrap().last_seen(), Some(FrameId(1)));
        assert_eq!(map.sanity_check(), Err(MapError::Unobserved(b)));
        map.attach_observation(b, FrameId(0), 0).unwrap();
        map.sanity_check().unwrap();
    }

    #[test]
    fn add_landmark_rolls_back() {
        let mut map = map_with_frames(&[3, 3]);
        let existing = map
            .add_landmark(
                point(0.0, 0.0, 1.0),
                None,
                [Observation::new(FrameId(1), 0)],
            )
            .unwrap();
        let result = map.add_landmark(
            point(0.0, 0.0, 2.0),
            None,
            [
                Observation::new(FrameId(0), 0),
                Observation::new(FrameId(1), 0),
            ],
        );
        assert!(matches!(result, Err(MapError::SlotOccupied { .. })));
        assert_eq!(map.landmark_count(), 1);
        assert_eq!(map.frame(FrameId(0)).unwrap().landmark(0), None);
        assert_eq!(map.frame(FrameId(1)).unwrap().landmark(0), Some(existing));
        assert!(matches!(
            map.add_landmark(point(0.0, 0.0, 2.0), None, Vec::new()),
            Err(MapError::Unobserved(_))
        ));
        assert_eq!(map.landmark_count(), 1);
        map.sanity_check().unwrap();
    }

    #[test]
    fn remove_clears_slots() {
        let mut map = map_with_frames(&[3, 3, 3]);
        let landmark = map
            .add_landmark(
                point(0.0, 0.0, 1.0),
                Some([1, 2, 3]),
                [
                    Observation::new(FrameId(0), 2),
                    Observation::new(FrameId(2), 1),
                ],
            )
            .unwrap();
        let keep = map
            .add_landmark(
                point(0.0, 0.0, 1.0),
                None,
                [Observation::new(FrameId(1), 1)],
            )
            .unwrap();
        let removed = map.remove_landmark(landmark).unwrap();
        assert_eq!(removed.color, Some([1, 2, 3]));
        assert!(map
            .frames()
            .flat_map(|(_, frame)| frame.landmarks())
            .all(|&slot| slot != Some(landmark)));
        assert_eq!(map.frame(FrameId(1)).unwrap().landmark(1), Some(keep));
        assert_eq!(
            map.remove_landmark(landmark).err(),
            Some(MapError::UnknownLandmark(landmark))
        );
        // A freshly created landmark never reuses the removed key.
        let fresh = map.create_landmark(point(0.0, 0.0, 1.0), None);
        assert_ne!(fresh, landmark);
        map.remove_landmark(fresh).unwrap();
        map.sanity_check().unwrap();
    }

    #[test]
    fn remove_detects_dangling_reference() {
        let mut map = map_with_frames(&[3]);
        let landmark = map
            .add_landmark(
                point(0.0, 0.0, 1.0),
                None,
                [Observation::new(FrameId(0), 0)],
            )
            .unwrap();
        map.frames[0].landmarks[0] = None;
        assert_eq!(
            map.remove_landmark(landmark).err(),
            Some(MapError::DanglingReference {
                landmark,
                frame: FrameId(0),
                keypoint: 0,
                found: None,
            })
        );
        // Nothing was removed.
        assert_eq!(map.landmark_count(), 1);
        assert!(map.sanity_check().is_err());
    }

    #[test]
    fn chain() {
        let mut map = map_with_frames(&[1, 1, 1]);
        let step = CameraToCamera(IsometryMatrix3::from_parts(
            Vector3::new(0.0, 0.0, -1.0).into(),
            Rotation3::from_euler_angles(0.0, 0.1, 0.0),
        ));
        let first = map.chain_pose(FrameId(1), step, FrameId(0)).unwrap();
        let second = map.chain_pose(FrameId(2), step, FrameId(1)).unwrap();
        assert_eq!(first, step.chain(WorldToCamera::identity()));
        approx::assert_relative_eq!(
            second.homogeneous(),
            step.homogeneous() * step.homogeneous(),
            epsilon = 1e-12
        );
        assert!(map.frame(FrameId(2)).unwrap().is_tracked());
        assert_eq!(map.last_tracked_frame(), Some(FrameId(2)));
        assert!(map.chain_pose(FrameId(3), step, FrameId(0)).is_err());
    }

    #[test]
    fn reprojection() {
        let mut map = map_with_frames(&[1]);
        map.frames[0].keypoints[0] = KeyPoint(Point2::new(53.0, 54.0));
        let obs = Observation::new(FrameId(0), 0);
        // Projects onto the principal point.
        let error = map.reprojection_error(point(0.0, 0.0, 2.0), obs).unwrap();
        approx::assert_relative_eq!(error, 5.0);
        assert_eq!(
            map.reprojection_error(point(0.0, 0.0, -2.0), obs).unwrap(),
            f64::INFINITY
        );
    }
}
