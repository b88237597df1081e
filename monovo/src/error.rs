use crate::{FrameId, LandmarkKey};
use thiserror::Error;

/// A frame could not be tracked. The frame is skipped and the session continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("found {found} correspondences, but at least {required} are required")]
    InsufficientCorrespondences { found: usize, required: usize },
    #[error("no relative pose could be estimated from {matches} correspondences")]
    DegenerateGeometry { matches: usize },
    #[error("{keypoints} keypoints were given with {descriptors} descriptors")]
    FeatureCountMismatch { keypoints: usize, descriptors: usize },
}

/// The frame and landmark graph has been broken. The session must end.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("frame {0:?} does not exist")]
    UnknownFrame(FrameId),
    #[error("landmark {0:?} does not exist")]
    UnknownLandmark(LandmarkKey),
    #[error("keypoint {keypoint} is out of range for frame {frame:?} with {keypoints} keypoints")]
    KeypointOutOfRange {
        frame: FrameId,
        keypoint: usize,
        keypoints: usize,
    },
    #[error("keypoint {keypoint} of frame {frame:?} already observes landmark {existing:?}")]
    SlotOccupied {
        frame: FrameId,
        keypoint: usize,
        existing: LandmarkKey,
    },
    #[error("frame {frame:?} keypoint {keypoint} holds {found:?}, not landmark {landmark:?}")]
    DanglingReference {
        landmark: LandmarkKey,
        frame: FrameId,
        keypoint: usize,
        found: Option<LandmarkKey>,
    },
    #[error("landmark {0:?} has no observations")]
    Unobserved(LandmarkKey),
    #[error("frame has {keypoints} keypoints but {descriptors} descriptors")]
    FeatureCountMismatch { keypoints: usize, descriptors: usize },
}

/// Why a triangulated candidate did not become a landmark. These only affect the one candidate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum TriangulationRejection {
    #[error("the triangulator produced no point")]
    Failed,
    #[error("the homogeneous scale is too close to zero")]
    Degenerate,
    #[error("the point is behind both cameras")]
    BehindCameras,
    #[error("the keypoint already observes a landmark")]
    AlreadyObserved,
}
