#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// How the single relative pose is chosen out of the decomposition of the fundamental matrix.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoseDisambiguation {
    /// Pick the rotation with a non-negative trace and take the translation straight from `U`.
    ///
    /// The sign of the translation is left to chance, so roughly half of the time the
    /// triangulated scene ends up behind the cameras.
    TraceHeuristic,
    /// Try every rotation and translation sign, keeping the pose that puts the most inliers in
    /// front of both cameras.
    Cheirality,
}

/// The settings for the tracking and mapping process.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone)]
pub struct VoSettings {
    /// The best descriptor distance must be below this fraction of the second best
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_match_ratio"))]
    pub match_ratio: f64,
    /// Matches must have a descriptor distance strictly below this
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_match_maximum_distance")
    )]
    pub match_maximum_distance: f64,
    /// Matches must move strictly less than this fraction of the image diagonal in pixels
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_match_maximum_displacement")
    )]
    pub match_maximum_displacement: f64,
    /// The minimum number of matches for a frame to be tracked
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_minimum_matches"))]
    pub minimum_matches: usize,
    /// The Sampson distance below which a match is an inlier of the relative pose
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_threshold")
    )]
    pub consensus_threshold: f64,
    /// The number of random minimal samples tried by the consensus
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_consensus_trials"))]
    pub consensus_trials: usize,
    /// The seed of the consensus sampler
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_consensus_seed"))]
    pub consensus_seed: u64,
    /// How the relative pose is picked out of the decomposition
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_pose_disambiguation")
    )]
    pub pose_disambiguation: PoseDisambiguation,
    /// Project the estimated matrix onto the essential manifold before decomposing it
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_recondition_essential")
    )]
    pub recondition_essential: bool,
    /// The epsilon used in singular value and eigen decompositions
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_svd_epsilon"))]
    pub svd_epsilon: f64,
    /// The maximum iterations of singular value and eigen decompositions
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_svd_max_iterations")
    )]
    pub svd_max_iterations: usize,
    /// A triangulated point is kept only if the `w` of its unit homogeneous vector is larger than
    /// this
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_triangulation_minimum_scale")
    )]
    pub triangulation_minimum_scale: f64,
    /// Culling runs once every this many tracked frames
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_culling_interval"))]
    pub culling_interval: usize,
    /// Landmarks with at most this many observations may be culled as stale
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_culling_maximum_observations")
    )]
    pub culling_maximum_observations: usize,
    /// Landmarks not seen for more than this many frames may be culled as stale
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_culling_maximum_frame_age")
    )]
    pub culling_maximum_frame_age: usize,
    /// Landmarks with a mean reprojection error above this (in pixels) are culled
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_culling_reprojection_threshold")
    )]
    pub culling_reprojection_threshold: f64,
    /// The number of snapshots that can be queued for the viewer before the oldest is dropped
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_snapshot_capacity"))]
    pub snapshot_capacity: usize,
}

impl Default for VoSettings {
    fn default() -> Self {
        Self {
            match_ratio: default_match_ratio(),
            match_maximum_distance: default_match_maximum_distance(),
            match_maximum_displacement: default_match_maximum_displacement(),
            minimum_matches: default_minimum_matches(),
            consensus_threshold: default_consensus_threshold(),
            consensus_trials: default_consensus_trials(),
            consensus_seed: default_consensus_seed(),
            pose_disambiguation: default_pose_disambiguation(),
            recondition_essential: default_recondition_essential(),
            svd_epsilon: default_svd_epsilon(),
            svd_max_iterations: default_svd_max_iterations(),
            triangulation_minimum_scale: default_triangulation_minimum_scale(),
            culling_interval: default_culling_interval(),
            culling_maximum_observations: default_culling_maximum_observations(),
            culling_maximum_frame_age: default_culling_maximum_frame_age(),
            culling_reprojection_threshold: default_culling_reprojection_threshold(),
            snapshot_capacity: default_snapshot_capacity(),
        }
    }
}

fn default_match_ratio() -> f64 {
    0.75
}

fn default_match_maximum_distance() -> f64 {
    32.0
}

fn default_match_maximum_displacement() -> f64 {
    0.1
}

fn default_minimum_matches() -> usize {
    8
}

fn default_consensus_threshold() -> f64 {
    0.001
}

fn default_consensus_trials() -> usize {
    100
}

fn default_consensus_seed() -> u64 {
    5
}

fn default_pose_disambiguation() -> PoseDisambiguation {
    PoseDisambiguation::Cheirality
}

fn default_recondition_essential() -> bool {
    false
}

fn default_svd_epsilon() -> f64 {
    1e-12
}

fn default_svd_max_iterations() -> usize {
    1000
}

fn default_triangulation_minimum_scale() -> f64 {
    0.005
}

fn default_culling_interval() -> usize {
    1
}

fn default_culling_maximum_observations() -> usize {
    4
}

fn default_culling_maximum_frame_age() -> usize {
    7
}

fn default_culling_reprojection_threshold() -> f64 {
    10.0
}

fn default_snapshot_capacity() -> usize {
    4
}
