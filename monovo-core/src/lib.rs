//! # monovo core
//!
//! Common geometric types used by every crate in the monovo workspace: keypoints in pixel
//! space, bearings, homogeneous 3d points, the three flavours of rigid pose, and the
//! [`Triangulator`] interface that the tracker consumes.
//!
//! `nalgebra` and `sample_consensus` are re-exported so that downstream crates agree on the
//! exact versions in use.
//!
//! ## Conventions
//!
//! Camera space has its origin at the optical center. Positive `z` points forwards, positive `y`
//! points down and positive `x` points right. A [`WorldToCamera`] pose maps a [`WorldPoint`]
//! into a [`CameraPoint`], so the pose of every frame in a map is the transform that takes the
//! world into that camera.
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!      O
//! ```

mod bearing;
mod camera;
mod keypoint;
mod matches;
mod point;
mod pose;
mod triangulation;

pub use bearing::*;
pub use camera::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
pub use triangulation::*;
