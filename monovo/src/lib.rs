//! # monovo
//!
//! The tracking and mapping core of a monocular visual odometry front end.
//!
//! Frames arrive as keypoints with index aligned descriptors. Each one goes through:
//!
//! 1. [`Matcher`] finds correspondences with the last tracked frame
//! 2. [`RelativePoseEstimator`] fits a fundamental matrix by consensus and decomposes it
//! 3. [`WorldMap::chain_pose`] places the frame in the world
//! 4. existing landmarks are extended and new ones are triangulated
//! 5. [`CullingPolicy`] drops stale and inaccurate landmarks
//! 6. a [`MapSnapshot`] is handed to the viewer through a [`SnapshotSender`]
//!
//! [`Tracker`] runs all of this. A frame that cannot be tracked is skipped with a
//! [`TrackingError`], while a [`MapError`] means the map is broken and the session must end.
//!
//! ```text
//!   reference           current
//!   +-------+          +-------+
//!   | a   . |  match   |  . b  |
//!   |  .    | -------> |    .  |
//!   +-------+          +-------+
//!       \                 /
//!        \   triangulate /
//!         \             /
//!          `--> [ X ] <'
//! ```

mod consensus;
mod culling;
mod error;
pub mod export;
mod map;
mod matching;
mod relative_pose;
mod settings;
mod snapshot;
mod tracker;

pub use consensus::*;
pub use culling::*;
pub use error::*;
pub use map::*;
pub use matching::*;
pub use relative_pose::*;
pub use settings::*;
pub use snapshot::*;
pub use tracker::*;

pub use monovo_core;
pub use monovo_pinhole;
