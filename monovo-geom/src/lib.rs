//! Computational geometry for monovo.
//!
//! ## Triangulation
//!
//! In this problem we know the pose of two cameras and the bearing of the same feature
//! observed in each camera frame. We want to find the point of intersection.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the normalized keypoint on camera A
//! - `b` the normalized keypoint on camera B
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```

pub mod triangulation;

pub use triangulation::LinearEigenTriangulator;
