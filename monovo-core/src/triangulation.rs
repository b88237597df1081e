use crate::{Bearing, FeatureMatch, WorldPoint, WorldToCamera};

/// Recovers homogeneous 3d points from their observations in two posed cameras.
///
/// Implementations return the raw homogeneous solution. They must not normalize `w` or apply a
/// cheirality test, because callers judge degeneracy (`|w|` close to zero) and depth themselves.
/// `None` means the solver itself failed, e.g. it did not converge or produced non-finite output.
pub trait Triangulator {
    fn triangulate<A: Bearing, B: Bearing>(
        &self,
        pose_a: WorldToCamera,
        a: &A,
        pose_b: WorldToCamera,
        b: &B,
    ) -> Option<WorldPoint>;

    /// Triangulates every match, preserving order.
    fn triangulate_matches<P, I>(
        &self,
        pose_a: WorldToCamera,
        pose_b: WorldToCamera,
        matches: I,
    ) -> Vec<Option<WorldPoint>>
    where
        P: Bearing,
        I: IntoIterator<Item = FeatureMatch<P>>,
    {
        matches
            .into_iter()
            .map(|FeatureMatch(a, b)| self.triangulate(pose_a, &a, pose_b, &b))
            .collect()
    }
}
