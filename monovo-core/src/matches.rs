/// A pair of corresponding items from two frames.
///
/// With `P = usize` this is a pair of keypoint indices `(a, b)`, where `a` indexes the first
/// frame and `b` the second. With a calibrated keypoint type it is the data consumed by the
/// epipolar estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureMatch<P>(pub P, pub P);
