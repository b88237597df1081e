use crate::{Frame, TrackingError, VoSettings};
use log::*;
use monovo_core::{FeatureMatch, KeyPoint};
use space::Metric;

/// Finds frame to frame correspondences by descriptor similarity.
///
/// For every feature of frame `a`, the two nearest descriptors of frame `b` are found by linear
/// search. The nearest becomes a match only if all of these hold:
///
/// * it is closer than `ratio` times the second nearest
/// * its descriptor distance is strictly below `maximum_distance`
/// * the keypoints are strictly less than `maximum_displacement` pixels apart
/// * its `b` feature has not been taken by an earlier feature of `a`
///
/// The result is injective in both directions.
#[derive(Debug, Clone)]
pub struct Matcher<M> {
    metric: M,
    ratio: f64,
    maximum_distance: f64,
    maximum_displacement: f64,
    minimum_matches: usize,
}

impl<M> Matcher<M> {
    /// Creates a matcher for images whose diagonal is `diagonal` pixels long.
    pub fn new(metric: M, settings: &VoSettings, diagonal: f64) -> Self {
        Self {
            metric,
            ratio: settings.match_ratio,
            maximum_distance: settings.match_maximum_distance,
            maximum_displacement: settings.match_maximum_displacement * diagonal,
            minimum_matches: settings.minimum_matches,
        }
    }

    /// The maximum displacement of a match in pixels.
    pub fn maximum_displacement(&self) -> f64 {
        self.maximum_displacement
    }

    /// Matches the features of two frames. See [`Matcher::match_features`].
    pub fn match_frames<D>(
        &self,
        a: &Frame<D>,
        b: &Frame<D>,
    ) -> Result<Vec<FeatureMatch<usize>>, TrackingError>
    where
        M: Metric<D>,
        M::Unit: Into<f64>,
    {
        self.match_features(
            a.keypoints(),
            a.descriptors(),
            b.keypoints(),
            b.descriptors(),
        )
    }

    /// Matches keypoints `a` against keypoints `b`, each index aligned with its descriptors.
    ///
    /// Returns index pairs `FeatureMatch(a_ix, b_ix)`, or
    /// [`TrackingError::InsufficientCorrespondences`] if fewer than the minimum survive. Each
    /// side must have as many keypoints as descriptors, otherwise
    /// [`TrackingError::FeatureCountMismatch`] is returned.
    pub fn match_features<D>(
        &self,
        a_keypoints: &[KeyPoint],
        a_descriptors: &[D],
        b_keypoints: &[KeyPoint],
        b_descriptors: &[D],
    ) -> Result<Vec<FeatureMatch<usize>>, TrackingError>
    where
        M: Metric<D>,
        M::Unit: Into<f64>,
    {
        for (keypoints, descriptors) in [
            (a_keypoints.len(), a_descriptors.len()),
            (b_keypoints.len(), b_descriptors.len()),
        ] {
            if keypoints != descriptors {
                return Err(TrackingError::FeatureCountMismatch {
                    keypoints,
                    descriptors,
                });
            }
        }

        let mut taken = vec![false; b_descriptors.len()];
        let mut matches = vec![];
        let mut rejected_ratio = 0;
        let mut rejected_distance = 0;
        let mut rejected_displacement = 0;
        let mut rejected_taken = 0;

        for (a_ix, (a_keypoint, a_descriptor)) in a_keypoints.iter().zip(a_descriptors).enumerate()
        {
            let (b_ix, best, second) = match self.two_nearest(a_descriptor, b_descriptors) {
                Some(nearest) => nearest,
                None => break,
            };
            if !(best < self.ratio * second) {
                rejected_ratio += 1;
                continue;
            }
            if !(best < self.maximum_distance) {
                rejected_distance += 1;
                continue;
            }
            if !(a_keypoint.distance(&b_keypoints[b_ix]) < self.maximum_displacement) {
                rejected_displacement += 1;
                continue;
            }
            if taken[b_ix] {
                rejected_taken += 1;
                continue;
            }
            taken[b_ix] = true;
            matches.push(FeatureMatch(a_ix, b_ix));
        }

        debug!(
            "matched {} of {} features, rejected {} by ratio, {} by distance, {} by displacement and {} as duplicates",
            matches.len(),
            a_descriptors.len(),
            rejected_ratio,
            rejected_distance,
            rejected_displacement,
            rejected_taken
        );

        if matches.len() < self.minimum_matches {
            return Err(TrackingError::InsufficientCorrespondences {
                found: matches.len(),
                required: self.minimum_matches,
            });
        }
        Ok(matches)
    }

    /// Returns the index of the nearest candidate and the distances of the nearest and second
    /// nearest. Fewer than two candidates produce nothing, since the ratio test is impossible.
    fn two_nearest<D>(&self, query: &D, candidates: &[D]) -> Option<(usize, f64, f64)>
    where
        M: Metric<D>,
        M::Unit: Into<f64>,
    {
        if candidates.len() < 2 {
            return None;
        }
        let mut best = (0, f64::INFINITY);
        let mut second = f64::INFINITY;
        for (ix, candidate) in candidates.iter().enumerate() {
            let distance: f64 = self.metric.distance(query, candidate).into();
            if distance < best.1 {
                second = best.1;
                best = (ix, distance);
            } else if distance < second {
                second = distance;
            }
        }
        Some((best.0, best.1, second))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bitarray::{BitArray, Hamming};
    use monovo_core::nalgebra::Point2;
    use quickcheck_macros::quickcheck;

    fn matcher() -> Matcher<Hamming> {
        Matcher::new(Hamming, &VoSettings::default(), 800.0)
    }

    fn descriptor(fill: u8, flipped_bits: usize) -> BitArray<4> {
        let mut bytes = [fill; 4];
        for bit in 0..flipped_bits {
            bytes[bit / 8] ^= 1 << (bit % 8);
        }
        BitArray::new(bytes)
    }

    fn at(x: f64, y: f64) -> KeyPoint {
        KeyPoint(Point2::new(x, y))
    }

    #[test]
    fn gates() {
        let a_descriptors = vec![
            descriptor(0x00, 0),
            descriptor(0x0f, 0),
            descriptor(0xff, 0),
            descriptor(0x33, 0),
        ];
        let b_descriptors = vec![
            // Exact match of feature 0 but moved too far.
            descriptor(0x00, 0),
            // Feature 1 matches, but so does the decoy right after it.
            descriptor(0x0f, 1),
            descriptor(0x0f, 1),
            // Feature 2 matches cleanly.
            descriptor(0xff, 0),
            // Feature 3 matches cleanly.
            descriptor(0x33, 1),
        ];
        let a_keypoints = vec![at(0.0, 0.0), at(10.0, 10.0), at(20.0, 20.0), at(30.0, 30.0)];
        let b_keypoints = vec![
            at(80.0, 0.0),
            at(10.0, 10.0),
            at(10.0, 10.0),
            at(25.0, 20.0),
            at(30.0, 30.0),
        ];
        let matcher = Matcher {
            minimum_matches: 2,
            ..matcher()
        };
        let matches = matcher
            .match_features(&a_keypoints, &a_descriptors, &b_keypoints, &b_descriptors)
            .unwrap();
        assert_eq!(matches, vec![FeatureMatch(2, 3), FeatureMatch(3, 4)]);
    }

    #[test]
    fn displacement_exactly_at_limit_is_rejected() {
        let a_descriptors = vec![descriptor(0x00, 0)];
        let b_descriptors = vec![descriptor(0x00, 0), descriptor(0xff, 0)];
        let matcher = Matcher {
            minimum_matches: 1,
            ..matcher()
        };
        assert_eq!(matcher.maximum_displacement(), 80.0);
        let result = matcher.match_features(
            &[at(0.0, 0.0)],
            &a_descriptors,
            &[at(80.0, 0.0), at(0.0, 0.0)],
            &b_descriptors,
        );
        assert_eq!(
            result,
            Err(TrackingError::InsufficientCorrespondences {
                found: 0,
                required: 1,
            })
        );
        let result = matcher.match_features(
            &[at(0.0, 0.0)],
            &a_descriptors,
            &[at(79.9, 0.0), at(0.0, 0.0)],
            &b_descriptors,
        );
        assert_eq!(result, Ok(vec![FeatureMatch(0, 0)]));
    }

    #[test]
    fn distance_exactly_at_limit_is_rejected() {
        let matcher = Matcher {
            minimum_matches: 1,
            maximum_distance: 3.0,
            ..matcher()
        };
        let keypoints = [at(0.0, 0.0), at(0.0, 0.0)];
        let b_descriptors = vec![descriptor(0x00, 0), descriptor(0xff, 0)];
        let exactly = matcher.match_features(
            &keypoints[..1],
            &[descriptor(0x00, 3)],
            &keypoints,
            &b_descriptors,
        );
        assert!(exactly.is_err());
        let below = matcher.match_features(
            &keypoints[..1],
            &[descriptor(0x00, 2)],
            &keypoints,
            &b_descriptors,
        );
        assert_eq!(below, Ok(vec![FeatureMatch(0, 0)]));
    }

    #[test]
    fn too_few_candidates() {
        let result = matcher().match_features(
            &[at(0.0, 0.0)],
            &[descriptor(0x00, 0)],
            &[at(0.0, 0.0)],
            &[descriptor(0x00, 0)],
        );
        assert_eq!(
            result,
            Err(TrackingError::InsufficientCorrespondences {
                found: 0,
                required: 8,
            })
        );
    }

    #[test]
    fn mismatched_lengths_are_reported() {
        let descriptors = vec![descriptor(0x00, 0), descriptor(0xff, 0)];
        let keypoints = [at(0.0, 0.0), at(1.0, 1.0)];
        assert_eq!(
            matcher().match_features(&keypoints[..1], &descriptors, &keypoints, &descriptors),
            Err(TrackingError::FeatureCountMismatch {
                keypoints: 1,
                descriptors: 2,
            })
        );
        assert_eq!(
            matcher().match_features(&keypoints, &descriptors, &keypoints[..1], &descriptors),
            Err(TrackingError::FeatureCountMismatch {
                keypoints: 1,
                descriptors: 2,
            })
        );
    }

    #[quickcheck]
    fn matches_are_injective(a: Vec<u8>, b: Vec<u8>) -> bool {
        let to_descriptors = |bytes: &[u8]| -> Vec<BitArray<1>> {
            bytes.iter().map(|&n| BitArray::new([n])).collect()
        };
        let a_keypoints = vec![at(0.0, 0.0); a.len()];
        let b_keypoints = vec![at(0.0, 0.0); b.len()];
        let matcher = Matcher {
            minimum_matches: 0,
            ..matcher()
        };
        let matches = matcher
            .match_features(
                &a_keypoints,
                &to_descriptors(&a),
                &b_keypoints,
                &to_descriptors(&b),
            )
            .unwrap();
        let mut a_seen = vec![false; a.len()];
        let mut b_seen = vec![false; b.len()];
        matches.iter().all(|&FeatureMatch(a_ix, b_ix)| {
            let fresh_a = !std::mem::replace(&mut a_seen[a_ix], true);
            let fresh_b = !std::mem::replace(&mut b_seen[b_ix], true);
            fresh_a && fresh_b
        })
    }

    #[quickcheck]
    fn success_has_minimum_matches(a: Vec<u8>, b: Vec<u8>) -> bool {
        let to_descriptors = |bytes: &[u8]| -> Vec<BitArray<1>> {
            bytes.iter().map(|&n| BitArray::new([n])).collect()
        };
        let a_keypoints = vec![at(0.0, 0.0); a.len()];
        let b_keypoints = vec![at(0.0, 0.0); b.len()];
        match matcher().match_features(
            &a_keypoints,
            &to_descriptors(&a),
            &b_keypoints,
            &to_descriptors(&b),
        ) {
            Ok(matches) => matches.len() >= 8,
            Err(TrackingError::InsufficientCorrespondences { found, required }) => {
                found < required && required == 8
            }
            Err(_) => false,
        }
    }
}
