use crate::WorldMap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::*;
use monovo_core::nalgebra::{Matrix4, Point3};
use monovo_core::{Pose, Projective};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The color of landmarks that were created without one.
const DEFAULT_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

/// A read-only copy of the map state that a viewer can draw without touching the map.
///
/// Only tracked frames have a pose, so skipped frames do not appear in a snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapSnapshot {
    /// World to camera transforms of every tracked frame except the current one
    pub poses: Vec<Matrix4<f64>>,
    /// Landmark positions
    pub points: Vec<Point3<f64>>,
    /// RGB colors in `[0, 1]`, one per point
    pub colors: Vec<[f32; 3]>,
    /// The optical center of every tracked frame, oldest first
    pub camera_track: Vec<Point3<f64>>,
    /// World to camera transform of the current frame
    pub current_pose: Option<Matrix4<f64>>,
}

impl<D> WorldMap<D> {
    /// Copies the current poses and landmarks out of the map.
    pub fn snapshot(&self) -> MapSnapshot {
        let mut tracked: Vec<_> = self
            .frames()
            .filter(|(_, frame)| frame.is_tracked())
            .map(|(_, frame)| frame.pose())
            .collect();
        let camera_track = tracked.iter().map(|pose| pose.optical_center()).collect();
        let current_pose = tracked.pop().map(Pose::homogeneous);
        let (points, colors) = self
            .landmarks()
            .filter_map(|(_, landmark)| {
                let color = landmark
                    .color
                    .map_or(DEFAULT_COLOR, |c| c.map(|n| f32::from(n) / 255.0));
                Some((landmark.position.point()?, color))
            })
            .unzip();
        MapSnapshot {
            poses: tracked.into_iter().map(Pose::homogeneous).collect(),
            points,
            colors,
            camera_track,
            current_pose,
        }
    }
}

struct Shared {
    capture_requested: AtomicBool,
    viewer_alive: AtomicBool,
    tracker_alive: AtomicBool,
}

/// Creates a bounded snapshot channel holding up to `capacity` undelivered snapshots.
pub fn snapshot_channel(capacity: usize) -> (SnapshotSender, SnapshotReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let shared = Arc::new(Shared {
        capture_requested: AtomicBool::new(false),
        viewer_alive: AtomicBool::new(true),
        tracker_alive: AtomicBool::new(true),
    });
    (
        SnapshotSender {
            tx,
            oldest: rx.clone(),
            shared: shared.clone(),
        },
        SnapshotReceiver {
            rx,
            latest: None,
            shared,
        },
    )
}

/// The tracking side of a snapshot channel.
pub struct SnapshotSender {
    tx: Sender<Arc<MapSnapshot>>,
    /// Used to evict the oldest queued snapshot when the channel is full
    oldest: Receiver<Arc<MapSnapshot>>,
    shared: Arc<Shared>,
}

impl SnapshotSender {
    /// Queues a snapshot without ever blocking. If the queue is full, the oldest queued snapshot
    /// is dropped to make room.
    ///
    /// Returns `false` if the receiver is gone, in which case nothing is queued.
    pub fn publish(&self, snapshot: MapSnapshot) -> bool {
        if !self.is_connected() {
            return false;
        }
        let mut snapshot = Arc::new(snapshot);
        loop {
            match self.tx.try_send(snapshot) {
                Ok(()) => return true,
                Err(TrySendError::Full(returned)) => {
                    if self.oldest.try_recv().is_ok() {
                        trace!("dropped the oldest undelivered snapshot");
                    }
                    snapshot = returned;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Whether the receiving side still exists.
    pub fn is_connected(&self) -> bool {
        self.shared.viewer_alive.load(Ordering::Acquire)
    }

    /// Returns `true` once for every time the viewer requested a capture.
    pub fn take_capture_request(&self) -> bool {
        self.shared.capture_requested.swap(false, Ordering::AcqRel)
    }
}

impl Drop for SnapshotSender {
    fn drop(&mut self) {
        self.shared.tracker_alive.store(false, Ordering::Release);
    }
}

/// The viewer side of a snapshot channel.
pub struct SnapshotReceiver {
    rx: Receiver<Arc<MapSnapshot>>,
    latest: Option<Arc<MapSnapshot>>,
    shared: Arc<Shared>,
}

impl SnapshotReceiver {
    /// The newest snapshot received so far, skipping over any older ones still queued.
    ///
    /// When nothing new has arrived, the previous snapshot is returned again.
    pub fn latest(&mut self) -> Option<Arc<MapSnapshot>> {
        for snapshot in self.rx.try_iter() {
            self.latest = Some(snapshot);
        }
        self.latest.clone()
    }

    /// Waits up to `timeout` for a snapshot newer than the last one returned.
    ///
    /// Returns `None` if none arrived in time or the sender is gone.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<Arc<MapSnapshot>> {
        match self.rx.recv_timeout(timeout) {
            Ok(snapshot) => {
                self.latest = Some(snapshot);
                self.latest()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Whether snapshots can still arrive.
    pub fn is_connected(&self) -> bool {
        self.shared.tracker_alive.load(Ordering::Acquire) || !self.rx.is_empty()
    }

    /// Asks the tracking side to save the current map.
    pub fn request_capture(&self) {
        self.shared.capture_requested.store(true, Ordering::Release);
    }
}

impl Drop for SnapshotReceiver {
    fn drop(&mut self) {
        self.shared.viewer_alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Camera, Feature, FrameId, Observation};
    use monovo_core::nalgebra::{IsometryMatrix3, Point2, Rotation3, Vector3, Vector4};
    use monovo_core::{CameraToCamera, KeyPoint, WorldPoint, WorldToCamera};
    use monovo_pinhole::CameraIntrinsics;

    fn numbered(n: usize) -> MapSnapshot {
        MapSnapshot {
            points: vec![Point3::new(n as f64, 0.0, 0.0)],
            ..MapSnapshot::default()
        }
    }

    fn number(snapshot: &MapSnapshot) -> usize {
        snapshot.points[0].x as usize
    }

    #[test]
    fn full_channel_drops_oldest() {
        let (tx, mut rx) = snapshot_channel(2);
        for n in 0..5 {
            assert!(tx.publish(numbered(n)));
        }
        let queued: Vec<usize> = rx.rx.try_iter().map(|s| number(&s)).collect();
        assert_eq!(queued, vec![3, 4]);
        assert!(rx.latest().is_none());
    }

    #[test]
    fn latest_is_kept() {
        let (tx, mut rx) = snapshot_channel(4);
        assert!(rx.latest().is_none());
        tx.publish(numbered(1));
        tx.publish(numbered(2));
        assert_eq!(number(&rx.latest().unwrap()), 2);
        // Nothing new arrived, so the same snapshot comes back.
        assert_eq!(number(&rx.latest().unwrap()), 2);
        assert!(rx.wait_next(Duration::from_millis(1)).is_none());
        tx.publish(numbered(3));
        assert_eq!(number(&rx.wait_next(Duration::from_secs(1)).unwrap()), 3);
    }

    #[test]
    fn zero_capacity_still_holds_one() {
        let (tx, mut rx) = snapshot_channel(0);
        tx.publish(numbered(1));
        tx.publish(numbered(2));
        assert_eq!(number(&rx.latest().unwrap()), 2);
    }

    #[test]
    fn capture_requests() {
        let (tx, rx) = snapshot_channel(1);
        assert!(!tx.take_capture_request());
        rx.request_capture();
        assert!(tx.take_capture_request());
        assert!(!tx.take_capture_request());
    }

    #[test]
    fn disconnection() {
        let (tx, rx) = snapshot_channel(1);
        assert!(tx.is_connected());
        assert!(rx.is_connected());
        drop(rx);
        assert!(!tx.is_connected());
        assert!(!tx.publish(numbered(0)));

        let (tx, rx) = snapshot_channel(1);
        tx.publish(numbered(0));
        drop(tx);
        // The queued snapshot can still be read.
        assert!(rx.is_connected());
        let mut rx = rx;
        assert!(rx.latest().is_some());
        assert!(!rx.is_connected());
    }

    #[test]
    fn snapshot_of_map() {
        let mut map = WorldMap::new(Camera {
            intrinsics: CameraIntrinsics::identity(),
            width: 10,
            height: 10,
        });
        for _ in 0..3 {
            map.register_frame(vec![Feature::from(KeyPoint(Point2::origin()))], vec![()])
                .unwrap();
        }
        let step = CameraToCamera(IsometryMatrix3::from_parts(
            Vector3::new(0.0, 0.0, -1.0).into(),
            Rotation3::identity(),
        ));
        map.chain_pose(FrameId(2), step, FrameId(0)).unwrap();
        map.add_landmark(
            WorldPoint(Vector4::new(2.0, 4.0, 6.0, 2.0)),
            Some([255, 0, 51]),
            [Observation::new(FrameId(0), 0)],
        )
        .unwrap();
        map.add_landmark(
            WorldPoint::from_point(Point3::new(0.0, 0.0, 5.0)),
            None,
            [Observation::new(FrameId(2), 0)],
        )
        .unwrap();

        let snapshot = map.snapshot();
        // Frame 1 was never tracked.
        assert_eq!(
            snapshot.poses,
            vec![WorldToCamera::identity().homogeneous()]
        );
        assert_eq!(snapshot.current_pose, Some(step.homogeneous()));
        assert_eq!(
            snapshot.camera_track,
            vec![Point3::origin(), Point3::new(0.0, 0.0, 1.0)]
        );
        assert_eq!(
            snapshot.points,
            vec![Point3::new(1.0, 2.0, 3.0), Point3::new(0.0, 0.0, 5.0)]
        );
        assert_eq!(snapshot.colors, vec![[1.0, 0.0, 0.2], DEFAULT_COLOR]);
    }
}
