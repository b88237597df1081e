use akaze::Akaze;
use bitarray::{BitArray, Hamming};
use image::RgbImage;
use log::*;
use monovo::export::{export, ExportSettings};
use monovo::monovo_core::nalgebra::{Point2, Vector2};
use monovo::monovo_core::KeyPoint;
use monovo::monovo_pinhole::CameraIntrinsics;
use monovo::{
    snapshot_channel, Camera, Feature, FrameOutcome, MapSnapshot, SnapshotReceiver, Tracker,
    VoSettings,
};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(name = "monovo-sandbox", about = "Runs monocular visual odometry over images")]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `monovo::VoSettings`. Missing fields take their defaults.
    #[structopt(short, long, default_value = "monovo-settings.json")]
    settings: PathBuf,
    /// The x focal length
    #[structopt(long, default_value = "984.2439")]
    x_focal: f64,
    /// The y focal length
    #[structopt(long, default_value = "980.8141")]
    y_focal: f64,
    /// The x optical center coordinate
    #[structopt(long, default_value = "690.0")]
    x_center: f64,
    /// The y optical center coordinate
    #[structopt(long, default_value = "233.1966")]
    y_center: f64,
    /// The skew
    #[structopt(long, default_value = "0.0")]
    skew: f64,
    /// The AKAZE detector response threshold
    #[structopt(long, default_value = "0.001")]
    akaze_threshold: f64,
    /// Request a capture of the map every this many snapshots, 0 to never capture
    #[structopt(long, default_value = "0")]
    capture_every: usize,
    /// Directory where captured maps are written as PLY files
    #[structopt(long, default_value = ".")]
    capture_directory: PathBuf,
    /// Output PLY file to deposit the final point cloud
    #[structopt(short, long)]
    output: Option<PathBuf>,
    /// List of image files
    ///
    /// Default values are for Kitti 2011_09_26 camera 0
    #[structopt(parse(from_os_str))]
    images: Vec<PathBuf>,
}

type Descriptor = BitArray<64>;

fn load_settings(path: &Path) -> VoSettings {
    let settings = std::fs::File::open(path)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded settings from {}", path.display());
    } else {
        info!("used default settings");
    }
    settings.unwrap_or_default()
}

/// Extracts AKAZE features, coloring each with the pixel under it.
fn extract(akaze: &Akaze, path: &Path) -> image::ImageResult<(Vec<Feature>, Vec<Descriptor>)> {
    let image = image::open(path)?;
    let rgb = image.to_rgb8();
    let (keypoints, descriptors) = akaze.extract(&image);
    let features = keypoints
        .iter()
        .map(|kp| {
            let (x, y) = kp.point;
            Feature {
                keypoint: KeyPoint(Point2::new(f64::from(x), f64::from(y))),
                color: sample_color(&rgb, x, y),
            }
        })
        .collect();
    Ok((features, descriptors))
}

fn sample_color(image: &RgbImage, x: f32, y: f32) -> Option<[u8; 3]> {
    let (x, y) = (x.round(), y.round());
    if x < 0.0 || y < 0.0 {
        return None;
    }
    let (x, y) = (x as u32, y as u32);
    (x < image.width() && y < image.height()).then(|| image.get_pixel(x, y).0)
}

fn write_ply(path: &Path, snapshot: &MapSnapshot) {
    let result = std::fs::File::create(path)
        .map(BufWriter::new)
        .and_then(|writer| export(writer, snapshot, ExportSettings::default()));
    match result {
        Ok(bytes) => info!("wrote {} bytes to {}", bytes, path.display()),
        Err(e) => error!("unable to write {}: {}", path.display(), e),
    }
}

/// Follows the map from its own thread and asks for captures at a fixed interval.
fn view(mut snapshots: SnapshotReceiver, capture_every: usize) {
    let mut received = 0usize;
    while snapshots.is_connected() {
        if let Some(snapshot) = snapshots.wait_next(Duration::from_millis(100)) {
            received += 1;
            debug!(
                "viewer sees {} landmarks and {} cameras",
                snapshot.points.len(),
                snapshot.camera_track.len()
            );
            if capture_every != 0 && received % capture_every == 0 {
                snapshots.request_capture();
            }
        }
    }
    if let Some(snapshot) = snapshots.latest() {
        info!(
            "viewer finished with {} landmarks and {} cameras",
            snapshot.points.len(),
            snapshot.camera_track.len()
        );
    }
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    if opt.images.is_empty() {
        error!("no images were given");
        exit(1);
    }

    let settings = load_settings(&opt.settings);
    let intrinsics = CameraIntrinsics::identity()
        .focals(Vector2::new(opt.x_focal, opt.y_focal))
        .principal_point(Point2::new(opt.x_center, opt.y_center))
        .skew(opt.skew);
    let akaze = Akaze::new(opt.akaze_threshold);

    let mut tracker: Option<Tracker<Descriptor, Hamming, _, _>> = None;
    let mut viewer = None;
    for path in &opt.images {
        let (features, descriptors) = match extract(&akaze, path) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        info!(
            "extracted {} features from {}",
            features.len(),
            path.display()
        );

        // The camera size is only known once the first image is read.
        let tracker = tracker.get_or_insert_with(|| {
            let (width, height) = image::image_dimensions(path).unwrap_or_default();
            let camera = Camera {
                intrinsics,
                width,
                height,
            };
            let mut tracker = Tracker::from_settings(camera, Hamming, settings);
            let (tx, rx) = snapshot_channel(settings.snapshot_capacity);
            tracker.attach_snapshots(tx);
            let capture_every = opt.capture_every;
            viewer = Some(thread::spawn(move || view(rx, capture_every)));
            tracker
        });

        match tracker.process_frame(features, descriptors) {
            Ok(FrameOutcome::Tracked(summary)) => {
                let capture = tracker
                    .snapshots()
                    .map_or(false, |snapshots| snapshots.take_capture_request());
                if capture {
                    let path = opt
                        .capture_directory
                        .join(format!("capture-{}.ply", summary.frame.0));
                    write_ply(&path, &tracker.map().snapshot());
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("the map is inconsistent, ending the session: {}", e);
                exit(2);
            }
        }
    }

    let map = tracker.map(Tracker::into_map);
    if let Some(viewer) = viewer {
        if viewer.join().is_err() {
            warn!("the viewer thread panicked");
        }
    }
    if let (Some(map), Some(path)) = (map, opt.output) {
        info!("exporting the map");
        write_ply(&path, &map.snapshot());
    }
}
