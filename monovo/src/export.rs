use crate::MapSnapshot;
use monovo_core::nalgebra::{Matrix4, Point3, Vector3};
use ply_rs::{
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use std::io::{self, Write};

const CAMERA_COLOR: [u8; 3] = [255, 0, 255];
const CURRENT_CAMERA_COLOR: [u8; 3] = [0, 255, 0];

/// How cameras are drawn in an exported point cloud.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ExportSettings {
    /// Emit triangles so that cameras show up as pyramids instead of five loose vertices
    pub camera_faces: bool,
    /// The distance from the optical center to the base of a camera pyramid
    pub camera_size: f64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            camera_faces: true,
            camera_size: 0.05,
        }
    }
}

/// A camera placed in the world, pointing along `forward_direction`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ExportCamera {
    pub optical_center: Point3<f64>,
    pub up_direction: Vector3<f64>,
    pub forward_direction: Vector3<f64>,
}

impl ExportCamera {
    /// Places the camera of a world to camera transform.
    pub fn from_world_to_camera(pose: &Matrix4<f64>) -> Self {
        let rotation = pose.fixed_slice::<3, 3>(0, 0);
        let translation = pose.fixed_slice::<3, 1>(0, 3);
        // The camera axes in the world are the rows of the rotation.
        Self {
            optical_center: Point3::from(-(rotation.transpose() * translation)),
            up_direction: -rotation.row(1).transpose(),
            forward_direction: rotation.row(2).transpose(),
        }
    }
}

fn unit_to_byte(n: f32) -> u8 {
    (n.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Writes the landmarks and cameras of a snapshot as an ASCII PLY file.
///
/// Returns the number of bytes written.
pub fn export(
    mut writer: impl Write,
    snapshot: &MapSnapshot,
    settings: ExportSettings,
) -> io::Result<usize> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push("Exported from monovo".to_string());

    // Vertices are shared by landmarks and camera pyramids.
    let mut point_element = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        let p = PropertyDef::new(axis.to_string(), PropertyType::Scalar(ScalarType::Double));
        point_element.properties.add(p);
    }
    for channel in ["red", "green", "blue"] {
        let p = PropertyDef::new(channel.to_string(), PropertyType::Scalar(ScalarType::UChar));
        point_element.properties.add(p);
    }
    ply.header.elements.add(point_element);

    if settings.camera_faces {
        let mut face_element = ElementDef::new("face".to_string());
        let vertex_list = PropertyDef::new(
            "vertex_index".to_string(),
            PropertyType::List(ScalarType::UChar, ScalarType::Int),
        );
        face_element.properties.add(vertex_list);
        ply.header.elements.add(face_element);
    }

    let mut faces: Vec<DefaultElement> = vec![];
    let mut vertices: Vec<DefaultElement> = vec![];

    let mut add_vertex = |p: Point3<f64>, [r, g, b]: [u8; 3]| -> usize {
        let pos = vertices.len();
        let mut point = DefaultElement::new();
        point.insert("x".to_string(), Property::Double(p.x));
        point.insert("y".to_string(), Property::Double(p.y));
        point.insert("z".to_string(), Property::Double(p.z));
        point.insert("red".to_string(), Property::UChar(r));
        point.insert("green".to_string(), Property::UChar(g));
        point.insert("blue".to_string(), Property::UChar(b));
        vertices.push(point);
        pos
    };

    let mut add_triangle = |a: usize, b: usize, c: usize| {
        let mut face = DefaultElement::new();
        face.insert(
            "vertex_index".to_string(),
            Property::ListInt(vec![a as i32, b as i32, c as i32]),
        );
        faces.push(face);
    };

    let current_pose = &snapshot.current_pose;
    let tracked = snapshot.poses.iter().map(|pose| (pose, CAMERA_COLOR));
    let current = current_pose.iter().map(|pose| (pose, CURRENT_CAMERA_COLOR));
    for (pose, color) in tracked.chain(current) {
        let ExportCamera {
            optical_center,
            up_direction,
            forward_direction,
        } = ExportCamera::from_world_to_camera(pose);
        let size = settings.camera_size;
        let right_direction = forward_direction.cross(&up_direction);
        let center_point = add_vertex(optical_center, color);
        let [up_right, up_left, down_left, down_right] =
            [(1, 1), (1, -1), (-1, -1), (-1, 1)].map(|(up, right)| {
                add_vertex(
                    optical_center
                        + forward_direction * size
                        + up as f64 * up_direction * size
                        + right as f64 * right_direction * size,
                    color,
                )
            });

        if settings.camera_faces {
            add_triangle(center_point, down_right, up_right);
            add_triangle(center_point, up_right, up_left);
            add_triangle(center_point, up_left, down_left);
            add_triangle(center_point, down_left, down_right);
        }
    }

    for (&p, &c) in snapshot.points.iter().zip(&snapshot.colors) {
        add_vertex(p, c.map(unit_to_byte));
    }

    ply.payload.insert("vertex".to_string(), vertices);
    if settings.camera_faces {
        ply.payload.insert("face".to_string(), faces);
    }

    Writer::new().write_ply(&mut writer, &mut ply)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use monovo_core::nalgebra::{IsometryMatrix3, Rotation3};

    #[test]
    fn camera_placement() {
        let camera_to_world = IsometryMatrix3::from_parts(
            Vector3::new(1.0, 2.0, 3.0).into(),
            Rotation3::from_euler_angles(0.0, std::f64::consts::FRAC_PI_2, 0.0),
        );
        let world_to_camera = camera_to_world.inverse().to_homogeneous();
        let camera = ExportCamera::from_world_to_camera(&world_to_camera);
        assert_relative_eq!(
            camera.optical_center,
            Point3::new(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            camera.forward_direction,
            camera_to_world * Vector3::z(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            camera.up_direction,
            camera_to_world * -Vector3::y(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn writes_points_and_cameras() {
        let snapshot = MapSnapshot {
            poses: vec![Matrix4::identity()],
            points: vec![Point3::new(0.0, 0.0, 1.0), Point3::new(0.5, 0.0, 2.0)],
            colors: vec![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            camera_track: vec![Point3::origin()],
            current_pose: Some(Matrix4::identity()),
        };
        let mut out = vec![];
        let written = export(&mut out, &snapshot, ExportSettings::default()).unwrap();
        assert_eq!(written, out.len());
        let text = String::from_utf8(out).unwrap();
        // Two pyramids of five vertices each plus the two points.
        assert!(text.contains("element vertex 12"));
        assert!(text.contains("element face 8"));
        assert!(text.contains("0 0 1 255 0 0"));
        assert!(text.contains("0.5 0 2 0 0 255"));

        let mut out = vec![];
        let settings = ExportSettings {
            camera_faces: false,
            ..ExportSettings::default()
        };
        export(&mut out, &MapSnapshot::default(), settings).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("element vertex 0"));
        assert!(!text.contains("element face"));
    }
}
