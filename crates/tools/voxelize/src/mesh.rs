//! Surface meshes returned by the meshing service
//!
//! The meshing service answers with an encoded triangle mesh. Binary and
//! ASCII STL are read with `stl_io`, Wavefront OBJ with `tobj`; anything else
//! is a decode failure. Meshes can be written back out as binary STL.
//!
//! [`mesh_center`] is the one purely local geometry operation of the crate.

use crate::error::{Error, Result};
use crate::types::{CellType, ClearDirection};
use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufReader, Cursor, Write};
use std::path::Path;

/// Volumes below this are treated as degenerate when computing a centroid
const MIN_CENTROID_VOLUME: f64 = 1e-12;

/// Encodings the decoder recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEncoding {
    /// Binary or ASCII STL
    Stl,
    /// Wavefront OBJ
    Obj,
}

impl MeshEncoding {
    /// Guess the encoding of a payload from its content
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if is_binary_stl(bytes) {
            return Some(MeshEncoding::Stl);
        }

        let text = std::str::from_utf8(bytes).ok()?;
        let trimmed = text.trim_start();
        if trimmed.starts_with("solid") && trimmed.contains("facet") {
            return Some(MeshEncoding::Stl);
        }

        let mut has_vertex = false;
        let mut has_face = false;
        for line in text.lines().map(str::trim_start) {
            has_vertex |= line.starts_with("v ");
            has_face |= line.starts_with("f ");
        }
        (has_vertex && has_face).then_some(MeshEncoding::Obj)
    }

    /// Encoding implied by a file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "stl" => Some(MeshEncoding::Stl),
            "obj" => Some(MeshEncoding::Obj),
            _ => None,
        }
    }
}

/// An 80-byte header and a triangle count that matches the payload length
fn is_binary_stl(bytes: &[u8]) -> bool {
    const HEADER: usize = 80;
    const TRIANGLE: usize = 50;
    if bytes.len() < HEADER + 4 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    count
        .checked_mul(TRIANGLE)
        .and_then(|n| n.checked_add(HEADER + 4))
        == Some(bytes.len())
}

/// Indexed triangle surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
}

impl SurfaceMesh {
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Decode an encoded mesh, detecting the encoding from its content
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let encoding = MeshEncoding::sniff(bytes)
            .ok_or_else(|| Error::decode("payload is not a recognized mesh encoding"))?;
        Self::decode_as(bytes, encoding)
    }

    /// Decode an encoded mesh of a known encoding
    pub fn decode_as(bytes: &[u8], encoding: MeshEncoding) -> Result<Self> {
        let mesh = match encoding {
            MeshEncoding::Stl => decode_stl(bytes)?,
            MeshEncoding::Obj => decode_obj(bytes)?,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Load a mesh file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let encoding = MeshEncoding::from_extension(path).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unsupported mesh file {}; expected .stl or .obj",
                path.display()
            ))
        })?;
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::invalid_argument(format!("file not found: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Self::decode_as(&bytes, encoding)
    }

    /// Check that the mesh has triangles and every index is in range
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.faces.is_empty() {
            return Err(Error::decode("mesh has no triangles"));
        }
        let vertex_count = self.vertices.len() as u32;
        for (i, face) in self.faces.iter().enumerate() {
            if let Some(&idx) = face.iter().find(|&&idx| idx >= vertex_count) {
                return Err(Error::decode(format!(
                    "face {} has invalid vertex index {} (max: {})",
                    i,
                    idx,
                    vertex_count - 1
                )));
            }
        }
        Ok(())
    }

    /// Corner positions of a face
    ///
    /// Fails with `InvalidArgument` when an index is out of range, since
    /// meshes built by hand are not checked on construction.
    fn face_vertices(&self, face: &[u32; 3]) -> Result<[Vec3; 3]> {
        let corner = |idx: u32| {
            self.vertices.get(idx as usize).copied().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "vertex index {} out of range ({} vertices)",
                    idx,
                    self.vertices.len()
                ))
            })
        };
        Ok([corner(face[0])?, corner(face[1])?, corner(face[2])?])
    }

    fn triangle(&self, face: &[u32; 3]) -> Result<[DVec3; 3]> {
        Ok(self.face_vertices(face)?.map(|v| v.as_dvec3()))
    }

    /// Axis-aligned bounds, or `None` for an empty mesh
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(min, max), v| (min.min(*v), max.max(*v))),
        )
    }

    /// True when every edge is shared by exactly two faces
    pub fn is_watertight(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let mut edges: HashMap<(u32, u32), u32> = HashMap::new();
        for face in &self.faces {
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        edges.values().all(|&count| count == 2)
    }

    /// Signed enclosed volume (positive for outward-facing winding)
    pub fn volume(&self) -> Result<f64> {
        self.faces.iter().try_fold(0.0, |total, face| {
            let [a, b, c] = self.triangle(face)?;
            Ok(total + a.dot(b.cross(c)) / 6.0)
        })
    }

    /// Mean of all vertex positions
    pub fn vertex_centroid(&self) -> DVec3 {
        if self.vertices.is_empty() {
            return DVec3::ZERO;
        }
        let sum: DVec3 = self.vertices.iter().map(|v| v.as_dvec3()).sum();
        sum / self.vertices.len() as f64
    }

    /// Center of mass of the enclosed solid, if it has a volume
    pub fn volume_centroid(&self) -> Result<Option<DVec3>> {
        let mut weighted = DVec3::ZERO;
        let mut total = 0.0;
        for face in &self.faces {
            let [a, b, c] = self.triangle(face)?;
            let volume = a.dot(b.cross(c)) / 6.0;
            weighted += (a + b + c) / 4.0 * volume;
            total += volume;
        }
        Ok((total.abs() > MIN_CENTROID_VOLUME).then(|| weighted / total))
    }

    /// Volume-weighted centroid for closed meshes, vertex mean otherwise
    pub fn centroid(&self) -> Result<DVec3> {
        if self.is_watertight() {
            if let Some(center) = self.volume_centroid()? {
                return Ok(center);
            }
        }
        Ok(self.vertex_centroid())
    }

    /// Encode as binary STL
    pub fn to_stl_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(84 + self.faces.len() * 50);
        self.write_stl_to(&mut out)?;
        Ok(out)
    }

    /// Write as binary STL to a file
    pub fn write_stl(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = self.to_stl_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn write_stl_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let triangles = self
            .faces
            .iter()
            .map(|face| {
                let [a, b, c] = self.face_vertices(face)?;
                let normal = (b - a).cross(c - a).normalize_or_zero();
                Ok(stl_io::Triangle {
                    normal: stl_io::Normal::new(normal.to_array()),
                    vertices: [
                        stl_io::Vertex::new(a.to_array()),
                        stl_io::Vertex::new(b.to_array()),
                        stl_io::Vertex::new(c.to_array()),
                    ],
                })
            })
            .collect::<Result<Vec<stl_io::Triangle>>>()?;
        stl_io::write_stl(writer, triangles.iter())?;
        Ok(())
    }
}

fn decode_stl(bytes: &[u8]) -> Result<SurfaceMesh> {
    let mut cursor = Cursor::new(bytes);
    let stl = stl_io::read_stl(&mut cursor)
        .map_err(|e| Error::decode(format!("failed to parse STL: {}", e)))?;

    let vertices = stl
        .vertices
        .iter()
        .map(|v| Vec3::new(v[0], v[1], v[2]))
        .collect();
    let faces = stl
        .faces
        .iter()
        .map(|face| face.vertices.map(|idx| idx as u32))
        .collect();

    Ok(SurfaceMesh { vertices, faces })
}

fn decode_obj(bytes: &[u8]) -> Result<SurfaceMesh> {
    let mut reader = BufReader::new(Cursor::new(bytes));
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) = tobj::load_obj_buf(&mut reader, &options, |_| {
        // Material libraries are irrelevant for geometry
        Ok(Default::default())
    })
    .map_err(|e| Error::decode(format!("failed to parse OBJ: {}", e)))?;

    let mut mesh = SurfaceMesh::default();
    for model in models {
        let offset = mesh.vertices.len() as u32;
        mesh.vertices.extend(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2])),
        );
        mesh.faces.extend(
            model
                .mesh
                .indices
                .chunks_exact(3)
                .map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]),
        );
    }
    Ok(mesh)
}

/// Lattice mesh produced by the meshing stage, with the parameters used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshResult {
    pub mesh: SurfaceMesh,
    pub cell_type: CellType,
    pub beam_diameter: f64,
    #[serde(with = "clear_direction_serde")]
    pub clear_direction: ClearDirection,
    pub conformal: bool,
}

impl MeshResult {
    pub fn vertex_count(&self) -> usize {
        self.mesh.vertex_count()
    }

    pub fn face_count(&self) -> usize {
        self.mesh.face_count()
    }

    /// Export the surface as binary STL
    pub fn write_stl(&self, path: impl AsRef<Path>) -> Result<()> {
        self.mesh.write_stl(path)
    }
}

mod clear_direction_serde {
    use crate::types::ClearDirection;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &ClearDirection, s: S) -> Result<S::Ok, S::Error> {
        value.to_wire().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ClearDirection, D::Error> {
        let axis: Option<String> = Option::deserialize(d)?;
        match axis {
            None => Ok(ClearDirection::Skip),
            Some(axis) => axis.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Centroid of a mesh file on disk
///
/// Closed meshes use their volume-weighted center of mass; open or degenerate
/// meshes fall back to the mean vertex position. No service is contacted.
pub fn mesh_center(path: impl AsRef<Path>) -> Result<DVec3> {
    SurfaceMesh::load(path)?.centroid()
}
