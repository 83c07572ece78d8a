//! Request and result types for the packing and meshing services
//!
//! Requests carry the caller's parameters with their documented defaults and
//! validate themselves before anything is sent. Results are the typed values
//! decoded from service responses.
//!
//! ## Pipeline
//!
//! 1. [`PackingRequest`] → packing service → opaque
//!    [`VoxelizationArtifact`](crate::VoxelizationArtifact)
//! 2. artifact + [`VisualizationRequest`] → [`VisualizationData`] (optional)
//! 3. artifact + [`MeshRequest`] → [`MeshResult`](crate::MeshResult)

use crate::artifact::MeshSource;
use crate::error::{Error, Result};
use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// User id sent when a call is not attributed to an account
pub const ANONYMOUS_USER_ID: i64 = -1;

/// Unit cell lattice variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Bcc,
    Fcc,
    Fluorite,
    /// Only valid for volume calculation
    Acs,
}

impl CellType {
    pub const ALL: [CellType; 4] = [
        CellType::Bcc,
        CellType::Fcc,
        CellType::Fluorite,
        CellType::Acs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Bcc => "bcc",
            CellType::Fcc => "fcc",
            CellType::Fluorite => "fluorite",
            CellType::Acs => "acs",
        }
    }

    /// Whether packing, visualization and meshing accept this cell type
    pub fn supports_lattice(&self) -> bool {
        !matches!(self, CellType::Acs)
    }

    /// Fail unless the cell type can be used for lattice stages
    pub fn ensure_lattice(&self) -> Result<()> {
        if self.supports_lattice() {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "cell type '{}' is only valid for volume calculation; expected one of bcc, fcc, fluorite",
                self
            )))
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bcc" => Ok(CellType::Bcc),
            "fcc" => Ok(CellType::Fcc),
            // Older service docs spell it this way
            "fluorite" | "flourite" => Ok(CellType::Fluorite),
            "acs" => Ok(CellType::Acs),
            other => Err(Error::invalid_argument(format!(
                "unknown cell type '{}'; expected one of bcc, fcc, fluorite, acs",
                other
            ))),
        }
    }
}

/// Axis along which the mesh is cleared after generation
///
/// `Skip` is a real choice, not a missing value: it is sent as an explicit
/// `null` so the service can tell "no clearing" apart from an unset direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClearDirection {
    X,
    Y,
    #[default]
    Skip,
}

impl ClearDirection {
    /// Wire value: `"x"`, `"y"` or `null`
    pub fn to_wire(&self) -> Value {
        match self {
            ClearDirection::X => Value::from("x"),
            ClearDirection::Y => Value::from("y"),
            ClearDirection::Skip => Value::Null,
        }
    }
}

impl fmt::Display for ClearDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearDirection::X => write!(f, "x"),
            ClearDirection::Y => write!(f, "y"),
            ClearDirection::Skip => write!(f, "none"),
        }
    }
}

impl FromStr for ClearDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(ClearDirection::X),
            "y" => Ok(ClearDirection::Y),
            "none" | "null" | "skip" => Ok(ClearDirection::Skip),
            other => Err(Error::invalid_argument(format!(
                "unknown clear direction '{}'; expected x, y or none",
                other
            ))),
        }
    }
}

impl From<Option<char>> for ClearDirection {
    fn from(axis: Option<char>) -> Self {
        match axis {
            Some('x') | Some('X') => ClearDirection::X,
            Some('y') | Some('Y') => ClearDirection::Y,
            _ => ClearDirection::Skip,
        }
    }
}

/// Unit cell dimensions; a scalar means a cubic cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellSize(pub DVec3);

impl CellSize {
    pub fn uniform(size: f64) -> Self {
        Self(DVec3::splat(size))
    }

    pub fn to_array(&self) -> [f64; 3] {
        self.0.to_array()
    }

    pub fn validate(&self) -> Result<()> {
        let all_positive = self
            .to_array()
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        if !all_positive {
            return Err(Error::invalid_argument(format!(
                "cell_size must be positive in every axis, got {:?}",
                self.to_array()
            )));
        }
        Ok(())
    }
}

impl From<f64> for CellSize {
    fn from(size: f64) -> Self {
        Self::uniform(size)
    }
}

impl From<[f64; 3]> for CellSize {
    fn from(size: [f64; 3]) -> Self {
        Self(DVec3::from_array(size))
    }
}

impl From<DVec3> for CellSize {
    fn from(size: DVec3) -> Self {
        Self(size)
    }
}

/// Who a call is attributed to
///
/// Defaults to the anonymous sentinels: user `-1`, empty project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub user_id: i64,
    pub project_id: String,
}

impl Default for Attribution {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl Attribution {
    pub fn anonymous() -> Self {
        Self {
            user_id: ANONYMOUS_USER_ID,
            project_id: String::new(),
        }
    }

    pub fn new(user_id: i64, project_id: impl Into<String>) -> Self {
        Self {
            user_id,
            project_id: project_id.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER_ID && self.project_id.is_empty()
    }
}

pub(crate) fn ensure_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

pub(crate) fn ensure_finite(name: &str, value: DVec3) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "{} must be finite, got {:?}",
            name,
            value.to_array()
        )))
    }
}

pub(crate) fn ensure_direction(name: &str, value: DVec3) -> Result<()> {
    ensure_finite(name, value)?;
    if value == DVec3::ZERO {
        return Err(Error::invalid_argument(format!(
            "{} must be a non-zero vector",
            name
        )));
    }
    Ok(())
}

pub(crate) fn vec_json(v: DVec3) -> Value {
    json!(v.to_array())
}

/// Parameters of the packing stage
#[derive(Debug, Clone)]
pub struct PackingRequest {
    pub mesh: MeshSource,
    pub cell_size: CellSize,
    pub skin_thickness: f64,
    pub network_direction: DVec3,
    pub seed_point: Option<DVec3>,
    pub optimize_packing: bool,
    pub attribution: Attribution,
}

impl PackingRequest {
    /// Create a request with default options
    ///
    /// Packing optimization is on, no seed point is set and the call is
    /// anonymous.
    pub fn new(
        mesh: impl Into<MeshSource>,
        cell_size: impl Into<CellSize>,
        skin_thickness: f64,
        network_direction: impl Into<DVec3>,
    ) -> Self {
        Self {
            mesh: mesh.into(),
            cell_size: cell_size.into(),
            skin_thickness,
            network_direction: network_direction.into(),
            seed_point: None,
            optimize_packing: true,
            attribution: Attribution::anonymous(),
        }
    }

    pub fn with_seed_point(mut self, seed_point: impl Into<DVec3>) -> Self {
        self.seed_point = Some(seed_point.into());
        self
    }

    pub fn with_optimize_packing(mut self, optimize: bool) -> Self {
        self.optimize_packing = optimize;
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.attribution.user_id = user_id;
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.attribution.project_id = project_id.into();
        self
    }

    /// Validate scalar parameters (the mesh file is checked when it is read)
    pub fn validate(&self) -> Result<()> {
        self.cell_size.validate()?;
        ensure_positive("skin_thickness", self.skin_thickness)?;
        ensure_direction("network_direction", self.network_direction)?;
        if let Some(seed) = self.seed_point {
            ensure_finite("seed_point", seed)?;
        }
        Ok(())
    }
}

/// Parameters of the visualization stage
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationRequest {
    pub cell_type: CellType,
    pub beam_thickness: f64,
    pub attribution: Attribution,
}

impl VisualizationRequest {
    pub fn new(cell_type: CellType, beam_thickness: f64) -> Self {
        Self {
            cell_type,
            beam_thickness,
            attribution: Attribution::anonymous(),
        }
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.cell_type.ensure_lattice()?;
        ensure_positive("beam_thickness", self.beam_thickness)
    }
}

/// Parameters of the meshing stage
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRequest {
    pub cell_type: CellType,
    pub beam_diameter: f64,
    pub clear_direction: ClearDirection,
    /// Include partial cells that overlap the part boundary
    pub conformal: bool,
    /// Compute device requested from the meshing service (e.g. `cpu`, `cuda`);
    /// `None` leaves the choice to the service
    pub device: Option<String>,
    pub attribution: Attribution,
}

impl MeshRequest {
    pub fn new(cell_type: CellType, beam_diameter: f64) -> Self {
        Self {
            cell_type,
            beam_diameter,
            clear_direction: ClearDirection::Skip,
            conformal: false,
            device: None,
            attribution: Attribution::anonymous(),
        }
    }

    pub fn with_clear_direction(mut self, direction: ClearDirection) -> Self {
        self.clear_direction = direction;
        self
    }

    pub fn with_conformal(mut self, conformal: bool) -> Self {
        self.conformal = conformal;
        self
    }

    /// Run on a specific accelerator; see `get_meshing_accelerators`
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.cell_type.ensure_lattice()?;
        if self.device.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(Error::invalid_argument("device must not be blank"));
        }
        ensure_positive("beam_diameter", self.beam_diameter)
    }
}

/// Parameters for rendering a lattice preview shader
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderRequest {
    pub cell_type: CellType,
    pub cell_size: CellSize,
    pub beam_diameter: f64,
    pub cell_centers: Vec<DVec3>,
    /// Shade by surface normal instead of smooth shading
    pub view_normals: bool,
    pub aa_passes: u32,
    pub angle: f64,
    pub rotation_point: DVec3,
    pub network_direction: DVec3,
}

impl ShaderRequest {
    pub fn new(
        cell_type: CellType,
        cell_size: impl Into<CellSize>,
        beam_diameter: f64,
        cell_centers: Vec<DVec3>,
    ) -> Self {
        Self {
            cell_type,
            cell_size: cell_size.into(),
            beam_diameter,
            cell_centers,
            view_normals: false,
            aa_passes: 0,
            angle: 0.0,
            rotation_point: DVec3::ZERO,
            network_direction: DVec3::Z,
        }
    }

    /// Take the cell layout from visualization data
    pub fn from_visualization(
        cell_type: CellType,
        beam_diameter: f64,
        data: &VisualizationData,
    ) -> Self {
        let mut request = Self::new(
            cell_type,
            data.cell_size,
            beam_diameter,
            data.cell_centers.clone(),
        );
        request.rotation_point = data.rotation_point;
        request
    }

    pub fn with_view_normals(mut self, view_normals: bool) -> Self {
        self.view_normals = view_normals;
        self
    }

    pub fn with_aa_passes(mut self, passes: u32) -> Self {
        self.aa_passes = passes;
        self
    }

    pub fn with_rotation(mut self, angle: f64, rotation_point: impl Into<DVec3>) -> Self {
        self.angle = angle;
        self.rotation_point = rotation_point.into();
        self
    }

    pub fn with_network_direction(mut self, direction: impl Into<DVec3>) -> Self {
        self.network_direction = direction.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.cell_type.ensure_lattice()?;
        self.cell_size.validate()?;
        ensure_positive("beam_diameter", self.beam_diameter)?;
        ensure_direction("network_direction", self.network_direction)?;
        ensure_finite("rotation_point", self.rotation_point)?;
        if !self.angle.is_finite() {
            return Err(Error::invalid_argument("angle must be finite"));
        }
        Ok(())
    }

    pub(crate) fn to_json(&self) -> Value {
        json!({
            "cell_type": self.cell_type.as_str(),
            "cell_size": self.cell_size.to_array(),
            "beam_diameter": self.beam_diameter,
            "cell_centers": self.cell_centers.iter().map(|c| c.to_array()).collect::<Vec<_>>(),
            "view_normals": self.view_normals,
            "aa_passes": self.aa_passes,
            "angle": self.angle,
            "rotation_point": self.rotation_point.to_array(),
            "network_direction": self.network_direction.to_array(),
        })
    }
}

// =============================================================================
// Results
// =============================================================================

/// Cell layout of a packing result, for previewing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationData {
    pub cell_size: DVec3,
    /// Centers of cells fully inside the part
    pub cell_centers: Vec<DVec3>,
    /// Candidate boundary cells. Membership does not guarantee overlap with
    /// the part; the list is passed through as the service returned it.
    pub partial_centers: Vec<DVec3>,
    pub rotation_matrix: DMat3,
    pub rotation_point: DVec3,
}

impl VisualizationData {
    /// Decode a visualization response, checking every array shape
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::decode("visualization response is not a JSON object"))?;

        let rows = matrix_field(object, "rotation_matrix")?;

        Ok(Self {
            cell_size: vec3_field(object, "cell_size")?,
            cell_centers: points_field(object, "cell_centers")?,
            partial_centers: points_field(object, "partial_centers")?,
            // JSON holds rows, glam stores columns
            rotation_matrix: DMat3::from_cols_array_2d(&rows).transpose(),
            rotation_point: vec3_field(object, "rotation_point")?,
        })
    }

    /// Rotation matrix as row-major nested arrays
    pub fn rotation_matrix_rows(&self) -> [[f64; 3]; 3] {
        self.rotation_matrix.transpose().to_cols_array_2d()
    }

    pub fn cell_count(&self) -> usize {
        self.cell_centers.len()
    }

    pub fn partial_count(&self) -> usize {
        self.partial_centers.len()
    }
}

fn field<'a>(object: &'a Map<String, Value>, name: &str) -> Result<&'a Value> {
    object
        .get(name)
        .ok_or_else(|| Error::decode(format!("response is missing '{}'", name)))
}

fn number(value: &Value, context: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::decode(format!("{} is not a number: {}", context, value)))
}

fn triple(value: &Value, context: &str) -> Result<[f64; 3]> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::decode(format!("{} is not an array", context)))?;
    if items.len() != 3 {
        return Err(Error::decode(format!(
            "{} has {} components, expected 3",
            context,
            items.len()
        )));
    }
    Ok([
        number(&items[0], context)?,
        number(&items[1], context)?,
        number(&items[2], context)?,
    ])
}

fn vec3_field(object: &Map<String, Value>, name: &str) -> Result<DVec3> {
    triple(field(object, name)?, name).map(DVec3::from_array)
}

fn points_field(object: &Map<String, Value>, name: &str) -> Result<Vec<DVec3>> {
    points(field(object, name)?, name)
}

pub(crate) fn points(value: &Value, name: &str) -> Result<Vec<DVec3>> {
    let rows = value
        .as_array()
        .ok_or_else(|| Error::decode(format!("'{}' is not an N×3 array", name)))?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| triple(row, &format!("{}[{}]", name, i)).map(DVec3::from_array))
        .collect()
}

fn matrix_field(object: &Map<String, Value>, name: &str) -> Result<[[f64; 3]; 3]> {
    let rows = field(object, name)?
        .as_array()
        .ok_or_else(|| Error::decode(format!("'{}' is not a 3×3 array", name)))?;
    if rows.len() != 3 {
        return Err(Error::decode(format!(
            "'{}' has {} rows, expected 3",
            name,
            rows.len()
        )));
    }
    Ok([
        triple(&rows[0], &format!("{}[0]", name))?,
        triple(&rows[1], &format!("{}[1]", name))?,
        triple(&rows[2], &format!("{}[2]", name))?,
    ])
}

/// Cell centers rotated to follow a network direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatedCenters {
    pub centers: Vec<DVec3>,
    /// Rotation angle applied, in radians
    pub angle: f64,
}

impl RotatedCenters {
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::decode("voxel centers response is not a JSON object"))?;
        Ok(Self {
            centers: points_field(object, "centers")?,
            angle: number(field(object, "angle")?, "angle")?,
        })
    }
}

/// Extract the volume from a cell volume response
pub(crate) fn volume_from_json(value: &Value) -> Result<f64> {
    let volume = match value {
        Value::Number(_) => number(value, "volume")?,
        Value::Object(object) => number(field(object, "volume")?, "volume")?,
        other => {
            return Err(Error::decode(format!(
                "unexpected cell volume response: {}",
                other
            )))
        }
    };
    if !volume.is_finite() || volume < 0.0 {
        return Err(Error::decode(format!("cell volume {} is not valid", volume)));
    }
    Ok(volume)
}

macro_rules! opaque_json {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Value);

        impl $name {
            /// Look up a top-level field
            pub fn get(&self, key: &str) -> Option<&Value> {
                self.0.get(key)
            }

            pub fn as_json(&self) -> &Value {
                &self.0
            }

            pub fn into_json(self) -> Value {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_json!(
    /// Health report of a service, surfaced as returned
    ServiceStatus
);

opaque_json!(
    /// Compute accelerators available to the meshing service
    HardwareInfo
);

opaque_json!(
    /// Response of a staging-bucket upload
    UploadReceipt
);

#[cfg(test)]
mod tests {
    use super::*;

    fn visualization_json() -> Value {
        json!({
            "cell_size": [20.0, 20.0, 20.0],
            "cell_centers": [[0.0, 0.0, 0.0], [20.0, 0.0, 0.0]],
            "partial_centers": [[40.0, 0.0, 0.0]],
            "rotation_matrix": [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]],
            "rotation_point": [1.0, 2.0, 3.0]
        })
    }

    #[test]
    fn test_cell_type_parse() {
        assert_eq!("bcc".parse::<CellType>().unwrap(), CellType::Bcc);
        assert_eq!("FCC".parse::<CellType>().unwrap(), CellType::Fcc);
        assert_eq!("flourite".parse::<CellType>().unwrap(), CellType::Fluorite);
        assert_eq!("acs".parse::<CellType>().unwrap(), CellType::Acs);
        assert!(matches!(
            "kelvin".parse::<CellType>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cell_type_lattice_support() {
        for cell in CellType::ALL {
            assert_eq!(cell.ensure_lattice().is_ok(), cell != CellType::Acs);
        }
        assert_eq!(CellType::Fluorite.to_string(), "fluorite");
    }

    #[test]
    fn test_clear_direction_wire() {
        assert_eq!(ClearDirection::X.to_wire(), json!("x"));
        assert_eq!(ClearDirection::Y.to_wire(), json!("y"));
        assert_eq!(ClearDirection::Skip.to_wire(), Value::Null);
        assert_eq!(
            "none".parse::<ClearDirection>().unwrap(),
            ClearDirection::Skip
        );
        assert_eq!(ClearDirection::from(Some('y')), ClearDirection::Y);
        assert_eq!(ClearDirection::from(None), ClearDirection::Skip);
        assert!("z".parse::<ClearDirection>().is_err());
    }

    #[test]
    fn test_cell_size_conversions() {
        assert_eq!(CellSize::from(20.0).to_array(), [20.0, 20.0, 20.0]);
        assert_eq!(CellSize::from([1.0, 2.0, 3.0]).to_array(), [1.0, 2.0, 3.0]);
        assert!(CellSize::from([1.0, 0.0, 3.0]).validate().is_err());
        assert!(CellSize::from(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_packing_request_defaults() {
        let request = PackingRequest::new("part.stl", 20.0, 1.0, [0.0, 0.0, 1.0]);
        assert!(request.optimize_packing);
        assert!(request.seed_point.is_none());
        assert_eq!(request.attribution.user_id, ANONYMOUS_USER_ID);
        assert_eq!(request.attribution.project_id, "");
        assert!(request.attribution.is_anonymous());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_packing_request_validation() {
        let zero_dir = PackingRequest::new("part.stl", 20.0, 1.0, [0.0, 0.0, 0.0]);
        assert!(matches!(
            zero_dir.validate(),
            Err(Error::InvalidArgument(_))
        ));

        let bad_skin = PackingRequest::new("part.stl", 20.0, 0.0, [0.0, 0.0, 1.0]);
        assert!(bad_skin.validate().is_err());

        let bad_cell = PackingRequest::new("part.stl", -5.0, 1.0, [0.0, 0.0, 1.0]);
        assert!(bad_cell.validate().is_err());

        let bad_seed = PackingRequest::new("part.stl", 20.0, 1.0, [0.0, 0.0, 1.0])
            .with_seed_point([f64::INFINITY, 0.0, 0.0]);
        assert!(bad_seed.validate().is_err());
    }

    #[test]
    fn test_packing_request_builder() {
        let request = PackingRequest::new("part.stl", [10.0, 12.0, 14.0], 0.5, [1.0, 0.0, 0.0])
            .with_seed_point([1.0, 1.0, 1.0])
            .with_optimize_packing(false)
            .with_user_id(7)
            .with_project_id("bracket");
        assert_eq!(request.cell_size.to_array(), [10.0, 12.0, 14.0]);
        assert_eq!(request.seed_point, Some(DVec3::ONE));
        assert!(!request.optimize_packing);
        assert_eq!(request.attribution, Attribution::new(7, "bracket"));
    }

    #[test]
    fn test_stage_request_validation() {
        assert!(VisualizationRequest::new(CellType::Bcc, 1.0).validate().is_ok());
        assert!(VisualizationRequest::new(CellType::Acs, 1.0).validate().is_err());
        assert!(VisualizationRequest::new(CellType::Fcc, 0.0).validate().is_err());

        let mesh = MeshRequest::new(CellType::Fluorite, 3.0);
        assert_eq!(mesh.clear_direction, ClearDirection::Skip);
        assert!(!mesh.conformal);
        assert_eq!(mesh.device, None);
        assert!(mesh.validate().is_ok());
        assert_eq!(
            mesh.clone().with_device("cuda").device.as_deref(),
            Some("cuda")
        );
        assert!(mesh.with_device("  ").validate().is_err());
        assert!(MeshRequest::new(CellType::Acs, 3.0).validate().is_err());
        assert!(MeshRequest::new(CellType::Bcc, -1.0).validate().is_err());
    }

    #[test]
    fn test_visualization_decode() {
        let data = VisualizationData::from_json(&visualization_json()).unwrap();
        assert_eq!(data.cell_size, DVec3::splat(20.0));
        assert_eq!(data.cell_count(), 2);
        assert_eq!(data.partial_count(), 1);
        assert_eq!(data.rotation_point, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(
            data.rotation_matrix_rows(),
            [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]]
        );
        // Row 1 of the JSON maps (0, 0, 1) to (0, -1, 0)
        assert_eq!(data.rotation_matrix * DVec3::Z, DVec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_visualization_empty_lists() {
        let mut value = visualization_json();
        value["cell_centers"] = json!([]);
        value["partial_centers"] = json!([]);
        let data = VisualizationData::from_json(&value).unwrap();
        assert_eq!(data.cell_count(), 0);
        assert_eq!(data.partial_count(), 0);
    }

    #[test]
    fn test_visualization_shape_violations() {
        let cases = [
            ("rotation_matrix", json!([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])),
            ("rotation_matrix", json!([[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]])),
            ("cell_centers", json!([[0.0, 0.0, 0.0], [1.0, 2.0]])),
            ("partial_centers", json!([[0.0, 0.0, 0.0, 0.0]])),
            ("cell_size", json!([20.0, 20.0])),
            ("rotation_point", json!("origin")),
            ("cell_centers", json!([["a", "b", "c"]])),
        ];
        for (field, bad) in cases {
            let mut value = visualization_json();
            value[field] = bad;
            let result = VisualizationData::from_json(&value);
            assert!(
                matches!(result, Err(Error::Decode(_))),
                "{} should fail to decode",
                field
            );
        }

        let mut missing = visualization_json();
        missing.as_object_mut().unwrap().remove("partial_centers");
        assert!(matches!(
            VisualizationData::from_json(&missing),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_rotated_centers_decode() {
        let value = json!({"centers": [[1.0, 0.0, 0.0]], "angle": 0.5});
        let rotated = RotatedCenters::from_json(&value).unwrap();
        assert_eq!(rotated.centers, vec![DVec3::X]);
        assert_eq!(rotated.angle, 0.5);

        assert!(RotatedCenters::from_json(&json!({"centers": []})).is_err());
    }

    #[test]
    fn test_volume_decode() {
        assert_eq!(volume_from_json(&json!({"volume": 12.5})).unwrap(), 12.5);
        assert_eq!(volume_from_json(&json!(3.0)).unwrap(), 3.0);
        assert!(volume_from_json(&json!({"volume": "big"})).is_err());
        assert!(volume_from_json(&json!({"volume": -1.0})).is_err());
        assert!(volume_from_json(&json!([1.0])).is_err());
    }

    #[test]
    fn test_shader_request_json() {
        let request = ShaderRequest::new(CellType::Fcc, 10.0, 2.0, vec![DVec3::ZERO, DVec3::X])
            .with_aa_passes(2)
            .with_rotation(0.25, [1.0, 1.0, 1.0]);
        assert!(request.validate().is_ok());

        let value = request.to_json();
        assert_eq!(value["cell_type"], "fcc");
        assert_eq!(value["cell_size"], json!([10.0, 10.0, 10.0]));
        assert_eq!(value["cell_centers"], json!([[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]));
        assert_eq!(value["network_direction"], json!([0.0, 0.0, 1.0]));
        assert_eq!(value["aa_passes"], 2);

        let acs = ShaderRequest::new(CellType::Acs, 10.0, 2.0, Vec::new());
        assert!(acs.validate().is_err());
    }

    #[test]
    fn test_opaque_json_wrappers() {
        let status = ServiceStatus(json!({"status": "ok", "queue": 0}));
        assert_eq!(status.get("status"), Some(&json!("ok")));
        assert!(status.to_string().contains(r#""status":"ok""#));

        let hardware: HardwareInfo = serde_json::from_str(r#"{"gpus":["A100"]}"#).unwrap();
        assert_eq!(hardware.as_json()["gpus"][0], "A100");
    }
}
