//! Pipeline client for the packing and meshing services
//!
//! Each stage is its own call and its output is a value the caller owns:
//!
//! ```text
//! mesh file ──pack_voxels──▶ VoxelizationArtifact ──generate_mesh──▶ MeshResult
//!                                   │
//!                                   └──get_visualization_data──▶ VisualizationData
//! ```
//!
//! Every operation validates its arguments before anything is sent, issues
//! exactly one request, and decodes the response into a typed value. Nothing
//! is retried and nothing is cached between calls.

use crate::artifact::{ArtifactSource, VoxelizationArtifact};
use crate::config::{ClientConfig, ClientOptions};
use crate::error::{Error, Result};
use crate::mesh::{self, MeshEncoding, MeshResult, SurfaceMesh};
use crate::transport::{Accept, Form, HttpTransport, Service, ServiceRequest, Transport};
use crate::types::{
    ensure_direction, ensure_finite, ensure_positive, vec_json, volume_from_json, CellSize,
    CellType, HardwareInfo, MeshRequest, PackingRequest, RotatedCenters, ServiceStatus,
    ShaderRequest, UploadReceipt, VisualizationData, VisualizationRequest,
};
use glam::DVec3;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Endpoint paths on the two services
pub mod endpoints {
    pub const PACK: &str = "pack";
    pub const VISUALIZE: &str = "visualize";
    pub const VOXEL_CENTERS: &str = "voxel-centers";
    pub const UPLOAD: &str = "upload";
    pub const MESH: &str = "mesh";
    pub const CELL_VOLUME: &str = "cell-volume";
    pub const SHADER: &str = "shader";
    pub const STATUS: &str = "status";
    pub const HARDWARE: &str = "hardware";
}

/// File name used for the artifact part of multipart uploads
const ARTIFACT_PART_NAME: &str = "artifact.vox";

/// Client for the voxel packing and lattice meshing services
///
/// Cheap to clone and safe to share across tasks; the configuration is
/// read-only and the HTTP connection pool is shared.
///
/// # Example
///
/// ```no_run
/// use voxelize::{CellType, ClearDirection, ClientConfig, MeshRequest, PackingRequest, VoxelizeClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new(
///         "my-api-key",
///         "https://packing.example.com",
///         "https://meshing.example.com",
///     )?;
///     let client = VoxelizeClient::new(config);
///
///     let request = PackingRequest::new("bracket.stl", 20.0, 1.0, [0.0, 0.0, 1.0]);
///     let artifact = client.pack_voxels(&request).await?;
///     artifact.save("bracket.vox").await?;
///
///     let mesh = client
///         .generate_mesh(
///             &artifact,
///             &MeshRequest::new(CellType::Bcc, 3.0).with_clear_direction(ClearDirection::X),
///         )
///         .await?;
///     mesh.write_stl("bracket_lattice.stl")?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct VoxelizeClient<T = HttpTransport> {
    config: Arc<ClientConfig>,
    transport: T,
}

impl VoxelizeClient<HttpTransport> {
    /// Create a client talking HTTP to the configured services
    pub fn new(config: ClientConfig) -> Self {
        let config = Arc::new(config);
        Self {
            transport: HttpTransport::new(Arc::clone(&config)),
            config,
        }
    }

    /// Resolve options (with environment fallbacks) and create a client
    pub fn from_options(options: ClientOptions) -> Result<Self> {
        Ok(Self::new(ClientConfig::resolve(options)?))
    }

    /// Create a client configured entirely from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_options(ClientOptions::default())
    }
}

impl<T: Transport> VoxelizeClient<T> {
    /// Create a client over a custom transport
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Resolve options against a custom environment lookup and create a
    /// client over `transport`
    ///
    /// Fails with `Configuration` before the transport is ever used when no
    /// API key can be found.
    pub fn resolve_with<F>(options: ClientOptions, lookup: F, transport: T) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self::with_transport(
            ClientConfig::resolve_with(options, lookup)?,
            transport,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // =========================================================================
    // Pipeline stages
    // =========================================================================

    /// Pack voxels into a mesh and return the opaque artifact
    pub async fn pack_voxels(&self, request: &PackingRequest) -> Result<VoxelizationArtifact> {
        let service_request = self.packing_request(request).await?;
        let bytes = self.transport.send(service_request).await?.into_binary()?;
        let artifact = VoxelizationArtifact::from_bytes(bytes)
            .map_err(|_| Error::decode("packing service returned an empty artifact"))?;

        info!(bytes = artifact.len(), "packing complete");
        Ok(artifact)
    }

    /// Pack voxels and stream the artifact straight to a file
    ///
    /// Returns the number of bytes written. Use this for large parts so the
    /// artifact never has to be held in memory.
    pub async fn pack_voxels_to_file(
        &self,
        request: &PackingRequest,
        destination: impl AsRef<Path>,
    ) -> Result<u64> {
        let destination = destination.as_ref();
        let service_request = self.packing_request(request).await?;
        let written = self
            .transport
            .download(service_request, destination)
            .await?;

        info!(bytes = written, path = %destination.display(), "packing complete");
        Ok(written)
    }

    async fn packing_request(&self, request: &PackingRequest) -> Result<ServiceRequest> {
        request.validate()?;
        let mesh = request.mesh.normalize().await?;

        let mut form = Form::new()
            .field("cell_size", json!(request.cell_size.to_array()))
            .field("skin_thickness", request.skin_thickness)
            .field("network_direction", vec_json(request.network_direction))
            .field("optimize_packing", request.optimize_packing)
            .field("user_id", request.attribution.user_id)
            .field("project_id", request.attribution.project_id.clone());
        if let Some(seed) = request.seed_point {
            form = form.field("seed_point", vec_json(seed));
        }
        let form = form.part("file", request.mesh.file_name(), mesh);

        debug!(
            mesh = %request.mesh.file_name(),
            cell_size = ?request.cell_size.to_array(),
            "packing request validated"
        );
        Ok(ServiceRequest::post(Service::Packing, endpoints::PACK)
            .accept(Accept::Binary)
            .form(form))
    }

    /// Fetch the cell layout of a packing result for previewing
    pub async fn get_visualization_data(
        &self,
        artifact: impl Into<ArtifactSource>,
        request: &VisualizationRequest,
    ) -> Result<VisualizationData> {
        request.validate()?;
        let payload = artifact.into().normalize().await?;

        let form = Form::new()
            .field("cell_type", request.cell_type.as_str())
            .field("beam_thickness", request.beam_thickness)
            .field("user_id", request.attribution.user_id)
            .field("project_id", request.attribution.project_id.clone())
            .part("artifact", ARTIFACT_PART_NAME, payload);
        let service_request = ServiceRequest::post(Service::Packing, endpoints::VISUALIZE)
            .accept(Accept::Json)
            .form(form);

        let value = self.transport.send(service_request).await?.into_json()?;
        let data = VisualizationData::from_json(&value)?;

        info!(
            cells = data.cell_count(),
            partial = data.partial_count(),
            "visualization data received"
        );
        Ok(data)
    }

    /// Generate the lattice surface mesh for a packing result
    pub async fn generate_mesh(
        &self,
        artifact: impl Into<ArtifactSource>,
        request: &MeshRequest,
    ) -> Result<MeshResult> {
        request.validate()?;
        let payload = artifact.into().normalize().await?;

        let mut form = Form::new()
            .field("cell_type", request.cell_type.as_str())
            .field("beam_diameter", request.beam_diameter)
            .field("clear_direction", request.clear_direction.to_wire())
            .field("conformal", request.conformal)
            .field("user_id", request.attribution.user_id)
            .field("project_id", request.attribution.project_id.clone());
        if let Some(device) = &request.device {
            form = form.field("device", device.as_str());
        }
        let form = form.part("artifact", ARTIFACT_PART_NAME, payload);
        let service_request = ServiceRequest::post(Service::Meshing, endpoints::MESH)
            .accept(Accept::Binary)
            .form(form);

        let response = self.transport.send(service_request).await?;
        let encoding = response
            .content_type
            .as_deref()
            .and_then(encoding_from_content_type);
        let bytes = response.into_binary()?;
        let surface = match encoding {
            Some(encoding) => SurfaceMesh::decode_as(&bytes, encoding)?,
            None => SurfaceMesh::decode(&bytes)?,
        };

        info!(
            vertices = surface.vertex_count(),
            faces = surface.face_count(),
            cell_type = %request.cell_type,
            "mesh generated"
        );
        Ok(MeshResult {
            mesh: surface,
            cell_type: request.cell_type,
            beam_diameter: request.beam_diameter,
            clear_direction: request.clear_direction,
            conformal: request.conformal,
        })
    }

    // =========================================================================
    // Auxiliary operations
    // =========================================================================

    /// Solid volume of a single unit cell
    pub async fn cell_volume(
        &self,
        cell_type: CellType,
        beam_radius: f64,
        cell_size: impl Into<CellSize>,
    ) -> Result<f64> {
        let cell_size = cell_size.into();
        ensure_positive("beam_radius", beam_radius)?;
        cell_size.validate()?;

        let body = json!({
            "cell_type": cell_type.as_str(),
            "beam_radius": beam_radius,
            "cell_size": cell_size.to_array(),
        });
        let service_request =
            ServiceRequest::post(Service::Meshing, endpoints::CELL_VOLUME).json(body);
        let value = self.transport.send(service_request).await?.into_json()?;
        volume_from_json(&value)
    }

    /// Health of the packing service
    pub async fn get_packing_status(&self) -> Result<ServiceStatus> {
        self.get_json(Service::Packing, endpoints::STATUS)
            .await
            .map(ServiceStatus)
    }

    /// Health of the meshing service
    pub async fn get_meshing_status(&self) -> Result<ServiceStatus> {
        self.get_json(Service::Meshing, endpoints::STATUS)
            .await
            .map(ServiceStatus)
    }

    /// Compute accelerators available to the meshing service
    pub async fn get_meshing_accelerators(&self) -> Result<HardwareInfo> {
        self.get_json(Service::Meshing, endpoints::HARDWARE)
            .await
            .map(HardwareInfo)
    }

    async fn get_json(&self, service: Service, endpoint: &str) -> Result<Value> {
        let request = ServiceRequest::get(service, endpoint);
        self.transport.send(request).await?.into_json()
    }

    /// Upload a local file to the staging bucket
    ///
    /// The bucket credentials are provisioned out of band; if that has not
    /// happened the service's rejection is returned as-is.
    pub async fn upload_file_to_bucket(
        &self,
        path: impl AsRef<Path>,
        destination: Option<&str>,
    ) -> Result<UploadReceipt> {
        let path = path.as_ref();
        let payload = ArtifactSource::from(path)
            .normalize()
            .await
            .map_err(|e| match e {
                Error::InvalidArtifact(message) => Error::InvalidArgument(message),
                other => other,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::invalid_argument(format!("{} has no file name", path.display()))
            })?;

        let mut form = Form::new();
        if let Some(destination) = destination.map(str::trim).filter(|d| !d.is_empty()) {
            form = form.field("destination", destination);
        }
        let form = form.part("file", file_name, payload);
        let request = ServiceRequest::post(Service::Packing, endpoints::UPLOAD).form(form);

        let value = self.transport.send(request).await?.into_json()?;
        info!(path = %path.display(), "file uploaded to staging bucket");
        Ok(UploadReceipt(value))
    }

    /// Rotate cell centers about a point so the lattice follows a direction
    pub async fn rotate_cell_centers(
        &self,
        centers: &[DVec3],
        network_direction: impl Into<DVec3>,
        rotation_point: impl Into<DVec3>,
    ) -> Result<RotatedCenters> {
        let network_direction = network_direction.into();
        let rotation_point = rotation_point.into();
        ensure_direction("network_direction", network_direction)?;
        ensure_finite("rotation_point", rotation_point)?;
        for center in centers {
            ensure_finite("cell center", *center)?;
        }

        let body = json!({
            "cell_centers": centers.iter().map(|c| c.to_array()).collect::<Vec<_>>(),
            "network_direction": network_direction.to_array(),
            "rotation_point": rotation_point.to_array(),
        });
        let request = ServiceRequest::post(Service::Packing, endpoints::VOXEL_CENTERS).json(body);
        let value = self.transport.send(request).await?.into_json()?;
        RotatedCenters::from_json(&value)
    }

    /// Generate a preview shader for a lattice and write it to `path`
    ///
    /// Parent directories are created as needed. Returns the shader source.
    pub async fn generate_shader(
        &self,
        request: &ShaderRequest,
        path: impl AsRef<Path>,
    ) -> Result<String> {
        request.validate()?;
        let path = path.as_ref();

        let service_request =
            ServiceRequest::post(Service::Meshing, endpoints::SHADER).json(request.to_json());
        let value = self.transport.send(service_request).await?.into_json()?;
        let shader = value
            .get("shader_content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::decode("shader response is missing 'shader_content'"))?
            .to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &shader).await?;
        Ok(shader)
    }

    /// Centroid of a local mesh file; see [`mesh::mesh_center`]
    pub fn mesh_center(&self, path: impl AsRef<Path>) -> Result<DVec3> {
        mesh::mesh_center(path)
    }
}

fn encoding_from_content_type(content_type: &str) -> Option<MeshEncoding> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "model/stl" | "model/x.stl-binary" | "model/x.stl-ascii" | "application/sla" => {
            Some(MeshEncoding::Stl)
        }
        "model/obj" | "text/plain+obj" => Some(MeshEncoding::Obj),
        _ => None,
    }
}

/// Default output path for an artifact derived from a mesh path
pub fn artifact_path_for(mesh_path: impl AsRef<Path>) -> PathBuf {
    mesh_path
        .as_ref()
        .with_extension(crate::artifact::ARTIFACT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + Clone>() {}

    #[test]
    fn test_client_is_shareable() {
        assert_send_sync::<VoxelizeClient>();
    }

    #[test]
    fn test_client_new() {
        let config =
            ClientConfig::new("key", "http://localhost:8000/", "http://localhost:9000").unwrap();
        let client = VoxelizeClient::new(config);
        assert_eq!(client.config().packing_base_url(), "http://localhost:8000");
        assert_eq!(client.transport().config().api_key(), "key");
    }

    #[test]
    fn test_encoding_from_content_type() {
        assert_eq!(
            encoding_from_content_type("model/stl"),
            Some(MeshEncoding::Stl)
        );
        assert_eq!(
            encoding_from_content_type("model/obj; charset=utf-8"),
            Some(MeshEncoding::Obj)
        );
        assert_eq!(encoding_from_content_type("application/octet-stream"), None);
    }

    #[test]
    fn test_artifact_path_for() {
        assert_eq!(
            artifact_path_for("parts/bracket.stl"),
            PathBuf::from("parts/bracket.vox")
        );
    }

    #[test]
    fn test_mesh_center_is_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tetra.stl");
        mesh::tests::tetrahedron().write_stl(&path).unwrap();

        // Unroutable URLs: the call must not touch the network
        let config = ClientConfig::new("key", "http://127.0.0.1:9", "http://127.0.0.1:9").unwrap();
        let client = VoxelizeClient::new(config);
        let center = client.mesh_center(&path).unwrap();
        assert!((center - DVec3::splat(0.25)).length() < 1e-6);
    }
}
