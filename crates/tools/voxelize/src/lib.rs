//! Voxelize - client for remote voxel packing and lattice meshing
//!
//! This crate drives two remote services: a **packing** service that fills a
//! closed mesh with lattice cells, and a **meshing** service that turns the
//! packed cells into a printable lattice surface. The client validates inputs,
//! carries the opaque packing artifact between stages and decodes every
//! response into typed values.
//!
//! ## Architecture
//!
//! ```text
//! STL mesh
//!     ↓ multipart POST packing:/pack
//! VoxelizationArtifact (opaque bytes, .vox)
//!     ├─ POST packing:/visualize  → VisualizationData (cell centers, rotation)
//!     └─ POST meshing:/mesh       → MeshResult (STL/OBJ surface)
//!                                       ↓
//!                                 SurfaceMesh::write_stl()
//! ```
//!
//! Artifacts may be handed to later stages as in-memory bytes, a
//! [`VoxelizationArtifact`], or a path to a saved `.vox` file; all three are
//! normalized to the same payload before anything is sent.
//!
//! ## Quick Start
//!
//! ```no_run
//! use voxelize::{CellType, MeshRequest, PackingRequest, VisualizationRequest, VoxelizeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads VOXELIZE_API_KEY, VOXELIZE_PACKING_API_URL and VOXELIZE_MESHING_API_URL
//!     let client = VoxelizeClient::from_env()?;
//!
//!     let packing = PackingRequest::new("part.stl", 10.0, 0.5, [0.0, 0.0, 1.0]);
//!     let artifact = client.pack_voxels(&packing).await?;
//!
//!     let preview = client
//!         .get_visualization_data(&artifact, &VisualizationRequest::new(CellType::Fcc, 1.0))
//!         .await?;
//!     println!("{} cells", preview.cell_count());
//!
//!     let result = client
//!         .generate_mesh(&artifact, &MeshRequest::new(CellType::Fcc, 1.0))
//!         .await?;
//!     result.write_stl("part_lattice.stl")?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! | Variable | Purpose |
//! |---|---|
//! | `VOXELIZE_API_KEY` | API key sent with every request |
//! | `VOXELIZE_PACKING_API_URL` | Base URL of the packing service |
//! | `VOXELIZE_MESHING_API_URL` | Base URL of the meshing service |
//!
//! Explicit [`ClientOptions`] take precedence over the environment.

pub mod artifact;
pub mod client;
pub mod config;
pub mod error;
pub mod mesh;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use artifact::{ArtifactPayload, ArtifactSource, MeshSource, VoxelizationArtifact};
pub use client::{artifact_path_for, VoxelizeClient};
pub use config::{
    resolve_api_key, ClientConfig, ClientOptions, API_KEY_ENV, MESHING_URL_ENV, PACKING_URL_ENV,
};
pub use error::{Error, Result};
pub use mesh::{mesh_center, MeshEncoding, MeshResult, SurfaceMesh};
pub use transport::{HttpTransport, RawResponse, Service, ServiceRequest, Transport};
pub use types::{
    Attribution, CellSize, CellType, ClearDirection, HardwareInfo, MeshRequest, PackingRequest,
    RotatedCenters, ServiceStatus, ShaderRequest, UploadReceipt, VisualizationData,
    VisualizationRequest, ANONYMOUS_USER_ID,
};
