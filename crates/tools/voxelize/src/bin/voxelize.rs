//! Voxelize CLI - voxel packing and lattice meshing from the command line
//!
//! Each subcommand maps to one client operation. Artifacts are written to and
//! read from `.vox` files so stages can be run separately.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxelize::{
    artifact_path_for, mesh_center, CellSize, CellType, ClearDirection, ClientOptions,
    MeshRequest, PackingRequest, VisualizationRequest, VoxelizeClient, API_KEY_ENV,
    MESHING_URL_ENV, PACKING_URL_ENV,
};

/// Parse a vector given as "x,y,z"
fn parse_vec3(s: &str) -> Result<[f64; 3], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err("Vector must be in format 'X,Y,Z' (e.g., '0,0,1')".to_string());
    }

    let mut out = [0.0; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| format!("Invalid component: {}", part))?;
    }
    Ok(out)
}

/// Parse a cell size given as a single edge length or "x,y,z"
fn parse_cell_size(s: &str) -> Result<CellSize, String> {
    if s.contains(',') {
        parse_vec3(s).map(CellSize::from)
    } else {
        s.trim()
            .parse::<f64>()
            .map(CellSize::uniform)
            .map_err(|_| format!("Invalid cell size: {}", s))
    }
}

#[derive(Parser)]
#[command(name = "voxelize")]
#[command(
    author,
    version,
    about = "Pack meshes with lattice cells and generate lattice surfaces"
)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Connection {
    /// API key for both services
    #[arg(long, global = true, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Packing service base URL
    #[arg(long, global = true, env = PACKING_URL_ENV)]
    packing_url: Option<String>,

    /// Meshing service base URL
    #[arg(long, global = true, env = MESHING_URL_ENV)]
    meshing_url: Option<String>,
}

impl Connection {
    fn client(&self) -> Result<VoxelizeClient> {
        let mut options = ClientOptions::new();
        if let Some(key) = &self.api_key {
            options = options.with_api_key(key);
        }
        if let Some(url) = &self.packing_url {
            options = options.with_packing_api_url(url);
        }
        if let Some(url) = &self.meshing_url {
            options = options.with_meshing_api_url(url);
        }
        VoxelizeClient::from_options(options).context("Invalid client configuration")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pack an STL mesh with lattice cells and save the artifact
    Pack {
        /// Input mesh (.stl)
        mesh: PathBuf,

        /// Output artifact path (defaults to the mesh path with .vox)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Cell edge length, or "X,Y,Z" for anisotropic cells
        #[arg(short, long, value_parser = parse_cell_size)]
        cell_size: CellSize,

        /// Skin thickness around the lattice
        #[arg(short, long)]
        skin_thickness: f64,

        /// Lattice network direction "X,Y,Z"
        #[arg(short = 'd', long, value_parser = parse_vec3, default_value = "0,0,1")]
        network_direction: [f64; 3],

        /// Seed point for packing "X,Y,Z"
        #[arg(long, value_parser = parse_vec3)]
        seed_point: Option<[f64; 3]>,

        /// Disable packing optimization
        #[arg(long)]
        no_optimize: bool,

        /// User id for attribution
        #[arg(long, default_value_t = voxelize::ANONYMOUS_USER_ID, allow_hyphen_values = true)]
        user_id: i64,

        /// Project id for attribution
        #[arg(long, default_value = "")]
        project_id: String,
    },

    /// Show the cell layout of a packing artifact
    Visualize {
        /// Packing artifact (.vox)
        artifact: PathBuf,

        /// Cell type: bcc, fcc or fluorite
        #[arg(short, long, default_value = "bcc")]
        cell_type: CellType,

        /// Beam thickness
        #[arg(short, long)]
        beam_thickness: f64,

        /// Write the full visualization data as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate the lattice surface mesh for a packing artifact
    Mesh {
        /// Packing artifact (.vox)
        artifact: PathBuf,

        /// Output mesh path (.stl)
        #[arg(short, long)]
        output: PathBuf,

        /// Cell type: bcc, fcc or fluorite
        #[arg(short, long, default_value = "bcc")]
        cell_type: CellType,

        /// Beam diameter
        #[arg(short, long)]
        beam_diameter: f64,

        /// Clear direction: x, y or none
        #[arg(long, default_value = "none")]
        clear_direction: ClearDirection,

        /// Include partial cells that overlap the part boundary
        #[arg(long)]
        conformal: bool,

        /// Meshing device (see `voxelize hardware`); service default if omitted
        #[arg(long)]
        device: Option<String>,
    },

    /// Compute the solid volume of one unit cell
    CellVolume {
        /// Cell type: bcc, fcc, fluorite or acs
        #[arg(short, long)]
        cell_type: CellType,

        /// Beam radius
        #[arg(short, long)]
        beam_radius: f64,

        /// Cell edge length, or "X,Y,Z"
        #[arg(short = 's', long, value_parser = parse_cell_size)]
        cell_size: CellSize,
    },

    /// Check the health of both services
    Status,

    /// List compute accelerators available to the meshing service
    Hardware,

    /// Upload a file to the staging bucket
    Upload {
        /// File to upload
        file: PathBuf,

        /// Destination name in the bucket
        #[arg(short, long)]
        destination: Option<String>,
    },

    /// Print the centroid of a local mesh (no network access)
    Center {
        /// Mesh file (.stl or .obj)
        mesh: PathBuf,
    },
}

fn spinner(message: &str) -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    progress.set_message(message.to_string());
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxelize=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            mesh,
            output,
            cell_size,
            skin_thickness,
            network_direction,
            seed_point,
            no_optimize,
            user_id,
            project_id,
        } => {
            let client = cli.connection.client()?;
            let output = output.unwrap_or_else(|| artifact_path_for(&mesh));

            let mut request =
                PackingRequest::new(mesh.clone(), cell_size, skin_thickness, network_direction)
                    .with_optimize_packing(!no_optimize)
                    .with_user_id(user_id)
                    .with_project_id(project_id);
            if let Some(seed) = seed_point {
                request = request.with_seed_point(seed);
            }

            let progress = spinner(&format!("Packing {}...", mesh.display()));
            let written = client.pack_voxels_to_file(&request, &output).await;
            let written = match written {
                Ok(n) => n,
                Err(e) => {
                    progress.finish_with_message("Packing failed");
                    return Err(e).context("Packing failed");
                }
            };
            progress.finish_with_message(format!(
                "Packed {} → {} ({} bytes)",
                mesh.display(),
                output.display(),
                written
            ));
        }

        Commands::Visualize {
            artifact,
            cell_type,
            beam_thickness,
            output,
        } => {
            let client = cli.connection.client()?;
            let request = VisualizationRequest::new(cell_type, beam_thickness);

            let progress = spinner("Fetching visualization data...");
            let data = client.get_visualization_data(&artifact, &request).await;
            progress.finish_and_clear();
            let data = data.context("Visualization failed")?;

            println!("Visualization of {}", artifact.display());
            println!();
            println!("  Cell type:     {}", cell_type);
            println!(
                "  Cell size:     [{:.3}, {:.3}, {:.3}]",
                data.cell_size.x, data.cell_size.y, data.cell_size.z
            );
            println!("  Cells:         {}", data.cell_count());
            println!("  Partial cells: {}", data.partial_count());
            println!(
                "  Rotation pt:   [{:.3}, {:.3}, {:.3}]",
                data.rotation_point.x, data.rotation_point.y, data.rotation_point.z
            );

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&data)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!();
                println!("Wrote {}", path.display());
            }
        }

        Commands::Mesh {
            artifact,
            output,
            cell_type,
            beam_diameter,
            clear_direction,
            conformal,
            device,
        } => {
            let client = cli.connection.client()?;
            let mut request = MeshRequest::new(cell_type, beam_diameter)
                .with_clear_direction(clear_direction)
                .with_conformal(conformal);
            if let Some(device) = device {
                request = request.with_device(device);
            }

            let progress = spinner(&format!("Generating {} lattice...", cell_type));
            let result = match client.generate_mesh(&artifact, &request).await {
                Ok(r) => r,
                Err(e) => {
                    progress.finish_with_message("Mesh generation failed");
                    return Err(e).context("Mesh generation failed");
                }
            };

            progress.set_message("Writing output file...");
            result
                .write_stl(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            progress.finish_with_message(format!(
                "Generated {} vertices, {} faces → {}",
                result.vertex_count(),
                result.face_count(),
                output.display()
            ));
        }

        Commands::CellVolume {
            cell_type,
            beam_radius,
            cell_size,
        } => {
            let client = cli.connection.client()?;
            let volume = client
                .cell_volume(cell_type, beam_radius, cell_size)
                .await
                .context("Cell volume request failed")?;
            println!("{}", volume);
        }

        Commands::Status => {
            let client = cli.connection.client()?;
            let mut healthy = true;

            println!("Packing:  {}", client.config().packing_base_url());
            match client.get_packing_status().await {
                Ok(status) => println!("  {}", status),
                Err(e) => {
                    healthy = false;
                    println!("  unavailable: {}", e);
                }
            }

            println!("Meshing:  {}", client.config().meshing_base_url());
            match client.get_meshing_status().await {
                Ok(status) => println!("  {}", status),
                Err(e) => {
                    healthy = false;
                    println!("  unavailable: {}", e);
                }
            }

            if !healthy {
                bail!("one or more services are unavailable");
            }
        }

        Commands::Hardware => {
            let client = cli.connection.client()?;
            let info = client
                .get_meshing_accelerators()
                .await
                .context("Hardware query failed")?;
            println!("{}", serde_json::to_string_pretty(info.as_json())?);
        }

        Commands::Upload { file, destination } => {
            let client = cli.connection.client()?;
            let progress = spinner(&format!("Uploading {}...", file.display()));
            let receipt = client
                .upload_file_to_bucket(&file, destination.as_deref())
                .await;
            progress.finish_and_clear();
            let receipt = receipt.context("Upload failed")?;
            println!("{}", receipt);
        }

        Commands::Center { mesh } => {
            let center = mesh_center(&mesh)?;
            println!("[{:.6}, {:.6}, {:.6}]", center.x, center.y, center.z);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_vec3() {
        assert_eq!(parse_vec3("0, 0,1").unwrap(), [0.0, 0.0, 1.0]);
        assert!(parse_vec3("1,2").is_err());
        assert!(parse_vec3("1,a,2").is_err());
    }

    #[test]
    fn test_parse_cell_size() {
        assert_eq!(parse_cell_size("2.5").unwrap().to_array(), [2.5; 3]);
        assert_eq!(
            parse_cell_size("1,2,3").unwrap().to_array(),
            [1.0, 2.0, 3.0]
        );
        assert!(parse_cell_size("big").is_err());
    }

    #[test]
    fn test_parse_mesh_command() {
        let cli = Cli::try_parse_from([
            "voxelize",
            "--api-key",
            "k",
            "mesh",
            "part.vox",
            "-o",
            "out.stl",
            "-c",
            "fluorite",
            "-b",
            "1.5",
            "--clear-direction",
            "x",
            "--device",
            "cuda",
        ])
        .unwrap();
        match cli.command {
            Commands::Mesh {
                cell_type,
                clear_direction,
                beam_diameter,
                device,
                ..
            } => {
                assert_eq!(cell_type, CellType::Fluorite);
                assert_eq!(clear_direction, ClearDirection::X);
                assert_eq!(beam_diameter, 1.5);
                assert_eq!(device.as_deref(), Some("cuda"));
            }
            _ => panic!("expected mesh command"),
        }
    }
}
