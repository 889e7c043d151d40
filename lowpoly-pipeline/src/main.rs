use anyhow::{bail, Context, Result};
use clap::Parser;
use lowpoly_pipeline::{JobOptions, Orchestrator};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE: &str = "job.log";

/// Turn a high resolution scan into a low-poly asset with baked atlases
#[derive(Parser, Debug)]
#[command(name = "lowpoly")]
#[command(version, about)]
struct Cli {
    /// Input mesh (.glb, .gltf, .obj or binary .fbx)
    input: PathBuf,

    /// Directory that receives the model, textures and manifest
    output_dir: PathBuf,

    /// TOML file with job options; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Triangle budget of the low mesh, 0 or less keeps the mesh [default: 5000]
    #[arg(long, allow_negative_numbers = true)]
    target_tris: Option<i64>,

    /// Atlas size in texels, a power of two [default: 4096]
    #[arg(long)]
    tex_size: Option<u32>,

    /// Ray search distance past the cage [default: 0.02]
    #[arg(long)]
    ray_distance: Option<f32>,

    /// Spacing between UV islands, relative to the island grid [default: 0.06]
    #[arg(long)]
    island_margin: Option<f32>,

    /// Texel dilation around baked islands [default: 12]
    #[arg(long)]
    bake_margin: Option<u32>,

    /// Cage offset along the low mesh normals [default: 0.06]
    #[arg(long)]
    cage_extrusion: Option<f32>,

    /// Largest conform displacement, 0 disables [default: 0]
    #[arg(long, allow_negative_numbers = true)]
    shrinkwrap_offset: Option<f32>,

    /// Voxel size of the optional remesh, 0 disables [default: 0]
    #[arg(long)]
    remesh_voxel_size: Option<f32>,

    /// Auto-smooth angle in degrees, 0 keeps every edge smooth [default: 0]
    #[arg(long)]
    auto_smooth_angle: Option<f32>,

    /// Bake on the CPU even when a GPU is available
    #[arg(long)]
    cpu: bool,
}

impl Cli {
    /// Defaults, then the config file, then flags
    fn job_options(&self) -> Result<JobOptions> {
        let mut options = match &self.config {
            Some(path) => JobOptions::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => JobOptions::default(),
        };

        if let Some(v) = self.target_tris {
            options.target_tris = v;
        }
        if let Some(v) = self.tex_size {
            options.tex_size = v;
        }
        if let Some(v) = self.ray_distance {
            options.ray_distance = v;
        }
        if let Some(v) = self.island_margin {
            options.island_margin = v;
        }
        if let Some(v) = self.bake_margin {
            options.bake_margin = v;
        }
        if let Some(v) = self.cage_extrusion {
            options.cage_extrusion = v;
        }
        if let Some(v) = self.shrinkwrap_offset {
            options.shrinkwrap_offset = v;
        }
        if let Some(v) = self.remesh_voxel_size {
            options.remesh_voxel_size = v;
        }
        if let Some(v) = self.auto_smooth_angle {
            options.auto_smooth_angle = v;
        }
        if self.cpu {
            options.prefer_gpu = false;
        }
        Ok(options)
    }
}

/// Log to stderr and mirror everything into `<output_dir>/job.log`
fn init_logging(output_dir: &Path) -> Result<()> {
    let log_path = output_dir.join(LOG_FILE);
    let log_file = File::create(&log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(log_file)))
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create output directory {}", cli.output_dir.display()))?;
    init_logging(&cli.output_dir)?;

    let options = cli.job_options()?;
    let orchestrator = Orchestrator::new(options).context("Invalid job options")?;
    let report = orchestrator.run(&cli.input, &cli.output_dir);

    for (stage, elapsed) in &report.timings {
        tracing::debug!(%stage, elapsed_ms = elapsed.as_millis() as u64, "timing");
    }

    if !report.is_done() {
        let state = report.state.to_string();
        return match report.error {
            Some(err) => Err(anyhow::Error::new(err)).context(format!("Job failed: {}", state)),
            None => bail!("Job stopped in state {}", state),
        };
    }

    println!(
        "OK: exported {}",
        cli.output_dir.join(lowpoly_pipeline::MODEL_FILE).display()
    );
    println!(
        "STATS: before verts={} faces={} | after verts={} faces={}",
        report.before.vertices, report.before.faces, report.after.vertices, report.after.faces
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_budget_parses() {
        let cli = Cli::try_parse_from(["lowpoly", "scan.glb", "out", "--target-tris", "-5"]).unwrap();
        assert_eq!(cli.job_options().unwrap().target_tris, -5);
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from(["lowpoly", "scan.glb", "out", "--tex-size", "512", "--cpu"]).unwrap();
        let options = cli.job_options().unwrap();
        assert_eq!(options.tex_size, 512);
        assert!(!options.prefer_gpu);
        assert_eq!(options.target_tris, JobOptions::default().target_tris);
    }
}
