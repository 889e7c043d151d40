//! Pipeline orchestrator
//!
//! Runs one job from an input file to an output directory. Stages run in a
//! fixed order, each exactly once. Degraded outcomes are logged and
//! collected while the job keeps going; the first fatal error moves the job
//! to `Failed` and removes whatever was already written, so a failed job
//! leaves neither a manifest nor a partial export behind.

use crate::options::JobOptions;
use crate::state::{PipelineState, Stage};
use lowpoly_algorithms::{
    conform_to_surface, fill_holes, recalculate_normals, unwrap_uvs, HoleFillConfig, UvUnwrapConfig,
};
use lowpoly_bake::{select_backend, BakeConfig, SurfaceBaker};
use lowpoly_core::{
    BakeImage, Bounded, Degradation, DegradationKind, Error, MeshRole, MeshStats, Result, Scene, StageOutcome,
    TriangleMesh,
};
use lowpoly_io::{
    encode_atlas, encode_glb, import_asset, GlbTextures, Manifest, BASE_COLOR_FILE, MANIFEST_FILE, NORMAL_FILE,
};
use lowpoly_reconstruction::{voxel_remesh, RemeshConfig};
use lowpoly_simplification::{simplify_to_target, EdgeCollapseSimplifier};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

pub const TEXTURES_DIR: &str = "textures";
pub const MODEL_FILE: &str = "model_low.glb";
pub const PREVIEW_BEFORE_FILE: &str = "preview_before.png";
pub const PREVIEW_AFTER_FILE: &str = "preview_after.png";

/// Weld distance relative to the bounding box diagonal
const WELD_RELATIVE_EPSILON: f32 = 1.0e-6;

/// External preview image producer.
///
/// Camera framing and lighting live outside this workspace; the pipeline
/// only hands over geometry and, for the low mesh, the baked base color.
pub trait PreviewRenderer: Send + Sync {
    /// Encoded PNG bytes for `mesh`
    fn render(&self, mesh: &TriangleMesh, texture: Option<&BakeImage>) -> Result<Vec<u8>>;
}

/// What happened to one job
#[derive(Debug)]
pub struct JobReport {
    pub state: PipelineState,
    /// Every state reached, in order, including the terminal one
    pub history: Vec<PipelineState>,
    pub degradations: Vec<Degradation>,
    /// Fatal error behind a `Failed` state
    pub error: Option<Error>,
    pub before: MeshStats,
    pub after: MeshStats,
    /// Ray backend used for baking
    pub device: Option<String>,
    pub timings: Vec<(Stage, Duration)>,
    /// Manifest path, only set once the job is done
    pub manifest: Option<PathBuf>,
}

impl JobReport {
    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }
}

/// Bookkeeping shared by the stages of a running job
#[derive(Default)]
struct JobRecord {
    history: Vec<PipelineState>,
    degradations: Vec<Degradation>,
    timings: Vec<(Stage, Duration)>,
    before: MeshStats,
    after: MeshStats,
    device: Option<String>,
    previews: Vec<String>,
    written: Vec<PathBuf>,
    manifest: Option<PathBuf>,
    failure: Option<(Stage, Error)>,
}

impl JobRecord {
    /// Record a finished stage and return the state it led to
    fn complete(&mut self, stage: Stage, outcome: StageOutcome, elapsed: Duration) -> PipelineState {
        match &outcome {
            StageOutcome::Skipped(reason) => info!(%stage, %reason, "stage skipped"),
            StageOutcome::Degraded(degradations) => {
                for degradation in degradations {
                    warn!(%stage, kind = degradation.kind.as_str(), "{}", degradation.message);
                }
            }
            StageOutcome::Completed => {}
        }
        self.degradations.extend(outcome.degradations().iter().cloned());
        self.timings.push((stage, elapsed));

        let state = stage.completes();
        info!(%stage, state = %state, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
        self.history.push(state.clone());
        state
    }

    fn fail(&mut self, stage: Stage, err: Error) {
        error!(%stage, error = %err, "stage failed");
        for path in self.written.drain(..).rev() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed artifact of failed job"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove artifact"),
            }
        }
        self.manifest = None;
        self.history.push(PipelineState::Failed {
            stage,
            reason: err.to_string(),
        });
        self.failure = Some((stage, err));
    }

    fn into_report(self) -> JobReport {
        let state = self.history.last().cloned().unwrap_or(PipelineState::Failed {
            stage: Stage::Import,
            reason: "job did not start".to_string(),
        });
        JobReport {
            state,
            history: self.history,
            degradations: self.degradations,
            error: self.failure.map(|(_, e)| e),
            before: self.before,
            after: self.after,
            device: self.device,
            timings: self.timings,
            manifest: self.manifest,
        }
    }
}

/// Sequences the stages of one job
pub struct Orchestrator {
    options: JobOptions,
    preview: Option<Box<dyn PreviewRenderer>>,
}

impl Orchestrator {
    /// Validate `options` and build an orchestrator around them
    pub fn new(options: JobOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, preview: None })
    }

    pub fn with_preview(mut self, renderer: impl PreviewRenderer + 'static) -> Self {
        self.preview = Some(Box::new(renderer));
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Run the whole pipeline. Never panics on bad input; the outcome is in
    /// the returned report.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output_dir: Q) -> JobReport {
        let input = input.as_ref();
        let output_dir = output_dir.as_ref();
        let span = info_span!("job", input = %input.display());
        let _enter = span.enter();
        let mut record = JobRecord::default();

        let started = Instant::now();
        let mut scene = match self.import(input) {
            Ok((scene, outcome)) => {
                record.complete(Stage::Import, outcome, started.elapsed());
                scene
            }
            Err(e) => {
                record.fail(Stage::Import, e);
                return record.into_report();
            }
        };

        let mut next = Stage::Import.completes().next_stage();
        while let Some(stage) = next {
            let started = Instant::now();
            match self.run_stage(stage, &mut scene, &mut record, input, output_dir) {
                Ok(outcome) => next = record.complete(stage, outcome, started.elapsed()).next_stage(),
                Err(e) => {
                    record.fail(stage, e);
                    next = None;
                }
            }
        }

        info!(
            before_verts = record.before.vertices,
            before_faces = record.before.faces,
            after_verts = record.after.vertices,
            after_faces = record.after.faces,
            degraded = record.degradations.len(),
            "job finished"
        );
        record.into_report()
    }

    fn run_stage(
        &self,
        stage: Stage,
        scene: &mut Scene,
        record: &mut JobRecord,
        input: &Path,
        output_dir: &Path,
    ) -> Result<StageOutcome> {
        match stage {
            Stage::Import => Err(Error::Algorithm("import runs once per job".to_string())),
            Stage::Prepare => self.prepare(scene, record),
            Stage::Simplify => self.simplify(scene),
            Stage::Repair => self.repair(scene),
            Stage::Conform => self.conform(scene, record),
            Stage::Unwrap => self.unwrap(scene),
            Stage::Bake => self.bake(scene, record),
            Stage::Export => self.export(scene, record, output_dir),
            Stage::Finish => self.finish(record, input, output_dir),
        }
    }

    fn import(&self, input: &Path) -> Result<(Scene, StageOutcome)> {
        let asset = import_asset(input)?;
        if asset.mesh.face_count() == 0 {
            return Err(Error::EmptyGeometry(format!("{} has no faces", input.display())));
        }
        info!(
            objects = asset.mesh_objects,
            vertices = asset.mesh.vertex_count(),
            faces = asset.mesh.face_count(),
            "imported high mesh"
        );
        Ok((Scene::new(input, asset.mesh, asset.material), StageOutcome::Completed))
    }

    /// Weld the working copy by position; the high mesh keeps its UVs
    fn prepare(&self, scene: &mut Scene, record: &mut JobRecord) -> Result<StageOutcome> {
        let epsilon = scene.high().diagonal() * WELD_RELATIVE_EPSILON;
        let mut low = scene.high().welded(epsilon);
        low.remove_unreferenced_vertices();
        if low.face_count() == 0 {
            return Err(Error::EmptyGeometry("no faces left after welding".to_string()));
        }
        debug!(
            epsilon,
            merged = scene.high().vertex_count().saturating_sub(low.vertex_count()),
            "welded low mesh"
        );
        *scene.low_mut() = low;
        record.before = scene.stats(MeshRole::Low);
        Ok(StageOutcome::Completed)
    }

    /// Optional voxel remesh, then decimation to the triangle budget
    fn simplify(&self, scene: &mut Scene) -> Result<StageOutcome> {
        let options = &self.options;
        let mut outcome = StageOutcome::Completed;

        if options.remesh_voxel_size > 0.0 {
            let config = RemeshConfig::new(options.remesh_voxel_size)
                .with_remove_disconnected(options.remesh_remove_disconnected)
                .with_max_cells(options.max_remesh_cells);
            let (remeshed, remesh_outcome) = voxel_remesh(scene.low(), &config)?;
            *scene.low_mut() = remeshed;
            outcome = outcome.merge(remesh_outcome);
        }

        let simplifier = EdgeCollapseSimplifier::new().with_volume_tolerance(options.volume_tolerance as f64);
        let (simplified, simplify_outcome) = simplify_to_target(&simplifier, scene.low(), options.target_tris)?;
        *scene.low_mut() = simplified;
        Ok(outcome.merge(simplify_outcome))
    }

    fn repair(&self, scene: &mut Scene) -> Result<StageOutcome> {
        let low = scene.low_mut();
        let holes = fill_holes(
            low,
            &HoleFillConfig {
                max_edges: self.options.max_hole_edges,
            },
        );
        let normals = recalculate_normals(low, self.options.auto_smooth_angle);
        debug!(
            filled = holes.filled,
            faces_added = holes.faces_added,
            flipped = normals.flipped_faces,
            hard_edges = normals.hard_edges,
            "repaired low mesh"
        );

        let degradations = holes
            .skipped
            .iter()
            .map(|edges| {
                Degradation::new(
                    DegradationKind::HoleTooLarge,
                    format!(
                        "hole with {} edges exceeds the limit of {} and stays open",
                        edges, self.options.max_hole_edges
                    ),
                )
            })
            .collect();
        Ok(StageOutcome::from_degradations(degradations))
    }

    fn conform(&self, scene: &mut Scene, record: &mut JobRecord) -> Result<StageOutcome> {
        let (high, low) = scene.high_and_low_mut();
        let outcome = conform_to_surface(low, high, self.options.shrinkwrap_offset)?;
        record.after = scene.stats(MeshRole::Low);
        Ok(outcome)
    }

    fn unwrap(&self, scene: &mut Scene) -> Result<StageOutcome> {
        let config = UvUnwrapConfig {
            angle_limit: self.options.uv_angle_limit,
            margin: self.options.island_margin,
        };
        let layout = unwrap_uvs(scene.low_mut(), &config)?;
        debug!(islands = layout.islands.len(), scale = layout.scale, margin = layout.margin, "unwrapped low mesh");
        scene.islands = layout.islands;
        Ok(StageOutcome::from_degradations(layout.degradations))
    }

    fn bake(&self, scene: &mut Scene, record: &mut JobRecord) -> Result<StageOutcome> {
        let options = &self.options;
        let (backend, fallback) = select_backend(options.prefer_gpu);
        let config = BakeConfig::new(options.tex_size)
            .with_ray_distance(options.ray_distance)
            .with_cage_extrusion(options.cage_extrusion)
            .with_margin(options.bake_margin);
        let (outcome, stats) = SurfaceBaker::new(config, backend.as_ref()).bake_scene(scene)?;
        debug!(covered = stats.covered, hits = stats.hits, misses = stats.misses, "baked atlases");
        record.device = Some(stats.backend);

        let device_outcome = StageOutcome::from_degradations(fallback.into_iter().collect());
        Ok(device_outcome.merge(outcome))
    }

    /// Encode every artifact in memory, then write them all
    fn export(&self, scene: &Scene, record: &mut JobRecord, output_dir: &Path) -> Result<StageOutcome> {
        let atlas = scene
            .atlas
            .as_ref()
            .ok_or_else(|| Error::Export("no baked atlas to export".to_string()))?;
        let pngs = encode_atlas(atlas)?;
        let glb = encode_glb(
            scene.low(),
            Some(&GlbTextures {
                base_color_png: &pngs.base_color_png,
                normal_png: &pngs.normal_png,
            }),
        )?;

        let mut degradations = Vec::new();
        let mut previews: Vec<(&str, Vec<u8>)> = Vec::new();
        if let Some(renderer) = &self.preview {
            let renders = [
                (PREVIEW_BEFORE_FILE, renderer.render(scene.high(), None)),
                (PREVIEW_AFTER_FILE, renderer.render(scene.low(), Some(&atlas.base_color))),
            ];
            for (name, render) in renders {
                match render {
                    Ok(bytes) => previews.push((name, bytes)),
                    Err(e) => degradations.push(Degradation::new(
                        DegradationKind::PreviewFailed,
                        format!("{}: {}", name, e),
                    )),
                }
            }
        }

        let textures_dir = output_dir.join(TEXTURES_DIR);
        std::fs::create_dir_all(&textures_dir)?;
        let mut files: Vec<(PathBuf, &[u8])> = vec![
            (textures_dir.join(BASE_COLOR_FILE), pngs.base_color_png.as_slice()),
            (textures_dir.join(NORMAL_FILE), pngs.normal_png.as_slice()),
            (output_dir.join(MODEL_FILE), glb.as_slice()),
        ];
        files.extend(previews.iter().map(|(name, bytes)| (output_dir.join(name), bytes.as_slice())));

        for (path, bytes) in files {
            std::fs::write(&path, bytes)
                .map_err(|e| Error::Export(format!("{}: {}", path.display(), e)))?;
            debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
            record.written.push(path);
        }
        record.previews = previews.iter().map(|(name, _)| name.to_string()).collect();
        info!(dir = %output_dir.display(), previews = record.previews.len(), "exported asset");

        Ok(StageOutcome::from_degradations(degradations))
    }

    fn finish(&self, record: &mut JobRecord, input: &Path, output_dir: &Path) -> Result<StageOutcome> {
        let mut manifest = Manifest::new(input.display().to_string());
        for (key, value) in self.options.manifest_settings() {
            manifest = manifest.with_setting(key, value);
        }
        manifest.before = record.before;
        manifest.after = record.after;
        manifest.textures = vec![BASE_COLOR_FILE.to_string(), NORMAL_FILE.to_string()];
        manifest.previews = record.previews.clone();
        manifest.export = MODEL_FILE.to_string();
        manifest.device = record.device.clone().unwrap_or_else(|| "none".to_string());
        manifest.states = record
            .history
            .iter()
            .chain(std::iter::once(&Stage::Finish.completes()))
            .map(|s| s.name().to_string())
            .collect();
        manifest.degraded = record.degradations.clone();

        let path = output_dir.join(MANIFEST_FILE);
        manifest.write(&path)?;
        record.written.push(path.clone());
        record.manifest = Some(path);
        Ok(StageOutcome::Completed)
    }
}
