//! Pipeline orchestration
//!
//! Drives one build through the fixed stage sequence:
//!
//! ```text
//! Idle → WorkspaceReady → [hit]  DependenciesReady → Compiled → Packed → Exported → Done
//!                       → [miss] Installing → DependenciesReady → ...
//! ```
//!
//! Any failure ends in `Failed`. The workspace guard is dropped on every
//! exit path, and compile/pack outputs are promoted into the project's state
//! directory so later `pack`-only and `export`-only runs can pick them up.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::defaults::{IN_PROCESS_TIMEOUT_SECS, VENDOR_KIND};
use crate::core::cache::{CacheStore, MARKER_FILE};
use crate::core::fingerprint::{fingerprint_manifests, Fingerprint};
use crate::core::project::ProjectConfig;
use crate::core::stage::{millis, Stage, StageCommand, StageName, StageRecord};
use crate::error::{ConfigError, ExitInfo, KilnError, StageError};
use crate::infra::filesystem;
use crate::infra::process::StageRunner;
use crate::infra::workspace::BuildWorkspace;

/// Which part of the pipeline a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryPoint {
    /// Dependencies, compile, pack and export
    Full,
    /// Dependencies, pack and export, reusing the last compile output
    PackOnly,
    /// Export of the last pack output only
    ExportOnly,
}

/// A request to run the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildRequest {
    /// Entry point
    pub entry: EntryPoint,
    /// Development mode (stage arguments only)
    pub dev: bool,
}

impl BuildRequest {
    /// Full build
    pub fn full(dev: bool) -> Self {
        Self {
            entry: EntryPoint::Full,
            dev,
        }
    }
}

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    WorkspaceReady,
    Installing,
    DependenciesReady,
    Compiled,
    Packed,
    Exported,
    Done,
    Failed,
}

/// How dependencies were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    /// Restored from a cache entry
    Hit,
    /// Installer ran
    Miss,
    /// Not needed for this entry point
    Skipped,
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Project name
    pub project: String,
    /// Entry point that ran
    pub entry: EntryPoint,
    /// Development mode
    pub dev: bool,
    /// Manifest fingerprint, when dependencies were resolved
    pub fingerprint: Option<Fingerprint>,
    /// Cache outcome
    pub cache: CacheOutcome,
    /// States visited, in order
    pub states: Vec<PipelineState>,
    /// Per-stage records
    pub stages: Vec<StageRecord>,
    /// Published artifact
    pub artifact: PathBuf,
    /// Size of the published artifact in bytes
    pub artifact_size: u64,
    /// Total wall time
    pub elapsed_ms: u64,
}

/// A failed run: the failing stage, what ran before it, and why
#[derive(Debug, Error)]
#[error("Build failed at stage '{stage}': {source}")]
pub struct PipelineFailure {
    /// Stage that failed
    pub stage: StageName,
    /// States visited, ending in `Failed`
    pub states: Vec<PipelineState>,
    /// Records of the stages that ran, including the failed one
    pub stages: Vec<StageRecord>,
    /// Underlying error
    #[source]
    pub source: KilnError,
}

impl PipelineFailure {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}

/// Called with each stage name as it starts
pub type StageObserver = Arc<dyn Fn(StageName) + Send + Sync>;

/// Build pipeline for one project
#[derive(Clone)]
pub struct Pipeline {
    project_dir: PathBuf,
    config: ProjectConfig,
    scratch_root: PathBuf,
    cache_max_age: Option<Duration>,
    observer: Option<StageObserver>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("project_dir", &self.project_dir)
            .field("project", &self.config.project.name)
            .field("scratch_root", &self.scratch_root)
            .field("cache_max_age", &self.cache_max_age)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline for a loaded project
    pub fn new(
        project_dir: impl Into<PathBuf>,
        config: ProjectConfig,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
            scratch_root: scratch_root.into(),
            cache_max_age: None,
            observer: None,
        }
    }

    /// Evict cache entries older than `max_age` after each successful run
    #[must_use]
    pub fn with_cache_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.cache_max_age = max_age;
        self
    }

    /// Report stage starts, e.g. to drive a spinner
    #[must_use]
    pub fn with_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Project configuration
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Project root
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Dependency cache of this project
    pub fn cache(&self) -> CacheStore {
        CacheStore::new(&self.scratch_root, &self.config.project.name)
    }

    /// Where a stage's output is promoted after success
    pub fn artifact_path(&self, stage: StageName, output: &Path) -> PathBuf {
        self.state_dir()
            .join("artifacts")
            .join(stage.as_str())
            .join(output.file_name().unwrap_or(output.as_os_str()))
    }

    /// Directory holding full stage logs
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Final location of an exported artifact.
    ///
    /// A directory bundle becomes the export directory itself; a single
    /// file is placed inside it.
    pub fn export_path(&self, artifact: &Path) -> PathBuf {
        let export_dir = self.project_dir.join(&self.config.project.export_dir);
        if artifact.is_dir() {
            export_dir
        } else {
            export_dir.join(artifact.file_name().unwrap_or(artifact.as_os_str()))
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_dir.join(&self.config.project.state_dir)
    }

    /// Where exports are assembled; inside the state dir so the watcher
    /// never sees them
    fn staging_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    /// Run the pipeline once.
    ///
    /// Holds the project's workspace lock for the whole run; a concurrent
    /// run of the same project waits.
    pub async fn run(&self, request: &BuildRequest) -> Result<PipelineReport, PipelineFailure> {
        let mut run = Run::new(self, *request);
        info!(project = %self.config.project.name, entry = ?request.entry, dev = request.dev, "starting build");

        let workspace = match BuildWorkspace::acquire(
            &self.scratch_root,
            &self.config.project.name,
            &self.project_dir,
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => return Err(run.fail(StageName::PrepareWorkspace, Duration::ZERO, e)),
        };

        let result = run.execute(workspace.path()).await;
        drop(workspace);

        match &result {
            Ok(report) => {
                info!(elapsed_ms = report.elapsed_ms, cache = ?report.cache, "build finished");
                self.housekeeping().await;
            }
            Err(failure) => warn!(stage = %failure.stage, "build failed"),
        }
        result
    }

    async fn housekeeping(&self) {
        let Some(max_age) = self.cache_max_age else {
            return;
        };
        let cache = self.cache();
        match tokio::task::spawn_blocking(move || cache.evict(VENDOR_KIND, max_age)).await {
            Ok(Ok(report)) => debug!(?report, "cache housekeeping done"),
            Ok(Err(e)) => warn!(error = %e, "cache housekeeping failed"),
            Err(e) => warn!(error = %e, "cache housekeeping task failed"),
        }
    }
}

/// State of a single in-flight run
struct Run<'a> {
    pipeline: &'a Pipeline,
    request: BuildRequest,
    runner: StageRunner,
    started: Instant,
    states: Vec<PipelineState>,
    stages: Vec<StageRecord>,
    fingerprint: Option<Fingerprint>,
    cache: CacheOutcome,
}

impl<'a> Run<'a> {
    fn new(pipeline: &'a Pipeline, request: BuildRequest) -> Self {
        Self {
            pipeline,
            request,
            runner: StageRunner::new(pipeline.log_dir()).with_dev(request.dev),
            started: Instant::now(),
            states: vec![PipelineState::Idle],
            stages: Vec::new(),
            fingerprint: None,
            cache: CacheOutcome::Skipped,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        debug!(?state, "pipeline state");
        self.states.push(state);
    }

    fn config(&self) -> &'a ProjectConfig {
        &self.pipeline.config
    }

    async fn execute(&mut self, ws: &Path) -> Result<PipelineReport, PipelineFailure> {
        let entry = self.request.entry;

        if entry == EntryPoint::ExportOnly {
            self.skip(StageName::PrepareWorkspace);
        } else {
            let prepare = self.prepare_stage();
            self.run_stage(&prepare, ws).await?;
        }
        self.enter(PipelineState::WorkspaceReady);

        if entry == EntryPoint::ExportOnly {
            self.skip(StageName::ResolveDependencies);
        } else {
            self.resolve_dependencies(ws).await?;
            self.enter(PipelineState::DependenciesReady);
        }

        let compile_output = &self.config().stages.compile.output;
        match entry {
            EntryPoint::Full => {
                let compile = self.command_stage(StageName::Compile)?;
                self.run_stage_checked(&compile, ws).await?;
                self.promote(StageName::Compile, &ws.join(compile_output))?;
                self.enter(PipelineState::Compiled);
            }
            EntryPoint::PackOnly => {
                self.skip(StageName::Compile);
                let promoted = self.pipeline.artifact_path(StageName::Compile, compile_output);
                self.restore_artifact(StageName::Pack, &promoted, &ws.join(compile_output))?;
            }
            EntryPoint::ExportOnly => self.skip(StageName::Compile),
        }

        let pack_output = &self.config().stages.pack.output;
        let promoted_pack = self.pipeline.artifact_path(StageName::Pack, pack_output);
        if entry == EntryPoint::ExportOnly {
            self.skip(StageName::Pack);
            if !promoted_pack.exists() {
                return Err(self.fail(
                    StageName::Export,
                    self.started.elapsed(),
                    StageError::PrecedingArtifactMissing {
                        stage: StageName::Export,
                        path: promoted_pack,
                    },
                ));
            }
        } else {
            let pack = self
                .command_stage(StageName::Pack)?
                .with_input(Some(self.config().pack_input()));
            self.run_stage_checked(&pack, ws).await?;
            self.promote(StageName::Pack, &ws.join(pack_output))?;
            self.enter(PipelineState::Packed);
        }

        let export_dest = self.pipeline.export_path(&promoted_pack);
        let export = {
            let from = promoted_pack.clone();
            let dest = export_dest.clone();
            let staging_root = self.pipeline.staging_dir();
            Stage::in_process(StageName::Export, in_process_timeout(), move |_| {
                filesystem::publish_via(&from, &dest, &staging_root)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
        };
        self.run_stage(&export, ws).await?;
        self.enter(PipelineState::Exported);
        self.enter(PipelineState::Done);

        Ok(PipelineReport {
            project: self.config().project.name.clone(),
            entry,
            dev: self.request.dev,
            fingerprint: self.fingerprint.clone(),
            cache: self.cache,
            states: std::mem::take(&mut self.states),
            stages: std::mem::take(&mut self.stages),
            artifact_size: filesystem::tree_size(&export_dest),
            artifact: export_dest,
            elapsed_ms: millis(self.started.elapsed()),
        })
    }

    /// Copy sources and manifests into the workspace, minus generated paths
    fn prepare_stage(&self) -> Stage {
        let project_dir = self.pipeline.project_dir.clone();
        let config = self.config();
        let source = config.project.source.clone();
        let source_root = project_dir.join(&source);
        let manifests = config.project.manifests.clone();

        let mut ignored: Vec<PathBuf> = config
            .generated_paths()
            .iter()
            .map(|p| project_dir.join(p))
            .collect();
        // Stale local stage outputs must not satisfy the output checks
        ignored.push(project_dir.join(&config.stages.compile.output));
        ignored.push(project_dir.join(&config.stages.pack.output));
        ignored.push(self.pipeline.scratch_root.clone());

        Stage::in_process(StageName::PrepareWorkspace, in_process_timeout(), move |ctx| {
            let dest = ctx.workspace.join(&source);
            let copied = filesystem::copy_tree(&source_root, &dest, |rel| {
                let abs = source_root.join(rel);
                ignored.iter().any(|i| abs.starts_with(i))
            })
            .map_err(|e| e.to_string())?;

            // Manifests may live outside the source tree
            for manifest in &manifests {
                let from = project_dir.join(manifest);
                if from.is_file() {
                    filesystem::copy_path(&from, &ctx.workspace.join(manifest))
                        .map_err(|e| e.to_string())?;
                }
            }
            tracing::debug!(files = copied, "workspace populated");
            Ok(())
        })
    }

    async fn resolve_dependencies(&mut self, ws: &Path) -> Result<(), PipelineFailure> {
        let config = self.config();
        let stage = StageName::ResolveDependencies;
        let manifests = config.manifest_paths(&self.pipeline.project_dir);
        let fingerprint = fingerprint_manifests(&manifests)
            .map_err(|e| self.fail(stage, self.started.elapsed(), e))?;
        self.fingerprint = Some(fingerprint.clone());

        let cache = self.pipeline.cache();
        let deps_dir = ws.join(&config.dependencies.dir);

        if let Some(entry) = cache.lookup(VENDOR_KIND, &fingerprint) {
            let restore = {
                let dest = deps_dir.clone();
                Stage::in_process(stage, in_process_timeout(), move |_| {
                    filesystem::copy_tree(&entry, &dest, |rel| rel == Path::new(MARKER_FILE))
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
            };
            self.notify(stage);
            let offset = self.started.elapsed();
            match self.runner.run(&restore, ws, offset).await {
                Ok(record) => {
                    info!(%fingerprint, "dependencies restored from cache");
                    self.stages.push(record);
                    self.cache = CacheOutcome::Hit;
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "failed to restore cached dependencies, reinstalling");
                    if let Err(e) = filesystem::remove_path(&deps_dir) {
                        warn!(error = %e, "failed to clear partial dependency copy");
                    }
                }
            }
        }

        info!(%fingerprint, "dependency cache miss, running installer");
        self.cache = CacheOutcome::Miss;
        self.enter(PipelineState::Installing);

        let command = StageCommand::from_argv(&config.dependencies.command).ok_or_else(|| {
            self.fail(
                stage,
                self.started.elapsed(),
                ConfigError::Invalid {
                    message: "dependencies.command must not be empty".to_string(),
                },
            )
        })?;
        let install = Stage::command(
            stage,
            command,
            Duration::from_secs(config.dependencies.timeout_secs),
        )
        .with_output(Some(config.dependencies.dir.clone()));
        self.run_stage_checked(&install, ws).await?;

        let commit_fp = fingerprint.clone();
        match tokio::task::spawn_blocking(move || cache.commit(VENDOR_KIND, &commit_fp, &deps_dir))
            .await
        {
            Ok(Ok(path)) => debug!(path = %path.display(), "dependencies cached"),
            Ok(Err(e)) => warn!(error = %e, "failed to cache dependencies"),
            Err(e) => warn!(error = %e, "cache commit task failed"),
        }
        Ok(())
    }

    fn command_stage(&self, name: StageName) -> Result<Stage, PipelineFailure> {
        let stages = &self.config().stages;
        let config = match name {
            StageName::Pack => &stages.pack,
            _ => &stages.compile,
        };
        Stage::from_config(name, config).ok_or_else(|| {
            self.fail_ref(
                name,
                ConfigError::Invalid {
                    message: format!("stages.{name}.command must not be empty"),
                },
            )
        })
    }

    /// Run a stage whose declared input must exist before and whose
    /// declared output must exist after
    async fn run_stage_checked(&mut self, stage: &Stage, ws: &Path) -> Result<(), PipelineFailure> {
        let ctx = stage.context(ws, self.request.dev);
        if let Some(input) = ctx.input.filter(|p| !p.exists()) {
            return Err(self.fail(
                stage.name,
                self.started.elapsed(),
                StageError::PrecedingArtifactMissing {
                    stage: stage.name,
                    path: input,
                },
            ));
        }

        self.run_stage(stage, ws).await?;

        if let Some(output) = ctx.output.filter(|p| !p.exists()) {
            // Replace the success record with a failure
            self.stages.pop();
            return Err(self.fail(
                stage.name,
                self.started.elapsed(),
                StageError::OutputMissing {
                    stage: stage.name,
                    path: output,
                },
            ));
        }
        Ok(())
    }

    async fn run_stage(&mut self, stage: &Stage, ws: &Path) -> Result<(), PipelineFailure> {
        self.notify(stage.name);
        let offset = self.started.elapsed();
        match self.runner.run(stage, ws, offset).await {
            Ok(record) => {
                self.stages.push(record);
                Ok(())
            }
            Err(e) => Err(self.fail(stage.name, offset, e)),
        }
    }

    fn promote(&mut self, stage: StageName, output: &Path) -> Result<(), PipelineFailure> {
        let dest = self.pipeline.artifact_path(stage, output);
        match filesystem::publish(output, &dest) {
            Ok(path) => {
                debug!(stage = %stage, path = %path.display(), "promoted artifact");
                Ok(())
            }
            Err(e) => Err(self.fail(stage, self.started.elapsed(), e)),
        }
    }

    fn restore_artifact(
        &mut self,
        stage: StageName,
        promoted: &Path,
        dest: &Path,
    ) -> Result<(), PipelineFailure> {
        if !promoted.exists() {
            return Err(self.fail(
                stage,
                self.started.elapsed(),
                StageError::PrecedingArtifactMissing {
                    stage,
                    path: promoted.to_path_buf(),
                },
            ));
        }
        filesystem::copy_path(promoted, dest)
            .map_err(|e| self.fail(stage, self.started.elapsed(), e))
    }

    fn skip(&mut self, name: StageName) {
        debug!(stage = %name, "stage skipped");
        self.stages
            .push(StageRecord::skipped(name, self.started.elapsed()));
    }

    fn notify(&self, name: StageName) {
        if let Some(observer) = &self.pipeline.observer {
            observer(name);
        }
    }

    /// Close the run as failed at `stage`
    fn fail(
        &mut self,
        stage: StageName,
        started_after: Duration,
        source: impl Into<KilnError>,
    ) -> PipelineFailure {
        let source = source.into();
        self.stages.push(failure_record(stage, started_after, self.started.elapsed(), &source));
        self.states.push(PipelineState::Failed);
        PipelineFailure {
            stage,
            states: std::mem::take(&mut self.states),
            stages: std::mem::take(&mut self.stages),
            source,
        }
    }

    /// Like [`Run::fail`] for paths that only hold a shared borrow
    fn fail_ref(&self, stage: StageName, source: impl Into<KilnError>) -> PipelineFailure {
        let source = source.into();
        let elapsed = self.started.elapsed();
        let mut stages = self.stages.clone();
        stages.push(failure_record(stage, elapsed, elapsed, &source));
        let mut states = self.states.clone();
        states.push(PipelineState::Failed);
        PipelineFailure {
            stage,
            states,
            stages,
            source,
        }
    }
}

fn failure_record(
    stage: StageName,
    started_after: Duration,
    now: Duration,
    source: &KilnError,
) -> StageRecord {
    let mut record = StageRecord::failed(stage, started_after, now.saturating_sub(started_after));
    if let KilnError::Stage(StageError::StageFailure {
        exit, log, output, ..
    }) = source
    {
        if let ExitInfo::Code(code) = exit {
            record.exit_code = Some(*code);
        }
        record.output.clone_from(output);
        record.log = Some(log.clone());
    }
    record
}

fn in_process_timeout() -> Duration {
    Duration::from_secs(IN_PROCESS_TIMEOUT_SECS)
}
