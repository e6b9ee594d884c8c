// Upload orchestration.
// - Every discovered file becomes an `UploadTask` that moves through
//   `Pending → Uploading → Processing → Done`, or ends in `Failed`.
// - Tasks run one at a time in inventory order.
// - Per-file failures are recorded in the `RunReport` and the run continues;
//   only fatal errors (rejected key, configuration) abort it.

use chrono::{DateTime, Local};
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::{AssessmentId, NewAssessment, PlatformApi, RemoteState, UploadId, UploadTarget};
use crate::archive::Archivist;
use crate::config::{RunConfiguration, ARCHIVE_FOLDER};
use crate::error::{Result, UploadError};
use crate::retry::Clock;
use crate::scope::{resolve_scope, ResolvedScope};
use crate::ui::Chooser;

/// Marker file shipped in the files folder; never uploaded.
pub const PLACEHOLDER_FILE: &str = "PLACE_FILES_TO_SCAN_HERE.txt";

/// Names never uploaded, even when passed on the command line.
const SKIPPED_FILES: [&str; 2] = [PLACEHOLDER_FILE, "config.toml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Uploading,
    Processing,
    Done,
    Failed,
}

/// One scan file and its progress through the platform.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub path: PathBuf,
    /// Where the file goes once ingested.
    pub archive_folder: PathBuf,
    pub upload_id: Option<UploadId>,
    pub status: TaskStatus,
    /// Requests tried while uploading: 1 plus every retry of any step.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl UploadTask {
    pub fn new(path: PathBuf, archive_folder: PathBuf) -> Self {
        UploadTask {
            path,
            archive_folder,
            upload_id: None,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn fail(&mut self, reason: String) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason);
    }
}

/// The files of a run, ordered by file name.
#[derive(Debug, Clone, Default)]
pub struct FileInventory {
    tasks: Vec<UploadTask>,
}

impl FileInventory {
    /// Regular files directly inside `folder`. Subfolders (the archive among
    /// them) and the placeholder file are skipped. Files are archived into
    /// `folder/archive`.
    pub fn discover(folder: &Path) -> Result<Self> {
        let entries = fs::read_dir(folder).map_err(|e| UploadError::io(folder, e))?;
        let archive_folder = folder.join(ARCHIVE_FOLDER);
        let mut tasks = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| UploadError::io(folder, e))?.path();
            if !path.is_file() {
                continue;
            }
            if path.file_name().is_some_and(|n| n == PLACEHOLDER_FILE) {
                continue;
            }
            tasks.push(UploadTask::new(path, archive_folder.clone()));
        }
        Ok(Self::sorted(tasks))
    }

    /// Files named explicitly; each one must exist. Each file is archived
    /// into an `archive` folder next to it. The placeholder and
    /// `config.toml` are skipped.
    pub fn from_paths(paths: &[PathBuf]) -> Result<Self> {
        let mut tasks = Vec::new();
        for path in paths {
            if !path.is_file() {
                return Err(UploadError::Configuration(format!(
                    "'{}' is not a file",
                    path.display()
                )));
            }
            if path
                .file_name()
                .is_some_and(|n| SKIPPED_FILES.iter().any(|skipped| n == *skipped))
            {
                tracing::info!(path = %path.display(), "skipping");
                continue;
            }
            let archive_folder = path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(ARCHIVE_FOLDER);
            tasks.push(UploadTask::new(path.clone(), archive_folder));
        }
        Ok(Self::sorted(tasks))
    }

    /// Explicit files when given, otherwise the files folder. Creates the
    /// archive folders explicit files need.
    pub fn for_run(config: &RunConfiguration) -> Result<Self> {
        if config.explicit_files.is_empty() {
            return Self::discover(&config.files_folder);
        }
        let inventory = Self::from_paths(&config.explicit_files)?;
        for task in &inventory.tasks {
            fs::create_dir_all(&task.archive_folder).map_err(|e| UploadError::io(&task.archive_folder, e))?;
        }
        Ok(inventory)
    }

    fn sorted(mut tasks: Vec<UploadTask>) -> Self {
        tasks.sort_by(|a, b| {
            a.path
                .file_name()
                .cmp(&b.path.file_name())
                .then_with(|| a.path.cmp(&b.path))
        });
        tasks.dedup_by(|a, b| a.path == b.path);
        FileInventory { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[UploadTask] {
        &self.tasks
    }
}

/// A failure attributed to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// What happened to every file of the run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub scope: Option<ResolvedScope>,
    pub assessment_id: Option<AssessmentId>,
    /// Archive paths of files that were ingested and moved.
    pub archived: Vec<PathBuf>,
    /// Files left in place because upload or processing failed.
    pub failed: Vec<FileFailure>,
    /// Files ingested but not moved; they stay in the files folder.
    pub archive_failures: Vec<FileFailure>,
    /// URBA triggers that failed after a successful ingestion.
    pub urba_failures: Vec<FileFailure>,
    /// Final state of every task.
    pub tasks: Vec<UploadTask>,
}

impl RunReport {
    /// True when every file was ingested, archived and (if asked) scored.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.archive_failures.is_empty() && self.urba_failures.is_empty()
    }
}

/// Label shared by every upload of a run: `upload-YYYY-MM-DD-<unix secs>`.
pub fn run_label(now: DateTime<Local>) -> String {
    format!("upload-{}-{}", now.format("%Y-%m-%d"), now.timestamp())
}

/// Drives the tasks of one run against a resolved target.
pub struct Orchestrator<'a> {
    api: &'a dyn PlatformApi,
    config: &'a RunConfiguration,
    clock: &'a dyn Clock,
    target: UploadTarget,
    run_label: String,
    progress: ProgressBar,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        api: &'a dyn PlatformApi,
        config: &'a RunConfiguration,
        clock: &'a dyn Clock,
        target: UploadTarget,
        run_label: impl Into<String>,
    ) -> Self {
        Orchestrator {
            api,
            config,
            clock,
            target,
            run_label: run_label.into(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Process every task in order. Returns `Err` only for fatal errors;
    /// files already archived stay archived.
    pub fn run(&self, inventory: FileInventory) -> Result<RunReport> {
        let mut report = RunReport::default();
        self.progress.set_length(inventory.len() as u64);

        for mut task in inventory.tasks {
            self.progress.set_message(task.file_name());
            let outcome = self.process(&mut task, &mut report);
            self.progress.inc(1);
            report.tasks.push(task);
            outcome?;
        }

        self.progress.finish_with_message("done");
        Ok(report)
    }

    fn upload_name(&self, task: &UploadTask) -> String {
        format!("{}-{}", self.run_label, task.file_name())
    }

    fn process(&self, task: &mut UploadTask, report: &mut RunReport) -> Result<()> {
        let file = task.file_name();
        tracing::info!(file = %file, "processing");

        let urba_refused = match self.ingest(task) {
            Ok(refused) => refused,
            Err(e) => {
                task.fail(e.to_string());
                if e.is_fatal() {
                    tracing::error!(file = %file, error = %e, "aborting run");
                    return Err(e);
                }
                None
            }
        };

        if task.status != TaskStatus::Done {
            let reason = task.last_error.clone().unwrap_or_else(|| "unknown failure".into());
            tracing::warn!(file = %file, attempts = task.attempts, reason = %reason, "file failed, leaving it in place");
            report.failed.push(FileFailure {
                path: task.path.clone(),
                reason,
            });
            return Ok(());
        }

        // The file is ingested from here on: nothing below may re-queue it.
        match Archivist::new(&task.archive_folder).archive(&task.path) {
            Ok(destination) => {
                tracing::info!(file = %file, archive = %destination.display(), "ingested and archived");
                report.archived.push(destination);
            }
            Err(e) => {
                tracing::error!(file = %file, error = %e, "ingested but could not be archived");
                report.archive_failures.push(FileFailure {
                    path: task.path.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if let Some(e) = urba_refused {
            report.urba_failures.push(FileFailure {
                path: task.path.clone(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Upload, then wait for processing. A remote failure or timeout leaves
    /// the task `Failed` and returns `Ok`. `Ok(Some(_))` carries the reason
    /// the platform refused URBA for a file it did process.
    fn ingest(&self, task: &mut UploadTask) -> Result<Option<UploadError>> {
        let urba_refused = self.upload(task)?;
        self.await_processing(task)?;
        Ok(urba_refused)
    }

    /// Create the upload, attach the file and start processing.
    ///
    /// Each step runs under the retry policy. None of them is idempotent, so
    /// once any try has failed every later try first checks whether an
    /// earlier one already took effect and resumes from there.
    fn upload(&self, task: &mut UploadTask) -> Result<Option<UploadError>> {
        let name = self.upload_name(task);
        let file = task.file_name();
        let path = task.path.clone();
        let client_id = self.target.client_id;
        task.status = TaskStatus::Uploading;
        task.attempts = 1;
        let mut resuming = false;

        let upload_id = self.step(
            task,
            &mut resuming,
            &format!("creating upload for {}", file),
            || self.api.find_upload(&self.target, &name),
            || self.api.create_upload(&self.target, &name),
        )?;
        task.upload_id = Some(upload_id);

        self.step(
            task,
            &mut resuming,
            &format!("attaching {}", file),
            || Ok((self.api.attached_files(client_id, upload_id)? > 0).then_some(())),
            || self.api.attach_file(client_id, upload_id, &path),
        )?;

        let auto_urba = self.config.auto_urba;
        let started = self.step(
            task,
            &mut resuming,
            &format!("starting processing of {}", file),
            || self.processing_started(upload_id),
            || self.api.start_processing(client_id, upload_id, auto_urba),
        );
        let urba_refused = match started {
            Ok(()) => None,
            Err(e) if auto_urba && !e.is_fatal() => {
                tracing::warn!(file = %file, error = %e, "platform refused URBA, starting without it");
                self.step(
                    task,
                    &mut resuming,
                    &format!("starting processing of {}", file),
                    || self.processing_started(upload_id),
                    || self.api.start_processing(client_id, upload_id, false),
                )?;
                Some(e)
            }
            Err(e) => return Err(e),
        };

        tracing::info!(file = %file, %upload_id, attempts = task.attempts, "uploaded, processing started");
        task.status = TaskStatus::Processing;
        Ok(urba_refused)
    }

    /// Run one upload step under the retry policy. While `resuming`,
    /// `already_done` is asked first and its answer is taken instead of
    /// repeating the step.
    fn step<T>(
        &self,
        task: &mut UploadTask,
        resuming: &mut bool,
        what: &str,
        mut already_done: impl FnMut() -> Result<Option<T>>,
        mut perform: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut tries = 0;
        self.config.retry.run(self.clock, what, || {
            tries += 1;
            if tries > 1 {
                task.attempts += 1;
                *resuming = true;
            }
            if *resuming {
                if let Some(done) = already_done()? {
                    tracing::info!(file = %task.file_name(), "{} already done by an earlier try", what);
                    return Ok(done);
                }
            }
            perform()
        })
    }

    fn processing_started(&self, upload_id: UploadId) -> Result<Option<()>> {
        let state = self.api.get_file_status(self.target.client_id, upload_id)?;
        Ok((state != RemoteState::Uploading).then_some(()))
    }

    fn await_processing(&self, task: &mut UploadTask) -> Result<()> {
        let upload_id = task
            .upload_id
            .ok_or_else(|| UploadError::Protocol("upload finished without an upload id".into()))?;
        let poll = self.config.poll;
        let deadline = self.clock.now() + poll.timeout;

        loop {
            self.clock.sleep(poll.interval);

            let last_seen = match self.api.get_file_status(self.target.client_id, upload_id) {
                Ok(RemoteState::Complete) => {
                    task.status = TaskStatus::Done;
                    return Ok(());
                }
                Ok(RemoteState::Failed(reason)) => {
                    task.fail(reason);
                    return Ok(());
                }
                Ok(state) => {
                    tracing::debug!(%upload_id, state = %state, "still processing");
                    state.to_string()
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(%upload_id, error = %e, "status check failed, will poll again");
                    e.to_string()
                }
                Err(e) => return Err(e),
            };

            if self.clock.now() >= deadline {
                task.fail(format!(
                    "platform did not finish processing within {}s (last seen: {})",
                    poll.timeout.as_secs(),
                    last_seen
                ));
                return Ok(());
            }
        }
    }
}

/// The whole run after configuration: resolve the scope, create the run's
/// assessment, then process every file.
///
/// An empty inventory returns an empty report without contacting the
/// platform.
pub fn execute(
    api: &dyn PlatformApi,
    chooser: &dyn Chooser,
    clock: &dyn Clock,
    config: &RunConfiguration,
    inventory: FileInventory,
    progress: ProgressBar,
) -> Result<RunReport> {
    if inventory.is_empty() {
        tracing::info!(folder = %config.files_folder.display(), "no files found to process");
        return Ok(RunReport::default());
    }
    tracing::info!(count = inventory.len(), "files to process identified");

    let scope = resolve_scope(api, chooser, clock, config)?;
    let config = config.with_scope(scope.client_id, scope.network_id);

    let now = Local::now();
    let assessment = NewAssessment {
        name: format!("assmnt_{}_{}", now.format("%Y-%m-%d"), now.timestamp()),
        start_date: now.format("%Y-%m-%d").to_string(),
        notes: "Assessment generated by upload-to-platform.".into(),
    };
    let assessment_id = config.retry.run(clock, "creating assessment", || {
        api.create_assessment(scope.client_id, &assessment)
    })?;

    let target = UploadTarget {
        client_id: scope.client_id,
        network_id: scope.network_id,
        assessment_id,
    };
    let label = run_label(now);
    tracing::info!(
        client_id = %target.client_id,
        network_id = %target.network_id,
        assessment_id = %assessment_id,
        assessment = %assessment.name,
        run = %label,
        "session info"
    );

    let mut report = Orchestrator::new(api, &config, clock, target, label)
        .with_progress(progress)
        .run(inventory)?;
    report.scope = Some(scope);
    report.assessment_id = Some(assessment_id);
    Ok(report)
}
