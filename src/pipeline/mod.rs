//! Run controller and directory walker.
//!
//! Walks a root directory of per-participant folders and feeds each
//! export file through the ingestion pipeline: filename routing,
//! whitelist filtering, CSV parsing, per-table transforms,
//! de-identification, and finally the backend upload. One file's failure
//! never aborts the run; per-participant outcomes are aggregated for the
//! end-of-run summary.

use snafu::prelude::*;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{self, BackendKind, Config};
use crate::error::{
    ClientSnafu, ConfigError, ConfigSnafu, LakeInitSnafu, MasterLookupSnafu, RootMissingSnafu,
    RunError, UpdateRequiresWarehouseSnafu, WalkDirSnafu, WhitelistSnafu,
};
use crate::route::{self, TableId};
use crate::sink::clickhouse::{ClickHouseClient, Warehouse};
use crate::sink::{BackendAdapter, LakeSink, WarehouseSink, WriteMode};
use crate::source::read_csv;
use crate::transform::{Registry, deidentify, inject_pid};
use crate::whitelist::Whitelist;

/// Caller-selected options for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict ingestion to these participant ids. Empty means all.
    pub pids: Vec<u32>,
    /// Ingest only participants not yet present in the master table.
    pub update: bool,
    /// Recreate lake tables instead of appending.
    pub overwrite: bool,
}

/// Aggregated outcome of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    /// Participants with at least one uploaded file and no failures.
    pub pids_succeeded: BTreeSet<u32>,
    /// Participants with at least one failed file.
    pub pids_failed: BTreeSet<u32>,
}

impl RunReport {
    fn record_success(&mut self, pid: u32) {
        self.files_uploaded += 1;
        self.pids_succeeded.insert(pid);
    }

    fn record_failure(&mut self, pid: u32) {
        self.files_failed += 1;
        self.pids_failed.insert(pid);
    }

    /// A participant counts as succeeded only when none of its files failed.
    fn finish(&mut self) {
        let failed = self.pids_failed.clone();
        self.pids_succeeded.retain(|pid| !failed.contains(pid));
    }
}

/// Operator confirmation for update mode.
///
/// Injected so the controller is testable without a terminal.
pub trait Confirm: Send + Sync {
    fn confirm(&self, pids: &BTreeSet<u32>) -> bool;
}

/// Default confirmation reading from standard input.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, pids: &BTreeSet<u32>) -> bool {
        println!("New participant ids to ingest:");
        for pid in pids {
            println!("  {pid}");
        }
        print!("Proceed with ingestion? [y/N] ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// The ingestion pipeline for one run.
pub struct Pipeline {
    whitelist: Whitelist,
    registry: Registry,
    sink: Option<Arc<dyn BackendAdapter>>,
    warehouse: Option<Arc<dyn Warehouse>>,
    master_table: String,
    confirm: Box<dyn Confirm>,
    dry_run: bool,
}

impl Pipeline {
    /// Create a pipeline. A `None` sink means nothing is persisted.
    pub fn new(whitelist: Whitelist, sink: Option<Arc<dyn BackendAdapter>>) -> Self {
        Self {
            whitelist,
            registry: Registry::default(),
            sink,
            warehouse: None,
            master_table: String::new(),
            confirm: Box::new(StdinConfirm),
            dry_run: false,
        }
    }

    /// Attach a warehouse handle for update-mode PID resolution.
    pub fn with_warehouse(
        mut self,
        warehouse: Arc<dyn Warehouse>,
        master_table: impl Into<String>,
    ) -> Self {
        self.warehouse = Some(warehouse);
        self.master_table = master_table.into();
        self
    }

    /// Replace the operator confirmation used in update mode.
    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Report every file successful without uploading it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the pipeline over every participant folder under `root`.
    pub async fn run(&self, root: &Path, options: &RunOptions) -> Result<RunReport, RunError> {
        ensure!(
            root.is_dir(),
            RootMissingSnafu {
                path: root.display().to_string(),
            }
        );

        let mut pid_filter: Option<BTreeSet<u32>> = if options.pids.is_empty() {
            None
        } else {
            Some(options.pids.iter().copied().collect())
        };

        let mut report = RunReport::default();

        if options.update {
            match self.resolve_update_set(root, pid_filter.as_ref()).await? {
                Some(candidates) => pid_filter = Some(candidates),
                None => return Ok(report),
            }
        }

        for folder in participant_folders(root)? {
            self.process_folder(&folder, pid_filter.as_ref(), &mut report)
                .await;
        }

        report.finish();
        info!(
            "Run complete: {} files uploaded, {} failed, {} skipped",
            report.files_uploaded, report.files_failed, report.files_skipped
        );
        if !report.pids_failed.is_empty() {
            warn!(
                "Participants with failures: {:?}",
                report.pids_failed.iter().collect::<Vec<_>>()
            );
        }

        Ok(report)
    }

    /// Diff directory-discovered PIDs against the master table and ask the
    /// operator to confirm the new ones.
    ///
    /// Returns `None` when the run should end with no writes: nothing new
    /// to ingest, or the operator declined.
    async fn resolve_update_set(
        &self,
        root: &Path,
        pid_filter: Option<&BTreeSet<u32>>,
    ) -> Result<Option<BTreeSet<u32>>, RunError> {
        let warehouse = self
            .warehouse
            .as_ref()
            .context(UpdateRequiresWarehouseSnafu)?;

        let discovered = discover_pids(root)?;
        let known = warehouse
            .distinct_pids(&self.master_table)
            .await
            .context(MasterLookupSnafu {
                table: self.master_table.clone(),
            })?;

        let mut candidates: BTreeSet<u32> = discovered.difference(&known).copied().collect();
        if let Some(filter) = pid_filter {
            candidates.retain(|pid| filter.contains(pid));
        }

        if candidates.is_empty() {
            info!("No new participants found, nothing to ingest");
            return Ok(None);
        }

        info!(
            "Found {} new participants: {:?}",
            candidates.len(),
            candidates.iter().collect::<Vec<_>>()
        );
        if !self.confirm.confirm(&candidates) {
            info!("Operator declined, aborting with no writes");
            return Ok(None);
        }

        Ok(Some(candidates))
    }

    /// Ingest every routable, whitelisted file in one folder.
    async fn process_folder(
        &self,
        folder: &Path,
        pid_filter: Option<&BTreeSet<u32>>,
        report: &mut RunReport,
    ) {
        info!("Processing folder {}", folder.display());

        let files = match list_files(folder) {
            Ok(files) => files,
            Err(e) => {
                warn!("Skipping folder {}: {e}", folder.display());
                return;
            }
        };

        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let Some(id) = route::route(name) else {
                warn!("Skipping {}: file name does not match the export convention", path.display());
                report.files_skipped += 1;
                continue;
            };

            if !self.whitelist.contains(&id.table) {
                debug!("Table '{}' is not whitelisted, skipping {name}", id.table);
                report.files_skipped += 1;
                continue;
            }

            if pid_filter.is_some_and(|filter| !filter.contains(&id.pid)) {
                debug!("Participant {} filtered out, skipping {name}", id.pid);
                report.files_skipped += 1;
                continue;
            }

            if self.process_file(&path, &id).await {
                report.record_success(id.pid);
            } else {
                report.record_failure(id.pid);
            }
        }
    }

    /// Ingest one routed file. Returns false when the file failed.
    async fn process_file(&self, path: &Path, id: &TableId) -> bool {
        let mut batch = match read_csv(path) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), snafu::Report::from_error(e));
                return false;
            }
        };

        inject_pid(&mut batch, id.pid);

        let mut batch = match self.registry.apply(&id.table, batch) {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    "Transform failed for {} (table {}): {}",
                    path.display(),
                    id.table,
                    snafu::Report::from_error(e)
                );
                return false;
            }
        };

        deidentify(&mut batch);

        let Some(sink) = self.sink.as_ref().filter(|_| !self.dry_run) else {
            info!(
                "Dry run: {} ({} rows) reported successful without upload",
                path.display(),
                batch.num_rows()
            );
            return true;
        };

        match sink.upload(batch, id).await {
            Ok(()) => {
                info!("Uploaded {} into table {}", path.display(), id.table);
                true
            }
            Err(e) => {
                error!(
                    "Upload failed for {} (table {}): {}",
                    path.display(),
                    id.table,
                    snafu::Report::from_error(e)
                );
                false
            }
        }
    }
}

/// Participant folders directly under the root, in name order.
fn participant_folders(root: &Path) -> Result<Vec<PathBuf>, RunError> {
    let mut folders: Vec<PathBuf> = std::fs::read_dir(root)
        .context(WalkDirSnafu {
            path: root.display().to_string(),
        })?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();
    Ok(folders)
}

fn list_files(folder: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Participant ids found by routing every file name under the root.
fn discover_pids(root: &Path) -> Result<BTreeSet<u32>, RunError> {
    let mut pids = BTreeSet::new();
    for folder in participant_folders(root)? {
        let Ok(files) = list_files(&folder) else {
            continue;
        };
        for path in files {
            if let Some(id) = path.file_name().and_then(|n| n.to_str()).and_then(route::route) {
                pids.insert(id.pid);
            }
        }
    }
    Ok(pids)
}

/// Build the configured pipeline and run it.
///
/// Backends are only constructed in production mode; with `GRAUPEL_ENV`
/// unset or not `production`, every file is processed but nothing is
/// uploaded. The warehouse client is still created in dry-run so update
/// mode can resolve its PID diff (a read-only query).
pub async fn run_ingest(config: Config, options: RunOptions) -> Result<RunReport, RunError> {
    let whitelist = Whitelist::load(&config.whitelist).context(WhitelistSnafu)?;
    info!("Whitelist: {} tables", whitelist.tables().len());

    let dry_run = !config::production_mode();
    if dry_run {
        warn!(
            "{} is not set to 'production', running without uploads",
            config::ENV_TOGGLE
        );
    }

    let mut pipeline = match config.backend {
        BackendKind::Lake => {
            let sink = if dry_run {
                None
            } else {
                let lake = config
                    .lake
                    .as_ref()
                    .ok_or(ConfigError::MissingLakeSection)
                    .context(ConfigSnafu)?;
                let mode = if options.overwrite {
                    WriteMode::Overwrite
                } else {
                    WriteMode::Append
                };
                let sink = LakeSink::new(
                    &lake.path,
                    &lake.database,
                    mode,
                    lake.storage_options.clone(),
                )
                .await
                .context(LakeInitSnafu)?;
                Some(Arc::new(sink) as Arc<dyn BackendAdapter>)
            };
            Pipeline::new(whitelist, sink)
        }
        BackendKind::Warehouse => {
            let warehouse = config
                .warehouse
                .as_ref()
                .ok_or(ConfigError::MissingWarehouseSection)
                .context(ConfigSnafu)?;
            let client: Arc<dyn Warehouse> =
                Arc::new(ClickHouseClient::new(&warehouse.client_options()).context(ClientSnafu)?);

            let sink = if dry_run {
                None
            } else {
                Some(Arc::new(WarehouseSink::new(client.clone())) as Arc<dyn BackendAdapter>)
            };
            Pipeline::new(whitelist, sink).with_warehouse(client, warehouse.master_table.clone())
        }
    };
    pipeline = pipeline.with_dry_run(dry_run);

    pipeline.run(Path::new(&config.root), &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::batch::Batch;
    use crate::error::{ClientError, SinkError};
    use crate::sink::clickhouse::ColumnSpec;

    /// Sink stub recording every upload; can be told to reject a table.
    #[derive(Default)]
    struct RecordingSink {
        uploads: Mutex<Vec<(String, u32, usize)>>,
        reject_table: Option<String>,
    }

    impl RecordingSink {
        fn uploads(&self) -> Vec<(String, u32, usize)> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BackendAdapter for RecordingSink {
        async fn upload(&self, batch: Batch, id: &TableId) -> Result<(), SinkError> {
            if self.reject_table.as_deref() == Some(id.table.as_str()) {
                return Err(SinkError::LakeWrite {
                    table: id.table.clone(),
                    message: "injected failure".to_string(),
                });
            }
            self.uploads
                .lock()
                .unwrap()
                .push((id.table.clone(), id.pid, batch.num_rows()));
            Ok(())
        }
    }

    /// Warehouse stub serving a fixed PID set for update-mode diffing.
    struct StubWarehouse {
        pids: BTreeSet<u32>,
        missing_master: bool,
    }

    impl StubWarehouse {
        fn with_pids(pids: &[u32]) -> Self {
            Self {
                pids: pids.iter().copied().collect(),
                missing_master: false,
            }
        }
    }

    #[async_trait]
    impl Warehouse for StubWarehouse {
        async fn describe_table(&self, _table: &str) -> Result<Vec<ColumnSpec>, ClientError> {
            Ok(Vec::new())
        }

        async fn insert_rows(&self, _table: &str, _rows: String) -> Result<(), ClientError> {
            Ok(())
        }

        async fn distinct_pids(&self, _table: &str) -> Result<BTreeSet<u32>, ClientError> {
            if self.missing_master {
                return Err(ClientError::Query {
                    status: 404,
                    message: "Code: 60. DB::Exception: UNKNOWN_TABLE".to_string(),
                });
            }
            Ok(self.pids.clone())
        }

        async fn execute(&self, _sql: &str) -> Result<(), ClientError> {
            Ok(())
        }
    }

    /// Confirmation stub with a scripted answer.
    struct ScriptedConfirm {
        accept: bool,
        calls: AtomicUsize,
    }

    impl ScriptedConfirm {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Confirm for Arc<ScriptedConfirm> {
        fn confirm(&self, _pids: &BTreeSet<u32>) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    const TEMP_CSV: &str = "email,group,name,participant_id,timestamp\n\
        a@x.org,control,Alice,1,2024-01-01 10:00:00\n\
        a@x.org,control,Alice,1,2024-01-01 10:05:00\n";

    const TEMP_CSV_CORRUPT: &str =
        "email,group,name,participant_id,timestamp\na@x.org,control,Alice,1,garbage\n";

    fn write_export(root: &Path, pid: u32, table: &str, content: &str) {
        let folder = root.join(format!("participant_{pid}"));
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(format!("{table}_1_export_{pid}.csv")), content).unwrap();
    }

    fn whitelist(tables: &[&str]) -> Whitelist {
        Whitelist::from_tables(tables.iter().map(|t| t.to_string()).collect())
    }

    #[tokio::test]
    async fn test_non_whitelisted_table_never_reaches_sink() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);
        write_export(root.path(), 1, "sleep", "score\n80\n");

        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()));

        let report = pipeline
            .run(root.path(), &RunOptions::default())
            .await
            .unwrap();

        let uploads = sink.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "temp");
        assert_eq!(report.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_unrelated_files_are_skipped_not_fatal() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);
        std::fs::write(root.path().join("participant_1/readme.txt"), "notes").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()));

        let report = pipeline
            .run(root.path(), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(sink.uploads().len(), 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_failed, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);
        write_export(root.path(), 2, "temp", TEMP_CSV_CORRUPT);
        write_export(root.path(), 3, "temp", TEMP_CSV);

        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()));

        let report = pipeline
            .run(root.path(), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.pids_failed, BTreeSet::from([2]));
        assert_eq!(report.pids_succeeded, BTreeSet::from([1, 3]));

        let uploaded_pids: BTreeSet<u32> = sink.uploads().iter().map(|(_, pid, _)| *pid).collect();
        assert_eq!(uploaded_pids, BTreeSet::from([1, 3]));
    }

    #[tokio::test]
    async fn test_backend_rejection_fails_file_not_run() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);

        let sink = Arc::new(RecordingSink {
            reject_table: Some("temp".to_string()),
            ..Default::default()
        });
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink));

        let report = pipeline
            .run(root.path(), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.files_failed, 1);
        assert_eq!(report.pids_failed, BTreeSet::from([1]));
    }

    #[tokio::test]
    async fn test_specific_pid_filter() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);
        write_export(root.path(), 2, "temp", TEMP_CSV);

        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()));

        let options = RunOptions {
            pids: vec![2],
            ..Default::default()
        };
        let report = pipeline.run(root.path(), &options).await.unwrap();

        assert_eq!(sink.uploads().len(), 1);
        assert_eq!(sink.uploads()[0].1, 2);
        assert_eq!(report.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_dry_run_reports_success_without_uploads() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);
        write_export(root.path(), 2, "temp", TEMP_CSV);

        let sink = Arc::new(RecordingSink::default());
        let pipeline =
            Pipeline::new(whitelist(&["temp"]), Some(sink.clone())).with_dry_run(true);

        let report = pipeline
            .run(root.path(), &RunOptions::default())
            .await
            .unwrap();

        assert!(sink.uploads().is_empty());
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.pids_succeeded, BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_update_mode_ingests_only_new_pids() {
        let root = tempfile::TempDir::new().unwrap();
        for pid in [1, 2, 3, 5] {
            write_export(root.path(), pid, "temp", TEMP_CSV);
        }

        let sink = Arc::new(RecordingSink::default());
        let confirm = ScriptedConfirm::new(true);
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()))
            .with_warehouse(Arc::new(StubWarehouse::with_pids(&[1, 2, 3])), "temp")
            .with_confirm(Box::new(confirm.clone()));

        let options = RunOptions {
            update: true,
            ..Default::default()
        };
        let report = pipeline.run(root.path(), &options).await.unwrap();

        assert_eq!(confirm.calls.load(Ordering::SeqCst), 1);
        let uploaded_pids: BTreeSet<u32> = sink.uploads().iter().map(|(_, pid, _)| *pid).collect();
        assert_eq!(uploaded_pids, BTreeSet::from([5]));
        assert_eq!(report.pids_succeeded, BTreeSet::from([5]));
    }

    #[tokio::test]
    async fn test_update_mode_equal_sets_makes_no_writes() {
        let root = tempfile::TempDir::new().unwrap();
        for pid in [1, 2, 3] {
            write_export(root.path(), pid, "temp", TEMP_CSV);
        }

        let sink = Arc::new(RecordingSink::default());
        let confirm = ScriptedConfirm::new(true);
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()))
            .with_warehouse(Arc::new(StubWarehouse::with_pids(&[1, 2, 3])), "temp")
            .with_confirm(Box::new(confirm.clone()));

        let options = RunOptions {
            update: true,
            ..Default::default()
        };
        let report = pipeline.run(root.path(), &options).await.unwrap();

        // Nothing new: the operator is never prompted and nothing is written.
        assert_eq!(confirm.calls.load(Ordering::SeqCst), 0);
        assert!(sink.uploads().is_empty());
        assert_eq!(report.files_uploaded, 0);
    }

    #[tokio::test]
    async fn test_update_mode_decline_aborts_with_no_writes() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 5, "temp", TEMP_CSV);

        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(whitelist(&["temp"]), Some(sink.clone()))
            .with_warehouse(Arc::new(StubWarehouse::with_pids(&[])), "temp")
            .with_confirm(Box::new(ScriptedConfirm::new(false)));

        let options = RunOptions {
            update: true,
            ..Default::default()
        };
        let report = pipeline.run(root.path(), &options).await.unwrap();

        assert!(sink.uploads().is_empty());
        assert_eq!(report.files_uploaded, 0);
    }

    #[tokio::test]
    async fn test_update_mode_requires_warehouse() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);

        let pipeline = Pipeline::new(whitelist(&["temp"]), None);
        let options = RunOptions {
            update: true,
            ..Default::default()
        };

        let err = pipeline.run(root.path(), &options).await.unwrap_err();
        assert!(matches!(err, RunError::UpdateRequiresWarehouse));
    }

    #[tokio::test]
    async fn test_update_mode_missing_master_table_is_fatal() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);

        let pipeline = Pipeline::new(whitelist(&["temp"]), None)
            .with_warehouse(
                Arc::new(StubWarehouse {
                    pids: BTreeSet::new(),
                    missing_master: true,
                }),
                "temp",
            )
            .with_confirm(Box::new(ScriptedConfirm::new(true)));

        let options = RunOptions {
            update: true,
            ..Default::default()
        };
        let err = pipeline.run(root.path(), &options).await.unwrap_err();
        assert!(matches!(err, RunError::MasterLookup { .. }));
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let pipeline = Pipeline::new(whitelist(&["temp"]), None);
        let err = pipeline
            .run(Path::new("/nonexistent/exports"), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::RootMissing { .. }));
    }

    #[test]
    fn test_discover_pids_routes_file_names() {
        let root = tempfile::TempDir::new().unwrap();
        write_export(root.path(), 1, "temp", TEMP_CSV);
        write_export(root.path(), 5, "sleep", "score\n80\n");
        std::fs::write(root.path().join("participant_1/notes.txt"), "x").unwrap();

        let pids = discover_pids(root.path()).unwrap();
        assert_eq!(pids, BTreeSet::from([1, 5]));
    }
}
