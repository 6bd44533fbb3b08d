//! Event router and job registry.
//!
//! One router instance owns the whole job lifecycle: for each incoming
//! change event it normalizes temporal encodings, computes the event's
//! signature `(operation, source table, column list)`, looks up or creates
//! the owning job, and streams the row values into the job's engine
//! subprocess.
//!
//! ## Ordering
//!
//! The CDC source invokes [`Router::handle_raw`] synchronously, one event
//! at a time, in source-commit order. The router performs no internal
//! concurrency; all registry, classification, and process-I/O work for one
//! event completes before the next event is admitted.
//!
//! ## Fail-stop
//!
//! A pipe write/flush failure, a job-creation failure, or an unexpected
//! error while handling an event is unrecoverable for the whole
//! application: the failing job's buffered output is drained and logged,
//! every job is destroyed, the registry is cleared, and the error
//! propagates so the process exits non-zero. The CDC source resumes from
//! its last durable position on restart.

use crate::classify::ClassLibrary;
use crate::config::{Config, TargetSpec};
use crate::error::{Result, RouterError};
use crate::event::{value_text, ChangeEvent, Op};
use crate::job::{Job, JobSignature};
use crate::rules::RuleLibrary;
use crate::schema_log::SchemaChangeLog;
use crate::script;
use crate::supervisor::Supervisor;
use crate::temporal::{self, SEMANTIC_DATE};
use std::collections::HashMap;
use std::io::Write;
use tracing::{debug, error, info};

/// Event router and job registry. See the module docs for the contract.
pub struct Router {
    classes: ClassLibrary,
    target: TargetSpec,
    supervisor: Supervisor,
    schema_log: SchemaChangeLog,
    /// Job key → job
    registry: HashMap<String, Job>,
    /// Signature → job key; enforces one job per distinct shape
    index: HashMap<JobSignature, String>,
    /// Next job key; monotonically increasing, never reused
    next_key: u64,
}

impl Router {
    /// Build a router from configuration, loading the rule and data-class
    /// libraries. Library load failures degrade to pass-through.
    pub fn new(config: &Config) -> Self {
        let rules = RuleLibrary::load(config.rules_library.as_deref());
        let classes = ClassLibrary::load(config.class_library.as_deref(), &rules);
        Self::with_classes(config, classes)
    }

    /// Build a router with a pre-built classification library
    pub fn with_classes(config: &Config, classes: ClassLibrary) -> Self {
        Self {
            classes,
            target: config.target_spec(),
            supervisor: Supervisor::new(&config.engine),
            schema_log: SchemaChangeLog::open(&config.schema_change_log),
            registry: HashMap::new(),
            index: HashMap::new(),
            next_key: 0,
        }
    }

    /// Handle one raw event envelope (value JSON plus optional key JSON).
    ///
    /// Any error returned from here is fatal under the fail-stop policy;
    /// the registry has already been torn down when it surfaces.
    pub async fn handle_raw(&mut self, value_json: &str, key_json: Option<&str>) -> Result<()> {
        // Tombstone records (a null value emitted after a delete) carry no
        // payload and are not change events.
        if value_json.trim() == "null" {
            debug!("Skipping tombstone record");
            return Ok(());
        }
        let event = match ChangeEvent::parse(value_json, key_json) {
            Ok(event) => event,
            Err(e) => {
                error!("Unexpected error parsing change event: {}. Terminating...", e);
                self.teardown_all().await;
                return Err(e);
            }
        };
        self.handle(event).await
    }

    /// Handle one parsed change event
    pub async fn handle(&mut self, mut event: ChangeEvent) -> Result<()> {
        if event.op == Op::SchemaChange {
            let source = event
                .source
                .as_ref()
                .map(|s| (s.schema.as_str(), s.table.as_str()));
            self.schema_log.record(source, event.ddl.as_deref());
            return Ok(());
        }

        // Updates and deletes are only meaningful against a database
        // target; file output is insert-only.
        if event.op != Op::Insert && self.target.dsn.is_none() {
            debug!("No database target configured; skipping {} event", event.op);
            return Ok(());
        }

        let columns = event.columns.clone();
        let Some(row) = event.row_image_mut() else {
            error!("Change event has no row image. Terminating...");
            self.teardown_all().await;
            return Err(RouterError::event("change event has no row image"));
        };

        // Runs on every event, whether or not a job already exists.
        temporal::normalize_row(&columns, row);

        let Some(source_table) = event.source_table_identifier() else {
            error!("Change event has no source metadata. Terminating...");
            self.teardown_all().await;
            return Err(RouterError::event("change event has no source metadata"));
        };

        let signature = JobSignature {
            operation: event.op,
            source_table,
            columns: event.column_names(),
        };

        let key = match self.index.get(&signature) {
            Some(key) => key.clone(),
            None => self.create_job(&event, signature).await?,
        };

        self.dispatch(&key, &event).await
    }

    /// Create a job for a signature with no live job: construct, infer
    /// types, classify, compile the script, spawn the engine. Creation
    /// failures are fatal.
    async fn create_job(&mut self, event: &ChangeEvent, signature: JobSignature) -> Result<String> {
        let source = event.source.as_ref().expect("source checked by caller");
        let key = self.next_key.to_string();

        let mut job = Job::new(
            key.clone(),
            signature.clone(),
            &source.schema,
            &source.table,
            &self.target,
            event.key_column.clone(),
        );

        // Type inference: int32 columns without a semantic name are plain
        // integers; int32 date columns carry the ISO_DATE type so the
        // engine parses the normalized string form.
        for (position, column) in event.columns.iter().enumerate() {
            let Some(field) = job.fields.get_mut(position) else {
                break;
            };
            if column.type_name == "int32" {
                match column.semantic.as_deref() {
                    None => {
                        field.data_type = "NUMERIC".to_string();
                        field.precision = 0;
                    }
                    Some(SEMANTIC_DATE) => {
                        field.data_type = "ISO_DATE".to_string();
                    }
                    Some(_) => {}
                }
            }
        }

        if let Some(row) = event.row_image() {
            self.classes.classify(&mut job.fields, row);
        }

        let text = script::render(&job);
        let script_file = match self.write_script(&text) {
            Ok(file) => file,
            Err(e) => {
                error!("An error occurred when writing an engine script to a temporary file: {}", e);
                self.teardown_all().await;
                return Err(e);
            }
        };

        match self.supervisor.spawn(script_file.path()) {
            Ok(engine) => {
                job.engine = Some(engine);
                job.script_file = Some(script_file);
            }
            Err(e) => {
                error!("An error occurred when starting the engine process: {}", e);
                self.teardown_all().await;
                return Err(e);
            }
        }

        info!(
            "New replication job started for table '{}' (key {})",
            job.source_table_identifier, key
        );

        self.index.insert(signature, key.clone());
        self.registry.insert(key.clone(), job);
        self.next_key += 1;
        Ok(key)
    }

    fn write_script(&self, text: &str) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("maskstream-")
            .suffix(".scl")
            .tempfile()
            .map_err(|e| RouterError::script(format!("could not create temp file: {}", e)))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| RouterError::script(format!("could not write script: {}", e)))?;
        Ok(file)
    }

    /// Write the event's row values to the job's input pipe. A failure
    /// here triggers the fail-stop path.
    async fn dispatch(&mut self, key: &str, event: &ChangeEvent) -> Result<()> {
        let values: Vec<String> = event
            .row_image()
            .map(|row| row.values().map(value_text).collect())
            .unwrap_or_default();

        let job = self
            .registry
            .get_mut(key)
            .expect("dispatch key resolved from index");
        let table = job.source_table_identifier.clone();

        let engine = job.engine.as_mut().expect("job spawned at creation");
        if let Err(e) = engine.write_record(&values).await {
            error!(
                "Could not write output to replication job for table '{}'. Aborting...",
                table
            );
            self.fail_stop(key).await;
            return Err(RouterError::Pipe { table, source: e });
        }
        Ok(())
    }

    /// Fail-stop: drain and log the failing job's buffered output, then
    /// destroy every job and clear the registry.
    async fn fail_stop(&mut self, failing_key: &str) {
        if let Some(job) = self.registry.get_mut(failing_key) {
            let diagnostics = match job.engine.as_mut() {
                Some(engine) => engine.drain_output().await,
                None => String::new(),
            };
            error!(
                "Replication job for table '{}' encountered an error:\n{}\nThe job is being terminated. Check the engine error log for details.",
                job.source_table_identifier, diagnostics
            );
        }
        self.teardown_all().await;
    }

    /// Destroy every job's subprocess, clear the registry, and close the
    /// schema-change log. Used by both fail-stop and orderly shutdown.
    async fn teardown_all(&mut self) {
        for (_, job) in self.registry.iter_mut() {
            if let Some(engine) = job.engine.as_mut() {
                engine.kill().await;
            }
        }
        self.registry.clear();
        self.index.clear();
        self.schema_log.close();
    }

    /// Orderly shutdown from the control thread, after the source has
    /// stopped delivering events.
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} replication job(s)", self.registry.len());
        self.teardown_all().await;
    }

    /// Number of live jobs
    pub fn job_count(&self) -> usize {
        self.registry.len()
    }

    /// Look up a live job by key
    pub fn job(&self, key: &str) -> Option<&Job> {
        self.registry.get(key)
    }

    /// Live job keys, sorted
    pub fn job_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    /// Router wired to a throwaway engine (`sh -c 'cat >/dev/null'`) that
    /// behaves like a healthy subprocess: consumes stdin, never exits.
    fn test_router(dsn: Option<&str>, classes: ClassLibrary) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            schema_change_log: dir.path().join("schema.log"),
            dsn: dsn.map(str::to_string),
            engine: EngineConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "cat >/dev/null".to_string()],
                spec_flag: "/SPEC=".to_string(),
            },
            ..Default::default()
        };
        (Router::with_classes(&config, classes), dir)
    }

    fn insert_event(table: &str, body: &str) -> String {
        format!(
            r#"{{"payload": {{"op": "c", "after": {body}, "source": {{"schema": "public", "table": "{table}"}}}}}}"#
        )
    }

    #[tokio::test]
    async fn test_job_reuse_for_identical_signature() {
        let (mut router, _dir) = test_router(None, ClassLibrary::empty());

        router
            .handle_raw(&insert_event("orders", r#"{"id": 1, "email": "a@b"}"#), None)
            .await
            .unwrap();
        router
            .handle_raw(&insert_event("orders", r#"{"id": 2, "email": "c@d"}"#), None)
            .await
            .unwrap();

        assert_eq!(router.job_count(), 1);
        assert_eq!(router.job_keys(), vec!["0"]);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_signature_gets_fresh_key() {
        let (mut router, _dir) = test_router(None, ClassLibrary::empty());

        router
            .handle_raw(&insert_event("orders", r#"{"id": 1}"#), None)
            .await
            .unwrap();
        router
            .handle_raw(&insert_event("customers", r#"{"id": 1}"#), None)
            .await
            .unwrap();
        // Different column list on a known table is a new shape too
        router
            .handle_raw(&insert_event("orders", r#"{"id": 1, "note": "x"}"#), None)
            .await
            .unwrap();

        assert_eq!(router.job_count(), 3);
        assert_eq!(router.job_keys(), vec!["0", "1", "2"]);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_without_dsn_is_skipped() {
        let (mut router, _dir) = test_router(None, ClassLibrary::empty());
        let event = r#"{"payload": {"op": "u", "after": {"id": 1}, "source": {"schema": "s", "table": "t"}}}"#;
        router.handle_raw(event, None).await.unwrap();
        assert_eq!(router.job_count(), 0);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_routed_with_dsn() {
        let (mut router, _dir) = test_router(Some("warehouse"), ClassLibrary::empty());
        let key = r#"{"schema": {"fields": [{"field": "order_id"}]}}"#;
        let event = r#"{"payload": {"op": "d", "before": {"id": 9}, "source": {"schema": "s", "table": "t"}}}"#;
        router.handle_raw(event, Some(key)).await.unwrap();

        assert_eq!(router.job_count(), 1);
        let script = std::fs::read_to_string(
            router.job("0").unwrap().script_file.as_ref().unwrap().path(),
        )
        .unwrap();
        assert!(script.contains("/DELETE=(order_id)"));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_masking_script() {
        let rules = RuleLibrary::parse(
            "rules:\n  - name: MaskEmail\n    kind: EXPRESSION\n    value: \"mask(${FIELDNAME})\"\n",
        )
        .unwrap();
        let classes = ClassLibrary::parse(
            "classes:\n  - name: EMAIL\n    rule: MaskEmail\n    matchers:\n      - kind: PATTERN\n        pattern: \"[\\\\w.]+@[\\\\w.]+\"\n",
            &rules,
        )
        .unwrap();
        let (mut router, _dir) = test_router(Some("warehouse"), classes);

        let event = r#"{
            "schema": {"fields": [
                {"field": "before", "fields": [
                    {"type": "int32", "field": "id"},
                    {"type": "string", "field": "email"}
                ]}
            ]},
            "payload": {
                "op": "c",
                "after": {"id": 1, "email": "a@example.com"},
                "source": {"schema": "public", "table": "orders"}
            }
        }"#;
        router.handle_raw(event, None).await.unwrap();

        let job = router.job("0").unwrap();
        assert!(job.fields[1].classified);
        let script =
            std::fs::read_to_string(job.script_file.as_ref().unwrap().path()).unwrap();
        assert!(script.contains("ALTERED_email=mask(email)"));
        assert!(script.contains("/FIELD=(id, TYPE=NUMERIC, POSITION=1, SEPARATOR=\"\\t\", PRECISION=0)"));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_temporal_normalization_applies_to_dispatched_rows() {
        let (mut router, _dir) = test_router(None, ClassLibrary::empty());
        let event = r#"{
            "schema": {"fields": [
                {"field": "before", "fields": [
                    {"type": "int32", "field": "id"},
                    {"type": "int32", "field": "day", "name": "io.debezium.time.Date"}
                ]}
            ]},
            "payload": {
                "op": "c",
                "after": {"id": 1, "day": 18790},
                "source": {"schema": "public", "table": "orders"}
            }
        }"#;
        router.handle_raw(event, None).await.unwrap();

        // The date column carries ISO_DATE so the engine reads the string form
        let job = router.job("0").unwrap();
        assert_eq!(job.fields[1].data_type, "ISO_DATE");
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_schema_change_is_logged_not_routed() {
        let (mut router, dir) = test_router(None, ClassLibrary::empty());
        let event = r#"{"payload": {"source": {"schema": "public", "table": "orders"}, "ddl": "ALTER TABLE orders ADD COLUMN note text"}}"#;
        router.handle_raw(event, None).await.unwrap();
        assert_eq!(router.job_count(), 0);

        let content = std::fs::read_to_string(dir.path().join("schema.log")).unwrap();
        assert!(content.contains("ALTER TABLE orders ADD COLUMN note text"));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_broken_pipe_triggers_full_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            schema_change_log: dir.path().join("schema.log"),
            engine: EngineConfig {
                // Exits immediately; its stdin pipe dies with it.
                command: "false".to_string(),
                args: Vec::new(),
                spec_flag: "/SPEC=".to_string(),
            },
            ..Default::default()
        };
        let mut router = Router::with_classes(&config, ClassLibrary::empty());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let mut result = Ok(());
        for i in 0..16 {
            let body = format!(r#"{{"id": {}}}"#, i);
            result = router.handle_raw(&insert_event("orders", &body), None).await;
            if result.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        let err = result.unwrap_err();
        assert!(matches!(err, RouterError::Pipe { .. }));
        assert!(err.is_fatal());
        // Every job is destroyed, not just the failing one
        assert_eq!(router.job_count(), 0);
    }

    #[tokio::test]
    async fn test_tombstone_record_is_skipped() {
        let (mut router, _dir) = test_router(Some("warehouse"), ClassLibrary::empty());
        let key = r#"{"schema": {"fields": [{"field": "id"}]}}"#;
        let event = r#"{"payload": {"op": "d", "before": {"id": 9}, "source": {"schema": "s", "table": "t"}}}"#;
        router.handle_raw(event, Some(key)).await.unwrap();
        assert_eq!(router.job_count(), 1);

        // The null-value record following a delete must not disturb
        // the live jobs.
        router.handle_raw("null", Some(key)).await.unwrap();
        assert_eq!(router.job_count(), 1);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_fatal() {
        let (mut router, _dir) = test_router(None, ClassLibrary::empty());
        router
            .handle_raw(&insert_event("orders", r#"{"id": 1}"#), None)
            .await
            .unwrap();
        assert_eq!(router.job_count(), 1);

        let err = router.handle_raw("not json at all", None).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(router.job_count(), 0);
    }
}
