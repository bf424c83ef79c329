use crate::error::TaskError;
use crate::task::TaskRepository;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long [`JsonStore::lock`] waits for another invocation to finish.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive hold on a task file. The lock is released when this is dropped.
#[derive(Debug)]
pub struct StoreLock {
    _lock_file: File,
}

/// Reads and writes the whole task collection as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the collection. A missing file is an empty collection.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<TaskRepository, TaskError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("task file does not exist yet, starting empty");
                return Ok(TaskRepository::new());
            }
            Err(e) => return Err(e.into()),
        };

        let tasks: TaskRepository = serde_json::from_str(&contents)
            .map_err(|e| TaskError::corrupt(&self.path, e))?;
        tasks
            .validate()
            .map_err(|reason| TaskError::corrupt(&self.path, reason))?;

        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    /// Replaces the file with `tasks`. The new content is written to a sibling
    /// temporary file first and renamed into place, so a failed save leaves the
    /// previous file as it was.
    #[tracing::instrument(skip(self, tasks), fields(path = %self.path.display()))]
    pub fn save(&self, tasks: &TaskRepository) -> Result<(), TaskError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // The rename swaps in a new inode, so carry over the current mode
        let permissions = match fs::metadata(&self.path) {
            Ok(metadata) => Some(metadata.permissions()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let tmp_path = self.sibling("tmp");
        if let Err(e) = Self::write_json(&tmp_path, tasks, permissions) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(count = tasks.len(), "saved tasks");
        Ok(())
    }

    fn write_json(
        path: &Path,
        tasks: &TaskRepository,
        permissions: Option<Permissions>,
    ) -> Result<(), TaskError> {
        let file = File::create(path)?;
        if let Some(permissions) = permissions {
            file.set_permissions(permissions)?;
        }
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, tasks).map_err(io::Error::from)?;
        writer.write_all(b"\n")?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    /// Takes the exclusive lock on `<file>.lock`, retrying with backoff until
    /// the store's lock timeout expires. Errors other than contention are
    /// returned immediately.
    pub fn lock(&self) -> Result<StoreLock, TaskError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_path = self.sibling("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let contended = fs2::lock_contended_error();
        let start = Instant::now();
        let mut delay = Duration::from_millis(10);

        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() != contended.kind() => return Err(e.into()),
                Err(_) if start.elapsed() < self.lock_timeout => {
                    debug!(?delay, "task file is locked, waiting");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(200));
                }
                Err(e) => {
                    return Err(TaskError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!(
                            "timed out waiting for lock on {}: {}",
                            lock_path.display(),
                            e
                        ),
                    )));
                }
            }
        }

        debug!(lock = %lock_path.display(), "acquired task file lock");
        Ok(StoreLock {
            _lock_file: lock_file,
        })
    }

    /// `tasks.json` -> `tasks.json.<suffix>`
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Status;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn store_in(dir: &TempDir) -> JsonStore {
        JsonStore::new(dir.path().join("tasks.json"))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let tasks = store.load().unwrap();

        assert!(tasks.is_empty());
        assert!(!store.path().exists(), "load must not create the file");
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut tasks = TaskRepository::new();
        tasks.add("Buy milk").unwrap();
        tasks.add("Walk dog").unwrap();
        tasks.mark(2, Status::Done).unwrap();

        store.save(&tasks).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, tasks);
    }

    #[test]
    fn test_save_writes_array_with_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut tasks = TaskRepository::new();
        tasks.add("Buy milk").unwrap();

        store.save(&tasks).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let task = &value.as_array().unwrap()[0];
        assert_eq!(task["id"], 1);
        assert_eq!(task["description"], "Buy milk");
        assert_eq!(task["status"], "todo");
        assert!(task["createdAt"].is_string());
        assert!(task["updatedAt"].is_string());
    }

    #[test]
    fn test_save_empty_collection_writes_empty_array() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&TaskRepository::new()).unwrap();

        dir.child("tasks.json").assert("[]\n");
    }

    #[test]
    fn test_load_then_save_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut tasks = TaskRepository::new();
        tasks.add("First").unwrap();
        tasks.add("Second").unwrap();
        tasks.mark(1, Status::InProgress).unwrap();
        store.save(&tasks).unwrap();
        let before = fs::read(store.path()).unwrap();

        let loaded = store.load().unwrap();
        store.save(&loaded).unwrap();

        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_save_leaves_no_temporary_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&TaskRepository::new()).unwrap();

        dir.child("tasks.json.tmp").assert(predicates::path::missing());
    }

    #[test]
    fn test_save_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("nested/deeper/tasks.json"));

        store.save(&TaskRepository::new()).unwrap();

        dir.child("nested/deeper/tasks.json")
            .assert(predicates::path::exists());
    }

    #[test]
    fn test_load_invalid_json_is_corrupt() {
        let dir = TempDir::new().unwrap();
        dir.child("tasks.json").write_str("{not json").unwrap();

        let result = store_in(&dir).load();

        assert!(matches!(result, Err(TaskError::CorruptData { .. })));
    }

    #[test]
    fn test_load_non_array_document_is_corrupt() {
        let dir = TempDir::new().unwrap();
        dir.child("tasks.json")
            .write_str(r#"{"tasks": {}, "next_id": 1}"#)
            .unwrap();

        let result = store_in(&dir).load();

        assert!(matches!(result, Err(TaskError::CorruptData { .. })));
    }

    #[test]
    fn test_load_rejects_records_that_do_not_match_the_schema() {
        let cases = [
            // missing updatedAt
            r#"[{"id": 1, "description": "a", "status": "todo", "createdAt": "2024-01-01T00:00:00Z"}]"#,
            // unknown status
            r#"[{"id": 1, "description": "a", "status": "blocked", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
            // id is a string
            r#"[{"id": "1", "description": "a", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
            // unexpected field
            r#"[{"id": 1, "description": "a", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z", "priority": 3}]"#,
            // negative id
            r#"[{"id": -1, "description": "a", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
        ];

        for case in cases {
            let dir = TempDir::new().unwrap();
            dir.child("tasks.json").write_str(case).unwrap();

            let result = store_in(&dir).load();

            assert!(
                matches!(result, Err(TaskError::CorruptData { .. })),
                "expected corrupt data for {case}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_load_rejects_invariant_violations() {
        let cases = [
            // duplicate ids
            r#"[{"id": 1, "description": "a", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"},
                {"id": 1, "description": "b", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
            // zero id
            r#"[{"id": 0, "description": "a", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
            // updated before created
            r#"[{"id": 1, "description": "a", "status": "todo", "createdAt": "2024-01-02T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
            // blank description
            r#"[{"id": 1, "description": "  ", "status": "todo", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}]"#,
        ];

        for case in cases {
            let dir = TempDir::new().unwrap();
            dir.child("tasks.json").write_str(case).unwrap();

            let result = store_in(&dir).load();

            assert!(
                matches!(result, Err(TaskError::CorruptData { .. })),
                "expected corrupt data for {case}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_load_accepts_offsetless_timestamps() {
        let dir = TempDir::new().unwrap();
        dir.child("tasks.json")
            .write_str(
                r#"[
  {
    "id": 1,
    "description": "Buy groceries",
    "status": "in-progress",
    "createdAt": "2024-05-01T10:30:00",
    "updatedAt": "2024-05-01T11:00:00"
  }
]"#,
            )
            .unwrap();

        let tasks = store_in(&dir).load().unwrap();

        let task = tasks.find_by_id(1).unwrap();
        assert_eq!(task.description(), "Buy groceries");
        assert_eq!(task.status(), Status::InProgress);
        assert_eq!(
            task.updated_at() - task.created_at(),
            chrono::Duration::minutes(30)
        );
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&TaskRepository::new()).unwrap();
        // A directory in the temp file's place makes the write fail
        dir.child("tasks.json.tmp").create_dir_all().unwrap();
        let mut tasks = TaskRepository::new();
        tasks.add("Never written").unwrap();

        let result = store.save(&tasks);

        assert!(matches!(result, Err(TaskError::Io(_))));
        dir.child("tasks.json").assert("[]\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_save_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&TaskRepository::new()).unwrap();
        fs::set_permissions(store.path(), Permissions::from_mode(0o600)).unwrap();
        let mut tasks = TaskRepository::new();
        tasks.add("Private").unwrap();

        store.save(&tasks).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_lock_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).with_lock_timeout(Duration::from_millis(50));
        let _held = store.lock().unwrap();

        // fs2 locks are per open file description, so a second handle contends
        let result = store.lock();

        assert!(matches!(
            result,
            Err(TaskError::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn test_lock_failure_other_than_contention_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).with_lock_timeout(Duration::from_secs(30));
        dir.child("tasks.json.lock").create_dir_all().unwrap();
        let start = Instant::now();

        let result = store.lock();

        assert!(matches!(
            result,
            Err(TaskError::Io(ref e)) if e.kind() != io::ErrorKind::TimedOut
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_lock_is_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).with_lock_timeout(Duration::from_millis(50));

        drop(store.lock().unwrap());

        assert!(store.lock().is_ok());
    }
}
