use crate::error::TaskError;
use crate::store::JsonStore;
use crate::task::{Status, Task, TaskRepository, normalize_description};
use std::io::Write;
use tracing::info;

/// Parses a task id given on the command line.
pub fn parse_id(raw: &str) -> Result<u32, TaskError> {
    match raw.trim().parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(TaskError::validation("id must be a positive integer.")),
    }
}

/// Runs one command against the store and reports the result to `out`.
///
/// Arguments are validated before the store is touched, and every
/// load-modify-save cycle runs under the store's exclusive lock. Listing
/// only reads, so it works on a task file in a directory it cannot write.
pub struct CommandHandler<'a, W: Write> {
    store: &'a JsonStore,
    out: W,
}

impl<'a, W: Write> CommandHandler<'a, W> {
    pub fn new(store: &'a JsonStore, out: W) -> Self {
        Self { store, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    #[tracing::instrument(skip(self))]
    pub fn add(&mut self, description: &str) -> Result<u32, TaskError> {
        let description = normalize_description(description)?;
        let id = self.mutate(|tasks| tasks.add(&description))?;
        info!(id, "task added");
        writeln!(self.out, "Task added successfully (ID: {id})")?;
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    pub fn update(&mut self, id: &str, description: &str) -> Result<(), TaskError> {
        let id = parse_id(id)?;
        let description = normalize_description(description)?;
        self.mutate(|tasks| tasks.update(id, &description).map(|_| ()))?;
        info!(id, "task updated");
        writeln!(self.out, "Task {id} updated successfully.")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> Result<(), TaskError> {
        let id = parse_id(id)?;
        self.mutate(|tasks| tasks.delete(id).map(|_| ()))?;
        info!(id, "task deleted");
        writeln!(self.out, "Task {id} deleted successfully.")?;
        Ok(())
    }

    pub fn mark_in_progress(&mut self, id: &str) -> Result<(), TaskError> {
        self.mark(id, Status::InProgress)
    }

    pub fn mark_done(&mut self, id: &str) -> Result<(), TaskError> {
        self.mark(id, Status::Done)
    }

    #[tracing::instrument(skip(self))]
    fn mark(&mut self, id: &str, status: Status) -> Result<(), TaskError> {
        let id = parse_id(id)?;
        self.mutate(|tasks| tasks.mark(id, status).map(|_| ()))?;
        info!(id, %status, "task status changed");
        writeln!(self.out, "Task {id} marked as {status}.")?;
        Ok(())
    }

    /// Prints every task, or only those with the given status, in collection order.
    #[tracing::instrument(skip(self))]
    pub fn list(&mut self, status: Option<&str>) -> Result<(), TaskError> {
        let status = status.map(str::parse::<Status>).transpose()?;

        // Saves are atomic renames, so a reader never needs the lock
        let tasks = self.store.load()?;

        let selected: Vec<&Task> = match status {
            Some(status) => tasks.filter_by_status(status).collect(),
            None => tasks.iter().collect(),
        };

        if selected.is_empty() {
            writeln!(self.out, "No tasks found.")?;
            return Ok(());
        }
        for task in selected {
            writeln!(self.out, "{task}")?;
        }
        Ok(())
    }

    /// Loads, applies `change`, and saves only if `change` succeeded.
    fn mutate<T>(
        &mut self,
        change: impl FnOnce(&mut TaskRepository) -> Result<T, TaskError>,
    ) -> Result<T, TaskError> {
        let _lock = self.store.lock()?;
        let mut tasks = self.store.load()?;
        let result = change(&mut tasks)?;
        self.store.save(&tasks)?;
        Ok(result)
    }
}
