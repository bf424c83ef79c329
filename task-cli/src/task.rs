use crate::error::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Task {
    id: u32,
    description: String,
    status: Status,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

impl Task {
    fn new(id: u32, description: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            description,
            status: Status::Todo,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Never moves `updated_at` backwards, even if the clock does.
    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] ({}) {}\n    created: {}\n    updated: {}",
            self.id,
            self.status,
            self.description,
            timestamp::format(&self.created_at),
            timestamp::format(&self.updated_at),
        )
    }
}

#[derive(Debug, Default, Eq, PartialEq, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::InProgress => "in-progress",
            Status::Done => "done",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(Status::Todo),
            "in-progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            _ => Err(TaskError::validation(
                "list status must be one of: todo, in-progress, done",
            )),
        }
    }
}

/// Trims a user-supplied description, rejecting one that is empty afterwards.
pub fn normalize_description(raw: &str) -> Result<String, TaskError> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(TaskError::validation("description cannot be empty."));
    }
    Ok(description.to_string())
}

/// The task collection, in insertion order. Serialized as a bare JSON array.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct TaskRepository {
    tasks: Vec<Task>,
}

impl TaskRepository {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// One past the highest id in use, or 1 for an empty collection.
    pub fn next_id(&self) -> Result<u32, TaskError> {
        match self.tasks.iter().map(|task| task.id).max() {
            None => Ok(1),
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| TaskError::validation("no task ids left to assign.")),
        }
    }

    pub fn find_by_id(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    fn find_by_id_mut(&mut self, id: u32) -> Result<&mut Task, TaskError> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(TaskError::NotFound(id))
    }

    pub fn add(&mut self, description: &str) -> Result<u32, TaskError> {
        let description = normalize_description(description)?;
        let id = self.next_id()?;
        self.tasks.push(Task::new(id, description));
        Ok(id)
    }

    pub fn update(&mut self, id: u32, description: &str) -> Result<&Task, TaskError> {
        let description = normalize_description(description)?;
        let task = self.find_by_id_mut(id)?;
        task.description = description;
        task.touch();
        Ok(task)
    }

    pub fn delete(&mut self, id: u32) -> Result<Task, TaskError> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or(TaskError::NotFound(id))?;
        Ok(self.tasks.remove(index))
    }

    pub fn mark(&mut self, id: u32, status: Status) -> Result<&Task, TaskError> {
        let task = self.find_by_id_mut(id)?;
        task.status = status;
        task.touch();
        Ok(task)
    }

    pub fn filter_by_status(&self, status: Status) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |task| task.status == status)
    }

    /// Checks the invariants a freshly deserialized collection must hold.
    /// The returned message describes the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if task.id == 0 {
                return Err("task ids must be positive integers".to_string());
            }
            if !seen.insert(task.id) {
                return Err(format!("duplicate task id {}", task.id));
            }
            if task.description.trim().is_empty() {
                return Err(format!("task {} has an empty description", task.id));
            }
            if task.updated_at < task.created_at {
                return Err(format!("task {} was updated before it was created", task.id));
            }
        }
        Ok(())
    }
}

/// RFC 3339 timestamps in UTC. Offset-less timestamps are read as local time.
mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|_| format!("invalid timestamp '{raw}'"))?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| ts.with_timezone(&Utc))
            .ok_or_else(|| format!("timestamp '{raw}' does not exist in local time"))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }
}
