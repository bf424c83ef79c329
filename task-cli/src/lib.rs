//! A single-user task tracker that keeps its tasks in a local JSON file.
pub mod config;
pub mod error;
pub mod handler;
pub mod store;
pub mod task;

pub use config::Config;
pub use error::TaskError;
pub use handler::CommandHandler;
pub use store::JsonStore;
pub use task::{Status, Task, TaskRepository};
