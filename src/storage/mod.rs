mod artifacts;
mod history;

pub use artifacts::{result_file_name, ArtifactStore};
pub use history::{HistoryEntry, HistoryError, HistoryStore};
