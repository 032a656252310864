mod error;
mod server;

pub use error::ApiError;
pub use server::{start_server, AppState};
