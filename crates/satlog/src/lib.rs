pub mod files;
pub mod server;

pub use server::{router, serve, ApiError, AppState};
