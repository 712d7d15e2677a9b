pub mod http;

pub use http::{build_router, AppError, AppResult, AppState};
