// feedwall HTTP API
//
// Server-sent event feed, runtime settings and operational endpoints

pub mod http;

pub use http::{create_router, AppState};
