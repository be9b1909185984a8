//! stowd library surface: the gateway router and its state, split from the
//! binary so route behavior is testable in-process.

pub mod assets;
pub mod history;
pub mod mime;
pub mod routes;
pub mod server;

pub use history::HistoryStore;
pub use routes::router;
pub use server::AppState;
