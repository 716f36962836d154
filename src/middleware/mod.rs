pub mod allow_list;
pub mod auth;
pub mod request_logger;

pub use allow_list::{enforce_source_allow_list, SourceAllowList};
pub use request_logger::request_logger;
