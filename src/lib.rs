// Export modules for use in tests
pub mod api;
pub mod app;
pub mod details;
pub mod event_source;
pub mod job_event;
pub mod live_feed;
pub mod notification;
pub mod page_cache;
pub mod panic_handler;
pub mod query_set;
pub mod render;
pub mod resource;
pub mod search;
pub mod settings;

pub mod test_utils;

// Re-export main app components
pub use app::{App, AppAction, AppConfig, run_app_with_event_source};
