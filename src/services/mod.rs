pub mod auth_service;
pub mod process_watcher;
pub mod session;
pub mod upload_coordinator;
