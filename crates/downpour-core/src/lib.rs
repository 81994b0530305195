pub mod config;
pub mod logging;

// Engine modules, leaves first.
pub mod error;
pub mod state;
pub mod request;
pub mod planner;
pub mod limiter;
pub mod retry;
pub mod http;
pub mod client;
pub mod store;
pub mod storage;
pub mod events;
pub mod dispatch;
pub mod scheduler;

mod worker;
mod coordinator;
pub mod engine;
pub mod task;

pub use engine::DownloadEngine;
pub use error::DownloadError;
pub use limiter::SpeedLimit;
pub use request::DownloadRequest;
pub use state::DownloadState;
pub use task::DownloadTask;
