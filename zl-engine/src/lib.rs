//! Tiered fetch pipeline, dependency-ordered loader, and directory downloader for zipline
//! manifests.

mod downloader;
mod error;
mod fetch;
mod http;
mod listener;
mod loader;
mod sink;
mod throttle;

pub use downloader::Downloader;
pub use error::Error;
pub use fetch::FetchPipeline;
pub use http::{resolve_url, HttpClient, ReqwestDownloader};
pub use listener::{LoadListener, LoggingListener, NoopListener};
pub use loader::{LoadOptions, Loader};
pub use sink::{EngineSink, LinkerContext};
pub use throttle::Throttle;
