mod digest;
mod error;
mod manifest;
mod module;
mod topo;
mod zipline_file;

pub use digest::Digest;
pub use error::Error;
pub use manifest::Manifest;
pub use module::{Module, ModuleId};
pub use topo::{is_topologically_sorted, topological_sort};
pub use zipline_file::{ZiplineFile, ZiplineFileError, CURRENT_VERSION, MAGIC};
