//! Downloader plugins for Pix360.
//!
//! - [`Downloader`]: the plugin contract (URL scoring plus fetching).
//! - [`ModuleRegistry`]: installed plugins and candidate selection.
//! - [`ModuleManifest`] / [`ModuleCatalog`]: which plugins to install and
//!   how to build them.
//! - [`builtin`]: the plugins shipped with the worker.

pub mod builtin;
pub mod catalog;
pub mod downloader;
pub mod manifest;
pub mod registry;

pub use catalog::ModuleCatalog;
pub use downloader::{Download, Downloader};
pub use manifest::ModuleManifest;
pub use registry::{Candidate, ModuleRegistry};
