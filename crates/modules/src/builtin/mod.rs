//! Downloaders shipped with the worker.

pub mod cubemap;
pub mod direct;

pub use cubemap::CubemapTemplateDownloader;
pub use direct::DirectDownloader;
