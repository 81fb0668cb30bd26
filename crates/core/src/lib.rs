//! Pix360 domain core.
//!
//! Everything here is free of persistence and scheduling concerns:
//!
//! - [`asset`]: in-memory image payloads.
//! - [`certainty`]: how confident a downloader is about a URL.
//! - [`http`]: the retrying fetcher shared by downloaders.
//! - [`stitching`]: grid compositing and cubemap reprojection.
//! - [`error`]: the conversion error taxonomy.

pub mod asset;
pub mod certainty;
pub mod error;
pub mod hashing;
pub mod http;
pub mod stitching;
pub mod types;

pub use asset::AssetData;
pub use certainty::CertaintyScore;
pub use error::ConversionError;
pub use stitching::{StitchRequest, StitchingEngine};
