#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Hessian and bias output blocks.
pub mod blocks;

/// Construction-time factor settings.
pub mod config;

/// Tolerance-gated correspondence bookkeeping.
pub mod correspondence;

/// Typed construction and configuration errors.
pub mod error;

/// Distribution-to-distribution (GICP) matching cost.
pub mod gicp;

/// Small fixed-size linear algebra helpers.
pub mod linalg;

/// Photometric (color consistency) matching cost.
pub mod photometric;

/// Worker pool for the parallel per-point pass.
pub mod reduction;

pub use blocks::LinearizedBlocks;
pub use config::{MatchingConfig, PhotometricConfig};
pub use error::{FactorError, FrameRole};
pub use gicp::GicpFactor;
pub use photometric::PhotometricFactor;
