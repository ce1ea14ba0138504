#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod cloud;
pub use cloud::{CloudError, IntensityGradients, PointCloud};

mod frame;
pub use frame::{GradientFrame, PointFrame};
