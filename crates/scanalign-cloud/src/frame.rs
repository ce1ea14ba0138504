use nalgebra::{Matrix4, Vector4};

/// Uniform capability-based access to a point cloud's per-point attributes.
///
/// The `has_*` predicates report which attributes a frame carries; consumers
/// are expected to check them once up front. The per-point accessors may
/// panic when called for an attribute the frame does not carry or with an
/// out-of-range index.
pub trait PointFrame {
    /// Number of points in the frame.
    fn len(&self) -> usize;

    /// Whether the frame contains no points.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point `i` as a homogeneous 4-vector (`w = 1`).
    fn point(&self, i: usize) -> Vector4<f64>;

    /// Normal of point `i` as a direction (`w = 0`).
    fn normal(&self, i: usize) -> Vector4<f64>;

    /// Covariance of point `i` in the 4x4 homogeneous embedding.
    fn cov(&self, i: usize) -> Matrix4<f64>;

    /// Scalar intensity of point `i`.
    fn intensity(&self, i: usize) -> f64;

    /// Whether the frame carries points.
    fn has_points(&self) -> bool;

    /// Whether the frame carries per-point normals.
    fn has_normals(&self) -> bool;

    /// Whether the frame carries per-point covariances.
    fn has_covs(&self) -> bool;

    /// Whether the frame carries per-point intensities.
    fn has_intensities(&self) -> bool;
}

/// Access to per-point intensity gradients aligned to a target frame.
pub trait GradientFrame {
    /// Number of gradients.
    fn len(&self) -> usize;

    /// Whether the frame contains no gradients.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intensity gradient of point `i` as a 4-vector.
    fn intensity_gradient(&self, i: usize) -> Vector4<f64>;
}
