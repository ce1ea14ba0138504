use nalgebra::Vector4;

/// A single nearest-neighbor query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the matched point in the indexed frame.
    pub index: usize,
    /// Squared distance between the query and the matched point.
    pub sq_dist: f64,
}

/// Bounded single-nearest-neighbor query over a target point cloud.
///
/// The query point is a homogeneous 4-vector; the fourth component carries
/// 1 for plain positions, or a scalar intensity when the caller wants an
/// intensity-aware index to use it. Implementations decide which components
/// they index on.
///
/// A provider may or may not enforce `max_sq_dist`; callers re-check the
/// returned squared distance against their own bound.
pub trait NearestNeighborSearch {
    /// Find the single nearest indexed point to `query`.
    fn nearest_within(&self, query: &Vector4<f64>, max_sq_dist: f64) -> Option<Neighbor>;
}
