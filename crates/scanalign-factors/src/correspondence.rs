use nalgebra::{Isometry3, Vector4};

use scanalign_search::NearestNeighborSearch;

use crate::config::MatchingConfig;
use crate::reduction::WorkerPool;

/// Sentinel index for a source point with no valid correspondence.
pub const NO_MATCH: i64 = -1;

/// Source-to-target correspondence map with tolerance-gated refresh.
///
/// Holds one signed index per source point (`NO_MATCH` when the bounded
/// nearest-neighbor search found nothing) and the pose at which the map was
/// last actually recomputed. When both update tolerances are positive and
/// the pose moved less than both since that reference, a refresh call reuses
/// the existing map instead of repeating the search — the main saving in
/// small-motion regimes such as late Gauss-Newton iterations.
///
/// Invariant: the map is valid for a source cloud exactly when its length
/// matches the cloud's point count; a mismatch is the "needs rebuild"
/// signal.
pub struct CorrespondenceCache {
    indices: Vec<i64>,
    last_refresh_delta: Isometry3<f64>,
}

impl CorrespondenceCache {
    /// An empty cache; the first refresh always recomputes.
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            last_refresh_delta: Isometry3::identity(),
        }
    }

    /// The current correspondence map.
    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    /// Whether the map does not cover a source cloud of `source_len` points.
    pub fn is_stale(&self, source_len: usize) -> bool {
        self.indices.len() != source_len
    }

    /// Refresh the map for `delta`, unless the pose moved less than the
    /// configured tolerances since the last actual refresh.
    ///
    /// `query` produces the search point for source index `i`, already
    /// transformed by `delta` (policies differ in what they place in the
    /// homogeneous slot). Returns `true` when the search ran; the reference
    /// pose is updated only in that case, so subsequent calls measure motion
    /// since the last true update.
    pub fn refresh<Q>(
        &mut self,
        delta: &Isometry3<f64>,
        source_len: usize,
        tree: &(dyn NearestNeighborSearch + Send + Sync),
        pool: &WorkerPool,
        config: &MatchingConfig,
        query: Q,
    ) -> bool
    where
        Q: Fn(usize) -> Vector4<f64> + Sync,
    {
        if self.indices.len() == source_len && config.tolerance_enabled() {
            let diff = delta.inverse() * self.last_refresh_delta;
            let diff_rot = diff.rotation.angle();
            let diff_trans = diff.translation.vector.norm();
            if diff_rot < config.correspondence_update_tolerance_rot
                && diff_trans < config.correspondence_update_tolerance_trans
            {
                log::debug!(
                    "correspondences reused (rot {diff_rot:.2e}, trans {diff_trans:.2e} within tolerance)"
                );
                return false;
            }
        }

        self.last_refresh_delta = *delta;

        let max_sq_dist = config.max_correspondence_distance_sq;
        self.indices = pool.map_collect(source_len, |i| {
            match tree.nearest_within(&query(i), max_sq_dist) {
                Some(n) if n.sq_dist < max_sq_dist => n.index as i64,
                _ => NO_MATCH,
            }
        });

        log::debug!(
            "correspondences updated: {}/{} matched",
            self.indices.iter().filter(|&&j| j >= 0).count(),
            source_len
        );
        true
    }
}

impl Default for CorrespondenceCache {
    fn default() -> Self {
        Self::new()
    }
}
