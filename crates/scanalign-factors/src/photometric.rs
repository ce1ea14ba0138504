use std::sync::Arc;

use nalgebra::{Isometry3, Matrix4, Matrix4x6};

use scanalign_cloud::{GradientFrame, PointFrame};
use scanalign_search::NearestNeighborSearch;

use crate::blocks::LinearizedBlocks;
use crate::config::PhotometricConfig;
use crate::correspondence::CorrespondenceCache;
use crate::error::{FactorError, FrameRole};
use crate::linalg::skew;
use crate::reduction::{EvalSums, WorkerPool};

/// Photometric (color consistency) matching cost between two clouds.
///
/// Each matched pair projects the transformed source point onto the target
/// point's tangent plane and compares intensities through a first-order
/// expansion of the target intensity field:
/// `e = I_target + g · (projected - target_mean) - I_source`, contributing
/// `0.5 * w * e²` with a configured scalar weight `w`.
///
/// Nearest-neighbor queries carry the source intensity in the homogeneous
/// slot, so an intensity-aware index (such as
/// [`KdTree4`](scanalign_search::KdTree4)) can match on it; a plain spatial
/// index simply ignores it.
pub struct PhotometricFactor<T, S, G>
where
    T: PointFrame + Send + Sync,
    S: PointFrame + Send + Sync,
    G: GradientFrame + Send + Sync,
{
    target: Arc<T>,
    source: Arc<S>,
    tree: Arc<dyn NearestNeighborSearch + Send + Sync>,
    gradients: Arc<G>,
    config: PhotometricConfig,
    pool: WorkerPool,
    cache: CorrespondenceCache,
}

impl<T, S, G> PhotometricFactor<T, S, G>
where
    T: PointFrame + Send + Sync,
    S: PointFrame + Send + Sync,
    G: GradientFrame + Send + Sync,
{
    /// Create a factor over a target/source pair, a target-side index, and
    /// the target's intensity gradients.
    ///
    /// The target must carry points, normals, and intensities; the source
    /// points and intensities; `gradients` must have one entry per target
    /// point.
    ///
    /// # Errors
    ///
    /// [`FactorError::MissingAttribute`], [`FactorError::GradientLength`],
    /// or a worker pool construction error.
    pub fn new(
        target: Arc<T>,
        source: Arc<S>,
        tree: Arc<dyn NearestNeighborSearch + Send + Sync>,
        gradients: Arc<G>,
        config: PhotometricConfig,
    ) -> Result<Self, FactorError> {
        for (attribute, present) in [
            ("points", target.has_points()),
            ("normals", target.has_normals()),
            ("intensities", target.has_intensities()),
        ] {
            if !present {
                return Err(FactorError::MissingAttribute {
                    frame: FrameRole::Target,
                    attribute,
                });
            }
        }
        for (attribute, present) in [
            ("points", source.has_points()),
            ("intensities", source.has_intensities()),
        ] {
            if !present {
                return Err(FactorError::MissingAttribute {
                    frame: FrameRole::Source,
                    attribute,
                });
            }
        }
        if gradients.len() != target.len() {
            return Err(FactorError::GradientLength {
                expected: target.len(),
                got: gradients.len(),
            });
        }

        let pool = WorkerPool::new(config.matching.num_threads)?;
        Ok(Self {
            target,
            source,
            tree,
            gradients,
            config,
            pool,
            cache: CorrespondenceCache::new(),
        })
    }

    /// Refresh correspondences for `delta`.
    ///
    /// Queries carry the source intensity in the homogeneous slot. The
    /// search is skipped, and the tolerance reference pose left untouched,
    /// when the pose moved less than the configured tolerances since the
    /// last actual refresh.
    pub fn update_correspondences(&mut self, delta: &Isometry3<f64>) {
        let m = delta.to_homogeneous();

        let source = &self.source;
        self.cache.refresh(
            delta,
            source.len(),
            self.tree.as_ref(),
            &self.pool,
            &self.config.matching,
            |i| {
                let mut pt = m * source.point(i);
                pt.w = source.intensity(i);
                pt
            },
        );
    }

    /// Evaluate the total photometric cost at `delta`, optionally
    /// accumulating the five derivative blocks.
    ///
    /// The scalar cost is identical whether or not `blocks` is supplied.
    /// Source points without a valid correspondence contribute nothing.
    pub fn evaluate(
        &mut self,
        delta: &Isometry3<f64>,
        blocks: Option<&mut LinearizedBlocks>,
    ) -> f64 {
        if self.cache.is_stale(self.source.len()) {
            self.update_correspondences(delta);
        }

        let started = std::time::Instant::now();
        let with_derivs = blocks.is_some();
        let m = delta.to_homogeneous();
        let rot = delta.rotation.to_rotation_matrix().into_inner();
        let w_photo = self.config.photometric_term_weight;

        let target = &self.target;
        let source = &self.source;
        let gradients = &self.gradients;
        let indices = self.cache.indices();

        let sums = self.pool.map_reduce(
            source.len(),
            EvalSums::zeros,
            |mut acc: EvalSums, i: usize| {
                let j = indices[i];
                if j < 0 {
                    return acc;
                }
                let j = j as usize;

                let mean_a = source.point(i);
                let intensity_a = source.intensity(i);

                let mean_b = target.point(j);
                let normal_b = target.normal(j);
                let gradient_b = gradients.intensity_gradient(j);
                let intensity_b = target.intensity(j);

                let transed_a = m * mean_a;

                let projected = transed_a - (transed_a - mean_b).dot(&normal_b) * normal_b;
                let offset = projected - mean_b;
                let error = intensity_b + gradient_b.dot(&offset) - intensity_a;

                acc.cost += 0.5 * error * w_photo * error;

                if !with_derivs {
                    return acc;
                }

                let mut j_transed_target = Matrix4x6::<f64>::zeros();
                j_transed_target
                    .fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&skew(&transed_a.xyz()));
                j_transed_target
                    .fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&(-nalgebra::Matrix3::identity()));

                let mut j_transed_source = Matrix4x6::<f64>::zeros();
                j_transed_source
                    .fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&(-rot * skew(&mean_a.xyz())));
                j_transed_source.fixed_view_mut::<3, 3>(0, 3).copy_from(&rot);

                // tangent-plane projector restricted to the geometric subspace
                let mut j_projected_transed = Matrix4::identity() - normal_b * normal_b.transpose();
                for k in 0..4 {
                    j_projected_transed[(3, k)] = 0.0;
                    j_projected_transed[(k, 3)] = 0.0;
                }

                let j_e_transed = gradient_b.transpose() * j_projected_transed;
                let j_e_target = j_e_transed * j_transed_target;
                let j_e_source = j_e_transed * j_transed_source;

                acc.blocks.h_target += j_e_target.transpose() * j_e_target * w_photo;
                acc.blocks.h_source += j_e_source.transpose() * j_e_source * w_photo;
                acc.blocks.h_target_source += j_e_target.transpose() * j_e_source * w_photo;
                acc.blocks.b_target += j_e_target.transpose() * (w_photo * error);
                acc.blocks.b_source += j_e_source.transpose() * (w_photo * error);
                acc
            },
            EvalSums::merge,
        );

        log::debug!(
            "photometric evaluate: cost {:.6e} over {} points in {:?}",
            sums.cost,
            source.len(),
            started.elapsed()
        );

        if let Some(out) = blocks {
            *out = sums.blocks;
        }
        sums.cost
    }

    /// The correspondence map (one signed target index per source point).
    pub fn correspondences(&self) -> &[i64] {
        self.cache.indices()
    }
}
