use std::sync::Arc;

use nalgebra::{Isometry3, Matrix3, Matrix4, Matrix4x6};

use scanalign_cloud::PointFrame;
use scanalign_search::NearestNeighborSearch;

use crate::blocks::LinearizedBlocks;
use crate::config::MatchingConfig;
use crate::correspondence::CorrespondenceCache;
use crate::error::{FactorError, FrameRole};
use crate::linalg::skew;
use crate::reduction::{EvalSums, WorkerPool};

/// Distribution-to-distribution (GICP) matching cost between two clouds.
///
/// Each matched pair contributes `0.5 * eᵀ W e`, where
/// `e = target_mean - delta * source_mean` in homogeneous coordinates and
/// `W` is the pair's Mahalanobis weight derived from the composed target and
/// source covariances. Derivatives are 6x6 Hessian and 6x1 bias blocks with
/// respect to local perturbations of the target and source poses, rotation
/// first.
///
/// The factor holds shared read-only references to the clouds and the
/// nearest-neighbor index; it owns the correspondence map and the weights
/// and rebuilds them in place. `update_correspondences` should be called
/// once per linearization point; `evaluate` reuses the cached state and only
/// rebuilds when the cache does not cover the source cloud.
pub struct GicpFactor<T, S>
where
    T: PointFrame + Send + Sync,
    S: PointFrame + Send + Sync,
{
    target: Arc<T>,
    source: Arc<S>,
    tree: Arc<dyn NearestNeighborSearch + Send + Sync>,
    config: MatchingConfig,
    pool: WorkerPool,
    cache: CorrespondenceCache,
    mahalanobis: Vec<Matrix4<f64>>,
}

impl<T, S> GicpFactor<T, S>
where
    T: PointFrame + Send + Sync,
    S: PointFrame + Send + Sync,
{
    /// Create a factor over a target/source pair and a target-side index.
    ///
    /// Both frames must carry points and covariances.
    ///
    /// # Errors
    ///
    /// [`FactorError::MissingAttribute`] when a required attribute is
    /// absent, [`FactorError::InvalidThreadCount`] /
    /// [`FactorError::ThreadPool`] when the worker pool cannot be built.
    pub fn new(
        target: Arc<T>,
        source: Arc<S>,
        tree: Arc<dyn NearestNeighborSearch + Send + Sync>,
        config: MatchingConfig,
    ) -> Result<Self, FactorError> {
        for (frame, has_points, has_covs) in [
            (FrameRole::Target, target.has_points(), target.has_covs()),
            (FrameRole::Source, source.has_points(), source.has_covs()),
        ] {
            if !has_points {
                return Err(FactorError::MissingAttribute {
                    frame,
                    attribute: "points",
                });
            }
            if !has_covs {
                return Err(FactorError::MissingAttribute {
                    frame,
                    attribute: "covs",
                });
            }
        }

        let pool = WorkerPool::new(config.num_threads)?;
        Ok(Self {
            target,
            source,
            tree,
            config,
            pool,
            cache: CorrespondenceCache::new(),
            mahalanobis: Vec::new(),
        })
    }

    /// Refresh correspondences and Mahalanobis weights for `delta`.
    ///
    /// The nearest-neighbor search is skipped when the pose moved less than
    /// the configured tolerances since the last actual refresh; the weights
    /// depend on the current `delta` and are recomputed either way.
    ///
    /// A composed covariance that is singular even after the homogeneous
    /// fix-up is not guarded: its weight becomes non-finite and propagates
    /// into the cost and derivative blocks.
    pub fn update_correspondences(&mut self, delta: &Isometry3<f64>) {
        let m = delta.to_homogeneous();

        let source = &self.source;
        self.cache.refresh(
            delta,
            source.len(),
            self.tree.as_ref(),
            &self.pool,
            &self.config,
            |i| m * source.point(i),
        );

        let indices = self.cache.indices();
        let target = &self.target;
        self.mahalanobis = self.pool.map_collect(source.len(), |i| {
            let j = indices[i];
            if j < 0 {
                return Matrix4::zeros();
            }
            let mut rcr = target.cov(j as usize) + m * source.cov(i) * m.transpose();
            // keep the composed covariance invertible in the homogeneous slot
            rcr[(3, 3)] = 1.0;
            // a singular composed covariance is not guarded and surfaces as NaN
            let mut w = rcr
                .try_inverse()
                .unwrap_or_else(|| Matrix4::from_element(f64::NAN));
            for k in 0..4 {
                w[(3, k)] = 0.0;
                w[(k, 3)] = 0.0;
            }
            w
        });
    }

    /// Evaluate the total cost at `delta`, optionally accumulating the five
    /// derivative blocks.
    ///
    /// The scalar cost is identical whether or not `blocks` is supplied.
    /// Source points without a valid correspondence contribute nothing.
    /// Rebuilds the correspondence state first when it does not cover the
    /// source cloud.
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

        let target = &self.target;
        let source = &self.source;
        let indices = self.cache.indices();
        let mahalanobis = self.mahalanobis.as_slice();

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
                let mean_b = target.point(j);
                let w = &mahalanobis[i];

                let transed_a = m * mean_a;
                let error = mean_b - transed_a;

                acc.cost += 0.5 * error.dot(&(w * error));

                if !with_derivs {
                    return acc;
                }

                let mut j_target = Matrix4x6::<f64>::zeros();
                j_target
                    .fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&(-skew(&transed_a.xyz())));
                j_target
                    .fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&Matrix3::identity());

                let mut j_source = Matrix4x6::<f64>::zeros();
                j_source
                    .fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&(rot * skew(&mean_a.xyz())));
                j_source.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-rot));

                let jt_w = j_target.transpose() * w;
                let js_w = j_source.transpose() * w;

                acc.blocks.h_target += jt_w * j_target;
                acc.blocks.h_source += js_w * j_source;
                acc.blocks.h_target_source += jt_w * j_source;
                acc.blocks.b_target += jt_w * error;
                acc.blocks.b_source += js_w * error;
                acc
            },
            EvalSums::merge,
        );

        log::debug!(
            "gicp evaluate: cost {:.6e} over {} points in {:?}",
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use scanalign_cloud::PointCloud;
    use scanalign_search::KdTree3;

    fn geometric_cov(block: Matrix3<f64>) -> Matrix4<f64> {
        let mut c = Matrix4::zeros();
        c.fixed_view_mut::<3, 3>(0, 0).copy_from(&block);
        c
    }

    fn random_points(rng: &mut StdRng, n: usize) -> Vec<[f64; 3]> {
        (0..n)
            .map(|_| [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()])
            .collect()
    }

    fn gicp_cloud(points: &[[f64; 3]]) -> PointCloud {
        PointCloud::from_points(points)
            .with_covs(vec![geometric_cov(Matrix3::identity()); points.len()])
            .unwrap()
    }

    fn pose(axis: Vector3<f64>, trans: Vector3<f64>) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(trans),
            UnitQuaternion::from_scaled_axis(axis),
        )
    }

    /// Local perturbation along tangent dimension `k` (rotation first).
    fn tangent_step(k: usize, eps: f64) -> Isometry3<f64> {
        let mut omega = Vector3::zeros();
        let mut v = Vector3::zeros();
        if k < 3 {
            omega[k] = eps;
        } else {
            v[k - 3] = eps;
        }
        pose(omega, v)
    }

    fn make_factor(
        target: &PointCloud,
        source: &PointCloud,
        config: MatchingConfig,
    ) -> GicpFactor<PointCloud, PointCloud> {
        let target = Arc::new(target.clone());
        let source = Arc::new(source.clone());
        let tree = Arc::new(KdTree3::from_frame(target.as_ref()));
        GicpFactor::new(target, source, tree, config).unwrap()
    }

    #[test]
    fn test_missing_attributes() {
        let with_covs = Arc::new(gicp_cloud(&[[0.0, 0.0, 0.0]]));
        let without_covs = Arc::new(PointCloud::from_points(&[[0.0, 0.0, 0.0]]));
        let tree = Arc::new(KdTree3::from_frame(with_covs.as_ref()));

        let err = GicpFactor::new(
            without_covs.clone(),
            with_covs.clone(),
            tree.clone(),
            MatchingConfig::default(),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            FactorError::MissingAttribute {
                frame: FrameRole::Target,
                attribute: "covs",
            }
        );

        let err = GicpFactor::new(with_covs, without_covs, tree, MatchingConfig::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            FactorError::MissingAttribute {
                frame: FrameRole::Source,
                attribute: "covs",
            }
        );
    }

    #[test]
    fn test_cost_independent_of_derivative_request() {
        let mut rng = StdRng::seed_from_u64(7);
        let points = random_points(&mut rng, 50);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&points);

        let delta = pose(Vector3::new(0.0, 0.0, 0.02), Vector3::new(0.01, -0.02, 0.03));

        let mut factor = make_factor(&target, &source, MatchingConfig::default());
        factor.update_correspondences(&delta);

        let cost_plain = factor.evaluate(&delta, None);
        let mut blocks = LinearizedBlocks::zeros();
        let cost_blocks = factor.evaluate(&delta, Some(&mut blocks));

        assert_eq!(cost_plain, cost_blocks);
        assert!(blocks.h_target != Matrix6::zeros());
    }

    #[test]
    fn test_zero_distance_bound_matches_nothing() {
        let mut rng = StdRng::seed_from_u64(11);
        let points = random_points(&mut rng, 20);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&points);

        let config = MatchingConfig {
            max_correspondence_distance_sq: 0.0,
            ..Default::default()
        };
        let mut factor = make_factor(&target, &source, config);

        let mut blocks = LinearizedBlocks::zeros();
        let cost = factor.evaluate(&Isometry3::identity(), Some(&mut blocks));

        assert!(factor.correspondences().iter().all(|&j| j == -1));
        assert_eq!(cost, 0.0);
        assert_eq!(blocks, LinearizedBlocks::zeros());
    }

    #[test]
    fn test_identity_alignment() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = random_points(&mut rng, 30);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&points);

        let mut factor = make_factor(&target, &source, MatchingConfig::default());
        let mut blocks = LinearizedBlocks::zeros();
        let cost = factor.evaluate(&Isometry3::identity(), Some(&mut blocks));

        assert_eq!(cost, 0.0);
        assert_eq!(blocks.b_target, Vector6::zeros());
        assert_eq!(blocks.b_source, Vector6::zeros());

        // at identity the two Jacobians differ only by sign, so the Hessian
        // blocks collapse onto each other
        for r in 0..6 {
            for c in 0..6 {
                assert_relative_eq!(
                    blocks.h_source[(r, c)],
                    blocks.h_target[(r, c)],
                    epsilon = 1e-12
                );
                assert_relative_eq!(
                    blocks.h_target_source[(r, c)],
                    -blocks.h_target[(r, c)],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_worker_count_invariance() {
        let mut rng = StdRng::seed_from_u64(19);
        let points = random_points(&mut rng, 200);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&random_points(&mut rng, 200));

        let delta = pose(Vector3::new(0.01, -0.02, 0.01), Vector3::new(0.02, 0.01, -0.01));

        let mut single = make_factor(&target, &source, MatchingConfig::default());
        let mut multi = make_factor(
            &target,
            &source,
            MatchingConfig {
                num_threads: 4,
                ..Default::default()
            },
        );

        let mut blocks_single = LinearizedBlocks::zeros();
        let mut blocks_multi = LinearizedBlocks::zeros();
        let cost_single = single.evaluate(&delta, Some(&mut blocks_single));
        let cost_multi = multi.evaluate(&delta, Some(&mut blocks_multi));

        assert_relative_eq!(cost_single, cost_multi, epsilon = 1e-9);
        for r in 0..6 {
            for c in 0..6 {
                assert_relative_eq!(
                    blocks_single.h_target[(r, c)],
                    blocks_multi.h_target[(r, c)],
                    epsilon = 1e-9
                );
                assert_relative_eq!(
                    blocks_single.h_source[(r, c)],
                    blocks_multi.h_source[(r, c)],
                    epsilon = 1e-9
                );
                assert_relative_eq!(
                    blocks_single.h_target_source[(r, c)],
                    blocks_multi.h_target_source[(r, c)],
                    epsilon = 1e-9
                );
            }
            assert_relative_eq!(
                blocks_single.b_target[r],
                blocks_multi.b_target[r],
                epsilon = 1e-9
            );
            assert_relative_eq!(
                blocks_single.b_source[r],
                blocks_multi.b_source[r],
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_bias_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(23);
        let points = random_points(&mut rng, 30);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&points);

        // residuals nonzero but well within the correspondence bound
        let delta = pose(Vector3::new(0.0, 0.03, -0.02), Vector3::new(0.02, 0.01, 0.015));

        let mut factor = make_factor(&target, &source, MatchingConfig::default());
        factor.update_correspondences(&delta);

        let mut blocks = LinearizedBlocks::zeros();
        factor.evaluate(&delta, Some(&mut blocks));

        // correspondences and weights stay frozen across the probes below,
        // so central differences of the cost give the exact bias vectors
        let eps = 1e-6;
        for k in 0..6 {
            let plus = factor.evaluate(&(tangent_step(k, eps).inverse() * delta), None);
            let minus = factor.evaluate(&(tangent_step(k, -eps).inverse() * delta), None);
            let fd = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(blocks.b_target[k], fd, epsilon = 1e-8, max_relative = 1e-5);

            let plus = factor.evaluate(&(delta * tangent_step(k, eps)), None);
            let minus = factor.evaluate(&(delta * tangent_step(k, -eps)), None);
            let fd = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(blocks.b_source[k], fd, epsilon = 1e-8, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_cross_hessian_rederived_from_jacobians() {
        let mut rng = StdRng::seed_from_u64(29);
        let points = random_points(&mut rng, 25);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&points);

        let delta = pose(Vector3::new(0.02, 0.0, 0.01), Vector3::new(-0.01, 0.02, 0.0));

        let mut factor = make_factor(&target, &source, MatchingConfig::default());
        factor.update_correspondences(&delta);

        let mut blocks = LinearizedBlocks::zeros();
        factor.evaluate(&delta, Some(&mut blocks));

        let m = delta.to_homogeneous();
        let rot = delta.rotation.to_rotation_matrix().into_inner();
        let mut expected = Matrix6::<f64>::zeros();
        for (i, &j) in factor.cache.indices().iter().enumerate() {
            if j < 0 {
                continue;
            }
            let mean_a = factor.source.point(i);
            let transed_a = m * mean_a;

            let mut j_target = Matrix4x6::<f64>::zeros();
            j_target
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(-skew(&transed_a.xyz())));
            j_target
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&Matrix3::identity());

            let mut j_source = Matrix4x6::<f64>::zeros();
            j_source
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(rot * skew(&mean_a.xyz())));
            j_source.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-rot));

            expected += j_target.transpose() * factor.mahalanobis[i] * j_source;
        }

        for r in 0..6 {
            for c in 0..6 {
                assert_relative_eq!(
                    blocks.h_target_source[(r, c)],
                    expected[(r, c)],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_refresh_skipped_within_tolerance() {
        let mut rng = StdRng::seed_from_u64(31);
        let points = random_points(&mut rng, 40);
        let target = gicp_cloud(&points);
        let source = gicp_cloud(&points);

        let config = MatchingConfig {
            correspondence_update_tolerance_rot: 0.1,
            correspondence_update_tolerance_trans: 0.1,
            ..Default::default()
        };
        let mut factor = make_factor(&target, &source, config);

        factor.update_correspondences(&Isometry3::identity());
        let before = factor.correspondences().to_vec();

        factor.update_correspondences(&pose(Vector3::zeros(), Vector3::new(0.05, 0.0, 0.0)));
        assert_eq!(factor.correspondences(), before.as_slice());
    }
}
