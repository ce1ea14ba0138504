use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Vector4;

use scanalign_cloud::PointFrame;

use crate::search::{NearestNeighborSearch, Neighbor};

/// Spatial kd-tree over the 3D coordinates of a frame's points.
pub struct KdTree3 {
    tree: ImmutableKdTree<f64, u32, 3, 32>,
}

impl KdTree3 {
    /// Build the tree from a frame's points.
    pub fn from_frame<F: PointFrame>(frame: &F) -> Self {
        let entries = (0..frame.len())
            .map(|i| {
                let p = frame.point(i);
                [p.x, p.y, p.z]
            })
            .collect::<Vec<_>>();
        Self {
            tree: ImmutableKdTree::new_from_slice(&entries),
        }
    }
}

impl NearestNeighborSearch for KdTree3 {
    fn nearest_within(&self, query: &Vector4<f64>, max_sq_dist: f64) -> Option<Neighbor> {
        let nn = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        (nn.distance < max_sq_dist).then_some(Neighbor {
            index: nn.item as usize,
            sq_dist: nn.distance,
        })
    }
}

/// Position-and-intensity kd-tree over 4D entries `[x, y, z, intensity]`.
///
/// Matches on the full query vector, so a caller that writes a point's
/// intensity into the homogeneous slot gets intensity-aware correspondences.
pub struct KdTree4 {
    tree: ImmutableKdTree<f64, u32, 4, 32>,
}

impl KdTree4 {
    /// Build the tree from a frame's points and intensities.
    ///
    /// The frame must carry intensities.
    pub fn from_frame<F: PointFrame>(frame: &F) -> Self {
        let entries = (0..frame.len())
            .map(|i| {
                let p = frame.point(i);
                [p.x, p.y, p.z, frame.intensity(i)]
            })
            .collect::<Vec<_>>();
        Self {
            tree: ImmutableKdTree::new_from_slice(&entries),
        }
    }
}

impl NearestNeighborSearch for KdTree4 {
    fn nearest_within(&self, query: &Vector4<f64>, max_sq_dist: f64) -> Option<Neighbor> {
        let nn = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z, query.w]);
        (nn.distance < max_sq_dist).then_some(Neighbor {
            index: nn.item as usize,
            sq_dist: nn.distance,
        })
    }
}
