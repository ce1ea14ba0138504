use nalgebra::{Matrix4, Vector4};

use crate::frame::{GradientFrame, PointFrame};

/// Errors produced when assembling a point cloud.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CloudError {
    /// An optional attribute array does not match the number of points.
    #[error("{attribute} length {got} does not match point count {expected}")]
    AttributeLength {
        /// Name of the mismatched attribute.
        attribute: &'static str,
        /// Expected length (the point count).
        expected: usize,
        /// Actual length of the attribute array.
        got: usize,
    },
}

/// A point cloud with optional per-point attributes.
///
/// Points are stored as homogeneous 4-vectors with `w = 1`; normals use
/// `w = 0`. Covariances live in the 4x4 homogeneous embedding with the
/// fourth row and column zero. All attributes are immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct PointCloud {
    points: Vec<Vector4<f64>>,
    normals: Option<Vec<Vector4<f64>>>,
    covs: Option<Vec<Matrix4<f64>>>,
    intensities: Option<Vec<f64>>,
}

impl PointCloud {
    /// Create a point cloud from homogeneous points and optional attributes.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::AttributeLength`] when an attribute array does
    /// not have one entry per point.
    pub fn new(
        points: Vec<Vector4<f64>>,
        normals: Option<Vec<Vector4<f64>>>,
        covs: Option<Vec<Matrix4<f64>>>,
        intensities: Option<Vec<f64>>,
    ) -> Result<Self, CloudError> {
        let expected = points.len();
        if let Some(normals) = &normals {
            if normals.len() != expected {
                return Err(CloudError::AttributeLength {
                    attribute: "normals",
                    expected,
                    got: normals.len(),
                });
            }
        }
        if let Some(covs) = &covs {
            if covs.len() != expected {
                return Err(CloudError::AttributeLength {
                    attribute: "covs",
                    expected,
                    got: covs.len(),
                });
            }
        }
        if let Some(intensities) = &intensities {
            if intensities.len() != expected {
                return Err(CloudError::AttributeLength {
                    attribute: "intensities",
                    expected,
                    got: intensities.len(),
                });
            }
        }
        Ok(Self {
            points,
            normals,
            covs,
            intensities,
        })
    }

    /// Create a point cloud carrying only points, from xyz triples.
    pub fn from_points(points: &[[f64; 3]]) -> Self {
        Self {
            points: points
                .iter()
                .map(|p| Vector4::new(p[0], p[1], p[2], 1.0))
                .collect(),
            normals: None,
            covs: None,
            intensities: None,
        }
    }

    /// Attach per-point normals from xyz triples (`w` is set to 0).
    pub fn with_normals(mut self, normals: &[[f64; 3]]) -> Result<Self, CloudError> {
        if normals.len() != self.points.len() {
            return Err(CloudError::AttributeLength {
                attribute: "normals",
                expected: self.points.len(),
                got: normals.len(),
            });
        }
        self.normals = Some(
            normals
                .iter()
                .map(|n| Vector4::new(n[0], n[1], n[2], 0.0))
                .collect(),
        );
        Ok(self)
    }

    /// Attach per-point covariances.
    pub fn with_covs(mut self, covs: Vec<Matrix4<f64>>) -> Result<Self, CloudError> {
        if covs.len() != self.points.len() {
            return Err(CloudError::AttributeLength {
                attribute: "covs",
                expected: self.points.len(),
                got: covs.len(),
            });
        }
        self.covs = Some(covs);
        Ok(self)
    }

    /// Attach per-point scalar intensities.
    pub fn with_intensities(mut self, intensities: Vec<f64>) -> Result<Self, CloudError> {
        if intensities.len() != self.points.len() {
            return Err(CloudError::AttributeLength {
                attribute: "intensities",
                expected: self.points.len(),
                got: intensities.len(),
            });
        }
        self.intensities = Some(intensities);
        Ok(self)
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[Vector4<f64>] {
        &self.points
    }

    /// Get as reference the normals of the points, if present.
    pub fn normals(&self) -> Option<&[Vector4<f64>]> {
        self.normals.as_deref()
    }

    /// Get as reference the covariances of the points, if present.
    pub fn covs(&self) -> Option<&[Matrix4<f64>]> {
        self.covs.as_deref()
    }

    /// Get as reference the intensities of the points, if present.
    pub fn intensities(&self) -> Option<&[f64]> {
        self.intensities.as_deref()
    }
}

impl PointFrame for PointCloud {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn point(&self, i: usize) -> Vector4<f64> {
        self.points[i]
    }

    fn normal(&self, i: usize) -> Vector4<f64> {
        match &self.normals {
            Some(normals) => normals[i],
            None => panic!("point cloud does not carry normals"),
        }
    }

    fn cov(&self, i: usize) -> Matrix4<f64> {
        match &self.covs {
            Some(covs) => covs[i],
            None => panic!("point cloud does not carry covariances"),
        }
    }

    fn intensity(&self, i: usize) -> f64 {
        match &self.intensities {
            Some(intensities) => intensities[i],
            None => panic!("point cloud does not carry intensities"),
        }
    }

    fn has_points(&self) -> bool {
        !self.points.is_empty()
    }

    fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    fn has_covs(&self) -> bool {
        self.covs.is_some()
    }

    fn has_intensities(&self) -> bool {
        self.intensities.is_some()
    }
}

/// Per-point intensity gradients aligned to the indices of a target cloud.
///
/// Stored as a separate entity so gradients can be estimated once for a
/// target cloud and shared between factors.
#[derive(Debug, Clone)]
pub struct IntensityGradients {
    gradients: Vec<Vector4<f64>>,
}

impl IntensityGradients {
    /// Wrap precomputed gradients.
    pub fn new(gradients: Vec<Vector4<f64>>) -> Self {
        Self { gradients }
    }

    /// Get as reference the stored gradients.
    pub fn gradients(&self) -> &[Vector4<f64>] {
        &self.gradients
    }
}

impl GradientFrame for IntensityGradients {
    fn len(&self) -> usize {
        self.gradients.len()
    }

    fn intensity_gradient(&self, i: usize) -> Vector4<f64> {
        self.gradients[i]
    }
}
