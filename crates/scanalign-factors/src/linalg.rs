use nalgebra::{Matrix3, Vector3};

/// Skew-symmetric (hat) matrix of a 3-vector.
///
/// `skew(a) * b == a.cross(&b)` for any `b`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}
