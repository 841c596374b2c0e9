// src/vec3.rs

/// 3D vector dot product.
#[inline]
pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Average of two vectors, (a + b) / 2.
#[inline]
pub fn midpoint(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        0.5 * (a[0] + b[0]),
        0.5 * (a[1] + b[1]),
        0.5 * (a[2] + b[2]),
    ]
}

/// Euclidean norm.
#[inline]
pub fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_and_norm() {
        let a = [1.0, -2.0, 3.0];
        let b = [0.5, 4.0, -1.0];
        assert_eq!(midpoint(a, b), [0.75, 1.0, 1.0]);
        assert_eq!(dot(a, b), 0.5 - 8.0 - 3.0);
        assert!((norm([3.0, 4.0, 0.0]) - 5.0).abs() < 1e-15);
    }
}
