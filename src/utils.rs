/// Euclidean distance between two points in the plane.
pub fn l2(x: &[f64; 2], y: &[f64; 2]) -> f64 {
    ((x[0] - y[0]).powi(2) + (x[1] - y[1]).powi(2)).sqrt()
}

/// Convert rows of a coordinate table into points, checking each row has exactly two columns.
pub fn to_points(rows: &[Vec<f64>]) -> Option<Vec<[f64; 2]>> {
    rows.iter()
        .map(|row| match row.as_slice() {
            [x, y] => Some([*x, *y]),
            _ => None,
        })
        .collect()
}
