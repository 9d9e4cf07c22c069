use super::*;

#[test]
fn distance_between_identical_points_is_zero() {
    assert!(calculate_distance(37.7749, -122.4194, 37.7749, -122.4194) < 1e-9);
}

#[test]
fn distance_matches_known_landmark_pair() {
    // San Francisco to Los Angeles, ~559 km great-circle.
    let km = calculate_distance(37.7749, -122.4194, 34.0522, -118.2437);
    assert!((km - 559.0).abs() < 5.0, "expected ~559km, got {km}");
}

#[test]
fn distance_is_symmetric() {
    let a = calculate_distance(37.78, -122.42, 37.80, -122.41);
    let b = calculate_distance(37.80, -122.41, 37.78, -122.42);
    assert!((a - b).abs() < 1e-9);
}
