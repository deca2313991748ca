//! Synthetic sensor readings

mod common;

use std::f32::consts::FRAC_PI_2;

use common::*;
use site_sim::simulation::{
    detect, lidar_scan, proximity, ObstacleId, OccupancyGrid, Pose, Rect, SimId, SimObstacle,
};

fn obstacle(id: usize, bounds: Rect) -> SimObstacle {
    SimObstacle {
        id: ObstacleId(SimId(id)),
        label: format!("block {}", id),
        bounds,
    }
}

#[test]
fn test_lidar_open_space() {
    let grid = OccupancyGrid::build(10.0, 10.0, 0.5, std::iter::empty(), 0);
    let scan = lidar_scan(&Pose::new(5.0, 5.0, 0.0), &grid, 8, 3.0, 0.1);

    assert_eq!(scan.rays.len(), 8);
    assert_eq!(scan.rays[0].angle, 0.0);
    for ray in &scan.rays {
        assert!(!ray.hit);
        assert_eq!(ray.distance, 3.0);
    }
}

#[test]
fn test_lidar_hits_obstacle_ahead() {
    let wall = Rect::new(7.0, 0.0, 8.0, 10.0);
    let grid = OccupancyGrid::build(10.0, 10.0, 0.5, [&wall], 0);
    let scan = lidar_scan(&Pose::new(5.0, 5.0, 0.0), &grid, 4, 4.0, 0.1);

    let ahead = &scan.rays[0];
    assert!(ahead.hit);
    assert!((ahead.distance - 2.0).abs() <= 0.11, "distance {}", ahead.distance);
    assert!(ahead.hit_point.x >= 7.0);

    // The ray pointing up has open space for its whole range
    let up = &scan.rays[1];
    assert!(!up.hit);
    assert!((up.angle - FRAC_PI_2).abs() < 1e-5);
}

#[test]
fn test_proximity_follows_heading() {
    let block = obstacle(0, Rect::new(7.0, 4.0, 8.0, 6.0));
    let obstacles = [block];
    let cone = 30f32.to_radians();

    let facing_block = proximity(&Pose::new(5.0, 5.0, 0.0), &obstacles, 3.0, cone);
    assert!((facing_block.front - 2.0).abs() < 1e-5);
    assert_eq!(facing_block.back, 3.0);
    assert_eq!(facing_block.left, 3.0);
    assert_eq!(facing_block.right, 3.0);

    // Facing +y the block is on the right
    let facing_up = proximity(&Pose::new(5.0, 5.0, FRAC_PI_2), &obstacles, 3.0, cone);
    assert!((facing_up.right - 2.0).abs() < 1e-5);
    assert_eq!(facing_up.front, 3.0);
}

#[test]
fn test_detection_confidence_falls_with_distance() {
    let obstacles = [
        obstacle(0, Rect::new(9.0, 4.0, 10.0, 6.0)),
        obstacle(1, Rect::new(7.0, 4.0, 8.0, 6.0)),
        obstacle(2, Rect::new(12.0, 4.0, 13.0, 6.0)),
    ];
    let detections = detect(&Pose::new(5.0, 5.0, 0.0), &obstacles, 5.0);

    // Sorted nearest first; the block 7 units away is out of range
    let ids: Vec<ObstacleId> = detections.iter().map(|d| d.obstacle).collect();
    assert_eq!(ids, vec![ObstacleId(SimId(1)), ObstacleId(SimId(0))]);
    assert!((detections[0].confidence - (0.99 - 0.49 * 0.4)).abs() < 1e-5);
    assert!(detections[0].confidence > detections[1].confidence);
    assert_eq!(detections[1].label, "block 0");
}

#[test]
fn test_snapshot_carries_sensor_frames_when_enabled() {
    let mut config = yard_config();
    config.sensors.enabled = true;
    config.sensors.lidar_rays = 12;
    let snapshot = engine(config).snapshot();
    let frame = snapshot.robots[0].sensors.as_ref().expect("sensors enabled");
    assert_eq!(frame.lidar.rays.len(), 12);

    let quiet = engine(yard_config()).snapshot();
    assert!(quiet.robots[0].sensors.is_none());
}
