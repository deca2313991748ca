//! Synthetic sensor readings
//!
//! Pure functions of a robot pose and the obstacle model. Readings are
//! attached to snapshots for visualization only; pathfinding never looks at
//! them.

use serde::Serialize;
use std::f32::consts::{PI, TAU};

use super::config::SensorConfig;
use super::grid::OccupancyGrid;
use super::site::SimObstacle;
use super::types::{ObstacleId, Pose, Position, Rect};

/// One LiDAR ray
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LidarRay {
    /// World-frame angle of the ray in radians
    pub angle: f32,
    /// First-hit distance, or the max range when nothing was hit
    pub distance: f32,
    /// World-space end point of the ray
    pub hit_point: Position,
    pub hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LidarScan {
    pub max_range: f32,
    pub rays: Vec<LidarRay>,
}

/// Nearest obstacle distance in four directions relative to the heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProximityReadings {
    pub front: f32,
    pub back: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub obstacle: ObstacleId,
    pub label: String,
    pub bbox: Rect,
    pub distance: f32,
    pub confidence: f32,
}

/// Everything a robot "sees" in one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorFrame {
    pub lidar: LidarScan,
    pub proximity: ProximityReadings,
    pub detections: Vec<Detection>,
}

/// Cast `rays` rays at equal angular steps starting at the robot heading,
/// marching each one in `step` increments until it enters an occupied cell
pub fn lidar_scan(pose: &Pose, grid: &OccupancyGrid, rays: usize, max_range: f32, step: f32) -> LidarScan {
    let origin = pose.position;
    let rays = (0..rays)
        .map(|i| {
            let angle = normalize_angle(pose.heading + i as f32 * TAU / rays as f32);
            let marches = (max_range / step).floor() as usize;
            for k in 1..=marches {
                let travelled = k as f32 * step;
                let point = origin.offset(angle, travelled);
                if grid.is_occupied(&point) {
                    return LidarRay {
                        angle,
                        distance: travelled,
                        hit_point: point,
                        hit: true,
                    };
                }
            }
            LidarRay {
                angle,
                distance: max_range,
                hit_point: origin.offset(angle, max_range),
                hit: false,
            }
        })
        .collect();

    LidarScan { max_range, rays }
}

/// Directional nearest-obstacle distances. An obstacle counts for a
/// direction when the bearing to its closest point lies within
/// `cone_half_angle` of that direction; each direction keeps the minimum.
pub fn proximity(pose: &Pose, obstacles: &[SimObstacle], max_range: f32, cone_half_angle: f32) -> ProximityReadings {
    // front, left, back, right
    let mut readings = [max_range; 4];
    for obstacle in obstacles {
        let closest = obstacle.bounds.closest_point(&pose.position);
        let distance = closest.distance(&pose.position);
        if distance > max_range {
            continue;
        }
        if distance == 0.0 {
            // Inside the obstacle: every direction is touching
            readings = [0.0; 4];
            break;
        }
        let bearing = normalize_angle(pose.position.angle_to(&closest) - pose.heading);
        for (i, reading) in readings.iter_mut().enumerate() {
            let direction = i as f32 * PI / 2.0;
            if angle_between(bearing, direction) <= cone_half_angle {
                *reading = reading.min(distance);
            }
        }
    }

    ProximityReadings {
        front: readings[0],
        left: readings[1],
        back: readings[2],
        right: readings[3],
    }
}

/// Obstacles within `radius`, labeled with a confidence that falls off
/// linearly from 0.99 at contact to 0.5 at the edge of the radius
pub fn detect(pose: &Pose, obstacles: &[SimObstacle], radius: f32) -> Vec<Detection> {
    let mut detections: Vec<Detection> = obstacles
        .iter()
        .filter_map(|obstacle| {
            let distance = obstacle.bounds.distance_to(&pose.position);
            (distance <= radius).then(|| Detection {
                obstacle: obstacle.id,
                label: obstacle.label.clone(),
                bbox: obstacle.bounds,
                distance,
                confidence: 0.99 - 0.49 * (distance / radius.max(f32::EPSILON)),
            })
        })
        .collect();
    detections.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    detections
}

/// All three readings for one pose
pub fn sense(pose: &Pose, grid: &OccupancyGrid, obstacles: &[SimObstacle], config: &SensorConfig) -> SensorFrame {
    SensorFrame {
        lidar: lidar_scan(pose, grid, config.lidar_rays, config.lidar_range, config.lidar_step),
        proximity: proximity(pose, obstacles, config.proximity_range, config.proximity_cone_deg.to_radians()),
        detections: detect(pose, obstacles, config.detection_radius),
    }
}

/// Wrap an angle into [0, 2π)
fn normalize_angle(angle: f32) -> f32 {
    angle.rem_euclid(TAU)
}

/// Smallest absolute difference between two angles
fn angle_between(a: f32, b: f32) -> f32 {
    let diff = (a - b).rem_euclid(TAU);
    diff.min(TAU - diff)
}
