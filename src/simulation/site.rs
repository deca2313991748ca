//! Static and movable things on the site: zones, obstacles and
//! construction objects.

use serde::Serialize;

use super::grid::OccupancyGrid;
use super::types::{
    MaterialType, ObjectId, ObjectStatus, ObstacleId, Position, Rect, RobotId, ZoneCategory,
    ZoneId, ZONE_SLOT_SPACING,
};

/// A rectangular zone of the site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimZone {
    pub id: ZoneId,
    pub name: String,
    pub category: ZoneCategory,
    pub bounds: Rect,
    /// Advisory limit; tasks may still target a full zone
    pub capacity: u32,
    /// Objects resting inside the bounds, recomputed every tick
    pub contents: Vec<ObjectId>,
    pub color: String,
}

impl SimZone {
    pub fn new(
        id: ZoneId,
        name: impl Into<String>,
        category: ZoneCategory,
        bounds: Rect,
        capacity: u32,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            bounds,
            capacity,
            contents: Vec::new(),
            color: color.into(),
        }
    }

    pub fn occupancy(&self) -> u32 {
        self.contents.len() as u32
    }

    pub fn is_over_capacity(&self) -> bool {
        self.occupancy() > self.capacity
    }

    /// Drop slots laid out on a regular lattice inside the zone, skipping
    /// cells blocked by obstacles
    pub fn slots(&self, grid: &OccupancyGrid) -> Vec<Position> {
        let margin = ZONE_SLOT_SPACING * 0.5;
        let cols = ((self.bounds.width() / ZONE_SLOT_SPACING).floor() as usize).max(1);
        let rows = ((self.bounds.height() / ZONE_SLOT_SPACING).floor() as usize).max(1);

        let mut slots = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let point = Position::new(
                    (self.bounds.min_x + margin + col as f32 * ZONE_SLOT_SPACING).min(self.bounds.max_x),
                    (self.bounds.min_y + margin + row as f32 * ZONE_SLOT_SPACING).min(self.bounds.max_y),
                );
                if !grid.is_occupied(&point) {
                    slots.push(point);
                }
            }
        }
        slots
    }
}

/// A static obstacle rectangle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimObstacle {
    pub id: ObstacleId,
    pub label: String,
    pub bounds: Rect,
}

/// A movable unit of construction material
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimObject {
    pub id: ObjectId,
    pub material: MaterialType,
    pub status: ObjectStatus,
    pub position: Position,
    /// Robot currently holding the object; set iff status is PICKED or CARRIED
    pub holder: Option<RobotId>,
    /// Zone the object currently rests in, tracked by containment
    pub zone: Option<ZoneId>,
}

impl SimObject {
    pub fn new(id: ObjectId, material: MaterialType, position: Position) -> Self {
        Self {
            id,
            material,
            status: ObjectStatus::Available,
            position,
            holder: None,
            zone: None,
        }
    }

    pub fn weight_kg(&self) -> f32 {
        self.material.weight_kg()
    }

    /// Grip the object
    pub fn pick(&mut self, robot: RobotId) {
        self.status = ObjectStatus::Picked;
        self.holder = Some(robot);
        self.zone = None;
    }

    /// Follow the holder while it moves
    pub fn carry(&mut self, position: Position) {
        self.status = ObjectStatus::Carried;
        self.position = position;
    }

    /// Set the object down as delivered
    pub fn place(&mut self, position: Position) {
        self.status = ObjectStatus::Placed;
        self.position = position;
        self.holder = None;
    }

    /// Let go of the object without delivering it
    pub fn release(&mut self, position: Position) {
        self.status = ObjectStatus::Available;
        self.position = position;
        self.holder = None;
    }
}
