//! Flock simulation
//!
//! The authoritative entity set and the steering rules applied to it each
//! tick. Clients never run this; they render whatever the latest snapshot
//! says. All distances are in pixels, speeds in px/s, accelerations in
//! px/s^2, so the step is independent of the tick rate.

use std::collections::HashMap;

use rand::Rng;

use crate::protocol::Boid;

/// Radius within which neighbors influence alignment and cohesion (px)
pub const PERCEPTION: f32 = 60.0;
/// Radius within which neighbors are considered too close (px)
pub const CROWDING: f32 = 15.0;
/// Slowest a boid is allowed to fly (px/s)
pub const MIN_SPEED: f32 = 15.0;
/// Fastest a boid is allowed to fly (px/s)
pub const MAX_SPEED: f32 = 80.0;
/// Ceiling applied to each raw steering force before weighting (px/s^2)
pub const MAX_FORCE: f32 = 160.0;
/// Acceleration applied inside the edge margin, pointing back in (px/s^2)
pub const EDGE_TURN: f32 = 220.0;

pub const SEPARATION_WEIGHT: f32 = 1.0;
pub const ALIGNMENT_WEIGHT: f32 = 1.0 / 8.0;
pub const COHESION_WEIGHT: f32 = 1.0 / 100.0;

/// World dimensions and entity limit
#[derive(Debug, Clone)]
pub struct FlockConfig {
    /// Most boids the flock will hold
    pub capacity: usize,
    /// World width in pixels
    pub width: f32,
    /// World height in pixels
    pub height: f32,
    /// Distance from the walls where edge steering kicks in
    pub margin: f32,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            width: 800.0,
            height: 450.0,
            margin: 10.0,
        }
    }
}

/// The authoritative set of boids
#[derive(Debug)]
pub struct Flock {
    boids: HashMap<u32, Boid>,
    config: FlockConfig,
}

impl Flock {
    pub fn new(config: FlockConfig) -> Self {
        Self {
            boids: HashMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.boids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boids.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.boids.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Boid> {
        self.boids.get(&id)
    }

    /// Add a boid, or move an existing one
    ///
    /// A known id is updated in place even at capacity, so re-adding is
    /// idempotent. A new id is silently refused once the flock is full;
    /// the caller learns about it from the return value.
    pub fn insert(&mut self, boid: Boid) -> bool {
        if let Some(existing) = self.boids.get_mut(&boid.id) {
            *existing = boid;
            return true;
        }
        if self.boids.len() >= self.config.capacity {
            return false;
        }
        self.boids.insert(boid.id, boid);
        true
    }

    /// Remove a boid; false if the id was never there
    pub fn remove(&mut self, id: u32) -> bool {
        self.boids.remove(&id).is_some()
    }

    /// Seed `count` boids at random positions inside the margin box
    ///
    /// Ids are drawn randomly and re-drawn on collision. Returns how many
    /// were actually added, which is less than `count` when the capacity
    /// runs out.
    pub fn spawn_random(&mut self, count: usize) -> usize {
        let mut rng = rand::thread_rng();
        let mut added = 0;

        for _ in 0..count {
            if self.boids.len() >= self.config.capacity {
                break;
            }

            let id = loop {
                let candidate = rng.gen::<u32>();
                if !self.boids.contains_key(&candidate) {
                    break candidate;
                }
            };

            let x = rng.gen_range(self.config.margin..self.config.width - self.config.margin);
            let y = rng.gen_range(self.config.margin..self.config.height - self.config.margin);
            let heading = rng.gen_range(0.0..std::f32::consts::TAU);
            let speed = rng.gen_range(MIN_SPEED..MAX_SPEED);

            self.boids.insert(
                id,
                Boid::new(id, x, y, heading.cos() * speed, heading.sin() * speed),
            );
            added += 1;
        }

        added
    }

    /// Current state, in no particular order
    pub fn snapshot(&self) -> Vec<Boid> {
        self.boids.values().copied().collect()
    }

    /// Advance the simulation by `dt` seconds
    ///
    /// Every boid steers against the state at the start of the tick, so the
    /// iteration order never matters.
    pub fn step(&mut self, dt: f32) {
        let frozen: Vec<Boid> = self.boids.values().copied().collect();

        for boid in self.boids.values_mut() {
            let neighbors: Vec<Boid> = frozen
                .iter()
                .filter(|other| other.id != boid.id && distance(boid, other) < PERCEPTION)
                .copied()
                .collect();

            let (sep_x, sep_y) = separation(boid, &neighbors);
            let (ali_x, ali_y) = alignment(boid, &neighbors);
            let (coh_x, coh_y) = cohesion(boid, &neighbors);
            let (edge_x, edge_y) = edge_steering(boid, &self.config);

            let ax = sep_x + ali_x + coh_x + edge_x;
            let ay = sep_y + ali_y + coh_y + edge_y;

            boid.vx += ax * dt;
            boid.vy += ay * dt;
            clamp_speed(boid);

            boid.x = (boid.x + boid.vx * dt).clamp(0.0, self.config.width);
            boid.y = (boid.y + boid.vy * dt).clamp(0.0, self.config.height);
        }
    }
}

impl Default for Flock {
    fn default() -> Self {
        Self::new(FlockConfig::default())
    }
}

fn distance(a: &Boid, b: &Boid) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Steer away from neighbors closer than the crowding radius
fn separation(boid: &Boid, neighbors: &[Boid]) -> (f32, f32) {
    let mut steering_x = 0.0;
    let mut steering_y = 0.0;

    for other in neighbors {
        if distance(boid, other) < CROWDING {
            steering_x -= other.x - boid.x;
            steering_y -= other.y - boid.y;
        }
    }

    let (fx, fy) = clamp_force(steering_x, steering_y);
    (fx * SEPARATION_WEIGHT, fy * SEPARATION_WEIGHT)
}

/// Steer toward the neighbors' average velocity
fn alignment(boid: &Boid, neighbors: &[Boid]) -> (f32, f32) {
    if neighbors.is_empty() {
        return (0.0, 0.0);
    }

    let mut avg_vx = 0.0;
    let mut avg_vy = 0.0;
    for other in neighbors {
        avg_vx += other.vx;
        avg_vy += other.vy;
    }
    avg_vx /= neighbors.len() as f32;
    avg_vy /= neighbors.len() as f32;

    let (fx, fy) = clamp_force(avg_vx - boid.vx, avg_vy - boid.vy);
    (fx * ALIGNMENT_WEIGHT, fy * ALIGNMENT_WEIGHT)
}

/// Steer toward the neighbors' center of mass
fn cohesion(boid: &Boid, neighbors: &[Boid]) -> (f32, f32) {
    if neighbors.is_empty() {
        return (0.0, 0.0);
    }

    let mut center_x = 0.0;
    let mut center_y = 0.0;
    for other in neighbors {
        center_x += other.x;
        center_y += other.y;
    }
    center_x /= neighbors.len() as f32;
    center_y /= neighbors.len() as f32;

    let (fx, fy) = clamp_force(center_x - boid.x, center_y - boid.y);
    (fx * COHESION_WEIGHT, fy * COHESION_WEIGHT)
}

/// Steer back toward the interior when inside the edge margin
fn edge_steering(boid: &Boid, config: &FlockConfig) -> (f32, f32) {
    let mut fx = 0.0;
    let mut fy = 0.0;

    if boid.x < config.margin {
        fx += EDGE_TURN;
    } else if boid.x > config.width - config.margin {
        fx -= EDGE_TURN;
    }
    if boid.y < config.margin {
        fy += EDGE_TURN;
    } else if boid.y > config.height - config.margin {
        fy -= EDGE_TURN;
    }

    (fx, fy)
}

/// Scale a force down to the per-rule ceiling
fn clamp_force(fx: f32, fy: f32) -> (f32, f32) {
    let magnitude_sq = fx * fx + fy * fy;
    if magnitude_sq > MAX_FORCE * MAX_FORCE {
        let scale = MAX_FORCE / magnitude_sq.sqrt();
        (fx * scale, fy * scale)
    } else {
        (fx, fy)
    }
}

/// Clamp the velocity magnitude into [MIN_SPEED, MAX_SPEED]
///
/// A boid at rest stays at rest until some force moves it; rescaling a zero
/// vector has no direction to preserve.
fn clamp_speed(boid: &mut Boid) {
    let speed = (boid.vx * boid.vx + boid.vy * boid.vy).sqrt();

    if speed > MAX_SPEED {
        let scale = MAX_SPEED / speed;
        boid.vx *= scale;
        boid.vy *= scale;
    } else if speed > f32::EPSILON && speed < MIN_SPEED {
        let scale = MIN_SPEED / speed;
        boid.vx *= scale;
        boid.vy *= scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(capacity: usize) -> FlockConfig {
        FlockConfig {
            capacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_respects_capacity() {
        let mut flock = Flock::new(small_config(2));
        assert!(flock.insert(Boid::new(1, 10.0, 10.0, 20.0, 0.0)));
        assert!(flock.insert(Boid::new(2, 20.0, 10.0, 20.0, 0.0)));
        assert!(!flock.insert(Boid::new(3, 30.0, 10.0, 20.0, 0.0)));
        assert_eq!(flock.len(), 2);
        assert!(!flock.contains(3));
    }

    #[test]
    fn test_insert_existing_id_updates_in_place() {
        let mut flock = Flock::new(small_config(1));
        assert!(flock.insert(Boid::new(7, 10.0, 10.0, 20.0, 0.0)));

        // At capacity, but a known id is an update, not an addition
        assert!(flock.insert(Boid::new(7, 50.0, 60.0, 0.0, 20.0)));
        assert_eq!(flock.len(), 1);

        let moved = flock.get(7).unwrap();
        assert_eq!(moved.x, 50.0);
        assert_eq!(moved.y, 60.0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut flock = Flock::default();
        assert!(!flock.remove(99));

        flock.insert(Boid::new(99, 10.0, 10.0, 20.0, 0.0));
        assert!(flock.remove(99));
        assert!(flock.is_empty());
    }

    #[test]
    fn test_spawn_random_stays_inside_margin() {
        let mut flock = Flock::default();
        assert_eq!(flock.spawn_random(50), 50);
        assert_eq!(flock.len(), 50);

        let config = FlockConfig::default();
        for boid in flock.snapshot() {
            assert!(boid.x >= config.margin && boid.x <= config.width - config.margin);
            assert!(boid.y >= config.margin && boid.y <= config.height - config.margin);

            let speed = (boid.vx * boid.vx + boid.vy * boid.vy).sqrt();
            assert!(speed >= MIN_SPEED - 0.001 && speed <= MAX_SPEED + 0.001);
        }
    }

    #[test]
    fn test_spawn_random_respects_capacity() {
        let mut flock = Flock::new(small_config(10));
        assert_eq!(flock.spawn_random(20), 10);
        assert_eq!(flock.len(), 10);
    }

    #[test]
    fn test_step_keeps_boids_in_world() {
        let mut flock = Flock::default();
        flock.spawn_random(30);

        for _ in 0..100 {
            flock.step(1.0 / 30.0);
        }

        let config = FlockConfig::default();
        for boid in flock.snapshot() {
            assert!(boid.x >= 0.0 && boid.x <= config.width);
            assert!(boid.y >= 0.0 && boid.y <= config.height);

            let speed = (boid.vx * boid.vx + boid.vy * boid.vy).sqrt();
            assert!(speed >= MIN_SPEED - 0.001 && speed <= MAX_SPEED + 0.001);
        }
    }

    #[test]
    fn test_crowded_boids_push_apart() {
        let mut flock = Flock::default();
        flock.insert(Boid::new(1, 200.0, 200.0, 20.0, 0.0));
        flock.insert(Boid::new(2, 210.0, 200.0, 20.0, 0.0));

        let before = distance(flock.get(1).unwrap(), flock.get(2).unwrap());
        for _ in 0..10 {
            flock.step(1.0 / 30.0);
        }
        let after = distance(flock.get(1).unwrap(), flock.get(2).unwrap());

        assert!(after > before);
    }

    #[test]
    fn test_step_with_zero_dt_changes_nothing() {
        let mut flock = Flock::default();
        flock.insert(Boid::new(1, 100.0, 100.0, 20.0, 0.0));
        flock.insert(Boid::new(2, 300.0, 300.0, 0.0, -20.0));

        let before = flock.snapshot();
        flock.step(0.0);
        let mut after = flock.snapshot();

        // HashMap order is arbitrary, compare by id
        after.sort_by_key(|b| b.id);
        let mut before = before;
        before.sort_by_key(|b| b.id);
        assert_eq!(before, after);
    }
}
