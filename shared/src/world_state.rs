//! The authoritative object store.
//!
//! Objects, the spatial grid and the derived maze live behind one mutex so a
//! reader never sees them out of step. [`WorldState`] offers single-call
//! methods that lock internally; [`WorldGuard`] is the held lock and is how a
//! multi-step mutation runs as one batch.

use crate::grid::{Maze, WorldDims};
use crate::object::{ObjectError, WorldObject};
use crate::protocol::ObjectDict;
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Tells the render layer to retire one visual layer of a removed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemovalNotice {
    pub obj_id: String,
    pub layer_id: String,
}

/// Per-object result of one integration step.
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    pub id: String,
    pub delta: (f32, f32),
    pub path_completed: bool,
}

#[derive(Debug)]
struct WorldInner {
    objects: BTreeMap<String, WorldObject>,
    grid: Vec<Option<String>>,
    maze: Maze,
}

#[derive(Debug)]
pub struct WorldState {
    dims: WorldDims,
    inner: Mutex<WorldInner>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new(WorldDims::default())
    }
}

impl WorldState {
    pub fn new(dims: WorldDims) -> Self {
        Self {
            dims,
            inner: Mutex::new(WorldInner {
                objects: BTreeMap::new(),
                grid: vec![None; dims.grid_cols() * dims.grid_rows()],
                maze: Maze::for_dims(&dims),
            }),
        }
    }

    pub fn dims(&self) -> WorldDims {
        self.dims
    }

    /// Acquires the state lock. Every batch should go through one guard.
    pub fn lock(&self) -> WorldGuard<'_> {
        WorldGuard {
            dims: self.dims,
            // The whole state is rebuilt per batch, so a poisoned lock is still usable.
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn upsert(&self, obj: WorldObject) {
        self.lock().upsert(obj);
    }

    pub fn get(&self, id: &str) -> Option<WorldObject> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<WorldObject> {
        self.lock().remove(id)
    }

    pub fn apply_snapshot(&self, objects: &BTreeMap<String, Value>) -> Vec<RemovalNotice> {
        self.lock().apply_snapshot(objects)
    }

    pub fn cleanup_expired(&self, now: f64) -> Vec<RemovalNotice> {
        self.lock().cleanup_expired(now)
    }

    pub fn rebuild_maze(&self) {
        self.lock().rebuild_maze();
    }

    pub fn integrate(&self, dt: f32, now: f64) -> Vec<Motion> {
        self.lock().integrate(dt, now)
    }

    pub fn maze(&self) -> Maze {
        self.lock().maze().clone()
    }

    /// Copies of every object, in id order.
    pub fn objects(&self) -> Vec<WorldObject> {
        self.lock().iter().cloned().collect()
    }

    pub fn persistent_dicts(&self) -> BTreeMap<String, Value> {
        self.lock().persistent_dicts()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to a [`WorldState`] for the guard's lifetime.
pub struct WorldGuard<'a> {
    dims: WorldDims,
    inner: MutexGuard<'a, WorldInner>,
}

impl WorldGuard<'_> {
    pub fn dims(&self) -> WorldDims {
        self.dims
    }

    /// Inserts or replaces by id and places the object in the grid.
    ///
    /// The maze is not rebuilt; call [`WorldGuard::rebuild_maze`] once per batch.
    pub fn upsert(&mut self, obj: WorldObject) {
        if let Some(old) = self.inner.objects.get(&obj.id) {
            let old_pos = old.position;
            self.clear_cell(&obj.id, old_pos);
        }
        self.place(&obj.id, obj.position);
        self.inner.objects.insert(obj.id.clone(), obj);
    }

    pub fn get(&self, id: &str) -> Option<&WorldObject> {
        self.inner.objects.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.objects.contains_key(id)
    }

    /// Removes the object and clears its grid cell if the cell still refers to it.
    pub fn remove(&mut self, id: &str) -> Option<WorldObject> {
        let obj = self.inner.objects.remove(id)?;
        self.clear_cell(id, obj.position);
        Some(obj)
    }

    /// Mutates one object in place and re-files it in the grid afterwards.
    pub fn modify<R>(&mut self, id: &str, f: impl FnOnce(&mut WorldObject) -> R) -> Option<R> {
        let obj = self.inner.objects.get_mut(id)?;
        let before = obj.position;
        let result = f(obj);
        let after = obj.position;
        if before != after {
            self.clear_cell(id, before);
            self.place(id, after);
        }
        Some(result)
    }

    /// Removes every object the predicate rejects and returns them.
    pub fn retain(&mut self, mut keep: impl FnMut(&WorldObject) -> bool) -> Vec<WorldObject> {
        let doomed: Vec<String> = self
            .inner
            .objects
            .values()
            .filter(|o| !keep(*o))
            .map(|o| o.id.clone())
            .collect();
        doomed.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldObject> {
        self.inner.objects.values()
    }

    pub fn len(&self) -> usize {
        self.inner.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.objects.is_empty()
    }

    pub fn maze(&self) -> &Maze {
        &self.inner.maze
    }

    /// Id of the object filed at grid `(col, row)`.
    pub fn occupant(&self, col: usize, row: usize) -> Option<&str> {
        if col >= self.dims.grid_cols() || row >= self.dims.grid_rows() {
            return None;
        }
        self.inner.grid[row * self.dims.grid_cols() + col].as_deref()
    }

    pub fn grid_snapshot(&self) -> Vec<Option<String>> {
        self.inner.grid.clone()
    }

    /// Reconciles against an authoritative object map.
    ///
    /// Persistent objects missing from `objects` are removed and reported one
    /// notice per layer. Every entry is then upserted, overriding any local
    /// object with the same id; entries that fail to deserialize are skipped.
    /// Non-persistent objects absent from the map are left for the decay sweep.
    pub fn apply_snapshot(&mut self, objects: &BTreeMap<String, Value>) -> Vec<RemovalNotice> {
        let removed_ids: Vec<String> = self
            .inner
            .objects
            .values()
            .filter(|o| o.is_persistent() && !objects.contains_key(&o.id))
            .map(|o| o.id.clone())
            .collect();

        let mut notices = Vec::new();
        for id in removed_ids {
            if let Some(obj) = self.inner.objects.remove(&id) {
                notices.extend(removal_notices(&obj));
            }
        }

        for (id, value) in objects {
            match decode_object(id, value) {
                Ok(obj) => {
                    self.inner.objects.insert(id.clone(), obj);
                }
                Err(e) => warn!("Skipping object {} in snapshot: {}", id, e),
            }
        }

        self.rebuild_grid();
        self.rebuild_maze();

        debug!(
            "Applied snapshot: {} objects, {} removal notices",
            self.inner.objects.len(),
            notices.len()
        );
        notices
    }

    /// Removes non-persistent objects whose decay time has passed.
    pub fn cleanup_expired(&mut self, now: f64) -> Vec<RemovalNotice> {
        let expired = self.retain(|o| !o.is_expired(now));
        if expired.is_empty() {
            return Vec::new();
        }
        self.rebuild_maze();
        expired.iter().flat_map(removal_notices).collect()
    }

    /// Re-rasterizes every obstacle footprint. Cost grows with obstacle count,
    /// so run it once per batch of mutations.
    pub fn rebuild_maze(&mut self) {
        let dims = self.dims;
        let inner = &mut *self.inner;
        inner.maze = Maze::from_obstacles(
            &dims,
            inner
                .objects
                .values()
                .filter(|o| o.is_obstacle())
                .map(|o| o.position),
        );
    }

    /// Files every object into a fresh grid; later ids win shared cells.
    pub fn rebuild_grid(&mut self) {
        let dims = self.dims;
        let inner = &mut *self.inner;
        inner.grid = vec![None; dims.grid_cols() * dims.grid_rows()];
        for obj in inner.objects.values() {
            if let Some((col, row)) = dims.world_to_grid(obj.position.0, obj.position.1) {
                inner.grid[row * dims.grid_cols() + col] = Some(obj.id.clone());
            }
        }
    }

    /// Advances every object with an active path by `dt`.
    ///
    /// A finished path is cleared; agents also restart their cooldown at `now`.
    pub fn integrate(&mut self, dt: f32, now: f64) -> Vec<Motion> {
        let mut motions = Vec::new();
        for obj in self.inner.objects.values_mut() {
            if !obj.has_active_path() {
                continue;
            }
            let delta = obj.update_position(dt);
            let path_completed = obj.is_path_complete();
            if path_completed {
                obj.clear_path();
                if let Some(agent) = obj.agent.as_mut() {
                    agent.last_path_time = now;
                }
            }
            motions.push(Motion {
                id: obj.id.clone(),
                delta,
                path_completed,
            });
        }
        if !motions.is_empty() {
            self.rebuild_grid();
        }
        motions
    }

    /// Wire form of every persistent object, keyed by id.
    pub fn persistent_dicts(&self) -> BTreeMap<String, Value> {
        self.inner
            .objects
            .values()
            .filter(|o| o.is_persistent())
            .map(|o| (o.id.clone(), o.to_dict().to_value()))
            .collect()
    }

    fn place(&mut self, id: &str, (x, y): (f32, f32)) {
        if let Some((col, row)) = self.dims.world_to_grid(x, y) {
            let cols = self.dims.grid_cols();
            self.inner.grid[row * cols + col] = Some(id.to_string());
        }
    }

    fn clear_cell(&mut self, id: &str, (x, y): (f32, f32)) {
        if let Some((col, row)) = self.dims.world_to_grid(x, y) {
            let cols = self.dims.grid_cols();
            let cell = &mut self.inner.grid[row * cols + col];
            if cell.as_deref() == Some(id) {
                *cell = None;
            }
        }
    }
}

fn decode_object(id: &str, value: &Value) -> Result<WorldObject, ObjectError> {
    let dict: ObjectDict = serde_json::from_value(value.clone())
        .map_err(|e| ObjectError::Malformed(e.to_string()))?;
    let mut obj = WorldObject::from_dict(dict)?;
    if obj.id != id {
        debug!("Object keyed {} carries objId {}, using the key", id, obj.id);
        obj.id = id.to_string();
    }
    Ok(obj)
}

fn removal_notices(obj: &WorldObject) -> Vec<RemovalNotice> {
    obj.layer_ids
        .iter()
        .map(|layer| RemovalNotice {
            obj_id: obj.id.clone(),
            layer_id: layer.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use crate::object::{AgentParams, ObjectType, Waypoint};
    use serde_json::json;

    fn dims() -> WorldDims {
        WorldDims {
            width: 320.0,
            height: 320.0,
            cell_size: 32.0,
            maze_cell_size: 16.0,
        }
    }

    fn snapshot(objects: &[WorldObject]) -> BTreeMap<String, Value> {
        objects
            .iter()
            .map(|o| (o.id.clone(), o.to_dict().to_value()))
            .collect()
    }

    #[test]
    fn test_upsert_places_in_grid_without_maze_rebuild() {
        let world = WorldState::new(dims());
        world.upsert(WorldObject::wall("w", 64.0, 32.0));

        let guard = world.lock();
        assert_eq!(guard.occupant(2, 1), Some("w"));
        assert_eq!(guard.maze().blocked_count(), 0);
    }

    #[test]
    fn test_out_of_bounds_object_is_stored_but_not_gridded() {
        let world = WorldState::new(dims());
        world.upsert(WorldObject::player("p", 900.0, 900.0));

        let guard = world.lock();
        assert!(guard.contains("p"));
        assert!(guard.grid_snapshot().iter().all(|c| c.is_none()));
    }

    #[test]
    fn test_remove_keeps_cell_claimed_by_another_object() {
        let world = WorldState::new(dims());
        let mut guard = world.lock();
        guard.upsert(WorldObject::player("a", 32.0, 32.0));
        guard.upsert(WorldObject::player("b", 40.0, 40.0));
        assert_eq!(guard.occupant(1, 1), Some("b"));

        let removed = guard.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(guard.occupant(1, 1), Some("b"));

        guard.remove("b");
        assert_eq!(guard.occupant(1, 1), None);
        assert!(guard.remove("b").is_none());
    }

    #[test]
    fn test_upsert_moves_grid_entry() {
        let world = WorldState::new(dims());
        world.upsert(WorldObject::player("p", 0.0, 0.0));
        world.upsert(WorldObject::player("p", 96.0, 0.0));

        let guard = world.lock();
        assert_eq!(guard.occupant(0, 0), None);
        assert_eq!(guard.occupant(3, 0), Some("p"));
    }

    #[test]
    fn test_snapshot_replay_is_idempotent() {
        let world = WorldState::new(dims());
        let objects = vec![
            WorldObject::wall("w1", 0.0, 0.0),
            WorldObject::wall("w2", 32.0, 0.0),
            WorldObject::player("p", 64.0, 64.0),
        ];
        let snap = snapshot(&objects);

        world.apply_snapshot(&snap);
        let (objects_a, grid_a, maze_a) = {
            let g = world.lock();
            (world_objects(&g), g.grid_snapshot(), g.maze().clone())
        };

        let notices = world.apply_snapshot(&snap);
        assert!(notices.is_empty());
        let g = world.lock();
        assert_eq!(world_objects(&g), objects_a);
        assert_eq!(g.grid_snapshot(), grid_a);
        assert_eq!(g.maze(), &maze_a);
        assert_eq!(maze_a.blocked_count(), 8);
    }

    fn world_objects(guard: &WorldGuard<'_>) -> Vec<WorldObject> {
        guard.iter().cloned().collect()
    }

    #[test]
    fn test_snapshot_removes_missing_persistent_objects_per_layer() {
        let world = WorldState::new(dims());
        let mut player = WorldObject::player("p", 0.0, 0.0);
        player.layer_ids = vec!["body".into(), "hat".into(), "sword".into()];
        world.apply_snapshot(&snapshot(&[player, WorldObject::wall("w", 32.0, 32.0)]));

        let notices = world.apply_snapshot(&snapshot(&[WorldObject::wall("w", 32.0, 32.0)]));
        assert_eq!(notices.len(), 3);
        assert!(notices.iter().all(|n| n.obj_id == "p"));
        let layers: Vec<&str> = notices.iter().map(|n| n.layer_id.as_str()).collect();
        assert_eq!(layers, vec!["body", "hat", "sword"]);
        assert!(world.get("p").is_none());
        assert!(world.get("w").is_some());
    }

    #[test]
    fn test_snapshot_leaves_absent_ephemeral_objects() {
        let world = WorldState::new(dims());
        let marker =
            WorldObject::ephemeral("gfx-1", ObjectType::ClickPointer, 10.0, 10.0, 100.0).unwrap();
        world.upsert(marker);

        let notices = world.apply_snapshot(&snapshot(&[WorldObject::wall("w", 0.0, 0.0)]));
        assert!(notices.is_empty());
        assert!(world.get("gfx-1").is_some());
    }

    #[test]
    fn test_snapshot_overrides_local_object_with_same_id() {
        let world = WorldState::new(dims());
        world.upsert(
            WorldObject::ephemeral("shared", ObjectType::PointPath, 0.0, 0.0, 100.0).unwrap(),
        );
        world.apply_snapshot(&snapshot(&[WorldObject::player("shared", 50.0, 50.0)]));

        let obj = world.get("shared").unwrap();
        assert_eq!(obj.object_type, ObjectType::Player);
        assert!(obj.is_persistent());
    }

    #[test]
    fn test_snapshot_skips_malformed_entries() {
        let world = WorldState::new(dims());
        let mut snap = snapshot(&[WorldObject::player("p", 0.0, 0.0)]);
        snap.insert("broken".into(), json!({"objId": "broken", "x": "left"}));
        snap.insert(
            "ghost-wall".into(),
            json!({"objId": "ghost-wall", "x": 0.0, "y": 0.0, "networkObjectType": "WALL",
                   "isObstacle": true, "isPersistent": false}),
        );
        snap.insert(
            "alien".into(),
            json!({"objId": "alien", "x": 0.0, "y": 0.0, "networkObjectType": "UFO", "isPersistent": true}),
        );

        world.apply_snapshot(&snap);
        assert_eq!(world.len(), 1);
        assert!(world.get("p").is_some());
    }

    #[test]
    fn test_cleanup_expired() {
        let world = WorldState::new(dims());
        let mut marker =
            WorldObject::ephemeral("m", ObjectType::PointPath, 16.0, 16.0, 50.0).unwrap();
        marker.layer_ids = vec!["dot".into(), "glow".into()];
        world.upsert(marker);
        world.upsert(WorldObject::wall("w", 0.0, 0.0));

        assert!(world.cleanup_expired(49.0).is_empty());
        assert!(world.get("m").is_some());

        let notices = world.cleanup_expired(50.0);
        assert_eq!(
            notices,
            vec![
                RemovalNotice {
                    obj_id: "m".into(),
                    layer_id: "dot".into()
                },
                RemovalNotice {
                    obj_id: "m".into(),
                    layer_id: "glow".into()
                },
            ]
        );
        assert!(world.get("m").is_none());
        assert!(world.cleanup_expired(51.0).is_empty());
        // The sweep also refreshes the maze from the remaining obstacles.
        assert_eq!(world.maze().blocked_count(), 4);
    }

    #[test]
    fn test_rebuild_maze_marks_obstacle_footprints() {
        let world = WorldState::new(dims());
        {
            let mut g = world.lock();
            g.upsert(WorldObject::wall("w1", 0.0, 0.0));
            g.upsert(WorldObject::wall("w2", 40.0, 0.0));
            g.upsert(WorldObject::player("p", 100.0, 100.0));
            g.rebuild_maze();
        }
        let maze = world.maze();
        assert_eq!(maze.blocked_count(), 4 + 6);
        assert!(!maze.is_walkable(Cell::new(0, 4)));
        assert!(maze.is_walkable(Cell::new(6, 6)));
    }

    #[test]
    fn test_integrate_completes_path_and_stamps_agent() {
        let world = WorldState::new(dims());
        let params = AgentParams {
            initial_pos: (0.0, 0.0),
            wander_radius: 64.0,
            path_cooldown: 2.0,
            last_path_time: 0.0,
        };
        let mut agent = WorldObject::agent("bot", 0.0, 0.0, params).with_speed(100.0);
        agent.set_path(vec![Waypoint::new(64.0, 0.0)]);
        world.upsert(agent);

        let motions = world.integrate(0.5, 10.0);
        assert_eq!(motions.len(), 1);
        assert!(!motions[0].path_completed);

        let motions = world.integrate(0.5, 11.0);
        assert!(motions[0].path_completed);

        let bot = world.get("bot").unwrap();
        assert_eq!(bot.position, (64.0, 0.0));
        assert!(bot.path().is_empty());
        assert_eq!(bot.agent.unwrap().last_path_time, 11.0);
        assert_eq!(world.lock().occupant(2, 0), Some("bot"));

        assert!(world.integrate(0.5, 12.0).is_empty());
    }

    #[test]
    fn test_modify_refiles_moved_object() {
        let world = WorldState::new(dims());
        world.upsert(WorldObject::player("p", 0.0, 0.0));
        let mut g = world.lock();
        let moved = g.modify("p", |o| {
            o.position = (200.0, 200.0);
            true
        });
        assert_eq!(moved, Some(true));
        assert_eq!(g.occupant(0, 0), None);
        assert_eq!(g.occupant(6, 6), Some("p"));
        assert_eq!(g.modify("missing", |_| ()), None);
    }

    #[test]
    fn test_persistent_dicts_exclude_ephemera() {
        let world = WorldState::new(dims());
        world.upsert(WorldObject::player("p", 0.0, 0.0));
        world.upsert(
            WorldObject::ephemeral("gfx", ObjectType::ClickPointer, 0.0, 0.0, 1.0).unwrap(),
        );
        let dicts = world.persistent_dicts();
        assert_eq!(dicts.keys().collect::<Vec<_>>(), vec!["p"]);
        assert_eq!(dicts["p"]["networkObjectType"], "PLAYER");
    }

    #[test]
    fn test_concurrent_batches_keep_grid_consistent() {
        use std::sync::Arc;
        use std::thread;

        let world = Arc::new(WorldState::new(dims()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let world = Arc::clone(&world);
                thread::spawn(move || {
                    for i in 0..50 {
                        let mut g = world.lock();
                        let id = format!("obj-{}-{}", t, i % 5);
                        g.upsert(WorldObject::player(id.clone(), (i * 7 % 300) as f32, (t * 60) as f32));
                        g.rebuild_maze();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let g = world.lock();
        assert_eq!(g.len(), 20);
        for id in g.grid_snapshot().into_iter().flatten() {
            assert!(g.contains(&id));
        }
    }
}
