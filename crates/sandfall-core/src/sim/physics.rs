use std::ops::RangeInclusive;

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sandfall_params::{CanvasSize, PointerState, SettingsPatch, SimulationSettings};

use crate::error::ConfigError;
use crate::sim::grain::{Grain, GrainStats};
use crate::sim::grid::{GrainId, OccupancyGrid};

/// vy given to grains knocked loose by the pointer or lifted above the canvas
const DISPLACED_VY: f32 = 0.5;
/// vy for a grain dropping into the gap straight below it
const GAP_BELOW_VY: f32 = 0.3;
/// vy for a grain sliding into a diagonal gap
const GAP_DIAGONAL_VY: f32 = 0.2;

/// Rounds .5 toward positive infinity, so a bare lift of -0.5 rows is no lift
fn round_half_up(v: f32) -> i32 {
    (v + 0.5).floor() as i32
}

/// Grid-indexed falling-sand engine
///
/// Owns the grain list and the occupancy grid for settled grains. All
/// randomness (diagonal tie-breaks, pocket choice, gap filling) comes from the
/// injected `rng`.
pub struct SandPhysics<R = ChaCha8Rng> {
    grains: Vec<Grain>,
    grid: OccupancyGrid,
    settings: SimulationSettings,
    canvas: CanvasSize,
    elapsed_ms: f32,
    rng: R,
}

impl SandPhysics<ChaCha8Rng> {
    pub fn new(settings: SimulationSettings) -> Result<Self, ConfigError> {
        Self::with_rng(settings, ChaCha8Rng::from_entropy())
    }

    /// Reproducible engine for a given seed
    pub fn seeded(settings: SimulationSettings, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(settings, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> SandPhysics<R> {
    pub fn with_rng(settings: SimulationSettings, rng: R) -> Result<Self, ConfigError> {
        ConfigError::check_settings(&settings)?;
        Ok(Self {
            grains: Vec::new(),
            grid: OccupancyGrid::default(),
            settings,
            canvas: CanvasSize::new(0, 0),
            elapsed_ms: 0.0,
            rng,
        })
    }

    /// Replace the grain list, size the grid for the canvas and rebuild occupancy
    pub fn initialize(
        &mut self,
        grains: Vec<Grain>,
        width: u32,
        height: u32,
    ) -> Result<(), ConfigError> {
        let canvas = ConfigError::check_canvas(CanvasSize::new(width, height))?;
        let (cols, rows) = self.grid_dimensions(canvas);

        self.grains = grains;
        self.canvas = canvas;
        self.grid.resize(cols, rows);
        self.rebuild_grid();
        self.elapsed_ms = 0.0;

        log::info!(
            "Physics initialized: {} grains on {}x{} cells ({}x{} px)",
            self.grains.len(),
            cols,
            rows,
            width,
            height
        );
        Ok(())
    }

    /// Restructure the grid for a new canvas size, keeping grain positions
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), ConfigError> {
        let canvas = ConfigError::check_canvas(CanvasSize::new(width, height))?;
        let (cols, rows) = self.grid_dimensions(canvas);
        self.canvas = canvas;

        if cols == self.grid.cols() && rows == self.grid.rows() {
            return Ok(());
        }

        log::debug!(
            "Resizing grid {}x{} -> {}x{}",
            self.grid.cols(),
            self.grid.rows(),
            cols,
            rows
        );
        self.grid.resize(cols, rows);
        self.rebuild_grid();
        Ok(())
    }

    /// Merge a partial settings update. A new cell size re-grids the current canvas.
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<(), ConfigError> {
        let merged = self.settings.merged(patch);
        ConfigError::check_settings(&merged)?;

        let regrid = merged.cell_size != self.settings.cell_size;
        self.settings = merged;

        if regrid && !self.canvas.is_empty() {
            let (cols, rows) = self.grid_dimensions(self.canvas);
            self.grid.resize(cols, rows);
            self.rebuild_grid();
        }
        Ok(())
    }

    /// Append grains without touching existing ones, stopping at `max_total`.
    /// Returns how many were added.
    pub fn spawn(&mut self, grains: impl IntoIterator<Item = Grain>, max_total: usize) -> usize {
        let mut added = 0;
        for grain in grains {
            if self.grains.len() >= max_total {
                log::warn!("Grain cap of {} reached, dropping spawned grains", max_total);
                break;
            }
            let at_rest = grain.is_active() && grain.settled;
            self.grains.push(grain);
            if at_rest {
                self.settle(self.grains.len() - 1);
            }
            added += 1;
        }
        added
    }

    /// One fixed tick of `settings.tick_ms`
    pub fn update(&mut self, pointer: &PointerState) {
        let dt = self.settings.tick_ms;
        self.advance(pointer, dt);
    }

    /// One tick, then advance the simulation clock by `dt_ms`
    pub fn advance(&mut self, pointer: &PointerState, dt_ms: f32) {
        if self.grid.cols() == 0 || self.grid.rows() == 0 {
            return;
        }

        let elapsed = self.elapsed_ms;
        let threshold = self.settings.pointer_activation_speed;
        if pointer.is_down || pointer.vel_x.abs() > threshold || pointer.vel_y.abs() > threshold {
            self.apply_pointer(pointer);
        }

        let cell = self.settings.cell_size;
        let gravity = self.settings.gravity;
        let terminal = self.settings.terminal_velocity;
        let max_x = (self.grid.cols() - 1) as f32 * cell;
        let max_y = (self.grid.rows() - 1) as f32 * cell;

        // Two passes so fast grains still check every row boundary they cross
        for pass in 0..2 {
            for i in 0..self.grains.len() {
                let grain = &mut self.grains[i];
                if grain.activate(elapsed) && grain.settled {
                    self.settle(i);
                    continue;
                }
                if !grain.is_falling() {
                    continue;
                }

                grain.x = grain.x.clamp(0.0, max_x);
                grain.y = grain.y.clamp(0.0, max_y);

                let rows_to_move = if pass == 0 {
                    grain.vy = (grain.vy + gravity).min(terminal);
                    (grain.vy.floor() as i32).max(1)
                } else {
                    1
                };
                self.move_grain(i, rows_to_move);
            }
        }

        self.fill_gaps();
        self.elapsed_ms += dt_ms.max(0.0);
    }

    pub fn grains(&self) -> &[Grain] {
        &self.grains
    }

    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.elapsed_ms
    }

    pub fn stats(&self) -> GrainStats {
        GrainStats::collect(&self.grains)
    }

    fn grid_dimensions(&self, canvas: CanvasSize) -> (usize, usize) {
        let cell = self.settings.cell_size;
        (
            (canvas.width as f32 / cell).ceil() as usize,
            (canvas.height as f32 / cell).ceil() as usize,
        )
    }

    /// Rebuild occupancy from scratch: place every settled grain, then resolve
    /// the ones whose cell was already taken.
    fn rebuild_grid(&mut self) {
        let cell = self.settings.cell_size;
        let cols = self.grid.cols() as i32;
        let rows = self.grid.rows() as i32;
        self.grid.clear();

        let mut collisions = Vec::new();
        for (i, grain) in self.grains.iter_mut().enumerate() {
            if !grain.is_active() || !grain.settled {
                continue;
            }

            let (col, row) = grain.cell(cell);
            if row < 0 && (0..cols).contains(&col) {
                // Pushed above the canvas: let it fall back in
                grain.settled = false;
                grain.vy = DISPLACED_VY;
                continue;
            }

            if !self.grid.in_bounds(col, row) {
                // Left behind by a shrinking canvas: pull it onto the edge cell
                let col = col.clamp(0, cols - 1);
                let row = row.clamp(0, rows - 1);
                grain.x = col as f32 * cell;
                grain.y = row as f32 * cell;
            }

            let (col, row) = grain.cell(cell);
            if !self.grid.try_place(col, row, GrainId::new(i)) {
                collisions.push(i);
            }
        }

        if !collisions.is_empty() {
            log::debug!("Resolving {} occupancy collisions", collisions.len());
        }
        for i in collisions {
            self.resolve_collision(i, None);
        }
    }

    /// Find a free cell for a settled grain whose own cell is taken
    ///
    /// With a `reach`, cells within that many columns are tried first so a
    /// grain settling mid-tick does not jump across the canvas; the full-width
    /// search is the fallback.
    fn resolve_collision(&mut self, i: usize, reach: Option<usize>) {
        let cell = self.settings.cell_size;
        let grain = &mut self.grains[i];
        let (col, row) = grain.cell(cell);

        let open = reach
            .and_then(|reach| self.grid.find_open_cell_within(col, row, reach))
            .or_else(|| self.grid.find_open_cell(col, row));
        match open {
            Some((c, r)) => {
                grain.x = c as f32 * cell;
                if r != row {
                    grain.y = r as f32 * cell;
                }
                self.grid.try_place(c, r, GrainId::new(i));
            }
            None => {
                // Grid is packed from here up; keep falling and retry each tick
                grain.settled = false;
                grain.vy = 0.0;
            }
        }
    }

    /// Stop the grain and register it in the occupancy grid
    fn settle(&mut self, i: usize) {
        let cell = self.settings.cell_size;
        let (col, row) = self.grains[i].cell(cell);
        let grain = &mut self.grains[i];
        grain.vy = 0.0;

        if self.grid.try_place(col, row, GrainId::new(i)) {
            grain.settled = true;
            return;
        }

        grain.settled = true;
        if self.grid.in_bounds(col, row) {
            let reach = self.settings.pocket_search_distance as usize;
            self.resolve_collision(i, Some(reach));
        } else {
            self.grains[i].settled = false;
        }
    }

    fn move_grain(&mut self, i: usize, rows_to_move: i32) {
        let cell = self.settings.cell_size;
        let max_col = self.grid.cols() as i32 - 1;
        let max_row = self.grid.rows() as i32 - 1;

        for _ in 0..rows_to_move {
            let (col, row) = self.grains[i].cell(cell);

            if !self.grid.in_bounds(col, row) {
                let grain = &mut self.grains[i];
                grain.x = grain.x.clamp(0.0, max_col as f32 * cell);
                continue;
            }

            if row >= max_row {
                self.grains[i].y = max_row as f32 * cell;
                self.settle(i);
                return;
            }

            let next = row + 1;
            if self.grid.is_empty(col, next) {
                self.grains[i].y = next as f32 * cell;
                if next >= max_row {
                    self.settle(i);
                    return;
                }
                continue;
            }

            let can_left = self.grid.is_empty(col - 1, next);
            let can_right = self.grid.is_empty(col + 1, next);
            if can_left || can_right {
                let new_col = match (can_left, can_right) {
                    (true, true) => {
                        if self.rng.gen_bool(0.5) {
                            col - 1
                        } else {
                            col + 1
                        }
                    }
                    (true, false) => col - 1,
                    _ => col + 1,
                };
                let grain = &mut self.grains[i];
                grain.x = new_col as f32 * cell;
                grain.y = next as f32 * cell;
            } else if let Some(pocket) = self.find_pocket(col, row) {
                self.grains[i].x = pocket as f32 * cell;
            } else {
                self.settle(i);
                return;
            }
        }
    }

    /// Nearest column within reach that is open two rows deep, so blocked
    /// grains spread sideways and pool instead of stacking into spires.
    fn find_pocket(&mut self, col: i32, row: i32) -> Option<i32> {
        let reach = self.settings.pocket_search_distance as i32;
        for dist in 1..=reach {
            let open = |c: i32| self.grid.is_empty(c, row) && self.grid.is_empty(c, row + 1);
            let left = open(col - dist);
            let right = open(col + dist);

            match (left, right) {
                (true, true) => {
                    return Some(if self.rng.gen_bool(0.5) { col - dist } else { col + dist });
                }
                (true, false) => return Some(col - dist),
                (false, true) => return Some(col + dist),
                _ => {}
            }
        }
        None
    }

    /// Release a sample of settled grains that have an open cell below them
    fn fill_gaps(&mut self) {
        let cell = self.settings.cell_size;
        let rows = self.grid.rows() as i32;
        let sample_rate = self.settings.gap_fill_sample_rate;
        let stickiness = self.settings.stickiness;
        let diagonal = self.settings.diagonal_refall_chance;

        for i in 0..self.grains.len() {
            let grain = &self.grains[i];
            if !grain.settled || !grain.is_active() {
                continue;
            }
            if self.rng.gen::<f32>() >= sample_rate {
                continue;
            }

            let (col, row) = grain.cell(cell);
            let below = row + 1;
            if !self.grid.in_bounds(col, row) || below >= rows {
                continue;
            }

            let gap_below = self.grid.is_empty(col, below);
            let gap_left = self.grid.is_empty(col - 1, below);
            let gap_right = self.grid.is_empty(col + 1, below);
            if !(gap_below || gap_left || gap_right) {
                continue;
            }

            let flanked =
                self.grid.get(col - 1, row).is_some() && self.grid.get(col + 1, row).is_some();
            let hold = if flanked { stickiness } else { 0.0 };

            let should_move = (gap_below && self.rng.gen::<f32>() >= hold)
                || (gap_left && self.rng.gen::<f32>() < diagonal)
                || (gap_right && self.rng.gen::<f32>() < diagonal);

            if should_move {
                self.grid.release(col, row, GrainId::new(i));
                let grain = &mut self.grains[i];
                grain.settled = false;
                grain.vy = if gap_below { GAP_BELOW_VY } else { GAP_DIAGONAL_VY };
            }
        }
    }

    /// Grid columns and rows within the pointer's radius, clamped to the grid
    fn pointer_scan_bounds(
        &self,
        pointer: &PointerState,
    ) -> (RangeInclusive<i32>, RangeInclusive<i32>) {
        let cell = self.settings.cell_size;
        let radius_cells = (self.settings.interaction_radius / cell).ceil() as i32;
        let col = (pointer.x / cell).floor() as i32;
        let row = (pointer.y / cell).floor() as i32;
        let max_col = self.grid.cols() as i32 - 1;
        let max_row = self.grid.rows() as i32 - 1;

        (
            (col - radius_cells).max(0)..=(col + radius_cells).min(max_col),
            (row - radius_cells).max(0)..=(row + radius_cells).min(max_row),
        )
    }

    /// Shove settled grains near the pointer sideways off its path
    ///
    /// Only the grid cells inside the pointer's bounding square are visited.
    fn apply_pointer(&mut self, pointer: &PointerState) {
        let speed = pointer.speed();
        if speed < self.settings.min_push_speed {
            return;
        }

        let cell = self.settings.cell_size;
        let radius = self.settings.interaction_radius;
        let strength_scale = self.settings.interaction_strength * self.settings.push_scale;
        let lift = self.settings.push_lift;

        let dir = Vec2::new(pointer.vel_x, pointer.vel_y) / speed;
        let center = Vec2::new(pointer.x, pointer.y);

        let max_col = self.grid.cols() as i32 - 1;
        let max_row = self.grid.rows() as i32 - 1;
        let (cols, rows) = self.pointer_scan_bounds(pointer);

        for col in cols {
            for row in rows.clone() {
                let Some(id) = self.grid.get(col, row) else {
                    continue;
                };
                let grain = &self.grains[id.index()];
                if !grain.settled || !grain.is_active() {
                    continue;
                }

                let offset = grain.position() + Vec2::splat(cell * 0.5) - center;
                let dist = offset.length();
                if dist >= radius {
                    continue;
                }

                // Which side of the travel line the grain is on
                let cross = offset.x * dir.y - offset.y * dir.x;
                let side = if cross < 0.0 { -1.0 } else { 1.0 };
                let strength = (1.0 - dist / radius) * strength_scale;

                let push_x = round_half_up(-dir.y * side * strength);
                let push_y = round_half_up(dir.x * side * strength - lift);

                let new_col = (col + push_x).clamp(0, max_col);
                let new_row = (row + push_y).clamp(0, max_row);
                if new_col == col && new_row == row {
                    continue;
                }

                self.grid.release(col, row, id);
                let grain = &mut self.grains[id.index()];
                grain.settled = false;
                grain.vy = DISPLACED_VY;
                grain.x = new_col as f32 * cell;
                grain.y = new_row as f32 * cell;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    fn idle() -> PointerState {
        PointerState::default()
    }

    fn engine() -> SandPhysics {
        SandPhysics::seeded(SimulationSettings::default(), 42).unwrap()
    }

    fn unit_engine() -> SandPhysics {
        let settings = SimulationSettings {
            cell_size: 1.0,
            ..Default::default()
        };
        SandPhysics::seeded(settings, 7).unwrap()
    }

    fn settled_cells(physics: &SandPhysics) -> Vec<(i32, i32)> {
        let cell = physics.settings().cell_size;
        physics
            .grains()
            .iter()
            .filter(|g| g.is_active() && g.settled)
            .map(|g| g.cell(cell))
            .collect()
    }

    fn assert_unique_occupancy(physics: &SandPhysics) {
        let cells = settled_cells(physics);
        let unique: HashSet<_> = cells.iter().copied().collect();
        assert_eq!(unique.len(), cells.len(), "two settled grains share a cell");
        assert_eq!(physics.grid().occupied_count(), cells.len());
    }

    #[test]
    fn rejects_degenerate_configuration() {
        let settings = SimulationSettings {
            cell_size: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            SandPhysics::seeded(settings, 1),
            Err(ConfigError::CellSize { .. })
        ));

        let mut physics = engine();
        assert!(physics.initialize(Vec::new(), 0, 600).is_err());
        assert!(physics.resize(800, 0).is_err());
    }

    #[test]
    fn initializes_with_grains() {
        let mut physics = engine();
        physics.initialize(vec![Grain::new(100.0, 0.0, RED)], 800, 600).unwrap();
        assert_eq!(physics.grains().len(), 1);
        assert_eq!(physics.grid().cols(), 400);
        assert_eq!(physics.grid().rows(), 300);
    }

    #[test]
    fn applies_gravity_to_active_grains() {
        let mut physics = engine();
        physics.initialize(vec![Grain::new(100.0, 10.0, RED)], 800, 600).unwrap();
        physics.update(&idle());
        assert!(physics.grains()[0].y > 10.0);
    }

    #[test]
    fn stronger_gravity_falls_faster() {
        let mut slow = engine();
        let mut fast = engine();
        fast.update_settings(&SettingsPatch {
            gravity: Some(3.0),
            ..Default::default()
        })
        .unwrap();

        for physics in [&mut slow, &mut fast] {
            physics.initialize(vec![Grain::new(100.0, 10.0, RED)], 800, 600).unwrap();
            physics.update(&idle());
        }
        assert!(fast.grains()[0].y > slow.grains()[0].y);
    }

    #[test]
    fn settles_grains_at_bottom_of_canvas() {
        let mut physics = engine();
        let max_row = 300 - 1;
        let bottom = max_row as f32 * 2.0;
        let grain = Grain::new(100.0, bottom - 2.0, RED).with_velocity(5.0);
        physics.initialize(vec![grain], 800, 600).unwrap();

        for _ in 0..10 {
            physics.update(&idle());
        }

        let grain = &physics.grains()[0];
        assert!(grain.settled);
        assert_eq!(grain.y, bottom);
        assert_eq!(grain.vy, 0.0);
    }

    #[test]
    fn single_grain_on_small_grid_reaches_bottom_row() {
        let mut physics = unit_engine();
        physics.initialize(vec![Grain::new(5.0, 0.0, RED)], 10, 10).unwrap();

        // bounded by the row count
        for _ in 0..10 {
            physics.update(&idle());
        }

        let grain = &physics.grains()[0];
        assert!(grain.settled);
        assert_eq!(grain.y, 9.0);
        assert_eq!(grain.x, 5.0);
        assert_eq!(physics.grid().get(5, 9), Some(GrainId::new(0)));
    }

    #[test]
    fn grain_stays_inactive_until_delay() {
        let settings = SimulationSettings {
            cell_size: 1.0,
            tick_ms: 10.0,
            ..Default::default()
        };
        let mut physics = SandPhysics::seeded(settings, 3).unwrap();
        let delay = 30.0;
        physics
            .initialize(vec![Grain::pending(5.0, -2.0, RED, delay)], 10, 10)
            .unwrap();

        for _ in 0..3 {
            assert!(physics.elapsed_ms() < delay);
            physics.update(&idle());
            assert!(!physics.grains()[0].is_active());
            assert_eq!(physics.grains()[0].y, -2.0);
        }

        assert!(physics.elapsed_ms() >= delay);
        physics.update(&idle());
        assert!(physics.grains()[0].is_active());
        assert_eq!(physics.grains()[0].delay(), delay);
    }

    #[test]
    fn zero_delay_activates_on_first_update() {
        let mut physics = engine();
        physics
            .initialize(vec![Grain::pending(100.0, -4.0, RED, 0.0)], 800, 600)
            .unwrap();
        physics.update(&idle());
        assert!(physics.grains()[0].is_active());
    }

    #[test]
    fn rebuild_collision_moves_second_grain_sideways() {
        let mut physics = unit_engine();
        let grains = vec![
            Grain::new(2.0, 9.0, RED).at_rest(),
            Grain::new(2.4, 9.0, RED).at_rest(),
        ];
        physics.initialize(grains, 5, 10).unwrap();

        assert_eq!(physics.grid().get(2, 9), Some(GrainId::new(0)));
        assert_eq!(physics.grid().get(1, 9), Some(GrainId::new(1)));
        assert_eq!(physics.grains()[1].x, 1.0);
        assert_unique_occupancy(&physics);
    }

    #[test]
    fn rebuild_collision_climbs_when_row_is_full() {
        let mut physics = unit_engine();
        let mut grains: Vec<Grain> = (0..3)
            .map(|c| Grain::new(c as f32, 2.0, RED).at_rest())
            .collect();
        grains.push(Grain::new(1.0, 2.0, RED).at_rest());
        physics.initialize(grains, 3, 3).unwrap();

        let extra = &physics.grains()[3];
        assert_eq!((extra.x, extra.y), (1.0, 1.0));
        assert!(extra.settled);
        assert_unique_occupancy(&physics);
    }

    #[test]
    fn grains_above_canvas_fall_back_in_on_rebuild() {
        let mut physics = unit_engine();
        physics
            .initialize(vec![Grain::new(3.0, -3.0, RED).at_rest()], 10, 10)
            .unwrap();
        let grain = &physics.grains()[0];
        assert!(!grain.settled);
        assert_eq!(grain.vy, DISPLACED_VY);
        assert_eq!(physics.grid().occupied_count(), 0);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let grains: Vec<Grain> = (0..20)
            .map(|i| Grain::new((i % 4) as f32, 9.0 - (i / 10) as f32, RED).at_rest())
            .collect();

        let mut first = unit_engine();
        first.initialize(grains.clone(), 10, 10).unwrap();
        let mut second = unit_engine();
        second.initialize(grains, 10, 10).unwrap();

        let cells_a: Vec<_> = first.grid().occupied().map(|(c, r, _)| (c, r)).collect();
        let cells_b: Vec<_> = second.grid().occupied().map(|(c, r, _)| (c, r)).collect();
        assert_eq!(cells_a, cells_b);

        // feeding the resolved grains back changes nothing
        let resolved = first.grains().to_vec();
        first.initialize(resolved, 10, 10).unwrap();
        let cells_c: Vec<_> = first.grid().occupied().map(|(c, r, _)| (c, r)).collect();
        assert_eq!(cells_a, cells_c);
    }

    #[test]
    fn pile_keeps_unique_occupancy_and_conserves_grains() {
        let mut physics = SandPhysics::seeded(
            SimulationSettings {
                cell_size: 1.0,
                ..Default::default()
            },
            99,
        )
        .unwrap();
        let grains: Vec<Grain> = (0..200)
            .map(|i| Grain::pending(10.0 + (i % 5) as f32, -2.0, RED, (i / 5) as f32 * 5.0))
            .collect();
        physics.initialize(grains, 30, 30).unwrap();

        for _ in 0..400 {
            physics.update(&idle());
            assert_eq!(physics.grains().len(), 200);
            assert_unique_occupancy(&physics);
        }
        assert!(physics.stats().settled > 150);
    }

    #[test]
    fn blocked_grain_spreads_instead_of_stacking() {
        let mut physics = unit_engine();
        // full floor with one grain on top at column 5
        let mut grains: Vec<Grain> = (0..10)
            .map(|c| Grain::new(c as f32, 9.0, RED).at_rest())
            .collect();
        grains.push(Grain::new(5.0, 8.0, RED).at_rest());
        grains.push(Grain::new(5.0, 0.0, RED));
        physics.initialize(grains, 10, 10).unwrap();
        physics.update_settings(&SettingsPatch {
            gap_fill_sample_rate: Some(0.0),
            ..Default::default()
        })
        .unwrap();

        for _ in 0..20 {
            physics.update(&idle());
        }
        let dropped = &physics.grains()[11];
        assert!(dropped.settled);
        assert_eq!(dropped.y, 8.0);
        assert_ne!(dropped.x, 5.0);
    }

    #[test]
    fn gap_filling_releases_grain_over_hole() {
        let mut physics = unit_engine();
        // a lone grain resting mid-air
        physics
            .initialize(vec![Grain::new(4.0, 3.0, RED).at_rest()], 10, 10)
            .unwrap();
        physics
            .update_settings(&SettingsPatch {
                gap_fill_sample_rate: Some(1.0),
                ..Default::default()
            })
            .unwrap();

        physics.update(&idle());
        assert!(!physics.grains()[0].settled || physics.grains()[0].y > 3.0);

        for _ in 0..20 {
            physics.update(&idle());
        }
        assert_eq!(physics.grains()[0].y, 9.0);
        assert!(physics.grains()[0].settled);
    }

    #[test]
    fn full_stickiness_holds_flanked_grain() {
        let mut physics = unit_engine();
        // middle grain first so both flanks are still in place when it is sampled
        let grains = vec![
            Grain::new(4.0, 3.0, RED).at_rest(),
            Grain::new(3.0, 3.0, RED).at_rest(),
            Grain::new(5.0, 3.0, RED).at_rest(),
        ];
        physics.initialize(grains, 10, 10).unwrap();
        physics
            .update_settings(&SettingsPatch {
                gap_fill_sample_rate: Some(1.0),
                stickiness: Some(1.0),
                diagonal_refall_chance: Some(0.0),
                ..Default::default()
            })
            .unwrap();

        physics.fill_gaps();
        assert!(physics.grains()[0].settled);
        assert!(!physics.grains()[1].settled);
        assert!(!physics.grains()[2].settled);
    }

    #[test]
    fn pointer_sweep_displaces_nearby_grains_only() {
        let mut physics = unit_engine();
        let mut grains: Vec<Grain> = (0..40)
            .map(|c| Grain::new(c as f32, 29.0, RED).at_rest())
            .collect();
        grains.push(Grain::new(0.0, 28.0, RED).at_rest());
        physics.initialize(grains, 40, 30).unwrap();
        physics
            .update_settings(&SettingsPatch {
                interaction_radius: Some(6.0),
                interaction_strength: Some(6.0),
                gap_fill_sample_rate: Some(0.0),
                ..Default::default()
            })
            .unwrap();

        // sweeping right along the floor at x = 20
        let pointer = PointerState {
            x: 20.0,
            y: 29.0,
            vel_x: 4.0,
            vel_y: 0.0,
            is_down: true,
        };
        physics.apply_pointer(&pointer);

        let moved = physics
            .grains()
            .iter()
            .filter(|g| !g.settled)
            .count();
        assert!(moved > 0);
        // far-away grain at column 0 untouched
        assert!(physics.grains()[40].settled);
        assert!(physics.grains()[0].settled);
        assert_unique_occupancy(&physics);
    }

    #[test]
    fn slow_pointer_does_nothing() {
        let mut physics = unit_engine();
        physics
            .initialize(vec![Grain::new(5.0, 9.0, RED).at_rest()], 10, 10)
            .unwrap();
        let pointer = PointerState {
            x: 5.0,
            y: 9.0,
            vel_x: 0.1,
            vel_y: 0.0,
            is_down: true,
        };
        physics.apply_pointer(&pointer);
        assert!(physics.grains()[0].settled);
    }

    fn sweep_engine(push_lift: f32) -> SandPhysics {
        let settings = SimulationSettings {
            cell_size: 1.0,
            interaction_radius: 10.0,
            interaction_strength: 8.0,
            push_scale: 0.5,
            push_lift,
            gap_fill_sample_rate: 0.0,
            ..Default::default()
        };
        SandPhysics::seeded(settings, 11).unwrap()
    }

    fn rightward_sweep() -> PointerState {
        PointerState {
            x: 20.0,
            y: 15.0,
            vel_x: 4.0,
            vel_y: 0.0,
            is_down: true,
        }
    }

    #[test]
    fn pointer_pushes_grains_away_from_its_path() {
        let mut physics = sweep_engine(0.5);
        let grains = vec![
            Grain::new(20.0, 17.0, RED).at_rest(),
            Grain::new(20.0, 12.0, RED).at_rest(),
            Grain::new(29.0, 14.0, RED).at_rest(),
        ];
        physics.initialize(grains, 40, 30).unwrap();
        physics.apply_pointer(&rightward_sweep());

        // lift takes a row off the downward push
        let below = &physics.grains()[0];
        assert!(!below.settled);
        assert_eq!((below.x, below.y), (20.0, 14.0));
        assert_eq!(below.vy, DISPLACED_VY);

        let above = &physics.grains()[1];
        assert!(!above.settled);
        assert_eq!((above.x, above.y), (20.0, 14.0));

        // near the rim the falloff leaves nothing to push
        let rim = &physics.grains()[2];
        assert!(rim.settled);
        assert_eq!((rim.x, rim.y), (29.0, 14.0));
        assert_eq!(physics.grid().get(29, 14), Some(GrainId::new(2)));
    }

    #[test]
    fn pointer_push_without_lift_is_symmetric() {
        let mut physics = sweep_engine(0.0);
        let grains = vec![
            Grain::new(20.0, 17.0, RED).at_rest(),
            Grain::new(20.0, 12.0, RED).at_rest(),
        ];
        physics.initialize(grains, 40, 30).unwrap();
        physics.apply_pointer(&rightward_sweep());

        assert_eq!(physics.grains()[0].y, 14.0);
        assert_eq!(physics.grains()[1].y, 15.0);
    }

    #[test]
    fn pointer_scan_stays_inside_radius_and_grid() {
        let mut physics = sweep_engine(0.5);
        physics.initialize(Vec::new(), 40, 30).unwrap();

        let (cols, rows) = physics.pointer_scan_bounds(&rightward_sweep());
        assert_eq!((cols, rows), (10..=30, 5..=25));

        let corner = PointerState {
            x: 0.0,
            y: 0.0,
            ..rightward_sweep()
        };
        assert_eq!(physics.pointer_scan_bounds(&corner), (0..=10, 0..=10));

        let far_corner = PointerState {
            x: 39.5,
            y: 29.5,
            ..rightward_sweep()
        };
        assert_eq!(physics.pointer_scan_bounds(&far_corner), (29..=39, 19..=29));
    }

    #[test]
    fn diagonal_gap_releases_grain_with_slide_velocity() {
        let layout = || {
            vec![
                Grain::new(4.0, 8.0, RED).at_rest(),
                Grain::new(4.0, 9.0, RED).at_rest(),
                Grain::new(3.0, 8.0, RED).at_rest(),
                Grain::new(5.0, 8.0, RED).at_rest(),
            ]
        };
        let patch = |diagonal| SettingsPatch {
            gap_fill_sample_rate: Some(1.0),
            stickiness: Some(1.0),
            diagonal_refall_chance: Some(diagonal),
            ..Default::default()
        };

        let mut sliding = unit_engine();
        sliding.initialize(layout(), 10, 10).unwrap();
        sliding.update_settings(&patch(1.0)).unwrap();
        sliding.fill_gaps();
        let grain = &sliding.grains()[0];
        assert!(!grain.settled);
        assert_eq!(grain.vy, GAP_DIAGONAL_VY);
        assert_eq!(sliding.grid().get(4, 8), None);

        let mut held = unit_engine();
        held.initialize(layout(), 10, 10).unwrap();
        held.update_settings(&patch(0.0)).unwrap();
        held.fill_gaps();
        assert!(held.grains()[0].settled);
        assert_eq!(held.grid().get(4, 8), Some(GrainId::new(0)));
    }

    #[test]
    fn settling_grain_climbs_rather_than_crossing_the_canvas() {
        // floor full except the far right column
        let floor = || -> Vec<Grain> {
            (0..39).map(|c| Grain::new(c as f32, 9.0, RED).at_rest()).collect()
        };

        let mut physics = unit_engine();
        physics.initialize(floor(), 40, 10).unwrap();
        physics.spawn([Grain::new(0.0, 9.0, RED).at_rest()], 100);
        let landed = &physics.grains()[39];
        assert!(landed.settled);
        assert_eq!((landed.x, landed.y), (0.0, 8.0));
        assert_eq!(physics.grid().get(0, 8), Some(GrainId::new(39)));
        assert_unique_occupancy(&physics);

        // a rebuild still takes the far open cell
        let mut grains = floor();
        grains.push(Grain::new(0.0, 9.0, RED).at_rest());
        let mut rebuilt = unit_engine();
        rebuilt.initialize(grains, 40, 10).unwrap();
        let moved = &rebuilt.grains()[39];
        assert_eq!((moved.x, moved.y), (39.0, 9.0));
        assert_unique_occupancy(&rebuilt);
    }

    #[test]
    fn resize_rebuilds_without_dropping_grains() {
        let mut physics = unit_engine();
        let grains: Vec<Grain> = (0..10)
            .map(|c| Grain::new(c as f32, 9.0, RED).at_rest())
            .collect();
        physics.initialize(grains, 10, 10).unwrap();

        physics.resize(5, 10).unwrap();
        assert_eq!(physics.grid().cols(), 5);
        assert_eq!(physics.grains().len(), 10);
        assert_unique_occupancy(&physics);
        // five on the floor, the rest stacked above
        assert_eq!(physics.grid().occupied_count(), 10);

        physics.resize(20, 12).unwrap();
        assert_eq!(physics.grid().rows(), 12);
        assert_unique_occupancy(&physics);
    }

    #[test]
    fn changing_cell_size_regrids() {
        let mut physics = unit_engine();
        physics
            .initialize(vec![Grain::new(4.0, 9.0, RED).at_rest()], 10, 10)
            .unwrap();
        physics
            .update_settings(&SettingsPatch {
                cell_size: Some(2.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(physics.grid().cols(), 5);
        assert_eq!(physics.grid().get(2, 4), Some(GrainId::new(0)));
    }

    #[test]
    fn invalid_settings_patch_is_rejected_and_ignored() {
        let mut physics = engine();
        let err = physics.update_settings(&SettingsPatch {
            cell_size: Some(0.0),
            ..Default::default()
        });
        assert!(err.is_err());
        assert_eq!(physics.settings().cell_size, 2.0);
    }

    #[test]
    fn spawn_respects_cap() {
        let mut physics = unit_engine();
        physics.initialize(Vec::new(), 10, 10).unwrap();
        let added = physics.spawn((0..5).map(|c| Grain::new(c as f32, 0.0, RED)), 3);
        assert_eq!(added, 3);
        assert_eq!(physics.grains().len(), 3);
    }

    #[test]
    fn update_before_initialize_is_a_no_op() {
        let mut physics = engine();
        physics.update(&idle());
        assert_eq!(physics.elapsed_ms(), 0.0);
    }
}
