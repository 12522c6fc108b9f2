use glam::Vec2;

/// One simulated sand particle
///
/// `delay` is fixed at creation and `active` only ever flips from false to true,
/// so both are private and changed only through [`Grain::activate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Grain {
    pub x: f32,             // Pixel-space position, not grid aligned
    pub y: f32,
    pub vy: f32,            // Vertical velocity in rows per tick
    pub color: [f32; 4],    // Normalized RGBA
    pub settled: bool,
    active: bool,
    delay: f32,             // Activation time in simulated ms
}

impl Grain {
    /// An active grain, falling from the given position
    pub fn new(x: f32, y: f32, color: [f32; 4]) -> Self {
        Self {
            x,
            y,
            vy: 0.0,
            color,
            settled: false,
            active: true,
            delay: 0.0,
        }
    }

    /// An inactive grain released once simulated time reaches `delay`
    pub fn pending(x: f32, y: f32, color: [f32; 4], delay: f32) -> Self {
        Self {
            x,
            y,
            vy: 0.0,
            color,
            settled: false,
            active: false,
            delay: delay.max(0.0),
        }
    }

    pub fn with_velocity(mut self, vy: f32) -> Self {
        self.vy = vy;
        self
    }

    /// Mark as already at rest, used when restoring a previous pile
    pub fn at_rest(mut self) -> Self {
        self.settled = true;
        self.vy = 0.0;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn delay(&self) -> f32 {
        self.delay
    }

    /// Activate if `elapsed_ms` has reached the delay. Returns true on the transition.
    pub fn activate(&mut self, elapsed_ms: f32) -> bool {
        if !self.active && elapsed_ms >= self.delay {
            self.active = true;
            return true;
        }
        false
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Drawn by the renderer this frame
    pub fn is_visible(&self) -> bool {
        self.active && self.y >= 0.0
    }

    pub fn is_falling(&self) -> bool {
        self.active && !self.settled
    }

    /// Grid cell containing this grain for the given cell size
    pub fn cell(&self, cell_size: f32) -> (i32, i32) {
        (
            (self.x / cell_size).floor() as i32,
            (self.y / cell_size).floor() as i32,
        )
    }
}

/// Grain statistics for metrics collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrainStats {
    pub total: usize,
    pub active: usize,
    pub settled: usize,
    pub falling: usize,
    pub visible: usize,
}

impl GrainStats {
    pub fn collect(grains: &[Grain]) -> Self {
        grains.iter().fold(Self::default(), |mut stats, grain| {
            stats.total += 1;
            if grain.is_active() {
                stats.active += 1;
                if grain.settled {
                    stats.settled += 1;
                } else {
                    stats.falling += 1;
                }
            }
            if grain.is_visible() {
                stats.visible += 1;
            }
            stats
        })
    }

    /// Everything released has come to rest
    pub fn is_at_rest(&self) -> bool {
        self.active == self.total && self.falling == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_grain_activates_once_delay_is_reached() {
        let mut grain = Grain::pending(0.0, -4.0, [1.0; 4], 100.0);
        assert!(!grain.activate(99.9));
        assert!(!grain.is_active());
        assert!(grain.activate(100.0));
        assert!(grain.is_active());
        // monotonic, no second transition
        assert!(!grain.activate(0.0));
        assert!(grain.is_active());
    }

    #[test]
    fn cell_floors_negative_positions() {
        let grain = Grain::new(3.9, -0.5, [1.0; 4]);
        assert_eq!(grain.cell(2.0), (1, -1));
    }

    #[test]
    fn stats_split_active_grains() {
        let grains = vec![
            Grain::new(0.0, 0.0, [1.0; 4]).at_rest(),
            Grain::new(2.0, 0.0, [1.0; 4]),
            Grain::pending(4.0, -2.0, [1.0; 4], 50.0),
        ];
        let stats = GrainStats::collect(&grains);
        assert_eq!(
            stats,
            GrainStats {
                total: 3,
                active: 2,
                settled: 1,
                falling: 1,
                visible: 2,
            }
        );
        assert!(!stats.is_at_rest());
    }
}
