//! Shared parameter types for the sandfall grain simulation
//!
//! This crate holds every configuration record read by the physics engine, the
//! converter and the renderer so the interactive viewer and the headless runner
//! load exactly the same settings.

use bytemuck::{Pod, Zeroable};

/// Smallest accepted cell size in pixels. Anything below this yields degenerate grids.
pub const MIN_CELL_SIZE: f32 = 0.5;

/// Default canvas dimensions used when no config file is supplied
pub const DEFAULT_CANVAS_WIDTH: u32 = 800;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 550;

/// Pointer coordinates used while the pointer is outside the canvas
pub const OFFSCREEN: f32 = -1000.0;

/// Canvas dimensions in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT)
    }
}

/// Physics and rendering parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimulationSettings {
    pub cell_size: f32,             // Side of one grid cell / rendered grain, in pixels
    pub gravity: f32,               // Added to vy once per tick
    pub terminal_velocity: f32,     // Upper bound for vy
    pub interaction_radius: f32,    // Pointer influence radius in pixels
    pub interaction_strength: f32,  // Overall pointer push strength
    pub tick_ms: f32,               // Simulated time per fixed tick

    // Tuned constants, exposed so they can be adjusted without code changes
    pub stickiness: f32,             // Chance a grain flanked on both sides resists re-falling
    pub diagonal_refall_chance: f32, // Chance a grain slides into a diagonal gap
    pub gap_fill_sample_rate: f32,   // Fraction of settled grains checked per tick
    pub push_scale: f32,             // Multiplier on the pointer falloff
    pub push_lift: f32,              // Upward bias in rows added to every push
    pub pointer_activation_speed: f32, // Per-axis speed that enables interaction without a press
    pub min_push_speed: f32,         // Pointer speed below which no push direction exists
    pub pocket_search_distance: u32, // Lateral cells searched for an open pocket
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            cell_size: 2.0,
            gravity: 0.3,
            terminal_velocity: 8.0,
            interaction_radius: 40.0,
            interaction_strength: 2.5,
            tick_ms: 1000.0 / 60.0,
            stickiness: 0.3,
            diagonal_refall_chance: 0.4,
            gap_fill_sample_rate: 0.5,
            push_scale: 0.5,
            push_lift: 0.5,
            pointer_activation_speed: 0.5,
            min_push_speed: 0.3,
            pocket_search_distance: 5,
        }
    }
}

impl SimulationSettings {
    /// Merge a partial update into these settings
    pub fn apply(&mut self, patch: &SettingsPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field { self.$field = value; })*
            };
        }
        merge!(
            cell_size,
            gravity,
            terminal_velocity,
            interaction_radius,
            interaction_strength,
            tick_ms,
            stickiness,
            diagonal_refall_chance,
            gap_fill_sample_rate,
            push_scale,
            push_lift,
            pointer_activation_speed,
            min_push_speed,
            pocket_search_distance,
        );
    }

    /// Return a copy with `patch` applied
    pub fn merged(&self, patch: &SettingsPatch) -> Self {
        let mut settings = self.clone();
        settings.apply(patch);
        settings
    }

    /// Check every value except the cell size, which callers validate separately
    /// so they can report it with its own error.
    pub fn validate(&self) -> Result<(), String> {
        let finite = [
            ("gravity", self.gravity),
            ("terminal_velocity", self.terminal_velocity),
            ("interaction_radius", self.interaction_radius),
            ("interaction_strength", self.interaction_strength),
            ("tick_ms", self.tick_ms),
            ("push_scale", self.push_scale),
            ("push_lift", self.push_lift),
            ("pointer_activation_speed", self.pointer_activation_speed),
            ("min_push_speed", self.min_push_speed),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(format!("{} must be finite, got {}", name, value));
            }
        }

        if self.gravity < 0.0 {
            return Err(format!("gravity must be non-negative, got {}", self.gravity));
        }
        if self.terminal_velocity <= 0.0 {
            return Err(format!(
                "terminal_velocity must be positive, got {}",
                self.terminal_velocity
            ));
        }
        if self.interaction_radius <= 0.0 {
            return Err(format!(
                "interaction_radius must be positive, got {}",
                self.interaction_radius
            ));
        }
        if self.tick_ms <= 0.0 {
            return Err(format!("tick_ms must be positive, got {}", self.tick_ms));
        }

        let probabilities = [
            ("stickiness", self.stickiness),
            ("diagonal_refall_chance", self.diagonal_refall_chance),
            ("gap_fill_sample_rate", self.gap_fill_sample_rate),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within 0..=1, got {}", name, value));
            }
        }

        Ok(())
    }
}

/// Partial settings update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SettingsPatch {
    pub cell_size: Option<f32>,
    pub gravity: Option<f32>,
    pub terminal_velocity: Option<f32>,
    pub interaction_radius: Option<f32>,
    pub interaction_strength: Option<f32>,
    pub tick_ms: Option<f32>,
    pub stickiness: Option<f32>,
    pub diagonal_refall_chance: Option<f32>,
    pub gap_fill_sample_rate: Option<f32>,
    pub push_scale: Option<f32>,
    pub push_lift: Option<f32>,
    pub pointer_activation_speed: Option<f32>,
    pub min_push_speed: Option<f32>,
    pub pocket_search_distance: Option<u32>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine two patches, later values win
    pub fn merge(&mut self, later: &SettingsPatch) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if later.$field.is_some() { self.$field = later.$field; })*
            };
        }
        take!(
            cell_size,
            gravity,
            terminal_velocity,
            interaction_radius,
            interaction_strength,
            tick_ms,
            stickiness,
            diagonal_refall_chance,
            gap_fill_sample_rate,
            push_scale,
            push_lift,
            pointer_activation_speed,
            min_push_speed,
            pocket_search_distance,
        );
    }
}

/// Order in which image rows are released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RevealMode {
    /// Bottom rows fall first, the image builds up from the ground
    Build,
    /// Top rows fall first
    #[default]
    Reveal,
}

impl std::str::FromStr for RevealMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "build" => Ok(Self::Build),
            "reveal" => Ok(Self::Reveal),
            other => Err(format!("unknown mode '{}', expected build or reveal", other)),
        }
    }
}

/// Image-to-grain conversion parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConversionSettings {
    pub cell_size: f32,
    pub wave_delay_ms: f32,
    pub mode: RevealMode,
}

impl ConversionSettings {
    /// Fine-grained bottom-up build
    pub fn build() -> Self {
        Self {
            cell_size: 1.0,
            wave_delay_ms: 100.0,
            mode: RevealMode::Build,
        }
    }

    /// Coarser top-down reveal, cheaper for large drawings
    pub fn reveal() -> Self {
        Self {
            cell_size: 2.0,
            wave_delay_ms: 80.0,
            mode: RevealMode::Reveal,
        }
    }

    pub fn for_mode(mode: RevealMode) -> Self {
        match mode {
            RevealMode::Build => Self::build(),
            RevealMode::Reveal => Self::reveal(),
        }
    }

    /// Check the wave timing; the cell size is validated by the caller
    pub fn validate(&self) -> Result<(), String> {
        if !self.wave_delay_ms.is_finite() || self.wave_delay_ms < 0.0 {
            return Err(format!(
                "wave_delay_ms must be finite and non-negative, got {}",
                self.wave_delay_ms
            ));
        }
        Ok(())
    }
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self::reveal()
    }
}

/// Pointer snapshot read once at the start of each tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerState {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub is_down: bool,
}

impl PointerState {
    pub fn speed(&self) -> f32 {
        (self.vel_x * self.vel_x + self.vel_y * self.vel_y).sqrt()
    }
}

impl Default for PointerState {
    fn default() -> Self {
        Self {
            x: OFFSCREEN,
            y: OFFSCREEN,
            vel_x: 0.0,
            vel_y: 0.0,
            is_down: false,
        }
    }
}

/// Draw-mode spawning limits
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DrawConfig {
    pub spawn_interval_ms: f32,
    pub brush_size: u32,
    pub max_grains: usize,
    pub color: [f32; 4],
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            spawn_interval_ms: 50.0,
            brush_size: 3,
            max_grains: 200_000,
            color: [1.0, 0.8, 0.4, 1.0],
        }
    }
}

/// Complete configuration file shared by the viewer and the headless runner
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SandConfig {
    pub canvas: CanvasSize,
    pub settings: SimulationSettings,
    pub conversion: ConversionSettings,
    pub draw: DrawConfig,
    pub seed: u64,
}

/// GPU-compatible uniforms for the grain shader
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GrainUniforms {
    pub resolution: [f32; 2],
    pub cell_size: f32,
    pub _pad: f32,
}

impl GrainUniforms {
    pub fn new(canvas: CanvasSize, cell_size: f32) -> Self {
        Self {
            resolution: [canvas.width as f32, canvas.height as f32],
            cell_size,
            _pad: 0.0,
        }
    }
}

/// WGSL binding layout documentation for the grain shader
///
/// ```wgsl
/// @group(0) @binding(0) var<uniform> uniforms: GrainUniforms;
/// @location(0) corner: vec2<f32>   // per vertex, unit quad
/// @location(1) offset: vec2<f32>   // per instance, pixel position
/// @location(2) color: vec4<f32>    // per instance, normalized RGBA
/// ```
pub mod bindings {
    pub const GRAIN_BINDINGS: &str = "Grain Group 0: GrainUniforms(uniform); \
        vertex slots: quad corner, instance offset, instance color";

    pub const QUAD_SLOT: u32 = 0;
    pub const OFFSET_SLOT: u32 = 1;
    pub const COLOR_SLOT: u32 = 2;

    /// Log binding layout information for debugging
    pub fn log_binding_layouts() {
        log::info!("Grain Bindings: {}", GRAIN_BINDINGS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SimulationSettings::default().validate().is_ok());
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut settings = SimulationSettings::default();
        let patch = SettingsPatch {
            gravity: Some(1.0),
            cell_size: Some(8.0),
            ..Default::default()
        };
        settings.apply(&patch);
        assert_eq!(settings.gravity, 1.0);
        assert_eq!(settings.cell_size, 8.0);
        assert_eq!(settings.terminal_velocity, 8.0);
    }

    #[test]
    fn later_patch_wins_on_merge() {
        let mut first = SettingsPatch {
            gravity: Some(1.0),
            stickiness: Some(0.1),
            ..Default::default()
        };
        first.merge(&SettingsPatch {
            gravity: Some(2.0),
            ..Default::default()
        });
        assert_eq!(first.gravity, Some(2.0));
        assert_eq!(first.stickiness, Some(0.1));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let settings = SimulationSettings {
            stickiness: 1.5,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.contains("stickiness"));
    }

    #[test]
    fn rejects_non_positive_terminal_velocity() {
        let settings = SimulationSettings {
            terminal_velocity: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_negative_wave_delay() {
        let conversion = ConversionSettings {
            wave_delay_ms: -1.0,
            ..ConversionSettings::reveal()
        };
        assert!(conversion.validate().unwrap_err().contains("wave_delay_ms"));
        assert!(ConversionSettings::build().validate().is_ok());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Build".parse::<RevealMode>(), Ok(RevealMode::Build));
        assert_eq!("reveal".parse::<RevealMode>(), Ok(RevealMode::Reveal));
        assert!("sideways".parse::<RevealMode>().is_err());
    }

    #[test]
    fn uniforms_carry_resolution() {
        let u = GrainUniforms::new(CanvasSize::new(800, 550), 2.0);
        assert_eq!(u.resolution, [800.0, 550.0]);
        assert_eq!(std::mem::size_of::<GrainUniforms>(), 16);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_yaml_fills_defaults() {
        let config: SandConfig = serde_yaml::from_str(
            "canvas: { width: 320, height: 240 }\nsettings:\n  gravity: 0.5\nseed: 7\n",
        )
        .unwrap();
        assert_eq!(config.canvas, CanvasSize::new(320, 240));
        assert_eq!(config.settings.gravity, 0.5);
        assert_eq!(config.settings.cell_size, 2.0);
        assert_eq!(config.conversion, ConversionSettings::reveal());
        assert_eq!(config.seed, 7);
    }
}
