use sandfall_params::{CanvasSize, ConversionSettings, SimulationSettings, MIN_CELL_SIZE};

/// Degenerate configuration handed to the engine, the converter or the store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("cell size must be at least {min}, got {got}")]
    CellSize { got: f32, min: f32 },
    #[error("canvas must be non-empty, got {width}x{height}")]
    CanvasSize { width: u32, height: u32 },
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

impl ConfigError {
    pub fn check_cell_size(cell_size: f32) -> Result<f32, ConfigError> {
        // NaN fails the comparison too
        if cell_size >= MIN_CELL_SIZE && cell_size.is_finite() {
            Ok(cell_size)
        } else {
            Err(ConfigError::CellSize {
                got: cell_size,
                min: MIN_CELL_SIZE,
            })
        }
    }

    pub fn check_canvas(canvas: CanvasSize) -> Result<CanvasSize, ConfigError> {
        if canvas.is_empty() {
            Err(ConfigError::CanvasSize {
                width: canvas.width,
                height: canvas.height,
            })
        } else {
            Ok(canvas)
        }
    }

    pub fn check_settings(settings: &SimulationSettings) -> Result<(), ConfigError> {
        Self::check_cell_size(settings.cell_size)?;
        settings.validate().map_err(ConfigError::InvalidSetting)
    }

    /// Returns the validated cell size
    pub fn check_conversion(conversion: &ConversionSettings) -> Result<f32, ConfigError> {
        let cell_size = Self::check_cell_size(conversion.cell_size)?;
        conversion.validate().map_err(ConfigError::InvalidSetting)?;
        Ok(cell_size)
    }
}

/// Failure turning an encoded drawing into grains
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Rendering error types
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface creation failed: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("pipeline creation failed: {0}")]
    Pipeline(String),
    #[error("readback failed: {0}")]
    Readback(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Anything the orchestrating store can surface to its host
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_near_zero_cell_size() {
        assert!(ConfigError::check_cell_size(0.0).is_err());
        assert!(ConfigError::check_cell_size(-2.0).is_err());
        assert!(ConfigError::check_cell_size(0.01).is_err());
        assert!(ConfigError::check_cell_size(f32::NAN).is_err());
        assert_eq!(ConfigError::check_cell_size(1.0), Ok(1.0));
    }

    #[test]
    fn rejects_empty_canvas() {
        let err = ConfigError::check_canvas(CanvasSize::new(0, 10)).unwrap_err();
        assert_eq!(err, ConfigError::CanvasSize { width: 0, height: 10 });
    }

    #[test]
    fn settings_errors_name_the_field() {
        let settings = SimulationSettings {
            interaction_radius: 0.0,
            ..Default::default()
        };
        match ConfigError::check_settings(&settings) {
            Err(ConfigError::InvalidSetting(msg)) => assert!(msg.contains("interaction_radius")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
