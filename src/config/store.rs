use std::path::Path;

use tracing::{debug, info};

use super::{AppConfig, BallConfig};
use crate::error::{AppError, Result};

/// Load configuration from `path`, or defaults when no path is given
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let config: AppConfig = toml::from_str(&text).map_err(|e| {
                AppError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => {
            debug!("No configuration file, using defaults");
            AppConfig::default()
        }
    };

    validate(&config)?;
    Ok(config)
}

/// Reject configurations the simulator or detector cannot run with
pub fn validate(config: &AppConfig) -> Result<()> {
    validate_ball(&config.ball)?;

    if !(1..=100).contains(&config.video.jpeg_quality) {
        return Err(AppError::Config(format!(
            "JPEG quality must be 1-100, got {}",
            config.video.jpeg_quality
        )));
    }

    if config.detection.queue_capacity == 0 {
        return Err(AppError::Config(
            "Detection queue capacity must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Reject ball geometry the simulator cannot start from
pub fn validate_ball(ball: &BallConfig) -> Result<()> {
    if ball.radius == 0 || ball.width <= ball.radius * 2 || ball.height <= ball.radius * 2 {
        return Err(AppError::Config(format!(
            "Ball of radius {} does not fit a {}x{} frame",
            ball.radius, ball.width, ball.height
        )));
    }

    // A step at least as large as the frame would bounce twice per tick
    let [vx, vy] = ball.velocity;
    if vx.unsigned_abs() >= ball.width || vy.unsigned_abs() >= ball.height {
        return Err(AppError::Config(format!(
            "Velocity ({}, {}) exceeds frame size {}x{}",
            vx, vy, ball.width, ball.height
        )));
    }

    Ok(())
}
