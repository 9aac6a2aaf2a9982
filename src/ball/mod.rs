//! Bouncing ball simulation
//!
//! The simulator owns the ball state and advances it once per tick. Only two
//! things leave this module: rendered frames and the ball's coordinate pair.
//!
//! Boundary contact is tested on the position *after* the move, and only the
//! velocity is reflected. A ball can therefore poke up to one step past the
//! inner band before it turns around.

mod track;

pub use track::BallTrack;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::{validate_ball, BallConfig};
use crate::error::Result;
use crate::video::Resolution;

/// Background value written to every channel
const BACKGROUND: Rgb<u8> = Rgb([1, 1, 1]);

/// Ground-truth ball position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallPosition {
    pub x: f64,
    pub y: f64,
}

impl BallPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `(x, y)`
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

/// Ball state, mutated once per tick
#[derive(Debug, Clone, PartialEq)]
pub struct BallState {
    pub x: f64,
    pub y: f64,
    pub vx: i32,
    pub vy: i32,
    pub radius: u32,
    pub color: [u8; 3],
}

/// Which axes reflected during a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounce {
    pub x: bool,
    pub y: bool,
}

/// Deterministic physics and rasterizer for the synthetic track
#[derive(Debug, Clone)]
pub struct BallSimulator {
    resolution: Resolution,
    state: BallState,
    ticks: u64,
}

impl BallSimulator {
    /// Create a simulator with a random start position drawn from `config.seed`
    ///
    /// Fails if the ball does not fit the frame.
    pub fn new(config: &BallConfig) -> Result<Self> {
        validate_ball(config)?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let r = config.radius;
        let x = rng.gen_range(r..config.width - r);
        let y = rng.gen_range(r..config.height - r);

        debug!(x, y, seed = ?config.seed, "Ball start position");

        Ok(Self::with_state(
            Resolution::new(config.width, config.height),
            BallState {
                x: x as f64,
                y: y as f64,
                vx: config.velocity[0],
                vy: config.velocity[1],
                radius: r,
                color: config.color,
            },
        ))
    }

    /// Create a simulator from an explicit state
    pub fn with_state(resolution: Resolution, state: BallState) -> Self {
        Self {
            resolution,
            state,
            ticks: 0,
        }
    }

    pub fn state(&self) -> &BallState {
        &self.state
    }

    /// Number of ticks simulated so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Current ball center
    pub fn position(&self) -> BallPosition {
        BallPosition::new(self.state.x, self.state.y)
    }

    /// Advance one tick: move, then reflect on each axis independently
    pub fn tick(&mut self) -> Bounce {
        let s = &mut self.state;
        let r = s.radius as f64;
        let max_x = self.resolution.width as f64 - r;
        let max_y = self.resolution.height as f64 - r;

        s.x += s.vx as f64;
        s.y += s.vy as f64;

        let mut bounce = Bounce::default();
        if s.x < r || s.x > max_x {
            s.vx = -s.vx;
            bounce.x = true;
        }
        if s.y < r || s.y > max_y {
            s.vy = -s.vy;
            bounce.y = true;
        }

        self.ticks += 1;
        bounce
    }

    /// Integer pixel center used when drawing
    pub fn pixel_center(&self) -> (i32, i32) {
        (self.state.x.round() as i32, self.state.y.round() as i32)
    }

    /// Rasterize the current state
    pub fn render(&self) -> RgbImage {
        let mut image =
            RgbImage::from_pixel(self.resolution.width, self.resolution.height, BACKGROUND);
        draw_filled_circle_mut(
            &mut image,
            self.pixel_center(),
            self.state.radius as i32,
            Rgb(self.state.color),
        );
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_at(x: f64, y: f64, vx: i32, vy: i32) -> BallSimulator {
        BallSimulator::with_state(
            Resolution::new(900, 600),
            BallState {
                x,
                y,
                vx,
                vy,
                radius: 20,
                color: [128, 255, 128],
            },
        )
    }

    fn seeded(seed: u64) -> BallSimulator {
        BallSimulator::new(&BallConfig {
            seed: Some(seed),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ball_that_does_not_fit() {
        let too_big = BallConfig {
            width: 30,
            radius: 20,
            ..Default::default()
        };
        assert!(BallSimulator::new(&too_big).is_err());

        let no_room = BallConfig {
            height: 40,
            radius: 20,
            ..Default::default()
        };
        assert!(BallSimulator::new(&no_room).is_err());
    }

    #[test]
    fn test_start_position_in_band() {
        for seed in 0..200 {
            let sim = seeded(seed);
            let s = sim.state();
            assert!(s.x >= 20.0 && s.x < 880.0, "x={}", s.x);
            assert!(s.y >= 20.0 && s.y < 580.0, "y={}", s.y);
            assert_eq!(s.x.fract(), 0.0);
            assert_eq!((s.vx, s.vy), (15, 15));
        }
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let mut a = seeded(42);
        let mut b = seeded(42);
        for _ in 0..500 {
            assert_eq!(a.tick(), b.tick());
            assert_eq!(a.state(), b.state());
        }
    }

    #[test]
    fn test_bounce_is_one_tick_late() {
        // Sits exactly on the right edge of the band: not yet a contact
        let mut sim = sim_at(880.0, 300.0, 15, 0);
        let bounce = sim.tick();
        assert!(bounce.x);
        assert_eq!(sim.state().x, 895.0);
        assert_eq!(sim.state().vx, -15);

        let bounce = sim.tick();
        assert!(!bounce.x);
        assert_eq!(sim.state().x, 880.0);
    }

    #[test]
    fn test_ball_on_boundary_reflects_next_tick() {
        let mut sim = sim_at(20.0, 300.0, -15, 0);
        assert!(sim.tick().x);
        assert_eq!(sim.state().x, 5.0);
        assert_eq!(sim.state().vx, 15);
    }

    #[test]
    fn test_axes_reflect_independently() {
        let mut sim = sim_at(875.0, 300.0, 15, 15);
        let bounce = sim.tick();
        assert_eq!(bounce, Bounce { x: true, y: false });
        assert_eq!((sim.state().vx, sim.state().vy), (-15, 15));
    }

    #[test]
    fn test_reflection_flips_sign_once_and_keeps_magnitude() {
        for seed in 0..20 {
            let mut sim = seeded(seed);
            let mut prev = sim.state().clone();
            let mut prev_bounce = Bounce::default();

            for _ in 0..2000 {
                let bounce = sim.tick();
                let s = sim.state();

                assert_eq!(s.vx.abs(), prev.vx.abs());
                assert_eq!(s.vy.abs(), prev.vy.abs());
                assert_eq!(bounce.x, s.vx != prev.vx);
                assert_eq!(bounce.y, s.vy != prev.vy);

                // Never two reflections in a row on the same axis
                assert!(!(bounce.x && prev_bounce.x));
                assert!(!(bounce.y && prev_bounce.y));

                prev = s.clone();
                prev_bounce = bounce;
            }
        }
    }

    #[test]
    fn test_rendered_center_stays_in_frame() {
        let mut sim = seeded(7);
        for _ in 0..3000 {
            sim.tick();
            let s = sim.state();
            let (cx, cy) = sim.pixel_center();

            assert_eq!(cx as f64, s.x);
            assert_eq!(cy as f64, s.y);

            // Inner band widened by one step for the late bounce
            assert!(cx >= 20 - 15 && cx <= 880 + 15, "cx={}", cx);
            assert!(cy >= 20 - 15 && cy <= 580 + 15, "cy={}", cy);
            assert!(cx > 0 && cx < 900);
            assert!(cy > 0 && cy < 600);
        }
    }

    #[test]
    fn test_render_draws_ball_on_background() {
        let sim = sim_at(450.0, 300.0, 15, 15);
        let image = sim.render();

        assert_eq!(image.dimensions(), (900, 600));
        assert_eq!(*image.get_pixel(450, 300), Rgb([128, 255, 128]));
        assert_eq!(*image.get_pixel(450 + 19, 300), Rgb([128, 255, 128]));
        assert_eq!(*image.get_pixel(450 + 22, 300), BACKGROUND);
        assert_eq!(*image.get_pixel(0, 0), BACKGROUND);
    }

    #[test]
    fn test_distance() {
        let p = BallPosition::new(450.0, 300.0);
        assert!((p.distance_to(451.0, 301.0) - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(p.distance_to(450.0, 300.0), 0.0);
    }
}
