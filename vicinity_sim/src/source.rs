//! Simulated position feed.
//!
//! Holds the true position of one device and answers `current_fix` with
//! that position plus Gaussian GPS noise, except during scripted outage
//! windows where the feed is unavailable.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use vicinity_core::geo_math::EARTH_RADIUS_M;
use vicinity_env::{Clock, EnvError, PositionFix, PositionSource};

use crate::context::SimContext;

pub struct SimPositionSource {
    ctx: Arc<SimContext>,

    /// True (latitude, longitude)
    truth: Mutex<(f64, f64)>,

    /// GPS noise in meters, per axis
    noise: Option<Normal<f64>>,
    rng: Mutex<ChaCha8Rng>,

    /// Virtual-time windows during which every fix fails
    outages: Vec<Range<Duration>>,
}

impl SimPositionSource {
    /// A noiseless, always-available source at `(latitude, longitude)`.
    pub fn new(ctx: Arc<SimContext>, latitude: f64, longitude: f64, stream: u64) -> Self {
        let rng = ctx.fork_rng(stream);
        Self {
            ctx,
            truth: Mutex::new((latitude, longitude)),
            noise: None,
            rng: Mutex::new(rng),
            outages: Vec::new(),
        }
    }

    /// Adds Gaussian noise with the given standard deviation (meters).
    /// A non-positive or non-finite deviation leaves the source noiseless.
    pub fn with_noise(mut self, std_dev_m: f64) -> Self {
        self.noise = Normal::new(0.0, std_dev_m).ok().filter(|_| std_dev_m > 0.0);
        self
    }

    /// Makes the feed unavailable while virtual time is inside `window`.
    pub fn with_outage(mut self, window: Range<Duration>) -> Self {
        self.outages.push(window);
        self
    }

    pub fn set_position(&self, latitude: f64, longitude: f64) {
        *self.truth.lock().unwrap_or_else(PoisonError::into_inner) = (latitude, longitude);
    }

    pub fn true_position(&self) -> (f64, f64) {
        *self.truth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_outage(&self) -> bool {
        let now = self.ctx.now();
        self.outages.iter().any(|w| w.contains(&now))
    }
}

#[async_trait]
impl PositionSource for SimPositionSource {
    async fn current_fix(&self) -> Result<PositionFix, EnvError> {
        if self.in_outage() {
            return Err(EnvError::unavailable("simulated feed outage"));
        }

        let (lat, lon) = self.true_position();
        let fix = match &self.noise {
            None => PositionFix::new(lat, lon, self.ctx.system_time()),
            Some(normal) => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                let north_m = normal.sample(&mut *rng);
                let east_m = normal.sample(&mut *rng);
                let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
                let dlon = (east_m / (EARTH_RADIUS_M * lat.to_radians().cos())).to_degrees();
                PositionFix::new(
                    (lat + dlat).clamp(-90.0, 90.0),
                    lon + dlon,
                    self.ctx.system_time(),
                )
                .with_accuracy(normal.std_dev())
            }
        };
        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noiseless_fix_is_exact_and_stamped() {
        let ctx = SimContext::shared(1);
        ctx.advance_time(Duration::from_secs(10));
        let source = SimPositionSource::new(ctx.clone(), 21.25, 81.63, 0);

        let fix = source.current_fix().await.unwrap();
        assert_eq!((fix.latitude, fix.longitude), (21.25, 81.63));
        assert_eq!(fix.timestamp, ctx.system_time());
        assert_eq!(fix.accuracy_m, None);
    }

    #[tokio::test]
    async fn test_outage_window() {
        let ctx = SimContext::shared(1);
        let source = SimPositionSource::new(ctx.clone(), 21.25, 81.63, 0)
            .with_outage(Duration::from_secs(30)..Duration::from_secs(60));

        assert!(source.current_fix().await.is_ok());
        ctx.advance_time(Duration::from_secs(30));
        assert!(matches!(
            source.current_fix().await,
            Err(EnvError::SourceUnavailable(_))
        ));
        ctx.advance_time(Duration::from_secs(30));
        assert!(source.current_fix().await.is_ok());
    }

    #[tokio::test]
    async fn test_noise_is_seeded_and_small() {
        let a = SimPositionSource::new(SimContext::shared(9), 21.25, 81.63, 3).with_noise(5.0);
        let b = SimPositionSource::new(SimContext::shared(9), 21.25, 81.63, 3).with_noise(5.0);

        for _ in 0..20 {
            let fa = a.current_fix().await.unwrap();
            let fb = b.current_fix().await.unwrap();
            assert_eq!(fa, fb);
            // 5 m sigma is far below 0.001 degrees
            assert!((fa.latitude - 21.25).abs() < 0.001);
            assert!((fa.longitude - 81.63).abs() < 0.001);
            assert_eq!(fa.accuracy_m, Some(5.0));
        }
    }
}
