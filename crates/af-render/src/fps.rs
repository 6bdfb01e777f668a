use std::time::Instant;

/// Mesure de cadence lissée (moyenne exponentielle sur l'intervalle entre
/// ticks).
///
/// # Example
/// ```
/// use af_render::fps::FpsCounter;
/// let mut counter = FpsCounter::new(0.1);
/// counter.tick();
/// assert!(counter.fps() >= 0.0);
/// ```
pub struct FpsCounter {
    last: Option<Instant>,
    /// Poids du dernier intervalle, dans ]0, 1].
    alpha: f64,
    interval_ms: f64,
}

impl FpsCounter {
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self {
            last: None,
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            interval_ms: 0.0,
        }
    }

    /// Appeler une fois par frame, après le rendu.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            self.interval_ms = if self.interval_ms > 0.0 {
                self.interval_ms + self.alpha * (ms - self.interval_ms)
            } else {
                ms
            };
        }
        self.last = Some(now);
    }

    /// Intervalle lissé en ms.
    #[must_use]
    pub fn frame_time_ms(&self) -> f64 {
        self.interval_ms
    }

    #[must_use]
    pub fn fps(&self) -> f64 {
        if self.interval_ms > 0.0 {
            1000.0 / self.interval_ms
        } else {
            0.0
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(0.1)
    }
}
