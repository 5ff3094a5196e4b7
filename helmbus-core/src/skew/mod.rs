//! Clock skew estimation from round-trip timestamp triples.
//!
//! Each timing exchange yields three stamps: `rq` (local clock, request
//! sent), `tx` (peer clock, reply generated) and `rx` (local clock, reply
//! received). They bracket the peer reading between two local readings,
//! which bounds the skew `peer_clock - local_clock`:
//!
//! ```text
//! lower = tx - rx    (as if the outbound leg took all the delay)
//! upper = tx - rq    (as if the return leg took all the delay)
//! ```
//!
//! The bounds are fed as points into two one-sided [`ConvexEnvelope`]s.
//! Over time the true skew line is sandwiched ever more tightly between
//! the hull of the lower bounds and the hull of the upper bounds, and the
//! midline between the two best-fit segments tracks both offset and
//! drift rate. A slow first-order smoother removes the discontinuities
//! that hull re-trimming would otherwise put in the output.

pub mod envelope;

use log::debug;

pub use envelope::{ConvexEnvelope, Direction, Point, Segment};

/// Smoothing filter coefficient. Deliberately sluggish; the envelopes do
/// the real estimation and this only rounds off trim steps.
const SMOOTHING_ALPHA: f64 = 0.001;
/// Early measurements where only the lower bound is trusted. The upper
/// bound needs the request path to have been warm at least once.
const EARLY_TRUST_MEAS: u32 = 10;
/// Segment count above which the envelopes get cropped back to the
/// retention horizon.
const CROP_SEG_THRESHOLD: usize = 500;
/// Retention horizon for cropping, seconds.
const CROP_HORIZON_SECS: f64 = 3600.0;

/// One estimator output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Smoothed estimate of `peer_clock - local_clock`, seconds.
    pub skew: f64,
    /// False until the envelopes have stabilized; consumers should treat
    /// timestamps corrected by an unstable estimate as unverified.
    pub stable: bool,
}

/// The core estimator. Operates on whatever timescale it is given; see
/// [`ConditionedSkewFilter`] for the rebasing wrapper that production
/// paths should use with epoch-scale stamps.
#[derive(Debug)]
pub struct SkewFilter {
    /// Envelope over the lower skew bounds, hull fitted from above.
    lower: ConvexEnvelope,
    /// Envelope over the upper skew bounds, hull fitted from below.
    upper: ConvexEnvelope,
    last_val: f64,
    last_time: f64,
    n_meas: u32,
}

impl Default for SkewFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SkewFilter {
    pub fn new() -> Self {
        SkewFilter {
            lower: ConvexEnvelope::new(Direction::Above),
            upper: ConvexEnvelope::new(Direction::Below),
            last_val: 0.0,
            last_time: 0.0,
            n_meas: 0,
        }
    }

    pub fn reset(&mut self) {
        self.lower.reset();
        self.upper.reset();
        self.last_val = 0.0;
        self.last_time = 0.0;
        self.n_meas = 0;
    }

    pub fn measurement_count(&self) -> u32 {
        self.n_meas
    }

    /// Feed one `(rq, tx, rx)` triple and produce the updated estimate.
    pub fn update(&mut self, rq: f64, tx: f64, rx: f64) -> SkewEstimate {
        let skew_lb = tx - rx;
        let skew_ub = tx - rq;

        // A rejected point means a duplicated timestamp, or an envelope
        // in a state we cannot extend. Start that envelope over.
        if !self.lower.add_point(tx, skew_lb) {
            debug!("lower skew envelope rejected point, resetting");
            self.lower.reset();
        }
        if !self.upper.add_point(tx, skew_ub) {
            debug!("upper skew envelope rejected point, resetting");
            self.upper.reset();
        }

        let env_lb = self.eval(&self.lower, tx);
        let env_ub = self.eval(&self.upper, tx);

        // Raw single-triple estimate as the fallback.
        let mut skew = (skew_lb + skew_ub) / 2.0;
        if self.n_meas < EARLY_TRUST_MEAS {
            skew = skew_lb;
        }

        // Prefer the envelope lines once they are trustworthy; the
        // gradient feeds the smoother's prediction step.
        let mut gradient = 0.0;
        if self.lower.is_stable() {
            skew = env_lb;
            gradient = self.lower.line_estimate().0;
            if self.upper.is_stable() && env_ub >= env_lb {
                skew = (env_lb + env_ub) / 2.0;
                gradient = self.mid_line().0;
            }
        } else if self.upper.is_stable() {
            skew = env_ub;
            gradient = self.upper.line_estimate().0;
        }

        let mut filtered = skew;
        if self.n_meas > 0 {
            let dt = tx - self.last_time;
            filtered = smooth(dt, self.last_val, skew, gradient);
        }

        if self.lower.seg_count() > CROP_SEG_THRESHOLD {
            self.lower.crop_front_before(tx - CROP_HORIZON_SECS);
        }
        if self.upper.seg_count() > CROP_SEG_THRESHOLD {
            self.upper.crop_front_before(tx - CROP_HORIZON_SECS);
        }

        self.last_val = filtered;
        self.last_time = tx;
        self.n_meas += 1;

        SkewEstimate {
            skew: filtered,
            stable: self.is_stable(),
        }
    }

    pub fn is_stable(&self) -> bool {
        self.lower.is_stable() || self.upper.is_stable()
    }

    /// The most recent smoothed estimate, without feeding a new triple.
    pub fn current_skew(&self) -> f64 {
        self.last_val
    }

    fn eval(&self, env: &ConvexEnvelope, x: f64) -> f64 {
        let (m, c) = env.line_estimate();
        m * x + c
    }

    /// Mean of the two envelope line fits.
    fn mid_line(&self) -> (f64, f64) {
        let (m1, c1) = self.lower.line_estimate();
        let (m2, c2) = self.upper.line_estimate();
        ((m1 + m2) / 2.0, (c1 + c2) / 2.0)
    }
}

fn smooth(dt: f64, old_val: f64, new_meas: f64, gradient: f64) -> f64 {
    let pred = old_val + gradient * dt;
    let innov = new_meas - pred;
    pred + SMOOTHING_ALPHA * innov
}

/// Numerical conditioning wrapper around [`SkewFilter`].
///
/// Epoch-scale timestamps (~1e9 seconds) combined with sub-millisecond
/// deltas burn most of an f64's mantissa. The wrapper rebases all three
/// input stamps against the first sample so the core filter works near
/// the origin, then restores the initial offset on output.
#[derive(Debug, Default)]
pub struct ConditionedSkewFilter {
    inner: SkewFilter,
    begin_time: f64,
    skew_offset: f64,
    rx_offset: f64,
}

impl ConditionedSkewFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.begin_time = 0.0;
        self.skew_offset = 0.0;
        self.rx_offset = 0.0;
    }

    pub fn measurement_count(&self) -> u32 {
        self.inner.measurement_count()
    }

    pub fn is_stable(&self) -> bool {
        self.inner.is_stable()
    }

    /// The most recent estimate on the caller's raw timescale.
    pub fn current_skew(&self) -> f64 {
        self.inner.current_skew() + self.skew_offset
    }

    pub fn update(&mut self, rq: f64, tx: f64, rx: f64) -> SkewEstimate {
        if self.inner.measurement_count() == 0 {
            self.begin_time = rq;
            self.skew_offset = tx - rx;
            self.rx_offset = self.skew_offset - self.begin_time;
        }

        let est = self.inner.update(
            rq + self.rx_offset,
            tx - self.begin_time,
            rx + self.rx_offset,
        );

        // The inner filter sees skews relative to the first sample's
        // offset; add it back to recover the real value.
        SkewEstimate {
            skew: est.skew + self.skew_offset,
            stable: est.stable,
        }
    }
}
