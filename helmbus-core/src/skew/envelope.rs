//! One-sided convex envelope fitted online to a point stream.
//!
//! Points arrive in increasing-x order. The envelope keeps a piecewise
//! linear bound over all points seen so far: an [`Direction::Above`]
//! envelope lies on or above every point, a [`Direction::Below`] envelope
//! on or below. Each new point appends one segment and then merges
//! trailing segments while they break convexity, so the per-point cost is
//! O(1) amortized. Segments live in a plain `Vec` used as a stack; the
//! merge step only ever pops from the back.

/// A sample fed to the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// One linear piece of the envelope, anchored on the two points it was
/// fitted through. `span` is the x-extent covered, accumulated across
/// merges.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub slope: f64,
    pub intercept: f64,
    pub span: f64,
    pub p1: Point,
    pub p2: Point,
}

/// Which side of the point stream the envelope bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Envelope lies on or above every point; slopes are non-increasing.
    Above,
    /// Envelope lies on or below every point; slopes are non-decreasing.
    Below,
}

/// Minimum samples before an envelope will call itself stable.
const MIN_MEASUREMENTS: u32 = 20;
/// The longest segment must cover this fraction of the total x-extent.
const STABLE_FRACTION: f64 = 0.5;

#[derive(Debug)]
pub struct ConvexEnvelope {
    direction: Direction,
    segs: Vec<Segment>,
    /// Last point seen; the next point's segment starts here.
    anchor: Option<Point>,
    longest_idx: usize,
    longest_span: f64,
    n_meas: u32,
}

impl ConvexEnvelope {
    pub fn new(direction: Direction) -> Self {
        ConvexEnvelope {
            direction,
            segs: Vec::new(),
            anchor: None,
            longest_idx: 0,
            longest_span: 0.0,
            n_meas: 0,
        }
    }

    pub fn reset(&mut self) {
        self.segs.clear();
        self.anchor = None;
        self.longest_idx = 0;
        self.longest_span = 0.0;
        self.n_meas = 0;
    }

    pub fn seg_count(&self) -> usize {
        self.segs.len()
    }

    pub fn measurement_count(&self) -> u32 {
        self.n_meas
    }

    /// Feed one point. Returns false when the point cannot extend the
    /// envelope, which in practice means a duplicated x value; the caller
    /// decides whether that warrants a reset.
    pub fn add_point(&mut self, x: f64, y: f64) -> bool {
        let pt = Point::new(x, y);

        let anchor = match self.anchor {
            None => {
                self.anchor = Some(pt);
                return true;
            }
            Some(a) => a,
        };

        let seg = match make_seg(anchor, pt) {
            Some(seg) => seg,
            None => return false,
        };
        self.append_seg(seg);

        while self.segs.len() > 1 && self.merge_last_seg() {}

        self.anchor = Some(pt);
        self.n_meas += 1;
        true
    }

    /// Slope and intercept of the longest segment, the best available
    /// line fit. Before any segment exists this degenerates to a flat
    /// line through the only point seen.
    pub fn line_estimate(&self) -> (f64, f64) {
        match self.longest_seg() {
            Some(seg) => (seg.slope, seg.intercept),
            None => (0.0, self.anchor.map(|p| p.y).unwrap_or(0.0)),
        }
    }

    pub fn longest_seg(&self) -> Option<&Segment> {
        self.segs.get(self.longest_idx)
    }

    /// The envelope is a reliable estimator once it has enough samples
    /// and its longest segment dominates the measured extent. Early on
    /// the hull is churned by every sample and its lines are noise.
    pub fn is_stable(&self) -> bool {
        if self.n_meas < MIN_MEASUREMENTS || self.segs.is_empty() {
            return false;
        }
        let total = self.segs[self.segs.len() - 1].p2.x - self.segs[0].p1.x;
        total > 0.0 && self.longest_span >= STABLE_FRACTION * total
    }

    /// Evict leading segments that end before `x_min`. Never evicts the
    /// longest segment, so a long-held estimate survives the cull.
    pub fn crop_front_before(&mut self, x_min: f64) {
        let mut k = 0;
        while k < self.longest_idx && self.segs[k].p2.x < x_min {
            k += 1;
        }
        if k > 0 {
            self.segs.drain(..k);
            self.longest_idx -= k;
        }
    }

    fn append_seg(&mut self, seg: Segment) {
        self.segs.push(seg);
        if self.segs.len() == 1 || seg.span > self.longest_span {
            self.longest_idx = self.segs.len() - 1;
            self.longest_span = seg.span;
        }
    }

    /// Merge the trailing two segments when the newer one's slope bends
    /// the wrong way for this direction. Returns true when a merge
    /// happened so the caller can keep collapsing.
    fn merge_last_seg(&mut self) -> bool {
        let n = self.segs.len();
        if n < 2 {
            return false;
        }
        let seg1 = self.segs[n - 2];
        let seg2 = self.segs[n - 1];

        let convex_ok = match self.direction {
            Direction::Above => seg2.slope < seg1.slope,
            Direction::Below => seg2.slope > seg1.slope,
        };
        if convex_ok {
            return false;
        }

        // The longest segment may be one of the two being replaced.
        if self.longest_idx >= n - 1 {
            self.longest_span = 0.0;
        }

        let mut merged = match make_seg(seg1.p1, seg2.p2) {
            Some(seg) => seg,
            None => return false,
        };
        merged.span = seg1.span + seg2.span;

        self.segs.pop();
        self.segs.pop();
        self.segs.push(merged);

        if merged.span > self.longest_span {
            self.longest_idx = self.segs.len() - 1;
            self.longest_span = merged.span;
        }
        true
    }
}

fn make_seg(p1: Point, p2: Point) -> Option<Segment> {
    if p1.x == p2.x {
        return None;
    }
    let slope = (p2.y - p1.y) / (p2.x - p1.x);
    let intercept = p2.y - slope * p2.x;
    Some(Segment {
        slope,
        intercept,
        span: (p2.x - p1.x).abs(),
        p1,
        p2,
    })
}
