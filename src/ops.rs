//! The operator library: one tagged enum per the "tree of tagged variants"
//! design note — dispatch on `Op` rather than a trait-object hierarchy, with
//! each rolling operator's mutable state stored inline in its variant so
//! that no two nodes, even with identical parameters, ever share a buffer.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::column::Batch;

pub type Scalar = f64;

/// Static kind tag used by the parser to validate argument kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Num,
    Bool,
}

/// A scalar is truthy iff finite and > 0, falsy iff finite and <= 0, and
/// unknown (propagates) if `NaN`. See spec §3.
pub fn truthy(v: Scalar) -> Option<bool> {
    if v.is_nan() {
        None
    } else {
        Some(v > 0.0)
    }
}

pub fn bool_scalar(b: bool) -> Scalar {
    if b {
        1.0
    } else {
        0.0
    }
}

/// A fixed-capacity sliding window over raw (possibly `NaN`) values.
///
/// Every rolling operator keeps one of these so that "is there a NaN inside
/// the window right now" can be answered in O(1) rather than by rescanning
/// the buffer, which matters because a NaN can enter and leave the window
/// independently of the numeric drift-correction reseed cadence.
#[derive(Debug, Clone)]
pub(crate) struct RawWindow {
    buf: VecDeque<f64>,
    capacity: usize,
    nan_count: usize,
}

impl RawWindow {
    fn new(capacity: usize) -> Self {
        RawWindow { buf: VecDeque::with_capacity(capacity), capacity, nan_count: 0 }
    }

    /// Admits `v`, evicting and returning the oldest value if the window was
    /// already full.
    fn push(&mut self, v: f64) -> Option<f64> {
        if v.is_nan() {
            self.nan_count += 1;
        }
        self.buf.push_back(v);
        if self.buf.len() > self.capacity {
            let old = self.buf.pop_front().unwrap();
            if old.is_nan() {
                self.nan_count -= 1;
            }
            Some(old)
        } else {
            None
        }
    }

    fn ready(&self) -> bool {
        self.buf.len() == self.capacity
    }

    fn has_nan(&self) -> bool {
        self.nan_count > 0
    }

    fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.buf.iter().copied()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.nan_count = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedF64(f64);

impl Eq for OrderedF64 {}

impl PartialOrd for OrderedF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).expect("ordered multiset never holds NaN")
    }
}

/// Running sum/mean state: a plain accumulator over finite values, reseeded
/// from the window every `capacity` admits to bound floating point drift.
#[derive(Debug, Clone)]
pub(crate) struct SumState {
    window: RawWindow,
    running: f64,
    since_reseed: usize,
}

impl SumState {
    pub(crate) fn new(w: usize) -> Self {
        SumState { window: RawWindow::new(w), running: 0.0, since_reseed: 0 }
    }

    fn reset(&mut self) {
        self.window.reset();
        self.running = 0.0;
        self.since_reseed = 0;
    }

    fn push(&mut self, v: f64) -> Option<f64> {
        if v.is_finite() {
            self.running += v;
        }
        let evicted = self.window.push(v);
        if let Some(old) = evicted {
            if old.is_finite() {
                self.running -= old;
            }
        }
        self.since_reseed += 1;
        if self.since_reseed >= self.window.capacity {
            self.running = self.window.iter().filter(|v| v.is_finite()).sum();
            self.since_reseed = 0;
        }
        evicted
    }

    fn sum(&self) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            None
        } else {
            Some(self.running)
        }
    }
}

/// Shared extremum tracker for Min/Max/ArgMin/ArgMax: a monotonic deque of
/// `(global index, value)` pairs, evicted by index once they fall outside
/// the trailing window of `capacity` admits.
#[derive(Debug, Clone)]
pub(crate) struct ExtremumState {
    window: RawWindow,
    deque: VecDeque<(u64, f64)>,
    t: u64,
    find_min: bool,
}

impl ExtremumState {
    pub(crate) fn new(w: usize, find_min: bool) -> Self {
        ExtremumState { window: RawWindow::new(w), deque: VecDeque::new(), t: 0, find_min }
    }

    fn reset(&mut self) {
        self.window.reset();
        self.deque.clear();
        self.t = 0;
    }

    fn push(&mut self, v: f64) {
        self.window.push(v);
        if v.is_finite() {
            while let Some(&(_, back)) = self.deque.back() {
                let dominated = if self.find_min { back > v } else { back < v };
                if dominated {
                    self.deque.pop_back();
                } else {
                    break;
                }
            }
            self.deque.push_back((self.t, v));
        }
        let capacity = self.window.capacity as u64;
        while let Some(&(idx, _)) = self.deque.front() {
            if idx + capacity <= self.t {
                self.deque.pop_front();
            } else {
                break;
            }
        }
        self.t += 1;
    }

    fn value(&self) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            None
        } else {
            self.deque.front().map(|&(_, v)| v)
        }
    }

    /// Position within the window (0 = oldest, w-1 = newest) of the extremum.
    fn position(&self) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            None
        } else {
            self.deque.front().map(|&(idx, _)| {
                let window_start = self.t - self.window.capacity as u64;
                (idx - window_start) as f64
            })
        }
    }
}

/// Welford-adjacent running power sums (Σx, Σx², Σx³) for Std/Skew, reseeded
/// from the window every `capacity` admits.
#[derive(Debug, Clone)]
pub(crate) struct MomentState {
    window: RawWindow,
    s1: f64,
    s2: f64,
    s3: f64,
    since_reseed: usize,
}

impl MomentState {
    pub(crate) fn new(w: usize) -> Self {
        MomentState { window: RawWindow::new(w), s1: 0.0, s2: 0.0, s3: 0.0, since_reseed: 0 }
    }

    fn reset(&mut self) {
        self.window.reset();
        self.s1 = 0.0;
        self.s2 = 0.0;
        self.s3 = 0.0;
        self.since_reseed = 0;
    }

    fn reseed(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
        self.s3 = 0.0;
        for v in self.window.iter() {
            if v.is_finite() {
                self.s1 += v;
                self.s2 += v * v;
                self.s3 += v * v * v;
            }
        }
    }

    fn push(&mut self, v: f64) {
        if v.is_finite() {
            self.s1 += v;
            self.s2 += v * v;
            self.s3 += v * v * v;
        }
        if let Some(old) = self.window.push(v) {
            if old.is_finite() {
                self.s1 -= old;
                self.s2 -= old * old;
                self.s3 -= old * old * old;
            }
        }
        self.since_reseed += 1;
        if self.since_reseed >= self.window.capacity {
            self.reseed();
            self.since_reseed = 0;
        }
    }

    fn n(&self) -> f64 {
        self.window.capacity as f64
    }

    fn variance(&self) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            return None;
        }
        let n = self.n();
        let mean = self.s1 / n;
        Some((self.s2 - n * mean * mean) / (n - 1.0))
    }

    fn std(&self) -> Option<f64> {
        self.variance().map(|var| var.max(0.0).sqrt())
    }

    fn skew(&self) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            return None;
        }
        let n = self.n();
        if n < 3.0 {
            return None;
        }
        let mean = self.s1 / n;
        let m2 = self.s2 / n - mean * mean;
        if m2 <= 0.0 {
            return None;
        }
        let m3 = self.s3 / n - 3.0 * mean * self.s2 / n + 2.0 * mean * mean * mean;
        let g1 = m3 / m2.powf(1.5);
        Some(((n * (n - 1.0)).sqrt() / (n - 2.0)) * g1)
    }
}

/// Running covariance/variance power sums for a pair of synchronized windows.
#[derive(Debug, Clone)]
pub(crate) struct CorrState {
    wa: RawWindow,
    wb: RawWindow,
    sa: f64,
    sb: f64,
    saa: f64,
    sbb: f64,
    sab: f64,
    since_reseed: usize,
}

impl CorrState {
    pub(crate) fn new(w: usize) -> Self {
        CorrState {
            wa: RawWindow::new(w),
            wb: RawWindow::new(w),
            sa: 0.0,
            sb: 0.0,
            saa: 0.0,
            sbb: 0.0,
            sab: 0.0,
            since_reseed: 0,
        }
    }

    fn reset(&mut self) {
        self.wa.reset();
        self.wb.reset();
        self.sa = 0.0;
        self.sb = 0.0;
        self.saa = 0.0;
        self.sbb = 0.0;
        self.sab = 0.0;
        self.since_reseed = 0;
    }

    fn reseed(&mut self) {
        self.sa = 0.0;
        self.sb = 0.0;
        self.saa = 0.0;
        self.sbb = 0.0;
        self.sab = 0.0;
        for (a, b) in self.wa.iter().zip(self.wb.iter()) {
            if a.is_finite() && b.is_finite() {
                self.sa += a;
                self.sb += b;
                self.saa += a * a;
                self.sbb += b * b;
                self.sab += a * b;
            }
        }
    }

    fn push(&mut self, a: f64, b: f64) {
        let both_finite = a.is_finite() && b.is_finite();
        if both_finite {
            self.sa += a;
            self.sb += b;
            self.saa += a * a;
            self.sbb += b * b;
            self.sab += a * b;
        }
        let evicted_a = self.wa.push(a);
        let evicted_b = self.wb.push(b);
        if let (Some(oa), Some(ob)) = (evicted_a, evicted_b) {
            if oa.is_finite() && ob.is_finite() {
                self.sa -= oa;
                self.sb -= ob;
                self.saa -= oa * oa;
                self.sbb -= ob * ob;
                self.sab -= oa * ob;
            }
        }
        self.since_reseed += 1;
        if self.since_reseed >= self.wa.capacity {
            self.reseed();
            self.since_reseed = 0;
        }
    }

    fn corr(&self) -> Option<f64> {
        if !self.wa.ready() || self.wa.has_nan() || self.wb.has_nan() {
            return None;
        }
        let n = self.wa.capacity as f64;
        let mean_a = self.sa / n;
        let mean_b = self.sb / n;
        let var_a = self.saa / n - mean_a * mean_a;
        let var_b = self.sbb / n - mean_b * mean_b;
        if var_a <= 0.0 || var_b <= 0.0 {
            return None;
        }
        let cov = self.sab / n - mean_a * mean_b;
        Some(cov / (var_a * var_b).sqrt())
    }
}

/// Ordered multiset (by value) plus a raw ring buffer, for Rank and Quantile.
#[derive(Debug, Clone)]
pub(crate) struct OrderStatState {
    window: RawWindow,
    multiset: BTreeMap<OrderedF64, usize>,
}

impl OrderStatState {
    pub(crate) fn new(w: usize) -> Self {
        OrderStatState { window: RawWindow::new(w), multiset: BTreeMap::new() }
    }

    fn reset(&mut self) {
        self.window.reset();
        self.multiset.clear();
    }

    fn insert(&mut self, v: f64) {
        if v.is_finite() {
            *self.multiset.entry(OrderedF64(v)).or_insert(0) += 1;
        }
    }

    fn remove(&mut self, v: f64) {
        if v.is_finite() {
            if let Some(count) = self.multiset.get_mut(&OrderedF64(v)) {
                *count -= 1;
                if *count == 0 {
                    self.multiset.remove(&OrderedF64(v));
                }
            }
        }
    }

    fn push(&mut self, v: f64) {
        if let Some(old) = self.window.push(v) {
            self.remove(old);
        }
        self.insert(v);
    }

    fn rank(&self, newest: f64) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            return None;
        }
        let less: usize = self.multiset.range(..OrderedF64(newest)).map(|(_, c)| *c).sum();
        Some(less as f64)
    }

    fn quantile(&self, q: f64) -> Option<f64> {
        if !self.window.ready() || self.window.has_nan() {
            return None;
        }
        let w = self.window.capacity;
        let k = (q * (w - 1) as f64).floor() as usize;
        let mut seen = 0usize;
        for (value, count) in &self.multiset {
            seen += *count;
            if seen > k {
                return Some(value.0);
            }
        }
        None
    }
}

/// The operator tag. Leaves carry no state; every rolling variant carries
/// its own inline streaming state.
#[derive(Debug, Clone)]
pub enum Op {
    Literal(f64),
    Column(String),

    Add,
    Sub,
    Mul,
    Div,
    Pow,
    SPow,
    Abs,
    Sign,
    LogAbs,

    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    And,
    Or,
    Not,
    If,

    Sum { window: usize, state: SumState },
    Mean { window: usize, state: SumState },
    Min { window: usize, state: ExtremumState },
    Max { window: usize, state: ExtremumState },
    ArgMin { window: usize, state: ExtremumState },
    ArgMax { window: usize, state: ExtremumState },
    Std { window: usize, state: MomentState },
    Skew { window: usize, state: MomentState },
    Rank { window: usize, state: OrderStatState },
    Quantile { window: usize, q: f64, state: OrderStatState },
    Delay { window: usize, buf: VecDeque<f64> },
    LogReturn { window: usize, buf: VecDeque<f64> },
    Corr { window: usize, state: CorrState },
}

impl Op {
    /// Per-operator readiness offset contribution, given the already-computed
    /// readiness of this node's children (the max across children for
    /// everything except the rolling operators, which add their own window
    /// term on top).
    pub fn ready_offset(&self, children_ready: &[usize]) -> usize {
        let max_child = children_ready.iter().copied().max().unwrap_or(0);
        match self {
            Op::Sum { window, .. }
            | Op::Mean { window, .. }
            | Op::Min { window, .. }
            | Op::Max { window, .. }
            | Op::ArgMin { window, .. }
            | Op::ArgMax { window, .. }
            | Op::Std { window, .. }
            | Op::Skew { window, .. }
            | Op::Rank { window, .. }
            | Op::Quantile { window, .. }
            | Op::Corr { window, .. } => max_child + (window - 1),
            Op::Delay { window, .. } | Op::LogReturn { window, .. } => max_child + window,
            _ => max_child,
        }
    }

    pub fn reset(&mut self) {
        match self {
            Op::Sum { state, .. } | Op::Mean { state, .. } => state.reset(),
            Op::Min { state, .. } | Op::Max { state, .. } | Op::ArgMin { state, .. } | Op::ArgMax { state, .. } => {
                state.reset()
            }
            Op::Std { state, .. } | Op::Skew { state, .. } => state.reset(),
            Op::Rank { state, .. } | Op::Quantile { state, .. } => state.reset(),
            Op::Delay { buf, .. } | Op::LogReturn { buf, .. } => buf.clear(),
            Op::Corr { state, .. } => state.reset(),
            _ => {}
        }
    }

    /// Evaluate this node's output for one row given its already-stepped
    /// children's values (empty for leaves) and, for the `Column` leaf, the
    /// current batch/local row position.
    pub fn step(&mut self, children: &[f64], batch: &Batch, local: usize) -> f64 {
        use Op::*;
        match self {
            Literal(k) => *k,
            Column(name) => batch.get(name).map(|col| col[local]).unwrap_or(f64::NAN),
            Add => children[0] + children[1],
            Sub => children[0] - children[1],
            Mul => children[0] * children[1],
            Div => {
                let (a, b) = (children[0], children[1]);
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else if b == 0.0 {
                    f64::NAN
                } else {
                    a / b
                }
            }
            Pow => {
                let (base, exp) = (children[0], children[1]);
                if base.is_nan() || exp.is_nan() {
                    f64::NAN
                } else if base < 0.0 && exp.fract() != 0.0 {
                    f64::NAN
                } else {
                    base.powf(exp)
                }
            }
            SPow => {
                let (e, x) = (children[0], children[1]);
                if e.is_nan() || x.is_nan() {
                    f64::NAN
                } else {
                    x.signum() * x.abs().powf(e)
                }
            }
            Abs => children[0].abs(),
            Sign => {
                let x = children[0];
                if x.is_nan() {
                    f64::NAN
                } else {
                    x.signum()
                }
            }
            LogAbs => children[0].abs().ln(),
            Gt => compare(children[0], children[1], |a, b| a > b),
            Ge => compare(children[0], children[1], |a, b| a >= b),
            Lt => compare(children[0], children[1], |a, b| a < b),
            Le => compare(children[0], children[1], |a, b| a <= b),
            Eq => compare(children[0], children[1], |a, b| a == b),
            And => match (truthy(children[0]), truthy(children[1])) {
                (Some(false), _) | (_, Some(false)) => 0.0,
                (Some(true), Some(true)) => 1.0,
                _ => f64::NAN,
            },
            Or => match (truthy(children[0]), truthy(children[1])) {
                (Some(true), _) | (_, Some(true)) => 1.0,
                (Some(false), Some(false)) => 0.0,
                _ => f64::NAN,
            },
            Not => match truthy(children[0]) {
                Some(b) => bool_scalar(!b),
                None => f64::NAN,
            },
            If => match truthy(children[0]) {
                Some(true) => children[1],
                Some(false) => children[2],
                None => f64::NAN,
            },
            Sum { state, .. } => {
                state.push(children[0]);
                state.sum().unwrap_or(f64::NAN)
            }
            Mean { window, state } => {
                state.push(children[0]);
                state.sum().map(|s| s / *window as f64).unwrap_or(f64::NAN)
            }
            Min { state, .. } => {
                state.push(children[0]);
                state.value().unwrap_or(f64::NAN)
            }
            Max { state, .. } => {
                state.push(children[0]);
                state.value().unwrap_or(f64::NAN)
            }
            ArgMin { state, .. } => {
                state.push(children[0]);
                state.position().unwrap_or(f64::NAN)
            }
            ArgMax { state, .. } => {
                state.push(children[0]);
                state.position().unwrap_or(f64::NAN)
            }
            Std { state, .. } => {
                state.push(children[0]);
                state.std().unwrap_or(f64::NAN)
            }
            Skew { state, .. } => {
                state.push(children[0]);
                state.skew().unwrap_or(f64::NAN)
            }
            Rank { state, .. } => {
                let v = children[0];
                state.push(v);
                state.rank(v).unwrap_or(f64::NAN)
            }
            Quantile { q, state, .. } => {
                state.push(children[0]);
                state.quantile(*q).unwrap_or(f64::NAN)
            }
            Delay { window, buf } => {
                let out = if buf.len() == *window { buf[0] } else { f64::NAN };
                buf.push_back(children[0]);
                if buf.len() > *window {
                    buf.pop_front();
                }
                out
            }
            LogReturn { window, buf } => {
                let cur = children[0];
                let out = if buf.len() == *window {
                    let old = buf[0];
                    if cur.is_nan() || old.is_nan() || cur <= 0.0 || old <= 0.0 {
                        f64::NAN
                    } else {
                        (cur / old).ln()
                    }
                } else {
                    f64::NAN
                };
                buf.push_back(cur);
                if buf.len() > *window {
                    buf.pop_front();
                }
                out
            }
            Corr { state, .. } => {
                state.push(children[0], children[1]);
                state.corr().unwrap_or(f64::NAN)
            }
        }
    }
}

fn compare(a: f64, b: f64, f: impl Fn(f64, f64) -> bool) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        bool_scalar(f(a, b))
    }
}

/// Leading literal arguments (window size, quantile level) that precede the
/// child expressions in canonical printed form. Empty for operators with no
/// such parameters.
pub fn literal_args(op: &Op) -> Vec<String> {
    use Op::*;
    match op {
        Sum { window, .. }
        | Mean { window, .. }
        | Min { window, .. }
        | Max { window, .. }
        | ArgMin { window, .. }
        | ArgMax { window, .. }
        | Std { window, .. }
        | Skew { window, .. }
        | Rank { window, .. }
        | Delay { window, .. }
        | LogReturn { window, .. }
        | Corr { window, .. } => vec![window.to_string()],
        Quantile { window, q, .. } => vec![window.to_string(), format!("{q}")],
        _ => vec![],
    }
}

/// Canonical, alias-free operator name used by `to_string`. Rolling
/// operators always print with the `TS` prefix, regardless of which
/// spelling was used to parse them.
pub fn canonical_name(op: &Op) -> &'static str {
    use Op::*;
    match op {
        Literal(_) | Column(_) => unreachable!("leaves are not printed through their operator name"),
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        Pow => "^",
        SPow => "SPow",
        Abs => "Abs",
        Sign => "Sign",
        LogAbs => "LogAbs",
        Gt => ">",
        Ge => ">=",
        Lt => "<",
        Le => "<=",
        Eq => "==",
        And => "And",
        Or => "Or",
        Not => "!",
        If => "If",
        Sum { .. } => "TSSum",
        Mean { .. } => "TSMean",
        Min { .. } => "TSMin",
        Max { .. } => "TSMax",
        ArgMin { .. } => "TSArgMin",
        ArgMax { .. } => "TSArgMax",
        Std { .. } => "TSStd",
        Skew { .. } => "TSSkew",
        Rank { .. } => "TSRank",
        Quantile { .. } => "TSQuantile",
        Delay { .. } => "Delay",
        LogReturn { .. } => "TSLogReturn",
        Corr { .. } => "TSCorr",
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Literal(k) => write!(f, "{k}"),
            Op::Column(name) => write!(f, ":{name}"),
            other => write!(f, "{}", canonical_name(other)),
        }
    }
}
