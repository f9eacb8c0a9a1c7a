//! Forward-fill resampling and small duration helpers.

use chrono::{DateTime, Utc};

/// Resample the sparse series `(xs, ys)` onto `axis` by forward-filling: the
/// value at axis point `t` is the value of the most recent sample at or
/// before `t`, or `left` before the first sample.
///
/// `xs` must be sorted ascending and the same length as `ys`; `axis` must be
/// sorted ascending. When several samples share a timestamp, the last one
/// wins.
pub fn ffill<T, V>(axis: &[T], xs: &[T], ys: &[V], left: V) -> Vec<V>
where
    T: PartialOrd,
    V: Copy,
{
    assert_eq!(xs.len(), ys.len(), "sample timestamps and values must align");
    let mut out = Vec::with_capacity(axis.len());
    let mut i = 0;
    let mut current = left;
    for t in axis {
        while i < xs.len() && xs[i] <= *t {
            current = ys[i];
            i += 1;
        }
        out.push(current);
    }
    out
}

/// Seconds from `t0` to `t1`, clamped at zero when `t1` precedes `t0`.
pub fn seconds_between(t0: DateTime<Utc>, t1: DateTime<Utc>) -> f64 {
    (t1 - t0).to_std().map(|d| d.as_secs_f64()).unwrap_or(0.0)
}
