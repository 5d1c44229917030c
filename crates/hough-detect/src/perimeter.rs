//! Rasterised circle perimeters.

use std::collections::BTreeSet;

/// Integer offsets of the pixels on a circle of `radius` around the origin.
///
/// Traces one octant with the midpoint algorithm and mirrors it. Each
/// offset appears once, so a single edge pixel casts at most one vote per
/// centre and radius.
pub(crate) fn perimeter_offsets(radius: u32) -> Vec<(i64, i64)> {
    let r = i64::from(radius);
    let mut points = BTreeSet::new();
    let (mut x, mut y) = (r, 0_i64);
    let mut error = 1 - r;
    while x >= y {
        for offset in [
            (x, y),
            (y, x),
            (-y, x),
            (-x, y),
            (-x, -y),
            (-y, -x),
            (y, -x),
            (x, -y),
        ] {
            points.insert(offset);
        }
        y += 1;
        if error < 0 {
            error += 2 * y + 1;
        } else {
            x -= 1;
            error += 2 * (y - x) + 1;
        }
    }
    points.into_iter().collect()
}
