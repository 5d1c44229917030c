//! Hough voting over candidate centres, one plane per radius.

use crate::Detection;
use crate::perimeter::perimeter_offsets;

/// Relative tolerance under which two scores count as a tie.
const TIE_TOLERANCE: f64 = 1e-6;

struct Plane {
    radius: u32,
    perimeter: f64,
    votes: Vec<u32>,
}

impl Plane {
    #[expect(clippy::float_arithmetic, reason = "scores are vote fractions")]
    fn score(&self, index: usize) -> f64 {
        self.votes
            .get(index)
            .map_or(0.0, |votes| f64::from(*votes) / self.perimeter)
    }
}

/// Vote accumulator for circles whose centres lie inside the image.
pub(crate) struct HoughAccumulator {
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl HoughAccumulator {
    /// Casts votes from every edge pixel for each radius in `radii`.
    pub(crate) fn vote(
        width: u32,
        height: u32,
        edges: &[(i64, i64)],
        radii: impl Iterator<Item = u32>,
    ) -> Self {
        let planes = radii
            .map(|radius| vote_plane(width, height, edges, radius))
            .collect();
        Self {
            width,
            height,
            planes,
        }
    }

    /// Returns the single best circle, or `None` when nothing scored or when
    /// a second, distinct centre ties with the best one.
    #[expect(clippy::float_arithmetic, reason = "tie floor is relative to the best score")]
    pub(crate) fn best_unambiguous(&self, min_separation: u32) -> Option<Detection> {
        let best = self.best()?;
        if best.score <= 0.0 {
            return None;
        }
        let floor = best.score * (1.0 - TIE_TOLERANCE);
        let separation = i64::from(min_separation);
        let rival = self.candidates().any(|(x, y, _, score)| {
            score >= floor && squared_distance((x, y), (best.x, best.y)) > separation * separation
        });
        (!rival).then_some(best)
    }

    fn best(&self) -> Option<Detection> {
        let mut best: Option<Detection> = None;
        for (x, y, radius, score) in self.candidates() {
            if best.is_none_or(|current| score > current.score) {
                best = Some(Detection {
                    x,
                    y,
                    radius,
                    score,
                });
            }
        }
        best
    }

    fn candidates(&self) -> impl Iterator<Item = (u32, u32, u32, f64)> + '_ {
        self.planes.iter().flat_map(move |plane| {
            (0..self.height).flat_map(move |y| {
                (0..self.width).map(move |x| {
                    let index = plane_index(self.width, x, y);
                    (x, y, plane.radius, index.map_or(0.0, |i| plane.score(i)))
                })
            })
        })
    }
}

fn vote_plane(width: u32, height: u32, edges: &[(i64, i64)], radius: u32) -> Plane {
    let offsets = perimeter_offsets(radius);
    let cells = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(0);
    let mut votes = vec![0_u32; cells];
    let (w, h) = (i64::from(width), i64::from(height));

    for &(ex, ey) in edges {
        for &(dx, dy) in &offsets {
            let (cx, cy) = (ex - dx, ey - dy);
            if !(0..w).contains(&cx) || !(0..h).contains(&cy) {
                continue;
            }
            if let Ok(index) = usize::try_from(cy * w + cx)
                && let Some(cell) = votes.get_mut(index)
            {
                *cell += 1;
            }
        }
    }

    #[expect(clippy::cast_precision_loss, reason = "perimeters are small")]
    let perimeter = offsets.len().max(1) as f64;
    Plane {
        radius,
        perimeter,
        votes,
    }
}

fn plane_index(width: u32, x: u32, y: u32) -> Option<usize> {
    usize::try_from(u64::from(y) * u64::from(width) + u64::from(x)).ok()
}

fn squared_distance(a: (u32, u32), b: (u32, u32)) -> i64 {
    let dx = i64::from(a.0) - i64::from(b.0);
    let dy = i64::from(a.1) - i64::from(b.1);
    dx * dx + dy * dy
}
