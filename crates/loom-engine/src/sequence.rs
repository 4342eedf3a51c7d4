//! Sibling ordering by float sequence numbers.
//!
//! New siblings are placed relative to an anchor without touching existing
//! values. The first candidate sits [`ANCHOR_OFFSET`] away from the anchor
//! and later candidates move a further [`STEP`] each, for at most
//! [`MAX_STEPS`] candidates. A candidate must land strictly between the
//! anchor and its neighbour on that side; once the steps leave that gap the
//! gap is bisected instead. `None` means the gap is too narrow to split and
//! the caller has to renumber.

pub const ANCHOR_OFFSET: f64 = 0.1;
pub const STEP: f64 = 0.01;
pub const MAX_STEPS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Anchor {
    Before(f64),
    After(f64),
}

/// Sequence for a sibling appended after all others.
pub fn append(siblings: &[f64]) -> f64 {
    siblings.iter().copied().fold(0.0, f64::max) + 1.0
}

/// Sequence strictly between the anchor and its neighbour, or `None` when
/// floating-point precision is exhausted.
pub fn place(siblings: &[f64], anchor: Anchor) -> Option<f64> {
    match anchor {
        Anchor::Before(s) => {
            let lower = siblings.iter().copied().filter(|&v| v < s).fold(None, max_opt);
            search(s, lower, -1.0, siblings)
        }
        Anchor::After(s) => {
            let upper = siblings.iter().copied().filter(|&v| v > s).fold(None, min_opt);
            search(s, upper, 1.0, siblings)
        }
    }
}

fn search(anchor: f64, neighbour: Option<f64>, direction: f64, used: &[f64]) -> Option<f64> {
    let inside = |v: f64| -> bool {
        let beyond_anchor = if direction < 0.0 { v < anchor } else { v > anchor };
        let short_of_neighbour = match neighbour {
            Some(n) if direction < 0.0 => v > n,
            Some(n) => v < n,
            None => true,
        };
        beyond_anchor && short_of_neighbour && v.is_finite()
    };

    for step in 0..MAX_STEPS {
        let candidate = anchor + direction * (ANCHOR_OFFSET + STEP * f64::from(step));
        if !inside(candidate) {
            break;
        }
        if !used.contains(&candidate) {
            return Some(candidate);
        }
    }

    let neighbour = neighbour?;
    let mid = anchor + (neighbour - anchor) / 2.0;
    (inside(mid) && !used.contains(&mid)).then_some(mid)
}

fn max_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn min_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

/// `1, 2, 3, …` in the given order.
pub fn renumbered(count: usize) -> impl Iterator<Item = f64> {
    (1..=count).map(|i| i as f64)
}
