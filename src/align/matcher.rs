//! Brute-force Hamming matching with Lowe's ratio test.

use super::features::Descriptor;

/// A correspondence between a query descriptor and a train descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// For each query descriptor find its two nearest train descriptors and keep
/// the best one if it is clearly better than the runner-up.
///
/// Queries with fewer than two train candidates produce no match.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor], ratio: f32) -> Vec<Match> {
    if train.len() < 2 {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for (qi, q) in query.iter().enumerate() {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (ti, t) in train.iter().enumerate() {
            let d = q.hamming(t);
            if d < best.0 {
                second = best.0;
                best = (d, ti);
            } else if d < second {
                second = d;
            }
        }
        if (best.0 as f32) < ratio * second as f32 {
            matches.push(Match {
                query: qi,
                train: best.1,
                distance: best.0,
            });
        }
    }
    matches
}
