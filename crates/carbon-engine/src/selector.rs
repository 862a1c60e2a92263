//! Tie-break selection

/// Values closer than this to the minimum count as tied
pub const TIE_EPSILON: f64 = 1e-6;

/// Lowest-valued candidate, with ties broken by cloud preference.
///
/// Candidates whose value is not finite are ignored. Among those within
/// [`TIE_EPSILON`] of the minimum, the first one (in input order) whose cloud
/// matches the earliest entry of `cloud_preference` wins; with no match or
/// no preference list the first tied candidate wins. Returns `None` only if
/// no candidate has a finite value.
pub fn pick_best<'a, T>(
    candidates: &'a [T],
    value_of: impl Fn(&T) -> f64,
    cloud_of: impl Fn(&T) -> &str,
    cloud_preference: &[String],
) -> Option<&'a T> {
    let min = candidates
        .iter()
        .map(&value_of)
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return None;
    }

    let winners: Vec<&T> = candidates
        .iter()
        .filter(|c| {
            let v = value_of(c);
            v.is_finite() && (v - min).abs() <= TIE_EPSILON
        })
        .collect();

    if winners.len() > 1 {
        for preferred in cloud_preference {
            if let Some(hit) = winners
                .iter()
                .find(|c| cloud_of(c).eq_ignore_ascii_case(preferred.trim()))
            {
                return Some(*hit);
            }
        }
    }
    winners.first().copied()
}
