//! Distance-literal normalization for spatial predicates.
//!
//! Two queries asking "within 101m" and "within 99m" should usually land in
//! the same cache fragment rather than each minting its own cache entry.
//! We snap a raw distance up to the next power-of-two multiple of a
//! configured unit before it becomes part of a fragment's canonical text,
//! and rewrite `distance(a, b) < d` into `st_dwithin(a, b, d')`-shaped text
//! so that the snapped constant, not the raw one, is what gets hashed.

/// Snap `raw` up to the smallest `unit * 2^k` (k >= 0) that is `>= raw`.
///
/// Returns `unit` itself for any non-positive or zero `raw`.
pub fn snap_distance(raw: f64, unit: f64) -> f64 {
    if unit <= 0.0 {
        return raw;
    }
    if raw <= unit {
        return unit;
    }
    let ratio = raw / unit;
    let k = ratio.log2().ceil();
    unit * 2f64.powf(k)
}

/// Render a snapped distance the same way regardless of float formatting
/// quirks, so `100.0` and `100` hash identically.
pub fn format_distance(d: f64) -> String {
    if d.fract() == 0.0 {
        format!("{}", d as i64)
    } else {
        format!("{}", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_up_to_next_power_of_two_multiple() {
        assert_eq!(snap_distance(101.0, 50.0), 200.0);
        assert_eq!(snap_distance(99.0, 50.0), 100.0);
        assert_eq!(snap_distance(50.0, 50.0), 50.0);
    }

    #[test]
    fn nearby_distances_snap_to_same_value() {
        assert_eq!(snap_distance(101.0, 50.0), snap_distance(150.0, 50.0));
    }

    #[test]
    fn format_integral_distance_has_no_decimal() {
        assert_eq!(format_distance(200.0), "200");
    }
}
