//! Pure host-time → δ-grid mapping (component C, sec. 4.C).
//!
//! `quantize` is the only entry point; everything else here is the decimal
//! precision derivation it depends on. Floor-after-multiply is mandatory —
//! rounding `k * delta` directly through default float formatting can carry
//! into the next decimal and break the "no two distinct k share a formatted
//! t_q" invariant.

/// Decimal places to floor `t_q` to: `clamp(ceil(-log10(delta)) + 2, 0, 9)`.
pub fn decimal_precision(delta: f64) -> u32 {
    let raw = (-delta.log10()).ceil() + 2.0;
    raw.clamp(0.0, 9.0) as u32
}

/// Maps host-relative seconds `t` to a frame index `k` (half-up rounding)
/// and its quantized time `t_q = k * delta`, floored to `precision` decimals.
pub fn quantize(t: f64, delta: f64, precision: u32) -> (u64, f64) {
    let k = (t / delta + 0.5).floor().max(0.0) as u64;
    let t_q = floor_to_decimals(k as f64 * delta, precision);
    (k, t_q)
}

fn floor_to_decimals(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).floor() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_matches_spec_examples() {
        assert_eq!(decimal_precision(0.01), 4);
        assert_eq!(decimal_precision(1.0), 2);
        assert_eq!(decimal_precision(1e-9), 9);
    }

    #[test]
    fn anchor_and_quantize_scenario() {
        let delta = 0.01;
        let precision = decimal_precision(delta);
        let (k0, tq0) = quantize(0.0, delta, precision);
        assert_eq!((k0, tq0), (0, 0.0));

        let (k1, tq1) = quantize(0.015, delta, precision);
        assert_eq!((k1, tq1), (2, 0.02));
    }

    #[test]
    fn grid_alignment_matches_k_times_delta() {
        let delta = 1.0 / 3.0;
        let precision = decimal_precision(delta);
        for k in 0..1000u64 {
            let t = k as f64 * delta;
            let (k2, t_q) = quantize(t, delta, precision);
            assert_eq!(k2, k, "k round-trips through quantize");
            let expected = floor_to_decimals(k as f64 * delta, precision);
            assert_eq!(t_q, expected);
        }
    }

    #[test]
    fn distinct_k_never_share_formatted_t_q() {
        let delta = 0.01;
        let precision = decimal_precision(delta);
        let mut seen = std::collections::HashSet::new();
        for k in 0..10_000u64 {
            let t = k as f64 * delta;
            let (_, t_q) = quantize(t, delta, precision);
            let formatted = format!("{:.*}", precision as usize, t_q);
            assert!(seen.insert(formatted), "t_q collided at k={k}");
        }
    }
}
