//! Energy-accumulation metrics: Arias intensity, CAV and significant
//! durations.
//!
//! Input acceleration is in cm/s^2 throughout; Arias and CAV come out in
//! cm/s, durations in seconds.

/// Standard gravity in cm/s^2.
pub const GRAVITY_CM: f64 = 980.665;

/// Cumulative Arias intensity curve `(pi / 2g) * integral(a^2 dt)`.
pub fn arias_curve(acc: &[f64], dt: f64) -> Vec<f64> {
    let scale = std::f64::consts::PI / (2.0 * GRAVITY_CM);
    let mut out = Vec::with_capacity(acc.len());
    let mut acc_sum = 0.0;
    let mut prev = 0.0;
    for (i, &a) in acc.iter().enumerate() {
        let sq = a * a;
        if i > 0 {
            acc_sum += 0.5 * (prev + sq) * dt;
        }
        prev = sq;
        out.push(scale * acc_sum);
    }
    out
}

/// Total Arias intensity in cm/s.
pub fn arias_intensity(acc: &[f64], dt: f64) -> f64 {
    arias_curve(acc, dt).last().copied().unwrap_or(0.0)
}

/// Cumulative absolute velocity `integral(|a| dt)` in cm/s.
///
/// Samples with `|a|` below `threshold` cm/s^2 do not accumulate.
pub fn cav(acc: &[f64], dt: f64, threshold: f64) -> f64 {
    let mut total = 0.0;
    for pair in acc.windows(2) {
        let (a0, a1) = (pair[0].abs(), pair[1].abs());
        if a0 >= threshold || a1 >= threshold {
            total += 0.5 * (a0 + a1) * dt;
        }
    }
    total
}

/// Time between `p1`% and `p2`% of Arias-intensity accumulation, in
/// seconds.
pub fn significant_duration(acc: &[f64], dt: f64, p1: f64, p2: f64) -> Option<f64> {
    let curve = arias_curve(acc, dt);
    let total = *curve.last()?;
    if total <= 0.0 {
        return None;
    }
    let t_at = |pct: f64| -> f64 {
        let target = pct / 100.0 * total;
        match curve.iter().position(|&v| v >= target) {
            Some(0) | None => 0.0,
            Some(i) => {
                // Linear interpolation inside the crossing interval
                let frac = (target - curve[i - 1]) / (curve[i] - curve[i - 1]).max(1e-300);
                (i as f64 - 1.0 + frac) * dt
            }
        }
    };
    Some(t_at(p2) - t_at(p1))
}

/// Significant duration computed on the amplitude-sorted record.
///
/// Squared samples sort descending; the duration is the time occupied by
/// the samples that carry the energy between `p1`% and `p2`% of the
/// total.
pub fn sorted_duration(acc: &[f64], dt: f64, p1: f64, p2: f64) -> Option<f64> {
    let mut sq: Vec<f64> = acc.iter().map(|a| a * a).collect();
    sq.sort_by(|a, b| b.total_cmp(a));
    let total: f64 = sq.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut cum = 0.0;
    let mut count_p1: Option<usize> = None;
    let mut count_p2: Option<usize> = None;
    for (i, v) in sq.iter().enumerate() {
        cum += v;
        if count_p1.is_none() && cum >= p1 / 100.0 * total {
            count_p1 = Some(i);
        }
        if cum >= p2 / 100.0 * total {
            count_p2 = Some(i);
            break;
        }
    }
    match (count_p1, count_p2) {
        (Some(a), Some(b)) if b >= a => Some((b - a) as f64 * dt),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arias_of_constant_acceleration() {
        // a = g for 10 s: Ia = (pi/2g) * g^2 * 10 = pi*g*5
        let dt = 0.01;
        let acc = vec![GRAVITY_CM; 1001];
        let ia = arias_intensity(&acc, dt);
        let expect = std::f64::consts::PI / (2.0 * GRAVITY_CM) * GRAVITY_CM * GRAVITY_CM * 10.0;
        assert!((ia - expect).abs() / expect < 1e-6);
    }

    #[test]
    fn arias_curve_monotone() {
        let acc: Vec<f64> = (0..1000).map(|i| ((i as f64) * 0.07).sin() * 50.0).collect();
        let curve = arias_curve(&acc, 0.01);
        assert!(curve.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(curve[0], 0.0);
    }

    #[test]
    fn cav_of_constant_acceleration() {
        let dt = 0.01;
        let acc = vec![10.0; 1001];
        // integral over 10 s of 10 cm/s^2
        assert!((cav(&acc, dt, 0.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn cav_threshold_excludes_quiet_samples() {
        let mut acc = vec![1.0; 500];
        acc.extend(vec![100.0; 500]);
        let with_threshold = cav(&acc, 0.01, 5.0);
        let without = cav(&acc, 0.01, 0.0);
        assert!(with_threshold < without);
        // Roughly the strong half only
        assert!((with_threshold - 100.0 * 0.01 * 500.0).abs() < 2.0);
    }

    #[test]
    fn significant_duration_of_uniform_shaking() {
        // Uniform energy: the 5-95 window covers 90% of the record
        let acc = vec![30.0; 10001]; // 100 s
        let d = significant_duration(&acc, 0.01, 5.0, 95.0).unwrap();
        assert!((d - 90.0).abs() < 0.5, "duration {d}");
    }

    #[test]
    fn significant_duration_concentrated_burst() {
        // All the energy inside [40 s, 50 s]
        let mut acc = vec![0.0; 10000];
        for (i, a) in acc.iter_mut().enumerate().take(5000).skip(4000) {
            *a = 100.0 * ((i as f64) * 0.2).sin();
        }
        let d = significant_duration(&acc, 0.01, 5.0, 95.0).unwrap();
        assert!(d < 10.5, "duration {d}");
    }

    #[test]
    fn significant_duration_none_for_silence() {
        assert!(significant_duration(&[0.0; 100], 0.01, 5.0, 95.0).is_none());
    }

    #[test]
    fn sorted_duration_shorter_than_significant() {
        // For a record with a quiet head, sorting concentrates the energy
        let mut acc = vec![1.0; 6000];
        for (i, a) in acc.iter_mut().enumerate().skip(3000) {
            *a = 80.0 * ((i as f64) * 0.13).sin();
        }
        let sig = significant_duration(&acc, 0.01, 5.0, 75.0).unwrap();
        let srt = sorted_duration(&acc, 0.01, 5.0, 75.0).unwrap();
        assert!(srt <= sig, "sorted {srt} vs significant {sig}");
        assert!(srt > 0.0);
    }
}
