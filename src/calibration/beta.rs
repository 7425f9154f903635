//! Beta-distribution numerics.
//!
//! The credible-interval computation needs the regularized incomplete beta
//! function and its inverse. Implemented with the standard Lanczos ln-gamma
//! and Lentz continued-fraction forms; the inverse is a bisection on the CDF,
//! which is monotonic on (0, 1).

/// Natural log of the gamma function (Lanczos approximation, g=7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula for the left half-plane.
        return std::f64::consts::PI.ln()
            - (std::f64::consts::PI * x).sin().ln()
            - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Regularized incomplete beta function I_x(a, b).
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges fastest when x < (a+1)/(a+b+2).
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz evaluation of the incomplete-beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-30;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Beta CDF: P(X <= x) for X ~ Beta(alpha, beta).
pub fn beta_cdf(alpha: f64, beta: f64, x: f64) -> f64 {
    incomplete_beta(alpha, beta, x.clamp(0.0, 1.0))
}

/// Beta quantile function: the x with `beta_cdf(alpha, beta, x) == p`.
pub fn beta_ppf(alpha: f64, beta: f64, p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if beta_cdf(alpha, beta, mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_gamma_known_values() {
        // Gamma(n) = (n-1)!
        assert!((ln_gamma(1.0) - 0.0).abs() < 1e-10);
        assert!((ln_gamma(2.0) - 0.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-9);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_cdf_is_identity() {
        // Beta(1,1) is uniform on [0,1].
        for x in [0.1, 0.25, 0.5, 0.9] {
            assert!((beta_cdf(1.0, 1.0, x) - x).abs() < 1e-10);
        }
    }

    #[test]
    fn test_cdf_symmetric_case() {
        // Beta(2,2) median is 0.5.
        assert!((beta_cdf(2.0, 2.0, 0.5) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_ppf_inverts_cdf() {
        for (a, b) in [(1.0, 1.0), (2.0, 5.0), (9.0, 3.0), (0.5, 0.5)] {
            for p in [0.025, 0.25, 0.5, 0.75, 0.975] {
                let x = beta_ppf(a, b, p);
                assert!(
                    (beta_cdf(a, b, x) - p).abs() < 1e-8,
                    "ppf/cdf mismatch at a={a} b={b} p={p}"
                );
            }
        }
    }

    #[test]
    fn test_ppf_bounds() {
        assert_eq!(beta_ppf(2.0, 3.0, 0.0), 0.0);
        assert_eq!(beta_ppf(2.0, 3.0, 1.0), 1.0);
        let lo = beta_ppf(2.0, 1.0, 0.025);
        let hi = beta_ppf(2.0, 1.0, 0.975);
        assert!(lo < hi);
        assert!(lo > 0.0 && hi < 1.0);
    }
}
