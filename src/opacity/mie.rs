//! Mie scattering by homogeneous spheres (Bohren & Huffman series).
use num_complex::Complex64;

#[derive(Debug, Clone)]
pub struct MieEfficiencies {
    pub qext: f64,
    pub qsca: f64,
    /// Asymmetry parameter <cos θ>.
    pub g: f64,
    /// Amplitude functions at each requested angle.
    pub s1: Vec<Complex64>,
    pub s2: Vec<Complex64>,
}

impl MieEfficiencies {
    pub fn qabs(&self) -> f64 {
        (self.qext - self.qsca).max(0.0)
    }
}

/// Solve for size parameter `x = 2πa/λ` and relative refractive index
/// `m = n + ik`. `cos_angles` may be empty when only efficiencies are needed.
pub fn solve(x: f64, m: Complex64, cos_angles: &[f64]) -> MieEfficiencies {
    let nstop = (x + 4.0 * x.cbrt() + 2.0).floor() as usize;
    let y = m * x;
    let nmx = (nstop as f64).max(y.norm()).floor() as usize + 15;

    // Logarithmic derivative D_n(mx) by downward recurrence.
    let mut d = vec![Complex64::new(0.0, 0.0); nmx + 1];
    for n in (1..=nmx).rev() {
        let en = n as f64 / y;
        d[n - 1] = en - 1.0 / (d[n] + en);
    }

    let nang = cos_angles.len();
    let mut s1 = vec![Complex64::new(0.0, 0.0); nang];
    let mut s2 = vec![Complex64::new(0.0, 0.0); nang];
    let mut pi_prev = vec![0.0; nang];
    let mut pi_curr = vec![1.0; nang];

    let mut psi0 = x.cos();
    let mut psi1 = x.sin();
    let mut chi0 = -x.sin();
    let mut chi1 = x.cos();
    let mut xi1 = Complex64::new(psi1, -chi1);

    let mut qsca = 0.0;
    let mut qext = 0.0;
    let mut gsca = 0.0;
    let mut an_prev = Complex64::new(0.0, 0.0);
    let mut bn_prev = Complex64::new(0.0, 0.0);

    for (n, &dn) in (1..=nstop).zip(&d[1..]) {
        let nf = n as f64;
        let psi = (2.0 * nf - 1.0) * psi1 / x - psi0;
        let chi = (2.0 * nf - 1.0) * chi1 / x - chi0;
        let xi = Complex64::new(psi, -chi);

        let da = dn / m + nf / x;
        let db = dn * m + nf / x;
        let an = (da * psi - psi1) / (da * xi - xi1);
        let bn = (db * psi - psi1) / (db * xi - xi1);

        qsca += (2.0 * nf + 1.0) * (an.norm_sqr() + bn.norm_sqr());
        qext += (2.0 * nf + 1.0) * (an.re + bn.re);
        gsca += ((2.0 * nf + 1.0) / (nf * (nf + 1.0))) * (an * bn.conj()).re;
        if n > 1 {
            gsca += ((nf - 1.0) * (nf + 1.0) / nf)
                * (an_prev * an.conj() + bn_prev * bn.conj()).re;
        }

        let fn_ = (2.0 * nf + 1.0) / (nf * (nf + 1.0));
        for (j, &mu) in cos_angles.iter().enumerate() {
            let pi = pi_curr[j];
            let tau = nf * mu * pi - (nf + 1.0) * pi_prev[j];
            s1[j] += fn_ * (an * pi + bn * tau);
            s2[j] += fn_ * (an * tau + bn * pi);
            let pi_next = ((2.0 * nf + 1.0) * mu * pi - (nf + 1.0) * pi_prev[j]) / nf;
            pi_prev[j] = pi;
            pi_curr[j] = pi_next;
        }

        an_prev = an;
        bn_prev = bn;
        psi0 = psi1;
        psi1 = psi;
        chi0 = chi1;
        chi1 = chi;
        xi1 = Complex64::new(psi1, -chi1);
    }

    let norm = 2.0 / (x * x);
    let qsca = norm * qsca;
    let qext = norm * qext;
    let g = if qsca > 0.0 {
        2.0 * norm * gsca / qsca
    } else {
        0.0
    };

    MieEfficiencies {
        qext,
        qsca,
        g,
        s1,
        s2,
    }
}

/// Mueller elements `[S11, S12, S22, S33, S34, S44]` from the amplitudes.
pub fn mueller(s1: Complex64, s2: Complex64) -> [f64; 6] {
    let s11 = 0.5 * (s2.norm_sqr() + s1.norm_sqr());
    let s12 = 0.5 * (s2.norm_sqr() - s1.norm_sqr());
    let cross = s2 * s1.conj();
    let s33 = cross.re;
    let s34 = cross.im;
    [s11, s12, s11, s33, s34, s33]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_absorbing_sphere_has_no_absorption() {
        let result = solve(1.0, Complex64::new(1.5, 0.0), &[]);
        assert!(result.qabs() < 1e-10, "qabs = {}", result.qabs());
        assert!((result.qext - result.qsca).abs() < 1e-10);
    }

    #[test]
    fn large_spheres_approach_extinction_paradox() {
        let result = solve(2000.0, Complex64::new(1.5, 0.1), &[]);
        assert!((result.qext - 2.0).abs() < 0.05, "qext = {}", result.qext);
    }

    #[test]
    fn small_spheres_follow_rayleigh_limit() {
        let x: f64 = 1e-3;
        let m = Complex64::new(1.5, 0.0);
        let result = solve(x, m, &[]);
        let lorentz = (m * m - 1.0) / (m * m + 2.0);
        let expected = 8.0 / 3.0 * x.powi(4) * lorentz.norm_sqr();
        assert!((result.qsca / expected - 1.0).abs() < 1e-3);
        assert!(result.g.abs() < 1e-3);
    }

    #[test]
    fn forward_amplitudes_match_extinction() {
        let x = 3.0;
        let result = solve(x, Complex64::new(1.33, 0.01), &[1.0, -1.0]);
        // Optical theorem: Qext = 4/x^2 Re S(0).
        let qext = 4.0 / (x * x) * result.s1[0].re;
        assert!((qext - result.qext).abs() < 1e-8);
        assert!((result.s1[0] - result.s2[0]).norm() < 1e-10);
    }
}
