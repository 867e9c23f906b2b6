use crate::compartment_model;
use crate::functions::inhibition;

compartment_model! {
    /// Tissue damage driven immune response with regulatory macrophages.
    ///
    /// Anti-inflammatory cytokines (`AC`) inhibit both neutrophil recruitment
    /// and cytokine production through a saturating inhibition term.
    pub fn immune_regulation() -> "immune_regulation" (_t) {
        constants {
            alpha = 0.5,
            beta_AC = 0.5,
            beta_N = 0.6,
            beta_ch = 0.5,
            gamma = 0.2,
            k = 0.15,
            m_AC = 0.3,
            m_N = 0.3,
            m_ch = 0.4,
            m_mreg = 0.02,
            s_N = 0.5,
        }
        variables {
            AC = 0.0 => beta_AC * Mreg - AC * m_AC,
            CH = 0.0 => inhibition(beta_ch * N, alpha, AC)? - m_ch * CH,
            Mreg = 0.0 => gamma * N - m_mreg * Mreg,
            N = 0.0 => -(beta_N * N) - m_N * N + inhibition(s_N * (TD + CH), alpha, AC)?,
            TD = 10.0 => beta_N * N - TD * Mreg * k,
        }
    }
}
