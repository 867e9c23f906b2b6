use crate::compartment_model;

compartment_model! {
    /// SIR-style epidemic model with an exposed class fed by infected
    /// individuals, constant recruitment into `S` and natural mortality `n`.
    pub fn sir() -> "sir" (_t) {
        constants {
            b = 100.0,
            bd = 0.01,
            be = 0.01,
            c = 1.0,
            g = 6.0,
            n = 0.1,
            p = 0.1,
        }
        variables {
            E = 0.0 => p * I - c * E,
            I = 1.0 => bd * S * I + be * S * E - g * I - n * I,
            R = 0.0 => g * I - n * R,
            S = 1000.0 => b - bd * S * I - be * S * E - n * S,
        }
    }
}
