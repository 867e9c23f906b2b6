use crate::compartment_model;
use crate::functions::limited_growth;

compartment_model! {
    /// Two species competing for a shared resource. Each grows at its own
    /// rate, limited by weighted crowding from both populations.
    pub fn competition() -> "competition" (_t) {
        constants {
            r1 = 0.5,
            r2 = 0.4,
            w11 = 0.01,
            w12 = 0.005,
            w21 = 0.004,
            w22 = 0.008,
        }
        variables {
            N1 = 10.0 => r1 * N1 * limited_growth(N1, N2, w11, w12),
            N2 = 10.0 => r2 * N2 * limited_growth(N2, N1, w22, w21),
        }
    }
}
