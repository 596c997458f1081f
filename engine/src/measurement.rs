//! Measurement chaining.
//!
//! A measurement is a rolling SHA-256 fold: each state-affecting operation
//! extends the prior value with new material, so the final digest is a
//! function solely of the ordered inputs. Two instances fed identical
//! material in identical order converge to the same measurement; any
//! reordering or tampering diverges.

use sha2::{Digest, Sha256};
use tee_lab_common::Measurement;

const CHAIN_DOMAIN: &[u8] = b"tee-lab/measurement/v1";

/// One-way, order-sensitive measurement fold.
pub struct MeasurementChain;

impl MeasurementChain {
    /// Fixed base value used before any material is folded in.
    pub fn initial() -> Measurement {
        let mut hasher = Sha256::new();
        hasher.update(CHAIN_DOMAIN);
        Measurement::from_bytes(hasher.finalize().into())
    }

    /// Fold `material` into `prior`, producing the next measurement.
    pub fn extend(prior: &Measurement, material: &[u8]) -> Measurement {
        let mut hasher = Sha256::new();
        hasher.update(prior.as_bytes());
        hasher.update(material);
        Measurement::from_bytes(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_is_stable() {
        assert_eq!(MeasurementChain::initial(), MeasurementChain::initial());
    }

    #[test]
    fn extend_is_deterministic() {
        let base = MeasurementChain::initial();
        assert_eq!(
            MeasurementChain::extend(&base, b"page-1"),
            MeasurementChain::extend(&base, b"page-1")
        );
    }

    #[test]
    fn extend_is_sensitive_to_material() {
        let base = MeasurementChain::initial();
        assert_ne!(
            MeasurementChain::extend(&base, b"page-1"),
            MeasurementChain::extend(&base, b"page-2")
        );
        assert_ne!(MeasurementChain::extend(&base, b""), base);
    }

    #[test]
    fn extend_is_order_sensitive() {
        let base = MeasurementChain::initial();
        let ab = MeasurementChain::extend(&MeasurementChain::extend(&base, b"a"), b"b");
        let ba = MeasurementChain::extend(&MeasurementChain::extend(&base, b"b"), b"a");
        assert_ne!(ab, ba);
    }

    #[test]
    fn replay_converges() {
        let inputs: Vec<&[u8]> = vec![b"code", b"page-0", b"page-1", b"counter:3"];
        let run = |inputs: &[&[u8]]| {
            inputs
                .iter()
                .fold(MeasurementChain::initial(), |m, material| {
                    MeasurementChain::extend(&m, material)
                })
        };
        assert_eq!(run(&inputs), run(&inputs));
    }
}
