#![forbid(unsafe_code)]

use super::*;
use dm_core::bitmask::MAX_IDENTIFIERS;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoiseConfig {
    /// Chance that any single bit position of a mask is flipped.
    pub flip_probability: f64,
    /// Fixed seed for reproducible runs; `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl NoiseConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if !(0.0..=1.0).contains(&self.flip_probability) {
            return Err(StoreError::InvalidNoise {
                probability: self.flip_probability,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NoiseReport {
    pub records: Vec<PublicationRecord>,
    pub flipped_bits: u64,
}

/// Flips each of the 64 bit positions of every record's mask independently.
/// Records keep their order; ids and payloads are untouched.
pub fn inject_noise(
    records: Vec<PublicationRecord>,
    config: &NoiseConfig,
) -> Result<NoiseReport, StoreError> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut flipped_bits = 0u64;
    let mut out = Vec::with_capacity(records.len());
    for mut record in records {
        let mut mask = record.mask()?;
        for id in 0..MAX_IDENTIFIERS {
            if rng.random_bool(config.flip_probability) {
                mask = mask.toggled(id).map_err(|source| StoreError::Bitmask {
                    publication_id: record.publication_id,
                    source,
                })?;
                flipped_bits += 1;
            }
        }
        record.matched_subscriptions = mask.ids().into_iter().collect();
        out.push(record);
    }

    info!(
        records = out.len(),
        flipped_bits,
        probability = config.flip_probability,
        "noise injected"
    );
    Ok(NoiseReport {
        records: out,
        flipped_bits,
    })
}

