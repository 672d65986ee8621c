// Tone model, frequency folding and overlap resolution
//
// A tone is a spectral feature with a skirt of bins around its center. The
// fundamental and worst spur come out of the spectrum pass; harmonics and
// interleaving spurs are placed at computed frequencies and their skirts are
// read back from the (dB-scaled) spectrum. Overlapping tones must not count
// a bin's energy twice: signal energy takes precedence over distortion
// energy, and lower-index harmonics over higher.

use crate::types::record::FrequencyDomainRecord;

/// A tone and the bins attributed to it. `values` holds the energy-accurate
/// per-bin powers; a zeroed entry marks a bin lost to overlap resolution.
#[derive(Debug, Clone, Default)]
pub struct Tone {
    pub power: f64,
    pub frequency: f64,
    pub idx: usize,
    pub idx_fraction: f64,
    pub idx_low: usize,
    pub idx_high: usize,
    pub values: Vec<f64>,
}

impl Tone {
    /// Construct a tone at `frequency` by reading its skirt back from an
    /// analyzed spectrum. The spectrum's values are in decibels full scale,
    /// so the conversion is reversed for the skirt bins; this is cheaper
    /// than carrying a linear copy of the full spectrum around.
    pub fn from_spectrum(
        record: &FrequencyDomainRecord,
        frequency: f64,
        nof_skirt_bins: usize,
    ) -> Self {
        let bin_range = record.step;
        let center = (frequency / bin_range + 0.5) as i64;

        let idx_low = (center - nof_skirt_bins as i64).max(0) as usize;
        let idx_high = ((center + nof_skirt_bins as i64) as usize).min(record.x.len() - 1);

        let mut values = Vec::with_capacity(idx_high - idx_low + 1);
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in idx_low..=idx_high {
            let bin_power =
                10.0_f64.powf(record.y[i] / 10.0) / record.scale_factor * record.energy_factor;
            numerator += (i - idx_low) as f64 * bin_power;
            denominator += bin_power;
            values.push(bin_power);
        }

        let center_of_mass = idx_low as f64 + numerator / denominator;
        let idx = (center_of_mass + 0.5) as usize;

        Self {
            /* Overlaps are not accounted for here; the caller resolves them
               and recomputes the power. */
            power: denominator,
            frequency: bin_range * center_of_mass,
            idx,
            idx_fraction: center_of_mass - idx as f64,
            idx_low,
            idx_high,
            values,
        }
    }

    /// Recompute the power as the sum of the (possibly zeroed) values.
    pub fn update_power(&mut self) -> f64 {
        self.power = self.values.iter().sum();
        self.power
    }

    pub fn power_in_decibels(&self) -> f64 {
        10.0 * self.power.log10()
    }

    /// Number of bins still contributing energy.
    pub fn bins(&self) -> usize {
        self.values.iter().filter(|&&v| v != 0.0).count()
    }
}

/// Reflect `f` into the first Nyquist zone of `fs`.
pub fn fold_frequency(f: f64, fs: f64) -> f64 {
    let mut result = f;
    while result > fs / 2.0 {
        if result > fs {
            result -= fs;
        } else {
            result = fs - result;
        }
    }
    result
}

/// Zero the bins of `tone` that fall inside `other`'s skirt. Only `tone`
/// loses energy; `other` keeps the contested bins. Raises the shared overlap
/// flag when anything was zeroed.
pub fn resolve_overlap(tone: &mut Tone, other: &Tone, overlap: &mut bool) {
    if tone.idx_low >= other.idx_low && tone.idx_low <= other.idx_high {
        let count = (other.idx_high - tone.idx_low + 1).min(tone.values.len());
        for value in &mut tone.values[..count] {
            *value = 0.0;
        }
        *overlap = true;
    } else if tone.idx_high <= other.idx_high && tone.idx_high >= other.idx_low {
        let start = other.idx_low - tone.idx_low;
        for value in &mut tone.values[start..] {
            *value = 0.0;
        }
        *overlap = true;
    }
}
