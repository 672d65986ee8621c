// Runtime processing parameters
//
// These are the user-tunable knobs of a DSP pipeline. They travel as
// messages from the controller to every pipeline and serialize to JSON so a
// frontend can persist them between sessions.

use serde::{Deserialize, Serialize};

use crate::window::WindowKind;

/// Scaling applied to the plotted spectrum. The spectral analysis itself
/// always works on energy-accurate values regardless of this choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyDomainScaling {
    Amplitude,
    Energy,
}

impl FrequencyDomainScaling {
    pub fn label(&self) -> &'static str {
        match self {
            FrequencyDomainScaling::Amplitude => "Amplitude",
            FrequencyDomainScaling::Energy => "Energy",
        }
    }
}

/// Processing parameters of one DSP pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DspParameters {
    pub window_kind: WindowKind,
    pub fft_scaling: FrequencyDomainScaling,
    /// Half-width of a tone's skirt in bins.
    pub nof_skirt_bins: usize,
    pub nof_fft_averages: usize,
    /// Pin the fundamental to this frequency when positive and at most the
    /// Nyquist frequency; otherwise the analysis finds the fundamental.
    pub fundamental_frequency: f64,
    pub convert_horizontal: bool,
    pub convert_vertical: bool,
    /// Compute ENOB against full scale instead of the carrier.
    pub fullscale_enob: bool,
    pub fft_maximum_hold: bool,
}

impl Default for DspParameters {
    fn default() -> Self {
        Self {
            window_kind: WindowKind::FlatTop,
            fft_scaling: FrequencyDomainScaling::Amplitude,
            nof_skirt_bins: 5,
            nof_fft_averages: 1,
            fundamental_frequency: -1.0,
            convert_horizontal: true,
            convert_vertical: true,
            fullscale_enob: true,
            fft_maximum_hold: false,
        }
    }
}
