// Memoized window functions
//
// Windows are pure functions of (kind, length), so one process-wide cache
// serves every pipeline. Entries are write-once: a window handed out is
// shared and never mutated, and two lookups with the same key return handles
// to the same samples. The amplitude and energy factors are precomputed at
// insertion; spectral scaling multiplies by these values.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Window function selection. `None` is the unit window: no weighting and
/// unit scale factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    None,
    Hamming,
    BlackmanHarris,
    FlatTop,
    Hanning,
}

impl WindowKind {
    pub fn label(&self) -> &'static str {
        match self {
            WindowKind::None => "No window",
            WindowKind::Hamming => "Hamming",
            WindowKind::BlackmanHarris => "Blackman-Harris",
            WindowKind::FlatTop => "Flat top",
            WindowKind::Hanning => "Hanning",
        }
    }
}

/// A precomputed window of a specific length.
#[derive(Debug, Clone)]
pub struct Window {
    pub kind: WindowKind,
    pub data: Vec<f64>,
    /// Scales an FFT to amplitude accuracy: `(L / Σw)²`.
    pub amplitude_factor: f64,
    /// Scales an FFT to energy accuracy: `L / Σw²`.
    pub energy_factor: f64,
    /// Converts an amplitude-scaled spectrum into an energy-scaled one.
    pub amplitude_to_energy: f64,
}

impl Window {
    fn new(kind: WindowKind, length: usize, f: fn(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(length);
        let mut sum = 0.0;
        let mut sum_squared = 0.0;

        for i in 0..length {
            let value = f(i, length);
            data.push(value);
            sum += value;
            sum_squared += value * value;
        }

        let amplitude_factor = (length as f64 / sum).powi(2);
        let energy_factor = length as f64 / sum_squared;

        Self {
            kind,
            data,
            amplitude_factor,
            energy_factor,
            amplitude_to_energy: energy_factor / amplitude_factor,
        }
    }
}

fn hamming(i: usize, length: usize) -> f64 {
    (25.0 / 46.0) * (1.0 - (2.0 * PI * i as f64 / length as f64).cos())
}

fn blackman_harris(i: usize, length: usize) -> f64 {
    let phase = 2.0 * PI * i as f64 / length as f64;
    0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
        - 0.01168 * (3.0 * phase).cos()
}

fn hanning(i: usize, length: usize) -> f64 {
    0.5 * (1.0 - (2.0 * PI * i as f64 / length as f64).cos())
}

fn flat_top(i: usize, length: usize) -> f64 {
    let phase = 2.0 * PI * i as f64 / length as f64;
    0.21557895 - 0.416631580 * phase.cos() + 0.277263158 * (2.0 * phase).cos()
        - 0.083578947 * (3.0 * phase).cos()
        + 0.006947368 * (4.0 * phase).cos()
}

/// The process-wide window cache.
pub struct WindowCache {
    windows: Mutex<HashMap<(WindowKind, usize), Arc<Window>>>,
}

static CACHE: Lazy<WindowCache> = Lazy::new(|| WindowCache {
    windows: Mutex::new(HashMap::new()),
});

impl WindowCache {
    /// Look up (or compute and insert) the window of the given kind and
    /// length. `WindowKind::None` yields no window.
    pub fn get(kind: WindowKind, length: usize) -> Option<Arc<Window>> {
        let f: fn(usize, usize) -> f64 = match kind {
            WindowKind::None => return None,
            WindowKind::Hamming => hamming,
            WindowKind::BlackmanHarris => blackman_harris,
            WindowKind::FlatTop => flat_top,
            WindowKind::Hanning => hanning,
        };

        let mut windows = CACHE.windows.lock().unwrap();
        let window = windows
            .entry((kind, length))
            .or_insert_with(|| Arc::new(Window::new(kind, length, f)));
        Some(Arc::clone(window))
    }
}
