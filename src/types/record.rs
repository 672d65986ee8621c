// Record types produced by the acquisition and processing paths
//
// A raw record borrowed from the vendor library is transformed into a
// time-domain record (§ sample conversion), a frequency-domain record
// (filled in by the spectral analysis) and a waterfall of recent spectra.
// The bundle of all three is a processed record, shared by reference with
// every consumer. Sensor records hold the slowly growing series produced by
// the controller's polling loop.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::types::value::{Properties, Value, ValueWithStatistics};
use crate::vendor::types::{AnalogFrontendParametersChannel, DataFormat, RawRecord, RecordHeader};

const PRECISION: &str = "8.2";
const PRECISION_UNCONVERTED: &str = "8.0";
const PRECISION_FREQUENCY_DOMAIN: &str = "7.2";

/// Rolling statistics over the time-domain metrics of consecutive records.
#[derive(Debug, Clone, Default)]
pub struct TimeDomainMetrics {
    pub max: ValueWithStatistics,
    pub min: ValueWithStatistics,
    pub mean: ValueWithStatistics,
    pub sdev: ValueWithStatistics,
}

impl TimeDomainMetrics {
    pub fn new(properties: &Properties) -> Self {
        Self {
            max: ValueWithStatistics::new(properties.clone()),
            min: ValueWithStatistics::new(properties.clone()),
            mean: ValueWithStatistics::new(properties.clone()),
            sdev: ValueWithStatistics::new(properties.clone()),
        }
    }

    pub fn clear(&mut self) {
        self.max.clear();
        self.min.clear();
        self.mean.clear();
        self.sdev.clear();
    }
}

/// A time-domain record: sample axes plus a copy of the authoritative
/// header. The y axis is in Volts when vertical conversion is enabled,
/// otherwise raw ADC codes; the x axis is in seconds when horizontal
/// conversion is enabled, otherwise the sample index.
#[derive(Debug, Clone)]
pub struct TimeDomainRecord {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub x_properties: Properties,
    pub y_properties: Properties,
    pub step: f64,
    pub header: RecordHeader,
    pub metrics: TimeDomainMetrics,
    pub sampling_frequency: Value,
    pub sampling_period: Value,
    pub range_max: Value,
    pub range_min: Value,
    pub range_mid: Value,
}

impl TimeDomainRecord {
    /// Transform a raw record. `code_normalization` is the full-scale code
    /// range, already multiplied by the accumulation count where that
    /// applies. Fails with `Internal` on an unsupported data format; the
    /// caller skips the record and carries on.
    pub fn new(
        raw: &RawRecord,
        afe: &AnalogFrontendParametersChannel,
        code_normalization: f64,
        convert_horizontal: bool,
        convert_vertical: bool,
    ) -> CoreResult<Self> {
        let x_properties = if convert_horizontal {
            Properties::new("s", PRECISION, 1e-3, 1e-12).with_inverse_delta_unit("Hz")
        } else {
            Properties::new("S", PRECISION_UNCONVERTED, 1.0, 1.0)
        };
        let y_properties = if convert_vertical {
            Properties::new("V", PRECISION, 1e-3, 1e-12)
        } else {
            Properties::new("", PRECISION_UNCONVERTED, 1.0, 1.0)
        };

        /* The time unit is specified in picoseconds at most. Information
           beyond that point is truncated. */
        let time_unit_ps = (raw.header.time_unit * 1e12) as i64;
        let time_unit = time_unit_ps as f64 * 1e-12;

        let sampling_period_value = raw.header.sampling_period as f64 * time_unit;
        let sampling_frequency_value = (1.0 / sampling_period_value).round();

        let (step, record_start) = if convert_horizontal {
            (
                sampling_period_value,
                raw.header.record_start as f64 * time_unit,
            )
        } else {
            /* The first sample always lands at zero to keep the horizontal
               grid in sync with the sampling grid. */
            (1.0, 0.0)
        };

        let (range_max, range_min) = if convert_vertical {
            (
                (afe.input_range / 2.0 - afe.dc_offset) / 1e3,
                (-afe.input_range / 2.0 - afe.dc_offset) / 1e3,
            )
        } else {
            (code_normalization / 2.0 - 1.0, -(code_normalization / 2.0))
        };
        let range_mid = (range_max + range_min) / 2.0;

        let length = raw.header.record_length as usize;
        let samples = decode_samples(raw, length)?;

        let mut x = Vec::with_capacity(length);
        let mut y = Vec::with_capacity(length);
        for (k, code) in samples.into_iter().enumerate() {
            x.push(record_start + k as f64 * step);
            if convert_vertical {
                let volts = code / (code_normalization / 2.0) * afe.input_range - afe.dc_offset;
                /* The value is in millivolts before this scaling. */
                y.push(volts / 1e3);
            } else {
                y.push(code);
            }
        }

        let range_max = Value::new(range_max, y_properties.clone());
        let range_min = Value::new(range_min, y_properties.clone());
        let range_mid = Value::new(range_mid, y_properties.clone());

        Ok(Self {
            x,
            y,
            metrics: TimeDomainMetrics::new(&y_properties),
            x_properties,
            y_properties,
            step,
            header: raw.header.clone(),
            sampling_frequency: Value::new(
                sampling_frequency_value,
                Properties::new("Hz", PRECISION, 1e9, 1e-12),
            ),
            sampling_period: Value::new(
                sampling_period_value,
                Properties::new("s", PRECISION, 1e-3, 1e-12),
            ),
            range_max,
            range_min,
            range_mid,
        })
    }

    pub fn value_x(&self, value: f64) -> Value {
        Value::new(value, self.x_properties.clone())
    }

    pub fn value_y(&self, value: f64) -> Value {
        Value::new(value, self.y_properties.clone())
    }

    /// Compute min/max/mean/standard deviation over the y axis and record
    /// them into the rolling metrics.
    pub fn analyze(&mut self) {
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut mean = 0.0;
        for &y in &self.y {
            min = min.min(y);
            max = max.max(y);
            mean += y;
        }
        mean /= self.y.len() as f64;

        let mut sdev = 0.0;
        for &y in &self.y {
            let diff = y - mean;
            sdev += diff * diff;
        }
        sdev = (sdev / self.y.len() as f64).sqrt();

        self.metrics.max.record(max);
        self.metrics.min.record(min);
        self.metrics.mean.record(mean);
        self.metrics.sdev.record(sdev);
    }
}

/// Decode `length` samples from the raw buffer per the header's data
/// format. The header is authoritative; a short buffer or an unknown format
/// is an `Internal` error for this record only.
pub fn decode_samples(raw: &RawRecord, length: usize) -> CoreResult<Vec<f64>> {
    let format = DataFormat::from_wire(raw.header.data_format).ok_or_else(|| {
        CoreError::internal(format!(
            "unknown data format '{}' when transforming record {}",
            raw.header.data_format, raw.header.record_number
        ))
    })?;

    let needed = length * format.bytes_per_sample();
    if raw.data.len() < needed {
        return Err(CoreError::internal(format!(
            "record {} holds {} bytes but the header claims {}",
            raw.header.record_number,
            raw.data.len(),
            needed
        )));
    }

    let samples = match format {
        DataFormat::Int16 => raw.data[..needed]
            .chunks_exact(2)
            .map(|bytes| i16::from_ne_bytes([bytes[0], bytes[1]]) as f64)
            .collect(),
        DataFormat::Int32 => raw.data[..needed]
            .chunks_exact(4)
            .map(|bytes| i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64)
            .collect(),
    };
    Ok(samples)
}

/// A real spectrum of `N/2 + 1` bins in dBFS, together with the identified
/// tones and the scalar metrics derived from them.
#[derive(Debug, Clone)]
pub struct FrequencyDomainRecord {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub x_properties: Properties,
    pub y_properties: Properties,
    /// Bin width in hertz.
    pub step: f64,
    pub fundamental: (Value, Value),
    pub spur: (Value, Value),
    pub harmonics: Vec<(Value, Value)>,
    pub gain_phase_spur: (Value, Value),
    pub offset_spur: (Value, Value),
    pub snr: Value,
    pub sinad: Value,
    pub enob: Value,
    pub sfdr_dbc: Value,
    pub sfdr_dbfs: Value,
    pub thd: Value,
    pub npsd: Value,
    pub noise_moving_average: Value,
    pub size: Value,
    pub rbw: Value,
    pub scale_factor: f64,
    pub energy_factor: f64,
    /// Tones shared bins; the affected metrics are not trustworthy.
    pub overlap: bool,
}

impl FrequencyDomainRecord {
    pub fn new(count: usize) -> Self {
        let x_properties = Properties::new("Hz", PRECISION_FREQUENCY_DOMAIN, 1e6, 1.0);
        let y_properties =
            Properties::new("dBFS", PRECISION_FREQUENCY_DOMAIN, 1.0, 1.0).with_delta_unit("dB");
        let db = |unit: &str| Properties::new(unit, PRECISION_FREQUENCY_DOMAIN, 1.0, 1.0);
        let tone = || {
            (
                Value::new(0.0, x_properties.clone()),
                Value::new(0.0, y_properties.clone()),
            )
        };

        Self {
            x: vec![0.0; count],
            y: vec![0.0; count],
            fundamental: tone(),
            spur: tone(),
            harmonics: Vec::new(),
            gain_phase_spur: tone(),
            offset_spur: tone(),
            snr: Value::new(0.0, db("dB")),
            sinad: Value::new(0.0, db("dB")),
            enob: Value::new(0.0, db("bits")),
            sfdr_dbc: Value::new(0.0, db("dBc")),
            sfdr_dbfs: Value::new(0.0, db("dBFS")),
            thd: Value::new(0.0, db("dB")),
            npsd: Value::new(0.0, db("dBFS/Hz")),
            noise_moving_average: Value::new(0.0, db("dBFS")),
            size: Value::new(0.0, Properties::new("pts", "7.0", 1.0, 1.0)),
            rbw: Value::new(0.0, Properties::new("Hz", PRECISION_FREQUENCY_DOMAIN, 1e6, 1.0)),
            step: 0.0,
            scale_factor: 1.0,
            energy_factor: 1.0,
            overlap: false,
            x_properties,
            y_properties,
        }
    }

    pub fn value_x(&self, value: f64) -> Value {
        Value::new(value, self.x_properties.clone())
    }

    pub fn value_y(&self, value: f64) -> Value {
        Value::new(value, self.y_properties.clone())
    }

    /// Mark the noise-derived metrics as untrustworthy, e.g. after an
    /// overlap between tones.
    pub fn invalidate_noise_metrics(&mut self) {
        self.snr.valid = false;
        self.sinad.valid = false;
        self.enob.valid = false;
        self.sfdr_dbc.valid = false;
        self.sfdr_dbfs.valid = false;
        self.thd.valid = false;
        self.npsd.valid = false;
        self.noise_moving_average.valid = false;
    }
}

/// Row-major concatenation of the most recent spectra. Rows with mismatched
/// lengths yield an empty waterfall rather than a corrupted one.
#[derive(Debug, Clone, Default)]
pub struct Waterfall {
    pub data: Vec<f64>,
    pub rows: usize,
    pub columns: usize,
}

impl Waterfall {
    pub fn new(records: &VecDeque<Arc<FrequencyDomainRecord>>) -> Self {
        let Some(front) = records.front() else {
            return Self::default();
        };

        let columns = front.x.len();
        if records.iter().any(|record| record.x.len() != columns) {
            return Self::default();
        }

        let mut data = Vec::with_capacity(records.len() * columns);
        for record in records {
            data.extend_from_slice(&record.y);
        }

        Self {
            data,
            rows: records.len(),
            columns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The most recent time-domain traces, newest first, kept for persistence
/// display.
#[derive(Debug, Clone, Default)]
pub struct Persistence {
    pub traces: Vec<Arc<TimeDomainRecord>>,
}

impl Persistence {
    pub fn new(records: &VecDeque<Arc<TimeDomainRecord>>) -> Self {
        Self {
            traces: records.iter().cloned().collect(),
        }
    }
}

/// The bundle emitted by a DSP pipeline for one raw record.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub label: String,
    pub time_domain: Option<Arc<TimeDomainRecord>>,
    pub frequency_domain: Option<Arc<FrequencyDomainRecord>>,
    pub waterfall: Option<Arc<Waterfall>>,
    pub persistence: Option<Arc<Persistence>>,
    pub trigger_frequency: Value,
    pub throughput: Value,
}

impl ProcessedRecord {
    pub fn new(label: &str, trigger_frequency: f64, throughput: f64) -> Self {
        Self {
            label: label.to_string(),
            time_domain: None,
            frequency_domain: None,
            waterfall: None,
            persistence: None,
            trigger_frequency: Value::new(trigger_frequency, Properties::new("Hz", PRECISION, 1e6, 1e-12)),
            throughput: Value::new(throughput, Properties::new("B/s", PRECISION, 1e6, 1e-12)),
        }
    }
}

/// One sensor's measurement series. The series grows monotonically at the
/// polling cadence and is capped at ten hours of one-hertz data.
#[derive(Debug, Clone)]
pub struct SensorRecord {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub x_properties: Properties,
    pub y_properties: Properties,
    /// Sampling step in seconds.
    pub step: f64,
    pub status: i32,
    pub id: u32,
    pub group_id: u32,
    pub note: String,
}

impl SensorRecord {
    /* Ten hours at a one-hertz sampling rate; roughly half a megabyte per
       sensor at the maximum. */
    pub const MAX_POINTS: usize = 36_000;

    pub fn new(id: u32, group_id: u32, unit: &str) -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            x_properties: Properties::new("s", "8.2", 1.0, 1.0),
            y_properties: Properties::new(unit, "8.2", 1e12, 1e-12),
            step: 0.0,
            status: -1,
            id,
            group_id,
            note: String::new(),
        }
    }

    /// Append one measurement. The x coordinate continues from the previous
    /// point, or starts at `epoch_origin` for an empty series. The oldest
    /// point is evicted once the cap is reached.
    pub fn append(&mut self, value: f64, epoch_origin: f64) {
        if self.x.len() >= Self::MAX_POINTS {
            self.x.remove(0);
            self.y.remove(0);
        }

        let last = self.x.last().copied().unwrap_or(epoch_origin);
        self.x.push(last + self.step);
        self.y.push(value);
    }
}
