// Per-channel DSP pipeline
//
// A buffer worker that pulls raw records from the vendor library, transforms
// them to Volts, runs a windowed FFT and a single-pass spectral analysis,
// and emits processed records on a bounded outbound queue.
//
// Contract with upstream: timeouts from the vendor wait are not errors; any
// negative code is fatal, reported once, and exits the loop. Contract with
// downstream: at most one processed record per raw record, and when the
// outbound queue is full the raw record goes straight back to the vendor
// library instead of queueing behind the consumer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rustfft::{num_complex::Complex, FftPlanner};

use crate::dsp::average::{MaximumHold, MovingAverage};
use crate::dsp::parameters::{DspParameters, FrequencyDomainScaling};
use crate::dsp::tone::{fold_frequency, resolve_overlap, Tone};
use crate::error::{CoreError, CoreResult, ReadStatus};
use crate::sync::channel::MessageChannel;
use crate::sync::queue::{BoundedQueue, Timeout};
use crate::sync::worker::{BufferRegistry, ShutdownToken, WorkerState};
use crate::types::record::{
    decode_samples, FrequencyDomainRecord, Persistence, ProcessedRecord, TimeDomainRecord,
    Waterfall,
};
use crate::vendor::types::{
    AnalogFrontendParametersChannel, ConstantParameters, FirmwareType, RawRecord,
};
use crate::vendor::DigitizerApi;
use crate::window::WindowCache;

const WATERFALL_SIZE: usize = 20;
const PERSISTENCE_SIZE: usize = 10;
const NOISE_MOVING_AVERAGE_SIZE: usize = 50;
const OUTPUT_QUEUE_CAPACITY: usize = 100;
const RECORD_WAIT_TIMEOUT_MS: u32 = 100;

/// Messages accepted by a DSP pipeline.
#[derive(Debug, Clone)]
pub enum DspMessage {
    SetAnalogFrontEnd(AnalogFrontendParametersChannel),
    SetParameters(DspParameters),
    ClearProcessingMemory,
}

/// Mutable processing state. It survives stop/start cycles so parameter
/// changes made between acquisitions stick.
struct DspState {
    afe: AnalogFrontendParametersChannel,
    parameters: DspParameters,
    waterfall: VecDeque<Arc<FrequencyDomainRecord>>,
    persistence: VecDeque<Arc<TimeDomainRecord>>,
    noise_moving_average: VecDeque<f64>,
    fft_moving_average: MovingAverage,
    fft_maximum_hold: MaximumHold,
    planner: FftPlanner<f64>,
    nof_discarded: u64,
}

impl DspState {
    fn new() -> Self {
        Self {
            afe: AnalogFrontendParametersChannel::default(),
            parameters: DspParameters::default(),
            waterfall: VecDeque::new(),
            persistence: VecDeque::new(),
            noise_moving_average: VecDeque::new(),
            fft_moving_average: MovingAverage::new(),
            fft_maximum_hold: MaximumHold::new(),
            planner: FftPlanner::new(),
            nof_discarded: 0,
        }
    }
}

/// One data processing worker, bound to a digitizer channel.
pub struct DspPipeline {
    label: String,
    api: Arc<dyn DigitizerApi>,
    index: usize,
    channel: i32,
    constant: ConstantParameters,
    messages: Arc<MessageChannel<DspMessage>>,
    output: Arc<BoundedQueue<Arc<ProcessedRecord>>>,
    registry: Arc<BufferRegistry<ProcessedRecord>>,
    state: Arc<Mutex<DspState>>,
    worker: Mutex<WorkerState>,
}

impl DspPipeline {
    pub fn new(
        api: Arc<dyn DigitizerApi>,
        index: usize,
        channel: i32,
        label: String,
        constant: ConstantParameters,
    ) -> Self {
        Self {
            label,
            api,
            index,
            channel,
            constant,
            messages: Arc::new(MessageChannel::new()),
            output: Arc::new(BoundedQueue::new(OUTPUT_QUEUE_CAPACITY, false)),
            registry: Arc::new(BufferRegistry::new()),
            state: Arc::new(Mutex::new(DspState::new())),
            worker: Mutex::new(WorkerState::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Launch the processing thread. `NotReady` if already running.
    pub fn start(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_running() {
            return Err(CoreError::NotReady);
        }

        self.output.start()?;

        let context = PipelineContext {
            label: self.label.clone(),
            api: Arc::clone(&self.api),
            index: self.index,
            channel: self.channel,
            constant: self.constant.clone(),
            messages: Arc::clone(&self.messages),
            output: Arc::clone(&self.output),
            state: Arc::clone(&self.state),
        };

        worker.start(&format!("dsp {}", self.label), move |shutdown| {
            context.main_loop(&shutdown)
        })
    }

    /// Stop the processing thread and return its exit code.
    pub fn stop(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock().unwrap();
        worker.stop(
            || {
                let _ = self.output.stop();
            },
            || {
                self.registry.clear();
            },
        )
    }

    pub fn push_message(&self, message: DspMessage) -> CoreResult<()> {
        self.messages.push(message)
    }

    /// Wait for the next processed record.
    pub fn wait_for_buffer(
        &self,
        timeout: Timeout,
    ) -> CoreResult<(Arc<ProcessedRecord>, ReadStatus)> {
        self.output.read(timeout)
    }

    /// Drop a consumer's reference to a processed record. Reference counting
    /// frees the memory once the last holder lets go.
    pub fn return_buffer(&self, record: Arc<ProcessedRecord>) -> CoreResult<()> {
        drop(record);
        Ok(())
    }

    /// Hand a record out as a raw pointer for a C-style caller. The pipeline
    /// keeps one reference alive until the pointer is returned.
    pub fn issue_raw_pointer(&self, record: Arc<ProcessedRecord>) -> *const ProcessedRecord {
        self.registry.preserve(record)
    }

    /// Release the reference held for a previously issued raw pointer.
    pub fn return_raw_pointer(&self, pointer: *const ProcessedRecord) -> CoreResult<()> {
        self.registry.release(pointer)
    }

    /// Time since the pipeline last emitted a record, for liveness
    /// monitoring by the owning controller.
    pub fn time_since_last_write(&self) -> CoreResult<std::time::Duration> {
        self.output.time_since_last_write()
    }
}

/// Everything the processing thread needs, cloned out of the pipeline so the
/// handle side stays usable while the thread runs.
struct PipelineContext {
    label: String,
    api: Arc<dyn DigitizerApi>,
    index: usize,
    channel: i32,
    constant: ConstantParameters,
    messages: Arc<MessageChannel<DspMessage>>,
    output: Arc<BoundedQueue<Arc<ProcessedRecord>>>,
    state: Arc<Mutex<DspState>>,
}

impl PipelineContext {
    fn main_loop(&self, shutdown: &ShutdownToken) -> CoreResult<()> {
        log::trace!("[{}] Starting data processing.", self.label);
        let mut last_record_at = Instant::now();

        loop {
            if shutdown.is_signalled() {
                break;
            }

            self.process_messages();

            let (channel, raw) = match self.api.wait_for_record_buffer(
                self.index,
                self.channel,
                RECORD_WAIT_TIMEOUT_MS,
            ) {
                Ok(result) => result,
                Err(error) if error.is_benign_wait() => continue,
                Err(error) => {
                    log::error!(
                        "[{}] Failed to get a time domain buffer: {}.",
                        self.label,
                        error
                    );
                    return Err(error);
                }
            };

            let now = Instant::now();
            let period = now.duration_since(last_record_at).as_secs_f64();
            let estimated_trigger_frequency = 1.0 / period;
            let estimated_throughput = raw.bytes() as f64 * estimated_trigger_frequency;
            last_record_at = now;

            /* Only allocate and process if the record will be seen, i.e. if
               the outbound queue has room. */
            if !self.output.is_full() {
                let mut state = self.state.lock().unwrap();
                let mut processed = ProcessedRecord::new(
                    &self.label,
                    estimated_trigger_frequency,
                    estimated_throughput,
                );

                match self.process_record(&raw, &mut processed, &mut state) {
                    Ok(()) => {
                        let _ = self.output.write(Arc::new(processed), Timeout::Immediate);
                    }
                    Err(error) => {
                        log::error!("[{}] {}", self.label, error.message());
                    }
                }
            } else {
                let mut state = self.state.lock().unwrap();
                state.nof_discarded += 1;
                log::info!(
                    "[{}] Skipping (no FFT or allocation) since queue is full ({}).",
                    self.label,
                    state.nof_discarded
                );
            }

            if let Err(error) = self.api.return_record_buffer(self.index, channel, raw) {
                log::error!("[{}] Failed to return record buffer: {}.", self.label, error);
            }
        }

        log::trace!("[{}] Stopping data processing.", self.label);
        Ok(())
    }

    fn process_messages(&self) {
        while let Ok(stamped) = self.messages.next_message(Timeout::Immediate) {
            let mut state = self.state.lock().unwrap();
            match stamped.contents {
                DspMessage::SetAnalogFrontEnd(afe) => {
                    state.afe = afe;
                }
                DspMessage::SetParameters(parameters) => {
                    state
                        .fft_moving_average
                        .set_number_of_averages(parameters.nof_fft_averages);
                    state.fft_maximum_hold.enable(parameters.fft_maximum_hold);
                    state.noise_moving_average.clear();
                    state.parameters = parameters;
                }
                DspMessage::ClearProcessingMemory => {
                    state.fft_moving_average.clear();
                    state.fft_maximum_hold.clear();
                    state.noise_moving_average.clear();
                }
            }
        }
    }

    /// Determine the code normalization for this record. Accumulating
    /// firmware normalizes with the accumulation count folded in; a zero
    /// count is logged and skipped.
    fn code_normalization(&self, raw: &RawRecord) -> CoreResult<f64> {
        let channel = raw.header.channel as usize;
        let constant = self.constant.channel.get(channel).ok_or_else(|| {
            CoreError::internal(format!("no constant parameters for channel {}", channel))
        })?;

        let mut code_normalization = constant.code_normalization as f64;
        if self.constant.firmware.kind == FirmwareType::Atd {
            if raw.header.firmware_specific > 0 {
                code_normalization *= raw.header.firmware_specific as f64;
            } else {
                log::warn!(
                    "[{}] Expected a nonzero number of accumulations, skipping normalization.",
                    self.label
                );
            }
        }
        Ok(code_normalization)
    }

    fn process_record(
        &self,
        raw: &RawRecord,
        processed: &mut ProcessedRecord,
        state: &mut DspState,
    ) -> CoreResult<()> {
        let code_normalization = self.code_normalization(raw)?;

        let mut time_domain = TimeDomainRecord::new(
            raw,
            &state.afe,
            code_normalization,
            state.parameters.convert_horizontal,
            state.parameters.convert_vertical,
        )?;

        let fft_length = previous_power_of_two(raw.header.record_length as usize);
        let mut frequency_domain = FrequencyDomainRecord::new(fft_length / 2 + 1);
        frequency_domain.step = time_domain.sampling_frequency.value / fft_length as f64;
        frequency_domain.rbw.value = frequency_domain.step;
        frequency_domain.size.value = fft_length as f64;

        /* Window the raw codes and scale them to the unit range [-1, 1]; the
           processed time domain is already in Volts and unusable here. */
        let window = WindowCache::get(state.parameters.window_kind, fft_length);
        frequency_domain.energy_factor = window.as_ref().map_or(1.0, |w| w.energy_factor);
        frequency_domain.scale_factor = match state.parameters.fft_scaling {
            FrequencyDomainScaling::Amplitude => {
                window.as_ref().map_or(1.0, |w| w.amplitude_factor)
            }
            FrequencyDomainScaling::Energy => window.as_ref().map_or(1.0, |w| w.energy_factor),
        };

        let samples = decode_samples(raw, fft_length)?;
        let mut buffer: Vec<Complex<f64>> = samples
            .into_iter()
            .enumerate()
            .map(|(i, code)| {
                let mut value = code / (code_normalization / 2.0);
                if let Some(window) = &window {
                    value *= window.data[i];
                }
                Complex::new(value, 0.0)
            })
            .collect();

        let fft = state.planner.plan_fft_forward(fft_length);
        fft.process(&mut buffer);

        self.analyze_frequency_domain(
            &buffer,
            &mut frequency_domain,
            time_domain.sampling_frequency.value,
            state,
        );

        time_domain.analyze();

        /* Add the trace to the persistence memory. */
        let time_domain = Arc::new(time_domain);
        if state.persistence.len() >= PERSISTENCE_SIZE {
            state.persistence.pop_back();
        }
        state.persistence.push_front(Arc::clone(&time_domain));
        processed.persistence = Some(Arc::new(Persistence::new(&state.persistence)));

        processed.time_domain = Some(time_domain);
        let frequency_domain = Arc::new(frequency_domain);
        processed.frequency_domain = Some(Arc::clone(&frequency_domain));

        /* Push the new FFT at the top of the waterfall and materialize the
           row-major copy used by the plotting. */
        if state.waterfall.len() >= WATERFALL_SIZE {
            state.waterfall.pop_back();
        }
        state.waterfall.push_front(frequency_domain);
        processed.waterfall = Some(Arc::new(Waterfall::new(&state.waterfall)));

        Ok(())
    }

    fn analyze_frequency_domain(
        &self,
        fft: &[Complex<f64>],
        frequency_domain: &mut FrequencyDomainRecord,
        sampling_frequency: f64,
        state: &mut DspState,
    ) {
        let mut dc = Tone::default();
        let mut fundamental = Tone::default();
        let mut spur = Tone::default();
        let mut total_power = 0.0;
        self.process_and_identify(
            fft,
            frequency_domain,
            state,
            &mut dc,
            &mut fundamental,
            &mut spur,
            &mut total_power,
        );

        let nof_skirt_bins = state.parameters.nof_skirt_bins;
        let mut overlap = false;

        /* HD2 through HD5, folded into the first Nyquist zone. */
        let mut harmonics: Vec<Tone> = (2..=5)
            .map(|hd| {
                let f = fold_frequency(fundamental.frequency * hd as f64, sampling_frequency);
                Tone::from_spectrum(frequency_domain, f, nof_skirt_bins)
            })
            .collect();

        /* Signal energy wins over distortion energy, lower harmonics over
           higher. */
        for i in 0..harmonics.len() {
            resolve_overlap(&mut harmonics[i], &fundamental, &mut overlap);
            resolve_overlap(&mut harmonics[i], &dc, &mut overlap);

            let (head, tail) = harmonics.split_at_mut(i + 1);
            let lower = &head[i];
            for higher in tail {
                resolve_overlap(higher, lower, &mut overlap);
            }
        }

        let mut harmonic_distortion_power = 0.0;
        for harmonic in &mut harmonics {
            harmonic_distortion_power += harmonic.update_power();
        }
        frequency_domain.harmonics = harmonics
            .iter()
            .map(|harmonic| {
                (
                    frequency_domain.value_x(harmonic.frequency),
                    frequency_domain.value_y(harmonic.power_in_decibels()),
                )
            })
            .collect();

        /* Interleaving spurs: gain/phase mismatch at f0 + fs/2, offset
           mismatch at fs/2. */
        let mut gain_phase_spur = Tone::from_spectrum(
            frequency_domain,
            fold_frequency(fundamental.frequency + sampling_frequency / 2.0, sampling_frequency),
            nof_skirt_bins,
        );
        let mut offset_spur = Tone::from_spectrum(
            frequency_domain,
            sampling_frequency / 2.0,
            nof_skirt_bins,
        );

        resolve_overlap(&mut gain_phase_spur, &fundamental, &mut overlap);
        resolve_overlap(&mut offset_spur, &fundamental, &mut overlap);
        resolve_overlap(&mut gain_phase_spur, &dc, &mut overlap);
        resolve_overlap(&mut offset_spur, &dc, &mut overlap);
        for harmonic in &harmonics {
            resolve_overlap(&mut gain_phase_spur, harmonic, &mut overlap);
            resolve_overlap(&mut offset_spur, harmonic, &mut overlap);
        }

        let interleaving_spur_power =
            gain_phase_spur.update_power() + offset_spur.update_power();

        frequency_domain.overlap = overlap;
        frequency_domain.gain_phase_spur = (
            frequency_domain.value_x(gain_phase_spur.frequency),
            frequency_domain.value_y(gain_phase_spur.power_in_decibels()),
        );
        frequency_domain.offset_spur = (
            frequency_domain.value_x(offset_spur.frequency),
            frequency_domain.value_y(offset_spur.power_in_decibels()),
        );
        frequency_domain.fundamental = (
            frequency_domain.value_x(fundamental.frequency),
            frequency_domain.value_y(fundamental.power_in_decibels()),
        );
        frequency_domain.spur = (
            frequency_domain.value_x(spur.frequency),
            frequency_domain.value_y(spur.power_in_decibels()),
        );

        /* The noise power is what remains of the total once the fundamental
           and the known spectral components are removed. */
        let noise_power = total_power
            - fundamental.power
            - dc.power
            - harmonic_distortion_power
            - interleaving_spur_power;
        let noise_and_distortion_power =
            noise_power + harmonic_distortion_power + interleaving_spur_power;

        frequency_domain.snr.value = 10.0 * (fundamental.power / noise_power).log10();
        frequency_domain.thd.value =
            10.0 * (fundamental.power / harmonic_distortion_power).log10();
        frequency_domain.sinad.value =
            10.0 * (fundamental.power / noise_and_distortion_power).log10();

        let sinad_for_enob = if state.parameters.fullscale_enob {
            10.0 * (1.0 / noise_and_distortion_power).log10()
        } else {
            frequency_domain.sinad.value
        };
        frequency_domain.enob.value = (sinad_for_enob - 1.76) / 6.02;

        frequency_domain.sfdr_dbfs.value = -spur.power_in_decibels();
        frequency_domain.sfdr_dbc.value =
            fundamental.power_in_decibels() - spur.power_in_decibels();

        let noise_average =
            10.0 * (noise_power / frequency_domain.x.len() as f64).log10();
        frequency_domain.npsd.value = noise_average - 10.0 * frequency_domain.step.log10();

        /* The rolling noise floor is displayed in the same scale as the
           plotted spectrum, so convert before smoothing. */
        let noise_average_scaled = noise_average
            + 10.0 * (frequency_domain.scale_factor / frequency_domain.energy_factor).log10();

        if state.noise_moving_average.len() >= NOISE_MOVING_AVERAGE_SIZE {
            state.noise_moving_average.pop_back();
        }
        state.noise_moving_average.push_front(noise_average_scaled);

        let normalization = state.noise_moving_average.len() as f64;
        frequency_domain.noise_moving_average.value = state
            .noise_moving_average
            .iter()
            .map(|noise| noise / normalization)
            .sum();
    }

    /// One pass over the bins: feed the moving average, accumulate the total
    /// power, track the DC tone and drag a 2S+1 cursor across the spectrum
    /// to identify the fundamental and the worst spur.
    #[allow(clippy::too_many_arguments)]
    fn process_and_identify(
        &self,
        fft: &[Complex<f64>],
        frequency_domain: &mut FrequencyDomainRecord,
        state: &mut DspState,
        dc: &mut Tone,
        fundamental: &mut Tone,
        spur: &mut Tone,
        total_power: &mut f64,
    ) {
        let bin_range = frequency_domain.step;
        let scale_factor = frequency_domain.scale_factor;
        let energy_factor = frequency_domain.energy_factor;
        let nof_skirt_bins = state.parameters.nof_skirt_bins;
        let nof_bins = frequency_domain.x.len();
        let nyquist_frequency = (nof_bins - 1) as f64 * bin_range;
        let fixed_fundamental = state.parameters.fundamental_frequency > 0.0
            && state.parameters.fundamental_frequency <= nyquist_frequency;

        let from_complex =
            |value: &Complex<f64>| (2.0 * value.norm() / fft.len() as f64).powi(2);

        state.fft_moving_average.prepare_new_entry(nof_bins);

        /* A pinned fundamental is constructed up front from the (averaged)
           skirt bins; the pass below then only hunts for the worst spur.
           The skirt bins are revisited in the loop, which recomputes the
           same averaged values. */
        if fixed_fundamental {
            let idx = state.parameters.fundamental_frequency / bin_range;
            let idx_center = (idx + 0.5) as usize;
            let idx_low = idx_center.saturating_sub(nof_skirt_bins);
            let idx_high = (idx_center + nof_skirt_bins).min(nof_bins - 1);

            for i in idx_low..=idx_high {
                let value = state
                    .fft_moving_average
                    .insert_and_average(i, from_complex(&fft[i]));
                fundamental.values.push(value * energy_factor);
            }

            fundamental.update_power();
            fundamental.frequency = state.parameters.fundamental_frequency;
            fundamental.idx = idx_center;
            fundamental.idx_fraction = idx - idx_center as f64;
            fundamental.idx_low = idx_low;
            fundamental.idx_high = idx_high;
        }

        let mut cursor: VecDeque<f64> = VecDeque::new();

        for i in 0..nof_bins {
            frequency_domain.x[i] = i as f64 * bin_range;

            let averaged = state
                .fft_moving_average
                .insert_and_average(i, from_complex(&fft[i]));

            /* The analysis below always uses the energy-accurate value; the
               plotted value follows the configured scaling, runs through the
               maximum hold and is converted to decibels. */
            let y_power = averaged * energy_factor;
            let plotted = state.fft_maximum_hold.compare(i, averaged * scale_factor);
            frequency_domain.y[i] = 10.0 * plotted.log10();

            *total_power += y_power;

            if i <= nof_skirt_bins {
                dc.power += y_power;
                dc.idx_high = i;
                dc.values.push(y_power);
                continue;
            }

            if cursor.len() >= 2 * nof_skirt_bins + 1 {
                cursor.pop_front();
            }
            cursor.push_back(y_power);

            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for (j, value) in cursor.iter().enumerate() {
                numerator += j as f64 * value;
                denominator += value;
            }

            let idx_low = i + 1 - cursor.len();
            let center_of_mass = idx_low as f64 + numerator / denominator;
            let center_idx = (center_of_mass + 0.5) as usize;
            let center_fraction = center_of_mass - center_idx as f64;
            let center_frequency = bin_range * center_of_mass;

            if !fixed_fundamental && denominator > fundamental.power {
                /* The old fundamental becomes the worst spur if it lies
                   outside the new tone's exclusion window. */
                if center_idx.abs_diff(fundamental.idx) > 2 * nof_skirt_bins {
                    *spur = fundamental.clone();
                }

                fundamental.power = denominator;
                fundamental.frequency = center_frequency;
                fundamental.idx = center_idx;
                fundamental.idx_fraction = center_fraction;
                fundamental.idx_low = idx_low;
                fundamental.idx_high = i;
                fundamental.values.clear();
                fundamental.values.extend(cursor.iter());
            }

            if denominator > spur.power
                && center_idx.abs_diff(fundamental.idx) > 2 * nof_skirt_bins
            {
                spur.power = denominator;
                spur.frequency = center_frequency;
                spur.idx = center_idx;
                spur.idx_fraction = center_fraction;
                spur.idx_low = idx_low;
                spur.idx_high = i;
                spur.values.clear();
                spur.values.extend(cursor.iter());
            }
        }
    }
}

fn previous_power_of_two(value: usize) -> usize {
    let mut result = 1;
    while result * 2 <= value {
        result *= 2;
    }
    result
}
