// Shared test fixtures - a mock vendor backend, an in-memory watcher
// factory and signal builders for the DSP scenarios.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wavescope::digitizer::collaborators::{
    ScriptHost, WatcherCommand, WatcherEvent, WatcherFactory, WatcherHandle,
};
use wavescope::error::{CoreError, CoreResult};
use wavescope::sync::queue::BoundedQueue;
use wavescope::system_manager::{
    BootInformation, Command, SensorGroupInformation, SensorInformation, StateInformation,
    SENSOR_FORMAT_FLOAT,
};
use wavescope::vendor::types::*;
use wavescope::vendor::DigitizerApi;

pub const MOCK_CODE_NORMALIZATION: i64 = 65536;

pub fn mock_constant_parameters(nof_channels: usize) -> ConstantParameters {
    ConstantParameters {
        nof_channels: nof_channels as i32,
        nof_transfer_channels: nof_channels as i32,
        nof_acquisition_channels: nof_channels as i32,
        serial_number: "SPD-12345".to_string(),
        product_name: "ADQ32".to_string(),
        product_options: String::new(),
        firmware: ConstantParametersFirmware {
            kind: FirmwareType::Daq,
            name: "1CH-FWDAQ".to_string(),
        },
        channel: (0..nof_channels)
            .map(|ch| ConstantParametersChannel {
                label: char::from(b'A' + ch as u8).to_string(),
                nof_adc_cores: 2,
                code_normalization: MOCK_CODE_NORMALIZATION,
            })
            .collect(),
        dram_size: 8 * 1024 * 1024 * 1024,
        record_buffer_size_step: 1024,
    }
}

/// Build a raw 16-bit record holding a sine at `frequency` plus optional
/// harmonics, with a little seeded noise so no spectral bin is exactly
/// empty. `harmonics` entries are `(multiple, amplitude_fs)`.
pub fn sine_record(
    record_number: u32,
    sampling_frequency: f64,
    frequency: f64,
    amplitude_fs: f64,
    length: usize,
    harmonics: &[(f64, f64)],
    seed: u64,
) -> RawRecord {
    let mut rng = StdRng::seed_from_u64(seed);
    let full_scale = MOCK_CODE_NORMALIZATION as f64 / 2.0;

    let data: Vec<i16> = (0..length)
        .map(|k| {
            let t = k as f64 / sampling_frequency;
            let mut value = amplitude_fs * (2.0 * std::f64::consts::PI * frequency * t).sin();
            for &(multiple, amplitude) in harmonics {
                value +=
                    amplitude * (2.0 * std::f64::consts::PI * frequency * multiple * t).sin();
            }
            let noise: f64 = rng.gen_range(-2.0..2.0);
            (value * full_scale + noise).clamp(-full_scale, full_scale - 1.0) as i16
        })
        .collect();

    let header = RecordHeader {
        record_length: length as u32,
        record_number,
        data_format: 0,
        channel: 0,
        sampling_period: (1e12 / sampling_frequency).round() as u64,
        time_unit: 1e-12,
        ..RecordHeader::default()
    };

    RawRecord {
        header,
        data: bytemuck_cast(&data),
    }
}

fn bytemuck_cast(data: &[i16]) -> Vec<u8> {
    data.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

/// A scriptable in-process stand-in for the vendor library.
pub struct MockDigitizer {
    pub constant: Mutex<ConstantParameters>,
    pub devices: Vec<DeviceListEntry>,
    pub compatible: bool,

    pub records: Mutex<VecDeque<(i32, Arc<RawRecord>)>>,
    pub returned: Mutex<Vec<Arc<RawRecord>>>,
    pub acquisition_running: AtomicBool,

    pub top_json: Mutex<String>,
    pub clock_json: Mutex<String>,
    pub applied_parameters: Mutex<Vec<String>>,
    pub fail_set_parameters_string: AtomicBool,

    pub acquisition: Mutex<DataAcquisitionParameters>,
    pub transfer: Mutex<DataTransferParameters>,
    pub clock_system: Mutex<ClockSystemParameters>,

    pub overflow: AtomicBool,
    pub sensor_counter: AtomicU32,
}

impl MockDigitizer {
    pub fn new(nof_channels: usize) -> Self {
        Self {
            constant: Mutex::new(mock_constant_parameters(nof_channels)),
            devices: vec![DeviceListEntry {
                product_id: PRODUCT_ID_GEN4_BASE,
            }],
            compatible: true,
            records: Mutex::new(VecDeque::new()),
            returned: Mutex::new(Vec::new()),
            acquisition_running: AtomicBool::new(false),
            top_json: Mutex::new(r#"{"top":"configured"}"#.to_string()),
            clock_json: Mutex::new(r#"{"clock_system":"configured"}"#.to_string()),
            applied_parameters: Mutex::new(Vec::new()),
            fail_set_parameters_string: AtomicBool::new(false),
            acquisition: Mutex::new(DataAcquisitionParameters {
                channel: (0..nof_channels)
                    .map(|_| DataAcquisitionParametersChannel {
                        nof_records: INFINITE_RECORDS,
                        record_length: 8192,
                        horizontal_offset: 0,
                        trigger_source: EventSource::Periodic,
                        trigger_edge: TriggerEdge::Rising,
                    })
                    .collect(),
            }),
            transfer: Mutex::new(DataTransferParameters {
                channel: (0..nof_channels)
                    .map(|_| DataTransferParametersChannel {
                        nof_buffers: 8,
                        metadata_enabled: true,
                        metadata_buffer_size: 64,
                        record_buffer_size: 32 * 1024,
                        dynamic_record_length_enabled: true,
                    })
                    .collect(),
            }),
            clock_system: Mutex::new(ClockSystemParameters::default()),
            overflow: AtomicBool::new(false),
            sensor_counter: AtomicU32::new(0),
        }
    }

    /// Queue a raw record for the pipeline to pick up.
    pub fn push_record(&self, channel: i32, record: RawRecord) {
        self.records
            .lock()
            .unwrap()
            .push_back((channel, Arc::new(record)));
    }

    pub fn nof_returned_records(&self) -> usize {
        self.returned.lock().unwrap().len()
    }

    fn write_label(target: &mut [u8], label: &str) {
        let bytes = label.as_bytes();
        let n = bytes.len().min(target.len());
        target[..n].copy_from_slice(&bytes[..n]);
    }
}

impl DigitizerApi for MockDigitizer {
    fn api_revision(&self) -> u32 {
        0x00be_ef01
    }

    fn validate_api_version(&self) -> bool {
        self.compatible
    }

    fn enable_error_trace(&self, _level: u32, _directory: &str) -> CoreResult<()> {
        Ok(())
    }

    fn list_devices(&self) -> CoreResult<Vec<DeviceListEntry>> {
        Ok(self.devices.clone())
    }

    fn open_device_interface(&self, _discovery_index: usize) -> CoreResult<()> {
        Ok(())
    }

    fn setup_device(&self, _init_index: usize) -> CoreResult<()> {
        Ok(())
    }

    fn start_data_acquisition(&self, _index: usize) -> CoreResult<()> {
        self.acquisition_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_data_acquisition(&self, _index: usize) -> CoreResult<()> {
        self.acquisition_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_record_buffer(
        &self,
        _index: usize,
        channel: i32,
        timeout_ms: u32,
    ) -> CoreResult<(i32, Arc<RawRecord>)> {
        let popped = {
            let mut records = self.records.lock().unwrap();
            match records.iter().position(|(ch, _)| channel < 0 || *ch == channel) {
                Some(position) => records.remove(position),
                None => None,
            }
        };

        match popped {
            Some(entry) => Ok(entry),
            None => {
                std::thread::sleep(std::time::Duration::from_millis(timeout_ms.min(5) as u64));
                Err(CoreError::Again)
            }
        }
    }

    fn return_record_buffer(
        &self,
        _index: usize,
        _channel: i32,
        record: Arc<RawRecord>,
    ) -> CoreResult<()> {
        self.returned.lock().unwrap().push(record);
        Ok(())
    }

    fn constant_parameters(&self, _index: usize) -> CoreResult<ConstantParameters> {
        Ok(self.constant.lock().unwrap().clone())
    }

    fn analog_frontend_parameters(&self, _index: usize) -> CoreResult<AnalogFrontendParameters> {
        let nof_channels = self.constant.lock().unwrap().nof_channels as usize;
        Ok(AnalogFrontendParameters {
            channel: vec![
                AnalogFrontendParametersChannel {
                    input_range: 500.0,
                    dc_offset: 0.0,
                };
                nof_channels
            ],
        })
    }

    fn transfer_parameters(&self, _index: usize) -> CoreResult<DataTransferParameters> {
        Ok(self.transfer.lock().unwrap().clone())
    }

    fn acquisition_parameters(&self, _index: usize) -> CoreResult<DataAcquisitionParameters> {
        Ok(self.acquisition.lock().unwrap().clone())
    }

    fn clock_system_parameters(&self, _index: usize) -> CoreResult<ClockSystemParameters> {
        Ok(self.clock_system.lock().unwrap().clone())
    }

    fn initialize_clock_system_parameters(
        &self,
        _index: usize,
    ) -> CoreResult<ClockSystemParameters> {
        Ok(ClockSystemParameters::default())
    }

    fn initialize_acquisition_parameters(
        &self,
        _index: usize,
    ) -> CoreResult<DataAcquisitionParameters> {
        Ok(DataAcquisitionParameters::default())
    }

    fn initialize_transfer_parameters(&self, _index: usize) -> CoreResult<DataTransferParameters> {
        Ok(DataTransferParameters::default())
    }

    fn initialize_readout_parameters(&self, _index: usize) -> CoreResult<DataReadoutParameters> {
        Ok(DataReadoutParameters::default())
    }

    fn initialize_periodic_event_source(
        &self,
        _index: usize,
    ) -> CoreResult<PeriodicEventSourceParameters> {
        Ok(PeriodicEventSourceParameters::default())
    }

    fn set_clock_system_parameters(
        &self,
        _index: usize,
        parameters: &ClockSystemParameters,
    ) -> CoreResult<()> {
        *self.clock_system.lock().unwrap() = parameters.clone();
        Ok(())
    }

    fn set_acquisition_parameters(
        &self,
        _index: usize,
        parameters: &DataAcquisitionParameters,
    ) -> CoreResult<()> {
        *self.acquisition.lock().unwrap() = parameters.clone();
        Ok(())
    }

    fn set_transfer_parameters(
        &self,
        _index: usize,
        parameters: &DataTransferParameters,
    ) -> CoreResult<()> {
        *self.transfer.lock().unwrap() = parameters.clone();
        Ok(())
    }

    fn set_readout_parameters(&self, _index: usize, _: &DataReadoutParameters) -> CoreResult<()> {
        Ok(())
    }

    fn set_periodic_event_source(
        &self,
        _index: usize,
        _: &PeriodicEventSourceParameters,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn get_parameters_string(&self, _index: usize, set: ParameterSet) -> CoreResult<String> {
        Ok(match set {
            ParameterSet::Top => self.top_json.lock().unwrap().clone(),
            ParameterSet::ClockSystem => self.clock_json.lock().unwrap().clone(),
        })
    }

    fn initialize_parameters_string(&self, _index: usize, set: ParameterSet) -> CoreResult<String> {
        Ok(match set {
            ParameterSet::Top => r#"{"top":"defaults"}"#.to_string(),
            ParameterSet::ClockSystem => r#"{"clock_system":"defaults"}"#.to_string(),
        })
    }

    fn set_parameters_string(&self, _index: usize, json: &str) -> CoreResult<()> {
        if self.fail_set_parameters_string.load(Ordering::SeqCst) {
            return Err(CoreError::External { code: -9 });
        }
        self.applied_parameters.lock().unwrap().push(json.to_string());
        Ok(())
    }

    fn validate_parameters_string(&self, _index: usize, _json: &str) -> CoreResult<()> {
        Ok(())
    }

    fn overflow_status(&self, _index: usize) -> CoreResult<OverflowStatus> {
        Ok(OverflowStatus {
            overflow: self.overflow.load(Ordering::SeqCst),
        })
    }

    fn dram_status(&self, _index: usize) -> CoreResult<DramStatus> {
        let dram_size = self.constant.lock().unwrap().dram_size;
        Ok(DramStatus {
            fill: dram_size / 4,
            fill_max: dram_size / 2,
        })
    }

    fn sm_transaction(
        &self,
        _index: usize,
        command: u16,
        write: &[u8],
        read: &mut [u8],
    ) -> CoreResult<()> {
        const SENSOR_IDS: [u32; 2] = [10, 11];
        const BOOT_IDS: [u32; 2] = [1, 2];

        if command == Command::SensorGetNofSensors as u16 {
            read.copy_from_slice(&(SENSOR_IDS.len() as u32).to_ne_bytes());
        } else if command == Command::SensorGetMap as u16 {
            let map = [SENSOR_IDS[0], SENSOR_IDS[1], u32::MAX];
            read.copy_from_slice(bytemuck::cast_slice(&map));
        } else if command == Command::SensorGetInfo as u16 {
            let id: u32 = *bytemuck::from_bytes(write);
            let mut information = SensorInformation {
                id,
                group_id: 1,
                label: [0; 16],
                unit: [0; 8],
            };
            if id == 10 {
                Self::write_label(&mut information.label, "Temperature");
                Self::write_label(&mut information.unit, "C");
            } else {
                Self::write_label(&mut information.label, "VCC");
                Self::write_label(&mut information.unit, "mV");
            }
            read.copy_from_slice(bytemuck::bytes_of(&information));
        } else if command == Command::SensorGetGroupInfo as u16 {
            let mut information = SensorGroupInformation {
                id: 1,
                label: [0; 16],
            };
            Self::write_label(&mut information.label, "Ambient");
            read.copy_from_slice(bytemuck::bytes_of(&information));
        } else if command == Command::SensorGetValue as u16 {
            let id: u32 = *bytemuck::from_bytes(&write[..4]);
            let format: u32 = *bytemuck::from_bytes(&write[4..8]);
            assert_eq!(format, SENSOR_FORMAT_FLOAT);
            let tick = self.sensor_counter.fetch_add(1, Ordering::SeqCst);
            let value = id as f32 + tick as f32 * 0.25;
            read.copy_from_slice(&value.to_ne_bytes());
        } else if command == Command::BootGetNofEntries as u16 {
            read.copy_from_slice(&(BOOT_IDS.len() as u32).to_ne_bytes());
        } else if command == Command::BootGetMap as u16 {
            let map = [BOOT_IDS[0], BOOT_IDS[1], u32::MAX];
            read.copy_from_slice(bytemuck::cast_slice(&map));
        } else if command == Command::BootGetInfo as u16 {
            let id: u32 = *bytemuck::from_bytes(write);
            let mut information = BootInformation {
                status: 0,
                label: [0; 32],
            };
            Self::write_label(
                &mut information.label,
                if id == 1 { "DCDC" } else { "Flash" },
            );
            read.copy_from_slice(bytemuck::bytes_of(&information));
        } else if command == Command::GetState as u16 {
            read.copy_from_slice(&5i32.to_ne_bytes());
        } else if command == Command::GetStateInfo as u16 {
            let mut information = StateInformation { label: [0; 32] };
            Self::write_label(&mut information.label, "Operational");
            read.copy_from_slice(bytemuck::bytes_of(&information));
        } else {
            return Err(CoreError::unsupported("unknown system manager command"));
        }
        Ok(())
    }
}

/// Watcher factory handing out in-memory queues; the test side keeps a
/// clone of every handle to inject events and observe commands.
#[derive(Default)]
pub struct InMemoryWatcherFactory {
    pub handles: Mutex<Vec<InMemoryWatcher>>,
}

#[derive(Clone)]
pub struct InMemoryWatcher {
    pub path: PathBuf,
    pub events: Arc<BoundedQueue<WatcherEvent>>,
    pub commands: Arc<BoundedQueue<WatcherCommand>>,
}

impl WatcherFactory for InMemoryWatcherFactory {
    fn watch(&self, path: &Path) -> WatcherHandle {
        let handle = WatcherHandle::new(path.to_path_buf());
        self.handles.lock().unwrap().push(InMemoryWatcher {
            path: path.to_path_buf(),
            events: Arc::clone(&handle.events),
            commands: Arc::clone(&handle.commands),
        });
        handle
    }
}

/// Scripting host answering with canned output.
pub struct MockScriptHost {
    pub fail: AtomicBool,
}

impl MockScriptHost {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

impl ScriptHost for MockScriptHost {
    fn call_main(&self, module: &str, _index: usize) -> Result<String, String> {
        if self.fail.load(Ordering::SeqCst) {
            Err(format!("Traceback: module '{}' raised RuntimeError", module))
        } else {
            Ok(format!("module '{}' ran", module))
        }
    }
}
