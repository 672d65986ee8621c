// Digitizer controller - a threaded state machine per device
//
// The controller wraps everything one digitizer needs: identification
// indexes for the vendor library, the constant parameters, one DSP pipeline
// per transfer channel, two file watchers observing the parameter blobs, the
// sensor/boot inventory of the system manager and the acquisition state
// machine.
//
// The outside world communicates by message: commands map to an action, are
// dispatched by a handler specific to the current state, and are echoed back
// with a result code. A command accepted in `Acquisition` whose effect needs
// reconfiguration stops the acquisition, performs the action and starts
// again, so the caller sees a seamless edit mid-stream.

pub mod collaborators;
pub mod messages;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::dsp::pipeline::{DspMessage, DspPipeline};
use crate::error::{CoreError, CoreResult, ReadStatus, StatusCodes};
use crate::sync::channel::{MessageChannel, Stamped};
use crate::sync::queue::{BoundedQueue, Timeout};
use crate::sync::worker::{ShutdownToken, WorkerState};
use crate::system_manager::{fixed_str, SystemManager};
use crate::types::record::{ProcessedRecord, SensorRecord};
use crate::vendor::types::{
    ClockGenerator, ConstantParameters, DataAcquisitionParametersChannel,
    DataReadoutParametersChannel, DataTransferParametersChannel, EventSource, FirmwareType,
    ParameterSet, RecordHeader, ReferenceSource, TriggerEdge, INFINITE_RECORDS,
    INFINITE_RECORD_LENGTH,
};
use crate::vendor::DigitizerApi;

use collaborators::{ScriptHost, WatcherCommand, WatcherEvent, WatcherFactory, WatcherHandle};
use messages::{
    BootEntry, DigitizerCommand, DigitizerMessage, DigitizerState, Sensor, SensorGroup, SensorTree,
};

const SENSOR_SAMPLING_PERIOD: Duration = Duration::from_millis(1000);
const STATUS_SAMPLING_PERIOD: Duration = Duration::from_millis(1000);
const COMMAND_INTAKE_TIMEOUT_MS: u64 = 100;
const DEFAULT_ACTIVITY_THRESHOLD_MS: u128 = 1000;
const ACTIVITY_HYSTERESIS_MS: u128 = 500;
const DEFAULT_RECORD_LENGTH: i64 = 32 * 1024;
const DEFAULT_TRIGGER_FREQUENCY: f64 = 15.0;

/// The world-facing handle of one digitizer controller.
pub struct Digitizer {
    api: Arc<dyn DigitizerApi>,
    init_index: usize,
    index: usize,
    configuration_directory: PathBuf,
    watcher_factory: Arc<dyn WatcherFactory>,
    script_host: Option<Arc<dyn ScriptHost>>,
    messages: Arc<MessageChannel<DigitizerMessage>>,
    sensor_queue: Arc<BoundedQueue<Arc<Vec<SensorRecord>>>>,
    pipelines: Arc<Mutex<Vec<Arc<DspPipeline>>>>,
    worker: Mutex<WorkerState>,
}

impl Digitizer {
    /// `init_index` is only ever used for the per-device setup call;
    /// `index` addresses the device in every other vendor operation.
    pub fn new(
        api: Arc<dyn DigitizerApi>,
        init_index: usize,
        index: usize,
        configuration_directory: PathBuf,
        watcher_factory: Arc<dyn WatcherFactory>,
        script_host: Option<Arc<dyn ScriptHost>>,
    ) -> Self {
        Self {
            api,
            init_index,
            index,
            configuration_directory,
            watcher_factory,
            script_host,
            messages: Arc::new(MessageChannel::new()),
            sensor_queue: Arc::new(BoundedQueue::started()),
            pipelines: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(WorkerState::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Launch the controller thread. `NotReady` if already running.
    pub fn start(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_running() {
            return Err(CoreError::NotReady);
        }

        let context = ControllerContext {
            api: Arc::clone(&self.api),
            init_index: self.init_index,
            index: self.index,
            configuration_directory: self.configuration_directory.clone(),
            watcher_factory: Arc::clone(&self.watcher_factory),
            script_host: self.script_host.clone(),
            messages: Arc::clone(&self.messages),
            sensor_queue: Arc::clone(&self.sensor_queue),
            shared_pipelines: Arc::clone(&self.pipelines),
            state: DigitizerState::NotInitialized,
            constant: ConstantParameters::default(),
            watchers: None,
            parameters_top: Arc::new(String::new()),
            parameters_clock: Arc::new(String::new()),
            pipelines: Vec::new(),
            no_activity_threshold_ms: DEFAULT_ACTIVITY_THRESHOLD_MS,
            notified_no_activity: false,
            sensor_records: Vec::new(),
            last_sensor_poll: Instant::now(),
            last_status_poll: Instant::now(),
        };

        worker.start(&format!("digitizer {}", self.index), move |shutdown| {
            context.main_loop(&shutdown)
        })
    }

    /// Stop the controller and return the thread's exit code. The message
    /// queues are restarted after the join so commands can be queued for the
    /// next activation.
    pub fn stop(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock().unwrap();
        worker.stop(
            || {
                let _ = self.messages.stop_queues();
            },
            || {
                let _ = self.messages.start_queues();
            },
        )
    }

    /// The command/event channel of this controller.
    pub fn messages(&self) -> &MessageChannel<DigitizerMessage> {
        &self.messages
    }

    pub fn push_command(&self, command: DigitizerCommand) -> CoreResult<()> {
        self.messages.push(DigitizerMessage::Command(command))
    }

    pub fn wait_for_message(&self, timeout: Timeout) -> CoreResult<DigitizerMessage> {
        self.messages.wait(timeout)
    }

    /// Interface to the per-channel data processing threads.
    pub fn wait_for_processed_record(
        &self,
        channel: usize,
        timeout: Timeout,
    ) -> CoreResult<(Arc<ProcessedRecord>, ReadStatus)> {
        let pipeline = {
            let pipelines = self.pipelines.lock().unwrap();
            pipelines
                .get(channel)
                .cloned()
                .ok_or_else(|| CoreError::invalid(format!("no pipeline for channel {}", channel)))?
        };
        pipeline.wait_for_buffer(timeout)
    }

    /// Interface to the periodically published sensor snapshots.
    pub fn wait_for_sensor_records(
        &self,
        timeout: Timeout,
    ) -> CoreResult<Arc<Vec<SensorRecord>>> {
        let (records, _) = self.sensor_queue.read(timeout)?;
        Ok(records)
    }
}

struct Watchers {
    top: WatcherHandle,
    clock_system: WatcherHandle,
}

/// The controller's thread-side state and logic.
struct ControllerContext {
    api: Arc<dyn DigitizerApi>,
    init_index: usize,
    index: usize,
    configuration_directory: PathBuf,
    watcher_factory: Arc<dyn WatcherFactory>,
    script_host: Option<Arc<dyn ScriptHost>>,
    messages: Arc<MessageChannel<DigitizerMessage>>,
    sensor_queue: Arc<BoundedQueue<Arc<Vec<SensorRecord>>>>,
    shared_pipelines: Arc<Mutex<Vec<Arc<DspPipeline>>>>,

    state: DigitizerState,
    constant: ConstantParameters,
    watchers: Option<Watchers>,
    parameters_top: Arc<String>,
    parameters_clock: Arc<String>,
    pipelines: Vec<Arc<DspPipeline>>,
    no_activity_threshold_ms: u128,
    notified_no_activity: bool,
    sensor_records: Vec<SensorRecord>,
    last_sensor_poll: Instant,
    last_status_poll: Instant,
}

impl ControllerContext {
    fn main_loop(mut self, shutdown: &ShutdownToken) -> CoreResult<()> {
        match self.initialize() {
            Ok(()) => self.set_state(DigitizerState::Idle),
            Err(error) => {
                /* The controller keeps running so a later command can retry
                   the initialization. */
                self.set_state(DigitizerState::NotInitialized);
                self.signal_error(error);
            }
        }

        loop {
            /* The command intake timeout gives the loop its 10 Hz
               housekeeping cadence. */
            self.process_messages();
            self.process_watcher_messages();
            if let Err(error) = self.update_sensors() {
                self.signal_error(error);
            }
            self.check_activity();
            if let Err(error) = self.check_status() {
                self.signal_error(error);
            }

            if shutdown.is_signalled() {
                break;
            }
        }

        self.stop_data_acquisition();
        Ok(())
    }

    /* Initialization */

    fn initialize(&mut self) -> CoreResult<()> {
        self.set_state(DigitizerState::Initialization);
        log::info!("Starting initialization of digitizer {}.", self.index);

        /* Thread safety here requires that the device interface was opened
           in a single-threaded context beforehand. */
        self.api
            .setup_device(self.init_index)
            .map_err(|error| self.vendor_error("SetupDevice", error))?;

        self.constant = self
            .api
            .constant_parameters(self.index)
            .map_err(|error| self.vendor_error("GetParameters (constant)", error))?;

        log::info!(
            "Digitizer {} is {}.",
            self.index,
            self.constant.serial_number
        );

        /* One data processing thread per transfer channel. */
        self.pipelines.clear();
        for ch in 0..self.constant.nof_transfer_channels as usize {
            let channel_label = self
                .constant
                .channel
                .get(ch)
                .map(|channel| channel.label.clone())
                .unwrap_or_else(|| ch.to_string());
            let label = format!(
                "{} {} {}",
                self.constant.product_name, self.constant.serial_number, channel_label
            );
            self.pipelines.push(Arc::new(DspPipeline::new(
                Arc::clone(&self.api),
                self.index,
                ch as i32,
                label,
                self.constant.clone(),
            )));
        }
        *self.shared_pipelines.lock().unwrap() = self.pipelines.clone();

        self.initialize_file_watchers();

        self.post(DigitizerMessage::Initialized(Box::new(
            self.constant.clone(),
        )));

        self.initialize_boot_status()?;
        self.initialize_sensors()?;
        Ok(())
    }

    fn initialize_file_watchers(&mut self) {
        let identifier = format!(
            "{}_{}",
            self.constant.serial_number, self.constant.firmware.name
        )
        .to_lowercase();

        let top = self.watcher_factory.watch(
            &self
                .configuration_directory
                .join(format!("parameters_top_{}.json", identifier)),
        );
        let clock_system = self.watcher_factory.watch(
            &self
                .configuration_directory
                .join(format!("parameters_clock_system_{}.json", identifier)),
        );

        self.watchers = Some(Watchers { top, clock_system });
        self.parameters_top = Arc::new(String::new());
        self.parameters_clock = Arc::new(String::new());
    }

    fn initialize_boot_status(&mut self) -> CoreResult<()> {
        let sm = SystemManager::new(self.api.as_ref(), self.index);

        let mut entries = Vec::new();
        for id in sm.boot_map()? {
            let information = sm.boot_info(id)?;
            let note = if information.status != 0 {
                format!("Boot step failed with status {}.", information.status)
            } else {
                String::new()
            };
            entries.push(BootEntry {
                id,
                status: information.status,
                label: fixed_str(&information.label),
                note,
            });
        }

        let state = sm.state()?;
        let information = sm.state_info(state)?;
        self.post(DigitizerMessage::BootStatus {
            state,
            description: fixed_str(&information.label),
            entries,
        });
        Ok(())
    }

    fn initialize_sensors(&mut self) -> CoreResult<()> {
        let sm = SystemManager::new(self.api.as_ref(), self.index);

        /* The sensor map is flat but clustered by group, so new groups are
           discovered by watching the group id change. */
        let mut tree: SensorTree = Vec::new();
        self.sensor_records.clear();

        let mut group_id = 0;
        for id in sm.sensor_map()? {
            let information = sm.sensor_info(id)?;

            if tree.is_empty() || information.group_id != group_id {
                let group = sm.sensor_group_info(information.group_id)?;
                tree.push(SensorGroup {
                    id: group.id,
                    label: fixed_str(&group.label),
                    sensors: Vec::new(),
                });
                group_id = group.id;
            }

            tree.last_mut()
                .expect("a group exists by construction")
                .sensors
                .push(Sensor {
                    id: information.id,
                    group_id: information.group_id,
                    label: fixed_str(&information.label),
                });
            self.sensor_records.push(SensorRecord::new(
                information.id,
                information.group_id,
                &fixed_str(&information.unit),
            ));
        }

        self.post(DigitizerMessage::SensorTree(tree));
        Ok(())
    }

    /* Housekeeping */

    fn process_messages(&mut self) {
        while let Ok(stamped) = self
            .messages
            .next_message(Timeout::Millis(COMMAND_INTAKE_TIMEOUT_MS))
        {
            self.handle_message_in_state(stamped);
        }
    }

    fn process_watcher_messages(&mut self) {
        self.process_watcher_events(ParameterSet::Top);
        self.process_watcher_events(ParameterSet::ClockSystem);
    }

    fn process_watcher_events(&mut self, set: ParameterSet) {
        loop {
            let event = {
                let Some(watchers) = self.watchers.as_ref() else {
                    return;
                };
                let queue = match set {
                    ParameterSet::Top => &watchers.top.events,
                    ParameterSet::ClockSystem => &watchers.clock_system.events,
                };
                match queue.read(Timeout::Immediate) {
                    Ok((event, _)) => event,
                    Err(_) => return,
                }
            };

            match event {
                WatcherEvent::FileCreated(contents) | WatcherEvent::FileUpdated(contents) => {
                    match set {
                        ParameterSet::Top => {
                            self.parameters_top = contents;
                            self.post(DigitizerMessage::ChangedTopParameters);
                        }
                        ParameterSet::ClockSystem => {
                            self.parameters_clock = contents;
                            self.post(DigitizerMessage::ChangedClockSystemParameters);
                        }
                    }
                }
                WatcherEvent::FileDoesNotExist => {
                    /* A missing file means a fresh device: seed it with the
                       default parameters and a sane acquisition setup. */
                    let result = self
                        .initialize_parameters(set)
                        .and_then(|()| self.configure_default_acquisition());
                    if let Err(error) = result {
                        self.signal_error(error);
                    }
                }
                WatcherEvent::FileDeleted => {}
            }
        }
    }

    fn update_sensors(&mut self) -> CoreResult<()> {
        if self.sensor_records.is_empty()
            || self.last_sensor_poll.elapsed() < SENSOR_SAMPLING_PERIOD
        {
            return Ok(());
        }
        self.last_sensor_poll = Instant::now();

        let sm = SystemManager::new(self.api.as_ref(), self.index);
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        for sensor in &mut self.sensor_records {
            sensor.step = SENSOR_SAMPLING_PERIOD.as_secs_f64();
            match sm.read_sensor_value(sensor.id) {
                Ok(value) => {
                    sensor.status = StatusCodes::OK;
                    sensor.append(value as f64, epoch);
                }
                Err(error) => {
                    /* A failing sensor annotates its own record; the poll
                       carries on with the others. */
                    sensor.status = error.code();
                    sensor.note = error.message();
                }
            }
        }

        self.sensor_queue
            .write(Arc::new(self.sensor_records.clone()), Timeout::Immediate)
    }

    fn check_activity(&mut self) {
        let mut slowest: Option<u128> = None;
        for pipeline in &self.pipelines {
            if let Ok(elapsed) = pipeline.time_since_last_write() {
                let elapsed = elapsed.as_millis();
                slowest = Some(slowest.map_or(elapsed, |current| current.max(elapsed)));
            }
        }
        let Some(slowest) = slowest else {
            return;
        };

        /* The threshold widens to the observed idle time when tripped, so
           the monitor regulates itself to a slow trigger rate. */
        if slowest > self.no_activity_threshold_ms + ACTIVITY_HYSTERESIS_MS {
            self.post(DigitizerMessage::EventNoActivity);
            self.no_activity_threshold_ms = slowest;
            self.notified_no_activity = true;
        } else if self.notified_no_activity
            && slowest + ACTIVITY_HYSTERESIS_MS < self.no_activity_threshold_ms
        {
            self.post(DigitizerMessage::EventClear);
            self.notified_no_activity = false;
        }
    }

    fn check_status(&mut self) -> CoreResult<()> {
        if self.state != DigitizerState::Acquisition
            || self.last_status_poll.elapsed() < STATUS_SAMPLING_PERIOD
        {
            return Ok(());
        }
        self.last_status_poll = Instant::now();

        /* Accumulating firmware keeps its records in block RAM; the DRAM
           fill is meaningless there. */
        if self.constant.firmware.kind != FirmwareType::Atd {
            if let Ok(dram) = self.api.dram_status(self.index) {
                let fill = dram.fill as f64 / self.constant.dram_size as f64;
                self.post(DigitizerMessage::DramFill(fill));
            }
        }

        if let Ok(status) = self.api.overflow_status(self.index) {
            if status.overflow {
                self.post(DigitizerMessage::EventOverflow);
            }
        }
        Ok(())
    }

    /* Message dispatch */

    fn handle_message_in_state(&mut self, stamped: Stamped<DigitizerMessage>) {
        let DigitizerMessage::Command(command) = stamped.contents else {
            log::warn!(
                "{}",
                self.format_log("Discarding a non-command inbound message.")
            );
            return;
        };

        let result = match self.state {
            DigitizerState::NotInitialized => self.handle_in_not_initialized(&command),
            DigitizerState::Initialization => Err(CoreError::unsupported(format!(
                "action '{}' in state INITIALIZATION",
                command.name()
            ))),
            DigitizerState::Idle => self.handle_in_idle(&command),
            DigitizerState::Acquisition => self.handle_in_acquisition(&command),
        };

        /* The acknowledgement protocol: echo the command with a result code,
           then EventClear on success or EventError with the rendered message
           on failure. The state is left as the handler set it. */
        match result {
            Ok(()) => {
                log::trace!(
                    "{}",
                    self.format_log(&format!("Processed command {}.", command.name()))
                );
                self.post_echo(stamped.id, command, StatusCodes::OK);
                self.post(DigitizerMessage::EventClear);
            }
            Err(error) => {
                self.post_echo(stamped.id, command, error.code());
                self.signal_error(error);
            }
        }
    }

    fn handle_in_not_initialized(&mut self, command: &DigitizerCommand) -> CoreResult<()> {
        /* Any command retries the initialization; on success the command is
           dispatched as if received in Idle. */
        match self.initialize() {
            Ok(()) => {
                self.set_state(DigitizerState::Idle);
                self.handle_in_idle(command)
            }
            Err(error) => {
                self.set_state(DigitizerState::NotInitialized);
                Err(error)
            }
        }
    }

    fn handle_in_idle(&mut self, command: &DigitizerCommand) -> CoreResult<()> {
        match command {
            DigitizerCommand::StartAcquisition => self.start_data_acquisition(),
            DigitizerCommand::SetTopParameters => self.set_parameters(ParameterSet::Top),
            DigitizerCommand::SetClockSystemParameters => {
                self.set_parameters(ParameterSet::ClockSystem)?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()
            }
            DigitizerCommand::SetInternalReference => {
                self.configure_internal_reference()?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()
            }
            DigitizerCommand::SetExternalReference => {
                self.configure_external_reference()?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()
            }
            DigitizerCommand::SetExternalClock => {
                self.configure_external_clock()?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()
            }
            DigitizerCommand::DefaultAcquisition => self.configure_default_acquisition(),
            DigitizerCommand::ScaleRecordLength(factor) => self.scale_record_length(*factor),
            DigitizerCommand::ForceAcquisition => {
                Err(CoreError::unsupported("ForceAcquisition is not implemented"))
            }
            DigitizerCommand::GetTopParameters => self.get_parameters(ParameterSet::Top),
            DigitizerCommand::GetClockSystemParameters => {
                self.get_parameters(ParameterSet::ClockSystem)
            }
            DigitizerCommand::ValidateParameters => self.validate_parameters(),
            DigitizerCommand::InitializeParameters => {
                if !self.parameters_top.is_empty() || !self.parameters_clock.is_empty() {
                    /* Let the frontend confirm before clobbering a nonempty
                       configuration. */
                    self.post(DigitizerMessage::InitializeWouldOverwrite);
                    return Ok(());
                }
                self.initialize_parameters(ParameterSet::Top)?;
                self.initialize_parameters(ParameterSet::ClockSystem)
            }
            DigitizerCommand::InitializeParametersForce => {
                self.initialize_parameters(ParameterSet::Top)?;
                self.initialize_parameters(ParameterSet::ClockSystem)
            }
            DigitizerCommand::SetProcessingParameters(parameters) => {
                for pipeline in &self.pipelines {
                    pipeline.push_message(DspMessage::SetParameters(parameters.clone()))?;
                }
                Ok(())
            }
            DigitizerCommand::ClearProcessingMemory => {
                for pipeline in &self.pipelines {
                    pipeline.push_message(DspMessage::ClearProcessingMemory)?;
                }
                Ok(())
            }
            DigitizerCommand::GetTopParametersFilename => {
                let path = self.watcher_path(ParameterSet::Top)?;
                self.post(DigitizerMessage::ParametersFilename(path));
                Ok(())
            }
            DigitizerCommand::GetClockSystemParametersFilename => {
                let path = self.watcher_path(ParameterSet::ClockSystem)?;
                self.post(DigitizerMessage::ParametersFilename(path));
                Ok(())
            }
            DigitizerCommand::CallPython(module) => self.call_python(&module.clone()),
            DigitizerCommand::StopAcquisition => Err(CoreError::unsupported(format!(
                "action '{}' in state IDLE",
                command.name()
            ))),
        }
    }

    fn handle_in_acquisition(&mut self, command: &DigitizerCommand) -> CoreResult<()> {
        match command {
            DigitizerCommand::StopAcquisition => {
                self.stop_data_acquisition();
                Ok(())
            }

            /* Reconfiguration mid-stream: stop, edit, start again. */
            DigitizerCommand::DefaultAcquisition => {
                self.stop_data_acquisition();
                self.configure_default_acquisition()?;
                self.start_data_acquisition()
            }
            DigitizerCommand::ScaleRecordLength(factor) => {
                let factor = *factor;
                self.stop_data_acquisition();
                self.scale_record_length(factor)?;
                self.start_data_acquisition()
            }
            DigitizerCommand::SetTopParameters => {
                self.stop_data_acquisition();
                self.set_parameters(ParameterSet::Top)?;
                self.start_data_acquisition()
            }
            DigitizerCommand::SetClockSystemParameters => {
                self.stop_data_acquisition();
                self.set_parameters(ParameterSet::ClockSystem)?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()?;
                self.start_data_acquisition()
            }
            DigitizerCommand::SetInternalReference => {
                self.stop_data_acquisition();
                self.configure_internal_reference()?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()?;
                self.start_data_acquisition()
            }
            DigitizerCommand::SetExternalReference => {
                self.stop_data_acquisition();
                self.configure_external_reference()?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()?;
                self.start_data_acquisition()
            }
            DigitizerCommand::SetExternalClock => {
                self.stop_data_acquisition();
                self.configure_external_clock()?;
                self.set_parameters(ParameterSet::Top)?;
                self.emit_constant_parameters()?;
                self.start_data_acquisition()
            }
            DigitizerCommand::CallPython(module) => {
                let module = module.clone();
                self.stop_data_acquisition();
                self.call_python(&module)?;
                self.start_data_acquisition()
            }

            /* No reconfiguration needed; handled in place. */
            DigitizerCommand::SetProcessingParameters(parameters) => {
                for pipeline in &self.pipelines {
                    pipeline.push_message(DspMessage::SetParameters(parameters.clone()))?;
                }
                Ok(())
            }
            DigitizerCommand::ClearProcessingMemory => {
                for pipeline in &self.pipelines {
                    pipeline.push_message(DspMessage::ClearProcessingMemory)?;
                }
                Ok(())
            }
            DigitizerCommand::GetTopParametersFilename => {
                let path = self.watcher_path(ParameterSet::Top)?;
                self.post(DigitizerMessage::ParametersFilename(path));
                Ok(())
            }
            DigitizerCommand::GetClockSystemParametersFilename => {
                let path = self.watcher_path(ParameterSet::ClockSystem)?;
                self.post(DigitizerMessage::ParametersFilename(path));
                Ok(())
            }

            other => Err(CoreError::unsupported(format!(
                "action '{}' in state ACQUISITION",
                other.name()
            ))),
        }
    }

    /* Actions */

    fn start_data_acquisition(&mut self) -> CoreResult<()> {
        let result = self.try_start_data_acquisition();
        if result.is_err() {
            /* Roll back to a clean Idle. */
            self.stop_data_acquisition();
        }
        result
    }

    fn try_start_data_acquisition(&mut self) -> CoreResult<()> {
        let afe = self
            .api
            .analog_frontend_parameters(self.index)
            .map_err(|error| self.vendor_error("GetParameters (analog frontend)", error))?;
        let transfer = self
            .api
            .transfer_parameters(self.index)
            .map_err(|error| self.vendor_error("GetParameters (transfer)", error))?;

        for (ch, pipeline) in self.pipelines.iter().enumerate() {
            /* Only channels with transfer buffers are enabled. */
            let enabled = transfer
                .channel
                .get(ch)
                .map_or(false, |channel| channel.nof_buffers > 0);
            if !enabled {
                continue;
            }

            let channel_afe = afe.channel.get(ch).copied().unwrap_or_default();
            pipeline.push_message(DspMessage::SetAnalogFrontEnd(channel_afe))?;
            pipeline.start().map_err(|error| {
                CoreError::internal(format!(
                    "failed to start data processing for '{}': {}",
                    pipeline.label(),
                    error.message()
                ))
            })?;
        }

        self.api
            .start_data_acquisition(self.index)
            .map_err(|error| self.vendor_error("StartDataAcquisition", error))?;

        self.no_activity_threshold_ms = DEFAULT_ACTIVITY_THRESHOLD_MS;
        self.notified_no_activity = false;
        self.set_state(DigitizerState::Acquisition);
        Ok(())
    }

    /// Stop every pipeline and the vendor-side acquisition. Failures are
    /// logged but never fatal: every stop is attempted regardless.
    fn stop_data_acquisition(&mut self) {
        for pipeline in &self.pipelines {
            if let Err(error) = pipeline.stop() {
                if error != CoreError::NotReady {
                    log::warn!(
                        "{}",
                        self.format_log(&format!(
                            "Data processing for '{}' exited with: {}",
                            pipeline.label(),
                            error.message()
                        ))
                    );
                }
            }
        }
        if let Err(error) = self.api.stop_data_acquisition(self.index) {
            log::warn!(
                "{}",
                self.format_log(&format!("StopDataAcquisition failed: {}", error.message()))
            );
        }
        self.set_state(DigitizerState::Idle);
    }

    fn set_parameters(&mut self, set: ParameterSet) -> CoreResult<()> {
        self.post(DigitizerMessage::EventConfiguration);
        let blob = match set {
            ParameterSet::Top => Arc::clone(&self.parameters_top),
            ParameterSet::ClockSystem => Arc::clone(&self.parameters_clock),
        };
        self.api
            .set_parameters_string(self.index, &blob)
            .map_err(|error| self.vendor_error("SetParametersString", error))
    }

    fn get_parameters(&mut self, set: ParameterSet) -> CoreResult<()> {
        let json = self
            .api
            .get_parameters_string(self.index, set)
            .map_err(|error| self.vendor_error("GetParametersString", error))?;
        let contents = Arc::new(json);

        let watchers = self
            .watchers
            .as_ref()
            .ok_or_else(|| CoreError::internal("file watchers not initialized"))?;
        let watcher = match set {
            ParameterSet::Top => &watchers.top,
            ParameterSet::ClockSystem => &watchers.clock_system,
        };

        /* The blob mirrors the device's current state, so the watcher must
           not bounce a change notification back. */
        watcher.commands.write(
            WatcherCommand::UpdateFile {
                contents: Arc::clone(&contents),
                suppress_echo: true,
            },
            Timeout::Immediate,
        )?;

        match set {
            ParameterSet::Top => self.parameters_top = contents,
            ParameterSet::ClockSystem => self.parameters_clock = contents,
        }
        Ok(())
    }

    fn initialize_parameters(&mut self, set: ParameterSet) -> CoreResult<()> {
        let json = self
            .api
            .initialize_parameters_string(self.index, set)
            .map_err(|error| self.vendor_error("InitializeParametersString", error))?;

        let watchers = self
            .watchers
            .as_ref()
            .ok_or_else(|| CoreError::internal("file watchers not initialized"))?;
        let watcher = match set {
            ParameterSet::Top => &watchers.top,
            ParameterSet::ClockSystem => &watchers.clock_system,
        };

        watcher.commands.write(
            WatcherCommand::UpdateFile {
                contents: Arc::new(json),
                suppress_echo: false,
            },
            Timeout::Immediate,
        )
    }

    fn validate_parameters(&mut self) -> CoreResult<()> {
        self.api
            .validate_parameters_string(self.index, &self.parameters_top)
            .map_err(|error| self.vendor_error("ValidateParametersString (top)", error))?;
        self.api
            .validate_parameters_string(self.index, &self.parameters_clock)
            .map_err(|error| self.vendor_error("ValidateParametersString (clock system)", error))
    }

    fn configure_internal_reference(&mut self) -> CoreResult<()> {
        let mut clock_system = self
            .api
            .initialize_clock_system_parameters(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (clock system)", error))?;

        clock_system.clock_generator = ClockGenerator::InternalPll;
        clock_system.reference_source = ReferenceSource::Internal;

        self.api
            .set_clock_system_parameters(self.index, &clock_system)
            .map_err(|error| self.vendor_error("SetParameters (clock system)", error))
    }

    fn configure_external_reference(&mut self) -> CoreResult<()> {
        let mut clock_system = self
            .api
            .initialize_clock_system_parameters(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (clock system)", error))?;

        clock_system.clock_generator = ClockGenerator::InternalPll;
        clock_system.reference_source = ReferenceSource::PortClk;
        clock_system.reference_frequency = 10e6;
        clock_system.low_jitter_mode_enabled = true;

        self.api
            .set_clock_system_parameters(self.index, &clock_system)
            .map_err(|error| self.vendor_error("SetParameters (clock system)", error))
    }

    fn configure_external_clock(&mut self) -> CoreResult<()> {
        let mut clock_system = self
            .api
            .initialize_clock_system_parameters(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (clock system)", error))?;

        clock_system.clock_generator = ClockGenerator::ExternalClock;

        self.api
            .set_clock_system_parameters(self.index, &clock_system)
            .map_err(|error| self.vendor_error("SetParameters (clock system)", error))
    }

    /// An infinite stream of 32k records from every acquisition channel,
    /// triggered by the periodic event generator at 15 Hz.
    fn configure_default_acquisition(&mut self) -> CoreResult<()> {
        let mut periodic = self
            .api
            .initialize_periodic_event_source(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (periodic)", error))?;
        let mut acquisition = self
            .api
            .initialize_acquisition_parameters(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (acquisition)", error))?;
        let mut transfer = self
            .api
            .initialize_transfer_parameters(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (transfer)", error))?;
        let mut readout = self
            .api
            .initialize_readout_parameters(self.index)
            .map_err(|error| self.vendor_error("InitializeParameters (readout)", error))?;

        let nof_channels = self.constant.nof_acquisition_channels as usize;
        acquisition
            .channel
            .resize(nof_channels, Default::default());
        transfer.channel.resize(nof_channels, Default::default());
        readout.channel.resize(nof_channels, Default::default());

        for ch in 0..nof_channels {
            acquisition.channel[ch] = DataAcquisitionParametersChannel {
                nof_records: INFINITE_RECORDS,
                record_length: DEFAULT_RECORD_LENGTH,
                horizontal_offset: 0,
                trigger_source: EventSource::Periodic,
                trigger_edge: TriggerEdge::Rising,
            };
            transfer.channel[ch] = DataTransferParametersChannel {
                nof_buffers: 8,
                metadata_enabled: true,
                metadata_buffer_size: std::mem::size_of::<RecordHeader>() as u64,
                record_buffer_size: 32 * self.constant.record_buffer_size_step,
                dynamic_record_length_enabled: true,
            };
            readout.channel[ch] = DataReadoutParametersChannel {
                nof_record_buffers_max: INFINITE_RECORDS,
                record_buffer_size_max: INFINITE_RECORD_LENGTH,
            };
        }
        periodic.frequency = DEFAULT_TRIGGER_FREQUENCY;

        self.api
            .set_periodic_event_source(self.index, &periodic)
            .map_err(|error| self.vendor_error("SetParameters (periodic)", error))?;
        self.api
            .set_acquisition_parameters(self.index, &acquisition)
            .map_err(|error| self.vendor_error("SetParameters (acquisition)", error))?;
        self.api
            .set_transfer_parameters(self.index, &transfer)
            .map_err(|error| self.vendor_error("SetParameters (transfer)", error))?;
        self.api
            .set_readout_parameters(self.index, &readout)
            .map_err(|error| self.vendor_error("SetParameters (readout)", error))?;

        /* Reflect the new settings in the configuration file. */
        self.get_parameters(ParameterSet::Top)
    }

    fn scale_record_length(&mut self, factor: f64) -> CoreResult<()> {
        let mut acquisition = self
            .api
            .acquisition_parameters(self.index)
            .map_err(|error| self.vendor_error("GetParameters (acquisition)", error))?;

        for channel in acquisition.channel.iter_mut() {
            if channel.nof_records == 0 {
                continue;
            }
            channel.record_length = (factor * channel.record_length as f64).round() as i64;
        }

        self.api
            .set_acquisition_parameters(self.index, &acquisition)
            .map_err(|error| self.vendor_error("SetParameters (acquisition)", error))?;

        self.get_parameters(ParameterSet::Top)
    }

    fn call_python(&mut self, module: &str) -> CoreResult<()> {
        self.post(DigitizerMessage::EventPython);

        let host = self
            .script_host
            .clone()
            .ok_or_else(|| CoreError::unsupported("no scripting host attached"))?;

        match host.call_main(module, self.index) {
            Ok(output) => {
                log::info!(
                    "{}",
                    self.format_log(&format!(
                        "Successfully called main() in module '{}'.",
                        module
                    ))
                );
                if !output.is_empty() {
                    log::info!(
                        "{}",
                        self.format_log(&format!("Captured stdout:\n\n{}", output))
                    );
                }

                /* The script may have changed device state; synchronize the
                   parameter files. */
                self.get_parameters(ParameterSet::Top)?;
                self.get_parameters(ParameterSet::ClockSystem)
            }
            Err(output) => Err(CoreError::internal(format!(
                "Error when calling main() in module '{}':\n\n{}",
                module, output
            ))),
        }
    }

    fn emit_constant_parameters(&mut self) -> CoreResult<()> {
        self.constant = self
            .api
            .constant_parameters(self.index)
            .map_err(|error| self.vendor_error("GetParameters (constant)", error))?;
        self.post(DigitizerMessage::Constants(Box::new(self.constant.clone())));
        Ok(())
    }

    /* Helpers */

    fn watcher_path(&self, set: ParameterSet) -> CoreResult<String> {
        let watchers = self
            .watchers
            .as_ref()
            .ok_or_else(|| CoreError::internal("file watchers not initialized"))?;
        let watcher = match set {
            ParameterSet::Top => &watchers.top,
            ParameterSet::ClockSystem => &watchers.clock_system,
        };
        Ok(watcher.path.to_string_lossy().into_owned())
    }

    fn set_state(&mut self, state: DigitizerState) {
        self.state = state;
        self.post(DigitizerMessage::State(state));
    }

    fn post(&self, message: DigitizerMessage) {
        if let Err(error) = self.messages.post(message) {
            log::trace!(
                "{}",
                self.format_log(&format!("Dropped an outbound message: {}.", error))
            );
        }
    }

    fn post_echo(&self, id: u32, command: DigitizerCommand, result: i32) {
        let echo = DigitizerMessage::CommandDone { command, result };
        let outcome = if id != 0 {
            self.messages.post_stamped(id, echo)
        } else {
            self.messages.post(echo)
        };
        if let Err(error) = outcome {
            log::trace!(
                "{}",
                self.format_log(&format!("Dropped a command echo: {}.", error))
            );
        }
    }

    fn signal_error(&self, error: CoreError) {
        let message = self.format_log(&error.message());
        log::error!("{}", message);
        self.post(DigitizerMessage::EventError(message));
    }

    fn vendor_error(&self, operation: &str, error: CoreError) -> CoreError {
        CoreError::internal(format!("{} failed: {}", operation, error.message()))
    }

    fn format_log(&self, message: &str) -> String {
        if !self.constant.product_name.is_empty() && !self.constant.serial_number.is_empty() {
            format!(
                "{} {}: {}",
                self.constant.product_name, self.constant.serial_number, message
            )
        } else {
            message.to_string()
        }
    }
}
