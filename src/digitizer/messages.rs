// Message model of the digitizer controller
//
// The outside world drives a controller by pushing commands and reading the
// stream of events, state changes and acknowledgements coming back on the
// same channel. Every accepted command is echoed back with a result code;
// success is followed by `EventClear`, failure by `EventError` carrying the
// rendered message.

use crate::dsp::parameters::DspParameters;
use crate::vendor::types::ConstantParameters;

/// Controller states. Fatal initialization errors return to
/// `NotInitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitizerState {
    NotInitialized,
    Initialization,
    Idle,
    Acquisition,
}

/// One sensor as presented in the sensor tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub id: u32,
    pub group_id: u32,
    pub label: String,
}

/// A sensor group with its member sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorGroup {
    pub id: u32,
    pub label: String,
    pub sensors: Vec<Sensor>,
}

pub type SensorTree = Vec<SensorGroup>;

/// Outcome of one boot step, enumerated once at initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct BootEntry {
    pub id: u32,
    pub status: i32,
    pub label: String,
    pub note: String,
}

/// Commands the outside world can send to a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum DigitizerCommand {
    StartAcquisition,
    StopAcquisition,
    SetTopParameters,
    GetTopParameters,
    SetClockSystemParameters,
    GetClockSystemParameters,
    SetInternalReference,
    SetExternalReference,
    SetExternalClock,
    DefaultAcquisition,
    ScaleRecordLength(f64),
    ForceAcquisition,
    ValidateParameters,
    InitializeParameters,
    InitializeParametersForce,
    SetProcessingParameters(DspParameters),
    ClearProcessingMemory,
    GetTopParametersFilename,
    GetClockSystemParametersFilename,
    CallPython(String),
}

impl DigitizerCommand {
    /// Short name used in log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            DigitizerCommand::StartAcquisition => "StartAcquisition",
            DigitizerCommand::StopAcquisition => "StopAcquisition",
            DigitizerCommand::SetTopParameters => "SetTopParameters",
            DigitizerCommand::GetTopParameters => "GetTopParameters",
            DigitizerCommand::SetClockSystemParameters => "SetClockSystemParameters",
            DigitizerCommand::GetClockSystemParameters => "GetClockSystemParameters",
            DigitizerCommand::SetInternalReference => "SetInternalReference",
            DigitizerCommand::SetExternalReference => "SetExternalReference",
            DigitizerCommand::SetExternalClock => "SetExternalClock",
            DigitizerCommand::DefaultAcquisition => "DefaultAcquisition",
            DigitizerCommand::ScaleRecordLength(_) => "ScaleRecordLength",
            DigitizerCommand::ForceAcquisition => "ForceAcquisition",
            DigitizerCommand::ValidateParameters => "ValidateParameters",
            DigitizerCommand::InitializeParameters => "InitializeParameters",
            DigitizerCommand::InitializeParametersForce => "InitializeParametersForce",
            DigitizerCommand::SetProcessingParameters(_) => "SetProcessingParameters",
            DigitizerCommand::ClearProcessingMemory => "ClearProcessingMemory",
            DigitizerCommand::GetTopParametersFilename => "GetTopParametersFilename",
            DigitizerCommand::GetClockSystemParametersFilename => {
                "GetClockSystemParametersFilename"
            }
            DigitizerCommand::CallPython(_) => "CallPython",
        }
    }
}

/// Everything that travels on a controller's message channel, in either
/// direction.
#[derive(Debug, Clone, PartialEq)]
pub enum DigitizerMessage {
    /* The world -> digitizer. */
    Command(DigitizerCommand),

    /* Digitizer -> the world. */
    /// Echo of an accepted command with the numeric result code.
    CommandDone {
        command: DigitizerCommand,
        result: i32,
    },
    State(DigitizerState),
    Initialized(Box<ConstantParameters>),
    Constants(Box<ConstantParameters>),
    EventError(String),
    EventClear,
    EventOverflow,
    EventConfiguration,
    EventNoActivity,
    EventPython,
    InitializeWouldOverwrite,
    SensorTree(SensorTree),
    BootStatus {
        state: i32,
        description: String,
        entries: Vec<BootEntry>,
    },
    ParametersFilename(String),
    DramFill(f64),
    ChangedTopParameters,
    ChangedClockSystemParameters,
}
