// System-manager transaction layer
//
// The digitizer's management processor speaks a small request/response
// protocol tunneled through the vendor library's blocking transaction call.
// Each transaction is a command word, a write buffer and a read buffer; the
// responses are fixed-layout byte records matching the vendor ABI. Only the
// subset used by the controller is covered: sensor enumeration and readout,
// boot-entry enumeration and the management state.

use bytemuck::{Pod, Zeroable};

use crate::error::{CoreError, CoreResult};
use crate::vendor::DigitizerApi;

/// Command words of the system-manager protocol. This is a small subset and
/// can change with the management firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    SensorGetNofSensors = 0x0300,
    SensorGetMap = 0x0301,
    SensorGetValue = 0x0303,
    SensorGetInfo = 0x0307,
    SensorGetGroupInfo = 0x0308,
    BootGetNofEntries = 0x0400,
    BootGetMap = 0x0401,
    BootGetInfo = 0x0402,
    GetState = 0x0500,
    GetStateInfo = 0x0501,
}

pub const SENSOR_FORMAT_FLOAT: u32 = 1;

/// Static description of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SensorInformation {
    pub id: u32,
    pub group_id: u32,
    pub label: [u8; 16],
    pub unit: [u8; 8],
}

/// Static description of one sensor group.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SensorGroupInformation {
    pub id: u32,
    pub label: [u8; 16],
}

/// Outcome of one boot step.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BootInformation {
    pub status: i32,
    pub label: [u8; 32],
}

/// Description of a management state.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct StateInformation {
    pub label: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct SensorValueArg {
    id: u32,
    format: u32,
}

/// Render a NUL-padded fixed-size label as a string.
pub fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Typed access to the system manager of one device.
pub struct SystemManager<'a> {
    api: &'a dyn DigitizerApi,
    index: usize,
}

impl<'a> SystemManager<'a> {
    pub fn new(api: &'a dyn DigitizerApi, index: usize) -> Self {
        Self { api, index }
    }

    /// Run one transaction. The response must fill the read buffer exactly;
    /// a short or oversized response is an `Internal` error since the ABI
    /// records are fixed-layout.
    pub fn transaction(&self, command: Command, write: &[u8], read: &mut [u8]) -> CoreResult<()> {
        self.api
            .sm_transaction(self.index, command as u16, write, read)
    }

    fn read_pod<T: Pod>(&self, command: Command, write: &[u8]) -> CoreResult<T> {
        let mut value = T::zeroed();
        self.transaction(command, write, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    pub fn nof_sensors(&self) -> CoreResult<u32> {
        self.read_pod::<u32>(Command::SensorGetNofSensors, &[])
    }

    /// The flat sensor-id map. The device terminates the map with an
    /// end-of-map word which is stripped here.
    pub fn sensor_map(&self) -> CoreResult<Vec<u32>> {
        let count = self.nof_sensors()? as usize;
        let mut map = vec![0u32; count + 1]; /* +1 for EOM */
        self.transaction(
            Command::SensorGetMap,
            &[],
            bytemuck::cast_slice_mut(&mut map),
        )?;
        map.truncate(count);
        Ok(map)
    }

    pub fn sensor_info(&self, id: u32) -> CoreResult<SensorInformation> {
        self.read_pod(Command::SensorGetInfo, bytemuck::bytes_of(&id))
    }

    pub fn sensor_group_info(&self, id: u32) -> CoreResult<SensorGroupInformation> {
        self.read_pod(Command::SensorGetGroupInfo, bytemuck::bytes_of(&id))
    }

    /// Read the current value of one sensor in float format.
    pub fn read_sensor_value(&self, id: u32) -> CoreResult<f32> {
        let arg = SensorValueArg {
            id,
            format: SENSOR_FORMAT_FLOAT,
        };
        self.read_pod(Command::SensorGetValue, bytemuck::bytes_of(&arg))
    }

    pub fn nof_boot_entries(&self) -> CoreResult<u32> {
        self.read_pod::<u32>(Command::BootGetNofEntries, &[])
    }

    pub fn boot_map(&self) -> CoreResult<Vec<u32>> {
        let count = self.nof_boot_entries()? as usize;
        let mut map = vec![0u32; count + 1]; /* +1 for EOM */
        self.transaction(Command::BootGetMap, &[], bytemuck::cast_slice_mut(&mut map))?;
        map.truncate(count);
        Ok(map)
    }

    pub fn boot_info(&self, id: u32) -> CoreResult<BootInformation> {
        self.read_pod(Command::BootGetInfo, bytemuck::bytes_of(&id))
    }

    pub fn state(&self) -> CoreResult<i32> {
        self.read_pod::<i32>(Command::GetState, &[])
    }

    pub fn state_info(&self, state: i32) -> CoreResult<StateInformation> {
        self.read_pod(Command::GetStateInfo, bytemuck::bytes_of(&state))
    }
}

/// Check a response length against the read buffer; shared by backend
/// implementations of the transaction call.
pub fn check_response_length(expected: usize, actual: usize) -> CoreResult<()> {
    if expected != actual {
        return Err(CoreError::internal(format!(
            "system manager response length mismatch: expected {} bytes, got {}",
            expected, actual
        )));
    }
    Ok(())
}
