// Value and record model
//
// `Value` pairs a number with presentation properties; the record types are
// the owned outputs of the DSP pipelines and the sensor loop. Time-domain,
// frequency-domain and sensor records never alias in the processing paths,
// so they are three distinct structs rather than one sum type.

pub mod record;
pub mod value;

pub use record::{
    FrequencyDomainRecord, Persistence, ProcessedRecord, SensorRecord, TimeDomainMetrics,
    TimeDomainRecord, Waterfall,
};
pub use value::{Properties, Value, ValueWithStatistics};
