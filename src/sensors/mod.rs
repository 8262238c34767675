//! Sensor module - reader dispatch, simulated and hardware-backed readers

mod traits;
mod simulated;
mod script;
mod environmental;
mod registry;

pub use traits::{
    param_f64, param_i64, param_str, ParamError, Params, ReadError, Reader, Reading,
    SensorDefinition, DEFAULT_READ_DEADLINE,
};
pub use simulated::{RandomIntReader, StaticReader, UniformFloatReader};
pub use script::ScriptReader;
pub use environmental::{Bme280Reader, DriverInit, DriverState, EnvironmentalDriver};
pub use registry::{BuildContext, ReaderFactory, ReaderTable, SensorRegistry};
