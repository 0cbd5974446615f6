//! Sensor backends
//!
//! Two implementations of the same `Sensors` trait:
//! - `PowerDojo`: FFI bindings to the vendor accelerator library, loaded
//!   at runtime with libloading
//! - `SimulatedSensors`: jittered readings around realistic operating
//!   points, used whenever the native library is absent
//!
//! Backend selection happens once at startup in `load_sensors()`.

use anyhow::{Context, Result};
use libloading::Library;
use rand::Rng;
use std::os::raw::c_void;
use std::path::Path;
use tracing::{info, warn};

/// One synchronous read of all sensor channels
#[derive(Debug, Clone, Copy)]
pub struct SensorReadings {
    pub temperature_c: f32,
    pub voltage_out: f32,
    pub current_in: f32,
}

impl SensorReadings {
    pub fn power_w(&self) -> f32 {
        self.voltage_out * self.current_in
    }
}

pub trait Sensors: Send + Sync {
    /// Read all channels. Infallible by contract: backends return their
    /// last-known or simulated values rather than erroring mid-run.
    fn read(&self) -> SensorReadings;

    /// Apply a new voltage setpoint. Returns false if the hardware
    /// rejected the value.
    fn set_voltage_reference(&self, target: f32) -> bool;

    fn backend(&self) -> &'static str;
}

/// FFI bindings to the PowerDojo accelerator library.
///
/// The library owns an opaque device handle created by
/// `initialize_accelerator()`; every call passes it back in. Symbols are
/// resolved per call so a partially implemented library degrades to a
/// warning instead of an abort at load time.
pub struct PowerDojo {
    lib: Library,
    handle: *mut c_void,
}

// The vendor library serializes access to the handle internally; the
// handle itself is never dereferenced on the Rust side.
unsafe impl Send for PowerDojo {}
unsafe impl Sync for PowerDojo {}

impl PowerDojo {
    pub fn load(lib_path: &str) -> Result<Self> {
        let lib = unsafe { Library::new(lib_path) }
            .with_context(|| format!("loading sensor library {lib_path}"))?;

        let handle = unsafe {
            let init: libloading::Symbol<unsafe extern "C" fn() -> *mut c_void> = lib
                .get(b"initialize_accelerator")
                .context("missing symbol initialize_accelerator")?;
            init()
        };
        if handle.is_null() {
            anyhow::bail!("initialize_accelerator returned null handle");
        }

        Ok(Self { lib, handle })
    }

    fn read_channel(&self, symbol: &[u8]) -> f32 {
        unsafe {
            match self.lib.get::<unsafe extern "C" fn(*mut c_void) -> f32>(symbol) {
                Ok(getter) => getter(self.handle),
                Err(e) => {
                    warn!("sensor symbol {} unavailable: {e}", String::from_utf8_lossy(symbol));
                    0.0
                }
            }
        }
    }
}

impl Sensors for PowerDojo {
    fn read(&self) -> SensorReadings {
        SensorReadings {
            temperature_c: self.read_channel(b"get_temperature"),
            voltage_out: self.read_channel(b"get_voltage_out"),
            current_in: self.read_channel(b"get_current_in"),
        }
    }

    fn set_voltage_reference(&self, target: f32) -> bool {
        unsafe {
            match self
                .lib
                .get::<unsafe extern "C" fn(*mut c_void, f32) -> i32>(b"set_voltage_reference")
            {
                Ok(setter) => setter(self.handle, target) == 0,
                Err(e) => {
                    warn!("sensor symbol set_voltage_reference unavailable: {e}");
                    false
                }
            }
        }
    }

    fn backend(&self) -> &'static str {
        "powerdojo"
    }
}

/// Simulated buck converter: temperature around 45°C, output tracking
/// the commanded setpoint, input current around 2.5A
pub struct SimulatedSensors {
    target_v: std::sync::Mutex<f32>,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        Self { target_v: std::sync::Mutex::new(12.0) }
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensors for SimulatedSensors {
    fn read(&self) -> SensorReadings {
        let mut rng = rand::thread_rng();
        let target = *self.target_v.lock().unwrap();
        SensorReadings {
            temperature_c: 45.0 + rng.gen_range(-15.0..15.0),
            voltage_out: target + rng.gen_range(-0.5..0.5),
            current_in: 2.5 + rng.gen_range(-0.5..0.5),
        }
    }

    fn set_voltage_reference(&self, target: f32) -> bool {
        *self.target_v.lock().unwrap() = target;
        true
    }

    fn backend(&self) -> &'static str {
        "simulated"
    }
}

/// Pick the sensor backend: native library if present at `lib_path`,
/// otherwise the simulator.
pub fn load_sensors(lib_path: &str) -> Box<dyn Sensors> {
    if Path::new(lib_path).exists() {
        match PowerDojo::load(lib_path) {
            Ok(sensors) => {
                info!("Using native sensor library: {lib_path}");
                return Box::new(sensors);
            }
            Err(e) => {
                warn!("Native sensor library unusable ({e:#}), falling back to simulation");
            }
        }
    } else {
        info!("No sensor library at {lib_path}, using simulated sensors");
    }
    Box::new(SimulatedSensors::new())
}
