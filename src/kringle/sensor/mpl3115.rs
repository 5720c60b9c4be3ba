// Kringle - Weather station metrics exporter for Prometheus
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::core::{Pascals, SensorBus, SensorError, SensorErrorKind, TemperatureCelsius};
use std::fmt::{Debug, Formatter};

/// Factory-default I2C address of the MPL3115.
pub const ADDRESS: u16 = 0x60;

pub const REG_SENSOR_STATUS: u8 = 0x00;
pub const REG_PRESSURE_MSB: u8 = 0x01;
pub const REG_PRESSURE_CSB: u8 = 0x02;
pub const REG_PRESSURE_LSB: u8 = 0x03;
pub const REG_TEMPERATURE_MSB: u8 = 0x04;
pub const REG_TEMPERATURE_LSB: u8 = 0x05;
pub const REG_FIFO_SETUP: u8 = 0x0f;
pub const REG_CTRL_1: u8 = 0x26;
pub const REG_CTRL_2: u8 = 0x27;
pub const REG_CTRL_3: u8 = 0x28;
pub const REG_CTRL_4: u8 = 0x29;
pub const REG_CTRL_5: u8 = 0x2a;

/// Configuration writes putting the device into raw barometer mode per
/// AN4519: FIFO and watermark disabled, oversampling 128, raw output,
/// active; interrupt and event control zeroed.
const CONFIG_SEQUENCE: [(u8, u8); 6] = [
    (REG_FIFO_SETUP, 0x00),
    (REG_CTRL_1, 0b0111_1001),
    (REG_CTRL_2, 0x00),
    (REG_CTRL_3, 0x00),
    (REG_CTRL_4, 0x00),
    (REG_CTRL_5, 0x00),
];

/// Length of the status byte plus the pressure and temperature output
/// registers, read as one block.
const DATA_SIZE: usize = 6;

/// A single barometer reading.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub pressure: Pascals,
    pub temperature: TemperatureCelsius,
}

/// Read station pressure and temperature from an MPL3115 barometer.
///
/// The device is configured for raw barometer mode at construction. The
/// conversion from raw-mode output registers to pascals is not implemented
/// yet: `measure()` performs the full bus exchange but reports both
/// quantities as unavailable. Like the hygrometer driver, instances must not
/// be shared between threads without external locking.
pub struct Mpl3115 {
    bus: Box<dyn SensorBus + Send + 'static>,
}

impl Mpl3115 {
    /// Create a driver from a bus handle addressed to the barometer, writing
    /// the raw barometer mode configuration sequence. If any of the writes
    /// fail the driver is not created.
    pub fn from_bus<T>(bus: T) -> Result<Self, SensorError>
    where
        T: SensorBus + Send + 'static,
    {
        let mut sensor = Mpl3115 { bus: Box::new(bus) };

        for (register, value) in CONFIG_SEQUENCE {
            sensor.bus.write_register(register, &[value]).map_err(|e| {
                SensorError::KindMsgCause(
                    SensorErrorKind::Transport,
                    "unable to write barometer control register",
                    Box::new(e),
                )
            })?;
        }

        Ok(sensor)
    }

    /// Read the status byte and output registers. Transport failures surface
    /// as errors; a successful exchange currently yields a placeholder
    /// measurement with both quantities unavailable, since the raw-mode
    /// conversion is not implemented.
    pub fn measure(&mut self) -> Result<Measurement, SensorError> {
        let mut buffer = [0u8; DATA_SIZE];
        self.bus.read_register(REG_SENSOR_STATUS, &mut buffer).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Transport,
                "unable to read barometer output registers",
                Box::new(e),
            )
        })?;

        tracing::debug!(message = "read barometer output registers", buffer = ?buffer);

        Ok(Measurement {
            pressure: Pascals::from(f64::NAN),
            temperature: TemperatureCelsius::from(f64::NAN),
        })
    }
}

impl Debug for Mpl3115 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mpl3115").field("bus", &self.bus.bus()).finish()
    }
}
