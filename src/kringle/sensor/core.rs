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

use std::error::Error;
use std::fmt::{self, Formatter};

use rppal::i2c::{self, I2c};

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Station pressure, in pascals
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Pascals(f64);

impl From<Pascals> for f64 {
    fn from(v: Pascals) -> Self {
        v.0
    }
}

impl From<f64> for Pascals {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Pascals {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}pa", self.0)
    }
}

/// Potential kinds of errors that can be encountered talking to a sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    Transport,
    Checksum,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Initialization => "initialization",
            SensorErrorKind::Transport => "transport",
            SensorErrorKind::Checksum => "checksum",
        }
    }
}

/// Error initializing or reading a sensor via the I2C bus
#[derive(Debug)]
pub enum SensorError {
    /// Expected CRC byte, computed CRC byte, and the decoded (untrusted) sample
    CheckSum(u8, u8, u16),
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::CheckSum(_, _, _) => SensorErrorKind::Checksum,
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }

    /// The decoded sample that failed checksum verification, if that is what
    /// this error represents. The value did not pass integrity checks and must
    /// not be trusted for anything beyond logging or diagnostics.
    pub fn rejected_sample(&self) -> Option<u16> {
        match self {
            SensorError::CheckSum(_, _, sample) => Some(*sample),
            _ => None,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::CheckSum(expected, computed, sample) => {
                write!(
                    f,
                    "checksum error: expected {:#04x}, computed {:#04x}, sample {:#06x}",
                    expected, computed, sample
                )
            }
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Open an I2C bus device by number and address a single peripheral on it.
///
/// Bus 1 is the bus exposed on the GPIO header of all recent Raspberry PI
/// models (pins 3 and 5). The returned handle talks exclusively to the
/// peripheral at `address` for its entire lifetime.
pub fn open_bus(bus: u8, address: u16) -> Result<I2c, SensorError> {
    let mut i2c = I2c::with_bus(bus).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to open I2C bus device",
            Box::new(e),
        )
    })?;

    i2c.set_slave_address(address).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to address peripheral on I2C bus",
            Box::new(e),
        )
    })?;

    Ok(i2c)
}

/// Abstraction around an `rppal::i2c::I2c` handle to allow for easier testing.
///
/// Register reads and writes address one of the peripheral's sub-registers
/// with a command byte; the raw `write` and `read` methods move bytes without
/// a register prefix and return the number of bytes actually transferred.
pub trait SensorBus {
    fn bus(&self) -> u8;
    fn write_register(&mut self, register: u8, bytes: &[u8]) -> Result<(), i2c::Error>;
    fn read_register(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), i2c::Error>;
    fn write(&mut self, bytes: &[u8]) -> Result<usize, i2c::Error>;
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, i2c::Error>;
}

impl SensorBus for I2c {
    fn bus(&self) -> u8 {
        I2c::bus(self)
    }

    fn write_register(&mut self, register: u8, bytes: &[u8]) -> Result<(), i2c::Error> {
        I2c::block_write(self, register, bytes)
    }

    fn read_register(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), i2c::Error> {
        I2c::block_read(self, register, buffer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, i2c::Error> {
        I2c::write(self, bytes)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, i2c::Error> {
        I2c::read(self, buffer)
    }
}
