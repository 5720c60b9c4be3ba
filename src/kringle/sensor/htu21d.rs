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

use crate::sensor::core::{Humidity, SensorBus, SensorError, SensorErrorKind, TemperatureCelsius};
use crc_any::CRCu8;
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

/// Fixed I2C address of the HTU21D, not configurable in hardware.
pub const ADDRESS: u16 = 0x40;

/// Measure temperature, holding SCL until the conversion completes.
pub const CMD_MEASURE_TEMPERATURE_HOLD: u8 = 0xE3;
/// Measure relative humidity, holding SCL until the conversion completes.
pub const CMD_MEASURE_HUMIDITY_HOLD: u8 = 0xE5;
/// Measure temperature, releasing the bus during the conversion.
pub const CMD_MEASURE_TEMPERATURE: u8 = 0xF3;
/// Measure relative humidity, releasing the bus during the conversion.
pub const CMD_MEASURE_HUMIDITY: u8 = 0xF5;
/// Write the user register.
pub const CMD_WRITE_USER_REGISTER: u8 = 0xE6;
/// Read the user register.
pub const CMD_READ_USER_REGISTER: u8 = 0xE7;
/// Soft reset, rebooting the sensor without cycling power.
pub const CMD_SOFT_RESET: u8 = 0xFE;

/// Bits 3-5 of the user register are reserved and must be written back with
/// whatever values they were read with.
const RESERVED_MASK: u8 = 0b0011_1000;

/// Worst-case conversion time for a measurement at the highest resolution.
/// The no-hold measurement commands release the bus while the sensor converts,
/// so the driver has to wait this long before reading the result back.
const CONVERSION_DELAY: Duration = Duration::from_millis(75);

/// Time the sensor takes to reboot after a soft reset.
const SOFT_RESET_DELAY: Duration = Duration::from_millis(15);

const DATA_SIZE: usize = 3;

// Constants of the dew point approximation from the HTU21D datasheet.
const DEW_A: f64 = 8.1332;
const DEW_B: f64 = 1762.39;
const DEW_C: f64 = 235.66;

/// Compute the CRC-8 the HTU21D appends to every measurement: polynomial
/// 0x31, initial value 0x00, no reflection, no final XOR.
fn checksum(bytes: &[u8]) -> u8 {
    let mut crc = CRCu8::create_crc(0x31, 8, 0x00, 0x00, false);
    crc.digest(bytes);
    crc.get_crc()
}

/// Check a packet whose last byte is the CRC over all preceding bytes.
/// An empty packet never verifies.
fn verify(packet: &[u8]) -> bool {
    match packet.split_last() {
        Some((expected, data)) => *expected == checksum(data),
        None => false,
    }
}

/// Measurement resolution, heater, and OTP-reload settings written to the
/// sensor's user register when the driver is created.
///
/// The two resolution bits select the humidity/temperature conversion widths
/// (both clear is the 12/14 bit power-on default). The on-chip heater is
/// useful to drive off condensation at the cost of biasing the temperature
/// reading. The default disables everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Htu21dConfig {
    pub resolution_1: bool,
    pub resolution_0: bool,
    pub heater: bool,
    pub otp_reload_disable: bool,
}

/// Compute the byte written back to the user register: the configurable bits
/// from `config` with the reserved bits of the read-back byte carried through
/// unchanged.
fn user_register(current: u8, config: &Htu21dConfig) -> u8 {
    (u8::from(config.resolution_1) << 7)
        | (current & RESERVED_MASK)
        | (u8::from(config.heater) << 2)
        | (u8::from(config.otp_reload_disable) << 1)
        | u8::from(config.resolution_0)
}

/// Temperature in degrees celsius for a raw conversion result.
fn temperature_from_sample(sample: u16) -> TemperatureCelsius {
    TemperatureCelsius::from(175.72 * f64::from(sample) / 65536.0 - 46.85)
}

/// Relative humidity for a raw conversion result. Values slightly outside
/// 0-100 are possible at the extremes and are not clamped.
fn humidity_from_sample(sample: u16) -> Humidity {
    Humidity::from(125.0 * f64::from(sample) / 65536.0 - 6.0)
}

/// Saturation partial pressure of water vapor at the given ambient
/// temperature, in mmHg.
fn saturation_partial_pressure(ambient: f64) -> f64 {
    10.0_f64.powf(DEW_A - DEW_B / (ambient + DEW_C))
}

/// Dew point for an ambient temperature and relative humidity percentage.
///
/// The vapor pressure term must be positive for the formula to have a
/// solution; non-positive inputs (humidity at or below zero) yield NaN.
fn dew_point(ambient: TemperatureCelsius, humidity: Humidity) -> TemperatureCelsius {
    let vapor = f64::from(humidity) * saturation_partial_pressure(f64::from(ambient)) / 100.0;
    if vapor <= 0.0 {
        return TemperatureCelsius::from(f64::NAN);
    }

    TemperatureCelsius::from(-(DEW_B / (vapor.log10() - DEW_A) + DEW_C))
}

/// A single hygrometer reading: the two measured quantities and the dew point
/// derived from them.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub humidity: Humidity,
    pub temperature: TemperatureCelsius,
    pub dew_point: TemperatureCelsius,
}

/// Read relative humidity and temperature from an HTU21D sensor.
///
/// Creating the driver writes the sensor's user register once; the settings
/// are captured and never mutated afterwards. The driver is synchronous and
/// must not be shared between threads without external locking: a measurement
/// is a multi-step command/wait/read exchange that an interleaved caller
/// would corrupt.
pub struct Htu21d {
    bus: Box<dyn SensorBus + Send + 'static>,
    config: Htu21dConfig,
}

impl Htu21d {
    /// Create a driver from a bus handle addressed to the sensor, writing
    /// `config` to the user register. Reserved register bits are read first
    /// and carried through unchanged. If the register exchange fails the
    /// driver is not created.
    pub fn from_bus<T>(bus: T, config: Htu21dConfig) -> Result<Self, SensorError>
    where
        T: SensorBus + Send + 'static,
    {
        let mut sensor = Htu21d {
            bus: Box::new(bus),
            config,
        };
        sensor.configure()?;
        Ok(sensor)
    }

    /// Read-modify-write the user register with the captured configuration.
    fn configure(&mut self) -> Result<(), SensorError> {
        let mut current = [0u8; 1];
        self.bus.read_register(CMD_READ_USER_REGISTER, &mut current).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Transport,
                "unable to read user register",
                Box::new(e),
            )
        })?;

        let register = user_register(current[0], &self.config);
        self.bus.write_register(CMD_WRITE_USER_REGISTER, &[register]).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Transport,
                "unable to write user register",
                Box::new(e),
            )
        })?;

        tracing::debug!(
            message = "configured user register",
            read_back = current[0],
            written = register
        );
        Ok(())
    }

    /// Soft reset the sensor and wait for it to reboot. The reset reverts the
    /// user register to its power-on defaults, so the captured configuration
    /// is written again afterwards.
    pub fn reset(&mut self) -> Result<(), SensorError> {
        self.bus.write(&[CMD_SOFT_RESET]).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Transport,
                "unable to issue soft reset",
                Box::new(e),
            )
        })?;
        thread::sleep(SOFT_RESET_DELAY);
        self.configure()
    }

    /// Issue a no-hold measurement command, block for the conversion, and
    /// read back the checksummed raw sample.
    fn read_raw(&mut self, command: u8, conversion_delay: Duration) -> Result<u16, SensorError> {
        self.bus.write(&[command]).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Transport,
                "unable to issue measurement command",
                Box::new(e),
            )
        })?;

        // No-hold commands release the bus during the conversion; the result
        // is not available until the conversion has finished.
        thread::sleep(conversion_delay);

        let mut buffer = [0u8; DATA_SIZE];
        let n = self.bus.read(&mut buffer).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Transport,
                "unable to read measurement data",
                Box::new(e),
            )
        })?;
        if n < buffer.len() {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Transport,
                "short read of measurement data",
            ));
        }

        let sample = u16::from(buffer[0]) << 8 | u16::from(buffer[1]);
        tracing::trace!(message = "read measurement packet", command = command, packet = ?buffer);

        if !verify(&buffer) {
            return Err(SensorError::CheckSum(buffer[2], checksum(&buffer[..2]), sample));
        }

        Ok(sample)
    }

    /// Measure relative humidity and temperature, derive the dew point, and
    /// return all three. Blocks for one conversion delay per quantity. A
    /// failure reading either quantity fails the whole measurement.
    pub fn measure(&mut self) -> Result<Measurement, SensorError> {
        let raw = self.read_raw(CMD_MEASURE_HUMIDITY, CONVERSION_DELAY)?;
        let humidity = humidity_from_sample(raw);

        let raw = self.read_raw(CMD_MEASURE_TEMPERATURE, CONVERSION_DELAY)?;
        let temperature = temperature_from_sample(raw);

        Ok(Measurement {
            humidity,
            temperature,
            dew_point: dew_point(temperature, humidity),
        })
    }
}

impl Debug for Htu21d {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Htu21d")
            .field("bus", &self.bus.bus())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{
        checksum, dew_point, humidity_from_sample, temperature_from_sample, user_register, verify,
        Htu21d, Htu21dConfig, CMD_MEASURE_HUMIDITY, CMD_MEASURE_TEMPERATURE, CMD_READ_USER_REGISTER,
        CMD_SOFT_RESET, CMD_WRITE_USER_REGISTER,
    };
    use crate::sensor::core::{Humidity, SensorErrorKind, TemperatureCelsius};
    use crate::sensor::test::{MockBus, RefusingBus};

    // Measurement packets captured from a sensor: two data bytes followed by
    // their CRC. 0x683a decodes to 44.89%, 0x6a0c to 25.94c.
    const HUMIDITY_PACKET: [u8; 3] = [0x68, 0x3a, 0x7c];
    const TEMPERATURE_PACKET: [u8; 3] = [0x6a, 0x0c, 0xc6];

    #[test]
    fn test_checksum_check_value() {
        // The check value of this CRC-8 variant over the conventional
        // "123456789" test input.
        assert_eq!(0xff, checksum(b"123456789"));
    }

    #[test]
    fn test_checksum_datasheet_sample() {
        // Datasheet example: sensor answer 0x4e85 carries checksum 0x6b.
        assert_eq!(0x6b, checksum(&[0x4e, 0x85]));
    }

    #[test]
    fn test_verify_valid_packet() {
        assert!(verify(&HUMIDITY_PACKET));
        assert!(verify(&TEMPERATURE_PACKET));
        assert!(verify(&[0x4e, 0x85, 0x6b]));
    }

    #[test]
    fn test_verify_empty_packet() {
        assert!(!verify(&[]));
    }

    #[test]
    fn test_verify_rejects_any_flipped_bit() {
        for byte in 0..HUMIDITY_PACKET.len() {
            for bit in 0..8 {
                let mut corrupted = HUMIDITY_PACKET;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    !verify(&corrupted),
                    "flipping bit {} of byte {} went undetected",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_user_register_preserves_reserved_bits() {
        let config = Htu21dConfig {
            resolution_1: true,
            resolution_0: false,
            heater: true,
            otp_reload_disable: false,
        };

        // All reserved bits set in the read-back byte, all configurable bits
        // clear: the written byte is the reserved bits plus bit 7 and bit 2.
        assert_eq!(0b1011_1100, user_register(0b0011_1000, &config));
    }

    #[test]
    fn test_user_register_all_options() {
        let config = Htu21dConfig {
            resolution_1: true,
            resolution_0: true,
            heater: true,
            otp_reload_disable: true,
        };

        assert_eq!(0b1000_0111, user_register(0x00, &config));
        assert_eq!(0b1011_1111, user_register(0xff, &config));
    }

    #[test]
    fn test_temperature_from_sample_bounds() {
        assert_eq!(TemperatureCelsius::from(-46.85), temperature_from_sample(0));
        // Not clamped to the physical sensor range at the top end.
        assert_eq!(
            TemperatureCelsius::from(175.72 * 65535.0 / 65536.0 - 46.85),
            temperature_from_sample(0xffff)
        );
    }

    #[test]
    fn test_humidity_from_sample_bounds() {
        assert_eq!(Humidity::from(-6.0), humidity_from_sample(0));
        assert_eq!(
            Humidity::from(125.0 * 65535.0 / 65536.0 - 6.0),
            humidity_from_sample(0xffff)
        );
    }

    #[test]
    fn test_dew_point_saturation() {
        // At 100% relative humidity the dew point is the ambient temperature.
        for ambient in [-10.0, 0.0, 18.5, 35.0] {
            let dp = dew_point(TemperatureCelsius::from(ambient), Humidity::from(100.0));
            assert!(
                (f64::from(dp) - ambient).abs() < 0.01,
                "dew point {} at {}c and saturation",
                dp,
                ambient
            );
        }
    }

    #[test]
    fn test_dew_point_out_of_domain() {
        let dp = dew_point(TemperatureCelsius::from(20.0), Humidity::from(0.0));
        assert!(f64::from(dp).is_nan());

        let dp = dew_point(TemperatureCelsius::from(20.0), Humidity::from(-3.0));
        assert!(f64::from(dp).is_nan());
    }

    #[test]
    fn test_from_bus_writes_user_register() {
        let bus = MockBus::new(0b0011_1000, vec![]);
        let traffic = bus.traffic();
        let _sensor = Htu21d::from_bus(
            bus,
            Htu21dConfig {
                heater: true,
                ..Default::default()
            },
        )
        .unwrap();

        let traffic = traffic.lock().unwrap();
        assert_eq!(vec![CMD_READ_USER_REGISTER], traffic.register_reads);
        assert_eq!(
            vec![(CMD_WRITE_USER_REGISTER, vec![0b0011_1100])],
            traffic.register_writes
        );
    }

    #[test]
    fn test_from_bus_refused() {
        let res = Htu21d::from_bus(RefusingBus, Htu21dConfig::default());
        assert!(res.is_err());
        assert_eq!(SensorErrorKind::Transport, res.unwrap_err().kind());
    }

    #[test]
    fn test_measure_valid() {
        let bus = MockBus::new(0x02, vec![HUMIDITY_PACKET.to_vec(), TEMPERATURE_PACKET.to_vec()]);
        let mut sensor = Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap();
        let m = sensor.measure().unwrap();

        assert_eq!(Humidity::from(125.0 * 26682.0 / 65536.0 - 6.0), m.humidity);
        assert_eq!(
            TemperatureCelsius::from(175.72 * 27148.0 / 65536.0 - 46.85),
            m.temperature
        );
        // Mid-forties humidity at room temperature puts the dew point around
        // 13c; anything wildly off means the inputs were wired up wrong.
        let dp = f64::from(m.dew_point);
        assert!(dp > 12.0 && dp < 14.0, "dew point {}", dp);
    }

    #[test]
    fn test_measure_commands_issued_per_quantity() {
        let bus = MockBus::new(0x02, vec![HUMIDITY_PACKET.to_vec(), TEMPERATURE_PACKET.to_vec()]);
        let traffic = bus.traffic();
        let mut sensor = Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap();
        sensor.measure().unwrap();

        let traffic = traffic.lock().unwrap();
        assert_eq!(
            vec![vec![CMD_MEASURE_HUMIDITY], vec![CMD_MEASURE_TEMPERATURE]],
            traffic.writes
        );
    }

    #[test]
    fn test_measure_short_read() {
        // Two of the three expected bytes show up.
        let bus = MockBus::new(0x02, vec![HUMIDITY_PACKET[..2].to_vec()]);
        let mut sensor = Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap();
        let res = sensor.measure();

        assert!(res.is_err());
        assert_eq!(SensorErrorKind::Transport, res.unwrap_err().kind());
    }

    #[test]
    fn test_measure_checksum_mismatch_exposes_sample() {
        let bus = MockBus::new(0x02, vec![vec![0x68, 0x3a, 0x00]]);
        let mut sensor = Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap();
        let err = sensor.measure().unwrap_err();

        assert_eq!(SensorErrorKind::Checksum, err.kind());
        assert_eq!(Some(0x683a), err.rejected_sample());
    }

    #[test]
    fn test_reset_reapplies_configuration() {
        let bus = MockBus::new(0x00, vec![]);
        let traffic = bus.traffic();
        let mut sensor = Htu21d::from_bus(
            bus,
            Htu21dConfig {
                heater: true,
                ..Default::default()
            },
        )
        .unwrap();
        sensor.reset().unwrap();

        let traffic = traffic.lock().unwrap();
        assert_eq!(vec![vec![CMD_SOFT_RESET]], traffic.writes);
        // One configuration write at construction, one after the reset.
        assert_eq!(2, traffic.register_writes.len());
        assert_eq!(
            (CMD_WRITE_USER_REGISTER, vec![0b0000_0100]),
            traffic.register_writes[1]
        );
    }
}
