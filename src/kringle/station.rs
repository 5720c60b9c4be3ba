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

use crate::sensor::{Htu21d, Humidity, Mpl3115, Pascals, TemperatureCelsius};

/// One composite weather station reading.
///
/// The shape is always complete: a quantity that could not be measured is
/// NaN, not omitted, so consumers can rely on every field being present.
/// A fresh reading starts with every field NaN.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub pressure: Pascals,
    pub pressure_temperature: TemperatureCelsius,
    pub humidity: Humidity,
    pub humidity_temperature: TemperatureCelsius,
    pub dew_point: TemperatureCelsius,
}

impl Default for Reading {
    fn default() -> Self {
        Reading {
            pressure: Pascals::from(f64::NAN),
            pressure_temperature: TemperatureCelsius::from(f64::NAN),
            humidity: Humidity::from(f64::NAN),
            humidity_temperature: TemperatureCelsius::from(f64::NAN),
            dew_point: TemperatureCelsius::from(f64::NAN),
        }
    }
}

/// A weather station: one HTU21D hygrometer and, optionally, one MPL3115
/// barometer, composed into a single reading per measurement.
///
/// A sensor failure is absorbed rather than propagated: the failed sensor's
/// quantities stay NaN in the returned reading while the other sensor's
/// values are still reported. Measuring blocks for the sensors' conversion
/// delays; like the drivers it owns, a station must be externally locked if
/// shared between threads.
pub struct Station {
    hygrometer: Htu21d,
    barometer: Option<Mpl3115>,
}

impl Station {
    pub fn new(hygrometer: Htu21d, barometer: Option<Mpl3115>) -> Self {
        Station { hygrometer, barometer }
    }

    /// Measure every owned sensor and compose the results. Each reading
    /// starts from all-NaN and fields are filled per sensor on success, so
    /// nothing from a previous call is ever carried over.
    pub fn measure(&mut self) -> Reading {
        let mut reading = Reading::default();

        match self.hygrometer.measure() {
            Ok(m) => {
                reading.humidity = m.humidity;
                reading.humidity_temperature = m.temperature;
                reading.dew_point = m.dew_point;
            }
            Err(e) => {
                tracing::warn!(message = "unable to read hygrometer", kind = e.kind().as_label(), error = %e);
            }
        }

        if let Some(barometer) = self.barometer.as_mut() {
            match barometer.measure() {
                Ok(m) => {
                    reading.pressure = m.pressure;
                    reading.pressure_temperature = m.temperature;
                }
                Err(e) => {
                    tracing::warn!(message = "unable to read barometer", kind = e.kind().as_label(), error = %e);
                }
            }
        }

        reading
    }
}

#[cfg(test)]
mod test {
    use super::{Reading, Station};
    use crate::sensor::test::{MockBus, WriteOnlyBus};
    use crate::sensor::{Htu21d, Htu21dConfig, Humidity, Mpl3115, TemperatureCelsius};

    const HUMIDITY_PACKET: [u8; 3] = [0x68, 0x3a, 0x7c];
    const TEMPERATURE_PACKET: [u8; 3] = [0x6a, 0x0c, 0xc6];

    fn working_hygrometer() -> Htu21d {
        let bus = MockBus::new(0x02, vec![HUMIDITY_PACKET.to_vec(), TEMPERATURE_PACKET.to_vec()]);
        Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap()
    }

    fn failing_hygrometer() -> Htu21d {
        // Configures cleanly but every measurement comes back empty.
        let bus = MockBus::new(0x02, vec![]);
        Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap()
    }

    fn failing_barometer() -> Mpl3115 {
        Mpl3115::from_bus(WriteOnlyBus).unwrap()
    }

    #[test]
    fn test_default_reading_all_unavailable() {
        let reading = Reading::default();
        assert!(f64::from(reading.pressure).is_nan());
        assert!(f64::from(reading.pressure_temperature).is_nan());
        assert!(f64::from(reading.humidity).is_nan());
        assert!(f64::from(reading.humidity_temperature).is_nan());
        assert!(f64::from(reading.dew_point).is_nan());
    }

    #[test]
    fn test_measure_hygrometer_only() {
        let mut station = Station::new(working_hygrometer(), None);
        let reading = station.measure();

        assert_eq!(Humidity::from(125.0 * 26682.0 / 65536.0 - 6.0), reading.humidity);
        assert_eq!(
            TemperatureCelsius::from(175.72 * 27148.0 / 65536.0 - 46.85),
            reading.humidity_temperature
        );
        assert!(f64::from(reading.dew_point).is_finite());
        assert!(f64::from(reading.pressure).is_nan());
        assert!(f64::from(reading.pressure_temperature).is_nan());
    }

    #[test]
    fn test_measure_isolates_barometer_failure() {
        let mut station = Station::new(working_hygrometer(), Some(failing_barometer()));
        let reading = station.measure();

        // The hygrometer's quantities are unaffected by the dead barometer.
        assert!(f64::from(reading.humidity).is_finite());
        assert!(f64::from(reading.humidity_temperature).is_finite());
        assert!(f64::from(reading.dew_point).is_finite());
        assert!(f64::from(reading.pressure).is_nan());
        assert!(f64::from(reading.pressure_temperature).is_nan());
    }

    #[test]
    fn test_measure_isolates_hygrometer_failure() {
        let bus = MockBus::new(0x00, vec![]);
        let barometer = Mpl3115::from_bus(bus).unwrap();
        let mut station = Station::new(failing_hygrometer(), Some(barometer));
        let reading = station.measure();

        // The barometer exchange still ran (its quantities are placeholder
        // NaN either way) and the failed hygrometer left its fields NaN.
        assert!(f64::from(reading.humidity).is_nan());
        assert!(f64::from(reading.humidity_temperature).is_nan());
        assert!(f64::from(reading.dew_point).is_nan());
    }

    #[test]
    fn test_measure_fresh_reading_every_call() {
        // First call succeeds, second call fails: values from the first call
        // must not leak into the second reading.
        let bus = MockBus::new(0x02, vec![HUMIDITY_PACKET.to_vec(), TEMPERATURE_PACKET.to_vec()]);
        let hygrometer = Htu21d::from_bus(bus, Htu21dConfig::default()).unwrap();
        let mut station = Station::new(hygrometer, None);

        let first = station.measure();
        assert!(f64::from(first.humidity).is_finite());

        let second = station.measure();
        assert!(f64::from(second.humidity).is_nan());
        assert!(f64::from(second.humidity_temperature).is_nan());
        assert!(f64::from(second.dew_point).is_nan());
    }
}
