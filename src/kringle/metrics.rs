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

use crate::station::Reading;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FieldLabels {
    field: String,
}

/// Collection of Prometheus metrics updated based on composite weather
/// station readings. Each quantity of the reading is emitted as a gauge;
/// quantities that were unavailable during a collection leave their gauges
/// untouched and are counted by field name instead.
pub struct StationMetrics {
    pressure: Gauge<f64, AtomicU64>,
    pressure_temperature: Gauge<f64, AtomicU64>,
    humidity: Gauge<f64, AtomicU64>,
    humidity_temperature: Gauge<f64, AtomicU64>,
    dew_point: Gauge<f64, AtomicU64>,
    last_reading: Gauge<f64, AtomicU64>,
    collections: Counter,
    unavailable: Family<FieldLabels, Counter>,
}

impl StationMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let pressure = Gauge::<f64, AtomicU64>::default();
        let pressure_temperature = Gauge::<f64, AtomicU64>::default();
        let humidity = Gauge::<f64, AtomicU64>::default();
        let humidity_temperature = Gauge::<f64, AtomicU64>::default();
        let dew_point = Gauge::<f64, AtomicU64>::default();
        let last_reading = Gauge::<f64, AtomicU64>::default();
        let collections = Counter::default();
        let unavailable = Family::<FieldLabels, Counter>::default();

        reg.register(
            "kringle_pressure_pascals",
            "Station pressure in pascals",
            pressure.clone(),
        );
        reg.register(
            "kringle_pressure_temperature_degrees",
            "Barometer temperature in celsius",
            pressure_temperature.clone(),
        );
        reg.register(
            "kringle_relative_humidity",
            "Relative humidity (0-100)",
            humidity.clone(),
        );
        reg.register(
            "kringle_humidity_temperature_degrees",
            "Hygrometer temperature in celsius",
            humidity_temperature.clone(),
        );
        reg.register(
            "kringle_dew_point_degrees",
            "Dew point in celsius",
            dew_point.clone(),
        );
        reg.register(
            "kringle_last_read_timestamp",
            "Timestamp of last successful read of any quantity",
            last_reading.clone(),
        );
        reg.register(
            "kringle_collections",
            "Number of attempted station reads",
            collections.clone(),
        );
        reg.register(
            "kringle_unavailable",
            "Number of unavailable readings by field",
            unavailable.clone(),
        );

        Self {
            pressure,
            pressure_temperature,
            humidity,
            humidity_temperature,
            dew_point,
            last_reading,
            collections,
            unavailable,
        }
    }

    fn set_field(&self, gauge: &Gauge<f64, AtomicU64>, field: &'static str, value: f64) -> bool {
        if value.is_finite() {
            gauge.set(value);
            true
        } else {
            let labels = FieldLabels {
                field: field.to_owned(),
            };
            self.unavailable.get_or_create(&labels).inc();
            false
        }
    }

    pub fn update(&self, reading: &Reading) {
        self.collections.inc();

        let mut fresh = false;
        fresh |= self.set_field(&self.pressure, "pressure", reading.pressure.into());
        fresh |= self.set_field(
            &self.pressure_temperature,
            "pressure_temperature",
            reading.pressure_temperature.into(),
        );
        fresh |= self.set_field(&self.humidity, "humidity", reading.humidity.into());
        fresh |= self.set_field(
            &self.humidity_temperature,
            "humidity_temperature",
            reading.humidity_temperature.into(),
        );
        fresh |= self.set_field(&self.dew_point, "dew_point", reading.dew_point.into());

        if fresh {
            // If we can't get the number of seconds since the epoch, skip the update
            let _ = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| self.last_reading.set(d.as_secs_f64()));
        }
    }
}

#[cfg(test)]
mod test {
    use super::StationMetrics;
    use crate::sensor::{Humidity, TemperatureCelsius};
    use crate::station::Reading;
    use prometheus_client::encoding::text;
    use prometheus_client::registry::Registry;

    #[test]
    fn test_update_partial_reading() {
        let mut registry = Registry::default();
        let metrics = StationMetrics::new(&mut registry);

        let reading = Reading {
            humidity: Humidity::from(44.9),
            humidity_temperature: TemperatureCelsius::from(25.9),
            dew_point: TemperatureCelsius::from(13.1),
            ..Default::default()
        };
        metrics.update(&reading);

        let mut buf = String::new();
        text::encode(&mut buf, &registry).unwrap();

        assert!(buf.contains("kringle_relative_humidity 44.9"));
        assert!(buf.contains("kringle_humidity_temperature_degrees 25.9"));
        assert!(buf.contains("kringle_dew_point_degrees 13.1"));
        assert!(buf.contains("kringle_collections_total 1"));
        assert!(buf.contains("kringle_unavailable_total{field=\"pressure\"} 1"));
        assert!(buf.contains("kringle_unavailable_total{field=\"pressure_temperature\"} 1"));
        // The pressure gauges were never set and the hygrometer values count
        // as a successful read for the timestamp.
        assert!(buf.contains("kringle_pressure_pascals 0"));
        assert!(!buf.contains("kringle_last_read_timestamp 0\n"));
    }
}
