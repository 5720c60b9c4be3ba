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

//! Export HTU21D and MPL3115 weather station readings as Prometheus metrics.
//!
//! ## Features
//!
//! Kringle reads relative humidity and temperature from an [HTU21D sensor](https://www.te.com/usa-en/product-CAT-HSC0004.html)
//! over I2C, derives the dew point, optionally polls an MPL3115 barometer, and
//! exports the combined station reading as Prometheus metrics. It is best run
//! on a Raspberry PI (3 or 4).
//!
//! The following metrics are exported:
//!
//! * `kringle_pressure_pascals` - Station pressure measured by the barometer.
//! * `kringle_pressure_temperature_degrees` - Degrees celsius measured by the barometer.
//! * `kringle_relative_humidity` - Relative humidity (from 0 to 100) measured by the hygrometer.
//! * `kringle_humidity_temperature_degrees` - Degrees celsius measured by the hygrometer.
//! * `kringle_dew_point_degrees` - Dew point in degrees celsius, derived from the hygrometer.
//! * `kringle_last_read_timestamp` - UNIX timestamp of the last time any quantity was read.
//! * `kringle_collections_total` - Total number of attempts to read the station.
//! * `kringle_unavailable_total` - Readings per field that were unavailable, by field name.
//!
//! Quantities that could not be read during a collection stay at their previous
//! gauge values and are counted in `kringle_unavailable_total`; a sensor failure
//! never prevents the other sensor's quantities from being exported.
//!
//! ## Build
//!
//! `kringle` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/)
//! . Since it's meant to be run on a Raspberry PI, you will also likely need to cross-compile it. If you
//! are on Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! This will allow you to build for ARMv7 platforms and build completely static binaries (respectively).
//!
//! Next, make sure you have a Rust toolchain for ARMv7, assuming you are using the `rustup` tool.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! ```
//!
//! Next, you'll need to build `kringle` itself for ARMv7.
//!
//! ```text
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Install
//!
//! ### Wiring
//!
//! The HTU21D must be connected to the I2C data and clock lines of your
//! Raspberry PI (SDA and SCL on the 40 pin header) and answers at the fixed
//! bus address `0x40`. An MPL3115 barometer on the same bus (address `0x60`)
//! is optional and enabled with the `--barometer` flag.
//!
//! ### Run
//!
//! In order to use the I2C device `/dev/i2c-1`, the I2C interface must be
//! enabled (`raspi-config`) and `kringle` must run as a user in the `i2c`
//! group (or as `root`).
//!
//! ```text
//! sudo cp target/armv7-unknown-linux-musleabihf/release/kringle /usr/local/bin/kringle
//! sudo cp ext/kringle.service /etc/systemd/system/kringle.service
//! sudo systemctl daemon-reload
//! sudo systemctl enable kringle.service
//! sudo systemctl start kringle.serivce
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9785` at `/metrics`. Once `kringle`
//! is running, configure scrapes of it by your Prometheus server. Add the host
//! running `kringle` as a target under the Prometheus `scrape_configs` section
//! as described by the example below.
//!
//! **NOTE**: Each collection blocks for two 75ms sensor conversions (plus the
//! barometer, if enabled). By default, the station is read every `30s`, in the
//! background (*not* in response to Prometheus scrapes). Thus, scrapes by
//! Prometheus more frequent than `30s` don't have any benefit unless the
//! refresh interval for `kringle` is adjusted as well.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     1m
//!   evaluation_interval: 1m
//!   external_labels:
//!       monitor: 'my_prom'
//!
//! scrape_configs:
//!   - job_name: kringle
//!     static_configs:
//!       - targets: ['example:9785']
//! ```
//!

pub mod http;
pub mod metrics;
pub mod sensor;
pub mod station;
