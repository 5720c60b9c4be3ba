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

mod core;
pub mod htu21d;
pub mod mpl3115;

pub use crate::sensor::core::{
    open_bus, Humidity, Pascals, SensorBus, SensorError, SensorErrorKind, TemperatureCelsius,
};
pub use crate::sensor::htu21d::{Htu21d, Htu21dConfig};
pub use crate::sensor::mpl3115::Mpl3115;
