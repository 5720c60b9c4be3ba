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

use axum::routing::get;
use axum::Router;
use clap::Parser;
use kringle::http::RequestState;
use kringle::metrics::StationMetrics;
use kringle::sensor::{htu21d, mpl3115, open_bus, Htu21d, Htu21dConfig, Mpl3115};
use kringle::station::Station;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, Level};

const DEFAULT_I2C_BUS: u8 = 1;
const DEFAULT_REFRESH_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9785);

/// Expose weather station readings from HTU21D and MPL3115 sensors as
/// Prometheus metrics
///
/// Read relative humidity, temperature, and derived dew point from an HTU21D
/// sensor on the I2C bus of a local machine, usually a Raspberry PI, along
/// with pressure from an optional MPL3115 barometer, and expose the composite
/// station reading as Prometheus metrics. Several other metrics are emitted
/// as well to help diagnose failures reading the sensors.
///
/// A sensor failure during a collection only marks that sensor's quantities
/// unavailable; the remaining quantities are still exported.
#[derive(Debug, Parser)]
#[clap(name = "kringle", version = clap::crate_version ! ())]
struct KringleApplication {
    /// I2C bus number the sensors are connected to (bus 1 is the GPIO header
    /// bus on recent Raspberry PI models)
    #[arg(long, default_value_t = DEFAULT_I2C_BUS)]
    i2c_bus: u8,

    /// Enable the HTU21D on-chip heater to drive off condensation. Biases
    /// the temperature reading while enabled
    #[arg(long)]
    heater: bool,

    /// Also poll an MPL3115 barometer on the same bus
    #[arg(long)]
    barometer: bool,

    /// Read the station at this interval, in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, kringle will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[arg(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = KringleApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let hygrometer = open_bus(opts.i2c_bus, htu21d::ADDRESS)
        .and_then(|bus| {
            Htu21d::from_bus(
                bus,
                Htu21dConfig {
                    heater: opts.heater,
                    ..Default::default()
                },
            )
        })
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize hygrometer", i2c_bus = opts.i2c_bus, error = %e);
            process::exit(1)
        });

    let barometer = if opts.barometer {
        let sensor = open_bus(opts.i2c_bus, mpl3115::ADDRESS)
            .and_then(Mpl3115::from_bus)
            .unwrap_or_else(|e| {
                tracing::error!(message = "failed to initialize barometer", i2c_bus = opts.i2c_bus, error = %e);
                process::exit(1)
            });
        Some(sensor)
    } else {
        None
    };

    let mut registry = <Registry>::default();
    let metrics = StationMetrics::new(&mut registry);
    let station = Arc::new(Mutex::new(Station::new(hygrometer, barometer)));

    // Periodically read the station and update metrics based on the readings.
    task::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(opts.refresh_secs));

        loop {
            let _ = interval.tick().await;
            let station_ref = station.clone();

            let reading = task::spawn_blocking(move || {
                let mut s = station_ref.lock().unwrap();
                s.measure()
            })
            .instrument(tracing::span!(Level::DEBUG, "station_read"))
            .await
            .unwrap(); // TODO: Handle this error?!

            metrics.update(&reading);
        }
    });

    let state = Arc::new(RequestState { registry });
    let app = Router::new()
        .route("/metrics", get(kringle::http::text_metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let server = axum::Server::try_bind(&opts.bind)
        .map(|s| {
            s.serve(app.into_make_service()).with_graceful_shutdown(async {
                // Wait for either SIGTERM or SIGINT to shutdown
                tokio::select! {
                    _ = sigterm() => {}
                    _ = sigint() => {}
                }
            })
        })
        .unwrap_or_else(|e| {
            tracing::error!(message = "error starting server", address = %opts.bind, err = %e);
            process::exit(1)
        });

    tracing::info!(message = "starting server", address = %opts.bind);
    server.await.unwrap();

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
