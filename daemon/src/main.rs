//! Userspace HID daemon for the binary-5 chorded keyboard.
//!
//! Five contacts form 5-bit chords; each chord, combined with the sticky
//! modifier keys, selects a character from a two-layer codetable. The
//! daemon polls one of two hardware back-ends, debounces the contact
//! samples into chord events and feeds the host kernel a virtual HID
//! keyboard through `/dev/uhid`.

#![allow(clippy::multiple_crate_versions)]

mod chord;
mod codetable;
mod engine;
mod error;
mod ftdi;
mod hid;
mod keyboard;
mod sampler;
mod uhid;

use std::env;
use std::fs;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use futures::channel::mpsc::channel;
use log::{error, info, warn};

use crate::codetable::CodeTable;
use crate::error::Error;
use crate::ftdi::Backend;
use crate::keyboard::Keyboard;
use crate::uhid::UhidKeyboard;

/// Capacity of the report channel between the sampling task and the
/// uhid sink.
const REPORT_QUEUE: usize = 8;

/// Default codetable document path.
const DEFAULT_CONFIG: &str = "config.org";

/// Default back-end name.
const DEFAULT_BACKEND: &str = "keysw";

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let backend = args.next().unwrap_or_else(|| DEFAULT_BACKEND.to_owned());
    let config = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_owned());

    // Configuration and probe failures exit with 1, runtime failures
    // with 2, a SIGINT shutdown with 0.
    let keyboard = match setup(&backend, &config) {
        Ok(keyboard) => keyboard,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("building the runtime: {err}");
            return ExitCode::from(2);
        }
    };
    match runtime.block_on(run(keyboard)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}

/// Loads the codetable, opens the selected back-end and probes it.
fn setup(backend: &str, config: &str) -> anyhow::Result<Keyboard<Backend>> {
    let doc = fs::read_to_string(config).with_context(|| format!("reading {config}"))?;
    let table = CodeTable::parse(&doc)?;
    anyhow::ensure!(!table.is_empty(), "{config} defines no chords");
    let backend = Backend::select(backend)?;
    Keyboard::new(backend, table, Instant::now()).map_err(Into::into)
}

/// Runs the two cooperating tasks until a fatal error or SIGINT, then
/// releases all keys so the host never sees a stuck keyboard.
async fn run(mut keyboard: Keyboard<Backend>) -> anyhow::Result<()> {
    let mut device = UhidKeyboard::create().await?;
    let (tx, rx) = channel(REPORT_QUEUE);

    let outcome = {
        let pipeline = async {
            futures::try_join!(keyboard.start(Instant::now, tx), device.start(rx)).map(|_| ())
        };
        tokio::select! {
            result = pipeline => result,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("interrupted, releasing keys");
                    Err(Error::Cancelled.into())
                }
                Err(err) => Err(anyhow::Error::from(err).context("listening for SIGINT")),
            },
        }
    };

    if let Err(err) = device.shutdown().await {
        warn!("uhid shutdown incomplete: {err}");
    }

    match outcome {
        Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled)) => Ok(()),
        other => other,
    }
}
