//! The sampling task: polls the contact sampler, debounces chords and
//! translates them into HID reports for the uhid sink.

use std::time::Instant;

use futures::channel::mpsc::Sender;
use futures::SinkExt;
use log::{debug, warn};
use tokio::time::sleep;

use crate::chord::{Debouncer, Event};
use crate::codetable::CodeTable;
use crate::engine::Engine;
use crate::hid::{self, Report};
use crate::sampler::Sampler;

/// Owns the sampler, the debouncer and the modifier engine, and produces
/// reports into the channel feeding the uhid sink.
pub struct Keyboard<S> {
    sampler: S,
    debouncer: Debouncer,
    engine: Engine,
}

impl<S: Sampler> Keyboard<S> {
    /// Probes the sampler and assembles the pipeline.
    ///
    /// # Errors
    ///
    /// Fails when the sampler's hardware self-check fails.
    pub fn new(mut sampler: S, table: CodeTable, now: Instant) -> Result<Self, crate::error::Error> {
        sampler.probe()?;
        Ok(Self {
            sampler,
            debouncer: Debouncer::new(now),
            engine: Engine::new(table, now),
        })
    }

    /// Runs the paced sampling loop until the report channel closes.
    ///
    /// # Errors
    ///
    /// Fails when the report channel is gone; transient sampler errors
    /// only skip the current tick.
    pub async fn start<Clk>(&mut self, clock: Clk, mut tx: Sender<Report>) -> anyhow::Result<()>
    where
        Clk: Fn() -> Instant,
    {
        loop {
            sleep(self.debouncer.pace(clock())).await;
            let now = clock();
            let keys = match self.sampler.read_chord() {
                Ok(keys) => keys,
                Err(err) => {
                    warn!("sample tick skipped: {err}");
                    sleep(self.debouncer.scan_interval()).await;
                    continue;
                }
            };
            let event = self.debouncer.update(keys, now);
            if event.change {
                self.dispatch(event, now, &mut tx).await?;
            }
        }
    }

    /// Turns one debounced transition into zero, one or two reports: a
    /// press-and-release pair for a one-shot chord, a held press at the
    /// start of auto-repeat, and the release when auto-repeat ends.
    async fn dispatch(
        &mut self,
        event: Event,
        now: Instant,
        tx: &mut Sender<Report>,
    ) -> anyhow::Result<()> {
        if event.chord == 0 {
            if event.repeat {
                tx.send(Report::release()).await?;
            }
            return Ok(());
        }

        let Some(emission) = self.engine.resolve(event.chord, now) else {
            return Ok(());
        };
        let (keycode, modifier) = match hid::scancode(&emission) {
            Ok(scancode) => scancode,
            Err(err) => {
                warn!("dropping event: {err}");
                return Ok(());
            }
        };
        debug!(
            "chord 0x{:02x} -> keycode 0x{keycode:02x} modifier 0x{modifier:02x}",
            event.chord
        );

        tx.send(Report::pressed(keycode, modifier)).await?;
        if !event.repeat {
            tx.send(Report::release()).await?;
        }
        Ok(())
    }
}
