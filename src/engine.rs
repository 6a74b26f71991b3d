// src/engine.rs
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, error, info};

use crate::control::{ChannelParams, CyclerParams, Hysteresis};
use crate::drivers::{AnalogRange, Daq, LoopError, RelayDriver};
use crate::recorder::SampleLogger;
use crate::types::{ChannelReading, ControlEvent};

/// Handle on the one worker thread of an active session.
///
/// The thread owns the board for its whole life and hands it back when joined.
pub struct Worker {
    thread: JoinHandle<Box<dyn Daq>>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) -> Box<dyn Daq> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || body(flag))?;
        Ok(Self { thread, running })
    }

    /// Clears the run flag and wakes the thread so it notices right away.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.thread.thread().unpark();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stops the loop and waits for it. By the time this returns the relays have
    /// been commanded off and the log is closed.
    pub fn stop(self) -> thread::Result<Box<dyn Daq>> {
        self.signal_stop();
        self.thread.join()
    }
}

/// Sleeps until `deadline`, returning early once the run flag drops.
fn pause_until(deadline: Instant, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::park_timeout(deadline - now);
    }
}

/// Next tick deadline at a fixed rate; a loop that fell more than a full
/// period behind restarts from now instead of bursting.
fn next_deadline(previous: Instant, period: Duration) -> Instant {
    let next = previous + period;
    let now = Instant::now();
    if now > next + period {
        now
    } else {
        next
    }
}

struct ChannelLoop {
    params: ChannelParams,
    hysteresis: Hysteresis,
}

pub struct Regulator {
    relays: RelayDriver,
    channels: Vec<ChannelLoop>,
    logger: SampleLogger,
    range: AnalogRange,
    period: Duration,
    events: Sender<ControlEvent>,
}

impl Regulator {
    /// `relays` must drive one bit per channel, in channel order.
    pub fn new(
        relays: RelayDriver,
        params: Vec<ChannelParams>,
        logger: SampleLogger,
        range: AnalogRange,
        period: Duration,
        events: Sender<ControlEvent>,
    ) -> Self {
        let channels = params
            .into_iter()
            .map(|params| ChannelLoop {
                hysteresis: Hysteresis::new(params.thresholds),
                params,
            })
            .collect();
        Self {
            relays,
            channels,
            logger,
            range,
            period,
            events,
        }
    }

    pub fn spawn(self) -> io::Result<Worker> {
        Worker::spawn("do-regulator", move |running| self.run(&running))
    }

    /// Samples every channel once, applies the hysteresis decision, logs the row.
    pub fn tick(&mut self) -> Result<Vec<ChannelReading>, LoopError> {
        let mut readings = Vec::with_capacity(self.channels.len());
        for (i, ch) in self.channels.iter_mut().enumerate() {
            let volts = self
                .relays
                .board_mut()
                .read_volts(ch.params.analog_input, self.range)?;
            let percent = ch.params.calibration.percent(volts);
            if let Some(on) = ch.hysteresis.step(percent).target() {
                debug!("Ch{}: {percent:.2}% -> relay {}", i + 1, if on { "ON" } else { "OFF" });
                self.relays.set(i, on)?;
            }
            readings.push(ChannelReading {
                channel: i,
                volts,
                percent,
                relay_on: ch.hysteresis.relay_on(),
            });
        }
        self.logger.write_row(Local::now().naive_local(), &readings)?;
        Ok(readings)
    }

    fn run(mut self, running: &AtomicBool) -> Box<dyn Daq> {
        info!("Regulating {} channel(s)", self.channels.len());
        for (i, ch) in self.channels.iter().enumerate() {
            let p = &ch.params;
            info!(
                "Ch{}: AI{} -> bit {}, 0% at {} V, 100% at {} V, band {}..{}%",
                i + 1,
                p.analog_input,
                p.relay_bit,
                p.calibration.v0(),
                p.calibration.v100(),
                p.thresholds.low,
                p.thresholds.high
            );
        }
        let outcome = self.run_ticks(running);
        self.shutdown(outcome)
    }

    fn run_ticks(&mut self, running: &AtomicBool) -> Result<(), LoopError> {
        let mut deadline = Instant::now();
        while running.load(Ordering::Acquire) {
            let readings = self.tick()?;
            // a closed UI is not a reason to stop regulating
            self.events.send(ControlEvent::Tick(readings)).ok();
            deadline = next_deadline(deadline, self.period);
            pause_until(deadline, running);
        }
        Ok(())
    }

    fn shutdown(mut self, outcome: Result<(), LoopError>) -> Box<dyn Daq> {
        if let Err(e) = self.relays.all_off() {
            error!("could not switch relays off: {e}");
        }
        for ch in &mut self.channels {
            ch.hysteresis.reset();
        }
        if let Err(e) = self.logger.close() {
            error!("could not close log: {e}");
        }
        let event = match outcome {
            Ok(()) => {
                info!("Regulation stopped");
                ControlEvent::Finished
            }
            Err(e) => {
                error!("Regulation loop failed: {e}");
                ControlEvent::Fault(e.to_string())
            }
        };
        self.events.send(event).ok();
        self.relays.into_board()
    }
}

/// Timed on/off relay cycling, independent of any sensor.
pub struct Cycler {
    relays: RelayDriver,
    params: CyclerParams,
    second: Duration,
    events: Sender<ControlEvent>,
}

impl Cycler {
    pub fn new(
        relays: RelayDriver,
        params: CyclerParams,
        second: Duration,
        events: Sender<ControlEvent>,
    ) -> Self {
        Self {
            relays,
            params,
            second,
            events,
        }
    }

    pub fn spawn(self) -> io::Result<Worker> {
        Worker::spawn("flush-cycler", move |running| self.run(&running))
    }

    fn run(mut self, running: &AtomicBool) -> Box<dyn Daq> {
        info!(
            "Flush cycle: {}s on, {}s off",
            self.params.on_secs, self.params.off_secs
        );
        let outcome = self.cycle(running);
        if let Err(e) = self.relays.all_off() {
            error!("could not switch flush pump off: {e}");
        }
        let event = match outcome {
            Ok(()) => {
                info!("Flush pump stopped");
                ControlEvent::Finished
            }
            Err(e) => {
                error!("Flush cycle failed: {e}");
                ControlEvent::Fault(e.to_string())
            }
        };
        self.events.send(event).ok();
        self.relays.into_board()
    }

    fn cycle(&mut self, running: &AtomicBool) -> Result<(), LoopError> {
        while running.load(Ordering::Acquire) {
            for (relay_on, secs) in [(true, self.params.on_secs), (false, self.params.off_secs)] {
                if !running.load(Ordering::Acquire) {
                    return Ok(());
                }
                self.relays.set(0, relay_on)?;
                if !self.count_down(relay_on, secs, running) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Returns false if a stop arrived during the countdown.
    fn count_down(&self, relay_on: bool, secs: u64, running: &AtomicBool) -> bool {
        let mut deadline = Instant::now();
        for remaining in (1..=secs).rev() {
            if !running.load(Ordering::Acquire) {
                return false;
            }
            self.events
                .send(ControlEvent::Countdown {
                    relay_on,
                    remaining_secs: remaining,
                })
                .ok();
            deadline = next_deadline(deadline, self.second);
            pause_until(deadline, running);
        }
        running.load(Ordering::Acquire)
    }
}
