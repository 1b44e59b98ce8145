//! Sample-to-chord debouncing.
//!
//! A chord is a bitmap of simultaneously closed contacts: bits 0..4 are
//! the five main contacts, bit 5 is the auxiliary space contact and bit 6
//! the auxiliary backspace contact. The [`Debouncer`] collapses a noisy
//! stream of raw samples into one event per press burst, picking the
//! bit pattern with the most contacts seen during the burst, and raises
//! auto-repeat while a chord stays held.

use std::time::{Duration, Instant};

/// Mask of the five main contacts.
pub const MAIN_MASK: u8 = 0x1f;

/// Chord bit of the auxiliary space contact.
pub const AUX_SPACE: u8 = 1 << 5;

/// Chord bit of the auxiliary backspace contact.
pub const AUX_BACKSPACE: u8 = 1 << 6;

/// Floor between two samples; the sampling task sleeps off the difference.
pub const DEFAULT_SCAN_MIN_INTERVAL: Duration = Duration::from_millis(10);

/// A press must stay stable this long before it is accepted.
pub const DEFAULT_VALID_MIN: Duration = Duration::from_millis(20);

/// A release must stay stable this long before it ends the burst.
pub const DEFAULT_INVALID_MIN: Duration = Duration::from_millis(20);

/// Stable-held duration after which auto-repeat begins.
pub const DEFAULT_REPEAT_START: Duration = Duration::from_millis(400);

/// Timing windows of the debouncer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Minimum spacing between two samples.
    pub scan_min_interval: Duration,
    /// Stability window before a press is accepted.
    pub valid_min: Duration,
    /// Stability window before a release ends the burst.
    pub invalid_min: Duration,
    /// Held duration before auto-repeat starts.
    pub repeat_start: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_min_interval: DEFAULT_SCAN_MIN_INTERVAL,
            valid_min: DEFAULT_VALID_MIN,
            invalid_min: DEFAULT_INVALID_MIN,
            repeat_start: DEFAULT_REPEAT_START,
        }
    }
}

/// One debounced chord event.
///
/// `change` marks the discrete transitions: a one-shot press
/// (`chord != 0, repeat == false`), the start of auto-repeat
/// (`chord != 0, repeat == true`) and the end of auto-repeat
/// (`chord == 0, repeat == true`). Events with `change == false` are
/// in-between states and carry no new information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The debounced chord bitmap.
    pub chord: u8,
    /// Whether this event is a discrete transition.
    pub change: bool,
    /// Whether auto-repeat is in effect.
    pub repeat: bool,
}

/// Collapses raw contact samples into discrete chord events.
///
/// Feed one sample per call to [`Debouncer::update`], paced by
/// [`Debouncer::pace`]. The state machine accepts a press only after it
/// stayed stable for [`Config::valid_min`] and a release only after
/// [`Config::invalid_min`], so bounce and bursts shorter than the window
/// produce no event at all. While a press builds up, the sample with the
/// highest contact count wins the burst; on a tie the earliest pattern
/// is kept.
#[derive(Debug)]
pub struct Debouncer {
    config: Config,
    scan_ts: Instant,
    last_keys: u8,
    stable_keys: u8,
    stable_for: Duration,
    max_contacts: u32,
    repeat: bool,
}

impl Debouncer {
    /// Creates a debouncer with the default timing windows.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self::with_config(Config::default(), now)
    }

    /// Creates a debouncer with explicit timing windows.
    #[must_use]
    pub fn with_config(config: Config, now: Instant) -> Self {
        Self {
            config,
            scan_ts: now,
            last_keys: 0,
            stable_keys: 0,
            stable_for: Duration::ZERO,
            max_contacts: 0,
            repeat: false,
        }
    }

    /// The configured sampling floor.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        self.config.scan_min_interval
    }

    /// How long the caller must wait before feeding the next sample.
    #[must_use]
    pub fn pace(&self, now: Instant) -> Duration {
        self.config
            .scan_min_interval
            .saturating_sub(now.saturating_duration_since(self.scan_ts))
    }

    /// Feeds one raw sample taken at `now` and advances the state machine.
    pub fn update(&mut self, keys: u8, now: Instant) -> Event {
        let dts = now.saturating_duration_since(self.scan_ts);
        self.scan_ts = now;

        if keys == self.last_keys {
            self.stable_for += dts;
        } else {
            self.last_keys = keys;
            self.stable_for = Duration::ZERO;
        }

        if self.last_keys != 0 && self.stable_for >= self.config.valid_min {
            // Roll-in capture: the pattern with the most contacts wins the
            // burst, first such pattern on a tie.
            let contacts = self.last_keys.count_ones();
            if contacts > self.max_contacts {
                self.max_contacts = contacts;
                self.stable_keys = self.last_keys;
            }
            if self.stable_for >= self.config.repeat_start {
                let first = self.stable_for - dts < self.config.repeat_start;
                if first {
                    self.repeat = true;
                }
                return Event {
                    chord: self.stable_keys,
                    change: first,
                    repeat: true,
                };
            }
        } else if self.last_keys == 0
            && self.stable_for >= self.config.invalid_min
            && self.stable_keys != 0
        {
            let out = self.stable_keys;
            self.stable_keys = 0;
            self.max_contacts = 0;
            if self.repeat {
                self.repeat = false;
                return Event {
                    chord: 0,
                    change: true,
                    repeat: true,
                };
            }
            return Event {
                chord: out,
                change: true,
                repeat: false,
            };
        }

        Event {
            chord: self.stable_keys,
            change: false,
            repeat: self.repeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(15);

    /// Feeds `samples` at one tick apart and collects the `change` events.
    fn run(samples: &[u8]) -> Vec<Event> {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(start);
        let mut events = Vec::new();
        for (i, sample) in samples.iter().enumerate() {
            let now = start + TICK * u32::try_from(i + 1).unwrap();
            let event = debouncer.update(*sample, now);
            if event.change {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn clean_press_emits_once() {
        let events = run(&[0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            events,
            vec![Event {
                chord: 0x03,
                change: true,
                repeat: false
            }]
        );
    }

    #[test]
    fn roll_in_peak_wins() {
        let events = run(&[0x01, 0x03, 0x07, 0x07, 0x07, 0x07, 0, 0, 0]);
        assert_eq!(
            events,
            vec![Event {
                chord: 0x07,
                change: true,
                repeat: false
            }]
        );
    }

    #[test]
    fn equal_popcount_keeps_first_pattern() {
        let events = run(&[0x03, 0x03, 0x03, 0x05, 0x05, 0x05, 0, 0, 0]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chord, 0x03);
    }

    #[test]
    fn burst_shorter_than_valid_min_is_noise() {
        let events = run(&[0x03, 0, 0, 0]);
        assert!(events.is_empty());
    }

    #[test]
    fn long_hold_repeats_then_releases() {
        let mut samples = vec![0x01; 34];
        samples.extend_from_slice(&[0, 0, 0]);
        let events = run(&samples);
        assert_eq!(
            events,
            vec![
                Event {
                    chord: 0x01,
                    change: true,
                    repeat: true
                },
                Event {
                    chord: 0,
                    change: true,
                    repeat: true
                },
            ]
        );
    }

    #[test]
    fn repeat_continuation_is_not_a_change() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(start);
        let mut changes = 0;
        let mut continuations = 0;
        for i in 1..=40u32 {
            let event = debouncer.update(0x01, start + TICK * i);
            if event.repeat && event.change {
                changes += 1;
            } else if event.repeat {
                continuations += 1;
            }
        }
        assert_eq!(changes, 1);
        assert!(continuations > 1);
    }

    #[test]
    fn pace_enforces_the_sampling_floor() {
        let start = Instant::now();
        let debouncer = Debouncer::new(start);
        assert_eq!(debouncer.pace(start), DEFAULT_SCAN_MIN_INTERVAL);
        assert_eq!(
            debouncer.pace(start + Duration::from_millis(4)),
            Duration::from_millis(6)
        );
        assert_eq!(debouncer.pace(start + Duration::from_millis(12)), Duration::ZERO);
    }

    #[test]
    fn release_shorter_than_invalid_min_keeps_the_burst() {
        // A 15 ms dropout in the middle of a press must not split it.
        let events = run(&[0x03, 0x03, 0x03, 0x00, 0x03, 0x03, 0x03, 0, 0, 0]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chord, 0x03);
    }
}
