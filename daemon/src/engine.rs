//! Chord-to-character translation with sticky modifiers and layer
//! switching.
//!
//! Modifier keys are chords whose base column names `M1` to `M5`. A single
//! press arms the modifier for the next key; a second press of the same
//! modifier within [`MODLOCK_TIMEOUT`] locks it until it is pressed again.
//! At most one modifier is armed at a time, while any number may be
//! locked. A modifier column holding [`SWITCH_LAYER`](crate::codetable::SWITCH_LAYER)
//! toggles the active codetable layer instead of producing a key.

use std::time::{Duration, Instant};

use log::debug;

use crate::chord::{AUX_BACKSPACE, AUX_SPACE};
use crate::codetable::{CodeTable, KeyDef, SWITCH_LAYER};

/// Two presses of the same armed modifier within this window lock it.
pub const MODLOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of modifier keys.
pub const MOD_COUNT: usize = 5;

/// Sticky state of one modifier key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModState {
    /// Not active.
    #[default]
    Inactive,
    /// Applies to the next non-modifier key only.
    Armed,
    /// Applies to every key until the modifier is pressed again.
    Locked,
}

/// The modifier set as it was when a character was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModSnapshot {
    states: [ModState; MOD_COUNT],
}

impl ModSnapshot {
    /// The state of a modifier by zero-based index.
    #[must_use]
    pub fn state(&self, index: usize) -> ModState {
        self.states.get(index).copied().unwrap_or_default()
    }

    /// Whether a modifier was armed or locked.
    #[must_use]
    pub fn is_active(&self, index: usize) -> bool {
        self.state(index) != ModState::Inactive
    }
}

#[cfg(test)]
impl ModSnapshot {
    /// A snapshot with the given `(index, state)` pairs set.
    pub(crate) fn of(entries: &[(usize, ModState)]) -> Self {
        let mut states = [ModState::Inactive; MOD_COUNT];
        for (index, state) in entries {
            states[*index] = *state;
        }
        Self { states }
    }
}

/// One translated character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    /// The base-column value of the pressed chord.
    pub base: String,
    /// The modifier-column value that applied, empty when none did.
    pub modified: String,
    /// The modifiers that were active at emission time, taken before any
    /// one-shot clearing.
    pub mods: ModSnapshot,
}

/// Stateful translator from debounced chord presses to emitted
/// characters. Owns the codetable and its active-layer cursor.
#[derive(Debug)]
pub struct Engine {
    table: CodeTable,
    states: [ModState; MOD_COUNT],
    lastmod: Option<usize>,
    modts: Instant,
}

impl Engine {
    /// Wraps a parsed codetable.
    #[must_use]
    pub fn new(table: CodeTable, now: Instant) -> Self {
        Self {
            table,
            states: [ModState::Inactive; MOD_COUNT],
            lastmod: None,
            modts: now,
        }
    }

    fn snapshot(&self) -> ModSnapshot {
        ModSnapshot {
            states: self.states,
        }
    }

    /// Resolves one debounced chord press.
    ///
    /// Returns the emitted character tuple, or `None` when the press only
    /// changed internal state: modifier presses, layer switches and chords
    /// with no key definition.
    pub fn resolve(&mut self, chord: u8, now: Instant) -> Option<Emission> {
        // Auxiliary contacts produce fixed characters; backspace wins when
        // both are down and the main bits are ignored either way.
        if chord & (AUX_SPACE | AUX_BACKSPACE) != 0 {
            let name = if chord & AUX_BACKSPACE != 0 { "BS" } else { "SP" };
            return Some(Emission {
                base: name.to_owned(),
                modified: String::new(),
                mods: self.snapshot(),
            });
        }

        let def = self.table.keydef(chord)?.clone();
        if let Some(index) = def.modifier_index() {
            self.press_modifier(index, now);
            return None;
        }
        self.press_key(&def)
    }

    fn press_modifier(&mut self, index: usize, now: Instant) {
        match self.states[index] {
            ModState::Inactive => {
                if let Some(prev) = self.lastmod {
                    if prev != index && self.states[prev] == ModState::Armed {
                        self.states[prev] = ModState::Inactive;
                    }
                }
                self.states[index] = ModState::Armed;
                self.lastmod = Some(index);
                self.modts = now;
            }
            ModState::Armed => {
                if now.saturating_duration_since(self.modts) <= MODLOCK_TIMEOUT {
                    self.states[index] = ModState::Locked;
                } else {
                    // Too slow to lock; the press re-arms instead.
                    self.modts = now;
                }
                self.lastmod = Some(index);
            }
            ModState::Locked => {
                self.states[index] = ModState::Inactive;
                self.lastmod = self.first_active();
            }
        }
        debug!("modifier {index} -> {:?}", self.states[index]);
    }

    fn press_key(&mut self, def: &KeyDef) -> Option<Emission> {
        let snapshot = self.snapshot();
        let Some(active) = self.lastmod else {
            return Some(Emission {
                base: def.base.clone(),
                modified: String::new(),
                mods: snapshot,
            });
        };

        let value = def.modified(active);
        if value == SWITCH_LAYER {
            self.table.switch_layer();
            self.clear_unlocked();
            debug!("layer switched to {:?}", self.table.active());
            return None;
        }

        let emission = Emission {
            base: def.base.clone(),
            modified: value.to_owned(),
            mods: snapshot,
        };
        if self.states[active] == ModState::Armed {
            self.clear_unlocked();
        }
        Some(emission)
    }

    /// Drops every armed modifier; locked ones survive. The last-modifier
    /// cursor falls back to a remaining locked modifier when there is one.
    fn clear_unlocked(&mut self) {
        for state in &mut self.states {
            if *state == ModState::Armed {
                *state = ModState::Inactive;
            }
        }
        self.lastmod = self.first_active();
    }

    fn first_active(&self) -> Option<usize> {
        self.states
            .iter()
            .position(|state| *state != ModState::Inactive)
    }
}
