//! The two-layer chord lookup table, parsed from the org-mode
//! configuration document.
//!
//! The document contains up to two tables, each opened by a preamble line
//! holding the literal `code table` with a trailing `A` or `B`. Table rows
//! start with `|` and split into at least eleven `|`-separated fields:
//! field 1 is the decimal chord code (1 to 31), fields 4..9 are the base
//! key and the five modifier columns. The header row (`dcode` in field 1)
//! is skipped and any non-`|` line closes the current table.

use crate::error::Error;

/// Column labels of the five modifier slots, in table order.
pub const MOD_NAMES: [&str; 5] = ["M1", "M2", "M3", "M4", "M5"];

/// Sentinel in a modifier column that switches the active layer instead
/// of producing a key.
pub const SWITCH_LAYER: &str = "SWTB";

/// Minimum number of `|`-separated fields of a data row.
const ROW_FIELDS: usize = 11;

/// Column values for one chord: the base key and the five modifier
/// results. Modifier columns are empty when the combination is undefined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDef {
    /// The key produced with no modifier active.
    pub base: String,
    /// The keys produced under modifiers `M1` to `M5`.
    pub mods: [String; 5],
}

impl KeyDef {
    /// The modifier column for a zero-based modifier index.
    #[must_use]
    pub fn modified(&self, index: usize) -> &str {
        self.mods.get(index).map_or("", String::as_str)
    }

    /// Some(index) when the base names one of the modifier keys.
    #[must_use]
    pub fn modifier_index(&self) -> Option<usize> {
        MOD_NAMES.iter().position(|name| *name == self.base)
    }
}

/// Layer labels; only one layer is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerId {
    /// The primary layer.
    A,
    /// The optional alternate layer.
    B,
}

/// One dense 32-slot table indexed by chord; slot 0 is never populated.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    slots: [Option<KeyDef>; 32],
}

impl Layer {
    fn set(&mut self, chord: u8, def: KeyDef) {
        self.slots[usize::from(chord & crate::chord::MAIN_MASK)] = Some(def);
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// The key definition of a chord, ignoring auxiliary bits.
    #[must_use]
    pub fn keydef(&self, chord: u8) -> Option<&KeyDef> {
        self.slots[usize::from(chord & crate::chord::MAIN_MASK)].as_ref()
    }

    /// Populated `(chord, keydef)` pairs in chord order.
    pub fn entries(&self) -> impl Iterator<Item = (u8, &KeyDef)> {
        (0u8..)
            .zip(self.slots.iter())
            .filter_map(|(chord, def)| def.as_ref().map(|def| (chord, def)))
    }

    /// The chord whose base column equals `name`, or 0 when absent.
    #[must_use]
    pub fn chord_of_base(&self, name: &str) -> u8 {
        self.entries()
            .find(|(_, def)| def.base == name)
            .map_or(0, |(chord, _)| chord)
    }

    /// Resolves a character to `(modifier chord, key chord)`.
    ///
    /// A hit on a base column yields `(0, chord)`; a hit on a modifier
    /// column yields the chord of that modifier key plus the key chord.
    /// Returns `(0, 0)` when the character is not in this layer.
    #[must_use]
    pub fn chr_to_chord(&self, wanted: &str) -> (u8, u8) {
        for (chord, def) in self.entries() {
            if def.base == wanted {
                return (0, chord);
            }
            for (index, value) in def.mods.iter().enumerate() {
                if !value.is_empty() && value == wanted {
                    return (self.chord_of_base(MOD_NAMES[index]), chord);
                }
            }
        }
        (0, 0)
    }
}

/// The parsed configuration document plus the active-layer cursor.
///
/// Layer `B` is optional; the table is immutable after parsing except for
/// the cursor, which [`CodeTable::switch_layer`] toggles.
#[derive(Debug, Clone)]
pub struct CodeTable {
    a: Layer,
    b: Option<Layer>,
    active: LayerId,
}

impl CodeTable {
    /// Parses the configuration document.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigBadCode`] when a row's chord code is not a number in
    /// 1 to 31, [`Error::ConfigMissingBase`] when a row has an empty base
    /// column; both carry the offending line number.
    pub fn parse(doc: &str) -> Result<Self, Error> {
        let mut a = Layer::default();
        let mut b = Layer::default();
        let mut current = LayerId::A;

        for (index, line) in doc.lines().enumerate() {
            let lineno = index + 1;
            if !line.starts_with('|') {
                if let Some(layer) = marker_layer(line) {
                    current = layer;
                }
                continue;
            }
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < ROW_FIELDS {
                // Too short for a data row; also skips org rule lines.
                continue;
            }
            let code_field = fields[1].trim();
            if code_field == "dcode" {
                continue;
            }
            let chord = code_field
                .parse::<u8>()
                .ok()
                .filter(|chord| (1..=31).contains(chord))
                .ok_or(Error::ConfigBadCode { line: lineno })?;
            let base = fields[4].trim();
            if base.is_empty() {
                return Err(Error::ConfigMissingBase { line: lineno });
            }
            let mut def = KeyDef {
                base: base.to_owned(),
                ..KeyDef::default()
            };
            for (slot, field) in def.mods.iter_mut().zip(&fields[5..10]) {
                *slot = field.trim().to_owned();
            }
            match current {
                LayerId::A => a.set(chord, def),
                LayerId::B => b.set(chord, def),
            }
        }

        let b = (!b.is_empty()).then_some(b);
        Ok(Self {
            a,
            b,
            active: LayerId::A,
        })
    }

    /// Whether no chord at all is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_none()
    }

    /// The currently active layer label.
    #[must_use]
    pub fn active(&self) -> LayerId {
        self.active
    }

    /// The currently active layer.
    #[must_use]
    pub fn active_layer(&self) -> &Layer {
        match self.active {
            LayerId::A => &self.a,
            LayerId::B => self.b.as_ref().unwrap_or(&self.a),
        }
    }

    /// The key definition of a chord in the active layer.
    #[must_use]
    pub fn keydef(&self, chord: u8) -> Option<&KeyDef> {
        self.active_layer().keydef(chord)
    }

    /// Resolves a character against the active layer.
    #[must_use]
    pub fn chr_to_chord(&self, wanted: &str) -> (u8, u8) {
        self.active_layer().chr_to_chord(wanted)
    }

    /// Switches to layer `B` when it is populated, otherwise back to `A`.
    pub fn switch_layer(&mut self) {
        self.active = match self.active {
            LayerId::A if self.b.is_some() => LayerId::B,
            _ => LayerId::A,
        };
    }
}

/// Recognises a layer preamble: a non-table line containing the literal
/// `code table` whose last non-blank character selects the layer.
fn marker_layer(line: &str) -> Option<LayerId> {
    if !line.contains("code table") {
        return None;
    }
    match line.trim_end().chars().last() {
        Some('A') => Some(LayerId::A),
        Some('B') => Some(LayerId::B),
        _ => None,
    }
}
