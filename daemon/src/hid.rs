//! The HID boot-keyboard report and the character-to-scancode mapping.

use usbd_hid::descriptor::generator_prelude::*;

use crate::engine::Emission;
use crate::error::Error;

/// USB vendor id announced to the kernel.
pub const VENDOR_ID: u32 = 0x15d9;

/// USB product id announced to the kernel.
pub const PRODUCT_ID: u32 = 0x2323;

/// Device name announced to the kernel.
pub const DEVICE_NAME: &str = "binary5kbd";

/// Left-control bit of the HID modifier byte.
pub const LEFT_CTRL: u8 = 1 << 0;

/// Left-shift bit of the HID modifier byte.
pub const LEFT_SHIFT: u8 = 1 << 1;

/// Left-alt bit of the HID modifier byte.
pub const LEFT_ALT: u8 = 1 << 2;

// Modifier-key indices in an emission snapshot.
const MOD_SHIFT: usize = 0; // M1
const MOD_ALT: usize = 3; // M4
const MOD_CTRL: usize = 4; // M5

/// Report describing a boot keyboard: an 8-byte input report (modifier
/// byte, reserved byte, six keycodes) and a 1-byte LED output report.
#[gen_hid_descriptor(
    (collection = APPLICATION, usage_page = GENERIC_DESKTOP, usage = KEYBOARD) = {
        (usage_page = KEYBOARD, usage_min = 0xE0, usage_max = 0xE7) = {
            #[packed_bits 8] #[item_settings data,variable,absolute] modifier=input;
        };
        (usage_min = 0x00, usage_max = 0xFF) = {
            #[item_settings constant,variable,absolute] reserved=input;
        };
        (usage_page = LEDS, usage_min = 0x01, usage_max = 0x05) = {
            #[packed_bits 5] #[item_settings data,variable,absolute] leds=output;
        };
        (usage_page = KEYBOARD, usage_min = 0x00, usage_max = 0x65) = {
            #[item_settings data,array,absolute] keycodes=input;
        };
    }
)]
#[derive(Default, PartialEq, Eq)]
pub struct Report {
    pub modifier: u8,
    pub reserved: u8,
    pub leds: u8,
    pub keycodes: [u8; 6],
}

impl Report {
    /// A report carrying one pressed key.
    #[must_use]
    pub fn pressed(keycode: u8, modifier: u8) -> Self {
        Self {
            modifier,
            keycodes: [keycode, 0, 0, 0, 0, 0],
            ..Self::default()
        }
    }

    /// The all-keys-up report.
    #[must_use]
    pub fn release() -> Self {
        Self::default()
    }

    /// The 8-byte input report as the host sees it.
    #[must_use]
    pub fn to_input(&self) -> [u8; 8] {
        let k = &self.keycodes;
        [
            self.modifier,
            self.reserved,
            k[0],
            k[1],
            k[2],
            k[3],
            k[4],
            k[5],
        ]
    }
}

/// Maps an emitted character tuple to `(keycode, modifier byte)`.
///
/// The modifier byte starts from the emission snapshot (M1 contributes
/// LeftShift, M4 LeftAlt, M5 LeftCtrl). An upper-case result under M5
/// swaps Ctrl for Alt, and under M4 Alt for Ctrl, so the control plane
/// keeps its literal letters. Symbolic results go through the scancode
/// table, which may force modifier bits on or off.
///
/// # Errors
///
/// [`Error::MapMissing`] when the resolved symbol has no table entry.
pub fn scancode(emission: &Emission) -> Result<(u8, u8), Error> {
    let mut bits = snapshot_bits(emission);
    let modified = emission.modified.as_str();

    if modified.is_empty() {
        return base_code(&emission.base, bits);
    }
    if let Some(upper) = single_ascii(modified, u8::is_ascii_uppercase) {
        if emission.mods.is_active(MOD_CTRL) {
            bits &= !LEFT_CTRL;
            bits |= LEFT_ALT;
            return Ok((letter(upper.to_ascii_lowercase()), bits));
        }
        if emission.mods.is_active(MOD_ALT) {
            bits &= !LEFT_ALT;
            bits |= LEFT_CTRL;
            return Ok((letter(upper.to_ascii_lowercase()), bits));
        }
        // Shift already comes from the snapshot; send the base letter.
        return base_code(&emission.base, bits);
    }
    if let Some(digit) = single_ascii(modified, |byte| (b'1'..=b'9').contains(byte)) {
        return Ok((0x1e + digit - b'1', bits));
    }
    if let Some(lower) = single_ascii(modified, u8::is_ascii_lowercase) {
        return Ok((letter(lower), bits));
    }
    symbol(modified, bits)
}

fn snapshot_bits(emission: &Emission) -> u8 {
    let mut bits = 0;
    if emission.mods.is_active(MOD_SHIFT) {
        bits |= LEFT_SHIFT;
    }
    if emission.mods.is_active(MOD_ALT) {
        bits |= LEFT_ALT;
    }
    if emission.mods.is_active(MOD_CTRL) {
        bits |= LEFT_CTRL;
    }
    bits
}

fn base_code(base: &str, bits: u8) -> Result<(u8, u8), Error> {
    if let Some(lower) = single_ascii(base, u8::is_ascii_lowercase) {
        return Ok((letter(lower), bits));
    }
    if let Some(digit) = single_ascii(base, |byte| (b'1'..=b'9').contains(byte)) {
        return Ok((0x1e + digit - b'1', bits));
    }
    symbol(base, bits)
}

fn single_ascii(value: &str, accept: impl Fn(&u8) -> bool) -> Option<u8> {
    match value.as_bytes() {
        [byte] if accept(byte) => Some(*byte),
        _ => None,
    }
}

fn letter(lower: u8) -> u8 {
    0x04 + lower - b'a'
}

fn symbol(sym: &str, bits: u8) -> Result<(u8, u8), Error> {
    let (keycode, set, clear) =
        symbol_entry(sym).ok_or_else(|| Error::MapMissing(sym.to_owned()))?;
    Ok((keycode, (bits | set) & !clear))
}

/// The symbolic scancode table: `(keycode, forced-set, forced-clear)`
/// modifier bits applied on top of the snapshot-derived byte.
#[allow(clippy::match_same_arms)]
fn symbol_entry(sym: &str) -> Option<(u8, u8, u8)> {
    let entry = match sym {
        "0" => (0x27, 0, 0),
        "RET" => (0x28, 0, 0),
        "ESC" => (0x29, 0, 0),
        "BS" => (0x2a, 0, 0),
        "TAB" => (0x2b, 0, 0),
        "SP" => (0x2c, 0, 0),
        "-" => (0x2d, 0, 0),
        "=" => (0x2e, 0, 0),
        "[" => (0x2f, 0, 0),
        "]" => (0x30, 0, 0),
        "\\" => (0x31, 0, 0),
        ";" => (0x33, 0, 0),
        "'" => (0x34, 0, 0),
        "`" => (0x35, 0, 0),
        "," => (0x36, 0, 0),
        "." => (0x37, 0, 0),
        "/" => (0x38, 0, 0),
        "F1" => (0x3a, 0, 0),
        "F2" => (0x3b, 0, 0),
        "F3" => (0x3c, 0, 0),
        "HOME" => (0x4a, 0, LEFT_CTRL),
        "PUP" => (0x4b, 0, LEFT_ALT),
        "DEL" => (0x4c, 0, LEFT_CTRL),
        "CSDEL" => (0x4c, LEFT_SHIFT | LEFT_CTRL, 0),
        "END" => (0x4d, 0, LEFT_CTRL),
        "PDOWN" => (0x4e, 0, LEFT_CTRL),
        "RIGHT" => (0x4f, 0, LEFT_CTRL),
        "CRIGHT" => (0x4f, LEFT_CTRL, LEFT_ALT),
        "LEFT" => (0x50, 0, LEFT_CTRL),
        "CLEFT" => (0x50, LEFT_CTRL, LEFT_ALT),
        "DOWN" => (0x51, 0, LEFT_CTRL),
        "UP" => (0x52, 0, LEFT_CTRL),
        "!" => (0x1e, LEFT_SHIFT, 0),
        "@" => (0x1f, LEFT_SHIFT, 0),
        "#" => (0x20, LEFT_SHIFT, 0),
        "$" => (0x21, LEFT_SHIFT, 0),
        "%" => (0x22, LEFT_SHIFT, 0),
        "^" => (0x23, LEFT_SHIFT, 0),
        "&" => (0x24, LEFT_SHIFT, 0),
        "*" => (0x25, LEFT_SHIFT, 0),
        "(" => (0x26, LEFT_SHIFT, 0),
        ")" => (0x27, LEFT_SHIFT, 0),
        "_" => (0x2d, LEFT_SHIFT, 0),
        "+" => (0x2e, LEFT_SHIFT, 0),
        "{" => (0x2f, LEFT_SHIFT, 0),
        "}" => (0x30, LEFT_SHIFT, 0),
        "VBAR" => (0x32, LEFT_SHIFT, 0),
        ":" => (0x33, LEFT_SHIFT, 0),
        "\"" => (0x34, LEFT_SHIFT, 0),
        "~" => (0x35, LEFT_SHIFT, 0),
        "<" => (0x36, LEFT_SHIFT, 0),
        ">" => (0x37, LEFT_SHIFT, 0),
        "?" => (0x38, LEFT_SHIFT, 0),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codetable::CodeTable;
    use crate::engine::{Engine, ModSnapshot, ModState};
    use std::time::Instant;

    fn emission(base: &str, modified: &str, mods: ModSnapshot) -> Emission {
        Emission {
            base: base.to_owned(),
            modified: modified.to_owned(),
            mods,
        }
    }

    #[test]
    fn plain_letter_with_armed_shift() {
        let mods = ModSnapshot::of(&[(MOD_SHIFT, ModState::Armed)]);
        let (keycode, bits) = scancode(&emission("a", "", mods)).unwrap();
        assert_eq!((keycode, bits), (0x04, LEFT_SHIFT));
    }

    #[test]
    fn shift_nine_is_open_paren() {
        let mods = ModSnapshot::of(&[(MOD_SHIFT, ModState::Armed)]);
        let (keycode, bits) = scancode(&emission("9", "(", mods)).unwrap();
        assert_eq!((keycode, bits), (0x26, LEFT_SHIFT));
    }

    #[test]
    fn upper_case_under_ctrl_swaps_to_alt() {
        let mods = ModSnapshot::of(&[(MOD_CTRL, ModState::Armed)]);
        let (keycode, bits) = scancode(&emission("a", "A", mods)).unwrap();
        assert_eq!((keycode, bits), (0x04, LEFT_ALT));
    }

    #[test]
    fn upper_case_under_alt_swaps_to_ctrl() {
        let mods = ModSnapshot::of(&[(MOD_ALT, ModState::Locked)]);
        let (keycode, bits) = scancode(&emission("a", "A", mods)).unwrap();
        assert_eq!((keycode, bits), (0x04, LEFT_CTRL));
    }

    #[test]
    fn upper_case_under_shift_sends_the_base_letter() {
        let mods = ModSnapshot::of(&[(MOD_SHIFT, ModState::Armed)]);
        let (keycode, bits) = scancode(&emission("b", "B", mods)).unwrap();
        assert_eq!((keycode, bits), (0x05, LEFT_SHIFT));
    }

    #[test]
    fn digits_and_lower_case_results() {
        let mods = ModSnapshot::default();
        assert_eq!(scancode(&emission("a", "7", mods)).unwrap(), (0x24, 0));
        assert_eq!(scancode(&emission("a", "q", mods)).unwrap(), (0x14, 0));
        assert_eq!(scancode(&emission("5", "", mods)).unwrap(), (0x22, 0));
    }

    #[test]
    fn forced_modifier_bits() {
        let mods = ModSnapshot::default();
        assert_eq!(
            scancode(&emission("a", "CSDEL", mods)).unwrap(),
            (0x4c, LEFT_SHIFT | LEFT_CTRL)
        );

        // CLEFT forces Ctrl on and Alt off even when M4 contributed Alt.
        let mods = ModSnapshot::of(&[(MOD_ALT, ModState::Locked)]);
        assert_eq!(
            scancode(&emission("a", "CLEFT", mods)).unwrap(),
            (0x50, LEFT_CTRL)
        );

        // Plain arrows drop a snapshot Ctrl so the host sees a bare arrow.
        let mods = ModSnapshot::of(&[(MOD_CTRL, ModState::Locked)]);
        assert_eq!(scancode(&emission("a", "UP", mods)).unwrap(), (0x52, 0));
    }

    #[test]
    fn aux_specials_map_through_the_base() {
        let mods = ModSnapshot::default();
        assert_eq!(scancode(&emission("SP", "", mods)).unwrap(), (0x2c, 0));
        assert_eq!(scancode(&emission("BS", "", mods)).unwrap(), (0x2a, 0));
    }

    #[test]
    fn unknown_symbol_is_map_missing() {
        let result = scancode(&emission("a", "NOPE", ModSnapshot::default()));
        assert!(matches!(result, Err(Error::MapMissing(sym)) if sym == "NOPE"));
    }

    const DOC: &str = "\
* code table A

| dcode | bits  | hand | key | M1 | M2   | M3    | M4 | M5 |   |
|     4 | 00100 |      | M3  |    |      |       |    |    |   |
|     5 | 00101 |      | M1  |    |      |       |    |    |   |
|     6 | 00110 |      | M2  |    |      |       |    |    |   |
|     7 | 00111 |      | M4  |    |      |       |    |    |   |
|     8 | 01000 |      | M5  |    |      |       |    |    |   |
|     9 | 01001 |      | a   | A  | 1    | RET   | A  | A  |   |
|    10 | 01010 |      | e   | E  | 2    | UP    | E  | E  |   |
|    11 | 01011 |      | s   | S  | (    | CSDEL | S  | S  |   |
|    12 | 01100 |      | t   | T  | VBAR | TAB   | T  | T  |   |
";

    /// Every character reachable in the layer maps to a scancode; base
    /// rows additionally round-trip to their letter keycode.
    #[test]
    fn configured_layer_round_trips() {
        let table = CodeTable::parse(DOC).unwrap();
        let mut wanted: Vec<String> = Vec::new();
        for (_, def) in table.active_layer().entries() {
            if def.modifier_index().is_some() {
                continue;
            }
            wanted.push(def.base.clone());
            for value in &def.mods {
                if !value.is_empty() {
                    wanted.push(value.clone());
                }
            }
        }

        for character in wanted {
            let (mod_chord, key_chord) = table.chr_to_chord(&character);
            assert_ne!(key_chord, 0, "{character:?} not reachable");

            let mut engine = Engine::new(table.clone(), Instant::now());
            if mod_chord != 0 {
                assert!(engine.resolve(mod_chord, Instant::now()).is_none());
            }
            let emitted = engine.resolve(key_chord, Instant::now()).unwrap();
            let (keycode, _) = scancode(&emitted).unwrap();

            if mod_chord == 0 {
                assert_eq!(keycode, letter(character.as_bytes()[0]));
            }
        }
    }
}
