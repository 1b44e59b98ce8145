//! Contact-sampling back-ends.
//!
//! Two interchangeable sources of contact snapshots exist: a capacitive
//! AT42QT1070 touch controller on the I²C bus and a plain switch harness
//! on GPIO lines. Both deliver the same 7-bit chord bitmap: bits 0..4 are
//! the main contacts, bit 5 space and bit 6 backspace.

use std::thread;
use std::time::Duration;

use embedded_hal::digital::InputPin;
use embedded_hal::i2c::I2c;
use log::{debug, info};

use crate::chord::{AUX_BACKSPACE, AUX_SPACE, MAIN_MASK};
use crate::error::Error;

/// Number of main contacts forming the 5-bit chord.
pub const MAIN_CONTACTS: usize = 5;

/// A pollable source of contact snapshots.
///
/// `read_chord` never blocks beyond one bus transaction; all pacing is
/// the caller's business.
pub trait Sampler {
    /// Initialises the hardware and runs its self-check.
    ///
    /// # Errors
    ///
    /// [`Error::ProbeFailed`] when the hardware is absent or broken; this
    /// is fatal for the process.
    fn probe(&mut self) -> Result<(), Error>;

    /// Reads the current contact bitmap.
    ///
    /// # Errors
    ///
    /// [`Error::SamplerIo`] on a transient bus error; the caller logs it
    /// and skips the scan tick.
    fn read_chord(&mut self) -> Result<u8, Error>;
}

/// I²C address of the AT42QT1070.
pub const AT42QT1070_ADDR: u8 = 0x1b;

const CHIP_ID: u8 = 0x2e;

// AT42QT1070 register map, as far as this driver needs it.
const REG_CHIP_ID: u8 = 0;
const REG_DETECTION_STATUS: u8 = 2;
const REG_KEY_STATUS: u8 = 3;
const REG_NTHR_BASE: u8 = 32;
const REG_AVE_AKS_BASE: u8 = 39;
const REG_GUARD_CHANNEL: u8 = 53;
const REG_LOW_POWER: u8 = 54;
const REG_CALIBRATE: u8 = 56;

/// Detection-status bit set while a calibration runs.
const CALIBRATING: u8 = 1 << 7;

const CALIBRATION_RETRIES: u32 = 10;
const CALIBRATION_POLL: Duration = Duration::from_millis(10);

/// Negative detection threshold programmed for the five key channels.
const KEY_THRESHOLD: u8 = 20;

/// Averaging factor 8, AKS group 1, for the five key channels.
const KEY_AVE_AKS: u8 = (8 << 2) | 1;

/// Channel 5 acts as the guard; channel 6 is unused and disabled.
const GUARD_CHANNEL: u8 = 5;
const UNUSED_CHANNEL: u8 = 6;

/// The key channels carrying the five main contacts.
const KEY_CHANNELS: u8 = 5;

/// Capacitive touch back-end: an AT42QT1070 on the I²C bus.
pub struct Touchpad<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Touchpad<I2C> {
    /// Wraps an I²C bus with the touch controller on it.
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let mut buf = [0];
        self.i2c
            .write_read(AT42QT1070_ADDR, &[reg], &mut buf)
            .map_err(|err| Error::SamplerIo(format!("{err:?}")))?;
        Ok(buf[0])
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        self.i2c
            .write(AT42QT1070_ADDR, &[reg, value])
            .map_err(|err| Error::SamplerIo(format!("{err:?}")))
    }

    fn calibrate(&mut self) -> Result<(), Error> {
        self.write_reg(REG_CALIBRATE, 1)?;
        for _ in 0..CALIBRATION_RETRIES {
            thread::sleep(CALIBRATION_POLL);
            if self.read_reg(REG_DETECTION_STATUS)? & CALIBRATING == 0 {
                return Ok(());
            }
        }
        Err(Error::ProbeFailed("calibration did not settle".to_owned()))
    }
}

impl<I2C: I2c> Sampler for Touchpad<I2C> {
    fn probe(&mut self) -> Result<(), Error> {
        let id = self.read_reg(REG_CHIP_ID)?;
        if id != CHIP_ID {
            return Err(Error::ProbeFailed(format!(
                "chip id 0x{id:02x}, expected 0x{CHIP_ID:02x}"
            )));
        }

        self.calibrate()?;

        // Leave low-power mode for the shortest scan interval, and verify
        // the bus accepts writes at all.
        self.write_reg(REG_LOW_POWER, 0)?;
        if self.read_reg(REG_LOW_POWER)? != 0 {
            return Err(Error::ProbeFailed("register writeback mismatch".to_owned()));
        }

        self.write_reg(REG_GUARD_CHANNEL, GUARD_CHANNEL)?;
        for key in 0..KEY_CHANNELS {
            self.write_reg(REG_NTHR_BASE + key, KEY_THRESHOLD)?;
            self.write_reg(REG_AVE_AKS_BASE + key, KEY_AVE_AKS)?;
        }
        // An averaging factor of zero takes the channel out of the scan.
        self.write_reg(REG_AVE_AKS_BASE + UNUSED_CHANNEL, 0)?;

        info!("found AT42QT1070, initialization okay");
        Ok(())
    }

    fn read_chord(&mut self) -> Result<u8, Error> {
        let status = self.read_reg(REG_KEY_STATUS)?;
        debug!("key status 0x{status:02x}");
        Ok(status & MAIN_MASK)
    }
}

/// Switch back-end: seven active-low GPIO lines, five main contacts plus
/// the space and backspace keys.
///
/// The switch harness wires the main contacts in the opposite bit order
/// to the touch controller; `read_chord` re-reverses them so both
/// back-ends emit the codetable's chord numbering.
pub struct KeySwitches<P> {
    main: [P; MAIN_CONTACTS],
    space: P,
    backspace: P,
}

impl<P: InputPin> KeySwitches<P> {
    /// Wraps the seven input lines.
    pub fn new(main: [P; MAIN_CONTACTS], space: P, backspace: P) -> Self {
        Self {
            main,
            space,
            backspace,
        }
    }
}

impl<P: InputPin> Sampler for KeySwitches<P> {
    fn probe(&mut self) -> Result<(), Error> {
        // One full read proves all lines are reachable.
        let chord = self
            .read_chord()
            .map_err(|err| Error::ProbeFailed(err.to_string()))?;
        info!("key switches ready, initial state 0x{chord:02x}");
        Ok(())
    }

    fn read_chord(&mut self) -> Result<u8, Error> {
        let mut chord = 0u8;
        for (index, pin) in self.main.iter_mut().enumerate() {
            if pin
                .is_low()
                .map_err(|err| Error::SamplerIo(format!("{err:?}")))?
            {
                chord |= 1 << (MAIN_CONTACTS - 1 - index);
            }
        }
        if self
            .space
            .is_low()
            .map_err(|err| Error::SamplerIo(format!("{err:?}")))?
        {
            chord |= AUX_SPACE;
        }
        if self
            .backspace
            .is_low()
            .map_err(|err| Error::SamplerIo(format!("{err:?}")))?
        {
            chord |= AUX_BACKSPACE;
        }
        Ok(chord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::i2c::{ErrorType, Operation};

    struct Pin(bool);

    impl embedded_hal::digital::ErrorType for Pin {
        type Error = Infallible;
    }

    impl InputPin for Pin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0)
        }
    }

    fn switches(pressed: [bool; 7]) -> KeySwitches<Pin> {
        let [m0, m1, m2, m3, m4, space, backspace] = pressed;
        KeySwitches::new(
            [Pin(m0), Pin(m1), Pin(m2), Pin(m3), Pin(m4)],
            Pin(space),
            Pin(backspace),
        )
    }

    #[test]
    fn switch_bits_are_reversed_to_canonical_order() {
        let mut sw = switches([true, false, false, false, false, false, false]);
        assert_eq!(sw.read_chord().unwrap(), 0b1_0000);
        let mut sw = switches([false, false, false, false, true, false, false]);
        assert_eq!(sw.read_chord().unwrap(), 0b0_0001);
    }

    #[test]
    fn aux_lines_set_the_high_bits() {
        let mut sw = switches([false, false, false, false, false, true, false]);
        assert_eq!(sw.read_chord().unwrap(), AUX_SPACE);
        let mut sw = switches([false, false, false, false, false, false, true]);
        assert_eq!(sw.read_chord().unwrap(), AUX_BACKSPACE);
    }

    #[test]
    fn released_lines_read_as_zero() {
        let mut sw = switches([false; 7]);
        assert_eq!(sw.read_chord().unwrap(), 0);
        assert!(sw.probe().is_ok());
    }

    /// Register-level model of the AT42QT1070: writes land in a register
    /// file, reads come back out, and a triggered calibration stays busy
    /// for a few polls.
    struct Chip {
        regs: [u8; 64],
        busy_polls: u8,
    }

    impl Chip {
        fn new() -> Self {
            let mut regs = [0u8; 64];
            regs[usize::from(REG_CHIP_ID)] = CHIP_ID;
            Self {
                regs,
                busy_polls: 0,
            }
        }

        fn read(&mut self, reg: usize) -> u8 {
            if reg == usize::from(REG_DETECTION_STATUS) && self.busy_polls > 0 {
                self.busy_polls -= 1;
                return CALIBRATING;
            }
            self.regs[reg]
        }
    }

    impl ErrorType for Chip {
        type Error = Infallible;
    }

    impl I2c for Chip {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            let mut reg = 0usize;
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => {
                        reg = usize::from(bytes[0]);
                        if bytes.len() > 1 {
                            if reg == usize::from(REG_CALIBRATE) {
                                self.busy_polls = 3;
                            } else {
                                self.regs[reg] = bytes[1];
                            }
                        }
                    }
                    Operation::Read(buf) => {
                        for byte in buf.iter_mut() {
                            *byte = self.read(reg);
                            reg += 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn probe_programs_the_controller() {
        let mut touchpad = Touchpad::new(Chip::new());
        touchpad.probe().unwrap();

        let chip = &touchpad.i2c;
        assert_eq!(chip.regs[usize::from(REG_GUARD_CHANNEL)], GUARD_CHANNEL);
        assert_eq!(chip.regs[usize::from(REG_NTHR_BASE)], KEY_THRESHOLD);
        assert_eq!(chip.regs[usize::from(REG_AVE_AKS_BASE)], KEY_AVE_AKS);
        assert_eq!(
            chip.regs[usize::from(REG_AVE_AKS_BASE + UNUSED_CHANNEL)],
            0
        );
        assert_eq!(chip.busy_polls, 0);
    }

    #[test]
    fn probe_rejects_a_foreign_chip() {
        let mut chip = Chip::new();
        chip.regs[usize::from(REG_CHIP_ID)] = 0x42;
        let mut touchpad = Touchpad::new(chip);
        assert!(matches!(touchpad.probe(), Err(Error::ProbeFailed(_))));
    }

    #[test]
    fn key_status_is_masked_to_the_main_contacts() {
        let mut chip = Chip::new();
        chip.regs[usize::from(REG_KEY_STATUS)] = 0b0110_0101;
        let mut touchpad = Touchpad::new(chip);
        assert_eq!(touchpad.read_chord().unwrap(), 0b0_0101);
    }
}
