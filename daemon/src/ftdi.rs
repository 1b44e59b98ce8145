//! FT232H glue: builds the concrete sampler back-ends on the USB bridge.
//!
//! Both hardware variants hang off the same FT232H breakout. The touch
//! controller sits on the I²C pins (D0 clock, D1+D2 data); the switch
//! harness uses D0..D6 as active-low inputs with external pull-ups, main
//! contacts on D0..D4, space on D5, backspace on D6.

use ftdi_embedded_hal::libftd2xx::{Ft232h, Ftdi};
use ftdi_embedded_hal::{FtHal, I2c, InputPin};
use log::info;

use crate::error::Error;
use crate::sampler::{KeySwitches, Sampler, Touchpad};

/// I²C clock for the touch controller.
const I2C_FREQ_HZ: u32 = 100_000;

/// Touch back-end bound to the bridge.
pub type TouchpadSampler = Touchpad<I2c<Ft232h>>;

/// Switch back-end bound to the bridge.
pub type KeySwitchSampler = KeySwitches<InputPin<Ft232h>>;

/// The two interchangeable back-ends, selected by name at startup.
pub enum Backend {
    /// Capacitive AT42QT1070 touchpad.
    Touchpad(TouchpadSampler),
    /// Plain key switches.
    KeySwitches(KeySwitchSampler),
}

impl Backend {
    /// Opens the bridge and wires the back-end named on the command line
    /// (`keysw` or `touchpad`).
    ///
    /// # Errors
    ///
    /// [`Error::ProbeFailed`] for an unknown name or an absent bridge.
    pub fn select(name: &str) -> Result<Self, Error> {
        match name {
            "touchpad" => {
                info!("touchpad mode");
                Ok(Self::Touchpad(touchpad()?))
            }
            "keysw" => {
                info!("keysw mode");
                Ok(Self::KeySwitches(key_switches()?))
            }
            other => Err(Error::ProbeFailed(format!("unknown back-end {other:?}"))),
        }
    }
}

impl Sampler for Backend {
    fn probe(&mut self) -> Result<(), Error> {
        match self {
            Self::Touchpad(sampler) => sampler.probe(),
            Self::KeySwitches(sampler) => sampler.probe(),
        }
    }

    fn read_chord(&mut self) -> Result<u8, Error> {
        match self {
            Self::Touchpad(sampler) => sampler.read_chord(),
            Self::KeySwitches(sampler) => sampler.read_chord(),
        }
    }
}

fn open_bridge() -> Result<Ft232h, Error> {
    let device = Ftdi::new().map_err(bridge_err)?;
    Ft232h::try_from(device).map_err(bridge_err)
}

/// Wires the capacitive touch back-end.
///
/// # Errors
///
/// [`Error::ProbeFailed`] when the bridge is absent or refuses I²C mode.
pub fn touchpad() -> Result<TouchpadSampler, Error> {
    let hal = FtHal::init_freq(open_bridge()?, I2C_FREQ_HZ).map_err(bridge_err)?;
    let i2c = hal.i2c().map_err(bridge_err)?;
    Ok(Touchpad::new(i2c))
}

/// Wires the switch back-end.
///
/// # Errors
///
/// [`Error::ProbeFailed`] when the bridge is absent or a line cannot be
/// claimed.
pub fn key_switches() -> Result<KeySwitchSampler, Error> {
    let hal = FtHal::init_default(open_bridge()?).map_err(bridge_err)?;
    let main = [
        hal.adi0().map_err(bridge_err)?,
        hal.adi1().map_err(bridge_err)?,
        hal.adi2().map_err(bridge_err)?,
        hal.adi3().map_err(bridge_err)?,
        hal.adi4().map_err(bridge_err)?,
    ];
    let space = hal.adi5().map_err(bridge_err)?;
    let backspace = hal.adi6().map_err(bridge_err)?;
    Ok(KeySwitches::new(main, space, backspace))
}

fn bridge_err(err: impl core::fmt::Debug) -> Error {
    Error::ProbeFailed(format!("{err:?}"))
}
