//! The kernel HID sink: a virtual keyboard on `/dev/uhid`.
//!
//! The uhid character device speaks fixed-size `struct uhid_event`
//! frames. The device is announced with `UHID_CREATE2`, every key press
//! goes out as an `UHID_INPUT2` frame, and the kernel talks back with
//! `UHID_START`, `UHID_OUTPUT` (LED state) and friends. The file
//! descriptor is non-blocking; when the kernel-side writer is busy the
//! sender yields until the descriptor drains, so no report is ever
//! dropped.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;

use futures::channel::mpsc::Receiver;
use futures::StreamExt;
use log::{debug, info};
use tokio::io::unix::AsyncFd;
use usbd_hid::descriptor::SerializedDescriptor;

use crate::error::Error;
use crate::hid::{Report, DEVICE_NAME, PRODUCT_ID, VENDOR_ID};

/// Path of the kernel uhid character device.
pub const UHID_PATH: &str = "/dev/uhid";

// uhid_event type discriminants, from include/uapi/linux/uhid.h.
const UHID_DESTROY: u32 = 1;
const UHID_START: u32 = 2;
const UHID_STOP: u32 = 3;
const UHID_OPEN: u32 = 4;
const UHID_CLOSE: u32 = 5;
const UHID_OUTPUT: u32 = 6;
const UHID_CREATE2: u32 = 11;
const UHID_INPUT2: u32 = 12;

const BUS_USB: u16 = 0x03;

/// Size of the packed `struct uhid_event`: a 4-byte type followed by the
/// largest union member, `uhid_create2_req` (256 bytes of name/phys/uniq,
/// 20 bytes of ids, 4096 bytes of descriptor space).
const EVENT_SIZE: usize = 4 + 256 + 20 + 4096;

// Field offsets inside a create2 frame.
const OFF_NAME: usize = 4;
const OFF_RD_SIZE: usize = 260;
const OFF_BUS: usize = 262;
const OFF_VENDOR: usize = 264;
const OFF_PRODUCT: usize = 268;
const OFF_RD_DATA: usize = 280;

// Field offsets inside an input2 frame.
const OFF_INPUT_SIZE: usize = 4;
const OFF_INPUT_DATA: usize = 6;

/// The virtual keyboard device node.
pub struct UhidKeyboard {
    fd: AsyncFd<File>,
}

impl UhidKeyboard {
    /// Opens `/dev/uhid`, announces the keyboard and waits for the kernel
    /// to start it.
    ///
    /// # Errors
    ///
    /// [`Error::HidSinkClosed`] when the device node cannot be opened or
    /// the kernel rejects the descriptor.
    pub async fn create() -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(UHID_PATH)
            .map_err(|err| Error::HidSinkClosed(format!("{UHID_PATH}: {err}")))?;
        let fd = AsyncFd::new(file).map_err(|err| Error::HidSinkClosed(err.to_string()))?;
        let device = Self { fd };

        let frame = create2_event(DEVICE_NAME, VENDOR_ID, PRODUCT_ID, Report::desc())
            .ok_or_else(|| Error::HidSinkClosed("report descriptor too large".to_owned()))?;
        device.write_event(&frame).await?;
        device.wait_for_start().await?;
        Ok(device)
    }

    /// Consumes reports from the channel until it closes, draining kernel
    /// events in between.
    ///
    /// # Errors
    ///
    /// Fails when the kernel stops the device or the descriptor breaks.
    pub async fn start(&mut self, mut rx: Receiver<Report>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                report = rx.next() => match report {
                    Some(report) => self.send(&report).await?,
                    None => return Ok(()),
                },
                result = self.drain_kernel_event() => result?,
            }
        }
    }

    /// Sends one 8-byte input report, yielding while the kernel-side
    /// writer is busy.
    ///
    /// # Errors
    ///
    /// [`Error::HidSinkClosed`] when the device node rejects the frame.
    pub async fn send(&self, report: &Report) -> Result<(), Error> {
        debug!("report {report:?}");
        self.write_event(&input2_event(report.to_input())).await
    }

    /// Releases all keys and destroys the device node.
    ///
    /// # Errors
    ///
    /// [`Error::HidSinkClosed`] when the final frames cannot be written.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.send(&Report::release()).await?;
        self.write_event(&plain_event(UHID_DESTROY)).await?;
        info!("uhid device destroyed");
        Ok(())
    }

    async fn write_event(&self, frame: &[u8; EVENT_SIZE]) -> Result<(), Error> {
        loop {
            let mut guard = self
                .fd
                .writable()
                .await
                .map_err(|err| Error::HidSinkClosed(err.to_string()))?;
            match guard.try_io(|inner| inner.get_ref().write(frame)) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(err)) => return Err(Error::HidSinkClosed(err.to_string())),
                Err(_would_block) => {}
            }
        }
    }

    async fn read_event(&self) -> Result<Option<[u8; EVENT_SIZE]>, Error> {
        let mut guard = self
            .fd
            .readable()
            .await
            .map_err(|err| Error::HidSinkClosed(err.to_string()))?;
        let mut frame = [0u8; EVENT_SIZE];
        match guard.try_io(|inner| inner.get_ref().read(&mut frame)) {
            Ok(Ok(_)) => Ok(Some(frame)),
            Ok(Err(err)) => Err(Error::HidSinkClosed(err.to_string())),
            Err(_would_block) => Ok(None),
        }
    }

    async fn wait_for_start(&self) -> Result<(), Error> {
        loop {
            if let Some(frame) = self.read_event().await? {
                if event_type(&frame) == UHID_START {
                    info!("uhid device started");
                    return Ok(());
                }
                self.handle_event(&frame)?;
            }
        }
    }

    async fn drain_kernel_event(&self) -> Result<(), Error> {
        if let Some(frame) = self.read_event().await? {
            self.handle_event(&frame)?;
        }
        Ok(())
    }

    fn handle_event(&self, frame: &[u8; EVENT_SIZE]) -> Result<(), Error> {
        match event_type(frame) {
            UHID_OUTPUT => debug!("led report 0x{:02x}", frame[4]),
            UHID_OPEN => debug!("host opened the device"),
            UHID_CLOSE => debug!("host closed the device"),
            UHID_STOP => {
                return Err(Error::HidSinkClosed(
                    "kernel stopped the device".to_owned(),
                ))
            }
            other => debug!("ignoring uhid event type {other}"),
        }
        Ok(())
    }
}

fn event_type(frame: &[u8; EVENT_SIZE]) -> u32 {
    u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]])
}

fn plain_event(event_type: u32) -> [u8; EVENT_SIZE] {
    let mut frame = [0u8; EVENT_SIZE];
    frame[0..4].copy_from_slice(&event_type.to_le_bytes());
    frame
}

/// Builds the `UHID_CREATE2` frame. `None` when the descriptor does not
/// fit the kernel's 4096-byte limit.
fn create2_event(
    name: &str,
    vendor: u32,
    product: u32,
    descriptor: &[u8],
) -> Option<[u8; EVENT_SIZE]> {
    let rd_size = u16::try_from(descriptor.len()).ok()?;
    if descriptor.len() > EVENT_SIZE - OFF_RD_DATA {
        return None;
    }

    let mut frame = plain_event(UHID_CREATE2);
    let name = name.as_bytes();
    frame[OFF_NAME..OFF_NAME + name.len()].copy_from_slice(name);
    frame[OFF_RD_SIZE..OFF_RD_SIZE + 2].copy_from_slice(&rd_size.to_le_bytes());
    frame[OFF_BUS..OFF_BUS + 2].copy_from_slice(&BUS_USB.to_le_bytes());
    frame[OFF_VENDOR..OFF_VENDOR + 4].copy_from_slice(&vendor.to_le_bytes());
    frame[OFF_PRODUCT..OFF_PRODUCT + 4].copy_from_slice(&product.to_le_bytes());
    frame[OFF_RD_DATA..OFF_RD_DATA + descriptor.len()].copy_from_slice(descriptor);
    Some(frame)
}

/// Builds the `UHID_INPUT2` frame carrying one 8-byte input report.
fn input2_event(report: [u8; 8]) -> [u8; EVENT_SIZE] {
    const REPORT_LEN: u16 = 8;
    let mut frame = plain_event(UHID_INPUT2);
    frame[OFF_INPUT_SIZE..OFF_INPUT_SIZE + 2].copy_from_slice(&REPORT_LEN.to_le_bytes());
    frame[OFF_INPUT_DATA..OFF_INPUT_DATA + report.len()].copy_from_slice(&report);
    frame
}
