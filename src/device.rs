//! Tone device command link
//!
//! The DSP device is driven over a one-command-per-line text protocol
//! with no acknowledgments:
//!
//! - `TEST ON` / `TEST OFF` - enable/disable audiogram test mode
//! - `FREQ <hz>` - set the test tone frequency
//! - `LEVEL <db>` - set the test tone level (one decimal place)
//! - `GAIN <x>`, `EQ500 <db>`, `EQ2000 <db>`, `EQ4000 <db>` - apply an
//!   equalizer setting, always in this order
//!
//! [`ToneSink`] is the capability the rest of the crate depends on;
//! [`LineDevice`] encodes the protocol over any [`std::io::Write`]
//! (typically an opened serial tty). Any transmit failure is fatal to the
//! operation in progress and is never retried here.

use crate::eq::EqGainSet;
use std::io::Write;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from the device command link
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no device connected")]
    NotConnected,

    #[error("failed to transmit command: {0}")]
    Transport(#[from] std::io::Error),
}

/// Command-sink capability for the tone device
pub trait ToneSink: Send {
    /// Enable or disable audiogram test mode
    fn set_test_mode(&mut self, on: bool) -> Result<(), DeviceError>;

    /// Set the active test frequency in Hz
    fn set_freq(&mut self, hz: f64) -> Result<(), DeviceError>;

    /// Set the current output level in dB
    fn set_level_db(&mut self, db: f64) -> Result<(), DeviceError>;

    /// Apply an equalizer setting: global gain first, then the three
    /// band gains low to high
    fn apply_eq(&mut self, eq: &EqGainSet) -> Result<(), DeviceError>;
}

/// Line-oriented protocol encoder over any writer
#[derive(Debug)]
pub struct LineDevice<W: Write> {
    writer: W,
}

impl<W: Write> LineDevice<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn send(&mut self, cmd: &str) -> Result<(), DeviceError> {
        self.writer.write_all(cmd.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        tracing::debug!(command = cmd, "Sent device command");
        Ok(())
    }
}

impl<W: Write + Send> ToneSink for LineDevice<W> {
    fn set_test_mode(&mut self, on: bool) -> Result<(), DeviceError> {
        self.send(if on { "TEST ON" } else { "TEST OFF" })
    }

    fn set_freq(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.send(&format!("FREQ {}", hz))
    }

    fn set_level_db(&mut self, db: f64) -> Result<(), DeviceError> {
        self.send(&format!("LEVEL {:.1}", db))
    }

    fn apply_eq(&mut self, eq: &EqGainSet) -> Result<(), DeviceError> {
        self.send(&format!("GAIN {:.3}", eq.gain_global))?;
        self.send(&format!("EQ500 {:.1}", eq.low_db))?;
        self.send(&format!("EQ2000 {:.1}", eq.mid_db))?;
        self.send(&format!("EQ4000 {:.1}", eq.high_db))
    }
}

/// Clonable handle over an optional connected device.
///
/// The foreground owns connect/disconnect; a clone travels into the
/// session worker. Commands issued while no device is connected fail
/// with [`DeviceError::NotConnected`].
#[derive(Debug)]
pub struct SharedDevice<D> {
    inner: Arc<Mutex<Option<D>>>,
}

impl<D> Clone for SharedDevice<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: ToneSink> SharedDevice<D> {
    pub fn disconnected() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a device, replacing any previous one
    pub fn connect(&self, device: D) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(device);
        }
    }

    /// Drop the connected device, if any
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn with<R>(
        &self,
        f: impl FnOnce(&mut D) -> Result<R, DeviceError>,
    ) -> Result<R, DeviceError> {
        // A poisoned lock means the holder died mid-command; treat the
        // device as gone.
        let mut guard = self.inner.lock().map_err(|_| DeviceError::NotConnected)?;
        match guard.as_mut() {
            Some(device) => f(device),
            None => Err(DeviceError::NotConnected),
        }
    }
}

impl<D: ToneSink + Send> ToneSink for SharedDevice<D> {
    fn set_test_mode(&mut self, on: bool) -> Result<(), DeviceError> {
        self.with(|d| d.set_test_mode(on))
    }

    fn set_freq(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.with(|d| d.set_freq(hz))
    }

    fn set_level_db(&mut self, db: f64) -> Result<(), DeviceError> {
        self.with(|d| d.set_level_db(db))
    }

    fn apply_eq(&mut self, eq: &EqGainSet) -> Result<(), DeviceError> {
        self.with(|d| d.apply_eq(eq))
    }
}
