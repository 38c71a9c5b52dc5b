//! MFRC522 driver over a bit-banged SPI bus, with the ISO14443-3A
//! initiator flow and NDEF Text extraction built on top.
//!
//! The chip hangs off plain GPIOs ([`interface::SoftSpi`]); everything
//! above the [`interface::Interface`] trait is transport-agnostic and
//! tested on the host against a simulated chip.

#![no_std]

#[macro_use]
mod fmt;

pub mod commands;
pub mod interface;
pub mod iso14443a;
pub mod ndef;
pub mod registers;

#[cfg(test)]
pub(crate) mod mock;

pub use interface::{Interface, SoftSpi};
pub use iso14443a::{AtqA, FrameInfo, Uid};
pub use ndef::TEXT_CAP;

use embedded_hal::delay::DelayNs;

use commands::Command;
use registers::{addr, Coll, Register, TxControl};

/// Reply deadline for one RF exchange
pub type FrameTimeout = fugit::MillisDurationU32;

/// Deadline that suits every frame this crate sends
pub const DEFAULT_FRAME_TIMEOUT: FrameTimeout = FrameTimeout::from_ticks(100);

/// Errors of the driver and the protocol layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error<E> {
    /// Transport failure, wraps the pin error
    Interface(E),
    /// The tag did not answer in time
    Timeout,
    /// More than one tag answered at once
    Collision,
    /// The tag answered with a malformed or inconsistent frame
    Protocol,
    /// The caller's receive buffer cannot hold the reply
    BufferTooSmall,
    /// Rejected before any bus traffic
    InvalidInput,
}

pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Cumulative counters across scan attempts
///
/// Retries are counted by the application through
/// [`Mfrc522::record_retry`]; everything else is counted internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ScanStats {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub retries: u32,
    pub collisions: u32,
    pub timeouts: u32,
    pub crc_errors: u32,
}

impl ScanStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of one successful scan
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ScanReport {
    pub uid: Uid,
    /// Decoded Text record, when the tag carries one
    pub text: Option<heapless::String<TEXT_CAP>>,
}

// Receiver tuning for this antenna; found experimentally, the
// datasheet defaults miss weak tags.
const RX_GAIN_48DB: u8 = 0x70;
const RX_THRESHOLD_TUNED: u8 = 0x84;
const MOD_CONDUCTANCE_TUNED: u8 = 0x3F;
/// Force 100% ASK modulation
const TX_ASK_FORCE_100: u8 = 0x40;
/// TX/RX CRC preset 0x6363, polarity defaults
const MODE_CRC_PRESET: u8 = 0x3D;
/// Timer ticks at 13.56 MHz / (2*0xA9+1), about 40 kHz
const TIMER_PRESCALER_LO: u8 = 0xA9;
/// 0x03E8 ticks, a 25 ms guard interval per exchange
const TIMER_RELOAD: u16 = 0x03E8;

const RESET_SETTLE_MS: u32 = 100;
const CONFIG_SETTLE_MS: u32 = 10;

/// MFRC522 driver
pub struct Mfrc522<I, D> {
    pub(crate) iface: I,
    pub(crate) delay: D,
    pub(crate) stats: ScanStats,
    field_on: bool,
    initialized: bool,
}

impl<I: Interface, D: DelayNs> Mfrc522<I, D> {
    pub fn new(iface: I, delay: D) -> Self {
        Self {
            iface,
            delay,
            stats: ScanStats::default(),
            field_on: false,
            initialized: false,
        }
    }

    /// Releases the transport and delay
    pub fn free(self) -> (I, D) {
        (self.iface, self.delay)
    }

    /// Resets and configures the chip
    ///
    /// Safe to call again; an initialized driver returns immediately.
    /// The RF field is left off, [`Self::scan`] raises it per attempt.
    pub fn init(&mut self) -> Result<(), I::Error> {
        if self.initialized {
            return Ok(());
        }

        self.command(Command::SoftReset)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        // timer idle at rest, armed per exchange
        self.write_reg(addr::T_MODE, 0x00)?;
        self.write_reg(addr::T_PRESCALER, TIMER_PRESCALER_LO)?;
        self.write_reg(addr::T_RELOAD_H, (TIMER_RELOAD >> 8) as u8)?;
        self.write_reg(addr::T_RELOAD_L, TIMER_RELOAD as u8)?;

        self.write_reg(addr::TX_ASK, TX_ASK_FORCE_100)?;
        self.write_reg(addr::MODE, MODE_CRC_PRESET)?;
        self.write_reg(addr::RF_CFG, RX_GAIN_48DB)?;
        self.write_reg(addr::RX_THRESHOLD, RX_THRESHOLD_TUNED)?;
        self.write_reg(addr::MOD_GS_P, MOD_CONDUCTANCE_TUNED)?;
        self.write_reg(addr::BIT_FRAMING, 0x00)?;

        let mut coll = Coll::default();
        coll.set_values_after_coll(true);
        coll.write(&mut self.iface).map_err(Error::Interface)?;

        self.delay.delay_ms(CONFIG_SETTLE_MS);

        let version = self.version()?;
        info!("chip version {=u8:#04x}", version);

        // read back the registers that matter most; a mismatch usually
        // means the bus is miswired, not that the chip is broken
        let coll = Coll::read(&mut self.iface).map_err(Error::Interface)?;
        if !coll.values_after_coll() {
            warning!("CollReg readback mismatch, check the bus wiring");
        }
        let rf_cfg = self
            .iface
            .register_read(addr::RF_CFG)
            .map_err(Error::Interface)?;
        if rf_cfg != RX_GAIN_48DB {
            warning!("RFCfgReg readback {=u8:#04x}, expected {=u8:#04x}", rf_cfg, RX_GAIN_48DB);
        }

        self.initialized = true;
        Ok(())
    }

    /// Chip silicon version, 0x91/0x92 on genuine parts
    pub fn version(&mut self) -> Result<u8, I::Error> {
        self.iface
            .register_read(addr::VERSION)
            .map_err(Error::Interface)
    }

    pub(crate) fn command(&mut self, cmd: Command) -> Result<(), I::Error> {
        self.write_reg(addr::COMMAND, cmd as u8)
    }

    fn write_reg(&mut self, addr: u8, value: u8) -> Result<(), I::Error> {
        self.iface
            .register_write(addr, value)
            .map_err(Error::Interface)
    }

    /// Raises the 13.56 MHz carrier on both antenna drivers
    pub fn enable_field(&mut self) -> Result<(), I::Error> {
        if self.field_on {
            return Ok(());
        }
        TxControl::modify(&mut self.iface, |r| {
            r.set_tx1_rf_en(true);
            r.set_tx2_rf_en(true);
        })
        .map_err(Error::Interface)?;
        self.field_on = true;
        Ok(())
    }

    pub fn disable_field(&mut self) -> Result<(), I::Error> {
        if !self.field_on {
            return Ok(());
        }
        TxControl::modify(&mut self.iface, |r| {
            r.set_tx1_rf_en(false);
            r.set_tx2_rf_en(false);
        })
        .map_err(Error::Interface)?;
        self.field_on = false;
        Ok(())
    }

    /// One complete scan attempt: field up, REQA, select, content
    /// read, halt, field down
    ///
    /// `Ok(None)` means no tag was in range. Content problems never
    /// fail the scan: a selected tag without a readable Text record
    /// still reports its UID. The field and the data-out line are
    /// quiet again on every exit path.
    pub fn scan(&mut self, timeout: FrameTimeout) -> Result<Option<ScanReport>, I::Error> {
        if !self.initialized {
            return Err(Error::InvalidInput);
        }
        self.stats.attempts += 1;
        self.enable_field()?;

        let atqa = match self.request_a(timeout) {
            Ok(atqa) => atqa,
            Err(Error::Timeout) => {
                self.stats.failures += 1;
                self.settle_idle()?;
                return Ok(None);
            }
            Err(e) => {
                self.stats.failures += 1;
                let _ = self.settle_idle();
                return Err(e);
            }
        };
        trace!("ATQA {=u8:#04x} {=u8:#04x}", atqa.bytes[0], atqa.bytes[1]);

        let uid = match self.select(timeout) {
            Ok(uid) => uid,
            Err(e) => {
                self.stats.failures += 1;
                let _ = self.settle_idle();
                return Err(e);
            }
        };
        self.stats.successes += 1;
        info!("selected tag {}", uid);

        let text = match self.extract_text(&uid, timeout) {
            Ok(text) => text,
            Err(_) => {
                debug!("content read failed, reporting the UID alone");
                None
            }
        };

        // best effort; a tag yanked out of the field cannot be halted
        let _ = self.halt_a(timeout);
        self.settle_idle()?;

        Ok(Some(ScanReport { uid, text }))
    }

    /// Field down and data-out line quiet between attempts
    fn settle_idle(&mut self) -> Result<(), I::Error> {
        self.disable_field()?;
        self.iface.quiesce().map_err(Error::Interface)
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Lets the application count a retry it decided on
    pub fn record_retry(&mut self) {
        self.stats.retries += 1;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::mock::{crc_a, Exchange, MockChip, NoopDelay, Reply};
    use std::vec;
    use std::vec::Vec;

    const TIMEOUT: FrameTimeout = DEFAULT_FRAME_TIMEOUT;

    fn driver(script: Vec<Exchange>) -> Mfrc522<MockChip, NoopDelay> {
        let mut drv = Mfrc522::new(MockChip::new(script), NoopDelay);
        drv.init().unwrap();
        drv
    }

    fn reqa(atqa: [u8; 2]) -> Exchange {
        Exchange::new(vec![0x26], 7, Reply::frame(&atqa))
    }

    fn anticollision(uid_part: [u8; 4]) -> Exchange {
        let bcc = uid_part.iter().fold(0, |acc, b| acc ^ b);
        let mut reply = uid_part.to_vec();
        reply.push(bcc);
        Exchange::new(vec![0x93, 0x20], 0, Reply::frame(&reply))
    }

    fn select(uid_part: [u8; 4], sak: u8) -> Exchange {
        let bcc = uid_part.iter().fold(0, |acc, b| acc ^ b);
        let mut tx = vec![0x93, 0x70];
        tx.extend_from_slice(&uid_part);
        tx.push(bcc);
        tx.extend_from_slice(&crc_a(&tx.clone()));
        let mut reply = vec![sak];
        reply.extend_from_slice(&crc_a(&[sak]));
        Exchange::new(tx, 0, Reply::frame(&reply))
    }

    fn page_read(page: u8, window: &[u8; 16]) -> Exchange {
        let mut tx = vec![0x30, page];
        tx.extend_from_slice(&crc_a(&tx.clone()));
        let mut reply = window.to_vec();
        reply.extend_from_slice(&crc_a(window));
        Exchange::new(tx, 0, Reply::frame(&reply))
    }

    fn halt() -> Exchange {
        let mut tx = vec![0x50, 0x00];
        tx.extend_from_slice(&crc_a(&[0x50, 0x00]));
        Exchange::new(tx, 0, Reply::Timeout)
    }

    fn hello_windows() -> ([u8; 16], [u8; 16]) {
        let first = [
            0xE1, 0x10, 0x12, 0x00, 0x03, 0x0C, 0xD1, 0x01, 0x08, 0x54, 0x02, 0x65, 0x6E, 0x48,
            0x45, 0x4C,
        ];
        let mut second = [0u8; 16];
        second[..3].copy_from_slice(&[0x4C, 0x4F, 0xFE]);
        (first, second)
    }

    fn full_scan_script() -> Vec<Exchange> {
        let (first, second) = hello_windows();
        vec![
            reqa([0x44, 0x00]),
            anticollision([0x04, 0x8A, 0x3C, 0x77]),
            select([0x04, 0x8A, 0x3C, 0x77], 0x00),
            page_read(3, &first),
            page_read(7, &second),
            halt(),
        ]
    }

    #[test]
    fn scan_reports_uid_and_text() {
        let mut drv = driver(full_scan_script());
        let report = drv.scan(TIMEOUT).unwrap().unwrap();
        assert_eq!(report.uid.hex().as_str(), "048A3C77");
        assert_eq!(report.text.unwrap().as_str(), "HELLO");
        assert!(drv.iface.script_done());
        assert_eq!(drv.stats().attempts, 1);
        assert_eq!(drv.stats().successes, 1);
        assert_eq!(drv.stats().failures, 0);
        // field down and data line quiet after the attempt
        assert_eq!(drv.iface.reg(addr::TX_CONTROL) & 0x03, 0);
        assert!(drv.iface.quiesce_count >= 1);
    }

    #[test]
    fn scan_twice_after_halt_timeout() {
        let mut script = full_scan_script();
        script.extend(full_scan_script());
        let mut drv = driver(script);
        assert!(drv.scan(TIMEOUT).unwrap().is_some());
        assert!(drv.scan(TIMEOUT).unwrap().is_some());
        assert!(drv.iface.script_done());
        assert_eq!(drv.stats().successes, 2);
    }

    #[test]
    fn empty_field_scans_to_none() {
        let mut drv = driver(vec![Exchange::new(vec![0x26], 7, Reply::Timeout)]);
        assert!(drv.scan(TIMEOUT).unwrap().is_none());
        assert_eq!(drv.stats().attempts, 1);
        assert_eq!(drv.stats().failures, 1);
        assert_eq!(drv.stats().timeouts, 1);
        assert_eq!(drv.iface.reg(addr::TX_CONTROL) & 0x03, 0);
    }

    #[test]
    fn scan_without_init_is_rejected() {
        let mut drv = Mfrc522::new(MockChip::new(vec![]), NoopDelay);
        assert_eq!(drv.scan(TIMEOUT).unwrap_err(), Error::InvalidInput);
        assert_eq!(drv.stats().attempts, 0);
    }

    #[test]
    fn init_twice_is_a_no_op() {
        let mut drv = driver(vec![]);
        // a rerun of the config sequence would overwrite the sentinel
        drv.iface.register_write(addr::RX_THRESHOLD, 0x55).unwrap();
        drv.init().unwrap();
        assert_eq!(drv.iface.reg(addr::RX_THRESHOLD), 0x55);
    }

    #[test]
    fn collision_propagates_and_field_drops() {
        let mut drv = driver(vec![
            reqa([0x44, 0x00]),
            Exchange::new(vec![0x93, 0x20], 0, Reply::Collision),
        ]);
        assert_eq!(drv.scan(TIMEOUT).unwrap_err(), Error::Collision);
        assert_eq!(drv.stats().failures, 1);
        assert_eq!(drv.stats().collisions, 1);
        assert_eq!(drv.iface.reg(addr::TX_CONTROL) & 0x03, 0);
    }

    #[test]
    fn content_read_failure_still_reports_the_uid() {
        let mut read_tx = vec![0x30, 3u8];
        read_tx.extend_from_slice(&crc_a(&read_tx.clone()));
        let bad_read = Exchange::new(read_tx, 0, Reply::Timeout);
        let mut drv = driver(vec![
            reqa([0x44, 0x00]),
            anticollision([0x04, 0x8A, 0x3C, 0x77]),
            select([0x04, 0x8A, 0x3C, 0x77], 0x00),
            bad_read,
            halt(),
        ]);
        let report = drv.scan(TIMEOUT).unwrap().unwrap();
        assert_eq!(report.uid.hex().as_str(), "048A3C77");
        assert!(report.text.is_none());
        assert_eq!(drv.stats().successes, 1);
    }

    #[test]
    fn stats_reset_clears_all_counters() {
        let mut drv = driver(vec![Exchange::new(vec![0x26], 7, Reply::Timeout)]);
        assert!(drv.scan(TIMEOUT).unwrap().is_none());
        drv.record_retry();
        assert_ne!(*drv.stats(), ScanStats::default());
        drv.reset_stats();
        assert_eq!(*drv.stats(), ScanStats::default());
    }

    #[test]
    fn version_reads_the_silicon_revision() {
        let mut drv = driver(vec![]);
        assert_eq!(drv.version().unwrap(), 0x92);
    }

    #[test]
    fn field_control_is_idempotent() {
        let mut drv = driver(vec![]);
        drv.enable_field().unwrap();
        drv.enable_field().unwrap();
        assert_eq!(drv.iface.reg(addr::TX_CONTROL) & 0x03, 0x03);
        drv.disable_field().unwrap();
        drv.disable_field().unwrap();
        assert_eq!(drv.iface.reg(addr::TX_CONTROL) & 0x03, 0);
    }
}
