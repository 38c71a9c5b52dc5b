//! ISO14443-3A initiator: transceive engine, CRC coprocessor client and
//! the request/anticollision/select/halt state machine.

use bilge::prelude::*;
use embedded_hal::delay::DelayNs;

use crate::{
    commands::{picc, Command},
    interface::Interface,
    registers::{
        addr, BitFraming, Coll, ComIrq, Control, DivIrq, ErrorFlags, FifoLevel, Register, TMode,
    },
    Error, FrameTimeout, Mfrc522, Result,
};

/// Chip FIFO capacity in bytes
pub const FIFO_CAPACITY: usize = 64;

/// Valid bits in a REQA/WUPA short frame, per the short-frame rule
pub const SHORT_FRAME_BITS: u8 = 7;

/// CRC coprocessor poll budget: 5000 polls of 10 us each, roughly a
/// 50 ms ceiling
const CRC_POLL_BUDGET: u32 = 5000;
const CRC_POLL_STEP_US: u32 = 10;

/// Transceive completion poll step; the delay is also the yield point
/// for cooperative schedulers
const POLL_STEP_US: u32 = 100;

/// Settle time after touching the collision register
const COLL_SETTLE_US: u32 = 100;

/// Longest possible UID, reached after three cascade levels
pub const UID_MAX_LEN: usize = 10;
/// Hex characters needed for the longest UID
pub const UID_HEX_CAP: usize = UID_MAX_LEN * 2;

/// Answer To reQuest A
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct AtqA {
    pub bytes: [u8; 2],
}

/// Completed tag UID plus its Select-Acknowledge byte
///
/// Only the select state machine constructs these; a `Uid` in caller
/// hands always has a length of 4, 7 or 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Uid {
    bytes: [u8; UID_MAX_LEN],
    len: u8,
    sak: u8,
}

impl Uid {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn sak(&self) -> u8 {
        self.sak
    }

    /// Upper-case hex rendering, 8/14/20 characters
    pub fn hex(&self) -> heapless::String<UID_HEX_CAP> {
        const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
        let mut out = heapless::String::new();
        for &b in self.bytes() {
            // capacity is fixed at twice the longest UID
            let _ = out.push(DIGITS[(b >> 4) as usize] as char);
            let _ = out.push(DIGITS[(b & 0x0F) as usize] as char);
        }
        out
    }
}

/// Shape of a successfully received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct FrameInfo {
    /// Bytes written to the caller's buffer
    pub len: usize,
    /// Valid bits in the last byte; 0 means byte-aligned
    pub valid_bits: u8,
}

#[cfg(test)]
impl Uid {
    /// Bypasses the select state machine for tests of the layers above
    pub(crate) fn for_tests(bytes: &[u8], sak: u8) -> Self {
        let mut buf = [0u8; UID_MAX_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            bytes: buf,
            len: bytes.len() as u8,
            sak,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CascadeLevel {
    One,
    Two,
    Three,
}

impl CascadeLevel {
    const ALL: [Self; 3] = [Self::One, Self::Two, Self::Three];

    fn command(self) -> u8 {
        match self {
            Self::One => picc::SEL_CL1,
            Self::Two => picc::SEL_CL2,
            Self::Three => picc::SEL_CL3,
        }
    }

    fn is_last(self) -> bool {
        self == Self::Three
    }
}

impl<I: Interface, D: DelayNs> Mfrc522<I, D> {
    /// Runs the chip's CRC16 coprocessor over `data`
    ///
    /// Returns the checksum low byte first, the order frames carry it.
    /// Fails with [`Error::Timeout`] if the coprocessor never signals
    /// readiness within the poll ceiling.
    pub fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2], I::Error> {
        self.command(Command::Idle)?;

        let mut clear = DivIrq::default();
        clear.set_crc_irq(true);
        clear.write(&mut self.iface).map_err(Error::Interface)?;

        self.flush_fifo()?;
        self.iface
            .register_write_many(addr::FIFO_DATA, data)
            .map_err(Error::Interface)?;
        self.command(Command::CalcCrc)?;

        for _ in 0..CRC_POLL_BUDGET {
            let irq = DivIrq::read(&mut self.iface).map_err(Error::Interface)?;
            if irq.crc_irq() {
                self.command(Command::Idle)?;
                let lo = self
                    .iface
                    .register_read(addr::CRC_RESULT_L)
                    .map_err(Error::Interface)?;
                let hi = self
                    .iface
                    .register_read(addr::CRC_RESULT_H)
                    .map_err(Error::Interface)?;
                return Ok([lo, hi]);
            }
            self.delay.delay_us(CRC_POLL_STEP_US);
        }

        Err(Error::Timeout)
    }

    /// Sends a frame and collects the reply
    ///
    /// The chip's internal timer is armed only for the duration of this
    /// call and cleared again on every exit path; left running it is a
    /// secondary noise source on this board.
    ///
    /// A collision is an expected condition during anticollision: the
    /// error bit is cleared, bit framing reset and the FIFO flushed
    /// before [`Error::Collision`] is returned, so the next attempt
    /// starts clean.
    pub fn transceive(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        rx_align: u8,
        tx_last_bits: u8,
        check_crc: bool,
        timeout: FrameTimeout,
    ) -> Result<FrameInfo, I::Error> {
        if tx.is_empty() || tx.len() > FIFO_CAPACITY {
            return Err(Error::InvalidInput);
        }
        if rx_align > 7 || tx_last_bits > 7 {
            return Err(Error::InvalidInput);
        }

        // arm the timer for this exchange only
        let mut timer = TMode::default();
        timer.set_t_auto(true);
        timer.write(&mut self.iface).map_err(Error::Interface)?;

        self.command(Command::Idle)?;
        // clear all interrupt request bits (set1 = 0)
        ComIrq::from(0x7F)
            .write(&mut self.iface)
            .map_err(Error::Interface)?;
        self.flush_fifo()?;
        self.iface
            .register_write_many(addr::FIFO_DATA, tx)
            .map_err(Error::Interface)?;

        let mut framing = BitFraming::default();
        framing.set_rx_align(u3::new(rx_align));
        framing.set_tx_last_bits(u3::new(tx_last_bits));
        framing.write(&mut self.iface).map_err(Error::Interface)?;

        self.command(Command::Transceive)?;
        self.iface
            .set_bitmask(addr::BIT_FRAMING, 0x80)
            .map_err(Error::Interface)?;

        let mut budget = timeout.to_micros() / POLL_STEP_US;
        let completed = loop {
            let irq = ComIrq::read(&mut self.iface).map_err(Error::Interface)?;
            if irq.rx_irq() || irq.idle_irq() {
                break true;
            }
            if irq.timer_irq() {
                break false;
            }
            if budget == 0 {
                break false;
            }
            budget -= 1;
            // bounded wait; this is where cooperative peers get to run
            self.delay.delay_us(POLL_STEP_US);
        };

        self.iface
            .clear_bitmask(addr::BIT_FRAMING, 0x80)
            .map_err(Error::Interface)?;

        if !completed {
            self.stats.timeouts += 1;
            self.timer_off()?;
            return Err(Error::Timeout);
        }

        let errors = ErrorFlags::read(&mut self.iface).map_err(Error::Interface)?;
        if errors.coll_err() {
            let mut clear = ErrorFlags::default();
            clear.set_coll_err(true);
            clear.write(&mut self.iface).map_err(Error::Interface)?;
            BitFraming::default()
                .write(&mut self.iface)
                .map_err(Error::Interface)?;
            self.iface
                .set_bitmask(addr::FIFO_LEVEL, 0x80)
                .map_err(Error::Interface)?;
            self.stats.collisions += 1;
            self.timer_off()?;
            return Err(Error::Collision);
        }
        if errors.buffer_ovfl() || errors.parity_err() || errors.protocol_err() {
            debug!("transceive error flags {=u8:#04x}", u8::from(errors));
            self.timer_off()?;
            return Err(Error::Protocol);
        }

        let level = FifoLevel::read(&mut self.iface).map_err(Error::Interface)?;
        let n = level.level().value() as usize;
        if n > rx.len() {
            self.timer_off()?;
            return Err(Error::BufferTooSmall);
        }
        self.iface
            .register_read_many(addr::FIFO_DATA, &mut rx[..n])
            .map_err(Error::Interface)?;
        let valid_bits = Control::read(&mut self.iface)
            .map_err(Error::Interface)?
            .rx_last_bits()
            .value();

        // the exchange is over once the FIFO is drained; disarm before
        // the CRC verification so its failures cannot leave the timer on
        self.timer_off()?;

        if check_crc {
            if n < 3 || valid_bits != 0 {
                return Err(Error::Protocol);
            }
            let crc = self.calculate_crc(&rx[..n - 2])?;
            if rx[n - 2..n] != crc {
                self.stats.crc_errors += 1;
                return Err(Error::Protocol);
            }
        }

        Ok(FrameInfo { len: n, valid_bits })
    }

    /// Sends a 1-byte short frame (REQA/WUPA class)
    ///
    /// The short-frame rule demands exactly 7 valid bits; anything else
    /// is rejected before any bus traffic happens.
    pub fn transceive_short_frame(
        &mut self,
        frame: u8,
        tx_last_bits: u8,
        rx: &mut [u8],
        timeout: FrameTimeout,
    ) -> Result<FrameInfo, I::Error> {
        if tx_last_bits != SHORT_FRAME_BITS {
            return Err(Error::InvalidInput);
        }
        self.transceive(&[frame], rx, 0, SHORT_FRAME_BITS, false, timeout)
    }

    /// REQA: probes for a tag in the field
    ///
    /// [`Error::Timeout`] here simply means no tag is present.
    pub fn request_a(&mut self, timeout: FrameTimeout) -> Result<AtqA, I::Error> {
        self.prepare_anticollision()?;

        let mut rx = [0u8; 2];
        let info = self.transceive_short_frame(picc::REQA, SHORT_FRAME_BITS, &mut rx, timeout)?;
        // ATQA is always 2 byte-aligned bytes
        if info.len != 2 || info.valid_bits != 0 {
            return Err(Error::Protocol);
        }
        Ok(AtqA { bytes: rx })
    }

    /// Runs the cascaded anticollision/select loop until the UID is
    /// complete
    ///
    /// Each level receives 4 UID bytes plus a BCC that must equal their
    /// XOR; the level is then confirmed with a select frame. A leading
    /// cascade tag (0x88) means the level contributes only 3 bytes and
    /// the SAK must announce a continuation; needing more than three
    /// levels is a protocol violation of the tag.
    pub fn select(&mut self, timeout: FrameTimeout) -> Result<Uid, I::Error> {
        self.prepare_anticollision()?;

        let mut uid = [0u8; UID_MAX_LEN];
        let mut len = 0usize;

        for level in CascadeLevel::ALL {
            let cmd = level.command();

            // step 1: anticollision, ask for all 40 bits of this level
            let tx = [cmd, picc::NVB_ANTICOLLISION];
            let mut resp = [0u8; 5];
            let info = self.transceive(&tx, &mut resp, 0, 0, false, timeout)?;
            if info.len != 5 || info.valid_bits != 0 {
                debug!(
                    "anticollision reply malformed: {=usize} bytes, {=u8} bits",
                    info.len,
                    info.valid_bits
                );
                return Err(Error::Protocol);
            }

            let bcc = resp[0] ^ resp[1] ^ resp[2] ^ resp[3];
            if bcc != resp[4] {
                self.stats.crc_errors += 1;
                debug!("BCC mismatch: computed {=u8:#04x}, got {=u8:#04x}", bcc, resp[4]);
                return Err(Error::Protocol);
            }

            // step 2: confirm the level with a full select frame
            let mut frame = [0u8; 9];
            frame[0] = cmd;
            frame[1] = picc::NVB_SELECT;
            frame[2..6].copy_from_slice(&resp[..4]);
            frame[6] = bcc;
            let crc = self.calculate_crc(&frame[..7])?;
            frame[7..9].copy_from_slice(&crc);

            let mut sak_buf = [0u8; 3];
            let info = self.transceive(&frame, &mut sak_buf, 0, 0, false, timeout)?;
            if info.len < 1 || info.valid_bits != 0 {
                return Err(Error::Protocol);
            }
            let sak = sak_buf[0];

            let cascaded = resp[0] == picc::CT;
            let continuing = sak & picc::SAK_CASCADE != 0;
            // the cascade tag and the SAK continuation bit must agree,
            // otherwise the final UID length cannot be 4/7/10
            if cascaded != continuing {
                return Err(Error::Protocol);
            }

            if cascaded {
                // sentinel discarded, level contributes 3 bytes
                uid[len..len + 3].copy_from_slice(&resp[1..4]);
                len += 3;
                if level.is_last() {
                    // a fourth level does not exist
                    warning!("tag requested a cascade level beyond 3");
                    return Err(Error::Protocol);
                }
            } else {
                uid[len..len + 4].copy_from_slice(&resp[..4]);
                len += 4;
                debug!("select complete, {=usize}-byte UID, SAK {=u8:#04x}", len, sak);
                return Ok(Uid {
                    bytes: uid,
                    len: len as u8,
                    sak,
                });
            }
        }

        // CascadeLevel::Three always returns above
        Err(Error::Protocol)
    }

    /// HLTA: puts the selected tag to sleep until it leaves the field
    ///
    /// A halted tag deliberately does not acknowledge, so a reply
    /// timeout is the expected success case here.
    pub fn halt_a(&mut self, timeout: FrameTimeout) -> Result<(), I::Error> {
        let mut frame = [picc::HLTA, 0x00, 0, 0];
        let crc = self.calculate_crc(&frame[..2])?;
        frame[2..].copy_from_slice(&crc);

        let mut rx = [0u8; 1];
        match self.transceive(&frame, &mut rx, 0, 0, false, timeout) {
            Err(Error::Timeout) => Ok(()),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sets ValuesAfterColl and lets the register settle
    fn prepare_anticollision(&mut self) -> Result<(), I::Error> {
        Coll::modify(&mut self.iface, |r| r.set_values_after_coll(true))
            .map_err(Error::Interface)?;
        self.delay.delay_us(COLL_SETTLE_US);
        Ok(())
    }

    fn flush_fifo(&mut self) -> Result<(), I::Error> {
        let mut level = FifoLevel::default();
        level.set_flush_buffer(true);
        level.write(&mut self.iface).map_err(Error::Interface)
    }

    fn timer_off(&mut self) -> Result<(), I::Error> {
        TMode::default()
            .write(&mut self.iface)
            .map_err(Error::Interface)
    }
}
