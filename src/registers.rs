use bilge::prelude::*;

use crate::interface::Interface;

/// Datasheet register addresses (section 9.2), unshifted
///
/// The wire framing in [`crate::interface`] shifts these into the
/// address byte.
pub mod addr {
    pub const COMMAND: u8 = 0x01;
    pub const COM_IRQ: u8 = 0x04;
    pub const DIV_IRQ: u8 = 0x05;
    pub const ERROR: u8 = 0x06;
    pub const FIFO_DATA: u8 = 0x09;
    pub const FIFO_LEVEL: u8 = 0x0A;
    pub const CONTROL: u8 = 0x0C;
    pub const BIT_FRAMING: u8 = 0x0D;
    pub const COLL: u8 = 0x0E;
    pub const MODE: u8 = 0x11;
    pub const TX_CONTROL: u8 = 0x14;
    pub const TX_ASK: u8 = 0x15;
    pub const RX_THRESHOLD: u8 = 0x18;
    pub const CRC_RESULT_H: u8 = 0x21;
    pub const CRC_RESULT_L: u8 = 0x22;
    pub const RF_CFG: u8 = 0x26;
    pub const MOD_GS_P: u8 = 0x29;
    pub const T_MODE: u8 = 0x2A;
    pub const T_PRESCALER: u8 = 0x2B;
    pub const T_RELOAD_H: u8 = 0x2C;
    pub const T_RELOAD_L: u8 = 0x2D;
    pub const VERSION: u8 = 0x37;
}

pub trait Register: Copy + PartialEq + From<u8> + Into<u8> {
    const ADDRESS: u8;

    fn read<I: Interface>(iface: &mut I) -> Result<Self, I::Error> {
        iface.register_read(Self::ADDRESS).map(Self::from)
    }
    fn write<I: Interface>(self, iface: &mut I) -> Result<(), I::Error> {
        iface.register_write(Self::ADDRESS, self.into())
    }
    fn modify<I: Interface>(iface: &mut I, mut f: impl FnMut(&mut Self)) -> Result<(), I::Error> {
        let mut reg = Self::read(iface)?;
        let copy = reg;
        f(&mut reg);
        if reg != copy {
            reg.write(iface)
        } else {
            Ok(())
        }
    }
}

macro_rules! register_impl {
    ($type:ty, $addr:expr) => {
        impl Register for $type {
            const ADDRESS: u8 = $addr;
        }
    };
}

register_impl!(ComIrq, addr::COM_IRQ);
/// Communication interrupt request bits
///
/// Writing with `set1` clear clears the marked bits.
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComIrq {
    /// The internal timer ran down to zero
    pub timer_irq: bool,
    /// Any bit in the error register is set
    pub err_irq: bool,
    pub lo_alert_irq: bool,
    pub hi_alert_irq: bool,
    /// A running command terminated on its own
    pub idle_irq: bool,
    /// End of a received data stream
    pub rx_irq: bool,
    /// End of a transmitted data stream
    pub tx_irq: bool,
    pub set1: bool,
}

register_impl!(DivIrq, addr::DIV_IRQ);
/// Diverse interrupt request bits
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct DivIrq {
    reserved: u2,
    /// The CRC coprocessor finished and the result is ready
    pub crc_irq: bool,
    reserved: u1,
    pub mfin_act_irq: bool,
    reserved: u2,
    pub set2: bool,
}

register_impl!(ErrorFlags, addr::ERROR);
/// Error bits of the last command
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorFlags {
    /// SOF incorrect or wrong number of anticollision bits
    pub protocol_err: bool,
    pub parity_err: bool,
    /// RX CRC check failed (CRC-enabled receive modes only)
    pub crc_err: bool,
    /// A bit collision was detected
    pub coll_err: bool,
    /// Host wrote to a full FIFO or the tag overran it
    pub buffer_ovfl: bool,
    reserved: u1,
    pub temp_err: bool,
    pub wr_err: bool,
}

register_impl!(FifoLevel, addr::FIFO_LEVEL);
/// Number of bytes stored in the FIFO
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoLevel {
    pub level: u7,
    /// Immediately clears the FIFO and this register
    pub flush_buffer: bool,
}

register_impl!(Control, addr::CONTROL);
/// Miscellaneous control bits
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct Control {
    /// Valid bits in the last received byte; 0 means the whole byte
    /// is valid
    pub rx_last_bits: u3,
    reserved: u3,
    pub t_start_now: bool,
    pub t_stop_now: bool,
}

register_impl!(BitFraming, addr::BIT_FRAMING);
/// Bit-oriented frame adjustments
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitFraming {
    /// Bits of the last TX byte to transmit; 0 means all eight
    pub tx_last_bits: u3,
    reserved: u1,
    /// Bit position for the first received bit
    pub rx_align: u3,
    /// Starts the transmission of a Transceive command
    pub start_send: bool,
}

register_impl!(Coll, addr::COLL);
/// First bit-collision position
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coll {
    pub coll_pos: u5,
    pub coll_pos_not_valid: bool,
    reserved: u1,
    /// Clear received bits after a collision
    ///
    /// Must be set before anticollision or genuine collisions corrupt
    /// the UID bytes.
    pub values_after_coll: bool,
}

register_impl!(TxControl, addr::TX_CONTROL);
/// Antenna driver control
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxControl {
    /// TX1 delivers the 13.56 MHz carrier
    pub tx1_rf_en: bool,
    /// TX2 delivers the 13.56 MHz carrier
    pub tx2_rf_en: bool,
    reserved: u1,
    /// TX2 outputs a continuous, unmodulated carrier
    pub tx2_cw: bool,
    pub inv_tx1_rf_off: bool,
    pub inv_tx2_rf_off: bool,
    pub inv_tx1_rf_on: bool,
    pub inv_tx2_rf_on: bool,
}

register_impl!(TMode, addr::T_MODE);
/// Timer mode
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct TMode {
    pub t_prescaler_hi: u4,
    pub t_auto_restart: bool,
    pub t_gated: u2,
    /// Timer starts automatically at the end of a transmission
    pub t_auto: bool,
}
