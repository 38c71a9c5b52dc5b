//! Scripted chip simulator for host-side tests
//!
//! Models just enough of the register file to satisfy the protocol
//! layers: a FIFO, the interrupt flags, the CRC coprocessor and a
//! script of expected RF exchanges consumed in order.

extern crate std;

use std::collections::VecDeque;
use std::vec::Vec;

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;

use crate::commands::Command;
use crate::interface::Interface;
use crate::registers::addr;

/// ISO14443-A CRC16, what the chip coprocessor computes
///
/// Low byte first, the order frames carry it.
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &b in data {
        let mut ch = b ^ (crc as u8);
        ch ^= ch << 4;
        crc = (crc >> 8) ^ ((ch as u16) << 8) ^ ((ch as u16) << 3) ^ ((ch as u16) >> 4);
    }
    [crc as u8, (crc >> 8) as u8]
}

/// What the simulated tag does when the frame goes out
#[derive(Debug, Clone)]
pub enum Reply {
    Frame { data: Vec<u8>, valid_bits: u8 },
    Timeout,
    Collision,
    /// Raw ErrorReg bits to raise
    ErrorBits(u8),
}

impl Reply {
    /// Byte-aligned frame reply
    pub fn frame(data: &[u8]) -> Self {
        Reply::Frame {
            data: data.to_vec(),
            valid_bits: 0,
        }
    }
}

/// One expected RF exchange
#[derive(Debug, Clone)]
pub struct Exchange {
    expect_tx: Vec<u8>,
    expect_tx_last_bits: u8,
    reply: Reply,
}

impl Exchange {
    pub fn new(expect_tx: Vec<u8>, expect_tx_last_bits: u8, reply: Reply) -> Self {
        Self {
            expect_tx,
            expect_tx_last_bits,
            reply,
        }
    }
}

pub struct MockChip {
    script: VecDeque<Exchange>,
    regs: [u8; 0x40],
    fifo: VecDeque<u8>,
    /// Transceive command issued, next start_send fires an exchange
    armed: bool,
    pub quiesce_count: usize,
    pub flush_count: usize,
}

impl MockChip {
    pub fn new(script: Vec<Exchange>) -> Self {
        Self {
            script: script.into(),
            regs: [0; 0x40],
            fifo: VecDeque::new(),
            armed: false,
            quiesce_count: 0,
            flush_count: 0,
        }
    }

    /// Raw register value, for asserting chip state after a call
    pub fn reg(&self, addr: u8) -> u8 {
        self.regs[addr as usize]
    }

    pub fn script_done(&self) -> bool {
        self.script.is_empty()
    }

    pub fn fifo_is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    fn flush_fifo(&mut self) {
        self.fifo.clear();
        self.flush_count += 1;
    }

    fn run_command(&mut self, value: u8) {
        if value == Command::CalcCrc as u8 {
            let data: Vec<u8> = self.fifo.iter().copied().collect();
            let crc = crc_a(&data);
            self.fifo.clear();
            self.regs[addr::CRC_RESULT_L as usize] = crc[0];
            self.regs[addr::CRC_RESULT_H as usize] = crc[1];
            self.regs[addr::DIV_IRQ as usize] |= 0x04;
        } else if value == Command::Transceive as u8 {
            self.armed = true;
        }
    }

    fn fire_exchange(&mut self, tx_last_bits: u8) {
        let exchange = self
            .script
            .pop_front()
            .expect("transmission attempted with no scripted exchange left");
        let tx: Vec<u8> = self.fifo.drain(..).collect();
        assert_eq!(
            tx, exchange.expect_tx,
            "transmitted frame differs from the scripted one"
        );
        assert_eq!(
            tx_last_bits, exchange.expect_tx_last_bits,
            "TxLastBits differs from the scripted exchange"
        );
        match exchange.reply {
            Reply::Frame { data, valid_bits } => {
                self.fifo = data.into();
                self.regs[addr::CONTROL as usize] = valid_bits & 0x07;
                self.regs[addr::COM_IRQ as usize] |= 0x30;
            }
            Reply::Timeout => {
                self.regs[addr::COM_IRQ as usize] |= 0x01;
            }
            Reply::Collision => {
                // a torn frame leaves partial garbage in the FIFO
                self.fifo.push_back(0xFF);
                self.regs[addr::ERROR as usize] |= 0x08;
                self.regs[addr::COM_IRQ as usize] |= 0x30;
            }
            Reply::ErrorBits(bits) => {
                self.regs[addr::ERROR as usize] |= bits;
                self.regs[addr::COM_IRQ as usize] |= 0x30;
            }
        }
    }
}

impl Interface for MockChip {
    type Error = Infallible;

    fn register_read(&mut self, a: u8) -> Result<u8, Infallible> {
        Ok(match a {
            addr::FIFO_LEVEL => self.fifo.len() as u8,
            addr::FIFO_DATA => self.fifo.pop_front().unwrap_or(0),
            addr::VERSION => 0x92,
            _ => self.regs[a as usize],
        })
    }

    fn register_write(&mut self, a: u8, value: u8) -> Result<(), Infallible> {
        match a {
            addr::COMMAND => {
                self.regs[a as usize] = value;
                self.run_command(value);
            }
            // interrupt and error registers clear the written bits
            addr::COM_IRQ | addr::DIV_IRQ if value & 0x80 == 0 => {
                self.regs[a as usize] &= !(value & 0x7F);
            }
            addr::ERROR => {
                self.regs[a as usize] &= !value;
            }
            addr::FIFO_LEVEL => {
                if value & 0x80 != 0 {
                    self.flush_fifo();
                }
            }
            addr::FIFO_DATA => {
                self.fifo.push_back(value);
            }
            addr::BIT_FRAMING => {
                self.regs[a as usize] = value & 0x7F;
                if self.armed && value & 0x80 != 0 {
                    self.armed = false;
                    self.fire_exchange(value & 0x07);
                }
            }
            _ => self.regs[a as usize] = value,
        }
        Ok(())
    }

    fn register_write_many(&mut self, a: u8, buf: &[u8]) -> Result<(), Infallible> {
        for &b in buf {
            self.register_write(a, b)?;
        }
        Ok(())
    }

    fn register_read_many(&mut self, a: u8, buf: &mut [u8]) -> Result<(), Infallible> {
        for b in buf.iter_mut() {
            *b = self.register_read(a)?;
        }
        Ok(())
    }

    fn quiesce(&mut self) -> Result<(), Infallible> {
        self.quiesce_count += 1;
        Ok(())
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
