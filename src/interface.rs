use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

/// Half clock period of the bit-banged bus, in microseconds
///
/// Empirically tuned for this chip and board; revisit if the host
/// wiring changes.
pub const CLOCK_HALF_PERIOD_US: u32 = 2;
/// Settle time around chip-select transitions, in microseconds
pub const SETTLE_DELAY_US: u32 = 10;

/// Register read marker, OR'd into the address byte
const READ_BIT: u8 = 0x80;

/// Register access to the chip
///
/// Abstracts the transport so the protocol layers above can run against
/// a simulated chip on the host.
pub trait Interface {
    type Error;

    /// Read one register
    fn register_read(&mut self, addr: u8) -> Result<u8, Self::Error>;
    /// Write one register
    fn register_write(&mut self, addr: u8, value: u8) -> Result<(), Self::Error>;
    /// Write a run of bytes to one register address (FIFO load)
    fn register_write_many(&mut self, addr: u8, buf: &[u8]) -> Result<(), Self::Error>;
    /// Read a run of bytes from one register address (FIFO drain)
    fn register_read_many(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), Self::Error>;
    /// Drive the data-out line to its idle-low level
    ///
    /// The line is electrically coupled to the audio output; left high or
    /// floating it injects an audible tone. Not part of the chip protocol.
    fn quiesce(&mut self) -> Result<(), Self::Error>;

    fn set_bitmask(&mut self, addr: u8, mask: u8) -> Result<(), Self::Error> {
        let current = self.register_read(addr)?;
        self.register_write(addr, current | mask)
    }
    fn clear_bitmask(&mut self, addr: u8, mask: u8) -> Result<(), Self::Error> {
        let current = self.register_read(addr)?;
        self.register_write(addr, current & !mask)
    }
}

/// Bit-banged 3-wire bus plus chip select
///
/// The MCU's hardware SPI block is owned by the display and storage
/// devices, so this chip is driven entirely through GPIO. Mode 0,
/// MSB first, data sampled on the rising clock edge.
pub struct SoftSpi<Sck, Mosi, Miso, Nss, D> {
    sck: Sck,
    mosi: Mosi,
    miso: Miso,
    nss: Nss,
    delay: D,
}

impl<Sck, Mosi, Miso, Nss, D, E> SoftSpi<Sck, Mosi, Miso, Nss, D>
where
    Sck: OutputPin<Error = E>,
    Mosi: OutputPin<Error = E>,
    Miso: InputPin<Error = E>,
    Nss: OutputPin<Error = E>,
    D: DelayNs,
{
    /// Takes ownership of the pins and drives them to their idle levels
    pub fn new(sck: Sck, mosi: Mosi, miso: Miso, nss: Nss, delay: D) -> Result<Self, E> {
        let mut bus = Self {
            sck,
            mosi,
            miso,
            nss,
            delay,
        };
        bus.nss.set_high()?;
        bus.sck.set_low()?;
        bus.mosi.set_low()?;
        Ok(bus)
    }

    /// Exchange one byte, full duplex
    ///
    /// The chip free-runs its clock-edge state machine with no flow
    /// control, so the whole 8-pulse exchange runs with preemption
    /// disabled; a stall mid-byte desynchronizes framing.
    fn transfer(&mut self, mut byte: u8) -> Result<u8, E> {
        critical_section::with(|_| {
            let mut read = 0u8;
            for _ in 0..8 {
                if byte & 0x80 != 0 {
                    self.mosi.set_high()?;
                } else {
                    self.mosi.set_low()?;
                }
                byte <<= 1;

                self.delay.delay_us(CLOCK_HALF_PERIOD_US);
                self.sck.set_high()?;
                self.delay.delay_us(CLOCK_HALF_PERIOD_US);

                read <<= 1;
                if self.miso.is_high()? {
                    read |= 1;
                }

                self.sck.set_low()?;
                self.delay.delay_us(CLOCK_HALF_PERIOD_US);
            }
            Ok(read)
        })
    }

    fn select(&mut self) -> Result<(), E> {
        self.nss.set_low()?;
        self.delay.delay_us(SETTLE_DELAY_US);
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), E> {
        self.nss.set_high()?;
        self.delay.delay_us(SETTLE_DELAY_US);
        Ok(())
    }

    /// Address byte framing: datasheet address shifted left, bit 7 set
    /// for reads, LSB always zero
    fn address_byte(addr: u8, read: bool) -> u8 {
        let shifted = (addr << 1) & 0x7E;
        if read {
            shifted | READ_BIT
        } else {
            shifted
        }
    }
}

impl<Sck, Mosi, Miso, Nss, D, E> Interface for SoftSpi<Sck, Mosi, Miso, Nss, D>
where
    Sck: OutputPin<Error = E>,
    Mosi: OutputPin<Error = E>,
    Miso: InputPin<Error = E>,
    Nss: OutputPin<Error = E>,
    D: DelayNs,
{
    type Error = E;

    fn register_read(&mut self, addr: u8) -> Result<u8, E> {
        self.select()?;
        self.transfer(Self::address_byte(addr, true))?;
        let value = self.transfer(0)?;
        self.deselect()?;
        self.quiesce()?;
        Ok(value)
    }

    fn register_write(&mut self, addr: u8, value: u8) -> Result<(), E> {
        self.select()?;
        self.transfer(Self::address_byte(addr, false))?;
        self.transfer(value)?;
        self.deselect()
    }

    fn register_write_many(&mut self, addr: u8, buf: &[u8]) -> Result<(), E> {
        self.select()?;
        self.transfer(Self::address_byte(addr, false))?;
        for &b in buf {
            self.transfer(b)?;
        }
        self.deselect()
    }

    fn register_read_many(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), E> {
        if buf.is_empty() {
            return Ok(());
        }
        let address = Self::address_byte(addr, true);
        self.select()?;
        self.transfer(address)?;
        // the address is re-clocked for every byte; the chip keeps
        // streaming the same register
        for b in buf.iter_mut() {
            *b = self.transfer(address)?;
        }
        self.deselect()?;
        self.quiesce()
    }

    fn quiesce(&mut self) -> Result<(), E> {
        self.mosi.set_low()
    }
}
