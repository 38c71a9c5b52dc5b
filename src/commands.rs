/// MFRC522 command set
///
/// Values from the [datasheet](https://www.nxp.com/docs/en/data-sheet/MFRC522.pdf),
/// section 10.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// No action, cancels the current command execution
    Idle = 0b0000,
    /// Stores 25 bytes into the internal buffer
    Mem = 0b0001,
    /// Generates a 10-byte random ID number
    GenerateRandomId = 0b0010,
    /// Activates the CRC coprocessor on the FIFO contents
    CalcCrc = 0b0011,
    /// Transmits data from the FIFO buffer
    Transmit = 0b0100,
    /// Modifies CommandReg bits without touching the running command
    NoCmdChange = 0b0111,
    /// Activates the receiver circuits
    Receive = 0b1000,
    /// Transmits data from the FIFO buffer and activates the receiver
    /// after transmission
    Transceive = 0b1100,
    /// Performs the MIFARE standard authentication as a reader
    MfAuthent = 0b1110,
    /// Resets the chip
    SoftReset = 0b1111,
}

/// ISO14443-3A frame commands and protocol constants
pub mod picc {
    /// REQuest type A, short frame
    pub const REQA: u8 = 0x26;
    /// Wake-UP type A, short frame
    pub const WUPA: u8 = 0x52;
    /// Anticollision/select, cascade level 1
    pub const SEL_CL1: u8 = 0x93;
    /// Anticollision/select, cascade level 2
    pub const SEL_CL2: u8 = 0x95;
    /// Anticollision/select, cascade level 3
    pub const SEL_CL3: u8 = 0x97;
    /// HaLT type A
    pub const HLTA: u8 = 0x50;
    /// Read four 4-byte pages of tag memory
    pub const READ: u8 = 0x30;
    /// Cascade tag, first anticollision byte when the UID continues
    /// on the next level
    pub const CT: u8 = 0x88;

    /// Number of Valid Bits prefix for a bare anticollision frame
    /// (2 bytes, SEL + NVB only)
    pub const NVB_ANTICOLLISION: u8 = 0x20;
    /// Number of Valid Bits prefix for a full select frame (7 bytes known)
    pub const NVB_SELECT: u8 = 0x70;

    /// SAK bit 2, set when the UID is incomplete and another cascade
    /// level is required
    pub const SAK_CASCADE: u8 = 1 << 2;
    /// SAK of the NTAG/Ultralight family, the only one the text
    /// extraction path supports
    pub const SAK_NTAG: u8 = 0x00;
}
