use core::{arch::asm, fmt};

/// Polled 16550 UART used for kernel log output.
pub struct SerialWriter {
    base: u16,
    initialized: bool,
}

// COM1
pub static mut SERIAL_WRITER: SerialWriter = SerialWriter::new(0x3f8);

impl SerialWriter {
    const DATA: u16 = 0; // RBR on read, THR on write
    const IER: u16 = 1; // Interrupt Enable Reg
    const FCR: u16 = 2; // FIFO Control Reg (write-only)
    const LCR: u16 = 3; // Line Control Register
    const MCR: u16 = 4; // MODEM Control Register
    const LSR: u16 = 5; // Line Status Register (read-only)

    pub const fn new(base: u16) -> Self {
        Self {
            base,
            initialized: false,
        }
    }

    unsafe fn outb(&self, register: u16, byte: u8) {
        asm!("out dx, al", in("dx") self.base + register, in("al") byte)
    }

    unsafe fn inb(&self, register: u16) -> u8 {
        let res: u8;
        asm!("in al, dx", in("dx") self.base + register, out("al") res);
        res
    }

    fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }

        // SAFETY: Follows the correct proceedure for initializing serial ports.
        // https://wiki.osdev.org/Serial_Ports#Initialization
        unsafe {
            self.outb(Self::IER, 0x00);
            self.outb(Self::LCR, 0x80);
            self.outb(Self::DATA, 0x03);
            self.outb(Self::IER, 0x00);
            self.outb(Self::LCR, 0x03);
            self.outb(Self::FCR, 0xC7);
            self.outb(Self::MCR, 0x0B);

            // Loopback self-test. A faulty port stays disabled.
            self.outb(Self::MCR, 0x1E);
            const EXPECTED: u8 = 0xAE;
            self.outb(Self::DATA, EXPECTED);
            if self.inb(Self::DATA) != EXPECTED {
                return;
            }

            self.outb(Self::MCR, 0x0F);
        }
        self.initialized = true;
    }
}

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.ensure_initialized();
        if !self.initialized {
            return Err(fmt::Error);
        }

        for b in s.bytes() {
            // SAFETY: Waits for the transmit holding register to drain first.
            unsafe {
                while self.inb(Self::LSR) & 0x20 == 0 {}
                self.outb(Self::DATA, b);
            }
        }

        Ok(())
    }
}
