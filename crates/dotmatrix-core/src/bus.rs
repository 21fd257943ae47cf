use crate::{apu::Apu, cartridge::Cartridge, input::Joypad, ppu::Ppu, serial::Serial};

const WRAM_SIZE: usize = 0x2000;
const HRAM_SIZE: usize = 0x7F;
const OAM_DMA_LEN: u16 = 0xA0;

/// Address-decoded read/write router.
///
/// Owns WRAM, HRAM, the boot ROM overlay, joypad, serial stub and the IE
/// register, and holds the PPU, APU and cartridge it routes to. The IF
/// register lives on the PPU beside the interrupt sources it aggregates.
pub struct Bus {
    pub wram: [u8; WRAM_SIZE],
    pub hram: [u8; HRAM_SIZE],
    pub boot_rom: Option<Vec<u8>>,
    /// Set by writing 1 to 0xFF50; sticky until reset.
    pub boot_rom_disabled: bool,
    pub joypad: Joypad,
    pub serial: Serial,
    pub ie_reg: u8,
    pub ppu: Ppu,
    pub apu: Apu,
    pub cart: Option<Cartridge>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            wram: [0; WRAM_SIZE],
            hram: [0; HRAM_SIZE],
            boot_rom: None,
            boot_rom_disabled: true,
            joypad: Joypad::new(),
            serial: Serial::new(),
            ie_reg: 0,
            ppu: Ppu::new(),
            apu: Apu::new(),
            cart: None,
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    /// Map a boot ROM at 0x0000-0x00FF and start executing from it.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.boot_rom = Some(data);
        self.boot_rom_disabled = false;
    }

    /// Advance the clocked peripherals by the T-cycles one CPU instruction
    /// consumed. Returns true when the PPU finished a frame.
    pub fn tick(&mut self, cycles: u32) -> bool {
        let frame_done = self.ppu.step(cycles);
        self.apu.step(cycles);
        frame_done
    }

    /// Replace the joypad state with an 8-bit pressed-buttons mask.
    pub fn set_input(&mut self, pressed: u8) {
        self.joypad.set_pressed(pressed, &mut self.ppu.if_reg);
    }

    pub fn save_cart_ram(&mut self) {
        if let Some(cart) = &self.cart {
            if let Err(e) = cart.save_ram() {
                core_warn!(target: "bus", "failed to save cartridge RAM: {e}");
            }
        }
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x00FF if !self.boot_rom_disabled => self
                .boot_rom
                .as_ref()
                .and_then(|b| b.get(addr as usize).copied())
                .unwrap_or(0xFF),
            0x0000..=0x7FFF => self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF),
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize],
            0xA000..=0xBFFF => self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF),
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            // Echo RAM mirrors 0xC000-0xDDFF.
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 | 0xFF0F => self.ppu.read_reg(addr),
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize] = val,
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val, &mut self.ppu.if_reg),
            0xFF04..=0xFF07 | 0xFF0F => self.ppu.write_reg(addr, val),
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF46 => self.oam_dma(val),
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val),
            0xFF50 => {
                if val & 0x01 != 0 {
                    self.boot_rom_disabled = true;
                }
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
            _ => {}
        }
    }

    /// OAM DMA: copy 160 bytes from `val << 8` into OAM. The copy is atomic
    /// rather than spread over 160 M-cycles; games that poll mid-transfer
    /// will see it complete instantly.
    fn oam_dma(&mut self, val: u8) {
        self.ppu.dma = val;
        let src = (val as u16) << 8;
        for i in 0..OAM_DMA_LEN {
            let byte = self.read(src.wrapping_add(i));
            self.ppu.oam[i as usize] = byte;
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wram_echo_mirrors_writes() {
        let mut bus = Bus::new();
        bus.write(0xC123, 0xAB);
        assert_eq!(bus.read(0xE123), 0xAB);
        bus.write(0xF000, 0x42);
        assert_eq!(bus.read(0xD000), 0x42);
    }

    #[test]
    fn unusable_region_reads_ff() {
        let mut bus = Bus::new();
        bus.write(0xFEA5, 0x12);
        assert_eq!(bus.read(0xFEA5), 0xFF);
    }

    #[test]
    fn unmapped_io_reads_ff() {
        let mut bus = Bus::new();
        assert_eq!(bus.read(0xFF03), 0xFF);
        assert_eq!(bus.read(0xFF4C), 0xFF);
        assert_eq!(bus.read(0xFF7F), 0xFF);
    }

    #[test]
    fn if_upper_bits_read_high() {
        let mut bus = Bus::new();
        bus.write(0xFF0F, 0x00);
        assert_eq!(bus.read(0xFF0F), 0xE0);
        bus.write(0xFF0F, 0x15);
        assert_eq!(bus.read(0xFF0F), 0xF5);
    }

    #[test]
    fn oam_dma_copies_160_bytes() {
        let mut bus = Bus::new();
        for i in 0..0xA0u16 {
            bus.write(0xC000 + i, i as u8 ^ 0x5A);
        }
        bus.write(0xFF46, 0xC0);
        for i in 0..0xA0u16 {
            assert_eq!(bus.read(0xFE00 + i), i as u8 ^ 0x5A);
        }
        assert_eq!(bus.read(0xFF46), 0xC0);
    }

    #[test]
    fn boot_rom_overlays_and_latch_is_sticky() {
        let mut bus = Bus::new();
        bus.load_cart(Cartridge::load(vec![0x11; 0x8000]));
        bus.load_boot_rom(vec![0x99; 0x100]);
        assert_eq!(bus.read(0x0000), 0x99);
        assert_eq!(bus.read(0x0100), 0x11);

        // Writing 0 does not disable.
        bus.write(0xFF50, 0x00);
        assert_eq!(bus.read(0x0000), 0x99);

        bus.write(0xFF50, 0x01);
        assert_eq!(bus.read(0x0000), 0x11);

        // Sticky: cannot re-enable.
        bus.write(0xFF50, 0x00);
        assert_eq!(bus.read(0x0000), 0x11);
    }

    #[test]
    fn joypad_select_routing() {
        let mut bus = Bus::new();
        bus.set_input(crate::input::BTN_A);
        bus.write(0xFF00, 0x10); // button row selected
        assert_eq!(bus.read(0xFF00) & 0x0F, 0x0E);
        bus.write(0xFF00, 0x20); // d-pad row selected
        assert_eq!(bus.read(0xFF00) & 0x0F, 0x0F);
    }

    #[test]
    fn timer_registers_route_through_ppu() {
        let mut bus = Bus::new();
        bus.write(0xFF06, 0x42);
        assert_eq!(bus.read(0xFF06), 0x42);
        assert_eq!(bus.read(0xFF07) & 0xF8, 0xF8);
    }
}
