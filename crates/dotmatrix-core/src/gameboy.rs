use crate::{bus::Bus, cartridge::Cartridge, cpu::Cpu};

/// The whole machine: CPU plus the bus that owns every peripheral.
///
/// The run loop is lockstep and deterministic: each [`GameBoy::step`]
/// executes one CPU instruction and advances the PPU and APU by the T-cycles
/// it returned. Given the same ROM and the same per-frame joypad schedule,
/// two runs produce identical framebuffers and identical audio samples.
pub struct GameBoy {
    pub cpu: Cpu,
    pub bus: Bus,
}

impl GameBoy {
    /// Machine in the post-boot state, ready to run a cartridge without a
    /// boot ROM image.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            bus: Bus::new(),
        }
    }

    /// Machine at power-on, intended to be paired with a boot ROM mapped at
    /// 0x0000.
    pub fn new_power_on() -> Self {
        let mut gb = Self::new();
        gb.cpu = Cpu::new_power_on();
        gb
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.bus.load_cart(cart);
    }

    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.bus.load_boot_rom(data);
        self.cpu = Cpu::new_power_on();
    }

    /// Execute one instruction and clock the peripherals. Returns true when
    /// this step completed a frame.
    pub fn step(&mut self) -> bool {
        let cycles = self.cpu.step(&mut self.bus);
        self.bus.tick(cycles)
    }

    /// Run until the PPU reports end-of-frame.
    pub fn step_frame(&mut self) {
        while !self.step() {}
    }

    /// Replace the joypad state; applied before the next `step`.
    pub fn set_input(&mut self, pressed: u8) {
        self.bus.set_input(pressed);
    }

    pub fn framebuffer(&self) -> &[u32] {
        self.bus.ppu.framebuffer()
    }

    /// Reset to the initial power-on state while preserving the loaded
    /// cartridge and boot ROM.
    pub fn reset(&mut self) {
        let cart = self.bus.cart.take();
        let boot = self.bus.boot_rom.take();
        self.cpu = Cpu::new();
        self.bus = Bus::new();
        if let Some(c) = cart {
            self.bus.load_cart(c);
        }
        if let Some(b) = boot {
            self.bus.load_boot_rom(b);
            self.cpu = Cpu::new_power_on();
        }
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
