//! Shared helpers for integration tests: tiny ROM images assembled in
//! memory, so the suite runs without fetching any test ROM bundles.

use dotmatrix_core::{cartridge::Cartridge, gameboy::GameBoy};

pub const ROM_SIZE: usize = 0x8000;

/// Build a 32 KiB no-MBC ROM with `program` placed at the 0x0100 entry
/// point. Execution starts there in the post-boot state.
pub fn rom_with_program(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; ROM_SIZE];
    rom[0x0147] = 0x00; // no MBC
    rom[0x0148] = 0x00; // 32 KiB
    rom[0x0149] = 0x00; // no RAM
    rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
    rom
}

#[allow(dead_code)]
pub fn boot_machine(program: &[u8]) -> GameBoy {
    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::load(rom_with_program(program)));
    gb
}

/// Step until the CPU is about to execute `LD B,B` (0x40), the classic
/// debugger breakpoint, or `max_frames` elapse. Returns true if the
/// sentinel was reached.
#[allow(dead_code)]
pub fn run_to_sentinel(gb: &mut GameBoy, max_frames: u32) -> bool {
    let mut frames = 0;
    while frames < max_frames {
        if gb.bus.read(gb.cpu.pc) == 0x40 {
            return true;
        }
        if gb.step() {
            frames += 1;
        }
    }
    false
}
