//! Explicit-byte save-state serialization.
//!
//! Every component exposes `serialize`/`deserialize`; [`GameBoy`] combines
//! them under a small header. Restoring assigns fields directly rather than
//! going through the register write paths, so no LCD toggle, STAT edge or
//! channel trigger fires during a load. A full load is two-pass: the whole
//! stream is decoded into plain state records first and nothing is applied
//! until decoding has succeeded.
//!
//! The ROM image itself is not stored; the host is expected to pair a state
//! with the cartridge it was taken from (cross-emulator containers such as
//! BESS make the same assumption).

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::apu::{Apu, ApuSnapshot, ChannelSnapshot};
use crate::bus::Bus;
use crate::cartridge::{Cartridge, MapperRegs};
use crate::cpu::Cpu;
use crate::gameboy::GameBoy;
use crate::ppu::Ppu;

const MAGIC: &[u8; 4] = b"DMGS";
const VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("not a save state (bad magic)")]
    BadMagic,
    #[error("unsupported save state version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt save state: {0}")]
    Corrupt(&'static str),
}

fn put_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn put_bool<W: Write>(w: &mut W, v: bool) -> io::Result<()> {
    put_u8(w, v as u8)
}

fn put_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_bits().to_le_bytes())
}

fn get_u8<R: Read>(r: &mut R) -> Result<u8, StateError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn get_bool<R: Read>(r: &mut R) -> Result<bool, StateError> {
    Ok(get_u8(r)? != 0)
}

fn get_u16<R: Read>(r: &mut R) -> Result<u16, StateError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn get_u32<R: Read>(r: &mut R) -> Result<u32, StateError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn get_u64<R: Read>(r: &mut R) -> Result<u64, StateError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn get_i32<R: Read>(r: &mut R) -> Result<i32, StateError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn get_f32<R: Read>(r: &mut R) -> Result<f32, StateError> {
    Ok(f32::from_bits(get_u32(r)?))
}

struct CpuState {
    a: u8,
    f: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,
    pc: u16,
    sp: u16,
    halted: bool,
    ime: bool,
    ei_pending: bool,
    cycles: u64,
}

impl Cpu {
    pub fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[
            self.a, self.f, self.b, self.c, self.d, self.e, self.h, self.l,
        ])?;
        put_u16(w, self.pc)?;
        put_u16(w, self.sp)?;
        put_bool(w, self.halted)?;
        put_bool(w, self.ime)?;
        put_bool(w, self.ei_pending)?;
        put_u64(w, self.cycles)
    }

    pub fn deserialize<R: Read>(&mut self, r: &mut R) -> Result<(), StateError> {
        let state = read_cpu_state(r)?;
        self.apply_state(state);
        Ok(())
    }

    fn apply_state(&mut self, s: CpuState) {
        self.a = s.a;
        self.f = s.f & 0xF0;
        self.b = s.b;
        self.c = s.c;
        self.d = s.d;
        self.e = s.e;
        self.h = s.h;
        self.l = s.l;
        self.pc = s.pc;
        self.sp = s.sp;
        self.halted = s.halted;
        self.ime = s.ime;
        self.ei_pending = s.ei_pending;
        self.cycles = s.cycles;
    }
}

fn read_cpu_state<R: Read>(r: &mut R) -> Result<CpuState, StateError> {
    let mut regs = [0u8; 8];
    r.read_exact(&mut regs)?;
    Ok(CpuState {
        a: regs[0],
        f: regs[1],
        b: regs[2],
        c: regs[3],
        d: regs[4],
        e: regs[5],
        h: regs[6],
        l: regs[7],
        pc: get_u16(r)?,
        sp: get_u16(r)?,
        halted: get_bool(r)?,
        ime: get_bool(r)?,
        ei_pending: get_bool(r)?,
        cycles: get_u64(r)?,
    })
}

struct PpuState {
    video_regs: [u8; 11],
    dma: u8,
    mode: u8,
    mode_clock: u32,
    mode3_length: u32,
    wc: u8,
    win_y_trigger: bool,
    stat_line: bool,
    ly_for_comparison: Option<u8>,
    if_reg: u8,
    timer: (u16, u8, u8, u8, bool, u8, bool),
    vram: Box<[u8; 0x2000]>,
    oam: [u8; 0xA0],
}

impl Ppu {
    pub fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.video_regs())?;
        put_u8(w, self.dma)?;
        let (mode, mode_clock, mode3_length, wc, win_y_trigger, stat_line, ly_cmp) =
            self.pipeline_state();
        put_u8(w, mode)?;
        put_u32(w, mode_clock)?;
        put_u32(w, mode3_length)?;
        put_u8(w, wc)?;
        put_bool(w, win_y_trigger)?;
        put_bool(w, stat_line)?;
        put_bool(w, ly_cmp.is_some())?;
        put_u8(w, ly_cmp.unwrap_or(0))?;
        put_u8(w, self.if_reg)?;
        let (div, tima, tma, tac, prev_bit, countdown, reloading) = self.timer.snapshot();
        put_u16(w, div)?;
        put_u8(w, tima)?;
        put_u8(w, tma)?;
        put_u8(w, tac)?;
        put_bool(w, prev_bit)?;
        put_u8(w, countdown)?;
        put_bool(w, reloading)?;
        w.write_all(&self.vram)?;
        w.write_all(&self.oam)
    }

    pub fn deserialize<R: Read>(&mut self, r: &mut R) -> Result<(), StateError> {
        let state = read_ppu_state(r)?;
        self.apply_state(state);
        Ok(())
    }

    fn apply_state(&mut self, s: PpuState) {
        self.restore(
            s.video_regs,
            s.mode,
            s.mode_clock,
            s.mode3_length,
            s.wc,
            s.win_y_trigger,
            s.stat_line,
            s.ly_for_comparison,
        );
        self.dma = s.dma;
        self.if_reg = s.if_reg;
        let (div, tima, tma, tac, prev_bit, countdown, reloading) = s.timer;
        self.timer
            .restore(div, tima, tma, tac, prev_bit, countdown, reloading);
        self.vram.copy_from_slice(&s.vram[..]);
        self.oam = s.oam;
    }
}

fn read_ppu_state<R: Read>(r: &mut R) -> Result<PpuState, StateError> {
    let mut video_regs = [0u8; 11];
    r.read_exact(&mut video_regs)?;
    let dma = get_u8(r)?;
    let mode = get_u8(r)?;
    if mode > 3 {
        return Err(StateError::Corrupt("PPU mode out of range"));
    }
    let mode_clock = get_u32(r)?;
    let mode3_length = get_u32(r)?;
    let wc = get_u8(r)?;
    let win_y_trigger = get_bool(r)?;
    let stat_line = get_bool(r)?;
    let ly_cmp_some = get_bool(r)?;
    let ly_cmp_val = get_u8(r)?;
    let if_reg = get_u8(r)?;
    let timer = (
        get_u16(r)?,
        get_u8(r)?,
        get_u8(r)?,
        get_u8(r)?,
        get_bool(r)?,
        get_u8(r)?,
        get_bool(r)?,
    );
    let mut vram = Box::new([0u8; 0x2000]);
    r.read_exact(&mut vram[..])?;
    let mut oam = [0u8; 0xA0];
    r.read_exact(&mut oam)?;
    Ok(PpuState {
        video_regs,
        dma,
        mode,
        mode_clock,
        mode3_length,
        wc,
        win_y_trigger,
        stat_line,
        ly_for_comparison: ly_cmp_some.then_some(ly_cmp_val),
        if_reg,
        timer,
        vram,
        oam,
    })
}

impl Apu {
    pub fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let snap = self.snapshot();
        w.write_all(&snap.regs)?;
        w.write_all(&snap.wave_ram)?;
        put_u8(w, snap.nr50)?;
        put_u8(w, snap.nr51)?;
        put_bool(w, snap.power)?;
        put_u32(w, snap.sequencer_counter)?;
        put_u8(w, snap.sequencer_step)?;
        put_f32(w, snap.sample_acc)?;
        put_f32(w, snap.hp_prev_input)?;
        put_f32(w, snap.hp_prev_output)?;
        for ch in &snap.channels {
            put_bool(w, ch.enabled)?;
            put_bool(w, ch.dac_enabled)?;
            put_u16(w, ch.length)?;
            put_bool(w, ch.length_enable)?;
            put_u16(w, ch.frequency)?;
            put_i32(w, ch.timer)?;
            put_u16(w, ch.pos)?;
            put_u8(w, ch.volume)?;
            put_u8(w, ch.env_timer)?;
            put_bool(w, ch.env_finished)?;
        }
        Ok(())
    }

    pub fn deserialize<R: Read>(&mut self, r: &mut R) -> Result<(), StateError> {
        let snap = read_apu_state(r)?;
        self.restore(snap);
        Ok(())
    }
}

fn read_apu_state<R: Read>(r: &mut R) -> Result<ApuSnapshot, StateError> {
    let mut regs = [0u8; 0x30];
    r.read_exact(&mut regs)?;
    let mut wave_ram = [0u8; 0x10];
    r.read_exact(&mut wave_ram)?;
    let nr50 = get_u8(r)?;
    let nr51 = get_u8(r)?;
    let power = get_bool(r)?;
    let sequencer_counter = get_u32(r)?;
    let sequencer_step = get_u8(r)?;
    if sequencer_step > 7 {
        return Err(StateError::Corrupt("frame sequencer step out of range"));
    }
    let sample_acc = get_f32(r)?;
    let hp_prev_input = get_f32(r)?;
    let hp_prev_output = get_f32(r)?;
    let mut channels = [ChannelSnapshot::default(); 4];
    for ch in channels.iter_mut() {
        *ch = ChannelSnapshot {
            enabled: get_bool(r)?,
            dac_enabled: get_bool(r)?,
            length: get_u16(r)?,
            length_enable: get_bool(r)?,
            frequency: get_u16(r)?,
            timer: get_i32(r)?,
            pos: get_u16(r)?,
            volume: get_u8(r)?,
            env_timer: get_u8(r)?,
            env_finished: get_bool(r)?,
        };
    }
    Ok(ApuSnapshot {
        regs,
        wave_ram,
        nr50,
        nr51,
        power,
        sequencer_counter,
        sequencer_step,
        sample_acc,
        hp_prev_input,
        hp_prev_output,
        channels,
    })
}

struct BusState {
    wram: Box<[u8; 0x2000]>,
    hram: [u8; 0x7F],
    boot_rom_disabled: bool,
    ie_reg: u8,
    joypad_select: u8,
    joypad_pressed: u8,
    serial_sb: u8,
    serial_sc: u8,
}

impl Bus {
    /// Serialize the bus-owned state only; the PPU, APU and cartridge have
    /// their own `serialize` methods.
    pub fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.wram)?;
        w.write_all(&self.hram)?;
        put_bool(w, self.boot_rom_disabled)?;
        put_u8(w, self.ie_reg)?;
        put_u8(w, self.joypad.select_bits())?;
        put_u8(w, self.joypad.pressed())?;
        let (sb, sc) = self.serial.regs();
        put_u8(w, sb)?;
        put_u8(w, sc)
    }

    pub fn deserialize<R: Read>(&mut self, r: &mut R) -> Result<(), StateError> {
        let state = read_bus_state(r)?;
        self.apply_state(state);
        Ok(())
    }

    fn apply_state(&mut self, s: BusState) {
        self.wram.copy_from_slice(&s.wram[..]);
        self.hram = s.hram;
        self.boot_rom_disabled = s.boot_rom_disabled;
        self.ie_reg = s.ie_reg;
        self.joypad.restore(s.joypad_select, s.joypad_pressed);
        self.serial.restore(s.serial_sb, s.serial_sc);
    }
}

fn read_bus_state<R: Read>(r: &mut R) -> Result<BusState, StateError> {
    let mut wram = Box::new([0u8; 0x2000]);
    r.read_exact(&mut wram[..])?;
    let mut hram = [0u8; 0x7F];
    r.read_exact(&mut hram)?;
    Ok(BusState {
        wram,
        hram,
        boot_rom_disabled: get_bool(r)?,
        ie_reg: get_u8(r)?,
        joypad_select: get_u8(r)?,
        joypad_pressed: get_u8(r)?,
        serial_sb: get_u8(r)?,
        serial_sc: get_u8(r)?,
    })
}

struct CartState {
    ram: Vec<u8>,
    regs: MapperRegs,
}

impl Cartridge {
    pub fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        put_u32(w, self.ram.len() as u32)?;
        w.write_all(&self.ram)?;
        let regs = self.mapper_regs();
        put_u8(w, regs.rom_bank)?;
        put_u8(w, regs.bank2_or_ram_bank)?;
        put_u8(w, regs.mode_or_latch)?;
        put_bool(w, regs.ram_enable)?;
        put_bool(w, regs.rtc.is_some())?;
        w.write_all(&regs.rtc.unwrap_or_default())
    }

    pub fn deserialize<R: Read>(&mut self, r: &mut R) -> Result<(), StateError> {
        let state = read_cart_state(r, self.ram.len())?;
        self.apply_state(state);
        Ok(())
    }

    fn apply_state(&mut self, s: CartState) {
        self.ram = s.ram;
        self.restore_mapper_regs(s.regs);
    }
}

fn read_cart_state<R: Read>(r: &mut R, expected_ram: usize) -> Result<CartState, StateError> {
    let len = get_u32(r)? as usize;
    if len != expected_ram {
        return Err(StateError::Corrupt("cartridge RAM size mismatch"));
    }
    let mut ram = vec![0u8; len];
    r.read_exact(&mut ram)?;
    let rom_bank = get_u8(r)?;
    let bank2_or_ram_bank = get_u8(r)?;
    let mode_or_latch = get_u8(r)?;
    let ram_enable = get_bool(r)?;
    let has_rtc = get_bool(r)?;
    let mut rtc = [0u8; 5];
    r.read_exact(&mut rtc)?;
    Ok(CartState {
        ram,
        regs: MapperRegs {
            rom_bank,
            bank2_or_ram_bank,
            mode_or_latch,
            ram_enable,
            rtc: has_rtc.then_some(rtc),
        },
    })
}

impl GameBoy {
    /// Write the full machine state. The ROM itself is not included.
    pub fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        put_u8(w, VERSION)?;
        self.cpu.serialize(w)?;
        self.bus.serialize(w)?;
        self.bus.ppu.serialize(w)?;
        self.bus.apu.serialize(w)?;
        put_bool(w, self.bus.cart.is_some())?;
        if let Some(cart) = &self.bus.cart {
            cart.serialize(w)?;
        }
        Ok(())
    }

    /// Restore the full machine state. Decoding happens in one pass over the
    /// stream into plain records; only when everything decoded cleanly is
    /// any of it applied, so a truncated or corrupt state leaves the machine
    /// untouched.
    pub fn deserialize<R: Read>(&mut self, r: &mut R) -> Result<(), StateError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(StateError::BadMagic);
        }
        let version = get_u8(r)?;
        if version != VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }

        let cpu = read_cpu_state(r)?;
        let bus = read_bus_state(r)?;
        let ppu = read_ppu_state(r)?;
        let apu = read_apu_state(r)?;
        let cart_present = get_bool(r)?;
        let cart = if cart_present {
            let expected = self
                .bus
                .cart
                .as_ref()
                .map(|c| c.ram.len())
                .ok_or(StateError::Corrupt("state has a cartridge, machine has none"))?;
            Some(read_cart_state(r, expected)?)
        } else {
            None
        };

        self.cpu.apply_state(cpu);
        self.bus.apply_state(bus);
        self.bus.ppu.apply_state(ppu);
        self.bus.apu.restore(apu);
        if let (Some(cart_state), Some(cart)) = (cart, self.bus.cart.as_mut()) {
            cart.apply_state(cart_state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_magic_is_rejected_without_touching_state() {
        let mut gb = GameBoy::new();
        gb.cpu.a = 0x42;
        let before = gb.cpu.a;
        let mut data: &[u8] = b"NOPE\x01rest";
        let err = gb.deserialize(&mut data).unwrap_err();
        assert!(matches!(err, StateError::BadMagic));
        assert_eq!(gb.cpu.a, before);
    }

    #[test]
    fn truncated_stream_leaves_machine_untouched() {
        let mut gb = GameBoy::new();
        let mut buf = Vec::new();
        gb.serialize(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);

        let mut gb2 = GameBoy::new();
        gb2.cpu.pc = 0x1234;
        gb2.bus.wram[0] = 0x77;
        let err = gb2.deserialize(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, StateError::Io(_)));
        assert_eq!(gb2.cpu.pc, 0x1234);
        assert_eq!(gb2.bus.wram[0], 0x77);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut gb = GameBoy::new();
        let mut buf = Vec::new();
        gb.serialize(&mut buf).unwrap();
        buf[4] = 99;
        let err = gb.deserialize(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, StateError::UnsupportedVersion(99)));
    }
}
