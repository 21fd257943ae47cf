use std::{
    fs, io,
    path::{Path, PathBuf},
};

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    NoMbc,
    Mbc1,
    Mbc3,
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub title: String,
    cart_type: u8,
    num_rom_banks: usize,
    num_ram_banks: usize,
    save_path: Option<PathBuf>,
    mbc_state: MbcState,
}

#[derive(Debug)]
enum MbcState {
    NoMbc,
    Mbc1 {
        rom_bank: u8,
        bank2: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        /// RAM bank (0..=3) or RTC register selector (0x08..=0x0C).
        ram_bank: u8,
        ram_enable: bool,
        rtc: Option<Mbc3Rtc>,
        latch_pending: bool,
    },
}

/// MBC3 real-time clock registers.
///
/// The clock is frozen: latching snapshots the register bytes and reads
/// return whatever was latched, but nothing ever advances them. Keeping wall
/// time out of the core preserves run-to-run determinism.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Mbc3Rtc {
    seconds: u8,
    minutes: u8,
    hours: u8,
    days_low: u8,
    days_high: u8,
    latched: [u8; 5],
}

impl Mbc3Rtc {
    fn latch(&mut self) {
        self.latched = [
            self.seconds & 0x3F,
            self.minutes & 0x3F,
            self.hours & 0x1F,
            self.days_low,
            self.days_high & 0xC1,
        ];
    }

    fn read_latched(&self, reg: u8) -> u8 {
        match reg {
            0x08..=0x0C => self.latched[(reg - 0x08) as usize],
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x08 => self.seconds = value & 0x3F,
            0x09 => self.minutes = value & 0x3F,
            0x0A => self.hours = value & 0x1F,
            0x0B => self.days_low = value,
            0x0C => self.days_high = value & 0xC1,
            _ => {}
        }
        self.latch();
    }

    pub(crate) fn raw(&self) -> [u8; 5] {
        [
            self.seconds,
            self.minutes,
            self.hours,
            self.days_low,
            self.days_high,
        ]
    }

    pub(crate) fn restore(&mut self, raw: [u8; 5]) {
        self.seconds = raw[0] & 0x3F;
        self.minutes = raw[1] & 0x3F;
        self.hours = raw[2] & 0x1F;
        self.days_low = raw[3];
        self.days_high = raw[4] & 0xC1;
        self.latch();
    }
}

impl Cartridge {
    /// Load a cartridge from a ROM file and, when the cartridge has battery
    /// backing, an adjacent `<rom>.sav` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read(&path)?;
        let mut cart = Self::load(data);

        if cart.has_battery() {
            let mut save = PathBuf::from(path.as_ref());
            save.set_extension("sav");
            cart.save_path = Some(save.clone());
            if let Ok(bytes) = fs::read(&save) {
                for (d, s) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *d = *s;
                }
            }
        }

        core_info!(
            target: "cartridge",
            "loaded ROM: {} (mapper {:?}, {} ROM banks, {} RAM banks)",
            cart.title,
            cart.mbc,
            cart.num_rom_banks,
            cart.num_ram_banks
        );
        Ok(cart)
    }

    /// Build a cartridge from raw ROM bytes. Malformed or truncated headers
    /// fall back to documented defaults (no mapper, no RAM) so the machine
    /// still boots.
    pub fn load(data: Vec<u8>) -> Self {
        let header = Header::parse(&data);
        let cart_type = header.cart_type();
        let mbc = header.mbc_type();
        let title = header.title();
        let num_rom_banks = header.rom_banks().max(data.len().div_ceil(ROM_BANK_SIZE).max(1));
        let num_ram_banks = header.ram_banks();

        if !header.checksum_matches() {
            core_warn!(
                target: "cartridge",
                "header checksum mismatch for {:?} (continuing anyway)",
                title
            );
        }

        let mbc_state = match mbc {
            MbcType::NoMbc => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                bank2: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rtc: header.has_rtc().then(Mbc3Rtc::default),
                latch_pending: false,
            },
        };

        Self {
            rom: data,
            ram: vec![0; num_ram_banks * RAM_BANK_SIZE],
            mbc,
            title,
            cart_type,
            num_rom_banks,
            num_ram_banks,
            save_path: None,
            mbc_state,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match (&self.mbc_state, addr) {
            (MbcState::NoMbc, 0x0000..=0x7FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc1 { bank2, mode, .. }, 0x0000..=0x3FFF) => {
                let bank = if *mode == 0 {
                    0
                } else {
                    ((*bank2 as usize) << 5) % self.num_rom_banks
                };
                self.rom_byte(bank, addr as usize)
            }
            (
                MbcState::Mbc1 {
                    rom_bank, bank2, ..
                },
                0x4000..=0x7FFF,
            ) => {
                let low = if *rom_bank & 0x1F == 0 {
                    1
                } else {
                    *rom_bank as usize & 0x1F
                };
                let bank = (((*bank2 as usize) << 5) | low) % self.num_rom_banks;
                self.rom_byte(bank, addr as usize - 0x4000)
            }
            (MbcState::Mbc3 { .. }, 0x0000..=0x3FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                let bank = if *rom_bank == 0 { 1 } else { *rom_bank as usize };
                self.rom_byte(bank % self.num_rom_banks, addr as usize - 0x4000)
            }
            (MbcState::NoMbc, 0xA000..=0xBFFF) => self
                .ram
                .get(addr as usize - 0xA000)
                .copied()
                .unwrap_or(0xFF),
            (MbcState::Mbc1 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if !*ram_enable {
                    0xFF
                } else {
                    self.ram.get(self.ram_index(addr)).copied().unwrap_or(0xFF)
                }
            }
            (
                MbcState::Mbc3 {
                    ram_enable,
                    ram_bank,
                    rtc,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if !*ram_enable {
                    0xFF
                } else {
                    match *ram_bank {
                        0x00..=0x03 => {
                            self.ram.get(self.ram_index(addr)).copied().unwrap_or(0xFF)
                        }
                        0x08..=0x0C => rtc
                            .as_ref()
                            .map(|r| r.read_latched(*ram_bank))
                            .unwrap_or(0xFF),
                        _ => 0xFF,
                    }
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match (&mut self.mbc_state, addr) {
            (MbcState::NoMbc, 0xA000..=0xBFFF) => {
                let idx = addr as usize - 0xA000;
                if let Some(b) = self.ram.get_mut(idx) {
                    *b = val;
                }
            }
            (MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x1F;
                if *rom_bank == 0 {
                    *rom_bank = 1;
                }
            }
            (MbcState::Mbc1 { bank2, .. }, 0x4000..=0x5FFF) => {
                *bank2 = val & 0x03;
            }
            (MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
                *mode = val & 0x01;
            }
            (MbcState::Mbc1 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if *ram_enable {
                    let idx = self.ram_index(addr);
                    if let Some(b) = self.ram.get_mut(idx) {
                        *b = val;
                    }
                }
            }
            (MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x7F;
                if *rom_bank == 0 {
                    *rom_bank = 1;
                }
            }
            (MbcState::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val;
            }
            (
                MbcState::Mbc3 {
                    latch_pending, rtc, ..
                },
                0x6000..=0x7FFF,
            ) => {
                // Writing 0 then 1 latches the clock registers.
                if val == 0 {
                    *latch_pending = true;
                } else {
                    if val == 1 && *latch_pending {
                        if let Some(rtc) = rtc {
                            rtc.latch();
                        }
                    }
                    *latch_pending = false;
                }
            }
            (
                MbcState::Mbc3 {
                    ram_enable,
                    ram_bank,
                    rtc,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if *ram_enable {
                    match *ram_bank {
                        0x00..=0x03 => {
                            let bank = *ram_bank;
                            if let Some(b) = self
                                .ram
                                .get_mut((bank as usize) * RAM_BANK_SIZE + addr as usize - 0xA000)
                            {
                                *b = val;
                            }
                        }
                        0x08..=0x0C => {
                            if let Some(rtc) = rtc.as_mut() {
                                rtc.write_register(*ram_bank, val);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn rom_byte(&self, bank: usize, offset: usize) -> u8 {
        self.rom
            .get(bank * ROM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn ram_index(&self, addr: u16) -> usize {
        let base = addr as usize - 0xA000;
        match &self.mbc_state {
            MbcState::NoMbc => base,
            MbcState::Mbc1 { bank2, mode, .. } => {
                if *mode == 0 || self.num_ram_banks <= 1 {
                    base
                } else {
                    ((*bank2 as usize) % self.num_ram_banks) * RAM_BANK_SIZE + base
                }
            }
            MbcState::Mbc3 { ram_bank, .. } => {
                ((*ram_bank as usize) & 0x03) * RAM_BANK_SIZE + base
            }
        }
    }

    pub fn has_battery(&self) -> bool {
        matches!(self.cart_type, 0x03 | 0x09 | 0x0F | 0x10 | 0x13)
    }

    pub fn num_rom_banks(&self) -> usize {
        self.num_rom_banks
    }

    pub fn num_ram_banks(&self) -> usize {
        self.num_ram_banks
    }

    /// Persist battery-backed RAM to the `.sav` sidecar, when present.
    pub fn save_ram(&self) -> io::Result<()> {
        if let (true, Some(path)) = (self.has_battery(), &self.save_path) {
            if !self.ram.is_empty() {
                fs::write(path, &self.ram)?;
            }
        }
        Ok(())
    }

    pub(crate) fn mapper_regs(&self) -> MapperRegs {
        match &self.mbc_state {
            MbcState::NoMbc => MapperRegs::default(),
            MbcState::Mbc1 {
                rom_bank,
                bank2,
                mode,
                ram_enable,
            } => MapperRegs {
                rom_bank: *rom_bank,
                bank2_or_ram_bank: *bank2,
                mode_or_latch: *mode,
                ram_enable: *ram_enable,
                rtc: None,
            },
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                rtc,
                latch_pending,
            } => MapperRegs {
                rom_bank: *rom_bank,
                bank2_or_ram_bank: *ram_bank,
                mode_or_latch: *latch_pending as u8,
                ram_enable: *ram_enable,
                rtc: rtc.as_ref().map(|r| r.raw()),
            },
        }
    }

    pub(crate) fn restore_mapper_regs(&mut self, regs: MapperRegs) {
        match &mut self.mbc_state {
            MbcState::NoMbc => {}
            MbcState::Mbc1 {
                rom_bank,
                bank2,
                mode,
                ram_enable,
            } => {
                *rom_bank = regs.rom_bank & 0x1F;
                *bank2 = regs.bank2_or_ram_bank & 0x03;
                *mode = regs.mode_or_latch & 0x01;
                *ram_enable = regs.ram_enable;
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                rtc,
                latch_pending,
            } => {
                *rom_bank = regs.rom_bank & 0x7F;
                *ram_bank = regs.bank2_or_ram_bank;
                *ram_enable = regs.ram_enable;
                *latch_pending = regs.mode_or_latch != 0;
                if let (Some(rtc), Some(raw)) = (rtc.as_mut(), regs.rtc) {
                    rtc.restore(raw);
                }
            }
        }
    }
}

/// Flattened mapper register file used by the save-state code.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MapperRegs {
    pub rom_bank: u8,
    pub bank2_or_ram_bank: u8,
    pub mode_or_latch: u8,
    pub ram_enable: bool,
    pub rtc: Option<[u8; 5]>,
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn title(&self) -> String {
        let end = 0x0144.min(self.data.len());
        let mut slice = &self.data[0x0134.min(self.data.len())..end];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data.get(0x0147).copied().unwrap_or(0)
    }

    fn mbc_type(&self) -> MbcType {
        match self.cart_type() {
            0x00 | 0x08 | 0x09 => MbcType::NoMbc,
            0x01..=0x03 => MbcType::Mbc1,
            0x0F..=0x13 => MbcType::Mbc3,
            _ => MbcType::NoMbc,
        }
    }

    fn has_rtc(&self) -> bool {
        matches!(self.cart_type(), 0x0F | 0x10)
    }

    /// ROM size byte encodes 2 * 2^n banks of 16 KiB, for n <= 8.
    fn rom_banks(&self) -> usize {
        let n = self.data.get(0x0148).copied().unwrap_or(0);
        if n <= 8 { 2 << n } else { 2 }
    }

    /// RAM size byte encodes a bank count of 8 KiB banks.
    fn ram_banks(&self) -> usize {
        match self.data.get(0x0149).copied().unwrap_or(0) {
            0x00 => 0,
            0x01 | 0x02 => 1,
            0x03 => 4,
            0x04 => 16,
            0x05 => 8,
            _ => 0,
        }
    }

    /// Global checksum over the whole ROM excluding the checksum bytes
    /// themselves (0x14E-0x14F). Real hardware ignores a mismatch, so the
    /// caller only logs it.
    fn checksum_matches(&self) -> bool {
        if self.data.len() < 0x150 {
            return false;
        }
        let stored = ((self.data[0x14E] as u16) << 8) | self.data[0x14F] as u16;
        let mut sum = 0u16;
        for (i, b) in self.data.iter().enumerate() {
            if i != 0x14E && i != 0x14F {
                sum = sum.wrapping_add(*b as u16);
            }
        }
        sum == stored
    }
}
