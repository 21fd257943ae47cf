/// Pressed-button mask bits accepted by [`Joypad::set_pressed`].
pub const BTN_RIGHT: u8 = 0x01;
pub const BTN_LEFT: u8 = 0x02;
pub const BTN_UP: u8 = 0x04;
pub const BTN_DOWN: u8 = 0x08;
pub const BTN_A: u8 = 0x10;
pub const BTN_B: u8 = 0x20;
pub const BTN_SELECT: u8 = 0x40;
pub const BTN_START: u8 = 0x80;

const IF_JOYPAD: u8 = 0x10;

/// Joypad matrix register (0xFF00).
///
/// The register exposes a 2x4 button matrix: bit 4 selects the d-pad row,
/// bit 5 the button row, and all observable bits are active-low.
pub struct Joypad {
    /// Row select bits as last written (bits 4-5, active-low).
    select: u8,
    /// Currently pressed buttons, active-high, in `BTN_*` layout.
    pressed: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            pressed: 0,
        }
    }

    pub fn read(&self) -> u8 {
        let mut low = 0x0F;
        if self.select & 0x10 == 0 {
            low &= !(self.pressed & 0x0F);
        }
        if self.select & 0x20 == 0 {
            low &= !(self.pressed >> 4);
        }
        0xC0 | self.select | low
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & 0x30;
    }

    /// Replace the pressed-button state. A press appearing on a currently
    /// selected row requests the joypad interrupt.
    pub fn set_pressed(&mut self, pressed: u8, if_reg: &mut u8) {
        let newly = pressed & !self.pressed;
        self.pressed = pressed;

        let mut observed = 0u8;
        if self.select & 0x10 == 0 {
            observed |= newly & 0x0F;
        }
        if self.select & 0x20 == 0 {
            observed |= newly & 0xF0;
        }
        if observed != 0 {
            *if_reg |= IF_JOYPAD;
        }
    }

    pub fn pressed(&self) -> u8 {
        self.pressed
    }

    pub(crate) fn select_bits(&self) -> u8 {
        self.select
    }

    pub(crate) fn restore(&mut self, select: u8, pressed: u8) {
        self.select = select & 0x30;
        self.pressed = pressed;
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_register_reads_high() {
        let joypad = Joypad::new();
        assert_eq!(joypad.read(), 0xFF);
    }

    #[test]
    fn dpad_row_is_active_low() {
        let mut joypad = Joypad::new();
        let mut if_reg = 0;
        joypad.set_pressed(BTN_RIGHT | BTN_DOWN, &mut if_reg);
        joypad.write(0x20); // select d-pad row
        assert_eq!(joypad.read() & 0x0F, 0x06);
        joypad.write(0x10); // select button row: d-pad invisible
        assert_eq!(joypad.read() & 0x0F, 0x0F);
    }

    #[test]
    fn press_on_selected_row_raises_interrupt() {
        let mut joypad = Joypad::new();
        let mut if_reg = 0;
        joypad.write(0x10); // buttons selected
        joypad.set_pressed(BTN_START, &mut if_reg);
        assert_eq!(if_reg, IF_JOYPAD);

        if_reg = 0;
        joypad.set_pressed(BTN_START, &mut if_reg);
        // Held button: no new edge.
        assert_eq!(if_reg, 0);
    }
}
