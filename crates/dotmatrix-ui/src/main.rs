mod audio;

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use dotmatrix_core::{
    cartridge::Cartridge,
    diagnostics,
    gameboy::GameBoy,
    input,
    ppu::{ColorScheme, SCREEN_HEIGHT, SCREEN_WIDTH},
};
use pixels::{Pixels, SurfaceTexture};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window;

const SCALE: u32 = 3;
const GB_FPS: f64 = 59.7275;
const FRAME_TIME: Duration = Duration::from_nanos((1e9_f64 / GB_FPS) as u64);
const DEFAULT_HEADLESS_FRAMES: u32 = 60;
const MOONEYE_TIMEOUT_FRAMES: u32 = 7200;
const MOONEYE_PASS_REGS: [u8; 6] = [3, 5, 8, 13, 21, 34];
const FALLBACK_SAMPLE_RATE: u32 = 44_100;

#[derive(Parser)]
#[command(name = "dotmatrix", about = "DMG Game Boy emulator", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a ROM file for an interactive windowed run
    rom: Option<PathBuf>,

    /// Path to a 256-byte boot ROM image
    #[arg(long, global = true)]
    bootrom: Option<PathBuf>,

    /// Color scheme for the four DMG shades
    #[arg(long, value_enum, default_value = "green", global = true)]
    scheme: Scheme,

    /// Audio sample rate for headless WAV output
    #[arg(long, default_value_t = FALLBACK_SAMPLE_RATE, global = true)]
    sample_rate: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Headless: advance N frames and dump the framebuffer as a P3 PPM
    Screenshot {
        rom: PathBuf,
        /// Frames to run before the dump
        frames: Option<u32>,
    },
    /// Headless: advance N frames and write the audio as 16-bit PCM mono WAV
    Wav {
        rom: PathBuf,
        /// Frames to run while recording
        frames: Option<u32>,
    },
    /// Headless: run until the ROM executes LD B,B or a timeout expires;
    /// exit 0 if the registers carry the mooneye pass pattern
    Mooneye { rom: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    Green,
    Gray,
}

impl From<Scheme> for ColorScheme {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Green => ColorScheme::Green,
            Scheme::Gray => ColorScheme::Gray,
        }
    }
}

/// Forward core diagnostics into the host logger.
struct CoreLog;

impl diagnostics::LogSink for CoreLog {
    fn log(&self, level: diagnostics::Level, target: &'static str, args: fmt::Arguments) {
        let level = match level {
            diagnostics::Level::Trace => log::Level::Trace,
            diagnostics::Level::Info => log::Level::Info,
            diagnostics::Level::Warn => log::Level::Warn,
        };
        log::log!(target: target, level, "{args}");
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let _ = diagnostics::try_set_log_sink(Box::new(CoreLog));

    let args = Args::parse();
    let scheme = args.scheme.into();

    match args.command {
        Some(Command::Screenshot { rom, frames }) => {
            run_screenshot(&rom, frames.unwrap_or(DEFAULT_HEADLESS_FRAMES), scheme, &args.bootrom)
        }
        Some(Command::Wav { rom, frames }) => run_wav(
            &rom,
            frames.unwrap_or(DEFAULT_HEADLESS_FRAMES),
            args.sample_rate,
            &args.bootrom,
        ),
        Some(Command::Mooneye { rom }) => run_mooneye(&rom, &args.bootrom),
        None => match args.rom {
            Some(rom) => run_windowed(&rom, scheme, &args.bootrom),
            None => {
                eprintln!("no ROM supplied; see --help");
                ExitCode::FAILURE
            }
        },
    }
}

fn load_machine(rom: &Path, scheme: ColorScheme, bootrom: &Option<PathBuf>) -> Option<GameBoy> {
    let cart = match Cartridge::from_file(rom) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load ROM {}: {e}", rom.display());
            return None;
        }
    };

    let mut gb = GameBoy::new();
    gb.load_cart(cart);
    gb.bus.ppu.set_color_scheme(scheme);

    if let Some(path) = bootrom {
        match std::fs::read(path) {
            Ok(data) => gb.load_boot_rom(data),
            Err(e) => eprintln!("failed to load boot ROM {}: {e}", path.display()),
        }
    }
    Some(gb)
}

fn run_screenshot(rom: &Path, frames: u32, scheme: ColorScheme, bootrom: &Option<PathBuf>) -> ExitCode {
    let Some(mut gb) = load_machine(rom, scheme, bootrom) else {
        return ExitCode::FAILURE;
    };
    for _ in 0..frames {
        gb.step_frame();
    }

    let out_path = rom.with_extension("ppm");
    match write_ppm(&out_path, gb.framebuffer()) {
        Ok(()) => {
            println!("wrote {}", out_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to write {}: {e}", out_path.display());
            ExitCode::FAILURE
        }
    }
}

/// Plain-text P3 PPM, one pixel per line group, decoded from the 0xAARRGGBB
/// framebuffer.
fn write_ppm(path: &Path, frame: &[u32]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "P3")?;
    writeln!(w, "{SCREEN_WIDTH} {SCREEN_HEIGHT}")?;
    writeln!(w, "255")?;
    for px in frame {
        let r = (px >> 16) & 0xFF;
        let g = (px >> 8) & 0xFF;
        let b = px & 0xFF;
        writeln!(w, "{r} {g} {b}")?;
    }
    w.flush()
}

fn run_wav(rom: &Path, frames: u32, sample_rate: u32, bootrom: &Option<PathBuf>) -> ExitCode {
    let Some(mut gb) = load_machine(rom, ColorScheme::Green, bootrom) else {
        return ExitCode::FAILURE;
    };
    let consumer = gb.bus.apu.enable_output(sample_rate);

    let out_path = rom.with_extension("wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = match hound::WavWriter::create(&out_path, spec) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("failed to create {}: {e}", out_path.display());
            return ExitCode::FAILURE;
        }
    };

    let mut written = 0u64;
    for _ in 0..frames {
        gb.step_frame();
        while let Some(sample) = consumer.pop() {
            let val = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            if writer.write_sample(val).is_err() {
                eprintln!("failed while writing {}", out_path.display());
                return ExitCode::FAILURE;
            }
            written += 1;
        }
    }

    if let Err(e) = writer.finalize() {
        eprintln!("failed to finalize {}: {e}", out_path.display());
        return ExitCode::FAILURE;
    }
    println!("wrote {written} samples to {}", out_path.display());
    ExitCode::SUCCESS
}

/// Mooneye quit protocol: a pass or fail is signaled by executing LD B,B
/// (0x40) with B,C,D,E,H,L holding Fibonacci numbers on pass.
fn run_mooneye(rom: &Path, bootrom: &Option<PathBuf>) -> ExitCode {
    let Some(mut gb) = load_machine(rom, ColorScheme::Green, bootrom) else {
        return ExitCode::FAILURE;
    };

    let mut frames = 0u32;
    while frames < MOONEYE_TIMEOUT_FRAMES {
        if gb.bus.read(gb.cpu.pc) == 0x40 {
            let regs = [gb.cpu.b, gb.cpu.c, gb.cpu.d, gb.cpu.e, gb.cpu.h, gb.cpu.l];
            if regs == MOONEYE_PASS_REGS {
                println!("passed");
                return ExitCode::SUCCESS;
            }
            println!("failed: regs {regs:02X?} at pc {:04X}", gb.cpu.pc);
            return ExitCode::FAILURE;
        }
        if gb.step() {
            frames += 1;
        }
    }

    println!("timeout after {MOONEYE_TIMEOUT_FRAMES} frames");
    println!("{}", gb.cpu.debug_state());
    ExitCode::FAILURE
}

fn key_mask(code: KeyCode) -> Option<u8> {
    match code {
        KeyCode::ArrowRight => Some(input::BTN_RIGHT),
        KeyCode::ArrowLeft => Some(input::BTN_LEFT),
        KeyCode::ArrowUp => Some(input::BTN_UP),
        KeyCode::ArrowDown => Some(input::BTN_DOWN),
        KeyCode::KeyX => Some(input::BTN_A),
        KeyCode::KeyZ => Some(input::BTN_B),
        KeyCode::ShiftLeft | KeyCode::ShiftRight => Some(input::BTN_SELECT),
        KeyCode::Enter => Some(input::BTN_START),
        _ => None,
    }
}

fn draw_frame(pixels: &mut Pixels<'_>, frame: &[u32]) {
    for (dst, &src) in pixels.frame_mut().chunks_exact_mut(4).zip(frame.iter()) {
        dst[0] = ((src >> 16) & 0xFF) as u8;
        dst[1] = ((src >> 8) & 0xFF) as u8;
        dst[2] = (src & 0xFF) as u8;
        dst[3] = 0xFF;
    }
}

fn run_windowed(rom: &Path, scheme: ColorScheme, bootrom: &Option<PathBuf>) -> ExitCode {
    let Some(mut gb) = load_machine(rom, scheme, bootrom) else {
        return ExitCode::FAILURE;
    };

    let sample_rate = audio::preferred_sample_rate().unwrap_or(FALLBACK_SAMPLE_RATE);
    let consumer = gb.bus.apu.enable_output(sample_rate);
    let _stream = audio::start_stream(consumer);

    let event_loop = match EventLoop::builder().build() {
        Ok(el) => el,
        Err(e) => {
            eprintln!("failed to create event loop: {e}");
            return ExitCode::FAILURE;
        }
    };

    let attrs = Window::default_attributes()
        .with_title("dotmatrix")
        .with_inner_size(LogicalSize::new(
            (SCREEN_WIDTH as u32 * SCALE) as f64,
            (SCREEN_HEIGHT as u32 * SCALE) as f64,
        ));
    #[allow(deprecated)]
    let window = match event_loop.create_window(attrs) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            eprintln!("failed to create window: {e}");
            return ExitCode::FAILURE;
        }
    };

    let size = window.inner_size();
    let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
    let mut pixels = match Pixels::new(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, surface) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to create surface: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut pressed = 0u8;
    let mut next_frame = Instant::now() + FRAME_TIME;

    #[allow(deprecated)]
    let result = event_loop.run(move |event, target| {
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    gb.bus.save_cart_ram();
                    target.exit();
                }
                WindowEvent::Resized(size) => {
                    if pixels.resize_surface(size.width, size.height).is_err() {
                        target.exit();
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        let down = event.state == ElementState::Pressed;
                        if code == KeyCode::Escape {
                            if down {
                                gb.bus.save_cart_ram();
                                target.exit();
                            }
                        } else if let Some(mask) = key_mask(code) {
                            if down {
                                pressed |= mask;
                            } else {
                                pressed &= !mask;
                            }
                            gb.set_input(pressed);
                        }
                    }
                }
                WindowEvent::RedrawRequested => {
                    draw_frame(&mut pixels, gb.framebuffer());
                    if pixels.render().is_err() {
                        target.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                gb.step_frame();
                gb.bus.ppu.clear_frame_flag();

                // Pace to hardware speed; spin out the rest of the slot.
                target.set_control_flow(ControlFlow::WaitUntil(next_frame));
                while Instant::now() < next_frame {
                    std::hint::spin_loop();
                }
                next_frame += FRAME_TIME;
                window.request_redraw();
            }
            _ => {}
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("event loop error: {e}");
            ExitCode::FAILURE
        }
    }
}
