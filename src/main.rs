use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::{self, Read, Write, stdout};
use std::rc::Rc;
use std::cell::RefCell;

use psx_dynarec::{decompress_image, exe, handler_fn, Dynarec, DynarecConfig, ExecMode, Memory};

/// CPU clock: one second of guest time
const CPU_HZ: u64 = 33_868_800;
/// Expansion region 2 DUART transmit register, used by the BIOS TTY
const TTY_TX: u32 = 0x1F80_2023;
/// Debug console port understood by most emulators
const TTY_DEBUG: u32 = 0x1F80_2080;

fn read_file(path: &str) -> io::Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut data = Vec::new();
    f.read_to_end(&mut data)?;
    decompress_image(&data).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut bios_path = String::new();
    let mut exe_path = String::new();
    let mut total_cycles = CPU_HZ;
    let mut slice = 10_000i32;
    let mut interp = false;
    let mut trace = false;
    let mut config = DynarecConfig::from_env();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--exe" => {
                i += 1;
                exe_path = args.get(i).cloned().unwrap_or_default();
            }
            "--cycles" => {
                i += 1;
                total_cycles = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(total_cycles);
            }
            "--slice" => {
                i += 1;
                slice = args.get(i).and_then(|s| s.parse().ok()).filter(|&n| n > 0).unwrap_or(slice);
            }
            "--interp" => {
                interp = true;
            }
            "--no-native" => {
                config.native = false;
            }
            "--trace" => {
                trace = true;
            }
            arg if !arg.starts_with("-") => {
                bios_path = arg.to_string();
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
            }
        }
        i += 1;
    }

    if bios_path.is_empty() {
        eprintln!(
            "Usage: {} <bios> [--exe <file>] [--cycles <n>] [--slice <n>] [--interp] [--no-native] [--trace]",
            args[0]
        );
        std::process::exit(1);
    }
    if interp {
        config.exec_mode = ExecMode::Interpreter;
    }

    println!("psx-dynarec CLI");
    println!("Loading BIOS: {}", bios_path);
    let bios = read_file(&bios_path)?;
    let memory = Memory::new(&bios).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    // Stores that miss RAM: count them per address and echo TTY bytes
    let io_writes: Rc<RefCell<BTreeMap<u32, u64>>> = Rc::new(RefCell::new(BTreeMap::new()));
    let writes = io_writes.clone();
    let handler = handler_fn(move |_bus, value, addr, counter| {
        *writes.borrow_mut().entry(addr).or_insert(0) += 1;
        if addr == TTY_TX || addr == TTY_DEBUG {
            let mut out = stdout();
            let _ = out.write_all(&[value as u8]);
            let _ = out.flush();
        } else if trace {
            eprintln!("[IO] {:#010x} <- {:#010x}", addr, value);
        }
        counter
    });

    let mut dynarec = Dynarec::new(memory, handler, config)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    println!(
        "Mode: {:?}, native: {}",
        dynarec.exec_mode(),
        dynarec.native_enabled()
    );

    if !exe_path.is_empty() {
        println!("Loading EXE: {}", exe_path);
        let data = read_file(&exe_path)?;
        exe::load(&mut dynarec, &data).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    }

    println!("Running {} cycles...", total_cycles);
    println!("-------------------------------------");

    let mut elapsed: u64 = 0;
    while elapsed < total_cycles {
        let chunk = (total_cycles - elapsed).min(slice as u64) as i32;
        let overrun = dynarec
            .run(chunk)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        elapsed += (chunk as i64 + overrun as i64).max(0) as u64;
    }

    let stats = dynarec.stats();
    println!();
    println!("-------------------------------------");
    println!("Cycles:       {}", elapsed);
    println!("PC:           {:#010x}", dynarec.state().pc);
    println!("Translations: {}", stats.translations);
    println!("Invalidated:  {}", stats.invalidations);
    println!("Compactions:  {}", stats.compactions);
    println!("Flushes:      {}", stats.flushes);
    println!("Blocks:       {}", stats.blocks_executed);
    println!("Interpreted:  {}", stats.interpreter_steps);
    println!("Native runs:  {}", stats.native_runs);

    if trace {
        println!("I/O stores:");
        for (addr, count) in io_writes.borrow().iter() {
            println!("  {:#010x}: {}", addr, count);
        }
    }

    Ok(())
}
