mod cli;
mod error;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use cli::Cli;
use error::{CliError, LoadError};
use rv_machine::Machine;

/// Gap left after the kernel image before the initrd is placed, matching
/// the original's convention of putting the ramdisk well past any kernel
/// BSS/stack rather than computing the kernel's true end.
const INITRD_OFFSET: u32 = 16 * 1024 * 1024;

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new().filter_level(cli.log_level()).init();

    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<i32, CliError> {
    let kernel_path = cli.kernel.as_ref().ok_or(CliError::NoKernel)?;
    if cli.ram_size == 0 {
        return Err(CliError::EmptyRam);
    }
    if cli.net_backend.is_some() {
        log::warn!("network backends are not modeled; -n/--net is accepted but ignored");
    }
    if cli.shared_dir.is_some() {
        log::warn!("host-directory sharing is not modeled; -s/--shared-dir is accepted but ignored");
    }

    let kernel = read_image(kernel_path)?;
    let initrd = cli.initrd.as_deref().map(read_image).transpose()?;
    let dtb = cli.dtb.as_deref().map(read_image).transpose()?;

    let dtb_addr = dtb
        .as_ref()
        .map(|d| place_at_top(d, cli.ram_size, "dtb"))
        .transpose()?
        .unwrap_or(0);

    let mut machine = Machine::new(cli.ram_size, cli.n_harts, dtb_addr, 10_000_000);

    place(&mut machine, rv_ram::RAM_BASE, &kernel, "kernel")?;
    if let Some(initrd) = &initrd {
        place(&mut machine, rv_ram::RAM_BASE + INITRD_OFFSET, initrd, "initrd")?;
    }
    if let Some(dtb) = &dtb {
        place(&mut machine, dtb_addr, dtb, "dtb")?;
    }

    if let Some(disk_path) = &cli.disk_image {
        let disk = rv_devices::Disk::open(disk_path).map_err(|source| LoadError::Disk {
            path: disk_path.clone(),
            source,
        })?;
        log::info!("disk image {} attached ({} bytes)", disk_path.display(), disk.len());
        machine.attach_disk(disk);
    }

    log::info!(
        "booting {} hart(s), {} MiB RAM, kernel={}",
        cli.n_harts,
        cli.ram_size / (1024 * 1024),
        kernel_path.display()
    );

    Ok(machine.run())
}

fn read_image(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Anchor a blob's load address to the top of RAM, rounded down to an
/// 8-byte boundary as the original firmware expects for the DTB pointer.
fn place_at_top(data: &[u8], ram_size: usize, image: &'static str) -> Result<u32, LoadError> {
    let top = ram_size.checked_sub(data.len()).ok_or(LoadError::DoesNotFit {
        image,
        len: data.len(),
        ram_size,
        offset: 0,
    })?;
    Ok(rv_ram::RAM_BASE + (top as u32 & !0x7))
}

fn place(machine: &mut Machine, addr: u32, data: &[u8], image: &'static str) -> Result<(), LoadError> {
    machine
        .load_image(addr, data)
        .map_err(|source| LoadError::Place { image, source })
}
