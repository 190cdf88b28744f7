//! Command-line surface (spec.md §6): `emulator [-k kernel] [-i initrd]
//! [-b dtb] [-d disk_image] [-c n_harts] [-n net_backend] [-s shared_dir]`.

use clap::Parser;
use std::path::PathBuf;

/// Boot and run a bare-metal RV32 image on a multi-hart ACLINT/PLIC/SBI
/// platform.
#[derive(Parser, Debug)]
#[clap(name = "emulator", version, about, long_about = None)]
pub struct Cli {
    /// Kernel (or other first-stage) image, loaded at RAM's base address.
    #[clap(short = 'k', long = "kernel")]
    pub kernel: Option<PathBuf>,

    /// Initial ramdisk, loaded immediately after the kernel image.
    #[clap(short = 'i', long = "initrd")]
    pub initrd: Option<PathBuf>,

    /// Flattened device tree blob, loaded at the end of RAM and pointed to
    /// by `a1` on hart 0's reset.
    #[clap(short = 'b', long = "dtb")]
    pub dtb: Option<PathBuf>,

    /// Disk image backing the virtio-blk-style device.
    #[clap(short = 'd', long = "disk-image")]
    pub disk_image: Option<PathBuf>,

    /// Number of harts to boot.
    #[clap(short = 'c', long = "n-harts", default_value_t = 1)]
    pub n_harts: usize,

    /// Network backend selector. Accepted for command-line compatibility
    /// with scripts written against the original tool; this build has no
    /// network device, so the value is parsed and otherwise ignored.
    #[clap(short = 'n', long = "net")]
    pub net_backend: Option<String>,

    /// Host directory to share with the guest. Accepted the same way as
    /// `net_backend` — no virtio-fs/plan9 transport exists here.
    #[clap(short = 's', long = "shared-dir")]
    pub shared_dir: Option<PathBuf>,

    /// RAM size in bytes. The original hardcodes this at kernel link time;
    /// a hosted emulator has no link step, so it's a flag instead.
    #[clap(long = "ram-size", default_value_t = 128 * 1024 * 1024)]
    pub ram_size: usize,

    /// Increase log verbosity (`-v` = debug, `-vv` = trace).
    #[clap(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence all logging below `error`.
    #[clap(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            log::LevelFilter::Error
        } else {
            match self.verbose {
                0 => log::LevelFilter::Info,
                1 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            }
        }
    }
}
