//! Startup-time error taxonomy (SPEC_FULL.md §7): anything that keeps the
//! machine from ever reaching `run()` is a [`CliError`], reported to
//! stderr and mapped to exit code 2 per spec.md §6.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("no kernel image given (-k/--kernel)")]
    NoKernel,

    #[error("--ram-size must be nonzero")]
    EmptyRam,

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{image} image of {len} bytes does not fit in {ram_size}-byte RAM at offset {offset:#x}")]
    DoesNotFit {
        image: &'static str,
        len: usize,
        ram_size: usize,
        offset: u32,
    },

    #[error("failed to place {image} image in guest RAM: {source}")]
    Place {
        image: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open disk image {path}: {source}")]
    Disk {
        path: PathBuf,
        #[source]
        source: rv_devices::DiskError,
    },
}
