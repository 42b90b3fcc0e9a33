// src/utils/system.rs: System functions

use std::path::{Path, PathBuf};

use log::warn;
use sysinfo::System;


/// Number of physical cores, falling back to 1 when it cannot be read.
pub fn physical_cores() -> usize {
    System::physical_core_count().unwrap_or(1)
}

/// Warns when more local processes are requested than there are physical cores.
///
/// # Arguments
///
/// * `nb_process` - Requested number of concurrent processes.
///
/// # Returns
/// true when the request fits the machine.
pub fn check_parallelism(nb_process: usize) -> bool {
    let cores = physical_cores();
    if nb_process > cores {
        warn!(
            "{} processes requested but only {} physical cores detected; running anyway",
            nb_process, cores
        );
        return false;
    }
    true
}

/// Resolves `name` against an optional bin directory, then against PATH.
pub fn find_executable(name: &str, bin_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = bin_dir {
        let candidate = dir.join(name);
        return candidate.is_file().then_some(candidate);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
