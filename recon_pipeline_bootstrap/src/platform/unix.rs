// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Unix Platform Implementation
//!
//! POSIX implementation covering Linux and macOS via `libc` and `/proc`.
//!
//! ## Unix APIs Used
//!
//! - `sysconf(_SC_PAGESIZE)` / `sysconf(_SC_NPROCESSORS_ONLN)` - page size, CPU count
//! - `/proc/meminfo` on Linux, `sysconf(_SC_PHYS_PAGES)` fallback elsewhere - memory
//! - `geteuid()` - privilege checking
//! - `std::os::unix::fs::PermissionsExt` - permission bits and the execute bit

use super::{Platform, PlatformError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Unix platform implementation (Linux, macOS, BSD).
pub struct UnixPlatform;

impl UnixPlatform {
    pub fn new() -> Self {
        Self
    }

    fn sysconf(name: libc::c_int) -> Option<i64> {
        let value = unsafe { libc::sysconf(name) };
        if value < 0 {
            None
        } else {
            Some(value)
        }
    }

    fn total_memory_impl() -> Result<u64, PlatformError> {
        let pages = Self::sysconf(libc::_SC_PHYS_PAGES).ok_or_else(|| PlatformError::Other("sysconf(_SC_PHYS_PAGES) failed".to_string()))?;
        let page_size = Self::sysconf(libc::_SC_PAGESIZE).ok_or_else(|| PlatformError::Other("sysconf(_SC_PAGESIZE) failed".to_string()))?;
        Ok(pages as u64 * page_size as u64)
    }

    fn available_memory_impl() -> Result<u64, PlatformError> {
        if let Some(kib) = Self::read_proc_meminfo_field("MemAvailable:") {
            return Ok(kib * 1024);
        }
        let pages =
            Self::sysconf(libc::_SC_AVPHYS_PAGES).ok_or_else(|| PlatformError::Other("sysconf(_SC_AVPHYS_PAGES) failed".to_string()))?;
        let page_size = Self::sysconf(libc::_SC_PAGESIZE).ok_or_else(|| PlatformError::Other("sysconf(_SC_PAGESIZE) failed".to_string()))?;
        Ok(pages as u64 * page_size as u64)
    }

    /// Reads a single `Field: N kB` line out of `/proc/meminfo`. Returns `None`
    /// on non-Linux Unix (no `/proc`) or if the field is absent.
    fn read_proc_meminfo_field(field: &str) -> Option<u64> {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        contents.lines().find_map(|line| {
            if !line.starts_with(field) {
                return None;
            }
            line.split_whitespace().nth(1)?.parse().ok()
        })
    }
}

impl Default for UnixPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for UnixPlatform {
    fn page_size(&self) -> usize {
        Self::sysconf(libc::_SC_PAGESIZE).unwrap_or(4096) as usize
    }

    fn cpu_count(&self) -> usize {
        Self::sysconf(libc::_SC_NPROCESSORS_ONLN).unwrap_or(1).max(1) as usize
    }

    fn total_memory(&self) -> Result<u64, PlatformError> {
        Self::total_memory_impl()
    }

    fn available_memory(&self) -> Result<u64, PlatformError> {
        Self::available_memory_impl()
    }

    fn line_separator(&self) -> &'static str {
        "\n"
    }

    fn path_separator(&self) -> char {
        ':'
    }

    fn platform_name(&self) -> &'static str {
        if cfg!(target_os = "macos") {
            "macos"
        } else {
            "linux"
        }
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn is_elevated(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), PlatformError> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    async fn sync_file(&self, file: &tokio::fs::File) -> Result<(), PlatformError> {
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_platform_basics() {
        let platform = UnixPlatform::new();
        assert!(platform.cpu_count() >= 1);
        let page_size = platform.page_size();
        assert!(page_size >= 512);
        assert!(page_size <= 65536);
    }

    #[test]
    fn test_unix_platform_constants() {
        let platform = UnixPlatform::new();
        assert_eq!(platform.line_separator(), "\n");
        assert_eq!(platform.path_separator(), ':');
    }

    #[test]
    fn test_total_memory_is_positive() {
        let platform = UnixPlatform::new();
        assert!(platform.total_memory().unwrap() > 0);
    }

    #[test]
    fn test_is_executable() {
        let platform = UnixPlatform::new();
        assert!(platform.is_executable(Path::new("/bin/sh")) || platform.is_executable(Path::new("/usr/bin/env")));
        assert!(!platform.is_executable(Path::new("/this/path/does/not/exist")));
    }
}
