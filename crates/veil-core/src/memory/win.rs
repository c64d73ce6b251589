//! Windows implementations of the memory primitives.

use std::ffi::c_void;

use tracing::debug;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    VirtualQuery,
};
use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::HSTRING;

use crate::error::{Error, Result};
use crate::memory::{MIN_SANE_ADDRESS, MemoryRegion, QueryExecutable};

/// Image range of a module already loaded into the current process.
pub fn module_region(module: &str) -> Result<MemoryRegion> {
    let name = HSTRING::from(module);

    // SAFETY: GetModuleHandleW does not take ownership of the handle; the
    // module stays loaded for the lifetime of the returned range only as
    // long as the host keeps it loaded, which is the premise of scanning it.
    let handle = unsafe { GetModuleHandleW(&name) }
        .map_err(|_| Error::ModuleNotFound(module.to_string()))?;

    let mut info = MODULEINFO::default();
    // SAFETY: GetModuleInformation fills MODULEINFO for a valid handle of
    // the current process.
    unsafe {
        GetModuleInformation(
            GetCurrentProcess(),
            handle,
            &mut info,
            std::mem::size_of::<MODULEINFO>() as u32,
        )
    }
    .map_err(|_| Error::ModuleNotFound(module.to_string()))?;

    let start = info.lpBaseOfDll as usize;
    let end = start + info.SizeOfImage as usize;

    let region =
        MemoryRegion::new(start, end).ok_or_else(|| Error::ModuleNotFound(module.to_string()))?;

    debug!(
        module,
        start = format_args!("{:#x}", region.start),
        end = format_args!("{:#x}", region.end),
        "resolved module image range"
    );

    Ok(region)
}

/// `VirtualQuery`-backed executable-address gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageProtectionQuery;

impl QueryExecutable for PageProtectionQuery {
    fn is_executable(&self, address: usize) -> bool {
        if address < MIN_SANE_ADDRESS {
            return false;
        }

        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: VirtualQuery is safe to call with any address; a zero
        // return means the query failed and we fail closed.
        let written = unsafe {
            VirtualQuery(
                Some(address as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if written == 0 {
            return false;
        }

        let executable = PAGE_EXECUTE | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE;
        info.State == MEM_COMMIT && (info.Protect & executable).0 != 0
    }
}
