//! Reference model loaded from a shared object exporting the `difftest_*` ABI.
//!
//! On glibc targets the object is opened with `RTLD_DEEPBIND` so that its
//! internal globals bind to its own definitions even when the host defines
//! symbols with the same names.
//!
//! Register buffers use the reference's `CPU_state` layout: `gpr_count`
//! xlen-wide integer registers followed by the PC. CSR buffers hold `mstatus`,
//! `mtvec`, `mepc` and `mcause` in that order. Reads go through a zeroed
//! scratch area larger than any known state struct, and writes patch a fresh
//! read-back so trailing fields the reference keeps are preserved.

#![allow(unsafe_code)]

use std::ffi::{c_int, c_void};
use std::fmt;
use std::path::Path;

use libloading::Library;

use super::ReferenceCpu;
use crate::config::Xlen;
use crate::state::{ArchitecturalState, TrapCsrs, GPR_COUNT};
use crate::ConfigError;

/// Entry points every reference object must export.
pub const REQUIRED_SYMBOLS: [&str; 9] = [
    "difftest_memcpy",
    "difftest_regcpy",
    "difftest_csrcpy",
    "difftest_exec",
    "difftest_guided_exec",
    "difftest_store_commit",
    "difftest_raise_intr",
    "difftest_cosim_end",
    "difftest_init",
];

const TO_DUT: bool = false;
const TO_REF: bool = true;
const SCRATCH_BYTES: usize = 4096;

// `paddr_t` is 32 or 64 bits depending on the reference build. Passing it as a
// zero-extended 64-bit integer is correct for both under the C calling
// conventions of the supported hosts.
type MemcpyFn = unsafe extern "C" fn(u64, *mut c_void, usize, bool);
// `difftest_regcpy` takes a trailing flag selecting a partial copy; a full
// copy is always requested.
type RegcpyFn = unsafe extern "C" fn(*mut c_void, bool, bool);
type CsrcpyFn = unsafe extern "C" fn(*mut c_void, bool);
type ExecFn = unsafe extern "C" fn(u64);
type GuidedExecFn = unsafe extern "C" fn(*mut c_void) -> u64;
type StoreCommitFn = unsafe extern "C" fn(u64, u64) -> c_int;
type RaiseIntrFn = unsafe extern "C" fn(u64);
type CosimEndFn = unsafe extern "C" fn() -> c_int;
type InitFn = unsafe extern "C" fn();

#[derive(Clone, Copy)]
enum Bank {
    Registers,
    Csrs,
}

#[derive(Clone, Copy)]
struct EntryPoints {
    memcpy: MemcpyFn,
    regcpy: RegcpyFn,
    csrcpy: CsrcpyFn,
    exec: ExecFn,
    guided_exec: GuidedExecFn,
    store_commit: StoreCommitFn,
    raise_intr: RaiseIntrFn,
    cosim_end: CosimEndFn,
}

/// A reference CPU living in a dynamically loaded object.
///
/// The object is unloaded when this value is dropped.
pub struct DylibReference {
    path: String,
    xlen: Xlen,
    gpr_count: usize,
    entry: EntryPoints,
    scratch: Vec<u8>,
    // Declared last: the entry points above must not outlive the mapping.
    _library: Library,
}

impl fmt::Debug for DylibReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibReference")
            .field("path", &self.path)
            .field("xlen", &self.xlen)
            .field("gpr_count", &self.gpr_count)
            .finish_non_exhaustive()
    }
}

fn open(path: &Path) -> Result<Library, libloading::Error> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL};
        // SAFETY: running the object's initializers is the point of loading
        // it; the reference ABI places no other requirement on the host.
        unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_LOCAL | libc::RTLD_DEEPBIND) }
            .map(Library::from)
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        // SAFETY: as above.
        unsafe { Library::new(path) }
    }
}

fn resolve<T: Copy>(library: &Library, path: &str, name: &'static str) -> Result<T, ConfigError> {
    // SAFETY: callers pick `T` to match the C prototype of `name`.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|_| ConfigError::MissingSymbol {
            path: path.to_owned(),
            symbol: name,
        })
}

impl DylibReference {
    /// Opens `path`, resolves every entry in [`REQUIRED_SYMBOLS`] and runs
    /// `difftest_init`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::LibraryLoad`] when the object cannot be opened,
    /// [`ConfigError::MissingSymbol`] for the first unresolved entry point.
    pub fn load(path: &Path, xlen: Xlen, gpr_count: usize) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let library = open(path).map_err(|err| ConfigError::LibraryLoad {
            path: display.clone(),
            reason: err.to_string(),
        })?;

        let [memcpy, regcpy, csrcpy, exec, guided_exec, store_commit, raise_intr, cosim_end, init] =
            REQUIRED_SYMBOLS;
        let entry = EntryPoints {
            memcpy: resolve(&library, &display, memcpy)?,
            regcpy: resolve(&library, &display, regcpy)?,
            csrcpy: resolve(&library, &display, csrcpy)?,
            exec: resolve(&library, &display, exec)?,
            guided_exec: resolve(&library, &display, guided_exec)?,
            store_commit: resolve(&library, &display, store_commit)?,
            raise_intr: resolve(&library, &display, raise_intr)?,
            cosim_end: resolve(&library, &display, cosim_end)?,
        };
        let init: InitFn = resolve(&library, &display, init)?;

        // SAFETY: `init` was resolved from `library`, which is still loaded.
        unsafe { init() };
        log::info!("Using {display} for difftest");

        Ok(Self {
            path: display,
            xlen,
            gpr_count: gpr_count.min(GPR_COUNT),
            entry,
            scratch: vec![0; SCRATCH_BYTES],
            _library: library,
        })
    }

    /// Path the object was loaded from.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn put_word(&mut self, slot: usize, value: u64) {
        let offset = slot * self.xlen.bytes();
        match self.xlen {
            Xlen::Rv32 => {
                #[allow(clippy::cast_possible_truncation)]
                let word = value as u32;
                self.scratch[offset..offset + 4].copy_from_slice(&word.to_ne_bytes());
            }
            Xlen::Rv64 => {
                self.scratch[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
            }
        }
    }

    fn get_word(&self, slot: usize) -> u64 {
        let offset = slot * self.xlen.bytes();
        match self.xlen {
            Xlen::Rv32 => {
                let mut word = [0; 4];
                word.copy_from_slice(&self.scratch[offset..offset + 4]);
                u64::from(u32::from_ne_bytes(word))
            }
            Xlen::Rv64 => {
                let mut word = [0; 8];
                word.copy_from_slice(&self.scratch[offset..offset + 8]);
                u64::from_ne_bytes(word)
            }
        }
    }

    fn transfer(&mut self, bank: Bank, direction: bool) {
        if direction == TO_DUT {
            self.scratch.fill(0);
        }
        let buf = self.scratch.as_mut_ptr().cast();
        // SAFETY: `scratch` is larger than the reference's state structs. With
        // `TO_DUT` the reference writes within its struct, with `TO_REF` it
        // only reads.
        unsafe {
            match bank {
                Bank::Registers => (self.entry.regcpy)(buf, direction, false),
                Bank::Csrs => (self.entry.csrcpy)(buf, direction),
            }
        }
    }

    fn pull(&mut self, bank: Bank) {
        self.transfer(bank, TO_DUT);
    }

    fn push(&mut self, bank: Bank) {
        self.transfer(bank, TO_REF);
    }
}

impl ReferenceCpu for DylibReference {
    fn memcpy_to_ref(&mut self, addr: u64, bytes: &[u8]) {
        // SAFETY: with `TO_REF` the reference reads `bytes.len()` bytes from the buffer.
        unsafe {
            (self.entry.memcpy)(addr, bytes.as_ptr().cast_mut().cast(), bytes.len(), TO_REF);
        }
    }

    fn memcpy_from_ref(&mut self, addr: u64, buf: &mut [u8]) {
        // SAFETY: with `TO_DUT` the reference writes `buf.len()` bytes into the buffer.
        unsafe {
            (self.entry.memcpy)(addr, buf.as_mut_ptr().cast(), buf.len(), TO_DUT);
        }
    }

    fn regcpy_to_ref(&mut self, state: &ArchitecturalState) {
        self.pull(Bank::Registers);
        for index in 0..self.gpr_count {
            self.put_word(index, state.gpr(index));
        }
        self.put_word(self.gpr_count, state.pc());
        self.push(Bank::Registers);
    }

    fn regcpy_from_ref(&mut self) -> ArchitecturalState {
        self.pull(Bank::Registers);
        let mut gpr = [0; GPR_COUNT];
        for (index, value) in gpr.iter_mut().enumerate().take(self.gpr_count) {
            *value = self.get_word(index);
        }
        let pc = self.get_word(self.gpr_count);
        ArchitecturalState::from_raw(gpr, pc, TrapCsrs::default())
    }

    fn csrcpy_to_ref(&mut self, csrs: &TrapCsrs) {
        self.pull(Bank::Csrs);
        for (slot, value) in csrs.to_array().into_iter().enumerate() {
            self.put_word(slot, value);
        }
        self.push(Bank::Csrs);
    }

    fn csrcpy_from_ref(&mut self) -> TrapCsrs {
        self.pull(Bank::Csrs);
        TrapCsrs::from_array([
            self.get_word(0),
            self.get_word(1),
            self.get_word(2),
            self.get_word(3),
        ])
    }

    fn exec(&mut self, n: u64) {
        // SAFETY: plain value argument.
        unsafe { (self.entry.exec)(n) };
    }

    fn guided_exec(&mut self, target_pc: u64) -> u64 {
        let mut guide = target_pc;
        // SAFETY: the reference reads the target PC through the pointer for
        // the duration of the call only.
        let reached = unsafe { (self.entry.guided_exec)(std::ptr::from_mut(&mut guide).cast()) };
        reached & self.xlen.mask()
    }

    fn store_commit(&mut self, addr: u64, data: u64) -> bool {
        // SAFETY: plain value arguments.
        unsafe { (self.entry.store_commit)(addr, data) == 0 }
    }

    fn raise_intr(&mut self, cause: u64) {
        // SAFETY: plain value argument.
        unsafe { (self.entry.raise_intr)(cause) };
    }

    fn cosim_end(&mut self) -> bool {
        // SAFETY: no arguments.
        unsafe { (self.entry.cosim_end)() != 0 }
    }
}

impl Drop for DylibReference {
    fn drop(&mut self) {
        log::info!("difftest: unloading {}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::{DylibReference, REQUIRED_SYMBOLS};
    use crate::config::Xlen;
    use crate::ConfigError;

    #[test]
    fn missing_object_is_a_load_error() {
        let err = DylibReference::load(
            std::path::Path::new("/nonexistent/riscv32-nemu-interpreter-so"),
            Xlen::Rv32,
            32,
        )
        .expect_err("object does not exist");
        assert!(
            matches!(err, ConfigError::LibraryLoad { ref path, .. } if path.ends_with("interpreter-so"))
        );
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn object_without_entry_points_is_rejected() {
        let err = DylibReference::load(std::path::Path::new("libm.so.6"), Xlen::Rv32, 32)
            .expect_err("libm exports no difftest entry points");
        assert_eq!(
            err,
            ConfigError::MissingSymbol {
                path: "libm.so.6".to_owned(),
                symbol: "difftest_memcpy",
            }
        );
    }

    #[test]
    fn init_is_resolved_last() {
        assert_eq!(REQUIRED_SYMBOLS.last(), Some(&"difftest_init"));
        assert_eq!(REQUIRED_SYMBOLS.len(), 9);
    }
}
