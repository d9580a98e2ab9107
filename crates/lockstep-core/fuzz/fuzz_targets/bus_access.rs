#![no_main]

use lockstep_core::{AccessFault, Bus, NoCallback, PhysicalMemory, TraceConfig};
use libfuzzer_sys::fuzz_target;

const RAM_BASE: u64 = 0x8000_0000;
const RAM_SIZE: usize = 0x1000;
const UART: u64 = 0x1000_0000;

fn mapped(addr: u64) -> bool {
    (RAM_BASE..RAM_BASE + RAM_SIZE as u64).contains(&addr) || (UART..UART + 8).contains(&addr)
}

fuzz_target!(|data: &[u8]| {
    let mut bus = Bus::new(
        PhysicalMemory::new(RAM_BASE, RAM_SIZE),
        &TraceConfig::all_enabled(),
    );
    if bus
        .register_region("uart", UART, 8, vec![0; 8], NoCallback)
        .is_err()
    {
        return;
    }

    for op in data.chunks_exact(12) {
        let window = match op[0] >> 6 {
            0 | 1 => RAM_BASE,
            2 => UART,
            _ => u64::MAX - 0xFFFF,
        };
        let addr = window.wrapping_add(u64::from(u16::from_le_bytes([op[1], op[2]])));
        let len = usize::from(op[3] & 0x0F);
        let mut value = [0; 8];
        value.copy_from_slice(&op[4..12]);
        let value = u64::from_le_bytes(value);

        let result = match op[0] & 0x03 {
            0 => bus.read(addr, len, 0).map(|_| ()),
            1 => bus.write(addr, len, value, 0),
            2 => bus.fetch(addr, len, 0).map(|_| ()),
            _ => bus.write_masked(addr, op[3], value, 0),
        };
        if let Err(AccessFault::Unmapped { addr }) = result {
            assert!(!mapped(addr), "mapped address {addr:#x} reported as unmapped");
        }
        if result.is_ok() && op[0] & 0x03 != 3 {
            assert!(mapped(addr), "unmapped address {addr:#x} was accepted");
        }
    }
});
