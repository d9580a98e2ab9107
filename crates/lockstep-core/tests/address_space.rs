//! Address space routing, region registration and RAM round-trip coverage.

#![allow(clippy::pedantic, clippy::nursery, clippy::cast_possible_truncation)]

use std::cell::RefCell;
use std::rc::Rc;

use libloading as _;
#[cfg(all(target_os = "linux", target_env = "gnu"))]
use libc as _;
use lockstep_core::{
    AccessFault, ConfigError, Machine, MachineConfig, NoCallback, TraceConfig, MMIO_MAP_CAPACITY,
};
use log as _;
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const UART: u64 = 0x1000_0000;

fn machine() -> Machine {
    Machine::new(MachineConfig {
        trace: TraceConfig::all_enabled(),
        ..MachineConfig::default()
    })
    .expect("default config is valid")
}

#[test]
fn uart_read_dispatches_to_callback_and_timer_overlap_names_uart() {
    let mut machine = machine();
    assert_eq!(machine.bus().ram().low(), 0x8000_0000);
    assert_eq!(machine.bus().ram().high(), 0x87FF_FFFF);

    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&calls);
    machine
        .register_region(
            "uart",
            UART,
            8,
            vec![0; 8],
            move |space: &mut [u8], offset: usize, len: usize, is_write: bool| {
                log.borrow_mut().push((offset, len, is_write));
                if !is_write {
                    space[5] = 0x20;
                }
            },
        )
        .expect("uart is disjoint from ram");

    assert_eq!(machine.read(UART + 5, 1), Ok(0x20));
    assert_eq!(*calls.borrow(), vec![(5, 1, false)]);

    let err = machine
        .register_region("timer", 0x1000_0004, 8, vec![0; 8], NoCallback)
        .expect_err("timer overlaps uart");
    assert!(matches!(err, ConfigError::RegionOverlap { ref other, .. } if other == "uart"));
    assert!(err.to_string().contains("uart@[0x10000000, 0x10000007]"));
    assert!(machine.bus().mmio().by_name("timer").is_none());
}

#[test]
fn device_write_reaches_callback_after_landing() {
    let mut machine = machine();
    let out = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&out);
    machine
        .register_region(
            "serial",
            UART,
            8,
            vec![0; 8],
            move |space: &mut [u8], offset: usize, _len: usize, is_write: bool| {
                if is_write && offset == 0 {
                    sink.borrow_mut().push(char::from(space[0]));
                }
            },
        )
        .expect("disjoint");

    for byte in b"ok\n" {
        machine.write(UART, 1, u64::from(*byte)).expect("mapped");
    }
    assert_eq!(*out.borrow(), "ok\n");

    let dump = machine.diagnostics().devices.expect("device trace enabled");
    assert!(dump.starts_with("Last 3 device accesses:"));
    assert!(dump.lines().skip(1).all(|line| line.trim_start().starts_with('W')));
}

#[test]
fn table_rejects_seventeenth_region() {
    let mut machine = machine();
    for idx in 0..MMIO_MAP_CAPACITY as u64 {
        machine
            .register_region(&format!("dev{idx}"), 0xA000_0000 + idx * 0x100, 0x100, vec![0; 0x100], NoCallback)
            .expect("disjoint");
    }
    assert!(matches!(
        machine.register_region("late", 0xB000_0000, 4, vec![0; 4], NoCallback),
        Err(ConfigError::RegionTableFull { .. })
    ));
}

#[rstest]
#[case(0x0000_0000)]
#[case(0x7FFF_FFFF)]
#[case(0x8800_0000)]
#[case(0x1000_0008)]
fn unmapped_addresses_fault(#[case] addr: u64) {
    let mut machine = machine();
    machine
        .register_region("uart", UART, 8, vec![0; 8], NoCallback)
        .expect("disjoint");
    assert_eq!(machine.read(addr, 4), Err(AccessFault::Unmapped { addr }));
    assert_eq!(machine.write(addr, 4, 0), Err(AccessFault::Unmapped { addr }));
}

#[test]
fn ram_tail_access_is_out_of_bounds() {
    let mut machine = machine();
    assert!(matches!(
        machine.read(0x87FF_FFFE, 4),
        Err(AccessFault::RamOutOfBounds { .. })
    ));
    assert_eq!(machine.read(0x87FF_FFFC, 4), Ok(0));
}

fn small_machine() -> Machine {
    Machine::new(MachineConfig {
        ram_size: 0x1000,
        ..MachineConfig::default()
    })
    .expect("valid config")
}

proptest! {
    #[test]
    fn ram_read_after_write_is_truncated(
        offset in 0_u64..0xFF8,
        width in prop::sample::select(vec![1_usize, 2, 4, 8]),
        value in any::<u64>(),
    ) {
        let mut machine = small_machine();
        let addr = 0x8000_0000 + offset;
        machine.write(addr, width, value).expect("in ram");
        let expected = if width == 8 { value } else { value & ((1 << (width * 8)) - 1) };
        prop_assert_eq!(machine.read(addr, width), Ok(expected));
    }

    #[test]
    fn find_returns_unique_region_or_none(
        regions in proptest::collection::vec((0_u64..64, 1_u64..8), 1..16),
        lookup in 0_u64..0x80,
    ) {
        let mut machine = small_machine();
        for (idx, (slot, len)) in regions.iter().enumerate() {
            let _ = machine.register_region(&format!("r{idx}"), UART + slot, *len, vec![0; *len as usize], NoCallback);
        }
        let addr = UART + lookup;
        let containing: Vec<_> = machine
            .bus()
            .mmio()
            .iter()
            .filter(|region| region.contains(addr))
            .map(|region| region.name().to_owned())
            .collect();
        prop_assert!(containing.len() <= 1);
        prop_assert_eq!(
            machine.bus().mmio().find(addr).map(|region| region.name().to_owned()),
            containing.into_iter().next()
        );
    }
}
