// Copyright 2021 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped model of the convolution accelerator and its bare-metal driver.

use crate::conv::{sign_extend, wrapping_dot};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use PeriphReq::{Load, Store};

/// AXI base address of the accelerator in the reference SoC.
pub const CNN_BASE_ADDR: u32 = 0x43C0_0000;
/// Control register: bit 0 starts, bit 1 signals done.
pub const REG_CTRL: u32 = 0x00;
/// First input sample register; taps follow at 4-byte stride.
pub const REG_IN0: u32 = 0x04;
/// First kernel weight register; taps follow at 4-byte stride.
pub const REG_W0: u32 = 0x28;
/// Result register.
pub const REG_OUT: u32 = 0x4C;
/// Number of taps latched by the accelerator.
pub const TAPS: usize = 9;
/// Size of the register window.
pub const REG_SPACE: u32 = 0x50;

const CTRL_START: u32 = 0x1;
const CTRL_DONE: u32 = 0x2;

/// Address decoder routing accesses to the mapped peripherals.
pub struct Peripherals {
    peripherals: Vec<(u32, u32, Box<dyn Peripheral>)>,
}

impl Peripherals {
    pub fn new() -> Self {
        Self {
            peripherals: Default::default(),
        }
    }

    /// Map `periph` at `[base, base + size)`.
    pub fn add(&mut self, base: u32, size: u32, periph: Box<dyn Peripheral>) {
        debug!(
            "Map {} at 0x{:08x}..0x{:08x}",
            periph.get_name(),
            base,
            base.wrapping_add(size)
        );
        self.peripherals.push((base, size, periph));
    }

    pub fn load(&self, addr: u32) -> u32 {
        self.load_store(addr, Load)
    }

    pub fn store(&self, addr: u32, value: u32) {
        self.load_store(addr, Store(value));
    }

    fn load_store(&self, addr: u32, req: PeriphReq) -> u32 {
        for (base, size, p) in &self.peripherals {
            if addr >= *base && addr - base < *size {
                let offs = addr - base;
                return match req {
                    Load => {
                        let v = p.load(offs);
                        trace!("Periph load from {}: offs 0x{:x} -> 0x{:x}", p.get_name(), offs, v);
                        v
                    }
                    Store(val) => {
                        trace!("Periph store to {}: offs 0x{:x}, val 0x{:x}", p.get_name(), offs, val);
                        p.store(offs, val);
                        0
                    }
                };
            }
        }
        // Unmapped accesses have no side effect.
        match req {
            Load => trace!("Unmapped periph load: addr 0x{:08x}", addr),
            Store(val) => trace!("Unmapped periph store: addr 0x{:08x}, val 0x{:x}", addr, val),
        }
        0
    }
}

impl Default for Peripherals {
    fn default() -> Self {
        Self::new()
    }
}

enum PeriphReq {
    Load,
    Store(u32),
}

/// Trait representing a memory-mapped peripheral.
pub trait Peripheral: Send + Sync {
    fn get_name(&self) -> &'static str;
    /// Store to register offset `addr`.
    fn store(&self, addr: u32, value: u32);
    /// Load from register offset `addr`.
    fn load(&self, addr: u32) -> u32;
}

/// Register-level model of the 3x3 MAC accelerator.
///
/// Writing the start bit runs the MAC over the latched taps with a
/// wrapping accumulator of `register_width` bits. There is no timing
/// model: the done flag is set before the store returns.
pub struct ConvAccelerator {
    register_width: u32,
    ctrl: AtomicU32,
    inputs: [AtomicU32; TAPS],
    weights: [AtomicU32; TAPS],
    out: AtomicU32,
}

impl ConvAccelerator {
    pub fn new(register_width: u32) -> Self {
        Self {
            register_width,
            ctrl: Default::default(),
            inputs: Default::default(),
            weights: Default::default(),
            out: Default::default(),
        }
    }

    fn latched(regs: &[AtomicU32; TAPS]) -> [i8; TAPS] {
        let mut taps = [0i8; TAPS];
        for (t, r) in taps.iter_mut().zip(regs.iter()) {
            *t = r.load(Ordering::SeqCst) as u8 as i8;
        }
        taps
    }

    fn run(&self) {
        let inputs = Self::latched(&self.inputs);
        let weights = Self::latched(&self.weights);
        let result = wrapping_dot(&inputs, &weights, self.register_width);
        self.out.store(result as i32 as u32, Ordering::SeqCst);
        debug!(
            "[CONV] in {:?} w {:?} -> {} ({}-bit)",
            inputs, weights, result, self.register_width
        );
    }
}

impl Peripheral for ConvAccelerator {
    fn get_name(&self) -> &'static str {
        "conv-accel"
    }

    fn store(&self, addr: u32, value: u32) {
        match addr {
            REG_CTRL => {
                let mut state = value;
                if value & CTRL_START != 0 {
                    self.run();
                    state = (state | CTRL_DONE) & !CTRL_START;
                }
                self.ctrl.store(state, Ordering::SeqCst);
            }
            a if a >= REG_IN0 && a < REG_W0 && (a - REG_IN0) % 4 == 0 => {
                self.inputs[((a - REG_IN0) / 4) as usize].store(value & 0xFF, Ordering::SeqCst)
            }
            a if a >= REG_W0 && a < REG_OUT && (a - REG_W0) % 4 == 0 => {
                self.weights[((a - REG_W0) / 4) as usize].store(value & 0xFF, Ordering::SeqCst)
            }
            _ => trace!("[CONV] Ignored store to 0x{:02x}", addr),
        }
    }

    fn load(&self, addr: u32) -> u32 {
        match addr {
            REG_CTRL => self.ctrl.load(Ordering::SeqCst),
            a if a >= REG_IN0 && a < REG_W0 && (a - REG_IN0) % 4 == 0 => {
                self.inputs[((a - REG_IN0) / 4) as usize].load(Ordering::SeqCst)
            }
            a if a >= REG_W0 && a < REG_OUT && (a - REG_W0) % 4 == 0 => {
                self.weights[((a - REG_W0) / 4) as usize].load(Ordering::SeqCst)
            }
            REG_OUT => self.out.load(Ordering::SeqCst),
            _ => 0,
        }
    }
}

/// Software view of the accelerator, one register access per call.
pub struct Driver<'a> {
    bus: &'a Peripherals,
    base: u32,
    register_width: u32,
    max_polls: usize,
}

impl<'a> Driver<'a> {
    pub fn new(bus: &'a Peripherals, base: u32, register_width: u32) -> Self {
        Self {
            bus,
            base,
            register_width,
            max_polls: 1 << 16,
        }
    }

    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }

    fn reg(&self, offset: u32) -> u32 {
        self.base.wrapping_add(offset)
    }

    /// Indices past the last tap are ignored.
    pub fn write_input(&self, index: usize, value: i8) {
        if index < TAPS {
            self.bus
                .store(self.reg(REG_IN0 + index as u32 * 4), value as u8 as u32);
        }
    }

    /// Indices past the last tap are ignored.
    pub fn write_weight(&self, index: usize, value: i8) {
        if index < TAPS {
            self.bus
                .store(self.reg(REG_W0 + index as u32 * 4), value as u8 as u32);
        }
    }

    pub fn write_inputs(&self, pixels: &[i8]) {
        for (i, &p) in pixels.iter().enumerate() {
            self.write_input(i, p);
        }
    }

    pub fn write_weights(&self, weights: &[i8]) {
        for (i, &w) in weights.iter().enumerate() {
            self.write_weight(i, w);
        }
    }

    pub fn start(&self) {
        self.bus.store(self.reg(REG_CTRL), CTRL_START);
    }

    pub fn is_done(&self) -> bool {
        self.bus.load(self.reg(REG_CTRL)) & CTRL_DONE != 0
    }

    pub fn wait_done(&self) -> Result<()> {
        for _ in 0..self.max_polls {
            if self.is_done() {
                return Ok(());
            }
        }
        Err(Error::DeviceTimeout {
            polls: self.max_polls,
        })
    }

    /// Result register, sign-extended from the device register width.
    pub fn read_result(&self) -> i32 {
        sign_extend(self.bus.load(self.reg(REG_OUT)) as i64, self.register_width) as i32
    }

    pub fn convolve(&self, pixels: &[i8], weights: &[i8]) -> Result<i32> {
        for &(what, taps) in [("device inputs", pixels), ("device weights", weights)].iter() {
            if taps.len() != TAPS {
                return Err(Error::ShapeMismatch {
                    what,
                    expected: TAPS,
                    actual: taps.len(),
                });
            }
        }
        self.write_inputs(pixels);
        self.write_weights(weights);
        self.start();
        self.wait_done()?;
        Ok(self.read_result())
    }
}

/// Bus with a single accelerator mapped at [`CNN_BASE_ADDR`].
pub fn reference_soc(register_width: u32) -> Peripherals {
    let mut bus = Peripherals::new();
    bus.add(
        CNN_BASE_ADDR,
        REG_SPACE,
        Box::new(ConvAccelerator::new(register_width)),
    );
    bus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::EDGE_DETECT_3X3;

    #[test]
    fn all_ones_convolution_is_nine() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        assert_eq!(drv.convolve(&[1; 9], &[1; 9]).unwrap(), 9);
    }

    #[test]
    fn edge_kernel_on_flat_window_is_zero() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        assert_eq!(drv.convolve(&[1; 9], &EDGE_DETECT_3X3).unwrap(), 0);
    }

    #[test]
    fn negative_results_sign_extend() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        assert_eq!(drv.convolve(&[-3; 9], &[2; 9]).unwrap(), -54);
    }

    #[test]
    fn sixteen_bit_register_wraps_on_extreme_inputs() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        assert_eq!(drv.convolve(&[127; 9], &[127; 9]).unwrap(), 145_161 - 2 * 65_536);

        let wide = reference_soc(32);
        let drv = Driver::new(&wide, CNN_BASE_ADDR, 32);
        assert_eq!(drv.convolve(&[127; 9], &[127; 9]).unwrap(), 145_161);
    }

    #[test]
    fn start_sets_done_and_clears_start() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        assert!(!drv.is_done());
        drv.start();
        assert!(drv.is_done());
        assert_eq!(bus.load(CNN_BASE_ADDR + REG_CTRL) & CTRL_START, 0);
    }

    #[test]
    fn registers_latch_low_byte() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        drv.write_input(8, -1);
        drv.write_weight(0, -128);
        assert_eq!(bus.load(CNN_BASE_ADDR + REG_IN0 + 32), 0xFF);
        assert_eq!(bus.load(CNN_BASE_ADDR + REG_W0), 0x80);
    }

    #[test]
    fn out_of_range_tap_index_ignored() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        drv.write_input(9, 5);
        // Index 9 would alias the first weight register.
        assert_eq!(bus.load(CNN_BASE_ADDR + REG_W0), 0);
    }

    #[test]
    fn unmapped_access_has_no_effect() {
        let bus = reference_soc(16);
        bus.store(0x1000_0000, 0xdead_beef);
        assert_eq!(bus.load(0x1000_0000), 0);
    }

    #[test]
    fn wrong_tap_count_rejected() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        assert!(matches!(
            drv.convolve(&[1; 8], &[1; 9]),
            Err(Error::ShapeMismatch { actual: 8, .. })
        ));
    }

    #[test]
    fn missing_device_times_out() {
        let bus = Peripherals::new();
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16).with_max_polls(4);
        assert!(matches!(
            drv.convolve(&[1; 9], &[1; 9]),
            Err(Error::DeviceTimeout { polls: 4 })
        ));
    }
}
