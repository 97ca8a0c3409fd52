//! Routing of guest physical accesses to RAM and memory-mapped devices.

use crate::memory::PhysMemory;
use crate::AddressRange;
use core::fmt;
use log::debug;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// The maximum number of MMIO regions that can be registered on one bus.
pub const MAX_REGIONS: usize = 256;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessType {
    /// Regular reads.
    Read,
    /// Regular writes.
    Write,
    /// Instruction fetches.
    Execute,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Read => "R",
            Self::Write => "W",
            Self::Execute => "X",
        })
    }
}

/// Direction of a device access.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessOp {
    /// The device must fill `buf` with little-endian data.
    Read,
    /// The device must consume the little-endian data in `buf`.
    Write,
}

/// Handler contract for a memory-mapped device.
///
/// An access to a registered region invokes [`access`](Self::access) with the offset of the
/// access relative to the region base and a buffer of the access size (typically 1, 2, or 4
/// bytes; a byte-stream data register may accept any size). On [`AccessOp::Read`] the device
/// writes `buf.len()` bytes of little-endian data into `buf`; on [`AccessOp::Write`] it reads
/// them. Returning `false` asks the bus to raise an access fault at the faulting address.
///
/// Handlers are called from hart threads and may block (e.g. on host I/O).
pub trait Device: Debug + Send + Sync {
    fn access(&self, offset: u32, buf: &mut [u8], op: AccessOp) -> bool;
}

#[derive(Debug, Clone)]
struct MmioRegion {
    range: AddressRange,
    device: Arc<dyn Device>,
}

/// The shared system bus of a machine: one RAM image plus an ordered table of MMIO regions.
///
/// An access is served by RAM if it lies entirely inside the RAM window; otherwise the MMIO
/// table is scanned in registration order for a region containing the address. A miss in both
/// is an access fault.
///
/// Regions never overlap each other or RAM. The table is effectively immutable while harts run;
/// registration and teardown happen during machine setup, so the interior `RwLock` is
/// uncontended on the access path.
#[derive(Debug)]
pub struct SystemBus {
    ram: PhysMemory,
    regions: RwLock<Vec<MmioRegion>>,
}

impl SystemBus {
    pub fn new(ram: PhysMemory) -> Self {
        Self {
            ram,
            regions: RwLock::new(Vec::new()),
        }
    }

    /// Provides direct access to the RAM image, e.g. for loading a boot image.
    pub fn ram(&self) -> &PhysMemory {
        &self.ram
    }

    /// Registers `device` for the guest physical range `range`.
    ///
    /// Registration order defines the scan order on access. Fails if the range overlaps RAM or a
    /// previously registered region, or if [`MAX_REGIONS`] regions are already registered.
    pub fn add_device(&self, range: AddressRange, device: Arc<dyn Device>) -> Result<(), BusError> {
        let mut regions = self.regions.write().unwrap();
        if regions.len() >= MAX_REGIONS {
            return Err(BusError::TooManyRegions);
        }
        if range.overlaps(self.ram.range()) {
            return Err(BusError::Overlap(range));
        }
        if regions.iter().any(|region| region.range.overlaps(range)) {
            return Err(BusError::Overlap(range));
        }
        regions.push(MmioRegion { range, device });
        Ok(())
    }

    /// Removes the region starting at `base`, returning its device.
    pub fn remove_device(&self, base: u32) -> Option<Arc<dyn Device>> {
        let mut regions = self.regions.write().unwrap();
        let index = regions.iter().position(|region| region.range.start() == base)?;
        Some(regions.remove(index).device)
    }

    /// Returns `true` if a `size`-byte access at `address` would be accepted by RAM or a region.
    pub fn accepts(&self, address: u32, size: usize) -> bool {
        if self.ram.covers(address, size) {
            return true;
        }
        self.lookup(address).is_some()
    }

    /// Invoke a read access for `address` with size `buf.len()`, filling `buf` with
    /// little-endian data.
    pub fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), BusAccessError> {
        if self.ram.read(address, buf) {
            return Ok(());
        }
        let (device, offset) = self.lookup(address).ok_or(BusAccessError(address))?;
        match device.access(offset, buf, AccessOp::Read) {
            true => Ok(()),
            false => {
                debug!("Device refused read of {} bytes at {address:#010x}", buf.len());
                Err(BusAccessError(address))
            }
        }
    }

    /// Invoke a write access for `address` with size `buf.len()`, consuming the little-endian
    /// data in `buf`.
    pub fn write(&self, address: u32, buf: &[u8]) -> Result<(), BusAccessError> {
        if self.ram.write(address, buf) {
            return Ok(());
        }
        let (device, offset) = self.lookup(address).ok_or(BusAccessError(address))?;
        let mut data = buf.to_vec();
        match device.access(offset, &mut data, AccessOp::Write) {
            true => Ok(()),
            false => {
                debug!("Device refused write of {} bytes at {address:#010x}", buf.len());
                Err(BusAccessError(address))
            }
        }
    }

    /// Loads the naturally-aligned RAM word at `address`, falling back to a device read.
    pub fn load_word(&self, address: u32) -> Result<u32, BusAccessError> {
        if let Some(word) = self.ram.load_word(address) {
            return Ok(word);
        }
        let mut buf = [0u8; 4];
        self.read(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Stores a naturally-aligned word at `address`, falling back to a device write.
    pub fn store_word(&self, address: u32, value: u32) -> Result<(), BusAccessError> {
        if self.ram.store_word(address, value) {
            return Ok(());
        }
        self.write(address, &value.to_le_bytes())
    }

    /// Atomically replaces the word at `address` with `f(old)`, returning the old value.
    ///
    /// Only RAM supports atomic read-modify-write; an AMO targeting a device region raises an
    /// access fault, as real interconnects commonly do.
    pub fn fetch_update_word(
        &self,
        address: u32,
        f: impl Fn(u32) -> u32,
    ) -> Result<u32, BusAccessError> {
        self.ram
            .fetch_update_word(address, f)
            .ok_or(BusAccessError(address))
    }

    fn lookup(&self, address: u32) -> Option<(Arc<dyn Device>, u32)> {
        let regions = self.regions.read().unwrap();
        regions.iter().find_map(|region| {
            region
                .range
                .offset_of(address)
                .map(|offset| (Arc::clone(&region.device), offset))
        })
    }
}

/// Failed construction of the MMIO routing table.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    #[error("MMIO region {0} overlaps RAM or an already registered region")]
    Overlap(AddressRange),
    #[error("cannot register more than {MAX_REGIONS} MMIO regions")]
    TooManyRegions,
}

/// A physical access that no resource on the bus accepted (or that a device refused).
///
/// The inner value is the faulting physical address.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
#[error("physical access fault at {0:#010x}")]
pub struct BusAccessError(pub u32);
