use core::sync::atomic::{AtomicU8, Ordering};

use forkos_abi::memlayout::{KSTACKTOP, KSTKGAP, KSTKSIZE};
use forkos_abi::trap::GD_TSS0;
use forkos_abi::{EnvId, VirtAddr};

/// CPUs that get a kernel stack and a TSS descriptor.
pub const MAX_CPUS: usize = 8;

/// A long-mode TSS descriptor occupies two GDT slots.
const TSS_DESCRIPTOR_SIZE: u16 = 16;

/// Kernel stack and task register for traps taken from user mode on one CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapStack {
    /// Loaded into the TSS as `rsp0`.
    pub rsp0: VirtAddr,
    pub tss_selector: u16,
}

impl TrapStack {
    pub const fn for_cpu(id: usize) -> Option<Self> {
        if id >= MAX_CPUS {
            return None;
        }
        Some(Self {
            rsp0: VirtAddr(KSTACKTOP.as_u64() - id as u64 * (KSTKSIZE + KSTKGAP)),
            tss_selector: GD_TSS0 + id as u16 * TSS_DESCRIPTOR_SIZE,
        })
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuStatus {
    Unused = 0,
    Started = 1,
    /// Parked by the scheduler with the kernel lock released.
    Halted = 2,
}

impl CpuStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Started,
            2 => Self::Halted,
            _ => Self::Unused,
        }
    }
}

/// Per-CPU state seen by the dispatcher.
#[derive(Debug)]
pub struct CpuContext {
    id: u32,
    status: AtomicU8,
    /// Environment this CPU is running, if any.
    pub curenv: Option<EnvId>,
}

impl CpuContext {
    pub const fn new(id: u32) -> Self {
        Self {
            id,
            status: AtomicU8::new(CpuStatus::Unused as u8),
            curenv: None,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> CpuStatus {
        CpuStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: CpuStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub fn trap_stack(&self) -> Option<TrapStack> {
        TrapStack::for_cpu(self.id as usize)
    }

    /// Mark the CPU started and return the status it had before.
    pub fn enter_kernel(&self) -> CpuStatus {
        CpuStatus::from_raw(self.status.swap(CpuStatus::Started as u8, Ordering::AcqRel))
    }
}
