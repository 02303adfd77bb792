//! Trap dispatcher.
//!
//! Every exception, interrupt and system call lands in [`trap`] after the
//! entry stubs have saved a [`Trapframe`]. The dispatcher classifies exactly
//! one event, handles it, and tells the arch glue how to leave the kernel.
//! The kernel lock is still held when [`trap`] returns; leaving through
//! `env_run` releases it.

use core::sync::atomic::{AtomicBool, Ordering};

use forkos_abi::trap::{
    IRQ_KBD, IRQ_SERIAL, IRQ_SPURIOUS, IRQ_TIMER, T_BRKPT, T_DEBUG, T_PGFLT, T_SYSCALL,
    irq_vector,
};
use forkos_abi::{EnvId, EnvStatus, Trapframe};
use forkos_lib::kdiag::{dump_trapframe, trapname};
use forkos_lib::{BigKernelLock, klog_info, klog_warn};

use crate::cpu::{CpuContext, CpuStatus};
use crate::services::Kernel;
use crate::upcall::page_fault_handler;

/// Machine-wide dispatcher state.
pub struct KernelState {
    lock: BigKernelLock,
    panicked: AtomicBool,
}

impl KernelState {
    pub const fn new() -> Self {
        Self {
            lock: BigKernelLock::new(),
            panicked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) -> &BigKernelLock {
        &self.lock
    }

    /// Record that some CPU panicked; every later trap halts.
    pub fn mark_panicked(&self) {
        self.panicked.store(true, Ordering::SeqCst);
    }

    pub fn has_panicked(&self) -> bool {
        self.panicked.load(Ordering::SeqCst)
    }
}

impl Default for KernelState {
    fn default() -> Self {
        Self::new()
    }
}

pub static KERNEL: KernelState = KernelState::new();

/// How the CPU leaves the kernel after a trap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapExit {
    /// Return to this environment from its saved context.
    Resume(EnvId),
    /// Let the scheduler pick the next environment.
    Schedule,
    /// Another CPU panicked; stop.
    Halt,
}

/// The context being dispatched: the current environment's saved copy for
/// user traps, the stub's frame for kernel traps.
enum Frame<'a> {
    Env(EnvId),
    Kernel(&'a mut Trapframe),
}

impl Frame<'_> {
    fn snapshot<K: Kernel + ?Sized>(&self, kernel: &K) -> Trapframe {
        match self {
            Frame::Env(env) => match kernel.env_frame(*env) {
                Some(tf) => *tf,
                None => panic!("[{}] current environment has no saved context", env),
            },
            Frame::Kernel(tf) => **tf,
        }
    }

    /// Write `tf` back. A destroyed environment has nothing to write to.
    fn store<K: Kernel + ?Sized>(&mut self, kernel: &mut K, tf: &Trapframe) {
        match self {
            Frame::Env(env) => {
                if let Some(saved) = kernel.env_frame_mut(*env) {
                    *saved = *tf;
                }
            }
            Frame::Kernel(frame) => **frame = *tf,
        }
    }
}

/// Dispatch one trap.
///
/// `tf` is the frame built by the entry stub on the kernel stack. For a trap
/// from user mode it is copied into the current environment's saved context
/// and every later step works on that copy.
pub fn trap<K>(
    kernel: &mut K,
    state: &KernelState,
    cpu: &mut CpuContext,
    tf: &mut Trapframe,
) -> TrapExit
where
    K: Kernel + ?Sized,
{
    if state.has_panicked() {
        return TrapExit::Halt;
    }

    if cpu.enter_kernel() == CpuStatus::Halted {
        state.lock().lock(cpu.id());
    }

    if kernel.interrupts_enabled() {
        panic!("trap: interrupts enabled on entry (vector {})", tf.trapno);
    }

    let frame = if tf.from_user() {
        let Some(env) = cpu.curenv else {
            panic!("trap from user mode with no current environment");
        };
        state.lock().lock(cpu.id());

        if kernel.env_status(env) == Some(EnvStatus::Dying) {
            kernel.env_free(env);
            cpu.curenv = None;
            return TrapExit::Schedule;
        }

        match kernel.env_frame_mut(env) {
            Some(saved) => *saved = *tf,
            None => panic!("[{}] current environment has no saved context", env),
        }
        Frame::Env(env)
    } else {
        Frame::Kernel(tf)
    };

    if let Some(exit) = trap_dispatch(kernel, cpu, frame) {
        return exit;
    }

    match cpu.curenv {
        Some(env) if kernel.env_status(env) == Some(EnvStatus::Running) => TrapExit::Resume(env),
        _ => TrapExit::Schedule,
    }
}

/// Handle one classified event. Returns an exit only when the event itself
/// decides it (timer preemption, process termination).
fn trap_dispatch<K>(kernel: &mut K, cpu: &mut CpuContext, mut frame: Frame<'_>) -> Option<TrapExit>
where
    K: Kernel + ?Sized,
{
    let mut tf = frame.snapshot(kernel);
    let vector = tf.vector();

    match vector {
        T_PGFLT => {
            page_fault_handler(kernel, cpu, &tf);
            return None;
        }
        T_BRKPT | T_DEBUG => {
            kernel.monitor(&mut tf);
            frame.store(kernel, &tf);
            return None;
        }
        T_SYSCALL => {
            if let Some(caller) = cpu.curenv {
                let r = &tf.regs;
                let ret = kernel.syscall(caller, r.rax, [r.rdx, r.rcx, r.rbx, r.rdi, r.rsi]);
                tf.regs.rax = ret as u64;
                frame.store(kernel, &tf);
                return None;
            }
        }
        v if v == irq_vector(IRQ_SPURIOUS) => {
            klog_warn!("Spurious interrupt on irq {}", IRQ_SPURIOUS);
            dump_trapframe(&tf, None);
            return None;
        }
        v if v == irq_vector(IRQ_TIMER) => {
            kernel.lapic_eoi();
            return Some(TrapExit::Schedule);
        }
        v if v == irq_vector(IRQ_KBD) => {
            kernel.kbd_intr();
            return None;
        }
        v if v == irq_vector(IRQ_SERIAL) => {
            kernel.serial_intr();
            return None;
        }
        _ => {}
    }

    dump_trapframe(&tf, None);
    match frame {
        Frame::Env(env) => {
            klog_info!("[{}] unhandled trap {} ({})", env, vector, trapname(tf.trapno));
            destroy_current_env(kernel, cpu, env);
            Some(TrapExit::Schedule)
        }
        Frame::Kernel(_) => {
            panic!("unhandled trap {} ({}) in kernel", vector, trapname(tf.trapno));
        }
    }
}

/// The single place a trap terminates the environment it interrupted.
pub(crate) fn destroy_current_env<K>(kernel: &mut K, cpu: &mut CpuContext, env: EnvId)
where
    K: Kernel + ?Sized,
{
    klog_info!("[{}] destroying environment", env);
    kernel.env_destroy(env);
    if cpu.curenv == Some(env) {
        cpu.curenv = None;
    }
}
