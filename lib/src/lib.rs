#![cfg_attr(not(test), no_std)]

pub mod alignment;
pub mod kdiag;
pub mod kernel_lock;
pub mod klog;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, is_aligned_u64};
pub use kdiag::{dump_trapframe, trapname};
pub use kernel_lock::BigKernelLock;
pub use klog::{
    KlogBackend, KlogLevel, klog_get_level, klog_init, klog_register_backend, klog_set_level,
};
