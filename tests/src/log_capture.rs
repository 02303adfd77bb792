//! Per-thread klog capture, so tests can assert on diagnostics while the
//! test harness runs them in parallel.

use std::cell::RefCell;
use std::fmt;
use std::sync::Once;

use forkos_lib::{KlogLevel, klog_register_backend};

thread_local! {
    static LINES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

static INSTALL: Once = Once::new();

fn capture_backend(level: KlogLevel, args: fmt::Arguments<'_>) {
    LINES.with(|lines| lines.borrow_mut().push(format!("[{}] {}", level.tag(), args)));
}

/// Route klog into the calling thread's buffer and clear it.
pub fn capture_klog() {
    INSTALL.call_once(|| klog_register_backend(capture_backend));
    LINES.with(|lines| lines.borrow_mut().clear());
}

pub fn take_klog() -> Vec<String> {
    LINES.with(|lines| std::mem::take(&mut *lines.borrow_mut()))
}

pub fn klog_contains(needle: &str) -> bool {
    LINES.with(|lines| lines.borrow().iter().any(|line| line.contains(needle)))
}
