#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

/// Shared append-only event log for scenario assertions.
pub type Log = Rc<RefCell<Vec<String>>>;

pub fn new_log() -> Log {
    Rc::default()
}

pub fn push(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

/// Installs the test logger and, when `RUST_LOG` asks for it, a tracing
/// subscriber surfacing the crate's transition events.
pub fn init() {
    rwmux::test_logging::init_test_logging();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
