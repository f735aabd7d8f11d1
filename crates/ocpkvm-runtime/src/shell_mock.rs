//! Test mock for `shell::run_host` and the helpers built on it.
//!
//! Installs a thread-local handler that receives the full command line
//! (`"virsh -c qemu:///system net-info ocp-100"`) and returns a canned
//! response. Every intercepted command line is recorded.

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

/// Mock response for a host command.
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn empty() -> Self {
        Self::ok("")
    }

    pub fn fail(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub(crate) fn to_output(&self) -> Output {
        Output {
            // Unix exit code encoding: status = code << 8
            status: ExitStatus::from_raw(self.exit_code << 8),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: self.stderr.as_bytes().to_vec(),
        }
    }
}

type MockHandler = Box<dyn Fn(&str) -> MockResponse>;

/// Command lines seen by the mock, in order.
pub type Calls = Arc<Mutex<Vec<String>>>;

thread_local! {
    static HANDLER: RefCell<Option<(MockHandler, Calls)>> = const { RefCell::new(None) };
}

/// Guard that clears the mock handler on drop.
pub struct MockGuard;

impl Drop for MockGuard {
    fn drop(&mut self) {
        HANDLER.with(|h| *h.borrow_mut() = None);
    }
}

/// Install `handler` for the current thread.
pub fn install<F>(handler: F) -> (MockGuard, Calls)
where
    F: Fn(&str) -> MockResponse + 'static,
{
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    HANDLER.with(|h| *h.borrow_mut() = Some((Box::new(handler), recorded)));
    (MockGuard, calls)
}

/// Try to intercept a command via the installed mock handler.
pub(crate) fn intercept(line: &str) -> Option<Output> {
    HANDLER.with(|h| {
        h.borrow().as_ref().map(|(f, calls)| {
            calls.lock().unwrap().push(line.to_string());
            f(line).to_output()
        })
    })
}
