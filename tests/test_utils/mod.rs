#![allow(dead_code)]

pub mod collector;
pub mod shared_buffer;

pub use collector::Collector;
pub use shared_buffer::SharedBuf;

use std::{
    thread,
    time::{Duration, Instant},
};

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
