//! Blocking synchronization built on the scheduler
//!
//! `spin::Mutex` protects short critical sections. Anything that may wait
//! for another thread (a child's exit, a child's load) goes through
//! `Semaphore`, which parks the caller in the scheduler instead of
//! spinning.

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::sched::{Scheduler, Tid};

struct SemaState {
    value: u32,
    waiters: VecDeque<Tid>,
}

/// Counting semaphore.
pub struct Semaphore {
    state: Mutex<SemaState>,
}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            state: Mutex::new(SemaState {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Wait until the value is positive, then decrement it.
    pub fn down(&self, sched: &dyn Scheduler) {
        let me = sched.current();
        loop {
            {
                let mut state = self.state.lock();
                if state.value > 0 {
                    state.value -= 1;
                    state.waiters.retain(|&t| t != me);
                    return;
                }
                if !state.waiters.contains(&me) {
                    state.waiters.push_back(me);
                }
            }
            sched.block();
        }
    }

    /// Decrement without waiting. Returns false if the value was zero.
    pub fn try_down(&self) -> bool {
        let mut state = self.state.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increment the value and wake the longest waiter, if any.
    pub fn up(&self, sched: &dyn Scheduler) {
        let waiter = {
            let mut state = self.state.lock();
            state.value += 1;
            state.waiters.pop_front()
        };
        if let Some(tid) = waiter {
            sched.unblock(tid);
        }
    }

    /// Current value, for diagnostics.
    pub fn value(&self) -> u32 {
        self.state.lock().value
    }
}
