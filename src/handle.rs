// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

/// Issues the client handles that tie subscriptions and monitored items to the notifications
/// a session raises for them.
#[derive(Debug, Clone)]
pub struct Handle {
    next: u32,
    first: u32,
}

impl Handle {
    /// Creates a new handle factory, that starts with the supplied number
    pub fn new(first: u32) -> Handle {
        Handle { next: first, first }
    }

    /// Returns the next handle to be issued. Wraps back to the first handle after `u32::MAX`.
    pub fn next(&mut self) -> u32 {
        let next = self.next;
        if self.next == u32::MAX {
            self.next = self.first;
        } else {
            self.next += 1;
        }
        next
    }
}

#[test]
fn handle_increment() {
    let mut h = Handle::new(1);
    assert_eq!(h.next(), 1);
    assert_eq!(h.next(), 2);
    assert_eq!(h.next(), 3);
}

#[test]
fn handle_wrap() {
    let mut h = Handle::new(u32::MAX - 1);
    assert_eq!(h.next(), u32::MAX - 1);
    assert_eq!(h.next(), u32::MAX);
    assert_eq!(h.next(), u32::MAX - 1);
}
