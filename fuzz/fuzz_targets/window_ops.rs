//! Fuzz target for window tracking
//!
//! Drives a bounded tracker with arbitrary admissions and settlements and
//! checks that no link ever exceeds its window.

#![no_main]

use arbitrary::Arbitrary;
use creditline_core::{DeliveryHandle, Direction, WindowTracker};
use creditline_transport::LinkHandle;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Send { link: u8 },
    Receive { link: u8, remote_id: u64 },
    Settle { index: u16 },
    Reclaim { link: u8 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    bound: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let bound = usize::from(input.bound % 16) + 1;
    let mut tracker = WindowTracker::new(Some(bound), Some(bound));
    let mut issued: Vec<DeliveryHandle> = Vec::new();

    for op in input.ops {
        match op {
            Op::Send { link } => {
                let handle = tracker.reserve();
                let _ = tracker.admit_outgoing(handle, LinkHandle::new(u64::from(link % 4)));
                issued.push(handle);
            }
            Op::Receive { link, remote_id } => {
                let admission = tracker.admit_incoming(LinkHandle::new(u64::from(link % 4)), remote_id);
                issued.push(admission.handle);
            }
            Op::Settle { index } if !issued.is_empty() => {
                let handle = issued[usize::from(index) % issued.len()];
                let _ = tracker.settle(handle);
                assert!(tracker.settle(handle).is_none());
            }
            Op::Settle { .. } => {}
            Op::Reclaim { link } => {
                let _ = tracker.reclaim_link(LinkHandle::new(u64::from(link % 4)));
            }
        }

        for link in 0..4 {
            for direction in [Direction::Outgoing, Direction::Incoming] {
                assert!(tracker.unsettled(LinkHandle::new(link), direction) <= bound);
            }
        }
    }
});
