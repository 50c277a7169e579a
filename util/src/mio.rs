use std::io;

use mio::{Events, Poll};

use crate::io::handle_interrupted;

pub mod interest {
    use mio::Interest;
    pub const R: Interest = Interest::READABLE;
    pub const RW: Interest = R.add(Interest::WRITABLE);
}

/// Block until `poll` reports at least one readiness event
///
/// There is no timeout; this waits for as long as it takes, just like a
/// blocking socket call would.
pub fn wait_for_readiness(poll: &mut Poll, events: &mut Events) -> io::Result<()> {
    handle_interrupted(|| poll.poll(events, None))
}
