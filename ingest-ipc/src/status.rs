// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The 8-state protocol written into each region's header, and the polling
//! loop consumers use to synchronize with a producer.

use std::time::Duration;

use tracing::trace;

/// One of the eight states a region's header `status` field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    /// Region quiescent, either side may take ownership.
    Idle = 0,
    /// Client is depositing bytes.
    ClientWriting = 1,
    /// Server is consuming client-deposited bytes.
    ServerReading = 2,
    /// Server is computing a response.
    Processing = 3,
    /// Server is depositing bytes.
    ServerWriting = 4,
    /// Client is consuming server-deposited bytes.
    ClientReading = 5,
    /// Payload is valid and available to the waiting peer.
    Ready = 6,
    /// Protocol violation or I/O failure; the region is poisoned.
    Error = 7,
}

impl Status {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            1 => Status::ClientWriting,
            2 => Status::ServerReading,
            3 => Status::Processing,
            4 => Status::ServerWriting,
            5 => Status::ClientReading,
            6 => Status::Ready,
            7 => Status::Error,
            _ => Status::Idle,
        }
    }
}

/// Fixed interval between polls of a region's header.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default timeout for `read-from-client`.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the inbound half of `bidirectional`.
pub const DEFAULT_BIDIRECTIONAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls `read_status` every [`POLL_INTERVAL`] until it returns `target` or
/// `timeout` elapses.
///
/// Returns `true` on the first observation of the target status, `false` on
/// timeout. A timeout is not itself an error: this leaves a region in its
/// last observed state rather than forcing it to `ERROR`, a deliberate grace
/// period so a slow client may still complete (see DESIGN.md).
pub async fn wait_for_status<F>(target: Status, timeout: Duration, mut read_status: F) -> bool
where
    F: FnMut() -> u32,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = Status::from(read_status());
        if current == target {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            trace!(?target, "wait_for_status timed out");
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn observes_immediate_match() {
        let ok = wait_for_status(Status::Ready, Duration::from_millis(50), || Status::Ready.as_u32()).await;
        assert!(ok);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_status_never_arrives() {
        let ok = wait_for_status(Status::Ready, Duration::from_millis(20), || Status::Idle.as_u32()).await;
        assert!(!ok);
    }

    #[tokio::test(start_paused = true)]
    async fn observes_late_transition() {
        let calls = Cell::new(0);
        let ok = wait_for_status(Status::ClientWriting, Duration::from_secs(1), || {
            calls.set(calls.get() + 1);
            if calls.get() < 5 {
                Status::Idle.as_u32()
            } else {
                Status::ClientWriting.as_u32()
            }
        })
        .await;
        assert!(ok);
    }

    #[test]
    fn unknown_status_decodes_as_idle() {
        assert_eq!(Status::from(42), Status::Idle);
    }
}
