//! Serialized device discovery
//!
//! Discovery lists every address behind the gateway, then fetches the detail of
//! each unknown address one at a time. The sequencer is a plain state machine: it
//! never sleeps or publishes itself. Callers act on the returned [`Step`], which
//! keeps pacing non-blocking and makes the single-outstanding-request rule explicit
//! in [`DiscoveryState`].

use crate::protocol::Command;
use crate::types::GatewayAddress;
use std::collections::VecDeque;
use std::time::Duration;

/// Delay between consecutive detail requests
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

/// Where the current discovery batch stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    /// No batch running
    Idle,
    /// List request sent, waiting for the device list
    AwaitingDeviceList,
    /// Working through the queue
    ///
    /// `awaiting` is the address whose detail request is in flight, or `None`
    /// while the pacing delay before the next request runs.
    Draining { awaiting: Option<GatewayAddress> },
}

/// What the caller should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do
    Pending,
    /// Publish this command now
    Send(Command),
    /// Call [`DiscoverySequencer::resume`] after this delay
    Pace(Duration),
    /// Batch finished; persist the device map
    Completed,
    /// Batch abandoned before the device list arrived
    Aborted,
}

/// Discovery state machine
#[derive(Debug)]
pub struct DiscoverySequencer {
    state: DiscoveryState,
    queue: VecDeque<GatewayAddress>,
    pacing: Duration,
    request_seq: u64,
    completed_batches: u64,
}

impl DiscoverySequencer {
    pub fn new(pacing: Duration) -> Self {
        Self {
            state: DiscoveryState::Idle,
            queue: VecDeque::new(),
            pacing,
            request_seq: 0,
            completed_batches: 0,
        }
    }

    pub fn state(&self) -> &DiscoveryState {
        &self.state
    }

    /// Check if a batch is running
    pub fn is_in_progress(&self) -> bool {
        self.state != DiscoveryState::Idle
    }

    /// Addresses still waiting for their detail; the head is the current one
    pub fn queue(&self) -> impl Iterator<Item = &GatewayAddress> {
        self.queue.iter()
    }

    /// Address whose detail request is outstanding
    pub fn awaiting(&self) -> Option<&GatewayAddress> {
        match &self.state {
            DiscoveryState::Draining { awaiting } => awaiting.as_ref(),
            _ => None,
        }
    }

    /// Sequence number of the most recent request, for matching timeouts
    pub fn request_seq(&self) -> u64 {
        self.request_seq
    }

    /// Number of batches that ran to completion
    pub fn completed_batches(&self) -> u64 {
        self.completed_batches
    }

    /// Begin a batch; a no-op while one is already running
    pub fn start(&mut self) -> Step {
        if self.is_in_progress() {
            tracing::debug!("Discovery already in progress ({:?})", self.state);
            return Step::Pending;
        }

        tracing::info!("Starting discovery");
        self.queue.clear();
        self.state = DiscoveryState::AwaitingDeviceList;
        self.request_seq += 1;
        Step::Send(Command::ListDevices)
    }

    /// Queue every address not already known, in list order
    pub fn on_device_list<I>(&mut self, addresses: I, is_known: impl Fn(&str) -> bool) -> Step
    where
        I: IntoIterator<Item = GatewayAddress>,
    {
        if self.state != DiscoveryState::AwaitingDeviceList {
            tracing::debug!("Ignoring device list outside of discovery");
            return Step::Pending;
        }

        let mut total = 0;
        for address in addresses {
            total += 1;
            if !is_known(&address) && !self.queue.contains(&address) {
                self.queue.push_back(address);
            }
        }
        tracing::info!("Found {} devices, {} new", total, self.queue.len());

        if self.queue.is_empty() {
            return self.finish();
        }

        self.state = DiscoveryState::Draining { awaiting: None };
        self.dispatch()
    }

    /// The outstanding detail request was answered (well-formed or not)
    pub fn on_device_info(&mut self) -> Step {
        if self.awaiting().is_none() {
            tracing::debug!("Ignoring device detail with no request outstanding");
            return Step::Pending;
        }
        self.advance()
    }

    /// Pacing delay elapsed: issue the next detail request
    pub fn resume(&mut self) -> Step {
        match &self.state {
            DiscoveryState::Draining { awaiting: None } => self.dispatch(),
            _ => Step::Pending,
        }
    }

    /// Response timeout for request `seq` fired
    ///
    /// Stale timeouts (for requests already answered) are ignored. A missing
    /// detail skips its address; a missing device list abandons the batch.
    pub fn on_timeout(&mut self, seq: u64) -> Step {
        if seq != self.request_seq {
            return Step::Pending;
        }

        match &self.state {
            DiscoveryState::AwaitingDeviceList => {
                tracing::warn!("No device list from gateway, abandoning discovery");
                self.state = DiscoveryState::Idle;
                self.queue.clear();
                Step::Aborted
            }
            DiscoveryState::Draining {
                awaiting: Some(address),
            } => {
                tracing::warn!("No detail for {}, skipping", address);
                self.advance()
            }
            _ => Step::Pending,
        }
    }

    fn dispatch(&mut self) -> Step {
        let Some(address) = self.queue.front().cloned() else {
            return self.finish();
        };
        tracing::info!("Getting info: {}", address);
        self.state = DiscoveryState::Draining {
            awaiting: Some(address.clone()),
        };
        self.request_seq += 1;
        Step::Send(Command::DeviceInfo(address))
    }

    fn advance(&mut self) -> Step {
        self.queue.pop_front();
        if self.queue.is_empty() {
            return self.finish();
        }
        self.state = DiscoveryState::Draining { awaiting: None };
        Step::Pace(self.pacing)
    }

    fn finish(&mut self) -> Step {
        tracing::info!("Discovery completed");
        self.state = DiscoveryState::Idle;
        self.queue.clear();
        self.completed_batches += 1;
        Step::Completed
    }
}

impl Default for DiscoverySequencer {
    fn default() -> Self {
        Self::new(DEFAULT_PACING)
    }
}
