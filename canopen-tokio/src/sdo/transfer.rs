//! Per-transfer state shared by [`ClientFSM`][super::client::ClientFSM] and
//! [`ServerFSM`][super::server::ServerFSM].

use std::time::Duration;
use tokio::time::Instant;

use super::abort::AbortCode;
use super::codec::encode_abort;

/// State of a single in-flight SDO transfer.
///
/// A `TransferCtx` is exclusively owned by whichever FSM created it: the
/// client owns one per outstanding `upload`/`download` call, the server owns
/// one per client that has an in-progress segmented transfer. Nothing else
/// holds a reference to it; the owning FSM looks it up by COB-ID when a frame
/// arrives and drops it on completion.
#[derive(Debug)]
pub struct TransferCtx {
	/// Object index being transferred.
	pub index: u16,
	/// Object sub-index being transferred.
	pub sub_index: u8,
	/// Accumulated payload bytes.
	pub buffer: Vec<u8>,
	/// Declared total size once known (0 until the initiate response/request says otherwise).
	pub size: u32,
	/// Current toggle bit.
	pub toggle: bool,
	/// Timeout to apply on each `start()`/`refresh()`.
	pub timeout: Duration,
	/// COB-ID to use when sending frames that belong to this transfer.
	pub cob_id_tx: u16,
	deadline: Option<Instant>,
}

impl TransferCtx {
	/// Create a new transfer context. The timer is not armed until [`Self::start`] is called.
	pub fn new(index: u16, sub_index: u8, cob_id_tx: u16, timeout: Duration) -> Self {
		Self {
			index,
			sub_index,
			buffer: Vec::new(),
			size: 0,
			toggle: false,
			timeout,
			cob_id_tx,
			deadline: None,
		}
	}

	/// Arm the deadline timer, starting from now.
	pub fn start(&mut self) {
		self.deadline = Some(Instant::now() + self.timeout);
	}

	/// Restart the deadline timer on forward progress (an inbound frame for this transfer).
	pub fn refresh(&mut self) {
		self.deadline = Some(Instant::now() + self.timeout);
	}

	/// The instant at which this transfer will time out, if the timer is armed.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Whether the deadline has already passed.
	pub fn is_expired(&self) -> bool {
		self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}

	/// Flip the toggle bit, as required between consecutive segments.
	pub fn flip_toggle(&mut self) {
		self.toggle = !self.toggle;
	}

	/// Encode an abort frame for this transfer's `(index, sub_index)`.
	pub fn abort_frame(&self, code: AbortCode) -> [u8; 8] {
		encode_abort(self.index, self.sub_index, code)
	}
}
