//! Error types for SDO configuration and transfers.

use super::abort::AbortCode;

/// Error that can occur when configuring a [`ClientFSM`][super::client::ClientFSM] or
/// [`ServerFSM`][super::server::ServerFSM]: adding/removing a peer or scanning the
/// object dictionary at `init()`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// A peer ID outside of `1..=127` was given.
	#[error("peer id {0} is out of range: expected a value in 1..=127")]
	Range(u8),

	/// The peer is already configured.
	#[error("peer {0} is already configured")]
	Duplicate(u8),

	/// No matching peer or parameter record was found.
	#[error("peer {0} was not found")]
	NotFound(u8),

	/// The object dictionary has no free parameter record left in the relevant range.
	#[error("no free SDO parameter record available")]
	NoFreeSlot,

	/// A parameter record uses an extended (29-bit) or dynamically allocated COB-ID.
	#[error("parameter record at 0x{index:04X} uses an unsupported COB-ID encoding (extended or dynamic)")]
	Unsupported {
		/// Index of the offending parameter record.
		index: u16,
	},
}

/// Error that occurs while performing an SDO upload or download.
#[derive(Debug, thiserror::Error)]
pub enum SdoError {
	/// The transfer was aborted, locally or by the peer.
	#[error(transparent)]
	TransferAborted(#[from] TransferAborted),

	/// The transfer timed out waiting for a reply.
	#[error("timeout while waiting for SDO response")]
	Timeout,

	/// Sending a frame through the transport failed.
	#[error("failed to send frame: {0}")]
	SendFailed(std::io::Error),

	/// Receiving a frame from the transport failed.
	#[error("failed to receive frame: {0}")]
	RecvFailed(std::io::Error),

	/// The response frame could not be parsed as a valid SDO response.
	#[error(transparent)]
	MalformedResponse(#[from] MalformedResponse),

	/// The response frame was a valid SDO frame, but not the one that was expected.
	#[error(transparent)]
	UnexpectedResponse(#[from] UnexpectedResponse),

	/// The number of bytes actually transferred did not match the declared size.
	#[error(transparent)]
	WrongDataCount(#[from] WrongDataCount),

	/// `upload`/`download` was called for a peer that was never added with `add_server`/`add_client`.
	#[error("unknown peer: {0}")]
	UnknownPeer(u8),
}

/// A transfer was aborted, locally or by the remote peer.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub struct TransferAborted {
	/// The abort code, or the raw value if it is not a recognized [`AbortCode`].
	pub reason: Result<AbortCode, u32>,
}

impl std::fmt::Display for TransferAborted {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "transfer aborted: {}", super::abort::message_for(self.reason))
	}
}

impl TransferAborted {
	/// Create a new aborted-transfer error from a recognized abort code.
	pub fn new(code: AbortCode) -> Self {
		Self { reason: Ok(code) }
	}

	/// Create a new aborted-transfer error from a raw, possibly unrecognized, abort code.
	pub fn from_raw(code: u32) -> Self {
		Self { reason: AbortCode::from_raw(code) }
	}
}

/// A response frame could not be parsed as a valid SDO response.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MalformedResponse {
	/// The response frame did not carry exactly 8 data bytes.
	#[error("expected a response with 8 data bytes, got {0}")]
	WrongFrameSize(usize),
}

/// The response frame was a valid SDO frame, but did not match what was expected.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unexpected response: expected {expected}, got {actual}")]
pub struct UnexpectedResponse {
	/// Short description of what was expected.
	pub expected: &'static str,
	/// Short description of what was actually received.
	pub actual: &'static str,
}

/// The number of bytes transferred did not match the declared total size.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("wrong data count: expected {expected}, got {actual}")]
pub struct WrongDataCount {
	/// The declared total size.
	pub expected: u32,
	/// The number of bytes actually received.
	pub actual: u32,
}

/// Error produced by a typed upload, combining an [`SdoError`] with a buffer-to-value parse error.
#[derive(Debug, thiserror::Error)]
pub enum UploadError<E> {
	/// The SDO upload itself failed.
	#[error(transparent)]
	UploadFailed(#[from] SdoError),

	/// The upload succeeded, but the received bytes could not be parsed into the requested type.
	#[error("failed to parse uploaded data: {0}")]
	ParseFailed(E),
}
