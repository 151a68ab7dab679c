//! SDO client state machine (§4.4): `upload`/`download` against a remote server.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use can_socket::{CanFrame, CanId, StandardId};

use crate::dictionary::{AccessType, DataType, Entry, ObjectDictionary};
use crate::transport::{Subscription, Transport};

use super::abort::AbortCode;
use super::address::SdoAddress;
use super::codec::*;
use super::error::{ConfigError, MalformedResponse, SdoError, TransferAborted, UnexpectedResponse, UploadError, WrongDataCount};
use super::queue::Queue;
use super::scanner::{self, CLIENT_LAYOUT};
use super::transfer::TransferCtx;
use super::typed::{DownloadObject, UploadObject};

/// Object dictionary range holding this node's client SDO parameter records.
pub const CLIENT_PARAMETER_RANGE: RangeInclusive<u16> = 0x1280..=0x12FF;

/// Default timeout applied to `upload`/`download` when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30);

#[derive(Debug, Copy, Clone)]
struct ClientPeer {
	cob_id_tx: u16,
	cob_id_rx: u16,
}

/// Drives the client half of the SDO protocol: initiates uploads and downloads
/// against one or more remote servers, and runs the per-transfer state
/// machine described in the component design (WAIT_UPLOAD_INIT,
/// WAIT_UPLOAD_SEG, WAIT_DOWN_INIT_ACK, WAIT_DOWN_SEG_ACK) to completion.
pub struct ClientFSM<T: Transport> {
	transport: T,
	dictionary: ObjectDictionary,
	peers: HashMap<u8, ClientPeer>,
	queues: HashMap<u8, Queue>,
}

impl<T: Transport> std::fmt::Debug for ClientFSM<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientFSM").field("peers", &self.peers.keys().collect::<Vec<_>>()).finish_non_exhaustive()
	}
}

impl<T: Transport> ClientFSM<T> {
	/// Create a new client FSM over the given transport. Call [`Self::add_server`]
	/// and [`Self::init`] before issuing uploads or downloads.
	pub fn new(transport: T) -> Self {
		Self {
			transport,
			dictionary: ObjectDictionary::new(),
			peers: HashMap::new(),
			queues: HashMap::new(),
		}
	}

	/// Register a remote SDO server, allocating a client parameter record in
	/// `0x1280..=0x12FF`. Does not take effect until [`Self::init`] is called.
	pub fn add_server(&mut self, server_id: u8, sdo: SdoAddress) -> Result<(), ConfigError> {
		if !(1..=127).contains(&server_id) {
			return Err(ConfigError::Range(server_id));
		}
		if self.find_record(server_id).is_some() {
			return Err(ConfigError::Duplicate(server_id));
		}
		let index = self.next_free_index()?;
		self.dictionary.insert_record(index, [
			(1, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, u32::from(sdo.command_address()).to_le_bytes())),
			(2, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, u32::from(sdo.response_address()).to_le_bytes())),
			(3, Entry::new(DataType::Unsigned8, AccessType::ReadWrite, [server_id])),
		]);
		Ok(())
	}

	/// Remove a previously registered server. Does not take effect until [`Self::init`] is called.
	pub fn remove_server(&mut self, server_id: u8) -> Result<(), ConfigError> {
		let index = self.find_record(server_id).ok_or(ConfigError::NotFound(server_id))?;
		self.dictionary.remove(index);
		Ok(())
	}

	/// Scan `0x1280..=0x12FF` and rebuild the active peer table.
	///
	/// Must be called once before the first upload/download, and again after
	/// any `add_server`/`remove_server` call.
	pub fn init(&mut self) -> Result<(), ConfigError> {
		let scanned = scanner::scan(&self.dictionary, CLIENT_PARAMETER_RANGE, CLIENT_LAYOUT)?;
		self.peers.clear();
		for peer in scanned {
			self.peers.insert(peer.peer_id, ClientPeer { cob_id_tx: peer.cob_id_tx, cob_id_rx: peer.cob_id_rx });
			self.queues.entry(peer.peer_id).or_default();
		}
		Ok(())
	}

	fn find_record(&self, server_id: u8) -> Option<u16> {
		self.dictionary.range(CLIENT_PARAMETER_RANGE)
			.find(|(_, object)| object.get(3).and_then(|entry| entry.raw.first()) == Some(&server_id))
			.map(|(index, _)| index)
	}

	fn next_free_index(&self) -> Result<u16, ConfigError> {
		CLIENT_PARAMETER_RANGE.clone().find(|index| self.dictionary.get_object(*index).is_none())
			.ok_or(ConfigError::NoFreeSlot)
	}

	fn peer(&self, server_id: u8) -> Result<ClientPeer, SdoError> {
		self.peers.get(&server_id).copied().ok_or(SdoError::UnknownPeer(server_id))
	}

	fn queue(&self, server_id: u8) -> &Queue {
		// `init()` populates a queue for every known peer; a missing queue means
		// the caller never called `init()` after `add_server`.
		self.queues.get(&server_id).expect("call init() after add_server()")
	}

	/// Upload a value from a server's object dictionary, converting the raw
	/// bytes received into `V` via [`UploadObject`].
	pub async fn upload<V: UploadObject>(&self, server_id: u8, index: u16, sub_index: u8, timeout: Duration) -> Result<V, UploadError<V::Error>> {
		let buffer = self.upload_raw(server_id, index, sub_index, timeout).await?;
		V::parse_buffer(buffer).map_err(UploadError::ParseFailed)
	}

	/// Upload the raw bytes of a value from a server's object dictionary.
	pub async fn upload_raw(&self, server_id: u8, index: u16, sub_index: u8, timeout: Duration) -> Result<Vec<u8>, SdoError> {
		let peer = self.peer(server_id)?;
		self.queue(server_id).run(|| self.run_upload(peer, index, sub_index, timeout)).await
	}

	/// Download a value to a server's object dictionary, converting it to raw
	/// bytes via [`DownloadObject`]. Chooses expedited transfer for payloads
	/// of 4 bytes or less, segmented otherwise.
	pub async fn download<V: DownloadObject>(&self, server_id: u8, index: u16, sub_index: u8, value: &V, timeout: Duration) -> Result<(), SdoError> {
		self.download_raw(server_id, index, sub_index, &value.to_buffer(), timeout).await
	}

	/// Download raw bytes to a server's object dictionary.
	pub async fn download_raw(&self, server_id: u8, index: u16, sub_index: u8, data: &[u8], timeout: Duration) -> Result<(), SdoError> {
		let peer = self.peer(server_id)?;
		self.queue(server_id).run(|| self.run_download(peer, index, sub_index, data, timeout)).await
	}

	fn frame(&self, cob_id: u16, data: [u8; 8]) -> CanFrame {
		CanFrame::new(CanId::from(StandardId::new(cob_id).expect("cob-id is 11 bits")), &data, None)
			.expect("8 bytes always fit in a classic CAN frame")
	}

	async fn send(&self, transfer: &TransferCtx, data: [u8; 8]) -> Result<(), SdoError> {
		self.transport.send(self.frame(transfer.cob_id_tx, data)).await.map_err(SdoError::SendFailed)
	}

	async fn run_upload(&self, peer: ClientPeer, index: u16, sub_index: u8, timeout: Duration) -> Result<Vec<u8>, SdoError> {
		log::debug!("SDO upload start: cob_tx=0x{:03X} cob_rx=0x{:03X} object=0x{index:04X}sub{sub_index:02X} timeout={timeout:?}", peer.cob_id_tx, peer.cob_id_rx);
		let mut transfer = TransferCtx::new(index, sub_index, peer.cob_id_tx, timeout);
		let mut sub = self.transport.subscribe();

		transfer.start();
		self.send(&transfer, encode_initiate_upload(index, sub_index)).await?;

		let data = self.recv_matching(&mut sub, peer.cob_id_rx, &mut transfer).await?;
		let command = decode_command_byte(data[0]);
		if command.ccs == CCS_ABORT {
			return Err(self.abort_received(&data));
		}
		if command.ccs != SCS_INITIATE_UPLOAD {
			return Err(UnexpectedResponse { expected: "initiate upload response", actual: "unrelated SDO frame" }.into());
		}

		if command.expedited {
			let len = expedited_len(command);
			log::debug!("SDO upload complete (expedited, {len} bytes)");
			return Ok(data[4..4 + len].to_vec());
		}

		if command.last_or_size_indicated {
			transfer.size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
		}

		loop {
			self.send(&transfer, encode_segment_ack(CCS_UPLOAD_SEGMENT, transfer.toggle)).await?;
			let data = self.recv_matching(&mut sub, peer.cob_id_rx, &mut transfer).await?;
			let command = decode_command_byte(data[0]);
			if command.ccs == CCS_ABORT {
				return Err(self.abort_received(&data));
			}
			if command.ccs != SCS_UPLOAD_SEGMENT {
				return Err(UnexpectedResponse { expected: "upload segment response", actual: "unrelated SDO frame" }.into());
			}
			if command.toggle != transfer.toggle {
				let _ = self.send(&transfer, transfer.abort_frame(AbortCode::ToggleBit)).await;
				return Err(TransferAborted::new(AbortCode::ToggleBit).into());
			}

			let count = segment_len(command);
			transfer.buffer.extend_from_slice(&data[1..1 + count]);
			log::debug!("SDO upload segment: {count} bytes, total so far {}", transfer.buffer.len());

			if command.last_or_size_indicated {
				if transfer.size != 0 && transfer.buffer.len() as u32 != transfer.size {
					let _ = self.send(&transfer, transfer.abort_frame(AbortCode::BadLength)).await;
					return Err(WrongDataCount { expected: transfer.size, actual: transfer.buffer.len() as u32 }.into());
				}
				log::debug!("SDO upload complete (segmented, {} bytes)", transfer.buffer.len());
				return Ok(transfer.buffer);
			}
			transfer.flip_toggle();
		}
	}

	async fn run_download(&self, peer: ClientPeer, index: u16, sub_index: u8, data: &[u8], timeout: Duration) -> Result<(), SdoError> {
		log::debug!("SDO download start: cob_tx=0x{:03X} cob_rx=0x{:03X} object=0x{index:04X}sub{sub_index:02X} size={} timeout={timeout:?}", peer.cob_id_tx, peer.cob_id_rx, data.len());
		let mut transfer = TransferCtx::new(index, sub_index, peer.cob_id_tx, timeout);
		let mut sub = self.transport.subscribe();

		transfer.start();
		if data.len() <= 4 && !data.is_empty() {
			self.send(&transfer, encode_initiate_download(index, sub_index, data.len() as u32, Some(data))).await?;
			let reply = self.recv_matching(&mut sub, peer.cob_id_rx, &mut transfer).await?;
			return self.expect_download_ack(&transfer, &reply);
		}

		self.send(&transfer, encode_initiate_download(index, sub_index, data.len() as u32, None)).await?;
		let reply = self.recv_matching(&mut sub, peer.cob_id_rx, &mut transfer).await?;
		self.expect_download_ack(&transfer, &reply)?;

		let mut offset = 0;
		loop {
			let remaining = &data[offset..];
			let chunk_len = remaining.len().min(7);
			let chunk = &remaining[..chunk_len];
			let last = offset + chunk_len == data.len();
			self.send(&transfer, encode_segment(CCS_DOWNLOAD_SEGMENT, transfer.toggle, chunk, last)).await?;

			let reply = self.recv_matching(&mut sub, peer.cob_id_rx, &mut transfer).await?;
			let command = decode_command_byte(reply[0]);
			if command.ccs == CCS_ABORT {
				return Err(self.abort_received(&reply));
			}
			if command.ccs != SCS_DOWNLOAD_SEGMENT {
				return Err(UnexpectedResponse { expected: "download segment ack", actual: "unrelated SDO frame" }.into());
			}
			if command.toggle != transfer.toggle {
				let _ = self.send(&transfer, transfer.abort_frame(AbortCode::ToggleBit)).await;
				return Err(TransferAborted::new(AbortCode::ToggleBit).into());
			}

			offset += chunk_len;
			if last {
				log::debug!("SDO download complete ({} bytes)", data.len());
				return Ok(());
			}
			transfer.flip_toggle();
		}
	}

	fn expect_download_ack(&self, transfer: &TransferCtx, reply: &[u8; 8]) -> Result<(), SdoError> {
		let command = decode_command_byte(reply[0]);
		if command.ccs == CCS_ABORT {
			return Err(self.abort_received(reply));
		}
		if command.ccs != SCS_INITIATE_DOWNLOAD {
			return Err(UnexpectedResponse { expected: "initiate download ack", actual: "unrelated SDO frame" }.into());
		}
		let (index, sub_index) = decode_index_sub(reply);
		if index != transfer.index || sub_index != transfer.sub_index {
			return Err(UnexpectedResponse { expected: "ack for the requested object", actual: "ack for a different object" }.into());
		}
		Ok(())
	}

	fn abort_received(&self, data: &[u8; 8]) -> SdoError {
		TransferAborted::from_raw(decode_abort_code(data)).into()
	}

	async fn recv_matching(&self, sub: &mut Subscription, cob_id_rx: u16, transfer: &mut TransferCtx) -> Result<[u8; 8], SdoError> {
		let expected = CanId::from(StandardId::new(cob_id_rx).expect("cob-id is 11 bits"));
		loop {
			let deadline = transfer.deadline().expect("timer must be armed before receiving");
			let frame = match tokio::time::timeout_at(deadline, sub.recv()).await {
				Ok(Some(frame)) => frame,
				Ok(None) => return Err(SdoError::RecvFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "transport closed"))),
				Err(_) => {
					log::warn!("SDO transfer timed out waiting for a reply on 0x{cob_id_rx:03X}");
					let _ = self.send(transfer, transfer.abort_frame(AbortCode::Timeout)).await;
					return Err(SdoError::Timeout);
				},
			};
			if frame.is_rtr() || frame.id() != expected {
				continue;
			}
			let data = frame.data();
			if data.len() != 8 {
				return Err(MalformedResponse::WrongFrameSize(data.len()).into());
			}
			transfer.refresh();
			let mut array = [0u8; 8];
			array.copy_from_slice(data);
			return Ok(array);
		}
	}
}
