//! SDO server state machine (§4.5): responds to incoming client requests
//! against the local object dictionary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::time::Duration;

use can_socket::{CanFrame, CanId, StandardId};
use tokio::time::Instant;

use crate::dictionary::{AccessType, DataType, Entry, ObjectDictionary, Value};
use crate::transport::{Subscription, Transport};

use super::abort::AbortCode;
use super::address::SdoAddress;
use super::codec::*;
use super::error::ConfigError;
use super::scanner::{self, SERVER_LAYOUT};
use super::transfer::TransferCtx;

/// Object dictionary range holding this node's server SDO parameter records.
pub const SERVER_PARAMETER_RANGE: RangeInclusive<u16> = 0x1200..=0x127F;

/// Default timeout applied to an in-progress segmented transfer before it self-aborts.
pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_millis(30);

#[derive(Debug, Copy, Clone)]
struct ServerPeer {
	cob_id_tx: u16,
}

/// Drives the server half of the SDO protocol against a shared, in-process
/// object dictionary. One [`TransferCtx`] is kept per client that has an
/// in-progress segmented transfer; [`Self::handle_frame`] is the dispatch
/// function described in §4.5, and [`Self::run`] is a convenience event loop
/// that also expires timed-out transfers.
pub struct ServerFSM<T: Transport> {
	transport: T,
	sub: Subscription,
	dictionary: Rc<RefCell<ObjectDictionary>>,
	clients: HashMap<u16, ServerPeer>,
	transfers: HashMap<u16, TransferCtx>,
	segment_timeout: Duration,
}

impl<T: Transport> std::fmt::Debug for ServerFSM<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerFSM").field("clients", &self.clients.len()).finish_non_exhaustive()
	}
}

impl<T: Transport> ServerFSM<T> {
	/// Create a new server FSM over the given transport and object dictionary.
	/// Call [`Self::add_client`] and [`Self::init`] before starting [`Self::run`].
	///
	/// Subscribes to the transport immediately, so frames sent by a peer right
	/// after this call are never lost waiting for [`Self::run`] to be polled.
	pub fn new(transport: T, dictionary: Rc<RefCell<ObjectDictionary>>) -> Self {
		let sub = transport.subscribe();
		Self {
			transport,
			sub,
			dictionary,
			clients: HashMap::new(),
			transfers: HashMap::new(),
			segment_timeout: DEFAULT_SEGMENT_TIMEOUT,
		}
	}

	/// Override the timeout applied to in-progress segmented transfers.
	pub fn with_segment_timeout(mut self, timeout: Duration) -> Self {
		self.segment_timeout = timeout;
		self
	}

	/// Shared handle to the underlying object dictionary.
	pub fn dictionary(&self) -> Rc<RefCell<ObjectDictionary>> {
		self.dictionary.clone()
	}

	/// Register a remote SDO client, allocating a server parameter record in
	/// `0x1200..=0x127F`. Does not take effect until [`Self::init`] is called.
	pub fn add_client(&mut self, client_id: u8, sdo: SdoAddress) -> Result<(), ConfigError> {
		if !(1..=127).contains(&client_id) {
			return Err(ConfigError::Range(client_id));
		}
		let mut dictionary = self.dictionary.borrow_mut();
		if find_record(&dictionary, client_id).is_some() {
			return Err(ConfigError::Duplicate(client_id));
		}
		let index = next_free_index(&dictionary)?;
		dictionary.insert_record(index, [
			(1, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, u32::from(sdo.command_address()).to_le_bytes())),
			(2, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, u32::from(sdo.response_address()).to_le_bytes())),
			(3, Entry::new(DataType::Unsigned8, AccessType::ReadWrite, [client_id])),
		]);
		Ok(())
	}

	/// Remove a previously registered client. Does not take effect until [`Self::init`] is called.
	pub fn remove_client(&mut self, client_id: u8) -> Result<(), ConfigError> {
		let mut dictionary = self.dictionary.borrow_mut();
		let index = find_record(&dictionary, client_id).ok_or(ConfigError::NotFound(client_id))?;
		dictionary.remove(index);
		Ok(())
	}

	/// Scan `0x1200..=0x127F` and rebuild the active peer table.
	pub fn init(&mut self) -> Result<(), ConfigError> {
		let dictionary = self.dictionary.borrow();
		let scanned = scanner::scan(&dictionary, SERVER_PARAMETER_RANGE, SERVER_LAYOUT)?;
		drop(dictionary);
		self.clients.clear();
		for peer in scanned {
			self.clients.insert(peer.cob_id_rx, ServerPeer { cob_id_tx: peer.cob_id_tx });
		}
		Ok(())
	}

	fn frame(&self, cob_id: u16, data: [u8; 8]) -> CanFrame {
		CanFrame::new(CanId::from(StandardId::new(cob_id).expect("cob-id is 11 bits")), &data, None)
			.expect("8 bytes always fit in a classic CAN frame")
	}

	/// Handle one inbound CAN frame, returning a reply to send, if any.
	///
	/// Frames that are not from a known client, are RTR frames, or do not
	/// carry 8 data bytes are silently ignored.
	pub fn handle_frame(&mut self, frame: CanFrame) -> Option<CanFrame> {
		if frame.is_rtr() {
			return None;
		}
		let CanId::Standard(id) = frame.id() else { return None };
		let cob_id_rx = id.as_u16();
		let peer = *self.clients.get(&cob_id_rx)?;
		let data = frame.data();
		if data.len() != 8 {
			return None;
		}
		let mut array = [0u8; 8];
		array.copy_from_slice(data);
		let command = decode_command_byte(array[0]);

		let response = match command.ccs {
			CCS_INITIATE_DOWNLOAD => self.handle_download_initiate(peer, cob_id_rx, &array, command),
			CCS_DOWNLOAD_SEGMENT => self.handle_download_segment(cob_id_rx, &array, command),
			CCS_INITIATE_UPLOAD => self.handle_upload_initiate(peer, cob_id_rx, &array),
			CCS_UPLOAD_SEGMENT => self.handle_upload_segment(cob_id_rx, command),
			CCS_ABORT => {
				self.transfers.remove(&cob_id_rx);
				None
			},
			_ => {
				let (index, sub_index) = decode_index_sub(&array);
				log::warn!("SDO server got unknown command specifier 0x{:02X} for 0x{index:04X}sub{sub_index:02X}", command.ccs);
				Some(encode_abort(index, sub_index, AbortCode::BadCommand))
			},
		};
		response.map(|data| self.frame(peer.cob_id_tx, data))
	}

	fn handle_download_initiate(&mut self, peer: ServerPeer, cob_id_rx: u16, data: &[u8; 8], command: CommandByte) -> Option<[u8; 8]> {
		let (index, requested_sub) = decode_index_sub(data);
		let mut dictionary = self.dictionary.borrow_mut();
		let Some(object) = dictionary.get_object(index) else {
			return Some(encode_abort(index, requested_sub, AbortCode::ObjectUndefined));
		};
		let sub_index = if object.sub_number() > 0 { requested_sub } else { 0 };
		let Some(entry) = object.get(sub_index) else {
			return Some(encode_abort(index, sub_index, AbortCode::BadSubIndex));
		};
		if !entry.access_type.is_writable() {
			return Some(encode_abort(index, sub_index, AbortCode::ReadOnly));
		}

		if command.expedited {
			let len = expedited_len(command);
			let payload = &data[4..4 + len];
			if let Err(code) = check_range(entry, payload) {
				return Some(encode_abort(index, sub_index, code));
			}
			dictionary.get_entry_mut(index, sub_index).expect("checked above").raw = payload.to_vec();
			log::debug!("SDO download (expedited): 0x{index:04X}sub{sub_index:02X} <- {len} bytes");
			return Some(encode_initiate_download_ack(index, sub_index));
		}

		drop(dictionary);
		let mut transfer = TransferCtx::new(index, sub_index, peer.cob_id_tx, self.segment_timeout);
		transfer.size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
		transfer.start();
		self.transfers.insert(cob_id_rx, transfer);
		Some(encode_initiate_download_ack(index, sub_index))
	}

	fn handle_download_segment(&mut self, cob_id_rx: u16, data: &[u8; 8], command: CommandByte) -> Option<[u8; 8]> {
		let transfer = self.transfers.get_mut(&cob_id_rx)?;
		if command.toggle != transfer.toggle {
			let frame = transfer.abort_frame(AbortCode::ToggleBit);
			self.transfers.remove(&cob_id_rx);
			return Some(frame);
		}

		let count = segment_len(command);
		transfer.buffer.extend_from_slice(&data[1..1 + count]);
		transfer.refresh();

		if !command.last_or_size_indicated {
			let ack = encode_segment_ack(SCS_DOWNLOAD_SEGMENT, command.toggle);
			transfer.flip_toggle();
			return Some(ack);
		}

		let transfer = self.transfers.remove(&cob_id_rx).expect("looked up above");
		let (index, sub_index) = (transfer.index, transfer.sub_index);
		if transfer.size != 0 && transfer.buffer.len() as u32 != transfer.size {
			return Some(encode_abort(index, sub_index, AbortCode::BadLength));
		}
		let mut dictionary = self.dictionary.borrow_mut();
		let Some(object) = dictionary.get_object(index) else {
			return Some(encode_abort(index, sub_index, AbortCode::ObjectUndefined));
		};
		let Some(entry) = object.get(sub_index) else {
			return Some(encode_abort(index, sub_index, AbortCode::BadSubIndex));
		};
		if !entry.access_type.is_writable() {
			return Some(encode_abort(index, sub_index, AbortCode::ReadOnly));
		}
		if let Err(code) = check_range(entry, &transfer.buffer) {
			return Some(encode_abort(index, sub_index, code));
		}
		log::debug!("SDO download (segmented): 0x{index:04X}sub{sub_index:02X} <- {} bytes", transfer.buffer.len());
		dictionary.get_entry_mut(index, sub_index).expect("checked above").raw = transfer.buffer;
		Some(encode_segment_ack(SCS_DOWNLOAD_SEGMENT, command.toggle))
	}

	fn handle_upload_initiate(&mut self, peer: ServerPeer, cob_id_rx: u16, data: &[u8; 8]) -> Option<[u8; 8]> {
		let (index, requested_sub) = decode_index_sub(data);
		let dictionary = self.dictionary.borrow();
		let Some(object) = dictionary.get_object(index) else {
			return Some(encode_abort(index, requested_sub, AbortCode::ObjectUndefined));
		};
		let sub_index = if object.sub_number() > 0 { requested_sub } else { 0 };
		let Some(entry) = object.get(sub_index) else {
			return Some(encode_abort(index, sub_index, AbortCode::BadSubIndex));
		};
		if !entry.access_type.is_readable() {
			return Some(encode_abort(index, sub_index, AbortCode::WriteOnly));
		}

		if entry.size() <= 4 && !entry.raw.is_empty() {
			log::debug!("SDO upload (expedited): 0x{index:04X}sub{sub_index:02X} -> {} bytes", entry.size());
			return Some(encode_initiate_upload_response(index, sub_index, &entry.raw));
		}

		let total = entry.raw.len() as u32;
		let mut transfer = TransferCtx::new(index, sub_index, peer.cob_id_tx, self.segment_timeout);
		transfer.buffer = entry.raw.clone();
		transfer.size = total;
		drop(dictionary);
		transfer.start();
		self.transfers.insert(cob_id_rx, transfer);
		Some(encode_initiate_upload_response_segmented(index, sub_index, total))
	}

	fn handle_upload_segment(&mut self, cob_id_rx: u16, command: CommandByte) -> Option<[u8; 8]> {
		let transfer = self.transfers.get_mut(&cob_id_rx)?;
		if command.toggle != transfer.toggle {
			let frame = transfer.abort_frame(AbortCode::ToggleBit);
			self.transfers.remove(&cob_id_rx);
			return Some(frame);
		}

		let chunk_len = transfer.buffer.len().min(7);
		let chunk: Vec<u8> = transfer.buffer.drain(..chunk_len).collect();
		let last = transfer.buffer.is_empty();
		let ack = encode_segment(SCS_UPLOAD_SEGMENT, transfer.toggle, &chunk, last);
		transfer.flip_toggle();
		transfer.refresh();
		log::debug!("SDO upload segment: 0x{:04X}sub{:02X} -> {} bytes, last={last}", transfer.index, transfer.sub_index, chunk.len());
		if last {
			self.transfers.remove(&cob_id_rx);
		}
		Some(ack)
	}

	fn next_deadline(&self) -> Option<Instant> {
		self.transfers.values().filter_map(TransferCtx::deadline).min()
	}

	fn expire_timed_out(&mut self) -> Vec<CanFrame> {
		let expired: Vec<u16> = self.transfers.iter().filter(|(_, transfer)| transfer.is_expired()).map(|(cob_id_rx, _)| *cob_id_rx).collect();
		let timed_out: Vec<TransferCtx> = expired.into_iter().filter_map(|cob_id_rx| self.transfers.remove(&cob_id_rx)).collect();
		timed_out.into_iter()
			.map(|transfer| {
				log::warn!("SDO server transfer for 0x{:04X}sub{:02X} timed out", transfer.index, transfer.sub_index);
				self.frame(transfer.cob_id_tx, transfer.abort_frame(AbortCode::Timeout))
			})
			.collect()
	}

	/// Run the server event loop: receive frames, dispatch them, and expire
	/// timed-out segmented transfers, until the transport is closed.
	pub async fn run(&mut self) -> std::io::Result<()> {
		loop {
			let sleep = match self.next_deadline() {
				Some(deadline) => tokio::time::sleep_until(deadline),
				// Nothing pending: sleep far longer than any realistic SDO timeout
				// and let the next inbound frame wake us up instead.
				None => tokio::time::sleep(Duration::from_secs(3600)),
			};
			tokio::select! {
				frame = self.sub.recv() => {
					match frame {
						Some(frame) => {
							if let Some(response) = self.handle_frame(frame) {
								self.transport.send(response).await?;
							}
						},
						None => return Ok(()),
					}
				},
				_ = sleep => {
					for frame in self.expire_timed_out() {
						self.transport.send(frame).await?;
					}
				},
			}
		}
	}
}

fn find_record(dictionary: &ObjectDictionary, client_id: u8) -> Option<u16> {
	dictionary.range(SERVER_PARAMETER_RANGE)
		.find(|(_, object)| object.get(3).and_then(|entry| entry.raw.first()) == Some(&client_id))
		.map(|(index, _)| index)
}

fn next_free_index(dictionary: &ObjectDictionary) -> Result<u16, ConfigError> {
	SERVER_PARAMETER_RANGE.clone().find(|index| dictionary.get_object(*index).is_none())
		.ok_or(ConfigError::NoFreeSlot)
}

fn value_as_i128(value: &Value) -> Option<i128> {
	match value {
		Value::Boolean(value) => Some(i128::from(*value)),
		Value::U8(value) => Some(i128::from(*value)),
		Value::U16(value) => Some(i128::from(*value)),
		Value::U32(value) => Some(i128::from(*value)),
		Value::U64(value) => Some(i128::from(*value)),
		Value::I8(value) => Some(i128::from(*value)),
		Value::I16(value) => Some(i128::from(*value)),
		Value::I32(value) => Some(i128::from(*value)),
		Value::I64(value) => Some(i128::from(*value)),
		Value::F32(_) | Value::F64(_) | Value::VisibleString(_) | Value::Bytes(_) => None,
	}
}

/// Validate the length and `high_limit`/`low_limit` of a downloaded payload
/// against the entry it will be committed to. Range checks only apply to
/// integer/boolean data types; other types are length-checked only.
fn check_range(entry: &Entry, payload: &[u8]) -> Result<(), AbortCode> {
	if let Some(expected) = entry.data_type.fixed_size() {
		if payload.len() != expected {
			return Err(AbortCode::BadLength);
		}
	}
	let value = crate::dictionary::raw_to_type(payload, entry.data_type).map_err(|_| AbortCode::BadLength)?;
	let Some(value) = value_as_i128(&value) else {
		return Ok(());
	};
	if let Some(high) = &entry.high_limit {
		if let Ok(high) = crate::dictionary::raw_to_type(high, entry.data_type) {
			if let Some(high) = value_as_i128(&high) {
				if value > high {
					return Err(AbortCode::ValueHigh);
				}
			}
		}
	}
	if let Some(low) = &entry.low_limit {
		if let Ok(low) = crate::dictionary::raw_to_type(low, entry.data_type) {
			if let Some(low) = value_as_i128(&low) {
				if value < low {
					return Err(AbortCode::ValueLow);
				}
			}
		}
	}
	Ok(())
}
