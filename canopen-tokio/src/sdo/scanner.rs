//! Shared COB-ID table builder for the client ([0x1280..0x12FF]) and server
//! ([0x1200..0x127F]) SDO parameter ranges.

use crate::dictionary::{Entry, ObjectDictionary};
use super::error::ConfigError;

/// Which sub-index carries which role within an SDO parameter record.
///
/// The client and server parameter records have the same shape (three
/// sub-entries: two COB-IDs and a peer node-ID) but opposite perspective: for
/// a client record, sub 1 is "this node's tx" (commands going out) and sub 2
/// is "this node's rx" (responses coming in); for a server record it is the
/// other way around.
#[derive(Debug, Copy, Clone)]
pub struct ScanLayout {
	/// Sub-index holding the COB-ID this node transmits on.
	pub tx_sub: u8,
	/// Sub-index holding the COB-ID this node receives on.
	pub rx_sub: u8,
	/// Sub-index holding the remote peer's node ID.
	pub id_sub: u8,
}

/// Layout of a client parameter record (0x1280-0x12FF): sub 1 = COB-ID
/// client->server (tx), sub 2 = COB-ID server->client (rx), sub 3 = server node-ID.
pub const CLIENT_LAYOUT: ScanLayout = ScanLayout { tx_sub: 1, rx_sub: 2, id_sub: 3 };

/// Layout of a server parameter record (0x1200-0x127F): sub 1 = COB-ID
/// rx from client, sub 2 = COB-ID tx to client, sub 3 = client node-ID.
pub const SERVER_LAYOUT: ScanLayout = ScanLayout { rx_sub: 1, tx_sub: 2, id_sub: 3 };

/// One resolved peer: the node ID and the two COB-IDs to use when talking to it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScannedPeer {
	/// The remote peer's node ID, `1..=127`.
	pub peer_id: u8,
	/// COB-ID this node transmits on to reach this peer.
	pub cob_id_tx: u16,
	/// COB-ID this node receives on from this peer.
	pub cob_id_rx: u16,
}

fn read_cob_id(entry: &Entry) -> u32 {
	let mut bytes = [0u8; 4];
	let len = entry.raw.len().min(4);
	bytes[..len].copy_from_slice(&entry.raw[..len]);
	u32::from_le_bytes(bytes)
}

fn read_peer_id(entry: &Entry) -> u8 {
	entry.raw.first().copied().unwrap_or(0)
}

/// Walk `range`, extracting valid `(peer_id, cob_id_tx, cob_id_rx)` triples per §4.6.
///
/// COB-IDs with the invalid bit (31) set are skipped. COB-IDs with the
/// dynamic (30) or extended (29) bit set cause a hard [`ConfigError::Unsupported`]
/// for that record, per invariant 5. When the low nibble of a COB-ID is zero,
/// the peer's node ID is OR-ed in, matching the CiA predefined connection set.
pub fn scan(dictionary: &ObjectDictionary, range: std::ops::RangeInclusive<u16>, layout: ScanLayout) -> Result<Vec<ScannedPeer>, ConfigError> {
	const INVALID: u32 = 1 << 31;
	const DYNAMIC: u32 = 1 << 30;
	const EXTENDED: u32 = 1 << 29;

	let mut peers = Vec::new();
	for (index, object) in dictionary.range(range) {
		if object.sub_number() == 0 {
			continue;
		}
		let (Some(tx_entry), Some(rx_entry), Some(id_entry)) =
			(object.get(layout.tx_sub), object.get(layout.rx_sub), object.get(layout.id_sub))
		else {
			continue;
		};

		let tx_raw = read_cob_id(tx_entry);
		let rx_raw = read_cob_id(rx_entry);
		if tx_raw & INVALID != 0 || rx_raw & INVALID != 0 {
			continue;
		}
		if tx_raw & (DYNAMIC | EXTENDED) != 0 || rx_raw & (DYNAMIC | EXTENDED) != 0 {
			return Err(ConfigError::Unsupported { index });
		}

		let peer_id = read_peer_id(id_entry);
		let mut cob_id_tx = (tx_raw & 0x7FF) as u16;
		let mut cob_id_rx = (rx_raw & 0x7FF) as u16;
		if cob_id_tx & 0xF == 0 {
			cob_id_tx |= u16::from(peer_id);
		}
		if cob_id_rx & 0xF == 0 {
			cob_id_rx |= u16::from(peer_id);
		}
		peers.push(ScannedPeer { peer_id, cob_id_tx, cob_id_rx });
	}
	Ok(peers)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dictionary::{AccessType, DataType};
	use assert2::{assert, let_assert};

	fn record(tx: u32, rx: u32, node_id: u8) -> Vec<(u8, Entry)> {
		vec![
			(1, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, tx.to_le_bytes())),
			(2, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, rx.to_le_bytes())),
			(3, Entry::new(DataType::Unsigned8, AccessType::ReadWrite, [node_id])),
		]
	}

	#[test]
	fn ors_in_peer_id_when_low_nibble_zero() {
		let mut dictionary = ObjectDictionary::new();
		dictionary.insert_record(0x1280, record(0x600, 0x580, 0x0B));
		let_assert!(Ok(peers) = scan(&dictionary, 0x1280..=0x12FF, CLIENT_LAYOUT));
		assert!(peers == vec![ScannedPeer { peer_id: 0x0B, cob_id_tx: 0x60B, cob_id_rx: 0x58B }]);
	}

	#[test]
	fn skips_invalid_entries() {
		let mut dictionary = ObjectDictionary::new();
		dictionary.insert_record(0x1280, record(0x8000_0600, 0x580, 0x0B));
		let_assert!(Ok(peers) = scan(&dictionary, 0x1280..=0x12FF, CLIENT_LAYOUT));
		assert!(peers.is_empty());
	}

	#[test]
	fn refuses_extended_cob_id() {
		let mut dictionary = ObjectDictionary::new();
		dictionary.insert_record(0x1280, record(0x2000_0600, 0x580, 0x0B));
		let_assert!(Err(ConfigError::Unsupported { index: 0x1280 }) = scan(&dictionary, 0x1280..=0x12FF, CLIENT_LAYOUT));
	}
}
