use super::access::AccessType;
use super::data_type::DataType;

/// A single object dictionary entry (a VAR, or one sub-entry of a RECORD/ARRAY).
#[derive(Debug, Clone)]
pub struct Entry {
	/// The entry's declared data type.
	pub data_type: DataType,
	/// The entry's access restriction.
	pub access_type: AccessType,
	/// The current value, as raw little-endian bytes.
	pub raw: Vec<u8>,
	/// Optional upper bound, as raw little-endian bytes, checked on download.
	pub high_limit: Option<Vec<u8>>,
	/// Optional lower bound, as raw little-endian bytes, checked on download.
	pub low_limit: Option<Vec<u8>>,
}

impl Entry {
	/// Create a new entry with no range limits.
	pub fn new(data_type: DataType, access_type: AccessType, raw: impl Into<Vec<u8>>) -> Self {
		Self {
			data_type,
			access_type,
			raw: raw.into(),
			high_limit: None,
			low_limit: None,
		}
	}

	/// Attach a lower bound, checked (as raw bytes, per the entry's data type ordering) on download.
	pub fn with_low_limit(mut self, low_limit: impl Into<Vec<u8>>) -> Self {
		self.low_limit = Some(low_limit.into());
		self
	}

	/// Attach an upper bound, checked (as raw bytes, per the entry's data type ordering) on download.
	pub fn with_high_limit(mut self, high_limit: impl Into<Vec<u8>>) -> Self {
		self.high_limit = Some(high_limit.into());
		self
	}

	/// Current declared size of the entry, in bytes.
	pub fn size(&self) -> usize {
		self.raw.len()
	}
}

/// An object in the object dictionary: either a single VAR entry (`sub_number == 0`)
/// or a composite RECORD/ARRAY with one [`Entry`] per sub-index (`sub_number > 0`).
#[derive(Debug, Clone, Default)]
pub struct Object {
	entries: std::collections::BTreeMap<u8, Entry>,
}

impl Object {
	/// Create a plain VAR object, addressable at sub-index 0.
	pub fn var(entry: Entry) -> Self {
		let mut entries = std::collections::BTreeMap::new();
		entries.insert(0, entry);
		Self { entries }
	}

	/// Create a composite RECORD/ARRAY object from its sub-entries.
	pub fn record(entries: impl IntoIterator<Item = (u8, Entry)>) -> Self {
		Self { entries: entries.into_iter().collect() }
	}

	/// The highest defined sub-index (`sub_number` in spec terms): 0 for a VAR object.
	pub fn sub_number(&self) -> u8 {
		self.entries.keys().copied().max().unwrap_or(0)
	}

	/// Get a sub-entry by sub-index.
	pub fn get(&self, sub_index: u8) -> Option<&Entry> {
		self.entries.get(&sub_index)
	}

	/// Get a mutable sub-entry by sub-index.
	pub fn get_mut(&mut self, sub_index: u8) -> Option<&mut Entry> {
		self.entries.get_mut(&sub_index)
	}

	/// Insert or replace a sub-entry.
	pub fn insert(&mut self, sub_index: u8, entry: Entry) {
		self.entries.insert(sub_index, entry);
	}
}
