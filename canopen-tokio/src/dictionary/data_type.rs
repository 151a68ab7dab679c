use super::error::DictionaryError;

/// The CANopen basic data type of an object dictionary entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DataType {
	/// `BOOLEAN`
	Boolean,
	/// `UNSIGNED8`
	Unsigned8,
	/// `UNSIGNED16`
	Unsigned16,
	/// `UNSIGNED32`
	Unsigned32,
	/// `UNSIGNED64`
	Unsigned64,
	/// `INTEGER8`
	Integer8,
	/// `INTEGER16`
	Integer16,
	/// `INTEGER32`
	Integer32,
	/// `INTEGER64`
	Integer64,
	/// `REAL32`
	Real32,
	/// `REAL64`
	Real64,
	/// `VISIBLE_STRING`
	VisibleString,
	/// `OCTET_STRING`
	OctetString,
	/// `DOMAIN`, an opaque, arbitrarily sized blob.
	Domain,
}

impl DataType {
	/// The fixed encoded size in bytes, or [`None`] for variable-length types
	/// (`VisibleString`, `OctetString`, `Domain`).
	pub fn fixed_size(self) -> Option<usize> {
		match self {
			Self::Boolean | Self::Unsigned8 | Self::Integer8 => Some(1),
			Self::Unsigned16 | Self::Integer16 => Some(2),
			Self::Unsigned32 | Self::Integer32 | Self::Real32 => Some(4),
			Self::Unsigned64 | Self::Integer64 | Self::Real64 => Some(8),
			Self::VisibleString | Self::OctetString | Self::Domain => None,
		}
	}
}

/// A dynamically typed object dictionary value, as produced by [`raw_to_type`] and
/// consumed by [`type_to_raw`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	/// `BOOLEAN`
	Boolean(bool),
	/// `UNSIGNED8`
	U8(u8),
	/// `UNSIGNED16`
	U16(u16),
	/// `UNSIGNED32`
	U32(u32),
	/// `UNSIGNED64`
	U64(u64),
	/// `INTEGER8`
	I8(i8),
	/// `INTEGER16`
	I16(i16),
	/// `INTEGER32`
	I32(i32),
	/// `INTEGER64`
	I64(i64),
	/// `REAL32`
	F32(f32),
	/// `REAL64`
	F64(f64),
	/// `VISIBLE_STRING`
	VisibleString(String),
	/// `OCTET_STRING` or `DOMAIN`
	Bytes(Vec<u8>),
}

/// Convert a raw little-endian byte buffer into a typed value, per the object's declared [`DataType`].
pub fn raw_to_type(raw: &[u8], data_type: DataType) -> Result<Value, DictionaryError> {
	fn bytes<const N: usize>(raw: &[u8]) -> Result<[u8; N], DictionaryError> {
		raw.try_into().map_err(|_| DictionaryError::WrongSize { expected: N, actual: raw.len() })
	}

	Ok(match data_type {
		DataType::Boolean => Value::Boolean(bytes::<1>(raw)?[0] != 0),
		DataType::Unsigned8 => Value::U8(bytes::<1>(raw)?[0]),
		DataType::Unsigned16 => Value::U16(u16::from_le_bytes(bytes(raw)?)),
		DataType::Unsigned32 => Value::U32(u32::from_le_bytes(bytes(raw)?)),
		DataType::Unsigned64 => Value::U64(u64::from_le_bytes(bytes(raw)?)),
		DataType::Integer8 => Value::I8(i8::from_le_bytes(bytes(raw)?)),
		DataType::Integer16 => Value::I16(i16::from_le_bytes(bytes(raw)?)),
		DataType::Integer32 => Value::I32(i32::from_le_bytes(bytes(raw)?)),
		DataType::Integer64 => Value::I64(i64::from_le_bytes(bytes(raw)?)),
		DataType::Real32 => Value::F32(f32::from_le_bytes(bytes(raw)?)),
		DataType::Real64 => Value::F64(f64::from_le_bytes(bytes(raw)?)),
		DataType::VisibleString => Value::VisibleString(
			std::str::from_utf8(raw).map_err(|_| DictionaryError::InvalidUtf8)?.to_owned(),
		),
		DataType::OctetString | DataType::Domain => Value::Bytes(raw.to_vec()),
	})
}

/// Convert a typed value back into its raw little-endian byte encoding.
pub fn type_to_raw(value: &Value) -> Vec<u8> {
	match value {
		Value::Boolean(value) => vec![u8::from(*value)],
		Value::U8(value) => vec![*value],
		Value::U16(value) => value.to_le_bytes().to_vec(),
		Value::U32(value) => value.to_le_bytes().to_vec(),
		Value::U64(value) => value.to_le_bytes().to_vec(),
		Value::I8(value) => value.to_le_bytes().to_vec(),
		Value::I16(value) => value.to_le_bytes().to_vec(),
		Value::I32(value) => value.to_le_bytes().to_vec(),
		Value::I64(value) => value.to_le_bytes().to_vec(),
		Value::F32(value) => value.to_le_bytes().to_vec(),
		Value::F64(value) => value.to_le_bytes().to_vec(),
		Value::VisibleString(value) => value.as_bytes().to_vec(),
		Value::Bytes(value) => value.clone(),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	#[test]
	fn round_trips_unsigned32() {
		let value = Value::U32(0xDEADBEEF);
		let raw = type_to_raw(&value);
		let_assert!(Ok(parsed) = raw_to_type(&raw, DataType::Unsigned32));
		assert!(parsed == value);
	}

	#[test]
	fn round_trips_visible_string() {
		let value = Value::VisibleString("HelloWorld".to_owned());
		let raw = type_to_raw(&value);
		assert!(raw == b"HelloWorld");
		let_assert!(Ok(parsed) = raw_to_type(&raw, DataType::VisibleString));
		assert!(parsed == value);
	}
}
