//! Typed convenience layer over the raw upload/download primitives.
//!
//! The engine itself only knows about byte buffers (see [`crate::dictionary::raw_to_type`]
//! / [`crate::dictionary::type_to_raw`] for the object-dictionary side of typed
//! conversion). `UploadObject`/`DownloadObject` are the client-facing equivalent:
//! they let callers of [`ClientFSM::upload`][super::client::ClientFSM::upload] and
//! [`ClientFSM::download`][super::client::ClientFSM::download] work directly with
//! Rust integers, `String` and `Vec<u8>` instead of raw bytes.

/// A value that can be parsed from the raw bytes produced by an SDO upload.
pub trait UploadObject: Sized {
	/// Error produced when the uploaded bytes do not encode a valid value.
	type Error: std::fmt::Display;

	/// Parse a value out of the bytes received from the server.
	fn parse_buffer(buffer: Vec<u8>) -> Result<Self, Self::Error>;
}

/// A value that can be converted to raw bytes for an SDO download.
pub trait DownloadObject {
	/// Encode this value as the raw bytes to send to the server.
	fn to_buffer(&self) -> Vec<u8>;
}

/// A buffer did not contain the number of bytes required to parse an integer.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("expected {expected} bytes, got {actual}")]
pub struct WrongByteCount {
	/// Number of bytes required by the target type.
	pub expected: usize,
	/// Number of bytes actually received.
	pub actual: usize,
}

macro_rules! impl_integer {
	($($type:ty),*) => {
		$(
			impl UploadObject for $type {
				type Error = WrongByteCount;

				fn parse_buffer(buffer: Vec<u8>) -> Result<Self, Self::Error> {
					let expected = std::mem::size_of::<$type>();
					let bytes: [u8; std::mem::size_of::<$type>()] = buffer.as_slice().try_into()
						.map_err(|_| WrongByteCount { expected, actual: buffer.len() })?;
					Ok(<$type>::from_le_bytes(bytes))
				}
			}

			impl DownloadObject for $type {
				fn to_buffer(&self) -> Vec<u8> {
					self.to_le_bytes().to_vec()
				}
			}
		)*
	};
}

impl_integer!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128);

impl UploadObject for Vec<u8> {
	type Error = std::convert::Infallible;

	fn parse_buffer(buffer: Vec<u8>) -> Result<Self, Self::Error> {
		Ok(buffer)
	}
}

impl DownloadObject for Vec<u8> {
	fn to_buffer(&self) -> Vec<u8> {
		self.clone()
	}
}

impl DownloadObject for &[u8] {
	fn to_buffer(&self) -> Vec<u8> {
		self.to_vec()
	}
}

impl UploadObject for String {
	type Error = std::string::FromUtf8Error;

	fn parse_buffer(buffer: Vec<u8>) -> Result<Self, Self::Error> {
		String::from_utf8(buffer)
	}
}

impl DownloadObject for String {
	fn to_buffer(&self) -> Vec<u8> {
		self.as_bytes().to_vec()
	}
}

impl DownloadObject for &str {
	fn to_buffer(&self) -> Vec<u8> {
		self.as_bytes().to_vec()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::let_assert;

	#[test]
	fn parses_little_endian_integers() {
		let_assert!(Ok(value) = u32::parse_buffer(vec![0xEF, 0xBE, 0xAD, 0xDE]));
		assert_eq!(value, 0xDEAD_BEEF);
	}

	#[test]
	fn rejects_wrong_size() {
		let_assert!(Err(_) = u32::parse_buffer(vec![1, 2, 3]));
	}
}
