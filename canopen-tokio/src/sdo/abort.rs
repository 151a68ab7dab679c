//! SDO abort codes, as defined by CiA 301 §7.2.4.3.17.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A standard CiA 301 SDO abort code.
///
/// Abort codes that are not part of this closed enumeration are not lost:
/// callers that need to preserve an unrecognized inbound code should keep the
/// raw `u32` alongside a failed [`AbortCode::from_raw`] conversion rather than
/// discarding it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum AbortCode {
	/// Toggle bit not alternated.
	ToggleBit = 0x0503_0000,
	/// SDO protocol timed out.
	Timeout = 0x0504_0000,
	/// Client/server command specifier not valid or unknown.
	BadCommand = 0x0504_0001,
	/// Out of memory.
	OutOfMemory = 0x0504_0005,
	/// Unsupported access to an object.
	UnsupportedAccess = 0x0601_0000,
	/// Attempt to read a write-only object.
	WriteOnly = 0x0601_0001,
	/// Attempt to write a read-only object.
	ReadOnly = 0x0601_0002,
	/// Object does not exist in the object dictionary.
	ObjectUndefined = 0x0602_0000,
	/// Data type does not match, length of service parameter does not match.
	BadLength = 0x0607_0010,
	/// Data type does not match, length of service parameter too high.
	DataLong = 0x0607_0012,
	/// Data type does not match, length of service parameter too low.
	DataShort = 0x0607_0013,
	/// Sub-index does not exist.
	BadSubIndex = 0x0609_0011,
	/// Invalid value for parameter.
	BadValue = 0x0609_0030,
	/// Value of parameter written too high.
	ValueHigh = 0x0609_0031,
	/// Value of parameter written too low.
	ValueLow = 0x0609_0032,
	/// Maximum value is less than minimum value.
	RangeError = 0x0609_0036,
	/// SDO connection not available.
	SdoNotAvailable = 0x060A_0023,
	/// General error.
	GeneralError = 0x0800_0000,
	/// Data cannot be transferred or stored to the application.
	DataTransfer = 0x0800_0020,
	/// Data cannot be transferred due to local control.
	LocalControl = 0x0800_0021,
	/// Data cannot be transferred in the current device state.
	DeviceState = 0x0800_0022,
	/// Object dictionary dynamic generation fails or no object dictionary present.
	OdError = 0x0800_0023,
	/// No data available.
	NoData = 0x0800_0024,
}

impl AbortCode {
	/// Parse a raw abort code, returning the raw value if it is not recognized.
	pub fn from_raw(code: u32) -> Result<Self, u32> {
		Self::try_from(code).map_err(|_| code)
	}

	/// Get the raw numeric value of this abort code.
	pub fn to_raw(self) -> u32 {
		self.into()
	}

	/// Human readable message for this abort code, matching the CiA 301 table.
	pub fn message(self) -> &'static str {
		match self {
			Self::ToggleBit => "toggle bit not alternated",
			Self::Timeout => "SDO protocol timed out",
			Self::BadCommand => "client/server command specifier not valid or unknown",
			Self::OutOfMemory => "out of memory",
			Self::UnsupportedAccess => "unsupported access to an object",
			Self::WriteOnly => "attempt to read a write only object",
			Self::ReadOnly => "attempt to write a read only object",
			Self::ObjectUndefined => "object does not exist in the object dictionary",
			Self::BadLength => "data type does not match: length of service parameter does not match",
			Self::DataLong => "data type does not match: length of service parameter too high",
			Self::DataShort => "data type does not match: length of service parameter too low",
			Self::BadSubIndex => "sub-index does not exist",
			Self::BadValue => "invalid value for parameter",
			Self::ValueHigh => "value of parameter written too high",
			Self::ValueLow => "value of parameter written too low",
			Self::RangeError => "maximum value is less than minimum value",
			Self::SdoNotAvailable => "SDO connection not available",
			Self::GeneralError => "general error",
			Self::DataTransfer => "data cannot be transferred or stored to the application",
			Self::LocalControl => "data cannot be transferred due to local control",
			Self::DeviceState => "data cannot be transferred in the current device state",
			Self::OdError => "object dictionary dynamic generation fails or no object dictionary present",
			Self::NoData => "no data available",
		}
	}
}

impl std::fmt::Display for AbortCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} (0x{:08X})", self.message(), self.to_raw())
	}
}

/// Render a message for a possibly-unrecognized abort code.
pub fn message_for(code: Result<AbortCode, u32>) -> String {
	match code {
		Ok(code) => code.message().to_owned(),
		Err(raw) => format!("unknown error (0x{raw:08X})"),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn data_short_matches_cia_301_not_source_bug() {
		assert!(AbortCode::DataShort.to_raw() == 0x0607_0013);
		assert!(AbortCode::DataLong.to_raw() == 0x0607_0012);
	}

	#[test]
	fn unknown_code_is_preserved() {
		assert!(AbortCode::from_raw(0x1234_5678) == Err(0x1234_5678));
		assert!(AbortCode::from_raw(0x0503_0000) == Ok(AbortCode::ToggleBit));
	}
}
