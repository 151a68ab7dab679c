/// Error produced by [`raw_to_type`][super::data_type::raw_to_type].
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DictionaryError {
	/// The raw buffer did not match the size required by the declared data type.
	#[error("wrong size for data type: expected {expected}, got {actual}")]
	WrongSize {
		/// Size required by the data type.
		expected: usize,
		/// Size actually given.
		actual: usize,
	},

	/// A `VISIBLE_STRING` value was not valid UTF-8.
	#[error("invalid UTF-8 in VISIBLE_STRING value")]
	InvalidUtf8,
}
