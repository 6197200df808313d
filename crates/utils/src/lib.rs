pub mod error;

pub use error::{report_error, FileIOError};

/// Treats empty and whitespace-only strings as missing.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|s| !s.is_empty())
}
