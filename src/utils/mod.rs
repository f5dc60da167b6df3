pub mod error;
pub mod formats;
pub mod fs;

pub use error::{EngineError, EngineResult, HdrError, HdrResult, MergeRejection, PathError};
pub use formats::{ImageFormat, format_from_extension, mime_for_name};
pub use fs::{extract_filename, validate_input_path};
