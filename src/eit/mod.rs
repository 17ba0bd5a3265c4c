//! EIT frame handling: `.eit` parsing, electrode assembly and conversion of
//! whole sessions into per-frame JSON files.

pub mod convert;
pub mod frame;
pub mod parser;

pub use convert::{convert_directory, ConversionSummary};
pub use frame::{assemble_frame, load_frames, EitFrame, EitSeries};
pub use parser::{format_timestamp, parse_eit, parse_timestamp, FrequencyScale, RawEitFile};
