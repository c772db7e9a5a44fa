pub mod cursor;
pub mod detector;
pub mod formatter;

pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, PgCursorStore};
pub use detector::{ChangeDetector, Detection};
pub use formatter::MessageFormatter;
