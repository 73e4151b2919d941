pub mod builder;
pub mod reader;

/// Per-entry header: type (1B) + key_len (4B) + val_len (4B).
pub const ENTRY_HEADER_SIZE: usize = 1 + 4 + 4;

/// Block trailer: num_entries (4B) + crc (4B).
pub const TRAILER_SIZE: usize = 4 + 4;
