pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

pub use builder::SSTableBuilder;
pub use footer::SSTableMeta;
pub use iterator::SSTableIterator;
pub use reader::SSTable;
