//! Parsed device data structures for fprust

pub mod error;
pub mod index_table;
pub mod system_params;

pub use error::{Error, Result};
pub use index_table::IndexTable;
pub use system_params::{StatusRegister, SystemParameters};
