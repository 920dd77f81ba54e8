//! Child process plumbing shared by the download and conversion steps.

mod records;
mod supervisor;

pub use records::RecordReader;
pub use supervisor::{OutputStream, ProcessExit, ProcessSlot, SupervisedChild};
