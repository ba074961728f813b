//! Concrete task kinds reconciled on a node

mod file;
mod managed_file;
mod service;

pub use file::{Contents, File};
pub use managed_file::ManagedFile;
pub use service::Service;
