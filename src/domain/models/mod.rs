pub mod snapshot;
pub mod visibility;
