//! Store registry built from a workspace configuration

mod registry;

pub use registry::StoreRegistry;
