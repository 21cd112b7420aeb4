pub(crate) mod ast_utils;
pub(crate) mod escaping;
pub(crate) mod params;
pub(crate) mod vtable;

pub use params::PlaceholderBindings;
