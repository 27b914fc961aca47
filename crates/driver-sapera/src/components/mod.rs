pub mod acquisition;
pub mod session;
pub mod shared;
pub mod signal;
