//! State kept about remote devices, independent of any transport.

pub mod path_buffer;
