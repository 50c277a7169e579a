pub mod file;
pub mod hex;
pub mod io;
pub mod mio;
