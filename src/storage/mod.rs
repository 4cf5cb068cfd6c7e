pub mod layout;
pub mod codec;
pub mod aof;
