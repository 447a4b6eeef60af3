pub mod command;
pub mod decode;
pub mod encode;
