pub mod ip;
pub mod network;
