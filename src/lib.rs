pub mod archive;
pub mod cli;
pub mod config;
pub mod source;
pub mod storage;
pub mod types;
pub mod watch;
pub mod web;
