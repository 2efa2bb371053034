pub mod comm;
pub mod config;
pub mod consts;
pub mod controller;
pub mod directory;
pub mod error;
pub mod gpio;
pub mod http;
pub mod pattern;
pub mod payload;
pub mod session;
