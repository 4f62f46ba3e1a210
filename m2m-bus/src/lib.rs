#![allow(dead_code)]

pub mod device;
pub mod error;
pub mod format;
pub mod loopback;
pub mod pool;
pub mod pump;
pub mod session;
