pub mod cli;
pub mod config;
pub mod device_proxy;
pub mod enumerator;
pub mod error;
pub mod host_adb;
pub mod listener;
pub mod protocol;
pub mod scrcpy;
pub mod stream;

#[cfg(test)]
pub mod testing;


#[cfg(test)]
mod stream_test;
