//! A Linux application container runtime compatible with the OCI runtime
//! command line interface. The crate provides the launch engine used by
//! the `linyaps-box` binary: namespace creation, the supervisor/child
//! synchronization protocol, the mount plan, lifecycle hooks and the
//! persistent status directory.

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod commands;
pub mod config;
pub mod container;
pub mod dirfs;
pub mod fd;
pub mod hooks;
pub mod logger;
pub mod namespaces;
pub mod process;
pub mod rootfs;
pub mod signal;
pub mod status;
pub mod syscall;
pub mod user_ns;
pub mod utils;
