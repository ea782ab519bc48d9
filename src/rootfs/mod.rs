//! Establishes the container filesystem view: the configured mounts, the
//! OCI mandated default filesystems and device nodes, and the delayed
//! read-only remounts.

mod mount;

pub use mount::Mounter;
