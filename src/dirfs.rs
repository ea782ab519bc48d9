//! Filesystem mutation relative to an open directory handle. Anchoring
//! every operation to a held descriptor keeps concurrent renames of parent
//! directories from redirecting it outside the intended root.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::{Mode, SFlag};

use crate::fd::FileDescriptor;
use crate::utils;

/// Opens an absolute path into a handle.
pub fn open(path: &Path, flags: OFlag) -> Result<FileDescriptor> {
    let fd = fcntl::open(path, flags | OFlag::O_CLOEXEC, Mode::empty())
        .with_context(|| format!("failed to open {:?}", path))?;
    Ok(FileDescriptor::new(fd))
}

/// Opens `path` relative to `root`. The error message carries both the
/// requested path and the target the root handle currently resolves to,
/// read back through procfs.
pub fn open_at(root: &FileDescriptor, path: &Path, flags: OFlag) -> Result<FileDescriptor> {
    match fcntl::openat(root.as_raw_fd(), path, flags | OFlag::O_CLOEXEC, Mode::empty()) {
        Ok(fd) => Ok(FileDescriptor::new(fd)),
        Err(errno) => {
            let target = fs::read_link(root.proc_path()).unwrap_or_else(|_| root.proc_path());
            Err(errno).with_context(|| format!("failed to open {:?} at {:?}", path, target))
        }
    }
}

/// Creates `path` under `root` component by component, tolerating segments
/// that already exist. The returned handle is opened for path resolution
/// only.
pub fn mkdir_p(root: &FileDescriptor, path: &Path, mode: Mode) -> Result<FileDescriptor> {
    let mut current = root.try_clone()?;

    for component in path.components() {
        let part = match component {
            Component::Normal(part) => part,
            Component::RootDir | Component::CurDir => continue,
            other => bail!("cannot create {:?}: unsupported component {:?}", path, other),
        };

        let c_part = utils::path_to_cstring(Path::new(part))?;
        let ret = unsafe { libc::mkdirat(current.as_raw_fd(), c_part.as_ptr(), mode.bits()) };
        if let Err(errno) = Errno::result(ret) {
            if errno != Errno::EEXIST {
                return Err(errno).with_context(|| format!("failed to create {:?} of {:?}", part, path));
            }
        }

        current = open_at(&current, Path::new(part), OFlag::O_PATH | OFlag::O_DIRECTORY)?;
    }

    Ok(current)
}

/// Creates `name` under `parent` if absent and returns a handle to it.
pub fn touch(parent: &FileDescriptor, name: &Path) -> Result<FileDescriptor> {
    let fd = fcntl::openat(
        parent.as_raw_fd(),
        name,
        OFlag::O_CREAT | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(0o644),
    )
    .with_context(|| format!("failed to create {:?}", name))?;
    Ok(FileDescriptor::new(fd))
}

/// Creates a device node at `path` under `root`.
pub fn mknod(
    root: &FileDescriptor,
    path: &Path,
    kind: SFlag,
    perm: Mode,
    dev: u64,
) -> Result<(), Errno> {
    let c_path = utils::path_to_cstring(path).map_err(|_| Errno::EINVAL)?;
    let ret = unsafe {
        libc::mknodat(
            root.as_raw_fd(),
            c_path.as_ptr(),
            kind.bits() | perm.bits(),
            dev,
        )
    };
    Errno::result(ret).map(drop)
}

/// Opens `path` under `root`, creating it first when it does not exist yet:
/// a regular file when `is_file` is set, a directory otherwise.
pub fn open_or_create(
    root: &FileDescriptor,
    path: &Path,
    is_file: bool,
    flags: OFlag,
) -> Result<FileDescriptor> {
    match open_at(root, path, flags) {
        Ok(fd) => Ok(fd),
        Err(err) => {
            match err.downcast_ref::<Errno>() {
                Some(Errno::ENOENT) => {}
                _ => return Err(err),
            }

            if is_file {
                let parent = path.parent().unwrap_or_else(|| Path::new(""));
                let name = path
                    .file_name()
                    .with_context(|| format!("{:?} has no file name", path))?;
                let parent_fd = mkdir_p(root, parent, Mode::from_bits_truncate(0o755))?;
                touch(&parent_fd, Path::new(name))
            } else {
                mkdir_p(root, path, Mode::from_bits_truncate(0o755))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::create_temp_dir;
    use nix::sys::stat;

    #[test]
    fn test_mkdir_p_creates_nested_directories() -> Result<()> {
        let tmp = create_temp_dir("test_mkdir_p_creates_nested_directories")?;
        let root = open(tmp.path(), OFlag::O_PATH)?;

        let leaf = mkdir_p(&root, Path::new("a/b/c"), Mode::from_bits_truncate(0o755))?;
        assert!(tmp.path().join("a/b/c").is_dir());

        let st = stat::fstat(leaf.as_raw_fd())?;
        assert_eq!(st.st_mode & SFlag::S_IFMT.bits(), SFlag::S_IFDIR.bits());
        Ok(())
    }

    #[test]
    fn test_mkdir_p_existing_prefix_is_not_an_error() -> Result<()> {
        let tmp = create_temp_dir("test_mkdir_p_existing_prefix_is_not_an_error")?;
        fs::create_dir_all(tmp.path().join("a/b"))?;
        let root = open(tmp.path(), OFlag::O_PATH)?;

        mkdir_p(&root, Path::new("a/b"), Mode::from_bits_truncate(0o755))?;
        mkdir_p(&root, Path::new("a/b/c"), Mode::from_bits_truncate(0o755))?;
        assert!(tmp.path().join("a/b/c").is_dir());
        Ok(())
    }

    #[test]
    fn test_touch_creates_and_reopens() -> Result<()> {
        let tmp = create_temp_dir("test_touch_creates_and_reopens")?;
        let root = open(tmp.path(), OFlag::O_PATH)?;

        touch(&root, Path::new("file"))?;
        assert!(tmp.path().join("file").is_file());
        touch(&root, Path::new("file"))?;
        Ok(())
    }

    #[test]
    fn test_open_at_error_names_the_root_target() -> Result<()> {
        let tmp = create_temp_dir("test_open_at_error_names_the_root_target")?;
        let root = open(tmp.path(), OFlag::O_PATH)?;

        let err = open_at(&root, Path::new("missing"), OFlag::O_PATH).unwrap_err();
        let message = format!("{:#}", err);
        let resolved = fs::canonicalize(tmp.path())?;
        assert!(message.contains("missing"));
        assert!(message.contains(resolved.to_str().unwrap()));
        Ok(())
    }

    #[test]
    fn test_open_or_create_directory() -> Result<()> {
        let tmp = create_temp_dir("test_open_or_create_directory")?;
        let root = open(tmp.path(), OFlag::O_PATH)?;

        open_or_create(&root, Path::new("sub/dir"), false, OFlag::O_PATH)?;
        assert!(tmp.path().join("sub/dir").is_dir());

        // a second call opens the existing directory
        open_or_create(&root, Path::new("sub/dir"), false, OFlag::O_PATH)?;
        Ok(())
    }

    #[test]
    fn test_open_or_create_file() -> Result<()> {
        let tmp = create_temp_dir("test_open_or_create_file")?;
        let root = open(tmp.path(), OFlag::O_PATH)?;

        open_or_create(&root, Path::new("sub/file"), true, OFlag::O_PATH)?;
        assert!(tmp.path().join("sub/file").is_file());
        Ok(())
    }
}
