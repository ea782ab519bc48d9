use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{bail, Context, Result};
use libc;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::mount::MsFlags;
use nix::sys::stat::{self, makedev, Mode, SFlag};
use nix::sys::statfs::{self, FsType};

use crate::config::MountSpec;
use crate::dirfs;
use crate::fd::FileDescriptor;
use crate::syscall::{create_syscall, Syscall};

/// Read-only remount queued behind the rest of the plan. The destination
/// handle is held open until the remount has been issued.
struct DelayedRemount {
    destination: FileDescriptor,
    flags: MsFlags,
}

pub struct Mounter {
    root: FileDescriptor,
    syscall: Box<dyn Syscall>,
    remounts: Vec<DelayedRemount>,
}

impl Mounter {
    pub fn new(root: FileDescriptor) -> Self {
        Self {
            root,
            syscall: create_syscall(),
            remounts: Vec::new(),
        }
    }

    /// Applies one configured mount entry.
    pub fn mount(&mut self, mount: &MountSpec) -> Result<()> {
        if mount.flags.contains(MsFlags::MS_BIND) {
            self.bind_mount(mount)
        } else {
            self.filesystem_mount(mount)
        }
    }

    /// Completes the plan: default filesystems, default device nodes, then
    /// the queued read-only remounts in insertion order.
    pub fn finalize(&mut self) -> Result<()> {
        self.configure_default_filesystems()
            .context("failed to configure default filesystems")?;
        self.configure_default_devices()
            .context("failed to configure default devices")?;

        for remount in std::mem::take(&mut self.remounts) {
            self.syscall
                .mount(
                    None,
                    &remount.destination.proc_path(),
                    None,
                    remount.flags,
                    None,
                )
                .context("delayed read-only remount failed")?;
        }

        Ok(())
    }

    fn destination_open_flags(mount: &MountSpec) -> OFlag {
        let mut flags = OFlag::O_PATH;
        if mount.nosymfollow {
            flags |= OFlag::O_NOFOLLOW;
        }
        flags
    }

    /// Opens the mount destination beneath the root, creating it when it
    /// does not exist yet. Automatic creation follows mount(8) rather than
    /// the OCI spec, matching what other runtimes do.
    fn ensure_destination(&self, mount: &MountSpec, is_file: bool) -> Result<FileDescriptor> {
        let relative = relative_destination(&mount.destination)?;
        dirfs::open_or_create(
            &self.root,
            relative,
            is_file,
            Self::destination_open_flags(mount),
        )
    }

    fn bind_mount(&mut self, mount: &MountSpec) -> Result<()> {
        let source = mount
            .source
            .as_ref()
            .with_context(|| format!("bind mount {:?} has no source", mount.destination))?;

        let source_fd = dirfs::open(source, Self::destination_open_flags(mount))?;
        let source_stat = stat::fstat(source_fd.as_raw_fd()).context("fstat failed")?;
        let source_is_dir = source_stat.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFDIR.bits();

        let destination = self.ensure_destination(mount, !source_is_dir)?;
        let destination_stat = stat::fstat(destination.as_raw_fd()).context("fstat failed")?;
        let destination_is_dir =
            destination_stat.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFDIR.bits();
        if destination_is_dir != source_is_dir {
            bail!(
                "bind mount destination {:?} does not match the source kind",
                mount.destination
            );
        }

        self.syscall
            .mount(
                Some(&source_fd.proc_path()),
                &destination.proc_path(),
                fstype(mount),
                mount.flags & (MsFlags::MS_BIND | MsFlags::MS_REC),
                data(mount),
            )
            .with_context(|| format!("failed to bind mount {:?}", mount.destination))?;

        // The kernel ignores per-mount flags on the initial bind; a remount
        // pass applies them.
        self.syscall
            .mount(
                Some(&source_fd.proc_path()),
                &destination.proc_path(),
                fstype(mount),
                mount.flags | MsFlags::MS_REMOUNT,
                data(mount),
            )
            .with_context(|| format!("failed to remount {:?}", mount.destination))?;

        self.propagation_mount(&destination, mount.propagation_flags)
    }

    fn filesystem_mount(&mut self, mount: &MountSpec) -> Result<()> {
        let destination = self.ensure_destination(mount, false)?;

        let mut flags = mount.flags;
        let mut delayed = None;
        if mount.typ == "tmpfs" && flags.contains(MsFlags::MS_RDONLY) {
            // Mounted writable first; the read-only bit lands after the
            // default device nodes have been created on it.
            flags &= !MsFlags::MS_RDONLY;
            delayed = Some(mount.flags | MsFlags::MS_RDONLY | MsFlags::MS_REMOUNT | MsFlags::MS_BIND);
        }

        self.syscall
            .mount(
                mount.source.as_deref(),
                &destination.proc_path(),
                fstype(mount),
                flags,
                data(mount),
            )
            .with_context(|| format!("failed to mount {:?}", mount.destination))?;

        self.propagation_mount(&destination, mount.propagation_flags)?;

        if let Some(flags) = delayed {
            self.remounts.push(DelayedRemount { destination, flags });
        }

        Ok(())
    }

    fn propagation_mount(&self, destination: &FileDescriptor, flags: MsFlags) -> Result<()> {
        if flags.is_empty() {
            return Ok(());
        }

        self.syscall
            .mount(None, &destination.proc_path(), None, flags, None)
            .context("propagation mount failed")
    }

    // https://github.com/opencontainers/runtime-spec/blob/master/config-linux.md#default-filesystems
    fn configure_default_filesystems(&mut self) -> Result<()> {
        let proc = dirfs::open_or_create(&self.root, Path::new("proc"), false, OFlag::O_PATH)?;
        if filesystem_magic(&proc)? != statfs::PROC_SUPER_MAGIC {
            self.mount(&MountSpec::filesystem(
                "proc",
                "/proc",
                "proc",
                MsFlags::empty(),
                "",
            ))?;
        }

        let sys = dirfs::open_or_create(&self.root, Path::new("sys"), false, OFlag::O_PATH)?;
        if filesystem_magic(&sys)? != statfs::FsType(libc::SYSFS_MAGIC as _) {
            let sysfs = MountSpec::filesystem(
                "sysfs",
                "/sys",
                "sysfs",
                MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
                "",
            );
            if let Err(err) = self.mount(&sysfs) {
                // Mounting sysfs is refused without privileges over the
                // network namespace; bind the host's view instead.
                match err.downcast_ref::<Errno>() {
                    Some(Errno::EPERM) => {
                        self.mount(&MountSpec::bind(
                            Path::new("/sys"),
                            Path::new("/sys"),
                            MsFlags::MS_BIND
                                | MsFlags::MS_REC
                                | MsFlags::MS_NOSUID
                                | MsFlags::MS_NOEXEC
                                | MsFlags::MS_NODEV,
                        ))
                        .context("failed to bind mount /sys")?;
                    }
                    _ => return Err(err),
                }
            }
        }

        let dev = dirfs::open_or_create(&self.root, Path::new("dev"), false, OFlag::O_PATH)?;
        if filesystem_magic(&dev)? != statfs::TMPFS_MAGIC && directory_is_empty(&dev)? {
            self.mount(&MountSpec::filesystem(
                "tmpfs",
                "/dev",
                "tmpfs",
                MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME | MsFlags::MS_NODEV,
                "mode=755,size=65536k",
            ))?;
        }

        if !self.default_exists(Path::new("dev/pts"))? {
            self.mount(&MountSpec::filesystem(
                "devpts",
                "/dev/pts",
                "devpts",
                MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
                "newinstance,ptmxmode=0666,mode=0620",
            ))?;
        }

        if !self.default_exists(Path::new("dev/shm"))? {
            self.mount(&MountSpec::filesystem(
                "shm",
                "/dev/shm",
                "tmpfs",
                MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
                "mode=1777,size=65536k",
            ))?;
        }

        Ok(())
    }

    fn default_exists(&self, relative: &Path) -> Result<bool> {
        match dirfs::open_at(&self.root, relative, OFlag::O_PATH) {
            Ok(_) => Ok(true),
            Err(err) => match err.downcast_ref::<Errno>() {
                Some(Errno::ENOENT) => Ok(false),
                _ => Err(err),
            },
        }
    }

    fn configure_default_devices(&mut self) -> Result<()> {
        self.configure_device(Path::new("/dev/null"), makedev(1, 3))?;
        self.configure_device(Path::new("/dev/zero"), makedev(1, 5))?;
        self.configure_device(Path::new("/dev/full"), makedev(1, 7))?;
        self.configure_device(Path::new("/dev/random"), makedev(1, 8))?;
        self.configure_device(Path::new("/dev/urandom"), makedev(1, 9))?;
        self.configure_device(Path::new("/dev/tty"), makedev(5, 0))?;

        // TODO: handle /dev/console and /dev/ptmx

        Ok(())
    }

    fn configure_device(&mut self, destination: &Path, dev: u64) -> Result<()> {
        let relative = relative_destination(destination)?;

        match dirfs::open_at(&self.root, relative, OFlag::O_PATH | OFlag::O_NOFOLLOW) {
            Ok(existing) => {
                let st = stat::fstat(existing.as_raw_fd()).context("fstat failed")?;
                let is_char = st.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFCHR.bits();
                if is_char && st.st_rdev == dev {
                    return Ok(());
                }
            }
            Err(err) => {
                match err.downcast_ref::<Errno>() {
                    Some(Errno::ENOENT) => {}
                    _ => return Err(err),
                }

                match self.syscall.mknod(
                    &self.root,
                    relative,
                    SFlag::S_IFCHR,
                    Mode::from_bits_truncate(0o666),
                    dev,
                ) {
                    Ok(()) => return Ok(()),
                    // mknod is not permitted inside a user namespace
                    Err(Errno::EPERM) => {}
                    Err(errno) => {
                        return Err(errno)
                            .with_context(|| format!("failed to mknod {:?}", destination))
                    }
                }
            }
        }

        self.mount(&MountSpec::bind(
            destination,
            destination,
            MsFlags::MS_BIND
                | MsFlags::MS_REC
                | MsFlags::MS_NOSUID
                | MsFlags::MS_NOEXEC
                | MsFlags::MS_NODEV,
        ))
        .with_context(|| format!("failed to bind mount host device {:?}", destination))
    }
}

fn relative_destination(destination: &Path) -> Result<&Path> {
    destination
        .strip_prefix("/")
        .with_context(|| format!("mount destination {:?} is not absolute", destination))
}

fn filesystem_magic(fd: &FileDescriptor) -> Result<FsType> {
    let statfs = statfs::fstatfs(fd).context("statfs failed")?;
    Ok(statfs.filesystem_type())
}

fn directory_is_empty(dir: &FileDescriptor) -> Result<bool> {
    let mut entries = fs::read_dir(dir.proc_path()).context("failed to read directory")?;
    Ok(entries.next().is_none())
}

fn fstype(mount: &MountSpec) -> Option<&str> {
    if mount.typ.is_empty() {
        None
    } else {
        Some(mount.typ.as_str())
    }
}

fn data(mount: &MountSpec) -> Option<&str> {
    if mount.data.is_empty() {
        None
    } else {
        Some(mount.data.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::{MountArgs, TestHelperSyscall};
    use crate::utils::{create_temp_dir, TempDir};
    use anyhow::Result;
    use std::path::PathBuf;

    fn mounter_at(path: &Path) -> Result<Mounter> {
        let root = dirfs::open(path, OFlag::O_PATH)?;
        Ok(Mounter::new(root))
    }

    fn helper(mounter: &Mounter) -> &TestHelperSyscall {
        mounter.syscall.as_any().downcast_ref().unwrap()
    }

    fn rootfs(tmp: &TempDir) -> Result<PathBuf> {
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(&rootfs)?;
        Ok(fs::canonicalize(rootfs)?)
    }

    #[test]
    fn test_read_only_tmpfs_is_remounted_last() -> Result<()> {
        let tmp = create_temp_dir("test_read_only_tmpfs_is_remounted_last")?;
        let root = rootfs(&tmp)?;
        let mut mounter = mounter_at(&root)?;

        let mount = MountSpec::filesystem(
            "tmpfs",
            "/tmp",
            "tmpfs",
            MsFlags::MS_RDONLY | MsFlags::MS_NOSUID,
            "",
        );
        mounter.mount(&mount)?;
        mounter.finalize()?;

        let mounts = helper(&mounter).get_mount_args();

        let first = &mounts[0];
        assert_eq!(first.target, root.join("tmp"));
        assert_eq!(first.fstype.as_deref(), Some("tmpfs"));
        assert_eq!(first.flags, MsFlags::MS_NOSUID);

        let last = mounts.last().unwrap();
        assert_eq!(last.target, root.join("tmp"));
        assert_eq!(
            last.flags,
            MsFlags::MS_RDONLY
                | MsFlags::MS_NOSUID
                | MsFlags::MS_REMOUNT
                | MsFlags::MS_BIND
        );

        // the device nodes were configured before the remount ran
        assert_eq!(helper(&mounter).get_mknod_args().len(), 6);
        Ok(())
    }

    #[test]
    fn test_default_filesystems_are_emitted_for_an_empty_plan() -> Result<()> {
        let tmp = create_temp_dir("test_default_filesystems_are_emitted_for_an_empty_plan")?;
        let root = rootfs(&tmp)?;
        let mut mounter = mounter_at(&root)?;

        mounter.finalize()?;

        let mounts = helper(&mounter).get_mount_args();
        let fstypes: Vec<Option<&str>> = mounts.iter().map(|m| m.fstype.as_deref()).collect();
        assert_eq!(
            fstypes,
            vec![
                Some("proc"),
                Some("sysfs"),
                Some("tmpfs"),
                Some("devpts"),
                Some("tmpfs"),
            ]
        );

        assert_eq!(mounts[0].target, root.join("proc"));
        assert_eq!(
            mounts[1].flags,
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV
        );
        assert_eq!(mounts[2].data.as_deref(), Some("mode=755,size=65536k"));
        assert_eq!(
            mounts[3].data.as_deref(),
            Some("newinstance,ptmxmode=0666,mode=0620")
        );
        assert_eq!(mounts[4].target, root.join("dev/shm"));
        Ok(())
    }

    #[test]
    fn test_default_devices_are_created() -> Result<()> {
        let tmp = create_temp_dir("test_default_devices_are_created")?;
        let root = rootfs(&tmp)?;
        let mut mounter = mounter_at(&root)?;

        mounter.finalize()?;

        let mknods = helper(&mounter).get_mknod_args();
        let nodes: Vec<(PathBuf, u64)> = mknods.iter().map(|m| (m.path.clone(), m.dev)).collect();
        assert_eq!(
            nodes,
            vec![
                (root.join("dev/null"), makedev(1, 3)),
                (root.join("dev/zero"), makedev(1, 5)),
                (root.join("dev/full"), makedev(1, 7)),
                (root.join("dev/random"), makedev(1, 8)),
                (root.join("dev/urandom"), makedev(1, 9)),
                (root.join("dev/tty"), makedev(5, 0)),
            ]
        );
        for mknod in &mknods {
            assert_eq!(mknod.kind, SFlag::S_IFCHR);
            assert_eq!(mknod.perm, Mode::from_bits_truncate(0o666));
        }
        Ok(())
    }

    #[test]
    fn test_bind_mount_is_issued_twice() -> Result<()> {
        let tmp = create_temp_dir("test_bind_mount_is_issued_twice")?;
        let root = rootfs(&tmp)?;
        let source = tmp.path().join("shared");
        fs::create_dir_all(&source)?;
        let source = fs::canonicalize(source)?;

        let mut mounter = mounter_at(&root)?;
        let mount = MountSpec {
            source: Some(source.clone()),
            destination: PathBuf::from("/mnt/shared"),
            typ: "bind".to_string(),
            data: String::new(),
            flags: MsFlags::MS_BIND | MsFlags::MS_RDONLY,
            propagation_flags: MsFlags::empty(),
            nosymfollow: false,
        };
        mounter.mount(&mount)?;

        let mounts = helper(&mounter).get_mount_args();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].source.as_deref(), Some(source.as_path()));
        assert_eq!(mounts[0].target, root.join("mnt/shared"));
        assert_eq!(mounts[0].flags, MsFlags::MS_BIND);
        assert_eq!(
            mounts[1].flags,
            MsFlags::MS_BIND | MsFlags::MS_RDONLY | MsFlags::MS_REMOUNT
        );

        assert!(root.join("mnt/shared").is_dir());
        Ok(())
    }

    #[test]
    fn test_bind_mount_of_a_file_creates_a_file_destination() -> Result<()> {
        let tmp = create_temp_dir("test_bind_mount_of_a_file_creates_a_file_destination")?;
        let root = rootfs(&tmp)?;
        let source = tmp.path().join("resolv.conf");
        fs::write(&source, "nameserver 127.0.0.53\n")?;
        let source = fs::canonicalize(source)?;

        let mut mounter = mounter_at(&root)?;
        mounter.mount(&MountSpec::bind(
            &source,
            Path::new("/etc/resolv.conf"),
            MsFlags::MS_BIND,
        ))?;

        assert!(root.join("etc/resolv.conf").is_file());
        Ok(())
    }

    #[test]
    fn test_propagation_flags_are_a_separate_mount() -> Result<()> {
        let tmp = create_temp_dir("test_propagation_flags_are_a_separate_mount")?;
        let root = rootfs(&tmp)?;
        let mut mounter = mounter_at(&root)?;

        let mut mount =
            MountSpec::filesystem("tmpfs", "/run", "tmpfs", MsFlags::MS_NOSUID, "mode=755");
        mount.propagation_flags = MsFlags::MS_PRIVATE | MsFlags::MS_REC;
        mounter.mount(&mount)?;

        let mounts = helper(&mounter).get_mount_args();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].source, None);
        assert_eq!(mounts[1].flags, MsFlags::MS_PRIVATE | MsFlags::MS_REC);
        assert_eq!(mounts[1].target, root.join("run"));
        Ok(())
    }

    #[test]
    fn test_sysfs_falls_back_to_bind_on_eperm() -> Result<()> {
        let tmp = create_temp_dir("test_sysfs_falls_back_to_bind_on_eperm")?;
        let root = rootfs(&tmp)?;
        let mut mounter = mounter_at(&root)?;
        helper(&mounter).deny_mount_type("sysfs");

        mounter.finalize()?;

        let mounts = helper(&mounter).get_mount_args();
        let bind = mounts
            .iter()
            .find(|m| m.target == root.join("sys"))
            .unwrap();
        assert_eq!(bind.source.as_deref(), Some(Path::new("/sys")));
        assert_eq!(bind.flags, MsFlags::MS_BIND | MsFlags::MS_REC);

        let remount = mounts
            .iter()
            .find(|m| m.target == root.join("sys") && m.flags.contains(MsFlags::MS_REMOUNT))
            .unwrap();
        assert!(remount.flags.contains(
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV
        ));
        Ok(())
    }

    #[test]
    fn test_devices_fall_back_to_bind_mounts_on_eperm() -> Result<()> {
        let tmp = create_temp_dir("test_devices_fall_back_to_bind_mounts_on_eperm")?;
        let root = rootfs(&tmp)?;
        let mut mounter = mounter_at(&root)?;
        helper(&mounter).deny_mknod();

        mounter.finalize()?;

        assert!(helper(&mounter).get_mknod_args().is_empty());
        let mounts = helper(&mounter).get_mount_args();
        let null_bind = mounts
            .iter()
            .find(|m| m.target == root.join("dev/null"))
            .unwrap();
        assert_eq!(null_bind.source.as_deref(), Some(Path::new("/dev/null")));
        assert!(null_bind.flags.contains(MsFlags::MS_BIND));
        assert!(root.join("dev/tty").is_file());
        Ok(())
    }

    #[test]
    fn test_populated_dev_is_not_mounted_over() -> Result<()> {
        let tmp = create_temp_dir("test_populated_dev_is_not_mounted_over")?;
        let root = rootfs(&tmp)?;
        fs::create_dir_all(root.join("dev"))?;
        fs::write(root.join("dev/console"), "")?;

        let mut mounter = mounter_at(&root)?;
        mounter.finalize()?;

        let mounts = helper(&mounter).get_mount_args();
        assert!(!mounts
            .iter()
            .any(|m| m.target == root.join("dev") && m.fstype.as_deref() == Some("tmpfs")));
        Ok(())
    }

    #[test]
    fn test_configured_defaults_are_left_alone() -> Result<()> {
        // against the host root, /proc and /sys are already the right
        // filesystems and the default devices exist with their expected
        // identities
        let mut mounter = mounter_at(Path::new("/"))?;
        mounter.finalize()?;

        assert!(helper(&mounter).get_mknod_args().is_empty());
        let mounts = helper(&mounter).get_mount_args();
        assert!(!mounts.iter().any(|m| {
            m.fstype.as_deref() == Some("proc")
                || m.fstype.as_deref() == Some("sysfs")
                || m.target == Path::new("/dev")
        }));
        Ok(())
    }

    #[test]
    fn test_plan_is_a_pure_function_of_the_input() -> Result<()> {
        fn run_plan(tag: &str) -> Result<Vec<MountArgs>> {
            let tmp = create_temp_dir(tag)?;
            let root = rootfs(&tmp)?;
            let mut mounter = mounter_at(&root)?;
            mounter.mount(&MountSpec::filesystem(
                "tmpfs",
                "/tmp",
                "tmpfs",
                MsFlags::MS_RDONLY,
                "",
            ))?;
            mounter.finalize()?;
            let mounts = helper(&mounter)
                .get_mount_args()
                .into_iter()
                .map(|mut m| {
                    // strip the per-run temp root so the sequences compare
                    m.target = m.target.strip_prefix(&root).unwrap_or(&m.target).to_path_buf();
                    m
                })
                .collect();
            Ok(mounts)
        }

        let first = run_plan("test_plan_is_a_pure_function_of_the_input_a")?;
        let second = run_plan("test_plan_is_a_pure_function_of_the_input_b")?;
        assert_eq!(first, second);
        Ok(())
    }
}
