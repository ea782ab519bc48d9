//! In-memory container configuration and the `config.json` loader.
//!
//! The loader accepts the subset of the OCI Runtime Spec 1.0.x the engine
//! consumes, validates it, and folds the textual mount options into the
//! flag sets used by the mount syscalls.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use path_clean::PathClean;

use crate::utils;

#[derive(Debug, Clone)]
pub struct Config {
    pub root: Root,
    pub process: Process,
    pub namespaces: Vec<Namespace>,
    pub uid_mappings: Vec<IdMapping>,
    pub gid_mappings: Vec<IdMapping>,
    pub mounts: Vec<MountSpec>,
    pub hooks: Hooks,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Root {
    /// Path of the container root filesystem, relative to the bundle.
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Process {
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub additional_gids: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceType {
    Ipc,
    Uts,
    Mount,
    Pid,
    Net,
    User,
    Cgroup,
}

impl NamespaceType {
    pub fn clone_flag(self) -> CloneFlags {
        match self {
            NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
            NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
            NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
            NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
            NamespaceType::Net => CloneFlags::CLONE_NEWNET,
            NamespaceType::User => CloneFlags::CLONE_NEWUSER,
            NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub typ: NamespaceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    pub host_id: u32,
    pub container_id: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct MountSpec {
    pub source: Option<PathBuf>,
    /// Absolute path inside the container root filesystem.
    pub destination: PathBuf,
    pub typ: String,
    pub data: String,
    pub flags: MsFlags,
    pub propagation_flags: MsFlags,
    /// Destination resolution refuses a final symlink component.
    pub nosymfollow: bool,
}

impl MountSpec {
    pub(crate) fn filesystem(
        source: &str,
        destination: &str,
        typ: &str,
        flags: MsFlags,
        data: &str,
    ) -> Self {
        Self {
            source: Some(PathBuf::from(source)),
            destination: PathBuf::from(destination),
            typ: typ.to_string(),
            data: data.to_string(),
            flags,
            propagation_flags: MsFlags::empty(),
            nosymfollow: false,
        }
    }

    pub(crate) fn bind(source: &Path, destination: &Path, flags: MsFlags) -> Self {
        Self {
            source: Some(source.to_path_buf()),
            destination: destination.to_path_buf(),
            typ: "bind".to_string(),
            data: String::new(),
            flags,
            propagation_flags: MsFlags::empty(),
            nosymfollow: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub path: PathBuf,
    /// Complete argv; the first element is used as argv[0]. An empty list
    /// runs the hook with `path` as its only argument.
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Seconds the hook may run. Part of the configuration model; the
    /// runner does not enforce it.
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub prestart: Vec<Hook>,
    pub create_runtime: Vec<Hook>,
    pub create_container: Vec<Hook>,
    pub start_container: Vec<Hook>,
    pub poststart: Vec<Hook>,
    pub poststop: Vec<Hook>,
}

impl Config {
    /// Loads and validates `config.json` from the bundle directory.
    pub fn load(bundle: &Path) -> Result<Self> {
        let path = bundle.join("config.json");
        let file =
            File::open(&path).with_context(|| format!("failed to open {:?}", path))?;
        let spec: raw::Spec = serde_json::from_reader(file)
            .with_context(|| format!("failed to decode {:?}", path))?;
        Self::from_raw(spec)
    }

    pub fn has_user_namespace(&self) -> bool {
        self.namespaces
            .iter()
            .any(|ns| ns.typ == NamespaceType::User)
    }

    fn from_raw(spec: raw::Spec) -> Result<Self> {
        if spec.process.args.is_empty() {
            bail!("process.args must not be empty");
        }
        if !spec.process.cwd.is_absolute() {
            bail!("process.cwd {:?} is not absolute", spec.process.cwd);
        }

        let process = Process {
            args: spec.process.args,
            env: utils::parse_env(&spec.process.env),
            cwd: spec.process.cwd.clean(),
            uid: spec.process.user.uid,
            gid: spec.process.user.gid,
            additional_gids: spec.process.user.additional_gids,
        };

        let linux = spec.linux.unwrap_or_default();

        let mut namespaces = Vec::with_capacity(linux.namespaces.len());
        for ns in &linux.namespaces {
            let typ = parse_namespace_type(&ns.typ)?;
            if namespaces.iter().any(|existing: &Namespace| existing.typ == typ) {
                bail!("duplicate {} namespace", ns.typ);
            }
            namespaces.push(Namespace { typ });
        }

        let mounts = spec
            .mounts
            .iter()
            .map(parse_mount)
            .collect::<Result<Vec<_>>>()?;

        let hooks = spec.hooks.map(parse_hooks).unwrap_or_default();

        Ok(Config {
            root: Root {
                path: spec.root.path.clean(),
            },
            process,
            namespaces,
            uid_mappings: linux.uid_mappings.iter().map(parse_id_mapping).collect(),
            gid_mappings: linux.gid_mappings.iter().map(parse_id_mapping).collect(),
            mounts,
            hooks,
            annotations: spec.annotations,
        })
    }
}

fn parse_namespace_type(typ: &str) -> Result<NamespaceType> {
    Ok(match typ {
        "ipc" => NamespaceType::Ipc,
        "uts" => NamespaceType::Uts,
        "mount" => NamespaceType::Mount,
        "pid" => NamespaceType::Pid,
        "network" => NamespaceType::Net,
        "user" => NamespaceType::User,
        "cgroup" => NamespaceType::Cgroup,
        unknown => bail!("unknown namespace type {:?}", unknown),
    })
}

fn parse_id_mapping(mapping: &raw::IdMapping) -> IdMapping {
    IdMapping {
        host_id: mapping.host_id,
        container_id: mapping.container_id,
        size: mapping.size,
    }
}

fn parse_mount(mount: &raw::Mount) -> Result<MountSpec> {
    if !mount.destination.is_absolute() {
        bail!("mount destination {:?} is not absolute", mount.destination);
    }

    let (flags, propagation_flags, nosymfollow, data) = parse_mount_options(&mount.options);

    Ok(MountSpec {
        source: mount.source.clone(),
        destination: mount.destination.clean(),
        typ: mount.typ.clone().unwrap_or_default(),
        data,
        flags,
        propagation_flags,
        nosymfollow,
    })
}

fn parse_mount_options(options: &[String]) -> (MsFlags, MsFlags, bool, String) {
    let mut flags = MsFlags::empty();
    let mut propagation = MsFlags::empty();
    let mut nosymfollow = false;
    let mut data = Vec::new();

    for option in options {
        if let Some((is_clear, flag)) = match option.as_str() {
            "defaults" => Some((false, MsFlags::empty())),
            "ro" => Some((false, MsFlags::MS_RDONLY)),
            "rw" => Some((true, MsFlags::MS_RDONLY)),
            "suid" => Some((true, MsFlags::MS_NOSUID)),
            "nosuid" => Some((false, MsFlags::MS_NOSUID)),
            "dev" => Some((true, MsFlags::MS_NODEV)),
            "nodev" => Some((false, MsFlags::MS_NODEV)),
            "exec" => Some((true, MsFlags::MS_NOEXEC)),
            "noexec" => Some((false, MsFlags::MS_NOEXEC)),
            "sync" => Some((false, MsFlags::MS_SYNCHRONOUS)),
            "async" => Some((true, MsFlags::MS_SYNCHRONOUS)),
            "dirsync" => Some((false, MsFlags::MS_DIRSYNC)),
            "remount" => Some((false, MsFlags::MS_REMOUNT)),
            "mand" => Some((false, MsFlags::MS_MANDLOCK)),
            "nomand" => Some((true, MsFlags::MS_MANDLOCK)),
            "atime" => Some((true, MsFlags::MS_NOATIME)),
            "noatime" => Some((false, MsFlags::MS_NOATIME)),
            "diratime" => Some((true, MsFlags::MS_NODIRATIME)),
            "nodiratime" => Some((false, MsFlags::MS_NODIRATIME)),
            "bind" => Some((false, MsFlags::MS_BIND)),
            "rbind" => Some((false, MsFlags::MS_BIND | MsFlags::MS_REC)),
            "relatime" => Some((false, MsFlags::MS_RELATIME)),
            "norelatime" => Some((true, MsFlags::MS_RELATIME)),
            "strictatime" => Some((false, MsFlags::MS_STRICTATIME)),
            "nostrictatime" => Some((true, MsFlags::MS_STRICTATIME)),
            _ => None,
        } {
            if is_clear {
                flags &= !flag;
            } else {
                flags |= flag;
            }
            continue;
        }

        if let Some(flag) = match option.as_str() {
            "private" => Some(MsFlags::MS_PRIVATE),
            "rprivate" => Some(MsFlags::MS_PRIVATE | MsFlags::MS_REC),
            "shared" => Some(MsFlags::MS_SHARED),
            "rshared" => Some(MsFlags::MS_SHARED | MsFlags::MS_REC),
            "slave" => Some(MsFlags::MS_SLAVE),
            "rslave" => Some(MsFlags::MS_SLAVE | MsFlags::MS_REC),
            "unbindable" => Some(MsFlags::MS_UNBINDABLE),
            "runbindable" => Some(MsFlags::MS_UNBINDABLE | MsFlags::MS_REC),
            _ => None,
        } {
            propagation |= flag;
            continue;
        }

        if option == "nosymfollow" {
            nosymfollow = true;
            continue;
        }

        data.push(option.as_str());
    }

    (flags, propagation, nosymfollow, data.join(","))
}

fn parse_hooks(hooks: raw::Hooks) -> Hooks {
    fn phase(hooks: Option<Vec<raw::Hook>>) -> Vec<Hook> {
        hooks
            .unwrap_or_default()
            .into_iter()
            .map(|hook| Hook {
                path: hook.path,
                args: hook.args.unwrap_or_default(),
                env: utils::parse_env(&hook.env.unwrap_or_default()),
                timeout: hook.timeout,
            })
            .collect()
    }

    Hooks {
        prestart: phase(hooks.prestart),
        create_runtime: phase(hooks.create_runtime),
        create_container: phase(hooks.create_container),
        start_container: phase(hooks.start_container),
        poststart: phase(hooks.poststart),
        poststop: phase(hooks.poststop),
    }
}

mod raw {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Spec {
        pub root: Root,
        pub process: Process,
        #[serde(default)]
        pub mounts: Vec<Mount>,
        pub linux: Option<Linux>,
        pub hooks: Option<Hooks>,
        #[serde(default)]
        pub annotations: HashMap<String, String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Root {
        pub path: PathBuf,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Process {
        pub args: Vec<String>,
        #[serde(default)]
        pub env: Vec<String>,
        pub cwd: PathBuf,
        #[serde(default)]
        pub user: User,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct User {
        #[serde(default)]
        pub uid: u32,
        #[serde(default)]
        pub gid: u32,
        pub additional_gids: Option<Vec<u32>>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Mount {
        pub destination: PathBuf,
        #[serde(rename = "type")]
        pub typ: Option<String>,
        pub source: Option<PathBuf>,
        #[serde(default)]
        pub options: Vec<String>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Linux {
        #[serde(default)]
        pub namespaces: Vec<Namespace>,
        #[serde(default)]
        pub uid_mappings: Vec<IdMapping>,
        #[serde(default)]
        pub gid_mappings: Vec<IdMapping>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Namespace {
        #[serde(rename = "type")]
        pub typ: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct IdMapping {
        #[serde(rename = "hostID")]
        pub host_id: u32,
        #[serde(rename = "containerID")]
        pub container_id: u32,
        pub size: u32,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Hooks {
        pub prestart: Option<Vec<Hook>>,
        pub create_runtime: Option<Vec<Hook>>,
        pub create_container: Option<Vec<Hook>>,
        pub start_container: Option<Vec<Hook>>,
        pub poststart: Option<Vec<Hook>>,
        pub poststop: Option<Vec<Hook>>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Hook {
        pub path: PathBuf,
        pub args: Option<Vec<String>>,
        pub env: Option<Vec<String>>,
        pub timeout: Option<u64>,
    }
}
