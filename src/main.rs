//! linyaps-box is a low-level OCI container runtime invoked by a container
//! manager. Command line arguments follow the OCI runtime command line
//! interface; extended commands and options stay compatible with crun.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Clap;
use nix::unistd;

use linyaps_box::commands::exec::Exec;
use linyaps_box::commands::kill::Kill;
use linyaps_box::commands::list::List;
use linyaps_box::commands::run::Run;
use linyaps_box::logger;

#[derive(Clap, Debug)]
#[clap(version = clap::crate_version!())]
struct Opts {
    /// root directory for container status records
    #[clap(long)]
    root: Option<PathBuf>,
    /// log to this file instead of standard error
    #[clap(short, long)]
    log: Option<PathBuf>,
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Clap, Debug)]
enum SubCommand {
    List(List),
    Run(Run),
    Exec(Exec),
    Kill(Kill),
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            -1
        }
    };
    process::exit(code);
}

fn run() -> Result<i32> {
    let opts = Opts::parse();

    if let Err(err) = logger::init(opts.log.clone()) {
        eprintln!("log init failed: {:?}", err);
    }

    let root_path = opts.root.clone().unwrap_or_else(default_root);

    match opts.subcmd {
        SubCommand::List(list) => list.exec(&root_path).map(|()| 0),
        SubCommand::Run(run) => run.exec(&root_path),
        SubCommand::Exec(exec) => exec.exec(&root_path),
        SubCommand::Kill(kill) => kill.exec(&root_path).map(|()| 0),
    }
}

/// `/run/linyaps-box` for root, a per-user runtime directory otherwise.
fn default_root() -> PathBuf {
    let euid = unistd::geteuid();
    if euid.is_root() {
        return PathBuf::from("/run/linyaps-box");
    }

    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join("linyaps-box"),
        None => std::env::temp_dir().join(format!("linyaps-box-{}", euid)),
    }
}
