use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use dss_rs::CoordinatorConfig;

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the coordinator.
    Manager(ManagerArgs),

    /// Issue user requests against a coordinator.
    User(UserArgs),

    /// Issue storage node requests against a coordinator.
    Disk(DiskArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ManagerArgs {
    #[arg(long, env = "DSS_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    #[arg(long, env = "DSS_PORT", default_value_t = 15900)]
    pub port: u16,

    /// Seed the disk allocator for reproducible placements.
    #[arg(long, env = "DSS_SEED")]
    pub seed: Option<u64>,

    /// Skip the check that COPY and READ come from the declared user's registered IP.
    #[arg(long, env = "DSS_ALLOW_UNREGISTERED", default_value_t = false)]
    pub allow_unregistered: bool,

    #[arg(long, env = "DSS_MAX_USERS", default_value_t = 64)]
    pub max_users: usize,

    #[arg(long, env = "DSS_MAX_DISKS", default_value_t = 64)]
    pub max_disks: usize,

    #[arg(long, env = "DSS_MAX_ARRAYS", default_value_t = 64)]
    pub max_arrays: usize,

    #[arg(long, env = "DSS_MAX_FILES", default_value_t = 256)]
    pub max_files: usize,

    #[arg(long, env = "DSS_MAX_READ_SESSIONS", default_value_t = 128)]
    pub max_read_sessions: usize,
}

impl ManagerArgs {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_users: self.max_users,
            max_disks: self.max_disks,
            max_arrays: self.max_arrays,
            max_files: self.max_files,
            max_read_sessions: self.max_read_sessions,
            allow_unregistered: self.allow_unregistered,
            seed: self.seed,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Coordinator address.
    #[arg(long, env = "DSS_MANAGER")]
    pub manager: SocketAddr,

    #[arg(long, env = "DSS_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
}

#[derive(Args)]
pub struct UserArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand)]
pub enum UserCommand {
    RegisterUser {
        name: String,
        m_port: u16,
        c_port: u16,
    },
    ConfigureDss {
        dss: String,
        n: u32,
        striping_unit: u32,
    },
    Ls,
    /// Copy a local file; `-` targets the first DSS.
    Copy {
        dss: String,
        file: PathBuf,
        owner: String,
    },
    Read {
        dss: String,
        file: String,
        user: String,
    },
    DiskFailure {
        dss: String,
        disk: Option<String>,
    },
    DecommissionDss {
        dss: String,
    },
    DeregisterUser {
        name: String,
    },
}

#[derive(Args)]
pub struct DiskArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(subcommand)]
    pub command: DiskCommand,
}

#[derive(Subcommand)]
pub enum DiskCommand {
    RegisterDisk {
        name: String,
        capacity_blocks: u32,
        m_port: u16,
        c_port: u16,
    },
    DeregisterDisk {
        name: String,
    },
}
