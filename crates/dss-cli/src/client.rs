use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use dss_rs::protocol::{CopyRequest, Plan, ReadRequest, Reply, Request, split_datagram};

use crate::cli::{ClientArgs, DiskArgs, DiskCommand, UserArgs, UserCommand};

const GROUP_PORTS: RangeInclusive<u16> = 15900..=15999;
const REPLY_BUF_LEN: usize = 8 * 1024;

/// Client sends one request at a time and waits for the reply carrying its request id.
pub struct Client {
    socket: UdpSocket,
    manager: SocketAddr,
    timeout: Duration,
    rng: StdRng,
}

impl Client {
    pub async fn connect(args: &ClientArgs) -> Result<Self> {
        let local: SocketAddr = if args.manager.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .context("bind client socket")?;
        Ok(Self {
            socket,
            manager: args.manager,
            timeout: Duration::from_millis(args.timeout_ms),
            rng: StdRng::from_os_rng(),
        })
    }

    pub async fn call(&mut self, request: &Request) -> Result<Reply> {
        let req_id: u32 = self.rng.random();
        self.socket
            .send_to(&request.to_datagram(req_id), self.manager)
            .await
            .with_context(|| format!("send {} to {}", request.opcode(), self.manager))?;

        tokio::time::timeout(self.timeout, self.receive(req_id))
            .await
            .with_context(|| {
                format!(
                    "no reply to {} from {} within {:?}",
                    request.opcode(),
                    self.manager,
                    self.timeout
                )
            })?
    }

    async fn receive(&self, req_id: u32) -> Result<Reply> {
        let mut buf = vec![0u8; REPLY_BUF_LEN];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("receive reply")?;
            if from != self.manager {
                debug!(%from, "ignoring datagram from a stranger");
                continue;
            }
            let (header, payload) = split_datagram(&buf[..len])?;
            if header.req_id != req_id {
                debug!(got = header.req_id, want = req_id, "ignoring stale reply");
                continue;
            }
            let reply = Reply::decode(header.opcode()?, payload)?;
            return Ok(reply);
        }
    }
}

pub async fn run_user(args: UserArgs) -> Result<()> {
    let mut client = Client::connect(&args.client).await?;

    match args.command {
        UserCommand::RegisterUser {
            name,
            m_port,
            c_port,
        } => {
            warn_port_range(m_port, "user");
            warn_port_range(c_port, "user");
            let reply = client
                .call(&Request::RegisterUser {
                    name,
                    m_port,
                    c_port,
                })
                .await?;
            expect_status(&reply)
        }
        UserCommand::ConfigureDss {
            dss,
            n,
            striping_unit,
        } => {
            let reply = client
                .call(&Request::ConfigureDss {
                    dss,
                    n,
                    striping_unit,
                })
                .await?;
            expect_status(&reply)
        }
        UserCommand::Ls => match client.call(&Request::Ls).await? {
            Reply::Listing(text) => {
                print!("{text}");
                Ok(())
            }
            other => expect_status(&other),
        },
        UserCommand::Copy { dss, file, owner } => copy(&mut client, dss, &file, owner).await,
        UserCommand::Read { dss, file, user } => {
            let read = ReadRequest { dss, file, user };
            match client.call(&Request::ReadBegin(read.clone())).await? {
                Reply::ReadPlan(plan) => {
                    println!("read {} ({} B)", plan.file_name, plan.file_size);
                    print_plan(&plan.plan, u64::from(plan.file_size));
                }
                other => return expect_status(&other),
            }
            info!(file = %read.file, "transfer from storage nodes simulated");
            let reply = client.call(&Request::ReadComplete(read)).await?;
            expect_status(&reply)
        }
        UserCommand::DiskFailure { dss, disk } => {
            let begin = Request::FailBegin {
                dss: dss.clone(),
                disk: disk.unwrap_or_default(),
            };
            match client.call(&begin).await? {
                Reply::FailPlan(plan) => print_plan(&plan, 0),
                other => return expect_status(&other),
            }
            info!(%dss, "recovery simulated");
            let reply = client.call(&Request::RecoveryComplete { dss }).await?;
            expect_status(&reply)
        }
        UserCommand::DecommissionDss { dss } => {
            match client.call(&Request::DecomBegin { dss: dss.clone() }).await? {
                Reply::DecomPlan(plan) => print_plan(&plan, 0),
                other => return expect_status(&other),
            }
            info!(%dss, "member wipe simulated");
            let reply = client.call(&Request::DecomComplete { dss }).await?;
            expect_status(&reply)
        }
        UserCommand::DeregisterUser { name } => {
            let reply = client.call(&Request::DeregisterUser { name }).await?;
            expect_status(&reply)
        }
    }
}

pub async fn run_disk(args: DiskArgs) -> Result<()> {
    let mut client = Client::connect(&args.client).await?;

    let request = match args.command {
        DiskCommand::RegisterDisk {
            name,
            capacity_blocks,
            m_port,
            c_port,
        } => {
            warn_port_range(m_port, "disk");
            warn_port_range(c_port, "disk");
            Request::RegisterDisk {
                name,
                capacity_blocks,
                m_port,
                c_port,
            }
        }
        DiskCommand::DeregisterDisk { name } => Request::DeregisterDisk { name },
    };
    let reply = client.call(&request).await?;
    expect_status(&reply)
}

async fn copy(client: &mut Client, dss: String, path: &Path, owner: String) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    let size = u32::try_from(meta.len())
        .with_context(|| format!("{} is larger than 4 GiB", path.display()))?;
    let request = CopyRequest {
        dss: if dss == "-" { String::new() } else { dss },
        file: recorded_name(path),
        size,
        owner,
    };
    match client.call(&Request::CopyBegin(request.clone())).await? {
        Reply::CopyPlan(plan) => print_plan(&plan, u64::from(size)),
        other => return expect_status(&other),
    }
    info!(file = %request.file, size, "transfer to storage nodes simulated");
    let reply = client.call(&Request::CopyComplete(request)).await?;
    expect_status(&reply)
}

/// The path is recorded as typed; the codec clips it to the file-name field.
fn recorded_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `expect_status` prints a status reply and turns a rejection into an error.
fn expect_status(reply: &Reply) -> Result<()> {
    match reply {
        Reply::Status { status, message } if status.is_ok() => {
            println!("{message}");
            Ok(())
        }
        Reply::Status { status, message } => bail!("{status}: {message}"),
        other => bail!("unexpected {} reply", other.opcode()),
    }
}

fn print_plan(plan: &Plan, size: u64) {
    println!(
        "DSS {}: n={} striping_unit={} B failed_mask={:#x}",
        plan.dss_name,
        plan.n(),
        plan.striping_unit,
        plan.failed_mask
    );
    let stripes = plan.stripes_per_member(size);
    for (i, member) in plan.members.iter().enumerate() {
        let flag = if plan.is_failed(i) { " FAILED" } else { "" };
        println!(
            "  [{i}] {} {}:{} stripes={}{flag}",
            member.disk_name, member.addr, member.c_port, stripes[i]
        );
    }
}

/// `warn_port_range` flags ports outside the group range when `DSS_GROUP` is set.
pub fn warn_port_range(port: u16, who: &str) {
    let Ok(group) = std::env::var("DSS_GROUP") else {
        return;
    };
    if !GROUP_PORTS.contains(&port) {
        warn!(
            port,
            group = %group,
            "{who}: port outside group range {}..={}",
            GROUP_PORTS.start(),
            GROUP_PORTS.end()
        );
    }
}
