//! The coordinator state machine.
//!
//! [`Coordinator`] owns every table and is the only thing that mutates them. One datagram
//! in produces at most one datagram out, carrying the request id of the request.

#[cfg(test)]
mod dispatcher_tests;

use std::net::SocketAddr;

use tracing::{debug, info};

use crate::allocator::{Allocator, build_plan};
use crate::directory::{
    Directory, DirectoryLimits, MaintenanceKind, validate_file_name,
};
use crate::error::{DssError, Result};
use crate::protocol::{
    CopyRequest, ReadPlan, ReadRequest, Reply, Request, Status, split_datagram,
};
use crate::registry::{PortPair, Registry, RegistryLimits};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoordinatorConfig {
    pub max_users: usize,
    pub max_disks: usize,
    pub max_arrays: usize,
    pub max_files: usize,
    pub max_read_sessions: usize,
    /// Accept COPY and READ from callers not registered under the declared user name.
    pub allow_unregistered: bool,
    /// Fixed allocator seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let registry = RegistryLimits::default();
        let directory = DirectoryLimits::default();
        Self {
            max_users: registry.max_users,
            max_disks: registry.max_disks,
            max_arrays: directory.max_arrays,
            max_files: directory.max_files,
            max_read_sessions: directory.max_read_sessions,
            allow_unregistered: false,
            seed: None,
        }
    }
}

impl CoordinatorConfig {
    const fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_users: self.max_users,
            max_disks: self.max_disks,
        }
    }

    const fn directory_limits(&self) -> DirectoryLimits {
        DirectoryLimits {
            max_arrays: self.max_arrays,
            max_files: self.max_files,
            max_read_sessions: self.max_read_sessions,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CoordinatorStats {
    /// Requests answered with OK or a plan.
    pub served: u64,
    /// Decoded requests answered with an error status.
    pub rejected: u64,
    /// Requests with a header but an undecodable payload.
    pub malformed: u64,
    /// Datagrams too short to carry a header; never answered.
    pub dropped: u64,
}

#[derive(Debug)]
pub struct Coordinator {
    registry: Registry,
    directory: Directory,
    allocator: Allocator,
    allow_unregistered: bool,
    stats: CoordinatorStats,
}

impl Coordinator {
    #[must_use]
    pub fn new(cfg: &CoordinatorConfig) -> Self {
        let allocator = match cfg.seed {
            Some(seed) => Allocator::from_seed(seed),
            None => Allocator::from_os_rng(),
        };
        Self::with_allocator(cfg, allocator)
    }

    #[must_use]
    pub fn with_allocator(cfg: &CoordinatorConfig, allocator: Allocator) -> Self {
        Self {
            registry: Registry::new(cfg.registry_limits()),
            directory: Directory::new(cfg.directory_limits()),
            allocator,
            allow_unregistered: cfg.allow_unregistered,
            stats: CoordinatorStats::default(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn directory(&self) -> &Directory {
        &self.directory
    }

    #[must_use]
    pub const fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// `handle_datagram` decodes one datagram, applies it and encodes the reply.
    ///
    /// Returns `None` only for datagrams shorter than the header.
    pub fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr) -> Option<Vec<u8>> {
        let (header, payload) = match split_datagram(datagram) {
            Ok(parts) => parts,
            Err(err) => {
                self.stats.dropped += 1;
                debug!(%source, error = %err, "datagram dropped");
                return None;
            }
        };

        let decoded = header
            .opcode()
            .and_then(|opcode| Request::decode(opcode, payload));
        let reply = match decoded {
            Ok(request) => {
                debug!(
                    op = %request.opcode(),
                    req_id = header.req_id,
                    %source,
                    caller = self.caller(source),
                    "request"
                );
                self.dispatch(request, source)
            }
            Err(err) => {
                self.stats.malformed += 1;
                info!(req_id = header.req_id, %source, error = %err, "malformed request");
                Reply::error(Status::BadParams, err.to_string())
            }
        };
        Some(reply.to_datagram(header.req_id))
    }

    /// `dispatch` applies a decoded request and always produces a reply.
    pub fn dispatch(&mut self, request: Request, source: SocketAddr) -> Reply {
        let opcode = request.opcode();
        match self.apply(request, source) {
            Ok(reply) => {
                self.stats.served += 1;
                reply
            }
            Err(err) => {
                self.stats.rejected += 1;
                let status = err.status();
                info!(op = %opcode, %status, %source, error = %err, "request rejected");
                Reply::error(status, err.to_string())
            }
        }
    }

    fn apply(&mut self, request: Request, source: SocketAddr) -> Result<Reply> {
        match request {
            Request::RegisterUser {
                name,
                m_port,
                c_port,
            } => {
                self.registry
                    .register_user(&name, source, PortPair::new(m_port, c_port))?;
                info!(user = %name, %source, "user registered");
                Ok(Reply::ok("user registered"))
            }
            Request::RegisterDisk {
                name,
                capacity_blocks,
                m_port,
                c_port,
            } => {
                self.registry.register_disk(
                    &name,
                    capacity_blocks,
                    source,
                    PortPair::new(m_port, c_port),
                )?;
                info!(disk = %name, %source, capacity_blocks, "disk registered");
                Ok(Reply::ok("disk registered"))
            }
            Request::ConfigureDss {
                dss,
                n,
                striping_unit,
            } => self.configure(&dss, n, striping_unit),
            Request::DeregisterUser { name } => {
                self.registry.deregister_user(&name)?;
                info!(user = %name, "user deregistered");
                Ok(Reply::ok("user deregistered"))
            }
            Request::DeregisterDisk { name } => {
                self.registry.deregister_disk(&name)?;
                info!(disk = %name, "disk deregistered");
                Ok(Reply::ok("disk deregistered"))
            }
            Request::Ls => Ok(Reply::Listing(self.directory.list(&self.registry)?)),
            Request::CopyBegin(copy) => self.copy_begin(&copy, source),
            Request::CopyComplete(copy) => self.copy_complete(&copy, source),
            Request::ReadBegin(read) => self.read_begin(&read, source),
            Request::ReadComplete(read) => {
                let closed = self.directory.close_session(&read.user, &read.dss, &read.file);
                debug!(dss = %read.dss, file = %read.file, user = %read.user, closed, "read complete");
                Ok(Reply::ok("read complete"))
            }
            Request::FailBegin { dss, disk } => self.fail_begin(&dss, &disk),
            Request::RecoveryComplete { dss } => {
                let array = self.directory.require_mut(&dss)?;
                array.state.end_maintenance();
                array.failed_mask = 0;
                info!(%dss, "recovery complete");
                Ok(Reply::ok("recovery complete"))
            }
            Request::DecomBegin { dss } => self.decommission_begin(&dss),
            Request::DecomComplete { dss } => {
                let members = self
                    .directory
                    .remove_array(&dss)
                    .ok_or_else(|| DssError::bad_params(format!("unknown DSS {dss}")))?;
                self.registry.release(&members);
                info!(%dss, released = members.len(), "DSS decommissioned");
                Ok(Reply::ok("DSS decommissioned"))
            }
        }
    }

    /// Array creation is all-or-nothing: a failed placement rolls the reservation back.
    fn configure(&mut self, dss: &str, n: u32, striping_unit: u32) -> Result<Reply> {
        self.directory.check_new_array(dss, n, striping_unit)?;
        let needed = n as usize;
        let free = self.registry.count_free_disks();
        if free < needed {
            return Err(DssError::InsufficientDisks { needed, free });
        }

        let id = self.directory.reserve(dss, striping_unit)?;
        let placed = self
            .allocator
            .pick_random_free_disks(&self.registry, needed)
            .and_then(|members| {
                self.registry.mark_in_dss(&members)?;
                Ok(members)
            });
        match placed {
            Ok(members) => self.directory.commit(id, members),
            Err(err) => {
                self.directory.rollback(id);
                return Err(err);
            }
        }

        info!(%dss, n, striping_unit, "DSS configured");
        Ok(Reply::ok(format!(
            "configured DSS {dss} n={n}, striping_unit={striping_unit}"
        )))
    }

    fn copy_begin(&self, copy: &CopyRequest, source: SocketAddr) -> Result<Reply> {
        self.check_identity(&copy.owner, source)?;
        let array = self.directory.resolve(&copy.dss)?;
        validate_file_name(&copy.file)?;
        array.state.ensure_active(&array.name)?;
        let plan = build_plan(&self.registry, array)?;
        debug!(dss = %array.name, file = %copy.file, size = copy.size, "copy plan issued");
        Ok(Reply::CopyPlan(plan))
    }

    fn copy_complete(&mut self, copy: &CopyRequest, source: SocketAddr) -> Result<Reply> {
        self.check_identity(&copy.owner, source)?;
        let array = self.directory.resolve(&copy.dss)?;
        array.state.ensure_active(&array.name)?;
        let dss = array.name.clone();
        self.directory
            .add_file(&dss, &copy.file, copy.size, &copy.owner)?;
        info!(%dss, file = %copy.file, size = copy.size, owner = %copy.owner, "file committed");
        Ok(Reply::ok("copy complete"))
    }

    fn read_begin(&mut self, read: &ReadRequest, source: SocketAddr) -> Result<Reply> {
        self.check_identity(&read.user, source)?;
        let array = self.directory.require(&read.dss)?;
        array.state.ensure_active(&array.name)?;
        let entry = self
            .directory
            .find_file(&read.dss, &read.file)
            .ok_or_else(|| DssError::NotFound {
                dss: read.dss.clone(),
                file: read.file.clone(),
            })?;
        if entry.owner != read.user {
            return Err(DssError::NotOwner {
                user: read.user.clone(),
                file: read.file.clone(),
            });
        }
        let reply = ReadPlan {
            plan: build_plan(&self.registry, array)?,
            file_name: entry.name.clone(),
            file_size: entry.size,
        };

        self.directory
            .open_session(&read.user, &read.dss, &read.file)?;
        debug!(dss = %read.dss, file = %read.file, user = %read.user, "read session opened");
        Ok(Reply::ReadPlan(reply))
    }

    fn fail_begin(&mut self, dss: &str, disk: &str) -> Result<Reply> {
        let has_sessions = self.directory.has_sessions(dss);
        let array = self.directory.require_mut(dss)?;
        if has_sessions {
            return Err(DssError::bad_params(format!(
                "DSS {dss} has active read sessions"
            )));
        }
        array.state.ensure_active(dss)?;
        let member = if disk.is_empty() {
            None
        } else {
            let index = self
                .registry
                .disk_by_name(disk)
                .and_then(|d| array.member_index(d.id))
                .filter(|i| *i < 64)
                .ok_or_else(|| {
                    DssError::bad_params(format!("disk {disk} is not a member of DSS {dss}"))
                })?;
            Some(index)
        };

        let mut plan = build_plan(&self.registry, array)?;
        array
            .state
            .begin_maintenance(dss, MaintenanceKind::Failure)?;
        if let Some(index) = member {
            array.failed_mask |= 1u64 << index;
        }
        plan.failed_mask = array.failed_mask;
        info!(%dss, disk, failed_mask = array.failed_mask, "disk failure window opened");
        Ok(Reply::FailPlan(plan))
    }

    fn decommission_begin(&mut self, dss: &str) -> Result<Reply> {
        let has_sessions = self.directory.has_sessions(dss);
        let array = self.directory.require_mut(dss)?;
        if has_sessions {
            return Err(DssError::bad_params(format!(
                "DSS {dss} has active read sessions"
            )));
        }
        array.state.ensure_active(dss)?;
        let plan = build_plan(&self.registry, array)?;
        array
            .state
            .begin_maintenance(dss, MaintenanceKind::Decommission)?;
        info!(%dss, "decommission window opened");
        Ok(Reply::DecomPlan(plan))
    }

    /// The declared user must be registered from the request's source IP.
    fn check_identity(&self, user: &str, source: SocketAddr) -> Result<()> {
        if self.allow_unregistered || self.registry.user_at_source(user, source) {
            return Ok(());
        }
        Err(DssError::NotRegistered {
            kind: "user",
            name: user.to_string(),
        })
    }

    fn caller(&self, source: SocketAddr) -> &str {
        self.registry
            .find_user_by_source_address(source)
            .map_or("-", |u| u.name.as_str())
    }
}
