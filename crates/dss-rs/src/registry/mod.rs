//! Registry of users and disks known to the coordinator.
//!
//! Users and disks share one namespace of (manager-port, command-port) pairs: no two
//! registered peers of either kind may advertise the same pair.


use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;

use tracing::debug;

use crate::error::{DssError, Result};
use crate::protocol::{NAME_LEN, fits_field};

/// DiskId identifies a registered disk for the lifetime of its registration.
pub type DiskId = u32;

/// PortPair is the (manager, command) port pair a peer advertises at registration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PortPair {
    pub m_port: u16,
    pub c_port: u16,
}

impl PortPair {
    #[must_use]
    pub const fn new(m_port: u16, c_port: u16) -> Self {
        Self { m_port, c_port }
    }

    fn validate(self) -> Result<()> {
        if self.m_port == 0 || self.c_port == 0 {
            return Err(DssError::bad_params("ports must be non-zero"));
        }
        if self.m_port == self.c_port {
            return Err(DssError::bad_params(
                "manager and command ports must differ",
            ));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiskState {
    Free,
    InDss,
}

#[derive(Clone, Debug)]
pub struct User {
    pub name: String,
    /// Source IP of the registration with the advertised manager port.
    pub addr: SocketAddr,
    pub ports: PortPair,
}

#[derive(Clone, Debug)]
pub struct Disk {
    pub id: DiskId,
    pub name: String,
    pub capacity_blocks: u32,
    pub addr: SocketAddr,
    pub ports: PortPair,
    pub state: DiskState,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegistryLimits {
    pub max_users: usize,
    pub max_disks: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_users: 64,
            max_disks: 64,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    limits: RegistryLimits,
    users: BTreeMap<String, User>,
    disks: BTreeMap<DiskId, Disk>,
    disk_ids: HashMap<String, DiskId>,
    ports: HashSet<PortPair>,
    next_disk_id: DiskId,
}

impl Registry {
    #[must_use]
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// `register_user` records a user reachable at `source`'s IP on the advertised ports.
    ///
    /// # Errors
    /// ALREADY_REGISTERED for a taken name, BAD_PARAMS for invalid or colliding ports,
    /// INTERNAL when the user table is full.
    pub fn register_user(&mut self, name: &str, source: SocketAddr, ports: PortPair) -> Result<()> {
        validate_name("user", name)?;
        if self.users.contains_key(name) {
            return Err(DssError::AlreadyRegistered {
                kind: "user",
                name: name.to_string(),
            });
        }
        self.admit_ports(ports)?;
        if self.users.len() >= self.limits.max_users {
            return Err(DssError::internal("user table full"));
        }

        self.ports.insert(ports);
        self.users.insert(
            name.to_string(),
            User {
                name: name.to_string(),
                addr: SocketAddr::new(source.ip(), ports.m_port),
                ports,
            },
        );
        debug!(user = name, m_port = ports.m_port, c_port = ports.c_port, "user registered");
        Ok(())
    }

    /// `register_disk` records a FREE disk reachable at `source`'s IP on the advertised ports.
    ///
    /// # Errors
    /// Same taxonomy as [`Self::register_user`].
    pub fn register_disk(
        &mut self,
        name: &str,
        capacity_blocks: u32,
        source: SocketAddr,
        ports: PortPair,
    ) -> Result<DiskId> {
        validate_name("disk", name)?;
        if self.disk_ids.contains_key(name) {
            return Err(DssError::AlreadyRegistered {
                kind: "disk",
                name: name.to_string(),
            });
        }
        self.admit_ports(ports)?;
        if self.disks.len() >= self.limits.max_disks {
            return Err(DssError::internal("disk table full"));
        }

        let id = self.next_disk_id;
        self.next_disk_id = self.next_disk_id.wrapping_add(1);
        self.ports.insert(ports);
        self.disk_ids.insert(name.to_string(), id);
        self.disks.insert(
            id,
            Disk {
                id,
                name: name.to_string(),
                capacity_blocks,
                addr: SocketAddr::new(source.ip(), ports.m_port),
                ports,
                state: DiskState::Free,
            },
        );
        debug!(disk = name, id, capacity_blocks, "disk registered");
        Ok(id)
    }

    /// # Errors
    /// NOT_REGISTERED if no user has that name.
    pub fn deregister_user(&mut self, name: &str) -> Result<()> {
        let user = self.users.remove(name).ok_or_else(|| DssError::NotRegistered {
            kind: "user",
            name: name.to_string(),
        })?;
        self.ports.remove(&user.ports);
        debug!(user = name, "user deregistered");
        Ok(())
    }

    /// # Errors
    /// NOT_REGISTERED if no disk has that name, BAD_PARAMS while the disk belongs to an array.
    pub fn deregister_disk(&mut self, name: &str) -> Result<()> {
        let id = *self.disk_ids.get(name).ok_or_else(|| DssError::NotRegistered {
            kind: "disk",
            name: name.to_string(),
        })?;
        let in_dss = self.disks.get(&id).is_some_and(|d| d.state == DiskState::InDss);
        if in_dss {
            return Err(DssError::bad_params(format!(
                "disk {name} is in an active DSS"
            )));
        }
        self.disk_ids.remove(name);
        if let Some(disk) = self.disks.remove(&id) {
            self.ports.remove(&disk.ports);
        }
        debug!(disk = name, "disk deregistered");
        Ok(())
    }

    #[must_use]
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    #[must_use]
    pub fn disk(&self, id: DiskId) -> Option<&Disk> {
        self.disks.get(&id)
    }

    #[must_use]
    pub fn disk_by_name(&self, name: &str) -> Option<&Disk> {
        self.disk_ids.get(name).and_then(|id| self.disks.get(id))
    }

    /// Disks in registration order.
    pub fn disks(&self) -> impl Iterator<Item = &Disk> {
        self.disks.values()
    }

    #[must_use]
    pub fn count_free_disks(&self) -> usize {
        self.disks
            .values()
            .filter(|d| d.state == DiskState::Free)
            .count()
    }

    /// `free_disk_ids` lists FREE disks in registration order.
    #[must_use]
    pub fn free_disk_ids(&self) -> Vec<DiskId> {
        self.disks
            .values()
            .filter(|d| d.state == DiskState::Free)
            .map(|d| d.id)
            .collect()
    }

    /// `find_user_by_source_address` maps a request's source to a registered user.
    ///
    /// A user whose IP and one of whose registered ports match wins; otherwise the first
    /// user registered from the same IP.
    #[must_use]
    pub fn find_user_by_source_address(&self, source: SocketAddr) -> Option<&User> {
        let port = source.port();
        self.users
            .values()
            .find(|u| {
                u.addr.ip() == source.ip() && (u.ports.m_port == port || u.ports.c_port == port)
            })
            .or_else(|| self.users.values().find(|u| u.addr.ip() == source.ip()))
    }

    /// `user_at_source` reports whether `name` is registered from `source`'s IP.
    #[must_use]
    pub fn user_at_source(&self, name: &str, source: SocketAddr) -> bool {
        self.users
            .get(name)
            .is_some_and(|u| u.addr.ip() == source.ip())
    }

    /// `mark_in_dss` moves every listed disk from FREE to IN_DSS, or none of them.
    ///
    /// # Errors
    /// INTERNAL if any disk is unknown or not FREE; no disk is changed in that case.
    pub fn mark_in_dss(&mut self, ids: &[DiskId]) -> Result<()> {
        for id in ids {
            match self.disks.get(id) {
                Some(d) if d.state == DiskState::Free => {}
                Some(d) => {
                    return Err(DssError::internal(format!("disk {} is not free", d.name)));
                }
                None => return Err(DssError::internal(format!("disk id {id} vanished"))),
            }
        }
        for id in ids {
            if let Some(d) = self.disks.get_mut(id) {
                d.state = DiskState::InDss;
            }
        }
        Ok(())
    }

    /// `release` returns disks to FREE; unknown ids are skipped.
    pub fn release(&mut self, ids: &[DiskId]) {
        for id in ids {
            if let Some(d) = self.disks.get_mut(id) {
                d.state = DiskState::Free;
            }
        }
    }

    /// Collisions are checked across users and disks together.
    fn admit_ports(&self, ports: PortPair) -> Result<()> {
        ports.validate()?;
        if self.ports.contains(&ports) {
            return Err(DssError::bad_params(format!(
                "port pair ({}, {}) already in use",
                ports.m_port, ports.c_port
            )));
        }
        Ok(())
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DssError::bad_params(format!("{kind} name is empty")));
    }
    if !fits_field(name, NAME_LEN) {
        return Err(DssError::bad_params(format!(
            "{kind} name longer than {} bytes",
            NAME_LEN - 1
        )));
    }
    Ok(())
}
