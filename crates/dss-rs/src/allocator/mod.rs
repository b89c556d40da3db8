//! Random disk placement for new arrays and plan projection for clients.


use std::net::{IpAddr, Ipv4Addr};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::directory::DssArray;
use crate::error::{DssError, Result};
use crate::protocol::{Plan, PlanMember};
use crate::registry::{DiskId, Registry};

/// Allocator owns the generator used for disk placement.
pub struct Allocator {
    rng: StdRng,
}

impl Allocator {
    #[must_use]
    pub const fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Reproducible placements, for tests and `--seed`.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    #[must_use]
    pub fn from_os_rng() -> Self {
        Self::new(StdRng::from_os_rng())
    }

    /// `pick_random_free_disks` returns `n` distinct FREE disks chosen uniformly at random.
    ///
    /// The registry is not modified; the caller marks the result IN_DSS.
    ///
    /// # Errors
    /// INSUFFICIENT_DISKS when fewer than `n` disks are FREE.
    pub fn pick_random_free_disks(&mut self, registry: &Registry, n: usize) -> Result<Vec<DiskId>> {
        let mut free = registry.free_disk_ids();
        if free.len() < n {
            return Err(DssError::InsufficientDisks {
                needed: n,
                free: free.len(),
            });
        }

        // Fisher-Yates over the whole free set.
        for i in (1..free.len()).rev() {
            let j = self.rng.random_range(0..=i);
            free.swap(i, j);
        }
        free.truncate(n);
        Ok(free)
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator").finish_non_exhaustive()
    }
}

/// `build_plan` projects an array's members, in member order, onto the addresses clients use.
///
/// # Errors
/// INTERNAL if a member disk is no longer registered.
pub fn build_plan(registry: &Registry, array: &DssArray) -> Result<Plan> {
    let members = array
        .members
        .iter()
        .map(|id| {
            let disk = registry
                .disk(*id)
                .ok_or_else(|| DssError::internal(format!("member disk id {id} missing")))?;
            Ok(PlanMember {
                disk_name: disk.name.clone(),
                addr: ipv4_of(disk.addr.ip()),
                c_port: disk.ports.c_port,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Plan {
        dss_name: array.name.clone(),
        striping_unit: array.striping_unit,
        failed_mask: array.failed_mask,
        members,
    })
}

/// Plans carry IPv4 only; v4-mapped v6 sources are unwrapped, anything else is unspecified.
fn ipv4_of(ip: IpAddr) -> Ipv4Addr {
    match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    }
}
