use std::net::Ipv4Addr;

use super::wire::{Reader, Writer};
use super::{DSS_NAME_LEN, DecodeError, FILE_NAME_LEN, MAX_PLAN_DISKS, NAME_LEN};

const MEMBER_LEN: usize = NAME_LEN + 4 + 2 + 2;
pub(crate) const PLAN_LEN: usize = DSS_NAME_LEN + 4 + 4 + 8 + MAX_PLAN_DISKS * MEMBER_LEN;
pub(crate) const READ_PLAN_LEN: usize = PLAN_LEN + FILE_NAME_LEN + 4;

/// PlanMember is one array member as a client must address it for direct transfers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanMember {
    pub disk_name: String,
    pub addr: Ipv4Addr,
    pub c_port: u16,
}

/// Plan is the ordered member layout of an array. Stripe `i` of a stream lives on member
/// `i mod n`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Plan {
    pub dss_name: String,
    pub striping_unit: u32,
    /// Bit `k` is set while member `k` is marked failed by a failure simulation.
    pub failed_mask: u64,
    pub members: Vec<PlanMember>,
}

/// ReadPlan is a [`Plan`] plus the size of the file being read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadPlan {
    pub plan: Plan,
    pub file_name: String,
    pub file_size: u32,
}

impl Plan {
    #[must_use]
    pub fn n(&self) -> usize {
        self.members.len()
    }

    /// `member_for_stripe` returns the member index that holds stripe `stripe`.
    #[must_use]
    pub fn member_for_stripe(&self, stripe: u64) -> Option<usize> {
        let n = u64::try_from(self.members.len()).ok().filter(|n| *n > 0)?;
        usize::try_from(stripe % n).ok()
    }

    /// `stripes_per_member` counts how many stripe units of a `size`-byte stream land on
    /// each member.
    #[must_use]
    pub fn stripes_per_member(&self, size: u64) -> Vec<u64> {
        let mut counts = vec![0u64; self.members.len()];
        let n = counts.len() as u64;
        if n == 0 || self.striping_unit == 0 {
            return counts;
        }
        let stripes = size.div_ceil(u64::from(self.striping_unit));
        for (i, count) in counts.iter_mut().enumerate() {
            let i = i as u64;
            *count = stripes / n + u64::from(i < stripes % n);
        }
        counts
    }

    #[must_use]
    pub fn is_failed(&self, member: usize) -> bool {
        member < 64 && self.failed_mask & (1u64 << member) != 0
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        let n = self.members.len().min(MAX_PLAN_DISKS);
        w.text(&self.dss_name, DSS_NAME_LEN)
            .u32(n as u32)
            .u32(self.striping_unit)
            .u64(self.failed_mask);
        for m in &self.members[..n] {
            w.text(&m.disk_name, NAME_LEN)
                .u32(u32::from(m.addr))
                .u16(m.c_port)
                .zeros(2);
        }
        w.zeros((MAX_PLAN_DISKS - n) * MEMBER_LEN);
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let dss_name = r.text(DSS_NAME_LEN)?;
        let n = r.u32()?;
        let striping_unit = r.u32()?;
        let failed_mask = r.u64()?;
        let count = usize::try_from(n)
            .ok()
            .filter(|n| *n <= MAX_PLAN_DISKS)
            .ok_or(DecodeError::PlanTooLarge(n))?;

        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let disk_name = r.text(NAME_LEN)?;
            let addr = Ipv4Addr::from(r.u32()?);
            let c_port = r.u16()?;
            r.skip(2)?;
            members.push(PlanMember {
                disk_name,
                addr,
                c_port,
            });
        }
        r.skip((MAX_PLAN_DISKS - count) * MEMBER_LEN)?;

        Ok(Self {
            dss_name,
            striping_unit,
            failed_mask,
            members,
        })
    }
}

impl ReadPlan {
    pub(crate) fn write(&self, w: &mut Writer) {
        self.plan.write(w);
        w.text(&self.file_name, FILE_NAME_LEN).u32(self.file_size);
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let plan = Plan::read(r)?;
        let file_name = r.text(FILE_NAME_LEN)?;
        let file_size = r.u32()?;
        Ok(Self {
            plan,
            file_name,
            file_size,
        })
    }
}
