//! Arrays, the files committed to them, and the read sessions open against them.


use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};

use tracing::debug;

use crate::error::{DssError, Result};
use crate::protocol::{DSS_NAME_LEN, FILE_NAME_LEN, MAX_PLAN_DISKS, fits_field};
use crate::registry::{DiskId, Registry};

pub type ArrayId = u32;

pub const MIN_ARRAY_DISKS: u32 = 3;
pub const MIN_STRIPING_UNIT: u32 = 128;
pub const MAX_STRIPING_UNIT: u32 = 1 << 20;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaintenanceKind {
    Failure,
    Decommission,
}

impl MaintenanceKind {
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Failure => "disk failure",
            Self::Decommission => "decommission",
        }
    }
}

/// ArrayState is the maintenance lifecycle of one array.
///
/// While `Critical`, copy and read begins and any further maintenance begin on the
/// array are refused with BUSY.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ArrayState {
    #[default]
    Active,
    Critical(MaintenanceKind),
}

impl ArrayState {
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical(_))
    }

    /// # Errors
    /// BUSY while the array is in maintenance.
    pub fn ensure_active(self, dss: &str) -> Result<()> {
        match self {
            Self::Active => Ok(()),
            Self::Critical(kind) => Err(DssError::Busy {
                dss: dss.to_string(),
                reason: kind.reason(),
            }),
        }
    }

    /// # Errors
    /// BUSY if a maintenance window is already open.
    pub fn begin_maintenance(&mut self, dss: &str, kind: MaintenanceKind) -> Result<()> {
        self.ensure_active(dss)?;
        *self = Self::Critical(kind);
        Ok(())
    }

    pub fn end_maintenance(&mut self) {
        *self = Self::Active;
    }
}

impl fmt::Display for ArrayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Critical(kind) => write!(f, "critical ({})", kind.reason()),
        }
    }
}

/// DssArray is one named striped array. Member order is fixed at creation.
#[derive(Clone, Debug)]
pub struct DssArray {
    pub id: ArrayId,
    pub name: String,
    pub striping_unit: u32,
    pub members: Vec<DiskId>,
    pub failed_mask: u64,
    pub state: ArrayState,
}

impl DssArray {
    #[must_use]
    pub fn n(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn member_index(&self, disk: DiskId) -> Option<usize> {
        self.members.iter().position(|m| *m == disk)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    pub dss: String,
    pub name: String,
    pub size: u32,
    pub owner: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadSession {
    pub user: String,
    pub dss: String,
    pub file: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DirectoryLimits {
    pub max_arrays: usize,
    pub max_files: usize,
    pub max_read_sessions: usize,
}

impl Default for DirectoryLimits {
    fn default() -> Self {
        Self {
            max_arrays: 64,
            max_files: 256,
            max_read_sessions: 128,
        }
    }
}

/// Directory holds every array, file entry and read session.
#[derive(Debug, Default)]
pub struct Directory {
    limits: DirectoryLimits,
    arrays: BTreeMap<ArrayId, DssArray>,
    by_name: HashMap<String, ArrayId>,
    files: Vec<FileEntry>,
    sessions: Vec<ReadSession>,
    next_id: ArrayId,
}

impl Directory {
    #[must_use]
    pub fn new(limits: DirectoryLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// `check_new_array` validates configure parameters against the directory.
    ///
    /// # Errors
    /// BAD_PARAMS for a bad disk count, striping unit or name, or a name already in use.
    pub fn check_new_array(&self, name: &str, n: u32, striping_unit: u32) -> Result<()> {
        if n < MIN_ARRAY_DISKS {
            return Err(DssError::bad_params(format!(
                "n must be at least {MIN_ARRAY_DISKS}"
            )));
        }
        if n as usize > MAX_PLAN_DISKS {
            return Err(DssError::bad_params(format!(
                "n must be at most {MAX_PLAN_DISKS}"
            )));
        }
        if !striping_unit.is_power_of_two()
            || !(MIN_STRIPING_UNIT..=MAX_STRIPING_UNIT).contains(&striping_unit)
        {
            return Err(DssError::bad_params(format!(
                "striping unit must be a power of two in [{MIN_STRIPING_UNIT}, {MAX_STRIPING_UNIT}]"
            )));
        }
        if name.is_empty() || !fits_field(name, DSS_NAME_LEN) {
            return Err(DssError::bad_params(format!(
                "DSS name must be 1..={} bytes",
                DSS_NAME_LEN - 1
            )));
        }
        if self.by_name.contains_key(name) {
            return Err(DssError::bad_params(format!("DSS {name} already exists")));
        }
        Ok(())
    }

    /// `reserve` creates a memberless record that [`Self::commit`] completes or
    /// [`Self::rollback`] removes.
    ///
    /// # Errors
    /// INTERNAL when the array table is full.
    pub fn reserve(&mut self, name: &str, striping_unit: u32) -> Result<ArrayId> {
        if self.arrays.len() >= self.limits.max_arrays {
            return Err(DssError::internal("DSS table full"));
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.arrays.insert(
            id,
            DssArray {
                id,
                name: name.to_string(),
                striping_unit,
                members: Vec::new(),
                failed_mask: 0,
                state: ArrayState::Active,
            },
        );
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn commit(&mut self, id: ArrayId, members: Vec<DiskId>) {
        if let Some(array) = self.arrays.get_mut(&id) {
            debug!(dss = %array.name, n = members.len(), "array committed");
            array.members = members;
        }
    }

    pub fn rollback(&mut self, id: ArrayId) {
        if let Some(array) = self.arrays.remove(&id) {
            self.by_name.remove(&array.name);
            debug!(dss = %array.name, "array reservation rolled back");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DssArray> {
        self.by_name.get(name).and_then(|id| self.arrays.get(id))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DssArray> {
        let id = self.by_name.get(name)?;
        self.arrays.get_mut(id)
    }

    /// `resolve` looks up `name`, or the first array in creation order when `name` is empty.
    ///
    /// # Errors
    /// BAD_PARAMS if the array does not exist.
    pub fn resolve(&self, name: &str) -> Result<&DssArray> {
        let found = if name.is_empty() {
            self.arrays.values().next()
        } else {
            self.get(name)
        };
        found.ok_or_else(|| {
            if name.is_empty() {
                DssError::bad_params("no DSS configured")
            } else {
                DssError::bad_params(format!("unknown DSS {name}"))
            }
        })
    }

    /// # Errors
    /// BAD_PARAMS if the array does not exist.
    pub fn require(&self, name: &str) -> Result<&DssArray> {
        self.get(name)
            .ok_or_else(|| DssError::bad_params(format!("unknown DSS {name}")))
    }

    /// # Errors
    /// BAD_PARAMS if the array does not exist.
    pub fn require_mut(&mut self, name: &str) -> Result<&mut DssArray> {
        self.get_mut(name)
            .ok_or_else(|| DssError::bad_params(format!("unknown DSS {name}")))
    }

    pub fn arrays(&self) -> impl Iterator<Item = &DssArray> {
        self.arrays.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// `add_file` records a committed copy as a new entry, even when the name is already
    /// listed under `dss`. Lookups see the earliest entry.
    ///
    /// # Errors
    /// BAD_PARAMS for an empty or overlong name, INTERNAL when the file table is full.
    pub fn add_file(&mut self, dss: &str, name: &str, size: u32, owner: &str) -> Result<()> {
        validate_file_name(name)?;
        if self.files.len() >= self.limits.max_files {
            return Err(DssError::internal("file table full"));
        }
        self.files.push(FileEntry {
            dss: dss.to_string(),
            name: name.to_string(),
            size,
            owner: owner.to_string(),
        });
        Ok(())
    }

    #[must_use]
    pub fn find_file(&self, dss: &str, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.dss == dss && f.name == name)
    }

    pub fn files_of<'a>(&'a self, dss: &'a str) -> impl Iterator<Item = &'a FileEntry> {
        self.files.iter().filter(move |f| f.dss == dss)
    }

    /// # Errors
    /// INTERNAL when the session table is full.
    pub fn open_session(&mut self, user: &str, dss: &str, file: &str) -> Result<()> {
        if self.sessions.len() >= self.limits.max_read_sessions {
            return Err(DssError::internal("read session table full"));
        }
        self.sessions.push(ReadSession {
            user: user.to_string(),
            dss: dss.to_string(),
            file: file.to_string(),
        });
        Ok(())
    }

    /// `close_session` removes the first matching session and reports whether one existed.
    pub fn close_session(&mut self, user: &str, dss: &str, file: &str) -> bool {
        let pos = self
            .sessions
            .iter()
            .position(|s| s.user == user && s.dss == dss && s.file == file);
        match pos {
            Some(i) => {
                self.sessions.remove(i);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn has_sessions(&self, dss: &str) -> bool {
        self.sessions.iter().any(|s| s.dss == dss)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// `remove_array` deletes the array with every file and read session recorded under it,
    /// returning the members the caller must release.
    pub fn remove_array(&mut self, name: &str) -> Option<Vec<DiskId>> {
        let id = self.by_name.remove(name)?;
        let array = self.arrays.remove(&id)?;
        let files = self.files.len();
        self.files.retain(|f| f.dss != name);
        let sessions = self.sessions.len();
        self.sessions.retain(|s| s.dss != name);
        debug!(
            dss = name,
            files = files - self.files.len(),
            sessions = sessions - self.sessions.len(),
            "array removed"
        );
        Some(array.members)
    }

    /// `list` renders every array, in creation order, with its files.
    ///
    /// # Errors
    /// BAD_PARAMS when no array exists.
    pub fn list(&self, registry: &Registry) -> Result<String> {
        if self.arrays.is_empty() {
            return Err(DssError::bad_params("no DSS configured"));
        }
        let mut out = String::new();
        for array in self.arrays.values() {
            let disks: Vec<&str> = array
                .members
                .iter()
                .map(|id| registry.disk(*id).map_or("?", |d| d.name.as_str()))
                .collect();
            let _ = writeln!(
                out,
                "{}: n={} disks=[{}] striping_unit={} B state={}",
                array.name,
                array.n(),
                disks.join(","),
                array.striping_unit,
                array.state
            );
            for f in self.files_of(&array.name) {
                let _ = writeln!(out, "  {} {} B {}", f.name, f.size, f.owner);
            }
        }
        Ok(out)
    }
}

/// # Errors
/// BAD_PARAMS for an empty name or one that does not fit the wire field.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DssError::bad_params("file name is empty"));
    }
    if !fits_field(name, FILE_NAME_LEN) {
        return Err(DssError::bad_params(format!(
            "file name longer than {} bytes",
            FILE_NAME_LEN - 1
        )));
    }
    Ok(())
}
