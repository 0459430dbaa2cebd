//! Organization hierarchy management

use std::collections::HashMap;
use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::{ConclaveError, Result};
use crate::types::UnitId;

/// Level of a unit in the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Router,
    Company,
    Division,
    Team,
    Operations,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitKind::Router => "router",
            UnitKind::Company => "company",
            UnitKind::Division => "division",
            UnitKind::Team => "team",
            UnitKind::Operations => "operations",
        };
        f.write_str(s)
    }
}

/// Unit lifecycle; `Archived` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Active,
    Paused,
    Archived,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Active => "active",
            UnitStatus::Paused => "paused",
            UnitStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Node in the organization tree
#[derive(Debug, Clone)]
struct OrgNode {
    kind: UnitKind,
    name: String,
    status: UnitStatus,
    parent: Option<UnitId>,
    children: Vec<UnitId>,
}

/// Snapshot of a subtree, used for status reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgTree {
    pub unit_id: UnitId,
    pub kind: UnitKind,
    pub name: String,
    pub status: UnitStatus,
    pub children: Vec<OrgTree>,
}

impl OrgTree {
    /// Indented text rendering, one unit per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(
            out,
            "{}{} ({}) [{}]",
            "  ".repeat(depth),
            self.name,
            self.kind,
            self.status
        );
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// Ownership tree of units. A unit is added once under one owner and is
/// never moved or removed; retirement is `Archived` status.
#[derive(Debug, Default)]
pub struct OrgHierarchy {
    nodes: HashMap<UnitId, OrgNode>,
    root: Option<UnitId>,
}

impl OrgHierarchy {
    /// Create a new empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit under `parent`; `None` makes it the root
    pub fn add_unit(
        &mut self,
        unit_id: UnitId,
        kind: UnitKind,
        name: impl Into<String>,
        parent: Option<UnitId>,
    ) -> Result<()> {
        if self.nodes.contains_key(&unit_id) {
            return Err(ConclaveError::AlreadyOwned(unit_id));
        }
        match parent {
            Some(pid) => {
                let parent = self.nodes.get_mut(&pid).ok_or(ConclaveError::UnitNotFound(pid))?;
                parent.children.push(unit_id);
            }
            None if self.root.is_some() => {
                return Err(ConclaveError::AlreadyOwned(unit_id));
            }
            None => self.root = Some(unit_id),
        }

        self.nodes.insert(
            unit_id,
            OrgNode {
                kind,
                name: name.into(),
                status: UnitStatus::Active,
                parent,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn set_status(&mut self, unit_id: &UnitId, status: UnitStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(unit_id)
            .ok_or(ConclaveError::UnitNotFound(*unit_id))?;
        if node.status == UnitStatus::Archived && status != UnitStatus::Archived {
            return Err(ConclaveError::UnitArchived(*unit_id));
        }
        node.status = status;
        Ok(())
    }

    pub fn status(&self, unit_id: &UnitId) -> Option<UnitStatus> {
        self.nodes.get(unit_id).map(|n| n.status)
    }

    pub fn kind(&self, unit_id: &UnitId) -> Option<UnitKind> {
        self.nodes.get(unit_id).map(|n| n.kind)
    }

    /// Get the root unit ID
    pub fn root(&self) -> Option<UnitId> {
        self.root
    }

    /// Get the owner of a unit
    pub fn parent(&self, unit_id: &UnitId) -> Option<UnitId> {
        self.nodes.get(unit_id).and_then(|n| n.parent)
    }

    /// Get units owned by a unit
    pub fn children(&self, unit_id: &UnitId) -> Vec<UnitId> {
        self.nodes.get(unit_id).map(|n| n.children.clone()).unwrap_or_default()
    }

    /// Get depth of a unit in the tree
    pub fn depth(&self, unit_id: &UnitId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(unit_id);
        while let Some(id) = current {
            depth += 1;
            current = self.parent(&id);
        }
        depth
    }

    pub fn contains(&self, unit_id: &UnitId) -> bool {
        self.nodes.contains_key(unit_id)
    }

    /// Snapshot of the whole tree, `None` when empty
    pub fn to_tree(&self) -> Option<OrgTree> {
        self.root.and_then(|id| self.subtree(&id))
    }

    pub fn subtree(&self, unit_id: &UnitId) -> Option<OrgTree> {
        let node = self.nodes.get(unit_id)?;
        Some(OrgTree {
            unit_id: *unit_id,
            kind: node.kind,
            name: node.name.clone(),
            status: node.status,
            children: node.children.iter().filter_map(|c| self.subtree(c)).collect(),
        })
    }

    /// Get total unit count
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if hierarchy is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
