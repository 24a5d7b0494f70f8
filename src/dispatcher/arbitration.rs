//! Greedy ranked arbitration of exclusion groups.
//!
//! Candidates are ranked by (priority, depth, registration order), all
//! ascending. Walking the ranking, a candidate gets all of its groups if every
//! one of them is still free and is rejected entirely otherwise. Incumbents
//! compete on the same terms as newly ready modules.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub priority: i32,
    pub depth: i32,
    pub sequence: u64,
    pub groups: BTreeSet<String>,
    /// Held its groups last frame
    pub incumbent: bool,
}

impl Candidate {
    fn rank(&self) -> (i32, i32, u64) {
        (self.priority, self.depth, self.sequence)
    }
}

/// Group to owning module, rebuilt every frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClaimTable {
    owners: BTreeMap<String, String>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free(&self, group: &str) -> bool {
        !self.owners.contains_key(group)
    }

    pub fn owner(&self, group: &str) -> Option<&str> {
        self.owners.get(group).map(String::as_str)
    }

    /// Claims every group for `module`, or none of them
    pub fn try_claim_all(&mut self, module: &str, groups: &BTreeSet<String>) -> bool {
        if !groups.iter().all(|group| self.is_free(group)) {
            return false;
        }
        for group in groups {
            self.owners.insert(group.clone(), module.to_string());
        }
        true
    }

    /// Frees every group owned by `module`
    pub fn release(&mut self, module: &str) {
        self.owners.retain(|_, owner| owner != module);
    }

    pub fn groups_of(&self, module: &str) -> BTreeSet<String> {
        self.owners
            .iter()
            .filter(|(_, owner)| owner.as_str() == module)
            .map(|(group, _)| group.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.owners.iter().map(|(g, m)| (g.as_str(), m.as_str()))
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arbitration {
    /// Granted candidates in rank order
    pub winners: Vec<Candidate>,
    pub rejected: Vec<Candidate>,
    pub claims: ClaimTable,
}

impl Arbitration {
    /// Incumbents that lost their groups and must be stopped
    pub fn preempted(&self) -> impl Iterator<Item = &Candidate> {
        self.rejected.iter().filter(|candidate| candidate.incumbent)
    }
}

pub fn arbitrate(mut candidates: Vec<Candidate>) -> Arbitration {
    candidates.sort_by_key(Candidate::rank);

    let mut result = Arbitration::default();
    for candidate in candidates {
        if result.claims.try_claim_all(&candidate.name, &candidate.groups) {
            result.winners.push(candidate);
        } else {
            result.rejected.push(candidate);
        }
    }
    result
}
