use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::Account;

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("an account cannot refer itself")]
    SelfReference,
    #[error("referee already has a referrer")]
    AlreadyReferred,
    #[error("cannot refer your referrer")]
    CircularReferral,
}

/// One committed `referrer -> referee` relationship.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralEdge {
    pub referrer: Account,
    pub referee: Account,
    /// Global creation index, starting at zero.
    pub sequence: u64,
}

/// Append-only referral forest.
///
/// Every account has at most one referrer, nobody refers themselves and no
/// chain of referrals loops back on itself. All checks and the commit of a new
/// edge happen inside a single `&mut self` call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<ReferralEdge>", into = "Vec<ReferralEdge>")]
pub struct ReferralGraph {
    parent_of: BTreeMap<Account, Account>,
    children_of: BTreeMap<Account, Vec<Account>>,
    edges: Vec<ReferralEdge>,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_parent(&self, account: &Account) -> bool {
        self.parent_of.contains_key(account)
    }

    pub fn parent_of(&self, account: &Account) -> Option<Account> {
        self.parent_of.get(account).copied()
    }

    /// Walks referrers upwards from `account`, nearest first. The walk is
    /// capped at the number of accounts in the graph.
    pub fn ancestor_chain(&self, account: &Account) -> AncestorChain<'_> {
        AncestorChain {
            graph: self,
            cursor: *account,
            remaining: self.account_count(),
        }
    }

    pub fn is_ancestor(&self, ancestor: &Account, of: &Account) -> bool {
        self.ancestor_chain(of).any(|a| a == *ancestor)
    }

    pub fn would_create_cycle(&self, referrer: &Account, referee: &Account) -> bool {
        referrer == referee
            || self.is_ancestor(referee, referrer)
            || self.is_ancestor(referrer, referee)
    }

    /// Runs every structural check for `referrer -> referee` without committing.
    pub fn check_link(&self, referrer: &Account, referee: &Account) -> Result<(), GraphError> {
        if referrer == referee {
            return Err(GraphError::SelfReference);
        }
        if self.has_parent(referee) {
            return Err(GraphError::AlreadyReferred);
        }
        if self.would_create_cycle(referrer, referee) {
            return Err(GraphError::CircularReferral);
        }
        Ok(())
    }

    pub fn try_link(
        &mut self,
        referrer: Account,
        referee: Account,
    ) -> Result<ReferralEdge, GraphError> {
        self.check_link(&referrer, &referee)?;
        let edge = ReferralEdge {
            referrer,
            referee,
            sequence: self.edges.len() as u64,
        };
        self.parent_of.insert(referee, referrer);
        self.children_of.entry(referrer).or_default().push(referee);
        self.edges.push(edge);
        Ok(edge)
    }

    /// Undoes `edge`, which must be the most recent commit. Returns `false`
    /// without touching anything otherwise.
    pub(crate) fn revert_link(&mut self, edge: &ReferralEdge) -> bool {
        if self.edges.last() != Some(edge) {
            return false;
        }
        self.edges.pop();
        self.parent_of.remove(&edge.referee);
        if let Some(children) = self.children_of.get_mut(&edge.referrer) {
            children.pop();
            if children.is_empty() {
                self.children_of.remove(&edge.referrer);
            }
        }
        true
    }

    pub fn referrals_of(&self, referrer: &Account) -> &[Account] {
        self.children_of
            .get(referrer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn edges(&self) -> &[ReferralEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Distinct accounts touching at least one edge.
    pub fn account_count(&self) -> usize {
        let roots = self
            .children_of
            .keys()
            .filter(|r| !self.parent_of.contains_key(*r))
            .count();
        self.parent_of.len() + roots
    }
}

impl TryFrom<Vec<ReferralEdge>> for ReferralGraph {
    type Error = GraphError;

    fn try_from(edges: Vec<ReferralEdge>) -> Result<Self, Self::Error> {
        let mut graph = ReferralGraph::new();
        for edge in edges {
            graph.try_link(edge.referrer, edge.referee)?;
        }
        Ok(graph)
    }
}

impl From<ReferralGraph> for Vec<ReferralEdge> {
    fn from(graph: ReferralGraph) -> Self {
        graph.edges
    }
}

/// Lazy walk over `parent_of`. Cheap to recreate; holds no state beyond a cursor.
#[derive(Clone)]
pub struct AncestorChain<'a> {
    graph: &'a ReferralGraph,
    cursor: Account,
    remaining: usize,
}

impl Iterator for AncestorChain<'_> {
    type Item = Account;

    fn next(&mut self) -> Option<Account> {
        if self.remaining == 0 {
            return None;
        }
        let parent = self.graph.parent_of(&self.cursor)?;
        self.remaining -= 1;
        self.cursor = parent;
        Some(parent)
    }
}
