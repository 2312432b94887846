//! IP policy rule-set diff
//!
//! Rules correspond when both CIDR and action are equal. Actions are
//! immutable upstream, so an action change is a delete plus a create.
//! The diff yields one [`RuleBatch`] per CIDR in sorted order.

use std::collections::BTreeSet;

use crate::crd::IpPolicyRule as SpecRule;
use crate::platform::IpPolicyRule as RemoteRule;

/// Changes needed for one CIDR. Apply deletes, then creates, then updates.
#[derive(Debug, Default, PartialEq)]
pub struct RuleBatch<'a> {
    pub cidr: String,
    pub create: Vec<&'a SpecRule>,
    /// Remote rule paired with the spec rule whose description or metadata it takes
    pub update: Vec<(&'a RemoteRule, &'a SpecRule)>,
    pub delete: Vec<&'a RemoteRule>,
}

impl RuleBatch<'_> {
    pub fn needs_create(&self) -> bool {
        !self.create.is_empty()
    }

    pub fn needs_update(&self) -> bool {
        !self.update.is_empty()
    }

    pub fn needs_delete(&self) -> bool {
        !self.delete.is_empty()
    }

    fn is_noop(&self) -> bool {
        !(self.needs_create() || self.needs_update() || self.needs_delete())
    }
}

pub struct RuleDiff<'a> {
    remote: &'a [RemoteRule],
    spec: &'a [SpecRule],
    cidrs: std::vec::IntoIter<String>,
}

impl<'a> RuleDiff<'a> {
    pub fn new(remote: &'a [RemoteRule], spec: &'a [SpecRule]) -> Self {
        let cidrs: BTreeSet<String> = remote
            .iter()
            .map(|r| r.cidr.clone())
            .chain(spec.iter().map(|r| r.cidr.clone()))
            .collect();
        Self {
            remote,
            spec,
            cidrs: cidrs.into_iter().collect::<Vec<_>>().into_iter(),
        }
    }

    fn batch_for(&self, cidr: String) -> RuleBatch<'a> {
        let mut remaining: Vec<&'a RemoteRule> =
            self.remote.iter().filter(|r| r.cidr == cidr).collect();
        let mut batch = RuleBatch {
            cidr,
            ..Default::default()
        };

        let mut seen_actions = BTreeSet::new();
        for want in self.spec.iter().filter(|r| r.cidr == batch.cidr) {
            if !seen_actions.insert(want.action.as_str()) {
                continue;
            }
            match remaining.iter().position(|r| r.action == want.action) {
                Some(pos) => {
                    let have = remaining.remove(pos);
                    if have.description != want.description || have.metadata != want.metadata {
                        batch.update.push((have, want));
                    }
                }
                None => batch.create.push(want),
            }
        }
        batch.delete = remaining;
        batch
    }
}

impl<'a> Iterator for RuleDiff<'a> {
    type Item = RuleBatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cidr = self.cidrs.next()?;
            let batch = self.batch_for(cidr);
            if !batch.is_noop() {
                return Some(batch);
            }
        }
    }
}
