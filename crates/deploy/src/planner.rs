//! Cut planner: diffs a desired composition against a deployed one.
//!
//! The planner is a pure function of its inputs. It never touches the record
//! or the chain, and its output only depends on the two routing tables and the
//! set of core facet names, so the order in which facets were discovered has
//! no influence on the plan.

use std::collections::{BTreeMap, BTreeSet};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    composition::Composition,
    error::{CoreFacetDrift, Error, Result},
    selector::Selector,
};

/// Name used in reports for addresses no facet table knows about.
pub const UNKNOWN_FACET: &str = "<unknown>";

/// A diamond cut action, with the discriminants used by `IDiamondCut.FacetCutAction`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CutAction {
    Add = 0,
    Replace = 1,
    Remove = 2,
}

impl CutAction {
    /// Position of the action in a plan: removals first, additions last.
    fn rank(self) -> u8 {
        match self {
            Self::Remove => 0,
            Self::Replace => 1,
            Self::Add => 2,
        }
    }
}

/// One group of a cut: an action applied to selectors of a single facet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutOperation {
    pub action: CutAction,
    /// New owner for ADD and REPLACE; the previous owner for REMOVE.
    pub facet: Address,
    pub facet_name: String,
    pub selectors: Vec<Selector>,
}

impl CutOperation {
    /// The facet address as encoded in the on-chain cut (zero for REMOVE).
    pub fn cut_address(&self) -> Address {
        match self.action {
            CutAction::Remove => Address::ZERO,
            CutAction::Add | CutAction::Replace => self.facet,
        }
    }
}

/// The outcome of planning: ordered operations plus core facet drift.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<CutOperation>,
    /// Changes to core facets that were held back.
    pub core_drift: Vec<CoreFacetDrift>,
}

impl Plan {
    /// Whether the plan contains no operation. Drift alone does not count.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn has_removals(&self) -> bool {
        self.removal_count() > 0
    }

    /// Number of selectors the plan removes.
    pub fn removal_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.action == CutAction::Remove)
            .map(|op| op.selectors.len())
            .sum()
    }

    /// Facet addresses that must hold code before the cut is submitted.
    pub fn required_facets(&self) -> BTreeSet<Address> {
        self.operations
            .iter()
            .filter(|op| op.action != CutAction::Remove)
            .map(|op| op.facet)
            .collect()
    }

    /// Pre-flight gate: refuse drift and unconfirmed removals.
    pub fn check(&self, allow_removals: bool) -> Result<()> {
        if !self.core_drift.is_empty() {
            return Err(Error::CoreFacetDrift(self.core_drift.clone()));
        }
        if self.has_removals() && !allow_removals {
            return Err(Error::RemovalNotConfirmed {
                count: self.removal_count(),
            });
        }
        Ok(())
    }

    /// The composition obtained by applying this plan to `deployed`.
    pub fn apply(&self, deployed: &Composition) -> Composition {
        let mut next = deployed.clone();
        for op in &self.operations {
            match op.action {
                CutAction::Add | CutAction::Replace => {
                    for selector in &op.selectors {
                        next.route(*selector, op.facet);
                    }
                    next.set_name(op.facet, op.facet_name.clone());
                }
                CutAction::Remove => {
                    for selector in &op.selectors {
                        next.unroute(selector);
                    }
                }
            }
        }
        next
    }
}

/// Reconciles compositions under a given core facet protection set.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    core_facets: BTreeSet<String>,
    confirm_core_changes: bool,
}

impl Planner {
    /// Create a planner protecting the named core facets.
    pub fn new<I, S>(core_facets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            core_facets: core_facets.into_iter().map(Into::into).collect(),
            confirm_core_changes: false,
        }
    }

    /// Plan removals and replacements of core facet selectors instead of
    /// reporting them as drift.
    pub fn confirm_core_changes(mut self, confirm: bool) -> Self {
        self.confirm_core_changes = confirm;
        self
    }

    fn is_protected(&self, deployed: &Composition, owner: Address) -> bool {
        !self.confirm_core_changes
            && deployed
                .name_of(owner)
                .is_some_and(|name| self.core_facets.contains(name))
    }

    /// Compute the ordered cut converging `deployed` to `desired`.
    pub fn plan(&self, desired: &Composition, deployed: &Composition) -> Plan {
        let mut groups: BTreeMap<(u8, Address), (CutAction, Vec<Selector>)> = BTreeMap::new();
        let mut core_drift = Vec::new();
        let mut push = |action: CutAction, facet: Address, selector: Selector| {
            groups
                .entry((action.rank(), facet))
                .or_insert_with(|| (action, Vec::new()))
                .1
                .push(selector);
        };

        for (selector, &target) in desired.routes() {
            match deployed.get(selector) {
                None => push(CutAction::Add, target, *selector),
                Some(current) if current == target => {}
                Some(current) if self.is_protected(deployed, current) => {
                    core_drift.push(CoreFacetDrift {
                        facet: facet_name(deployed, current),
                        selector: *selector,
                        desired: Some(target),
                    })
                }
                Some(_) => push(CutAction::Replace, target, *selector),
            }
        }

        for (selector, &current) in deployed.routes() {
            if desired.contains(selector) {
                continue;
            }
            if self.is_protected(deployed, current) {
                core_drift.push(CoreFacetDrift {
                    facet: facet_name(deployed, current),
                    selector: *selector,
                    desired: None,
                });
            } else {
                push(CutAction::Remove, current, *selector);
            }
        }

        let operations = groups
            .into_iter()
            .map(|((_, facet), (action, selectors))| {
                let source = match action {
                    CutAction::Remove => deployed,
                    CutAction::Add | CutAction::Replace => desired,
                };
                CutOperation {
                    action,
                    facet,
                    facet_name: facet_name(source, facet),
                    selectors,
                }
            })
            .collect();

        core_drift.sort_by(|a, b| a.selector.cmp(&b.selector));

        Plan {
            operations,
            core_drift,
        }
    }
}

fn facet_name(composition: &Composition, address: Address) -> String {
    composition
        .name_of(address)
        .unwrap_or(UNKNOWN_FACET)
        .to_string()
}

/// Plan `desired` against `deployed`, protecting the named core facets.
pub fn plan<I, S>(desired: &Composition, deployed: &Composition, core_facets: I) -> Plan
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Planner::new(core_facets).plan(desired, deployed)
}
