//! Facets and the selector routing table they compose into.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{error::ConflictError, selector::Selector};

/// A named set of selectors served by one contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub name: String,
    pub address: Address,
    pub selectors: Vec<Selector>,
    /// Core facets are never changed by automatic reconciliation.
    #[serde(default)]
    pub core: bool,
}

impl Facet {
    pub fn new(name: impl Into<String>, address: Address, selectors: Vec<Selector>) -> Self {
        Self {
            name: name.into(),
            address,
            selectors,
            core: false,
        }
    }

    /// Mark this facet as core.
    pub fn core(mut self) -> Self {
        self.core = true;
        self
    }
}

/// Mapping of every routed selector to exactly one facet address.
///
/// The address → name table is metadata used for reporting and for
/// recognising core facets; equality only considers the routes.
#[derive(Debug, Clone, Default)]
pub struct Composition {
    routes: BTreeMap<Selector, Address>,
    names: BTreeMap<Address, String>,
}

impl PartialEq for Composition {
    fn eq(&self, other: &Self) -> bool {
        self.routes == other.routes
    }
}

impl Eq for Composition {}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a composition from facets, rejecting any selector offered twice.
    ///
    /// A conflict names the two facets in lexical order.
    pub fn from_facets<'a>(facets: impl IntoIterator<Item = &'a Facet>) -> Result<Self, ConflictError> {
        let mut composition = Self::new();
        for facet in facets {
            composition.insert_facet(facet)?;
        }
        Ok(composition)
    }

    /// Build a composition from raw routes and a name table.
    pub fn from_routes(
        routes: BTreeMap<Selector, Address>,
        names: BTreeMap<Address, String>,
    ) -> Self {
        Self { routes, names }
    }

    /// Add every selector of `facet`.
    pub fn insert_facet(&mut self, facet: &Facet) -> Result<(), ConflictError> {
        for selector in &facet.selectors {
            if let Some(owner) = self.routes.get(selector) {
                let owner_name = self.name_of(*owner).unwrap_or_default().to_string();
                if *owner == facet.address && owner_name == facet.name {
                    continue;
                }
                let (first, second) = if owner_name <= facet.name {
                    (owner_name, facet.name.clone())
                } else {
                    (facet.name.clone(), owner_name)
                };
                return Err(ConflictError {
                    selector: *selector,
                    first,
                    second,
                });
            }
        }
        for selector in &facet.selectors {
            self.routes.insert(*selector, facet.address);
        }
        self.names.insert(facet.address, facet.name.clone());
        Ok(())
    }

    /// Point `selector` at `address`, replacing any previous route.
    pub fn route(&mut self, selector: Selector, address: Address) {
        self.routes.insert(selector, address);
    }

    /// Drop the route for `selector`.
    pub fn unroute(&mut self, selector: &Selector) -> Option<Address> {
        self.routes.remove(selector)
    }

    pub fn get(&self, selector: &Selector) -> Option<Address> {
        self.routes.get(selector).copied()
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.routes.contains_key(selector)
    }

    pub fn routes(&self) -> &BTreeMap<Selector, Address> {
        &self.routes
    }

    pub fn names(&self) -> &BTreeMap<Address, String> {
        &self.names
    }

    pub fn name_of(&self, address: Address) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    /// Attach a facet name to an address.
    pub fn set_name(&mut self, address: Address, name: impl Into<String>) {
        self.names.insert(address, name.into());
    }

    /// Fill in names for addresses this composition does not know yet.
    pub fn adopt_names(&mut self, names: &BTreeMap<Address, String>) {
        for (address, name) in names {
            self.names.entry(*address).or_insert_with(|| name.clone());
        }
    }

    /// Routes grouped by facet address, selectors ascending.
    pub fn by_facet(&self) -> BTreeMap<Address, Vec<Selector>> {
        let mut grouped: BTreeMap<Address, Vec<Selector>> = BTreeMap::new();
        for (selector, address) in &self.routes {
            grouped.entry(*address).or_default().push(*selector);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
