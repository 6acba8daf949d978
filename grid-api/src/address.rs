//! # Actor Address Module
//!
//! ## Key Concepts
//! - Address: globally unique, immutable identity of one actor
//! - AddressFactory: the only place addresses are minted
//!
//! ## Design Principles
//! - The `id` string is the consistent-hashing key and never changes
//! - Non-distributable addresses are pinned to the node that created them
//! - Equality and hashing consider the id only

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// # Address
///
/// ## Overview
/// Identifies one addressable actor anywhere in the cluster.
///
/// ## Examples
/// ```rust
/// use grid_api::address::AddressFactory;
///
/// let factory = AddressFactory::new();
/// let account = factory.unique_named("account-42");
/// assert!(account.is_distributable());
///
/// let pinned = factory.local("console");
/// assert!(!pinned.is_distributable());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    id: String,
    name: Option<String>,
    distributable: bool,
}

impl Address {
    /// The hashing key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_distributable(&self) -> bool {
        self.distributable
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Mints addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressFactory;

impl AddressFactory {
    pub fn new() -> Self {
        Self
    }

    /// A fresh distributable address with a random id.
    pub fn unique(&self) -> Address {
        Address {
            id: Uuid::new_v4().to_string(),
            name: None,
            distributable: true,
        }
    }

    /// A fresh distributable address with a random id and a readable name.
    pub fn unique_named(&self, name: impl Into<String>) -> Address {
        Address {
            id: Uuid::new_v4().to_string(),
            name: Some(name.into()),
            distributable: true,
        }
    }

    /// A distributable address with a caller-chosen id.
    ///
    /// Every node computing the same id computes the same owner, so this is
    /// how well-known actors are located without a directory lookup.
    pub fn with_id(&self, id: impl Into<String>, name: Option<String>) -> Address {
        Address {
            id: id.into(),
            name,
            distributable: true,
        }
    }

    /// A non-distributable address. Always executed on the creating node.
    pub fn local(&self, name: impl Into<String>) -> Address {
        Address {
            id: Uuid::new_v4().to_string(),
            name: Some(name.into()),
            distributable: false,
        }
    }
}
