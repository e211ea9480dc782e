//! Subscription predicates over instance records
//!
//! TigerStyle: Composite interests are flattened iteratively (no recursion)
//! into a bounded set of atomic interests.

use crate::instance::InstanceInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum number of atomic interests a single composite may flatten into
pub const INTEREST_ATOMIC_COUNT_MAX: usize = 1024;

/// A predicate selecting instance records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Interest {
    /// Matches nothing
    None,
    /// Matches every instance
    All,
    /// Matches one instance by id
    Instance(String),
    /// Matches every instance of an application
    Application(String),
    /// Matches instances advertising a VIP address
    Vip(String),
    /// Matches instances advertising a secure VIP address
    SecureVip(String),
    /// Union of several interests
    Composite(Vec<Interest>),
}

impl Interest {
    /// Union of several interests
    pub fn composite(interests: impl IntoIterator<Item = Interest>) -> Self {
        Interest::Composite(interests.into_iter().collect())
    }

    /// Whether this interest is a single predicate
    pub fn is_atomic(&self) -> bool {
        !matches!(self, Interest::Composite(_))
    }

    /// Flatten into the set of atomic interests it covers
    ///
    /// `None` entries are dropped; the result for `None` is empty.
    pub fn flatten(&self) -> BTreeSet<Interest> {
        let mut atoms = BTreeSet::new();
        let mut stack: Vec<&Interest> = vec![self];

        while let Some(interest) = stack.pop() {
            match interest {
                Interest::Composite(children) => stack.extend(children.iter()),
                Interest::None => {}
                atom => {
                    if atoms.len() >= INTEREST_ATOMIC_COUNT_MAX {
                        tracing::warn!(
                            limit = INTEREST_ATOMIC_COUNT_MAX,
                            "interest flatten limit reached, dropping remainder"
                        );
                        break;
                    }
                    atoms.insert(atom.clone());
                }
            }
        }

        atoms
    }

    /// Check whether an instance satisfies this interest
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            Interest::None => false,
            Interest::All => true,
            Interest::Instance(id) => instance.id.as_str() == id,
            Interest::Application(app) => instance.app.eq_ignore_ascii_case(app),
            Interest::Vip(vip) => instance.vip_address.as_deref() == Some(vip.as_str()),
            Interest::SecureVip(vip) => {
                instance.secure_vip_address.as_deref() == Some(vip.as_str())
            }
            Interest::Composite(_) => self.flatten().iter().any(|atom| atom.matches(instance)),
        }
    }
}
