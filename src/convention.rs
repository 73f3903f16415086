//! Naming conventions for the fields this layer writes itself.
//!
//! Serde attributes on each entity govern how the application's own fields
//! are spelled on the wire. The fields this layer generates — the
//! modified-on touch, the soft-delete triple, the system-generated guard —
//! need the same spelling, so the factory carries a small set of named
//! convention packs and seals it the first time a context is built.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// A field-spelling rule applied to this layer's generated field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldNaming {
    /// `modified_on` → `modifiedOn`.
    #[default]
    CamelCase,
    /// `modified_on` stays `modified_on`.
    SnakeCase,
    /// `modified_on` → `ModifiedOn`.
    PascalCase,
}

impl FieldNaming {
    /// Spell a snake_case logical field name under this convention.
    pub fn rename(&self, field: &str) -> String {
        match self {
            Self::SnakeCase => field.to_owned(),
            Self::CamelCase => {
                let mut out = String::with_capacity(field.len());
                for (i, part) in field.split('_').enumerate() {
                    if i == 0 {
                        out.push_str(part);
                    } else {
                        out.push_str(&capitalize(part));
                    }
                }
                out
            }
            Self::PascalCase => field.split('_').map(capitalize).collect(),
        }
    }
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolved spellings for the generated fields, one per metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    /// Last-write timestamp field.
    pub modified_on: String,
    /// Soft-delete flag field.
    pub deleted: String,
    /// Soft-delete actor field.
    pub deleted_by: String,
    /// Soft-delete timestamp field.
    pub deleted_on: String,
    /// System-generated guard field.
    pub system_generated: String,
}

impl FieldMap {
    /// Resolve all generated field names under one convention.
    pub fn resolve(naming: FieldNaming) -> Self {
        Self {
            modified_on: naming.rename("modified_on"),
            deleted: naming.rename("deleted"),
            deleted_by: naming.rename("deleted_by"),
            deleted_on: naming.rename("deleted_on"),
            system_generated: naming.rename("system_generated"),
        }
    }
}

/// The factory's named convention packs, sealed at first context build.
#[derive(Debug)]
pub struct ConventionSet {
    packs: RwLock<Vec<(String, FieldNaming)>>,
    sealed: AtomicBool,
}

impl Default for ConventionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConventionSet {
    /// Create the default set: one camel-case pack.
    pub fn new() -> Self {
        Self {
            packs: RwLock::new(vec![("camelCase".to_owned(), FieldNaming::CamelCase)]),
            sealed: AtomicBool::new(false),
        }
    }

    /// Add a named pack. The most recently added pack is the effective one.
    pub fn add(&self, name: impl Into<String>, naming: FieldNaming) -> Result<()> {
        self.ensure_open()?;
        let name = name.into();
        let mut packs = self.packs.write();
        packs.retain(|(n, _)| *n != name);
        packs.push((name, naming));
        Ok(())
    }

    /// Remove a named pack.
    pub fn remove(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.packs.write().retain(|(n, _)| n != name);
        Ok(())
    }

    /// Names of all registered packs, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.packs.read().iter().map(|(n, _)| n.clone()).collect()
    }

    /// The convention queries will use: the most recently added pack,
    /// falling back to snake_case spelling when the set is empty.
    pub fn effective(&self) -> FieldNaming {
        self.packs
            .read()
            .last()
            .map(|(_, naming)| *naming)
            .unwrap_or(FieldNaming::SnakeCase)
    }

    /// Close the set. Called by the factory when the first context is
    /// built; idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Check whether the set has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::invalid_operation(
                "All conventions are already registered. Add or remove convention packs \
                 before building any context from the factory.",
            ));
        }
        Ok(())
    }
}
