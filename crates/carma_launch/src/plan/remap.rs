//! Remapping tables with group-level defaults

use crate::config::{ResolutionContext, SubstitutionError, SubstitutionList};
use indexmap::IndexMap;

/// Rename of a logical channel
#[derive(Debug, Clone)]
pub struct RemapEntry {
    /// Logical name declared by the module
    pub from: String,
    /// Effective name, concatenated from its parts
    pub to: SubstitutionList,
}

impl RemapEntry {
    pub fn new(from: impl Into<String>, to: impl Into<SubstitutionList>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Resolved logical → effective name table
pub type ResolvedRemaps = IndexMap<String, String>;

/// Builds resolved remapping tables
pub struct RemapTable;

impl RemapTable {
    /// Resolve a single table.
    ///
    /// Entries keep their declaration order; a later entry for the same
    /// logical name replaces the earlier value in place.
    pub fn build(
        entries: &[RemapEntry],
        ctx: &dyn ResolutionContext,
    ) -> Result<ResolvedRemaps, SubstitutionError> {
        let mut table = ResolvedRemaps::new();
        Self::apply(&mut table, entries, ctx)?;
        Ok(table)
    }

    /// Resolve a module table under inherited group-level defaults.
    ///
    /// `inherited` is ordered outermost scope first, so inner groups override
    /// outer ones. Module-local entries are applied last and always win.
    pub fn build_scoped(
        local: &[RemapEntry],
        inherited: &[RemapEntry],
        ctx: &dyn ResolutionContext,
    ) -> Result<ResolvedRemaps, SubstitutionError> {
        let mut table = ResolvedRemaps::new();
        Self::apply(&mut table, inherited, ctx)?;
        Self::apply(&mut table, local, ctx)?;
        Ok(table)
    }

    fn apply(
        table: &mut ResolvedRemaps,
        entries: &[RemapEntry],
        ctx: &dyn ResolutionContext,
    ) -> Result<(), SubstitutionError> {
        for entry in entries {
            let target = entry.to.resolve(ctx)?;
            table.insert(entry.from.clone(), target);
        }
        Ok(())
    }
}
