#![forbid(unsafe_code)]

//! Reconciliation and normalization options.

/// Which identity-hint fields participate in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HintFields {
    pub ids: bool,
    pub keys: bool,
}

impl HintFields {
    /// Both `id` and `key` are honored.
    pub const ALL: Self = Self {
        ids: true,
        keys: true,
    };

    #[must_use]
    pub fn is_empty(self) -> bool {
        !self.ids && !self.keys
    }
}

/// Options for [`reconcile`](crate::reconcile).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PreserveOptions {
    /// Invalidate new-side objects that were replaced by a retained instance.
    pub destroy_obsolete: bool,
    /// Ignore `id` fields when matching container members.
    pub ignores_ids: bool,
    /// Ignore `key` fields when matching container members.
    pub ignores_keys: bool,
    /// Reuse the preserved identity when one new object is reachable from
    /// several parents (or from itself).
    pub preserve_circular: bool,
}

impl Default for PreserveOptions {
    fn default() -> Self {
        Self {
            destroy_obsolete: true,
            ignores_ids: false,
            ignores_keys: false,
            preserve_circular: false,
        }
    }
}

impl PreserveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn destroy_obsolete(mut self, on: bool) -> Self {
        self.destroy_obsolete = on;
        self
    }

    #[must_use]
    pub fn ignores_ids(mut self, on: bool) -> Self {
        self.ignores_ids = on;
        self
    }

    #[must_use]
    pub fn ignores_keys(mut self, on: bool) -> Self {
        self.ignores_keys = on;
        self
    }

    #[must_use]
    pub fn preserve_circular(mut self, on: bool) -> Self {
        self.preserve_circular = on;
        self
    }

    #[must_use]
    pub fn hints(&self) -> HintFields {
        HintFields {
            ids: !self.ignores_ids,
            keys: !self.ignores_keys,
        }
    }
}

/// Options for [`normalize_list`](crate::normalize_list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NormalizeOptions {
    /// Collapse duplicates even when their contents differ; the first
    /// occurrence wins.
    pub ignore_differences: bool,
    pub ignores_ids: bool,
    pub ignores_keys: bool,
}

impl NormalizeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ignore_differences(mut self, on: bool) -> Self {
        self.ignore_differences = on;
        self
    }

    #[must_use]
    pub fn ignores_ids(mut self, on: bool) -> Self {
        self.ignores_ids = on;
        self
    }

    #[must_use]
    pub fn ignores_keys(mut self, on: bool) -> Self {
        self.ignores_keys = on;
        self
    }

    #[must_use]
    pub fn hints(&self) -> HintFields {
        HintFields {
            ids: !self.ignores_ids,
            keys: !self.ignores_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_destroy_obsolete_and_honor_both_hints() {
        let options = PreserveOptions::default();
        assert!(options.destroy_obsolete);
        assert!(!options.preserve_circular);
        assert_eq!(options.hints(), HintFields::ALL);
    }

    #[test]
    fn ignoring_both_fields_disables_hints() {
        let options = PreserveOptions::new().ignores_ids(true).ignores_keys(true);
        assert!(options.hints().is_empty());
        let normalize = NormalizeOptions::new().ignores_keys(true);
        assert_eq!(
            normalize.hints(),
            HintFields {
                ids: true,
                keys: false
            }
        );
    }
}
