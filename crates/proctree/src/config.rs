use serde::{Deserialize, Serialize};

use crate::Pid;

/// Filtering options of a [`ProcTree`](crate::ProcTree) session.
///
/// A `Config` is an immutable value: it is built from a list of
/// [`ConfigOption`]s and derived configurations are produced with
/// [`Config::refine`], leaving the original untouched. A session takes its own
/// copy at construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    /// Include kernel threads (pid 2 and its children). Excluded by default.
    include_kernel_threads: bool,
    /// Include the ancestors of the configured roots. No effect without roots.
    include_root_ancestors: bool,
    /// Roots of the included tree. When empty, every orphaned process is a root.
    root_pids: Vec<Pid>,
}

/// A named adjustment applied to a [`Config`] while it is being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOption {
    /// Replace every value with those of another configuration. Usually the
    /// first option of a list, since it overrides anything applied before it.
    Config(Config),
    IncludeKernelThreads(bool),
    IncludeRootAncestors(bool),
    /// Append a pid to the configured roots.
    RootPid(Pid),
    /// Remove every configured root, restoring the "all orphans are roots" default.
    ClearRootPids,
}

impl ConfigOption {
    fn apply(self, cfg: &mut Config) {
        match self {
            ConfigOption::Config(other) => *cfg = other,
            ConfigOption::IncludeKernelThreads(include) => cfg.include_kernel_threads = include,
            ConfigOption::IncludeRootAncestors(include) => cfg.include_root_ancestors = include,
            ConfigOption::RootPid(pid) => cfg.root_pids.push(pid),
            ConfigOption::ClearRootPids => cfg.root_pids.clear(),
        }
    }
}

impl Config {
    /// Build a configuration by applying `options` in order to the defaults.
    pub fn new(options: impl IntoIterator<Item = ConfigOption>) -> Self {
        let mut cfg = Config::default();
        for option in options {
            option.apply(&mut cfg);
        }
        cfg
    }

    /// Build a new configuration seeded with this one, then apply `options`.
    pub fn refine(&self, options: impl IntoIterator<Item = ConfigOption>) -> Self {
        Config::new(std::iter::once(ConfigOption::Config(self.clone())).chain(options))
    }

    pub fn include_kernel_threads(&self) -> bool {
        self.include_kernel_threads
    }

    pub fn include_root_ancestors(&self) -> bool {
        self.include_root_ancestors
    }

    pub fn root_pids(&self) -> &[Pid] {
        &self.root_pids
    }

    /// Whether the included view is restricted to configured roots.
    pub fn has_fixed_roots(&self) -> bool {
        !self.root_pids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::new([]);
        assert!(!cfg.include_kernel_threads());
        assert!(!cfg.include_root_ancestors());
        assert!(cfg.root_pids().is_empty());
        assert!(!cfg.has_fixed_roots());
    }

    #[test]
    fn test_options_apply_in_order() {
        let cfg = Config::new([
            ConfigOption::IncludeKernelThreads(true),
            ConfigOption::RootPid(10),
            ConfigOption::IncludeKernelThreads(false),
            ConfigOption::RootPid(5),
            ConfigOption::IncludeRootAncestors(true),
        ]);
        assert!(!cfg.include_kernel_threads());
        assert!(cfg.include_root_ancestors());
        assert_eq!(cfg.root_pids(), &[10, 5]);
    }

    #[test]
    fn test_clear_root_pids() {
        let cfg = Config::new([
            ConfigOption::RootPid(1),
            ConfigOption::ClearRootPids,
            ConfigOption::RootPid(7),
        ]);
        assert_eq!(cfg.root_pids(), &[7]);
    }

    #[test]
    fn test_refine_leaves_original_untouched() {
        let base = Config::new([ConfigOption::RootPid(1)]);
        let refined = base.refine([
            ConfigOption::RootPid(2),
            ConfigOption::IncludeKernelThreads(true),
        ]);

        assert_eq!(base.root_pids(), &[1]);
        assert!(!base.include_kernel_threads());
        assert_eq!(refined.root_pids(), &[1, 2]);
        assert!(refined.include_kernel_threads());
    }

    #[test]
    fn test_config_option_replaces_previous_values() {
        let other = Config::new([ConfigOption::IncludeRootAncestors(true)]);
        let cfg = Config::new([ConfigOption::RootPid(3), ConfigOption::Config(other.clone())]);
        assert_eq!(cfg, other);
    }

    #[test]
    fn test_deserialize_kebab_case_with_defaults() {
        let cfg: Config = serde_yaml::from_str("root-pids: [1, 42]\ninclude-root-ancestors: true\n")
            .unwrap();
        assert_eq!(cfg.root_pids(), &[1, 42]);
        assert!(cfg.include_root_ancestors());
        assert!(!cfg.include_kernel_threads());
    }
}
