//! The routing tree.
//!
//! A [`Route`] is an immutable tree compiled from [`RouteConfig`] at load
//! time. Each node resolves its receiver, grouping, and interval settings by
//! inheriting anything the config left unset from its parent; the root falls
//! back to built-in defaults. All validation happens during [`Route::build`]
//! — route lookup itself cannot fail.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use tocsin_core::{LabelSet, Matcher, matches_all};

use crate::config::RouteConfig;
use crate::error::{DispatchError, Result};

const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 3600);

/// Which labels define an alert group under a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by the full label set: every distinct alert is its own group.
    All,
    /// Group by nothing: one group holds every alert under the route.
    None,
    /// Group by the named labels.
    Labels(BTreeSet<String>),
}

impl GroupBy {
    /// Parses the configuration form: `["..."]` for all, an empty list for
    /// none, otherwise the listed label names.
    fn from_config(names: &[String]) -> std::result::Result<Self, String> {
        if names.iter().any(|n| n == "...") {
            if names.len() != 1 {
                return Err("\"...\" cannot be combined with label names".to_string());
            }
            return Ok(Self::All);
        }
        if names.is_empty() {
            return Ok(Self::None);
        }
        if names.iter().any(String::is_empty) {
            return Err("group_by label names cannot be empty".to_string());
        }
        Ok(Self::Labels(names.iter().cloned().collect()))
    }

    /// Projects an alert's labels onto the grouping labels.
    #[must_use]
    pub fn project(&self, labels: &LabelSet) -> LabelSet {
        match self {
            Self::All => labels.clone(),
            Self::None => LabelSet::new(),
            Self::Labels(names) => labels.project(names.iter().map(String::as_str)),
        }
    }
}

/// One node of the compiled routing tree.
#[derive(Debug, Clone)]
pub struct Route {
    /// Stable node id: slash-joined child indexes, `"0"` for the root.
    pub id: String,
    /// Matchers an alert must satisfy to enter this node. Empty for the
    /// root, which matches everything.
    pub matchers: Vec<Matcher>,
    /// The receiver notified for groups settled at this node.
    pub receiver: String,
    /// Which labels define a group here.
    pub group_by: GroupBy,
    /// How long a fresh group waits for more alerts before its first run.
    pub group_wait: Duration,
    /// How often a non-empty group re-runs its pipeline.
    pub group_interval: Duration,
    /// Minimum time before unchanged content is re-delivered.
    pub repeat_interval: Duration,
    /// Whether a match here still lets siblings and the parent contribute.
    pub continue_matching: bool,
    /// Child routes, tried in order.
    pub children: Vec<Route>,
}

/// Settings a child inherits when its config leaves them unset.
struct Inherited {
    receiver: String,
    group_by: GroupBy,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
}

impl Route {
    /// Compiles a routing tree, validating every node.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRoute`] for a rootless receiver, bad
    /// grouping, or non-positive intervals, and
    /// [`DispatchError::UnknownReceiver`] when a node references a receiver
    /// that is not configured.
    pub fn build(config: &RouteConfig, receivers: &HashSet<String>) -> Result<Self> {
        let receiver = config
            .receiver
            .clone()
            .ok_or_else(|| DispatchError::InvalidRoute {
                route: "0".to_string(),
                reason: "the root route must name a receiver".to_string(),
            })?;

        let defaults = Inherited {
            receiver,
            group_by: GroupBy::All,
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
        };
        Self::build_node(config, "0".to_string(), &defaults, receivers)
    }

    fn build_node(
        config: &RouteConfig,
        id: String,
        inherited: &Inherited,
        receivers: &HashSet<String>,
    ) -> Result<Self> {
        let receiver = config
            .receiver
            .clone()
            .unwrap_or_else(|| inherited.receiver.clone());
        if !receivers.contains(&receiver) {
            return Err(DispatchError::UnknownReceiver { name: receiver });
        }

        let group_by = match &config.group_by {
            Option::None => inherited.group_by.clone(),
            Some(names) => {
                GroupBy::from_config(names).map_err(|reason| DispatchError::InvalidRoute {
                    route: id.clone(),
                    reason,
                })?
            }
        };

        let group_wait = config
            .group_wait_secs
            .map_or(inherited.group_wait, Duration::from_secs);
        let group_interval = config
            .group_interval_secs
            .map_or(inherited.group_interval, Duration::from_secs);
        let repeat_interval = config
            .repeat_interval_secs
            .map_or(inherited.repeat_interval, Duration::from_secs);

        for (field, value) in [
            ("group_interval", group_interval),
            ("repeat_interval", repeat_interval),
        ] {
            if value.is_zero() {
                return Err(DispatchError::InvalidRoute {
                    route: id,
                    reason: format!("{field} must be positive"),
                });
            }
        }

        let next = Inherited {
            receiver: receiver.clone(),
            group_by: group_by.clone(),
            group_wait,
            group_interval,
            repeat_interval,
        };
        let children = config
            .routes
            .iter()
            .enumerate()
            .map(|(i, child)| Self::build_node(child, format!("{id}/{i}"), &next, receivers))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            matchers: config.matchers.clone(),
            receiver,
            group_by,
            group_wait,
            group_interval,
            repeat_interval,
            continue_matching: config.continue_matching,
            children,
        })
    }

    /// Returns the routes that should handle an alert with these labels,
    /// most specific first.
    ///
    /// Children are tried in order. The first matching child without the
    /// continue flag terminates the search at its level; matching children
    /// with the flag set contribute and let the search fall through — all
    /// the way to this node itself, which also matches whenever no child
    /// claimed the alert outright. The root matches every label set, so the
    /// result is never empty.
    #[must_use]
    pub fn matching(&self, labels: &LabelSet) -> Vec<&Route> {
        let mut out = Vec::new();
        self.collect_matches(labels, &mut out);
        out
    }

    fn collect_matches<'a>(&'a self, labels: &LabelSet, out: &mut Vec<&'a Route>) {
        let mut claimed = false;
        for child in &self.children {
            if matches_all(&child.matchers, labels) {
                child.collect_matches(labels, out);
                if !child.continue_matching {
                    claimed = true;
                    break;
                }
            }
        }
        if !claimed {
            out.push(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tocsin_core::Matcher;

    fn receivers(names: &[&str]) -> HashSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    /// Root -> "default", one child matching team=db -> "dba".
    fn two_level_config(continue_matching: bool) -> RouteConfig {
        RouteConfig {
            receiver: Some("default".to_string()),
            routes: vec![RouteConfig {
                matchers: vec![Matcher::equal("team", "db")],
                receiver: Some("dba".to_string()),
                continue_matching,
                ..RouteConfig::default()
            }],
            ..RouteConfig::default()
        }
    }

    mod group_by_tests {
        use super::*;

        #[test]
        fn parse_all() {
            let parsed = GroupBy::from_config(&["...".to_string()]).unwrap();
            assert_eq!(parsed, GroupBy::All);
        }

        #[test]
        fn parse_none() {
            assert_eq!(GroupBy::from_config(&[]).unwrap(), GroupBy::None);
        }

        #[test]
        fn parse_labels() {
            let parsed =
                GroupBy::from_config(&["alertname".to_string(), "team".to_string()]).unwrap();
            assert!(matches!(parsed, GroupBy::Labels(ref names) if names.len() == 2));
        }

        #[test]
        fn dots_mixed_with_labels_fails() {
            assert!(GroupBy::from_config(&["...".to_string(), "team".to_string()]).is_err());
        }

        #[test]
        fn project_variants() {
            let set = labels(&[("alertname", "HighCPU"), ("team", "db")]);

            assert_eq!(GroupBy::All.project(&set), set);
            assert!(GroupBy::None.project(&set).is_empty());

            let by_team = GroupBy::Labels(["team".to_string()].into_iter().collect());
            assert_eq!(by_team.project(&set), labels(&[("team", "db")]));
        }
    }

    mod build_tests {
        use super::*;

        #[test]
        fn root_without_receiver_fails() {
            let config = RouteConfig::default();
            let result = Route::build(&config, &receivers(&["default"]));
            assert!(matches!(result, Err(DispatchError::InvalidRoute { .. })));
        }

        #[test]
        fn unknown_receiver_fails_at_build() {
            let config = two_level_config(false);
            let result = Route::build(&config, &receivers(&["default"]));
            assert!(
                matches!(result, Err(DispatchError::UnknownReceiver { name }) if name == "dba")
            );
        }

        #[test]
        fn zero_group_interval_fails() {
            let config = RouteConfig {
                receiver: Some("default".to_string()),
                group_interval_secs: Some(0),
                ..RouteConfig::default()
            };
            let result = Route::build(&config, &receivers(&["default"]));
            assert!(matches!(result, Err(DispatchError::InvalidRoute { .. })));
        }

        #[test]
        fn children_inherit_unset_fields() {
            let config = RouteConfig {
                receiver: Some("default".to_string()),
                group_by: Some(vec!["alertname".to_string()]),
                group_wait_secs: Some(10),
                routes: vec![RouteConfig {
                    matchers: vec![Matcher::equal("team", "db")],
                    ..RouteConfig::default()
                }],
                ..RouteConfig::default()
            };

            let root = Route::build(&config, &receivers(&["default"])).unwrap();
            let child = &root.children[0];

            assert_eq!(child.receiver, "default");
            assert_eq!(child.group_by, root.group_by);
            assert_eq!(child.group_wait, Duration::from_secs(10));
            assert_eq!(child.group_interval, DEFAULT_GROUP_INTERVAL);
        }

        #[test]
        fn child_overrides_are_local() {
            let config = RouteConfig {
                receiver: Some("default".to_string()),
                routes: vec![RouteConfig {
                    receiver: Some("dba".to_string()),
                    group_wait_secs: Some(0),
                    group_by: Some(vec![]),
                    ..RouteConfig::default()
                }],
                ..RouteConfig::default()
            };

            let root = Route::build(&config, &receivers(&["default", "dba"])).unwrap();

            assert_eq!(root.receiver, "default");
            assert_eq!(root.group_by, GroupBy::All);
            assert_eq!(root.children[0].group_by, GroupBy::None);
            assert_eq!(root.children[0].group_wait, Duration::ZERO);
        }

        #[test]
        fn node_ids_are_tree_paths() {
            let config = RouteConfig {
                receiver: Some("default".to_string()),
                routes: vec![
                    RouteConfig::default(),
                    RouteConfig {
                        routes: vec![RouteConfig::default()],
                        ..RouteConfig::default()
                    },
                ],
                ..RouteConfig::default()
            };

            let root = Route::build(&config, &receivers(&["default"])).unwrap();

            assert_eq!(root.id, "0");
            assert_eq!(root.children[0].id, "0/0");
            assert_eq!(root.children[1].id, "0/1");
            assert_eq!(root.children[1].children[0].id, "0/1/0");
        }
    }

    mod matching_tests {
        use super::*;

        #[test]
        fn matching_child_wins_without_continue() {
            let root = Route::build(&two_level_config(false), &receivers(&["default", "dba"]))
                .unwrap();

            let matched = root.matching(&labels(&[("team", "db"), ("severity", "critical")]));
            let names: Vec<&str> = matched.iter().map(|r| r.receiver.as_str()).collect();
            assert_eq!(names, vec!["dba"]);
        }

        #[test]
        fn continue_flag_also_matches_the_default() {
            let root =
                Route::build(&two_level_config(true), &receivers(&["default", "dba"])).unwrap();

            let matched = root.matching(&labels(&[("team", "db"), ("severity", "critical")]));
            let names: Vec<&str> = matched.iter().map(|r| r.receiver.as_str()).collect();
            assert_eq!(names, vec!["dba", "default"]);
        }

        #[test]
        fn unmatched_alert_falls_to_the_root() {
            let root = Route::build(&two_level_config(false), &receivers(&["default", "dba"]))
                .unwrap();

            let matched = root.matching(&labels(&[("team", "web")]));
            let names: Vec<&str> = matched.iter().map(|r| r.receiver.as_str()).collect();
            assert_eq!(names, vec!["default"]);
        }

        #[test]
        fn first_matching_sibling_wins() {
            let config = RouteConfig {
                receiver: Some("default".to_string()),
                routes: vec![
                    RouteConfig {
                        matchers: vec![Matcher::equal("team", "db")],
                        receiver: Some("first".to_string()),
                        ..RouteConfig::default()
                    },
                    RouteConfig {
                        matchers: vec![Matcher::equal("team", "db")],
                        receiver: Some("second".to_string()),
                        ..RouteConfig::default()
                    },
                ],
                ..RouteConfig::default()
            };
            let root =
                Route::build(&config, &receivers(&["default", "first", "second"])).unwrap();

            let matched = root.matching(&labels(&[("team", "db")]));
            let names: Vec<&str> = matched.iter().map(|r| r.receiver.as_str()).collect();
            assert_eq!(names, vec!["first"]);
        }

        #[test]
        fn descent_picks_the_most_specific_node() {
            let config = RouteConfig {
                receiver: Some("default".to_string()),
                routes: vec![RouteConfig {
                    matchers: vec![Matcher::equal("team", "db")],
                    receiver: Some("dba".to_string()),
                    routes: vec![RouteConfig {
                        matchers: vec![Matcher::equal("severity", "critical")],
                        receiver: Some("dba-pager".to_string()),
                        ..RouteConfig::default()
                    }],
                    ..RouteConfig::default()
                }],
                ..RouteConfig::default()
            };
            let root =
                Route::build(&config, &receivers(&["default", "dba", "dba-pager"])).unwrap();

            let critical = root.matching(&labels(&[("team", "db"), ("severity", "critical")]));
            assert_eq!(critical[0].receiver, "dba-pager");

            let warning = root.matching(&labels(&[("team", "db"), ("severity", "warning")]));
            assert_eq!(warning[0].receiver, "dba");
        }
    }
}
