use std::collections::HashMap;

use crate::emitter::{StatusCounts, TestStatus};
use crate::hierarchy::{DisplayNames, HierarchyAddress};

#[derive(Debug)]
pub struct TestNode {
    pub name: String,
    /// Output received while the test was off the open path.
    pub lines: Vec<String>,
    pub status: TestStatus,
    pub has_output: bool,
    pub opened: bool,
    pub complete: bool,
}

#[derive(Debug)]
pub struct GroupNode {
    pub name: String,
    pub tests: HashMap<String, TestNode>,
    pub order: Vec<String>,
    pub complete: bool,
}

#[derive(Debug)]
pub struct ConfigNode {
    pub name: String,
    pub groups: HashMap<String, GroupNode>,
    pub order: Vec<String>,
    pub complete: bool,
}

#[derive(Debug)]
pub struct AreaNode {
    pub name: String,
    pub configs: HashMap<String, ConfigNode>,
    pub order: Vec<String>,
    pub complete: bool,
}

impl GroupNode {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for test in self.tests.values() {
            counts.add(test.status);
        }
        counts
    }
}

impl ConfigNode {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for group in self.groups.values() {
            counts.merge(group.counts());
        }
        counts
    }
}

impl AreaNode {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for config in self.configs.values() {
            counts.merge(config.counts());
        }
        counts
    }
}

/// Area → Config → Group → Test containment tree. Children keep the order
/// they were first seen in; lookups are direct hash hits at every level.
#[derive(Debug)]
pub struct BufferTree {
    areas: HashMap<String, AreaNode>,
    order: Vec<String>,
    priority: Vec<String>,
}

impl BufferTree {
    pub fn new<S: AsRef<str>>(priority: &[S]) -> Self {
        Self {
            areas: HashMap::new(),
            order: Vec::new(),
            priority: priority.iter().map(|p| p.as_ref().to_string()).collect(),
        }
    }

    /// Create the nodes along `addr` that do not exist yet. Returns true
    /// when a new test node was created.
    pub fn ensure(&mut self, addr: &HierarchyAddress, names: &DisplayNames) -> bool {
        let (Some(group_key), Some(test_key)) = (&addr.group, &addr.test) else {
            return false;
        };

        if !self.areas.contains_key(&addr.area) {
            self.order.push(addr.area.clone());
        }
        let area = self.areas.entry(addr.area.clone()).or_insert_with(|| AreaNode {
            name: names.area.clone(),
            configs: HashMap::new(),
            order: Vec::new(),
            complete: false,
        });

        if !area.configs.contains_key(&addr.config) {
            area.order.push(addr.config.clone());
        }
        let config = area.configs.entry(addr.config.clone()).or_insert_with(|| ConfigNode {
            name: names.config.clone(),
            groups: HashMap::new(),
            order: Vec::new(),
            complete: false,
        });

        if !config.groups.contains_key(group_key) {
            config.order.push(group_key.clone());
        }
        let group = config.groups.entry(group_key.clone()).or_insert_with(|| GroupNode {
            name: names.group.clone(),
            tests: HashMap::new(),
            order: Vec::new(),
            complete: false,
        });

        if group.tests.contains_key(test_key) {
            return false;
        }
        group.order.push(test_key.clone());
        group.tests.insert(
            test_key.clone(),
            TestNode {
                name: names.test.clone(),
                lines: Vec::new(),
                status: TestStatus::Pending,
                has_output: false,
                opened: false,
                complete: false,
            },
        );
        true
    }

    pub fn has_area(&self, area: &str) -> bool {
        self.areas.contains_key(area)
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn area(&self, area: &str) -> Option<&AreaNode> {
        self.areas.get(area)
    }

    pub fn area_mut(&mut self, area: &str) -> Option<&mut AreaNode> {
        self.areas.get_mut(area)
    }

    pub fn config(&self, area: &str, config: &str) -> Option<&ConfigNode> {
        self.areas.get(area)?.configs.get(config)
    }

    pub fn config_mut(&mut self, area: &str, config: &str) -> Option<&mut ConfigNode> {
        self.areas.get_mut(area)?.configs.get_mut(config)
    }

    pub fn group(&self, addr: &HierarchyAddress) -> Option<&GroupNode> {
        self.config(&addr.area, &addr.config)?.groups.get(addr.group.as_ref()?)
    }

    pub fn group_mut(&mut self, addr: &HierarchyAddress) -> Option<&mut GroupNode> {
        let group = addr.group.as_ref()?;
        self.config_mut(&addr.area, &addr.config)?.groups.get_mut(group)
    }

    pub fn test(&self, addr: &HierarchyAddress) -> Option<&TestNode> {
        self.group(addr)?.tests.get(addr.test.as_ref()?)
    }

    pub fn test_mut(&mut self, addr: &HierarchyAddress) -> Option<&mut TestNode> {
        let test = addr.test.as_ref()?;
        self.group_mut(addr)?.tests.get_mut(test)
    }

    /// Areas in display order: priority areas first in priority order, the
    /// rest in first-seen order.
    pub fn area_order(&self) -> Vec<String> {
        let mut order = self.order.clone();
        let rank = |a: &String| self.priority.iter().position(|p| p == a).unwrap_or(usize::MAX);
        // Stable sort keeps first-seen order among unlisted areas.
        order.sort_by_key(rank);
        order
    }

    pub fn first_open_area(&self) -> Option<String> {
        self.area_order()
            .into_iter()
            .find(|a| self.areas.get(a).is_some_and(|n| !n.complete))
    }

    pub fn first_open_config(&self, area: &str) -> Option<String> {
        let node = self.areas.get(area)?;
        first_incomplete(&node.order, |k| node.configs.get(k).map(|c| c.complete))
    }

    pub fn first_open_group(&self, area: &str, config: &str) -> Option<String> {
        let node = self.config(area, config)?;
        first_incomplete(&node.order, |k| node.groups.get(k).map(|g| g.complete))
    }

    pub fn first_open_test(&self, addr: &HierarchyAddress) -> Option<String> {
        let node = self.group(addr)?;
        first_incomplete(&node.order, |k| node.tests.get(k).map(|t| t.complete))
    }

    pub fn all_complete(&self) -> bool {
        !self.areas.is_empty() && self.areas.values().all(|a| a.complete)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for area in self.areas.values() {
            counts.merge(area.counts());
        }
        counts
    }

    /// Clear the completion flag of every ancestor that still holds an
    /// incomplete test. Only tests collected after their group closed can
    /// produce such a node.
    pub fn reopen_stale(&mut self) {
        for area in self.areas.values_mut() {
            for config in area.configs.values_mut() {
                for group in config.groups.values_mut() {
                    if group.tests.values().any(|t| !t.complete) {
                        group.complete = false;
                    }
                }
                if config.groups.values().any(|g| !g.complete) {
                    config.complete = false;
                }
            }
            if area.configs.values().any(|c| !c.complete) {
                area.complete = false;
            }
        }
    }
}

fn first_incomplete<F>(order: &[String], complete: F) -> Option<String>
where
    F: Fn(&str) -> Option<bool>,
{
    order.iter().find(|k| complete(k) == Some(false)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::AREA_PRIORITY;

    fn names(area: &str, group: &str, test: &str) -> DisplayNames {
        DisplayNames {
            area: area.into(),
            config: "none".into(),
            group: group.into(),
            test: test.into(),
        }
    }

    #[test]
    fn test_ensure_is_idempotent_and_ordered() {
        let mut tree = BufferTree::new(&AREA_PRIORITY);
        let a = HierarchyAddress::test("suite", "none", "g", "g__a");
        let b = HierarchyAddress::test("suite", "none", "g", "g__b");
        assert!(tree.ensure(&a, &names("Suite", "g", "a")));
        assert!(tree.ensure(&b, &names("Suite", "g", "b")));
        assert!(!tree.ensure(&a, &names("Suite", "g", "a")));

        let group = tree.group(&a).unwrap();
        assert_eq!(group.order, vec!["g__a", "g__b"]);
        assert_eq!(group.tests.len(), 2);
    }

    #[test]
    fn test_area_priority_order() {
        let mut tree = BufferTree::new(&AREA_PRIORITY);
        for area in ["custom", "scenarios", "suite", "schema", "another"] {
            let addr = HierarchyAddress::test(area, "none", "g", "g__t");
            tree.ensure(&addr, &names(area, "g", "t"));
        }
        assert_eq!(
            tree.area_order(),
            vec!["suite", "schema", "scenarios", "custom", "another"]
        );
    }

    #[test]
    fn test_address_without_test_creates_nothing() {
        let mut tree = BufferTree::new(&AREA_PRIORITY);
        assert!(!tree.ensure(&HierarchyAddress::group("suite", "none", "g"), &names("s", "g", "")));
        assert!(tree.is_empty());
    }
}
