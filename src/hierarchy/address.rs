use std::sync::OnceLock;

use regex::Regex;

pub const AREA_SUITE: &str = "suite";
pub const AREA_SCHEMA: &str = "schema";
pub const AREA_SCENARIOS: &str = "scenarios";

/// Config key for areas without sub-configuration.
pub const CONFIG_NONE: &str = "none";
pub const CONFIG_MAIN: &str = "main";

/// Display order of known areas. Unlisted areas follow in first-seen order.
pub const AREA_PRIORITY: [&str; 3] = [AREA_SUITE, AREA_SCHEMA, AREA_SCENARIOS];

/// Lowercase, with every run of non-word characters collapsed to `-`.
pub fn normalize_key(name: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"\W+").expect("valid key regex"));
    re.replace_all(&name.to_lowercase(), "-").into_owned()
}

/// Key of a test inside its group: `group__test`, normalized.
pub fn test_key(group: &str, test: &str) -> String {
    normalize_key(&format!("{}__{}", group, test))
}

/// A position in the display tree: Area → Config → Test Group → Test.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchyAddress {
    pub area: String,
    pub config: String,
    pub group: Option<String>,
    pub test: Option<String>,
}

impl HierarchyAddress {
    pub fn config(area: &str, config: &str) -> Self {
        Self {
            area: area.to_string(),
            config: config.to_string(),
            group: None,
            test: None,
        }
    }

    pub fn group(area: &str, config: &str, group: &str) -> Self {
        Self {
            group: Some(group.to_string()),
            ..Self::config(area, config)
        }
    }

    pub fn test(area: &str, config: &str, group: &str, test: &str) -> Self {
        Self {
            test: Some(test.to_string()),
            ..Self::group(area, config, group)
        }
    }

    /// Address built from display names, keys normalized.
    pub fn from_names(area: &str, config: &str, group: &str, test: &str) -> Self {
        Self::test(
            &normalize_key(area),
            &normalize_key(config),
            &normalize_key(group),
            &test_key(group, test),
        )
    }

    /// Same address with the test component dropped.
    pub fn group_only(&self) -> Self {
        Self { test: None, ..self.clone() }
    }
}

impl std::fmt::Display for HierarchyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.area, self.config)?;
        if let Some(g) = &self.group {
            write!(f, "/{}", g)?;
        }
        if let Some(t) = &self.test {
            write!(f, "/{}", t)?;
        }
        Ok(())
    }
}

/// Human-readable names for the nodes along an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayNames {
    pub area: String,
    pub config: String,
    pub group: String,
    pub test: String,
}

/// The single node-chain currently eligible for immediate output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenPath {
    pub area: Option<String>,
    pub config: Option<String>,
    pub group: Option<String>,
    pub test: Option<String>,
}

impl OpenPath {
    /// True when `addr` names exactly the open test.
    pub fn is_test(&self, addr: &HierarchyAddress) -> bool {
        addr.test.is_some()
            && self.area.as_deref() == Some(addr.area.as_str())
            && self.config.as_deref() == Some(addr.config.as_str())
            && self.group == addr.group
            && self.test == addr.test
    }

    pub fn is_empty(&self) -> bool {
        self.area.is_none()
    }
}

/// Legacy in-band tag: `[[e2e|area|config|group|test]] content`.
pub fn tag_line(names: &DisplayNames, content: &str) -> String {
    format!(
        "[[e2e|{}|{}|{}|{}]] {}",
        names.area, names.config, names.group, names.test, content
    )
}

/// Split a tagged line into its address and the content after the tag.
pub fn parse_tag(line: &str) -> Option<(HierarchyAddress, String)> {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let re = TAG.get_or_init(|| {
        Regex::new(r"(?s)^\[\[e2e\|([^|\]]+)\|([^|\]]+)\|([^|\]]+)\|([^|\]]+)\]\] ?(.*)$")
            .expect("valid tag regex")
    });
    let caps = re.captures(line)?;
    let addr = HierarchyAddress::from_names(&caps[1], &caps[2], &caps[3], &caps[4]);
    Some((addr, caps[5].to_string()))
}
