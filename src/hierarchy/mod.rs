mod address;
mod collector;

pub use address::{
    normalize_key, parse_tag, tag_line, test_key, DisplayNames, HierarchyAddress, OpenPath,
    AREA_PRIORITY, AREA_SCENARIOS, AREA_SCHEMA, AREA_SUITE, CONFIG_MAIN, CONFIG_NONE,
};
pub use collector::{CollectedTest, FileArea, HierarchyCollector};
