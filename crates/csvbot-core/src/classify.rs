//! Row/file classification rules.
//!
//! A file's category comes from its name; for the multi-group category each row
//! is routed by its `channel_id`.

/// Output group for the main channel of the multi-group export.
pub const CHANNEL_MAIN_GROUP: &str = "ББ";
/// Output group for the secondary channel of the multi-group export.
pub const CHANNEL_EXTRA_GROUP: &str = "ББ ДОП_1";
/// Catch-all group for every other channel id.
pub const CHANNEL_OTHER_GROUP: &str = "ББ ДОП_2";

/// What to do with a CSV file, decided from its file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Category {
    /// All phones go into one named group.
    Single(String),
    /// Phones are split into sub-groups by `channel_id`.
    ChannelSplit,
}

/// A single filename rule: substring needle and the category it selects.
#[derive(Clone, Debug)]
pub struct FilenameRule {
    pub needle: String,
    pub category: Category,
}

impl FilenameRule {
    pub fn single(needle: &str, group: &str) -> Self {
        Self {
            needle: needle.to_string(),
            category: Category::Single(group.to_string()),
        }
    }

    pub fn channel_split(needle: &str) -> Self {
        Self {
            needle: needle.to_string(),
            category: Category::ChannelSplit,
        }
    }

    fn matches(&self, file_name: &str) -> bool {
        file_name.contains(&self.needle)
    }
}

/// Prioritized list of filename rules; evaluation stops at the first match.
#[derive(Clone, Debug)]
pub struct FilenameRules {
    rules: Vec<FilenameRule>,
}

impl Default for FilenameRules {
    fn default() -> Self {
        Self::new(vec![
            FilenameRule::single("MFO5", "Б0"),
            FilenameRule::channel_split("6_web"),
            FilenameRule::single("253", "253"),
            FilenameRule::single("345", "345"),
            FilenameRule::single("389", "Н1"),
            FilenameRule::single("390", "Н2"),
        ])
    }
}

impl FilenameRules {
    pub fn new(rules: Vec<FilenameRule>) -> Self {
        Self { rules }
    }

    /// `None` means the file is not recognized and should be skipped.
    pub fn categorize(&self, file_name: &str) -> Option<&Category> {
        self.rules
            .iter()
            .find(|r| r.matches(file_name))
            .map(|r| &r.category)
    }
}

/// Strip surrounding whitespace and one leading `+`. Empty results are `None`.
pub fn clean_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let cleaned = trimmed.strip_prefix('+').unwrap_or(trimmed).trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Map a `channel_id` cell to its sub-group.
pub fn channel_group(channel_id: &str) -> &'static str {
    match channel_id.trim() {
        "15883" => CHANNEL_MAIN_GROUP,
        "15686" => CHANNEL_EXTRA_GROUP,
        _ => CHANNEL_OTHER_GROUP,
    }
}
