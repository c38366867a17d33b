use serde::{Deserialize, Serialize};

/// The six package-change kinds dpkg logs can yield for one package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NewlyInstalled,
    Upgraded,
    Removed,
    HalfInstalled,
    HalfConfigured,
    InstalledAndRemoved,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::NewlyInstalled,
        Category::Upgraded,
        Category::Removed,
        Category::HalfInstalled,
        Category::HalfConfigured,
        Category::InstalledAndRemoved,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::NewlyInstalled => "Newly installed",
            Category::Upgraded => "Upgraded",
            Category::Removed => "Removed",
            Category::HalfInstalled => "Half installed",
            Category::HalfConfigured => "Half configured",
            Category::InstalledAndRemoved => "Installed and removed",
        }
    }
}

/// One package's change in one category on one host. Two events describing the
/// same conceptual change are built independently per host, so comparison is
/// structural over every field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub package: String,
    pub category: Category,
    pub version: String,
    pub previous_version: String,
    pub status: String,
}

impl ChangeEvent {
    pub fn new(package: &str, category: Category, version: &str, previous_version: &str, status: &str) -> Self {
        ChangeEvent {
            package: package.to_string(),
            category,
            version: version.to_string(),
            previous_version: previous_version.to_string(),
            status: status.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = ChangeEvent::new("nginx", Category::NewlyInstalled, "1.18.0-6", "<none>", "installed");
        let b = ChangeEvent::new("nginx", Category::NewlyInstalled, "1.18.0-6", "<none>", "installed");
        assert_eq!(a, b);
        let c = ChangeEvent::new("nginx", Category::NewlyInstalled, "1.18.0-7", "<none>", "installed");
        assert_ne!(a, c);
        let d = ChangeEvent::new("nginx", Category::Upgraded, "1.18.0-6", "<none>", "installed");
        assert_ne!(a, d);
    }
}
