use serde::{Deserialize, Serialize};

/// Source browser a bookmark collection was read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BrowserTag {
    Safari,
    Chrome,
    Firefox,
    Edge,
    Brave,
    Opera,
    Vivaldi,
    Unknown,
}

impl BrowserTag {
    /// Chromium-based browsers share the same JSON bookmark format.
    pub fn is_chromium_based(&self) -> bool {
        matches!(
            self,
            Self::Chrome | Self::Edge | Self::Brave | Self::Opera | Self::Vivaldi
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safari => "Safari",
            Self::Chrome => "Chrome",
            Self::Firefox => "Firefox",
            Self::Edge => "Edge",
            Self::Brave => "Brave",
            Self::Opera => "Opera",
            Self::Vivaldi => "Vivaldi",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for BrowserTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chromium_family() {
        assert!(BrowserTag::Chrome.is_chromium_based());
        assert!(BrowserTag::Brave.is_chromium_based());
        assert!(!BrowserTag::Firefox.is_chromium_based());
        assert!(!BrowserTag::Safari.is_chromium_based());
    }
}
