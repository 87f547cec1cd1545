use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// Element location strategies understood by the device driver.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorStrategy {
    #[cfg_attr(feature = "serde-full", serde(rename = "id"))]
    Id,
    #[cfg_attr(feature = "serde-full", serde(rename = "accessibility id"))]
    AccessibilityId,
    #[cfg_attr(feature = "serde-full", serde(rename = "xpath"))]
    Xpath,
    #[cfg_attr(feature = "serde-full", serde(rename = "class name"))]
    ClassName,
    #[cfg_attr(feature = "serde-full", serde(rename = "-android uiautomator"))]
    AndroidUiAutomator,
    #[cfg_attr(feature = "serde-full", serde(rename = "-ios predicate string"))]
    IosPredicate,
    #[cfg_attr(feature = "serde-full", serde(rename = "-ios class chain"))]
    IosClassChain,
    #[cfg_attr(feature = "serde-full", serde(rename = "css selector"))]
    Css,
}

impl LocatorStrategy {
    pub const ALL: [LocatorStrategy; 8] = [
        LocatorStrategy::Id,
        LocatorStrategy::AccessibilityId,
        LocatorStrategy::Xpath,
        LocatorStrategy::ClassName,
        LocatorStrategy::AndroidUiAutomator,
        LocatorStrategy::IosPredicate,
        LocatorStrategy::IosClassChain,
        LocatorStrategy::Css,
    ];

    /// Wire name used by the automation protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorStrategy::Id => "id",
            LocatorStrategy::AccessibilityId => "accessibility id",
            LocatorStrategy::Xpath => "xpath",
            LocatorStrategy::ClassName => "class name",
            LocatorStrategy::AndroidUiAutomator => "-android uiautomator",
            LocatorStrategy::IosPredicate => "-ios predicate string",
            LocatorStrategy::IosClassChain => "-ios class chain",
            LocatorStrategy::Css => "css selector",
        }
    }
}

impl fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocatorStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        LocatorStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .or(match normalized.as_str() {
                "accessibility_id" | "accessibilityid" => Some(LocatorStrategy::AccessibilityId),
                "class_name" | "classname" => Some(LocatorStrategy::ClassName),
                "css" => Some(LocatorStrategy::Css),
                _ => None,
            })
            .ok_or_else(|| SyncError::new(format!("unknown locator strategy: {s}")))
    }
}
