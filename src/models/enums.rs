use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The wire/storage spelling doubles as the serde name.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Perspective {
    Pm => "pm",
    Dev => "dev",
    Unknown => "unknown",
});

str_enum!(Direction {
    PmToDev => "pm_to_dev",
    DevToPm => "dev_to_pm",
});

str_enum!(Importance {
    High => "high",
    Medium => "medium",
    Low => "low",
});

impl Default for Perspective {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self::Medium
    }
}

impl Perspective {
    /// Parse model output. Only the exact wire values are recognised;
    /// anything else is `Unknown`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Unknown)
    }
}

impl Direction {
    /// Product text goes to engineering; everything else goes to product.
    pub fn for_perspective(perspective: Perspective) -> Self {
        match perspective {
            Perspective::Pm => Self::PmToDev,
            Perspective::Dev | Perspective::Unknown => Self::DevToPm,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::DevToPm
    }
}
