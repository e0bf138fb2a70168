//! String forms for Azure DevOps REST enums.
//!
//! The REST surface exchanges these as camelCase strings; the variants
//! here double as query-parameter values and response fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

macro_rules! rest_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lower = s.to_lowercase();
                match lower.as_str() {
                    $(_ if lower == $text.to_lowercase() => Ok(Self::$variant),)+
                    _ => Err(Error::Validation(format!(
                        concat!("Unknown ", stringify!($name), " value: {}"),
                        s
                    ))),
                }
            }
        }
    };
}

rest_enum! {
    /// Pull request state filter and response field.
    PullRequestStatus {
        NotSet => "notSet",
        Active => "active",
        Abandoned => "abandoned",
        Completed => "completed",
        All => "all",
    }
}

rest_enum! {
    /// Review-thread resolution state.
    CommentThreadStatus {
        Unknown => "unknown",
        Active => "active",
        Fixed => "fixed",
        WontFix => "wontFix",
        Closed => "closed",
        ByDesign => "byDesign",
        Pending => "pending",
    }
}

rest_enum! {
    /// Kind of a pull request comment.
    CommentType {
        Unknown => "unknown",
        Text => "text",
        CodeChange => "codeChange",
        System => "system",
    }
}

rest_enum! {
    /// What a version string refers to when addressing repository content.
    GitVersionType {
        Branch => "branch",
        Commit => "commit",
        Tag => "tag",
    }
}

rest_enum! {
    /// Backing store of a wiki.
    WikiType {
        ProjectWiki => "projectWiki",
        CodeWiki => "codeWiki",
    }
}

rest_enum! {
    /// Timeline record execution state.
    TimelineRecordState {
        Pending => "pending",
        InProgress => "inProgress",
        Completed => "completed",
    }
}

rest_enum! {
    /// Timeline record outcome.
    TaskResult {
        Succeeded => "succeeded",
        SucceededWithIssues => "succeededWithIssues",
        Failed => "failed",
        Canceled => "canceled",
        Skipped => "skipped",
        Abandoned => "abandoned",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_strings() {
        assert_eq!(PullRequestStatus::Active.as_str(), "active");
        assert_eq!(
            "completed".parse::<PullRequestStatus>().unwrap(),
            PullRequestStatus::Completed
        );
        assert_eq!(
            "WONTFIX".parse::<CommentThreadStatus>().unwrap(),
            CommentThreadStatus::WontFix
        );
        assert_eq!(CommentThreadStatus::ByDesign.as_str(), "byDesign");
        assert_eq!(
            "codechange".parse::<CommentType>().unwrap(),
            CommentType::CodeChange
        );
        assert_eq!("tag".parse::<GitVersionType>().unwrap(), GitVersionType::Tag);
        assert_eq!(
            "codewiki".parse::<WikiType>().unwrap(),
            WikiType::CodeWiki
        );
    }

    #[test]
    fn test_unknown_value_is_validation_error() {
        let err = "bogus".parse::<GitVersionType>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_serde_forms() {
        let json = serde_json::to_string(&TaskResult::SucceededWithIssues).unwrap();
        assert_eq!(json, "\"succeededWithIssues\"");
        let parsed: TimelineRecordState = serde_json::from_str("\"inProgress\"").unwrap();
        assert_eq!(parsed, TimelineRecordState::InProgress);
    }

    #[test]
    fn test_display_matches_wire_form() {
        assert_eq!(GitVersionType::Branch.to_string(), "branch");
        assert_eq!(TaskResult::Canceled.to_string(), "canceled");
    }
}
