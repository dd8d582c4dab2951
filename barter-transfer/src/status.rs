use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Normalised status of one leg (withdrawal or deposit) of a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    #[default]
    #[display("unknown")]
    Unknown,
    #[display("pending")]
    Pending,
    #[display("processing")]
    Processing,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
}

impl LegStatus {
    /// Map a venue specific status string onto a [`LegStatus`].
    ///
    /// Matching is case insensitive and treats `-` and spaces as `_`.
    pub fn from_exchange(status: &str) -> Self {
        let normalised = status.trim().to_ascii_lowercase().replace(['-', ' '], "_");

        match normalised.as_str() {
            "success" | "succeeded" | "completed" | "complete" | "done" | "confirmed"
            | "credited" | "finished" | "ok" => Self::Completed,
            "failed" | "failure" | "rejected" | "cancelled" | "canceled" | "refused"
            | "error" | "expired" => Self::Failed,
            "processing" | "sending" | "sent" | "in_progress" | "confirming"
            | "awaiting_approval" | "wait_confirm" | "approved" => Self::Processing,
            "pending" | "new" | "submitted" | "wait" | "waiting" | "created" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Determines if the leg will not change status again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_exchange() {
        struct TestCase {
            input: &'static str,
            expected: LegStatus,
        }

        let cases = vec![
            TestCase { input: "SUCCESS", expected: LegStatus::Completed },
            TestCase { input: "credited", expected: LegStatus::Completed },
            TestCase { input: "Rejected", expected: LegStatus::Failed },
            TestCase { input: "CANCELED", expected: LegStatus::Failed },
            TestCase { input: "in-progress", expected: LegStatus::Processing },
            TestCase { input: "awaiting approval", expected: LegStatus::Processing },
            TestCase { input: " pending ", expected: LegStatus::Pending },
            TestCase { input: "6", expected: LegStatus::Unknown },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                LegStatus::from_exchange(test.input),
                test.expected,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_is_final() {
        assert!(LegStatus::Completed.is_final());
        assert!(LegStatus::Failed.is_final());
        assert!(!LegStatus::Pending.is_final());
        assert!(!LegStatus::Unknown.is_final());
    }
}
