//! Usage reports produced by the monitor and consumed by the dispatcher

use serde::{Deserialize, Serialize};

use super::Channel;

/// Cumulative traffic usage of one channel plus lifecycle flags
///
/// Per monitoring lifetime exactly one report has `first` set (the first
/// successful poll after start) and exactly one has `last` set (the fresh
/// read taken after stop). The two flags are never set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub channel: Channel,
    pub usage: u64,
    pub first: bool,
    pub last: bool,
}

/// Position of a report in its monitoring lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    First,
    Periodic,
    Last,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::First => "first",
            ReportKind::Periodic => "periodic",
            ReportKind::Last => "last",
        }
    }
}

impl Report {
    pub fn first(channel: Channel, usage: u64) -> Self {
        Self {
            channel,
            usage,
            first: true,
            last: false,
        }
    }

    pub fn periodic(channel: Channel, usage: u64) -> Self {
        Self {
            channel,
            usage,
            first: false,
            last: false,
        }
    }

    pub fn last(channel: Channel, usage: u64) -> Self {
        Self {
            channel,
            usage,
            first: false,
            last: true,
        }
    }

    pub fn kind(&self) -> ReportKind {
        if self.first {
            ReportKind::First
        } else if self.last {
            ReportKind::Last
        } else {
            ReportKind::Periodic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_kinds() {
        let channel = Channel::new("bar");
        assert_eq!(Report::first(channel.clone(), 1).kind(), ReportKind::First);
        assert_eq!(Report::periodic(channel.clone(), 1).kind(), ReportKind::Periodic);

        let last = Report::last(channel, 7);
        assert_eq!(last.kind(), ReportKind::Last);
        assert!(!last.first);
        assert_eq!(last.usage, 7);
    }
}
