use std::fmt;

/// Lifecycle of a [`Promise`](crate::Promise).
///
/// The discriminants are the stable numeric codes exposed to callers:
/// `Pending = -1`, `Resolved = 0`, `Rejected = 1`, `Cancelled = 2`.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending = -1,
    Resolved = 0,
    Rejected = 1,
    Cancelled = 2,
}

impl Status {
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Any status other than `Pending` is terminal.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl TryFrom<i8> for Status {
    type Error = i8;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(Status::Pending),
            0 => Ok(Status::Resolved),
            1 => Ok(Status::Rejected),
            2 => Ok(Status::Cancelled),
            other => Err(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Resolved => "resolved",
            Status::Rejected => "rejected",
            Status::Cancelled => "cancelled",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Pending.code(), -1);
        assert_eq!(Status::Resolved.code(), 0);
        assert_eq!(Status::Rejected.code(), 1);
        assert_eq!(Status::Cancelled.code(), 2);
    }

    #[test]
    fn test_status_from_code() {
        for status in [
            Status::Pending,
            Status::Resolved,
            Status::Rejected,
            Status::Cancelled,
        ] {
            assert_eq!(Status::try_from(status.code()), Ok(status));
        }
        assert_eq!(Status::try_from(3), Err(3));
    }

    #[test]
    fn test_only_pending_is_not_terminal() {
        assert!(!Status::Pending.is_terminal());
        assert!(Status::Resolved.is_terminal());
        assert!(Status::Rejected.is_terminal());
        assert!(Status::Cancelled.is_terminal());
    }
}
