//! Process exit statuses.
//!
//! | status | meaning                                                         |
//! |--------|-----------------------------------------------------------------|
//! | 0      | normal completion, or usage shown                               |
//! | 1      | stub port value outside `[LOW_PORT, HIGH_PORT]`                 |
//! | 2      | stub port value not numeric                                     |
//! | 3      | inverted stub port range, or only one range bound given         |
//! | 4      | port offset not numeric                                         |
//! | 5      | port offset outside `[LOW_PORT, HIGH_PORT]`                     |
//! | 6      | config file unreadable or malformed                             |
//! | 129    | terminated by `SIGHUP`                                          |
//! | 255    | socket error: listen spec, bind, listen, accept or fork failure |

use std::process::ExitCode;

/// Why the broker process is exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerExit {
    Success,
    Usage,
    PortOutOfRange,
    PortNotNumeric,
    InvalidPortRange,
    OffsetNotNumeric,
    OffsetOutOfRange,
    ConfigFile,
    Hangup,
    SocketError,
}

impl BrokerExit {
    pub const fn code(self) -> u8 {
        match self {
            BrokerExit::Success | BrokerExit::Usage => 0,
            BrokerExit::PortOutOfRange => 1,
            BrokerExit::PortNotNumeric => 2,
            BrokerExit::InvalidPortRange => 3,
            BrokerExit::OffsetNotNumeric => 4,
            BrokerExit::OffsetOutOfRange => 5,
            BrokerExit::ConfigFile => 6,
            BrokerExit::Hangup => 129,
            BrokerExit::SocketError => 255,
        }
    }
}

impl From<BrokerExit> for ExitCode {
    fn from(exit: BrokerExit) -> Self {
        ExitCode::from(exit.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_errors_have_distinct_small_codes() {
        let codes = [
            BrokerExit::PortOutOfRange,
            BrokerExit::PortNotNumeric,
            BrokerExit::InvalidPortRange,
            BrokerExit::OffsetNotNumeric,
            BrokerExit::OffsetOutOfRange,
        ]
        .map(BrokerExit::code);

        assert_eq!(codes, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_usage_is_not_a_failure() {
        assert_eq!(BrokerExit::Usage.code(), 0);
    }

    #[test]
    fn test_socket_error_is_255() {
        assert_eq!(BrokerExit::SocketError.code(), 255);
    }
}
