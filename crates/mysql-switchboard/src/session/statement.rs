use std::fmt;

/// Prepared statement handle, tagged by the responder that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementHandle {
    /// Statement prepared on an upstream connection
    Upstream { connection_id: u64, statement_id: u32 },
    /// Statement owned by the local responder
    Local { statement_id: u32 },
}

impl StatementHandle {
    /// Statement id as known to the responder that created it
    pub fn statement_id(&self) -> u32 {
        match self {
            StatementHandle::Upstream { statement_id, .. }
            | StatementHandle::Local { statement_id } => *statement_id,
        }
    }
}

impl fmt::Display for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementHandle::Upstream {
                connection_id,
                statement_id,
            } => write!(f, "upstream statement {} on connection {}", statement_id, connection_id),
            StatementHandle::Local { statement_id } => write!(f, "local statement {}", statement_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_id_and_display() {
        let upstream = StatementHandle::Upstream {
            connection_id: 7,
            statement_id: 3,
        };
        assert_eq!(upstream.statement_id(), 3);
        assert_eq!(upstream.to_string(), "upstream statement 3 on connection 7");

        let local = StatementHandle::Local { statement_id: 9 };
        assert_eq!(local.statement_id(), 9);
        assert_eq!(local.to_string(), "local statement 9");
    }
}
