use conduit_core::clock::{Stamp, TransitionClock};
use conduit_core::OperationId;

use crate::error::EngineError;
use crate::operation::OperationStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub operation_id: OperationId,
    pub from: OperationStatus,
    pub to: OperationStatus,
    pub at: Stamp,
}

/// Append-only record of every status change in a session.
#[derive(Debug, Default)]
pub struct AuditLog {
    clock: TransitionClock,
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        operation_id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    ) -> Result<(), EngineError> {
        let at = self.clock.tick()?;
        tracing::debug!(%operation_id, %from, %to, %at, "operation transition");
        self.entries.push(AuditEntry {
            operation_id,
            from,
            to,
            at,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn for_operation(&self, operation_id: OperationId) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.operation_id == operation_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_strictly_increase() {
        let mut log = AuditLog::new();
        let op = OperationId::new();
        log.record(op, OperationStatus::Draft, OperationStatus::Staged).unwrap();
        log.record(op, OperationStatus::Staged, OperationStatus::Previewed).unwrap();
        log.record(OperationId::new(), OperationStatus::Draft, OperationStatus::Abandoned)
            .unwrap();

        let entries = log.entries();
        assert!(entries.windows(2).all(|w| w[0].at < w[1].at));
        assert_eq!(log.for_operation(op).len(), 2);
        assert_eq!(log.for_operation(op)[1].to, OperationStatus::Previewed);
    }
}
