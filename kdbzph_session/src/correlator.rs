use kdbzph_protocol::ResponseEnvelope;

/// The single outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// Reply to the pending request.
    Matched,
    /// Nothing is pending; a late reply, e.g. after a disconnect cleared the request.
    Orphaned,
    /// Something is pending but the reply carries another id (or none).
    Mismatched {
        expected: String,
        got: Option<String>,
    },
}

/// Issues request ids and checks replies against the pending request.
///
/// With at most one request in flight the id comparison is a consistency
/// check, not a lookup.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    last_id: u64,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> String {
        self.last_id += 1;
        self.last_id.to_string()
    }

    pub fn correlate(
        &self,
        pending: Option<&PendingRequest>,
        envelope: &ResponseEnvelope,
    ) -> Correlation {
        let Some(pending) = pending else {
            return Correlation::Orphaned;
        };
        match envelope.id.as_deref() {
            Some(id) if id == pending.id => Correlation::Matched,
            got => Correlation::Mismatched {
                expected: pending.id.clone(),
                got: got.map(str::to_string),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(id: &str) -> PendingRequest {
        PendingRequest {
            id: id.to_string(),
            expr: "1+1".to_string(),
        }
    }

    #[test]
    fn ids_strictly_increase() {
        let mut c = RequestCorrelator::new();
        let ids: Vec<u64> = (0..5).map(|_| c.next_id().parse().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn matching_id_correlates() {
        let c = RequestCorrelator::new();
        let env = ResponseEnvelope::success(Some("3".into()), json!(2));
        assert_eq!(c.correlate(Some(&pending("3")), &env), Correlation::Matched);
    }

    #[test]
    fn wrong_or_missing_id_is_a_mismatch() {
        let c = RequestCorrelator::new();
        let wrong = ResponseEnvelope::success(Some("4".into()), json!(2));
        assert_eq!(
            c.correlate(Some(&pending("3")), &wrong),
            Correlation::Mismatched {
                expected: "3".into(),
                got: Some("4".into())
            }
        );
        let missing = ResponseEnvelope::failure(None, None);
        assert!(matches!(
            c.correlate(Some(&pending("3")), &missing),
            Correlation::Mismatched { got: None, .. }
        ));
    }

    #[test]
    fn reply_without_pending_is_orphaned() {
        let c = RequestCorrelator::new();
        let env = ResponseEnvelope::success(Some("9".into()), json!("late"));
        assert_eq!(c.correlate(None, &env), Correlation::Orphaned);
    }
}
