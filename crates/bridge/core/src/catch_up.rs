//! Startup catch-up helpers.
//!
//! Modules persist their work as rows and publish the row id as the
//! notification payload. At startup each module scans its backlog and feeds
//! the ids through [`drain`], which keeps going past individual failures.

use std::future::Future;

use crate::error::ModuleError;

/// Outcome of one catch-up scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub scanned: usize,
    pub processed: usize,
    pub failed: Vec<(i64, String)>,
}

impl CatchUpReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Parses the decimal row-id payload convention.
pub fn parse_row_id(payload: &str) -> Result<i64, ModuleError> {
    payload
        .trim()
        .parse::<i64>()
        .map_err(|e| ModuleError::InvalidPayload {
            payload: payload.to_string(),
            reason: e.to_string(),
        })
}

/// Runs `handler` for every id in order. A failing id is recorded and the
/// scan moves on to the next one.
pub async fn drain<I, F, Fut>(ids: I, mut handler: F) -> CatchUpReport
where
    I: IntoIterator<Item = i64>,
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<(), ModuleError>>,
{
    let mut report = CatchUpReport::default();
    for id in ids {
        report.scanned += 1;
        match handler(id).await {
            Ok(()) => report.processed += 1,
            Err(e) => report.failed.push((id, e.to_string())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("42", 42)]
    #[case(" 7\n", 7)]
    #[case("-1", -1)]
    fn test_parse_row_id_accepts_decimal(#[case] payload: &str, #[case] expected: i64) {
        assert_eq!(parse_row_id(payload).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("12.5")]
    fn test_parse_row_id_rejects_garbage(#[case] payload: &str) {
        assert!(matches!(
            parse_row_id(payload),
            Err(ModuleError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_drain_continues_past_failures() {
        let mut seen = Vec::new();
        let report = drain([1, 2, 3, 4], |id| {
            seen.push(id);
            async move {
                if id % 2 == 0 {
                    Err(ModuleError::NotFound(id))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(report.scanned, 4);
        assert_eq!(report.processed, 2);
        assert_eq!(
            report.failed,
            vec![
                (2, "item 2 not found".to_string()),
                (4, "item 4 not found".to_string())
            ]
        );
        assert!(!report.is_clean());
    }
}
