//! Cron expressions for schedule triggers.
//!
//! Workflows declare standard 5-field expressions (minute hour day-of-month
//! month day-of-week). The scheduler backend runs 6-field expressions with a
//! leading seconds field, so expressions are widened with `0` seconds before
//! they are parsed or registered.

use chrono::{DateTime, Utc};

/// Errors from reading a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("cron expression '{expr}' has {found} fields, expected 5")]
    FieldCount { expr: String, found: usize },

    #[error("invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

/// Collapse runs of whitespace so equivalent expressions compare equal.
pub fn normalize_cron(expr: &str) -> String {
    expr.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Widen a 5-field expression to the 6-field form the scheduler runs.
pub fn to_job_expression(expr: &str) -> Result<String, CronError> {
    let normalized = normalize_cron(expr);
    let found = normalized.split(' ').filter(|f| !f.is_empty()).count();
    if found != 5 {
        return Err(CronError::FieldCount {
            expr: expr.trim().to_string(),
            found,
        });
    }
    Ok(format!("0 {normalized}"))
}

fn parse(expr: &str) -> Result<croner::Cron, CronError> {
    let job_expr = to_job_expression(expr)?;
    job_expr
        .parse::<croner::Cron>()
        .map_err(|e| CronError::Invalid {
            expr: expr.trim().to_string(),
            reason: e.to_string(),
        })
}

/// Check that `expr` is a syntactically valid 5-field cron expression.
pub fn validate_cron(expr: &str) -> Result<(), CronError> {
    parse(expr).map(|_| ())
}

/// The first time strictly after `after` at which `expr` fires.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CronError> {
    let cron = parse(expr)?;
    Ok(cron.iter_after(after).next())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn accepts_common_expressions() {
        for expr in ["0 9 * * *", "*/5 * * * *", "30 2 1 * *", "0 0 * * 1-5", "15 10 * 1,6 *"] {
            assert!(validate_cron(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            validate_cron("0 9 * *"),
            Err(CronError::FieldCount {
                expr: "0 9 * *".to_string(),
                found: 4
            })
        );
        assert!(matches!(
            validate_cron("0 0 9 * * *"),
            Err(CronError::FieldCount { found: 6, .. })
        ));
        assert!(matches!(validate_cron(""), Err(CronError::FieldCount { found: 0, .. })));
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(matches!(validate_cron("61 9 * * *"), Err(CronError::Invalid { .. })));
        assert!(matches!(validate_cron("0 25 * * *"), Err(CronError::Invalid { .. })));
        assert!(matches!(validate_cron("a b c d e"), Err(CronError::Invalid { .. })));
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_cron("  0   9 * *\t* "), "0 9 * * *");
        assert_eq!(to_job_expression("0  9 * * *").unwrap(), "0 0 9 * * *");
    }

    #[test]
    fn computes_next_fire_time() {
        let after = Utc.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap();
        let next = next_fire("0 9 * * *", after).unwrap().unwrap();
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 0);
        assert!(next > after);
    }
}
