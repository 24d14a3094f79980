//! Ordered mismatch records for backup verification.
//!
//! A comparison pass appends findings as it walks the left and right
//! inputs; the assertion/report step consumes the whole sequence. Append
//! order is report order: no dedup, no sort. Single writer per pass.

use std::fmt;

use serde::Serialize;

/// Identifies one compared entity instance by model name and the ordinal
/// position it appeared at in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceID {
    pub model: String,
    pub ordinal: Option<usize>,
}

impl InstanceID {
    pub fn new(model: impl Into<String>, ordinal: Option<usize>) -> Self {
        Self {
            model: model.into(),
            ordinal,
        }
    }

    pub fn pretty(&self) -> String {
        match self.ordinal {
            Some(ordinal) => format!("InstanceID(model: {:?}, ordinal: {ordinal})", self.model),
            None => format!("InstanceID(model: {:?})", self.model),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    /// Primary keys did not appear in ascending order, or repeated.
    UnorderedInput,
    /// Left and right had different instance counts for a model.
    UnequalCounts,
    /// Scrubbed JSON of two instances was not byte-for-byte equal.
    UnequalJson,
    /// Two datetime fields were not equal.
    DatetimeInequality,
    /// A datetime field to compare was missing or null.
    DatetimeMissing,
    /// The right side's date_updated was not newer than the left's.
    DateUpdatedNotMonotonic,
    /// An obfuscated field (email, hash) failed equality.
    ObfuscatedMismatch,
    /// An obfuscated field to compare was missing or null.
    ObfuscatedMissing,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One immutable record of a left/right mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub on: InstanceID,
    pub left_pk: Option<i64>,
    pub right_pk: Option<i64>,
    pub reason: String,
}

impl Finding {
    pub fn pretty(&self) -> String {
        let mut out = format!("Finding(\n\tkind: {},\n\ton: {}", self.kind, self.on.pretty());
        if let Some(left_pk) = self.left_pk {
            out.push_str(&format!(",\n\tleft_pk: {left_pk}"));
        }
        if let Some(right_pk) = self.right_pk {
            out.push_str(&format!(",\n\tright_pk: {right_pk}"));
        }
        if !self.reason.is_empty() {
            out.push_str(&format!(",\n\treason: {}", self.reason));
        }
        out.push_str("\n)");
        out
    }
}

/// Append-only sequence of findings, pretty-printable for asserts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Findings(Vec<Finding>);

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, finding: Finding) {
        self.0.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.0.extend(findings);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.0.iter()
    }

    pub fn pretty(&self) -> String {
        self.0
            .iter()
            .map(Finding::pretty)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl IntoIterator for Findings {
    type Item = Finding;
    type IntoIter = std::vec::IntoIter<Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: FindingKind, ordinal: usize) -> Finding {
        Finding {
            kind,
            on: InstanceID::new("monitors.monitor", Some(ordinal)),
            left_pk: Some(ordinal as i64),
            right_pk: None,
            reason: format!("mismatch at ordinal {ordinal}"),
        }
    }

    #[test]
    fn test_empty_and_append() {
        let mut findings = Findings::new();
        assert!(findings.is_empty());

        findings.append(finding(FindingKind::UnequalCounts, 1));
        assert!(!findings.is_empty());
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_extend_preserves_append_order() {
        let mut findings = Findings::new();
        findings.append(finding(FindingKind::UnorderedInput, 1));
        findings.extend([
            finding(FindingKind::UnequalJson, 2),
            finding(FindingKind::DatetimeInequality, 3),
        ]);

        let kinds: Vec<FindingKind> = findings.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FindingKind::UnorderedInput,
                FindingKind::UnequalJson,
                FindingKind::DatetimeInequality,
            ]
        );
    }

    #[test]
    fn test_pretty_rendering() {
        let mut findings = Findings::new();
        findings.append(Finding {
            kind: FindingKind::DateUpdatedNotMonotonic,
            on: InstanceID::new("monitors.checkin", Some(4)),
            left_pk: Some(10),
            right_pk: Some(11),
            reason: "right side is older".to_string(),
        });

        let rendered = findings.pretty();
        assert!(rendered.contains("kind: DateUpdatedNotMonotonic"));
        assert!(rendered.contains("ordinal: 4"));
        assert!(rendered.contains("left_pk: 10"));
        assert!(rendered.contains("right_pk: 11"));
        assert!(rendered.contains("reason: right side is older"));
    }

    #[test]
    fn test_pretty_omits_absent_fields() {
        let mut findings = Findings::new();
        findings.append(Finding {
            kind: FindingKind::UnequalCounts,
            on: InstanceID::new("monitors.monitor", None),
            left_pk: None,
            right_pk: None,
            reason: String::new(),
        });

        let rendered = findings.pretty();
        assert!(!rendered.contains("left_pk"));
        assert!(!rendered.contains("right_pk"));
        assert!(!rendered.contains("reason"));
        assert!(!rendered.contains("ordinal"));
    }
}
