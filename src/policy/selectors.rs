//! Set-based label selector matching.
//!
//! Evaluates `metav1.LabelSelector` the way the API server does:
//! `matchLabels` and `matchExpressions` are ANDed, an absent selector
//! matches everything. A malformed expression is an error; callers in the
//! decision engine downgrade it to a non-match so one bad policy cannot
//! shadow all decisions.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use thiserror::Error;

/// A label selector expression that does not follow the set-based grammar.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid selector expression on key {key:?}: {reason}")]
pub struct SelectorError {
    pub key: String,
    pub reason: String,
}

/// Whether `selector` matches `labels`. `None` matches everything.
pub fn selector_matches(
    selector: Option<&LabelSelector>,
    labels: &BTreeMap<String, String>,
) -> Result<bool, SelectorError> {
    let Some(selector) = selector else {
        return Ok(true);
    };

    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    for expr in selector.match_expressions.iter().flatten() {
        if !expression_matches(expr, labels)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn expression_matches(
    expr: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, SelectorError> {
    let values = expr.values.as_deref().unwrap_or_default();
    match expr.operator.as_str() {
        "In" => {
            if values.is_empty() {
                return Err(SelectorError {
                    key: expr.key.clone(),
                    reason: "In requires at least one value".to_string(),
                });
            }
            Ok(labels
                .get(&expr.key)
                .is_some_and(|v| values.iter().any(|want| want == v)))
        }
        "NotIn" => {
            if values.is_empty() {
                return Err(SelectorError {
                    key: expr.key.clone(),
                    reason: "NotIn requires at least one value".to_string(),
                });
            }
            // A missing key satisfies NotIn.
            Ok(labels
                .get(&expr.key)
                .is_none_or(|v| !values.iter().any(|want| want == v)))
        }
        "Exists" => {
            if !values.is_empty() {
                return Err(SelectorError {
                    key: expr.key.clone(),
                    reason: "Exists takes no values".to_string(),
                });
            }
            Ok(labels.contains_key(&expr.key))
        }
        "DoesNotExist" => {
            if !values.is_empty() {
                return Err(SelectorError {
                    key: expr.key.clone(),
                    reason: "DoesNotExist takes no values".to_string(),
                });
            }
            Ok(!labels.contains_key(&expr.key))
        }
        other => Err(SelectorError {
            key: expr.key.clone(),
            reason: format!("unknown operator {other:?}"),
        }),
    }
}
