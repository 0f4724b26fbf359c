use serde::{Deserialize, Serialize};

/// A declarative mapping between context and an external store.
///
/// `source` and `target` are prefix-tagged references: `context.`,
/// `url.query.`, `localStorage.` or `sessionStorage.`. The prefixes are
/// validated at compile time; an unknown prefix fails compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingDef {
  pub source: String,
  pub target: String,
  /// Optional named transform (registered alongside actions) applied to the
  /// value after the read.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub transform: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_binding() {
    let binding: BindingDef = serde_json::from_value(json!({
      "source": "url.query.campaign",
      "target": "context.campaign",
      "transform": "lowercase"
    }))
    .unwrap();

    assert_eq!(binding.source, "url.query.campaign");
    assert_eq!(binding.transform.as_deref(), Some("lowercase"));
  }
}
