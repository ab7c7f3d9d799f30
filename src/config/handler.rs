use serde::{Deserialize, Serialize};

/// A pipeline type declared in configuration
///
/// Example:
/// ```json
/// {
///   "extends": ["Base"],
///   "middleware": ["auth", "audit"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerDef {
    /// Parent handler names; their middleware comes first, in this order
    #[serde(default)]
    pub extends: Vec<String>,

    /// Own middleware, by registered name, appended after the parents'
    #[serde(default)]
    pub middleware: Vec<String>,
}
