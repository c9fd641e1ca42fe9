//! Pick, inspect and highlight helpers built on the two sockets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dom::DomNode;
use crate::picker::ElementPicker;
use crate::resolver::{normalize_raw_path, PathEntry};
use crate::runner::ScriptExecutor;
use crate::InspectorError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectOptions {
    #[serde(rename = "useCachedUI")]
    pub use_cached_ui: bool,
    pub collect_texts: bool,
}

/// Quotes `s` as a script string literal.
fn literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

pub fn inspect_script(path: &str, options: &InspectOptions) -> String {
    let options = serde_json::to_string(options).unwrap_or_else(|_| "{}".to_string());
    format!(
        "JSON.stringify((new Field({})).inspect({}));",
        literal(path),
        options
    )
}

/// Inspects the subtree rooted at the field `path`.
pub async fn inspect_target<E>(
    runner: &E,
    target_id: &str,
    path: &str,
    options: &InspectOptions,
    timeout_ms: u64,
) -> Result<DomNode, InspectorError>
where
    E: ScriptExecutor + ?Sized,
{
    let raw = runner
        .run(target_id, &inspect_script(path, options), timeout_ms)
        .await?;
    serde_json::from_str(&raw)
        .map_err(|e| InspectorError::Parse(format!("Failed to parse response JSON ({e}): {raw}")))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    /// Field path with any unterminated window header closed.
    pub path: String,
    pub path_info: Vec<PathEntry>,
    pub tree: DomNode,
}

/// Lets the operator pick a node, then inspects it.
pub async fn select_and_inspect<E>(
    picker: &ElementPicker,
    runner: &E,
    target_id: &str,
    options: &InspectOptions,
    timeout_ms: u64,
) -> Result<Inspection, InspectorError>
where
    E: ScriptExecutor + ?Sized,
{
    let selected = picker.open(target_id).await?;
    let path = normalize_raw_path(&selected.path);
    tracing::debug!(target = %target_id, %path, "Inspecting selection");
    let tree = inspect_target(runner, target_id, &path, options, timeout_ms).await?;
    Ok(Inspection {
        path,
        path_info: selected.path_info,
        tree,
    })
}

/// Remembers the last highlighted field so the next highlight can clear it.
#[derive(Debug, Clone, Default)]
pub struct HighlightSession {
    last: Option<String>,
}

impl HighlightSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_path(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Script highlighting `path`, preceded by a lowlight of the previous
    /// path. `None` for an empty path, in which case nothing is recorded.
    pub fn highlight_script(&mut self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        let mut code = String::new();
        if let Some(previous) = self.last.as_deref() {
            code.push_str(&format!(
                "var lowlightField = new Field({}); if (lowlightField.exists()) {{ lowlightField.lowlight(); }} ",
                literal(previous)
            ));
        }
        code.push_str(&format!(
            "(new Field({})).highlightWithColor(\"red\");",
            literal(path)
        ));
        self.last = Some(path.to_string());
        Some(code)
    }

    pub async fn highlight<E>(
        &mut self,
        runner: &E,
        target_id: &str,
        path: &str,
        timeout_ms: u64,
    ) -> Result<(), InspectorError>
    where
        E: ScriptExecutor + ?Sized,
    {
        let Some(code) = self.highlight_script(path) else {
            tracing::warn!(target = %target_id, "Attempting to highlight empty path");
            return Err(InspectorError::InvalidArgument("empty highlight path".into()));
        };
        runner.run(target_id, &code, timeout_ms).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        scripts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl ScriptExecutor for Recorder {
        async fn run(&self, _target: &str, code: &str, _timeout: u64) -> Result<String, InspectorError> {
            self.scripts.lock().unwrap().push(code.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn inspect_script_quotes_path_and_options() {
        let options = InspectOptions {
            use_cached_ui: true,
            collect_texts: false,
        };
        assert_eq!(
            inspect_script("{App}*/\"Ok\"", &options),
            r#"JSON.stringify((new Field("{App}*/\"Ok\"")).inspect({"useCachedUI":true,"collectTexts":false}));"#
        );
    }

    #[test]
    fn highlight_lowlights_the_previous_path() {
        let mut session = HighlightSession::new();
        assert_eq!(session.highlight_script(""), None);
        assert_eq!(
            session.highlight_script("a/b").as_deref(),
            Some(r#"(new Field("a/b")).highlightWithColor("red");"#)
        );
        let second = session.highlight_script("a/c").unwrap();
        assert!(second.starts_with(r#"var lowlightField = new Field("a/b");"#));
        assert!(second.ends_with(r#"(new Field("a/c")).highlightWithColor("red");"#));
        assert_eq!(session.last_path(), Some("a/c"));
    }

    #[tokio::test]
    async fn inspect_target_parses_tree() {
        let recorder = Recorder {
            reply: r#"{"type":"Window","children":[{"type":"Button","name":"Ok"}]}"#.into(),
            ..Default::default()
        };
        let tree = inspect_target(&recorder, "app", "{App}*", &InspectOptions::default(), 100)
            .await
            .unwrap();
        assert_eq!(tree.children[0].path_component(), Some("Ok"));
        assert!(recorder.scripts.lock().unwrap()[0].contains("new Field(\"{App}*\")"));
    }

    #[tokio::test]
    async fn inspect_target_reports_raw_text_on_bad_json() {
        let recorder = Recorder {
            reply: "undefined".into(),
            ..Default::default()
        };
        let err = inspect_target(&recorder, "app", "x", &InspectOptions::default(), 100)
            .await
            .unwrap_err();
        assert!(matches!(&err, InspectorError::Parse(msg) if msg.ends_with(": undefined")));
    }

    #[tokio::test]
    async fn empty_highlight_runs_nothing() {
        let recorder = Recorder::default();
        let mut session = HighlightSession::new();
        assert!(session.highlight(&recorder, "app", "", 100).await.is_err());
        assert!(recorder.scripts.lock().unwrap().is_empty());
        session.highlight(&recorder, "app", "a", 100).await.unwrap();
        assert_eq!(recorder.scripts.lock().unwrap().len(), 1);
    }
}
