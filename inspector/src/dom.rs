use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of an inspected UI tree, as returned by `Field.inspect`.
///
/// Driver-specific properties that have no field of their own are kept in
/// `extra` so nothing the agent reports is lost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessible_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DomNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DomNode {
    /// The label this node contributes to a slash-separated field path.
    pub fn path_component(&self) -> Option<&str> {
        [
            &self.accessible_name,
            &self.name,
            &self.simple_type,
            &self.shell_type,
            &self.node_type,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .find(|v| !v.is_empty())
    }

    pub fn child(&self, index: usize) -> Option<&DomNode> {
        self.children.get(index)
    }

    /// Follows `indices` from this node; an empty walk yields `self`.
    pub fn descend(&self, indices: &[usize]) -> Option<&DomNode> {
        indices
            .iter()
            .try_fold(self, |node, &i| node.children.get(i))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(DomNode::node_count).sum::<usize>()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Builds the field path of the node reached by `indices` from `root`.
///
/// Every hop below the root contributes its [`DomNode::path_component`]; the
/// root itself contributes nothing. Returns `None` if an index is out of
/// range.
pub fn node_path(root: &DomNode, indices: &[usize], root_path: &str) -> Option<String> {
    let mut components = Vec::with_capacity(indices.len());
    let mut node = root;
    for &i in indices {
        node = node.children.get(i)?;
        components.push(node.path_component().unwrap_or_default());
    }
    let path = components.join("/");
    Some(match (root_path.is_empty(), path.is_empty()) {
        (_, true) => root_path.to_string(),
        (true, false) => path,
        (false, false) => format!("{root_path}/{path}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> DomNode {
        serde_json::from_value(json!({
            "type": "Window",
            "name": "Main",
            "children": [
                {
                    "type": "Pane",
                    "simpleType": "pane",
                    "children": [
                        { "type": "Button", "name": "", "accessibleName": "Ok", "id": 17 }
                    ]
                },
                { "type": "Edit" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn unknown_fields_are_kept() {
        let root = tree();
        let button = root.descend(&[0, 0]).unwrap();
        assert_eq!(button.extra.get("id"), Some(&json!(17)));
        assert_eq!(serde_json::to_value(button).unwrap()["id"], json!(17));
        assert_eq!(root.node_count(), 4);
    }

    #[test]
    fn path_component_prefers_accessible_name() {
        let root = tree();
        assert_eq!(root.descend(&[0, 0]).unwrap().path_component(), Some("Ok"));
        assert_eq!(root.descend(&[0]).unwrap().path_component(), Some("pane"));
        assert_eq!(root.descend(&[1]).unwrap().path_component(), Some("Edit"));
        assert_eq!(DomNode::default().path_component(), None);
    }

    #[test]
    fn node_path_skips_the_root() {
        let root = tree();
        assert_eq!(node_path(&root, &[0, 0], "").as_deref(), Some("pane/Ok"));
        assert_eq!(node_path(&root, &[1], "{App}*").as_deref(), Some("{App}*/Edit"));
        assert_eq!(node_path(&root, &[], "{App}*").as_deref(), Some("{App}*"));
        assert_eq!(node_path(&root, &[5], ""), None);
    }
}
