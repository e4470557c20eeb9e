//! Wire types for the GitLab v4 REST API.

use serde::{Deserialize, Serialize};

use super::{GroupNode, ProjectHandle, ProjectRef, Visibility};

#[derive(Debug, Deserialize)]
pub(crate) struct GroupPayload {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamespacePayload {
    pub full_path: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectPayload {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    pub namespace: Option<NamespacePayload>,
}

/// Body of `GET /projects/:id/export`.
#[derive(Debug, Deserialize)]
pub(crate) struct ExportPayload {
    #[serde(default)]
    pub export_status: Option<String>,
}

/// Body of `POST /projects/import` and `GET /projects/:id/import`.
#[derive(Debug, Deserialize)]
pub(crate) struct ImportPayload {
    pub id: u64,
    #[serde(default)]
    pub import_status: Option<String>,
    #[serde(default)]
    pub import_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateGroupBody<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub visibility: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
}

pub(crate) fn to_group_node(payload: GroupPayload) -> GroupNode {
    GroupNode {
        id: payload.id,
        name: payload.name,
        path: payload.path,
        full_path: payload.full_path,
        parent_id: payload.parent_id,
        // Instances can hide visibility from non-members; private is the
        // conservative default for anything we then mirror.
        visibility: payload.visibility.unwrap_or(Visibility::Private),
    }
}

pub(crate) fn to_project_ref(payload: ProjectPayload) -> ProjectRef {
    let group_full_path = payload
        .namespace
        .map(|ns| ns.full_path)
        .unwrap_or_else(|| {
            payload
                .path_with_namespace
                .rsplit_once('/')
                .map(|(group, _)| group.to_string())
                .unwrap_or_default()
        });

    ProjectRef {
        id: payload.id,
        name: payload.name,
        path: payload.path,
        full_path: payload.path_with_namespace,
        group_full_path,
    }
}

pub(crate) fn to_project_handle(payload: ProjectPayload) -> ProjectHandle {
    ProjectHandle {
        id: payload.id,
        full_path: payload.path_with_namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_payload_deserializes() {
        let json = r#"{
            "id": 12,
            "name": "Team A",
            "path": "team-a",
            "full_path": "org/team-a",
            "parent_id": 3,
            "visibility": "internal"
        }"#;
        let payload: GroupPayload = serde_json::from_str(json).unwrap();
        let group = to_group_node(payload);
        assert_eq!(group.id, 12);
        assert_eq!(group.full_path, "org/team-a");
        assert_eq!(group.parent_id, Some(3));
        assert_eq!(group.visibility, Visibility::Internal);
    }

    #[test]
    fn group_without_visibility_defaults_private() {
        let json = r#"{"id": 1, "name": "g", "path": "g", "full_path": "g", "parent_id": null}"#;
        let payload: GroupPayload = serde_json::from_str(json).unwrap();
        assert_eq!(to_group_node(payload).visibility, Visibility::Private);
    }

    #[test]
    fn project_payload_uses_namespace_full_path() {
        let json = r#"{
            "id": 7,
            "name": "App",
            "path": "app",
            "path_with_namespace": "org/team-a/app",
            "namespace": {"full_path": "org/team-a"}
        }"#;
        let payload: ProjectPayload = serde_json::from_str(json).unwrap();
        let project = to_project_ref(payload);
        assert_eq!(project.full_path, "org/team-a/app");
        assert_eq!(project.group_full_path, "org/team-a");
    }

    #[test]
    fn project_payload_falls_back_to_path_split() {
        let json = r#"{
            "id": 7,
            "name": "App",
            "path": "app",
            "path_with_namespace": "org/team-a/app"
        }"#;
        let payload: ProjectPayload = serde_json::from_str(json).unwrap();
        assert_eq!(to_project_ref(payload).group_full_path, "org/team-a");
    }

    #[test]
    fn create_group_body_omits_missing_parent() {
        let body = CreateGroupBody {
            name: "sub",
            path: "sub",
            visibility: "private",
            parent_id: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("parent_id"));

        let body = CreateGroupBody {
            parent_id: Some(9),
            ..body
        };
        assert!(serde_json::to_string(&body).unwrap().contains("\"parent_id\":9"));
    }

    #[test]
    fn import_payload_reads_error() {
        let json = r#"{"id": 4, "import_status": "failed", "import_error": "disk full"}"#;
        let payload: ImportPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.import_status.as_deref(), Some("failed"));
        assert_eq!(payload.import_error.as_deref(), Some("disk full"));
    }
}
