//! HelmRelease comparison, so unchanged releases are not rewritten on every batch.

use kube_core::{ApiResource, DynamicObject};
use serde_json::Value;

pub const HELM_RELEASE_GROUP: &str = "apps.open-cluster-management.io";
pub const HELM_RELEASE_KIND: &str = "HelmRelease";

pub fn is_helm_release(resource: &ApiResource) -> bool {
    resource.group == HELM_RELEASE_GROUP && resource.kind == HELM_RELEASE_KIND
}

/// Whether `desired` would leave the release `existing` describes unchanged:
/// same rendered `spec`, and same source type, first source URL, config map, secret,
/// chart name and chart version under `repo`.
pub fn release_unchanged(existing: &DynamicObject, desired: &DynamicObject) -> bool {
    let (existing, desired) = (&existing.data, &desired.data);

    existing.get("spec") == desired.get("spec")
        && first_source_url(existing) == first_source_url(desired)
        && [
            "/repo/source/type",
            "/repo/configMapRef",
            "/repo/secretRef",
            "/repo/chartName",
            "/repo/version",
        ]
        .iter()
        .all(|pointer| existing.pointer(pointer) == desired.pointer(pointer))
}

fn first_source_url(release: &Value) -> Option<&Value> {
    ["/repo/source/helmRepo/urls/0", "/repo/source/github/urls/0", "/repo/source/git/urls/0"]
        .iter()
        .find_map(|pointer| release.pointer(pointer))
}

#[cfg(test)]
mod tests {
    use kube_core::GroupVersionKind;
    use serde_json::json;

    use super::*;

    fn release(data: Value) -> DynamicObject {
        let gvk = GroupVersionKind::gvk(HELM_RELEASE_GROUP, "v1", HELM_RELEASE_KIND);
        let resource = ApiResource::from_gvk(&gvk);
        DynamicObject::new("nginx-ab12c", &resource).within("ns").data(data)
    }

    fn repo(version: &str) -> Value {
        json!({
            "source": {
                "type": "github",
                "github": {
                    "urls": ["https://github.com/org/charts"],
                    "chartPath": "nginx",
                    "branch": "main",
                },
            },
            "chartName": "nginx",
            "version": version,
            "secretRef": { "name": "git-creds" },
        })
    }

    #[test]
    fn identical_releases_are_unchanged() {
        let existing = release(json!({ "repo": repo("1.0.0"), "spec": { "replicaCount": 2 } }));
        let desired = release(json!({ "repo": repo("1.0.0"), "spec": { "replicaCount": 2 } }));
        assert!(release_unchanged(&existing, &desired));
    }

    #[test]
    fn version_bump_is_a_change() {
        let existing = release(json!({ "repo": repo("1.0.0"), "spec": {} }));
        let desired = release(json!({ "repo": repo("1.1.0"), "spec": {} }));
        assert!(!release_unchanged(&existing, &desired));
    }

    #[test]
    fn spec_change_is_a_change() {
        let existing = release(json!({ "repo": repo("1.0.0"), "spec": { "replicaCount": 2 } }));
        let desired = release(json!({ "repo": repo("1.0.0"), "spec": { "replicaCount": 3 } }));
        assert!(!release_unchanged(&existing, &desired));
    }

    #[test]
    fn source_url_change_is_a_change() {
        let existing = release(json!({ "repo": repo("1.0.0"), "spec": {} }));
        let mut moved = repo("1.0.0");
        moved["source"]["github"]["urls"] = json!(["https://github.com/other/charts"]);
        let desired = release(json!({ "repo": moved, "spec": {} }));
        assert!(!release_unchanged(&existing, &desired));
    }

    #[test]
    fn only_helm_releases_are_compared() {
        let helm_gvk = GroupVersionKind::gvk(HELM_RELEASE_GROUP, "v1", HELM_RELEASE_KIND);
        let release = ApiResource::from_gvk(&helm_gvk);
        let deployment = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        assert!(is_helm_release(&release));
        assert!(!is_helm_release(&deployment));
    }
}
