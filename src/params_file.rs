use std::path::PathBuf;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConvParams {
    #[serde(rename = "db-dir", default = "default_db_dir")]
    pub(crate) db_dir: PathBuf,
    #[serde(rename = "workspace-dir", default = "default_workspace_dir")]
    pub(crate) workspace_dir: PathBuf,
    #[serde(rename = "checkpoint-dir")]
    pub(crate) checkpoint_dir: Option<PathBuf>,
    #[serde(rename = "authors-file")]
    pub(crate) authors_file: Option<PathBuf>,
    #[serde(rename = "main-branch", default = "default_main_branch")]
    pub(crate) main_branch: String,
    #[serde(rename = "project", default = "Vec::new")]
    pub(crate) projects: Vec<ProjectParams>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProjectParams {
    pub(crate) name: String,
    /// URL of the project's base directory, the parent of
    /// trunk/branches/tags.
    pub(crate) url: String,
    #[serde(rename = "trunk-name", default = "default_trunk")]
    pub(crate) trunk_name: String,
    #[serde(rename = "branches-name", default = "default_branches")]
    pub(crate) branches_name: String,
    #[serde(rename = "tags-name", default = "default_tags")]
    pub(crate) tags_name: String,
    /// Lines whose name contains any of these substrings are not replayed.
    #[serde(rename = "ignore-branches", default = "Vec::new")]
    pub(crate) ignore_branches: Vec<String>,
    /// Revisions to skip entirely.
    #[serde(rename = "ignore-revisions", default = "Vec::new")]
    pub(crate) ignore_revisions: Vec<u32>,
    #[serde(rename = "remote-url")]
    pub(crate) remote_url: Option<String>,
}

fn default_db_dir() -> PathBuf {
    "db".into()
}

fn default_workspace_dir() -> PathBuf {
    "workspace".into()
}

fn default_main_branch() -> String {
    "main".into()
}

fn default_trunk() -> String {
    "trunk".into()
}

fn default_branches() -> String {
    "branches".into()
}

fn default_tags() -> String {
    "tags".into()
}
