//! Collaborator interfaces
//!
//! The engine reads metadata and permissions through these traits. Storage
//! and the project directory live outside this crate.

use crate::authorization::{ProjectDetail, ProjectPermission};
use crate::error::ViewResult;
use crate::model::{RoleViewGrant, Source, User, ViewWithSource};

/// View and source metadata.
pub trait ViewStore: Send + Sync {
    fn view_with_source(&self, view_id: u64) -> ViewResult<Option<ViewWithSource>>;

    /// Id of the view called `name` in `project_id`, if any.
    fn view_id_by_name(&self, name: &str, project_id: u64) -> ViewResult<Option<u64>>;

    fn source(&self, source_id: u64) -> ViewResult<Option<Source>>;
}

/// Role-view grant records.
pub trait GrantStore: Send + Sync {
    /// Grants of every role the user holds on the view.
    fn grants_for(&self, user_id: u64, view_id: u64) -> ViewResult<Vec<RoleViewGrant>>;

    fn insert_batch(&self, grants: &[RoleViewGrant]) -> ViewResult<usize>;
}

/// Projects, memberships and permission levels.
pub trait ProjectDirectory: Send + Sync {
    /// Fails with `NotFound` or `Unauthorized` when the user cannot see the project.
    fn project_detail(&self, project_id: u64, user: &User) -> ViewResult<ProjectDetail>;

    fn permission(&self, project: &ProjectDetail, user: &User) -> ViewResult<ProjectPermission>;

    fn allow_get_data(&self, project: &ProjectDetail, user: &User) -> ViewResult<bool>;

    fn is_maintainer(&self, project: &ProjectDetail, user: &User) -> ViewResult<bool>;
}
